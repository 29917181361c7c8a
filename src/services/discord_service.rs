use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

use crate::config::settings::NotificationConfig;
use crate::error::{AppError, AppResult};
use crate::models::{Grant, LineItem, PurchaseType};

const FOOTER: &str = "SkinVaults Notification System";
const GREEN: u32 = 0x00ff00;
const BLUE: u32 = 0x0099ff;
const GOLD: u32 = 0xffd700;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub footer: serde_json::Value,
    pub timestamp: String,
}

fn field(name: &str, value: String, inline: bool) -> EmbedField {
    EmbedField { name: name.to_string(), value, inline }
}

fn money(amount_minor: i64, currency: &str) -> String {
    format!("{:.2} {}", amount_minor as f64 / 100.0, currency.to_uppercase())
}

/// One line per grant, as shown in notifications.
pub fn describe_grant(grant: &Grant) -> String {
    match grant {
        Grant::Pro { months } => format!("Pro: {} month{}", months, if *months == 1 { "" } else { "s" }),
        Grant::Credits { amount } => format!("Credits: {}", amount),
        Grant::Spins { amount } => format!("Spins: {}", amount),
        Grant::Consumable { consumable_type, quantity } => format!("{} x{}", consumable_type, quantity),
    }
}

/// Everything a purchase notification shows.
#[derive(Debug, Clone)]
pub struct PurchaseNotice<'a> {
    pub session_id: &'a str,
    pub steam_id: &'a str,
    pub purchase_type: PurchaseType,
    pub amount_minor: i64,
    pub currency: &'a str,
    pub test_mode: bool,
    pub grants: &'a [Grant],
    pub pro_until: Option<DateTime<Utc>>,
}

pub fn purchase_embed(notice: &PurchaseNotice<'_>, now: DateTime<Utc>) -> Embed {
    let (title, color) = match notice.purchase_type {
        PurchaseType::Pro => ("💰 Pro Purchase", GREEN),
        PurchaseType::Credits => ("💳 Credits Purchase", GREEN),
        PurchaseType::Spins => ("🎡 Spins Purchase", GREEN),
        PurchaseType::Consumable => ("📦 Consumable Purchase", BLUE),
        PurchaseType::Cart => ("🛒 Cart Purchase", GOLD),
    };
    let title = if notice.test_mode { format!("[TEST] {}", title) } else { title.to_string() };

    let items = if notice.grants.is_empty() {
        "-".to_string()
    } else {
        notice.grants.iter().map(describe_grant).collect::<Vec<_>>().join("\n")
    };

    let mut fields = vec![
        field("Steam ID", format!("`{}`", notice.steam_id), true),
        field("Amount", money(notice.amount_minor, notice.currency), true),
        field("Items", items, false),
    ];
    if let Some(pro_until) = notice.pro_until {
        fields.push(field("Pro Expires", format!("<t:{}:F>", pro_until.timestamp()), true));
    }
    fields.push(field("Session ID", format!("`{}`", notice.session_id), false));

    Embed {
        title,
        description: format!("A user has completed a {} purchase!", notice.purchase_type),
        color,
        fields,
        footer: json!({ "text": FOOTER }),
        timestamp: now.to_rfc3339(),
    }
}

pub fn checkout_embed(
    steam_id: &str,
    cart_id: &str,
    items: &[LineItem],
    total_minor: i64,
    currency: &str,
    promo_code: Option<&str>,
    now: DateTime<Utc>,
) -> Embed {
    let lines = items
        .iter()
        .map(|i| format!("{} x{}", i.name, i.quantity))
        .collect::<Vec<_>>()
        .join("\n");
    let mut fields = vec![
        field("Steam ID", format!("`{}`", steam_id), true),
        field("Total", money(total_minor, currency), true),
        field("Items", lines, false),
        field("Cart ID", format!("`{}`", cart_id), false),
    ];
    if let Some(code) = promo_code {
        fields.push(field("Promo Code", format!("`{}`", code), true));
    }

    Embed {
        title: "🛒 Checkout Started".to_string(),
        description: "A user has started a checkout.".to_string(),
        color: BLUE,
        fields,
        footer: json!({ "text": FOOTER }),
        timestamp: now.to_rfc3339(),
    }
}

/// Posts embeds to the configured Discord channel webhooks.
#[derive(Clone)]
pub struct DiscordWebhookClient {
    http: reqwest::Client,
    purchase_url: Option<String>,
    cart_url: Option<String>,
}

impl DiscordWebhookClient {
    pub fn new(config: &NotificationConfig, timeout_secs: u64) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build Discord HTTP client: {}", e)))?;
        Ok(Self {
            http,
            purchase_url: config.discord_purchase_webhook_url.clone(),
            cart_url: config.discord_cart_webhook_url.clone(),
        })
    }

    pub fn has_purchase_channel(&self) -> bool {
        self.purchase_url.is_some()
    }

    /// Fails when the channel is not configured or Discord rejects the post.
    pub async fn send_purchase(&self, embed: &Embed) -> AppResult<()> {
        let url = self
            .purchase_url
            .as_deref()
            .ok_or_else(|| AppError::Configuration("No Discord purchase webhook configured".to_string()))?;
        self.post(url, embed).await
    }

    /// Skipped silently when no cart channel is configured.
    pub async fn send_checkout(&self, embed: &Embed) -> AppResult<()> {
        match self.cart_url.as_deref() {
            Some(url) => self.post(url, embed).await,
            None => {
                debug!("No Discord cart webhook configured, skipping checkout notice");
                Ok(())
            }
        }
    }

    async fn post(&self, url: &str, embed: &Embed) -> AppResult<()> {
        let response = self
            .http
            .post(url)
            .json(&json!({ "embeds": [embed] }))
            .send()
            .await
            .map_err(|e| AppError::External(format!("Discord webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::External(format!(
                "Discord webhook returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(url: Option<String>) -> NotificationConfig {
        NotificationConfig { discord_purchase_webhook_url: url, ..Default::default() }
    }

    #[test]
    fn embed_lists_every_grant() {
        let grants = vec![Grant::Pro { months: 3 }, Grant::Credits { amount: 1500 }];
        let notice = PurchaseNotice {
            session_id: "cs_1",
            steam_id: "76561198000000001",
            purchase_type: PurchaseType::Cart,
            amount_minor: 2998,
            currency: "eur",
            test_mode: true,
            grants: &grants,
            pro_until: None,
        };
        let embed = purchase_embed(&notice, Utc::now());
        assert_eq!(embed.title, "[TEST] 🛒 Cart Purchase");
        assert_eq!(embed.fields[1].value, "29.98 EUR");
        assert_eq!(embed.fields[2].value, "Pro: 3 months\nCredits: 1500");
    }

    #[tokio::test]
    async fn purchase_without_channel_is_an_error() {
        let client = DiscordWebhookClient::new(&config(None), 5).unwrap();
        let embed = checkout_embed("1", "cart_1", &[], 0, "eur", None, Utc::now());
        assert!(matches!(client.send_purchase(&embed).await, Err(AppError::Configuration(_))));
        assert!(client.send_checkout(&embed).await.is_ok());
    }

    #[tokio::test]
    async fn rejected_post_surfaces_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("POST", "/hook").with_status(429).with_body("rate limited").create_async().await;

        let client = DiscordWebhookClient::new(&config(Some(format!("{}/hook", server.url()))), 5).unwrap();
        let embed = checkout_embed("1", "cart_1", &[], 0, "eur", None, Utc::now());
        let err = client.send_purchase(&embed).await.unwrap_err();
        assert!(err.to_string().contains("429"));
    }
}
