pub mod steam_session;

pub use steam_session::{AdminSession, OwnerSession, SteamSession};
