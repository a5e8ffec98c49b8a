pub mod config;
pub mod connection;
pub mod countdown;
pub mod error;
pub mod listener;
pub mod registry;
pub mod session;

pub use config::LobbyConfig;
pub use error::{ConfigError, LobbyError};
pub use listener::bind_first_available;
pub use session::{LobbyReport, LobbySession, SharedLobby};
