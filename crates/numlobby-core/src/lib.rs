pub mod lobby;
pub mod notice;

/// Identifies one accepted connection for the lifetime of a lobby.
pub type ClientId = u64;
