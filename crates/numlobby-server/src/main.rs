use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use numlobby_server::config::DEFAULT_CONFIG_PATH;
use numlobby_server::{LobbyConfig, LobbySession, bind_first_available};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .skip(1)
        .find_map(|a| a.strip_prefix("--config=").map(String::from))
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = LobbyConfig::load(&config_path);
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Refusing to start");
        return ExitCode::FAILURE;
    }

    let listener = match bind_first_available(&config) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "No listener available");
            return ExitCode::FAILURE;
        },
    };
    match listener.local_addr() {
        Ok(addr) => tracing::info!(
            %addr,
            countdown_secs = config.countdown_secs,
            "Server listening on port {}",
            addr.port()
        ),
        Err(e) => tracing::warn!(error = %e, "Listening on an unknown address"),
    }

    let report = LobbySession::new(config).run(listener).await;
    match report.winner {
        Some(winner) => tracing::info!(
            players = report.players,
            client_id = winner.client_id,
            number = winner.number,
            "Lobby won"
        ),
        None => tracing::info!("Lobby closed with no players"),
    }

    ExitCode::SUCCESS
}
