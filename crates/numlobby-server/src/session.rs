use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use numlobby_core::ClientId;
use numlobby_core::lobby::{LobbyPhase, select_winner};
use numlobby_core::notice::Notice;

use crate::config::LobbyConfig;
use crate::connection::handle_connection;
use crate::countdown::{Ticker, interval_ticker, run_countdown};
use crate::registry::{ClientOutbox, ClientRegistry};

/// The one lock guarding phase, countdown and registry together.
pub type SharedLobby = Arc<Mutex<Lobby>>;

/// Back-off after a failed `accept` so a persistent error does not spin.
const ACCEPT_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(50);

pub(crate) fn notice_bytes(notice: Notice) -> Bytes {
    Bytes::from(notice.to_line())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WinnerInfo {
    pub client_id: ClientId,
    pub number: u8,
}

/// Summary of a finished lobby.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LobbyReport {
    /// Clients still registered when the countdown expired.
    pub players: usize,
    pub winner: Option<WinnerInfo>,
    /// Result notices that could not be queued.
    pub failed_notices: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Registered { number: u8 },
    /// The lobby has already started; the connection must be closed unregistered.
    Rejected,
    /// The connection died before its number could be queued.
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// `announced` seconds were broadcast and the countdown moved on.
    Counting { announced: u32, pruned: usize },
    /// This tick started the game, which then ran to completion.
    Started(LobbyReport),
    /// The lobby was no longer waiting.
    Ignored,
}

/// Session state. Every method expects to be called with the lobby lock
/// held and none of them await, so effects never interleave.
pub struct Lobby {
    phase: LobbyPhase,
    countdown_remaining: u32,
    registry: ClientRegistry,
    accept_shutdown: CancellationToken,
    report: Option<LobbyReport>,
}

impl Lobby {
    pub fn new(config: &LobbyConfig, accept_shutdown: CancellationToken) -> Self {
        Self {
            phase: LobbyPhase::Waiting,
            countdown_remaining: config.countdown_secs,
            registry: ClientRegistry::new(config.max_number, config.rng_seed),
            accept_shutdown,
            report: None,
        }
    }

    pub fn phase(&self) -> LobbyPhase {
        self.phase
    }

    pub fn countdown_remaining(&self) -> u32 {
        self.countdown_remaining
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Set once the lobby is finished.
    pub fn report(&self) -> Option<&LobbyReport> {
        self.report.as_ref()
    }

    /// Register a newly accepted connection and queue its number.
    pub fn admit(&mut self, id: ClientId, outbox: ClientOutbox) -> Admission {
        if self.phase != LobbyPhase::Waiting {
            return Admission::Rejected;
        }

        let number = self.registry.register(id, outbox);
        let queued = self
            .registry
            .get(id)
            .map(|c| c.outbox.try_send(notice_bytes(Notice::YourNumber(number))));

        match queued {
            Some(Ok(())) => Admission::Registered { number },
            Some(Err(e)) => {
                tracing::debug!(client_id = id, error = %e, "Could not queue number");
                self.registry.remove(id);
                Admission::Disconnected
            },
            None => Admission::Disconnected,
        }
    }

    /// Drop a client whose transport failed. Absent ids are ignored.
    pub fn remove(&mut self, id: ClientId) -> bool {
        let removed = self.registry.remove(id);
        if removed {
            tracing::debug!(client_id = id, remaining = self.registry.len(), "Client removed");
        }
        removed
    }

    /// Advance the countdown by one second.
    pub fn tick(&mut self) -> TickOutcome {
        if self.phase != LobbyPhase::Waiting {
            return TickOutcome::Ignored;
        }
        if self.countdown_remaining == 0 {
            return TickOutcome::Started(self.start());
        }

        let announced = self.countdown_remaining;
        let line = notice_bytes(Notice::SecondsLeft(announced));
        let mut dead = Vec::new();
        for client in self.registry.iter() {
            if !client.is_connected() {
                tracing::debug!(client_id = client.id, "Client gone before tick");
                dead.push(client.id);
                continue;
            }
            if let Err(e) = client.outbox.try_send(line.clone()) {
                tracing::warn!(client_id = client.id, error = %e, "Countdown notice failed");
                dead.push(client.id);
            }
        }
        for &id in &dead {
            self.registry.remove(id);
        }

        self.countdown_remaining -= 1;
        tracing::debug!(
            remaining = self.countdown_remaining,
            players = self.registry.len(),
            pruned = dead.len(),
            "{announced} seconds left to join"
        );

        if self.countdown_remaining == 0 {
            return TickOutcome::Started(self.start());
        }
        TickOutcome::Counting {
            announced,
            pruned: dead.len(),
        }
    }

    /// Finish the lobby regardless of the countdown. Returns the existing
    /// report if it already finished.
    pub fn finish_now(&mut self) -> LobbyReport {
        if let Some(report) = &self.report {
            return report.clone();
        }
        if self.phase == LobbyPhase::Waiting {
            return self.start();
        }
        // start() was interrupted part way
        self.registry.clear();
        self.accept_shutdown.cancel();
        self.phase = LobbyPhase::Finished;
        let report = LobbyReport::default();
        self.report = Some(report.clone());
        report
    }

    fn transition(&mut self, next: LobbyPhase) -> bool {
        let valid = self.phase.can_transition_to(next);
        if valid {
            self.phase = next;
        } else {
            tracing::warn!(from = ?self.phase, to = ?next, "Invalid lobby phase transition");
        }
        valid
    }

    /// WAITING -> STARTED -> FINISHED: announce the winner, close every client
    /// and stop the accept loop.
    fn start(&mut self) -> LobbyReport {
        let started = self.transition(LobbyPhase::Started);
        debug_assert!(started, "start() called outside of Waiting");

        let snapshot = self.registry.snapshot();
        let players = snapshot.len();
        tracing::info!(players, "Game starting");

        let numbers: Vec<u8> = snapshot.iter().map(|c| c.number).collect();
        let winner = select_winner(&numbers)
            .and_then(|index| snapshot.get(index))
            .map(|c| WinnerInfo {
                client_id: c.id,
                number: c.number,
            });

        let mut failed_notices = 0;
        match winner {
            None => tracing::info!("No clients connected"),
            Some(winner) => {
                tracing::info!(
                    client_id = winner.client_id,
                    number = winner.number,
                    "The winner is a client with number {}",
                    winner.number
                );
                let lost = notice_bytes(Notice::Lost {
                    winning_number: winner.number,
                });
                for client in self.registry.iter() {
                    let line = if client.id == winner.client_id {
                        notice_bytes(Notice::Winner)
                    } else {
                        lost.clone()
                    };
                    if let Err(e) = client.outbox.try_send(line) {
                        tracing::warn!(client_id = client.id, error = %e, "Result notice failed");
                        failed_notices += 1;
                    }
                }
            },
        }

        self.registry.clear();
        self.accept_shutdown.cancel();
        let finished = self.transition(LobbyPhase::Finished);
        debug_assert!(finished, "start() could not finish the lobby");

        let report = LobbyReport {
            players,
            winner,
            failed_notices,
        };
        self.report = Some(report.clone());
        report
    }
}

/// Runs one lobby from the first accept to the final close.
pub struct LobbySession {
    lobby: SharedLobby,
    shutdown: CancellationToken,
    config: LobbyConfig,
}

impl LobbySession {
    pub fn new(config: LobbyConfig) -> Self {
        let shutdown = CancellationToken::new();
        let lobby = Lobby::new(&config, shutdown.clone());
        Self {
            lobby: Arc::new(Mutex::new(lobby)),
            shutdown,
            config,
        }
    }

    pub fn lobby(&self) -> SharedLobby {
        Arc::clone(&self.lobby)
    }

    /// Run with a real one-tick-per-interval countdown.
    pub async fn run(self, listener: TcpListener) -> LobbyReport {
        let ticker = interval_ticker(self.config.tick_interval());
        self.run_with_ticker(listener, ticker).await
    }

    /// Accept connections until the countdown driven by `ticker` starts the
    /// game, then wait for every connection to flush its last line and close.
    pub async fn run_with_ticker<T: Ticker>(self, listener: TcpListener, ticker: T) -> LobbyReport {
        let driver_lobby = Arc::clone(&self.lobby);
        let cancel_on_exit = self.shutdown.clone();
        let driver = tokio::spawn(async move {
            // also stops the accept loop if the driver dies
            let _guard = cancel_on_exit.drop_guard();
            run_countdown(driver_lobby, ticker).await
        });

        let mut connections = accept_loop(
            listener,
            &self.lobby,
            &self.shutdown,
            self.config.outbox_capacity,
        )
        .await;

        let report = match driver.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Countdown driver failed");
                self.lobby.lock().await.finish_now()
            },
        };

        let drained = tokio::time::timeout(self.config.linger(), async {
            while let Some(joined) = connections.join_next().await {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "Connection task failed");
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                pending = connections.len(),
                "Connections still flushing after linger, aborting"
            );
            connections.abort_all();
        }

        tracing::info!(players = report.players, "Lobby finished");
        report
    }
}

async fn accept_loop(
    listener: TcpListener,
    lobby: &SharedLobby,
    shutdown: &CancellationToken,
    outbox_capacity: usize,
) -> JoinSet<()> {
    let mut connections = JoinSet::new();
    let mut next_id: ClientId = 1;

    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                if shutdown.is_cancelled() {
                    tracing::debug!(%peer, "Lobby started, closing late connection");
                    break;
                }
                let id = next_id;
                next_id += 1;
                tracing::debug!(client_id = id, %peer, "Accepted connection");
                connections.spawn(handle_connection(
                    stream,
                    id,
                    Arc::clone(lobby),
                    outbox_capacity,
                ));
            },
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            },
        }

        while let Some(joined) = connections.try_join_next() {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "Connection task failed");
            }
        }
    }

    drop(listener);
    tracing::debug!("Listener closed");
    connections
}
