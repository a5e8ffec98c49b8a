use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::session::{LobbyReport, SharedLobby, TickOutcome};

/// Source of countdown ticks.
pub trait Ticker: Send + 'static {
    /// Resolve when the next tick is due.
    fn tick(&mut self) -> impl Future<Output = ()> + Send;
}

impl Ticker for Interval {
    fn tick(&mut self) -> impl Future<Output = ()> + Send {
        async move {
            Interval::tick(self).await;
        }
    }
}

/// An interval whose first tick fires one `period` from now, not immediately.
pub fn interval_ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Ticks delivered on demand through a [`TickTrigger`].
pub struct ManualTicker {
    ticks: mpsc::UnboundedReceiver<()>,
}

#[derive(Clone)]
pub struct TickTrigger {
    ticks: mpsc::UnboundedSender<()>,
}

impl TickTrigger {
    /// Queue one tick. Returns false once the countdown has stopped listening.
    pub fn tick(&self) -> bool {
        self.ticks.send(()).is_ok()
    }
}

/// Once every trigger is dropped the countdown waits forever.
pub fn manual_ticker() -> (TickTrigger, ManualTicker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TickTrigger { ticks: tx }, ManualTicker { ticks: rx })
}

impl Ticker for ManualTicker {
    fn tick(&mut self) -> impl Future<Output = ()> + Send {
        async move {
            if self.ticks.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Drive the lobby countdown until a tick starts the game.
pub async fn run_countdown<T: Ticker>(lobby: SharedLobby, mut ticker: T) -> LobbyReport {
    loop {
        ticker.tick().await;
        let mut lobby = lobby.lock().await;
        match lobby.tick() {
            TickOutcome::Counting { announced, pruned } => {
                tracing::trace!(announced, pruned, "Countdown tick");
            },
            TickOutcome::Started(report) => return report,
            TickOutcome::Ignored => return lobby.finish_now(),
        }
    }
}
