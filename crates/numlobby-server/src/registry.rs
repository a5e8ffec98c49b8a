use bytes::Bytes;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use numlobby_core::ClientId;
use numlobby_core::lobby::{NUMBER_MAX, draw_number};

/// Per-client queue of outbound lines, drained by the client's connection task.
/// Bounded so a stalled socket shows up as a failed send instead of a wait.
pub type ClientOutbox = mpsc::Sender<Bytes>;

/// A registered participant.
#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    pub number: u8,
    pub outbox: ClientOutbox,
    /// Cancelled when the lobby drops this client, telling its connection to
    /// close without writing what is still queued.
    pub dropped: CancellationToken,
}

impl Client {
    /// False once the connection task has exited (write failed or peer reset).
    pub fn is_connected(&self) -> bool {
        !self.outbox.is_closed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub id: ClientId,
    pub number: u8,
    pub connected: bool,
}

/// Join-ordered set of clients and their numbers.
///
/// Not synchronized on its own: it lives inside the lobby and is only reached
/// through the lobby lock.
pub struct ClientRegistry {
    clients: Vec<Client>,
    rng: StdRng,
    max_number: u8,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(NUMBER_MAX, None)
    }
}

impl ClientRegistry {
    pub fn new(max_number: u8, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            clients: Vec::new(),
            rng,
            max_number,
        }
    }

    /// Register a connection with a freshly drawn number. If `id` is already
    /// present its existing number is returned and the new outbox is dropped.
    pub fn register(&mut self, id: ClientId, outbox: ClientOutbox) -> u8 {
        if let Some(existing) = self.get(id) {
            return existing.number;
        }
        let number = draw_number(&mut self.rng, self.max_number);
        self.insert(id, number, outbox);
        number
    }

    /// Register a connection with a known number. Returns false, changing
    /// nothing, if `id` is already registered.
    pub fn insert(&mut self, id: ClientId, number: u8, outbox: ClientOutbox) -> bool {
        if self.get(id).is_some() {
            return false;
        }
        self.clients.push(Client {
            id,
            number,
            outbox,
            dropped: CancellationToken::new(),
        });
        true
    }

    /// Drop a client. Its connection closes at once, discarding anything
    /// still queued. Removing an absent id is a no-op.
    pub fn remove(&mut self, id: ClientId) -> bool {
        let Some(index) = self.clients.iter().position(|c| c.id == id) else {
            return false;
        };
        let client = self.clients.remove(index);
        client.dropped.cancel();
        true
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == id)
    }

    /// The token a registered client's connection watches for removal.
    pub fn drop_signal(&self, id: ClientId) -> Option<CancellationToken> {
        self.get(id).map(|c| c.dropped.clone())
    }

    /// Clients in join order.
    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.iter()
    }

    pub fn snapshot(&self) -> Vec<ClientSnapshot> {
        self.clients
            .iter()
            .map(|c| ClientSnapshot {
                id: c.id,
                number: c.number,
                connected: c.is_connected(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Remove every client. Their connections write what is already queued,
    /// then close.
    pub fn clear(&mut self) {
        self.clients.clear();
    }
}
