use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use numlobby_core::notice::Notice;
use numlobby_server::countdown::{TickTrigger, manual_ticker};
use numlobby_server::{LobbyConfig, LobbyReport, LobbySession, SharedLobby, bind_first_available};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// A lobby on a loopback port whose countdown only moves when told to.
pub struct TestLobby {
    pub addr: SocketAddr,
    pub lobby: SharedLobby,
    pub trigger: TickTrigger,
    run: JoinHandle<LobbyReport>,
}

impl TestLobby {
    pub async fn start(countdown_secs: u32) -> Self {
        let config = LobbyConfig {
            bind_addr: "127.0.0.1".to_string(),
            port_range_start: 0,
            port_range_end: 0,
            countdown_secs,
            linger_ms: 1000,
            ..LobbyConfig::default()
        };
        let listener = bind_first_available(&config).unwrap();
        let addr = listener.local_addr().unwrap();

        let session = LobbySession::new(config);
        let lobby = session.lobby();
        let (trigger, ticker) = manual_ticker();
        let run = tokio::spawn(session.run_with_ticker(listener, ticker));

        Self {
            addr,
            lobby,
            trigger,
            run,
        }
    }

    pub fn tick(&self, n: usize) {
        for _ in 0..n {
            assert!(self.trigger.tick(), "countdown stopped listening");
        }
    }

    /// Tick one second at a time until exactly `n` clients are registered.
    /// Returns how many ticks that took.
    pub async fn tick_until_registered(&self, n: usize, max_ticks: usize) -> usize {
        for ticks in 0..=max_ticks {
            if self.registered().await == n {
                return ticks;
            }
            if ticks < max_ticks {
                self.tick(1);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
        panic!("registry never reached {n} clients within {max_ticks} ticks");
    }

    /// Wait for `run` to return.
    pub async fn finish(self) -> LobbyReport {
        tokio::time::timeout(Duration::from_secs(5), self.run)
            .await
            .expect("lobby did not finish")
            .unwrap()
    }

    pub async fn registered(&self) -> usize {
        self.lobby.lock().await.registry().len()
    }

    /// Poll until exactly `n` clients are registered.
    pub async fn wait_for_registered(&self, n: usize) {
        tokio::time::timeout(READ_TIMEOUT, async {
            while self.registered().await != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("registry never reached {n} clients"));
    }
}

pub struct TestClient {
    reader: BufReader<TcpStream>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Connect and consume the greeting. Returns the assigned number.
    pub async fn join(addr: SocketAddr) -> (Self, u8) {
        let mut client = Self::connect(addr).await;
        assert_eq!(client.read_notice().await, Some(Notice::Waiting));
        match client.read_notice().await {
            Some(Notice::YourNumber(n)) => (client, n),
            other => panic!("Expected YourNumber, got: {other:?}"),
        }
    }

    /// Close the sending side only, the client keeps reading.
    pub async fn close_write(&mut self) {
        self.reader.get_mut().shutdown().await.unwrap();
    }

    /// Next notice, or `None` once the server has closed the connection.
    pub async fn read_notice(&mut self) -> Option<Notice> {
        let mut line = String::new();
        let read = tokio::time::timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a notice");
        match read {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(Notice::parse_line(&line).unwrap()),
        }
    }

    /// Every remaining notice up to the server's close.
    pub async fn read_to_close(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        while let Some(notice) = self.read_notice().await {
            notices.push(notice);
        }
        notices
    }
}
