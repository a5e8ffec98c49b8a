use std::fmt;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use numlobby_core::ClientId;
use numlobby_core::notice::Notice;

use crate::session::{Admission, SharedLobby};

/// Why a connection stopped before the lobby finished with it.
#[derive(Debug)]
enum Disconnect {
    /// The lobby removed the client, nothing more may be written.
    Dropped,
    Io(std::io::Error),
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dropped => write!(f, "dropped by the lobby"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

/// Serve one accepted connection: register it with the lobby, greet it, then
/// write whatever the lobby queues for it until the outbox is closed.
///
/// Transport failures are contained here. The client is removed from the
/// registry and everyone else carries on.
pub async fn handle_connection(
    stream: TcpStream,
    id: ClientId,
    lobby: SharedLobby,
    outbox_capacity: usize,
) {
    let (outbox, queue) = mpsc::channel(outbox_capacity);
    let (admission, dropped) = {
        let mut lobby = lobby.lock().await;
        let admission = lobby.admit(id, outbox);
        (admission, lobby.registry().drop_signal(id))
    };
    let dropped = match (admission, dropped) {
        (Admission::Registered { number }, Some(dropped)) => {
            tracing::info!(client_id = id, number, "Client registered");
            dropped
        },
        (Admission::Rejected, _) => {
            tracing::debug!(client_id = id, "Lobby already started, closing connection");
            return;
        },
        _ => {
            tracing::debug!(client_id = id, "Client disconnected during registration");
            return;
        },
    };

    match pump(stream, queue, &dropped).await {
        Ok(()) => tracing::debug!(client_id = id, "Connection closed by lobby"),
        Err(Disconnect::Dropped) => {
            tracing::debug!(client_id = id, "Client dropped, closing without flushing");
        },
        Err(reason) => {
            tracing::debug!(client_id = id, %reason, "Client disconnected");
            lobby.lock().await.remove(id);
        },
    }
}

/// Write the greeting, then queued lines until the lobby drops the sending
/// side. The read half is only watched for a reset. Anything a client sends
/// is discarded, and a client that closes its write side keeps listening.
async fn pump(
    stream: TcpStream,
    mut queue: mpsc::Receiver<Bytes>,
    dropped: &CancellationToken,
) -> Result<(), Disconnect> {
    let (mut reader, mut writer) = stream.into_split();
    let mut scratch = [0u8; 256];
    let mut reading = true;

    // the queue already holds the number, so the greeting must go out first
    let greeting = Bytes::from(Notice::Waiting.to_line());
    let mut result = write_line(&mut writer, &greeting, dropped).await;
    while result.is_ok() {
        tokio::select! {
            biased;
            _ = dropped.cancelled() => result = Err(Disconnect::Dropped),
            line = queue.recv() => match line {
                Some(line) => result = write_line(&mut writer, &line, dropped).await,
                None => break,
            },
            read = reader.read(&mut scratch), if reading => match read {
                Ok(0) => reading = false,
                Ok(_) => {},
                Err(e) => result = Err(Disconnect::Io(e)),
            },
        }
    }

    // stop the lobby queueing lines nobody will write
    queue.close();
    if !matches!(result, Err(Disconnect::Dropped))
        && let Err(e) = writer.shutdown().await
    {
        tracing::trace!(error = %e, "Shutdown after disconnect failed");
    }
    result
}

async fn write_line(
    writer: &mut OwnedWriteHalf,
    line: &Bytes,
    dropped: &CancellationToken,
) -> Result<(), Disconnect> {
    tokio::select! {
        biased;
        _ = dropped.cancelled() => Err(Disconnect::Dropped),
        written = writer.write_all(line) => written.map_err(Disconnect::Io),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    use numlobby_core::lobby::LobbyPhase;

    use super::*;
    use crate::config::LobbyConfig;
    use crate::session::Lobby;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    fn shared_lobby(countdown_secs: u32) -> SharedLobby {
        let config = LobbyConfig {
            countdown_secs,
            ..LobbyConfig::default()
        };
        Arc::new(Mutex::new(Lobby::new(&config, CancellationToken::new())))
    }

    async fn read_notice(reader: &mut BufReader<TcpStream>) -> Option<Notice> {
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .unwrap();
        (read > 0).then(|| Notice::parse_line(&line).unwrap())
    }

    #[tokio::test]
    async fn greets_then_assigns_number() {
        let (server, client) = socket_pair().await;
        let lobby = shared_lobby(3);
        let task = tokio::spawn(handle_connection(server, 1, Arc::clone(&lobby), 8));

        let mut reader = BufReader::new(client);
        assert_eq!(read_notice(&mut reader).await, Some(Notice::Waiting));
        let Some(Notice::YourNumber(number)) = read_notice(&mut reader).await else {
            panic!("expected number notice");
        };
        assert_eq!(lobby.lock().await.registry().get(1).unwrap().number, number);

        lobby.lock().await.finish_now();
        assert_eq!(read_notice(&mut reader).await, Some(Notice::Winner));
        assert_eq!(read_notice(&mut reader).await, None);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn write_after_peer_close_removes_client() {
        let (server, client) = socket_pair().await;
        let lobby = shared_lobby(50);
        let mut task = tokio::spawn(handle_connection(server, 1, Arc::clone(&lobby), 8));

        let mut reader = BufReader::new(client);
        read_notice(&mut reader).await;
        read_notice(&mut reader).await;
        drop(reader);

        // the close only shows once a write to the dead peer fails
        let finished = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                lobby.lock().await.tick();
                tokio::select! {
                    joined = &mut task => break joined,
                    _ = tokio::time::sleep(Duration::from_millis(20)) => {},
                }
            }
        })
        .await
        .expect("handler should notice the close");
        finished.unwrap();
        let lobby = lobby.lock().await;
        assert_eq!(lobby.phase(), LobbyPhase::Waiting);
        assert!(lobby.registry().is_empty());
    }

    #[tokio::test]
    async fn half_closed_client_still_hears_results() {
        let (server, client) = socket_pair().await;
        let lobby = shared_lobby(2);
        let task = tokio::spawn(handle_connection(server, 1, Arc::clone(&lobby), 8));

        let mut reader = BufReader::new(client);
        read_notice(&mut reader).await;
        read_notice(&mut reader).await;
        reader.get_mut().shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(lobby.lock().await.registry().len(), 1);

        lobby.lock().await.tick();
        lobby.lock().await.tick();
        assert_eq!(read_notice(&mut reader).await, Some(Notice::SecondsLeft(2)));
        assert_eq!(read_notice(&mut reader).await, Some(Notice::SecondsLeft(1)));
        assert_eq!(read_notice(&mut reader).await, Some(Notice::Winner));
        assert_eq!(read_notice(&mut reader).await, None);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn client_with_full_queue_is_closed_without_flushing() {
        let (server, client) = socket_pair().await;
        let lobby = shared_lobby(5);
        let task = tokio::spawn(handle_connection(server, 1, Arc::clone(&lobby), 1));

        let mut reader = BufReader::new(client);
        read_notice(&mut reader).await;
        read_notice(&mut reader).await;
        {
            let mut lobby = lobby.lock().await;
            let outbox = lobby.registry().get(1).unwrap().outbox.clone();
            outbox
                .try_send(crate::session::notice_bytes(Notice::YourNumber(1)))
                .unwrap();
            // the countdown notice finds the queue full and drops the client
            lobby.tick();
            assert!(lobby.registry().is_empty());
        }

        assert_eq!(read_notice(&mut reader).await, None);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("dropped connection should close")
            .unwrap();
    }

    #[tokio::test]
    async fn started_lobby_rejects_connection() {
        let (server, client) = socket_pair().await;
        let lobby = shared_lobby(0);
        lobby.lock().await.tick();

        let task = tokio::spawn(handle_connection(server, 1, Arc::clone(&lobby), 8));
        task.await.unwrap();

        let mut reader = BufReader::new(client);
        assert_eq!(read_notice(&mut reader).await, None);
        assert!(lobby.lock().await.registry().is_empty());
    }

    #[tokio::test]
    async fn client_input_is_ignored() {
        let (server, client) = socket_pair().await;
        let lobby = shared_lobby(3);
        let task = tokio::spawn(handle_connection(server, 1, Arc::clone(&lobby), 8));

        let mut reader = BufReader::new(client);
        read_notice(&mut reader).await;
        read_notice(&mut reader).await;
        reader.get_mut().write_all(b"start now please\n").await.unwrap();

        lobby.lock().await.tick();
        assert_eq!(read_notice(&mut reader).await, Some(Notice::SecondsLeft(3)));
        assert_eq!(lobby.lock().await.registry().len(), 1);

        lobby.lock().await.finish_now();
        task.await.unwrap();
    }
}
