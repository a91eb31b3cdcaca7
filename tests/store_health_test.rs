//! Store Connection Health Tests
//!
//! Runs the reconnect supervisor against a minimal RESP listener that answers
//! every command with `+OK`, then takes the listener away.

use std::time::Duration;

use bull_exporter::config::{Database, RedisConfig, RedisTarget};
use bull_exporter::{ConnectionState, QueueStore, RedisQueueStore};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

const WAIT_MAX: Duration = Duration::from_secs(5);

/// Length of the first complete `*N` array of bulk strings in `buf`
fn command_len(buf: &[u8]) -> Option<usize> {
    fn line(buf: &[u8], at: usize) -> Option<(usize, usize)> {
        let end = buf[at..].windows(2).position(|w| w == b"\r\n")? + at;
        let value = std::str::from_utf8(&buf[at + 1..end]).ok()?.parse().ok()?;
        Some((value, end + 2))
    }

    if buf.first() != Some(&b'*') {
        return None;
    }
    let (args, mut at) = line(buf, 0)?;
    for _ in 0..args {
        let (len, start) = line(buf, at)?;
        at = start + len + 2;
        if at > buf.len() {
            return None;
        }
    }
    Some(at)
}

async fn answer_ok(mut socket: TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        while let Some(len) = command_len(&buf) {
            buf.drain(..len);
            if socket.write_all(b"+OK\r\n").await.is_err() {
                return;
            }
        }
    }
}

/// Accept loop owning every client socket; aborting it closes them all.
async fn spawn_fake_server() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let mut clients = JoinSet::new();
        while let Ok((socket, _)) = listener.accept().await {
            clients.spawn(answer_ok(socket));
        }
    });
    (port, handle)
}

async fn wait_for(store: &RedisQueueStore, wanted: impl Fn(ConnectionState) -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT_MAX;
    while tokio::time::Instant::now() < deadline {
        if wanted(store.state()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_idle_store_notices_lost_server() {
    let (port, server) = spawn_fake_server().await;

    let config = RedisConfig {
        target: RedisTarget::Direct {
            host: "127.0.0.1".to_string(),
            port,
        },
        command_timeout: Duration::from_millis(500),
        reconnect_interval: Duration::from_millis(50),
        ..RedisConfig::default()
    };
    let store = Arc::new(RedisQueueStore::new(config));
    let supervisor = store.spawn_supervisor(vec![Database::new(0, "default")]);

    assert!(
        wait_for(&store, |state| state == ConnectionState::Ready).await,
        "store never became ready, state {:?}",
        store.state()
    );

    // No scrapes from here on; only the supervisor touches the connection
    server.abort();
    let _ = server.await;

    assert!(
        wait_for(&store, |state| state == ConnectionState::Reconnecting).await,
        "store still {:?} after the server went away",
        store.state()
    );

    store.close();
    supervisor.abort();
}

#[test]
fn test_command_len() {
    assert_eq!(command_len(b"*1\r\n$4\r\nPING\r\n"), Some(14));
    assert_eq!(command_len(b"*1\r\n$4\r\nPI"), None);
    assert_eq!(command_len(b"+OK\r\n"), None);
}
