//! Redis-backed queue store
//!
//! Holds one multiplexed connection per configured logical database. The
//! database index is part of each connection's URL, so no call ever issues
//! `SELECT` and concurrent scrapes cannot observe each other's database.
//!
//! A supervisor task (re)establishes the connections whenever the state is not
//! `Ready`. In Sentinel mode the master is re-resolved on every attempt, which
//! is how failovers are followed.

use std::collections::HashMap;
use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::sentinel::{resolve_master, with_timeout, Endpoint};
use super::{
    ConnectionState, QueueStore, ReadCommand, ReadOp, ScanPage, StateCell, StoreError,
    StoreFuture, StoreResult,
};
use crate::config::{Database, RedisConfig, RedisTarget};

/// `COUNT` hint passed to every `SCAN` step
const SCAN_COUNT_HINT: u64 = 1_000;

pub struct RedisQueueStore {
    config: RedisConfig,
    state: StateCell,
    connections: Mutex<HashMap<u32, MultiplexedConnection>>,
}

impl RedisQueueStore {
    pub fn new(config: RedisConfig) -> Self {
        RedisQueueStore {
            config,
            state: StateCell::default(),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Shared handle on the connection state
    pub fn state_cell(&self) -> StateCell {
        self.state.clone()
    }

    /// Open a fresh connection for every database and swap them in.
    ///
    /// Either all databases connect and the state becomes `Ready`, or the
    /// previous connections are kept and the error is returned.
    pub async fn connect(&self, databases: &[Database]) -> StoreResult<()> {
        if self.state.get() == ConnectionState::Closed {
            return Err(StoreError::Closed);
        }

        let (host, port) = self.resolve_target().await?;
        let timeout = self.config.command_timeout;

        let mut fresh = HashMap::with_capacity(databases.len());
        for db in databases {
            let endpoint = Endpoint {
                host: &host,
                port,
                db: Some(db.index),
                username: self.config.username.as_deref(),
                password: self.config.password.as_deref(),
                tls: self.config.tls.as_ref(),
            };
            let client = endpoint.client()?;
            let conn = with_timeout(timeout, client.get_multiplexed_async_connection()).await?;
            fresh.insert(db.index, conn);
        }

        *self.connections.lock().await = fresh;
        let previous = self.state.set(ConnectionState::Ready);
        if previous != ConnectionState::Ready {
            info!(
                "Connected to {}:{} ({} databases)",
                host,
                port,
                databases.len()
            );
        }
        Ok(())
    }

    async fn resolve_target(&self) -> StoreResult<(String, u16)> {
        match &self.config.target {
            RedisTarget::Direct { host, port } => Ok((host.clone(), *port)),
            RedisTarget::Sentinel(sentinel) => {
                resolve_master(sentinel, self.config.command_timeout).await
            }
        }
    }

    /// Keep the connections alive until the store is closed.
    pub fn spawn_supervisor(self: &Arc<Self>, databases: Vec<Database>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match store.state.get() {
                    ConnectionState::Closed => break,
                    ConnectionState::Ready => store.check_connections().await,
                    ConnectionState::Connecting | ConnectionState::Reconnecting => {
                        if let Err(e) = store.connect(&databases).await {
                            warn!("Store connection attempt failed: {}", e);
                        }
                    }
                }
                tokio::time::sleep(store.config.reconnect_interval).await;
            }
            debug!("Store supervisor stopped");
        })
    }

    /// `PING` every open connection. A dead socket moves the store to
    /// `Reconnecting` even when nothing is scraping.
    async fn check_connections(&self) {
        let connections: Vec<MultiplexedConnection> =
            self.connections.lock().await.values().cloned().collect();
        let ping = redis::cmd("PING");
        for mut conn in connections {
            let reply: StoreResult<redis::Value> =
                with_timeout(self.config.command_timeout, ping.query_async(&mut conn)).await;
            if self.observe(reply).is_err() {
                break;
            }
        }
    }

    /// Best-effort teardown: mark closed and drop our connection handles
    /// without waiting for in-flight commands.
    pub fn close(&self) {
        self.state.set(ConnectionState::Closed);
        if let Ok(mut connections) = self.connections.try_lock() {
            connections.clear();
        }
        info!("Store connection closed");
    }

    async fn connection(&self, db: &Database) -> StoreResult<MultiplexedConnection> {
        if self.state.get() == ConnectionState::Closed {
            return Err(StoreError::Closed);
        }
        self.connections
            .lock()
            .await
            .get(&db.index)
            .cloned()
            .ok_or(StoreError::NotReady)
    }

    async fn scan_step(
        &self,
        db: &Database,
        cursor: u64,
        pattern: &str,
    ) -> StoreResult<ScanPage> {
        let mut conn = self.connection(db).await?;
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_COUNT_HINT);
        let (cursor, keys): (u64, Vec<String>) =
            with_timeout(self.config.command_timeout, cmd.query_async(&mut conn)).await?;
        Ok(ScanPage { cursor, keys })
    }

    async fn pipeline(
        &self,
        db: &Database,
        commands: &[ReadCommand],
    ) -> StoreResult<Vec<Option<u64>>> {
        let mut conn = self.connection(db).await?;

        let mut pipe = redis::pipe();
        pipe.atomic().ignore_errors();
        for command in commands {
            let key = command.key.as_str();
            match command.op {
                ReadOp::ListLength => {
                    pipe.llen(key);
                }
                ReadOp::SortedSetCardinality => {
                    pipe.zcard(key);
                }
                ReadOp::SortedSetCountFrom { min_score } => {
                    pipe.zcount(key, min_score, "+inf");
                }
            }
        }

        let replies: Vec<redis::Value> =
            with_timeout(self.config.command_timeout, pipe.query_async(&mut conn)).await?;
        if replies.len() != commands.len() {
            return Err(StoreError::ReplyShape {
                expected: commands.len(),
                actual: replies.len(),
            });
        }

        // Per-command errors (WRONGTYPE etc.) arrive as error values
        Ok(replies
            .into_iter()
            .map(|reply| match reply {
                redis::Value::Int(n) if n >= 0 => Some(n as u64),
                _ => None,
            })
            .collect())
    }

    /// Track transport health: transport errors and timeouts move the store
    /// to `Reconnecting`. Reply-shape and endpoint errors leave it alone.
    fn observe<T>(&self, result: StoreResult<T>) -> StoreResult<T> {
        if let Err(e @ (StoreError::Redis(_) | StoreError::Timeout(_))) = &result {
            if self.state.set(ConnectionState::Reconnecting) == ConnectionState::Ready {
                warn!("Store connection degraded, reconnecting: {}", e);
            }
        }
        result
    }
}

impl QueueStore for RedisQueueStore {
    fn scan<'a>(
        &'a self,
        db: &'a Database,
        cursor: u64,
        pattern: &'a str,
    ) -> StoreFuture<'a, ScanPage> {
        Box::pin(async move {
            let result = self.scan_step(db, cursor, pattern).await;
            self.observe(result)
        })
    }

    fn execute_batch<'a>(
        &'a self,
        db: &'a Database,
        commands: &'a [ReadCommand],
    ) -> StoreFuture<'a, Vec<Option<u64>>> {
        Box::pin(async move {
            let result = self.pipeline(db, commands).await;
            self.observe(result)
        })
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_not_ready_before_connect() {
        let store = RedisQueueStore::new(RedisConfig::default());
        assert_eq!(store.state(), ConnectionState::Connecting);

        let db = Database::new(0, "default");
        let err = store.scan(&db, 0, "bull:*:meta").await.unwrap_err();
        assert!(matches!(err, StoreError::NotReady));
        // Not-ready does not count as a transport failure
        assert_eq!(store.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_only_transport_failures_degrade() {
        let store = RedisQueueStore::new(RedisConfig::default());
        store.state.set(ConnectionState::Ready);

        let shape: StoreResult<()> = Err(StoreError::ReplyShape {
            expected: 7,
            actual: 3,
        });
        assert!(store.observe(shape).is_err());
        let endpoint: StoreResult<()> = Err(StoreError::InvalidEndpoint {
            endpoint: "h:1".to_string(),
            reason: "bad".to_string(),
        });
        assert!(store.observe(endpoint).is_err());
        assert_eq!(store.state(), ConnectionState::Ready);

        let timeout: StoreResult<()> = Err(StoreError::Timeout(Duration::from_millis(5)));
        assert!(store.observe(timeout).is_err());
        assert_eq!(store.state(), ConnectionState::Reconnecting);

        store.state.set(ConnectionState::Ready);
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let transport: StoreResult<()> = Err(StoreError::Redis(redis::RedisError::from(io)));
        assert!(store.observe(transport).is_err());
        assert_eq!(store.state(), ConnectionState::Reconnecting);
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let store = RedisQueueStore::new(RedisConfig::default());
        store.close();
        assert_eq!(store.state(), ConnectionState::Closed);

        let db = Database::new(0, "default");
        let err = store.execute_batch(&db, &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::Closed));
        assert!(matches!(store.connect(&[db]).await, Err(StoreError::Closed)));
    }
}
