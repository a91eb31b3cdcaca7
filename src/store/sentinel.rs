//! Sentinel master discovery and endpoint construction

use std::future::Future;
use std::time::Duration;

use redis::RedisResult;
use tracing::{debug, warn};
use url::Url;

use super::{StoreError, StoreResult};
use crate::config::{SentinelConfig, SentinelNode, TlsSettings};

/// Everything needed to open one connection
#[derive(Debug, Clone, Copy)]
pub(crate) struct Endpoint<'a> {
    pub host: &'a str,
    pub port: u16,
    pub db: Option<u32>,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
    pub tls: Option<&'a TlsSettings>,
}

impl Endpoint<'_> {
    /// Build a `redis://` / `rediss://` URL. Credentials are percent-encoded
    /// by the URL setters.
    pub fn url(&self) -> StoreResult<Url> {
        let invalid = |reason: &str| StoreError::InvalidEndpoint {
            endpoint: format!("{}:{}", self.host, self.port),
            reason: reason.to_string(),
        };

        let scheme = if self.tls.is_some() { "rediss" } else { "redis" };
        let mut url = Url::parse(&format!("{}://localhost", scheme))
            .map_err(|e| invalid(&e.to_string()))?;

        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.to_string()
        };
        url.set_host(Some(&host)).map_err(|e| invalid(&e.to_string()))?;
        url.set_port(Some(self.port))
            .map_err(|_| invalid("cannot set port"))?;
        if let Some(username) = self.username {
            url.set_username(username)
                .map_err(|_| invalid("cannot set username"))?;
        }
        if let Some(password) = self.password {
            url.set_password(Some(password))
                .map_err(|_| invalid("cannot set password"))?;
        }
        if let Some(db) = self.db {
            url.set_path(&format!("/{}", db));
        }
        Ok(url)
    }

    pub fn client(&self) -> StoreResult<redis::Client> {
        let url = self.url()?;
        let client = match self.tls.and_then(|tls| tls.root_ca_pem.clone()) {
            Some(root_cert) => redis::Client::build_with_tls(
                url.as_str(),
                redis::TlsCertificates {
                    client_tls: None,
                    root_cert: Some(root_cert),
                },
            )?,
            None => redis::Client::open(url.as_str())?,
        };
        Ok(client)
    }
}

/// Bound a redis future by `limit`
pub(crate) async fn with_timeout<T, F>(limit: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = RedisResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
        .map_err(StoreError::from)
}

/// Ask each Sentinel in order for the current master address.
///
/// The first Sentinel that knows the master wins; unreachable Sentinels are
/// skipped.
pub(crate) async fn resolve_master(
    config: &SentinelConfig,
    timeout: Duration,
) -> StoreResult<(String, u16)> {
    for node in &config.nodes {
        match query_node(node, config, timeout).await {
            Ok(Some((host, port))) => {
                debug!(
                    "Sentinel {}:{} resolved master {} to {}:{}",
                    node.host, node.port, config.master_name, host, port
                );
                return Ok((host, port));
            }
            Ok(None) => {
                warn!(
                    "Sentinel {}:{} does not know master {}",
                    node.host, node.port, config.master_name
                );
            }
            Err(e) => {
                warn!("Sentinel {}:{} unreachable: {}", node.host, node.port, e);
            }
        }
    }
    Err(StoreError::NoMaster(config.master_name.clone()))
}

async fn query_node(
    node: &SentinelNode,
    config: &SentinelConfig,
    timeout: Duration,
) -> StoreResult<Option<(String, u16)>> {
    let endpoint = Endpoint {
        host: &node.host,
        port: node.port,
        db: None,
        username: None,
        password: config.password.as_deref(),
        tls: config.tls.as_ref(),
    };
    let client = endpoint.client()?;
    let mut conn = with_timeout(timeout, client.get_multiplexed_async_connection()).await?;

    let mut cmd = redis::cmd("SENTINEL");
    cmd.arg("get-master-addr-by-name").arg(&config.master_name);
    let addr: Option<(String, u16)> = with_timeout(timeout, cmd.query_async(&mut conn)).await?;
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint<'a>(host: &'a str) -> Endpoint<'a> {
        Endpoint {
            host,
            port: 6379,
            db: None,
            username: None,
            password: None,
            tls: None,
        }
    }

    #[test]
    fn test_plain_url() {
        let url = endpoint("redis.internal").url().unwrap();
        assert_eq!(url.as_str(), "redis://redis.internal:6379");
    }

    #[test]
    fn test_url_with_db_and_credentials() {
        let url = Endpoint {
            db: Some(3),
            username: Some("exporter"),
            password: Some("p@ss/word"),
            ..endpoint("10.0.0.5")
        }
        .url()
        .unwrap();
        assert_eq!(url.scheme(), "redis");
        assert_eq!(url.username(), "exporter");
        assert_eq!(url.password(), Some("p%40ss%2Fword"));
        assert_eq!(url.path(), "/3");
    }

    #[test]
    fn test_password_without_username() {
        let url = Endpoint {
            password: Some("secret"),
            ..endpoint("localhost")
        }
        .url()
        .unwrap();
        assert_eq!(url.username(), "");
        assert_eq!(url.password(), Some("secret"));
    }

    #[test]
    fn test_tls_scheme_and_ipv6() {
        let tls = TlsSettings::default();
        let url = Endpoint {
            tls: Some(&tls),
            ..endpoint("::1")
        }
        .url()
        .unwrap();
        assert_eq!(url.scheme(), "rediss");
        assert_eq!(url.host_str(), Some("[::1]"));
    }
}
