mod settings;
mod transport;

use std::sync::Arc;

use async_trait::async_trait;
use mcpanel_core::CoreError;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use settings::{load_rcon_settings, parse_server_properties};
pub use transport::MinecraftConnector;

pub const DEFAULT_RCON_PORT: u16 = 25575;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_RCON_PORT,
            password: String::new(),
        }
    }
}

impl RconConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum RconError {
    #[error("RCON is disabled or has no password configured")]
    Disabled,

    #[error("RCON connect to {address} failed: {message}")]
    Connect { address: String, message: String },

    #[error("RCON command failed: {0}")]
    Send(String),
}

impl From<RconError> for CoreError {
    fn from(err: RconError) -> Self {
        match err {
            RconError::Disabled => CoreError::Validation(err.to_string()),
            RconError::Connect { .. } | RconError::Send(_) => CoreError::Connection(err.to_string()),
        }
    }
}

/// One authenticated remote-console connection.
#[async_trait]
pub trait RconSession: Send {
    async fn send(&mut self, command: &str) -> Result<String, RconError>;

    async fn close(&mut self);
}

/// Opens sessions; the seam between the client state machine and the wire.
#[async_trait]
pub trait RconConnector: Send + Sync {
    async fn connect(&self, address: &str, password: &str) -> Result<Box<dyn RconSession>, RconError>;
}

enum Connection {
    Disconnected,
    Connected(Box<dyn RconSession>),
}

/// Remote-console client holding at most one live session. The session is
/// opened on first use and dropped on any send failure, so the next call
/// reconnects.
pub struct RconClient {
    config: RconConfig,
    connector: Arc<dyn RconConnector>,
    conn: Mutex<Connection>,
}

impl RconClient {
    pub fn new(config: RconConfig) -> Self {
        Self::with_connector(config, Arc::new(MinecraftConnector))
    }

    pub fn with_connector(config: RconConfig, connector: Arc<dyn RconConnector>) -> Self {
        Self {
            config,
            connector,
            conn: Mutex::new(Connection::Disconnected),
        }
    }

    pub fn rcon_enabled(&self) -> bool {
        self.config.enabled && !self.config.password.is_empty()
    }

    pub async fn is_connected(&self) -> bool {
        matches!(*self.conn.lock().await, Connection::Connected(_))
    }

    pub async fn exec(&self, command: &str) -> Result<String, RconError> {
        if !self.rcon_enabled() {
            return Err(RconError::Disabled);
        }

        let mut conn = self.conn.lock().await;
        let mut session = match std::mem::replace(&mut *conn, Connection::Disconnected) {
            Connection::Connected(session) => session,
            Connection::Disconnected => {
                let address = self.config.address();
                let session = self.connector.connect(&address, &self.config.password).await?;
                info!("rcon connected to {address}");
                session
            }
        };

        match session.send(command).await {
            Ok(reply) => {
                debug!("rcon `{command}` -> {} bytes", reply.len());
                *conn = Connection::Connected(session);
                Ok(reply)
            }
            Err(err) => {
                warn!("rcon session dropped: {err}");
                session.close().await;
                Err(err)
            }
        }
    }

    /// Drop the cached session, if any.
    pub async fn disconnect(&self) {
        let mut conn = self.conn.lock().await;
        if let Connection::Connected(mut session) = std::mem::replace(&mut *conn, Connection::Disconnected) {
            session.close().await;
            info!("rcon disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeConnector {
        connects: AtomicUsize,
        fail_connects: AtomicUsize,
        fail_after_sends: Option<usize>,
    }

    struct FakeSession {
        sent: usize,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl RconSession for FakeSession {
        async fn send(&mut self, command: &str) -> Result<String, RconError> {
            if self.fail_after.is_some_and(|limit| self.sent >= limit) {
                return Err(RconError::Send("connection reset".into()));
            }
            self.sent += 1;
            Ok(format!("ran {command}"))
        }

        async fn close(&mut self) {}
    }

    #[async_trait]
    impl RconConnector for FakeConnector {
        async fn connect(&self, address: &str, _password: &str) -> Result<Box<dyn RconSession>, RconError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connects.load(Ordering::SeqCst) > 0 {
                self.fail_connects.fetch_sub(1, Ordering::SeqCst);
                return Err(RconError::Connect {
                    address: address.to_string(),
                    message: "refused".into(),
                });
            }
            Ok(Box::new(FakeSession {
                sent: 0,
                fail_after: self.fail_after_sends,
            }))
        }
    }

    fn enabled_config() -> RconConfig {
        RconConfig {
            enabled: true,
            password: "secret".into(),
            ..RconConfig::default()
        }
    }

    #[tokio::test]
    async fn disabled_client_never_connects() {
        let connector = Arc::new(FakeConnector::default());
        let client = RconClient::with_connector(RconConfig::default(), connector.clone());

        let err = client.exec("list").await.expect_err("disabled rcon must fail");
        assert!(matches!(err, RconError::Disabled));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_password_counts_as_disabled() {
        let connector = Arc::new(FakeConnector::default());
        let config = RconConfig {
            enabled: true,
            ..RconConfig::default()
        };
        let client = RconClient::with_connector(config, connector.clone());

        assert!(!client.rcon_enabled());
        assert!(matches!(client.exec("list").await, Err(RconError::Disabled)));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn session_is_reused_between_commands() {
        let connector = Arc::new(FakeConnector::default());
        let client = RconClient::with_connector(enabled_config(), connector.clone());

        assert_eq!(client.exec("list").await.expect("first exec"), "ran list");
        assert_eq!(client.exec("say hi").await.expect("second exec"), "ran say hi");
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert!(client.is_connected().await);
    }

    #[tokio::test]
    async fn send_failure_drops_session_and_next_call_reconnects() {
        let connector = Arc::new(FakeConnector {
            fail_after_sends: Some(1),
            ..FakeConnector::default()
        });
        let client = RconClient::with_connector(enabled_config(), connector.clone());

        client.exec("list").await.expect("first exec");
        let err = client.exec("list").await.expect_err("second send fails");
        assert!(matches!(err, RconError::Send(_)));
        assert!(!client.is_connected().await);

        client.exec("list").await.expect("reconnected exec");
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn connect_failure_is_not_cached() {
        let connector = Arc::new(FakeConnector {
            fail_connects: AtomicUsize::new(1),
            ..FakeConnector::default()
        });
        let client = RconClient::with_connector(enabled_config(), connector.clone());

        let err = client.exec("list").await.expect_err("first connect fails");
        assert!(matches!(err, RconError::Connect { .. }));
        assert!(matches!(CoreError::from(err), CoreError::Connection(_)));

        client.exec("list").await.expect("second connect succeeds");
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disconnect_clears_cached_session() {
        let connector = Arc::new(FakeConnector::default());
        let client = RconClient::with_connector(enabled_config(), connector.clone());

        client.exec("list").await.expect("exec");
        client.disconnect().await;
        assert!(!client.is_connected().await);
        client.exec("list").await.expect("exec after disconnect");
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }
}
