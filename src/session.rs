//! Persistent device session management.
//!
//! A [`SessionRegistry`] owns one [`DeviceSession`] per device address for
//! the lifetime of the process. Sessions are created lazily on the first
//! probe and never torn down; a broken transport is replaced transparently
//! by a single reconnect attempt.
//!
//! Command execution on one session is serialized by the session's mutex,
//! so at most one command is in flight per device even under concurrent
//! probes; sessions for different addresses run fully in parallel.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use log::{debug, info, warn};
use moka::future::Cache;
use once_cell::sync::Lazy;
use tokio::sync::{Mutex, RwLock};

use crate::config;
use crate::error::ProbeError;
use crate::model::Credentials;
use crate::ssh::SshConnector;

/// Process-wide default registry backed by the real SSH connector.
pub static REGISTRY: Lazy<SessionRegistry> =
    Lazy::new(|| SessionRegistry::new(Arc::new(SshConnector)));

/// One interactive command-line connection to a device.
///
/// Implementations own the remote shell; completion of a command is theirs
/// to detect (prompt conventions differ per device).
#[async_trait]
pub trait CliTransport: Send {
    /// Lightweight liveness check: locate the current prompt.
    async fn find_prompt(&mut self) -> Result<String, ProbeError>;

    /// Issues one command and returns its raw text output, echoed command
    /// and trailing prompt stripped.
    async fn send_command(&mut self, command: &str) -> Result<String, ProbeError>;

    /// Releases the underlying connection. Best effort.
    async fn disconnect(&mut self);
}

/// Factory establishing [`CliTransport`] connections.
#[async_trait]
pub trait CliConnector: Send + Sync {
    async fn connect(
        &self,
        addr: Ipv4Addr,
        credentials: &Credentials,
    ) -> Result<Box<dyn CliTransport>, ProbeError>;
}

struct SessionState {
    transport: Option<Box<dyn CliTransport>>,
    established_at: SystemTime,
}

/// A persistent, stateful connection to one CLI device.
pub struct DeviceSession {
    addr: Ipv4Addr,
    credentials: Credentials,
    connector: Arc<dyn CliConnector>,
    /// Guards the transport; holding it across a full command round-trip is
    /// what serializes execution on this session.
    state: Mutex<SessionState>,
    /// Time-bounded result cache for idempotent reads, keyed by command.
    results: Cache<String, String>,
}

impl DeviceSession {
    fn new(connector: Arc<dyn CliConnector>, addr: Ipv4Addr, credentials: Credentials) -> Self {
        Self::with_cache_ttl(connector, addr, credentials, config::COMMAND_CACHE_TTL)
    }

    fn with_cache_ttl(
        connector: Arc<dyn CliConnector>,
        addr: Ipv4Addr,
        credentials: Credentials,
        ttl: Duration,
    ) -> Self {
        let results = Cache::builder()
            .max_capacity(config::COMMAND_CACHE_CAPACITY)
            .time_to_live(ttl)
            .build();
        Self {
            addr,
            credentials,
            connector,
            state: Mutex::new(SessionState {
                transport: None,
                established_at: SystemTime::now(),
            }),
            results,
        }
    }

    /// Device address this session is bound to.
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    /// When the current transport was (re)established.
    pub async fn established_at(&self) -> SystemTime {
        self.state.lock().await.established_at
    }

    /// Establishes the transport if it does not exist yet.
    ///
    /// Failure here is fatal for the calling probe.
    pub async fn ensure_connected(&self) -> Result<(), ProbeError> {
        let mut state = self.state.lock().await;
        if state.transport.is_none() {
            info!("{}: establishing connection", self.addr);
            let transport = self.connector.connect(self.addr, &self.credentials).await?;
            state.transport = Some(transport);
            state.established_at = SystemTime::now();
        }
        Ok(())
    }

    /// Executes one command, bypassing the result cache.
    ///
    /// A liveness check runs first; if it fails with a transport error the
    /// session reconnects exactly once and retries the check. A second
    /// consecutive failure raises [`ProbeError::Connection`].
    pub async fn execute(&self, command: &str) -> Result<String, ProbeError> {
        let mut state = self.state.lock().await;
        self.ensure_live(&mut state).await?;
        let transport = state
            .transport
            .as_mut()
            .ok_or_else(|| ProbeError::Connection(format!("{}: no transport", self.addr)))?;
        debug!("{}: sending '{}'", self.addr, command);
        transport.send_command(command).await
    }

    /// Executes one command through the time-bounded result cache.
    ///
    /// On a hit the transport is not touched. Concurrent misses for the
    /// same command may both reach the device; the last result wins the
    /// cache slot.
    pub async fn execute_cached(&self, command: &str) -> Result<String, ProbeError> {
        if let Some(output) = self.results.get(command).await {
            debug!("{}: cache hit for '{}'", self.addr, command);
            return Ok(output);
        }
        let output = self.execute(command).await?;
        self.results.insert(command.to_string(), output.clone()).await;
        Ok(output)
    }

    async fn ensure_live(&self, state: &mut SessionState) -> Result<(), ProbeError> {
        let transport = match state.transport.as_mut() {
            Some(t) => t,
            None => {
                // Lazily established on first use (or after an unnoticed
                // teardown); treated like establishment, not reconnect.
                let transport = self.connector.connect(self.addr, &self.credentials).await?;
                state.transport = Some(transport);
                state.established_at = SystemTime::now();
                return Ok(());
            }
        };

        match transport.find_prompt().await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!("{}: liveness check failed ({err}), reconnecting", self.addr);
                transport.disconnect().await;
                let mut fresh = self
                    .connector
                    .connect(self.addr, &self.credentials)
                    .await
                    .map_err(|e| {
                        ProbeError::Connection(format!("{}: reconnect failed: {e}", self.addr))
                    })?;
                fresh.find_prompt().await.map_err(|e| {
                    ProbeError::Connection(format!(
                        "{}: liveness failed twice in a row: {e}",
                        self.addr
                    ))
                })?;
                state.transport = Some(fresh);
                state.established_at = SystemTime::now();
                info!("{}: connection re-established", self.addr);
                Ok(())
            }
        }
    }
}

/// Guarded registry of device sessions, keyed by device address.
///
/// The map lock is held only for lookups and inserts, never across device
/// I/O, so probes against distinct addresses are never serialized here.
pub struct SessionRegistry {
    connector: Arc<dyn CliConnector>,
    sessions: RwLock<HashMap<Ipv4Addr, Arc<DeviceSession>>>,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn CliConnector>) -> Self {
        Self {
            connector,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the session for `addr`, registering and establishing a new
    /// one if this address has never been probed.
    ///
    /// Registration is insert-if-absent: two concurrent first probes of the
    /// same address share a single session and a single connection attempt.
    pub async fn acquire(
        &self,
        addr: Ipv4Addr,
        credentials: &Credentials,
    ) -> Result<Arc<DeviceSession>, ProbeError> {
        let session = {
            if let Some(existing) = self.sessions.read().await.get(&addr) {
                existing.clone()
            } else {
                let mut sessions = self.sessions.write().await;
                // Re-check under the write lock: another caller may have won.
                match sessions.get(&addr) {
                    Some(existing) => existing.clone(),
                    None => {
                        debug!("{addr}: registering new session");
                        let session = Arc::new(DeviceSession::new(
                            self.connector.clone(),
                            addr,
                            credentials.clone(),
                        ));
                        sessions.insert(addr, session.clone());
                        session
                    }
                }
            }
        };
        // Establish outside the registry lock, under the session's own mutex.
        session.ensure_connected().await?;
        Ok(session)
    }

    /// Number of registered sessions (for diagnostics).
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
