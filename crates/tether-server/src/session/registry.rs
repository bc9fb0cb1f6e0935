//! Session registry
//!
//! One logical map `SessionKey -> TunnelSession`. Registration for an
//! existing key closes the previous transport before the new one becomes
//! visible, so `has_session` never reports a closed transport as live.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use tether_core::error::RegistryError;
use tether_core::{BoxedConn, DialError, Dialer, SessionKey};

use super::tunnel::TunnelSession;

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub registrations: u64,
    pub evictions: u64,
    pub lookups: u64,
}

/// Registry of live agent sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionKey, Arc<TunnelSession>>,
    draining: AtomicBool,
    registrations: AtomicU64,
    evictions: AtomicU64,
    lookups: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a session, evicting and closing any previous session under
    /// the same key
    pub fn register(&self, session: Arc<TunnelSession>) -> Result<(), RegistryError> {
        if self.is_shutting_down() {
            return Err(RegistryError::ShuttingDown);
        }

        let key = session.key().clone();
        match self.sessions.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let previous = entry.get();
                previous.close();
                tracing::warn!(
                    "Session {} re-registered, evicted transport #{} for #{}",
                    key,
                    previous.instance_id(),
                    session.instance_id()
                );
                entry.insert(Arc::clone(&session));
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&session));
            }
        }
        self.registrations.fetch_add(1, Ordering::Relaxed);

        // shutdown_all may have swept the table between the check and the insert
        if self.is_shutting_down() {
            self.unregister(&key, session.instance_id());
            return Err(RegistryError::ShuttingDown);
        }

        tracing::info!("Session {} registered (#{})", key, session.instance_id());
        Ok(())
    }

    /// Whether a live session exists for `key`
    pub fn has_session(&self, key: &SessionKey) -> bool {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .get(key)
            .map(|session| !session.is_closed())
            .unwrap_or(false)
    }

    pub fn get(&self, key: &SessionKey) -> Option<Arc<TunnelSession>> {
        self.sessions.get(key).map(|r| Arc::clone(&r))
    }

    /// Dialer routing over whatever session is registered under `key` when
    /// it is invoked
    pub fn dialer(self: &Arc<Self>, key: SessionKey, timeout: Duration) -> SessionDialer {
        SessionDialer {
            registry: Arc::clone(self),
            key,
            timeout,
        }
    }

    /// Remove and close the session under `key`
    pub fn close(&self, key: &SessionKey) -> bool {
        match self.sessions.remove(key) {
            Some((_, session)) => {
                session.close();
                tracing::info!("Session {} closed (#{})", key, session.instance_id());
                true
            }
            None => false,
        }
    }

    /// Remove the session under `key` only if it is still `instance`.
    ///
    /// A transport that was evicted by a newer registration must not remove
    /// its successor when it finally shuts down.
    pub fn unregister(&self, key: &SessionKey, instance: u64) -> bool {
        match self
            .sessions
            .remove_if(key, |_, session| session.instance_id() == instance)
        {
            Some((_, session)) => {
                session.close();
                tracing::info!("Session {} unregistered (#{})", key, instance);
                true
            }
            None => false,
        }
    }

    /// Refuse new registrations and close every session
    pub fn shutdown_all(&self) {
        self.draining.store(true, Ordering::SeqCst);
        let keys = self.keys();
        tracing::info!("Closing {} agent sessions", keys.len());
        for key in keys {
            self.close(&key);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<SessionKey> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    pub fn list(&self) -> Vec<Arc<TunnelSession>> {
        self.sessions.iter().map(|r| Arc::clone(&r)).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            registrations: self.registrations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
        }
    }
}

/// Dialer bound to a session key
#[derive(Debug, Clone)]
pub struct SessionDialer {
    registry: Arc<SessionRegistry>,
    key: SessionKey,
    timeout: Duration,
}

impl SessionDialer {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Dialer for SessionDialer {
    async fn dial(
        &self,
        network: &str,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<BoxedConn, DialError> {
        let session = self
            .registry
            .get(&self.key)
            .ok_or_else(|| DialError::NoSession(self.key.clone()))?;
        session.dial(network, address, self.timeout, cancel).await
    }
}
