//! Session liveness via heartbeats

use std::sync::Arc;
use std::time::Duration;

use tether_core::config::ServerConfig;
use tether_core::time::current_time_millis;
use tether_protocol::{Frame, Message};

use super::tunnel::TunnelSession;

/// Sends heartbeats on a session and detects silent agents
#[derive(Debug, Clone, Copy)]
pub struct HealthMonitor {
    /// Heartbeat interval
    pub interval: Duration,
    /// Silence after which the session is considered dead
    pub timeout: Duration,
}

impl HealthMonitor {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.heartbeat_interval, config.heartbeat_timeout)
    }

    /// Heartbeat `session` until it closes or goes stale.
    ///
    /// Returns `true` when the agent stopped answering; closing the session
    /// is left to the caller.
    pub async fn run(&self, session: Arc<TunnelSession>) -> bool {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = session.cancel_token().cancelled() => return false,
                _ = ticker.tick() => {
                    if session.is_stale(self.timeout) {
                        tracing::warn!(
                            "Session {} missed heartbeats for {:?}, dropping it",
                            session.key(),
                            self.timeout
                        );
                        return true;
                    }
                    let heartbeat = Frame::control(Message::Heartbeat {
                        timestamp: current_time_millis(),
                    });
                    if session.send(heartbeat).await.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Run the monitor on its own task
    pub fn spawn_monitor(&self, session: Arc<TunnelSession>) -> tokio::task::JoinHandle<bool> {
        let monitor = *self;
        tokio::spawn(async move { monitor.run(session).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::SessionKey;

    #[tokio::test]
    async fn test_silent_agent_goes_stale() {
        let (session, mut rx) = TunnelSession::new(SessionKey::new("c1"));
        let monitor = HealthMonitor::new(Duration::from_millis(10), Duration::from_millis(35));

        let stale = monitor.spawn_monitor(Arc::clone(&session)).await.unwrap();
        assert!(stale);

        let frame = rx.recv().await.unwrap();
        assert!(frame.stream_id.is_control());
        assert!(matches!(frame.message, Message::Heartbeat { .. }));
    }

    #[tokio::test]
    async fn test_monitor_stops_when_session_closes() {
        let (session, _rx) = TunnelSession::new(SessionKey::new("c1"));
        let monitor = HealthMonitor::new(Duration::from_secs(30), Duration::from_secs(90));

        let handle = monitor.spawn_monitor(Arc::clone(&session));
        session.close();
        assert!(!handle.await.unwrap());
    }
}
