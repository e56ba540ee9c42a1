use redis::{aio::MultiplexedConnection, Client};
use serde::Serialize;
use std::{fmt::Display, sync::Arc, time::Duration};
use tokio::{
    sync::{watch, RwLock},
    task::JoinHandle,
};

use super::{Backoff, ChannelError, ChannelResult};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Lifecycle of the broker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Created, never connected
    Init,
    /// Connected and accepting operations
    Ready,
    /// Lost; operations fail fast until the supervisor reconnects
    Faulted,
    /// Supervisor is retrying with backoff
    Reconnecting,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Init => "init",
            ConnectionState::Ready => "ready",
            ConnectionState::Faulted => "faulted",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Owned connection to the Redis broker.
///
/// Injected into every component that talks to the broker. Holds one shared
/// multiplexed connection for short commands and hands out dedicated ones for
/// blocking reads. Every operation checks the state first and fails fast with
/// [`ChannelError::Unavailable`] unless the connection is `Ready`.
pub struct BrokerConnection {
    client: Client,
    shared: RwLock<Option<MultiplexedConnection>>,
    state: watch::Sender<ConnectionState>,
    backoff: Backoff,
}

impl BrokerConnection {
    pub fn new(redis_url: &str, backoff: Backoff) -> ChannelResult<Self> {
        let client = Client::open(redis_url)?;
        let (state, _) = watch::channel(ConnectionState::Init);

        Ok(Self {
            client,
            shared: RwLock::new(None),
            state,
            backoff,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Single connection attempt
    pub async fn connect(&self) -> ChannelResult<()> {
        match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => {
                *self.shared.write().await = Some(conn);
                self.state.send_replace(ConnectionState::Ready);
                tracing::info!("Broker connection ready");
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(ConnectionState::Faulted);
                Err(e.into())
            }
        }
    }

    /// Retries [`connect`](Self::connect) with exponential backoff.
    ///
    /// Returns `false` if shutdown was signalled before a connection was made.
    pub async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut backoff = self.backoff.clone();
        self.state.send_replace(ConnectionState::Reconnecting);

        loop {
            if *shutdown.borrow() {
                return false;
            }

            match self.connect().await {
                Ok(()) => return true,
                Err(e) => {
                    let delay = backoff.next_delay();
                    self.state.send_replace(ConnectionState::Reconnecting);
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempts(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Broker unreachable, retrying"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => return false,
                    }
                }
            }
        }
    }

    /// Shared connection for non-blocking commands
    pub async fn connection(&self) -> ChannelResult<MultiplexedConnection> {
        let state = self.state();
        if state != ConnectionState::Ready {
            return Err(ChannelError::unavailable(format!("broker is {}", state)));
        }

        self.shared
            .read()
            .await
            .clone()
            .ok_or_else(|| ChannelError::unavailable("broker connection missing"))
    }

    /// Fresh connection reserved for one blocking consumer
    pub async fn dedicated_connection(&self) -> ChannelResult<MultiplexedConnection> {
        let state = self.state();
        if state != ConnectionState::Ready {
            return Err(ChannelError::unavailable(format!("broker is {}", state)));
        }

        match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                let err = ChannelError::from(e);
                self.report(&err);
                Err(err)
            }
        }
    }

    /// Marks the connection faulted if the error means it is gone
    pub fn report(&self, err: &ChannelError) {
        if err.is_connection_failure() && self.state() == ConnectionState::Ready {
            tracing::error!(error = %err, "Broker connection faulted");
            self.state.send_replace(ConnectionState::Faulted);
        }
    }

    async fn ping(&self) -> ChannelResult<()> {
        let mut conn = self.connection().await?;
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Spawns the task that health-checks the connection and reconnects it
    pub fn spawn_supervisor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut state_rx = self.subscribe();
            tracing::info!("Broker supervisor started");

            loop {
                if *shutdown.borrow() {
                    break;
                }

                if self.is_ready() {
                    tokio::select! {
                        _ = tokio::time::sleep(HEALTH_CHECK_INTERVAL) => {
                            if let Err(e) = self.ping().await {
                                self.report(&e);
                            }
                        }
                        _ = state_rx.changed() => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                } else if !self.reconnect(&mut shutdown).await {
                    break;
                }
            }

            tracing::info!("Broker supervisor stopped");
        })
    }
}
