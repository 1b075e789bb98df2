//! Supervised broker connection
//!
//! A single background task owns the connection lifecycle:
//!
//! ```text
//! Disconnected --connect()--> Connecting --open ok--> Connected
//!      ^                         |  ^                    |
//!      |   retries exhausted     |  |     link dropped   |
//!      +-------------------------+  +--------------------+
//! ```
//!
//! Failed attempts are retried with exponential backoff up to
//! `max_connect_attempts`. `close()` stops the task and tears the link down.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use courier_shared::config::BrokerConfig;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::broker::{Broker, BrokerChannel};
use super::error::QueueError;

/// Lifecycle state of the broker link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// The live channel together with the signal its consumers raise when it breaks
///
/// A report only ever reaches the link it was made against.
#[derive(Clone)]
struct Link {
    channel: Arc<dyn BrokerChannel>,
    broken: Arc<Notify>,
}

impl Link {
    fn new(channel: Arc<dyn BrokerChannel>) -> Self {
        Self {
            channel,
            broken: Arc::new(Notify::new()),
        }
    }
}

struct Shared {
    broker: Box<dyn Broker>,
    config: BrokerConfig,
    state: watch::Sender<ConnectionState>,
    closing: watch::Sender<bool>,
    link: RwLock<Option<Link>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Owner of the single broker connection and channel of a process
///
/// Cloning is cheap; all clones share the same link.
#[derive(Clone)]
pub struct QueueConnection {
    shared: Arc<Shared>,
}

impl QueueConnection {
    /// Create a connection in the `Disconnected` state
    pub fn new(broker: impl Broker, config: BrokerConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (closing, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                broker: Box::new(broker),
                config,
                state,
                closing,
                link: RwLock::new(None),
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Broker settings this connection was created with
    pub fn config(&self) -> &BrokerConfig {
        &self.shared.config
    }

    /// Start the supervisor unless it is already running
    ///
    /// Returns without waiting for the link; watch [`state`](Self::state) or
    /// [`subscribe`](Self::subscribe) to follow progress. Connection failures
    /// are retried in the background and never returned here.
    pub async fn connect(&self) {
        let mut supervisor = self.shared.supervisor.lock().await;

        if let Some(handle) = supervisor.as_ref() {
            if !handle.is_finished() {
                debug!(state = %self.state(), "Supervisor already running");
                return;
            }
        }

        self.shared.closing.send_replace(false);
        let shared = Arc::clone(&self.shared);
        let shutdown = self.shared.closing.subscribe();
        *supervisor = Some(tokio::spawn(supervise(shared, shutdown)));
    }

    /// Current state, never blocks
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Receiver for awaiting state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Whether `close()` has been called since the last `connect()`
    pub fn is_closing(&self) -> bool {
        *self.shared.closing.borrow()
    }

    /// Stop supervising and tear the link down
    ///
    /// The channel is closed before the connection. A handler that is running
    /// is not interrupted; its settlement will fail and the broker redelivers
    /// the message. Always ends in `Disconnected`.
    pub async fn close(&self) {
        self.shared.closing.send_replace(true);

        self.reap_supervisor().await;

        if let Some(link) = self.shared.link.write().await.take() {
            match link.channel.close().await {
                Ok(()) => info!("Broker connection closed"),
                Err(e) => warn!(error = %e, "Broker connection did not close cleanly"),
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Keep the link up until `shutdown` resolves
    ///
    /// Connects, and starts a fresh supervisor whenever the previous one gives
    /// up after `max_connect_attempts`, so an outage of any length is ridden
    /// out. Stops restarting once `close()` has been called. Returns the
    /// output of `shutdown` without closing the connection.
    pub async fn stay_connected<F>(&self, shutdown: F) -> F::Output
    where
        F: Future,
    {
        tokio::pin!(shutdown);
        let mut state = self.subscribe();

        loop {
            self.connect().await;

            let gave_up = async {
                loop {
                    if state.changed().await.is_err() {
                        return false;
                    }
                    if *state.borrow_and_update() == ConnectionState::Disconnected {
                        return true;
                    }
                }
            };

            let restart = tokio::select! {
                output = &mut shutdown => return output,
                gave_up = gave_up => gave_up && !self.is_closing(),
            };
            if !restart {
                return shutdown.await;
            }

            self.reap_supervisor().await;
            warn!(
                broker = %self.shared.broker.address(),
                "Broker connection gave up, starting over"
            );
        }
    }

    async fn reap_supervisor(&self) {
        let handle = self.shared.supervisor.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Connection supervisor ended abnormally");
            }
        }
    }

    /// The live channel, only while `Connected`
    pub(crate) async fn channel(&self) -> Option<Arc<dyn BrokerChannel>> {
        if self.state() != ConnectionState::Connected {
            return None;
        }
        self.shared
            .link
            .read()
            .await
            .as_ref()
            .map(|link| Arc::clone(&link.channel))
    }

    /// Wait for a live channel other than `previous`
    ///
    /// Returns `None` once the connection is closing.
    pub(crate) async fn wait_for_channel(
        &self,
        previous: Option<&Arc<dyn BrokerChannel>>,
    ) -> Option<Arc<dyn BrokerChannel>> {
        let mut state = self.subscribe();
        let mut closing = self.shared.closing.subscribe();

        loop {
            if *closing.borrow_and_update() {
                return None;
            }

            state.borrow_and_update();
            if let Some(channel) = self.channel().await {
                let stale = previous.is_some_and(|old| Arc::ptr_eq(old, &channel));
                if !stale {
                    return Some(channel);
                }
            }

            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                _ = closing.changed() => {}
            }
        }
    }

    /// Tell the supervisor that `channel` stopped working
    ///
    /// Ignored unless `channel` is still the live one. A report that races
    /// with the supervisor noticing the same drop dies with that link.
    pub(crate) async fn report_broken(&self, channel: &Arc<dyn BrokerChannel>) {
        let current = self.shared.link.read().await;
        if let Some(link) = current.as_ref() {
            if Arc::ptr_eq(&link.channel, channel) {
                link.broken.notify_one();
            }
        }
    }
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Connection state changed");
        }
    }

    async fn establish(&self) -> Result<Arc<dyn BrokerChannel>, QueueError> {
        let channel = self.broker.open().await?;

        let declared = async {
            channel.declare_durable_queue(&self.config.queue_name).await?;
            channel
                .declare_durable_queue(&self.config.dead_letter_queue)
                .await
        };
        if let Err(e) = declared.await {
            if let Err(close_error) = channel.close().await {
                debug!(error = %close_error, "Discarding half-open link");
            }
            return Err(e);
        }

        Ok(channel)
    }
}

/// Backoff before the retry that follows `failures` consecutive failures
fn retry_delay(config: &BrokerConfig, failures: u32) -> Duration {
    let mut delay = config.retry_base_delay();
    for _ in 1..failures {
        delay = (delay * 2).min(config.retry_max_delay());
    }
    delay.min(config.retry_max_delay())
}

async fn supervise(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let address = shared.broker.address();
    let max_attempts = shared.config.max_connect_attempts;
    let mut failures = 0u32;

    loop {
        shared.set_state(ConnectionState::Connecting);
        info!(
            broker = %address,
            attempt = failures + 1,
            max_attempts,
            "Connecting to broker"
        );

        let attempt = tokio::select! {
            result = shared.establish() => result,
            _ = shutdown.wait_for(|closing| *closing) => return,
        };

        match attempt {
            Ok(channel) => {
                failures = 0;
                let link = Link::new(Arc::clone(&channel));
                let broken = Arc::clone(&link.broken);
                *shared.link.write().await = Some(link);
                shared.set_state(ConnectionState::Connected);
                info!(
                    broker = %address,
                    queue = %shared.config.queue_name,
                    "Connected to broker"
                );

                tokio::select! {
                    _ = channel.closed() => {
                        warn!(broker = %address, "Broker link dropped, reconnecting");
                    }
                    _ = broken.notified() => {
                        warn!(broker = %address, "Channel reported broken, reconnecting");
                    }
                    _ = shutdown.wait_for(|closing| *closing) => return,
                }

                shared.link.write().await.take();
                if let Err(e) = channel.close().await {
                    debug!(error = %e, "Discarding dropped link");
                }
            }
            Err(e) => {
                failures += 1;
                if failures >= max_attempts {
                    error!(
                        broker = %address,
                        error = %e,
                        attempts = failures,
                        "Giving up on broker connection"
                    );
                    shared.set_state(ConnectionState::Disconnected);
                    return;
                }

                let delay = retry_delay(&shared.config, failures);
                warn!(
                    broker = %address,
                    error = %e,
                    attempt = failures,
                    max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    "Broker connection failed, retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.wait_for(|closing| *closing) => return,
                }
            }
        }
    }
}
