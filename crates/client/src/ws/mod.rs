//! Realtime channel to the changa push server.
//!
//! This module provides:
//! - One logical connection with a fixed-interval reconnect loop
//! - Refcounted per-campaign subscriptions, replayed after every reconnect
//! - Typed inbound events delivered as a stream
//!
//! # Architecture
//!
//! ```text
//!   RealtimeChannel (handle)             consumer
//!     subscribe / unsubscribe / send        ▲
//!              │ Command                    │ ChannelEvent
//!              ▼                            │
//!   ┌──────────────────────────────────────────────┐
//!   │ Driver task                                   │
//!   │  Disconnected → Connecting → Connected ─┐     │
//!   │        ▲                                │     │
//!   │        └──── fixed delay ◄──── close ◄──┘     │
//!   │  teardown() → Stopped (from any state)        │
//!   └──────────────────────────────────────────────┘
//! ```
//!
//! Connectivity is state, not an error: consumers watch [`ChannelState`] or
//! the `Connected`/`Disconnected` events. Sends while not connected are
//! dropped with a warning; nothing is buffered.

mod connection;
mod subscriptions;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use changa_shared::{ClientCommand, InboundEvent};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::token_store::TokenStore;
use connection::{Command, Driver};
use subscriptions::SubscriptionRegistry;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state of a realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    /// Torn down; the channel will never connect again.
    Stopped,
}

impl ChannelState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ChannelState::Connected)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ChannelState::Stopped)
    }
}

/// What the channel reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: String },
    Event(InboundEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("no session present, sign in before subscribing")]
    Unauthenticated,
    #[error("realtime channel has been torn down")]
    Stopped,
}

/// Stream of events produced by a [`RealtimeChannel`].
pub type ChannelEvents = UnboundedReceiver<ChannelEvent>;

/// Handle to the realtime channel. Dropping it tears the channel down.
pub struct RealtimeChannel {
    url: String,
    commands: UnboundedSender<Command>,
    state: watch::Receiver<ChannelState>,
    shutdown: watch::Sender<bool>,
    /// Driver waiting for `connect()`.
    pending: Mutex<Option<Driver>>,
    task: Mutex<Option<JoinHandle<()>>>,
    tokens: Arc<TokenStore>,
}

impl RealtimeChannel {
    /// Create a disconnected channel and the stream of its events.
    pub fn new(
        url: impl Into<String>,
        reconnect_delay: Duration,
        tokens: Arc<TokenStore>,
    ) -> (Self, ChannelEvents) {
        let url = url.into();
        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let driver = Driver {
            url: url.clone(),
            reconnect_delay,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            commands: command_rx,
            events: event_tx,
            state: state_tx,
            shutdown: shutdown_rx,
            subscriptions: SubscriptionRegistry::default(),
        };

        let channel = Self {
            url,
            commands: command_tx,
            state: state_rx,
            shutdown: shutdown_tx,
            pending: Mutex::new(Some(driver)),
            task: Mutex::new(None),
            tokens,
        };
        (channel, event_rx)
    }

    /// Bound each connect attempt; a timed out attempt counts as a disconnect.
    pub fn with_connect_timeout(self, connect_timeout: Duration) -> Self {
        if let Some(driver) = lock(&self.pending).as_mut() {
            driver.connect_timeout = connect_timeout;
        }
        self
    }

    pub fn from_config(config: &ClientConfig, tokens: Arc<TokenStore>) -> (Self, ChannelEvents) {
        Self::new(config.ws_url.clone(), config.reconnect_delay, tokens)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Start the connection loop. Must be called from within a tokio runtime.
    ///
    /// Calling it again, or after teardown, does nothing.
    pub fn connect(&self) {
        let Some(driver) = lock(&self.pending).take() else {
            tracing::debug!(url = %self.url, "connect ignored, channel already started or stopped");
            return;
        };
        let task = tokio::spawn(driver.run());
        *lock(&self.task) = Some(task);
    }

    /// Add interest in a campaign. Requires a session.
    ///
    /// The wire subscribe goes out on the first subscriber only, immediately if
    /// connected, otherwise on the next successful connect.
    pub fn subscribe(&self, campaign_id: &str) -> Result<(), ChannelError> {
        if self.is_torn_down() {
            return Err(ChannelError::Stopped);
        }
        if !self.tokens.is_authenticated() {
            tracing::warn!(campaign_id, "subscribe refused without a session");
            return Err(ChannelError::Unauthenticated);
        }
        self.push(Command::Subscribe(campaign_id.to_string()))
    }

    /// Drop one subscriber's interest in a campaign.
    pub fn unsubscribe(&self, campaign_id: &str) -> Result<(), ChannelError> {
        if self.is_torn_down() {
            return Err(ChannelError::Stopped);
        }
        self.push(Command::Unsubscribe(campaign_id.to_string()))
    }

    /// Send a raw command. Dropped with a warning unless connected.
    pub fn send(&self, command: ClientCommand) {
        let state = self.state();
        if !state.is_connected() {
            tracing::warn!(?state, ?command, "dropping send while not connected");
            return;
        }
        if self.push(Command::Send(command)).is_err() {
            tracing::warn!("dropping send, channel driver is gone");
        }
    }

    /// Close the transport and cancel the reconnect loop for good.
    pub fn teardown(&self) {
        if self.is_torn_down() {
            return;
        }
        self.shutdown.send_replace(true);
        if let Some(driver) = lock(&self.pending).take() {
            // Never started: nothing to wind down.
            driver.state.send_replace(ChannelState::Stopped);
        }
        tracing::info!(url = %self.url, "realtime channel torn down");
    }

    /// Wait for the driver task to finish after [`teardown`](Self::teardown).
    pub async fn join(&self) {
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "realtime channel task failed");
            }
        }
    }

    fn is_torn_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn push(&self, command: Command) -> Result<(), ChannelError> {
        self.commands
            .unbounded_send(command)
            .map_err(|_| ChannelError::Stopped)
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
