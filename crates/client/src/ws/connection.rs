//! Connection driver for the realtime channel.
//!
//! A single task owns the socket, the subscription registry and the retry
//! loop. Handle calls arrive as [`Command`]s and are applied in order, so a
//! reconnect replay can never interleave with a subscribe issued meanwhile.

use std::fmt::Display;
use std::time::Duration;

use changa_shared::{ClientCommand, InboundEvent};
use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::subscriptions::SubscriptionRegistry;
use super::{ChannelEvent, ChannelState};

/// Requests from the channel handle to the driver.
#[derive(Debug)]
pub(super) enum Command {
    Subscribe(String),
    Unsubscribe(String),
    Send(ClientCommand),
}

/// Why a connection epoch ended.
enum Exit {
    Disconnected(String),
    Stopped,
}

pub(super) struct Driver {
    pub(super) url: String,
    pub(super) reconnect_delay: Duration,
    pub(super) connect_timeout: Duration,
    pub(super) commands: UnboundedReceiver<Command>,
    pub(super) events: UnboundedSender<ChannelEvent>,
    pub(super) state: watch::Sender<ChannelState>,
    pub(super) shutdown: watch::Receiver<bool>,
    pub(super) subscriptions: SubscriptionRegistry,
}

impl Driver {
    /// Run until teardown: connect, serve, and retry after a fixed delay.
    pub(super) async fn run(mut self) {
        tracing::info!(url = %self.url, "realtime channel starting");

        loop {
            match self.connect_and_serve().await {
                Exit::Stopped => break,
                Exit::Disconnected(reason) => {
                    self.set_state(ChannelState::Disconnected);
                    self.emit(ChannelEvent::Disconnected { reason });
                }
            }

            if !self.wait_before_reconnect().await {
                break;
            }
        }

        self.set_state(ChannelState::Stopped);
        tracing::info!(url = %self.url, "realtime channel stopped");
    }

    async fn connect_and_serve(&mut self) -> Exit {
        if *self.shutdown.borrow() {
            return Exit::Stopped;
        }

        self.set_state(ChannelState::Connecting);
        let connect = tokio::time::timeout(self.connect_timeout, connect_async(self.url.clone()));
        tokio::pin!(connect);

        let stream = loop {
            tokio::select! {
                result = &mut connect => match result {
                    Ok(Ok((stream, _response))) => break stream,
                    Ok(Err(e)) => {
                        tracing::warn!(url = %self.url, error = %e, "realtime connect failed");
                        return Exit::Disconnected(e.to_string());
                    }
                    Err(_) => {
                        tracing::warn!(
                            url = %self.url,
                            timeout_ms = self.connect_timeout.as_millis() as u64,
                            "realtime connect timed out"
                        );
                        return Exit::Disconnected("connect timed out".to_string());
                    }
                },
                command = self.commands.next() => match command {
                    Some(command) => self.apply_offline(command),
                    None => return Exit::Stopped,
                },
                _ = self.shutdown.changed() => return Exit::Stopped,
            }
        };

        let (mut sink, mut source) = stream.split();
        self.set_state(ChannelState::Connected);
        tracing::info!(url = %self.url, "realtime channel connected");
        self.emit(ChannelEvent::Connected);

        // Restore subscription state before anything else goes out.
        let topics: Vec<String> = self
            .subscriptions
            .active_topics()
            .map(str::to_string)
            .collect();
        for topic in &topics {
            let command = ClientCommand::subscribe(topic.as_str());
            if let Err(reason) = write_command(&mut sink, &command).await {
                return Exit::Disconnected(reason);
            }
        }
        if !topics.is_empty() {
            tracing::debug!(count = topics.len(), "replayed subscriptions");
        }

        loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!(url = %self.url, "realtime channel received close frame");
                        return Exit::Disconnected("closed by server".to_string());
                    }
                    Some(Ok(_)) => {
                        // Pings are answered by tungstenite; binary frames
                        // are not part of the protocol.
                    }
                    Some(Err(e)) => {
                        tracing::error!(url = %self.url, error = %e, "realtime read error");
                        return Exit::Disconnected(e.to_string());
                    }
                    None => return Exit::Disconnected("connection closed".to_string()),
                },
                command = self.commands.next() => match command {
                    Some(command) => {
                        if let Err(reason) = self.apply_online(command, &mut sink).await {
                            return Exit::Disconnected(reason);
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return Exit::Stopped;
                    }
                },
                _ = self.shutdown.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Exit::Stopped;
                }
            }
        }
    }

    /// Sleep for the reconnect delay while still applying commands.
    /// Returns `false` on teardown.
    async fn wait_before_reconnect(&mut self) -> bool {
        tracing::debug!(delay_ms = self.reconnect_delay.as_millis() as u64, "scheduling reconnect");
        let sleep = tokio::time::sleep(self.reconnect_delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.next() => match command {
                    Some(command) => self.apply_offline(command),
                    None => return false,
                },
                _ = self.shutdown.changed() => return false,
            }
        }
    }

    /// Apply a command while no socket is open: refcounts move, nothing is sent.
    fn apply_offline(&mut self, command: Command) {
        match command {
            Command::Subscribe(topic) => {
                self.subscriptions.acquire(&topic);
                tracing::debug!(
                    topic = %topic,
                    refcount = self.subscriptions.refcount(&topic),
                    "subscription deferred until connected"
                );
            }
            Command::Unsubscribe(topic) => {
                self.subscriptions.release(&topic);
                tracing::debug!(
                    topic = %topic,
                    refcount = self.subscriptions.refcount(&topic),
                    "unsubscribed while offline"
                );
            }
            Command::Send(command) => {
                let state = *self.state.borrow();
                tracing::warn!(?state, ?command, "dropping send while not connected");
            }
        }
    }

    async fn apply_online<S>(&mut self, command: Command, sink: &mut S) -> Result<(), String>
    where
        S: Sink<Message> + Unpin,
        S::Error: Display,
    {
        match command {
            Command::Subscribe(topic) => {
                if self.subscriptions.acquire(&topic) {
                    write_command(sink, &ClientCommand::subscribe(topic)).await?;
                } else {
                    let refcount = self.subscriptions.refcount(&topic);
                    tracing::debug!(topic = %topic, refcount, "topic already subscribed");
                }
            }
            Command::Unsubscribe(topic) => {
                if self.subscriptions.release(&topic) {
                    write_command(sink, &ClientCommand::unsubscribe(topic)).await?;
                } else {
                    let refcount = self.subscriptions.refcount(&topic);
                    tracing::debug!(topic = %topic, refcount, "topic still held");
                }
            }
            Command::Send(command) => write_command(sink, &command).await?,
        }
        Ok(())
    }

    fn handle_text(&self, text: &str) {
        match InboundEvent::parse(text) {
            Ok(event) => {
                tracing::debug!(
                    kind = event.kind(),
                    campaign_id = event.campaign_id(),
                    "realtime event received"
                );
                self.emit(ChannelEvent::Event(event));
            }
            Err(e) => tracing::warn!(error = %e, "dropping malformed realtime frame"),
        }
    }

    fn set_state(&self, state: ChannelState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(?previous, ?state, "channel state changed");
        }
    }

    fn emit(&self, event: ChannelEvent) {
        if self.events.unbounded_send(event).is_err() {
            tracing::debug!("channel event dropped, no consumer");
        }
    }
}

async fn write_command<S>(sink: &mut S, command: &ClientCommand) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let json = match serde_json::to_string(command) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize channel command");
            return Ok(());
        }
    };
    tracing::debug!(frame = %json, "sending");
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| format!("send failed: {e}"))
}
