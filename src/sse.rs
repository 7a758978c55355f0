//! Reconnecting Server-Sent-Events client
//!
//! Consumes a `text/event-stream` endpoint and hands each frame to an
//! [`EventSourceHandler`], synchronously and in arrival order. Any stream
//! failure (I/O error, parse error, end of stream) tears the connection
//! down, fires `on_error`, and schedules a fresh connection after a fixed
//! delay. The loop runs until the shutdown signal fires; shutdown unblocks
//! `run` within one reconnect interval.

use async_trait::async_trait;
use eventsource_client as es;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tracing::debug;

/// Callbacks invoked by the event source
///
/// `on_event` receives every named frame; handlers dispatch by name and
/// keep a catch-all arm for events they do not recognize.
#[async_trait]
pub trait EventSourceHandler: Send {
    /// A connection to the endpoint was (re)established
    async fn on_open(&mut self);

    /// The stream failed; a reconnect is already scheduled
    async fn on_error(&mut self, message: &str);

    /// One complete SSE frame: event name and data payload
    async fn on_event(&mut self, name: &str, data: &str);
}

/// Reconnecting SSE client
pub struct EventSource {
    url: String,
    reconnect_delay: Duration,
    shutdown_rx: broadcast::Receiver<()>,
}

impl EventSource {
    /// Create an event source for `url`; it does not connect until `run`
    pub fn new(
        url: impl Into<String>,
        reconnect_delay: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            url: url.into(),
            reconnect_delay,
            shutdown_rx,
        }
    }

    /// Endpoint this source connects to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect and stream frames to `handler` until shutdown
    ///
    /// Blocks the calling task. The library-internal retry is disabled;
    /// this loop owns reconnection so `on_error` fires exactly once per
    /// failed connection.
    pub async fn run<H: EventSourceHandler>(mut self, handler: &mut H) {
        loop {
            let mut client = match es::ClientBuilder::for_url(&self.url) {
                Ok(builder) => builder
                    .reconnect(es::ReconnectOptions::reconnect(false).build())
                    .build(),
                Err(err) => {
                    handler.on_error(&format!("bad endpoint: {err}")).await;
                    if self.sleep_or_shutdown().await {
                        return;
                    }
                    continue;
                }
            };

            match self.stream_events(&mut client, handler).await {
                StreamOutcome::Shutdown => return,
                StreamOutcome::Disconnected(message) => {
                    handler.on_error(&message).await;
                }
            }

            if self.sleep_or_shutdown().await {
                return;
            }
        }
    }

    async fn stream_events<H: EventSourceHandler>(
        &mut self,
        client: &mut impl es::Client,
        handler: &mut H,
    ) -> StreamOutcome {
        let mut stream = client.stream();

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    debug!(url = %self.url, "event source shutdown during streaming");
                    return StreamOutcome::Shutdown;
                }
                frame = stream.next() => match frame {
                    Some(Ok(es::SSE::Connected(_))) => {
                        debug!(url = %self.url, "event source connected");
                        handler.on_open().await;
                    }
                    Some(Ok(es::SSE::Event(event))) => {
                        handler.on_event(&event.event_type, &event.data).await;
                    }
                    Some(Ok(es::SSE::Comment(_))) => {
                        // keepalive
                    }
                    Some(Err(err)) => {
                        return StreamOutcome::Disconnected(format!("stream error: {err}"));
                    }
                    None => {
                        return StreamOutcome::Disconnected("stream closed by peer".to_string());
                    }
                }
            }
        }
    }

    /// Wait out the reconnect delay; true means shutdown arrived instead
    async fn sleep_or_shutdown(&mut self) -> bool {
        tokio::select! {
            _ = self.shutdown_rx.recv() => true,
            _ = tokio::time::sleep(self.reconnect_delay) => false,
        }
    }
}

enum StreamOutcome {
    /// Shutdown signal received; stop for good
    Shutdown,
    /// Connection lost; reconnect after the delay
    Disconnected(String),
}
