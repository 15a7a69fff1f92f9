// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-node event channel.
//!
//! Each [`MonitoredNode`](crate::node::MonitoredNode) owns one
//! [`EventChannel`] carrying two topics:
//!
//! - **change**: a normalized [`ChangeEvent`]
//! - **error**: a [`NodeErrorEvent`] reported by the server for the item
//!
//! The channel is a `tokio::sync::broadcast` whose capacity equals the
//! monitored item queue size. Publishing never blocks. A listener that falls
//! behind loses the oldest events and keeps receiving from the oldest one
//! still buffered; the loss is counted and logged.
//!
//! # Example
//!
//! ```
//! use uamon_opcua::event::{ChangeEvent, EventChannel, NodeEvent};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let channel = EventChannel::new(10);
//! let mut listener = channel.subscribe();
//!
//! channel.publish(NodeEvent::Change(ChangeEvent::now("ns=1;s=Var1", "42")));
//!
//! let change = listener.recv_change().await.unwrap();
//! assert_eq!(change.value, "42");
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

// =============================================================================
// Events
// =============================================================================

/// A value change observed on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Local observation time (RFC 3339, UTC).
    pub timestamp: DateTime<Utc>,

    /// The node's identifier as configured.
    pub node_identifier: String,

    /// Rendered scalar value.
    pub value: String,
}

impl ChangeEvent {
    /// Creates an event stamped with the current time.
    pub fn now(node_identifier: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            node_identifier: node_identifier.into(),
            value: value.into(),
        }
    }
}

/// An error reported for a node's monitored item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeErrorEvent {
    /// The node's identifier as configured.
    pub node_identifier: String,

    /// Error description.
    pub error: String,
}

/// An event on a node's channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "event", rename_all = "lowercase")]
pub enum NodeEvent {
    /// Topic "change".
    Change(ChangeEvent),

    /// Topic "error".
    Error(NodeErrorEvent),
}

impl NodeEvent {
    /// Returns the topic name.
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::Change(_) => "change",
            Self::Error(_) => "error",
        }
    }

    /// Returns the node identifier the event belongs to.
    pub fn node_identifier(&self) -> &str {
        match self {
            Self::Change(e) => &e.node_identifier,
            Self::Error(e) => &e.node_identifier,
        }
    }
}

// =============================================================================
// EventChannel
// =============================================================================

/// Counters for one channel.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Events published.
    pub events_published: u64,
    /// Events published with no listener attached.
    pub events_unobserved: u64,
    /// Events lost by lagging listeners (summed over listeners).
    pub events_dropped: u64,
    /// Current listener count.
    pub listener_count: u64,
}

#[derive(Debug, Default)]
struct AtomicChannelStats {
    events_published: AtomicU64,
    events_unobserved: AtomicU64,
    events_dropped: AtomicU64,
}

/// Broadcast channel for one node's events.
#[derive(Clone)]
pub struct EventChannel {
    sender: broadcast::Sender<NodeEvent>,
    capacity: usize,
    stats: Arc<AtomicChannelStats>,
}

impl EventChannel {
    /// Creates a channel that buffers up to `capacity` events per listener.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            stats: Arc::new(AtomicChannelStats::default()),
        }
    }

    /// Publishes an event to every listener.
    ///
    /// Returns the number of listeners reached; `0` is not an error.
    pub fn publish(&self, event: NodeEvent) -> usize {
        self.stats.events_published.fetch_add(1, Ordering::Relaxed);
        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                self.stats.events_unobserved.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    /// Publishes on topic "change".
    pub fn publish_change(&self, event: ChangeEvent) -> usize {
        self.publish(NodeEvent::Change(event))
    }

    /// Publishes on topic "error".
    pub fn publish_error(&self, event: NodeErrorEvent) -> usize {
        self.publish(NodeEvent::Error(event))
    }

    /// Attaches a new listener. It sees events published from now on.
    pub fn subscribe(&self) -> EventListener {
        EventListener {
            receiver: self.sender.subscribe(),
            capacity: self.capacity,
            stats: self.stats.clone(),
            dropped: 0,
        }
    }

    /// Invokes `handler` for every change event, on a spawned task.
    pub fn on_change<F>(&self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(ChangeEvent) + Send + 'static,
    {
        let mut listener = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = listener.recv_change().await {
                handler(event);
            }
        })
    }

    /// Invokes `handler` for every error event, on a spawned task.
    pub fn on_error<F>(&self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(NodeErrorEvent) + Send + 'static,
    {
        let mut listener = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = listener.recv_error().await {
                handler(event);
            }
        })
    }

    /// Returns the current number of listeners.
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Returns the per-listener buffer capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns current statistics.
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            events_published: self.stats.events_published.load(Ordering::Relaxed),
            events_unobserved: self.stats.events_unobserved.load(Ordering::Relaxed),
            events_dropped: self.stats.events_dropped.load(Ordering::Relaxed),
            listener_count: self.listener_count() as u64,
        }
    }
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("capacity", &self.capacity)
            .field("listener_count", &self.listener_count())
            .field(
                "events_published",
                &self.stats.events_published.load(Ordering::Relaxed),
            )
            .finish()
    }
}

// =============================================================================
// EventListener
// =============================================================================

/// One listener on an [`EventChannel`].
pub struct EventListener {
    receiver: broadcast::Receiver<NodeEvent>,
    capacity: usize,
    stats: Arc<AtomicChannelStats>,
    dropped: u64,
}

impl EventListener {
    /// Receives the next event on either topic.
    ///
    /// Returns `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<NodeEvent> {
        loop {
            self.discard_excess();
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => self.record_lag(count),
            }
        }
    }

    /// Receives the next change event, skipping error events.
    pub async fn recv_change(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.recv().await? {
                NodeEvent::Change(event) => return Some(event),
                NodeEvent::Error(_) => continue,
            }
        }
    }

    /// Receives the next error event, skipping change events.
    pub async fn recv_error(&mut self) -> Option<NodeErrorEvent> {
        loop {
            match self.recv().await? {
                NodeEvent::Error(event) => return Some(event),
                NodeEvent::Change(_) => continue,
            }
        }
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<NodeEvent> {
        loop {
            self.discard_excess();
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(count)) => self.record_lag(count),
                Err(_) => return None,
            }
        }
    }

    /// Returns how many events this listener lost to lag.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    // The broadcast buffer is rounded up to a power of two; trim the backlog
    // to `capacity` so only the most recent events are delivered.
    fn discard_excess(&mut self) {
        let mut skipped = 0;
        while self.receiver.len() > self.capacity {
            match self.receiver.try_recv() {
                Ok(_) => skipped += 1,
                Err(broadcast::error::TryRecvError::Lagged(count)) => skipped += count,
                Err(_) => break,
            }
        }
        if skipped > 0 {
            self.record_lag(skipped);
        }
    }

    fn record_lag(&mut self, count: u64) {
        self.dropped += count;
        self.stats.events_dropped.fetch_add(count, Ordering::Relaxed);
        tracing::warn!(count, "Event listener lagged, oldest events dropped");
    }
}

impl fmt::Debug for EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListener")
            .field("dropped", &self.dropped)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn change(value: usize) -> NodeEvent {
        NodeEvent::Change(ChangeEvent::now("ns=1;s=Var1", value.to_string()))
    }

    #[tokio::test]
    async fn test_publish_without_listeners() {
        let channel = EventChannel::new(10);
        assert_eq!(channel.publish(change(1)), 0);
        assert_eq!(channel.stats().events_unobserved, 1);
    }

    #[tokio::test]
    async fn test_slow_listener_keeps_latest_in_order() {
        let channel = EventChannel::new(10);
        let mut listener = channel.subscribe();

        for i in 0..15 {
            channel.publish(change(i));
        }

        let mut received = Vec::new();
        while let Some(NodeEvent::Change(e)) = listener.try_recv() {
            received.push(e.value);
        }

        let expected: Vec<String> = (5..15).map(|i| i.to_string()).collect();
        assert_eq!(received, expected);
        assert_eq!(listener.dropped(), 5);
        assert_eq!(channel.stats().events_dropped, 5);
    }

    #[tokio::test]
    async fn test_listeners_are_independent() {
        let channel = EventChannel::new(4);
        let mut a = channel.subscribe();
        let mut b = channel.subscribe();

        assert_eq!(channel.publish(change(1)), 2);

        assert_eq!(a.recv_change().await.unwrap().value, "1");
        assert_eq!(b.recv_change().await.unwrap().value, "1");
    }

    #[tokio::test]
    async fn test_topic_filtering() {
        let channel = EventChannel::new(10);
        let mut listener = channel.subscribe();

        channel.publish_error(NodeErrorEvent {
            node_identifier: "ns=1;s=Var1".into(),
            error: "BadNodeIdUnknown".into(),
        });
        channel.publish(change(7));

        assert_eq!(listener.recv_change().await.unwrap().value, "7");
        assert!(listener.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_on_change_handler() {
        let channel = EventChannel::new(10);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _handle = channel.on_change(move |e| {
            let _ = tx.send(e.value);
        });
        let errors = channel.on_error(|_| {});

        channel.publish(change(3));

        let value = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("3"));
        errors.abort();
    }

    #[tokio::test]
    async fn test_recv_ends_when_channel_dropped() {
        let channel = EventChannel::new(2);
        let mut listener = channel.subscribe();
        drop(channel);
        assert!(listener.recv().await.is_none());
    }

    #[test]
    fn test_event_serialization() {
        let event = ChangeEvent::now("ns=1;s=Var1", "42");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["nodeIdentifier"], "ns=1;s=Var1");
        assert_eq!(json["value"], "42");
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));

        let tagged = serde_json::to_value(NodeEvent::Change(event)).unwrap();
        assert_eq!(tagged["topic"], "change");
    }
}
