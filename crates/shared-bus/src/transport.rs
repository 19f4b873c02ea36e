//! # In-Memory Broadcast Transport
//!
//! A process-local [`BroadcastTransport`] for running several mesh instances
//! in one process, plus the fault injection the partition scenarios need.
//!
//! Every endpoint created by one [`InMemoryTransportHub`] can reach every
//! other endpoint of the same hub, unless a fault says otherwise:
//!
//! - `disconnect(a, b)` drops traffic between two endpoints in both directions
//! - `isolate(a)` drops all traffic to and from one endpoint
//! - `set_send_failure(a, true)` makes every `send` from `a` return an error
//! - `set_drop_rate(p)` drops each delivery with probability `p`

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use shared_types::{BroadcastTransport, TransportError, TransportReceiver};
use tokio::sync::mpsc;
use tracing::{debug, trace};

struct ChannelSubscriber {
    endpoint: String,
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

#[derive(Default)]
struct HubState {
    channels: HashMap<String, Vec<ChannelSubscriber>>,
    /// Unordered endpoint pairs that cannot reach each other.
    severed: HashSet<(String, String)>,
    isolated: HashSet<String>,
    failing: HashSet<String>,
    /// (endpoint, channel) pairs closed on that endpoint.
    closed: HashSet<(String, String)>,
    drop_rate: f64,
}

impl HubState {
    fn reachable(&self, from: &str, to: &str) -> bool {
        !self.isolated.contains(from)
            && !self.isolated.contains(to)
            && !self.severed.contains(&pair(from, to))
    }
}

fn pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Shared medium connecting in-memory transport endpoints.
#[derive(Clone, Default)]
pub struct InMemoryTransportHub {
    state: Arc<Mutex<HubState>>,
    delivered: Arc<AtomicU64>,
}

impl InMemoryTransportHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an endpoint. `label` identifies it for fault injection and is
    /// usually the owning instance id.
    #[must_use]
    pub fn endpoint(&self, label: impl Into<String>) -> Arc<InMemoryTransport> {
        Arc::new(InMemoryTransport {
            label: label.into(),
            state: Arc::clone(&self.state),
            delivered: Arc::clone(&self.delivered),
        })
    }

    /// Drop all traffic between `a` and `b`.
    pub fn disconnect(&self, a: &str, b: &str) {
        debug!(a, b, "Transport link severed");
        self.state.lock().severed.insert(pair(a, b));
    }

    /// Restore traffic between `a` and `b`.
    pub fn reconnect(&self, a: &str, b: &str) {
        debug!(a, b, "Transport link restored");
        self.state.lock().severed.remove(&pair(a, b));
    }

    /// Drop all traffic to and from `endpoint`.
    pub fn isolate(&self, endpoint: &str) {
        debug!(endpoint, "Transport endpoint isolated");
        self.state.lock().isolated.insert(endpoint.to_string());
    }

    /// Split the endpoints into two groups that cannot reach each other.
    pub fn split(&self, left: &[&str], right: &[&str]) {
        let mut state = self.state.lock();
        for a in left {
            for b in right {
                state.severed.insert(pair(a, b));
            }
        }
    }

    /// Remove every link fault (severed pairs and isolation).
    pub fn heal(&self) {
        debug!("Transport faults cleared");
        let mut state = self.state.lock();
        state.severed.clear();
        state.isolated.clear();
    }

    /// Make every send from `endpoint` fail (or stop failing).
    pub fn set_send_failure(&self, endpoint: &str, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(endpoint.to_string());
        } else {
            state.failing.remove(endpoint);
        }
    }

    /// Drop each delivery with probability `rate` (clamped to `0.0..=1.0`).
    pub fn set_drop_rate(&self, rate: f64) {
        self.state.lock().drop_rate = rate.clamp(0.0, 1.0);
    }

    /// Messages delivered to subscribers since creation.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

/// One endpoint of an [`InMemoryTransportHub`].
pub struct InMemoryTransport {
    label: String,
    state: Arc<Mutex<HubState>>,
    delivered: Arc<AtomicU64>,
}

impl InMemoryTransport {
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl BroadcastTransport for InMemoryTransport {
    fn send(&self, channel: &str, message: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.state.lock();

        if state.failing.contains(&self.label) {
            return Err(TransportError::SendFailed {
                channel: channel.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        if state
            .closed
            .contains(&(self.label.clone(), channel.to_string()))
        {
            return Err(TransportError::ChannelClosed(channel.to_string()));
        }

        let drop_rate = state.drop_rate;
        let mut rng = rand::thread_rng();
        let mut delivered = 0u64;

        let targets: Vec<usize> = match state.channels.get(channel) {
            Some(subscribers) => subscribers
                .iter()
                .enumerate()
                .filter(|(_, sub)| sub.endpoint != self.label)
                .filter(|(_, sub)| state.reachable(&self.label, &sub.endpoint))
                .map(|(index, _)| index)
                .collect(),
            None => Vec::new(),
        };

        if let Some(subscribers) = state.channels.get_mut(channel) {
            let mut gone = Vec::new();
            for index in targets {
                if drop_rate > 0.0 && rng.gen_bool(drop_rate) {
                    continue;
                }
                if subscribers[index].sender.send(message.clone()).is_ok() {
                    delivered += 1;
                } else {
                    gone.push(index);
                }
            }
            for index in gone.into_iter().rev() {
                subscribers.swap_remove(index);
            }
        }

        self.delivered.fetch_add(delivered, Ordering::Relaxed);
        trace!(endpoint = %self.label, channel, delivered, "Message broadcast");
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> Result<TransportReceiver, TransportError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state
            .closed
            .remove(&(self.label.clone(), channel.to_string()));
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(ChannelSubscriber {
                endpoint: self.label.clone(),
                sender,
            });
        debug!(endpoint = %self.label, channel, "Transport subscription opened");
        Ok(receiver)
    }

    fn close(&self, channel: &str) {
        let mut state = self.state.lock();
        if let Some(subscribers) = state.channels.get_mut(channel) {
            subscribers.retain(|sub| sub.endpoint != self.label);
        }
        state
            .closed
            .insert((self.label.clone(), channel.to_string()));
        debug!(endpoint = %self.label, channel, "Transport channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_others_not_self() {
        let hub = InMemoryTransportHub::new();
        let a = hub.endpoint("a");
        let b = hub.endpoint("b");
        let c = hub.endpoint("c");

        let mut rx_a = a.subscribe("bus:events").unwrap();
        let mut rx_b = b.subscribe("bus:events").unwrap();
        let mut rx_c = c.subscribe("bus:events").unwrap();

        a.send("bus:events", b"hello".to_vec()).unwrap();

        assert_eq!(rx_b.recv().await.unwrap(), b"hello".to_vec());
        assert_eq!(rx_c.recv().await.unwrap(), b"hello".to_vec());
        assert!(rx_a.try_recv().is_err());
        assert_eq!(hub.delivered(), 2);
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let hub = InMemoryTransportHub::new();
        let a = hub.endpoint("a");
        let b = hub.endpoint("b");
        let mut rx = b.subscribe("bus:election").unwrap();

        a.send("bus:events", vec![1]).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_and_reconnect() {
        let hub = InMemoryTransportHub::new();
        let a = hub.endpoint("a");
        let b = hub.endpoint("b");
        let mut rx = b.subscribe("bus:events").unwrap();

        hub.disconnect("b", "a");
        a.send("bus:events", vec![1]).unwrap();
        assert!(rx.try_recv().is_err());

        hub.reconnect("a", "b");
        a.send("bus:events", vec![2]).unwrap();
        assert_eq!(rx.recv().await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_split_and_heal() {
        let hub = InMemoryTransportHub::new();
        let a = hub.endpoint("a");
        let b = hub.endpoint("b");
        let c = hub.endpoint("c");
        let mut rx_b = b.subscribe("ch").unwrap();
        let mut rx_c = c.subscribe("ch").unwrap();

        hub.split(&["a", "b"], &["c"]);
        a.send("ch", vec![1]).unwrap();
        assert_eq!(rx_b.recv().await.unwrap(), vec![1]);
        assert!(rx_c.try_recv().is_err());

        hub.heal();
        a.send("ch", vec![2]).unwrap();
        assert_eq!(rx_c.recv().await.unwrap(), vec![2]);
    }

    #[test]
    fn test_send_failure_injection() {
        let hub = InMemoryTransportHub::new();
        let a = hub.endpoint("a");

        hub.set_send_failure("a", true);
        let err = a.send("ch", vec![1]).unwrap_err();
        assert!(matches!(err, TransportError::SendFailed { .. }));

        hub.set_send_failure("a", false);
        assert!(a.send("ch", vec![1]).is_ok());
    }

    #[tokio::test]
    async fn test_close_stops_receiving_and_sending() {
        let hub = InMemoryTransportHub::new();
        let a = hub.endpoint("a");
        let b = hub.endpoint("b");
        let mut rx = b.subscribe("ch").unwrap();

        b.close("ch");
        a.send("ch", vec![1]).unwrap();
        assert!(rx.recv().await.is_none());
        assert!(matches!(
            b.send("ch", vec![1]),
            Err(TransportError::ChannelClosed(_))
        ));
    }

    #[test]
    fn test_full_drop_rate_loses_everything() {
        let hub = InMemoryTransportHub::new();
        let a = hub.endpoint("a");
        let b = hub.endpoint("b");
        let mut rx = b.subscribe("ch").unwrap();

        hub.set_drop_rate(1.0);
        a.send("ch", vec![1]).unwrap();
        assert!(rx.try_recv().is_err());
    }
}
