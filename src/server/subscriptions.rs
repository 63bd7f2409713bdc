//! Channel subscription registry.
//!
//! Tracks which connections are subscribed to which named channels, drives
//! broadcast targeting, and fires subscribe/unsubscribe notifications. The
//! relation is many-to-many with set semantics: a `(channel, connection)`
//! pair appears at most once.
//!
//! The registry never owns connection lifetime — it stores connection IDs
//! only, and the lifecycle layer bulk-removes them on disconnect.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;

use crate::domain::ConnectionId;
use crate::log_warn;
use crate::Result;

/// Acquire a mutex guard, intentionally ignoring poisoning.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Observer of channel subscriptions.
///
/// Errors returned by a listener are logged and discarded; they never affect
/// the subscription itself or the remaining listeners.
pub trait SubscribeListener: Send + Sync {
    fn on_subscribe(&self, peer: &str, channel: &str) -> Result<()>;
}

/// Observer of channel unsubscriptions, explicit or disconnect-driven.
pub trait UnsubscribeListener: Send + Sync {
    fn on_unsubscribe(&self, peer: &str, channel: &str) -> Result<()>;
}

pub(crate) struct ChannelSubscriptions {
    // ---
    /// channel name → subscribed connections
    subscriptions: DashMap<String, HashSet<ConnectionId>>,

    subscribe_listeners: Mutex<Vec<Arc<dyn SubscribeListener>>>,
    unsubscribe_listeners: Mutex<Vec<Arc<dyn UnsubscribeListener>>>,
}

impl ChannelSubscriptions {
    // ---
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
            subscribe_listeners: Mutex::new(Vec::new()),
            unsubscribe_listeners: Mutex::new(Vec::new()),
        }
    }

    /// Add the `(channel, connection)` pair and notify subscribe listeners.
    ///
    /// Idempotent with respect to the pair; listeners are notified on every
    /// call.
    pub fn subscribe(&self, id: ConnectionId, peer: &str, channel: &str) {
        // ---
        self.subscriptions
            .entry(channel.to_string())
            .or_default()
            .insert(id);

        self.notify_subscribe(peer, channel);
    }

    /// Remove the pair if present (no-op removal when absent) and notify
    /// unsubscribe listeners.
    pub fn unsubscribe(&self, id: ConnectionId, peer: &str, channel: &str) {
        // ---
        if let Some(mut subscribers) = self.subscriptions.get_mut(channel) {
            subscribers.remove(&id);
        }
        self.subscriptions
            .remove_if(channel, |_, subscribers| subscribers.is_empty());

        self.notify_unsubscribe(peer, channel);
    }

    /// Snapshot of the connections currently subscribed to a channel.
    ///
    /// Concurrent subscribe/unsubscribe calls do not affect the returned
    /// view or corrupt the registry.
    pub fn subscribed_connections(&self, channel: &str) -> Vec<ConnectionId> {
        // ---
        self.subscriptions
            .get(channel)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove every entry for a connection, firing one unsubscribe
    /// notification per channel it was actually on. Used on disconnect.
    pub fn unsubscribe_all(&self, id: ConnectionId, peer: &str) {
        // ---
        let mut removed = Vec::new();

        for mut entry in self.subscriptions.iter_mut() {
            if entry.value_mut().remove(&id) {
                removed.push(entry.key().clone());
            }
        }

        // Shard locks are released; prune and notify without holding any.
        for channel in &removed {
            self.subscriptions
                .remove_if(channel, |_, subscribers| subscribers.is_empty());
        }
        for channel in &removed {
            self.notify_unsubscribe(peer, channel);
        }
    }

    pub fn add_subscribe_listener(&self, listener: Arc<dyn SubscribeListener>) {
        lock_ignore_poison(&self.subscribe_listeners).push(listener);
    }

    pub fn add_unsubscribe_listener(&self, listener: Arc<dyn UnsubscribeListener>) {
        lock_ignore_poison(&self.unsubscribe_listeners).push(listener);
    }

    fn notify_subscribe(&self, peer: &str, channel: &str) {
        // Snapshot first: no registry lock is held across listener code.
        let snapshot = { lock_ignore_poison(&self.subscribe_listeners).clone() };

        for listener in snapshot {
            if let Err(_err) = listener.on_subscribe(peer, channel) {
                log_warn!("subscribe listener failed for {peer} on [{channel}]: {_err}");
            }
        }
    }

    fn notify_unsubscribe(&self, peer: &str, channel: &str) {
        // ---
        let snapshot = { lock_ignore_poison(&self.unsubscribe_listeners).clone() };

        for listener in snapshot {
            if let Err(_err) = listener.on_unsubscribe(peer, channel) {
                log_warn!("unsubscribe listener failed for {peer} on [{channel}]: {_err}");
            }
        }
    }
}
