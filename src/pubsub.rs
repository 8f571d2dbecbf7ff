//! A named, process-wide publish/subscribe bus.
//!
//! Mirrors `wampy.pubsub.PubSub`: subscriptions are held with a **strong** key
//! (the `(key, callback)` pair) and a **weak** value (the subscriber), so a
//! subscriber that becomes unreachable everywhere else silently drops out of
//! the bus. Rust has no finalizers, so "drops out" here means *lazily* — the
//! dead entry is pruned the next time the topic is touched by `subscribe`,
//! `unsubscribe`, `subscriptions`, or `publish`, which is the only externally
//! observable contract the protocol spec requires.

use std::any::Any;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, trace};

use lazy_static::lazy_static;

use crate::callable::WeakCallable;
use crate::messages::Uri;

/// The default bus name a freshly constructed [`crate::session::Session`] joins.
pub const DEFAULT_BUS_NAME: &str = "WAMPSessions";

pub type EventCallback = WeakCallable<(Uri, serde_json::Value), ()>;

struct SubscriptionKey {
    key: String,
    callback: EventCallback,
}

impl PartialEq for SubscriptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.callback == other.callback
    }
}

impl Eq for SubscriptionKey {}

impl Hash for SubscriptionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.callback.hash(state);
    }
}

type Subscriber = Weak<dyn Any + Send + Sync>;

/// A live, revived view of a single subscription, as returned by
/// [`PubSubBus::subscriptions`].
pub struct SubscriptionView {
    pub subscriber: Arc<dyn Any + Send + Sync>,
    pub key: String,
    pub callback: EventCallback,
}

#[derive(Default)]
struct Topics {
    by_topic: HashMap<Uri, HashMap<SubscriptionKey, Subscriber>>,
}

impl Topics {
    fn prune(&mut self, topic: &Uri) {
        if let Some(subs) = self.by_topic.get_mut(topic) {
            subs.retain(|sub_key, subscriber| subscriber.upgrade().is_some() && sub_key.callback.is_alive());
            if subs.is_empty() {
                self.by_topic.remove(topic);
            }
        }
    }

    fn prune_all(&mut self) {
        let topics: Vec<Uri> = self.by_topic.keys().cloned().collect();
        for topic in topics {
            self.prune(&topic);
        }
    }
}

/// A process-wide, named publish/subscribe bus.
///
/// `PubSubBus::named(name)` returns the singleton for `name`, creating it on
/// first lookup, matching `PubSub.__new__`'s per-name instance cache.
pub struct PubSubBus {
    name: String,
    topics: Mutex<Topics>,
}

lazy_static! {
    static ref BUSES: Mutex<HashMap<String, Arc<PubSubBus>>> = Mutex::new(HashMap::new());
}

impl PubSubBus {
    /// Look up (or create) the process-wide bus registered under `name`.
    pub fn named(name: impl Into<String>) -> Arc<PubSubBus> {
        let name = name.into();
        let mut buses = BUSES.lock().unwrap();
        buses
            .entry(name.clone())
            .or_insert_with(|| {
                Arc::new(PubSubBus {
                    name,
                    topics: Mutex::new(Topics::default()),
                })
            })
            .clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `callback` under `key` for `topic`. The subscriber is held
    /// weakly; duplicate `(key, callback)` registrations on the same topic
    /// collapse to one entry.
    pub fn subscribe(
        &self,
        subscriber: &Arc<dyn Any + Send + Sync>,
        key: impl Into<String>,
        topic: impl Into<Uri>,
        callback: EventCallback,
    ) {
        let topic = topic.into();
        let key = key.into();
        debug!("bus {}: subscribe key={} topic={}", self.name, key, topic);
        let mut topics = self.topics.lock().unwrap();
        topics.prune(&topic);
        topics
            .by_topic
            .entry(topic)
            .or_default()
            .insert(SubscriptionKey { key, callback }, Arc::downgrade(subscriber));
    }

    /// Remove matching subscriptions. Each of `subscriber`/`key`/`topic`/
    /// `callback` that is `Some` narrows the match; `None` matches anything.
    pub fn unsubscribe(
        &self,
        subscriber: Option<&Arc<dyn Any + Send + Sync>>,
        key: Option<&str>,
        topic: Option<&Uri>,
        callback: Option<&EventCallback>,
    ) {
        let mut topics = self.topics.lock().unwrap();
        let target_topics: Vec<Uri> = match topic {
            Some(t) => vec![t.clone()],
            None => topics.by_topic.keys().cloned().collect(),
        };
        for t in target_topics {
            topics.prune(&t);
            if let Some(subs) = topics.by_topic.get_mut(&t) {
                subs.retain(|sub_key, weak_subscriber| {
                    let matches = matches_subscriber(subscriber, weak_subscriber)
                        && matches_key(key, &sub_key.key)
                        && matches_opt(callback, &sub_key.callback);
                    !matches
                });
            }
            topics.prune(&t);
        }
        debug!(
            "bus {}: unsubscribe key={:?} topic={:?}",
            self.name, key, topic
        );
    }

    /// Enumerate live subscriptions, filtering by topic/key/subscriber/callback.
    /// Topics with zero matching (post-pruning) subscriptions are omitted.
    pub fn subscriptions(
        &self,
        subscriber: Option<&Arc<dyn Any + Send + Sync>>,
        key: Option<&str>,
        topic: Option<&Uri>,
        callback: Option<&EventCallback>,
    ) -> HashMap<Uri, Vec<SubscriptionView>> {
        let mut topics = self.topics.lock().unwrap();
        topics.prune_all();
        let mut report: HashMap<Uri, Vec<SubscriptionView>> = HashMap::new();
        let candidates: Vec<&Uri> = match topic {
            Some(t) => topics.by_topic.keys().filter(|k| *k == t).collect(),
            None => topics.by_topic.keys().collect(),
        };
        for t in candidates {
            let subs = &topics.by_topic[t];
            for (sub_key, weak_subscriber) in subs {
                let strong_subscriber = match weak_subscriber.upgrade() {
                    Some(s) => s,
                    None => continue,
                };
                let matches = matches_subscriber_strong(subscriber, &strong_subscriber)
                    && matches_key(key, &sub_key.key)
                    && matches_opt(callback, &sub_key.callback);
                if matches {
                    report.entry(t.clone()).or_default().push(SubscriptionView {
                        subscriber: strong_subscriber,
                        key: sub_key.key.clone(),
                        callback: sub_key.callback.clone(),
                    });
                }
            }
        }
        report
    }

    /// Fan an event out to every subscription on `topic` whose key is not in
    /// `exclude` and — if `eligible` is non-empty — is in `eligible`.
    ///
    /// Invoked in the publisher's thread: if a subscriber callback blocks,
    /// `publish` blocks. The per-topic subscriber set is snapshotted before
    /// the lock is released, so a callback that re-enters the bus (e.g. to
    /// unsubscribe itself) cannot deadlock.
    pub fn publish(&self, topic: &Uri, event: serde_json::Value, exclude: &[String], eligible: &[String]) {
        let matching: Vec<EventCallback> = {
            let mut topics = self.topics.lock().unwrap();
            topics.prune(topic);
            match topics.by_topic.get(topic) {
                Some(subs) => subs
                    .iter()
                    .filter(|(sub_key, _)| {
                        !exclude.contains(&sub_key.key) && (eligible.is_empty() || eligible.contains(&sub_key.key))
                    })
                    .map(|(sub_key, _)| sub_key.callback.clone())
                    .collect(),
                None => Vec::new(),
            }
        };
        trace!(
            "bus {}: publish topic={} to {} subscriber(s)",
            self.name,
            topic,
            matching.len()
        );
        for callback in matching {
            callback.call((topic.clone(), event.clone()));
        }
    }
}

fn matches_opt<T: PartialEq + ?Sized>(filter: Option<&T>, actual: &T) -> bool {
    filter.map_or(true, |f| f == actual)
}

fn matches_key(filter: Option<&str>, actual: &str) -> bool {
    filter.map_or(true, |f| f == actual)
}

fn matches_subscriber(filter: Option<&Arc<dyn Any + Send + Sync>>, actual: &Subscriber) -> bool {
    match filter {
        None => true,
        Some(expected) => actual
            .upgrade()
            .map_or(false, |actual_strong| Arc::ptr_eq(expected, &actual_strong)),
    }
}

fn matches_subscriber_strong(filter: Option<&Arc<dyn Any + Send + Sync>>, actual: &Arc<dyn Any + Send + Sync>) -> bool {
    match filter {
        None => true,
        Some(expected) => Arc::ptr_eq(expected, actual),
    }
}
