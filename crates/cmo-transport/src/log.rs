// crates/cmo-transport/src/log.rs
// ============================================================================
// Module: Log Transport
// Description: An in-process append-only log transport with consumer
//              groups, at-least-once delivery, and a dead-letter topic.
// Purpose: Concrete `Transport` backend used by `cmo-runtime` (activity
//          boundary `sendA2A`) and `cmo-cli` (`serve`), and directly by
//          tests exercising publish/subscribe semantics.
// Dependencies: cmo-core, thiserror, tracing
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use cmo_core::core::envelope::Envelope;
use cmo_core::core::identifiers::ConsumerGroup;
use cmo_core::core::identifiers::Topic;
use cmo_core::error::TransportError;
use cmo_core::interfaces::DeliveryOutcome;
use cmo_core::interfaces::HealthStatus;
use cmo_core::interfaces::MessageId;
use cmo_core::interfaces::PublishOptions;
use cmo_core::interfaces::Subscription;
use cmo_core::interfaces::Transport;
use cmo_core::interfaces::TransportStats;

/// Suffix appended to a topic's name to derive its dead-letter topic.
const DLQ_SUFFIX: &str = ".dlq";

/// Tunables for [`LogTransport`] that have no equivalent in
/// `cmo_core`'s configuration shape because they are specific to this
/// in-process reference backend rather than a deployment-level setting.
#[derive(Debug, Clone, Copy)]
pub struct LogTransportConfig {
    /// A message NACKed more than this many times is routed to the DLQ.
    pub max_delivery_attempts: u32,
    /// Window within which a repeated `dedupeKey` is treated as a duplicate
    /// publish.
    pub dedupe_window: Duration,
    /// How long a subscriber thread waits for new entries before checking
    /// its cancellation flag again.
    pub poll_interval: Duration,
}

impl Default for LogTransportConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: 3,
            dedupe_window: Duration::from_secs(60),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// A single published message and its per-group delivery attempt counts.
struct Entry {
    /// Identifier assigned at publish time.
    id: MessageId,
    /// The published envelope.
    envelope: Envelope,
    /// NACK counts, keyed by the consumer group that observed them.
    attempts: HashMap<ConsumerGroup, u32>,
}

/// A consumer group's read cursor into a topic's log.
#[derive(Default)]
struct GroupState {
    /// Index of the next entry this group has not yet acknowledged,
    /// rejected, or dead-lettered.
    cursor: usize,
}

/// The append-only log and group cursors for one topic.
#[derive(Default)]
struct TopicLog {
    /// Entries in publish order.
    entries: Vec<Entry>,
    /// Per-group read cursors.
    groups: HashMap<ConsumerGroup, GroupState>,
}

/// Mutable state shared between [`LogTransport`] and its subscriber
/// threads.
struct Shared {
    /// All topics known to this transport instance.
    topics: Mutex<HashMap<Topic, TopicLog>>,
    /// Signaled whenever a new entry is published, so idle subscriber
    /// threads do not busy-poll.
    activity: Condvar,
    /// Dedupe-key publishes, keyed by `(topic, dedupeKey)`.
    dedupe: Mutex<HashMap<(String, String), (MessageId, Instant)>>,
    /// Aggregate counters exposed by `stats()`.
    stats: Mutex<TransportStats>,
    /// Monotonic counter used to mint message ids and private request
    /// consumer-group names.
    next_id: AtomicU64,
    /// Set by `close()`; subscriber threads exit promptly once observed.
    closed: AtomicBool,
    /// Tunables for this reference backend.
    config: LogTransportConfig,
}

impl Shared {
    /// Publishes an envelope without going through the public API's
    /// dedupe bookkeeping; used internally to route dead-lettered
    /// messages.
    fn publish_raw(&self, topic: &Topic, envelope: &Envelope) -> MessageId {
        let id = MessageId(format!("msg-{}", self.next_id.fetch_add(1, Ordering::Relaxed)));
        let mut topics = match self.topics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        topics.entry(topic.clone()).or_default().entries.push(Entry {
            id: id.clone(),
            envelope: envelope.clone(),
            attempts: HashMap::new(),
        });
        drop(topics);
        self.activity.notify_all();
        id
    }
}

/// An in-process, log-style publish/subscribe transport with consumer
/// groups, at-least-once delivery, and a dead-letter topic per source
/// topic.
///
/// # Invariants
/// - Each consumer group's read cursor advances independently; a message
///   is delivered to at most one subscriber within a group at a time.
/// - A message NACKed more than `config.max_delivery_attempts` times is
///   moved to `"<topic>.dlq"` and the group's cursor advances past it.
pub struct LogTransport {
    shared: Arc<Shared>,
}

impl LogTransport {
    /// Builds a transport with no topics yet published to.
    #[must_use]
    pub fn new(config: LogTransportConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                topics: Mutex::new(HashMap::new()),
                activity: Condvar::new(),
                dedupe: Mutex::new(HashMap::new()),
                stats: Mutex::new(TransportStats::default()),
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Derives the dead-letter topic name for `topic`.
    fn dlq_topic(topic: &Topic) -> Topic {
        Topic::new(format!("{}{DLQ_SUFFIX}", topic.as_str()))
    }
}

impl Default for LogTransport {
    fn default() -> Self {
        Self::new(LogTransportConfig::default())
    }
}

/// Handle returned by [`LogTransport::subscribe`]; dropping it does not
/// cancel delivery, only [`Subscription::cancel`] does.
pub struct LogSubscription {
    /// Observed by the subscriber thread at the top of every poll.
    cancelled: Arc<AtomicBool>,
}

impl Subscription for LogSubscription {
    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

impl Transport for LogTransport {
    fn publish(&self, topic: &Topic, envelope: &Envelope, options: PublishOptions) -> Result<MessageId, TransportError> {
        if self.shared.closed.load(Ordering::Relaxed) {
            return Err(TransportError::PublishFailed("transport is closed".to_string()));
        }
        if let Some(dedupe_key) = options.dedupe_key {
            let key = (topic.as_str().to_string(), dedupe_key);
            let mut dedupe = match self.shared.dedupe.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some((existing_id, seen_at)) = dedupe.get(&key) {
                if seen_at.elapsed() < self.shared.config.dedupe_window {
                    return Ok(existing_id.clone());
                }
            }
            drop(dedupe);
            let id = self.shared.publish_raw(topic, envelope);
            let mut dedupe = match self.shared.dedupe.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            dedupe.insert(key, (id.clone(), Instant::now()));
            drop(dedupe);
            let mut stats = match self.shared.stats.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            stats.published += 1;
            return Ok(id);
        }
        let id = self.shared.publish_raw(topic, envelope);
        let mut stats = match self.shared.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        stats.published += 1;
        Ok(id)
    }

    fn subscribe(
        &self,
        topic: &Topic,
        group: &ConsumerGroup,
        mut handler: Box<dyn FnMut(Envelope) -> DeliveryOutcome + Send>,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        if self.shared.closed.load(Ordering::Relaxed) {
            return Err(TransportError::PublishFailed("transport is closed".to_string()));
        }
        {
            let mut topics = match self.shared.topics.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            topics.entry(topic.clone()).or_default().groups.entry(group.clone()).or_default();
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let thread_cancelled = Arc::clone(&cancelled);
        let shared = Arc::clone(&self.shared);
        let topic = topic.clone();
        let group = group.clone();
        let dlq_topic = Self::dlq_topic(&topic);

        thread::spawn(move || {
            subscriber_loop(&shared, &topic, &dlq_topic, &group, thread_cancelled.as_ref(), handler.as_mut());
        });

        Ok(Box::new(LogSubscription { cancelled }))
    }

    fn request(&self, topic: &Topic, envelope: &Envelope, timeout: Duration) -> Result<Envelope, TransportError> {
        let reply_topic = envelope
            .meta
            .reply_to
            .clone()
            .map(Topic::new)
            .unwrap_or_else(|| Topic::new(format!("{}.replies", topic.as_str())));
        let correlation_id = envelope.meta.correlation_id.clone();
        let request_id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let group = ConsumerGroup::new(format!("request-{request_id}"));

        let (tx, rx) = std::sync::mpsc::channel::<Envelope>();
        let tx = Mutex::new(Some(tx));
        let expected = correlation_id.clone();
        let mut subscription = self.subscribe(
            &reply_topic,
            &group,
            Box::new(move |reply: Envelope| {
                if reply.meta.correlation_id == expected {
                    if let Ok(mut slot) = tx.lock() {
                        if let Some(sender) = slot.take() {
                            let _ = sender.send(reply);
                        }
                    }
                }
                DeliveryOutcome::Ack
            }),
        )?;

        self.publish(topic, envelope, PublishOptions::default())?;
        let outcome = rx.recv_timeout(timeout);
        subscription.cancel();

        outcome.map_err(|_| {
            #[allow(clippy::cast_possible_truncation, reason = "request timeouts are bounded well under u64::MAX ms")]
            let millis = timeout.as_millis() as u64;
            TransportError::RequestTimeout(millis)
        })
    }

    fn stats(&self) -> TransportStats {
        match self.shared.stats.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn health(&self) -> Result<HealthStatus, TransportError> {
        let started = Instant::now();
        let healthy = !self.shared.closed.load(Ordering::Relaxed);
        Ok(HealthStatus {
            healthy,
            latency: started.elapsed(),
        })
    }

    fn close(&self) -> Result<(), TransportError> {
        self.shared.closed.store(true, Ordering::Relaxed);
        self.shared.activity.notify_all();
        Ok(())
    }
}

/// Body of a subscriber's background thread: pulls entries in order
/// starting at the group's cursor, invokes `handler`, and advances the
/// cursor according to the returned [`DeliveryOutcome`].
fn subscriber_loop(
    shared: &Arc<Shared>,
    topic: &Topic,
    dlq_topic: &Topic,
    group: &ConsumerGroup,
    cancelled: &AtomicBool,
    handler: &mut (dyn FnMut(Envelope) -> DeliveryOutcome + Send),
) {
    loop {
        if cancelled.load(Ordering::Relaxed) || shared.closed.load(Ordering::Relaxed) {
            return;
        }

        let next = {
            let mut topics = match shared.topics.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let Some(topic_log) = topics.get_mut(topic) else {
                return;
            };
            let Some(group_state) = topic_log.groups.get_mut(group) else {
                return;
            };
            if group_state.cursor < topic_log.entries.len() {
                let idx = group_state.cursor;
                let entry = &topic_log.entries[idx];
                Some((idx, entry.id.clone(), entry.envelope.clone()))
            } else {
                None
            }
        };

        let Some((idx, message_id, envelope)) = next else {
            let topics = match shared.topics.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let (_guard, _timeout_result) = match shared.activity.wait_timeout(topics, shared.config.poll_interval) {
                Ok(pair) => pair,
                Err(poisoned) => poisoned.into_inner(),
            };
            continue;
        };

        tracing::debug!(message_id = message_id.0.as_str(), topic = topic.as_str(), "delivering message");
        let outcome = handler(envelope.clone());
        let mut dead_letter = false;

        {
            let mut topics = match shared.topics.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(topic_log) = topics.get_mut(topic) {
                match outcome {
                    DeliveryOutcome::Ack => {
                        if let Some(group_state) = topic_log.groups.get_mut(group) {
                            group_state.cursor = idx + 1;
                        }
                    }
                    DeliveryOutcome::Nack => {
                        let attempts = topic_log.entries[idx].attempts.entry(group.clone()).or_insert(0);
                        *attempts += 1;
                        if *attempts >= shared.config.max_delivery_attempts {
                            dead_letter = true;
                            if let Some(group_state) = topic_log.groups.get_mut(group) {
                                group_state.cursor = idx + 1;
                            }
                        }
                    }
                    DeliveryOutcome::Reject => {
                        dead_letter = true;
                        if let Some(group_state) = topic_log.groups.get_mut(group) {
                            group_state.cursor = idx + 1;
                        }
                    }
                }
            }
        }

        if dead_letter {
            shared.publish_raw(dlq_topic, &envelope);
            if let Ok(mut stats) = shared.stats.lock() {
                stats.dead_lettered += 1;
            }
        } else if matches!(outcome, DeliveryOutcome::Ack) {
            if let Ok(mut stats) = shared.stats.lock() {
                stats.delivered += 1;
            }
        }
    }
}
