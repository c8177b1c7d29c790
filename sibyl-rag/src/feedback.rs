//! Feedback plumbing
//!
//! `FeedbackBus` is an in-process pub/sub with one channel per event
//! kind. Listeners run synchronously on the publisher's thread and must
//! not block; anything long-lived belongs on the listener's own executor.
//! `QaContextStore` keeps the last answer per QA id alive long enough for
//! feedback to be attributed.

use crate::types::AnswerContext;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use sibyl_core::{AnswerFeedback, DocFeedback};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub type AnswerHandler = Arc<dyn Fn(&AnswerFeedback) + Send + Sync>;
pub type DocHandler = Arc<dyn Fn(&DocFeedback) + Send + Sync>;

/// Opaque unsubscribe token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberHandle {
    id: u64,
    channel: Channel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Answer,
    Doc,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    answer_subs: Vec<(u64, AnswerHandler)>,
    doc_subs: Vec<(u64, DocHandler)>,
}

/// In-process fan-out of feedback verdicts
///
/// Every subscriber receives every event on its channel; events with no
/// subscriber are dropped. Delivery is in publication order per
/// publisher thread.
#[derive(Default)]
pub struct FeedbackBus {
    state: Mutex<BusState>,
}

impl FeedbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_answer(&self, handler: AnswerHandler) -> SubscriberHandle {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.answer_subs.push((id, handler));
        SubscriberHandle {
            id,
            channel: Channel::Answer,
        }
    }

    pub fn subscribe_doc(&self, handler: DocHandler) -> SubscriberHandle {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.doc_subs.push((id, handler));
        SubscriberHandle {
            id,
            channel: Channel::Doc,
        }
    }

    pub fn unsubscribe(&self, handle: SubscriberHandle) {
        let mut state = self.state.lock();
        match handle.channel {
            Channel::Answer => state.answer_subs.retain(|(id, _)| *id != handle.id),
            Channel::Doc => state.doc_subs.retain(|(id, _)| *id != handle.id),
        }
    }

    /// Deliver an answer-level verdict to every subscriber
    pub fn publish_answer(&self, event: &AnswerFeedback) {
        // Handlers run outside the lock so a listener may re-enter the bus
        let handlers: Vec<AnswerHandler> = {
            let state = self.state.lock();
            state.answer_subs.iter().map(|(_, h)| Arc::clone(h)).collect()
        };
        debug!(
            "Publishing answer feedback for qa {} to {} subscribers",
            event.qa_id,
            handlers.len()
        );
        for handler in handlers {
            handler(event);
        }
    }

    /// Deliver a passage-level verdict to every subscriber
    pub fn publish_doc(&self, event: &DocFeedback) {
        let handlers: Vec<DocHandler> = {
            let state = self.state.lock();
            state.doc_subs.iter().map(|(_, h)| Arc::clone(h)).collect()
        };
        for handler in handlers {
            handler(event);
        }
    }
}

struct StoredContext {
    context: AnswerContext,
    touched: DateTime<Utc>,
}

/// Thread-safe map of QA id to the answer context it produced
///
/// Entries leave on explicit removal or after the idle window.
pub struct QaContextStore {
    idle: Duration,
    inner: RwLock<HashMap<Uuid, StoredContext>>,
}

impl QaContextStore {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn put(&self, context: AnswerContext) {
        let mut inner = self.inner.write();
        let now = Utc::now();
        inner.retain(|_, stored| now - stored.touched <= self.idle);
        inner.insert(
            context.qa_id,
            StoredContext {
                context,
                touched: now,
            },
        );
    }

    pub fn get(&self, qa_id: &Uuid) -> Option<AnswerContext> {
        let inner = self.inner.read();
        let stored = inner.get(qa_id)?;
        if Utc::now() - stored.touched > self.idle {
            return None;
        }
        Some(stored.context.clone())
    }

    pub fn remove(&self, qa_id: &Uuid) -> Option<AnswerContext> {
        self.inner.write().remove(qa_id).map(|s| s.context)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sibyl_core::{Chunk, FeedbackReason, Verdict};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context(qa_id: Uuid) -> AnswerContext {
        AnswerContext {
            qa_id,
            question: "q".to_string(),
            query_embedding: vec![1.0],
            answer: "a".to_string(),
            sources: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_all_subscribers_receive_events() {
        let bus = FeedbackBus::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&first);
        bus.subscribe_answer(Arc::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let s = Arc::clone(&second);
        bus.subscribe_answer(Arc::new(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        }));

        let event = AnswerFeedback::new(Uuid::new_v4(), Verdict::Up);
        bus.publish_answer(&event);
        bus.publish_answer(&event);

        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = FeedbackBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let handle = bus.subscribe_doc(Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        let event = DocFeedback::new(
            Chunk::new("x", vec![]),
            Verdict::Down,
            FeedbackReason::NotRelevant,
        );
        bus.publish_doc(&event);
        bus.unsubscribe(handle);
        bus.publish_doc(&event);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = FeedbackBus::new();
        bus.publish_answer(&AnswerFeedback::new(Uuid::new_v4(), Verdict::Up));
    }

    #[test]
    fn test_listener_may_reenter_the_bus() {
        let bus = Arc::new(FeedbackBus::new());
        let inner_count = Arc::new(AtomicUsize::new(0));

        let bus_clone = Arc::clone(&bus);
        let c = Arc::clone(&inner_count);
        bus.subscribe_answer(Arc::new(move |_| {
            // Subscribing from inside a handler must not deadlock
            let c2 = Arc::clone(&c);
            bus_clone.subscribe_doc(Arc::new(move |_| {
                c2.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        bus.publish_answer(&AnswerFeedback::new(Uuid::new_v4(), Verdict::Up));
        bus.publish_doc(&DocFeedback::new(
            Chunk::new("x", vec![]),
            Verdict::Up,
            FeedbackReason::Helpful,
        ));
        assert_eq!(inner_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_context_store_roundtrip_and_removal() {
        let store = QaContextStore::new(Duration::seconds(600));
        let qa_id = Uuid::new_v4();

        store.put(context(qa_id));
        assert!(store.get(&qa_id).is_some());

        store.remove(&qa_id);
        assert!(store.get(&qa_id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_context_store_idle_expiry() {
        let store = QaContextStore::new(Duration::seconds(0));
        let qa_id = Uuid::new_v4();
        store.put(context(qa_id));
        std::thread::sleep(std::time::Duration::from_millis(2));
        // Zero idle window: already expired on read
        assert!(store.get(&qa_id).is_none());
    }
}
