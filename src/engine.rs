//! Detection engine: owns the active signal set and evaluates messages
//! against it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::SignalError;
use crate::matcher::{extract_context, CompiledSignal, CustomMatcher};
use crate::models::{Message, NewSignal, SignalDefinition, SignalMatch};
use crate::store::SignalStore;

/// Hard cap on the in-process recent-match buffer.
pub const RECENT_MATCH_CAPACITY: usize = 1000;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct ActiveSet {
    /// Insertion order is evaluation order.
    signals: Vec<Arc<CompiledSignal>>,
    /// Ids removed during this process lifetime; never reloaded from the store.
    retired: HashSet<i64>,
    /// Bumped by every add and remove.
    generation: u64,
    added_at: HashMap<i64, u64>,
}

pub struct DetectionEngine {
    store: Arc<dyn SignalStore>,
    active: RwLock<ActiveSet>,
    recent: Mutex<VecDeque<SignalMatch>>,
    next_match_id: AtomicU64,
    custom: Option<Arc<dyn CustomMatcher>>,
    store_timeout: Duration,
}

impl DetectionEngine {
    pub fn new(store: Arc<dyn SignalStore>) -> Self {
        Self {
            store,
            active: RwLock::new(ActiveSet::default()),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_MATCH_CAPACITY)),
            next_match_id: AtomicU64::new(1),
            custom: None,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_custom_matcher(mut self, matcher: Arc<dyn CustomMatcher>) -> Self {
        self.custom = Some(matcher);
        self
    }

    /// Insert a signal into the active set. Persistence is the caller's job;
    /// see [`DetectionEngine::create_signal`].
    pub async fn add_signal(&self, signal: SignalDefinition) -> Result<(), SignalError> {
        let compiled = CompiledSignal::compile(signal).inspect_err(|e| {
            warn!(error = %e, "rejected signal");
        })?;

        let mut active = self.active.write().await;
        if active.signals.iter().any(|s| s.id() == compiled.id()) {
            return Err(SignalError::DuplicateSignal { id: compiled.id() });
        }
        active.retired.remove(&compiled.id());
        active.generation += 1;
        let generation = active.generation;
        active.added_at.insert(compiled.id(), generation);
        debug!(
            signal_id = compiled.id(),
            kind = %compiled.definition.kind,
            "signal added"
        );
        active.signals.push(Arc::new(compiled));
        Ok(())
    }

    /// Validate, persist, then activate a new signal. Nothing is written to
    /// the store when validation fails.
    pub async fn create_signal(&self, signal: NewSignal) -> Result<SignalDefinition, SignalError> {
        let mut definition = SignalDefinition::new(0, signal.pattern.clone(), signal.kind);
        definition.category = signal.category.clone();
        definition.priority = signal.priority;
        CompiledSignal::compile(definition.clone())?;

        definition.id = self
            .timed("insert_signal", self.store.insert_signal(&signal))
            .await?;
        if let Err(e) = self.add_signal(definition.clone()).await {
            // A reload that ran after the insert may already hold this row.
            let reloaded =
                matches!(e, SignalError::DuplicateSignal { .. }) && self.holds(&definition).await;
            if !reloaded {
                return Err(e);
            }
            debug!(signal_id = definition.id, "signal already loaded");
        }
        info!(signal_id = definition.id, pattern = %definition.pattern, "signal created");
        Ok(definition)
    }

    /// Drop a signal from the active set. Unknown ids are ignored.
    ///
    /// A removed signal is also deactivated in the store (best-effort) and is
    /// skipped by later [`DetectionEngine::load_signals`] calls.
    pub async fn remove_signal(&self, signal_id: i64) -> bool {
        let removed = {
            let mut active = self.active.write().await;
            let before = active.signals.len();
            active.signals.retain(|s| s.id() != signal_id);
            let removed = active.signals.len() != before;
            if removed {
                active.retired.insert(signal_id);
                active.added_at.remove(&signal_id);
                active.generation += 1;
            }
            removed
        };

        if removed {
            debug!(signal_id, "signal removed");
            if let Err(e) = self
                .timed("deactivate_signal", self.store.deactivate_signal(signal_id))
                .await
            {
                warn!(signal_id, error = %e, "failed to persist signal removal");
            }
        }
        removed
    }

    /// Toggle whether a signal is evaluated. Returns false for unknown ids.
    pub async fn set_signal_active(&self, signal_id: i64, is_active: bool) -> bool {
        let mut active = self.active.write().await;
        let Some(slot) = active.signals.iter_mut().find(|s| s.id() == signal_id) else {
            return false;
        };
        let mut updated = CompiledSignal::clone(&**slot);
        updated.definition.is_active = is_active;
        *slot = Arc::new(updated);
        true
    }

    /// Replace the active set with the store's active signals.
    ///
    /// Rows that fail validation are logged and skipped, as are ids removed
    /// earlier in this process. Signals added while the store was being read
    /// are kept. Returns the number of signals loaded.
    pub async fn load_signals(&self) -> Result<usize, SignalError> {
        let started_at = self.active.read().await.generation;
        let rows = self
            .timed("load_active_signals", self.store.load_active_signals())
            .await?;

        let mut active = self.active.write().await;
        let mut loaded: Vec<Arc<CompiledSignal>> = Vec::with_capacity(rows.len());
        for row in rows {
            if active.retired.contains(&row.id) || loaded.iter().any(|s| s.id() == row.id) {
                continue;
            }
            let signal_id = row.id;
            match CompiledSignal::compile(row) {
                Ok(compiled) => loaded.push(Arc::new(compiled)),
                Err(e) => warn!(signal_id, error = %e, "skipping invalid stored signal"),
            }
        }

        let count = loaded.len();
        let added_since: Vec<Arc<CompiledSignal>> = active
            .signals
            .iter()
            .filter(|s| active.added_at.get(&s.id()).is_some_and(|g| *g > started_at))
            .filter(|s| !loaded.iter().any(|l| l.id() == s.id()))
            .cloned()
            .collect();
        loaded.extend(added_since);
        let generation = active.generation;
        active.added_at = loaded.iter().map(|s| (s.id(), generation)).collect();
        active.signals = loaded;
        info!(count, "signals loaded");
        Ok(count)
    }

    pub async fn active_signals(&self) -> Vec<SignalDefinition> {
        self.active
            .read()
            .await
            .signals
            .iter()
            .filter(|s| s.definition.is_active)
            .map(|s| s.definition.clone())
            .collect()
    }

    /// Evaluate a message against every active signal.
    ///
    /// Each match is recorded in the store; a failed or slow store is logged
    /// and the match is still returned and buffered.
    pub async fn check_message(&self, message: &Message) -> Vec<SignalMatch> {
        let snapshot: Vec<Arc<CompiledSignal>> = self.active.read().await.signals.clone();

        let mut matches = Vec::new();
        for signal in snapshot.iter().filter(|s| s.definition.is_active) {
            let Some(span) = signal.find(&message.content, self.custom.as_deref()) else {
                continue;
            };
            let signal_match = SignalMatch {
                id: self.next_match_id.fetch_add(1, Ordering::Relaxed),
                signal_id: signal.id(),
                message_id: message.id,
                chat_id: message.chat_id,
                context: Some(extract_context(&message.content, span)),
                priority: signal.definition.priority,
                matched_at: Utc::now(),
            };
            debug!(
                match_id = signal_match.id,
                signal_id = signal_match.signal_id,
                message_id = message.id,
                chat_id = message.chat_id,
                "signal matched"
            );
            matches.push(signal_match);
        }

        if matches.is_empty() {
            return matches;
        }

        for signal_match in &matches {
            let recorded = self
                .timed(
                    "record_match",
                    self.store.record_match(
                        signal_match.signal_id,
                        signal_match.message_id,
                        signal_match.chat_id,
                        signal_match.context.as_deref(),
                    ),
                )
                .await;
            if let Err(e) = recorded {
                warn!(
                    signal_id = signal_match.signal_id,
                    message_id = signal_match.message_id,
                    chat_id = signal_match.chat_id,
                    error = %e,
                    "match not durably recorded"
                );
            }
        }

        let mut recent = self.recent.lock().await;
        for signal_match in matches.iter().rev() {
            recent.push_front(signal_match.clone());
        }
        recent.truncate(RECENT_MATCH_CAPACITY);

        matches
    }

    async fn holds(&self, definition: &SignalDefinition) -> bool {
        self.active.read().await.signals.iter().any(|s| {
            s.id() == definition.id
                && s.definition.pattern == definition.pattern
                && s.definition.kind == definition.kind
        })
    }

    pub async fn recent_matches(&self) -> Vec<SignalMatch> {
        self.recent.lock().await.iter().cloned().collect()
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, SignalError>>,
    ) -> Result<T, SignalError> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SignalError::StoreTimeout {
                operation,
                timeout_ms: self.store_timeout.as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchRecord, SignalKind};
    use crate::store::MemoryStore;
    use std::ops::Range;

    fn message(id: i64, content: &str) -> Message {
        Message {
            id,
            chat_id: 100,
            sender_id: Some(200),
            content: content.to_string(),
            timestamp: Utc::now(),
            is_outgoing: false,
        }
    }

    fn engine() -> (Arc<MemoryStore>, DetectionEngine) {
        let store = Arc::new(MemoryStore::new());
        let engine = DetectionEngine::new(store.clone());
        (store, engine)
    }

    struct SlowStore;

    #[async_trait::async_trait]
    impl SignalStore for SlowStore {
        async fn insert_signal(&self, _signal: &NewSignal) -> Result<i64, SignalError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(1)
        }

        async fn record_match(
            &self,
            _signal_id: i64,
            _message_id: i64,
            _chat_id: i64,
            _context: Option<&str>,
        ) -> Result<(), SignalError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }

        async fn load_active_signals(&self) -> Result<Vec<SignalDefinition>, SignalError> {
            Ok(Vec::new())
        }

        async fn deactivate_signal(&self, _signal_id: i64) -> Result<(), SignalError> {
            Ok(())
        }

        async fn recent_matches(&self, _limit: usize) -> Result<Vec<MatchRecord>, SignalError> {
            Ok(Vec::new())
        }
    }

    /// Wraps a [`MemoryStore`] and parks chosen calls after they have run
    /// until the test releases them.
    #[derive(Default)]
    struct GatedStore {
        inner: MemoryStore,
        hold_load: bool,
        hold_insert: bool,
        reached: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    impl GatedStore {
        async fn park(&self) {
            self.reached.notify_one();
            self.release.notified().await;
        }
    }

    #[async_trait::async_trait]
    impl SignalStore for GatedStore {
        async fn insert_signal(&self, signal: &NewSignal) -> Result<i64, SignalError> {
            let id = self.inner.insert_signal(signal).await?;
            if self.hold_insert {
                self.park().await;
            }
            Ok(id)
        }

        async fn record_match(
            &self,
            signal_id: i64,
            message_id: i64,
            chat_id: i64,
            context: Option<&str>,
        ) -> Result<(), SignalError> {
            self.inner
                .record_match(signal_id, message_id, chat_id, context)
                .await
        }

        async fn load_active_signals(&self) -> Result<Vec<SignalDefinition>, SignalError> {
            let rows = self.inner.load_active_signals().await?;
            if self.hold_load {
                self.park().await;
            }
            Ok(rows)
        }

        async fn deactivate_signal(&self, signal_id: i64) -> Result<(), SignalError> {
            self.inner.deactivate_signal(signal_id).await
        }

        async fn recent_matches(&self, limit: usize) -> Result<Vec<MatchRecord>, SignalError> {
            self.inner.recent_matches(limit).await
        }
    }

    fn bitcoin() -> NewSignal {
        NewSignal {
            pattern: "bitcoin".to_string(),
            kind: SignalKind::Keyword,
            category: None,
            priority: 0,
        }
    }

    #[tokio::test]
    async fn reload_keeps_signals_created_while_reading_the_store() {
        let store = Arc::new(GatedStore {
            hold_load: true,
            ..Default::default()
        });
        let engine = Arc::new(DetectionEngine::new(store.clone()));

        let loading = tokio::spawn({
            let engine = engine.clone();
            async move { engine.load_signals().await }
        });
        store.reached.notified().await;

        let created = engine.create_signal(bitcoin()).await.unwrap();
        store.release.notify_one();
        assert_eq!(loading.await.unwrap().unwrap(), 0);

        let active = engine.active_signals().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, created.id);
        assert_eq!(engine.check_message(&message(1, "bitcoin")).await.len(), 1);
    }

    #[tokio::test]
    async fn create_signal_tolerates_a_reload_between_insert_and_activate() {
        let store = Arc::new(GatedStore {
            hold_insert: true,
            ..Default::default()
        });
        let engine = Arc::new(DetectionEngine::new(store.clone()));

        let creating = tokio::spawn({
            let engine = engine.clone();
            async move { engine.create_signal(bitcoin()).await }
        });
        store.reached.notified().await;

        assert_eq!(engine.load_signals().await.unwrap(), 1);
        store.release.notify_one();

        let created = creating.await.unwrap().unwrap();
        let active = engine.active_signals().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, created.id);
    }

    #[tokio::test]
    async fn keyword_matching() {
        let (_, engine) = engine();
        engine
            .add_signal(SignalDefinition::new(1, "bitcoin", SignalKind::Keyword))
            .await
            .unwrap();

        let matches = engine
            .check_message(&message(1, "The price of bitcoin is rising"))
            .await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].signal_id, 1);
        assert_eq!(matches[0].chat_id, 100);
        assert_eq!(
            matches[0].context.as_deref(),
            Some("The price of bitcoin is rising")
        );
    }

    #[tokio::test]
    async fn case_insensitive_matching() {
        let (_, engine) = engine();
        engine
            .add_signal(SignalDefinition::new(1, "bitcoin", SignalKind::Keyword))
            .await
            .unwrap();
        engine
            .add_signal(SignalDefinition::new(2, "ethereum", SignalKind::Phrase))
            .await
            .unwrap();

        let matches = engine.check_message(&message(1, "BITCOIN")).await;
        assert_eq!(matches.len(), 1);

        let matches = engine
            .check_message(&message(2, "ETHEREUM and Bitcoin are cryptocurrencies"))
            .await;
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn regex_matching_yields_one_match() {
        let (_, engine) = engine();
        engine
            .add_signal(SignalDefinition::new(1, r"\$[0-9]+", SignalKind::Regex))
            .await
            .unwrap();

        let matches = engine
            .check_message(&message(1, "The price is $1500 today"))
            .await;
        assert_eq!(matches.len(), 1);
        assert!(matches[0].context.as_deref().unwrap().contains("$1500"));
    }

    #[tokio::test]
    async fn multiple_signals_each_match_once() {
        let (_, engine) = engine();
        engine
            .add_signal(SignalDefinition::new(1, "bitcoin", SignalKind::Keyword))
            .await
            .unwrap();
        engine
            .add_signal(SignalDefinition::new(2, "ethereum", SignalKind::Keyword))
            .await
            .unwrap();
        engine
            .add_signal(SignalDefinition::new(3, "solana", SignalKind::Keyword))
            .await
            .unwrap();

        let matches = engine
            .check_message(&message(1, "Bitcoin and Ethereum prices updated"))
            .await;
        let mut ids: Vec<i64> = matches.iter().map(|m| m.signal_id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn no_match_leaves_buffer_empty() {
        let (_, engine) = engine();
        engine
            .add_signal(SignalDefinition::new(1, "solana", SignalKind::Keyword))
            .await
            .unwrap();

        let matches = engine
            .check_message(&message(1, "Bitcoin and Ethereum prices are stable"))
            .await;
        assert!(matches.is_empty());
        assert!(engine.recent_matches().await.is_empty());
    }

    #[tokio::test]
    async fn inactive_signals_never_match() {
        let (_, engine) = engine();
        engine
            .add_signal(SignalDefinition::new(1, "bitcoin", SignalKind::Keyword))
            .await
            .unwrap();
        engine
            .add_signal(SignalDefinition::new(2, "ethereum", SignalKind::Keyword).inactive())
            .await
            .unwrap();

        let active = engine.active_signals().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, 1);

        let matches = engine.check_message(&message(1, "ethereum only")).await;
        assert!(matches.is_empty());

        assert!(engine.set_signal_active(1, false).await);
        assert!(engine.check_message(&message(2, "bitcoin")).await.is_empty());
        assert!(engine.set_signal_active(2, true).await);
        assert_eq!(engine.check_message(&message(3, "ethereum")).await.len(), 1);
        assert!(!engine.set_signal_active(99, true).await);
    }

    #[tokio::test]
    async fn rejects_invalid_and_duplicate_signals() {
        let (_, engine) = engine();
        let err = engine
            .add_signal(SignalDefinition::new(1, "(unclosed", SignalKind::Regex))
            .await
            .unwrap_err();
        assert!(matches!(err, SignalError::InvalidRegex { .. }));

        engine
            .add_signal(SignalDefinition::new(1, "bitcoin", SignalKind::Keyword))
            .await
            .unwrap();
        let err = engine
            .add_signal(SignalDefinition::new(1, "ethereum", SignalKind::Keyword))
            .await
            .unwrap_err();
        assert!(matches!(err, SignalError::DuplicateSignal { id: 1 }));
        assert_eq!(engine.active_signals().await.len(), 1);
    }

    #[tokio::test]
    async fn custom_signals_use_the_extension() {
        struct Upper;
        impl CustomMatcher for Upper {
            fn find(&self, _signal: &SignalDefinition, content: &str) -> Option<Range<usize>> {
                content
                    .chars()
                    .all(|c| !c.is_alphabetic() || c.is_uppercase())
                    .then(|| 0..content.len())
            }
        }

        let (_, plain) = engine();
        plain
            .add_signal(SignalDefinition::new(1, "shouting", SignalKind::Custom))
            .await
            .unwrap();
        assert!(plain.check_message(&message(1, "BUY NOW")).await.is_empty());

        let store = Arc::new(MemoryStore::new());
        let extended = DetectionEngine::new(store).with_custom_matcher(Arc::new(Upper));
        extended
            .add_signal(SignalDefinition::new(1, "shouting", SignalKind::Custom))
            .await
            .unwrap();
        assert_eq!(extended.check_message(&message(1, "BUY NOW")).await.len(), 1);
        assert!(extended.check_message(&message(2, "buy now")).await.is_empty());
    }

    #[tokio::test]
    async fn remove_signal_is_idempotent_and_persisted() {
        let (store, engine) = engine();
        let created = engine
            .create_signal(NewSignal {
                pattern: "bitcoin".to_string(),
                kind: SignalKind::Keyword,
                category: None,
                priority: 1,
            })
            .await
            .unwrap();

        assert!(engine.remove_signal(created.id).await);
        assert!(!engine.remove_signal(created.id).await);
        assert!(!engine.remove_signal(42).await);
        assert!(engine.active_signals().await.is_empty());
        assert!(store.load_active_signals().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reload_does_not_resurrect_removed_signals() {
        let (store, engine) = engine();
        store
            .put_signal(SignalDefinition::new(1, "bitcoin", SignalKind::Keyword))
            .await;
        store
            .put_signal(SignalDefinition::new(2, "ethereum", SignalKind::Keyword))
            .await;
        store
            .put_signal(SignalDefinition::new(3, "[broken", SignalKind::Regex))
            .await;

        assert_eq!(engine.load_signals().await.unwrap(), 2);

        store.set_failing(true);
        assert!(engine.remove_signal(1).await);
        store.set_failing(false);

        assert_eq!(engine.load_signals().await.unwrap(), 1);
        let active = engine.active_signals().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, 2);
    }

    #[tokio::test]
    async fn create_signal_persists_before_activating() {
        let (store, engine) = engine();
        let created = engine
            .create_signal(NewSignal {
                pattern: r"\$[0-9]+".to_string(),
                kind: SignalKind::Regex,
                category: Some("prices".to_string()),
                priority: 3,
            })
            .await
            .unwrap();

        let stored = store.load_active_signals().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, created.id);
        assert_eq!(engine.active_signals().await[0].priority, 3);

        let err = engine
            .create_signal(NewSignal {
                pattern: "(".to_string(),
                kind: SignalKind::Regex,
                category: None,
                priority: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SignalError::InvalidRegex { .. }));
        assert_eq!(store.load_active_signals().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn matches_are_recorded_in_the_store() {
        let (store, engine) = engine();
        store
            .put_signal(SignalDefinition::new(1, "bitcoin", SignalKind::Keyword))
            .await;
        engine.load_signals().await.unwrap();

        engine.check_message(&message(7, "bitcoin dip")).await;
        let recorded = store.recent_matches(10).await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].message_id, 7);
        assert_eq!(recorded[0].context.as_deref(), Some("bitcoin dip"));
    }

    #[tokio::test]
    async fn store_failure_keeps_the_match() {
        let (store, engine) = engine();
        store
            .put_signal(SignalDefinition::new(1, "bitcoin", SignalKind::Keyword))
            .await;
        engine.load_signals().await.unwrap();
        store.set_failing(true);

        let matches = engine.check_message(&message(1, "bitcoin")).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(engine.recent_matches().await.len(), 1);
        assert_eq!(store.match_count().await, 0);
    }

    #[tokio::test]
    async fn slow_store_times_out_without_losing_the_match() {
        let engine =
            DetectionEngine::new(Arc::new(SlowStore)).with_store_timeout(Duration::from_millis(20));
        engine
            .add_signal(SignalDefinition::new(1, "bitcoin", SignalKind::Keyword))
            .await
            .unwrap();

        let matches = engine.check_message(&message(1, "bitcoin")).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(engine.recent_matches().await.len(), 1);

        let err = engine
            .create_signal(NewSignal {
                pattern: "ethereum".to_string(),
                kind: SignalKind::Keyword,
                category: None,
                priority: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SignalError::StoreTimeout { operation: "insert_signal", .. }));
    }

    #[tokio::test]
    async fn recent_buffer_is_capped_newest_first() {
        let (_, engine) = engine();
        engine
            .add_signal(SignalDefinition::new(1, "bitcoin", SignalKind::Keyword))
            .await
            .unwrap();

        let total = RECENT_MATCH_CAPACITY as i64 + 5;
        for id in 1..=total {
            engine.check_message(&message(id, "bitcoin")).await;
        }

        let recent = engine.recent_matches().await;
        assert_eq!(recent.len(), RECENT_MATCH_CAPACITY);
        assert_eq!(recent[0].message_id, total);
        assert_eq!(recent[RECENT_MATCH_CAPACITY - 1].message_id, 6);
        assert!(recent.windows(2).all(|w| w[0].id > w[1].id));
    }

    #[tokio::test]
    async fn batch_keeps_evaluation_order_at_the_front() {
        let (_, engine) = engine();
        engine
            .add_signal(SignalDefinition::new(1, "bitcoin", SignalKind::Keyword))
            .await
            .unwrap();
        engine
            .add_signal(SignalDefinition::new(2, "ethereum", SignalKind::Keyword))
            .await
            .unwrap();

        engine.check_message(&message(1, "bitcoin")).await;
        engine.check_message(&message(2, "bitcoin ethereum")).await;

        let recent = engine.recent_matches().await;
        let order: Vec<(i64, i64)> = recent.iter().map(|m| (m.message_id, m.signal_id)).collect();
        assert_eq!(order, vec![(2, 1), (2, 2), (1, 1)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_evaluation_assigns_unique_ids() {
        let (_, engine) = engine();
        engine
            .add_signal(SignalDefinition::new(1, "bitcoin", SignalKind::Keyword))
            .await
            .unwrap();
        let engine = Arc::new(engine);

        let mut handles = Vec::new();
        for task in 0..8i64 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for n in 0..50i64 {
                    let msg = message(task * 1000 + n, "bitcoin");
                    ids.extend(engine.check_message(&msg).await.into_iter().map(|m| m.id));
                }
                ids
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 400);
        assert_eq!(engine.recent_matches().await.len(), 400);
    }
}
