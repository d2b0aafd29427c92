//! The persistence boundary consumed by the detection engine.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::SignalError;
use crate::models::{MatchRecord, NewSignal, SignalDefinition};

/// Durable storage for signals and their matches.
///
/// Every failure is a recoverable [`SignalError::Store`]; callers decide
/// whether it is fatal.
#[async_trait::async_trait]
pub trait SignalStore: Send + Sync {
    /// Persist a new signal and return its assigned id.
    async fn insert_signal(&self, signal: &NewSignal) -> Result<i64, SignalError>;

    /// Append one row to the match log.
    async fn record_match(
        &self,
        signal_id: i64,
        message_id: i64,
        chat_id: i64,
        context: Option<&str>,
    ) -> Result<(), SignalError>;

    async fn load_active_signals(&self) -> Result<Vec<SignalDefinition>, SignalError>;

    /// Mark a signal inactive so it is not loaded again.
    async fn deactivate_signal(&self, signal_id: i64) -> Result<(), SignalError>;

    /// Most recent persisted matches, newest first.
    async fn recent_matches(&self, limit: usize) -> Result<Vec<MatchRecord>, SignalError>;
}

#[derive(Default)]
struct MemoryState {
    signals: Vec<SignalDefinition>,
    matches: Vec<MatchRecord>,
    next_signal_id: i64,
    next_match_id: i64,
}

/// In-process [`SignalStore`], used offline and in tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn put_signal(&self, signal: SignalDefinition) {
        let mut state = self.state.lock().await;
        state.next_signal_id = state.next_signal_id.max(signal.id);
        state.signals.retain(|s| s.id != signal.id);
        state.signals.push(signal);
    }

    pub async fn match_count(&self) -> usize {
        self.state.lock().await.matches.len()
    }

    fn check(&self) -> Result<(), SignalError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SignalError::Store("memory store is unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SignalStore for MemoryStore {
    async fn insert_signal(&self, signal: &NewSignal) -> Result<i64, SignalError> {
        self.check()?;
        let mut state = self.state.lock().await;
        if state.signals.iter().any(|s| s.pattern == signal.pattern) {
            return Err(SignalError::Store(format!(
                "pattern '{}' already exists",
                signal.pattern
            )));
        }
        state.next_signal_id += 1;
        let id = state.next_signal_id;
        state.signals.push(SignalDefinition {
            id,
            pattern: signal.pattern.clone(),
            kind: signal.kind,
            category: signal.category.clone(),
            priority: signal.priority,
            is_active: true,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn record_match(
        &self,
        signal_id: i64,
        message_id: i64,
        chat_id: i64,
        context: Option<&str>,
    ) -> Result<(), SignalError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let signal = state
            .signals
            .iter()
            .find(|s| s.id == signal_id)
            .cloned()
            .ok_or_else(|| SignalError::Store(format!("unknown signal {signal_id}")))?;
        state.next_match_id += 1;
        let match_id = state.next_match_id;
        state.matches.push(MatchRecord {
            match_id,
            signal_id,
            pattern: signal.pattern,
            kind: signal.kind,
            category: signal.category,
            message_id,
            chat_id,
            context: context.map(str::to_string),
            matched_at: Utc::now(),
        });
        Ok(())
    }

    async fn load_active_signals(&self) -> Result<Vec<SignalDefinition>, SignalError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .signals
            .iter()
            .filter(|s| s.is_active)
            .cloned()
            .collect())
    }

    async fn deactivate_signal(&self, signal_id: i64) -> Result<(), SignalError> {
        self.check()?;
        let mut state = self.state.lock().await;
        if let Some(signal) = state.signals.iter_mut().find(|s| s.id == signal_id) {
            signal.is_active = false;
        }
        Ok(())
    }

    async fn recent_matches(&self, limit: usize) -> Result<Vec<MatchRecord>, SignalError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.matches.iter().rev().take(limit).cloned().collect())
    }
}
