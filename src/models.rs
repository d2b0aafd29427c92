use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SignalError;

/// How a signal's pattern is applied to message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Keyword,
    Phrase,
    Regex,
    Custom,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Keyword => "keyword",
            SignalKind::Phrase => "phrase",
            SignalKind::Regex => "regex",
            SignalKind::Custom => "custom",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = SignalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyword" => Ok(SignalKind::Keyword),
            "phrase" => Ok(SignalKind::Phrase),
            "regex" => Ok(SignalKind::Regex),
            "custom" => Ok(SignalKind::Custom),
            other => Err(SignalError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalDefinition {
    pub id: i64,
    pub pattern: String,
    pub kind: SignalKind,
    pub category: Option<String>,
    /// Informational only; carried onto matches and alerts.
    pub priority: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl SignalDefinition {
    pub fn new(id: i64, pattern: impl Into<String>, kind: SignalKind) -> Self {
        Self {
            id,
            pattern: pattern.into(),
            kind,
            category: None,
            priority: 0,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// A signal that has not been assigned an id by the store yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSignal {
    pub pattern: String,
    pub kind: SignalKind,
    pub category: Option<String>,
    pub priority: i32,
}

/// A chat message as delivered by the message source. Never mutated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: Option<i64>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_outgoing: bool,
}

/// One signal firing against one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMatch {
    pub id: u64,
    pub signal_id: i64,
    pub message_id: i64,
    pub chat_id: i64,
    pub context: Option<String>,
    pub priority: i32,
    pub matched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub signal_match: SignalMatch,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub priority: i32,
}

impl Alert {
    pub fn display_title(&self) -> &'static str {
        "Signal Detected"
    }

    /// The match context when one was extracted, otherwise the display message.
    pub fn display_text(&self) -> &str {
        self.signal_match
            .context
            .as_deref()
            .unwrap_or(&self.message)
    }
}

/// A persisted match row joined with its signal, as read back for reports.
#[derive(Debug, Clone)]
pub struct MatchRecord {
    pub match_id: i64,
    pub signal_id: i64,
    pub pattern: String,
    pub kind: SignalKind,
    pub category: Option<String>,
    pub message_id: i64,
    pub chat_id: i64,
    pub context: Option<String>,
    pub matched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SignalSummary {
    pub signal_id: i64,
    pub pattern: String,
    pub count: usize,
    pub chat_count: usize,
}
