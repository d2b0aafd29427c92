//! Signal detection over chat messages with a bounded alert feed.

pub mod alerts;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod store;

pub use alerts::{AlertManager, FeedEvent};
pub use engine::DetectionEngine;
pub use error::SignalError;
pub use store::{MemoryStore, SignalStore};
