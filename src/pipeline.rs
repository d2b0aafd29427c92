//! Drains a message source through the detection engine into the alert feed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::alerts::AlertManager;
use crate::engine::DetectionEngine;
use crate::models::Message;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub messages: usize,
    pub matches: usize,
}

/// Evaluate one message and raise one alert per match.
pub async fn process_message(
    engine: &DetectionEngine,
    alerts: &AlertManager,
    message: &Message,
) -> usize {
    let matches = engine.check_message(message).await;
    let count = matches.len();
    for signal_match in matches {
        alerts.handle_match(signal_match, message.content.clone()).await;
    }
    count
}

/// Process messages until every sender is dropped.
pub async fn run(
    engine: Arc<DetectionEngine>,
    alerts: Arc<AlertManager>,
    mut messages: mpsc::Receiver<Message>,
) -> PipelineStats {
    let mut stats = PipelineStats::default();
    while let Some(message) = messages.recv().await {
        stats.messages += 1;
        stats.matches += process_message(&engine, &alerts, &message).await;
    }
    info!(
        messages = stats.messages,
        matches = stats.matches,
        "message source closed"
    );
    stats
}
