use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use crate::models::{MatchRecord, SignalSummary};

pub fn summarize_by_signal(matches: &[MatchRecord]) -> Vec<SignalSummary> {
    let mut map: HashMap<i64, (String, usize, HashSet<i64>)> = HashMap::new();

    for record in matches {
        let entry = map
            .entry(record.signal_id)
            .or_insert_with(|| (record.pattern.clone(), 0, HashSet::new()));
        entry.1 += 1;
        entry.2.insert(record.chat_id);
    }

    let mut summaries: Vec<SignalSummary> = map
        .into_iter()
        .map(|(signal_id, (pattern, count, chats))| SignalSummary {
            signal_id,
            pattern,
            count,
            chat_count: chats.len(),
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then(a.signal_id.cmp(&b.signal_id)));
    summaries
}

pub fn busiest_chats(matches: &[MatchRecord]) -> Vec<(i64, usize)> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for record in matches {
        *counts.entry(record.chat_id).or_default() += 1;
    }
    let mut chats: Vec<(i64, usize)> = counts.into_iter().collect();
    chats.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    chats
}

pub fn build_report(matches: &[MatchRecord]) -> String {
    let summaries = summarize_by_signal(matches);
    let chats = busiest_chats(matches);

    let mut output = String::new();

    let _ = writeln!(output, "# Signal Match Report");
    let _ = writeln!(output, "Covering the {} most recent matches", matches.len());
    let _ = writeln!(output);
    let _ = writeln!(output, "## Signal Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No matches recorded.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- `{}` (#{}): {} matches across {} chats",
                summary.pattern, summary.signal_id, summary.count, summary.chat_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Busiest Chats");

    if chats.is_empty() {
        let _ = writeln!(output, "No chats with matches.");
    } else {
        for (chat_id, count) in chats.iter().take(10) {
            let _ = writeln!(output, "- chat {chat_id}: {count} matches");
        }
    }

    let mut recent = matches.to_vec();
    recent.sort_by(|a, b| b.matched_at.cmp(&a.matched_at));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Match Context");

    if recent.is_empty() {
        let _ = writeln!(output, "No matches recorded.");
    } else {
        for record in recent.iter().take(5) {
            let _ = writeln!(
                output,
                "- [{}] `{}` in chat {} at {}: {}",
                record.kind,
                record.pattern,
                record.chat_id,
                record.matched_at.format("%Y-%m-%d %H:%M"),
                record.context.as_deref().unwrap_or("(no context)")
            );
        }
    }

    output
}
