//! Per-kind matching of signal patterns against message text.
//!
//! Patterns are compiled once when a signal is activated. Keyword and phrase
//! patterns become escaped case-insensitive literals so that the matched span
//! is known for context extraction.

use std::ops::Range;

use regex::{Regex, RegexBuilder};

use crate::error::SignalError;
use crate::models::{SignalDefinition, SignalKind};

/// Characters of context kept on each side of a match.
pub const CONTEXT_CHARS: usize = 50;

/// Maximum compiled regex size (10 MiB).
const REGEX_SIZE_LIMIT: usize = 10 * (1 << 20);

const REGEX_NEST_LIMIT: u32 = 200;

/// Extension point for `custom` signals.
pub trait CustomMatcher: Send + Sync {
    /// Byte span of the first match of `signal` in `content`, if it matches.
    fn find(&self, signal: &SignalDefinition, content: &str) -> Option<Range<usize>>;
}

#[derive(Debug, Clone)]
enum Matcher {
    Literal(Regex),
    Pattern(Regex),
    Custom,
}

/// A signal paired with its compiled matcher.
#[derive(Debug, Clone)]
pub struct CompiledSignal {
    pub definition: SignalDefinition,
    matcher: Matcher,
}

impl CompiledSignal {
    /// Validate and compile a signal. Fails on an empty pattern or a regex
    /// that does not compile.
    pub fn compile(definition: SignalDefinition) -> Result<Self, SignalError> {
        if definition.pattern.is_empty() {
            return Err(SignalError::EmptyPattern);
        }

        let matcher = match definition.kind {
            SignalKind::Keyword | SignalKind::Phrase => {
                Matcher::Literal(build_regex(&regex::escape(&definition.pattern))?)
            }
            SignalKind::Regex => Matcher::Pattern(build_regex(&definition.pattern)?),
            SignalKind::Custom => Matcher::Custom,
        };

        Ok(Self {
            definition,
            matcher,
        })
    }

    pub fn id(&self) -> i64 {
        self.definition.id
    }

    /// Locate the first match span in `content`.
    ///
    /// Regex signals ignore empty matches. Custom signals only match when an
    /// extension is supplied.
    pub fn find(&self, content: &str, custom: Option<&dyn CustomMatcher>) -> Option<Range<usize>> {
        match &self.matcher {
            Matcher::Literal(re) => re.find(content).map(|m| m.range()),
            Matcher::Pattern(re) => re
                .find_iter(content)
                .find(|m| !m.is_empty())
                .map(|m| m.range()),
            Matcher::Custom => custom.and_then(|ext| ext.find(&self.definition, content)),
        }
    }
}

fn build_regex(pattern: &str) -> Result<Regex, SignalError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .nest_limit(REGEX_NEST_LIMIT)
        .build()
        .map_err(|e| SignalError::InvalidRegex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// Cut up to [`CONTEXT_CHARS`] characters either side of `span`, trimmed.
/// Falls back to the whole content when the span cannot be located.
pub fn extract_context(content: &str, span: Range<usize>) -> String {
    let locatable = span.start <= span.end
        && span.end <= content.len()
        && content.is_char_boundary(span.start)
        && content.is_char_boundary(span.end);
    if !locatable {
        return content.to_string();
    }

    let start = content[..span.start]
        .char_indices()
        .rev()
        .nth(CONTEXT_CHARS - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let end = content[span.end..]
        .char_indices()
        .nth(CONTEXT_CHARS)
        .map(|(i, _)| span.end + i)
        .unwrap_or(content.len());

    content[start..end].trim().to_string()
}
