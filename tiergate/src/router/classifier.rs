//! Task classification
//!
//! Maps free-text input plus trigger metadata to a [`TaskCategory`].
//! Classification is an ordered list of predicate rules evaluated top to
//! bottom; the first match wins and unmatched input falls through to
//! [`TaskCategory::Write`].

use crate::router::policy::ResourceTier;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Categories of work that can be routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    /// System heartbeat check, needs no model
    Heartbeat,
    /// File system operation
    FileOps,
    /// Data extraction or parsing
    Extract,
    /// Content summarization
    Summarize,
    /// General writing or conversation
    Write,
    /// Programming or debugging
    Code,
    /// Planning, design or analysis
    Strategy,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 7] = [
        Self::Heartbeat,
        Self::FileOps,
        Self::Extract,
        Self::Summarize,
        Self::Write,
        Self::Code,
        Self::Strategy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::FileOps => "file_ops",
            Self::Extract => "extract",
            Self::Summarize => "summarize",
            Self::Write => "write",
            Self::Code => "code",
            Self::Strategy => "strategy",
        }
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Heartbeat => "System heartbeat check",
            Self::FileOps => "File system operation",
            Self::Extract => "Data extraction/parsing",
            Self::Summarize => "Content summarization",
            Self::Write => "Writing/conversation",
            Self::Code => "Programming/debugging",
            Self::Strategy => "Planning/analysis",
        }
    }

    /// Tier this category routes to under the default policy
    pub fn recommended_tier(&self) -> ResourceTier {
        match self {
            Self::Heartbeat => ResourceTier::None,
            Self::FileOps | Self::Extract | Self::Summarize => ResourceTier::Cheap,
            Self::Write | Self::Code => ResourceTier::Mid,
            Self::Strategy => ResourceTier::High,
        }
    }
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| format!("unknown task category: {}", s))
    }
}

/// Metadata accompanying a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    /// How the request was triggered (e.g. `heartbeat`, `user`, `cron`)
    #[serde(default, alias = "trigger")]
    pub trigger_source: Option<String>,
    /// Session identifier, carried through to the audit record
    #[serde(default)]
    pub session_key: Option<String>,
}

impl TaskMeta {
    pub fn with_trigger(trigger: impl Into<String>) -> Self {
        Self {
            trigger_source: Some(trigger.into()),
            session_key: None,
        }
    }
}

/// Input a rule predicate sees
struct RuleInput<'a> {
    /// Trimmed, lowercased text
    text: &'a str,
    meta: &'a TaskMeta,
}

/// A single classification rule
struct ClassifierRule {
    name: &'static str,
    category: TaskCategory,
    matches: fn(&RuleInput<'_>) -> bool,
}

static HEARTBEAT_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"heartbeat\.md").expect("HEARTBEAT_FILE regex should compile")
});
static FILE_OP_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(read|write|edit|ls|cat|find|grep|search|mv|move|cp|copy|rm|delete|mkdir|touch|create|chmod)\b")
        .expect("FILE_OP_VERB regex should compile")
});
static FILE_VIEW_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(show|display|list|open|view|check)\s+(me\s+)?(the\s+)?(file|files|directory|folder|contents)\b")
        .expect("FILE_VIEW_REQUEST regex should compile")
});
static EXTRACT_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(extract|parse|get|fetch|scrape|pull|retrieve)\s+(the\s+)?(data|information|content|text)")
        .expect("EXTRACT_REQUEST regex should compile")
});
static SUMMARIZE_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(summari[sz]e|summary|tl;?dr|brief|overview|condense|abstract)")
        .expect("SUMMARIZE_REQUEST regex should compile")
});
static CODE_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(code|function|debug|implement|refactor|script|program|bug|error|syntax)")
        .expect("CODE_ACTION regex should compile")
});
static LANGUAGE_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(javascript|python|typescript|java|ruby|go|golang|rust|class|import|export)\b")
        .expect("LANGUAGE_TERM regex should compile")
});
static STRATEGY_LANGUAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(analy[sz]e|analysis|design|architecture|strategy|\bplan|should\s+(i|we)\b|evaluate|decide|recommend|approach|consider)")
        .expect("STRATEGY_LANGUAGE regex should compile")
});

/// Rules in priority order
static RULES: &[ClassifierRule] = &[
    ClassifierRule {
        name: "heartbeat_trigger",
        category: TaskCategory::Heartbeat,
        matches: |i| i.meta.trigger_source.as_deref() == Some("heartbeat"),
    },
    ClassifierRule {
        name: "heartbeat_file",
        category: TaskCategory::Heartbeat,
        matches: |i| i.text.contains("heartbeat") && HEARTBEAT_FILE.is_match(i.text),
    },
    ClassifierRule {
        name: "file_op_verb",
        category: TaskCategory::FileOps,
        matches: |i| FILE_OP_VERB.is_match(i.text),
    },
    ClassifierRule {
        name: "file_view_request",
        category: TaskCategory::FileOps,
        matches: |i| FILE_VIEW_REQUEST.is_match(i.text),
    },
    ClassifierRule {
        name: "extract_request",
        category: TaskCategory::Extract,
        matches: |i| EXTRACT_REQUEST.is_match(i.text),
    },
    ClassifierRule {
        name: "summarize_request",
        category: TaskCategory::Summarize,
        matches: |i| SUMMARIZE_REQUEST.is_match(i.text),
    },
    ClassifierRule {
        name: "code_action",
        category: TaskCategory::Code,
        matches: |i| CODE_ACTION.is_match(i.text),
    },
    ClassifierRule {
        name: "language_term",
        category: TaskCategory::Code,
        matches: |i| LANGUAGE_TERM.is_match(i.text),
    },
    ClassifierRule {
        name: "strategy_language",
        category: TaskCategory::Strategy,
        matches: |i| STRATEGY_LANGUAGE.is_match(i.text),
    },
];

/// Classify a task. Never fails; unmatched input is [`TaskCategory::Write`].
pub fn classify(text: &str, meta: &TaskMeta) -> TaskCategory {
    classify_with_rule(text, meta).0
}

/// Classify a task from an arbitrary JSON payload. Non-string input is
/// [`TaskCategory::Write`] unless the trigger alone decides.
pub fn classify_value(value: &serde_json::Value, meta: &TaskMeta) -> TaskCategory {
    match value.as_str() {
        Some(text) => classify(text, meta),
        None => classify("", meta),
    }
}

/// Classify and report which rule matched (`None` for the fallback)
pub fn classify_with_rule(text: &str, meta: &TaskMeta) -> (TaskCategory, Option<&'static str>) {
    let lowered = text.trim().to_lowercase();
    let input = RuleInput {
        text: &lowered,
        meta,
    };

    RULES
        .iter()
        .find(|rule| (rule.matches)(&input))
        .map(|rule| (rule.category, Some(rule.name)))
        .unwrap_or((TaskCategory::Write, None))
}
