//! Audit sink for completed-task cost records
//!
//! Records are appended one JSON object per line and never rewritten.
//! Readers must tolerate lines they cannot parse; the budget gate replays
//! the sink to rebuild same-day spend after a restart.

use crate::budget::state::period_key;
use crate::error::AuditError;
use crate::pricing::Usage;
use crate::router::classifier::TaskCategory;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const DEFAULT_AGENT_ID: &str = "main";

fn default_agent_id() -> String {
    DEFAULT_AGENT_ID.to_string()
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// One completed task. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "trigger", alias = "triggerSource")]
    pub trigger_source: String,
    #[serde(rename = "taskType", alias = "taskCategory")]
    pub task_category: TaskCategory,
    /// Resource the task ran on, `none` for tasks that needed none
    #[serde(rename = "model", alias = "resourceIdentifier")]
    pub resource: String,
    #[serde(flatten)]
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cache_read_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cache_write_tokens: u64,
    #[serde(rename = "estimatedCostUSD")]
    pub estimated_cost_usd: f64,
    pub duration_ms: u64,
    pub session_key: String,
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    pub success: bool,
    #[serde(
        rename = "error",
        alias = "errorMessage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_message: Option<String>,
    #[serde(rename = "escalation", default)]
    pub escalated: bool,
    #[serde(rename = "attempt", alias = "attemptNumber", default)]
    pub attempt_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
}

impl AuditRecord {
    /// Serialize to a single JSONL line (no trailing newline)
    pub fn to_line(&self) -> Result<String, AuditError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn period_key(&self) -> String {
        period_key(self.timestamp)
    }
}

/// Append-only record store
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError>;

    /// Every raw line in the sink. A missing sink reads as empty.
    async fn read_lines(&self) -> Result<Vec<String>, AuditError>;
}

/// JSONL file sink
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = record.to_line()?;
        line.push('\n');

        // Appends from one process stay whole lines
        let _guard = self.write_lock.lock().await;
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_lines(&self) -> Result<Vec<String>, AuditError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        // Invalid UTF-8 only spoils the lines it appears on
        Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

/// In-process sink
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the sink with raw lines, valid or not
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: Mutex::new(lines.into_iter().map(Into::into).collect()),
        }
    }

    /// Parsed records, skipping anything malformed
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.lines
            .lock()
            .await
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let line = record.to_line()?;
        self.lines.lock().await.push(line);
        Ok(())
    }

    async fn read_lines(&self) -> Result<Vec<String>, AuditError> {
        Ok(self.lines.lock().await.clone())
    }
}

/// The two fields spend replay needs. Anything else on the line is ignored.
#[derive(Debug, Deserialize)]
struct SpendEntry {
    timestamp: DateTime<Utc>,
    #[serde(rename = "estimatedCostUSD", default)]
    estimated_cost_usd: Option<f64>,
}

/// Outcome of replaying a sink for one period
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReplayTotals {
    pub spend_usd: f64,
    /// Valid records inside the period
    pub records_counted: usize,
    /// Non-blank lines that could not be used
    pub lines_skipped: usize,
}

/// Sum `estimatedCostUSD` over records whose timestamp falls in `period`.
///
/// Blank lines are ignored. Malformed lines and negative costs are skipped
/// and counted, never fatal.
pub fn replay_spend<S: AsRef<str>>(lines: &[S], period: &str) -> ReplayTotals {
    let mut totals = ReplayTotals::default();

    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }

        let entry: SpendEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(_) => {
                totals.lines_skipped += 1;
                continue;
            }
        };

        let cost = entry.estimated_cost_usd.unwrap_or(0.0);
        if !cost.is_finite() || cost < 0.0 {
            totals.lines_skipped += 1;
            continue;
        }

        if period_key(entry.timestamp) == period {
            totals.spend_usd += cost;
            totals.records_counted += 1;
        }
    }

    totals
}
