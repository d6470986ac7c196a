//! Budget state, its persisted snapshot, and the clock that defines periods

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::Mutex;

/// Period key for a point in time: the UTC calendar date, `YYYY-MM-DD`
pub fn period_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn period_key(&self) -> String {
        period_key(self.now())
    }
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.millis.store(now.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// Live spend for the current period. One instance per gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub period_key: String,
    pub cumulative_spend_usd: f64,
}

impl BudgetState {
    pub fn fresh(period_key: impl Into<String>) -> Self {
        Self {
            period_key: period_key.into(),
            cumulative_spend_usd: 0.0,
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> BudgetSnapshot {
        BudgetSnapshot {
            period_key: self.period_key.clone(),
            cumulative_spend_usd: self.cumulative_spend_usd,
            last_updated: Some(now),
        }
    }
}

/// Persisted form of the budget state.
///
/// Also reads the older `{date, spend, lastUpdated}` layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSnapshot {
    #[serde(alias = "date")]
    pub period_key: String,
    #[serde(rename = "cumulativeSpendUSD", alias = "spend", default)]
    pub cumulative_spend_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl BudgetSnapshot {
    /// Spend recorded in the snapshot, treating garbage as zero
    pub fn spend(&self) -> f64 {
        if self.cumulative_spend_usd.is_finite() && self.cumulative_spend_usd > 0.0 {
            self.cumulative_spend_usd
        } else {
            0.0
        }
    }
}

/// Storage for the single budget snapshot document
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the snapshot; `Ok(None)` when nothing has been persisted yet
    async fn load(&self) -> Result<Option<BudgetSnapshot>, StoreError>;

    /// Overwrite the snapshot wholesale
    async fn save(&self, snapshot: &BudgetSnapshot) -> Result<(), StoreError>;
}

/// Snapshot stored as a pretty-printed JSON file
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn load(&self) -> Result<Option<BudgetSnapshot>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn save(&self, snapshot: &BudgetSnapshot) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }

        // Write to temp file then rename so readers never see a partial document
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

/// In-process snapshot store
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshot: Mutex<Option<BudgetSnapshot>>,
    fail_writes: AtomicBool,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: BudgetSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make subsequent saves fail, to exercise persistence error paths
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn current(&self) -> Option<BudgetSnapshot> {
        self.snapshot.lock().await.clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Result<Option<BudgetSnapshot>, StoreError> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn save(&self, snapshot: &BudgetSnapshot) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "snapshot store is read-only",
            )));
        }
        *self.snapshot.lock().await = Some(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_period_key_is_utc_date() {
        let t = Utc.with_ymd_and_hms(2026, 3, 9, 23, 59, 59).unwrap();
        assert_eq!(period_key(t), "2026-03-09");
    }

    #[test]
    fn test_manual_clock_crosses_midnight() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 9, 23, 59, 0).unwrap());
        assert_eq!(clock.period_key(), "2026-03-09");
        clock.advance(chrono::Duration::minutes(2));
        assert_eq!(clock.period_key(), "2026-03-10");
    }

    #[test]
    fn test_snapshot_reads_legacy_layout() {
        let snapshot: BudgetSnapshot = serde_json::from_str(
            r#"{"date": "2026-03-09", "spend": 1.25, "lastUpdated": "2026-03-09T10:00:00.000Z"}"#,
        )
        .unwrap();
        assert_eq!(snapshot.period_key, "2026-03-09");
        assert_eq!(snapshot.spend(), 1.25);
        assert!(snapshot.last_updated.is_some());
    }

    #[test]
    fn test_snapshot_writes_current_layout() {
        let state = BudgetState {
            period_key: "2026-03-09".into(),
            cumulative_spend_usd: 0.5,
        };
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        let json = serde_json::to_value(state.snapshot(now)).unwrap();
        assert_eq!(json["periodKey"], "2026-03-09");
        assert_eq!(json["cumulativeSpendUSD"], 0.5);
        assert!(json.get("lastUpdated").is_some());
    }

    #[tokio::test]
    async fn test_json_store_roundtrip_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("nested/budget-state.json"));
        assert!(store.load().await.unwrap().is_none());

        let snapshot = BudgetSnapshot {
            period_key: "2026-03-09".into(),
            cumulative_spend_usd: 3.5,
            last_updated: None,
        };
        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(snapshot));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_json_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("budget-state.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonSnapshotStore::new(&path);
        assert!(matches!(store.load().await, Err(StoreError::Json(_))));
    }

    #[tokio::test]
    async fn test_memory_store_failing_writes() {
        let store = MemorySnapshotStore::new();
        store.set_fail_writes(true);
        let snapshot = BudgetSnapshot {
            period_key: "2026-03-09".into(),
            cumulative_spend_usd: 1.0,
            last_updated: None,
        };
        assert!(store.save(&snapshot).await.is_err());
        assert!(store.current().await.is_none());
    }
}
