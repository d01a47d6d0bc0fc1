use crate::domain::model::{LedgerEntry, LedgerOutcome};
use crate::domain::ports::LedgerStore;
use crate::utils::error::{Result, TransferError};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct LedgerState {
    transferred: HashMap<String, LedgerEntry>,
    last_failure: HashMap<String, DateTime<Utc>>,
    marker: Option<i32>,
}

/// 已被取代的失敗紀錄：請求後來轉移成功，或同一請求有更新的失敗紀錄
fn compact(entries: &[LedgerEntry]) -> Vec<LedgerEntry> {
    let transferred: HashSet<&str> = entries
        .iter()
        .filter(|e| e.outcome == LedgerOutcome::Transferred)
        .map(|e| e.request_id.as_str())
        .collect();

    let mut latest_failure: HashMap<&str, usize> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        if entry.outcome != LedgerOutcome::Failed || transferred.contains(entry.request_id.as_str()) {
            continue;
        }
        let slot = latest_failure.entry(entry.request_id.as_str()).or_insert(i);
        if entry.recorded_at >= entries[*slot].recorded_at {
            *slot = i;
        }
    }

    let keep: HashSet<usize> = latest_failure.into_values().collect();
    entries
        .iter()
        .enumerate()
        .filter(|(i, e)| e.outcome == LedgerOutcome::Transferred || keep.contains(i))
        .map(|(_, e)| e.clone())
        .collect()
}

/// 已轉移請求的紀錄；追加動作以互斥鎖序列化
///
/// 執行期間只會追加。開啟時會把被取代的失敗紀錄壓縮掉，
/// 讓一直被略過的請求不會讓紀錄檔無限成長。
pub struct TransferLedger<L: LedgerStore> {
    store: L,
    state: Mutex<LedgerState>,
}

impl<L: LedgerStore> TransferLedger<L> {
    pub async fn open(store: L) -> Result<Self> {
        let mut entries = store.load().await?;
        let marker = store.load_marker().await?;

        let compacted = compact(&entries);
        if compacted.len() < entries.len() {
            tracing::info!(
                "📒 Compacting ledger: dropping {} superseded failure entries",
                entries.len() - compacted.len()
            );
            store.rewrite(&compacted).await?;
            entries = compacted;
        }

        let mut state = LedgerState {
            marker,
            ..LedgerState::default()
        };
        for entry in entries {
            match entry.outcome {
                LedgerOutcome::Transferred => {
                    state.last_failure.remove(&entry.request_id);
                    state.transferred.insert(entry.request_id.clone(), entry);
                }
                LedgerOutcome::Failed => {
                    if state.transferred.contains_key(&entry.request_id) {
                        continue;
                    }
                    let latest = state
                        .last_failure
                        .entry(entry.request_id.clone())
                        .or_insert(entry.recorded_at);
                    if entry.recorded_at > *latest {
                        *latest = entry.recorded_at;
                    }
                }
            }
        }

        tracing::info!(
            "📒 Ledger loaded: {} transferred, {} with recorded failures",
            state.transferred.len(),
            state.last_failure.len()
        );

        Ok(Self {
            store,
            state: Mutex::new(state),
        })
    }

    pub async fn is_transferred(&self, request_id: &str) -> bool {
        self.state.lock().await.transferred.contains_key(request_id)
    }

    pub async fn transferred_ids(&self) -> HashSet<String> {
        self.state.lock().await.transferred.keys().cloned().collect()
    }

    /// 最近失敗且仍在冷卻時間內的請求
    pub async fn cooling_down(&self, now: DateTime<Utc>, cooldown: chrono::Duration) -> HashSet<String> {
        self.state
            .lock()
            .await
            .last_failure
            .iter()
            .filter(|(_, at)| now.signed_duration_since(**at) < cooldown)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// 提交轉移紀錄；同一請求只能提交一次
    pub async fn commit(&self, request_id: &str, project_id: &str, year: i32) -> Result<LedgerEntry> {
        let mut state = self.state.lock().await;
        if state.transferred.contains_key(request_id) {
            return Err(TransferError::AlreadyTransferred {
                request_id: request_id.to_string(),
            });
        }

        let entry = LedgerEntry {
            request_id: request_id.to_string(),
            project_id: project_id.to_string(),
            recorded_at: Utc::now(),
            year,
            outcome: LedgerOutcome::Transferred,
        };
        self.store.append(&entry).await?;
        state.last_failure.remove(request_id);
        state.transferred.insert(request_id.to_string(), entry.clone());
        Ok(entry)
    }

    pub async fn record_failure(&self, request_id: &str, year: i32) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.transferred.contains_key(request_id) {
            return Ok(());
        }
        let entry = LedgerEntry {
            request_id: request_id.to_string(),
            project_id: String::new(),
            recorded_at: Utc::now(),
            year,
            outcome: LedgerOutcome::Failed,
        };
        self.store.append(&entry).await?;
        state.last_failure.insert(request_id.to_string(), entry.recorded_at);
        Ok(())
    }

    pub async fn earliest_year(&self) -> Option<i32> {
        self.state.lock().await.marker
    }

    pub async fn set_earliest_year(&self, year: i32) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.marker == Some(year) {
            return Ok(());
        }
        self.store.store_marker(year).await?;
        state.marker = Some(year);
        Ok(())
    }
}
