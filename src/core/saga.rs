use crate::domain::model::TargetRef;
use crate::domain::ports::TargetApi;
use crate::utils::retry::{with_retry, RetryPolicy};

/// 本次請求在 Target 端建立的物件，依建立順序排列
#[derive(Debug, Clone, Default)]
pub struct CompensationLog {
    created: Vec<TargetRef>,
}

impl CompensationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, object: TargetRef) {
        self.created.push(object);
    }

    pub fn created(&self) -> &[TargetRef] {
        &self.created
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }
}

/// 回滾後仍留在 Target 端、需要人工處理的物件
#[derive(Debug, Clone, PartialEq)]
pub struct Orphan {
    pub request_id: String,
    pub object: TargetRef,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CleanupOutcome {
    Recovered {
        deleted: Vec<TargetRef>,
    },
    FailedButContinues {
        deleted: Vec<TargetRef>,
        orphans: Vec<Orphan>,
    },
}

impl CleanupOutcome {
    pub fn orphans(&self) -> &[Orphan] {
        match self {
            CleanupOutcome::Recovered { .. } => &[],
            CleanupOutcome::FailedButContinues { orphans, .. } => orphans,
        }
    }

    pub fn deleted(&self) -> &[TargetRef] {
        match self {
            CleanupOutcome::Recovered { deleted } | CleanupOutcome::FailedButContinues { deleted, .. } => deleted,
        }
    }
}

/// 以建立的相反順序刪除物件
///
/// 刪除失敗只會記錄為孤兒物件，不會往外拋出錯誤；找不到的物件視為已刪除。
pub async fn rollback<T: TargetApi + ?Sized>(
    target: &T,
    request_id: &str,
    log: CompensationLog,
    policy: &RetryPolicy,
) -> CleanupOutcome {
    let mut deleted = Vec::new();
    let mut orphans = Vec::new();

    for object in log.created.into_iter().rev() {
        let operation = format!("delete {}", object);
        match with_retry(policy, &operation, || target.delete(&object)).await {
            Ok(()) => deleted.push(object),
            Err(e) if e.is_not_found() => {
                tracing::debug!("🧹 {} was already gone", object);
                deleted.push(object);
            }
            Err(e) => {
                tracing::error!("🧟 Request {}: could not delete {}: {}", request_id, object, e);
                orphans.push(Orphan {
                    request_id: request_id.to_string(),
                    object,
                    error: e.to_string(),
                });
            }
        }
    }

    if orphans.is_empty() {
        tracing::info!("↩️ Request {}: rolled back {} objects", request_id, deleted.len());
        CleanupOutcome::Recovered { deleted }
    } else {
        tracing::warn!(
            "↩️ Request {}: rolled back {} objects, {} orphans left",
            request_id,
            deleted.len(),
            orphans.len()
        );
        CleanupOutcome::FailedButContinues { deleted, orphans }
    }
}
