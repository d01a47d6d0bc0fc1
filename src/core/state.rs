use crate::core::price::PriceCheck;
use crate::core::saga::{CleanupOutcome, Orphan};
use crate::domain::model::StepTarget;
use crate::utils::error::{ErrorCategory, TransferError};
use std::fmt;

/// 單一請求的轉移狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Discovered,
    Validated,
    ProjectCreated,
    ContainersCreated,
    SamplesCreated,
    Routed,
    Committed,
    Skipped,
    RolledBack,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Committed | TransferState::Skipped | TransferState::RolledBack
        )
    }

    /// 是否允許從目前狀態轉移到 `next`
    pub fn can_advance_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (Discovered, Validated)
            | (Validated, ProjectCreated)
            | (ProjectCreated, ContainersCreated)
            | (ContainersCreated, SamplesCreated)
            | (SamplesCreated, Routed)
            | (Routed, Committed) => true,
            (Discovered | Validated, Skipped) => true,
            (_, RolledBack) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 追蹤單一請求的狀態並記錄每次轉移
#[derive(Debug)]
pub struct RequestRun {
    pub request_id: String,
    state: TransferState,
}

impl RequestRun {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            state: TransferState::Discovered,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn advance(&mut self, next: TransferState) {
        if !self.state.can_advance_to(next) {
            tracing::warn!(
                "⚠️ Request {}: unexpected transition {} -> {}",
                self.request_id,
                self.state,
                next
            );
        }
        tracing::debug!("🔄 Request {}: {} -> {}", self.request_id, self.state, next);
        self.state = next;
    }
}

/// 失敗後的處置結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 失敗已完整處理：略過，或回滾乾淨
    Recovered,
    /// 回滾留下孤兒物件，已回報，批次繼續
    FailedButContinues,
    /// 轉移紀錄無法寫入，後續請求不再排程
    Fatal,
}

#[derive(Debug)]
pub enum RequestOutcome {
    Committed {
        project_id: String,
        price: Option<PriceCheck>,
    },
    /// 只在 dry run 中出現：驗證通過，未做任何寫入
    Planned {
        samples: usize,
        containers: usize,
        steps: Vec<StepTarget>,
    },
    Skipped {
        reason: TransferError,
    },
    /// 在建立任何 Target 物件之前中止
    Aborted {
        error: TransferError,
    },
    RolledBack {
        error: TransferError,
        cleanup: CleanupOutcome,
    },
}

impl RequestOutcome {
    pub fn error(&self) -> Option<&TransferError> {
        match self {
            RequestOutcome::Committed { .. } | RequestOutcome::Planned { .. } => None,
            RequestOutcome::Skipped { reason } => Some(reason),
            RequestOutcome::Aborted { error } | RequestOutcome::RolledBack { error, .. } => Some(error),
        }
    }

    pub fn disposition(&self) -> Option<Disposition> {
        let error = self.error()?;
        if error.category() == ErrorCategory::System {
            return Some(Disposition::Fatal);
        }
        match self {
            RequestOutcome::RolledBack { cleanup, .. } if !cleanup.orphans().is_empty() => {
                Some(Disposition::FailedButContinues)
            }
            _ => Some(Disposition::Recovered),
        }
    }
}

#[derive(Debug)]
pub struct RequestReport {
    pub request_id: String,
    pub final_state: TransferState,
    pub outcome: RequestOutcome,
}

/// 重啟時發現、已回滾的懸置專案
#[derive(Debug)]
pub struct DanglingReport {
    pub request_id: String,
    pub project_id: String,
    pub cleanup: CleanupOutcome,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub requests: Vec<RequestReport>,
    pub dangling: Vec<DanglingReport>,
    pub earliest_year: Option<i32>,
    pub halted: bool,
}

impl RunReport {
    pub fn committed(&self) -> impl Iterator<Item = &RequestReport> {
        self.requests
            .iter()
            .filter(|r| matches!(r.outcome, RequestOutcome::Committed { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &RequestReport> {
        self.requests
            .iter()
            .filter(|r| matches!(r.outcome, RequestOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &RequestReport> {
        self.requests.iter().filter(|r| {
            matches!(
                r.outcome,
                RequestOutcome::Aborted { .. } | RequestOutcome::RolledBack { .. }
            )
        })
    }

    pub fn report_for(&self, request_id: &str) -> Option<&RequestReport> {
        self.requests.iter().find(|r| r.request_id == request_id)
    }

    /// 需要人工處理的孤兒物件，包含懸置專案回滾留下的
    pub fn orphans(&self) -> Vec<&Orphan> {
        let from_requests = self.requests.iter().filter_map(|r| match &r.outcome {
            RequestOutcome::RolledBack { cleanup, .. } => Some(cleanup.orphans()),
            _ => None,
        });
        let from_dangling = self.dangling.iter().map(|d| d.cleanup.orphans());
        from_requests.chain(from_dangling).flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{TargetObjectKind, TargetRef};

    #[test]
    fn test_transition_rules() {
        use TransferState::*;
        assert!(Discovered.can_advance_to(Validated));
        assert!(Validated.can_advance_to(Skipped));
        assert!(SamplesCreated.can_advance_to(RolledBack));
        assert!(!ProjectCreated.can_advance_to(Skipped));
        assert!(!Committed.can_advance_to(RolledBack));
        assert!(!Discovered.can_advance_to(Committed));
    }

    #[test]
    fn test_dispositions() {
        let skipped = RequestOutcome::Skipped {
            reason: TransferError::UnroutableForm {
                request_id: "1".to_string(),
                form: "X".to_string(),
            },
        };
        assert_eq!(skipped.disposition(), Some(Disposition::Recovered));

        let orphaned = RequestOutcome::RolledBack {
            error: TransferError::Conflict {
                resource: "sample".to_string(),
                name: "S1".to_string(),
            },
            cleanup: CleanupOutcome::FailedButContinues {
                deleted: vec![],
                orphans: vec![Orphan {
                    request_id: "1".to_string(),
                    object: TargetRef::new(TargetObjectKind::Project, "P1"),
                    error: "HTTP 500".to_string(),
                }],
            },
        };
        assert_eq!(orphaned.disposition(), Some(Disposition::FailedButContinues));

        let fatal = RequestOutcome::RolledBack {
            error: TransferError::LedgerError {
                message: "disk full".to_string(),
            },
            cleanup: CleanupOutcome::Recovered { deleted: vec![] },
        };
        assert_eq!(fatal.disposition(), Some(Disposition::Fatal));

        let committed = RequestOutcome::Committed {
            project_id: "P1".to_string(),
            price: None,
        };
        assert_eq!(committed.disposition(), None);
    }
}
