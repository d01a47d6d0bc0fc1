//! 記憶體內的 Source、Target 與轉移紀錄實作，供測試與 dry run 使用
//!
//! 每個實作都可以注入失敗，用來驗證重試、回滾與孤兒物件的行為。

use crate::domain::model::{
    ContainerDraft, ContainerRecord, ContainerType, LedgerEntry, ProjectContents, ProjectDraft,
    ProjectRecord, ReagentLabel, RequestSummary, Researcher, SampleDraft, SampleRecord,
    ServiceRequest, TargetObjectKind, TargetRef, Workflow,
};
use crate::domain::ports::{LedgerStore, SourceApi, TargetApi};
use crate::utils::error::{Result, TransferError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 注入的失敗種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// 5xx，會被重試
    Unavailable,
    /// 4xx，不會被重試
    Rejected,
    Conflict,
    /// 遠端完成了操作，回應卻是 503
    LostResponse,
}

impl InjectedFailure {
    fn to_error(self, operation: &str) -> TransferError {
        match self {
            InjectedFailure::Unavailable | InjectedFailure::LostResponse => TransferError::RemoteError {
                status: 503,
                message: format!("{} unavailable", operation),
            },
            InjectedFailure::Rejected => TransferError::RemoteError {
                status: 400,
                message: format!("{} rejected", operation),
            },
            InjectedFailure::Conflict => TransferError::Conflict {
                resource: operation.to_string(),
                name: "injected".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct Injection {
    skip: u32,
    remaining: u32,
    failure: InjectedFailure,
}

/// 依操作名稱計數呼叫次數並觸發注入的失敗
#[derive(Debug, Default)]
struct Faults {
    injections: HashMap<String, Injection>,
    calls: HashMap<String, u32>,
    lost: HashSet<String>,
}

impl Faults {
    fn inject(&mut self, operation: &str, skip: u32, times: u32, failure: InjectedFailure) {
        self.injections.insert(
            operation.to_string(),
            Injection {
                skip,
                remaining: times,
                failure,
            },
        );
    }

    fn check(&mut self, operation: &str) -> Result<()> {
        *self.calls.entry(operation.to_string()).or_default() += 1;
        // 上一次呼叫提早失敗時留下的標記
        self.lost.remove(operation);
        let Some(injection) = self.injections.get_mut(operation) else {
            return Ok(());
        };
        if injection.skip > 0 {
            injection.skip -= 1;
            return Ok(());
        }
        if injection.remaining == 0 {
            return Ok(());
        }
        injection.remaining -= 1;
        if injection.failure == InjectedFailure::LostResponse {
            self.lost.insert(operation.to_string());
            return Ok(());
        }
        Err(injection.failure.to_error(operation))
    }

    /// 操作完成後呼叫；注入了 `LostResponse` 時丟掉結果
    fn deliver<T>(&mut self, operation: &str, value: T) -> Result<T> {
        if self.lost.remove(operation) {
            return Err(InjectedFailure::LostResponse.to_error(operation));
        }
        Ok(value)
    }

    fn calls(&self, operation: &str) -> u32 {
        self.calls.get(operation).copied().unwrap_or(0)
    }
}

// ---- Source ----

#[derive(Debug, Default)]
struct SourceState {
    requests: BTreeMap<String, ServiceRequest>,
    faults: Faults,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    inner: Arc<Mutex<SourceState>>,
}

impl MemorySource {
    pub fn new(requests: Vec<ServiceRequest>) -> Self {
        let source = Self::default();
        for request in requests {
            source.insert(request);
        }
        source
    }

    pub fn insert(&self, request: ServiceRequest) {
        lock(&self.inner).requests.insert(request.id.clone(), request);
    }

    /// 讓 `operation`（`list_requests` 或 `get_request`）接下來失敗 `times` 次
    pub fn fail_operation(&self, operation: &str, times: u32, failure: InjectedFailure) {
        lock(&self.inner).faults.inject(operation, 0, times, failure);
    }

    pub fn calls(&self, operation: &str) -> u32 {
        lock(&self.inner).faults.calls(operation)
    }
}

#[async_trait]
impl SourceApi for MemorySource {
    async fn list_requests(&self, since_year: Option<i32>) -> Result<Vec<RequestSummary>> {
        let mut state = lock(&self.inner);
        state.faults.check("list_requests")?;
        Ok(state
            .requests
            .values()
            .map(ServiceRequest::summary)
            .filter(|s| since_year.map_or(true, |year| s.year >= year))
            .collect())
    }

    async fn get_request(&self, request_id: &str) -> Result<ServiceRequest> {
        let mut state = lock(&self.inner);
        state.faults.check("get_request")?;
        state
            .requests
            .get(request_id)
            .cloned()
            .ok_or_else(|| TransferError::NotFound {
                resource: "request".to_string(),
                id: request_id.to_string(),
            })
    }
}

// ---- Target ----

#[derive(Debug, Clone)]
struct StoredProject {
    record: ProjectRecord,
    researcher_id: String,
}

#[derive(Debug, Default)]
struct TargetState {
    next_id: u64,
    researchers: BTreeMap<String, Researcher>,
    projects: BTreeMap<String, StoredProject>,
    containers: BTreeMap<String, ContainerRecord>,
    samples: BTreeMap<String, SampleDraft>,
    workflows: Vec<Workflow>,
    sample_udfs: Vec<String>,
    assignments: Vec<(String, String, Vec<String>)>,
    reagent_labels: BTreeMap<String, String>,
    undeletable: HashSet<String>,
    faults: Faults,
}

impl TargetState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn rejected(message: String) -> TransferError {
        TransferError::RemoteError {
            status: 400,
            message,
        }
    }
}

/// 模擬 LIMS：名稱唯一、位置唯一，刪除時檢查相依物件
#[derive(Debug, Clone, Default)]
pub struct MemoryTarget {
    inner: Arc<Mutex<TargetState>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workflows(self, workflows: Vec<Workflow>) -> Self {
        lock(&self.inner).workflows = workflows;
        self
    }

    /// Target 端定義的樣本 UDF；空清單表示不限制
    pub fn with_sample_udfs(self, udfs: &[&str]) -> Self {
        lock(&self.inner).sample_udfs = udfs.iter().map(|u| u.to_string()).collect();
        self
    }

    /// 讓 `operation` 在成功 `skip` 次之後失敗 `times` 次
    pub fn fail_operation(&self, operation: &str, skip: u32, times: u32, failure: InjectedFailure) {
        lock(&self.inner).faults.inject(operation, skip, times, failure);
    }

    pub fn fail_deletes_of(&self, id: &str) {
        lock(&self.inner).undeletable.insert(id.to_string());
    }

    pub fn calls(&self, operation: &str) -> u32 {
        lock(&self.inner).faults.calls(operation)
    }

    pub fn object_count(&self) -> usize {
        let state = lock(&self.inner);
        state.researchers.len() + state.projects.len() + state.containers.len() + state.samples.len()
    }

    /// 屬於某個請求的專案、容器與樣本數量
    pub fn objects_for_request(&self, request_id: &str) -> usize {
        let state = lock(&self.inner);
        let project_ids: HashSet<&str> = state
            .projects
            .values()
            .filter(|p| p.record.request_id.as_deref() == Some(request_id))
            .map(|p| p.record.id.as_str())
            .collect();
        let containers = state
            .containers
            .values()
            .filter(|c| c.request_id.as_deref() == Some(request_id))
            .count();
        let samples = state
            .samples
            .values()
            .filter(|s| project_ids.contains(s.project_id.as_str()))
            .count();
        project_ids.len() + containers + samples
    }

    pub fn projects(&self) -> Vec<ProjectRecord> {
        lock(&self.inner)
            .projects
            .values()
            .map(|p| p.record.clone())
            .collect()
    }

    pub fn containers(&self) -> Vec<ContainerRecord> {
        lock(&self.inner).containers.values().cloned().collect()
    }

    pub fn samples(&self) -> Vec<SampleDraft> {
        lock(&self.inner).samples.values().cloned().collect()
    }

    pub fn researchers(&self) -> Vec<Researcher> {
        lock(&self.inner).researchers.values().cloned().collect()
    }

    /// 樣本編號 → reagent label
    pub fn reagent_labels(&self) -> BTreeMap<String, String> {
        lock(&self.inner).reagent_labels.clone()
    }

    /// 每次指派的工作流程、步驟與樣本編號
    pub fn assignments(&self) -> Vec<(String, String, Vec<String>)> {
        lock(&self.inner).assignments.clone()
    }
}

#[async_trait]
impl TargetApi for MemoryTarget {
    async fn find_researcher(&self, researcher: &Researcher) -> Result<Option<String>> {
        let mut state = lock(&self.inner);
        state.faults.check("find_researcher")?;
        Ok(state
            .researchers
            .iter()
            .find(|(_, r)| {
                r.first_name.eq_ignore_ascii_case(&researcher.first_name)
                    && r.last_name.eq_ignore_ascii_case(&researcher.last_name)
            })
            .map(|(id, _)| id.clone()))
    }

    async fn create_researcher(&self, researcher: &Researcher) -> Result<String> {
        let mut state = lock(&self.inner);
        state.faults.check("create_researcher")?;
        let id = state.next_id("RES");
        state.researchers.insert(id.clone(), researcher.clone());
        state.faults.deliver("create_researcher", id)
    }

    async fn find_project(&self, name: &str) -> Result<Option<ProjectRecord>> {
        let mut state = lock(&self.inner);
        state.faults.check("find_project")?;
        Ok(state
            .projects
            .values()
            .find(|p| p.record.name == name)
            .map(|p| p.record.clone()))
    }

    async fn create_project(&self, draft: &ProjectDraft) -> Result<String> {
        let mut state = lock(&self.inner);
        state.faults.check("create_project")?;
        if state.projects.values().any(|p| p.record.name == draft.name) {
            return Err(TransferError::Conflict {
                resource: "project".to_string(),
                name: draft.name.clone(),
            });
        }
        if !state.researchers.contains_key(&draft.researcher_id) {
            return Err(TargetState::rejected(format!(
                "unknown researcher {}",
                draft.researcher_id
            )));
        }
        let id = state.next_id("PRJ");
        state.projects.insert(
            id.clone(),
            StoredProject {
                record: ProjectRecord {
                    id: id.clone(),
                    name: draft.name.clone(),
                    request_id: Some(draft.request_id.clone()),
                },
                researcher_id: draft.researcher_id.clone(),
            },
        );
        state.faults.deliver("create_project", id)
    }

    async fn list_projects(&self) -> Result<Vec<ProjectRecord>> {
        let mut state = lock(&self.inner);
        state.faults.check("list_projects")?;
        Ok(state.projects.values().map(|p| p.record.clone()).collect())
    }

    async fn project_contents(&self, project_id: &str) -> Result<ProjectContents> {
        let mut state = lock(&self.inner);
        state.faults.check("project_contents")?;
        let project = state
            .projects
            .get(project_id)
            .ok_or_else(|| TransferError::NotFound {
                resource: "project".to_string(),
                id: project_id.to_string(),
            })?;
        let request_id = project.record.request_id.clone();

        let sample_ids = state
            .samples
            .iter()
            .filter(|(_, s)| s.project_id == project_id)
            .map(|(id, _)| id.clone())
            .collect();
        let container_ids = state
            .containers
            .values()
            .filter(|c| request_id.is_some() && c.request_id == request_id)
            .map(|c| c.id.clone())
            .collect();
        Ok(ProjectContents {
            sample_ids,
            container_ids,
        })
    }

    async fn find_container(&self, name: &str, kind: ContainerType) -> Result<Option<ContainerRecord>> {
        let mut state = lock(&self.inner);
        state.faults.check("find_container")?;
        Ok(state
            .containers
            .values()
            .find(|c| c.name == name && c.kind == kind)
            .cloned())
    }

    async fn create_container(&self, draft: &ContainerDraft) -> Result<String> {
        let mut state = lock(&self.inner);
        state.faults.check("create_container")?;
        if state
            .containers
            .values()
            .any(|c| c.name == draft.name && c.kind == draft.kind)
        {
            return Err(TransferError::Conflict {
                resource: "container".to_string(),
                name: draft.name.clone(),
            });
        }
        let id = state.next_id("CON");
        state.containers.insert(
            id.clone(),
            ContainerRecord {
                id: id.clone(),
                name: draft.name.clone(),
                kind: draft.kind,
                request_id: Some(draft.request_id.clone()),
                occupied: Vec::new(),
            },
        );
        state.faults.deliver("create_container", id)
    }

    async fn find_sample(&self, container_id: &str, position: &str) -> Result<Option<SampleRecord>> {
        let mut state = lock(&self.inner);
        state.faults.check("find_sample")?;
        Ok(state
            .samples
            .iter()
            .find(|(_, s)| s.container_id == container_id && s.position == position)
            .map(|(id, s)| SampleRecord {
                id: id.clone(),
                name: s.name.clone(),
                project_id: s.project_id.clone(),
                container_id: s.container_id.clone(),
                position: s.position.clone(),
            }))
    }

    async fn create_sample(&self, draft: &SampleDraft) -> Result<String> {
        let mut state = lock(&self.inner);
        state.faults.check("create_sample")?;
        if !state.projects.contains_key(&draft.project_id) {
            return Err(TargetState::rejected(format!("unknown project {}", draft.project_id)));
        }
        let container = state
            .containers
            .get(&draft.container_id)
            .ok_or_else(|| TargetState::rejected(format!("unknown container {}", draft.container_id)))?;
        if container.kind == ContainerType::Tube && draft.position != "1:1" {
            return Err(TargetState::rejected(format!(
                "tube {} has no position {}",
                container.name, draft.position
            )));
        }
        if container.occupied.contains(&draft.position) {
            return Err(TransferError::Conflict {
                resource: format!("position in {}", container.name),
                name: draft.position.clone(),
            });
        }

        let id = state.next_id("SMP");
        if let Some(container) = state.containers.get_mut(&draft.container_id) {
            container.occupied.push(draft.position.clone());
        }
        state.samples.insert(id.clone(), draft.clone());
        state.faults.deliver("create_sample", id)
    }

    async fn set_reagent_labels(&self, labels: &[ReagentLabel]) -> Result<()> {
        let mut state = lock(&self.inner);
        state.faults.check("set_reagent_labels")?;
        if let Some(missing) = labels.iter().find(|l| !state.samples.contains_key(&l.sample_id)) {
            return Err(TargetState::rejected(format!("unknown sample {}", missing.sample_id)));
        }
        for label in labels {
            state
                .reagent_labels
                .insert(label.sample_id.clone(), label.label.clone());
        }
        Ok(())
    }

    async fn list_sample_udfs(&self) -> Result<Vec<String>> {
        let mut state = lock(&self.inner);
        state.faults.check("list_sample_udfs")?;
        Ok(state.sample_udfs.clone())
    }

    async fn delete(&self, object: &TargetRef) -> Result<()> {
        let mut state = lock(&self.inner);
        state.faults.check("delete")?;
        if state.undeletable.contains(&object.id) {
            return Err(TargetState::rejected(format!("{} is locked", object)));
        }
        let not_found = || TransferError::NotFound {
            resource: object.kind.as_str().to_string(),
            id: object.id.clone(),
        };

        match object.kind {
            TargetObjectKind::Project => {
                if state.samples.values().any(|s| s.project_id == object.id) {
                    return Err(TargetState::rejected(format!("{} still has samples", object)));
                }
                state.projects.remove(&object.id).ok_or_else(not_found)?;
            }
            TargetObjectKind::Container => {
                let container = state.containers.get(&object.id).ok_or_else(not_found)?;
                if !container.occupied.is_empty() {
                    return Err(TargetState::rejected(format!("{} is not empty", object)));
                }
                state.containers.remove(&object.id);
            }
            TargetObjectKind::Sample => {
                let sample = state.samples.remove(&object.id).ok_or_else(not_found)?;
                state.reagent_labels.remove(&object.id);
                if let Some(container) = state.containers.get_mut(&sample.container_id) {
                    container.occupied.retain(|p| *p != sample.position);
                }
            }
        }
        Ok(())
    }

    async fn list_active_workflows(&self) -> Result<Vec<Workflow>> {
        let mut state = lock(&self.inner);
        state.faults.check("list_active_workflows")?;
        Ok(state.workflows.clone())
    }

    async fn assign_step(&self, workflow: &str, step: &str, sample_ids: &[String]) -> Result<()> {
        let mut state = lock(&self.inner);
        state.faults.check("assign_step")?;
        if !state.workflows.iter().any(|w| w.name == workflow) {
            return Err(TransferError::NotFound {
                resource: "workflow".to_string(),
                id: workflow.to_string(),
            });
        }
        if let Some(missing) = sample_ids.iter().find(|id| !state.samples.contains_key(*id)) {
            return Err(TargetState::rejected(format!("unknown sample {}", missing)));
        }
        state
            .assignments
            .push((workflow.to_string(), step.to_string(), sample_ids.to_vec()));
        Ok(())
    }
}

// ---- 轉移紀錄 ----

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<LedgerEntry>,
    marker: Option<i32>,
    fail_appends: bool,
    rewrites: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    inner: Arc<Mutex<LedgerState>>,
}

impl MemoryLedgerStore {
    pub fn with_entries(entries: Vec<LedgerEntry>) -> Self {
        let store = Self::default();
        lock(&store.inner).entries = entries;
        store
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        lock(&self.inner).entries.clone()
    }

    pub fn fail_appends(&self, fail: bool) {
        lock(&self.inner).fail_appends = fail;
    }

    pub fn rewrites(&self) -> u32 {
        lock(&self.inner).rewrites
    }
}

impl LedgerStore for MemoryLedgerStore {
    async fn load(&self) -> Result<Vec<LedgerEntry>> {
        Ok(lock(&self.inner).entries.clone())
    }

    async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let mut state = lock(&self.inner);
        if state.fail_appends {
            return Err(TransferError::LedgerError {
                message: "ledger is read-only".to_string(),
            });
        }
        state.entries.push(entry.clone());
        Ok(())
    }

    async fn load_marker(&self) -> Result<Option<i32>> {
        Ok(lock(&self.inner).marker)
    }

    async fn store_marker(&self, year: i32) -> Result<()> {
        lock(&self.inner).marker = Some(year);
        Ok(())
    }

    async fn rewrite(&self, entries: &[LedgerEntry]) -> Result<()> {
        let mut state = lock(&self.inner);
        state.entries = entries.to_vec();
        state.rewrites += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn researcher() -> Researcher {
        Researcher {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.org".to_string(),
        }
    }

    async fn project(target: &MemoryTarget) -> String {
        let researcher_id = target.create_researcher(&researcher()).await.unwrap();
        target
            .create_project(&ProjectDraft {
                name: "P".to_string(),
                request_id: "1".to_string(),
                researcher_id,
                open_date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
                udfs: Default::default(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_positions_are_unique_per_container() {
        let target = MemoryTarget::new();
        let project_id = project(&target).await;
        let container_id = target
            .create_container(&ContainerDraft {
                name: "Plate".to_string(),
                kind: ContainerType::Plate96,
                request_id: "1".to_string(),
            })
            .await
            .unwrap();
        let draft = SampleDraft {
            name: "S1".to_string(),
            project_id,
            container_id: container_id.clone(),
            position: "A:1".to_string(),
            udfs: Default::default(),
        };

        target.create_sample(&draft).await.unwrap();
        let again = target.create_sample(&draft).await;
        assert!(matches!(again, Err(TransferError::Conflict { .. })));

        let container = target.find_container("Plate", ContainerType::Plate96).await.unwrap().unwrap();
        assert_eq!(container.occupied, vec!["A:1".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_refuses_non_empty_project() {
        let target = MemoryTarget::new();
        let project_id = project(&target).await;
        let container_id = target
            .create_container(&ContainerDraft {
                name: "T1".to_string(),
                kind: ContainerType::Tube,
                request_id: "1".to_string(),
            })
            .await
            .unwrap();
        let sample_id = target
            .create_sample(&SampleDraft {
                name: "T1".to_string(),
                project_id: project_id.clone(),
                container_id,
                position: "1:1".to_string(),
                udfs: Default::default(),
            })
            .await
            .unwrap();

        let project_ref = TargetRef::new(TargetObjectKind::Project, project_id);
        assert!(target.delete(&project_ref).await.is_err());
        target
            .delete(&TargetRef::new(TargetObjectKind::Sample, sample_id))
            .await
            .unwrap();
        target.delete(&project_ref).await.unwrap();
        assert!(target.delete(&project_ref).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failures_after_skip() {
        let target = MemoryTarget::new();
        target.fail_operation("create_researcher", 1, 1, InjectedFailure::Unavailable);

        assert!(target.create_researcher(&researcher()).await.is_ok());
        let err = target.create_researcher(&researcher()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(target.create_researcher(&researcher()).await.is_ok());
        assert_eq!(target.calls("create_researcher"), 3);
    }

    #[tokio::test]
    async fn test_lost_response_still_creates_the_object() {
        let target = MemoryTarget::new();
        let project_id = project(&target).await;
        let container_id = target
            .create_container(&ContainerDraft {
                name: "T1".to_string(),
                kind: ContainerType::Tube,
                request_id: "1".to_string(),
            })
            .await
            .unwrap();
        target.fail_operation("create_sample", 0, 1, InjectedFailure::LostResponse);

        let err = target
            .create_sample(&SampleDraft {
                name: "T1".to_string(),
                project_id: project_id.clone(),
                container_id: container_id.clone(),
                position: "1:1".to_string(),
                udfs: Default::default(),
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let found = target.find_sample(&container_id, "1:1").await.unwrap().unwrap();
        assert_eq!(found.project_id, project_id);
        assert_eq!(target.samples().len(), 1);
    }
}
