use crate::domain::model::{
    ContainerDraft, ContainerRecord, ContainerType, LedgerEntry, ProjectContents, ProjectDraft,
    ProjectRecord, ReagentLabel, RequestSummary, Researcher, SampleDraft, SampleRecord,
    ServiceRequest, TargetRef, Workflow,
};
use crate::utils::error::Result;
use async_trait::async_trait;

/// 請求受理系統（唯讀）
#[async_trait]
pub trait SourceApi: Send + Sync {
    /// 列出待處理的請求；`since_year` 之前建立的請求不會回傳
    async fn list_requests(&self, since_year: Option<i32>) -> Result<Vec<RequestSummary>>;
    async fn get_request(&self, request_id: &str) -> Result<ServiceRequest>;
}

/// LIMS 端的建立、查詢與補償操作
#[async_trait]
pub trait TargetApi: Send + Sync {
    async fn find_researcher(&self, researcher: &Researcher) -> Result<Option<String>>;
    async fn create_researcher(&self, researcher: &Researcher) -> Result<String>;

    async fn find_project(&self, name: &str) -> Result<Option<ProjectRecord>>;
    async fn create_project(&self, draft: &ProjectDraft) -> Result<String>;
    async fn list_projects(&self) -> Result<Vec<ProjectRecord>>;
    async fn project_contents(&self, project_id: &str) -> Result<ProjectContents>;

    async fn find_container(&self, name: &str, kind: ContainerType) -> Result<Option<ContainerRecord>>;
    async fn create_container(&self, draft: &ContainerDraft) -> Result<String>;

    /// 容器中某個位置上的樣本
    async fn find_sample(&self, container_id: &str, position: &str) -> Result<Option<SampleRecord>>;
    async fn create_sample(&self, draft: &SampleDraft) -> Result<String>;
    async fn set_reagent_labels(&self, labels: &[ReagentLabel]) -> Result<()>;
    async fn list_sample_udfs(&self) -> Result<Vec<String>>;

    async fn delete(&self, object: &TargetRef) -> Result<()>;

    async fn list_active_workflows(&self) -> Result<Vec<Workflow>>;
    async fn assign_step(&self, workflow: &str, step: &str, sample_ids: &[String]) -> Result<()>;
}

/// 轉移紀錄的持久化：啟動時全部讀入，之後只追加
///
/// `rewrite` 只在開啟時用來壓縮被取代的失敗紀錄，必須以整份替換的方式寫入。
pub trait LedgerStore: Send + Sync {
    fn load(&self) -> impl std::future::Future<Output = Result<Vec<LedgerEntry>>> + Send;
    fn append(&self, entry: &LedgerEntry)
        -> impl std::future::Future<Output = Result<()>> + Send;
    fn load_marker(&self) -> impl std::future::Future<Output = Result<Option<i32>>> + Send;
    fn store_marker(&self, year: i32) -> impl std::future::Future<Output = Result<()>> + Send;
    fn rewrite(&self, entries: &[LedgerEntry])
        -> impl std::future::Future<Output = Result<()>> + Send;
}
