use crate::config::TransferConfig;
use crate::core::binder::bind_sample_set;
use crate::core::discovery::{plan_discovery, DiscoveryPlan};
use crate::core::extractor::FormExtractor;
use crate::core::ledger::TransferLedger;
use crate::core::price::{PriceCheck, PriceValidator};
use crate::core::router::WorkflowRouter;
use crate::core::saga::{rollback, CleanupOutcome, CompensationLog};
use crate::core::state::{
    DanglingReport, RequestOutcome, RequestReport, RequestRun, RunReport, TransferState,
};
use crate::domain::model::{
    Container, ContainerDraft, ContainerRecord, ContainerType, Extraction, FormKind, Position,
    ProjectDraft, ProjectRecord, ReagentLabel, RequestSummary, Researcher, Route, SampleData,
    SampleDraft, ServiceRequest, StepTarget, TargetObjectKind, TargetRef, UdfMap, Well, Workflow,
};
use crate::domain::ports::{LedgerStore, SourceApi, TargetApi};
use crate::utils::error::{ErrorCategory, Result, TransferError};
use crate::utils::retry::{with_retry, with_verified_retry, RetryPolicy};
use chrono::{Datelike, Utc};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub retry: RetryPolicy,
    pub earliest_year_seed: i32,
    pub failure_cooldown: chrono::Duration,
}

impl EngineSettings {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            retry: config.runtime.retry_policy(),
            earliest_year_seed: config.ledger.earliest_year_seed(),
            failure_cooldown: config.ledger.failure_cooldown(),
        }
    }
}

/// 驗證通過、尚未寫入 Target 的請求
#[derive(Debug)]
struct TransferPlan {
    request: ServiceRequest,
    extraction: Extraction,
    price: Option<PriceCheck>,
    containers: Vec<Container>,
    steps: Vec<StepTarget>,
}

impl TransferPlan {
    fn project_udfs(&self) -> UdfMap {
        self.extraction
            .field_forms
            .iter()
            .flat_map(|set| set.udfs.iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect()
    }
}

/// 一次執行共用、從 Target 讀取一次的資料
struct RunContext {
    workflows: Vec<Workflow>,
    /// None 表示 Target 沒有限制樣本 UDF
    sample_udfs: Option<HashSet<String>>,
    halted: AtomicBool,
}

impl RunContext {
    fn filter_udfs(&self, udfs: &UdfMap, dropped: &mut BTreeSet<String>) -> UdfMap {
        match &self.sample_udfs {
            None => udfs.clone(),
            Some(known) => udfs
                .iter()
                .filter(|(name, _)| {
                    let keep = known.contains(name.as_str());
                    if !keep {
                        dropped.insert(name.to_string());
                    }
                    keep
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

struct EngineInner<S, T, L: LedgerStore> {
    source: S,
    target: T,
    ledger: TransferLedger<L>,
    extractor: FormExtractor,
    pricer: PriceValidator,
    router: WorkflowRouter,
    settings: EngineSettings,
    /// 避免兩個工作同時替同一位研究人員建立帳號
    researcher_lock: Mutex<()>,
}

/// 把 Source 的請求轉移成 Target 的專案、容器與樣本
///
/// 每個請求是一個 saga：建立的物件都記錄在補償紀錄中，
/// 任何一步失敗就以相反順序刪除，成功則寫入轉移紀錄。
/// 研究人員由多個請求共用，不列入補償。
pub struct TransferEngine<S, T, L: LedgerStore> {
    inner: Arc<EngineInner<S, T, L>>,
    concurrency: usize,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<S, T, L> TransferEngine<S, T, L>
where
    S: SourceApi + 'static,
    T: TargetApi + 'static,
    L: LedgerStore + 'static,
{
    pub fn new(source: S, target: T, ledger: TransferLedger<L>, config: &TransferConfig) -> Result<Self> {
        let inner = EngineInner {
            source,
            target,
            ledger,
            extractor: FormExtractor::new(config.extraction.clone()),
            pricer: PriceValidator::new(config.pricing.clone()),
            router: WorkflowRouter::new(&config.routing)?,
            settings: EngineSettings::from_config(config),
            researcher_lock: Mutex::new(()),
        };
        Ok(Self {
            inner: Arc::new(inner),
            concurrency: config.runtime.concurrency(),
            shutdown: None,
        })
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// 收到 `true` 之後不再開始新的請求，進行中的請求會完成
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn ledger(&self) -> &TransferLedger<L> {
        &self.inner.ledger
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().map_or(false, |rx| *rx.borrow())
    }

    pub async fn run(&self) -> Result<RunReport> {
        tracing::info!("🚀 Starting transfer run (concurrency {})", self.concurrency);
        let mut report = RunReport::default();

        let (dangling, blocked) = self.inner.recover_dangling().await?;
        report.dangling = dangling;

        let ctx = Arc::new(self.inner.prepare_context().await?);
        let discovery = self.inner.discover(&blocked, true).await?;
        report.earliest_year = Some(discovery.earliest_year);

        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for summary in discovery.pending {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if self.shutdown_requested() {
                tracing::warn!("🛑 Shutdown requested, no new requests will be started");
                break;
            }
            if ctx.is_halted() {
                tracing::error!("🛑 Ledger is not writable, no new requests will be started");
                break;
            }

            let inner = Arc::clone(&self.inner);
            let ctx = Arc::clone(&ctx);
            tasks.spawn(async move {
                let _permit = permit;
                inner.transfer(summary, &ctx).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(request) => report.requests.push(request),
                Err(e) => tracing::error!("💥 Transfer task did not finish: {}", e),
            }
        }
        report.halted = ctx.is_halted();

        tracing::info!(
            "🏁 Run finished: {} committed, {} skipped, {} failed, {} orphans",
            report.committed().count(),
            report.skipped().count(),
            report.failed().count(),
            report.orphans().len()
        );
        Ok(report)
    }

    /// Dry run：探索與驗證，不寫入 Target 也不寫入轉移紀錄
    pub async fn plan(&self) -> Result<RunReport> {
        tracing::info!("🧪 Dry run: validating pending requests without writing");
        let inner = &self.inner;
        let transferred = inner.ledger.transferred_ids().await;
        let projects = inner
            .call("list projects", || inner.target.list_projects())
            .await?;
        for project in &projects {
            if let Some(request_id) = project.request_id.as_deref() {
                if !transferred.contains(request_id) {
                    tracing::warn!(
                        "🧟 Project {} for request {} has no ledger entry and would be rolled back",
                        project.id,
                        request_id
                    );
                }
            }
        }

        let ctx = inner.prepare_context().await?;
        let discovery = inner.discover(&HashSet::new(), false).await?;
        let mut report = RunReport {
            earliest_year: Some(discovery.earliest_year),
            ..RunReport::default()
        };

        for summary in discovery.pending {
            let mut run = RequestRun::new(&summary.id);
            let outcome = match inner.validate(&summary, &ctx).await {
                Ok(plan) => {
                    run.advance(TransferState::Validated);
                    tracing::info!(
                        "📝 Request {}: {} samples in {} containers, routed to {:?}",
                        summary.id,
                        plan.extraction.sample_count(),
                        plan.containers.len(),
                        plan.steps
                    );
                    RequestOutcome::Planned {
                        samples: plan.extraction.sample_count(),
                        containers: plan.containers.len(),
                        steps: plan.steps,
                    }
                }
                Err(e) if e.category() == ErrorCategory::Validation => {
                    tracing::warn!("⏭️ Request {} would be skipped: {}", summary.id, e);
                    RequestOutcome::Skipped { reason: e }
                }
                Err(e) => {
                    tracing::error!("❌ Request {} would be aborted: {}", summary.id, e);
                    RequestOutcome::Aborted { error: e }
                }
            };
            report.requests.push(RequestReport {
                request_id: summary.id,
                final_state: run.state(),
                outcome,
            });
        }
        Ok(report)
    }
}

impl<S, T, L> EngineInner<S, T, L>
where
    S: SourceApi,
    T: TargetApi,
    L: LedgerStore,
{
    async fn call<R, F, Fut>(&self, operation: &str, call: F) -> Result<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        with_retry(&self.settings.retry, operation, call).await
    }

    /// 建立物件；重送之前先用 `lookup` 確認上一次是否已在 Target 完成
    async fn create<C, CFut, F, FFut>(&self, operation: &str, create: C, lookup: F) -> Result<String>
    where
        C: FnMut() -> CFut,
        CFut: Future<Output = Result<String>>,
        F: FnMut() -> FFut,
        FFut: Future<Output = Result<Option<String>>>,
    {
        with_verified_retry(&self.settings.retry, operation, create, lookup).await
    }

    async fn prepare_context(&self) -> Result<RunContext> {
        let workflows = self
            .call("list workflows", || self.target.list_active_workflows())
            .await?;
        let udfs = self
            .call("list sample udfs", || self.target.list_sample_udfs())
            .await?;
        tracing::debug!(
            "🗂️ Target has {} active workflows and {} sample UDFs",
            workflows.len(),
            udfs.len()
        );
        Ok(RunContext {
            workflows,
            sample_udfs: (!udfs.is_empty()).then(|| udfs.into_iter().collect()),
            halted: AtomicBool::new(false),
        })
    }

    /// 找出 Target 上有、轉移紀錄卻沒有的專案並回滾
    ///
    /// 回傳的集合是回滾不完整的請求，本次執行不會重新轉移。
    async fn recover_dangling(&self) -> Result<(Vec<DanglingReport>, HashSet<String>)> {
        let transferred = self.ledger.transferred_ids().await;
        let projects = self
            .call("list projects", || self.target.list_projects())
            .await?;

        let mut reports = Vec::new();
        let mut blocked = HashSet::new();
        for project in projects {
            let Some(request_id) = project.request_id.clone() else {
                continue;
            };
            if transferred.contains(&request_id) {
                continue;
            }

            tracing::warn!(
                "🧟 Project {} ({}) for request {} has no ledger entry, rolling back",
                project.id,
                project.name,
                request_id
            );
            let mut log = CompensationLog::new();
            self.record_project_contents(&project, &mut log).await;
            let cleanup = rollback(&self.target, &request_id, log, &self.settings.retry).await;
            if !cleanup.orphans().is_empty() {
                blocked.insert(request_id.clone());
            }
            reports.push(DanglingReport {
                request_id,
                project_id: project.id,
                cleanup,
            });
        }
        Ok((reports, blocked))
    }

    /// 依建立順序記錄專案、其容器與樣本，讓回滾從樣本開始刪
    async fn record_project_contents(&self, project: &ProjectRecord, log: &mut CompensationLog) {
        log.record(TargetRef::new(TargetObjectKind::Project, &project.id));
        match self
            .call("project contents", || self.target.project_contents(&project.id))
            .await
        {
            Ok(contents) => {
                for id in contents.container_ids {
                    log.record(TargetRef::new(TargetObjectKind::Container, id));
                }
                for id in contents.sample_ids {
                    log.record(TargetRef::new(TargetObjectKind::Sample, id));
                }
            }
            Err(e) => {
                tracing::error!("❌ Could not list contents of project {}: {}", project.id, e);
            }
        }
    }

    async fn discover(&self, blocked: &HashSet<String>, persist_marker: bool) -> Result<DiscoveryPlan> {
        let seed = self
            .ledger
            .earliest_year()
            .await
            .unwrap_or(self.settings.earliest_year_seed);
        let all = self
            .call("list requests", || self.source.list_requests(Some(seed)))
            .await?;

        let now = Utc::now();
        let transferred = self.ledger.transferred_ids().await;
        let mut excluded = self
            .ledger
            .cooling_down(now, self.settings.failure_cooldown)
            .await;
        let cooling = excluded.len();
        excluded.extend(blocked.iter().cloned());

        let plan = plan_discovery(&all, &transferred, &excluded, now.year());
        if persist_marker {
            self.ledger.set_earliest_year(plan.earliest_year).await?;
        }
        tracing::info!(
            "🔍 {} requests since {}: {} pending, {} cooling down, next scan starts at {}",
            all.len(),
            seed,
            plan.pending.len(),
            cooling,
            plan.earliest_year
        );
        Ok(plan)
    }

    async fn validate(&self, summary: &RequestSummary, ctx: &RunContext) -> Result<TransferPlan> {
        let request = self
            .call("get request", || self.source.get_request(&summary.id))
            .await?;

        let extraction = self.extractor.extract(&request)?;
        let price = self.pricer.check(&request)?;
        let containers = match &extraction.samples {
            SampleData::Grid(set) => bind_sample_set(set)?,
            SampleData::NoSampleData => Vec::new(),
        };

        let mut steps: Vec<StepTarget> = Vec::new();
        for form in &request.forms {
            if self.extractor.classify(form) == FormKind::Skippable {
                continue;
            }
            if let Route::Step(target) = self.router.resolve(&request.id, form, &ctx.workflows)? {
                if !steps.contains(&target) {
                    steps.push(target);
                }
            }
        }

        Ok(TransferPlan {
            request,
            extraction,
            price,
            containers,
            steps,
        })
    }

    async fn transfer(&self, summary: RequestSummary, ctx: &RunContext) -> RequestReport {
        let mut run = RequestRun::new(&summary.id);
        let outcome = self.drive(&summary, ctx, &mut run).await;

        match &outcome {
            RequestOutcome::Committed { project_id, .. } => {
                tracing::info!("✅ Request {} transferred as project {}", summary.id, project_id);
            }
            RequestOutcome::Planned { .. } => {}
            RequestOutcome::Skipped { reason } => {
                tracing::warn!("⏭️ Request {} skipped: {}", summary.id, reason);
            }
            RequestOutcome::Aborted { error } | RequestOutcome::RolledBack { error, .. } => {
                tracing::error!(
                    "❌ Request {} failed: {} ({})",
                    summary.id,
                    error,
                    error.recovery_suggestion()
                );
            }
        }

        if let Some(error) = outcome.error() {
            if error.category() == ErrorCategory::System {
                ctx.halt();
            } else if !matches!(error, TransferError::AlreadyTransferred { .. }) {
                if let Err(e) = self.ledger.record_failure(&summary.id, summary.year).await {
                    tracing::error!("📒 Could not record failure of request {}: {}", summary.id, e);
                    ctx.halt();
                }
            }
        }

        RequestReport {
            request_id: summary.id,
            final_state: run.state(),
            outcome,
        }
    }

    async fn drive(&self, summary: &RequestSummary, ctx: &RunContext, run: &mut RequestRun) -> RequestOutcome {
        if self.ledger.is_transferred(&summary.id).await {
            run.advance(TransferState::Skipped);
            return RequestOutcome::Skipped {
                reason: TransferError::AlreadyTransferred {
                    request_id: summary.id.clone(),
                },
            };
        }

        let plan = match self.validate(summary, ctx).await {
            Ok(plan) => plan,
            Err(reason) if reason.category() == ErrorCategory::Validation => {
                run.advance(TransferState::Skipped);
                return RequestOutcome::Skipped { reason };
            }
            Err(error) => {
                run.advance(TransferState::RolledBack);
                return RequestOutcome::Aborted { error };
            }
        };
        run.advance(TransferState::Validated);

        let mut log = CompensationLog::new();
        let applied = match self.apply(&plan, ctx, &mut log, run).await {
            Ok(project_id) => self
                .ledger
                .commit(&summary.id, &project_id, summary.year)
                .await
                .map(|_| project_id),
            Err(e) => Err(e),
        };

        match applied {
            Ok(project_id) => {
                run.advance(TransferState::Committed);
                RequestOutcome::Committed {
                    project_id,
                    price: plan.price,
                }
            }
            Err(error) => {
                let cleanup = if log.is_empty() {
                    CleanupOutcome::Recovered { deleted: Vec::new() }
                } else {
                    rollback(&self.target, &summary.id, log, &self.settings.retry).await
                };
                run.advance(TransferState::RolledBack);
                RequestOutcome::RolledBack { error, cleanup }
            }
        }
    }

    async fn apply(
        &self,
        plan: &TransferPlan,
        ctx: &RunContext,
        log: &mut CompensationLog,
        run: &mut RequestRun,
    ) -> Result<String> {
        let request = &plan.request;
        let researcher_id = self.ensure_researcher(&request.owner).await?;

        let project_name = request.project_name();
        let existing = self
            .call("find project", || self.target.find_project(&project_name))
            .await?;
        if let Some(existing) = existing {
            if existing.request_id.as_deref() == Some(request.id.as_str()) {
                tracing::warn!(
                    "🧟 Request {}: project {} already exists without a ledger entry",
                    request.id,
                    existing.id
                );
                self.record_project_contents(&existing, log).await;
                return Err(TransferError::DanglingProject {
                    project_id: existing.id,
                    request_id: request.id.clone(),
                });
            }
            return Err(TransferError::Conflict {
                resource: "project".to_string(),
                name: project_name,
            });
        }

        let draft = ProjectDraft {
            name: project_name.clone(),
            request_id: request.id.clone(),
            researcher_id,
            open_date: request.created_on,
            udfs: plan.project_udfs(),
        };
        let target = &self.target;
        let (lookup_name, request_id) = (project_name.as_str(), request.id.as_str());
        let project_id = self
            .create(
                "create project",
                || target.create_project(&draft),
                move || async move {
                    target.find_project(lookup_name).await.map(|found| {
                        found
                            .filter(|p| p.request_id.as_deref() == Some(request_id))
                            .map(|p| p.id)
                    })
                },
            )
            .await?;
        log.record(TargetRef::new(TargetObjectKind::Project, &project_id));
        run.advance(TransferState::ProjectCreated);

        let mut placed = Vec::with_capacity(plan.containers.len());
        for container in &plan.containers {
            let id = self
                .resolve_container(container, &request.id, &project_name, log)
                .await?;
            placed.push((id, container));
        }
        run.advance(TransferState::ContainersCreated);

        let mut sample_ids = Vec::new();
        let mut labels = Vec::new();
        let mut dropped = BTreeSet::new();
        for (container_id, container) in &placed {
            for placement in &container.placements {
                let draft = SampleDraft {
                    name: placement.sample.name.clone(),
                    project_id: project_id.clone(),
                    container_id: container_id.clone(),
                    position: placement.position.to_string(),
                    udfs: ctx.filter_udfs(&placement.sample.udfs, &mut dropped),
                };
                let (in_container, position, project) =
                    (container_id.as_str(), draft.position.as_str(), project_id.as_str());
                let id = self
                    .create(
                        "create sample",
                        || target.create_sample(&draft),
                        move || async move {
                            target.find_sample(in_container, position).await.map(|found| {
                                found.filter(|s| s.project_id == project).map(|s| s.id)
                            })
                        },
                    )
                    .await?;
                log.record(TargetRef::new(TargetObjectKind::Sample, &id));
                if let Some(label) = &placement.sample.reagent_label {
                    labels.push(ReagentLabel {
                        sample_id: id.clone(),
                        label: label.clone(),
                    });
                }
                sample_ids.push(id);
            }
        }
        if !dropped.is_empty() {
            tracing::warn!(
                "⚠️ Request {}: UDFs unknown to the target were dropped: {:?}",
                request.id,
                dropped
            );
        }
        if !labels.is_empty() {
            self.call("set reagent labels", || target.set_reagent_labels(&labels))
                .await?;
            tracing::debug!("🏷️ Request {}: {} reagent labels set", request.id, labels.len());
        }
        run.advance(TransferState::SamplesCreated);

        if !sample_ids.is_empty() {
            for step in &plan.steps {
                self.call("assign step", || {
                    self.target.assign_step(&step.workflow, &step.step, &sample_ids)
                })
                .await?;
                tracing::debug!(
                    "🧭 Request {}: {} samples queued for {} / {}",
                    request.id,
                    sample_ids.len(),
                    step.workflow,
                    step.step
                );
            }
        }
        run.advance(TransferState::Routed);
        Ok(project_id)
    }

    /// 研究人員可能同時被其他請求使用，回滾時不刪除
    async fn ensure_researcher(&self, owner: &Researcher) -> Result<String> {
        let _guard = self.researcher_lock.lock().await;
        let target = &self.target;
        if let Some(id) = self
            .call("find researcher", || target.find_researcher(owner))
            .await?
        {
            return Ok(id);
        }
        let id = self
            .create(
                "create researcher",
                || target.create_researcher(owner),
                || target.find_researcher(owner),
            )
            .await?;
        tracing::info!(
            "👤 Created researcher {} {} as {}",
            owner.first_name,
            owner.last_name,
            id
        );
        Ok(id)
    }

    /// 先讀再寫：已存在的容器依類型重用或改名，建立時名稱衝突則重讀一次
    async fn resolve_container(
        &self,
        container: &Container,
        request_id: &str,
        project_name: &str,
        log: &mut CompensationLog,
    ) -> Result<String> {
        let kind = container.kind;
        let mut name = container.name.clone();
        let mut renamed = false;
        let mut conflict_retried = false;

        loop {
            let existing = self
                .call("find container", || self.target.find_container(&name, kind))
                .await?;

            let Some(record) = existing else {
                let draft = ContainerDraft {
                    name: name.clone(),
                    kind,
                    request_id: request_id.to_string(),
                };
                let target = &self.target;
                let lookup_name = draft.name.as_str();
                let created = self
                    .create(
                        "create container",
                        || target.create_container(&draft),
                        move || async move {
                            target.find_container(lookup_name, kind).await.map(|found| {
                                found
                                    .filter(|c| c.request_id.as_deref() == Some(request_id))
                                    .map(|c| c.id)
                            })
                        },
                    )
                    .await;
                match created {
                    Ok(id) => {
                        log.record(TargetRef::new(TargetObjectKind::Container, &id));
                        return Ok(id);
                    }
                    Err(TransferError::Conflict { .. }) if !conflict_retried => {
                        tracing::debug!("🔁 Container '{}' appeared concurrently, reading it again", name);
                        conflict_retried = true;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            };

            // 同一請求先前留下、仍是空的容器
            let leftover =
                record.request_id.as_deref() == Some(request_id) && record.occupied.is_empty();
            match kind {
                ContainerType::Plate96 => {
                    ensure_wells_free(&record, container)?;
                    if leftover {
                        log.record(TargetRef::new(TargetObjectKind::Container, &record.id));
                    }
                    tracing::debug!("♻️ Reusing plate '{}' ({})", record.name, record.id);
                    return Ok(record.id);
                }
                ContainerType::Tube if leftover => {
                    log.record(TargetRef::new(TargetObjectKind::Container, &record.id));
                    return Ok(record.id);
                }
                ContainerType::Tube if !renamed => {
                    let alternative = format!("{}-{}", container.name, project_name);
                    tracing::warn!(
                        "⚠️ Request {}: tube '{}' already exists, using '{}'",
                        request_id,
                        name,
                        alternative
                    );
                    name = alternative;
                    renamed = true;
                }
                ContainerType::Tube => {
                    return Err(TransferError::DuplicateContainerViolation {
                        container: name,
                        reason: "a tube with this name already exists in the target".to_string(),
                    });
                }
            }
        }
    }
}

/// 重用的孔盤上，要放樣本的孔位必須是空的
fn ensure_wells_free(record: &ContainerRecord, container: &Container) -> Result<()> {
    let occupied: HashSet<Well> = record
        .occupied
        .iter()
        .filter_map(|token| token.parse().ok())
        .collect();
    for placement in &container.placements {
        if let Position::Well(well) = placement.position {
            if occupied.contains(&well) {
                return Err(TransferError::DuplicateContainerViolation {
                    container: record.name.clone(),
                    reason: format!("well {} is already occupied", well),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{NormalizedSample, Placement};

    fn plate(wells: &[&str]) -> Container {
        Container {
            kind: ContainerType::Plate96,
            name: "Plate 1".to_string(),
            placements: wells
                .iter()
                .map(|w| Placement {
                    sample: NormalizedSample {
                        name: format!("S{}", w),
                        udfs: UdfMap::new(),
                        well: w.parse().ok(),
                        container_hint: Some("Plate 1".to_string()),
                        reagent_label: None,
                    },
                    position: Position::Well(w.parse().unwrap()),
                })
                .collect(),
        }
    }

    #[test]
    fn test_wells_checked_against_existing_plate() {
        let record = ContainerRecord {
            id: "CON-1".to_string(),
            name: "Plate 1".to_string(),
            kind: ContainerType::Plate96,
            request_id: Some("7".to_string()),
            occupied: vec!["A:1".to_string(), "B:2".to_string()],
        };
        assert!(ensure_wells_free(&record, &plate(&["A2", "C3"])).is_ok());
        assert!(matches!(
            ensure_wells_free(&record, &plate(&["A:02", "B02"])),
            Err(TransferError::DuplicateContainerViolation { .. })
        ));
    }

    #[test]
    fn test_unknown_udfs_are_dropped_when_target_restricts_them() {
        let ctx = RunContext {
            workflows: vec![],
            sample_udfs: Some(["Volume".to_string()].into_iter().collect()),
            halted: AtomicBool::new(false),
        };
        let mut udfs = UdfMap::new();
        udfs.insert("Volume".to_string(), crate::domain::model::UdfValue::Integer(10));
        udfs.insert("Color".to_string(), crate::domain::model::UdfValue::Text("red".to_string()));

        let mut dropped = BTreeSet::new();
        let kept = ctx.filter_udfs(&udfs, &mut dropped);
        assert_eq!(kept.len(), 1);
        assert!(kept.contains_key("Volume"));
        assert_eq!(dropped.into_iter().collect::<Vec<_>>(), vec!["Color".to_string()]);
    }
}
