use crate::adapters::http_client::{Created, JsonClient};
use crate::config::EndpointConfig;
use crate::domain::model::{
    ContainerDraft, ContainerRecord, ContainerType, ProjectContents, ProjectDraft, ProjectRecord,
    ReagentLabel, Researcher, SampleDraft, SampleRecord, TargetObjectKind, TargetRef, Workflow,
};
use crate::domain::ports::TargetApi;
use crate::utils::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct ResearcherRecord {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UdfDefinition {
    name: String,
}

#[derive(Debug, Serialize)]
struct Assignment<'a> {
    samples: &'a [String],
}

#[derive(Debug, Serialize)]
struct LabelBatch<'a> {
    labels: &'a [ReagentLabel],
}

/// LIMS 的 REST 用戶端
#[derive(Debug, Clone)]
pub struct HttpTargetApi {
    client: JsonClient,
}

impl HttpTargetApi {
    pub fn new(config: &EndpointConfig) -> Result<Self> {
        Ok(Self {
            client: JsonClient::new(config)?,
        })
    }

    fn collection(kind: TargetObjectKind) -> &'static str {
        match kind {
            TargetObjectKind::Project => "projects",
            TargetObjectKind::Container => "containers",
            TargetObjectKind::Sample => "samples",
        }
    }
}

#[async_trait]
impl TargetApi for HttpTargetApi {
    async fn find_researcher(&self, researcher: &Researcher) -> Result<Option<String>> {
        let query = [
            ("first_name", researcher.first_name.clone()),
            ("last_name", researcher.last_name.clone()),
        ];
        let found: Vec<ResearcherRecord> = self
            .client
            .get(self.client.url(&["researchers"]), &query, "researcher", &researcher.last_name)
            .await?;
        Ok(found.into_iter().next().map(|r| r.id))
    }

    async fn create_researcher(&self, researcher: &Researcher) -> Result<String> {
        let created: Created = self
            .client
            .post(self.client.url(&["researchers"]), researcher, "researcher", &researcher.last_name)
            .await?;
        Ok(created.id)
    }

    async fn find_project(&self, name: &str) -> Result<Option<ProjectRecord>> {
        let found: Vec<ProjectRecord> = self
            .client
            .get(self.client.url(&["projects"]), &[("name", name.to_string())], "project", name)
            .await?;
        Ok(found.into_iter().find(|p| p.name == name))
    }

    async fn create_project(&self, draft: &ProjectDraft) -> Result<String> {
        let created: Created = self
            .client
            .post(self.client.url(&["projects"]), draft, "project", &draft.name)
            .await?;
        Ok(created.id)
    }

    async fn list_projects(&self) -> Result<Vec<ProjectRecord>> {
        self.client
            .get(self.client.url(&["projects"]), &[], "project list", "all")
            .await
    }

    async fn project_contents(&self, project_id: &str) -> Result<ProjectContents> {
        self.client
            .get(
                self.client.url(&["projects", project_id, "contents"]),
                &[],
                "project",
                project_id,
            )
            .await
    }

    async fn find_container(&self, name: &str, kind: ContainerType) -> Result<Option<ContainerRecord>> {
        let query = [("name", name.to_string()), ("type", kind.to_string())];
        let found: Vec<ContainerRecord> = self
            .client
            .get(self.client.url(&["containers"]), &query, "container", name)
            .await?;
        Ok(found.into_iter().find(|c| c.name == name && c.kind == kind))
    }

    async fn create_container(&self, draft: &ContainerDraft) -> Result<String> {
        let created: Created = self
            .client
            .post(self.client.url(&["containers"]), draft, "container", &draft.name)
            .await?;
        Ok(created.id)
    }

    async fn find_sample(&self, container_id: &str, position: &str) -> Result<Option<SampleRecord>> {
        let query = [
            ("container", container_id.to_string()),
            ("position", position.to_string()),
        ];
        let found: Vec<SampleRecord> = self
            .client
            .get(self.client.url(&["samples"]), &query, "sample", position)
            .await?;
        Ok(found
            .into_iter()
            .find(|s| s.container_id == container_id && s.position == position))
    }

    async fn create_sample(&self, draft: &SampleDraft) -> Result<String> {
        let created: Created = self
            .client
            .post(self.client.url(&["samples"]), draft, "sample", &draft.name)
            .await?;
        Ok(created.id)
    }

    async fn set_reagent_labels(&self, labels: &[ReagentLabel]) -> Result<()> {
        let url = self.client.url(&["samples", "reagent-labels"]);
        self.client
            .post_empty(url, &LabelBatch { labels }, "reagent label", "batch")
            .await
    }

    async fn list_sample_udfs(&self) -> Result<Vec<String>> {
        let udfs: Vec<UdfDefinition> = self
            .client
            .get(self.client.url(&["udfs", "samples"]), &[], "udf list", "samples")
            .await?;
        Ok(udfs.into_iter().map(|u| u.name).collect())
    }

    async fn delete(&self, object: &TargetRef) -> Result<()> {
        let url = self.client.url(&[Self::collection(object.kind), object.id.as_str()]);
        self.client.delete(url, object.kind.as_str(), &object.id).await
    }

    async fn list_active_workflows(&self) -> Result<Vec<Workflow>> {
        self.client
            .get(
                self.client.url(&["workflows"]),
                &[("status", "ACTIVE".to_string())],
                "workflow list",
                "active",
            )
            .await
    }

    async fn assign_step(&self, workflow: &str, step: &str, sample_ids: &[String]) -> Result<()> {
        let url = self.client.url(&["workflows", workflow, "steps", step, "assignments"]);
        self.client
            .post_empty(url, &Assignment { samples: sample_ids }, "workflow step", step)
            .await
    }
}
