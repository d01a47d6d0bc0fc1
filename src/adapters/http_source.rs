use crate::adapters::http_client::JsonClient;
use crate::config::EndpointConfig;
use crate::domain::model::{RequestSummary, ServiceRequest};
use crate::domain::ports::SourceApi;
use crate::utils::error::Result;
use async_trait::async_trait;

/// 請求受理系統的 REST 用戶端
#[derive(Debug, Clone)]
pub struct HttpSourceApi {
    client: JsonClient,
    status: Option<String>,
}

impl HttpSourceApi {
    pub fn new(config: &EndpointConfig) -> Result<Self> {
        Ok(Self {
            client: JsonClient::new(config)?,
            status: config.status.clone(),
        })
    }
}

#[async_trait]
impl SourceApi for HttpSourceApi {
    async fn list_requests(&self, since_year: Option<i32>) -> Result<Vec<RequestSummary>> {
        let mut query = Vec::new();
        if let Some(status) = &self.status {
            query.push(("status", status.clone()));
        }
        if let Some(year) = since_year {
            query.push(("since_year", year.to_string()));
        }

        let requests: Vec<RequestSummary> = self
            .client
            .get(self.client.url(&["requests"]), &query, "request list", "all")
            .await?;
        tracing::debug!("📥 Source listed {} requests", requests.len());
        Ok(requests)
    }

    async fn get_request(&self, request_id: &str) -> Result<ServiceRequest> {
        self.client
            .get(self.client.url(&["requests", request_id]), &[], "request", request_id)
            .await
    }
}
