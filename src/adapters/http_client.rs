use crate::config::EndpointConfig;
use crate::utils::error::{Result, TransferError};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

/// 共用的 JSON 呼叫與狀態碼對應
#[derive(Debug, Clone)]
pub(crate) struct JsonClient {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl JsonClient {
    pub(crate) fn new(config: &EndpointConfig) -> Result<Self> {
        let base = Url::parse(&config.endpoint).map_err(|e| TransferError::InvalidConfigValueError {
            field: "endpoint".to_string(),
            value: config.endpoint.clone(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(TransferError::InvalidConfigValueError {
                field: "endpoint".to_string(),
                value: config.endpoint.clone(),
                reason: "endpoint cannot be used as a base URL".to_string(),
            });
        }
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base,
            token: config.token.clone(),
        })
    }

    /// 以路徑片段組出網址，片段內容會被編碼
    pub(crate) fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
        resource: &str,
        id: &str,
    ) -> Result<T> {
        tracing::debug!("📡 GET {}", url);
        let response = self.authorize(self.client.get(url).query(query)).send().await?;
        let response = check_status(response, resource, id).await?;
        Ok(response.json().await?)
    }

    pub(crate) async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
        resource: &str,
        id: &str,
    ) -> Result<T> {
        tracing::debug!("📡 POST {}", url);
        let request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        let response = self.authorize(request).send().await?;
        let response = check_status(response, resource, id).await?;
        Ok(response.json().await?)
    }

    /// 不需要回應內容的 POST
    pub(crate) async fn post_empty<B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
        resource: &str,
        id: &str,
    ) -> Result<()> {
        tracing::debug!("📡 POST {}", url);
        let request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        let response = self.authorize(request).send().await?;
        check_status(response, resource, id).await?;
        Ok(())
    }

    pub(crate) async fn delete(&self, url: Url, resource: &str, id: &str) -> Result<()> {
        tracing::debug!("📡 DELETE {}", url);
        let response = self.authorize(self.client.delete(url)).send().await?;
        check_status(response, resource, id).await?;
        Ok(())
    }
}

async fn check_status(response: Response, resource: &str, id: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => TransferError::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        },
        StatusCode::CONFLICT => TransferError::Conflict {
            resource: resource.to_string(),
            name: id.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => TransferError::RateLimited {
            operation: format!("{} {}", resource, id),
        },
        _ => TransferError::RemoteError {
            status: status.as_u16(),
            message: if message.is_empty() {
                status.to_string()
            } else {
                message
            },
        },
    })
}

/// 建立物件後回傳的編號
#[derive(Debug, serde::Deserialize)]
pub(crate) struct Created {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoint: &str) -> JsonClient {
        JsonClient::new(&EndpointConfig {
            endpoint: endpoint.to_string(),
            token: None,
            timeout_seconds: Some(5),
            status: None,
        })
        .unwrap()
    }

    #[test]
    fn test_url_segments_are_encoded() {
        let url = client("https://lims.example.org/api/").url(&["workflows", "Agena Genotyping", "steps"]);
        assert_eq!(
            url.as_str(),
            "https://lims.example.org/api/workflows/Agena%20Genotyping/steps"
        );
    }

    #[test]
    fn test_rejects_non_base_endpoint() {
        let result = JsonClient::new(&EndpointConfig {
            endpoint: "mailto:lims@example.org".to_string(),
            token: None,
            timeout_seconds: None,
            status: None,
        });
        assert!(result.is_err());
    }
}
