use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{error, info, warn};

use nimbus_common::{DeploymentInfo, Error, RegisteredFunction, RemoteFunction};

use crate::credentials::TokenProvider;
use crate::payload::{DeployPayload, RegistrationPayload};

/// Timeout on one-shot mutation calls. Status polls carry no per-request
/// timeout; the driver's polling deadline bounds them.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The control-plane REST surface the reconciler consumes.
///
/// Registration and version management live on the registry host, deployment
/// requests and status on the runtime host. Every method takes the bearer
/// token explicitly so a re-authenticated token is picked up call by call.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn list_functions(&self, token: &str) -> Result<Vec<RemoteFunction>, Error>;

    async fn create_function(
        &self,
        token: &str,
        payload: &RegistrationPayload,
    ) -> Result<RegisteredFunction, Error>;

    async fn create_version(
        &self,
        token: &str,
        function_id: &str,
        payload: &RegistrationPayload,
    ) -> Result<RegisteredFunction, Error>;

    async fn request_deployment(
        &self,
        token: &str,
        function_id: &str,
        version_id: &str,
        spec: &DeployPayload,
    ) -> Result<DeploymentInfo, Error>;

    async fn deployment_status(
        &self,
        token: &str,
        function_id: &str,
        version_id: &str,
    ) -> Result<DeploymentInfo, Error>;

    async fn deployment_log(
        &self,
        token: &str,
        function_id: &str,
        version_id: &str,
    ) -> Result<String, Error>;

    async fn delete_version(
        &self,
        token: &str,
        function_id: &str,
        version_id: &str,
    ) -> Result<(), Error>;
}

/// Run `call`, re-authenticating and retrying exactly once on HTTP 401.
///
/// This is the single recovery path for every call site; a second
/// consecutive 401 surfaces as a fatal error.
pub async fn with_reauth<T, F, Fut>(credentials: &dyn TokenProvider, mut call: F) -> Result<T, Error>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let token = credentials.token()?;
    match call(token).await {
        Err(Error::AuthExpired) => {
            info!("401 encountered, re-authenticating");
            let token = credentials.reauthenticate()?;
            call(token).await
        }
        result => result,
    }
}

#[derive(Debug, Deserialize)]
struct FunctionList {
    #[serde(default)]
    functions: Vec<RemoteFunction>,
}

#[derive(Debug, Deserialize)]
struct FunctionEnvelope {
    function: RegisteredFunction,
}

#[derive(Debug, Deserialize)]
struct DeploymentEnvelope {
    deployment: DeploymentInfo,
}

#[derive(Debug, Default, Deserialize)]
struct LogEnvelope {
    #[serde(default)]
    response: LogBody,
}

#[derive(Debug, Default, Deserialize)]
struct LogBody {
    #[serde(default)]
    log: String,
}

pub struct HttpControlPlane {
    http: reqwest::Client,
    registry_url: String,
    runtime_url: String,
}

impl HttpControlPlane {
    pub fn new(registry_url: &str, runtime_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            registry_url: registry_url.trim_end_matches('/').to_string(),
            runtime_url: runtime_url.trim_end_matches('/').to_string(),
        }
    }

    fn registry(&self, path: &str) -> String {
        format!("{}{}", self.registry_url, path)
    }

    fn runtime(&self, path: &str) -> String {
        format!("{}{}", self.runtime_url, path)
    }

    /// Shared response handling: 401 → `AuthExpired`, other non-2xx → `Http`,
    /// 204 → empty success, non-JSON success → `UnexpectedContentType`.
    async fn execute(
        &self,
        builder: reqwest::RequestBuilder,
        token: &str,
        url: &str,
    ) -> Result<Option<serde_json::Value>, Error> {
        let response = builder
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| Error::Transport {
                detail: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!(%url, "401 from control plane");
            return Err(Error::AuthExpired);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%url, status = status.as_u16(), %body, "control plane request failed");
            return Err(Error::Http {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("application/json") {
            error!(%url, %content_type, "unexpected content type");
            return Err(Error::UnexpectedContentType {
                url: url.to_string(),
                content_type,
            });
        }

        let value = response.json().await.map_err(|e| Error::InvalidBody {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
        Ok(Some(value))
    }

    async fn request<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        token: &str,
        url: &str,
    ) -> Result<T, Error> {
        match self.execute(builder, token, url).await? {
            Some(value) => serde_json::from_value(value).map_err(|e| Error::InvalidBody {
                url: url.to_string(),
                detail: e.to_string(),
            }),
            None => Err(Error::InvalidBody {
                url: url.to_string(),
                detail: "empty body".to_string(),
            }),
        }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn list_functions(&self, token: &str) -> Result<Vec<RemoteFunction>, Error> {
        let url = self.registry("/functions");
        info!(%url, "listing registered functions");
        let list: FunctionList = self.request(self.http.get(&url), token, &url).await?;
        Ok(list.functions)
    }

    async fn create_function(
        &self,
        token: &str,
        payload: &RegistrationPayload,
    ) -> Result<RegisteredFunction, Error> {
        let url = self.registry("/functions");
        info!(%url, name = %payload.name, "registering new function");
        let envelope: FunctionEnvelope = self
            .request(
                self.http.post(&url).timeout(REQUEST_TIMEOUT).json(payload),
                token,
                &url,
            )
            .await?;
        Ok(envelope.function)
    }

    async fn create_version(
        &self,
        token: &str,
        function_id: &str,
        payload: &RegistrationPayload,
    ) -> Result<RegisteredFunction, Error> {
        let url = self.registry(&format!("/functions/{function_id}/versions"));
        info!(%url, name = %payload.name, "registering new function version");
        let envelope: FunctionEnvelope = self
            .request(
                self.http.post(&url).timeout(REQUEST_TIMEOUT).json(payload),
                token,
                &url,
            )
            .await?;
        Ok(envelope.function)
    }

    async fn request_deployment(
        &self,
        token: &str,
        function_id: &str,
        version_id: &str,
        spec: &DeployPayload,
    ) -> Result<DeploymentInfo, Error> {
        let url = self.runtime(&format!(
            "/deployments/functions/{function_id}/versions/{version_id}"
        ));
        info!(%url, "requesting deployment");
        let envelope: DeploymentEnvelope = self
            .request(
                self.http.post(&url).timeout(REQUEST_TIMEOUT).json(spec),
                token,
                &url,
            )
            .await?;
        Ok(envelope.deployment)
    }

    async fn deployment_status(
        &self,
        token: &str,
        function_id: &str,
        version_id: &str,
    ) -> Result<DeploymentInfo, Error> {
        let url = self.runtime(&format!(
            "/deployments/functions/{function_id}/versions/{version_id}"
        ));
        let envelope: DeploymentEnvelope = self.request(self.http.get(&url), token, &url).await?;
        Ok(envelope.deployment)
    }

    async fn deployment_log(
        &self,
        token: &str,
        function_id: &str,
        version_id: &str,
    ) -> Result<String, Error> {
        let url = self.runtime(&format!(
            "/deployments/functions/{function_id}/versions/{version_id}"
        ));
        let body = serde_json::json!({ "requestBody": { "check": "log" } });
        let envelope: LogEnvelope = self
            .request(self.http.post(&url).json(&body), token, &url)
            .await?;
        Ok(envelope.response.log)
    }

    async fn delete_version(
        &self,
        token: &str,
        function_id: &str,
        version_id: &str,
    ) -> Result<(), Error> {
        let url = self.registry(&format!("/functions/{function_id}/versions/{version_id}"));
        info!(%url, "deleting function version");
        self.execute(self.http.delete(&url).timeout(REQUEST_TIMEOUT), token, &url)
            .await?;
        Ok(())
    }
}
