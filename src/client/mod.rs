//! HTTP client for a Eureka-style registry.
//!
//! Every operation goes through the configured retry policy: each attempt
//! targets one endpoint and a response with an unexpected status code counts
//! as a failed attempt.

pub mod config;
pub mod error;
pub mod heartbeat;

#[cfg(test)]
mod tests;

#[cfg(all(test, feature = "server"))]
mod server_tests;

use crate::registry::{
    Application, ApplicationEnvelope, ApplicationsEnvelope, Instance, InstanceEnvelope, Registry,
    Status,
};
use crate::retry::Endpoints;
use crate::watcher::Watcher;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub use config::ClientConfig;
pub use error::ClientError;
pub use heartbeat::Heartbeat;

const JSON: &str = "application/json";

#[derive(Clone)]
pub struct Client {
    endpoints: Endpoints,
    config: ClientConfig,
    http: reqwest::Client,
}

impl Client {
    pub fn new<I, S>(endpoints: I, config: ClientConfig) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Build)?;
        Self::with_http_client(endpoints, config, http)
    }

    /// Uses a caller-supplied transport, e.g. one carrying TLS or auth
    /// settings. `config.timeout` is not applied to it.
    pub fn with_http_client<I, S>(
        endpoints: I,
        config: ClientConfig,
        http: reqwest::Client,
    ) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            endpoints: Endpoints::new(endpoints)?,
            config,
            http,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub async fn register(&self, instance: &Instance) -> Result<(), ClientError> {
        let body = serde_json::to_vec(&InstanceEnvelope {
            instance: instance.clone(),
        })
        .map_err(ClientError::Encode)?;

        self.send(
            Method::POST,
            &app_path(&instance.app),
            Some(body),
            StatusCode::NO_CONTENT,
        )
        .await
    }

    pub async fn deregister(&self, instance: &Instance) -> Result<(), ClientError> {
        self.send(
            Method::DELETE,
            &app_instance_path(&instance.app, &instance.instance_id),
            None,
            StatusCode::OK,
        )
        .await
    }

    pub async fn heartbeat(&self, instance: &Instance) -> Result<(), ClientError> {
        self.send(
            Method::PUT,
            &app_instance_path(&instance.app, &instance.instance_id),
            None,
            StatusCode::OK,
        )
        .await
    }

    pub async fn status_override(&self, instance: &Instance, status: Status) -> Result<(), ClientError> {
        self.send(
            Method::PUT,
            &status_path(&instance.app, &instance.instance_id, status),
            None,
            StatusCode::OK,
        )
        .await
    }

    /// Drops the override; the registry falls back to `fallback`.
    pub async fn remove_status_override(
        &self,
        instance: &Instance,
        fallback: Status,
    ) -> Result<(), ClientError> {
        self.send(
            Method::DELETE,
            &status_path(&instance.app, &instance.instance_id, fallback),
            None,
            StatusCode::OK,
        )
        .await
    }

    pub async fn apps(&self) -> Result<Vec<Application>, ClientError> {
        let envelope: ApplicationsEnvelope = self.get(APPS_PATH).await?;
        Ok(envelope.applications.applications)
    }

    pub async fn app(&self, name: &str) -> Result<Application, ClientError> {
        let envelope: ApplicationEnvelope = self.get(&app_path(name)).await?;
        Ok(envelope.application)
    }

    pub async fn app_instance(&self, app: &str, instance_id: &str) -> Result<Instance, ClientError> {
        let envelope: InstanceEnvelope = self.get(&app_instance_path(app, instance_id)).await?;
        Ok(envelope.instance)
    }

    pub async fn instance(&self, instance_id: &str) -> Result<Instance, ClientError> {
        let envelope: InstanceEnvelope = self.get(&format!("instances/{}", instance_id)).await?;
        Ok(envelope.instance)
    }

    /// Polls the registry every `poll_interval` and reports changes.
    pub fn watch(&self, poll_interval: Duration) -> Watcher {
        Watcher::new(self.clone(), poll_interval)
    }

    pub fn start_heartbeat(&self, instance: Instance, every: Duration) -> Heartbeat {
        Heartbeat::start(self.clone(), instance, every)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        expected: StatusCode,
    ) -> Result<(), ClientError> {
        self.config
            .retry
            .strategy(self.endpoints.clone())
            .apply(|endpoint| {
                let url = format!("{}/{}", endpoint, path);
                let mut req = self
                    .http
                    .request(method.clone(), &url)
                    .header(ACCEPT, JSON);
                if let Some(body) = &body {
                    req = req.header(CONTENT_TYPE, JSON).body(body.clone());
                }
                async move { execute(req, &url, expected).await.map(|_| ()) }
            })
            .await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.config
            .retry
            .strategy(self.endpoints.clone())
            .apply(|endpoint| {
                let url = format!("{}/{}", endpoint, path);
                let req = self.http.get(&url).header(ACCEPT, JSON);
                async move { fetch(req, url).await }
            })
            .await
    }
}

/// Sends one request and checks the response status.
async fn execute(
    req: RequestBuilder,
    url: &str,
    expected: StatusCode,
) -> Result<Response, ClientError> {
    let resp = req.send().await.map_err(|source| ClientError::Transport {
        url: url.to_string(),
        source,
    })?;

    if resp.status() != expected {
        return Err(ClientError::UnexpectedStatus {
            url: url.to_string(),
            status: resp.status(),
        });
    }
    Ok(resp)
}

async fn fetch<T: DeserializeOwned>(req: RequestBuilder, url: String) -> Result<T, ClientError> {
    let resp = execute(req, &url, StatusCode::OK).await?;
    let bytes = resp.bytes().await.map_err(|source| ClientError::Transport {
        url: url.clone(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ClientError::Decode { url, source })
}

#[async_trait]
impl Registry for Client {
    async fn apps(&self) -> anyhow::Result<Vec<Application>> {
        Ok(Client::apps(self).await?)
    }
}

const APPS_PATH: &str = "apps";

fn app_path(app: &str) -> String {
    format!("{}/{}", APPS_PATH, app)
}

fn app_instance_path(app: &str, instance_id: &str) -> String {
    format!("{}/{}", app_path(app), instance_id)
}

fn status_path(app: &str, instance_id: &str, status: Status) -> String {
    format!("{}/status?value={}", app_instance_path(app, instance_id), status)
}
