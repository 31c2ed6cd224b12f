//! Content management REST API client.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{Branch, PublishTarget, Query, Resource, StackClient};
use crate::config::StackConfig;
use crate::error::{Error, Result};

/// Default wait when a 429 carries no `Retry-After` header.
const DEFAULT_RATE_LIMIT_SECS: u64 = 60;

/// HTTP implementation of [`StackClient`].
#[derive(Debug, Clone)]
pub struct HttpStackClient {
    config: Arc<StackConfig>,
    client: Client,
    branch: Option<String>,
}

impl HttpStackClient {
    /// Creates a client for the stack described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when neither a management token nor an
    /// auth token is configured, or the TLS backend cannot be initialised.
    pub fn new(config: &StackConfig) -> Result<Self> {
        if config.management_token.is_none() && config.auth_token.is_none() {
            return Err(Error::Config(
                "stack.management_token or stack.auth_token is required".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            config: Arc::new(config.clone()),
            client,
            branch: None,
        })
    }

    fn base_url(&self, resource: &Resource) -> &str {
        let host = match resource {
            Resource::AppInstallation => &self.config.marketplace_host,
            Resource::PersonalizeProject => &self.config.personalize_host,
            _ => &self.config.host,
        };
        host.trim_end_matches('/')
    }

    fn collection_url(&self, resource: &Resource) -> String {
        format!("{}/{}", self.base_url(resource), resource.path())
    }

    fn item_url(&self, resource: &Resource, uid: &str) -> String {
        format!("{}/{}", self.collection_url(resource), uid)
    }

    fn stack_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.host.trim_end_matches('/'), path)
    }

    /// Builds an authenticated request.
    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut req = self
            .client
            .request(method, url)
            .header("api_key", &self.config.api_key);

        if let Some(token) = &self.config.management_token {
            req = req.header("authorization", token);
        } else if let Some(token) = &self.config.auth_token {
            req = req.header("authtoken", token);
        }
        if let Some(branch) = &self.branch {
            req = req.header("branch", branch);
        }
        if let Some(org) = &self.config.organization_uid {
            req = req.header("organization_uid", org);
        }
        req
    }

    async fn send(&self, req: RequestBuilder, context: &str) -> Result<Value> {
        let response = req.send().await?;
        let response = check_status(response, context).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn list_params(resource: &Resource, query: &Query) -> Vec<(String, String)> {
        let mut params = Vec::new();
        match resource {
            Resource::Asset => params.push(("query".to_string(), r#"{"is_dir":false}"#.to_string())),
            Resource::AssetFolder => {
                params.push(("include_folders".to_string(), "true".to_string()));
                params.push(("query".to_string(), r#"{"is_dir":true}"#.to_string()));
            }
            Resource::Entry { locale, .. } => params.push(("locale".to_string(), locale.clone())),
            _ => {}
        }
        if query.skip > 0 {
            params.push(("skip".to_string(), query.skip.to_string()));
        }
        if query.limit > 0 {
            params.push(("limit".to_string(), query.limit.to_string()));
        }
        params.extend(query.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        params
    }
}

/// Maps a non-success status to a crate error.
#[must_use]
pub fn handle_http_error(status_code: u16, body: &str, context: &str) -> Error {
    match status_code {
        429 => Error::RateLimit(DEFAULT_RATE_LIMIT_SECS),
        401 | 403 => Error::Authentication(format!("{}: {}", context, body)),
        404 => Error::NotFound(format!("{}: {}", context, body)),
        409 => Error::Conflict(format!("{}: {}", context, body)),
        422 if body.contains("already exists") || body.contains("is not unique") => {
            Error::Conflict(format!("{}: {}", context, body))
        }
        _ => Error::Api {
            status: status_code,
            message: format!("{}: {}", context, body),
        },
    }
}

async fn check_status(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();

    match (status, retry_after) {
        (StatusCode::TOO_MANY_REQUESTS, Some(secs)) => Err(Error::RateLimit(secs)),
        _ => Err(handle_http_error(status.as_u16(), &body, context)),
    }
}

fn take_key(mut value: Value, key: &str, context: &str) -> Result<Value> {
    match value.get_mut(key) {
        Some(inner) => Ok(inner.take()),
        None => Err(Error::Api {
            status: 200,
            message: format!("{}: response has no '{}' field", context, key),
        }),
    }
}

fn take_list(value: Value, key: &str) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[async_trait]
impl StackClient for HttpStackClient {
    fn name(&self) -> &'static str {
        "http"
    }

    fn scoped(&self, branch: Option<&str>) -> Arc<dyn StackClient> {
        Arc::new(Self {
            config: Arc::clone(&self.config),
            client: self.client.clone(),
            branch: branch.map(str::to_string),
        })
    }

    async fn branches(&self) -> Result<Option<Vec<Branch>>> {
        let response = self
            .request(Method::GET, &self.stack_url("stacks/branches"))
            .send()
            .await?;

        // Stacks on plans without branches answer with one of these.
        if matches!(
            response.status(),
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::PRECONDITION_FAILED
        ) {
            debug!("branches not available on this stack ({})", response.status());
            return Ok(None);
        }

        let response = check_status(response, "branches").await?;
        let body: Value = response.json().await?;
        let branches = take_list(body, "branches")
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<Branch>, _>>()?;
        Ok(Some(branches))
    }

    async fn count(&self, resource: &Resource, query: &Query) -> Result<u64> {
        let mut params = Self::list_params(resource, &Query { limit: 1, ..query.clone() });
        params.push(("include_count".to_string(), "true".to_string()));

        let body = self
            .send(
                self.request(Method::GET, &self.collection_url(resource))
                    .query(&params),
                resource.plural_key(),
            )
            .await?;

        match body.get("count").and_then(Value::as_u64) {
            Some(count) => Ok(count),
            None => Ok(take_list(body, resource.plural_key()).len() as u64),
        }
    }

    async fn find(&self, resource: &Resource, query: &Query) -> Result<Vec<Value>> {
        let params = Self::list_params(resource, query);
        let body = self
            .send(
                self.request(Method::GET, &self.collection_url(resource))
                    .query(&params),
                resource.plural_key(),
            )
            .await?;
        Ok(take_list(body, resource.plural_key()))
    }

    async fn create(&self, resource: &Resource, payload: Value) -> Result<Value> {
        let url = match resource {
            Resource::AssetFolder => format!("{}/folders", self.collection_url(resource)),
            _ => self.collection_url(resource),
        };
        let mut req = self.request(Method::POST, &url);
        if let Resource::Entry { locale, .. } = resource {
            req = req.query(&[("locale", locale)]);
        }
        let body = self
            .send(
                req.json(&json!({ resource.singular_key(): payload })),
                resource.singular_key(),
            )
            .await?;
        take_key(body, resource.singular_key(), resource.singular_key())
    }

    async fn update(&self, resource: &Resource, uid: &str, payload: Value) -> Result<Value> {
        let mut req = self.request(Method::PUT, &self.item_url(resource, uid));
        if let Resource::Entry { locale, .. } = resource {
            req = req.query(&[("locale", locale)]);
        }
        let body = self
            .send(req.json(&json!({ resource.singular_key(): payload })), uid)
            .await?;
        take_key(body, resource.singular_key(), uid)
    }

    async fn upload_asset(&self, metadata: Value, file_name: &str, bytes: Vec<u8>) -> Result<Value> {
        let mut form = Form::new().part(
            "asset[upload]",
            Part::bytes(bytes).file_name(file_name.to_string()),
        );
        for field in ["title", "description", "parent_uid"] {
            if let Some(value) = metadata.get(field).and_then(Value::as_str) {
                form = form.text(format!("asset[{}]", field), value.to_string());
            }
        }
        if let Some(tags) = metadata.get("tags").and_then(Value::as_array) {
            let tags: Vec<&str> = tags.iter().filter_map(Value::as_str).collect();
            if !tags.is_empty() {
                form = form.text("asset[tags]", tags.join(","));
            }
        }

        let body = self
            .send(
                self.request(Method::POST, &self.collection_url(&Resource::Asset))
                    .multipart(form),
                file_name,
            )
            .await?;
        take_key(body, "asset", file_name)
    }

    async fn download(&self, url: &str, authenticated: bool) -> Result<Vec<u8>> {
        let req = if authenticated {
            self.request(Method::GET, url)
        } else {
            self.client.get(url)
        };
        let response = req.send().await?;
        let response = check_status(response, url).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn publish(&self, resource: &Resource, uid: &str, target: &PublishTarget) -> Result<()> {
        let url = format!("{}/publish", self.item_url(resource, uid));
        let mut body = json!({
            resource.singular_key(): {
                "environments": target.environments,
                "locales": target.locales,
            }
        });
        if let Resource::Entry { locale, .. } = resource {
            body["locale"] = json!(locale);
        }
        self.send(self.request(Method::POST, &url).json(&body), uid)
            .await
            .map(|_| ())
    }

    async fn master_locale(&self) -> Result<String> {
        let body = self
            .send(self.request(Method::GET, &self.stack_url("stacks")), "stack")
            .await?;
        take_key(body, "stack", "stack")?
            .get("master_locale")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Api {
                status: 200,
                message: "stack: response has no 'master_locale' field".to_string(),
            })
    }

    async fn stack_settings(&self) -> Result<Value> {
        let body = self
            .send(
                self.request(Method::GET, &self.stack_url("stacks/settings")),
                "stack settings",
            )
            .await?;
        take_key(body, "stack_settings", "stack settings")
    }

    async fn add_settings(&self, settings: Value) -> Result<Value> {
        let body = self
            .send(
                self.request(Method::POST, &self.stack_url("stacks/settings"))
                    .json(&json!({ "stack_settings": settings })),
                "stack settings",
            )
            .await?;
        take_key(body, "stack_settings", "stack settings")
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
