//! REST adapter for the resource management API.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::config::CloudConfig;
use crate::credential::{management_scope, resolve_subscription, AccessToken, TokenCredential};
use crate::error::{DeployError, DeployResult};
use crate::types::{
    AppRef, ContainerImage, FunctionApp, FunctionAppSpec, HostingPlan, OperationHandle,
    OperationKind, OperationStatus, PlanSpec, PlanTier, Region, ResourceGroup, ResourceId,
    RuntimeStack,
};

use super::ManagementClient;

/// Upper bound on polls while following a long-running request.
const MAX_LRO_POLLS: u32 = 120;

/// Kudu deployment status codes.
const KUDU_FAILED: i64 = 3;
const KUDU_SUCCESS: i64 = 4;

/// Management API client.
pub struct ArmClient {
    http: Client,
    endpoint: String,
    subscription_id: String,
    resources_api_version: String,
    web_api_version: String,
    credential: Arc<dyn TokenCredential>,
    token: Mutex<Option<AccessToken>>,
    storage_connection: Option<SecretString>,
    scm_override: Option<String>,
    lro_interval: Duration,
}

#[derive(Deserialize)]
struct RawGroup {
    id: String,
    name: String,
    location: String,
}

#[derive(Deserialize)]
struct RawSku {
    #[serde(default)]
    tier: Option<String>,
}

#[derive(Deserialize)]
struct RawPlan {
    id: String,
    name: String,
    location: String,
    #[serde(default)]
    sku: Option<RawSku>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSiteConfig {
    #[serde(default)]
    linux_fx_version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSiteProperties {
    server_farm_id: String,
    default_host_name: String,
    #[serde(default)]
    site_config: Option<RawSiteConfig>,
}

#[derive(Deserialize)]
struct RawSite {
    id: String,
    name: String,
    location: String,
    properties: RawSiteProperties,
}

#[derive(Deserialize)]
struct RawWebConfig {
    properties: RawSiteConfig,
}

#[derive(Deserialize)]
struct RawKuduStatus {
    status: i64,
    #[serde(default)]
    status_text: Option<String>,
}

#[derive(Deserialize)]
struct RawArmError {
    error: RawArmErrorBody,
}

#[derive(Deserialize)]
struct RawArmErrorBody {
    #[serde(default)]
    code: String,
    message: String,
}

/// Body served by an `Azure-AsyncOperation` status URL.
///
/// The URL answers 200 for the whole lifetime of the operation; only
/// `status` says whether it has finished.
#[derive(Deserialize)]
struct RawAsyncOperation {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<RawArmErrorBody>,
}

impl RawAsyncOperation {
    /// `None` when the body is not an async-operation document.
    fn state(self) -> Option<OperationStatus> {
        let status = self.status?;
        Some(match status.as_str() {
            s if s.eq_ignore_ascii_case("succeeded") => OperationStatus::Completed,
            s if s.eq_ignore_ascii_case("failed") || s.eq_ignore_ascii_case("canceled") => {
                OperationStatus::Failed(
                    self.error
                        .map(|e| e.message)
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| format!("operation {status}")),
                )
            }
            _ => OperationStatus::InProgress,
        })
    }
}

/// `West US` and `westus` name the same region.
fn normalise_region(location: &str) -> Region {
    Region::new(location.replace(' ', "").to_lowercase())
}

fn resource_group_of(id: &str) -> String {
    let mut segments = id.split('/');
    while let Some(segment) = segments.next() {
        if segment.eq_ignore_ascii_case("resourcegroups") {
            return segments.next().unwrap_or_default().to_owned();
        }
    }
    String::new()
}

impl From<RawGroup> for ResourceGroup {
    fn from(raw: RawGroup) -> Self {
        Self {
            id: ResourceId::new(raw.id),
            name: raw.name,
            region: normalise_region(&raw.location),
        }
    }
}

impl From<RawPlan> for HostingPlan {
    fn from(raw: RawPlan) -> Self {
        let tier = raw
            .sku
            .and_then(|sku| sku.tier)
            .and_then(|tier| PlanTier::from_sku_tier(&tier))
            .unwrap_or_default();
        Self {
            resource_group: resource_group_of(&raw.id),
            id: ResourceId::new(raw.id),
            name: raw.name,
            region: normalise_region(&raw.location),
            tier,
        }
    }
}

impl From<RawSite> for FunctionApp {
    fn from(raw: RawSite) -> Self {
        let fx = raw
            .properties
            .site_config
            .and_then(|config| config.linux_fx_version)
            .filter(|fx| !fx.is_empty());

        let (runtime, container_image) = match fx {
            Some(fx) => match fx.strip_prefix("DOCKER|") {
                Some(image) => (None, Some(ContainerImage::new(image))),
                None => {
                    // The site resource does not report the host version.
                    let language = fx.split('|').next().unwrap_or_default().to_lowercase();
                    (Some(RuntimeStack::new(language, "~4", fx)), None)
                }
            },
            None => (None, None),
        };

        Self {
            resource_group: resource_group_of(&raw.id),
            id: ResourceId::new(raw.id),
            name: raw.name,
            region: normalise_region(&raw.location),
            plan_id: ResourceId::new(raw.properties.server_farm_id),
            runtime,
            container_image,
            artifact: None,
            default_host_name: raw.properties.default_host_name,
        }
    }
}

async fn error_reason(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<RawArmError>(&body) {
        Ok(err) => format!("{status}: {} ({})", err.error.message, err.error.code),
        Err(_) if body.is_empty() => status.to_string(),
        Err(_) => format!("{status}: {body}"),
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Status URL of an accepted request, preferring the async-operation header.
fn location_of(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "azure-asyncoperation")
        .or_else(|| header_str(headers, LOCATION.as_str()))
}

fn retry_after(headers: &HeaderMap, fallback: Duration) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(fallback, Duration::from_secs)
        .min(Duration::from_secs(60))
}

impl ArmClient {
    /// Connect to the management API, resolving the subscription.
    pub async fn connect(
        config: &CloudConfig,
        credential: Arc<dyn TokenCredential>,
    ) -> DeployResult<Self> {
        let subscription_id = resolve_subscription(config).await?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(DeployError::Http)?;

        Ok(Self {
            http,
            endpoint: config.management_endpoint.trim_end_matches('/').to_owned(),
            subscription_id,
            resources_api_version: config.resources_api_version.clone(),
            web_api_version: config.web_api_version.clone(),
            credential,
            token: Mutex::new(None),
            storage_connection: None,
            scm_override: None,
            lro_interval: Duration::from_secs(5),
        })
    }

    /// Storage connection string applied as `AzureWebJobsStorage` on new apps.
    #[must_use]
    pub fn with_storage_connection(mut self, connection: Option<String>) -> Self {
        self.storage_connection = connection.map(SecretString::from);
        self
    }

    /// Send deployment requests to `url` instead of the app's SCM host.
    #[must_use]
    pub fn with_scm_override(mut self, url: impl Into<String>) -> Self {
        self.scm_override = Some(url.into().trim_end_matches('/').to_owned());
        self
    }

    /// Interval between polls of long-running requests.
    #[must_use]
    pub const fn with_lro_interval(mut self, interval: Duration) -> Self {
        self.lro_interval = interval;
        self
    }

    async fn bearer(&self) -> DeployResult<SecretString> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.token.clone());
        }

        let token = self
            .credential
            .get_token(&management_scope(&self.endpoint))
            .await?;
        let secret = token.token.clone();
        *cached = Some(token);
        Ok(secret)
    }

    async fn request(&self, method: Method, url: &str) -> DeployResult<RequestBuilder> {
        let bearer = self.bearer().await?;
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(bearer.expose_secret()))
    }

    fn group_url(&self, name: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourcegroups/{}?api-version={}",
            self.endpoint, self.subscription_id, name, self.resources_api_version
        )
    }

    fn web_url(&self, group: &str, path: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Web/{}?api-version={}",
            self.endpoint, self.subscription_id, group, path, self.web_api_version
        )
    }

    fn scm_base(&self, app: &FunctionApp) -> String {
        if let Some(url) = &self.scm_override {
            return url.clone();
        }
        let host = match app.default_host_name.split_once('.') {
            Some((site, domain)) => format!("{site}.scm.{domain}"),
            None => format!("{}.scm.azurewebsites.net", app.name),
        };
        format!("https://{host}")
    }

    /// Follow a `202 Accepted` until the final resource body is available.
    async fn settle(
        &self,
        url: &str,
        resource: &str,
        response: Response,
    ) -> DeployResult<Response> {
        if response.status() != StatusCode::ACCEPTED {
            return Ok(response);
        }
        let location = header_str(response.headers(), LOCATION.as_str());
        let mut wait = retry_after(response.headers(), self.lro_interval);

        if let Some(operation) = header_str(response.headers(), "azure-asyncoperation") {
            for _ in 0..MAX_LRO_POLLS {
                tokio::time::sleep(wait).await;
                match self.async_operation_status(&operation).await? {
                    OperationStatus::Completed => {
                        let target = location.as_deref().unwrap_or(url);
                        return Ok(self.request(Method::GET, target).await?.send().await?);
                    }
                    OperationStatus::Failed(reason) => {
                        return Err(DeployError::resource_creation(resource, reason));
                    }
                    _ => wait = self.lro_interval,
                }
            }
        } else if let Some(mut location) = location {
            for _ in 0..MAX_LRO_POLLS {
                tokio::time::sleep(wait).await;
                let polled = self.request(Method::GET, &location).await?.send().await?;
                if polled.status() != StatusCode::ACCEPTED {
                    return Ok(polled);
                }
                wait = retry_after(polled.headers(), self.lro_interval);
                if let Some(next) = header_str(polled.headers(), LOCATION.as_str()) {
                    location = next;
                }
            }
        } else {
            return Ok(response);
        }

        Err(DeployError::internal(format!(
            "long-running request did not settle after {MAX_LRO_POLLS} polls"
        )))
    }

    async fn put_resource<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &Value,
        resource: &str,
    ) -> DeployResult<T> {
        let response = self.request(Method::PUT, url).await?.json(body).send().await?;
        let response = self.settle(url, resource, response).await?;
        if !response.status().is_success() {
            return Err(DeployError::resource_creation(
                resource,
                error_reason(response).await,
            ));
        }
        response
            .json()
            .await
            .map_err(|e| DeployError::Serialisation(format!("{resource}: {e}")))
    }

    async fn merge_app_settings(
        &self,
        app: &FunctionApp,
        updates: &[(&str, &str)],
    ) -> DeployResult<()> {
        let list_url = self.web_url(
            &app.resource_group,
            &format!("sites/{}/config/appsettings/list", app.name),
        );
        let response = self.request(Method::POST, &list_url).await?.send().await?;
        if !response.status().is_success() {
            return Err(DeployError::RuntimeSwitch {
                app: app.app_ref().to_string(),
                reason: error_reason(response).await,
            });
        }
        let current: Value = response.json().await?;
        let mut settings = current
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);
        for (key, value) in updates {
            settings.insert((*key).to_owned(), Value::String((*value).to_owned()));
        }

        let put_url = self.web_url(
            &app.resource_group,
            &format!("sites/{}/config/appsettings", app.name),
        );
        let response = self
            .request(Method::PUT, &put_url)
            .await?
            .json(&json!({ "properties": settings }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DeployError::RuntimeSwitch {
                app: app.app_ref().to_string(),
                reason: error_reason(response).await,
            });
        }
        Ok(())
    }

    async fn patch_fx_version(
        &self,
        app: &FunctionApp,
        kind: OperationKind,
        fx: String,
    ) -> DeployResult<OperationHandle> {
        let url = self.web_url(
            &app.resource_group,
            &format!("sites/{}/config/web", app.name),
        );
        let response = self
            .request(Method::PATCH, &url)
            .await?
            .json(&json!({ "properties": { "linuxFxVersion": fx } }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DeployError::operation_failed(
                kind,
                app.app_ref().to_string(),
                error_reason(response).await,
            ));
        }

        let mut handle = OperationHandle::new(kind, app.app_ref()).with_target(fx);
        if response.status() == StatusCode::ACCEPTED {
            if let Some(location) = location_of(response.headers()) {
                handle = handle.with_location(location);
            }
        }
        Ok(handle)
    }

    async fn kudu_status(&self, location: &str) -> DeployResult<OperationStatus> {
        let response = self.request(Method::GET, location).await?.send().await?;
        if !response.status().is_success() {
            return Err(DeployError::internal(format!(
                "deployment status unavailable: {}",
                error_reason(response).await
            )));
        }
        let status: RawKuduStatus = response.json().await?;
        Ok(match status.status {
            KUDU_SUCCESS => OperationStatus::Completed,
            KUDU_FAILED => OperationStatus::Failed(
                status
                    .status_text
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "deployment failed".to_owned()),
            ),
            0 => OperationStatus::Pending,
            _ => OperationStatus::InProgress,
        })
    }

    /// Poll a status URL from an accepted request.
    ///
    /// An async-operation document decides by its `status` field. Any other
    /// success body is a plain `Location` result and means the work is done.
    async fn async_operation_status(&self, location: &str) -> DeployResult<OperationStatus> {
        let response = self.request(Method::GET, location).await?.send().await?;
        match response.status() {
            StatusCode::ACCEPTED => Ok(OperationStatus::InProgress),
            status if status.is_success() => {
                let body = response.text().await?;
                Ok(serde_json::from_str::<RawAsyncOperation>(&body)
                    .ok()
                    .and_then(RawAsyncOperation::state)
                    .unwrap_or(OperationStatus::Completed))
            }
            _ => Ok(OperationStatus::Failed(error_reason(response).await)),
        }
    }

    async fn config_converged(&self, app: &AppRef, target: &str) -> DeployResult<OperationStatus> {
        let url = self.web_url(
            &app.resource_group,
            &format!("sites/{}/config/web", app.name),
        );
        let response = self.request(Method::GET, &url).await?.send().await?;
        if !response.status().is_success() {
            return Err(DeployError::internal(format!(
                "site configuration unavailable: {}",
                error_reason(response).await
            )));
        }
        let config: RawWebConfig = response.json().await?;
        let current = config.properties.linux_fx_version.unwrap_or_default();
        if current.eq_ignore_ascii_case(target) {
            Ok(OperationStatus::Completed)
        } else {
            debug!(app = %app, %current, %target, "configuration not yet converged");
            Ok(OperationStatus::InProgress)
        }
    }
}

impl std::fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmClient")
            .field("endpoint", &self.endpoint)
            .field("subscription_id", &self.subscription_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ManagementClient for ArmClient {
    fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    #[instrument(skip(self))]
    async fn create_resource_group(
        &self,
        name: &str,
        region: &Region,
    ) -> DeployResult<ResourceGroup> {
        let raw: RawGroup = self
            .put_resource(
                &self.group_url(name),
                &json!({ "location": region.as_str() }),
                &format!("resource group {name}"),
            )
            .await?;
        Ok(raw.into())
    }

    #[instrument(skip(self, spec), fields(plan = %spec.name))]
    async fn create_or_get_hosting_plan(&self, spec: &PlanSpec) -> DeployResult<HostingPlan> {
        let url = self.web_url(&spec.resource_group, &format!("serverfarms/{}", spec.name));
        let resource = format!("hosting plan {}", spec.name);

        let existing = self.request(Method::GET, &url).await?.send().await?;
        match existing.status() {
            StatusCode::OK => {
                debug!("reusing existing hosting plan");
                let raw: RawPlan = existing
                    .json()
                    .await
                    .map_err(|e| DeployError::Serialisation(format!("{resource}: {e}")))?;
                return Ok(raw.into());
            }
            StatusCode::NOT_FOUND => {}
            _ => {
                return Err(DeployError::resource_creation(
                    resource,
                    error_reason(existing).await,
                ))
            }
        }

        let body = json!({
            "location": spec.region.as_str(),
            "kind": "linux",
            "sku": { "name": spec.tier.sku_name(), "tier": spec.tier.sku_tier() },
            "properties": { "reserved": true },
        });
        let raw: RawPlan = self.put_resource(&url, &body, &resource).await?;
        Ok(raw.into())
    }

    #[instrument(skip(self, spec), fields(app = %spec.name))]
    async fn create_function_app(&self, spec: &FunctionAppSpec) -> DeployResult<FunctionApp> {
        let url = self.web_url(&spec.resource_group, &format!("sites/{}", spec.name));

        let mut settings = Vec::new();
        let mut fx = String::new();
        if let Some(runtime) = &spec.runtime {
            settings.push(json!({ "name": "FUNCTIONS_WORKER_RUNTIME", "value": runtime.runtime }));
            settings.push(json!({ "name": "FUNCTIONS_EXTENSION_VERSION", "value": runtime.version }));
            fx.clone_from(&runtime.linux_fx_version);
        }
        if let Some(storage) = &self.storage_connection {
            settings.push(json!({ "name": "AzureWebJobsStorage", "value": storage.expose_secret() }));
        } else {
            warn!("no storage connection configured; the app host may not start");
        }

        let body = json!({
            "location": spec.region.as_str(),
            "kind": "functionapp,linux",
            "properties": {
                "serverFarmId": spec.plan_id.as_str(),
                "reserved": true,
                "siteConfig": { "linuxFxVersion": fx, "appSettings": settings },
            },
        });

        let raw: RawSite = self
            .put_resource(&url, &body, &format!("function app {}", spec.name))
            .await?;
        Ok(raw.into())
    }

    #[instrument(skip(self))]
    async fn get_function_app_by_name(&self, app: &AppRef) -> DeployResult<FunctionApp> {
        let url = self.web_url(&app.resource_group, &format!("sites/{}", app.name));
        let response = self.request(Method::GET, &url).await?.send().await?;
        match response.status() {
            StatusCode::OK => {
                let raw: RawSite = response
                    .json()
                    .await
                    .map_err(|e| DeployError::Serialisation(format!("function app {app}: {e}")))?;
                Ok(raw.into())
            }
            StatusCode::NOT_FOUND => Err(DeployError::NotFound(format!("function app {app}"))),
            _ => Err(DeployError::internal(format!(
                "failed to get function app {app}: {}",
                error_reason(response).await
            ))),
        }
    }

    #[instrument(skip(self, app), fields(app = %app.name))]
    async fn deploy_archive(
        &self,
        app: &FunctionApp,
        archive: &Path,
    ) -> DeployResult<OperationHandle> {
        let bytes = tokio::fs::read(archive).await?;
        let url = format!("{}/api/zipdeploy?isAsync=true", self.scm_base(app));

        let response = self
            .request(Method::POST, &url)
            .await?
            .header("Content-Type", "application/zip")
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DeployError::Deployment {
                app: app.app_ref().to_string(),
                reason: error_reason(response).await,
            });
        }

        let handle = OperationHandle::new(OperationKind::ZipDeploy, app.app_ref());
        Ok(match location_of(response.headers()) {
            Some(location) => handle.with_location(location),
            None => handle,
        })
    }

    #[instrument(skip(self, app), fields(app = %app.name, stack = %stack))]
    async fn set_runtime_stack(
        &self,
        app: &FunctionApp,
        stack: &RuntimeStack,
    ) -> DeployResult<OperationHandle> {
        self.merge_app_settings(
            app,
            &[
                ("FUNCTIONS_WORKER_RUNTIME", stack.runtime.as_str()),
                ("FUNCTIONS_EXTENSION_VERSION", stack.version.as_str()),
            ],
        )
        .await?;
        self.patch_fx_version(app, OperationKind::RuntimeSwitch, stack.linux_fx_version.clone())
            .await
    }

    #[instrument(skip(self, app), fields(app = %app.name, image = %image))]
    async fn set_container_image(
        &self,
        app: &FunctionApp,
        image: &ContainerImage,
    ) -> DeployResult<OperationHandle> {
        self.patch_fx_version(app, OperationKind::ContainerSwitch, image.linux_fx_version())
            .await
    }

    async fn operation_status(&self, handle: &OperationHandle) -> DeployResult<OperationStatus> {
        match (handle.kind, &handle.location, &handle.target) {
            (OperationKind::ZipDeploy, Some(location), _) => self.kudu_status(location).await,
            (OperationKind::ZipDeploy, None, _) => Ok(OperationStatus::Completed),
            (_, Some(location), _) => self.async_operation_status(location).await,
            (_, None, Some(target)) => self.config_converged(&handle.app, target).await,
            (_, None, None) => Ok(OperationStatus::Completed),
        }
    }

    #[instrument(skip(self))]
    async fn delete_resource_group(&self, name: &str) -> DeployResult<()> {
        let response = self
            .request(Method::DELETE, &self.group_url(name))
            .await?
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("resource group already gone");
                Ok(())
            }
            status if status.is_success() => Ok(()),
            _ => Err(DeployError::internal(format!(
                "failed to delete resource group {name}: {}",
                error_reason(response).await
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rstest::rstest;
    use wiremock::matchers::{body_partial_json, header, method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SUB: &str = "00000000-0000-0000-0000-000000000001";

    struct StaticToken;

    #[async_trait]
    impl TokenCredential for StaticToken {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn get_token(&self, _scope: &str) -> DeployResult<AccessToken> {
            Ok(AccessToken::new(
                "test-token",
                Utc::now() + chrono::Duration::hours(1),
            ))
        }
    }

    async fn client(server: &MockServer) -> ArmClient {
        let cloud = CloudConfig {
            management_endpoint: server.uri(),
            subscription_id: Some(SUB.to_owned()),
            ..CloudConfig::default()
        };
        ArmClient::connect(&cloud, Arc::new(StaticToken))
            .await
            .unwrap()
            .with_scm_override(server.uri())
            .with_lro_interval(Duration::from_millis(10))
    }

    fn site_json(name: &str, fx: &str) -> Value {
        json!({
            "id": format!("/subscriptions/{SUB}/resourceGroups/rgfn_abc/providers/Microsoft.Web/sites/{name}"),
            "name": name,
            "location": "West US",
            "properties": {
                "serverFarmId": format!("/subscriptions/{SUB}/resourceGroups/rgfn_abc/providers/Microsoft.Web/serverfarms/plan"),
                "defaultHostName": format!("{name}.azurewebsites.net"),
                "siteConfig": { "linuxFxVersion": fx },
            }
        })
    }

    fn app() -> FunctionApp {
        FunctionApp::from(serde_json::from_value::<RawSite>(site_json("fnapp1-x", "node|18")).unwrap())
    }

    fn app_spec() -> FunctionAppSpec {
        FunctionAppSpec {
            name: "fnapp1-x".to_owned(),
            resource_group: "rgfn_abc".to_owned(),
            region: Region::default(),
            plan_id: ResourceId::new("/serverfarms/plan"),
            runtime: Some(RuntimeStack::new("node", "~4", "node|18")),
        }
    }

    #[test]
    fn site_parsing() {
        let app = app();
        assert_eq!(app.resource_group, "rgfn_abc");
        assert_eq!(app.region, Region::new("westus"));
        assert_eq!(app.runtime.unwrap().runtime, "node");

        let raw: RawSite =
            serde_json::from_value(site_json("c", "DOCKER|acme/square:1")).unwrap();
        let app = FunctionApp::from(raw);
        assert_eq!(app.container_image, Some(ContainerImage::new("acme/square:1")));
        assert!(app.runtime.is_none());
    }

    #[tokio::test]
    async fn creates_resource_group_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(format!("/subscriptions/{SUB}/resourcegroups/rgfn_abc")))
            .and(query_param("api-version", "2021-04-01"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_partial_json(json!({ "location": "westus" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": format!("/subscriptions/{SUB}/resourceGroups/rgfn_abc"),
                "name": "rgfn_abc",
                "location": "westus"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let group = client(&server)
            .await
            .create_resource_group("rgfn_abc", &Region::default())
            .await
            .unwrap();
        assert_eq!(group.name, "rgfn_abc");
    }

    #[tokio::test]
    async fn existing_plan_is_reused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("/serverfarms/shared-plan$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": format!("/subscriptions/{SUB}/resourceGroups/rgfn_abc/providers/Microsoft.Web/serverfarms/shared-plan"),
                "name": "shared-plan",
                "location": "West US",
                "sku": { "name": "Y1", "tier": "Dynamic" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let plan = client(&server)
            .await
            .create_or_get_hosting_plan(&PlanSpec {
                name: "shared-plan".to_owned(),
                resource_group: "rgfn_abc".to_owned(),
                region: Region::default(),
                tier: PlanTier::Consumption,
            })
            .await
            .unwrap();
        assert_eq!(plan.tier, PlanTier::Consumption);
        assert_eq!(plan.resource_group, "rgfn_abc");
    }

    #[tokio::test]
    async fn accepted_create_is_followed() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path_regex("/sites/fnapp1-x$"))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("location", format!("{}/pending/1", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pending/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(site_json("fnapp1-x", "node|18")))
            .mount(&server)
            .await;

        let app = client(&server)
            .await
            .create_function_app(&FunctionAppSpec {
                name: "fnapp1-x".to_owned(),
                resource_group: "rgfn_abc".to_owned(),
                region: Region::default(),
                plan_id: ResourceId::new("/serverfarms/plan"),
                runtime: Some(RuntimeStack::new("node", "~4", "node|18")),
            })
            .await
            .unwrap();
        assert_eq!(app.default_host_name, "fnapp1-x.azurewebsites.net");
    }

    #[tokio::test]
    async fn creation_conflict_is_resource_creation_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error": { "code": "Conflict", "message": "name already taken" }
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .create_resource_group("rgfn_abc", &Region::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, DeployError::ResourceCreation { ref reason, .. } if reason.contains("name already taken"))
        );
    }

    #[tokio::test]
    async fn missing_app_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .get_function_app_by_name(&AppRef::new("rg", "ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::NotFound(_)));
    }

    #[tokio::test]
    async fn zip_deploy_status_follows_kudu() {
        let server = MockServer::start().await;
        let archive = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(archive.path(), b"PK\x03\x04").unwrap();

        Mock::given(method("POST"))
            .and(path("/api/zipdeploy"))
            .and(query_param("isAsync", "true"))
            .respond_with(
                ResponseTemplate::new(202).insert_header(
                    "location",
                    format!("{}/api/deployments/latest", server.uri()).as_str(),
                ),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/deployments/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 3,
                "status_text": "build failed"
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let handle = client.deploy_archive(&app(), archive.path()).await.unwrap();
        assert!(handle.location.is_some());
        assert_eq!(
            client.operation_status(&handle).await.unwrap(),
            OperationStatus::Failed("build failed".to_owned())
        );
    }

    #[tokio::test]
    async fn container_switch_converges_on_config() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path_regex("/sites/fnapp1-x/config/web$"))
            .and(body_partial_json(json!({
                "properties": { "linuxFxVersion": "DOCKER|acme/square:1" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("/sites/fnapp1-x/config/web$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": { "linuxFxVersion": "DOCKER|acme/square:1" }
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let handle = client
            .set_container_image(&app(), &ContainerImage::new("acme/square:1"))
            .await
            .unwrap();
        assert_eq!(handle.target.as_deref(), Some("DOCKER|acme/square:1"));
        assert_eq!(
            client.operation_status(&handle).await.unwrap(),
            OperationStatus::Completed
        );
    }

    #[tokio::test]
    async fn runtime_switch_merges_app_settings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex("/config/appsettings/list$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": { "AzureWebJobsStorage": "conn", "FUNCTIONS_WORKER_RUNTIME": "node" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path_regex("/config/appsettings$"))
            .and(body_partial_json(json!({
                "properties": { "AzureWebJobsStorage": "conn", "FUNCTIONS_WORKER_RUNTIME": "python" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path_regex("/config/web$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let handle = client(&server)
            .await
            .set_runtime_stack(&app(), &RuntimeStack::default())
            .await
            .unwrap();
        assert_eq!(handle.kind, OperationKind::RuntimeSwitch);
        assert_eq!(handle.target.as_deref(), Some("python|3.10"));
    }

    #[rstest]
    #[case::running(json!({ "status": "InProgress" }), OperationStatus::InProgress)]
    #[case::succeeded(json!({ "status": "Succeeded" }), OperationStatus::Completed)]
    #[case::failed(
        json!({ "status": "Failed", "error": { "code": "ImagePull", "message": "image pull failed" } }),
        OperationStatus::Failed("image pull failed".to_owned())
    )]
    #[case::canceled(
        json!({ "status": "Canceled" }),
        OperationStatus::Failed("operation Canceled".to_owned())
    )]
    #[tokio::test]
    async fn accepted_switch_reads_async_operation_body(
        #[case] body: Value,
        #[case] expected: OperationStatus,
    ) {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path_regex("/sites/fnapp1-x/config/web$"))
            .respond_with(
                ResponseTemplate::new(202).insert_header(
                    "azure-asyncoperation",
                    format!("{}/operations/42", server.uri()).as_str(),
                ),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let handle = client
            .set_container_image(&app(), &ContainerImage::new("acme/square:1"))
            .await
            .unwrap();
        assert!(handle.location.is_some());
        assert_eq!(client.operation_status(&handle).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn accepted_switch_with_plain_location_completes_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path_regex("/config/web$"))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("location", format!("{}/pending/7", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pending/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": { "linuxFxVersion": "DOCKER|acme/square:1" }
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let handle = client
            .set_container_image(&app(), &ContainerImage::new("acme/square:1"))
            .await
            .unwrap();
        assert_eq!(
            client.operation_status(&handle).await.unwrap(),
            OperationStatus::Completed
        );
    }

    #[tokio::test]
    async fn accepted_create_follows_async_operation() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path_regex("/sites/fnapp1-x$"))
            .respond_with(
                ResponseTemplate::new(202).insert_header(
                    "azure-asyncoperation",
                    format!("{}/operations/create", server.uri()).as_str(),
                ),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "InProgress" })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "Succeeded" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("/sites/fnapp1-x$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(site_json("fnapp1-x", "node|18")))
            .expect(1)
            .mount(&server)
            .await;

        let app = client(&server)
            .await
            .create_function_app(&app_spec())
            .await
            .unwrap();
        assert_eq!(app.name, "fnapp1-x");
    }

    #[tokio::test]
    async fn failed_async_create_is_resource_creation_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(202).insert_header(
                    "azure-asyncoperation",
                    format!("{}/operations/create", server.uri()).as_str(),
                ),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "Failed",
                "error": { "code": "QuotaExceeded", "message": "plan is full" }
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .create_function_app(&app_spec())
            .await
            .unwrap_err();
        assert!(
            matches!(err, DeployError::ResourceCreation { ref reason, .. } if reason == "plan is full")
        );
    }

    #[tokio::test]
    async fn deleting_missing_group_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        client(&server)
            .await
            .delete_resource_group("rgfn_gone")
            .await
            .unwrap();
    }
}
