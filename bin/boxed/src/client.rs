//! HTTP client for the control plane API

use anyhow::{bail, Context, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::json;

use boxed_api::handlers::exec::ExecResponse;
use boxed_api::handlers::files::{FilesResponse, UploadResponse};
use boxed_api::handlers::sandbox::{CreateSandboxResponse, ListSandboxesResponse};
use boxed_driver::{FileEntry, FileInjection, SandboxInfo};

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// WebSocket URL for the interactive endpoint.
    pub fn interact_url(&self, id: &str, lang: Option<&str>) -> String {
        let ws_base = self
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        let mut url = format!("{ws_base}/v1/sandbox/{id}/interact");
        let mut params = Vec::new();
        if let Some(lang) = lang {
            params.push(format!("lang={lang}"));
        }
        if let Some(key) = &self.api_key {
            params.push(format!("api_key={key}"));
        }
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.header("X-Boxed-API-Key", key);
        }
        builder
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);
        bail!("server returned {status}: {message}")
    }

    pub async fn create_sandbox(
        &self,
        template: &str,
        timeout: u64,
        context: Vec<FileInjection>,
    ) -> Result<CreateSandboxResponse> {
        let response = self
            .request(Method::POST, "/v1/sandbox")
            .json(&json!({
                "template": template,
                "timeout": timeout,
                "context": context,
            }))
            .send()
            .await
            .context("is the server running?")?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn exec(&self, id: &str, language: &str, code: &str) -> Result<ExecResponse> {
        let response = self
            .request(Method::POST, &format!("/v1/sandbox/{id}/exec"))
            .json(&json!({"language": language, "code": code}))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Returns false when the sandbox was already gone.
    pub async fn stop(&self, id: &str) -> Result<bool> {
        let response = self
            .request(Method::DELETE, &format!("/v1/sandbox/{id}"))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response).await?;
        Ok(true)
    }

    pub async fn list(&self) -> Result<Vec<SandboxInfo>> {
        let response = self
            .request(Method::GET, "/v1/sandbox")
            .send()
            .await
            .context("is the server running?")?;
        let body: ListSandboxesResponse = Self::check(response).await?.json().await?;
        Ok(body.sandboxes)
    }

    pub async fn list_files(&self, id: &str, path: &str) -> Result<Vec<FileEntry>> {
        let response = self
            .request(Method::GET, &format!("/v1/sandbox/{id}/files"))
            .query(&[("path", path)])
            .send()
            .await?;
        let body: FilesResponse = Self::check(response).await?.json().await?;
        Ok(body.files)
    }

    pub async fn upload_file(
        &self,
        id: &str,
        dest_dir: &str,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<UploadResponse> {
        let part = reqwest::multipart::Part::bytes(data).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .text("path", dest_dir.to_string())
            .part("file", part);

        let response = self
            .request(Method::POST, &format!("/v1/sandbox/{id}/files"))
            .multipart(form)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}
