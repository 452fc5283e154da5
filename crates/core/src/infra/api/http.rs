use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{ApiError, Backend, ChunkStream, PushSource};
use crate::domain::job::JobId;
use crate::domain::types::{
    AnalysisExecution, AnalysisRequest, GenerateParams, Input, JobOutput, ReferenceExecution,
};

/// reqwest を使ったバックエンド実装
pub struct HttpBackend {
    client: reqwest::Client,
    api_base: String,
}

impl HttpBackend {
    /// `api_base` は末尾スラッシュなしのオリジン。
    ///
    /// 全体タイムアウトは付けない（SSE と `/jobs/wait` は長時間つながる）。
    pub fn new(api_base: impl Into<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: api_base.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn send_json<Req>(&self, path: &str, body: &Req) -> Result<reqwest::Response, ApiError>
    where
        Req: Serialize + ?Sized + Sync,
    {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        ensure_success(response).await
    }

    async fn post_json<Req, Res>(&self, path: &str, body: &Req) -> Result<Res, ApiError>
    where
        Req: Serialize + ?Sized + Sync,
        Res: DeserializeOwned,
    {
        let response = self.send_json(path, body).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("{path}: {e}")))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else if e.is_decode() {
        ApiError::Decode(e.to_string())
    } else {
        ApiError::Transport(format!("HTTP request failed: {e}"))
    }
}

/// 2xx 以外はボディ文字列付きのエラーにする
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status { status, body })
}

#[async_trait]
impl Backend for HttpBackend {
    async fn generate(&self, params: GenerateParams) -> Result<Input, ApiError> {
        self.post_json("/generate", &params).await
    }

    async fn submit_analysis(
        &self,
        request: AnalysisRequest,
    ) -> Result<Option<AnalysisExecution>, ApiError> {
        self.post_json("/analysis", &request).await
    }

    async fn cancel_job(&self, id: JobId) -> Result<(), ApiError> {
        self.send_json("/jobs/cancel", &id).await?;
        Ok(())
    }

    async fn wait_job(&self, id: JobId) -> Result<Option<JobOutput>, ApiError> {
        self.post_json("/jobs/wait", &id).await
    }

    async fn reference(&self, input: Input) -> Result<ReferenceExecution, ApiError> {
        self.post_json("/reference", &input).await
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[async_trait]
impl PushSource for HttpBackend {
    async fn open(&self, path: &str) -> Result<ChunkStream, ApiError> {
        let response = self
            .client
            .get(self.url(path))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = ensure_success(response).await?;

        log::debug!("push channel opened: {path}");

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(map_reqwest_error))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let backend = HttpBackend::new("http://localhost:3000").unwrap();
        assert_eq!(backend.url("/events"), "http://localhost:3000/events");
        assert_eq!(backend.name(), "http");
    }
}
