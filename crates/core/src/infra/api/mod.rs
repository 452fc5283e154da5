pub mod http;
pub mod sse;

pub use http::HttpBackend;

use std::future::Future;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::domain::error::AppError;
use crate::domain::job::JobId;
use crate::domain::types::{
    AnalysisExecution, AnalysisRequest, GenerateParams, Input, JobOutput, ReferenceExecution,
};

/// API エラー
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Request aborted")]
    Aborted,
    #[error("Request timeout")]
    Timeout,
}

impl ApiError {
    /// 中断由来のエラーはユーザーに見せない
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Transport(msg) => AppError::transport(msg),
            ApiError::Status { .. } => AppError::http(e.to_string()),
            ApiError::Decode(msg) => AppError::decode(msg),
            ApiError::Aborted => AppError::transport("request aborted"),
            ApiError::Timeout => AppError::timeout("request timeout"),
        }
    }
}

/// バックエンド API trait（HTTP 実装とテスト用モックが実装する）
#[async_trait]
pub trait Backend: Send + Sync {
    /// `/generate`: 解析のデフォルト入力を生成する
    async fn generate(&self, params: GenerateParams) -> Result<Input, ApiError>;

    /// `/analysis`: 解析ジョブを投入する。`None` は投入拒否。
    async fn submit_analysis(
        &self,
        request: AnalysisRequest,
    ) -> Result<Option<AnalysisExecution>, ApiError>;

    /// `/jobs/cancel`
    async fn cancel_job(&self, id: JobId) -> Result<(), ApiError>;

    /// `/jobs/wait`: 終端まで待つ。成功以外は `None`。
    async fn wait_job(&self, id: JobId) -> Result<Option<JobOutput>, ApiError>;

    /// `/reference`: 参照実装の出力とメタ情報
    async fn reference(&self, input: Input) -> Result<ReferenceExecution, ApiError>;

    fn name(&self) -> &str;
}

/// SSE のバイト列ストリーム
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, ApiError>>;

/// プッシュチャネルの取得元
#[async_trait]
pub trait PushSource: Send + Sync {
    async fn open(&self, path: &str) -> Result<ChunkStream, ApiError>;
}

/// トークンがキャンセルされたら future を捨てて `Aborted` を返す。
/// future を drop すると HTTP リクエストも中断される。
pub async fn abortable<T, F>(token: &CancellationToken, fut: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ApiError::Aborted),
        res = fut => res,
    }
}
