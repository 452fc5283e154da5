use serde::Serialize;

/// クライアント共通エラーコード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "E_TRANSPORT")]
    Transport,
    #[serde(rename = "E_HTTP")]
    Http,
    #[serde(rename = "E_DECODE")]
    Decode,
    #[serde(rename = "E_TIMEOUT")]
    Timeout,
    #[serde(rename = "E_CONFIG")]
    Config,
}

/// クライアントエラー（UI に出せる形）
#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
}

impl AppError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Transport,
            message: msg.into(),
            recoverable: true,
        }
    }

    pub fn http(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Http,
            message: msg.into(),
            recoverable: true,
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Decode,
            message: msg.into(),
            recoverable: true,
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Timeout,
            message: msg.into(),
            recoverable: true,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Config,
            message: msg.into(),
            recoverable: false,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}
