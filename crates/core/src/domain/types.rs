use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 解析の種類（バックエンドの環境名と一致する）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Analysis {
    Calculator,
    Parser,
    Compiler,
    Interpreter,
    Security,
    Sign,
}

impl Analysis {
    pub const ALL: [Analysis; 6] = [
        Analysis::Calculator,
        Analysis::Parser,
        Analysis::Compiler,
        Analysis::Interpreter,
        Analysis::Security,
        Analysis::Sign,
    ];

    /// ワイヤ上の識別子
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calculator => "Calculator",
            Self::Parser => "Parser",
            Self::Compiler => "Compiler",
            Self::Interpreter => "Interpreter",
            Self::Security => "Security",
            Self::Sign => "Sign",
        }
    }
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sign => write!(f, "Sign Analysis"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

impl FromStr for Analysis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Analysis::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s) || a.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown analysis: {s}"))
    }
}

/// 解析入力（JSON本体は不透明に扱う）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub analysis: Analysis,
    pub json: serde_json::Value,
}

/// 解析出力
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub analysis: Analysis,
    pub json: serde_json::Value,
}

/// 入力に付随するメタ情報（変数一覧など）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub analysis: Analysis,
    pub json: serde_json::Value,
}

/// 入力のコンテンツハッシュ。バックエンドのキャッシュ用で、クライアントは中身を解釈しない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InputHash {
    pub bytes: [u8; 16],
}

/// `/generate` リクエスト
#[derive(Debug, Clone, Serialize)]
pub struct GenerateParams {
    pub analysis: Analysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// `/analysis` リクエスト
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub analysis: Analysis,
    pub json: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<InputHash>,
}

/// `/analysis` レスポンス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisExecution {
    pub id: super::job::JobId,
}

/// `/reference` レスポンス
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceExecution {
    pub meta: Option<Meta>,
    #[serde(default)]
    pub output: Option<Output>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `/jobs/wait` レスポンス
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    pub output: Output,
    pub validation: super::validation::ValidationResult,
}
