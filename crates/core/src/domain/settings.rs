use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::AppError;

/// クライアント設定（起動時に一度だけ決まる）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// API のオリジン（例: "http://localhost:3000"）。末尾スラッシュなし。
    pub api_base: String,
    /// 入力変更から解析リクエストまでの待ち時間
    pub debounce_ms: u64,
    /// ジョブ待ちのクライアント側タイムアウト（0=無効）
    pub wait_timeout_secs: u64,
    /// ジョブ完了の待ち方
    pub wait_strategy: WaitStrategy,
    /// 再接続の初回待ち時間
    pub reconnect_initial_ms: u64,
    /// 再接続待ち時間の上限
    pub reconnect_max_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    /// `/events` で届くジョブ更新を購読する
    Events,
    /// `/jobs/wait` をロングポーリングする
    LongPoll,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:3000".to_string(),
            debounce_ms: 200,
            wait_timeout_secs: 60,
            wait_strategy: WaitStrategy::Events,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
        }
    }
}

impl ClientSettings {
    pub const ENV_API_BASE: &'static str = "INSPECTIFY_API_BASE";
    pub const ENV_DEBOUNCE_MS: &'static str = "INSPECTIFY_DEBOUNCE_MS";
    pub const ENV_WAIT_TIMEOUT_SECS: &'static str = "INSPECTIFY_WAIT_TIMEOUT_SECS";
    pub const ENV_WAIT_STRATEGY: &'static str = "INSPECTIFY_WAIT_STRATEGY";
    pub const ENV_RECONNECT_INITIAL_MS: &'static str = "INSPECTIFY_RECONNECT_INITIAL_MS";
    pub const ENV_RECONNECT_MAX_MS: &'static str = "INSPECTIFY_RECONNECT_MAX_MS";

    /// 環境変数から読み込む。未設定の項目はデフォルト値。
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意のキー参照から読み込む（テスト用に分離）
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut settings = Self::default();

        if let Some(base) = lookup(Self::ENV_API_BASE) {
            settings.api_base = normalize_base(&base)?;
        }
        if let Some(v) = lookup(Self::ENV_DEBOUNCE_MS) {
            settings.debounce_ms = parse_number(Self::ENV_DEBOUNCE_MS, &v)?;
        }
        if let Some(v) = lookup(Self::ENV_WAIT_TIMEOUT_SECS) {
            settings.wait_timeout_secs = parse_number(Self::ENV_WAIT_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = lookup(Self::ENV_WAIT_STRATEGY) {
            settings.wait_strategy = match v.trim().to_lowercase().as_str() {
                "events" => WaitStrategy::Events,
                "long_poll" | "longpoll" => WaitStrategy::LongPoll,
                other => {
                    return Err(AppError::config(format!(
                        "{}: unknown wait strategy '{other}'",
                        Self::ENV_WAIT_STRATEGY
                    )))
                }
            };
        }
        if let Some(v) = lookup(Self::ENV_RECONNECT_INITIAL_MS) {
            settings.reconnect_initial_ms = parse_number(Self::ENV_RECONNECT_INITIAL_MS, &v)?;
        }
        if let Some(v) = lookup(Self::ENV_RECONNECT_MAX_MS) {
            settings.reconnect_max_ms = parse_number(Self::ENV_RECONNECT_MAX_MS, &v)?;
        }

        if settings.reconnect_max_ms < settings.reconnect_initial_ms {
            settings.reconnect_max_ms = settings.reconnect_initial_ms;
        }

        Ok(settings)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        (self.wait_timeout_secs > 0).then(|| Duration::from_secs(self.wait_timeout_secs))
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

fn normalize_base(raw: &str) -> Result<String, AppError> {
    let base = raw.trim().trim_end_matches('/');
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(AppError::config(format!(
            "{}: expected http(s) URL, got '{raw}'",
            ClientSettings::ENV_API_BASE
        )));
    }
    Ok(base.to_string())
}

fn parse_number(key: &str, value: &str) -> Result<u64, AppError> {
    value
        .trim()
        .parse()
        .map_err(|e| AppError::config(format!("{key}: {e}")))
}
