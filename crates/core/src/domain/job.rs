use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::{Input, Meta, Output};
use super::validation::ValidationResult;

/// サーバーが採番するジョブID（プロセス内で再利用されない）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ジョブ状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Canceled,
    Failed,
    Warning,
    Timeout,
    OutputLimitExceeded,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
            Self::Warning => "warning",
            Self::Timeout => "timeout",
            Self::OutputLimitExceeded => "output_limit_exceeded",
        }
    }

    /// Queued / Running 以外はすべて終端
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }

    /// ライフサイクル上の位置。終端同士は同順位。
    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            _ => 2,
        }
    }

    /// `next` への遷移が後戻りでないか
    pub fn can_advance_to(&self, next: JobState) -> bool {
        if self.is_terminal() {
            return *self == next;
        }
        next.rank() >= self.rank()
    }
}

/// ジョブ種別。`Waiting` はクライアントだけが使うプレースホルダ。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum JobKind {
    Compilation,
    Analysis(Input),
    Waiting,
}

/// ANSI カラー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    Default,
    BrightBlack,
    BrightRed,
    BrightGreen,
    BrightYellow,
    BrightBlue,
    BrightMagenta,
    BrightCyan,
    BrightWhite,
}

/// 色付きテキスト断片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub text: String,
    #[serde(default)]
    pub fg: Option<Color>,
    #[serde(default)]
    pub bg: Option<Color>,
}

/// 解析ジョブの結果データ
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisData {
    #[serde(default)]
    pub meta: Option<Meta>,
    #[serde(default)]
    pub output: Option<Output>,
    #[serde(default)]
    pub reference_output: Option<Output>,
    #[serde(default)]
    pub validation: Option<ValidationResult>,
}

/// ジョブのスナップショット（サーバーが正）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    pub kind: JobKind,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(default)]
    pub analysis_data: Option<AnalysisData>,
}

impl Job {
    /// JobsChanged で中身未着のIDに置くプレースホルダ
    pub fn placeholder(id: JobId) -> Self {
        Self {
            id,
            state: JobState::Queued,
            kind: JobKind::Waiting,
            group_name: None,
            stdout: String::new(),
            spans: vec![],
            analysis_data: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.kind == JobKind::Waiting
    }

    /// 表示用の色付き断片。サーバーが spans を送らない場合は stdout を解析する。
    pub fn display_spans(&self) -> Vec<Span> {
        if self.spans.is_empty() && !self.stdout.is_empty() {
            crate::infra::ansi::parse_ansi(&self.stdout)
        } else {
            self.spans.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder() {
        let job = Job::placeholder(JobId(5));
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.kind, JobKind::Waiting);
        assert!(job.analysis_data.is_none());
        assert!(job.stdout.is_empty());
        assert!(job.spans.is_empty());
        assert!(job.is_placeholder());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        for state in [
            JobState::Succeeded,
            JobState::Canceled,
            JobState::Failed,
            JobState::Warning,
            JobState::Timeout,
            JobState::OutputLimitExceeded,
        ] {
            assert!(state.is_terminal(), "{state:?}");
        }
    }

    #[test]
    fn test_forward_only() {
        assert!(JobState::Queued.can_advance_to(JobState::Running));
        assert!(JobState::Queued.can_advance_to(JobState::Failed));
        assert!(JobState::Running.can_advance_to(JobState::Running));
        assert!(!JobState::Running.can_advance_to(JobState::Queued));
        assert!(!JobState::Succeeded.can_advance_to(JobState::Running));
        assert!(!JobState::Succeeded.can_advance_to(JobState::Failed));
        assert!(JobState::Succeeded.can_advance_to(JobState::Succeeded));
    }

    #[test]
    fn test_display_spans_falls_back_to_stdout() {
        let mut job = Job::placeholder(JobId(1));
        job.stdout = "\u{1b}[31merror\u{1b}[0m".to_string();
        let spans = job.display_spans();
        assert!(spans
            .iter()
            .any(|s| s.text == "error" && s.fg == Some(Color::Red)));
    }
}
