use std::io::Write;

use serde::Serialize;

use insp_core::domain::event::CompilationStatus;
use insp_core::domain::job::{Job, JobId};
use insp_core::domain::types::Analysis;
use insp_core::usecase::hub::ConnectionState;
use insp_core::domain::validation::Verdict;
use insp_core::usecase::io::{DriverPhase, OutputState, Results};

/// イベント名定数
pub const CONNECTION_CHANGED: &str = "connection_changed";
pub const COMPILATION_STATUS: &str = "compilation_status";
pub const JOBS_CHANGED: &str = "jobs_changed";
pub const RESULTS_CHANGED: &str = "results_changed";
pub const SCOREBOARD_CHANGED: &str = "scoreboard_changed";
pub const COMMAND_RESULT: &str = "command_result";
pub const ERROR: &str = "error";

/// stdout に一行一イベントの JSON として書く
#[derive(Serialize)]
struct Envelope<'a, S> {
    event: &'a str,
    timestamp: String,
    payload: S,
}

/// 統一イベント送信関数
pub fn emit_event<S: Serialize>(event_name: &str, payload: S) {
    let envelope = Envelope {
        event: event_name,
        timestamp: chrono::Utc::now().to_rfc3339(),
        payload,
    };
    let line = match serde_json::to_string(&envelope) {
        Ok(line) => line,
        Err(e) => {
            log::error!("イベント変換失敗 [{event_name}]: {e}");
            return;
        }
    };
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{line}") {
        log::error!("イベント送信失敗 [{event_name}]: {e}");
    }
}

/// connection_changed ペイロード
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionChangedPayload {
    pub state: ConnectionState,
}

/// compilation_status ペイロード
#[derive(Debug, Clone, Serialize)]
pub struct CompilationStatusPayload {
    pub status: Option<CompilationStatus>,
    pub ready: bool,
}

/// jobs_changed ペイロード
#[derive(Debug, Clone, Serialize)]
pub struct JobsChangedPayload {
    pub jobs: Vec<JobSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub state: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        use insp_core::domain::job::JobKind;
        Self {
            id: job.id,
            state: job.state.as_str().to_string(),
            kind: match job.kind {
                JobKind::Compilation => "compilation",
                JobKind::Analysis(_) => "analysis",
                JobKind::Waiting => "waiting",
            },
            group_name: job.group_name.clone(),
        }
    }
}

/// results_changed ペイロード
#[derive(Debug, Clone, Serialize)]
pub struct ResultsChangedPayload {
    pub analysis: Analysis,
    pub phase: DriverPhase,
    pub output_state: OutputState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<serde_json::Value>,
    /// 検証が正解かどうか（結果がなければ省略）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct: Option<bool>,
}

impl ResultsChangedPayload {
    pub fn new(analysis: Analysis, phase: DriverPhase, results: &Results) -> Self {
        Self {
            analysis,
            phase,
            output_state: results.output_state,
            job_id: results.job.as_ref().map(|j| j.id),
            output: results.output.as_ref().map(|o| o.json.clone()),
            validation: results
                .validation
                .as_ref()
                .and_then(|v| serde_json::to_value(v).ok()),
            correct: results.validation.as_ref().map(Verdict::is_correct),
        }
    }
}

/// scoreboard_changed ペイロード
#[derive(Debug, Clone, Serialize)]
pub struct ScoreboardChangedPayload {
    pub ranking: Vec<RankingEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_finished: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingEntry {
    pub group: String,
    pub passed: usize,
}

/// error ペイロード
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use insp_core::domain::job::JobState;

    #[test]
    fn test_envelope_shape() {
        let envelope = Envelope {
            event: CONNECTION_CHANGED,
            timestamp: "2024-01-01T00:00:00+00:00".to_string(),
            payload: ConnectionChangedPayload {
                state: ConnectionState::Connected,
            },
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["event"], "connection_changed");
        assert_eq!(json["payload"]["state"], "connected");
    }

    #[test]
    fn test_results_payload() {
        let results = Results {
            input: Some(serde_json::json!("1+2")),
            output_state: OutputState::Stale,
            validation: Some(Verdict::failure("job timed out")),
            ..Results::default()
        };
        let payload =
            ResultsChangedPayload::new(Analysis::Calculator, DriverPhase::Completed, &results);
        assert_eq!(payload.correct, Some(false));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["output_state"], "stale");
        assert_eq!(json["phase"], "completed");
        assert!(json.get("job_id").is_none());

        let empty =
            ResultsChangedPayload::new(Analysis::Calculator, DriverPhase::Idle, &Results::default());
        assert!(empty.correct.is_none());
    }

    #[test]
    fn test_job_summary() {
        let mut job = Job::placeholder(JobId(3));
        job.state = JobState::OutputLimitExceeded;
        let summary = JobSummary::from(&job);
        assert_eq!(summary.kind, "waiting");
        assert_eq!(summary.state, "output_limit_exceeded");
    }
}
