use serde::Deserialize;
use serde_json::{json, Value};

use insp_core::domain::error::AppError;
use insp_core::domain::job::{Job, JobId};
use insp_core::domain::types::Analysis;

use crate::events::ErrorPayload;
use crate::Shell;

/// コマンドエラー型
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{0}")]
    App(#[from] AppError),
    #[error("invalid command: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown job {0}")]
    UnknownJob(JobId),
}

impl CommandError {
    pub fn payload(&self) -> ErrorPayload {
        match self {
            Self::App(e) => ErrorPayload {
                code: serde_json::to_value(e.code)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
                message: e.message.clone(),
                recoverable: e.recoverable,
            },
            other => ErrorPayload {
                code: "E_COMMAND".to_string(),
                message: other.to_string(),
                recoverable: true,
            },
        }
    }
}

type CmdResult<T> = Result<T, CommandError>;

/// stdin から一行ずつ受け取るコマンド
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SetInput {
        analysis: Analysis,
        json: Value,
    },
    Generate {
        analysis: Analysis,
        #[serde(default)]
        seed: Option<u64>,
    },
    SelectJob {
        job_id: Option<JobId>,
    },
    ShowReference {
        show: bool,
    },
    CancelJob {
        job_id: JobId,
    },
    GetJob {
        job_id: JobId,
    },
    GetResults {
        analysis: Analysis,
    },
    GetMetrics,
}

pub fn parse(line: &str) -> CmdResult<Command> {
    Ok(serde_json::from_str(line)?)
}

// --- Commands ---

pub async fn execute(shell: &Shell, command: Command) -> CmdResult<Value> {
    match command {
        Command::SetInput { analysis, json } => {
            shell.driver(analysis).set_input(json);
            Ok(json!({ "analysis": analysis }))
        }
        Command::Generate { analysis, seed } => {
            let input = shell.driver(analysis).generate(seed).await?;
            Ok(json!({ "analysis": analysis, "input": input }))
        }
        Command::SelectJob { job_id } => {
            shell.service.select_job(job_id);
            Ok(json!({ "selected": job_id }))
        }
        Command::ShowReference { show } => {
            shell.service.set_show_reference(show);
            Ok(json!({ "show_reference": show }))
        }
        Command::CancelJob { job_id } => {
            shell.service.cancel_job(job_id).await?;
            Ok(json!({ "canceled": job_id }))
        }
        Command::GetJob { job_id } => {
            let job = shell
                .service
                .hub()
                .registry()
                .get(job_id)
                .ok_or(CommandError::UnknownJob(job_id))?;
            Ok(serde_json::to_value(with_display_spans(job))?)
        }
        Command::GetResults { analysis } => {
            let driver = shell.driver(analysis);
            Ok(json!({
                "results": driver.results().get(),
                "reference": driver.reference().get(),
                "meta": driver.meta().get(),
            }))
        }
        Command::GetMetrics => Ok(serde_json::to_value(shell.service.metrics())?),
    }
}

/// spans を送らないジョブは stdout の ANSI から組み立てて返す
fn with_display_spans(mut job: Job) -> Job {
    job.spans = job.display_spans();
    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use insp_core::domain::job::{Color, JobState};

    #[test]
    fn test_parse_commands() {
        let cmd = parse(r#"{"command":"set_input","analysis":"Calculator","json":{"expression":"1+2"}}"#)
            .unwrap();
        assert!(matches!(cmd, Command::SetInput { analysis: Analysis::Calculator, .. }));

        let cmd = parse(r#"{"command":"generate","analysis":"Sign"}"#).unwrap();
        assert!(matches!(cmd, Command::Generate { seed: None, .. }));

        let cmd = parse(r#"{"command":"cancel_job","job_id":12}"#).unwrap();
        assert!(matches!(cmd, Command::CancelJob { job_id: JobId(12) }));

        assert!(matches!(parse(r#"{"command":"get_metrics"}"#).unwrap(), Command::GetMetrics));
    }

    #[test]
    fn test_parse_error_payload() {
        let err = parse(r#"{"command":"launch"}"#).unwrap_err();
        let payload = err.payload();
        assert_eq!(payload.code, "E_COMMAND");
        assert!(payload.message.starts_with("invalid command"));
    }

    #[test]
    fn test_get_job_spans_from_stdout() {
        let mut job = Job::placeholder(JobId(4));
        job.state = JobState::Failed;
        job.stdout = "\x1b[31merror\x1b[0m: boom".to_string();

        let job = with_display_spans(job);
        assert_eq!(job.spans[0].text, "error");
        assert_eq!(job.spans[0].fg, Some(Color::Red));
        assert!(job.spans.iter().any(|s| s.text.contains("boom")));
    }

    #[test]
    fn test_app_error_payload() {
        let err = CommandError::from(AppError::transport("refused"));
        let payload = err.payload();
        assert_eq!(payload.code, "E_TRANSPORT");
        assert!(payload.recoverable);
    }
}
