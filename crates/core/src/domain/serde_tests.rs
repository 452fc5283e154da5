#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::domain::error::{AppError, ErrorCode};
    use crate::domain::event::{Event, GroupStatus, PublicEvent};
    use crate::domain::job::{Color, JobId, JobKind, JobState};
    use crate::domain::types::{Analysis, AnalysisRequest, GenerateParams, JobOutput};
    use crate::domain::validation::{ValidationResult, Verdict};

    #[test]
    fn test_analysis_serialization() {
        assert_eq!(
            serde_json::to_string(&Analysis::Calculator).unwrap(),
            "\"Calculator\""
        );
        assert_eq!(
            serde_json::from_str::<Analysis>("\"Sign\"").unwrap(),
            Analysis::Sign
        );
    }

    #[test]
    fn test_job_state_serialization() {
        assert_eq!(
            serde_json::to_string(&JobState::OutputLimitExceeded).unwrap(),
            "\"OutputLimitExceeded\""
        );
        assert_eq!(
            serde_json::from_str::<JobState>("\"Succeeded\"").unwrap(),
            JobState::Succeeded
        );
    }

    #[test]
    fn test_job_id_is_bare_number() {
        assert_eq!(serde_json::to_string(&JobId(42)).unwrap(), "42");
    }

    #[test]
    fn test_event_reset() {
        let event: Event = serde_json::from_value(json!({ "type": "Reset" })).unwrap();
        assert_eq!(event, Event::Reset);
    }

    #[test]
    fn test_event_job_changed() {
        let event: Event = serde_json::from_value(json!({
            "type": "JobChanged",
            "value": {
                "job": {
                    "id": 7,
                    "state": "Running",
                    "kind": { "kind": "Analysis", "data": { "analysis": "Parser", "json": { "x": 1 } } },
                    "stdout": "\u{1b}[31merr\u{1b}[0m",
                    "spans": [{ "text": "err", "fg": "Red", "bg": null }]
                }
            }
        }))
        .unwrap();

        let Event::JobChanged { job } = event else {
            panic!("unexpected event");
        };
        assert_eq!(job.id, JobId(7));
        assert_eq!(job.state, JobState::Running);
        assert!(matches!(job.kind, JobKind::Analysis(ref input) if input.analysis == Analysis::Parser));
        assert_eq!(job.spans[0].fg, Some(Color::Red));
        assert!(job.group_name.is_none());
        assert!(job.analysis_data.is_none());
    }

    #[test]
    fn test_event_compilation_status_null() {
        let event: Event = serde_json::from_value(json!({
            "type": "CompilationStatus",
            "value": { "status": null }
        }))
        .unwrap();
        assert_eq!(event, Event::CompilationStatus { status: None });
    }

    #[test]
    fn test_event_jobs_changed() {
        let event: Event = serde_json::from_value(json!({
            "type": "JobsChanged",
            "value": { "jobs": [3, 1, 2] }
        }))
        .unwrap();
        assert_eq!(
            event,
            Event::JobsChanged {
                jobs: vec![JobId(3), JobId(1), JobId(2)]
            }
        );
    }

    #[test]
    fn test_unknown_event_type_is_error() {
        let res = serde_json::from_value::<Event>(json!({ "type": "Teleport" }));
        assert!(res.is_err());
    }

    #[test]
    fn test_public_state_changed() {
        let event: PublicEvent = serde_json::from_value(json!({
            "type": "StateChanged",
            "value": {
                "last_finished": "2024-05-01T12:00:00+02:00",
                "analysis": [{ "analysis": "Sign", "programs": [null] }],
                "groups": [{
                    "name": "g1",
                    "analysis_results": [{
                        "analysis": "Sign",
                        "status": "Finished",
                        "results": [{ "state": "Succeeded" }, { "state": "Failed" }]
                    }]
                }]
            }
        }))
        .unwrap();

        let PublicEvent::StateChanged(state) = event else {
            panic!("unexpected event");
        };
        assert!(state.last_finished.is_some());
        assert_eq!(state.analysis[0].programs, vec![None]);
        assert_eq!(state.groups[0].analysis_results[0].status, GroupStatus::Finished);
        assert_eq!(state.groups[0].passed(), 1);
    }

    #[test]
    fn test_validation_result_correct_alias() {
        let v: ValidationResult = serde_json::from_value(json!({ "type": "Correct" })).unwrap();
        assert_eq!(v, ValidationResult::CorrectTerminated);

        let v: ValidationResult =
            serde_json::from_value(json!({ "type": "CorrectNonTerminated", "iterations": 10 }))
                .unwrap();
        assert_eq!(v, ValidationResult::CorrectNonTerminated { iterations: 10 });
    }

    #[test]
    fn test_verdict_failure_serialization() {
        let json = serde_json::to_value(Verdict::failure("boom")).unwrap();
        assert_eq!(json, json!({ "type": "Failure", "message": "boom" }));
    }

    #[test]
    fn test_job_output_deserialization() {
        let out: JobOutput = serde_json::from_value(json!({
            "output": { "analysis": "Calculator", "json": { "result": "3" } },
            "validation": { "type": "Mismatch", "reason": "wrong result" }
        }))
        .unwrap();
        assert_eq!(
            out.validation,
            ValidationResult::Mismatch {
                reason: "wrong result".to_string()
            }
        );
    }

    #[test]
    fn test_request_skips_missing_options() {
        let params = GenerateParams {
            analysis: Analysis::Interpreter,
            seed: None,
        };
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({ "analysis": "Interpreter" })
        );

        let req = AnalysisRequest {
            analysis: Analysis::Compiler,
            json: json!({ "commands": "skip" }),
            hash: None,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({ "analysis": "Compiler", "json": { "commands": "skip" } })
        );
    }

    #[test]
    fn test_app_error_serialization() {
        let err = AppError::decode("bad frame");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("E_DECODE"));
        assert!(json.contains("bad frame"));
        assert!(json.contains("\"recoverable\":true"));
    }

    #[test]
    fn test_error_code_values() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::Transport).unwrap(),
            "\"E_TRANSPORT\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::Config).unwrap(),
            "\"E_CONFIG\""
        );
    }
}
