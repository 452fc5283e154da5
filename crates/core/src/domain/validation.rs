use serde::{Deserialize, Serialize};

/// 実出力と参照出力の比較結果（バックエンドが算出する）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ValidationResult {
    #[serde(alias = "Correct")]
    CorrectTerminated,
    CorrectNonTerminated { iterations: u64 },
    Mismatch { reason: String },
    TimeOut,
}

/// 画面に出す検証結果。バックエンドの結果に加えて、ジョブ自体が失敗したときの
/// クライアント側 `Failure` を持つ。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Verdict {
    CorrectTerminated,
    CorrectNonTerminated { iterations: u64 },
    Mismatch { reason: String },
    TimeOut,
    Failure { message: String },
}

impl Verdict {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn is_correct(&self) -> bool {
        matches!(
            self,
            Self::CorrectTerminated | Self::CorrectNonTerminated { .. }
        )
    }
}

impl From<ValidationResult> for Verdict {
    fn from(result: ValidationResult) -> Self {
        match result {
            ValidationResult::CorrectTerminated => Self::CorrectTerminated,
            ValidationResult::CorrectNonTerminated { iterations } => {
                Self::CorrectNonTerminated { iterations }
            }
            ValidationResult::Mismatch { reason } => Self::Mismatch { reason },
            ValidationResult::TimeOut => Self::TimeOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_from_validation() {
        let v: Verdict = ValidationResult::Mismatch {
            reason: "x".to_string(),
        }
        .into();
        assert_eq!(
            v,
            Verdict::Mismatch {
                reason: "x".to_string()
            }
        );
        assert!(!v.is_correct());
        assert!(!v.is_failure());
    }

    #[test]
    fn test_verdict_predicates() {
        assert!(Verdict::CorrectNonTerminated { iterations: 3 }.is_correct());
        assert!(Verdict::failure("boom").is_failure());
    }
}
