//! Evaluation reasons attached to flag evaluation events.

use serde::{Deserialize, Serialize};

/// Explains why a flag evaluation produced its value.
///
/// Serialized as a tagged object, e.g. `{"kind": "RULE_MATCH", "ruleIndex": 0,
/// "ruleId": "abc"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
    /// The flag is switched off.
    Off,
    /// No targets or rules matched; the fallthrough variation was served.
    Fallthrough,
    /// The context key was individually targeted.
    TargetMatch,
    /// A targeting rule matched.
    #[serde(rename_all = "camelCase")]
    RuleMatch {
        /// Position of the matched rule.
        rule_index: usize,
        /// Stable identifier of the matched rule.
        rule_id: String,
    },
    /// A prerequisite flag did not return the required variation.
    #[serde(rename_all = "camelCase")]
    PrerequisiteFailed {
        /// Key of the failing prerequisite.
        prerequisite_key: String,
    },
    /// Evaluation failed and the default value was served.
    #[serde(rename_all = "camelCase")]
    Error {
        /// What went wrong.
        error_kind: ErrorKind,
    },
}

/// Failure classes reported in [`EvaluationReason::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The client had no flag data yet.
    ClientNotReady,
    /// The flag key does not exist.
    FlagNotFound,
    /// The flag data could not be interpreted.
    MalformedFlag,
    /// No context was supplied.
    UserNotSpecified,
    /// The caller asked for a type the flag does not return.
    WrongType,
    /// Unexpected failure during evaluation.
    Exception,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn rule_match_uses_camel_case_fields() {
        let reason = EvaluationReason::RuleMatch { rule_index: 2, rule_id: "r-9".to_string() };

        assert_eq!(
            serde_json::to_value(&reason).unwrap(),
            json!({"kind": "RULE_MATCH", "ruleIndex": 2, "ruleId": "r-9"})
        );
    }

    #[test]
    fn error_reason_round_trips() {
        let raw = json!({"kind": "ERROR", "errorKind": "FLAG_NOT_FOUND"});

        let reason: EvaluationReason = serde_json::from_value(raw).unwrap();

        assert_eq!(reason, EvaluationReason::Error { error_kind: ErrorKind::FlagNotFound });
    }

    #[test]
    fn unit_variants_only_carry_kind() {
        assert_eq!(
            serde_json::to_value(EvaluationReason::Fallthrough).unwrap(),
            json!({"kind": "FALLTHROUGH"})
        );
    }
}
