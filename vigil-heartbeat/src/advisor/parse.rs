//! Parses the advisor's reply into the closed action sum.
//!
//! The model is told to answer with a single JSON object; anything the model
//! wraps around it (prose, code fences) is ignored by scanning for the first
//! balanced object. Unknown actions and missing parameters are parse errors,
//! never orders.

use serde::Deserialize;
use thiserror::Error;
use vigil_core::{AdvisorAction, AdvisorDecision};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no JSON object found in reply")]
    NoJson,
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("action '{action}' missing required parameter '{param}'")]
    MissingParam {
        action: &'static str,
        param: &'static str,
    },
    #[error("action '{action}' has non-finite parameter '{param}'")]
    NonFiniteParam {
        action: &'static str,
        param: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct RawReply {
    action: String,
    #[serde(default)]
    params: Option<RawParams>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawParams {
    #[serde(default, alias = "newStopPrice")]
    new_stop_price: Option<f64>,
    #[serde(default, alias = "newTpPrice")]
    new_tp_price: Option<f64>,
    #[serde(default, alias = "fractionOfPosition")]
    fraction_of_position: Option<f64>,
}

/// Parse the model's full reply text into a decision.
pub fn parse_reply(content: &str) -> Result<AdvisorDecision, ParseError> {
    let json = first_balanced_object(content).ok_or(ParseError::NoJson)?;
    let raw: RawReply = serde_json::from_str(json)?;
    let params = raw.params.unwrap_or_default();

    let action = match raw.action.as_str() {
        "hold" => AdvisorAction::Hold,
        "close" => AdvisorAction::Close,
        "tighten_stop" => AdvisorAction::TightenStop {
            new_stop_price: require_finite(
                params.new_stop_price,
                "tighten_stop",
                "newStopPrice",
            )?,
        },
        "adjust_take_profit" => AdvisorAction::AdjustTakeProfit {
            new_tp_price: require_finite(params.new_tp_price, "adjust_take_profit", "newTpPrice")?,
        },
        "partial_close" => AdvisorAction::PartialClose {
            fraction_of_position: require_finite(
                params.fraction_of_position,
                "partial_close",
                "fractionOfPosition",
            )?,
        },
        other => return Err(ParseError::UnknownAction(other.to_string())),
    };

    Ok(AdvisorDecision {
        action,
        reason: raw.reason.unwrap_or_default(),
    })
}

fn require_finite(
    value: Option<f64>,
    action: &'static str,
    param: &'static str,
) -> Result<f64, ParseError> {
    let value = value.ok_or(ParseError::MissingParam { action, param })?;
    if !value.is_finite() {
        return Err(ParseError::NonFiniteParam { action, param });
    }
    Ok(value)
}

/// Locate the first balanced top-level JSON object, honoring string literals
/// and escapes.
fn first_balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_bare_json_object() {
        let decision = parse_reply(
            r#"{"action": "tighten_stop", "params": {"newStopPrice": 2080}, "reason": "lock gains"}"#,
        )
        .unwrap();
        assert_eq!(
            decision.action,
            AdvisorAction::TightenStop {
                new_stop_price: 2080.0
            }
        );
        assert_eq!(decision.reason, "lock gains");
    }

    #[test]
    fn ignores_prose_around_the_object() {
        let reply = "Given the funding flip, I recommend caution.\n\n```json\n{\"action\": \"hold\", \"reason\": \"no edge\"}\n```\nStay safe.";
        let decision = parse_reply(reply).unwrap();
        assert_eq!(decision.action, AdvisorAction::Hold);
    }

    #[test]
    fn accepts_snake_case_param_names() {
        let decision = parse_reply(
            r#"{"action": "partial_close", "params": {"fraction_of_position": 0.5}, "reason": "derisk"}"#,
        )
        .unwrap();
        assert_eq!(
            decision.action,
            AdvisorAction::PartialClose {
                fraction_of_position: 0.5
            }
        );
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let reply = r#"{"action": "hold", "reason": "ranges like {2080, 2140} are stable"}"#;
        let decision = parse_reply(reply).unwrap();
        assert_eq!(decision.reason, "ranges like {2080, 2140} are stable");
    }

    #[test]
    fn unknown_action_is_an_error() {
        let err = parse_reply(r#"{"action": "widen_stop", "reason": "no"}"#).unwrap_err();
        assert!(matches!(err, ParseError::UnknownAction(name) if name == "widen_stop"));
    }

    #[test]
    fn missing_params_are_an_error() {
        let err = parse_reply(r#"{"action": "tighten_stop", "reason": "oops"}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingParam { .. }));
    }

    #[test]
    fn reply_without_json_is_an_error() {
        assert!(matches!(
            parse_reply("I think you should hold."),
            Err(ParseError::NoJson)
        ));
    }

    #[test]
    fn truncated_object_is_an_error() {
        assert!(matches!(
            parse_reply(r#"{"action": "hold", "reason": "cut of"#),
            Err(ParseError::NoJson)
        ));
    }
}
