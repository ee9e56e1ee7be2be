//! Wait node evaluation
//!
//! Three modes, checked in this order:
//! - `duration`: suspend for a fixed span measured from the first visit
//! - `until`: suspend until an absolute timestamp (may be a template)
//! - `until_field`: poll a context value every `poll_interval` until it is truthy
//!
//! The deadline computed on the first visit is kept in the context metadata, so
//! re-visiting after a resume, a restart, or an early wake-up never extends it.

use crate::error::NodeError;
use crate::runtime::executor::ExecutionResult;
use crate::runtime::resolver::{resolve_reference, try_resolve};
use crate::workflow::types::{ExecutionContext, Node};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

/// Evaluate a wait node at `now`
pub fn evaluate(
    node: &Node,
    context: &ExecutionContext,
    now: DateTime<Utc>,
    default_poll_interval: Duration,
) -> Result<ExecutionResult, NodeError> {
    let config = &node.config;
    let recorded = context.wait_deadline(&node.id);

    if let Some(duration) = config.get("duration") {
        let deadline = match recorded {
            Some(deadline) => deadline,
            None => {
                let unit = config.get("unit").and_then(Value::as_str);
                let span = parse_duration(duration, unit)?;
                now.checked_add_signed(span)
                    .ok_or_else(|| NodeError::configuration("wait duration is out of range"))?
            }
        };
        return Ok(until_deadline(deadline, now));
    }

    if let Some(until) = config.get("until") {
        let deadline = match recorded {
            Some(deadline) => deadline,
            None => resolve_timestamp(until, context)?,
        };
        return Ok(until_deadline(deadline, now));
    }

    if let Some(field) = config.get("until_field").and_then(Value::as_str) {
        let value = resolve_reference(field, context)?;
        if is_truthy(value.as_ref()) {
            return Ok(ExecutionResult::next(json!({
                "condition_met": true,
                "field": field,
                "checked_at": format_time(now),
            })));
        }

        // Woken before the next poll is due: keep the original deadline
        if let Some(deadline) = recorded.filter(|d| now < *d) {
            return Ok(suspended(deadline, json!({ "field": field })));
        }

        let poll = match config.get("poll_interval") {
            Some(value) => parse_duration(value, None)?,
            None => default_poll_interval,
        };
        if poll <= Duration::zero() {
            return Err(NodeError::configuration("wait 'poll_interval' must be positive"));
        }
        let next_check = now
            .checked_add_signed(poll)
            .ok_or_else(|| NodeError::configuration("wait poll interval is out of range"))?;
        return Ok(suspended(next_check, json!({ "field": field })));
    }

    Err(NodeError::configuration(format!(
        "wait node '{}' requires 'duration', 'until' or 'until_field'",
        node.id
    )))
}

fn until_deadline(deadline: DateTime<Utc>, now: DateTime<Utc>) -> ExecutionResult {
    if now >= deadline {
        ExecutionResult::next(json!({
            "waited_until": format_time(deadline),
            "resumed_at": format_time(now),
        }))
    } else {
        suspended(deadline, json!({}))
    }
}

fn suspended(resume_at: DateTime<Utc>, mut output: Value) -> ExecutionResult {
    if let Value::Object(map) = &mut output {
        map.insert("waiting".into(), Value::Bool(true));
        map.insert("resume_at".into(), Value::String(format_time(resume_at)));
    }
    ExecutionResult::suspend(output, resume_at)
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn resolve_timestamp(value: &Value, context: &ExecutionContext) -> Result<DateTime<Utc>, NodeError> {
    let raw = match value {
        Value::String(raw) => raw,
        other => {
            return Err(NodeError::resolution(format!(
                "wait 'until' must be a timestamp string, got {other}"
            )))
        }
    };
    match try_resolve(raw, context)? {
        Some(Value::String(resolved)) => parse_timestamp(&resolved).ok_or_else(|| {
            NodeError::resolution(format!("wait 'until' value '{resolved}' is not a timestamp"))
        }),
        Some(other) => Err(NodeError::resolution(format!(
            "wait 'until' resolved to non-timestamp {other}"
        ))),
        None => Err(NodeError::resolution(format!("wait 'until' '{raw}' resolved to nothing"))),
    }
}

/// Parse RFC 3339, a naive `YYYY-MM-DD[ T]HH:MM:SS` (taken as UTC), or a bare date
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn unit_seconds(unit: &str) -> Option<f64> {
    Some(match unit.to_ascii_lowercase().as_str() {
        "ms" | "millisecond" | "milliseconds" => 0.001,
        "s" | "sec" | "secs" | "second" | "seconds" => 1.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600.0,
        "d" | "day" | "days" => 86_400.0,
        "w" | "week" | "weeks" => 604_800.0,
        _ => return None,
    })
}

fn span(amount: f64, seconds_per_unit: f64) -> Result<Duration, NodeError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(NodeError::configuration(format!(
            "wait duration must be a non-negative number, got {amount}"
        )));
    }
    let millis = (amount * seconds_per_unit * 1000.0).round();
    if millis > i64::MAX as f64 / 2.0 {
        return Err(NodeError::configuration("wait duration is out of range"));
    }
    Ok(Duration::milliseconds(millis as i64))
}

/// Parse a wait duration
///
/// Accepts a number (in `unit`, seconds by default), a string such as `"90s"`,
/// `"1h30m"` or `"7 days"`, or an object like `{ "days": 2, "hours": 4 }`.
pub fn parse_duration(value: &Value, unit: Option<&str>) -> Result<Duration, NodeError> {
    let seconds_per_unit = match unit {
        Some(unit) => unit_seconds(unit)
            .ok_or_else(|| NodeError::configuration(format!("unknown duration unit '{unit}'")))?,
        None => 1.0,
    };

    match value {
        Value::Number(n) => span(n.as_f64().unwrap_or(f64::NAN), seconds_per_unit),
        Value::String(raw) => match raw.trim().parse::<f64>() {
            Ok(amount) => span(amount, seconds_per_unit),
            Err(_) => parse_duration_text(raw),
        },
        Value::Object(parts) => {
            let mut total = Duration::zero();
            for (key, amount) in parts {
                let per_unit = unit_seconds(key).ok_or_else(|| {
                    NodeError::configuration(format!("unknown duration unit '{key}'"))
                })?;
                let amount = amount.as_f64().ok_or_else(|| {
                    NodeError::configuration(format!("duration '{key}' must be a number"))
                })?;
                total = total
                    .checked_add(&span(amount, per_unit)?)
                    .ok_or_else(|| NodeError::configuration("wait duration is out of range"))?;
            }
            Ok(total)
        }
        other => Err(NodeError::configuration(format!(
            "unsupported wait duration {other}"
        ))),
    }
}

fn parse_duration_text(raw: &str) -> Result<Duration, NodeError> {
    let invalid = || NodeError::configuration(format!("invalid wait duration '{raw}'"));
    let mut total = Duration::zero();
    let mut rest = raw.trim();
    if rest.is_empty() {
        return Err(invalid());
    }

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid());
        }
        let amount: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = rest[number_len..].trim_start();

        let unit_len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let per_unit = unit_seconds(&rest[..unit_len]).ok_or_else(invalid)?;
        rest = rest[unit_len..].trim_start();

        total = total
            .checked_add(&span(amount, per_unit)?)
            .ok_or_else(invalid)?;
    }
    Ok(total)
}

/// JSON truthiness used by `until_field`
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => {
            let s = s.trim();
            !(s.is_empty() || s.eq_ignore_ascii_case("false") || s == "0")
        }
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::executor::Transition;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn wait_node(config: Value) -> Node {
        serde_json::from_value(json!({ "id": "pause", "type": "wait", "config": config })).unwrap()
    }

    #[test]
    fn duration_forms() {
        assert_eq!(parse_duration(&json!(90), None).unwrap(), Duration::seconds(90));
        assert_eq!(parse_duration(&json!(2), Some("days")).unwrap(), Duration::days(2));
        assert_eq!(parse_duration(&json!("15m"), None).unwrap(), Duration::minutes(15));
        assert_eq!(parse_duration(&json!("1h30m"), None).unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration(&json!("7 days"), None).unwrap(), Duration::days(7));
        assert_eq!(parse_duration(&json!("2w"), None).unwrap(), Duration::weeks(2));
        assert_eq!(
            parse_duration(&json!({ "days": 1, "hours": 2 }), None).unwrap(),
            Duration::hours(26)
        );
        assert_eq!(parse_duration(&json!("0.5"), Some("h")).unwrap(), Duration::minutes(30));
    }

    #[test]
    fn bad_durations_are_configuration_errors() {
        for value in [json!("soon"), json!(-5), json!("10 fortnights"), json!(true), json!("")] {
            assert!(
                matches!(parse_duration(&value, None), Err(NodeError::Configuration(_))),
                "{value}"
            );
        }
        assert!(parse_duration(&json!(1), Some("parsecs")).is_err());
    }

    #[test]
    fn duration_wait_suspends_then_continues_from_recorded_deadline() {
        let node = wait_node(json!({ "duration": 3600 }));
        let mut ctx = ExecutionContext::default();

        let first = evaluate(&node, &ctx, now(), Duration::hours(1)).unwrap();
        let deadline = now() + Duration::hours(1);
        assert_eq!(first.transition, Transition::Suspend { resume_at: deadline });

        ctx.set_wait_deadline("pause", deadline);
        // an early wake-up must not push the deadline further out
        let early = evaluate(&node, &ctx, now() + Duration::minutes(10), Duration::hours(1)).unwrap();
        assert_eq!(early.transition, Transition::Suspend { resume_at: deadline });

        let due = evaluate(&node, &ctx, deadline, Duration::hours(1)).unwrap();
        assert_eq!(due.transition, Transition::Next);
    }

    #[test]
    fn zero_duration_and_past_until_continue_immediately() {
        let ctx = ExecutionContext::default();
        let zero = evaluate(&wait_node(json!({ "duration": 0 })), &ctx, now(), Duration::hours(1)).unwrap();
        assert_eq!(zero.transition, Transition::Next);

        let past = evaluate(
            &wait_node(json!({ "until": "2020-01-01T00:00:00Z" })),
            &ctx,
            now(),
            Duration::hours(1),
        )
        .unwrap();
        assert_eq!(past.transition, Transition::Next);
    }

    #[test]
    fn until_resolves_templates() {
        let mut ctx = ExecutionContext::default();
        ctx.trigger_data.insert("start_date".into(), json!("2024-05-03"));
        let node = wait_node(json!({ "until": "{{trigger.start_date}}" }));
        let result = evaluate(&node, &ctx, now(), Duration::hours(1)).unwrap();
        assert_eq!(
            result.transition,
            Transition::Suspend {
                resume_at: Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap()
            }
        );

        let bad = wait_node(json!({ "until": "{{trigger.missing}}" }));
        assert!(matches!(
            evaluate(&bad, &ctx, now(), Duration::hours(1)),
            Err(NodeError::Resolution(_))
        ));
    }

    #[test]
    fn until_field_polls_until_truthy() {
        let mut ctx = ExecutionContext::default();
        let node = wait_node(json!({ "until_field": "trigger.signed", "poll_interval": "30m" }));

        let pending = evaluate(&node, &ctx, now(), Duration::hours(1)).unwrap();
        assert_eq!(
            pending.transition,
            Transition::Suspend { resume_at: now() + Duration::minutes(30) }
        );

        ctx.trigger_data.insert("signed".into(), json!(true));
        let met = evaluate(&node, &ctx, now(), Duration::hours(1)).unwrap();
        assert_eq!(met.transition, Transition::Next);
        assert_eq!(met.output["condition_met"], true);
    }

    #[test]
    fn wait_without_mode_is_configuration_error() {
        let result = evaluate(&wait_node(json!({})), &ExecutionContext::default(), now(), Duration::hours(1));
        assert!(matches!(result, Err(NodeError::Configuration(_))));
    }

    #[test]
    fn timestamps_and_truthiness() {
        assert!(parse_timestamp("2024-05-01T09:00:00+02:00").is_some());
        assert!(parse_timestamp("2024-05-01 09:00:00").is_some());
        assert!(parse_timestamp("May first").is_none());
        assert!(is_truthy(Some(&json!("yes"))));
        assert!(!is_truthy(Some(&json!("false"))));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(None));
    }
}
