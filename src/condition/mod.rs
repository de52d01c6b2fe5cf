//! Policy condition evaluator (C4).

pub mod cidr;
pub mod time_range;

use chrono::{DateTime, Utc};
use meridian_proto::condition::{ClientContext, Condition, Operator, Property};

#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    /// All conditions hold. Carries the instant past which the *current*
    /// allowed window no longer holds — `subject_expiry` if no time
    /// condition is tighter.
    Ok { valid_until: DateTime<Utc> },
    /// At least one condition failed; lists every violated property.
    Violated { violated: Vec<Property> },
}

/// Evaluate every condition on a policy against a client's current context.
#[must_use]
pub fn evaluate(conditions: &[Condition], ctx: &ClientContext, subject_expiry: DateTime<Utc>) -> EvalOutcome {
    let mut violated = Vec::new();
    let mut tightest_window_end: Option<DateTime<Utc>> = None;

    for condition in conditions {
        match eval_one(condition, ctx) {
            ConditionResult::Ok { window_end } => {
                if let Some(end) = window_end {
                    tightest_window_end = Some(match tightest_window_end {
                        Some(current) => current.min(end),
                        None => end,
                    });
                }
            }
            ConditionResult::Violated => violated.push(condition.property),
        }
    }

    if !violated.is_empty() {
        return EvalOutcome::Violated { violated };
    }

    let valid_until = match tightest_window_end {
        Some(end) => end.min(subject_expiry),
        None => subject_expiry,
    };
    EvalOutcome::Ok { valid_until }
}

enum ConditionResult {
    Ok { window_end: Option<DateTime<Utc>> },
    Violated,
}

fn eval_one(condition: &Condition, ctx: &ClientContext) -> ConditionResult {
    match condition.property {
        Property::RemoteIpLocationRegion => {
            let member = ctx
                .remote_region
                .as_deref()
                .is_some_and(|region| condition.values.iter().any(|v| v == region));
            let ok = match condition.operator {
                Operator::IsIn => member,
                Operator::IsNotIn => !member,
                _ => false,
            };
            bool_result(ok)
        }
        Property::RemoteIp => {
            let Ok(nets) = cidr::parse_all(&condition.values) else {
                return ConditionResult::Violated;
            };
            let member = cidr::is_in_any(ctx.remote_ip, &nets);
            let ok = match condition.operator {
                Operator::IsInCidr => member,
                Operator::IsNotInCidr => !member,
                _ => false,
            };
            bool_result(ok)
        }
        Property::ProviderId => {
            let member = ctx.provider_id.is_some_and(|pid| {
                condition.values.iter().any(|v| v.parse::<uuid::Uuid>().map(|u| u == pid.0).unwrap_or(false))
            });
            let ok = match condition.operator {
                Operator::IsIn => member,
                Operator::IsNotIn => !member,
                _ => false,
            };
            bool_result(ok)
        }
        Property::ClientVerified => {
            let wants_true = condition.values.first().map(|v| v == "true").unwrap_or(false);
            let ok = match condition.operator {
                Operator::Is => ctx.client_verified == wants_true,
                Operator::IsNot => ctx.client_verified != wants_true,
                _ => false,
            };
            bool_result(ok)
        }
        Property::CurrentUtcDatetime => {
            let Ok(windows) = time_range::parse_all(&condition.values) else {
                return ConditionResult::Violated;
            };
            match time_range::evaluate(&windows, ctx.now) {
                Some(window_end) => ConditionResult::Ok { window_end },
                None => ConditionResult::Violated,
            }
        }
    }
}

fn bool_result(ok: bool) -> ConditionResult {
    if ok {
        ConditionResult::Ok { window_end: None }
    } else {
        ConditionResult::Violated
    }
}

/// Among candidate `(policy_id, conditions)` pairs that all pass, pick the
/// one whose window ends latest (but never later than `subject_expiry`),
/// breaking ties by policy id lexicographically.
#[must_use]
pub fn longest_conforming<'a>(
    candidates: &'a [(meridian_proto::PolicyId, &'a [Condition])],
    ctx: &ClientContext,
    subject_expiry: DateTime<Utc>,
) -> Option<(meridian_proto::PolicyId, DateTime<Utc>)> {
    let mut best: Option<(meridian_proto::PolicyId, DateTime<Utc>)> = None;
    for (policy_id, conditions) in candidates {
        if let EvalOutcome::Ok { valid_until } = evaluate(conditions, ctx, subject_expiry) {
            best = Some(match best {
                Some((best_id, best_until)) => {
                    if valid_until > best_until || (valid_until == best_until && policy_id.to_string() < best_id.to_string()) {
                        (*policy_id, valid_until)
                    } else {
                        (best_id, best_until)
                    }
                }
                None => (*policy_id, valid_until),
            });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use meridian_proto::condition::{ClientContext, Condition, Operator, Property};

    fn ctx(now: DateTime<Utc>) -> ClientContext {
        ClientContext {
            remote_ip: "10.0.0.5".parse().unwrap(),
            remote_region: Some("US".to_string()),
            provider_id: None,
            client_verified: true,
            now,
        }
    }

    #[test]
    fn all_conditions_hold_returns_ok() {
        let conditions = vec![
            Condition::new(Property::RemoteIpLocationRegion, Operator::IsIn, vec!["US".into()]).unwrap(),
            Condition::new(Property::ClientVerified, Operator::Is, vec!["true".into()]).unwrap(),
        ];
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let expiry = now + chrono::Duration::hours(1);
        let outcome = evaluate(&conditions, &ctx(now), expiry);
        assert_eq!(outcome, EvalOutcome::Ok { valid_until: expiry });
    }

    #[test]
    fn collects_all_violated_properties() {
        let conditions = vec![
            Condition::new(Property::RemoteIpLocationRegion, Operator::IsIn, vec!["CA".into()]).unwrap(),
            Condition::new(Property::ClientVerified, Operator::Is, vec!["false".into()]).unwrap(),
        ];
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let outcome = evaluate(&conditions, &ctx(now), now);
        match outcome {
            EvalOutcome::Violated { violated } => {
                assert_eq!(violated.len(), 2);
            }
            EvalOutcome::Ok { .. } => panic!("expected violation"),
        }
    }

    #[test]
    fn time_window_tightens_valid_until() {
        // Wednesday 2024-01-03, window 09:00-17:00.
        let conditions = vec![
            Condition::new(
                Property::CurrentUtcDatetime,
                Operator::IsInDayOfWeekTimeRanges,
                vec!["W/09:00-17:00".into()],
            )
            .unwrap(),
        ];
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap();
        let subject_expiry = now + chrono::Duration::days(1);
        let outcome = evaluate(&conditions, &ctx(now), subject_expiry);
        match outcome {
            EvalOutcome::Ok { valid_until } => {
                assert!(valid_until < subject_expiry);
            }
            EvalOutcome::Violated { .. } => panic!("expected ok"),
        }
    }
}
