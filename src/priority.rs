use chrono::{DateTime, Utc};

use crate::models::{AuditRecord, AuditedPriority, Group, PendingPriorityEvaluation, Priority};

const MEMBER_WEIGHT: f64 = 8.0;
const MAX_WEIGHTED_MEMBERS: usize = 5;
const FULL_ROSTER_BONUS: f64 = 15.0;
const DROPOUT_PENALTY: f64 = 20.0;
const URGENT_THRESHOLD: f64 = 60.0;
const WARNING_THRESHOLD: f64 = 35.0;

/// Extra score for a group that has been waiting for an audit.
pub fn staleness_weight(days_waiting: i64) -> f64 {
    match days_waiting {
        i64::MIN..=2 => 0.0,
        3..=6 => 10.0,
        7..=13 => 25.0,
        _ => 40.0,
    }
}

pub fn bucket(score: f64) -> Priority {
    if score >= URGENT_THRESHOLD {
        Priority::Urgent
    } else if score >= WARNING_THRESHOLD {
        Priority::Warning
    } else {
        Priority::Normal
    }
}

/// Scores one finished group that has no audit yet.
pub fn evaluate_pending_group(group: &Group, now: DateTime<Utc>) -> PendingPriorityEvaluation {
    let active = group.active_members();
    let mut reasons = Vec::new();

    if active == 0 {
        reasons.push("no active members".to_string());
        return PendingPriorityEvaluation {
            group_id: group.group_id.clone(),
            priority: Priority::Normal,
            reasons,
            priority_score: 0.0,
        };
    }

    let mut score = active.min(MAX_WEIGHTED_MEMBERS) as f64 * MEMBER_WEIGHT;
    reasons.push(format!("{active} active member(s)"));

    if let Some(since) = group.updated_at {
        let days = (now - since).num_days();
        let weight = staleness_weight(days);
        if weight > 0.0 {
            reasons.push(format!("waiting for {days} day(s)"));
        }
        score += weight;
    }

    let dropouts = group.dropout_count();
    if dropouts == 0 {
        score += FULL_ROSTER_BONUS;
        reasons.push("no dropouts in the roster".to_string());
    } else {
        let ratio = dropouts as f64 / group.members.len() as f64;
        score -= ratio * DROPOUT_PENALTY;
        reasons.push(format!("{dropouts} dropout(s) out of {}", group.members.len()));
    }

    let score = score.max(0.0);
    PendingPriorityEvaluation {
        group_id: group.group_id.clone(),
        priority: bucket(score),
        reasons,
        priority_score: score,
    }
}

/// Scores pending groups, most urgent first.
pub fn evaluate_pending<'a>(
    groups: impl IntoIterator<Item = &'a Group>,
    now: DateTime<Utc>,
) -> Vec<PendingPriorityEvaluation> {
    let mut values: Vec<PendingPriorityEvaluation> = groups
        .into_iter()
        .map(|group| evaluate_pending_group(group, now))
        .collect();
    values.sort_by(|a, b| {
        b.priority_score
            .partial_cmp(&a.priority_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.group_id.cmp(&b.group_id))
    });
    values
}

/// Priority of a group that already has an audit. Independent of the
/// pending score: only warnings and the validation rate count.
pub fn evaluate_audited(
    group_id: &str,
    global_warnings: &[String],
    member_warnings: &[Vec<String>],
    validated_count: usize,
    active_members: usize,
) -> AuditedPriority {
    let warnings_count =
        global_warnings.len() + member_warnings.iter().map(Vec::len).sum::<usize>();
    let validation_rate = if active_members == 0 {
        100.0
    } else {
        validated_count as f64 / active_members as f64 * 100.0
    };

    let priority = if warnings_count > 0 || validation_rate < 30.0 {
        Priority::Urgent
    } else if validation_rate < 50.0 {
        Priority::Warning
    } else {
        Priority::Normal
    };

    AuditedPriority {
        group_id: group_id.to_string(),
        priority,
        validation_rate,
        warnings_count,
    }
}

/// Audited priority from a stored audit, counting only non-dropout results.
pub fn evaluate_audit_record(
    audit: &AuditRecord,
    is_dropout: impl Fn(&str) -> bool,
) -> AuditedPriority {
    let active: Vec<_> = audit
        .results
        .iter()
        .filter(|result| !is_dropout(&result.student_login))
        .collect();
    let validated = active.iter().filter(|result| result.validated).count();
    let member_warnings: Vec<Vec<String>> =
        active.iter().map(|result| result.warnings.clone()).collect();

    evaluate_audited(
        &audit.group_id,
        &audit.global_warnings,
        &member_warnings,
        validated,
        active.len(),
    )
}
