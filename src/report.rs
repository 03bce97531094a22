use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::groups::audit_eligible;
use crate::models::{AuditRecord, DelayLevel, DropoutSet, Group};
use crate::priority;

/// Eligible groups that have no audit yet.
pub fn pending_groups<'a>(groups: &'a [Group], audits: &[AuditRecord]) -> Vec<&'a Group> {
    let audited: HashSet<&str> = audits.iter().map(|audit| audit.group_id.as_str()).collect();
    audit_eligible(groups)
        .filter(|group| !audited.contains(group.group_id.as_str()))
        .collect()
}

pub fn summarize_delays(levels: &[DelayLevel]) -> Vec<(DelayLevel, usize)> {
    let mut counts: BTreeMap<DelayLevel, usize> = BTreeMap::new();
    for level in levels {
        *counts.entry(*level).or_insert(0) += 1;
    }

    let mut summaries: Vec<(DelayLevel, usize)> = counts.into_iter().collect();
    summaries.sort_by(|a, b| b.1.cmp(&a.1));
    summaries
}

fn member_list(group: &Group) -> String {
    group
        .members
        .iter()
        .map(|member| {
            if member.is_dropout {
                format!("{} (dropout)", member.login)
            } else {
                member.login.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn build_report(
    promotion: &str,
    project: &str,
    now: DateTime<Utc>,
    delay_levels: &[DelayLevel],
    groups: &[Group],
    audits: &[AuditRecord],
    dropouts: &DropoutSet,
) -> String {
    let summaries = summarize_delays(delay_levels);
    let pending = pending_groups(groups, audits);
    let evaluations = priority::evaluate_pending(pending.iter().copied(), now);

    let mut output = String::new();

    let _ = writeln!(output, "# Promotion Progress Report");
    let _ = writeln!(
        output,
        "Generated for {} / {} on {}",
        promotion,
        project,
        now.date_naive()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Delay Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No students in this promotion.");
    } else {
        for (level, count) in summaries.iter() {
            let _ = writeln!(output, "- {}: {} students", level, count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Pending Audits");

    if evaluations.is_empty() {
        let _ = writeln!(output, "No finished groups waiting for an audit.");
    } else {
        for evaluation in evaluations.iter() {
            let members = pending
                .iter()
                .find(|group| group.group_id == evaluation.group_id)
                .map(|group| member_list(group))
                .unwrap_or_default();
            let _ = writeln!(
                output,
                "- group {} ({}, score {:.1}): {} [{}]",
                evaluation.group_id,
                evaluation.priority,
                evaluation.priority_score,
                members,
                evaluation.reasons.join("; ")
            );
        }
    }

    let mut audited: Vec<_> = audits
        .iter()
        .map(|audit| priority::evaluate_audit_record(audit, |login| dropouts.contains(login)))
        .collect();
    audited.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.group_id.cmp(&b.group_id))
    });
    let _ = writeln!(output);
    let _ = writeln!(output, "## Audited Groups");

    if audited.is_empty() {
        let _ = writeln!(output, "No audits recorded for this project.");
    } else {
        for result in audited.iter() {
            let _ = writeln!(
                output,
                "- group {} ({}): {:.0}% validated, {} warning(s)",
                result.group_id, result.priority, result.validation_rate, result.warnings_count
            );
        }
    }

    output
}
