use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::models::{fold_key, Group};

/// Minimum share of the CSV logins a group must contain to be accepted.
pub const FUZZY_THRESHOLD: f64 = 0.5;

fn login_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"([A-Za-z0-9][A-Za-z0-9_.\-]*)\s*\(\s*https?://[^)\s]*\s*\)")
            .expect("login pattern is valid")
    })
}

pub fn extract_logins(text: &str) -> BTreeSet<String> {
    login_pattern()
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|login| fold_key(login.as_str()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupMatch<'a> {
    pub group: &'a Group,
    pub kind: MatchKind,
    pub score: f64,
}

fn compare_group_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// Exact set match first, then the largest share of CSV logins at or above
/// [`FUZZY_THRESHOLD`]. Ties go to the smallest group id.
pub fn match_group<'a>(
    logins: &BTreeSet<String>,
    groups: impl IntoIterator<Item = &'a Group>,
) -> Option<GroupMatch<'a>> {
    if logins.is_empty() {
        return None;
    }

    let candidates: Vec<(&Group, BTreeSet<String>)> = groups
        .into_iter()
        .map(|group| (group, group.logins().collect()))
        .collect();

    let exact = candidates
        .iter()
        .filter(|(_, members)| members.len() == logins.len() && members == logins)
        .map(|(group, _)| *group)
        .min_by(|a, b| compare_group_ids(&a.group_id, &b.group_id));
    if let Some(group) = exact {
        return Some(GroupMatch {
            group,
            kind: MatchKind::Exact,
            score: 1.0,
        });
    }

    let mut best: Option<GroupMatch<'a>> = None;
    for (group, members) in &candidates {
        let overlap = logins.intersection(members).count();
        let score = overlap as f64 / logins.len() as f64;
        if score < FUZZY_THRESHOLD {
            continue;
        }
        let better = match &best {
            None => true,
            Some(current) => {
                score > current.score
                    || (score == current.score
                        && compare_group_ids(&group.group_id, &current.group.group_id)
                            == Ordering::Less)
            }
        };
        if better {
            best = Some(GroupMatch {
                group: *group,
                kind: MatchKind::Fuzzy,
                score,
            });
        }
    }
    best
}
