use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::Track;

pub fn fold_key(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn same_key(a: &str, b: &str) -> bool {
    fold_key(a) == fold_key(b)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProgressStatus {
    Setup,
    Working,
    Audit,
    Finished,
    WithoutGroup,
    NotChosen,
    Other(String),
}

impl ProgressStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "setup" => ProgressStatus::Setup,
            "working" => ProgressStatus::Working,
            "audit" => ProgressStatus::Audit,
            "finished" => ProgressStatus::Finished,
            "without group" | "without_group" => ProgressStatus::WithoutGroup,
            "not_chosen" | "not chosen" => ProgressStatus::NotChosen,
            _ => ProgressStatus::Other(value.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProgressStatus::Setup => "setup",
            ProgressStatus::Working => "working",
            ProgressStatus::Audit => "audit",
            ProgressStatus::Finished => "finished",
            ProgressStatus::WithoutGroup => "without group",
            ProgressStatus::NotChosen => "not_chosen",
            ProgressStatus::Other(value) => value,
        }
    }

    /// How far along a project this status is; used to pick between
    /// several entries for the same project.
    pub fn rank(&self) -> u8 {
        match self {
            ProgressStatus::Finished => 5,
            ProgressStatus::Audit => 4,
            ProgressStatus::Working => 3,
            ProgressStatus::Setup => 2,
            ProgressStatus::WithoutGroup => 1,
            ProgressStatus::NotChosen | ProgressStatus::Other(_) => 0,
        }
    }
}

impl From<String> for ProgressStatus {
    fn from(value: String) -> Self {
        ProgressStatus::parse(&value)
    }
}

impl From<ProgressStatus> for String {
    fn from(value: ProgressStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressionEntry {
    pub student_login: String,
    pub project_name: String,
    pub group_status: ProgressStatus,
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackState {
    pub project: Option<String>,
    pub status: ProgressStatus,
    pub all_finished: bool,
}

impl TrackState {
    pub fn not_chosen() -> Self {
        Self {
            project: None,
            status: ProgressStatus::NotChosen,
            all_finished: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentTracks {
    pub golang: TrackState,
    pub javascript: TrackState,
    pub rust: TrackState,
    pub java: TrackState,
}

impl StudentTracks {
    pub fn get(&self, track: Track) -> &TrackState {
        match track {
            Track::Golang => &self.golang,
            Track::Javascript => &self.javascript,
            Track::Rust => &self.rust,
            Track::Java => &self.java,
        }
    }

    /// Golang and Javascript finished, plus one of the electives.
    pub fn all_tracks_completed(&self) -> bool {
        self.golang.all_finished
            && self.javascript.all_finished
            && (self.rust.all_finished || self.java.all_finished)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DelayLevel {
    #[serde(rename = "bien")]
    Bien,
    #[serde(rename = "en retard")]
    EnRetard,
    #[serde(rename = "en avance")]
    EnAvance,
    #[serde(rename = "spécialité")]
    Specialite,
    #[serde(rename = "Validé")]
    Valide,
    #[serde(rename = "Non Validé")]
    NonValide,
}

impl DelayLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            DelayLevel::Bien => "bien",
            DelayLevel::EnRetard => "en retard",
            DelayLevel::EnAvance => "en avance",
            DelayLevel::Specialite => "spécialité",
            DelayLevel::Valide => "Validé",
            DelayLevel::NonValide => "Non Validé",
        }
    }
}

impl fmt::Display for DelayLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DropoutSet(HashSet<String>);

impl DropoutSet {
    pub fn new<I, S>(logins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            logins
                .into_iter()
                .map(|login| fold_key(login.as_ref()))
                .collect(),
        )
    }

    pub fn contains(&self, login: &str) -> bool {
        self.0.contains(&fold_key(login))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMember {
    pub login: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_dropout: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub group_id: String,
    pub project_name: String,
    pub track: Option<Track>,
    pub members: Vec<GroupMember>,
    pub status: ProgressStatus,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Group {
    pub fn active_members(&self) -> usize {
        self.members.iter().filter(|member| !member.is_dropout).count()
    }

    pub fn dropout_count(&self) -> usize {
        self.members.len() - self.active_members()
    }

    /// Finished and still carrying at least one student who did not drop out.
    pub fn is_audit_eligible(&self) -> bool {
        self.status == ProgressStatus::Finished && self.active_members() > 0
    }

    pub fn logins(&self) -> impl Iterator<Item = String> + '_ {
        self.members.iter().map(|member| fold_key(&member.login))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    Warning,
    Urgent,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::Normal => "normal",
            Priority::Warning => "warning",
            Priority::Urgent => "urgent",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingPriorityEvaluation {
    pub group_id: String,
    pub priority: Priority,
    pub reasons: Vec<String>,
    pub priority_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditedPriority {
    pub group_id: String,
    pub priority: Priority,
    pub validation_rate: f64,
    pub warnings_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAudit {
    pub promo_id: i64,
    pub track: Track,
    pub project_name: String,
    pub group_id: String,
    pub auditor_name: Option<String>,
    pub summary: Option<String>,
    pub global_warnings: Vec<String>,
    pub results: Vec<NewAuditResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditResult {
    pub student_login: String,
    pub validated: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Uuid),
    AlreadyExists,
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub id: Uuid,
    pub group_id: String,
    pub global_warnings: Vec<String>,
    pub results: Vec<AuditResultRecord>,
}

#[derive(Debug, Clone)]
pub struct AuditResultRecord {
    pub student_login: String,
    pub validated: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentRecord {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackProgress {
    pub project: Option<String>,
    pub status: ProgressStatus,
    pub completed: bool,
}

/// Denormalized progress fields overwritten on every resync.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentProgress {
    pub login: String,
    pub actual_project_name: Option<String>,
    pub progress_status: ProgressStatus,
    pub delay_level: DelayLevel,
    pub golang: TrackProgress,
    pub javascript: TrackProgress,
    pub rust: TrackProgress,
    pub java: TrackProgress,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PromoResyncSummary {
    pub promotion: String,
    pub updated: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncSummary {
    pub total_promos: usize,
    pub total_students_updated: usize,
    pub total_errors: usize,
    pub archived_promos_skipped: usize,
    pub promotions: Vec<PromoResyncSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_accepts_both_spellings() {
        assert_eq!(ProgressStatus::parse("without_group"), ProgressStatus::WithoutGroup);
        assert_eq!(ProgressStatus::parse("Without Group"), ProgressStatus::WithoutGroup);
        assert_eq!(ProgressStatus::parse("finished"), ProgressStatus::Finished);
        assert_eq!(
            ProgressStatus::parse("archived"),
            ProgressStatus::Other("archived".to_string())
        );
    }

    #[test]
    fn delay_levels_keep_their_external_strings() {
        let json = serde_json::to_string(&DelayLevel::Specialite).unwrap();
        assert_eq!(json, "\"spécialité\"");
        assert_eq!(DelayLevel::EnRetard.as_str(), "en retard");
        assert_eq!(DelayLevel::NonValide.to_string(), "Non Validé");
    }

    #[test]
    fn dropout_membership_ignores_case() {
        let dropouts = DropoutSet::new(["JDoe", " asmith ", "Émile"]);
        assert!(dropouts.contains("jdoe"));
        assert!(dropouts.contains("ASMITH"));
        assert!(dropouts.contains("ÉMILE"));
        assert!(!dropouts.contains("bob"));
    }

    #[test]
    fn keys_fold_beyond_ascii() {
        assert_eq!(fold_key(" ÉCHECS "), "échecs");
        assert!(same_key("Émile", "émile"));
        assert!(!same_key("emile", "émile"));
    }

    #[test]
    fn group_eligibility_requires_finished_and_an_active_member() {
        let member = |login: &str, is_dropout| GroupMember {
            login: login.to_string(),
            first_name: None,
            last_name: None,
            is_dropout,
        };
        let mut group = Group {
            group_id: "1".to_string(),
            project_name: "forum".to_string(),
            track: Some(Track::Golang),
            members: vec![member("a", true), member("b", false)],
            status: ProgressStatus::Finished,
            updated_at: None,
        };
        assert!(group.is_audit_eligible());
        assert_eq!(group.dropout_count(), 1);

        group.members[1].is_dropout = true;
        assert!(!group.is_audit_eligible());

        group.members[1].is_dropout = false;
        group.status = ProgressStatus::Working;
        assert!(!group.is_audit_eligible());
    }
}
