use serde::{Deserialize, Serialize};

use crate::catalog::ProjectCatalog;
use crate::models::{same_key, DelayLevel, ProgressStatus, StudentTracks, TrackState};

const FINISHED_MARKER: &str = "Fin";
const SPECIALTY_MARKER: &str = "spécialité";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawExpected", into = "RawExpected")]
pub enum ExpectedProject {
    /// Curriculum is over; students are validated or not.
    Finished,
    Specialty,
    Project(String),
    Elective {
        rust: Option<String>,
        java: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawExpected {
    Name(String),
    Elective {
        #[serde(default)]
        rust: Option<String>,
        #[serde(default)]
        java: Option<String>,
    },
}

impl From<RawExpected> for ExpectedProject {
    fn from(raw: RawExpected) -> Self {
        match raw {
            RawExpected::Name(name) if name.trim() == FINISHED_MARKER => ExpectedProject::Finished,
            RawExpected::Name(name) if name.trim() == SPECIALTY_MARKER => ExpectedProject::Specialty,
            RawExpected::Name(name) => ExpectedProject::Project(name.trim().to_string()),
            RawExpected::Elective { rust, java } => ExpectedProject::Elective {
                rust: rust.filter(|name| !name.trim().is_empty()),
                java: java.filter(|name| !name.trim().is_empty()),
            },
        }
    }
}

impl From<ExpectedProject> for RawExpected {
    fn from(value: ExpectedProject) -> Self {
        match value {
            ExpectedProject::Finished => RawExpected::Name(FINISHED_MARKER.to_string()),
            ExpectedProject::Specialty => RawExpected::Name(SPECIALTY_MARKER.to_string()),
            ExpectedProject::Project(name) => RawExpected::Name(name),
            ExpectedProject::Elective { rust, java } => RawExpected::Elective { rust, java },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierAnomaly {
    /// The expected project is not in the catalog; the level fell back to `bien`.
    UnknownExpectedProject(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub level: DelayLevel,
    pub anomaly: Option<ClassifierAnomaly>,
}

impl Classification {
    fn level(level: DelayLevel) -> Self {
        Self {
            level,
            anomaly: None,
        }
    }

    fn unknown_target(name: &str) -> Self {
        Self {
            level: DelayLevel::Bien,
            anomaly: Some(ClassifierAnomaly::UnknownExpectedProject(name.to_string())),
        }
    }
}

fn is_chosen(state: &TrackState) -> bool {
    state.project.is_some()
        && !matches!(
            state.status,
            ProgressStatus::NotChosen | ProgressStatus::WithoutGroup
        )
}

fn compare(catalog: &ProjectCatalog, student: Option<&str>, expected: &str) -> Classification {
    let Some(student) = student else {
        return Classification::level(DelayLevel::EnRetard);
    };
    if same_key(student, expected) {
        return Classification::level(DelayLevel::Bien);
    }
    let Some(expected_index) = catalog.global_index(expected) else {
        return Classification::unknown_target(expected);
    };
    let Some(student_index) = catalog.global_index(student) else {
        return Classification::level(DelayLevel::EnRetard);
    };

    let level = match student_index.cmp(&expected_index) {
        std::cmp::Ordering::Greater => DelayLevel::EnAvance,
        std::cmp::Ordering::Less => DelayLevel::EnRetard,
        std::cmp::Ordering::Equal => DelayLevel::Bien,
    };
    Classification::level(level)
}

/// Classifies a student whose tracks were already resolved and normalized.
pub fn classify(
    catalog: &ProjectCatalog,
    expected: &ExpectedProject,
    tracks: &StudentTracks,
) -> Classification {
    let all_tracks_completed = tracks.all_tracks_completed();

    match expected {
        ExpectedProject::Finished => Classification::level(if all_tracks_completed {
            DelayLevel::Valide
        } else {
            DelayLevel::NonValide
        }),
        _ if all_tracks_completed => Classification::level(DelayLevel::Specialite),
        ExpectedProject::Specialty => Classification::level(DelayLevel::Specialite),
        ExpectedProject::Elective { rust, java } => {
            let chosen = if is_chosen(&tracks.rust) {
                Some((&tracks.rust, rust))
            } else if is_chosen(&tracks.java) {
                Some((&tracks.java, java))
            } else {
                None
            };
            match chosen {
                Some((state, Some(target))) => compare(catalog, state.project.as_deref(), target),
                // No elective engaged, or nothing expected on the chosen one.
                _ => Classification::level(DelayLevel::EnRetard),
            }
        }
        ExpectedProject::Project(name) => match catalog.track_of(name) {
            Some(track) => compare(catalog, tracks.get(track).project.as_deref(), name),
            None => {
                tracing::warn!(project = %name, "expected project is not in the catalog");
                Classification::unknown_target(name)
            }
        },
    }
}
