use std::collections::HashMap;

use thiserror::Error;

use crate::catalog::{ProjectCatalog, Track};
use crate::models::{fold_key, same_key, ProgressStatus, ProgressionEntry, StudentTracks, TrackState};

#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("progression entry for group {group_id} has no project name")]
    MissingProjectName { group_id: String },
    #[error("progression entry belongs to {found}, expected {expected}")]
    ForeignEntry { expected: String, found: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectiveChoice {
    Rust,
    Java,
    Neither,
    /// Both electives show activity. Left unresolved for the caller.
    Conflict,
}

fn index_entries(entries: &[ProgressionEntry]) -> HashMap<String, &ProgressStatus> {
    let mut by_project: HashMap<String, &ProgressStatus> = HashMap::new();
    for entry in entries {
        let key = fold_key(&entry.project_name);
        by_project
            .entry(key)
            .and_modify(|current| {
                if entry.group_status.rank() > current.rank() {
                    *current = &entry.group_status;
                }
            })
            .or_insert(&entry.group_status);
    }
    by_project
}

/// Resolves the active (or last finished) project of one track.
pub fn resolve_track(
    catalog: &ProjectCatalog,
    track: Track,
    entries: &[ProgressionEntry],
) -> TrackState {
    let by_project = index_entries(entries);
    let mut last_finished: Option<&str> = None;
    let mut active: Option<(&str, ProgressStatus)> = None;
    let mut first_unfinished: Option<&str> = None;
    let mut all_finished = true;

    for project in catalog.projects(track) {
        match by_project.get(&fold_key(&project.name)) {
            Some(status) if **status == ProgressStatus::Finished => {
                last_finished = Some(project.name.as_str());
            }
            Some(status) => {
                all_finished = false;
                if active.is_none() {
                    active = Some((project.name.as_str(), (*status).clone()));
                }
            }
            None => {
                all_finished = false;
                if first_unfinished.is_none() {
                    first_unfinished = Some(project.name.as_str());
                }
            }
        }
    }

    if all_finished {
        // An empty track lands here too, with no project at all.
        return TrackState {
            project: last_finished.map(str::to_string),
            status: ProgressStatus::Finished,
            all_finished: true,
        };
    }

    match active {
        Some((name, status)) => TrackState {
            project: Some(name.to_string()),
            status,
            all_finished: false,
        },
        None => TrackState {
            project: first_unfinished.map(str::to_string),
            status: ProgressStatus::WithoutGroup,
            all_finished: false,
        },
    }
}

pub fn resolve_student(
    catalog: &ProjectCatalog,
    login: &str,
    entries: &[ProgressionEntry],
) -> Result<StudentTracks, ResolveError> {
    for entry in entries {
        if entry.project_name.trim().is_empty() {
            return Err(ResolveError::MissingProjectName {
                group_id: entry.group_id.clone(),
            });
        }
        if !same_key(&entry.student_login, login) {
            return Err(ResolveError::ForeignEntry {
                expected: login.to_string(),
                found: entry.student_login.clone(),
            });
        }
    }

    Ok(StudentTracks {
        golang: resolve_track(catalog, Track::Golang, entries),
        javascript: resolve_track(catalog, Track::Javascript, entries),
        rust: resolve_track(catalog, Track::Rust, entries),
        java: resolve_track(catalog, Track::Java, entries),
    })
}

/// A track counts as touched once the student moved past its first project
/// or got any status other than "without group" on it.
fn is_touched(catalog: &ProjectCatalog, track: Track, state: &TrackState) -> bool {
    let first = catalog.first_project(track).map(|project| project.name.as_str());
    let moved = match (state.project.as_deref(), first) {
        (Some(project), Some(first)) => !same_key(project, first),
        (None, None) => false,
        _ => true,
    };
    moved || state.status != ProgressStatus::WithoutGroup
}

pub fn normalize_electives(catalog: &ProjectCatalog, tracks: &mut StudentTracks) -> ElectiveChoice {
    let rust_active = is_touched(catalog, Track::Rust, &tracks.rust);
    let java_active = is_touched(catalog, Track::Java, &tracks.java);

    match (rust_active, java_active) {
        (true, false) => {
            tracks.java = TrackState::not_chosen();
            ElectiveChoice::Rust
        }
        (false, true) => {
            tracks.rust = TrackState::not_chosen();
            ElectiveChoice::Java
        }
        (false, false) => {
            tracks.rust = TrackState::not_chosen();
            tracks.java = TrackState::not_chosen();
            ElectiveChoice::Neither
        }
        (true, true) => ElectiveChoice::Conflict,
    }
}

/// The project shown as the student's current one: first unfinished track
/// among Golang, Javascript and the chosen elective(s).
pub fn current_project(tracks: &StudentTracks) -> (Option<String>, ProgressStatus) {
    let mut last_finished: Option<&str> = None;
    for track in Track::ALL {
        let state = tracks.get(track);
        if state.status == ProgressStatus::NotChosen {
            continue;
        }
        if !state.all_finished {
            return (state.project.clone(), state.status.clone());
        }
        if state.project.is_some() {
            last_finished = state.project.as_deref();
        }
    }
    (
        last_finished.map(str::to_string),
        ProgressStatus::Finished,
    )
}
