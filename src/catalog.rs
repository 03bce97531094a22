use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::fold_key;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("project {0} is listed more than once")]
    DuplicateProject(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Track {
    Golang,
    Javascript,
    Rust,
    Java,
}

impl Track {
    pub const ALL: [Track; 4] = [Track::Golang, Track::Javascript, Track::Rust, Track::Java];

    pub fn as_str(self) -> &'static str {
        match self {
            Track::Golang => "Golang",
            Track::Javascript => "Javascript",
            Track::Rust => "Rust",
            Track::Java => "Java",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub id: Option<i64>,
    pub name: String,
    pub track: Track,
    pub track_index: usize,
    pub global_index: usize,
    pub weeks: Option<f64>,
}

/// Raw catalog entry as stored in the catalog file.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub project_time_week: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogFile {
    #[serde(default)]
    golang: Vec<CatalogEntry>,
    #[serde(default)]
    javascript: Vec<CatalogEntry>,
    #[serde(default)]
    rust: Vec<CatalogEntry>,
    #[serde(default)]
    java: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectCatalog {
    tracks: [Vec<Project>; 4],
    by_name: HashMap<String, (Track, usize)>,
}

impl ProjectCatalog {
    /// Builds the catalog from per-track entries given in track order.
    pub fn from_tracks(
        tracks: impl IntoIterator<Item = (Track, Vec<CatalogEntry>)>,
    ) -> Result<Self, CatalogError> {
        let mut grouped: [Vec<CatalogEntry>; 4] = Default::default();
        for (track, entries) in tracks {
            grouped[track.index()].extend(entries);
        }

        let mut catalog = ProjectCatalog::default();
        let mut global_index = 0usize;
        for track in Track::ALL {
            for (track_index, entry) in std::mem::take(&mut grouped[track.index()])
                .into_iter()
                .enumerate()
            {
                let key = fold_key(&entry.name);
                if catalog.by_name.contains_key(&key) {
                    return Err(CatalogError::DuplicateProject(entry.name));
                }
                catalog.by_name.insert(key, (track, track_index));
                catalog.tracks[track.index()].push(Project {
                    id: entry.id,
                    name: entry.name.trim().to_string(),
                    track,
                    track_index,
                    global_index,
                    weeks: entry.project_time_week,
                });
                global_index += 1;
            }
        }

        Ok(catalog)
    }

    /// Project names only, for fixtures.
    #[cfg(test)]
    pub fn from_names(tracks: &[(Track, &[&str])]) -> Result<Self, CatalogError> {
        Self::from_tracks(tracks.iter().map(|(track, names)| {
            let entries = names
                .iter()
                .map(|name| CatalogEntry {
                    id: None,
                    name: (*name).to_string(),
                    project_time_week: None,
                })
                .collect();
            (*track, entries)
        }))
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(raw)?;
        Self::from_tracks([
            (Track::Golang, file.golang),
            (Track::Javascript, file.javascript),
            (Track::Rust, file.rust),
            (Track::Java, file.java),
        ])
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn projects(&self, track: Track) -> &[Project] {
        &self.tracks[track.index()]
    }

    pub fn first_project(&self, track: Track) -> Option<&Project> {
        self.projects(track).first()
    }

    /// Case-insensitive lookup by project name.
    pub fn find(&self, name: &str) -> Option<&Project> {
        let (track, index) = self.by_name.get(&fold_key(name))?;
        self.tracks[track.index()].get(*index)
    }

    pub fn track_of(&self, name: &str) -> Option<Track> {
        self.find(name).map(|project| project.track)
    }

    pub fn global_index(&self, name: &str) -> Option<usize> {
        self.find(name).map(|project| project.global_index)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }
}
