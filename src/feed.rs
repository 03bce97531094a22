use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::catalog::ProjectCatalog;
use crate::config::FeedConfig;
use crate::groups::build_groups;
use crate::models::{fold_key, DropoutSet, Group, ProgressStatus, ProgressionEntry};

const USER_AGENT: &str = concat!("zone01-progress/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("network error: {0}")]
    Network(String),
    #[error("feed returned {0}: {1}")]
    Status(u16, String),
    #[error("failed to decode feed response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedUser {
    pub login: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedObject {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedGroup {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub status: ProgressStatus,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedProgress {
    pub user: FeedUser,
    pub object: FeedObject,
    pub group: FeedGroup,
}

impl FeedProgress {
    pub fn to_entry(&self) -> ProgressionEntry {
        ProgressionEntry {
            student_login: self.user.login.clone(),
            project_name: self.object.name.clone(),
            group_status: self.group.status.clone(),
            group_id: self.group.id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PromotionStudents {
    #[serde(default)]
    progress: Vec<FeedProgress>,
}

/// Group ids come back as numbers or strings depending on the endpoint.
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(i64),
        Text(String),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Number(value) => value.to_string(),
        Id::Text(value) => value,
    })
}

pub fn entries_by_student(progress: &[FeedProgress]) -> HashMap<String, Vec<ProgressionEntry>> {
    let mut by_student: HashMap<String, Vec<ProgressionEntry>> = HashMap::new();
    for record in progress {
        by_student
            .entry(fold_key(&record.user.login))
            .or_default()
            .push(record.to_entry());
    }
    by_student
}

pub trait ProgressionFeed {
    async fn promotion_progress(&self, event_id: i64) -> Result<Vec<FeedProgress>, FeedError>;
}

pub struct HttpFeed {
    http_client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpFeed {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FeedError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.resolved_token(),
        })
    }
}

impl ProgressionFeed for HttpFeed {
    async fn promotion_progress(&self, event_id: i64) -> Result<Vec<FeedProgress>, FeedError> {
        let url = format!("{}/promotions/{}/students", self.base_url, event_id);
        tracing::debug!(event_id, url = %url, "fetching promotion progress");

        let mut request = self.http_client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FeedError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Status(status.as_u16(), body));
        }

        let payload: PromotionStudents = response
            .json()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))?;
        Ok(payload.progress)
    }
}

/// Caches feed results for one logical run, keyed by promotion and project.
pub struct GroupCache<'a, F> {
    feed: &'a F,
    catalog: &'a ProjectCatalog,
    dropouts: &'a DropoutSet,
    progress: HashMap<i64, Vec<FeedProgress>>,
    unavailable: HashSet<i64>,
    groups: HashMap<(i64, String), Vec<Group>>,
}

impl<'a, F: ProgressionFeed> GroupCache<'a, F> {
    pub fn new(feed: &'a F, catalog: &'a ProjectCatalog, dropouts: &'a DropoutSet) -> Self {
        Self {
            feed,
            catalog,
            dropouts,
            progress: HashMap::new(),
            unavailable: HashSet::new(),
            groups: HashMap::new(),
        }
    }

    /// Fetches a promotion at most once per run, failed fetches included.
    async fn ensure_progress(&mut self, event_id: i64) -> bool {
        if self.progress.contains_key(&event_id) {
            return true;
        }
        if self.unavailable.contains(&event_id) {
            return false;
        }
        match self.feed.promotion_progress(event_id).await {
            Ok(progress) => {
                self.progress.insert(event_id, progress);
                true
            }
            Err(err) => {
                tracing::warn!(event_id, error = %err, "progression feed unavailable");
                self.unavailable.insert(event_id);
                false
            }
        }
    }

    pub async fn progress(&mut self, event_id: i64) -> &[FeedProgress] {
        if !self.ensure_progress(event_id).await {
            return &[];
        }
        self.progress.get(&event_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Groups of one project in one promotion, empty when the feed is down.
    pub async fn groups_for(&mut self, event_id: i64, project_name: &str) -> &[Group] {
        let key = (event_id, fold_key(project_name));
        if !self.groups.contains_key(&key) {
            if !self.ensure_progress(event_id).await {
                return &[];
            }
            let progress = self.progress.get(&event_id).map(Vec::as_slice).unwrap_or(&[]);
            let groups = build_groups(progress, project_name, self.catalog, self.dropouts);
            self.groups.insert(key.clone(), groups);
        }
        self.groups.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }
}
