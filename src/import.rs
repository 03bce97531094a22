use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::catalog::ProjectCatalog;
use crate::config::Config;
use crate::db::AuditStore;
use crate::feed::{GroupCache, ProgressionFeed};
use crate::groups::audit_eligible;
use crate::matcher::{extract_logins, match_group, MatchKind};
use crate::models::{InsertOutcome, NewAudit, NewAuditResult};

#[derive(Debug, Clone, Deserialize)]
pub struct CsvAuditRow {
    pub promotion: String,
    pub project: String,
    pub group: String,
    #[serde(default)]
    pub auditor: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub validated: Option<String>,
}

/// A data line of the CSV file. Lines that do not fit the row shape are kept
/// with whatever promotion and project cells they carry.
#[derive(Debug, Clone)]
pub struct CsvLine {
    pub line: usize,
    pub row: Result<CsvAuditRow, MalformedRow>,
}

#[derive(Debug, Clone)]
pub struct MalformedRow {
    pub promotion: String,
    pub project: String,
    pub error: String,
}

impl CsvAuditRow {
    fn is_validated(&self) -> bool {
        matches!(
            self.validated
                .as_deref()
                .map(|value| value.trim().to_lowercase())
                .as_deref(),
            Some("yes" | "oui" | "true" | "1" | "ok")
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedRow {
    pub row: usize,
    pub promotion: String,
    pub project: String,
    pub group_id: String,
    pub kind: MatchKind,
    pub score: f64,
    pub inserted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnmatchedRow {
    pub row: usize,
    pub promotion: String,
    pub project: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportDetails {
    pub matched: Vec<MatchedRow>,
    pub unmatched: Vec<UnmatchedRow>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub total: usize,
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub details: ImportDetails,
}

impl ImportSummary {
    fn skip(&mut self, row: usize, promotion: &str, project: &str, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(row, promotion, project, reason = %reason, "row skipped");
        self.skipped += 1;
        self.details.unmatched.push(UnmatchedRow {
            row,
            promotion: promotion.to_string(),
            project: project.to_string(),
            reason,
        });
    }
}

/// Reads every data line. Only I/O failures and an unreadable header abort.
pub fn read_rows<R: Read>(reader: R) -> anyhow::Result<Vec<CsvLine>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    let column = |record: &csv::StringRecord, name: &str| {
        headers
            .iter()
            .position(|header| header == name)
            .and_then(|index| record.get(index))
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    let mut lines = Vec::new();
    let mut record = csv::StringRecord::new();
    loop {
        let line = reader.position().line() as usize;
        match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                let line = record
                    .position()
                    .map(|position| position.line() as usize)
                    .unwrap_or(line);
                let row = record
                    .deserialize::<CsvAuditRow>(Some(&headers))
                    .map_err(|err| MalformedRow {
                        promotion: column(&record, "promotion"),
                        project: column(&record, "project"),
                        error: err.to_string(),
                    });
                lines.push(CsvLine { line, row });
            }
            Err(err) if err.is_io_error() => return Err(err.into()),
            Err(err) => lines.push(CsvLine {
                line: err.position().map(|p| p.line() as usize).unwrap_or(line),
                row: Err(MalformedRow {
                    promotion: String::new(),
                    project: String::new(),
                    error: err.to_string(),
                }),
            }),
        }
    }
    Ok(lines)
}

/// Rows that cannot be tied to one audit-eligible group are skipped with a
/// reason. Rows whose audit already exists count as skipped too.
pub async fn import_rows<F, S>(
    lines: &[CsvLine],
    config: &Config,
    catalog: &ProjectCatalog,
    cache: &mut GroupCache<'_, F>,
    store: &S,
) -> ImportSummary
where
    F: ProgressionFeed,
    S: AuditStore,
{
    let mut summary = ImportSummary {
        total: lines.len(),
        ..ImportSummary::default()
    };

    for line in lines {
        let row = line.line;
        let csv = match &line.row {
            Ok(csv) => csv,
            Err(malformed) => {
                summary.skip(
                    row,
                    &malformed.promotion,
                    &malformed.project,
                    format!("malformed row: {}", malformed.error),
                );
                continue;
            }
        };
        let skip = |summary: &mut ImportSummary, reason: String| {
            summary.skip(row, &csv.promotion, &csv.project, reason)
        };

        let logins = extract_logins(&csv.group);
        if logins.is_empty() {
            skip(&mut summary, "no logins found in group cell".to_string());
            continue;
        }
        let Some(project) = catalog.find(&csv.project) else {
            skip(&mut summary, format!("unknown project {}", csv.project));
            continue;
        };
        let Some(promotion) = config.promotion_by_title(&csv.promotion) else {
            skip(&mut summary, format!("unknown promotion {}", csv.promotion));
            continue;
        };

        let groups = cache.groups_for(promotion.id, &project.name).await;
        if groups.is_empty() {
            skip(&mut summary, "no Zone01 groups for this project".to_string());
            continue;
        }
        let mut eligible = audit_eligible(groups).peekable();
        if eligible.peek().is_none() {
            skip(&mut summary, "no eligible Zone01 group for this project".to_string());
            continue;
        }
        let Some(found) = match_group(&logins, eligible) else {
            skip(&mut summary, "no matching group".to_string());
            continue;
        };

        let validated = csv.is_validated();
        let audit = NewAudit {
            promo_id: promotion.id,
            track: project.track,
            project_name: project.name.clone(),
            group_id: found.group.group_id.clone(),
            auditor_name: csv.auditor.clone().filter(|name| !name.trim().is_empty()),
            summary: csv.summary.clone().filter(|text| !text.trim().is_empty()),
            global_warnings: Vec::new(),
            results: found
                .group
                .members
                .iter()
                .map(|member| NewAuditResult {
                    student_login: member.login.clone(),
                    validated: validated && !member.is_dropout,
                    warnings: Vec::new(),
                })
                .collect(),
        };
        let mut matched = MatchedRow {
            row,
            promotion: promotion.title.clone(),
            project: project.name.clone(),
            group_id: found.group.group_id.clone(),
            kind: found.kind,
            score: found.score,
            inserted: false,
        };

        match store.insert_audit(&audit).await {
            Ok(InsertOutcome::Inserted(id)) => {
                tracing::debug!(row, audit_id = %id, group_id = %audit.group_id, "audit imported");
                summary.imported += 1;
                matched.inserted = true;
            }
            Ok(InsertOutcome::AlreadyExists) => {
                summary.skipped += 1;
            }
            Err(err) => {
                summary.errors.push(format!("row {row}: {err:#}"));
            }
        }
        summary.details.matched.push(matched);
    }

    tracing::info!(
        total = summary.total,
        imported = summary.imported,
        skipped = summary.skipped,
        errors = summary.errors.len(),
        "csv import finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use uuid::Uuid;

    use super::*;
    use crate::catalog::Track;
    use crate::feed::testing::{record, FakeFeed};
    use crate::models::{same_key, AuditRecord, AuditResultRecord, DropoutSet};

    #[derive(Default)]
    struct MemoryAudits {
        audits: RefCell<Vec<(Uuid, NewAudit)>>,
        fail_group: Option<String>,
    }

    impl AuditStore for MemoryAudits {
        async fn insert_audit(&self, audit: &NewAudit) -> anyhow::Result<InsertOutcome> {
            if self.fail_group.as_deref() == Some(audit.group_id.as_str()) {
                anyhow::bail!("connection reset");
            }
            let mut audits = self.audits.borrow_mut();
            let exists = audits.iter().any(|(_, existing)| {
                existing.promo_id == audit.promo_id
                    && existing.track == audit.track
                    && existing.project_name == audit.project_name
                    && existing.group_id == audit.group_id
            });
            if exists {
                return Ok(InsertOutcome::AlreadyExists);
            }
            let id = Uuid::new_v4();
            audits.push((id, audit.clone()));
            Ok(InsertOutcome::Inserted(id))
        }

        async fn audits_for_project(
            &self,
            promo_id: i64,
            project_name: &str,
        ) -> anyhow::Result<Vec<AuditRecord>> {
            Ok(self
                .audits
                .borrow()
                .iter()
                .filter(|(_, a)| {
                    a.promo_id == promo_id && same_key(&a.project_name, project_name)
                })
                .map(|(id, a)| AuditRecord {
                    id: *id,
                    group_id: a.group_id.clone(),
                    global_warnings: a.global_warnings.clone(),
                    results: a
                        .results
                        .iter()
                        .map(|result| AuditResultRecord {
                            student_login: result.student_login.clone(),
                            validated: result.validated,
                            warnings: result.warnings.clone(),
                        })
                        .collect(),
                })
                .collect())
        }
    }

    const CONFIG: &str = r#"
        catalog_path = "projects.json"
        [feed]
        base_url = "https://zone01.example"
        [[promotions]]
        id = 5
        title = "P1 2025"
        expected = "forum"
    "#;

    const CSV: &str = "\
promotion,project,group,auditor,summary,validated
P1 2025,forum,\"jdoe (https://git/jdoe) asmith (https://git/asmith)\",Alice,Clean code,oui
P1 2025,Forum,\"bwayne (https://git/bwayne) ckent (https://git/ckent) typo (https://git/typo)\",Bob,,non
P1 2025,forum,just some names,Carol,,oui
P1 2025,unknown-project,\"jdoe (https://git/jdoe)\",Dan,,oui
P9 2030,forum,\"jdoe (https://git/jdoe)\",Eve,,oui
P1 2025,forum,\"zed (https://git/zed) qux (https://git/qux)\",Frank,,oui
";

    fn fixtures() -> (Config, ProjectCatalog, FakeFeed) {
        let config = Config::from_toml(CONFIG).unwrap();
        let catalog = ProjectCatalog::from_names(&[(Track::Golang, &["forum", "lem-in"])]).unwrap();
        let mut feed = FakeFeed::default();
        feed.promotions.insert(
            5,
            vec![
                record("jdoe", "forum", "100", "finished"),
                record("asmith", "forum", "100", "finished"),
                record("bwayne", "forum", "101", "finished"),
                record("ckent", "forum", "101", "finished"),
                record("dprince", "forum", "101", "finished"),
            ],
        );
        (config, catalog, feed)
    }

    #[test]
    fn reads_csv_rows() {
        let lines = read_rows(CSV.as_bytes()).unwrap();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0].line, 2);
        let first = lines[0].row.as_ref().unwrap();
        let second = lines[1].row.as_ref().unwrap();
        assert!(first.is_validated());
        assert!(!second.is_validated());
        assert_eq!(second.summary, None);
    }

    #[test]
    fn short_rows_are_kept_as_malformed() {
        let raw = "\
promotion,project,group,auditor,summary,validated
P1 2025,forum,\"jdoe (https://git/jdoe)\",Alice,,oui
P1 2025,forum
P1 2025,forum,\"bwayne (https://git/bwayne)\",Bob,,non
";
        let lines = read_rows(raw.as_bytes()).unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].row.is_ok());
        let malformed = lines[1].row.as_ref().unwrap_err();
        assert_eq!(lines[1].line, 3);
        assert_eq!(malformed.promotion, "P1 2025");
        assert_eq!(malformed.project, "forum");
        assert!(lines[2].row.is_ok());
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped_and_the_rest_imported() {
        let (config, catalog, feed) = fixtures();
        let dropouts = DropoutSet::default();
        let store = MemoryAudits::default();
        let raw = "\
promotion,project,group,auditor,summary,validated
P1 2025,forum,\"jdoe (https://git/jdoe) asmith (https://git/asmith)\",Alice,,oui
P1 2025,forum
P1 2025,forum,\"bwayne (https://git/bwayne) ckent (https://git/ckent) dprince (https://git/dprince)\",Bob,,non
";
        let lines = read_rows(raw.as_bytes()).unwrap();

        let mut cache = GroupCache::new(&feed, &catalog, &dropouts);
        let summary = import_rows(&lines, &config, &catalog, &mut cache, &store).await;

        assert_eq!(summary.total, 3);
        assert_eq!(summary.imported, 2);
        assert_eq!(summary.skipped, 1);
        assert!(summary.errors.is_empty());
        let unmatched = &summary.details.unmatched[0];
        assert_eq!(unmatched.row, 3);
        assert!(unmatched.reason.starts_with("malformed row"));
    }

    #[tokio::test]
    async fn only_audit_eligible_groups_are_matched() {
        let (config, catalog, _) = fixtures();
        let dropouts = DropoutSet::new(["gone"]);
        let mut feed = FakeFeed::default();
        feed.promotions.insert(
            5,
            vec![
                record("jdoe", "forum", "100", "working"),
                record("asmith", "forum", "100", "working"),
                record("gone", "forum", "200", "finished"),
            ],
        );
        let raw = "\
promotion,project,group,auditor,summary,validated
P1 2025,forum,\"jdoe (https://git/jdoe) asmith (https://git/asmith)\",Alice,,oui
P1 2025,forum,\"gone (https://git/gone)\",Bob,,oui
";
        let store = MemoryAudits::default();
        let lines = read_rows(raw.as_bytes()).unwrap();

        let mut cache = GroupCache::new(&feed, &catalog, &dropouts);
        let summary = import_rows(&lines, &config, &catalog, &mut cache, &store).await;

        assert_eq!(summary.imported, 0);
        assert_eq!(summary.skipped, 2);
        assert!(store.audits.borrow().is_empty());
        assert!(summary
            .details
            .unmatched
            .iter()
            .all(|row| row.reason == "no eligible Zone01 group for this project"));
    }

    #[tokio::test]
    async fn ineligible_groups_do_not_attract_fuzzy_matches() {
        let (config, catalog, _) = fixtures();
        let dropouts = DropoutSet::default();
        let mut feed = FakeFeed::default();
        feed.promotions.insert(
            5,
            vec![
                record("jdoe", "forum", "100", "working"),
                record("asmith", "forum", "100", "working"),
                record("jdoe", "forum", "101", "finished"),
                record("bwayne", "forum", "101", "finished"),
            ],
        );
        let raw = "\
promotion,project,group,auditor,summary,validated
P1 2025,forum,\"jdoe (https://git/jdoe) asmith (https://git/asmith)\",Alice,,oui
";
        let store = MemoryAudits::default();
        let lines = read_rows(raw.as_bytes()).unwrap();

        let mut cache = GroupCache::new(&feed, &catalog, &dropouts);
        let summary = import_rows(&lines, &config, &catalog, &mut cache, &store).await;

        assert_eq!(summary.imported, 1);
        assert_eq!(summary.details.matched[0].group_id, "101");
        assert_eq!(summary.details.matched[0].kind, MatchKind::Fuzzy);
    }

    #[tokio::test]
    async fn imports_matches_and_reports_unmatched_rows() {
        let (config, catalog, feed) = fixtures();
        let dropouts = DropoutSet::new(["asmith"]);
        let store = MemoryAudits::default();
        let rows = read_rows(CSV.as_bytes()).unwrap();

        let mut cache = GroupCache::new(&feed, &catalog, &dropouts);
        let summary = import_rows(&rows, &config, &catalog, &mut cache, &store).await;

        assert_eq!(summary.total, 6);
        assert_eq!(summary.imported, 2);
        assert_eq!(summary.skipped, 4);
        assert!(summary.errors.is_empty());
        assert_eq!(summary.details.unmatched.len(), 4);
        assert_eq!(summary.details.matched[0].kind, MatchKind::Exact);
        assert_eq!(summary.details.matched[1].kind, MatchKind::Fuzzy);
        assert_eq!(*feed.calls.borrow(), vec![5]);

        let audits = store.audits_for_project(5, "FORUM").await.unwrap();
        assert_eq!(audits.len(), 2);
        // Canonical members, not the CSV's "typo" login.
        let logins: Vec<_> = audits[1].results.iter().map(|r| r.student_login.as_str()).collect();
        assert_eq!(logins, vec!["bwayne", "ckent", "dprince"]);
        // Dropouts are never marked validated.
        let first: Vec<_> = audits[0].results.iter().map(|r| r.validated).collect();
        assert_eq!(first, vec![true, false]);
        assert_eq!(store.audits.borrow()[0].1.auditor_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn reimport_creates_no_new_audits() {
        let (config, catalog, feed) = fixtures();
        let dropouts = DropoutSet::default();
        let store = MemoryAudits::default();
        let rows = read_rows(CSV.as_bytes()).unwrap();

        let mut cache = GroupCache::new(&feed, &catalog, &dropouts);
        let first = import_rows(&rows, &config, &catalog, &mut cache, &store).await;
        let second = import_rows(&rows, &config, &catalog, &mut cache, &store).await;

        assert_eq!(first.imported, 2);
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped, first.skipped + first.imported);
        assert_eq!(store.audits.borrow().len(), 2);
    }

    #[tokio::test]
    async fn insert_failures_are_errors_not_skips() {
        let (config, catalog, feed) = fixtures();
        let dropouts = DropoutSet::default();
        let store = MemoryAudits {
            fail_group: Some("100".to_string()),
            ..MemoryAudits::default()
        };
        let rows = read_rows(CSV.as_bytes()).unwrap();

        let mut cache = GroupCache::new(&feed, &catalog, &dropouts);
        let summary = import_rows(&rows, &config, &catalog, &mut cache, &store).await;

        assert_eq!(summary.imported, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("row 2"));
    }
}
