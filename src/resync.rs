use std::collections::BTreeMap;

use crate::catalog::{ProjectCatalog, Track};
use crate::config::PromotionConfig;
use crate::db::StudentStore;
use crate::delay::{classify, ClassifierAnomaly, ExpectedProject};
use crate::feed::{entries_by_student, FeedUser, ProgressionFeed};
use crate::models::{
    fold_key, ProgressionEntry, PromoResyncSummary, ResyncSummary, StudentProgress, TrackProgress,
};
use crate::progress::{current_project, normalize_electives, resolve_student, ElectiveChoice, ResolveError};

/// Resolves, normalizes and classifies one student.
pub fn derive_progress(
    catalog: &ProjectCatalog,
    expected: &ExpectedProject,
    login: &str,
    entries: &[ProgressionEntry],
) -> Result<StudentProgress, ResolveError> {
    let mut tracks = resolve_student(catalog, login, entries)?;
    if normalize_electives(catalog, &mut tracks) == ElectiveChoice::Conflict {
        tracing::warn!(login, "student shows activity on both Rust and Java");
    }

    let classification = classify(catalog, expected, &tracks);
    if let Some(ClassifierAnomaly::UnknownExpectedProject(name)) = &classification.anomaly {
        tracing::debug!(login, project = %name, "delay level defaulted");
    }

    let (actual_project_name, progress_status) = current_project(&tracks);
    let track = |track: Track| {
        let state = tracks.get(track);
        TrackProgress {
            project: state.project.clone(),
            status: state.status.clone(),
            completed: state.all_finished,
        }
    };

    Ok(StudentProgress {
        login: login.to_string(),
        actual_project_name,
        progress_status,
        delay_level: classification.level,
        golang: track(Track::Golang),
        javascript: track(Track::Javascript),
        rust: track(Track::Rust),
        java: track(Track::Java),
    })
}

/// Resyncs one promotion. Student failures are collected, not propagated.
pub async fn resync_promotion<F, S>(
    feed: &F,
    store: &S,
    catalog: &ProjectCatalog,
    promotion: &PromotionConfig,
) -> PromoResyncSummary
where
    F: ProgressionFeed,
    S: StudentStore,
{
    let mut summary = PromoResyncSummary {
        promotion: promotion.title.clone(),
        ..PromoResyncSummary::default()
    };

    let progress = match feed.promotion_progress(promotion.id).await {
        Ok(progress) => progress,
        Err(err) => {
            tracing::warn!(promotion = %promotion.title, error = %err, "progression feed failed");
            summary
                .errors
                .push(format!("{}: progression feed failed: {err}", promotion.title));
            return summary;
        }
    };

    let mut users: BTreeMap<String, FeedUser> = BTreeMap::new();
    for record in &progress {
        users
            .entry(fold_key(&record.user.login))
            .or_insert_with(|| record.user.clone());
    }
    let users: Vec<FeedUser> = users.into_values().collect();
    match store.ensure_students(promotion.id, &users).await {
        Ok(0) => {}
        Ok(inserted) => tracing::info!(promotion = %promotion.title, inserted, "registered new students"),
        Err(err) => summary
            .errors
            .push(format!("{}: failed to register students: {err:#}", promotion.title)),
    }

    let students = match store.students_in_promotion(promotion.id).await {
        Ok(students) => students,
        Err(err) => {
            summary
                .errors
                .push(format!("{}: failed to list students: {err:#}", promotion.title));
            return summary;
        }
    };

    let by_student = entries_by_student(&progress);
    for student in &students {
        let entries = by_student
            .get(&fold_key(&student.login))
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let derived = match derive_progress(catalog, &promotion.expected, &student.login, entries) {
            Ok(derived) => derived,
            Err(err) => {
                summary.errors.push(format!("{}: {err}", student.login));
                continue;
            }
        };

        match store.save_progress(&derived).await {
            Ok(()) => {
                tracing::debug!(login = %student.login, delay = %derived.delay_level, "student updated");
                summary.updated += 1;
            }
            Err(err) => summary.errors.push(format!("{}: {err:#}", student.login)),
        }
    }

    tracing::info!(
        promotion = %promotion.title,
        updated = summary.updated,
        errors = summary.errors.len(),
        "promotion resynced"
    );
    summary
}

/// Resyncs every non-archived promotion in turn.
pub async fn resync_all<'a, F, S>(
    feed: &F,
    store: &S,
    catalog: &ProjectCatalog,
    promotions: impl IntoIterator<Item = &'a PromotionConfig>,
) -> ResyncSummary
where
    F: ProgressionFeed,
    S: StudentStore,
{
    let mut summary = ResyncSummary::default();
    for promotion in promotions {
        if promotion.archived {
            tracing::debug!(promotion = %promotion.title, "skipping archived promotion");
            summary.archived_promos_skipped += 1;
            continue;
        }
        let promo = resync_promotion(feed, store, catalog, promotion).await;
        summary.total_promos += 1;
        summary.total_students_updated += promo.updated;
        summary.total_errors += promo.errors.len();
        summary.promotions.push(promo);
    }
    summary
}
