use std::collections::HashMap;

use anyhow::Context;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::feed::FeedUser;
use crate::models::{
    fold_key, AuditRecord, AuditResultRecord, DropoutSet, InsertOutcome, NewAudit, StudentProgress,
    StudentRecord,
};

/// Student persistence used by the resync pass.
pub trait StudentStore {
    /// Registers the feed's students under `promo_id`, moving known logins
    /// there too. Returns how many were new.
    async fn ensure_students(&self, promo_id: i64, users: &[FeedUser]) -> anyhow::Result<usize>;
    async fn students_in_promotion(&self, promo_id: i64) -> anyhow::Result<Vec<StudentRecord>>;
    async fn save_progress(&self, progress: &StudentProgress) -> anyhow::Result<()>;
}

/// Audit persistence. Inserts never duplicate a (promo, track, project, group) audit.
pub trait AuditStore {
    async fn insert_audit(&self, audit: &NewAudit) -> anyhow::Result<InsertOutcome>;
    async fn audits_for_project(
        &self,
        promo_id: i64,
        project_name: &str,
    ) -> anyhow::Result<Vec<AuditRecord>>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_db(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn dropouts(&self) -> anyhow::Result<DropoutSet> {
        let rows = sqlx::query("SELECT login FROM zone01.dropouts")
            .fetch_all(&self.pool)
            .await
            .context("failed to load dropouts")?;
        Ok(DropoutSet::new(
            rows.iter().map(|row| row.get::<String, _>("login")),
        ))
    }

    /// Returns whether the dropout set changed.
    pub async fn set_dropout(&self, login: &str, dropout: bool) -> anyhow::Result<bool> {
        let login = fold_key(login);
        let result = if dropout {
            sqlx::query(
                "INSERT INTO zone01.dropouts (login) VALUES ($1) ON CONFLICT (login) DO NOTHING",
            )
            .bind(&login)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query("DELETE FROM zone01.dropouts WHERE login = $1")
                .bind(&login)
                .execute(&self.pool)
                .await?
        };
        Ok(result.rows_affected() > 0)
    }
}

impl StudentStore for PgStore {
    async fn ensure_students(&self, promo_id: i64, users: &[FeedUser]) -> anyhow::Result<usize> {
        let mut inserted = 0usize;
        for user in users {
            let row = sqlx::query(
                r#"
                INSERT INTO zone01.students AS s (id, login, first_name, last_name, promo_id)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT ((lower(login))) DO UPDATE
                SET promo_id = EXCLUDED.promo_id,
                    first_name = COALESCE(EXCLUDED.first_name, s.first_name),
                    last_name = COALESCE(EXCLUDED.last_name, s.last_name)
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user.login.trim())
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(promo_id)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("failed to register {}", user.login))?;

            if row.get::<bool, _>("inserted") {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn students_in_promotion(&self, promo_id: i64) -> anyhow::Result<Vec<StudentRecord>> {
        let rows = sqlx::query(
            "SELECT login FROM zone01.students WHERE promo_id = $1 ORDER BY login",
        )
        .bind(promo_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StudentRecord {
                login: row.get("login"),
            })
            .collect())
    }

    async fn save_progress(&self, progress: &StudentProgress) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE zone01.students SET
                actual_project_name = $2,
                progress_status = $3,
                delay_level = $4,
                golang_project = $5, golang_status = $6, golang_completed = $7,
                javascript_project = $8, javascript_status = $9, javascript_completed = $10,
                rust_project = $11, rust_status = $12, rust_completed = $13,
                java_project = $14, java_status = $15, java_completed = $16,
                updated_at = NOW()
            WHERE lower(login) = lower($1)
            "#,
        )
        .bind(&progress.login)
        .bind(&progress.actual_project_name)
        .bind(progress.progress_status.as_str())
        .bind(progress.delay_level.as_str())
        .bind(&progress.golang.project)
        .bind(progress.golang.status.as_str())
        .bind(progress.golang.completed)
        .bind(&progress.javascript.project)
        .bind(progress.javascript.status.as_str())
        .bind(progress.javascript.completed)
        .bind(&progress.rust.project)
        .bind(progress.rust.status.as_str())
        .bind(progress.rust.completed)
        .bind(&progress.java.project)
        .bind(progress.java.status.as_str())
        .bind(progress.java.completed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("student {} is not registered", progress.login);
        }
        Ok(())
    }
}

impl AuditStore for PgStore {
    async fn insert_audit(&self, audit: &NewAudit) -> anyhow::Result<InsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let audit_id: Option<Uuid> = sqlx::query(
            r#"
            INSERT INTO zone01.audits
            (id, promo_id, track, project_name, group_id, auditor_name, summary, global_warnings)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (promo_id, track, project_name, group_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(audit.promo_id)
        .bind(audit.track.as_str())
        .bind(&audit.project_name)
        .bind(&audit.group_id)
        .bind(&audit.auditor_name)
        .bind(&audit.summary)
        .bind(&audit.global_warnings)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row.get("id"));

        let Some(audit_id) = audit_id else {
            tx.rollback().await?;
            return Ok(InsertOutcome::AlreadyExists);
        };

        for result in &audit.results {
            sqlx::query(
                r#"
                INSERT INTO zone01.audit_results (id, audit_id, student_login, validated, warnings)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (audit_id, student_login) DO UPDATE
                SET validated = EXCLUDED.validated, warnings = EXCLUDED.warnings
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(audit_id)
            .bind(&result.student_login)
            .bind(result.validated)
            .bind(&result.warnings)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(InsertOutcome::Inserted(audit_id))
    }

    async fn audits_for_project(
        &self,
        promo_id: i64,
        project_name: &str,
    ) -> anyhow::Result<Vec<AuditRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, group_id, global_warnings
            FROM zone01.audits
            WHERE promo_id = $1 AND lower(project_name) = lower($2)
            ORDER BY group_id
            "#,
        )
        .bind(promo_id)
        .bind(project_name)
        .fetch_all(&self.pool)
        .await?;

        let mut audits: Vec<AuditRecord> = rows
            .into_iter()
            .map(|row| AuditRecord {
                id: row.get("id"),
                group_id: row.get("group_id"),
                global_warnings: row.get("global_warnings"),
                results: Vec::new(),
            })
            .collect();

        let ids: Vec<Uuid> = audits.iter().map(|audit| audit.id).collect();
        let result_rows = sqlx::query(
            r#"
            SELECT audit_id, student_login, validated, warnings
            FROM zone01.audit_results
            WHERE audit_id = ANY($1)
            ORDER BY student_login
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_audit: HashMap<Uuid, Vec<AuditResultRecord>> = HashMap::new();
        for row in result_rows {
            by_audit
                .entry(row.get("audit_id"))
                .or_default()
                .push(AuditResultRecord {
                    student_login: row.get("student_login"),
                    validated: row.get("validated"),
                    warnings: row.get("warnings"),
                });
        }
        for audit in &mut audits {
            audit.results = by_audit.remove(&audit.id).unwrap_or_default();
        }

        Ok(audits)
    }
}
