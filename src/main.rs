use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod catalog;
mod config;
mod db;
mod delay;
mod feed;
mod groups;
mod import;
mod matcher;
mod models;
mod priority;
mod progress;
mod report;
mod resync;

use crate::catalog::ProjectCatalog;
use crate::config::{Config, PromotionConfig};
use crate::db::{AuditStore, PgStore};
use crate::feed::{entries_by_student, GroupCache, HttpFeed};

#[derive(Parser)]
#[command(name = "zone01-progress")]
#[command(about = "Student progress reconciliation and audit tracking for Zone01", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "zone01.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Flag or unflag a student as a dropout
    Dropout {
        #[arg(long)]
        login: String,
        #[arg(long)]
        remove: bool,
    },
    /// Recompute progress and delay levels from the progression feed
    Resync {
        #[arg(long)]
        promotion: Option<String>,
    },
    /// Import audits from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Rank finished groups waiting for an audit
    Pending {
        #[arg(long)]
        promotion: String,
        #[arg(long)]
        project: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        promotion: String,
        #[arg(long)]
        project: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load(path: &std::path::Path) -> anyhow::Result<(Config, ProjectCatalog)> {
    let config = Config::load(path).with_context(|| format!("failed to load {}", path.display()))?;
    let catalog = ProjectCatalog::load(&config.catalog_path)
        .with_context(|| format!("failed to load {}", config.catalog_path.display()))?;
    tracing::debug!(projects = catalog.len(), "catalog loaded");
    Ok((config, catalog))
}

fn find_promotion<'a>(config: &'a Config, title: &str) -> anyhow::Result<&'a PromotionConfig> {
    config
        .promotion_by_title(title)
        .with_context(|| format!("unknown promotion {title}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgStore::new(pool);

    match cli.command {
        Commands::InitDb => {
            store.init_db().await?;
            println!("Schema ready.");
        }
        Commands::Dropout { login, remove } => {
            let changed = store.set_dropout(&login, !remove).await?;
            match (changed, remove) {
                (true, false) => println!("{login} flagged as dropout."),
                (true, true) => println!("{login} is no longer a dropout."),
                (false, _) => println!("Nothing to change for {login}."),
            }
        }
        Commands::Resync { promotion } => {
            let (config, catalog) = load(&cli.config)?;
            let feed = HttpFeed::new(&config.feed)?;
            let promotions: Vec<&PromotionConfig> = match promotion.as_deref() {
                Some(title) => vec![find_promotion(&config, title)?],
                None => config.promotions.iter().collect(),
            };
            let summary = resync::resync_all(&feed, &store, &catalog, promotions).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Import { csv } => {
            let (config, catalog) = load(&cli.config)?;
            let feed = HttpFeed::new(&config.feed)?;
            let dropouts = store.dropouts().await?;
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let rows = import::read_rows(file)?;

            let mut cache = GroupCache::new(&feed, &catalog, &dropouts);
            let summary = import::import_rows(&rows, &config, &catalog, &mut cache, &store).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Pending {
            promotion,
            project,
            limit,
        } => {
            let (config, catalog) = load(&cli.config)?;
            let promotion = find_promotion(&config, &promotion)?;
            let project = catalog
                .find(&project)
                .with_context(|| format!("unknown project {project}"))?;
            let feed = HttpFeed::new(&config.feed)?;
            let dropouts = store.dropouts().await?;
            let audits = store.audits_for_project(promotion.id, &project.name).await?;

            let mut cache = GroupCache::new(&feed, &catalog, &dropouts);
            let groups = cache.groups_for(promotion.id, &project.name).await;
            let pending = report::pending_groups(groups, &audits);
            let evaluations = priority::evaluate_pending(pending, Utc::now());

            if evaluations.is_empty() {
                println!("No finished groups waiting for an audit.");
                return Ok(());
            }

            println!("Groups waiting for an audit on {}:", project.name);
            for evaluation in evaluations.iter().take(limit) {
                println!(
                    "- group {} ({}) score {:.1}: {}",
                    evaluation.group_id,
                    evaluation.priority,
                    evaluation.priority_score,
                    evaluation.reasons.join("; ")
                );
            }
        }
        Commands::Report {
            promotion,
            project,
            out,
        } => {
            let (config, catalog) = load(&cli.config)?;
            let promotion = find_promotion(&config, &promotion)?;
            let project = catalog
                .find(&project)
                .with_context(|| format!("unknown project {project}"))?;
            let feed = HttpFeed::new(&config.feed)?;
            let dropouts = store.dropouts().await?;
            let audits = store.audits_for_project(promotion.id, &project.name).await?;

            let mut cache = GroupCache::new(&feed, &catalog, &dropouts);
            let delay_levels: Vec<_> = entries_by_student(cache.progress(promotion.id).await)
                .iter()
                .filter(|(login, _)| !dropouts.contains(login))
                .filter_map(|(login, entries)| {
                    match resync::derive_progress(&catalog, &promotion.expected, login, entries) {
                        Ok(progress) => Some(progress.delay_level),
                        Err(err) => {
                            tracing::warn!(login = %login, error = %err, "skipping student");
                            None
                        }
                    }
                })
                .collect();
            let groups = cache.groups_for(promotion.id, &project.name).await;

            let report = report::build_report(
                &promotion.title,
                &project.name,
                Utc::now(),
                &delay_levels,
                groups,
                &audits,
                &dropouts,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
