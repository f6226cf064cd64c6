use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod catalog;
mod config;
mod db;
mod error;
mod history;
mod metrics;
mod models;
mod pipeline_log;
mod report;
mod sites;
#[cfg(test)]
mod testing;

use config::{DeploymentMode, Settings};
use models::Site;
use pipeline_log::ErrorLog;
use sites::SiteResolver;

#[derive(Parser)]
#[command(name = "progress-analytics")]
#[command(about = "Course and learner progress analytics per site", long_about = None)]
struct Cli {
    /// Resolve sites through organization membership
    #[arg(long, global = true)]
    multisite: bool,
    /// Months of history before the current month
    #[arg(long, global = true)]
    months_back: Option<u32>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Markdown,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import enrollments from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Monthly enrollment, progress and completion history for courses
    CourseDetails {
        /// A single course; omit to report every course of the site
        #[arg(long)]
        course_id: Option<String>,
        #[arg(long)]
        site: Option<String>,
        /// Reference date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date_for: Option<NaiveDate>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Profile and per-course progress for one learner
    LearnerDetails {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        site: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
    },
    /// User, course and enrollment totals for a site
    SiteSummary {
        #[arg(long)]
        site: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
    },
}

fn resolve_site<'a>(
    resolver: &SiteResolver<'a>,
    domain: Option<&str>,
) -> anyhow::Result<&'a Site> {
    match domain {
        Some(domain) => resolver
            .get_site_by_domain(domain)
            .with_context(|| format!("no site with domain {domain}")),
        None if resolver.mode().is_multisite() => {
            bail!("--site is required in multisite mode")
        }
        None => Ok(resolver.default_site()?),
    }
}

fn render<T: Serialize>(
    format: OutputFormat,
    value: &T,
    markdown: impl FnOnce() -> String,
) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        OutputFormat::Markdown => Ok(markdown()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env()?;
    if cli.multisite {
        settings.mode = DeploymentMode::Multisite;
    }
    if let Some(months_back) = cli.months_back {
        settings.history_months_back = months_back;
    }

    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let error_log = ErrorLog::new();
    let outcome = run(cli.command, &settings, &pool, &error_log).await;

    // persisted even when the command failed
    if !error_log.is_empty() {
        let persisted = db::persist_pipeline_errors(&pool, &error_log.entries()).await?;
        info!(persisted, "pipeline errors recorded");
    }

    outcome
}

async fn run(
    command: Commands,
    settings: &Settings,
    pool: &PgPool,
    error_log: &ErrorLog,
) -> anyhow::Result<()> {
    match command {
        Commands::InitDb => {
            db::init_db(pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(pool, &csv).await?;
            println!("Inserted {inserted} enrollments from {}.", csv.display());
        }
        Commands::CourseDetails {
            course_id,
            site,
            date_for,
            format,
            out,
        } => {
            let catalog = db::load_catalog(pool).await?;
            let resolver = SiteResolver::new(&catalog, settings);
            let date_for = date_for.unwrap_or_else(|| Utc::now().date_naive());
            let months_back = settings.history_months_back;

            let (site_label, courses) = match course_id.as_deref() {
                Some(course_id) => {
                    let details = report::course_details(
                        &resolver,
                        course_id,
                        date_for,
                        months_back,
                        error_log,
                    )?
                    .with_context(|| format!("course {course_id} not found for any site"))?;
                    let owner = resolver
                        .get_site_for_course(Some(course_id))?
                        .map(|site| site.domain.clone())
                        .unwrap_or_default();
                    if let Some(requested) = site.as_deref() {
                        if !requested.eq_ignore_ascii_case(&owner) {
                            bail!("course {course_id} does not belong to {requested}");
                        }
                    }
                    (owner, vec![details])
                }
                None => {
                    let site = resolve_site(&resolver, site.as_deref())?;
                    let courses = report::course_details_for_site(
                        &resolver,
                        site,
                        date_for,
                        months_back,
                        error_log,
                    )?;
                    (site.domain.clone(), courses)
                }
            };

            let output = render(format, &courses, || {
                report::render_course_details(&site_label, date_for, &courses)
            })?;
            match out {
                Some(path) => {
                    std::fs::write(&path, output)?;
                    println!("Report written to {}.", path.display());
                }
                None => println!("{output}"),
            }
        }
        Commands::LearnerDetails {
            user_id,
            site,
            format,
        } => {
            let catalog = db::load_catalog(pool).await?;
            let resolver = SiteResolver::new(&catalog, settings);
            let site = resolve_site(&resolver, site.as_deref())?;
            let learner = report::learner_details(&resolver, site, user_id, error_log)
                .with_context(|| format!("user {user_id} not found on {}", site.domain))?;
            let output = render(format, &learner, || report::render_learner_details(&learner))?;
            println!("{output}");
        }
        Commands::SiteSummary { site, format } => {
            let catalog = db::load_catalog(pool).await?;
            let resolver = SiteResolver::new(&catalog, settings);
            let site = resolve_site(&resolver, site.as_deref())?;
            let summary = report::site_summary(&resolver, site);
            let output = render(format, &summary, || report::render_site_summary(&summary))?;
            println!("{output}");
        }
    }

    Ok(())
}
