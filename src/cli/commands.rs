//! CLI commands

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::db::{filesystem, OverrideRepository, ScheduleRepository, Store};
use crate::error::ValidationError;
use crate::scheduling::{OverrideType, ScheduleEvaluator};

#[derive(Parser)]
#[command(name = "agentsched")]
#[command(
    about = "Inspect and adjust agent activation schedules in a project store",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: ~/.agentsched/config.yml)
    #[arg(long)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Report whether a directory is on a local or network filesystem
    Classify {
        /// Project directory
        project_dir: PathBuf,
    },

    /// Open the store and apply pending migrations
    Migrate {
        /// Project directory
        project_dir: PathBuf,
    },

    /// List schedules
    Schedules {
        /// Project directory
        project_dir: PathBuf,

        /// Filter by project name
        #[arg(long)]
        project: Option<String>,
    },

    /// Show whether a schedule is active right now
    Status {
        /// Project directory
        project_dir: PathBuf,

        /// Schedule ID
        schedule_id: i64,
    },

    /// Force a schedule on or off for a while
    Override {
        /// Project directory
        project_dir: PathBuf,

        /// Schedule ID
        schedule_id: i64,

        /// Override type (start, stop)
        override_type: String,

        /// Lifetime in minutes (default from config)
        #[arg(long)]
        minutes: Option<i64>,
    },

    /// Delete expired overrides
    Sweep {
        /// Project directory
        project_dir: PathBuf,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let open = |dir: &PathBuf| {
        Store::open(dir, &config.store)
            .with_context(|| format!("Failed to open store in {:?}", dir))
    };

    match cli.command {
        Commands::Classify { project_dir } => {
            let kind = filesystem::classify(&project_dir);
            let mode = config.store.journal_mode.resolve(kind);
            println!("{}: {} (journal_mode={})", project_dir.display(), kind.as_str(), mode);
            Ok(())
        }

        Commands::Migrate { project_dir } => {
            let store = open(&project_dir)?;
            let report = store.migration_report();
            if report.applied.is_empty() {
                println!("Schema already current");
            } else {
                for step in &report.applied {
                    println!("applied {}", step);
                }
            }
            println!(
                "{}: schema v{}, journal_mode={}",
                store.path().display(),
                report.schema_version,
                store.journal_mode()?
            );
            Ok(())
        }

        Commands::Schedules {
            project_dir,
            project,
        } => {
            let store = open(&project_dir)?;
            let schedules = ScheduleRepository::new(store.clone()).list(project.as_deref())?;
            let overrides = OverrideRepository::new(store);
            let now = Utc::now();

            if schedules.is_empty() {
                println!("No schedules found");
            } else {
                for schedule in schedules {
                    let active = ScheduleEvaluator::is_active(
                        &schedule,
                        &overrides.list_effective(schedule.id, now)?,
                        now,
                    );
                    println!(
                        "[{}] {} {} +{}m days={:07b} enabled={} crashes={} - {}",
                        schedule.id,
                        schedule.project_name,
                        schedule.start_time,
                        schedule.duration_minutes,
                        schedule.days_of_week.bits(),
                        schedule.enabled,
                        schedule.crash_count,
                        if active { "active" } else { "inactive" }
                    );
                }
            }
            Ok(())
        }

        Commands::Status {
            project_dir,
            schedule_id,
        } => {
            let store = open(&project_dir)?;
            let schedule = ScheduleRepository::new(store.clone())
                .get(schedule_id)?
                .with_context(|| format!("Schedule {} not found", schedule_id))?;
            let now = Utc::now();
            let overrides = OverrideRepository::new(store).list_effective(schedule_id, now)?;

            let status = serde_json::json!({
                "schedule": schedule,
                "active": ScheduleEvaluator::is_active(&schedule, &overrides, now),
                "naturalState": ScheduleEvaluator::natural_state(&schedule, now),
                "effectiveOverride":
                    ScheduleEvaluator::effective_override(schedule_id, &overrides, now),
                "nextWindowStart": ScheduleEvaluator::next_window_start(&schedule, now),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }

        Commands::Override {
            project_dir,
            schedule_id,
            override_type,
            minutes,
        } => {
            let override_type: OverrideType = override_type.parse()?;
            let minutes = minutes.unwrap_or(config.default_override_minutes);
            let ttl = override_ttl(minutes)?;
            let store = open(&project_dir)?;

            let created = OverrideRepository::new(store).create(schedule_id, override_type, ttl)?;
            println!(
                "Created {} override {} for schedule {} (expires {})",
                created.override_type.as_str(),
                created.id,
                created.schedule_id,
                created.expires_at.to_rfc3339()
            );
            Ok(())
        }

        Commands::Sweep { project_dir } => {
            let store = open(&project_dir)?;
            let removed = OverrideRepository::new(store).sweep_expired()?;
            println!("Removed {} expired overrides", removed);
            Ok(())
        }
    }
}

/// Minutes from the command line as an override lifetime.
fn override_ttl(minutes: i64) -> std::result::Result<Duration, ValidationError> {
    Duration::try_minutes(minutes).ok_or(ValidationError::OverrideTtl(minutes.saturating_mul(60)))
}
