use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod aggregate;
mod config;
mod dashboard;
mod db;
mod earnings;
mod error;
mod mailer;
mod models;
mod pricing;
mod report;
mod store;
mod weekly;

use config::AppConfig;
use db::PgStore;
use mailer::{LogMailer, Mailer, OutboxMailer};
use pricing::{PriceTable, PricingCatalog, StoreCatalog};
use weekly::ReportSettings;

#[derive(Parser)]
#[command(name = "institute-earnings")]
#[command(about = "Teacher earnings, institute statistics and weekly lesson reports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data, including default pricing
    Seed,
    /// Insert the default subject pricing, skipping subjects already priced
    PopulatePricing,
    /// Insert subject pricing from a CSV file
    ImportPricing {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import lessons from a CSV file keyed by teacher username
    ImportLessons {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List hourly rates per subject
    Prices {
        /// Show the built-in rate table instead of the stored one
        #[arg(long)]
        builtin: bool,
    },
    /// Earnings of one teacher grouped by subject and lesson type
    Earnings {
        #[arg(long)]
        teacher: String,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: Option<u32>,
        #[arg(long, value_parser = clap::value_parser!(i32).range(2000..=2100))]
        year: Option<i32>,
        /// Render markdown instead of JSON
        #[arg(long)]
        markdown: bool,
    },
    /// Institute-wide counts, optionally for one month
    Dashboard {
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: Option<u32>,
        #[arg(long, value_parser = clap::value_parser!(i32).range(2000..=2100))]
        year: Option<i32>,
    },
    /// Lesson counts per active teacher
    TeacherStats,
    /// Payment totals per active student
    StudentStats,
    /// Lesson counts by type and status, optionally for one month
    LessonStats {
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: Option<u32>,
        #[arg(long, value_parser = clap::value_parser!(i32).range(2000..=2100))]
        year: Option<i32>,
    },
    /// Export the past week's lessons and mail them once
    WeeklyReport {
        /// Log the message instead of writing it to the outbox
        #[arg(long)]
        log_only: bool,
    },
    /// Run the weekly report every Saturday at 09:00 UTC
    Schedule {
        #[arg(long)]
        log_only: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), error::Error> {
    println!("{}", report::render_json(value)?);
    Ok(())
}

/// Commands that run without configuration or a database connection.
fn runs_offline(command: &Commands) -> bool {
    matches!(command, Commands::Prices { builtin: true })
}

fn mailer_for(config: &AppConfig, log_only: bool) -> Box<dyn Mailer> {
    if log_only {
        Box::new(LogMailer)
    } else {
        Box::new(OutboxMailer::new(config.mail_outbox.clone()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Err(err)
            if err
                .downcast_ref::<error::Error>()
                .is_some_and(error::Error::is_client_error) =>
        {
            eprintln!("{err}");
            std::process::exit(2);
        }
        result => result,
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if runs_offline(&cli.command) {
        let prices = PriceTable::builtin().get_all_prices().await?;
        print!("{}", report::build_price_list(&prices));
        return Ok(());
    }

    let config = AppConfig::from_env()?;
    let store = PgStore::connect(&config.database_url, config.db_max_connections)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&store).await?;
            println!("Seed data inserted.");
        }
        Commands::PopulatePricing => {
            let summary = pricing::populate_defaults(&store).await?;
            print_json(&summary)?;
        }
        Commands::ImportPricing { csv } => {
            let summary = pricing::import_pricing_csv(&store, &csv)
                .await
                .with_context(|| format!("failed to import pricing from {}", csv.display()))?;
            print_json(&summary)?;
        }
        Commands::ImportLessons { csv } => {
            let inserted = db::import_lessons_csv(&store, &csv).await?;
            println!("Inserted {inserted} lessons from {}.", csv.display());
        }
        Commands::Prices { .. } => {
            let prices = StoreCatalog::new(&store).get_all_prices().await?;
            print!("{}", report::build_price_list(&prices));
        }
        Commands::Earnings {
            teacher,
            month,
            year,
            markdown,
        } => {
            let catalog = StoreCatalog::new(&store);
            let earnings =
                earnings::build_teacher_earnings(&store, &catalog, &teacher, month, year).await?;
            if markdown {
                print!("{}", report::build_earnings_markdown(&earnings));
            } else {
                print_json(&earnings)?;
            }
        }
        Commands::Dashboard { month, year } => {
            print_json(&dashboard::build_dashboard(&store, month, year).await?)?;
        }
        Commands::TeacherStats => {
            print_json(&dashboard::teacher_breakdown(&store).await?)?;
        }
        Commands::StudentStats => {
            print_json(&dashboard::student_breakdown(&store).await?)?;
        }
        Commands::LessonStats { month, year } => {
            print_json(&dashboard::lesson_breakdown(&store, month, year).await?)?;
        }
        Commands::WeeklyReport { log_only } => {
            let mailer = mailer_for(&config, log_only);
            let settings = ReportSettings {
                app_name: config.app_name.clone(),
                recipient: config.email_to.clone(),
            };
            let sent =
                weekly::run_weekly_report(&store, mailer.as_ref(), &settings, Utc::now()).await?;
            if sent {
                println!("Weekly report sent.");
            } else {
                println!("Weekly report not sent.");
            }
        }
        Commands::Schedule { log_only } => {
            let mailer = mailer_for(&config, log_only);
            let settings = ReportSettings {
                app_name: config.app_name.clone(),
                recipient: config.email_to.clone(),
            };
            loop {
                let now = Utc::now();
                let next = weekly::next_run_after(now);
                info!(next_run = %next, "waiting for the next weekly report");
                tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;

                match weekly::run_weekly_report(&store, mailer.as_ref(), &settings, Utc::now()).await
                {
                    Ok(sent) => info!(sent, "scheduled weekly report finished"),
                    Err(err) => error!(error = %err, "scheduled weekly report failed"),
                }
            }
        }
    }

    Ok(())
}
