use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod calendar;
mod config;
mod error;
mod external;
mod features;
mod forecast;
mod health;
mod models;
mod pipeline;
mod regressor;
mod report;
mod segment;
mod split;
mod store;
mod train;
mod window;

use config::Config;
use pipeline::PipelineSettings;
use store::files::FileModelStore;
use store::postgres::{self, PgStore};
use store::{AlertStore, Ports};

#[derive(Parser)]
#[command(name = "stockifai-forecast")]
#[command(about = "Weekly spare-parts demand forecasting and stock alerts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Train segment models and store 4-week forecasts
    Forecast {
        /// Only this taller; all talleres when omitted
        #[arg(long)]
        taller: Option<i64>,
        /// First forecast week (YYYY-MM-DD); defaults to the next Monday
        #[arg(long)]
        anchor: Option<NaiveDate>,
        /// Write a markdown summary of the run
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Re-evaluate stock alerts from the stored forecasts
    Alerts {
        #[arg(long)]
        taller: i64,
    },
    /// Dismiss an alert
    DismissAlert {
        #[arg(long)]
        id: i64,
    },
    /// Mark a new alert as seen
    MarkAlertSeen {
        #[arg(long)]
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgStore::new(pool.clone(), config.write_chunk_size);
    let models = FileModelStore::new(&config.model_dir);

    match cli.command {
        Commands::InitDb => {
            postgres::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Forecast {
            taller,
            anchor,
            report: report_path,
        } => {
            let ports = Ports {
                movements: &store,
                catalog: &store,
                inventory: &store,
                external: &store,
                alerts: &store,
                models: &models,
            };
            let anchor = anchor.unwrap_or_else(|| pipeline::next_monday(Utc::now().date_naive()));
            let settings = PipelineSettings::from_config(&config);
            let batch = pipeline::run_batch(ports, &settings, taller, anchor)
                .await
                .context("forecast batch failed")?;

            println!(
                "Run {} for week {}: {} talleres ok, {} failed.",
                batch.run_id,
                batch.anchor,
                batch.ok.len(),
                batch.errors.len()
            );
            for taller in &batch.ok {
                println!(
                    "- taller {}: {} forecasts, {} alerts created, {} resolved",
                    taller.taller_id,
                    taller.forecasts.written,
                    taller.alerts.created,
                    taller.alerts.resolved
                );
            }
            for failure in &batch.errors {
                println!(
                    "- taller {} failed ({}): {}",
                    failure.taller_id,
                    failure.kind.as_str(),
                    failure.message
                );
            }

            if let Some(out) = report_path {
                std::fs::write(&out, report::build_report(&batch))
                    .with_context(|| format!("failed to write {}", out.display()))?;
                println!("Report written to {}.", out.display());
            }
        }
        Commands::Alerts { taller } => {
            let outcome = health::reconcile_alerts(&store, &store, taller, Utc::now()).await?;
            println!(
                "Taller {taller}: {} alerts created, {} resolved, {} still open.",
                outcome.created, outcome.resolved, outcome.kept
            );
        }
        Commands::DismissAlert { id } => {
            if !store.dismiss_alert(id).await? {
                anyhow::bail!("alert {id} not found or no longer active");
            }
            println!("Alert {id} dismissed.");
        }
        Commands::MarkAlertSeen { id } => {
            if store.mark_alert_seen(id).await? {
                println!("Alert {id} marked as seen.");
            } else {
                println!("Alert {id} is not new; nothing changed.");
            }
        }
    }

    Ok(())
}
