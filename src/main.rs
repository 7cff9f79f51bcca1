//! Operator tool for the points ledger database.
//!
//! ```text
//! points-ledger                       verify every aggregate against its history
//! points-ledger repair                verify, then rewrite drifted aggregates from history
//! points-ledger seed <class> <owner>  add the configured default behaviors to a class
//! ```
//!
//! Verification exits with an error when drift is found, so it can run from cron or CI.

use dotenvy::dotenv;
use points_ledger::{
    Error, Result,
    config::{self, database},
    core::{aggregate, behavior, statistics::format_points},
};
use std::{env, path::Path};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

enum Command {
    Verify,
    Repair,
    Seed { class_id: String, owner_id: String },
}

fn parse_command(mut args: impl Iterator<Item = String>) -> Result<Command> {
    match args.next().as_deref() {
        None | Some("verify") => Ok(Command::Verify),
        Some("repair") => Ok(Command::Repair),
        Some("seed") => match (args.next(), args.next()) {
            (Some(class_id), Some(owner_id)) => Ok(Command::Seed { class_id, owner_id }),
            _ => Err(Error::Config {
                message: "usage: points-ledger seed <class_id> <owner_id>".to_string(),
            }),
        },
        Some(other) => Err(Error::Config {
            message: format!("unknown command '{other}', expected verify, repair or seed"),
        }),
    }
}

/// Makes sure the directory of a file-backed `SQLite` URL exists.
fn ensure_database_dir(database_url: &str) -> Result<()> {
    let Some(path) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or_default();
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file, env vars can also be set externally
    dotenv().ok();

    let command = parse_command(env::args().skip(1))?;
    let app_config = config::settings::load_default_config()?;

    // 3. Connect and make sure the schema exists
    let database_url = database::get_database_url();
    ensure_database_dir(&database_url)?;
    let db = database::create_connection(&database_url)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {e}"))?;
    database::create_tables(&db).await?;
    info!("Database ready");

    // 4. Run the command
    match command {
        Command::Seed { class_id, owner_id } => {
            let created =
                behavior::seed_default_behaviors(&db, &class_id, &owner_id, &app_config.behaviors)
                    .await?;
            for b in &created {
                info!("Seeded '{}' ({})", b.name, format_points(b.point_value));
            }
            info!("Seeded {} behaviors into class {class_id}", created.len());
            Ok(())
        }
        command @ (Command::Verify | Command::Repair) => {
            let drifted = aggregate::verify_all(&db).await?;
            let Some(first) = drifted.first() else {
                info!("All aggregates match their history");
                return Ok(());
            };

            for report in &drifted {
                error!(
                    "Drift for student {} in class {}: stored {}, replayed {}",
                    report.student_id,
                    report.class_id,
                    format_points(report.stored.unwrap_or_default().total),
                    format_points(report.replayed.total)
                );
            }

            if matches!(command, Command::Repair) {
                for report in &drifted {
                    aggregate::repair_aggregate(&db, &report.class_id, &report.student_id)
                        .await?;
                }
                warn!("Repaired {} drifted aggregates", drifted.len());
                return Ok(());
            }

            Err(first.to_error())
        }
    }
}
