//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `recordkeep_core` linkage and run one aggregate lifecycle.
//! - Print each change event as one JSON line.
//!
//! Usage: `recordkeep_cli [db_path]` (in-memory when omitted).
//! `RECORDKEEP_LOG_DIR` enables file logging; `RECORDKEEP_LOG_LEVEL`
//! overrides the build-mode default level.

use recordkeep_core::db::{open_db, open_db_in_memory};
use recordkeep_core::{
    default_log_level, init_logging, AggregateFactory, OutboxSink, RecordingSink,
    SqliteRecordRepository,
};
use std::error::Error;
use std::process::ExitCode;

const DEMO_NATURAL_ID: &str = "p";

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("recordkeep_cli error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    if let Ok(log_dir) = std::env::var("RECORDKEEP_LOG_DIR") {
        let level = std::env::var("RECORDKEEP_LOG_LEVEL")
            .unwrap_or_else(|_| default_log_level().to_string());
        init_logging(&level, &log_dir)?;
    }

    println!("recordkeep_core ping={}", recordkeep_core::ping());
    println!("recordkeep_core version={}", recordkeep_core::core_version());

    let mut conn = match std::env::args().nth(1) {
        Some(path) => open_db(path)?,
        None => open_db_in_memory()?,
    };

    let tx = conn.transaction()?;
    let outbox = OutboxSink::new(RecordingSink::new());
    {
        let factory = AggregateFactory::new(SqliteRecordRepository::try_new(&tx)?, &outbox);

        let mut aggregate = factory.find_existing_or_create_new(DEMO_NATURAL_ID)?;
        aggregate.save()?;
        aggregate.update(|it| it.set_value("FOOBAR"))?.save()?;
        let resaved = aggregate.save()?;
        println!("recordkeep_core resave_changed={}", resaved.changed);
        aggregate.delete()?;
    }
    tx.commit()?;
    outbox.flush();

    for event in outbox.downstream().take() {
        println!("{}", serde_json::to_string(&event)?);
    }

    log::info!("event=cli_demo module=cli status=ok");
    Ok(())
}
