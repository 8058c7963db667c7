use anyhow::Result;

use cairn::config::CairnConfig;
use cairn::graph::log::OperationLog;

/// Print the most recent operation records, newest first.
pub fn log(config: &CairnConfig, limit: usize, failures_only: bool) -> Result<()> {
    let db_path = config.resolved_db_path();
    // run schema + migrations before the log opens its own connection
    drop(cairn::db::open_database(&db_path)?);
    let log = OperationLog::open(&db_path)?;

    let total = log.count(false)?;
    let failures = log.count(true)?;
    println!("Operation log: {total} record(s), {failures} failure(s)");
    println!();
    println!(
        "{:<26} {:<8} {:<13} {:<4} {}",
        "Timestamp", "Op", "Table", "OK", "Detail"
    );
    println!("{}", "-".repeat(90));

    for record in log.recent(limit)? {
        if failures_only && record.success {
            continue;
        }
        let detail = match (&record.error, &record.message) {
            (Some(error), _) => error.as_str(),
            (None, Some(message)) => message.as_str(),
            (None, None) => "",
        };
        println!(
            "{:<26} {:<8} {:<13} {:<4} {}",
            record.timestamp,
            record.operation.as_str(),
            record.table.as_str(),
            if record.success { "yes" } else { "no" },
            detail
        );
    }

    log.close()?;
    Ok(())
}
