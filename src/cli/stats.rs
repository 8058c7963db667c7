//! CLI `stats` command — database diagnostics and row counts.

use anyhow::{Context, Result};

use cairn::config::CairnConfig;
use cairn::db;

/// Print a health report for the configured database.
pub fn stats(config: &CairnConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `cairn serve` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path)
        .map(|m| m.len())
        .unwrap_or(0);

    let conn = db::open_database(&db_path)
        .context("failed to open database (may be corrupt)")?;

    let report = db::check_database_health(&conn)
        .context("failed to run health check")?;
    let stored_endpoints = db::migrations::get_index_endpoints(&conn)?;

    println!("Cairn Health Report");
    println!("===================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!();
    println!("Knowledge index:");
    println!("  Built with:      {}", stored_endpoints.as_deref().unwrap_or("(not set)"));
    println!("  Configured:      {}", config.index.endpoints);
    if report.index_stale {
        println!("  WARNING: index flagged stale. Run `cairn repair`.");
    } else if stored_endpoints.as_deref() != Some(config.index.endpoints.as_str()) {
        println!("  WARNING: endpoint policy mismatch. Run `cairn repair`.");
    } else {
        println!("  Status:          OK");
    }
    println!();
    println!("Row counts:");
    println!("  Entities:        {}", report.entity_count);
    println!("  Relations:       {}", report.relation_count);
    println!("  Index entries:   {}", report.index_entry_count);
    println!("  Audit log:       {}", report.log_count);
    if report.pending_cascades > 0 {
        println!(
            "  Pending deletes: {} (interrupted, run `cairn repair`)",
            report.pending_cascades
        );
    }
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery: restore ~/.cairn/graph.db from a backup.");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
