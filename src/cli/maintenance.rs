//! CLI maintenance commands — `repair` and `verify` for graph consistency.

use anyhow::Result;

use cairn::config::CairnConfig;
use cairn::graph::maintenance::{self, ConsistencyReport};

/// Finish interrupted deletes and rebuild the knowledge index if needed.
pub fn repair(config: &CairnConfig) -> Result<()> {
    let coordinator = crate::server::open_coordinator(config)?;
    let report = coordinator.repair()?;

    if report.resumed.is_empty() {
        println!("No interrupted deletes.");
    } else {
        println!("Resumed {} interrupted delete(s):", report.resumed.len());
        for cascade in &report.resumed {
            let outcome = match (&cascade.failed_at, &cascade.entity_id) {
                (Some(step), _) => format!("stopped again at {step}"),
                (None, Some(_)) => format!("done, {} relation(s) removed", cascade.relations_removed),
                (None, None) => "already gone".to_string(),
            };
            println!("  {:<30} {}", cascade.entity_name, outcome);
        }
    }

    match report.rebuilt {
        Some(change) => println!(
            "Knowledge index rebuilt: {} entr(ies) written, {} removed.",
            change.entries_written, change.entries_removed
        ),
        None => println!("Knowledge index already in sync."),
    }

    println!();
    print_consistency(&report.consistency);
    coordinator.log().close()?;
    Ok(())
}

/// Check the stores against each other without changing anything.
pub fn verify(config: &CairnConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = cairn::db::open_database(&db_path)?;
    let policy = config.index.policy()?;

    let report = maintenance::verify_consistency(&conn, &policy)?;
    print_consistency(&report);

    anyhow::ensure!(report.is_consistent(), "graph is inconsistent, run `cairn repair`");
    Ok(())
}

fn print_consistency(report: &ConsistencyReport) {
    println!("Consistency");
    println!("{}", "=".repeat(40));
    println!("  Entities:            {}", report.entities);
    println!("  Relations:           {}", report.relations);
    println!("  Index entries:       {}", report.index_entries);
    println!("  Dangling relations:  {}", report.dangling_relations.len());
    println!("  Index mismatches:    {}", report.index_mismatches.len());
    println!("  Orphan entries:      {}", report.orphan_entries.len());
    println!("  Pending deletes:     {}", report.pending_cascades);
    println!("  Index stale flag:    {}", report.index_stale);

    for mismatch in &report.index_mismatches {
        println!(
            "    {}: missing {:?}, extra {:?}",
            mismatch.entity_id, mismatch.missing, mismatch.extra
        );
    }

    println!();
    if report.is_consistent() {
        println!("Status: OK");
    } else {
        println!("Status: INCONSISTENT");
    }
}
