//! Consistency coordinator — multi-store mutations as ordered, idempotent steps.
//!
//! The entity, relation and index stores are separate logical tables. Each
//! store call is atomic (one transaction under the connection lock) but no
//! lock or transaction spans a whole coordinator operation, so a concurrent
//! reader may see an intermediate state between steps. Correctness comes from
//! step ordering and idempotence instead:
//!
//! - entity delete runs the cascade in [`CascadeStep`] order, journaling each
//!   step, and can be rerun from the top at any point;
//! - relation creation inserts first and attaches to the index second; if the
//!   attach fails the index is flagged stale and [`Coordinator::repair`]
//!   rebuilds it;
//! - relation deletion detaches from the index before removing rows, since the
//!   detach needs each relation's endpoints.
//!
//! Every call appends to the injected [`OperationLog`].

use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::entities;
use super::error::{GraphError, Result};
use super::index::{self, IndexChange, IndexPolicy};
use super::log::{Operation, OperationLog, OperationRecord, Table};
use super::maintenance::{self, ConsistencyReport};
use super::relations;
use super::saga::{self, CascadeReport, CascadeStep, PendingCascade};
use super::types::{
    DistillInput, DistillReport, EntityInput, EntityPatch, EntityResult, FailureKind,
    ObservationAddition, ObservationDeletion, Relation, RelationInput, RelationKey,
    RelationResult,
};
use crate::db::migrations;

type StepResult<T> = std::result::Result<T, (CascadeStep, GraphError)>;

/// Orchestrates every mutation of the graph.
pub struct Coordinator {
    db: Arc<Mutex<Connection>>,
    log: Arc<OperationLog>,
    policy: IndexPolicy,
}

/// Outcome of [`Coordinator::repair`].
#[derive(Debug, Serialize)]
pub struct RepairReport {
    /// Interrupted cascades that were rerun.
    pub resumed: Vec<CascadeReport>,
    /// Set when the index had to be rebuilt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rebuilt: Option<IndexChange>,
    /// State after the repair.
    pub consistency: ConsistencyReport,
}

impl Coordinator {
    pub fn new(db: Arc<Mutex<Connection>>, log: Arc<OperationLog>, policy: IndexPolicy) -> Self {
        Self { db, log, policy }
    }

    /// Shared connection, for read paths.
    pub fn db(&self) -> &Arc<Mutex<Connection>> {
        &self.db
    }

    pub fn log(&self) -> &Arc<OperationLog> {
        &self.log
    }

    pub fn policy(&self) -> &IndexPolicy {
        &self.policy
    }

    /// Run one store call under the connection lock.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.db.lock().map_err(|_| GraphError::LockPoisoned)?;
        f(&mut conn)
    }

    /// Append to the audit log. The log is observational: a failed append is
    /// reported but never fails the mutation it describes.
    fn record(&self, record: OperationRecord) {
        if let Err(e) = self.log.append(&record) {
            tracing::error!(
                error = %e,
                operation = %record.operation,
                table = %record.table,
                "failed to append operation record"
            );
        }
    }

    fn record_batch<T>(
        &self,
        operation: Operation,
        table: Table,
        outcome: &Result<Vec<T>>,
        succeeded: impl Fn(&T) -> bool,
    ) {
        let record = match outcome {
            Ok(results) => {
                let ok = results.iter().filter(|r| succeeded(r)).count();
                let summary = format!("{ok} of {} item(s) applied", results.len());
                if ok == results.len() {
                    OperationRecord::succeeded(operation, table, summary)
                } else {
                    OperationRecord::failed(
                        operation,
                        table,
                        format!("{} item(s) failed", results.len() - ok),
                    )
                    .with_message(summary)
                }
            }
            Err(e) => OperationRecord::failed(operation, table, e.to_string()),
        };
        self.record(record);
    }

    // ── Entities ─────────────────────────────────────────────────────

    pub fn create_entities(&self, items: &[EntityInput]) -> Result<Vec<EntityResult>> {
        let outcome = self.with_conn(|c| entities::create_entities(c, items));
        self.record_batch(Operation::Create, Table::Entities, &outcome, |r| r.success);
        outcome
    }

    pub fn add_observations(&self, items: &[ObservationAddition]) -> Result<Vec<EntityResult>> {
        let outcome = self.with_conn(|c| entities::add_observations(c, items));
        self.record_batch(Operation::Update, Table::Observations, &outcome, |r| r.success);
        outcome
    }

    pub fn delete_observations(&self, items: &[ObservationDeletion]) -> Result<Vec<EntityResult>> {
        let outcome = self.with_conn(|c| entities::delete_observations(c, items));
        self.record_batch(Operation::Delete, Table::Observations, &outcome, |r| r.success);
        outcome
    }

    pub fn update_entities(&self, patches: &[EntityPatch]) -> Result<Vec<EntityResult>> {
        let outcome = self.with_conn(|c| entities::update_entities(c, patches));
        self.record_batch(Operation::Update, Table::Entities, &outcome, |r| r.success);
        outcome
    }

    /// Delete entities by name, cascading to their relations and index
    /// entries. One result per name; a missing name is a not-found result and
    /// an interrupted cascade is reported as such, never as an error.
    pub fn delete_entities(&self, names: &[String]) -> Result<Vec<EntityResult>> {
        Ok(names
            .iter()
            .map(|name| cascade_result(self.delete_entity(name)))
            .collect())
    }

    /// Run the delete cascade for one entity.
    ///
    /// 1. resolve the name (missing: no-op)
    /// 2. collect incident relations
    /// 3. detach them from every endpoint's index entry
    /// 4. remove the entity's own index entry
    /// 5. delete the relations
    /// 6. delete the entity
    /// 7. log a summary
    ///
    /// A failure stops the cascade without undoing completed steps and leaves
    /// the saga journal row in place. Rerunning converges.
    pub fn delete_entity(&self, name: &str) -> CascadeReport {
        self.cascade(name, None)
    }

    /// Rerun an unfinished cascade. The journaled id wins over the name, so
    /// a rename between the interruption and the resume still deletes the
    /// right entity.
    fn resume_cascade(&self, pending: &PendingCascade) -> CascadeReport {
        self.cascade(&pending.entity_name, pending.entity_id.as_deref())
    }

    fn cascade(&self, name: &str, entity_id: Option<&str>) -> CascadeReport {
        let mut report = CascadeReport::new(name);
        if let Err((step, e)) = self.run_cascade(name, entity_id, &mut report) {
            tracing::warn!(entity = %name, step = %step, error = %e, "delete cascade interrupted");
            report.failed_at = Some(step);
            report.error = Some(e.to_string());
            self.record(
                OperationRecord::failed(
                    Operation::Delete,
                    Table::Entities,
                    format!("cascade for '{name}' stopped at {step}: {e}"),
                )
                .with_message(cascade_summary(&report)),
            );
        }
        report
    }

    fn run_cascade(
        &self,
        name: &str,
        entity_id: Option<&str>,
        report: &mut CascadeReport,
    ) -> StepResult<()> {
        let entity = self
            .with_conn(|c| {
                let entity = match entity_id {
                    Some(id) => entities::get_entity(c, id)?,
                    None => entities::get_entity_by_name(c, name)?,
                };
                match &entity {
                    Some(e) => saga::begin(c, name, &e.id)?,
                    // a journal row for a vanished entity is a finished cascade
                    None => saga::finish(c, name)?,
                }
                Ok(entity)
            })
            .map_err(|e| (CascadeStep::Resolved, e))?;

        let Some(entity) = entity else {
            tracing::debug!(entity = %name, "delete skipped, entity not found");
            self.record(OperationRecord::failed(
                Operation::Delete,
                Table::Entities,
                format!("entity not found: {name}"),
            ));
            return Ok(());
        };
        report.entity_id = Some(entity.id.clone());
        report.completed.push(CascadeStep::Resolved);

        let incident = self.cascade_step(name, CascadeStep::Collected, report, |c| {
            relations::relations_incident_to(c, &entity.id)
        })?;

        let detached = self.cascade_step(name, CascadeStep::IndexDetached, report, |c| {
            index::detach(c, &self.policy, &incident)
        })?;
        report.index_entries_written += detached.entries_written;
        report.index_entries_removed += detached.entries_removed;

        let own_removed = self.cascade_step(name, CascadeStep::OwnEntryRemoved, report, |c| {
            index::remove_entry(c, &entity.id)
        })?;
        if own_removed {
            report.index_entries_removed += 1;
        }

        let ids: Vec<String> = incident.iter().map(|r| r.id.clone()).collect();
        let removed = self.cascade_step(name, CascadeStep::RelationsDeleted, report, |c| {
            relations::delete_relation_rows(c, &ids)
        })?;
        report.relations_removed = removed;

        self.cascade_step(name, CascadeStep::EntityDeleted, report, |c| {
            match entities::delete_entity_row(c, &entity.id) {
                // a concurrent cascade got there first
                Err(GraphError::NotFound { .. }) => Ok(()),
                other => other,
            }
        })?;

        self.record(OperationRecord::succeeded(
            Operation::Delete,
            Table::Entities,
            cascade_summary(report),
        ));
        report.completed.push(CascadeStep::Logged);

        if let Err(e) = self.with_conn(|c| saga::finish(c, name)) {
            tracing::warn!(entity = %name, error = %e, "cascade done but journal row not cleared");
        }

        tracing::info!(
            entity = %name,
            relations = report.relations_removed,
            index_written = report.index_entries_written,
            index_removed = report.index_entries_removed,
            "entity deleted"
        );
        Ok(())
    }

    fn cascade_step<T>(
        &self,
        name: &str,
        step: CascadeStep,
        report: &mut CascadeReport,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> StepResult<T> {
        let value = self
            .with_conn(|c| {
                let value = f(c)?;
                saga::advance(c, name, step)?;
                Ok(value)
            })
            .map_err(|e| (step, e))?;
        report.completed.push(step);
        Ok(value)
    }

    // ── Relations ────────────────────────────────────────────────────

    /// Create relations (all-or-nothing), then attach them to the index.
    pub fn create_relations(&self, items: &[RelationInput]) -> Result<Vec<RelationResult>> {
        let outcome = match self.with_conn(|c| relations::create_relations(c, items)) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.record(OperationRecord::failed(Operation::Create, Table::Relations, e.to_string()));
                return Err(e);
            }
        };

        if outcome.created.len() < items.len() {
            let invalid = outcome.results.iter().filter(|r| r.kind != Some(FailureKind::Rejected)).count();
            self.record(OperationRecord::failed(
                Operation::Create,
                Table::Relations,
                format!("batch of {} rejected: {invalid} invalid relation(s)", items.len()),
            ));
            return Ok(outcome.results);
        }

        self.record(OperationRecord::succeeded(
            Operation::Create,
            Table::Relations,
            format!("created {} relation(s)", outcome.created.len()),
        ));
        self.attach_created(&outcome.created);
        Ok(outcome.results)
    }

    /// Second half of relation creation. The relations are already committed,
    /// so a failure here leaves a gap that only a rebuild closes.
    fn attach_created(&self, created: &[Relation]) {
        if created.is_empty() {
            return;
        }
        // A cascade may have removed some of them since they were committed;
        // only relations still present are attached.
        let attached = self.with_conn(|c| {
            let ids: Vec<String> = created.iter().map(|r| r.id.clone()).collect();
            let live = relations::relations_by_ids(c, &ids)?;
            let change = index::attach(c, &self.policy, &live)?;
            Ok((live.len(), change))
        });
        match attached {
            Ok((live, change)) => {
                if live < created.len() {
                    tracing::debug!(
                        skipped = created.len() - live,
                        "relations deleted before attach, skipped"
                    );
                }
                self.record(OperationRecord::succeeded(
                    Operation::Update,
                    Table::Knowledge,
                    format!(
                        "attached {live} of {} relation(s), {} entr(ies) written",
                        created.len(),
                        change.entries_written
                    ),
                ))
            }
            Err(e) => self.flag_gap(
                Operation::Update,
                format!("attach of {} committed relation(s) failed: {e}", created.len()),
            ),
        }
    }

    fn flag_gap(&self, operation: Operation, detail: String) {
        let gap = GraphError::ConsistencyGap(detail);
        tracing::error!(error = %gap, "knowledge index left out of sync, run repair to rebuild it");
        if let Err(e) = self.with_conn(|c| Ok(migrations::set_index_stale(c, true)?)) {
            tracing::error!(error = %e, "failed to flag knowledge index as stale");
        }
        self.record(OperationRecord::failed(operation, Table::Knowledge, gap.to_string()));
    }

    /// Delete relations by key: match, detach from the index, delete rows.
    pub fn delete_relations(&self, keys: &[RelationKey]) -> Result<Vec<RelationResult>> {
        let matched = match self.with_conn(|c| relations::match_relations(c, keys)) {
            Ok(matched) => matched,
            Err(e) => {
                self.record(OperationRecord::failed(Operation::Delete, Table::Relations, e.to_string()));
                return Err(e);
            }
        };
        let missing = keys.len() - matched.results.iter().filter(|r| r.success).count();

        if !matched.matched.is_empty() {
            // detach first: it needs the endpoints of rows that are about to go
            match self.with_conn(|c| index::detach(c, &self.policy, &matched.matched)) {
                Ok(change) => self.record(OperationRecord::succeeded(
                    Operation::Update,
                    Table::Knowledge,
                    format!(
                        "detached {} relation(s), {} entr(ies) written, {} removed",
                        matched.matched.len(),
                        change.entries_written,
                        change.entries_removed
                    ),
                )),
                Err(e) => {
                    // nothing has changed yet
                    self.record(OperationRecord::failed(Operation::Delete, Table::Relations, e.to_string()));
                    return Err(e);
                }
            }

            let ids: Vec<String> = matched.matched.iter().map(|r| r.id.clone()).collect();
            if let Err(e) = self.with_conn(|c| relations::delete_relation_rows(c, &ids)) {
                self.flag_gap(
                    Operation::Delete,
                    format!("{} relation(s) detached but not deleted: {e}", ids.len()),
                );
                return Err(e);
            }
        }

        let summary = format!("deleted {} relation(s)", matched.matched.len());
        self.record(if missing == 0 {
            OperationRecord::succeeded(Operation::Delete, Table::Relations, summary)
        } else {
            OperationRecord::failed(
                Operation::Delete,
                Table::Relations,
                format!("{missing} relation(s) not found"),
            )
            .with_message(summary)
        });
        Ok(matched.results)
    }

    // ── Journals ─────────────────────────────────────────────────────

    /// Fold the entities and relations extracted from one journal into the
    /// graph. Entities are created or merged; relations whose tuple already
    /// exists gain the journal ref; the rest are created all-or-nothing.
    /// Running the same journal twice changes nothing the second time.
    pub fn distill(&self, input: &DistillInput) -> Result<DistillReport> {
        if input.journal_id.trim().is_empty() {
            return Err(GraphError::Validation("journal id must not be empty".into()));
        }
        let outcome = self.distill_steps(input);
        let record = match &outcome {
            Ok(report) => OperationRecord::succeeded(
                Operation::Distill,
                Table::Entities,
                format!(
                    "journal {}: {} entities created, {} merged, {} relations created, {} linked",
                    report.journal_id,
                    report.entities_created,
                    report.entities_merged,
                    report.relations_created,
                    report.relations_linked
                ),
            ),
            Err(e) => OperationRecord::failed(
                Operation::Distill,
                Table::Entities,
                format!("journal {}: {e}", input.journal_id),
            ),
        };
        self.record(record);
        outcome
    }

    fn distill_steps(&self, input: &DistillInput) -> Result<DistillReport> {
        let journal_id = input.journal_id.as_str();
        let mut report = DistillReport {
            journal_id: journal_id.to_string(),
            ..Default::default()
        };

        for merged in self.with_conn(|c| entities::merge_entities(c, &input.entities, journal_id))? {
            if merged.created {
                report.entities_created += 1;
            } else if merged.result.success {
                report.entities_merged += 1;
            }
            report.entities.push(merged.result);
        }

        // Existing tuples only gain the journal ref.
        let keys: Vec<RelationKey> = input.relations.iter().map(RelationKey::from).collect();
        let existing = self.with_conn(|c| relations::match_relations(c, &keys))?;
        let linked: Vec<String> = existing.matched.iter().map(|r| r.id.clone()).collect();
        if !linked.is_empty() {
            self.with_conn(|c| relations::add_journal_ref(c, &linked, journal_id))?;
        }

        // New tuples, each once, go through the all-or-nothing path.
        let mut first_of: HashMap<(&str, &str, &str), usize> = HashMap::new();
        let mut fresh: Vec<RelationInput> = Vec::new();
        let mut slot: Vec<Option<usize>> = Vec::with_capacity(keys.len());
        for (item, found) in input.relations.iter().zip(&existing.results) {
            if found.success {
                slot.push(None);
                continue;
            }
            let tuple = (item.from.as_str(), item.to.as_str(), item.relation_type.as_str());
            let position = *first_of.entry(tuple).or_insert_with(|| {
                let mut fresh_item = item.clone();
                fresh_item.journal_refs.push(journal_id.to_string());
                fresh.push(fresh_item);
                fresh.len() - 1
            });
            slot.push(Some(position));
        }

        let created = if fresh.is_empty() {
            relations::CreatedRelations::default()
        } else {
            self.with_conn(|c| relations::create_relations(c, &fresh))?
        };
        self.attach_created(&created.created);
        report.relations_created = created.created.len();

        for (found, position) in existing.results.into_iter().zip(slot) {
            match position {
                None => {
                    report.relations_linked += 1;
                    report.relations.push(found);
                }
                Some(p) => report.relations.push(created.results[p].clone()),
            }
        }

        Ok(report)
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Re-derive the knowledge index from the relations table.
    pub fn rebuild_index(&self) -> Result<IndexChange> {
        let outcome = self.with_conn(|c| index::rebuild_from_relations(c, &self.policy));
        self.record(match &outcome {
            Ok(change) => OperationRecord::succeeded(
                Operation::Update,
                Table::Knowledge,
                format!(
                    "index rebuilt: {} entr(ies) written, {} removed",
                    change.entries_written, change.entries_removed
                ),
            ),
            Err(e) => OperationRecord::failed(Operation::Update, Table::Knowledge, e.to_string()),
        });
        outcome
    }

    /// Resume interrupted cascades, rebuild the index if it is flagged stale,
    /// was built under a different endpoint policy, or fails verification.
    pub fn repair(&self) -> Result<RepairReport> {
        let pending = self.with_conn(|c| saga::pending(c))?;
        let mut resumed = Vec::with_capacity(pending.len());
        for cascade in pending {
            tracing::info!(
                entity = %cascade.entity_name,
                last_step = %cascade.last_step,
                "resuming interrupted delete cascade"
            );
            resumed.push(self.resume_cascade(&cascade));
        }

        let needs_rebuild = self.with_conn(|c| {
            let stale = migrations::is_index_stale(c)?;
            let built_with = migrations::get_index_endpoints(c)?;
            let policy_changed = built_with.as_deref() != Some(self.policy.endpoints.as_str());
            let report = maintenance::verify_consistency(c, &self.policy)?;
            Ok(stale || policy_changed || !report.index_in_sync())
        })?;

        let rebuilt = if needs_rebuild {
            Some(self.rebuild_index()?)
        } else {
            None
        };

        let consistency = self.with_conn(|c| maintenance::verify_consistency(c, &self.policy))?;
        Ok(RepairReport {
            resumed,
            rebuilt,
            consistency,
        })
    }
}

fn cascade_summary(report: &CascadeReport) -> String {
    format!(
        "entity '{}' ({}): {} relation(s) removed, {} index entr(ies) updated, {} removed",
        report.entity_name,
        report.entity_id.as_deref().unwrap_or("-"),
        report.relations_removed,
        report.index_entries_written,
        report.index_entries_removed
    )
}

fn cascade_result(report: CascadeReport) -> EntityResult {
    if report.is_not_found() {
        let err = GraphError::not_found("entity", &report.entity_name);
        return EntityResult::failed(&report.entity_name, FailureKind::NotFound, err.to_string());
    }
    match (report.entity_id, report.failed_at) {
        (Some(id), None) => EntityResult::ok(report.entity_name, id),
        (id, step) => {
            let step = step.unwrap_or(CascadeStep::Resolved);
            let mut result = EntityResult::failed(
                &report.entity_name,
                FailureKind::Interrupted,
                format!(
                    "delete interrupted at {step}: {}; retrying is safe",
                    report.error.as_deref().unwrap_or("unknown error")
                ),
            );
            result.id = id;
            result
        }
    }
}
