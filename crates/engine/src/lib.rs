//! Reconciliation engine: walks every customization of a republished base
//! template, re-evaluates migration statuses against the new publication,
//! and advances overlay snapshot chains, one atomic unit per customization.

pub mod cascade;
pub mod chain;
pub mod error;
pub mod events;
pub mod pool;
pub mod report;

use std::thread;
use std::time::Duration;

use dmphub_core::{
    clock,
    ids::{CustomizationId, TemplateId, VersionId},
    overlay::NodeContent,
    status::{CustomizationStatus, MigrationStatus},
};
use dmphub_storage::{MigrationStatusView, NodeStatusUpdate, Store, StoreError, UnitCommit};
use tracing::{debug, info, warn};

pub use error::EngineError;
pub use events::{Notifier, StatusChange};
pub use report::{NodeDiffError, ReconciliationReport, UnitFailure};

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Attempts per unit before it is recorded as failed.
    pub max_attempts: u32,
    /// First retry delay; doubles on each subsequent attempt.
    pub backoff_base_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 25,
        }
    }
}

/// Outcome of one successfully committed unit.
struct UnitResult {
    previous: MigrationStatus,
    current: MigrationStatus,
    diff_errors: Vec<NodeDiffError>,
}

pub struct Reconciler {
    config: ReconcileConfig,
    notifier: Option<Box<dyn Notifier>>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            config: ReconcileConfig::default(),
            notifier: None,
        }
    }

    pub fn with_config(config: ReconcileConfig) -> Self {
        Self {
            config,
            notifier: None,
        }
    }

    pub fn set_notifier(&mut self, notifier: Box<dyn Notifier>) {
        self.notifier = Some(notifier);
    }

    /// Reconcile every customization of `base_template_id` against the
    /// publication `new_version_id`.
    ///
    /// Only the initial listing can fail; unit failures are isolated and
    /// land in the report.
    pub fn reconcile<S: Store>(
        &self,
        store: &mut S,
        base_template_id: TemplateId,
        new_version_id: VersionId,
    ) -> Result<ReconciliationReport, EngineError> {
        let ids = store.list_customizations(base_template_id)?;
        info!(
            template = %base_template_id,
            version = %new_version_id,
            units = ids.len(),
            "reconciliation started"
        );

        let mut report = ReconciliationReport::default();
        for id in ids {
            self.process_unit(store, id, new_version_id, &mut report);
        }

        info!(
            processed = report.processed,
            stale = report.stale.len(),
            orphaned = report.orphaned.len(),
            failed = report.failed.len(),
            "reconciliation finished"
        );
        Ok(report)
    }

    /// Run one unit with retries, then fold its outcome into the report.
    pub(crate) fn process_unit<S: Store>(
        &self,
        store: &mut S,
        id: CustomizationId,
        new_version_id: VersionId,
        report: &mut ReconciliationReport,
    ) {
        let mut attempt = 1;
        loop {
            match self.attempt_unit(store, id, new_version_id) {
                Ok(result) => {
                    report.record(id, result.current);
                    report.diff_errors.extend(result.diff_errors);
                    if result.previous != result.current {
                        if let Some(notifier) = &self.notifier {
                            notifier.customization_changed(&StatusChange {
                                customization_id: id,
                                previous: result.previous,
                                current: result.current,
                            });
                        }
                    }
                    return;
                }
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let delay = self.config.backoff_base_ms << (attempt - 1);
                    warn!(customization = %id, attempt, error = %e, "retrying unit");
                    thread::sleep(Duration::from_millis(delay));
                    attempt += 1;
                }
                Err(e) => {
                    warn!(customization = %id, attempt, error = %e, "unit failed");
                    report.record_failure(id, e.to_string());
                    return;
                }
            }
        }
    }

    /// One load-evaluate-commit pass over a single unit.
    fn attempt_unit<S: Store>(
        &self,
        store: &mut S,
        id: CustomizationId,
        new_version_id: VersionId,
    ) -> Result<UnitResult, EngineError> {
        let graph = store.load_unit(id)?;
        let previous = graph.customization.migration_status;

        let new = store.load_publication(new_version_id)?;
        let old = match &new {
            Some(publication) => store.load_prior_publication(
                graph.customization.base_template_id,
                publication.template.version,
            )?,
            None => None,
        };

        let outcome = cascade::evaluate_unit(&graph, old.as_ref(), new.as_ref());
        let now = clock::now_ms()?;

        let mut diff_errors = Vec::new();
        let mut node_statuses = Vec::with_capacity(outcome.nodes.len());
        let mut new_snapshots = Vec::new();

        // A node's chain advances only on its own staleness; the root's
        // chain advances only on the root's own template-level drift, not
        // on staleness inherited from children.
        if outcome.root_tentative == MigrationStatus::Stale {
            if let Some(source) = outcome.root_source {
                let head = store.chain_head(graph.customization.node_ref())?;
                if let Some(snap) = chain::plan_advance(
                    head.as_ref(),
                    graph.customization.node_ref(),
                    source,
                    &outcome.root_content,
                    now,
                )? {
                    new_snapshots.push(snap);
                }
            }
        }

        for node in &outcome.nodes {
            node_statuses.push(NodeStatusUpdate {
                node: node.node,
                status: node.status,
            });
            if let Some(error) = &node.diff_error {
                diff_errors.push(NodeDiffError {
                    customization_id: id,
                    node: node.node,
                    error: error.clone(),
                });
            }
            if node.status == MigrationStatus::Stale {
                if let Some(source) = node.source_version_id {
                    let head = store.chain_head(node.node)?;
                    if let Some(snap) =
                        chain::plan_advance(head.as_ref(), node.node, source, &node.content, now)?
                    {
                        new_snapshots.push(snap);
                    }
                }
            }
        }

        debug!(
            customization = %id,
            status = outcome.root_status.as_str(),
            snapshots = new_snapshots.len(),
            "unit evaluated"
        );

        store.commit_unit(&UnitCommit {
            customization_id: id,
            expected_row_version: graph.customization.row_version,
            root_status: outcome.root_status,
            set_status: None,
            node_statuses,
            new_snapshots,
            reconciled_at_ms: Some(now),
        })?;

        Ok(UnitResult {
            previous,
            current: outcome.root_status,
            diff_errors,
        })
    }

    /// Publish an organization's overlay: freeze every node into its chain
    /// against the template's current publication and mark the overlay
    /// published. Re-publishing against the same base version adds no rows.
    pub fn publish_customization<S: Store>(
        &self,
        store: &mut S,
        id: CustomizationId,
    ) -> Result<(), EngineError> {
        let graph = store.load_unit(id)?;
        let publication = store
            .current_publication(graph.customization.base_template_id)?
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "no live publication for template {}",
                    graph.customization.base_template_id
                ))
            })?;

        let now = clock::now_ms()?;
        let mut new_snapshots = Vec::new();

        let mut plan = |node, source, content: &NodeContent| -> Result<(), EngineError> {
            let head = store.chain_head(node)?;
            if let Some(snap) = chain::plan_advance(head.as_ref(), node, source, content, now)? {
                new_snapshots.push(snap);
            }
            Ok(())
        };

        let template_version = publication.template.version_id;
        plan(
            graph.customization.node_ref(),
            template_version,
            &NodeContent::Customization {
                base_template_id: graph.customization.base_template_id,
                status: CustomizationStatus::Published,
            },
        )?;
        for cs in &graph.custom_sections {
            let source = cs
                .follows_section_id
                .and_then(|sid| publication.sections.get(&sid))
                .map(|rec| rec.version_id)
                .unwrap_or(template_version);
            plan(cs.node_ref(), source, &cs.content())?;
        }
        for cq in &graph.custom_questions {
            let source = cq
                .follows_question_id
                .and_then(|qid| publication.questions.get(&qid))
                .map(|rec| rec.version_id)
                .unwrap_or(template_version);
            plan(cq.node_ref(), source, &cq.content())?;
        }
        for sc in &graph.section_customizations {
            let source = publication
                .sections
                .get(&sc.section_id)
                .map(|rec| rec.version_id)
                .unwrap_or(template_version);
            plan(sc.node_ref(), source, &sc.content())?;
        }
        for qc in &graph.question_customizations {
            let source = publication
                .questions
                .get(&qc.question_id)
                .map(|rec| rec.version_id)
                .unwrap_or(template_version);
            plan(qc.node_ref(), source, &qc.content())?;
        }

        info!(customization = %id, snapshots = new_snapshots.len(), "overlay published");

        store.commit_unit(&UnitCommit {
            customization_id: id,
            expected_row_version: graph.customization.row_version,
            root_status: graph.customization.migration_status,
            set_status: Some(CustomizationStatus::Published),
            node_statuses: Vec::new(),
            new_snapshots,
            reconciled_at_ms: None,
        })?;
        Ok(())
    }

    /// Read-only status lookup for dashboards.
    pub fn migration_status<S: Store>(
        &self,
        store: &S,
        id: CustomizationId,
    ) -> Result<MigrationStatusView, EngineError> {
        Ok(store.get_migration_status(id)?)
    }
}
