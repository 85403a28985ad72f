use dmphub_core::ids::CustomizationId;
use dmphub_core::overlay::NodeRef;
use dmphub_core::status::MigrationStatus;

/// Per-run summary returned by `reconcile`. Unit failures are recorded
/// here, never thrown: one organization's failure must not block the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub processed: usize,
    pub orphaned: Vec<CustomizationId>,
    pub stale: Vec<CustomizationId>,
    pub unchanged: Vec<CustomizationId>,
    pub failed: Vec<UnitFailure>,
    /// Nodes whose snapshots could not be decoded; each was conservatively
    /// marked stale.
    pub diff_errors: Vec<NodeDiffError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub id: CustomizationId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDiffError {
    pub customization_id: CustomizationId,
    pub node: NodeRef,
    pub error: String,
}

impl ReconciliationReport {
    pub fn record(&mut self, id: CustomizationId, status: MigrationStatus) {
        self.processed += 1;
        match status {
            MigrationStatus::Ok => self.unchanged.push(id),
            MigrationStatus::Stale => self.stale.push(id),
            MigrationStatus::Orphaned => self.orphaned.push(id),
        }
    }

    pub fn record_failure(&mut self, id: CustomizationId, error: String) {
        self.processed += 1;
        self.failed.push(UnitFailure { id, error });
    }

    pub fn merge(&mut self, other: ReconciliationReport) {
        self.processed += other.processed;
        self.orphaned.extend(other.orphaned);
        self.stale.extend(other.stale);
        self.unchanged.extend(other.unchanged);
        self.failed.extend(other.failed);
        self.diff_errors.extend(other.diff_errors);
    }
}
