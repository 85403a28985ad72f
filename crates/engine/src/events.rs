use dmphub_core::ids::CustomizationId;
use dmphub_core::status::MigrationStatus;

/// Emitted once per customization whose migration status changed, for
/// downstream user notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub customization_id: CustomizationId,
    pub previous: MigrationStatus,
    pub current: MigrationStatus,
}

pub trait Notifier: Send + Sync {
    fn customization_changed(&self, change: &StatusChange);
}
