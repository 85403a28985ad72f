use dmphub_core::ids::{CustomizationId, TemplateId, VersionId};
use dmphub_core::overlay::{NodeRef, OverlaySnapshot};
use dmphub_storage::{
    MigrationStatusView, PublishedTemplate, Store, StoreError, UnitCommit, UnitGraph,
};

/// Store wrapper that injects commit failures. Reads pass straight through,
/// so load and evaluate succeed and the failure surfaces at commit time the
/// way real contention or outages would.
pub struct FaultyStore<S> {
    inner: S,
    /// Commits that fail with a retryable conflict before succeeding.
    pub transient_failures: usize,
    /// Unit whose commits always fail with a permanent error.
    pub fail_unit: Option<CustomizationId>,
}

impl<S> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            transient_failures: 0,
            fail_unit: None,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Store> Store for FaultyStore<S> {
    fn list_customizations(
        &self,
        base_template_id: TemplateId,
    ) -> Result<Vec<CustomizationId>, StoreError> {
        self.inner.list_customizations(base_template_id)
    }

    fn load_unit(&self, customization_id: CustomizationId) -> Result<UnitGraph, StoreError> {
        self.inner.load_unit(customization_id)
    }

    fn load_publication(
        &self,
        version_id: VersionId,
    ) -> Result<Option<PublishedTemplate>, StoreError> {
        self.inner.load_publication(version_id)
    }

    fn current_publication(
        &self,
        template_id: TemplateId,
    ) -> Result<Option<PublishedTemplate>, StoreError> {
        self.inner.current_publication(template_id)
    }

    fn load_prior_publication(
        &self,
        template_id: TemplateId,
        before_version: i64,
    ) -> Result<Option<PublishedTemplate>, StoreError> {
        self.inner.load_prior_publication(template_id, before_version)
    }

    fn chain_head(&self, node: NodeRef) -> Result<Option<OverlaySnapshot>, StoreError> {
        self.inner.chain_head(node)
    }

    fn commit_unit(&mut self, commit: &UnitCommit) -> Result<(), StoreError> {
        if self.fail_unit == Some(commit.customization_id) {
            return Err(StoreError::Serialization(
                "injected permanent commit failure".into(),
            ));
        }
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(StoreError::ConflictingWrite {
                customization_id: commit.customization_id.to_string(),
                expected: commit.expected_row_version,
            });
        }
        self.inner.commit_unit(commit)
    }

    fn get_migration_status(
        &self,
        customization_id: CustomizationId,
    ) -> Result<MigrationStatusView, StoreError> {
        self.inner.get_migration_status(customization_id)
    }
}
