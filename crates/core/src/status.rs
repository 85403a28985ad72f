use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Per-node consistency signal maintained by reconciliation.
///
/// Derive order doubles as severity: `Ok < Stale < Orphaned`. A parent's
/// status is the worst over itself and its descendants.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum MigrationStatus {
    Ok,
    Stale,
    Orphaned,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Stale => "stale",
            Self::Orphaned => "orphaned",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "ok" => Ok(Self::Ok),
            "stale" => Ok(Self::Stale),
            "orphaned" => Ok(Self::Orphaned),
            _ => Err(CoreError::InvalidData(format!(
                "unknown migration status: {s}"
            ))),
        }
    }

    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Lifecycle of a customization overlay as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CustomizationStatus {
    Draft,
    Published,
    Archived,
}

impl CustomizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "archived" => Ok(Self::Archived),
            _ => Err(CoreError::InvalidData(format!(
                "unknown customization status: {s}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_order() {
        assert!(MigrationStatus::Ok < MigrationStatus::Stale);
        assert!(MigrationStatus::Stale < MigrationStatus::Orphaned);
        assert_eq!(
            MigrationStatus::Ok.worst(MigrationStatus::Stale),
            MigrationStatus::Stale
        );
        assert_eq!(
            MigrationStatus::Orphaned.worst(MigrationStatus::Stale),
            MigrationStatus::Orphaned
        );
    }

    #[test]
    fn string_roundtrip() {
        for status in [
            MigrationStatus::Ok,
            MigrationStatus::Stale,
            MigrationStatus::Orphaned,
        ] {
            assert_eq!(MigrationStatus::parse(status.as_str()).unwrap(), status);
        }
        for status in [
            CustomizationStatus::Draft,
            CustomizationStatus::Published,
            CustomizationStatus::Archived,
        ] {
            assert_eq!(CustomizationStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(MigrationStatus::parse("bogus").is_err());
    }
}
