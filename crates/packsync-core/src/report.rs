//! # Sync Reports
//!
//! Outcome types folded up from individual saves: an item either saves or
//! is recorded as a failure, and processing goes on. Only abort-level
//! problems travel as [`crate::PackSyncError`].

use crate::version::SkipReason;
use serde::Serialize;
use std::fmt;

/// Kind of entity an outcome refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// A component CI together with its `Requires` relation from the platform.
    Component,
    DependsOn,
    ManagedVia,
    Entrypoint,
    Monitor,
    Payload,
    Procedure,
    Variable,
    Policy,
    /// Any CI visited by the sweep.
    Ci,
    /// Any relation visited by the sweep.
    Relation,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Component => "component",
            Self::DependsOn => "depends_on",
            Self::ManagedVia => "managed_via",
            Self::Entrypoint => "entrypoint",
            Self::Monitor => "monitor",
            Self::Payload => "payload",
            Self::Procedure => "procedure",
            Self::Variable => "variable",
            Self::Policy => "policy",
            Self::Ci => "ci",
            Self::Relation => "relation",
        };
        f.write_str(s)
    }
}

/// One item left unsaved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub kind: ItemKind,
    pub name: String,
    pub reason: String,
}

// =============================================================================
// ENVIRONMENT
// =============================================================================

/// Result of reconciling one environment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct EnvironmentReport {
    pub environment: String,
    pub ns_path: String,
    /// Successful saves (creations and updates).
    pub saved: usize,
    /// Monitor/payload targets shared with another component.
    pub reused: usize,
    pub failures: Vec<ItemFailure>,
}

impl EnvironmentReport {
    #[must_use]
    pub fn new(environment: &str, ns_path: &str) -> Self {
        Self {
            environment: environment.to_string(),
            ns_path: ns_path.to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn saved(&mut self) {
        self.saved += 1;
    }

    pub(crate) fn failed(&mut self, kind: ItemKind, name: &str, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(
            environment = %self.environment,
            item = name,
            kind = %kind,
            %reason,
            "failed to save item"
        );
        self.failures.push(ItemFailure {
            kind,
            name: name.to_string(),
            reason,
        });
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// =============================================================================
// SWEEP
// =============================================================================

/// Result of sweeping one mutable version.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SweepReport {
    /// Scopes visited (`_default` first).
    pub scopes: Vec<String>,
    /// `pending_deletion` -> `default` transitions.
    pub restored: usize,
    /// `default` -> `pending_deletion` transitions.
    pub marked: usize,
    pub failures: Vec<ItemFailure>,
}

impl SweepReport {
    pub(crate) fn failed(&mut self, kind: ItemKind, name: &str, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(item = name, kind = %kind, %reason, "failed to update state");
        self.failures.push(ItemFailure {
            kind,
            name: name.to_string(),
            reason,
        });
    }
}

// =============================================================================
// PACK AND RUN
// =============================================================================

/// How a pack ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PackOutcome {
    Published { version: String, signature: String },
    Skipped { version: String, reason: String },
    Failed { error: String },
}

/// Result of syncing one pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackReport {
    pub pack: String,
    pub outcome: PackOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep: Option<SweepReport>,
    pub environments: Vec<EnvironmentReport>,
}

impl PackReport {
    #[must_use]
    pub fn skipped(pack: &str, version: &str, reason: SkipReason) -> Self {
        Self {
            pack: pack.to_string(),
            outcome: PackOutcome::Skipped {
                version: version.to_string(),
                reason: reason.as_str().to_string(),
            },
            sweep: None,
            environments: Vec::new(),
        }
    }

    #[must_use]
    pub fn failed(pack: &str, error: String) -> Self {
        Self {
            pack: pack.to_string(),
            outcome: PackOutcome::Failed { error },
            sweep: None,
            environments: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, PackOutcome::Failed { .. })
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        matches!(self.outcome, PackOutcome::Published { .. })
    }

    /// Item failures across the sweep and every environment.
    #[must_use]
    pub fn item_failures(&self) -> usize {
        self.sweep.as_ref().map_or(0, |s| s.failures.len())
            + self
                .environments
                .iter()
                .map(|e| e.failures.len())
                .sum::<usize>()
    }
}

/// Result of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RunReport {
    pub packs: Vec<PackReport>,
}

impl RunReport {
    #[must_use]
    pub fn published(&self) -> usize {
        self.packs.iter().filter(|p| p.is_published()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.packs.iter().filter(|p| p.is_failed()).count()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_fold_into_pack_totals() {
        let mut env = EnvironmentReport::new("_default", "/p/1");
        env.saved();
        env.failed(ItemKind::Monitor, "cpu", "rejected");
        assert!(!env.is_clean());

        let mut sweep = SweepReport::default();
        sweep.failed(ItemKind::Ci, "old", "rejected");

        let report = PackReport {
            pack: "web".to_string(),
            outcome: PackOutcome::Published {
                version: "1".to_string(),
                signature: "abc".to_string(),
            },
            sweep: Some(sweep),
            environments: vec![env],
        };
        assert_eq!(report.item_failures(), 2);
        assert!(report.is_published());

        let run = RunReport {
            packs: vec![report, PackReport::failed("db", "boom".to_string())],
        };
        assert_eq!(run.published(), 1);
        assert_eq!(run.failed(), 1);
        assert!(!run.is_success());
    }

    #[test]
    fn item_kind_display_matches_serialized_tag() {
        for kind in [ItemKind::Component, ItemKind::ManagedVia, ItemKind::DependsOn, ItemKind::Ci] {
            let json = serde_json::to_value(kind).expect("serialize");
            assert_eq!(json, serde_json::Value::String(kind.to_string()));
        }
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let report = PackReport::skipped("web", "2.0.1", SkipReason::Unchanged);
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["outcome"]["status"], "skipped");
        assert_eq!(json["outcome"]["reason"], "unchanged");
        assert!(json.get("sweep").is_none());
    }
}
