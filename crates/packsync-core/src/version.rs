//! # Version Resolver
//!
//! Decides which version an upload corresponds to, or that there is nothing
//! to do.
//!
//! ## Modes
//!
//! - **Semver**: every content change is published as a new immutable patch
//!   under `major.minor`. An explicitly named patch is published as-is unless
//!   it already exists.
//! - **Mutable**: one version per major, updated in place. A reload forces a
//!   republish even when the signature did not change.
//!
//! The resolver is pure: it gets the existing Version CIs of the pack and
//! returns a [`Resolution`]. Writing the Version CI is the orchestrator's job.

use crate::pack::PackDefinition;
use crate::primitives::{COMMIT_ATTRIBUTE, ENABLED_ATTRIBUTE, VISIBILITY_ALT_NS_TAG};
use crate::types::{Ci, PackSyncError};
use std::cmp::Ordering;
use std::fmt;

// =============================================================================
// VERSION STRINGS
// =============================================================================

/// A parsed `major[.minor[.patch]]` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionSpec {
    pub major: u64,
    pub minor: Option<u64>,
    pub patch: Option<u64>,
}

impl VersionSpec {
    pub fn parse(s: &str) -> Result<Self, PackSyncError> {
        let invalid = || PackSyncError::InvalidVersion(s.to_string());
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(invalid());
        }
        let number = |p: &str| p.parse::<u64>().map_err(|_| invalid());
        Ok(Self {
            major: number(parts[0])?,
            minor: parts.get(1).map(|p| number(p)).transpose()?,
            patch: parts.get(2).map(|p| number(p)).transpose()?,
        })
    }

    /// Full `major.minor.patch` form, missing minor treated as 0.
    fn triple(&self, patch: u64) -> String {
        format!("{}.{}.{}", self.major, self.minor.unwrap_or(0), patch)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.major)?;
        if let Some(minor) = self.minor {
            write!(f, ".{minor}")?;
        }
        if let Some(patch) = self.patch {
            write!(f, ".{patch}")?;
        }
        Ok(())
    }
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// Lifecycle mode of a pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionMode {
    Semver,
    Mutable { reload: bool },
}

/// Flags a published version inherits from its lineage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionFlags {
    pub enabled: bool,
    /// Organization visibility tag value.
    pub visibility: Option<String>,
}

impl Default for VersionFlags {
    fn default() -> Self {
        Self {
            enabled: true,
            visibility: None,
        }
    }
}

impl VersionFlags {
    fn of(ci: &Ci) -> Self {
        Self {
            enabled: ci.attributes.get(ENABLED_ATTRIBUTE) != Some("false"),
            visibility: ci.alt_ns.get(VISIBILITY_ALT_NS_TAG).cloned(),
        }
    }
}

/// Why nothing is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The pack is marked `ignore`.
    Ignored,
    /// An explicitly named patch already exists.
    ExplicitVersionExists,
    /// The stored commit already matches the pack signature.
    Unchanged,
}

impl SkipReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::ExplicitVersionExists => "version exists",
            Self::Unchanged => "unchanged",
        }
    }
}

/// What to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPlan {
    pub version: String,
    pub signature: String,
    pub flags: VersionFlags,
    /// The Version CI to update in place (mutable mode only).
    pub existing: Option<Ci>,
}

/// Outcome of version resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Skip {
        version: String,
        reason: SkipReason,
        flags: VersionFlags,
    },
    Publish(PublishPlan),
}

impl Resolution {
    #[must_use]
    pub fn version(&self) -> &str {
        match self {
            Self::Skip { version, .. } => version,
            Self::Publish(plan) => &plan.version,
        }
    }
}

// =============================================================================
// RESOLVER
// =============================================================================

/// Computes the target version of a pack upload.
#[derive(Debug, Clone)]
pub struct VersionResolver {
    default_version: String,
}

impl VersionResolver {
    #[must_use]
    pub fn new(default_version: impl Into<String>) -> Self {
        Self {
            default_version: default_version.into(),
        }
    }

    fn declared<'a>(&'a self, pack: &'a PackDefinition) -> &'a str {
        pack.version
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(&self.default_version)
    }

    /// Version a mutable-mode pack lives under: the major segment of its
    /// declared version or of the default.
    pub fn mutable_version(&self, pack: &PackDefinition) -> Result<String, PackSyncError> {
        Ok(VersionSpec::parse(self.declared(pack))?.major.to_string())
    }

    /// Resolve the version of `pack` against the Version CIs already stored
    /// for it.
    pub fn resolve(
        &self,
        pack: &PackDefinition,
        existing: &[Ci],
        mode: VersionMode,
    ) -> Result<Resolution, PackSyncError> {
        let signature = pack.signature()?;
        match mode {
            VersionMode::Semver => self.resolve_semver(pack, existing, signature),
            VersionMode::Mutable { reload } => {
                self.resolve_mutable(pack, existing, signature, reload)
            }
        }
    }

    fn resolve_semver(
        &self,
        pack: &PackDefinition,
        existing: &[Ci],
        signature: String,
    ) -> Result<Resolution, PackSyncError> {
        let spec = VersionSpec::parse(self.declared(pack))?;
        let minor = spec.minor.unwrap_or(0);

        let same_major: Vec<(&Ci, VersionSpec)> = existing
            .iter()
            .filter_map(|ci| VersionSpec::parse(&ci.name).ok().map(|v| (ci, v)))
            .filter(|(_, v)| v.major == spec.major)
            .collect();

        let latest_patch = same_major
            .iter()
            .filter(|(_, v)| v.minor.unwrap_or(0) == minor)
            .filter_map(|(ci, v)| v.patch.map(|p| (*ci, p)))
            .max_by_key(|(_, p)| *p);

        // Flags come from the latest patch of this minor; without one, from
        // the lexicographically last version of the major.
        let flags = match latest_patch {
            Some((ci, _)) => VersionFlags::of(ci),
            None => same_major
                .iter()
                .map(|(ci, _)| *ci)
                .max_by(|a, b| a.name.cmp(&b.name))
                .map(VersionFlags::of)
                .unwrap_or_default(),
        };

        if pack.ignore {
            return Ok(Resolution::Skip {
                version: spec.to_string(),
                reason: SkipReason::Ignored,
                flags,
            });
        }

        if let Some(patch) = spec.patch {
            let version = spec.triple(patch);
            let taken = same_major
                .iter()
                .any(|(_, v)| v.minor.unwrap_or(0) == minor && v.patch == Some(patch));
            if taken {
                return Ok(Resolution::Skip {
                    version,
                    reason: SkipReason::ExplicitVersionExists,
                    flags,
                });
            }
            return Ok(Resolution::Publish(PublishPlan {
                version,
                signature,
                flags,
                existing: None,
            }));
        }

        let next_patch = match latest_patch {
            Some((ci, patch)) => {
                if ci.attributes.get(COMMIT_ATTRIBUTE) == Some(signature.as_str()) {
                    return Ok(Resolution::Skip {
                        version: ci.name.clone(),
                        reason: SkipReason::Unchanged,
                        flags,
                    });
                }
                patch + 1
            }
            None => 0,
        };

        Ok(Resolution::Publish(PublishPlan {
            version: spec.triple(next_patch),
            signature,
            flags,
            existing: None,
        }))
    }

    fn resolve_mutable(
        &self,
        pack: &PackDefinition,
        existing: &[Ci],
        signature: String,
        reload: bool,
    ) -> Result<Resolution, PackSyncError> {
        let version = self.mutable_version(pack)?;
        let current = existing.iter().find(|ci| ci.name == version);
        let flags = current.map(VersionFlags::of).unwrap_or_default();

        if pack.ignore {
            return Ok(Resolution::Skip {
                version,
                reason: SkipReason::Ignored,
                flags,
            });
        }

        let unchanged = current
            .is_some_and(|ci| ci.attributes.get(COMMIT_ATTRIBUTE) == Some(signature.as_str()));
        if unchanged && !reload {
            return Ok(Resolution::Skip {
                version,
                reason: SkipReason::Unchanged,
                flags,
            });
        }

        Ok(Resolution::Publish(PublishPlan {
            version,
            signature,
            flags,
            existing: current.cloned(),
        }))
    }
}

/// Order version names numerically where they parse, by text otherwise.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (VersionSpec::parse(a), VersionSpec::parse(b)) {
        (Ok(x), Ok(y)) => (x.major, x.minor, x.patch).cmp(&(y.major, y.minor, y.patch)),
        _ => a.cmp(b),
    }
}

// =============================================================================
// TESTS
// =============================================================================
