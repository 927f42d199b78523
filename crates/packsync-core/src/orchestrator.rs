//! # Pack Sync Orchestrator
//!
//! Drives one run: pre-validation, then per pack version resolution,
//! sweeping, reconciliation of every environment and version publication.
//!
//! ## Publication
//!
//! The Version CI is written in two phases:
//! 1. **Stage**: the Version CI is saved with an empty `commit`.
//! 2. **Commit**: after every environment reconciled, `commit` is stamped
//!    with the pack signature.
//!
//! In semver mode a failure between the two phases destroys the staged
//! Version CI, so no half-published immutable version survives. In mutable
//! mode the empty commit makes the next run republish.
//!
//! ## Layout
//!
//! ```text
//! <nspath>/<register>/packs                     Pack CIs
//! <nspath>/<register>/packs/<pack>              Version CIs
//! <nspath>/<register>/packs/<pack>/<version>    design graph, Mode CIs
//! <nspath>/<register>/packs/<pack>/<version>/<env>  environment graph
//! ```

use crate::docs::{DocPublisher, NoopDocPublisher};
use crate::pack::PackDefinition;
use crate::primitives::{
    COMMIT_ATTRIBUTE, DEFAULT_ENVIRONMENT, DEFAULT_NSPATH, DESCRIPTION_ATTRIBUTE,
    ENABLED_ATTRIBUTE, MODE_CLASS, PACK_CLASS, PACKS_SEGMENT, VERSION_CLASS,
    VISIBILITY_ALT_NS_TAG, package_for,
};
use crate::reconcile::{Scope, reconcile};
use crate::report::{EnvironmentReport, PackOutcome, PackReport, RunReport};
use crate::store::{CiQuery, ResourceStore};
use crate::sweep::sweep;
use crate::types::{Ci, PackSyncError};
use crate::version::{
    PublishPlan, Resolution, SkipReason, VersionMode, VersionResolver, compare_versions,
};
use std::collections::BTreeMap;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Run-wide settings, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Root namespace (`/public`).
    pub nspath: String,
    /// Source group the packs belong to.
    pub register: String,
    /// Version used by packs that declare none.
    pub default_version: String,
    /// Publish every pack in semver mode.
    pub semver: bool,
    /// Republish mutable versions even when unchanged.
    pub reload: bool,
    /// Replaces every pack's declared version.
    pub force_version: Option<String>,
    /// Comment written on every saved entity.
    pub comments: String,
}

impl SyncConfig {
    #[must_use]
    pub fn new(register: impl Into<String>, default_version: impl Into<String>) -> Self {
        Self {
            nspath: DEFAULT_NSPATH.to_string(),
            register: register.into(),
            default_version: default_version.into(),
            semver: false,
            reload: false,
            force_version: None,
            comments: "packsync".to_string(),
        }
    }

    /// `<nspath>/<register>/packs`.
    #[must_use]
    pub fn packs_ns(&self) -> String {
        format!(
            "{}/{}/{PACKS_SEGMENT}",
            self.nspath.trim_end_matches('/'),
            self.register
        )
    }
}

/// How a run reacts to a failing pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Stop at the first failed pack.
    Selected,
    /// Record the failure and continue with the next pack.
    All,
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Syncs pack definitions into a [`ResourceStore`].
pub struct PackSync<S: ResourceStore, D: DocPublisher = NoopDocPublisher> {
    store: S,
    docs: D,
    config: SyncConfig,
    resolver: VersionResolver,
}

impl<S: ResourceStore> PackSync<S, NoopDocPublisher> {
    #[must_use]
    pub fn new(store: S, config: SyncConfig) -> Self {
        Self::with_docs(store, config, NoopDocPublisher)
    }
}

impl<S: ResourceStore, D: DocPublisher> PackSync<S, D> {
    #[must_use]
    pub fn with_docs(store: S, config: SyncConfig, docs: D) -> Self {
        let resolver = VersionResolver::new(config.default_version.clone());
        Self {
            store,
            docs,
            config,
            resolver,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn docs(&self) -> &D {
        &self.docs
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn into_store(self) -> S {
        self.store
    }

    fn pack_ns(&self, pack_name: &str) -> String {
        format!("{}/{pack_name}", self.config.packs_ns())
    }

    // =========================================================================
    // PRE-VALIDATION
    // =========================================================================

    /// Fail when two definitions share group, name and version.
    pub fn validate_unique(&self, packs: &[PackDefinition]) -> Result<(), PackSyncError> {
        let default_major = self
            .config
            .default_version
            .split('.')
            .next()
            .unwrap_or_default();
        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        for pack in packs {
            let version = self
                .config
                .force_version
                .as_deref()
                .or(pack.version.as_deref())
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default_major);
            let key = format!(
                "{}**{}**{version}",
                self.config.register,
                pack.name.to_lowercase()
            );
            let origin = pack.origin.clone().unwrap_or_else(|| pack.name.clone());
            if let Some(first) = seen.get(&key) {
                return Err(PackSyncError::PackCollision {
                    key,
                    first: first.clone(),
                    second: origin,
                });
            }
            seen.insert(key, origin);
        }
        Ok(())
    }

    /// Fail when the source group has not been registered.
    pub fn ensure_root(&self) -> Result<(), PackSyncError> {
        let ns = self.config.packs_ns();
        if self.store.namespace_exists(&ns)? {
            Ok(())
        } else {
            Err(PackSyncError::MissingNamespace(ns))
        }
    }

    /// Create the namespace packs of this source group live in.
    pub fn register(&mut self) -> Result<String, PackSyncError> {
        let ns = self.config.packs_ns();
        self.store.create_namespace(&ns)?;
        tracing::info!(ns = %ns, "registered source");
        Ok(ns)
    }

    /// Version CIs of a pack, oldest first.
    pub fn versions(&self, pack_name: &str) -> Result<Vec<Ci>, PackSyncError> {
        let mut versions = self.store.find_cis(
            &CiQuery::in_namespace(self.pack_ns(&pack_name.to_lowercase())).class(VERSION_CLASS),
        )?;
        versions.sort_by(|a, b| compare_versions(&a.name, &b.name));
        Ok(versions)
    }

    // =========================================================================
    // RUN
    // =========================================================================

    /// Sync `packs` in order.
    ///
    /// Collisions and a missing source namespace abort before anything is
    /// written. A failing pack ends the run in [`RunMode::Selected`] and is
    /// recorded and skipped over in [`RunMode::All`].
    pub fn run(&mut self, packs: &[PackDefinition], mode: RunMode) -> Result<RunReport, PackSyncError> {
        self.validate_unique(packs)?;
        self.ensure_root()?;

        let mut run = RunReport::default();
        for pack in packs {
            match self.sync_pack(pack) {
                Ok(report) => run.packs.push(report),
                Err(e) => {
                    tracing::error!(pack = %pack.name, error = %e, "pack sync failed");
                    run.packs.push(PackReport::failed(&pack.name, e.to_string()));
                    if mode == RunMode::Selected {
                        break;
                    }
                }
            }
        }
        tracing::info!(
            packs = run.packs.len(),
            published = run.published(),
            failed = run.failed(),
            "sync finished"
        );
        Ok(run)
    }

    /// Resolve, sweep, reconcile and publish one pack.
    pub fn sync_pack(&mut self, pack: &PackDefinition) -> Result<PackReport, PackSyncError> {
        let mut pack = pack.clone();
        pack.name = pack.name.to_lowercase();
        if let Some(forced) = &self.config.force_version {
            pack.version = Some(forced.clone());
        }
        pack.validate()?;

        let semver = self.config.semver || pack.semver;
        let mode = if semver {
            if self.config.reload {
                tracing::warn!(pack = %pack.name, "reload has no effect in semver mode, versions are immutable");
            }
            VersionMode::Semver
        } else {
            VersionMode::Mutable {
                reload: self.config.reload,
            }
        };

        let pack_ns = self.pack_ns(&pack.name);
        let existing = self
            .store
            .find_cis(&CiQuery::in_namespace(pack_ns.as_str()).class(VERSION_CLASS))?;

        match self.resolver.resolve(&pack, &existing, mode)? {
            Resolution::Skip { version, reason, .. } => {
                match reason {
                    SkipReason::ExplicitVersionExists => tracing::warn!(
                        pack = %pack.name,
                        version = %version,
                        "version explicitly specified but already exists, skipping"
                    ),
                    _ => tracing::info!(pack = %pack.name, version = %version, reason = reason.as_str(), "nothing to publish"),
                }
                self.publish_docs(&pack, &format!("{pack_ns}/{version}"));
                Ok(PackReport::skipped(&pack.name, &version, reason))
            }
            Resolution::Publish(plan) => self.publish(&pack, plan, semver),
        }
    }

    fn publish(
        &mut self,
        pack: &PackDefinition,
        plan: PublishPlan,
        semver: bool,
    ) -> Result<PackReport, PackSyncError> {
        let version_ns = format!("{}/{}", self.pack_ns(&pack.name), plan.version);
        tracing::info!(pack = %pack.name, version = %plan.version, "publishing");

        let sweep_report = if semver {
            None
        } else {
            Some(sweep(&mut self.store, &version_ns, pack, &self.config.comments)?)
        };

        self.upsert_pack_ci(pack)?;
        let (mut version_ci, created) = self.stage_version(pack, &plan)?;

        let environments = match self.reconcile_all(pack, &plan.version, &version_ns) {
            Ok(reports) => reports,
            Err(cause) => {
                if semver && created {
                    self.rollback(pack, &version_ci);
                }
                return Err(PackSyncError::PublishFailed {
                    pack: pack.name.clone(),
                    version: plan.version.clone(),
                    source: Box::new(cause),
                });
            }
        };

        version_ci.attributes.set(COMMIT_ATTRIBUTE, plan.signature.as_str());
        if !self.store.save_ci(&mut version_ci)? {
            tracing::warn!(pack = %pack.name, version = %plan.version, "failed to stamp signature on version");
        }
        self.publish_docs(pack, &version_ns);

        tracing::info!(
            pack = %pack.name,
            version = %plan.version,
            signature = %plan.signature,
            "uploaded pack"
        );
        Ok(PackReport {
            pack: pack.name.clone(),
            outcome: PackOutcome::Published {
                version: plan.version,
                signature: plan.signature,
            },
            sweep: sweep_report,
            environments,
        })
    }

    fn upsert_pack_ci(&mut self, pack: &PackDefinition) -> Result<(), PackSyncError> {
        let ns = self.config.packs_ns();
        let mut ci = match self.store.find_ci(&ns, PACK_CLASS, &pack.name)? {
            Some(ci) => ci,
            None => self.store.build_ci(&ns, PACK_CLASS, &pack.name),
        };
        ci.attributes.set("pack_type", pack.pack_type.as_str());
        ci.attributes.set(DESCRIPTION_ATTRIBUTE, pack.description.as_str());
        ci.attributes.set("category", pack.category.as_str());
        ci.attributes.set("owner", pack.owner.as_str());
        crate::reconcile::stamp_ci(&mut ci, &self.config.comments);
        if !self.store.save_ci(&mut ci)? {
            return Err(PackSyncError::Rejected {
                kind: "pack",
                name: pack.name.clone(),
            });
        }
        Ok(())
    }

    /// Save the Version CI with an empty commit. Returns it and whether it is new.
    fn stage_version(
        &mut self,
        pack: &PackDefinition,
        plan: &PublishPlan,
    ) -> Result<(Ci, bool), PackSyncError> {
        let ns = self.pack_ns(&pack.name);
        let found = match &plan.existing {
            Some(ci) => Some(ci.clone()),
            None => self.store.find_ci(&ns, VERSION_CLASS, &plan.version)?,
        };
        let created = found.is_none();
        let mut ci = found.unwrap_or_else(|| self.store.build_ci(&ns, VERSION_CLASS, &plan.version));

        ci.attributes.set(DESCRIPTION_ATTRIBUTE, pack.description.as_str());
        ci.attributes.set(COMMIT_ATTRIBUTE, "");
        ci.attributes.set(
            ENABLED_ATTRIBUTE,
            if plan.flags.enabled { "true" } else { "false" },
        );
        if let Some(visibility) = &plan.flags.visibility {
            ci.alt_ns
                .insert(VISIBILITY_ALT_NS_TAG.to_string(), visibility.clone());
        }
        crate::reconcile::stamp_ci(&mut ci, &self.config.comments);

        if !self.store.save_ci(&mut ci)? {
            return Err(PackSyncError::Rejected {
                kind: "version",
                name: format!("{}@{}", pack.name, plan.version),
            });
        }
        Ok((ci, created))
    }

    fn reconcile_all(
        &mut self,
        pack: &PackDefinition,
        version: &str,
        version_ns: &str,
    ) -> Result<Vec<EnvironmentReport>, PackSyncError> {
        let mut reports = Vec::new();

        let design = self.scope(DEFAULT_ENVIRONMENT, version, version_ns.to_string());
        reports.push(reconcile(
            &mut self.store,
            &design,
            pack,
            &pack.resources_for(DEFAULT_ENVIRONMENT),
        )?);

        for environment in pack.environment_names() {
            self.upsert_mode(pack, environment, version_ns)?;
            let scope = self.scope(environment, version, format!("{version_ns}/{environment}"));
            reports.push(reconcile(
                &mut self.store,
                &scope,
                pack,
                &pack.resources_for(environment),
            )?);
        }
        Ok(reports)
    }

    fn scope(&self, environment: &str, version: &str, ns_path: String) -> Scope {
        Scope {
            ns_path,
            environment: environment.to_string(),
            package: package_for(environment),
            version: version.to_string(),
            register: self.config.register.clone(),
            comments: self.config.comments.clone(),
        }
    }

    fn upsert_mode(
        &mut self,
        pack: &PackDefinition,
        environment: &str,
        version_ns: &str,
    ) -> Result<(), PackSyncError> {
        let mut ci = match self.store.find_ci(version_ns, MODE_CLASS, environment)? {
            Some(ci) => ci,
            None => self.store.build_ci(version_ns, MODE_CLASS, environment),
        };
        ci.attributes.set(DESCRIPTION_ATTRIBUTE, pack.description.as_str());
        crate::reconcile::stamp_ci(&mut ci, &self.config.comments);
        if !self.store.save_ci(&mut ci)? {
            return Err(PackSyncError::Rejected {
                kind: "mode",
                name: environment.to_string(),
            });
        }
        Ok(())
    }

    /// Best-effort removal of a staged semver version.
    fn rollback(&mut self, pack: &PackDefinition, version_ci: &Ci) {
        tracing::info!(pack = %pack.name, version = %version_ci.name, "attempting to clean up");
        let Some(id) = version_ci.id else {
            return;
        };
        match self.store.destroy_ci(id) {
            Ok(true) => {}
            Ok(false) | Err(_) => tracing::warn!(
                pack = %pack.name,
                version = %version_ci.name,
                "failed to clean up version"
            ),
        }
    }

    fn publish_docs(&mut self, pack: &PackDefinition, version_ns: &str) {
        if let Err(e) = self.docs.publish(pack, version_ns) {
            tracing::warn!(pack = %pack.name, error = %e, "documentation update failed");
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::docs::RecordingDocPublisher;
    use crate::schema::SchemaRegistry;
    use crate::store::MemoryStore;

    fn sync() -> PackSync<MemoryStore> {
        let mut sync = PackSync::new(
            MemoryStore::new(SchemaRegistry::builtin()),
            SyncConfig::new("oneops", "1"),
        );
        sync.register().unwrap();
        sync
    }

    fn named(name: &str, version: Option<&str>) -> PackDefinition {
        PackDefinition {
            name: name.to_string(),
            version: version.map(str::to_string),
            ..PackDefinition::default()
        }
    }

    #[test]
    fn packs_ns_layout() {
        let mut config = SyncConfig::new("oneops", "1");
        config.nspath = "/public/".to_string();
        assert_eq!(config.packs_ns(), "/public/oneops/packs");
    }

    #[test]
    fn collision_uses_default_major_and_lowercased_name() {
        let sync = sync();
        let mut a = named("Base", None);
        a.origin = Some("a/base.json".to_string());
        let b = named("base", Some("1"));
        match sync.validate_unique(&[a, b]) {
            Err(PackSyncError::PackCollision { key, first, .. }) => {
                assert_eq!(key, "oneops**base**1");
                assert_eq!(first, "a/base.json");
            }
            other => panic!("expected collision, got {other:?}"),
        }
        assert!(sync.validate_unique(&[named("base", None), named("base", Some("2"))]).is_ok());
    }

    #[test]
    fn missing_root_aborts_run() {
        let mut sync = PackSync::new(
            MemoryStore::new(SchemaRegistry::builtin()),
            SyncConfig::new("oneops", "1"),
        );
        let err = sync.run(&[named("base", None)], RunMode::All).unwrap_err();
        assert!(matches!(err, PackSyncError::MissingNamespace(ns) if ns == "/public/oneops/packs"));
        assert_eq!(sync.store().ci_count(), 0);
    }

    #[test]
    fn pack_and_version_cis_are_written() {
        let mut sync = sync();
        let mut pack = named("Base", None);
        pack.description = "Base pack".to_string();
        pack.owner = "ops".to_string();
        let report = sync.sync_pack(&pack).unwrap();
        assert!(report.is_published());

        let pack_ci = sync
            .store()
            .find_ci("/public/oneops/packs", "mgmt.Pack", "base")
            .unwrap()
            .unwrap();
        assert_eq!(pack_ci.attributes.get("owner"), Some("ops"));
        assert_eq!(pack_ci.attributes.get("pack_type"), Some("platform"));

        let versions = sync.versions("base").unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].name, "1");

        // signature is taken over the normalized (lowercased) definition
        let mut normalized = pack.clone();
        normalized.name = "base".to_string();
        let signature = normalized.signature().unwrap();
        assert_eq!(versions[0].attributes.get("commit"), Some(signature.as_str()));
        assert_eq!(versions[0].attributes.get("enabled"), Some("true"));
    }

    #[test]
    fn skipped_pack_still_notifies_docs() {
        let mut sync = PackSync::with_docs(
            MemoryStore::new(SchemaRegistry::builtin()),
            SyncConfig::new("oneops", "1"),
            RecordingDocPublisher::default(),
        );
        sync.register().unwrap();
        let pack = named("base", None);
        sync.sync_pack(&pack).unwrap();
        let report = sync.sync_pack(&pack).unwrap();
        assert!(matches!(report.outcome, PackOutcome::Skipped { .. }));
        assert_eq!(
            sync.docs().published,
            vec![
                ("base".to_string(), "/public/oneops/packs/base/1".to_string()),
                ("base".to_string(), "/public/oneops/packs/base/1".to_string()),
            ]
        );
    }

    #[test]
    fn force_version_overrides_declared() {
        let mut sync = sync();
        sync.config.force_version = Some("4".to_string());
        let report = sync.sync_pack(&named("base", Some("2"))).unwrap();
        match report.outcome {
            PackOutcome::Published { version, .. } => assert_eq!(version, "4"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
