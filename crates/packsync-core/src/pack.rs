//! # Pack Definitions
//!
//! The in-memory model of a pack: a named, versioned template made of
//! resources (components), relations between them and per-environment
//! overrides. A pack is read-only input for one sync run.
//!
//! ## Effective views
//!
//! Reconciliation never looks at the raw environment overrides. It asks for
//! the *effective* resources/entrypoints/procedures/variables/policies of one
//! environment:
//! - `_default` sees the pack-level declarations (resources filtered to the
//!   design ones).
//! - A named environment sees the pack-level declarations deep-merged with its
//!   own overrides. Maps extend, scalars replace.
//!
//! ## Signature
//!
//! [`PackDefinition::signature`] hashes the canonical JSON form of the pack
//! with BLAKE3. The version is excluded, so the same content signs the same
//! under any version.

use crate::primitives::{DEFAULT_ENVIRONMENT, capitalize};
use crate::types::{AttrMap, PackSyncError, canonical_json};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Relation attribute overrides keyed by source then target resource.
pub type LinkMap = BTreeMap<String, BTreeMap<String, AttrMap>>;

// =============================================================================
// PACK DEFINITION
// =============================================================================

/// A declaratively defined deployment template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackDefinition {
    pub name: String,
    /// Declared version (`major[.minor[.patch]]`); falls back to the run default.
    pub version: Option<String>,
    /// Platform type, maps to the `<package>.<Type>` platform class.
    #[serde(rename = "type")]
    pub pack_type: String,
    pub description: String,
    pub category: String,
    pub owner: String,
    /// Publish every change as a new immutable patch version.
    pub semver: bool,
    /// Never upload this pack.
    pub ignore: bool,
    pub platform: PlatformSpec,
    pub resources: BTreeMap<String, ResourceSpec>,
    pub depends_on: LinkMap,
    pub managed_via: LinkMap,
    pub entrypoints: BTreeMap<String, EntrypointSpec>,
    pub procedures: BTreeMap<String, AttrMap>,
    pub variables: BTreeMap<String, AttrMap>,
    pub policies: BTreeMap<String, AttrMap>,
    /// Kept in declaration order; environments reconcile in this order.
    pub environments: IndexMap<String, EnvironmentSpec>,
    /// Where the definition was loaded from. Not part of the signature.
    #[serde(skip)]
    pub origin: Option<String>,
}

impl Default for PackDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: None,
            pack_type: "platform".to_string(),
            description: String::new(),
            category: String::new(),
            owner: String::new(),
            semver: false,
            ignore: false,
            platform: PlatformSpec::default(),
            resources: BTreeMap::new(),
            depends_on: BTreeMap::new(),
            managed_via: BTreeMap::new(),
            entrypoints: BTreeMap::new(),
            procedures: BTreeMap::new(),
            variables: BTreeMap::new(),
            policies: BTreeMap::new(),
            environments: IndexMap::new(),
            origin: None,
        }
    }
}

/// Platform-level attribute overrides.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSpec {
    pub attributes: AttrMap,
}

/// One component template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    /// Dotted cookbook path; its last segment names the class.
    pub cookbook: String,
    /// Optional source segment inserted after the package.
    pub source: Option<String>,
    /// Part of the design (`_default`) template.
    pub design: bool,
    pub attributes: AttrMap,
    /// Overrides for the platform's Requires relation to this component.
    pub requires: AttrMap,
    pub monitors: BTreeMap<String, AttrMap>,
    pub payloads: BTreeMap<String, AttrMap>,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            cookbook: String::new(),
            source: None,
            design: true,
            attributes: AttrMap::new(),
            requires: AttrMap::new(),
            monitors: BTreeMap::new(),
            payloads: BTreeMap::new(),
        }
    }
}

impl ResourceSpec {
    /// Class name of the component CI: `<package>[.<source>].<cookbook path>`
    /// with the last cookbook segment capitalized.
    #[must_use]
    pub fn class_name(&self, package: &str) -> String {
        let mut parts: Vec<String> = self.cookbook.split('.').map(str::to_string).collect();
        if let Some(last) = parts.last_mut() {
            *last = capitalize(last);
        }
        if let Some(source) = &self.source {
            parts.insert(0, source.clone());
        }
        parts.insert(0, package.to_string());
        parts.join(".")
    }

    fn merge(&mut self, overrides: &ResourceOverride) {
        if let Some(cookbook) = &overrides.cookbook {
            self.cookbook.clone_from(cookbook);
        }
        if let Some(source) = &overrides.source {
            self.source = Some(source.clone());
        }
        extend(&mut self.attributes, &overrides.attributes);
        extend(&mut self.requires, &overrides.requires);
        for (name, attrs) in &overrides.monitors {
            extend(self.monitors.entry(name.clone()).or_default(), attrs);
        }
        for (name, attrs) in &overrides.payloads {
            extend(self.payloads.entry(name.clone()).or_default(), attrs);
        }
    }
}

/// Attributes of a platform entrypoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntrypointSpec {
    pub attributes: AttrMap,
}

/// Overrides one environment applies on top of the pack.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSpec {
    pub resources: BTreeMap<String, ResourceOverride>,
    /// Replaces the pack entrypoints when present.
    pub entrypoints: Option<BTreeMap<String, EntrypointSpec>>,
    pub procedures: BTreeMap<String, AttrMap>,
    pub variables: BTreeMap<String, AttrMap>,
    pub policies: BTreeMap<String, AttrMap>,
}

/// Partial resource declaration inside an environment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceOverride {
    pub cookbook: Option<String>,
    pub source: Option<String>,
    pub attributes: AttrMap,
    pub requires: AttrMap,
    pub monitors: BTreeMap<String, AttrMap>,
    pub payloads: BTreeMap<String, AttrMap>,
}

fn extend(target: &mut AttrMap, overrides: &AttrMap) {
    for (k, v) in overrides {
        target.insert(k.clone(), v.clone());
    }
}

fn merged(base: &BTreeMap<String, AttrMap>, extra: &BTreeMap<String, AttrMap>) -> BTreeMap<String, AttrMap> {
    let mut out = base.clone();
    for (name, attrs) in extra {
        extend(out.entry(name.clone()).or_default(), attrs);
    }
    out
}

// =============================================================================
// RELATION KEYS
// =============================================================================

/// Normalized identity of a declared relation: `from::kind::to`, where kind is
/// the snake-cased short relation name (`DependsOn` -> `depends_on`).
#[must_use]
pub fn relation_key(from: &str, short_name: &str, to: &str) -> String {
    format!("{from}::{}::{to}", snake_case(short_name))
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            out.push('_');
        }
        out.extend(c.to_lowercase());
    }
    out
}

// =============================================================================
// PACK OPERATIONS
// =============================================================================

impl PackDefinition {
    /// Check the definition is structurally usable.
    pub fn validate(&self) -> Result<(), PackSyncError> {
        let invalid = |reason: String| PackSyncError::InvalidPack {
            pack: self.name.clone(),
            reason,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("pack name is empty".to_string()));
        }
        if self.name.contains('/') {
            return Err(invalid("pack name must not contain '/'".to_string()));
        }
        if self.pack_type.trim().is_empty() {
            return Err(invalid("pack type is empty".to_string()));
        }
        for (name, resource) in &self.resources {
            if resource.cookbook.is_empty() {
                return Err(invalid(format!("resource {name} has no cookbook")));
            }
        }
        for (env, spec) in &self.environments {
            if env == DEFAULT_ENVIRONMENT || env.contains('/') || env.is_empty() {
                return Err(invalid(format!("invalid environment name '{env}'")));
            }
            for (name, resource) in &spec.resources {
                let cookbook = resource.cookbook.as_deref().unwrap_or_default();
                if !self.resources.contains_key(name) && cookbook.is_empty() {
                    return Err(invalid(format!(
                        "resource {name} added by environment {env} has no cookbook"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Declared environment names, in order.
    pub fn environment_names(&self) -> impl Iterator<Item = &str> {
        self.environments.keys().map(String::as_str)
    }

    /// Resources taking part in the design template.
    #[must_use]
    pub fn design_resources(&self) -> BTreeMap<String, ResourceSpec> {
        self.resources
            .iter()
            .filter(|(_, r)| r.design)
            .map(|(n, r)| (n.clone(), r.clone()))
            .collect()
    }

    /// Pack resources merged with the environment's resource overrides.
    #[must_use]
    pub fn environment_resources(&self, environment: &str) -> BTreeMap<String, ResourceSpec> {
        let mut resources = self.resources.clone();
        if let Some(spec) = self.environments.get(environment) {
            for (name, overrides) in &spec.resources {
                resources.entry(name.clone()).or_default().merge(overrides);
            }
        }
        resources
    }

    /// Resources reconciled for `environment` (`_default` means design).
    #[must_use]
    pub fn resources_for(&self, environment: &str) -> BTreeMap<String, ResourceSpec> {
        if environment == DEFAULT_ENVIRONMENT {
            self.design_resources()
        } else {
            self.environment_resources(environment)
        }
    }

    /// Entrypoints of `environment`. An environment entrypoint without
    /// attributes takes those of the pack entrypoint of the same name.
    #[must_use]
    pub fn environment_entrypoints(&self, environment: &str) -> BTreeMap<String, EntrypointSpec> {
        let Some(declared) = self
            .environments
            .get(environment)
            .and_then(|spec| spec.entrypoints.as_ref())
        else {
            return self.entrypoints.clone();
        };
        declared
            .iter()
            .map(|(name, spec)| {
                let spec = match self.entrypoints.get(name) {
                    Some(inherited) if spec.attributes.is_empty() => inherited.clone(),
                    _ => spec.clone(),
                };
                (name.clone(), spec)
            })
            .collect()
    }

    #[must_use]
    pub fn environment_procedures(&self, environment: &str) -> BTreeMap<String, AttrMap> {
        match self.environments.get(environment) {
            Some(spec) => merged(&self.procedures, &spec.procedures),
            None => self.procedures.clone(),
        }
    }

    #[must_use]
    pub fn environment_variables(&self, environment: &str) -> BTreeMap<String, AttrMap> {
        match self.environments.get(environment) {
            Some(spec) => merged(&self.variables, &spec.variables),
            None => self.variables.clone(),
        }
    }

    #[must_use]
    pub fn environment_policies(&self, environment: &str) -> BTreeMap<String, AttrMap> {
        match self.environments.get(environment) {
            Some(spec) => merged(&self.policies, &spec.policies),
            None => self.policies.clone(),
        }
    }

    /// Keys of every explicitly declared component-to-component relation.
    #[must_use]
    pub fn relation_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for (short, links) in [("DependsOn", &self.depends_on), ("ManagedVia", &self.managed_via)] {
            for (from, targets) in links {
                for to in targets.keys() {
                    keys.insert(relation_key(from, short, to));
                }
            }
        }
        keys
    }

    /// BLAKE3 hex digest of the pack content, version excluded.
    pub fn signature(&self) -> Result<String, PackSyncError> {
        let content = Self {
            version: None,
            ..self.clone()
        };
        let value = serde_json::to_value(&content)
            .map_err(|e| PackSyncError::SerializationError(e.to_string()))?;
        let bytes = serde_json::to_vec(&canonical_json(&value))
            .map_err(|e| PackSyncError::SerializationError(e.to_string()))?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
