//! # Core Type Definitions
//!
//! This module contains the graph-store types the engine reads and writes:
//! - Store handles (`CiId`, `RelationId`)
//! - Entity state (`EntityState`)
//! - Fixed-schema attribute maps (`Attributes`)
//! - Graph nodes and edges (`Ci`, `Relation`) with natural identity keys (`CiKey`)
//! - Error types (`PackSyncError`)
//!
//! ## Attribute Discipline
//!
//! Every CI and relation carries the attribute schema of its class. Writes to
//! names the schema does not declare are silently ignored, so an overlay can
//! never introduce new keys.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use thiserror::Error;

/// Attribute overrides as declared in a pack definition.
pub type AttrMap = BTreeMap<String, JsonValue>;

// =============================================================================
// STORE HANDLES
// =============================================================================

/// Store-assigned identifier of a configuration item.
///
/// Opaque: only meaningful to the store that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CiId(pub u64);

/// Store-assigned identifier of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationId(pub u64);

// =============================================================================
// ENTITY STATE
// =============================================================================

/// Lifecycle state of a CI or relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Declared by the active pack definition.
    #[default]
    Default,
    /// No longer declared; kept for history, never physically removed.
    PendingDeletion,
}

impl EntityState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::PendingDeletion => "pending_deletion",
        }
    }

    /// State an entity should be in given whether the pack still declares it.
    ///
    /// Returns `None` when no transition is needed.
    #[must_use]
    pub fn transition(self, declared: bool) -> Option<Self> {
        match (self, declared) {
            (Self::PendingDeletion, true) => Some(Self::Default),
            (Self::Default, false) => Some(Self::PendingDeletion),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ATTRIBUTES
// =============================================================================

/// A fixed-schema attribute map.
///
/// The key set is decided when the entity is built from its class schema and
/// never grows afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attributes(BTreeMap<String, String>);

impl Attributes {
    /// Build an attribute map from declared names and their default values.
    pub fn declared<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn is_declared(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Set a declared attribute. Returns `false` (and does nothing) when the
    /// name is not part of the schema.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> bool {
        match self.0.get_mut(name) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    /// Intersection-merge: apply every override whose key is declared and
    /// whose value is neither null nor `false`. Returns the number of
    /// attributes written.
    pub fn overlay(&mut self, overrides: &AttrMap) -> usize {
        let mut applied = 0;
        for (name, slot) in &mut self.0 {
            let value = overrides
                .get(name)
                .filter(|v| !matches!(v, JsonValue::Bool(false)))
                .and_then(flatten_value);
            if let Some(value) = value {
                *slot = value;
                applied += 1;
            }
        }
        applied
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Flatten a pack-declared value into the string form stored in attributes.
///
/// Strings are kept verbatim, null means "not set", everything else is
/// written as canonical JSON (object keys sorted).
#[must_use]
pub fn flatten_value(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(canonical_json(other).to_string()),
    }
}

/// Rebuild a JSON value with every object's keys in sorted order.
#[must_use]
pub fn canonical_json(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(inner) = map.get(key) {
                    sorted.insert(key.clone(), canonical_json(inner));
                }
            }
            JsonValue::Object(sorted)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}

// =============================================================================
// CONFIGURATION ITEM
// =============================================================================

/// Natural identity of a CI: unique within a namespace and class.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CiKey {
    pub ns_path: String,
    pub class_name: String,
    pub name: String,
}

impl std::fmt::Display for CiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.ns_path, self.class_name, self.name)
    }
}

/// A configuration item: a named, classed, attributed node of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ci {
    /// Store handle; `None` until the CI is first saved.
    pub id: Option<CiId>,
    pub ns_path: String,
    pub class_name: String,
    pub name: String,
    pub attributes: Attributes,
    pub state: EntityState,
    pub comments: String,
    /// Alternate-namespace visibility tags (tag -> value).
    pub alt_ns: BTreeMap<String, String>,
}

impl Ci {
    /// Build an unsaved CI with the given attribute schema.
    #[must_use]
    pub fn new(
        ns_path: impl Into<String>,
        class_name: impl Into<String>,
        name: impl Into<String>,
        attributes: Attributes,
    ) -> Self {
        Self {
            id: None,
            ns_path: ns_path.into(),
            class_name: class_name.into(),
            name: name.into(),
            attributes,
            state: EntityState::Default,
            comments: String::new(),
            alt_ns: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn key(&self) -> CiKey {
        CiKey {
            ns_path: self.ns_path.clone(),
            class_name: self.class_name.clone(),
            name: self.name.clone(),
        }
    }
}

// =============================================================================
// RELATION
// =============================================================================

/// A named, typed, attributed edge between two CIs.
///
/// Endpoints are referenced by id. Queries that ask for endpoints also fill
/// `from_ci`/`to_ci`; a relation built for creation carries an embedded,
/// not-yet-saved endpoint CI instead of an id, which the store creates on save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: Option<RelationId>,
    pub relation_name: String,
    pub ns_path: String,
    pub from_ci_id: Option<CiId>,
    pub to_ci_id: Option<CiId>,
    pub attributes: Attributes,
    pub state: EntityState,
    pub comments: String,
    #[serde(skip)]
    pub from_ci: Option<Box<Ci>>,
    #[serde(skip)]
    pub to_ci: Option<Box<Ci>>,
}

impl Relation {
    /// Build an unsaved relation with no endpoints.
    #[must_use]
    pub fn new(
        relation_name: impl Into<String>,
        ns_path: impl Into<String>,
        attributes: Attributes,
    ) -> Self {
        Self {
            id: None,
            relation_name: relation_name.into(),
            ns_path: ns_path.into(),
            from_ci_id: None,
            to_ci_id: None,
            attributes,
            state: EntityState::Default,
            comments: String::new(),
            from_ci: None,
            to_ci: None,
        }
    }

    /// Last segment of the dotted relation name (`Requires`, `Payload`, ...).
    #[must_use]
    pub fn short_name(&self) -> &str {
        short_name(&self.relation_name)
    }

    #[must_use]
    pub fn from_name(&self) -> Option<&str> {
        self.from_ci.as_deref().map(|ci| ci.name.as_str())
    }

    #[must_use]
    pub fn to_name(&self) -> Option<&str> {
        self.to_ci.as_deref().map(|ci| ci.name.as_str())
    }

    /// Copy of the relation without embedded endpoints, as stored.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self {
            from_ci: None,
            to_ci: None,
            ..self.clone()
        }
    }
}

/// Last segment of a dotted name.
#[must_use]
pub fn short_name(dotted: &str) -> &str {
    dotted.rsplit('.').next().unwrap_or(dotted)
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while syncing packs.
///
/// Per-item save failures are not errors: they are reported through
/// [`crate::report`] and processing continues. Everything here aborts at
/// least the current pack.
#[derive(Debug, Error)]
pub enum PackSyncError {
    /// Two pack definitions share group, name and version.
    #[error("conflict of pack group-name-version {key}: {first} and {second}")]
    PackCollision {
        key: String,
        first: String,
        second: String,
    },

    /// The namespace of the source group has not been registered.
    #[error("namespace {0} not found, register the source first")]
    MissingNamespace(String),

    /// A version string could not be parsed.
    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    /// A pack definition is structurally invalid.
    #[error("invalid pack {pack}: {reason}")]
    InvalidPack { pack: String, reason: String },

    /// The store refused an entity the pack cannot proceed without.
    #[error("store rejected {kind} {name}")]
    Rejected { kind: &'static str, name: String },

    /// Graph reconciliation failed after the version was staged.
    #[error("failed to publish pack {pack} version {version}: {source}")]
    PublishFailed {
        pack: String,
        version: String,
        #[source]
        source: Box<PackSyncError>,
    },

    /// The backing store failed (transport, database).
    #[error("store error: {0}")]
    Store(String),

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

// =============================================================================
// TESTS
// =============================================================================
