//! # Attribute Schemas
//!
//! Every class and relation in the store has a fixed attribute schema. New
//! entities are built from it and only declared names can ever be written.
//!
//! The built-in registry covers the management classes the engine writes
//! itself. Component classes (`mgmt.catalog.Tomcat`, ...) come from
//! configuration and are merged in with [`SchemaRegistry::merge`].

use crate::primitives::{
    CATALOG_PACKAGE, CONTROLLED_BY_RELATION, ENTRYPOINT_RELATION, MANAGED_VIA_RELATION,
    MANIFEST_PACKAGE, MODE_CLASS, PACK_CLASS, PAYLOAD_RELATION, PROCEDURE_CLASS, QPATH_CLASS,
    REQUIRES_RELATION, VERSION_CLASS, localvar_class, monitor_class, policy_class,
    value_for_relation, watched_by_relation,
};
use crate::types::Attributes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declaration of one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    /// Value a freshly built entity starts with.
    #[serde(default)]
    pub default: String,
}

/// The declared attributes of one class or relation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSchema(BTreeMap<String, AttributeDescriptor>);

impl AttributeSchema {
    /// Schema with the given names, all defaulting to the empty string.
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self(
            names
                .into_iter()
                .map(|n| (n.to_string(), AttributeDescriptor::default()))
                .collect(),
        )
    }

    /// Declare (or redeclare) an attribute with a default value.
    #[must_use]
    pub fn with_default(mut self, name: &str, default: &str) -> Self {
        self.0.insert(
            name.to_string(),
            AttributeDescriptor {
                default: default.to_string(),
            },
        );
        self
    }

    /// Build the initial attribute map of a new entity.
    #[must_use]
    pub fn instantiate(&self) -> Attributes {
        Attributes::declared(self.0.iter().map(|(k, d)| (k.clone(), d.default.clone())))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Class and relation schemas known to a store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaRegistry {
    #[serde(default)]
    classes: BTreeMap<String, AttributeSchema>,
    #[serde(default)]
    relations: BTreeMap<String, AttributeSchema>,
}

impl SchemaRegistry {
    /// Empty registry: every class is unknown.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the management classes and relations.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register_class(
                PACK_CLASS,
                AttributeSchema::new(["pack_type", "description", "category", "owner"]),
            )
            .register_class(
                VERSION_CLASS,
                AttributeSchema::new(["description", "commit"]).with_default("enabled", "true"),
            )
            .register_class(MODE_CLASS, AttributeSchema::new(["description"]))
            .register_class(QPATH_CLASS, AttributeSchema::new(["description", "definition"]))
            .register_class(
                PROCEDURE_CLASS,
                AttributeSchema::new(["description", "definition", "arguments"]),
            )
            .register_relation(
                REQUIRES_RELATION,
                AttributeSchema::new(["template", "services", "help"])
                    .with_default("constraint", "1..1"),
            )
            .register_relation(ENTRYPOINT_RELATION, AttributeSchema::new(["description"]))
            .register_relation(MANAGED_VIA_RELATION, AttributeSchema::new(["description"]))
            .register_relation(PAYLOAD_RELATION, AttributeSchema::new(["description"]))
            .register_relation(CONTROLLED_BY_RELATION, AttributeSchema::new(["description"]));

        for package in [CATALOG_PACKAGE, MANIFEST_PACKAGE] {
            registry
                .register_class(
                    &format!("{package}.Platform"),
                    AttributeSchema::new(["description", "source", "pack", "version"])
                        .with_default("availability", "default"),
                )
                .register_class(
                    &monitor_class(package),
                    AttributeSchema::new([
                        "description",
                        "source",
                        "chart",
                        "cmd",
                        "cmd_line",
                        "metrics",
                        "thresholds",
                        "duration",
                        "sample_interval",
                    ])
                    .with_default("heartbeat", "false")
                    .with_default("enable", "true"),
                )
                .register_class(
                    &localvar_class(package),
                    AttributeSchema::new(["value"]).with_default("secure", "false"),
                )
                .register_class(
                    &policy_class(package),
                    AttributeSchema::new(["description", "query", "docUrl", "mode"])
                        .with_default("enabled", "true"),
                )
                .register_relation(
                    &format!("{package}.DependsOn"),
                    AttributeSchema::new(["propagate_to", "source", "min", "max", "current"])
                        .with_default("flex", "false"),
                )
                .register_relation(&watched_by_relation(package), AttributeSchema::new(["source"]))
                .register_relation(&value_for_relation(package), AttributeSchema::default());
        }
        registry
    }

    pub fn register_class(&mut self, name: &str, schema: AttributeSchema) -> &mut Self {
        self.classes.insert(name.to_string(), schema);
        self
    }

    pub fn register_relation(&mut self, name: &str, schema: AttributeSchema) -> &mut Self {
        self.relations.insert(name.to_string(), schema);
        self
    }

    /// Add every schema of `other`, replacing same-named entries.
    pub fn merge(&mut self, other: SchemaRegistry) {
        self.classes.extend(other.classes);
        self.relations.extend(other.relations);
    }

    #[must_use]
    pub fn class(&self, name: &str) -> Option<&AttributeSchema> {
        self.classes.get(name)
    }

    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&AttributeSchema> {
        self.relations.get(name)
    }

    /// Initial attributes for a CI of `class`; empty when the class is unknown.
    #[must_use]
    pub fn ci_attributes(&self, class: &str) -> Attributes {
        self.class(class)
            .map(AttributeSchema::instantiate)
            .unwrap_or_default()
    }

    /// Initial attributes for a relation; empty when the relation is unknown.
    #[must_use]
    pub fn relation_attributes(&self, name: &str) -> Attributes {
        self.relation(name)
            .map(AttributeSchema::instantiate)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_covers_both_packages() {
        let registry = SchemaRegistry::builtin();
        assert!(registry.class("mgmt.catalog.Platform").is_some());
        assert!(registry.class("mgmt.manifest.Monitor").is_some());
        assert!(registry.relation("mgmt.catalog.DependsOn").is_some());
        assert!(registry.relation("mgmt.manifest.ValueFor").is_some());
        assert!(registry.class("mgmt.catalog.Tomcat").is_none());
    }

    #[test]
    fn unknown_class_instantiates_empty() {
        let registry = SchemaRegistry::builtin();
        assert!(registry.ci_attributes("nope.Nothing").is_empty());
        let version = registry.ci_attributes("mgmt.Version");
        assert_eq!(version.get("enabled"), Some("true"));
        assert_eq!(version.get("commit"), Some(""));
    }

    #[test]
    fn merge_adds_component_classes() {
        let mut registry = SchemaRegistry::builtin();
        let mut extra = SchemaRegistry::new();
        extra.register_class(
            "mgmt.catalog.Tomcat",
            AttributeSchema::new(["version"]).with_default("port", "8080"),
        );
        registry.merge(extra);

        let attrs = registry.ci_attributes("mgmt.catalog.Tomcat");
        assert_eq!(attrs.get("port"), Some("8080"));
        assert!(registry.class("mgmt.Pack").is_some());
    }

    #[test]
    fn schema_deserializes_from_toml_shape() {
        let json = r#"{"classes": {"mgmt.catalog.Java": {"flavor": {"default": "openjdk"}, "version": {}}}}"#;
        let registry: SchemaRegistry = serde_json::from_str(json).expect("parse");
        let attrs = registry.ci_attributes("mgmt.catalog.Java");
        assert_eq!(attrs.get("flavor"), Some("openjdk"));
        assert_eq!(attrs.get("version"), Some(""));
    }
}
