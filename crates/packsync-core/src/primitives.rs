//! # Fixed Names
//!
//! Class names, relation names and namespace segments the engine writes.
//!
//! These are compiled into the binary and are immutable at runtime.
//! Package-relative names (`<package>.WatchedBy`, `<package>.Policy`, ...) are
//! built by the helpers at the bottom of this module.

// =============================================================================
// NAMESPACE LAYOUT
// =============================================================================

/// Namespace segment holding every pack of a source group.
pub const PACKS_SEGMENT: &str = "packs";

/// Name of the design-time environment.
///
/// The default environment reconciles directly under the version namespace;
/// every other environment gets its own child namespace.
pub const DEFAULT_ENVIRONMENT: &str = "_default";

/// Root namespace used when none is configured.
pub const DEFAULT_NSPATH: &str = "/public";

// =============================================================================
// PACKAGES
// =============================================================================

/// Package for design-time (`_default`) templates.
pub const CATALOG_PACKAGE: &str = "mgmt.catalog";

/// Package for per-environment templates.
pub const MANIFEST_PACKAGE: &str = "mgmt.manifest";

// =============================================================================
// CLASS NAMES
// =============================================================================

pub const PACK_CLASS: &str = "mgmt.Pack";
pub const VERSION_CLASS: &str = "mgmt.Version";
pub const MODE_CLASS: &str = "mgmt.Mode";
pub const QPATH_CLASS: &str = "mgmt.manifest.Qpath";
pub const PROCEDURE_CLASS: &str = "mgmt.manifest.Procedure";

// =============================================================================
// RELATION NAMES
// =============================================================================

pub const REQUIRES_RELATION: &str = "mgmt.Requires";
pub const ENTRYPOINT_RELATION: &str = "mgmt.Entrypoint";
pub const MANAGED_VIA_RELATION: &str = "mgmt.manifest.ManagedVia";
pub const PAYLOAD_RELATION: &str = "mgmt.manifest.Payload";
pub const CONTROLLED_BY_RELATION: &str = "mgmt.manifest.ControlledBy";

/// Alternate-namespace tag carrying the organization visibility of a version.
pub const VISIBILITY_ALT_NS_TAG: &str = "enableForOrg";

// =============================================================================
// ATTRIBUTE NAMES
// =============================================================================

pub const COMMIT_ATTRIBUTE: &str = "commit";
pub const ENABLED_ATTRIBUTE: &str = "enabled";
pub const DESCRIPTION_ATTRIBUTE: &str = "description";
pub const TEMPLATE_ATTRIBUTE: &str = "template";

// =============================================================================
// PACKAGE-RELATIVE NAMES
// =============================================================================

/// Package used to reconcile the given environment.
#[must_use]
pub fn package_for(environment: &str) -> &'static str {
    if environment == DEFAULT_ENVIRONMENT {
        CATALOG_PACKAGE
    } else {
        MANIFEST_PACKAGE
    }
}

/// DependsOn relation name for the given environment.
#[must_use]
pub fn depends_on_relation(environment: &str) -> String {
    format!("{}.DependsOn", package_for(environment))
}

#[must_use]
pub fn watched_by_relation(package: &str) -> String {
    format!("{package}.WatchedBy")
}

#[must_use]
pub fn monitor_class(package: &str) -> String {
    format!("{package}.Monitor")
}

#[must_use]
pub fn value_for_relation(package: &str) -> String {
    format!("{package}.ValueFor")
}

#[must_use]
pub fn localvar_class(package: &str) -> String {
    format!("{package}.Localvar")
}

#[must_use]
pub fn policy_class(package: &str) -> String {
    format!("{package}.Policy")
}

/// Upper-case the first character, lower-case the rest.
#[must_use]
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
