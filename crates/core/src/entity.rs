//! Polymorphic entity references.
//!
//! Targets, notifiables, notifiers and groups are all addressed by a
//! `(type, id)` pair. The type name is resolved through an explicit
//! registry at the service layer, never by dynamic lookup.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

/// Maximum length of an entity type name.
pub const MAX_TYPE_NAME_LENGTH: usize = 100;

/// Type names are identifiers, optionally namespaced with `::`
/// (`User`, `Admin::User`, `blog_post`).
static TYPE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_]*(::[A-Za-z][A-Za-z0-9_]*)*$").expect("valid regex")
});

/// A `(type, id)` reference to an entity owned by the host application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: DbId,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: DbId) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
        }
    }

    /// Build a reference from nullable column pairs.
    pub fn from_parts(entity_type: Option<&str>, id: Option<DbId>) -> Option<Self> {
        match (entity_type, id) {
            (Some(t), Some(id)) => Some(Self::new(t, id)),
            _ => None,
        }
    }

    /// Reject malformed type names before they reach storage.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_type_name(&self.entity_type)
    }

    /// Snake-case resource name of this entity's type.
    pub fn resource_name(&self) -> String {
        to_resource_name(&self.entity_type)
    }

    pub fn is_type(&self, entity_type: &str) -> bool {
        self.entity_type == entity_type
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id)
    }
}

/// Validate an entity type name.
pub fn validate_type_name(name: &str) -> Result<(), CoreError> {
    if name.len() > MAX_TYPE_NAME_LENGTH || !TYPE_NAME_RE.is_match(name) {
        return Err(CoreError::Validation(format!(
            "Invalid entity type name '{name}'"
        )));
    }
    Ok(())
}

/// Convert a type name to its snake-case resource name.
///
/// ```
/// use tidings_core::entity::to_resource_name;
///
/// assert_eq!(to_resource_name("Comment"), "comment");
/// assert_eq!(to_resource_name("BlogPost"), "blog_post");
/// assert_eq!(to_resource_name("Admin::User"), "admin_user");
/// ```
pub fn to_resource_name(type_name: &str) -> String {
    let mut out = String::with_capacity(type_name.len() + 4);
    let mut prev_lower_or_digit = false;
    for c in type_name.replace("::", "_").chars() {
        if c.is_ascii_uppercase() {
            if prev_lower_or_digit {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower_or_digit = false;
        } else {
            prev_lower_or_digit = c.is_ascii_lowercase() || c.is_ascii_digit();
            out.push(c);
        }
    }
    out
}

/// Human-readable type name used in email subjects: `BlogPost` -> `Blog post`.
pub fn printable_type(type_name: &str) -> String {
    let resource = to_resource_name(type_name).replace('_', " ");
    let mut chars = resource.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
