//! Notification keys.
//!
//! A key is a dot-namespaced action name such as `comment.create`. Keys
//! scope subscriptions and grouping, and map to template paths by
//! replacing dots with slashes.

use std::sync::LazyLock;

use regex::Regex;

use crate::entity::to_resource_name;
use crate::error::CoreError;

/// Maximum length for a notification key.
pub const MAX_KEY_LENGTH: usize = 255;

/// Suffix of the key used when the caller does not supply one.
pub const DEFAULT_KEY_SUFFIX: &str = "default";

static KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]+(\.[a-z0-9_]+)*$").expect("valid regex"));

/// Validate a notification key.
pub fn validate_key(key: &str) -> Result<(), CoreError> {
    if key.is_empty() {
        return Err(CoreError::Validation(
            "Notification key must not be empty".to_string(),
        ));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CoreError::Validation(format!(
            "Notification key exceeds maximum length of {MAX_KEY_LENGTH} characters (got {})",
            key.len()
        )));
    }
    if !KEY_RE.is_match(key) {
        return Err(CoreError::Validation(format!(
            "Notification key '{key}' must be dot-separated lowercase segments"
        )));
    }
    Ok(())
}

/// Default key for a notifiable type: `BlogPost` -> `blog_post.default`.
pub fn default_key(notifiable_type: &str) -> String {
    format!("{}.{DEFAULT_KEY_SUFFIX}", to_resource_name(notifiable_type))
}

/// Template path segment for a key: `comment.create` -> `comment/create`.
pub fn key_path(key: &str) -> String {
    key.replace('.', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_namespaced_keys() {
        assert!(validate_key("comment.create").is_ok());
        assert!(validate_key("article.comment.reply_2").is_ok());
        assert!(validate_key("default").is_ok());
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(validate_key("").is_err());
        assert!(validate_key("Comment.Create").is_err());
        assert!(validate_key("comment..create").is_err());
        assert!(validate_key(".comment").is_err());
        assert!(validate_key(&"a".repeat(MAX_KEY_LENGTH + 1)).is_err());
    }

    #[test]
    fn default_key_uses_resource_name() {
        assert_eq!(default_key("Comment"), "comment.default");
        assert_eq!(default_key("BlogPost"), "blog_post.default");
    }

    #[test]
    fn key_path_replaces_dots() {
        assert_eq!(key_path("comment.create"), "comment/create");
    }
}
