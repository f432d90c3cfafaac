//! Resolution of polymorphic references to capability implementations.
//!
//! [`TargetRegistry`] turns a target reference into a [`TargetProfile`]
//! from the target directory. [`NotifiableRegistry`] pairs a caller-supplied
//! [`NotifiableDescriptor`] with the policy configured for its type.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tidings_core::descriptor::{ConfiguredNotifiable, NotifiableDescriptor, NotifiableTypeConfig};
use tidings_core::entity::{validate_type_name, EntityRef};
use tidings_core::error::CoreError;
use tidings_db::models::target::TargetProfile;
use tidings_db::repositories::TargetDirectory;

use crate::error::ActivityError;

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct TargetRegistry {
    directory: Arc<dyn TargetDirectory>,
}

impl TargetRegistry {
    pub fn new(directory: Arc<dyn TargetDirectory>) -> Self {
        Self { directory }
    }

    /// Profile for `target`, or `NotFound`.
    pub async fn resolve(&self, target: &EntityRef) -> Result<TargetProfile, ActivityError> {
        target.validate()?;
        self.directory
            .find(target)
            .await?
            .ok_or_else(|| CoreError::missing(target).into())
    }

    pub async fn register(&self, profile: &TargetProfile) -> Result<TargetProfile, ActivityError> {
        profile.entity.validate()?;
        Ok(self.directory.upsert(profile).await?)
    }
}

// ---------------------------------------------------------------------------
// Notifiables
// ---------------------------------------------------------------------------

/// Per-type notifiable policies. Types without an entry use the defaults.
#[derive(Debug, Clone, Default)]
pub struct NotifiableRegistry {
    types: HashMap<String, Arc<NotifiableTypeConfig>>,
    fallback: Arc<NotifiableTypeConfig>,
}

impl NotifiableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        notifiable_type: impl Into<String>,
        config: NotifiableTypeConfig,
    ) -> Result<(), CoreError> {
        let notifiable_type = notifiable_type.into();
        validate_type_name(&notifiable_type)?;
        for spec in &config.optional_targets {
            tidings_core::channels::validate_optional_target_name(&spec.name)?;
        }
        self.types.insert(notifiable_type, Arc::new(config));
        Ok(())
    }

    /// Parse a JSON object mapping type names to [`NotifiableTypeConfig`].
    ///
    /// ```json
    /// { "Comment": { "email_allowed": true,
    ///                "optional_targets": [{ "name": "slack", "options": {} }],
    ///                "group_expiry_delay_secs": 3600 } }
    /// ```
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let parsed: HashMap<String, NotifiableTypeConfig> = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("Invalid notifiable config: {e}")))?;
        let mut registry = Self::new();
        for (notifiable_type, config) in parsed {
            registry.register(notifiable_type, config)?;
        }
        Ok(registry)
    }

    pub fn from_path(path: &Path) -> Result<Self, CoreError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Internal(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    pub fn config_for(&self, notifiable_type: &str) -> Arc<NotifiableTypeConfig> {
        self.types
            .get(notifiable_type)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn resolve(&self, descriptor: NotifiableDescriptor) -> ConfiguredNotifiable {
        let config = self.config_for(&descriptor.entity.entity_type);
        ConfiguredNotifiable::new(descriptor, config)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tidings_core::policy::Notifiable;
    use tidings_db::memory::InMemoryTargetDirectory;

    use super::*;

    #[tokio::test]
    async fn unknown_target_is_not_found() {
        let registry = TargetRegistry::new(Arc::new(InMemoryTargetDirectory::new()));
        let err = registry
            .resolve(&EntityRef::new("User", 9))
            .await
            .unwrap_err();
        assert_matches!(err, ActivityError::Core(CoreError::NotFound { id: 9, .. }));
    }

    #[tokio::test]
    async fn registered_target_resolves() {
        let registry = TargetRegistry::new(Arc::new(InMemoryTargetDirectory::new()));
        let profile = TargetProfile::new(EntityRef::new("User", 1)).with_email("a@x.test");
        registry.register(&profile).await.unwrap();
        assert_eq!(
            registry.resolve(&EntityRef::new("User", 1)).await.unwrap(),
            profile
        );
    }

    #[tokio::test]
    async fn invalid_target_type_is_rejected() {
        let registry = TargetRegistry::new(Arc::new(InMemoryTargetDirectory::new()));
        assert_matches!(
            registry.resolve(&EntityRef::new("not a type", 1)).await,
            Err(ActivityError::Core(CoreError::Validation(_)))
        );
    }

    #[test]
    fn from_json_loads_type_policies() {
        let registry = NotifiableRegistry::from_json(
            r#"{ "Comment": { "email_allowed": false,
                              "optional_targets": [{ "name": "slack" }],
                              "group_expiry_delay_secs": 60 } }"#,
        )
        .unwrap();
        assert_eq!(registry.len(), 1);

        let comment =
            registry.resolve(NotifiableDescriptor::new(EntityRef::new("Comment", 1)));
        assert_eq!(comment.optional_targets("User", "comment.create").len(), 1);
        assert_eq!(
            comment.group_expiry_delay("User", "comment.create"),
            Some(std::time::Duration::from_secs(60))
        );

        let article =
            registry.resolve(NotifiableDescriptor::new(EntityRef::new("Article", 1)));
        assert!(article.optional_targets("User", "article.create").is_empty());
    }

    #[test]
    fn from_json_rejects_bad_channel_names() {
        assert_matches!(
            NotifiableRegistry::from_json(
                r#"{ "Comment": { "optional_targets": [{ "name": "email" }] } }"#
            ),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            NotifiableRegistry::from_json("not json"),
            Err(CoreError::Validation(_))
        );
    }
}
