//! Handlebars templates for notification emails.
//!
//! Templates are named `<target_type>/<key path>`, where the key path is
//! the notification key with `.` replaced by `/`. Rendering walks the
//! fallback chain
//!
//! 1. `<target_type>/<key path>`
//! 2. `default/<key path>`
//! 3. `<target_type>/default`
//! 4. `default/default` (built in)
//!
//! Batch emails use the same chain under a `batch/` prefix. A missing
//! template therefore always falls back, never fails the send.

use std::path::Path;

use handlebars::Handlebars;
use serde::Serialize;
use tidings_core::entity::to_resource_name;
use tidings_core::key::key_path;

const DEFAULT_SEGMENT: &str = "default";
const BATCH_PREFIX: &str = "batch/";

const BUILTIN_NOTIFICATION: &str = "\
Dear {{target_name}},

{{#if notifier_name}}{{notifier_name}} notified you of {{notifiable_name}}.{{else}}You have received a new notification: {{notifiable_name}}.{{/if}}
{{#if notifiable_path}}
{{notifiable_path}}
{{/if}}
Thank you!
";

const BUILTIN_BATCH: &str = "\
Dear {{target_name}},

You have received {{count}} notifications for {{key}}:
{{#each notifications}}
- {{this.notifiable_name}}{{#if this.notifier_name}} from {{this.notifier_name}}{{/if}}
{{/each}}
Thank you!
";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Template syntax error: {0}")]
    Syntax(#[from] Box<handlebars::TemplateError>),

    #[error("Template render error: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("Template I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which family of templates to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    Notification,
    Batch,
}

impl MailKind {
    fn prefix(self) -> &'static str {
        match self {
            MailKind::Notification => "",
            MailKind::Batch => BATCH_PREFIX,
        }
    }
}

// ---------------------------------------------------------------------------
// TemplateRegistry
// ---------------------------------------------------------------------------

/// Named mail templates with fallback lookup.
pub struct TemplateRegistry {
    handlebars: Handlebars<'static>,
}

impl TemplateRegistry {
    /// Registry holding only the built-in defaults.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(handlebars::no_escape);

        let mut registry = Self { handlebars };
        if let Err(e) = registry.register("default/default", BUILTIN_NOTIFICATION) {
            tracing::error!(error = %e, "Built-in notification template is invalid");
        }
        if let Err(e) = registry.register("batch/default/default", BUILTIN_BATCH) {
            tracing::error!(error = %e, "Built-in batch template is invalid");
        }
        registry
    }

    /// Register or replace a template.
    pub fn register(&mut self, name: &str, source: &str) -> Result<(), TemplateError> {
        self.handlebars
            .register_template_string(name, source)
            .map_err(|e| TemplateError::Syntax(Box::new(e)))
    }

    /// Register every `*.hbs` file below `dir`, named by its relative path
    /// without the extension (`users/comment/create.hbs` ->
    /// `users/comment/create`). Returns the number registered.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, TemplateError> {
        let mut pending = vec![dir.to_path_buf()];
        let mut loaded = 0;
        while let Some(current) = pending.pop() {
            for entry in std::fs::read_dir(&current)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("hbs") {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(dir) else {
                    continue;
                };
                let name = relative
                    .with_extension("")
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                let source = std::fs::read_to_string(&path)?;
                self.register(&name, &source)?;
                loaded += 1;
            }
        }
        tracing::info!(dir = %dir.display(), count = loaded, "Loaded mail templates");
        Ok(loaded)
    }

    pub fn has(&self, name: &str) -> bool {
        self.handlebars.has_template(name)
    }

    /// Candidate names for `target_type` and `key`, most specific first.
    pub fn candidates(kind: MailKind, target_type: &str, key: &str) -> Vec<String> {
        let prefix = kind.prefix();
        let target_segment = to_resource_name(target_type);
        let path = key_path(key);
        vec![
            format!("{prefix}{target_segment}/{path}"),
            format!("{prefix}{DEFAULT_SEGMENT}/{path}"),
            format!("{prefix}{target_segment}/{DEFAULT_SEGMENT}"),
            format!("{prefix}{DEFAULT_SEGMENT}/{DEFAULT_SEGMENT}"),
        ]
    }

    /// First registered template name on the fallback chain.
    pub fn resolve(&self, kind: MailKind, target_type: &str, key: &str) -> Option<String> {
        Self::candidates(kind, target_type, key)
            .into_iter()
            .find(|name| self.has(name))
    }

    /// Render the most specific template for `target_type` and `key`.
    pub fn render<T: Serialize>(
        &self,
        kind: MailKind,
        target_type: &str,
        key: &str,
        data: &T,
    ) -> Result<String, TemplateError> {
        let name = self
            .resolve(kind, target_type, key)
            .unwrap_or_else(|| format!("{}default/default", kind.prefix()));
        tracing::debug!(template = %name, key, "Rendering mail template");
        Ok(self.handlebars.render(&name, data)?)
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn data() -> serde_json::Value {
        json!({
            "target_name": "Ada",
            "notifiable_name": "Nice post",
            "notifier_name": "Grace",
        })
    }

    #[test]
    fn builtins_are_registered() {
        let registry = TemplateRegistry::new();
        assert!(registry.has("default/default"));
        assert!(registry.has("batch/default/default"));
    }

    #[test]
    fn candidate_chain_order() {
        assert_eq!(
            TemplateRegistry::candidates(MailKind::Notification, "User", "comment.create"),
            vec![
                "user/comment/create",
                "default/comment/create",
                "user/default",
                "default/default",
            ]
        );
        assert_eq!(
            TemplateRegistry::candidates(MailKind::Batch, "Admin::User", "comment.create")[0],
            "batch/admin_user/comment/create"
        );
    }

    #[test]
    fn falls_back_to_builtin() {
        let registry = TemplateRegistry::new();
        let body = registry
            .render(MailKind::Notification, "User", "comment.create", &data())
            .unwrap();
        assert!(body.contains("Dear Ada"));
        assert!(body.contains("Grace notified you of Nice post"));
    }

    #[test]
    fn most_specific_template_wins() {
        let mut registry = TemplateRegistry::new();
        registry.register("default/comment/create", "generic").unwrap();
        registry.register("user/comment/create", "for users").unwrap();
        registry.register("user/default", "user default").unwrap();

        let render = |t: &str, k: &str| {
            registry
                .render(MailKind::Notification, t, k, &data())
                .unwrap()
        };
        assert_eq!(render("User", "comment.create"), "for users");
        assert_eq!(render("Admin", "comment.create"), "generic");
        assert_eq!(render("User", "article.publish"), "user default");
    }

    #[test]
    fn values_are_not_html_escaped() {
        let mut registry = TemplateRegistry::new();
        registry.register("default/default", "{{notifiable_name}}").unwrap();
        let body = registry
            .render(
                MailKind::Notification,
                "User",
                "a.b",
                &json!({ "notifiable_name": "<Tom & Jerry>" }),
            )
            .unwrap();
        assert_eq!(body, "<Tom & Jerry>");
    }

    #[test]
    fn invalid_template_is_rejected() {
        let mut registry = TemplateRegistry::new();
        assert_matches!(
            registry.register("user/default", "{{#if}}"),
            Err(TemplateError::Syntax(_))
        );
    }

    #[test]
    fn batch_builtin_lists_notifications() {
        let registry = TemplateRegistry::new();
        let body = registry
            .render(
                MailKind::Batch,
                "User",
                "comment.create",
                &json!({
                    "target_name": "Ada",
                    "key": "comment.create",
                    "count": 2,
                    "notifications": [
                        { "notifiable_name": "First" },
                        { "notifiable_name": "Second", "notifier_name": "Grace" },
                    ],
                }),
            )
            .unwrap();
        assert!(body.contains("You have received 2 notifications"));
        assert!(body.contains("- Second from Grace"));
    }

    #[test]
    fn load_dir_registers_nested_templates() {
        let dir = std::env::temp_dir().join(format!("tidings-templates-{}", std::process::id()));
        let nested = dir.join("user").join("comment");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("create.hbs"), "from disk").unwrap();
        std::fs::write(dir.join("README.txt"), "ignored").unwrap();

        let mut registry = TemplateRegistry::new();
        assert_eq!(registry.load_dir(&dir).unwrap(), 1);
        assert!(registry.has("user/comment/create"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
