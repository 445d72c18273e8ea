//! Component registry
//!
//! Maps component type names to implementations. Built once at startup and
//! shared read-only behind an `Arc`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use super::email::EmailAction;
use super::execute::ExecuteAction;
use super::forward::ForwardRequestAction;
use super::github::GithubValidator;
use super::log::LogAction;
use super::mailgun::MailgunValidator;
use super::rate_limit::RateLimitFilter;
use super::write_file::WriteFileAction;
use super::{Component, ComponentSettings};

/// Registry listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentInfo {
    pub name: String,
    pub display_name: String,
    pub config_template: Option<String>,
}

#[derive(Default)]
pub struct ComponentRegistry {
    components: BTreeMap<String, Arc<dyn Component>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in component under its type name.
    pub fn builtin(settings: &ComponentSettings) -> Self {
        let mut registry = Self::new();
        registry.register(GithubValidator::NAME, Arc::new(GithubValidator));
        registry.register(MailgunValidator::NAME, Arc::new(MailgunValidator));
        registry.register(RateLimitFilter::NAME, Arc::new(RateLimitFilter));
        registry.register(
            ForwardRequestAction::NAME,
            Arc::new(ForwardRequestAction::new(settings)),
        );
        registry.register(EmailAction::NAME, Arc::new(EmailAction::new(settings)));
        registry.register(ExecuteAction::NAME, Arc::new(ExecuteAction::new(settings)));
        registry.register(
            WriteFileAction::NAME,
            Arc::new(WriteFileAction::new(settings)),
        );
        registry.register(LogAction::NAME, Arc::new(LogAction));
        registry
    }

    /// Bind `name` to `component`.
    ///
    /// # Panics
    ///
    /// If `name` is already registered.
    pub fn register(&mut self, name: impl Into<String>, component: Arc<dyn Component>) {
        let name = name.into();
        if self.components.contains_key(&name) {
            panic!("component {name:?} registered twice");
        }
        self.components.insert(name, component);
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.components.get(name).cloned()
    }

    /// All registered components, sorted by type name.
    pub fn all_registered(&self) -> Vec<ComponentInfo> {
        self.components
            .iter()
            .map(|(name, component)| ComponentInfo {
                name: name.clone(),
                display_name: component.display_name().to_string(),
                config_template: component.config_template().map(str::to_string),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_contents() {
        let registry = ComponentRegistry::builtin(&ComponentSettings::default());
        let names: Vec<String> = registry
            .all_registered()
            .into_iter()
            .map(|info| info.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "email-action",
                "execute-action",
                "forward-request-action",
                "github-validator",
                "log-action",
                "mailgun-validator",
                "rate-limit-filter",
                "write-file-action",
            ]
        );
    }

    #[test]
    fn test_lookup() {
        let registry = ComponentRegistry::builtin(&ComponentSettings::default());
        let github = registry.lookup("github-validator").unwrap();
        assert_eq!(github.display_name(), "Github validator");
        assert_eq!(github.config_template(), Some("github-validator"));
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn test_templates() {
        let registry = ComponentRegistry::builtin(&ComponentSettings::default());
        let info: BTreeMap<String, ComponentInfo> = registry
            .all_registered()
            .into_iter()
            .map(|i| (i.name.clone(), i))
            .collect();
        assert_eq!(
            info["forward-request-action"].config_template.as_deref(),
            Some("request-forward-action")
        );
        assert_eq!(info["write-file-action"].config_template, None);
        assert_eq!(info["log-action"].config_template, None);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_registration_panics() {
        let mut registry = ComponentRegistry::new();
        registry.register("log-action", Arc::new(LogAction));
        registry.register("log-action", Arc::new(LogAction));
    }
}
