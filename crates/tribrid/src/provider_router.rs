//! Deterministic chat provider routing.
//!
//! Intentionally small and unit-testable: selection is pure config +
//! environment, no network calls or side effects. Mirrors the selection
//! order of the original provider router: an explicit `local:`/
//! `openrouter:` prefix on the override model wins, then a vendor-slash
//! model id forces OpenRouter, then OpenRouter-if-ready, then the
//! lowest-`(priority, name)` enabled local provider, then a cloud-direct
//! placeholder.

use tribrid_core::config::ChatConfig;

use crate::config::{ChatProvidersConfig, LocalModelProviderConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    OpenRouter,
    Local,
    CloudDirect,
}

impl RouteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteKind::OpenRouter => "openrouter",
            RouteKind::Local => "local",
            RouteKind::CloudDirect => "cloud_direct",
        }
    }
}

/// The resolved provider + model to use for one chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRoute {
    pub kind: RouteKind,
    pub provider_name: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

enum OverridePrefix {
    None,
    Local,
    OpenRouter,
}

fn split_override(model_override: &str) -> (OverridePrefix, String) {
    let trimmed = model_override.trim();
    if let Some((prefix, rest)) = trimmed.split_once(':') {
        match prefix.trim().to_lowercase().as_str() {
            "local" => return (OverridePrefix::Local, rest.trim().to_string()),
            "openrouter" => return (OverridePrefix::OpenRouter, rest.trim().to_string()),
            _ => {}
        }
    }
    (OverridePrefix::None, trimmed.to_string())
}

fn lowest_priority(providers: &[LocalModelProviderConfig]) -> Option<&LocalModelProviderConfig> {
    providers
        .iter()
        .filter(|p| p.enabled)
        .min_by(|a, b| (a.priority, &a.name).cmp(&(b.priority, &b.name)))
}

/// Selects the provider route for one chat request. `openrouter_api_key`
/// is passed in rather than read from the environment so the selection
/// stays pure and unit-testable.
pub fn select_provider_route(
    chat_providers: &ChatProvidersConfig,
    chat_config: &ChatConfig,
    model_override: &str,
    openrouter_api_key: Option<&str>,
) -> ProviderRoute {
    let effective_override = if model_override.trim().is_empty() {
        chat_config.model_override.clone().unwrap_or_default()
    } else {
        model_override.to_string()
    };

    let (prefix, override_model) = split_override(&effective_override);
    let openrouter_key = openrouter_api_key.map(str::trim).filter(|s| !s.is_empty());
    let openrouter_ready = chat_providers.openrouter.enabled && openrouter_key.is_some();

    if matches!(prefix, OverridePrefix::Local) {
        if let Some(chosen) = lowest_priority(&chat_providers.local_models.providers) {
            let model = if override_model.is_empty() {
                chat_providers.local_models.default_chat_model.clone()
            } else {
                override_model
            };
            return ProviderRoute {
                kind: RouteKind::Local,
                provider_name: chosen.name.clone(),
                base_url: chosen.base_url.clone(),
                model,
                api_key: None,
            };
        }
        // No local providers available: fall through to OpenRouter/cloud.
    }

    if matches!(prefix, OverridePrefix::OpenRouter) || override_model.contains('/') {
        let model = if override_model.is_empty() {
            chat_providers.openrouter.default_model.clone()
        } else {
            override_model
        };
        if openrouter_ready {
            return ProviderRoute {
                kind: RouteKind::OpenRouter,
                provider_name: "OpenRouter".to_string(),
                base_url: chat_providers.openrouter.base_url.clone(),
                model,
                api_key: openrouter_key.map(str::to_string),
            };
        }
        return ProviderRoute {
            kind: RouteKind::CloudDirect,
            provider_name: "Cloud".to_string(),
            base_url: String::new(),
            model,
            api_key: None,
        };
    }

    if openrouter_ready {
        let model = if override_model.is_empty() {
            chat_providers.openrouter.default_model.clone()
        } else {
            override_model
        };
        return ProviderRoute {
            kind: RouteKind::OpenRouter,
            provider_name: "OpenRouter".to_string(),
            base_url: chat_providers.openrouter.base_url.clone(),
            model,
            api_key: openrouter_key.map(str::to_string),
        };
    }

    if let Some(chosen) = lowest_priority(&chat_providers.local_models.providers) {
        let model = if override_model.is_empty() {
            chat_providers.local_models.default_chat_model.clone()
        } else {
            override_model
        };
        return ProviderRoute {
            kind: RouteKind::Local,
            provider_name: chosen.name.clone(),
            base_url: chosen.base_url.clone(),
            model,
            api_key: None,
        };
    }

    let model = if !override_model.is_empty() {
        override_model
    } else if !chat_providers.openrouter.default_model.is_empty() {
        chat_providers.openrouter.default_model.clone()
    } else {
        chat_providers.local_models.default_chat_model.clone()
    };
    ProviderRoute {
        kind: RouteKind::CloudDirect,
        provider_name: "Cloud".to_string(),
        base_url: String::new(),
        model,
        api_key: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChatProvidersConfig, LocalModelsConfig, LocalModelProviderConfig, OpenRouterConfig};

    fn chat_config() -> ChatConfig {
        ChatConfig {
            system_prompt_base: "You are helpful.".to_string(),
            recall_suffix: None,
            rag_suffix: None,
            temperature: 0.2,
            temperature_no_retrieval: 0.7,
            model_override: None,
        }
    }

    fn providers(openrouter_enabled: bool, locals: Vec<LocalModelProviderConfig>) -> ChatProvidersConfig {
        ChatProvidersConfig {
            openrouter: OpenRouterConfig {
                enabled: openrouter_enabled,
                base_url: "https://openrouter.ai/api/v1".to_string(),
                default_model: "openrouter/default".to_string(),
                site_name: "tribrid".to_string(),
            },
            local_models: LocalModelsConfig {
                default_chat_model: "local-default".to_string(),
                providers: locals,
            },
        }
    }

    #[test]
    fn openrouter_used_when_enabled_and_keyed() {
        let route = select_provider_route(&providers(true, vec![]), &chat_config(), "", Some("sk-abc"));
        assert_eq!(route.kind, RouteKind::OpenRouter);
        assert_eq!(route.model, "openrouter/default");
        assert_eq!(route.api_key.as_deref(), Some("sk-abc"));
    }

    #[test]
    fn openrouter_skipped_without_api_key() {
        let locals = vec![LocalModelProviderConfig {
            name: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            enabled: true,
            priority: 1,
        }];
        let route = select_provider_route(&providers(true, locals), &chat_config(), "", None);
        assert_eq!(route.kind, RouteKind::Local);
        assert_eq!(route.provider_name, "ollama");
    }

    #[test]
    fn lowest_priority_local_wins_ties_broken_by_name() {
        let locals = vec![
            LocalModelProviderConfig { name: "zeta".to_string(), base_url: "http://z".to_string(), enabled: true, priority: 1 },
            LocalModelProviderConfig { name: "alpha".to_string(), base_url: "http://a".to_string(), enabled: true, priority: 1 },
            LocalModelProviderConfig { name: "skipped".to_string(), base_url: "http://s".to_string(), enabled: false, priority: 0 },
        ];
        let route = select_provider_route(&providers(false, locals), &chat_config(), "", None);
        assert_eq!(route.provider_name, "alpha");
    }

    #[test]
    fn vendor_slash_model_forces_openrouter() {
        let locals = vec![LocalModelProviderConfig {
            name: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            enabled: true,
            priority: 1,
        }];
        let route = select_provider_route(&providers(true, locals), &chat_config(), "anthropic/claude-3", Some("sk-abc"));
        assert_eq!(route.kind, RouteKind::OpenRouter);
        assert_eq!(route.model, "anthropic/claude-3");
    }

    #[test]
    fn vendor_slash_model_without_openrouter_falls_to_cloud_direct() {
        let route = select_provider_route(&providers(false, vec![]), &chat_config(), "anthropic/claude-3", None);
        assert_eq!(route.kind, RouteKind::CloudDirect);
        assert_eq!(route.model, "anthropic/claude-3");
    }

    #[test]
    fn explicit_local_prefix_overrides_default_order() {
        let locals = vec![LocalModelProviderConfig {
            name: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            enabled: true,
            priority: 1,
        }];
        let route = select_provider_route(&providers(true, locals), &chat_config(), "local:llama3", Some("sk-abc"));
        assert_eq!(route.kind, RouteKind::Local);
        assert_eq!(route.model, "llama3");
    }

    #[test]
    fn explicit_local_prefix_falls_through_when_no_local_providers() {
        let route = select_provider_route(&providers(true, vec![]), &chat_config(), "local:llama3", Some("sk-abc"));
        assert_eq!(route.kind, RouteKind::OpenRouter);
    }

    #[test]
    fn no_providers_falls_back_to_cloud_direct_placeholder() {
        let route = select_provider_route(&providers(false, vec![]), &chat_config(), "", None);
        assert_eq!(route.kind, RouteKind::CloudDirect);
        assert_eq!(route.model, "openrouter/default");
    }

    #[test]
    fn chat_config_model_override_used_when_no_explicit_override() {
        let mut cfg = chat_config();
        cfg.model_override = Some("openai/gpt-4o".to_string());
        let route = select_provider_route(&providers(true, vec![]), &cfg, "", Some("sk-abc"));
        assert_eq!(route.model, "openai/gpt-4o");
    }
}
