use super::registry::{Capability, ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    /// Set only when the caller asked for a model that could not be used.
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: Capability,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let fallback_reason = match requested {
            Some(name) => {
                if let Some(model) = self.registry.ensure(name, capability) {
                    return Ok(ModelSelection {
                        model,
                        requested: Some(name.to_string()),
                        fallback_reason: None,
                    });
                }
                Some(format!(
                    "Requested model '{name}' unavailable for capability '{}'.",
                    capability.as_str()
                ))
            }
            None => None,
        };

        let Some(model) = self.registry.by_capability(capability).into_iter().next() else {
            return Err(format!(
                "No models available for capability '{}'.",
                capability.as_str()
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::super::registry::{Capability, ModelRegistry, ModelSpec};
    use super::ModelSelector;

    fn only_image_models() -> ModelRegistry {
        let mut models = IndexMap::new();
        models.insert(
            "img-a".to_string(),
            ModelSpec {
                name: "img-a".to_string(),
                provider: "gemini".to_string(),
                capabilities: vec![Capability::Image],
            },
        );
        ModelRegistry::new(Some(models))
    }

    #[test]
    fn selector_falls_back_when_requested_model_unavailable() {
        let selection = ModelSelector::new(Some(only_image_models()))
            .select(Some("missing"), Capability::Image)
            .unwrap();
        assert_eq!(selection.model.name, "img-a");
        assert_eq!(selection.requested.as_deref(), Some("missing"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested model 'missing' unavailable for capability 'image'.")
        );
    }

    #[test]
    fn selector_uses_default_silently_without_request() {
        let selection = ModelSelector::default()
            .select(None, Capability::Video)
            .unwrap();
        assert_eq!(selection.model.name, "veo-3.0-generate-preview");
        assert_eq!(selection.fallback_reason, None);
    }

    #[test]
    fn selector_honours_valid_request() {
        let selection = ModelSelector::default()
            .select(Some("veo-2.0-generate-001"), Capability::Video)
            .unwrap();
        assert_eq!(selection.model.name, "veo-2.0-generate-001");
        assert_eq!(selection.fallback_reason, None);
    }

    #[test]
    fn selector_errors_when_no_models_for_capability() {
        let err = ModelSelector::new(Some(only_image_models()))
            .select(None, Capability::Video)
            .err()
            .unwrap_or_default();
        assert_eq!(err, "No models available for capability 'video'.");
    }
}
