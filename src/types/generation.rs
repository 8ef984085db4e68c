//! Model configuration attached to an agent.

use std::collections::BTreeMap;

use bon::Builder;
use serde::{Deserialize, Serialize};

/// Settings an agent passes to the model backend on every call.
///
/// The engine never interprets these; backends read what they understand.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelConfig {
    /// Backend-specific model identifier (e.g. `gpt-4o-mini`).
    #[builder(into)]
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    /// Anything else the backend accepts, passed through untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[builder(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl ModelConfig {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Default::default()
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unset_fields_are_omitted() {
        let config = ModelConfig::for_model("judge-small").with_setting("seed", json!(7));
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "judge-small",
                "max_tokens": null,
                "temperature": null,
                "settings": { "seed": 7 },
            })
        );
        assert_eq!(serde_json::from_value::<ModelConfig>(value).unwrap(), config);
    }
}
