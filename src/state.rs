//! The persisted data model. `ControllerState` is the single root document:
//! it is loaded once at startup, mutated only under the controller's lock,
//! and rewritten in full on every successful mutation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::pool::KeyPool;

pub const DEFAULT_OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_OLLAMA_API_BASE: &str = "http://localhost:11434";
pub const DEFAULT_PHIND_URL: &str = "https://www.phind.com";

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_MAX_ERROR_COUNT: u32 = 3;

/// The fixed set of upstream providers. The fallback order
/// (openrouter -> ollama -> phind) is policy, not configuration.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openrouter,
    Ollama,
    Phind,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Openrouter => "openrouter",
            Self::Ollama => "ollama",
            Self::Phind => "phind",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openrouter" => Ok(Self::Openrouter),
            "ollama" => Ok(Self::Ollama),
            "phind" => Ok(Self::Phind),
            other => Err(format!("invalid provider: {other}")),
        }
    }
}

/// A single credential together with its health bookkeeping.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ApiKey {
    pub value: String,
    pub is_active: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_used: Option<OffsetDateTime>,
    #[serde(default)]
    pub error_count: u32,
}

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            is_active: false,
            last_used: None,
            error_count: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

impl ModelInfo {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OpenrouterState {
    pub api_base: String,
    pub models: Vec<ModelInfo>,
    pub current_model: String,
    pub keys: KeyPool,
}

impl Default for OpenrouterState {
    fn default() -> Self {
        let models = vec![
            ModelInfo::new("anthropic/claude-3-haiku", "Claude 3 Haiku"),
            ModelInfo::new("mistralai/mistral-7b-instruct", "Mistral 7B Instruct"),
            ModelInfo::new("meta-llama/llama-3-8b-instruct", "Llama 3 8B Instruct"),
        ];
        Self {
            api_base: DEFAULT_OPENROUTER_API_BASE.to_string(),
            current_model: models[0].id.clone(),
            models,
            keys: KeyPool::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OllamaState {
    pub api_base: String,
    pub models: Vec<ModelInfo>,
    pub current_model: String,
}

impl Default for OllamaState {
    fn default() -> Self {
        let models = vec![
            ModelInfo::new("llama3", "Llama 3"),
            ModelInfo::new("codellama", "Code Llama"),
        ];
        Self {
            api_base: DEFAULT_OLLAMA_API_BASE.to_string(),
            current_model: models[0].id.clone(),
            models,
        }
    }
}

/// Phind carries no credentials and no model list; switching to it is a
/// record-only transition (the browser launch lives outside the controller).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PhindState {
    pub url: String,
}

impl Default for PhindState {
    fn default() -> Self {
        Self {
            url: DEFAULT_PHIND_URL.to_string(),
        }
    }
}

/// Fixed-field provider table. A struct rather than a map keeps the
/// serialized document order deterministic for the round-trip guarantee.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Providers {
    pub openrouter: OpenrouterState,
    pub ollama: OllamaState,
    pub phind: PhindState,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Settings {
    pub auto_rotate: bool,
    pub check_interval_secs: u64,
    pub max_error_count: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_rotate: true,
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            max_error_count: DEFAULT_MAX_ERROR_COUNT,
        }
    }
}

/// Partial settings update from the web layer. Unknown fields are rejected
/// so a typo never silently no-ops.
#[derive(Deserialize, Clone, Copy, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    pub auto_rotate: Option<bool>,
    pub check_interval_secs: Option<u64>,
    pub max_error_count: Option<u32>,
}

/// The persisted root. Every mutation goes through the controller, which
/// re-persists the whole document synchronously before returning.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ControllerState {
    pub current_provider: Provider,
    pub providers: Providers,
    pub settings: Settings,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_check: Option<OffsetDateTime>,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            current_provider: Provider::Openrouter,
            providers: Providers::default(),
            settings: Settings::default(),
            last_check: None,
        }
    }
}

impl ControllerState {
    /// Model list for one provider. Phind deliberately has none.
    pub fn models_for(&self, provider: Provider) -> &[ModelInfo] {
        match provider {
            Provider::Openrouter => &self.providers.openrouter.models,
            Provider::Ollama => &self.providers.ollama.models,
            Provider::Phind => &[],
        }
    }

    pub fn current_model(&self) -> Option<&str> {
        match self.current_provider {
            Provider::Openrouter => Some(&self.providers.openrouter.current_model),
            Provider::Ollama => Some(&self.providers.ollama.current_model),
            Provider::Phind => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!("OpenRouter".parse::<Provider>().unwrap(), Provider::Openrouter);
        assert_eq!("ollama".parse::<Provider>().unwrap(), Provider::Ollama);
        assert!("copilot".parse::<Provider>().is_err());
    }

    #[test]
    fn state_round_trips_byte_for_byte() {
        let mut state = ControllerState::default();
        state
            .providers
            .openrouter
            .keys
            .add("sk-or-roundtrip000000000000000000000001")
            .unwrap();
        state.last_check = Some(time::macros::datetime!(2026-01-02 03:04:05 UTC));

        let first = serde_json::to_string_pretty(&state).unwrap();
        let reloaded: ControllerState = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string_pretty(&reloaded).unwrap();

        assert_eq!(state, reloaded);
        assert_eq!(first, second);
    }

    #[test]
    fn settings_update_rejects_unknown_fields() {
        let raw = serde_json::json!({ "auto_rotate": true, "max_errors": 5 });
        assert!(serde_json::from_value::<SettingsUpdate>(raw).is_err());
    }
}
