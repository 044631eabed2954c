use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;
pub const DEFAULT_MAX_NEW_TOPICS: u32 = 3;
pub const DEFAULT_MOVE_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WizardCommitMode {
    /// Create topics and move entries through the client-side committer.
    Client,
    /// Hand the whole analysis to the suggestion service's apply call.
    Service,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub min_confidence_threshold: f64,
    pub max_new_topics: u32,
    pub move_concurrency: usize,
    pub wizard_commit_mode: WizardCommitMode,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_confidence_threshold: DEFAULT_MIN_CONFIDENCE,
            max_new_topics: DEFAULT_MAX_NEW_TOPICS,
            move_concurrency: DEFAULT_MOVE_CONCURRENCY,
            wizard_commit_mode: WizardCommitMode::Client,
        }
    }
}

impl EngineSettings {
    /// Reads settings from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let settings = serde_json::from_str::<Self>(&content)
            .map_err(|err| AppError::Validation(format!("Invalid settings file '{}': {}", path.display(), err)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        validate_confidence(self.min_confidence_threshold)?;
        if self.move_concurrency == 0 {
            return Err(AppError::Validation("moveConcurrency must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn categorization_options(&self) -> CategorizationOptions {
        CategorizationOptions {
            min_confidence: self.min_confidence_threshold,
            max_new_topics: self.max_new_topics,
            instructions: None,
        }
    }
}

/// Per-request knobs for the suggestion service, checked once at the request boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct CategorizationOptions {
    pub min_confidence: f64,
    pub max_new_topics: u32,
    pub instructions: Option<String>,
}

impl Default for CategorizationOptions {
    fn default() -> Self {
        EngineSettings::default().categorization_options()
    }
}

impl CategorizationOptions {
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Returns the options with blank instructions dropped, or a validation error.
    pub fn validated(self) -> AppResult<Self> {
        validate_confidence(self.min_confidence)?;
        let instructions = self
            .instructions
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Ok(Self {
            instructions,
            ..self
        })
    }
}

fn validate_confidence(value: f64) -> AppResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(AppError::Validation(format!(
            "confidence threshold {} must be within [0, 1]",
            value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = EngineSettings::load(&dir.path().join("settings.json")).expect("load");
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.min_confidence_threshold, 0.7);
        assert_eq!(settings.max_new_topics, 3);
    }

    #[test]
    fn save_then_load_preserves_partial_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/settings.json");
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, r#"{"maxNewTopics": 5, "wizardCommitMode": "service"}"#).expect("write");

        let settings = EngineSettings::load(&path).expect("load");
        assert_eq!(settings.max_new_topics, 5);
        assert_eq!(settings.min_confidence_threshold, DEFAULT_MIN_CONFIDENCE);
        assert_eq!(settings.wizard_commit_mode, WizardCommitMode::Service);

        settings.save(&path).expect("save");
        assert_eq!(EngineSettings::load(&path).expect("reload"), settings);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"minConfidenceThreshold": 1.5}"#).expect("write");
        let error = EngineSettings::load(&path).expect_err("must reject");
        assert!(error.to_string().contains("VALIDATION_FAILED"));
    }

    #[test]
    fn blank_instructions_are_dropped() {
        let options = CategorizationOptions::default()
            .with_instructions("   ")
            .validated()
            .expect("valid");
        assert_eq!(options.instructions, None);
    }
}
