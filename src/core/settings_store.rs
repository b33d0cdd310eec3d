use std::path::{Path, PathBuf};

use anyhow::Context;

use super::models::RuntimeSettings;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
const TESSERACT_ENV: &str = "TALENT_DECK_TESSERACT";
const PDFTOPPM_ENV: &str = "TALENT_DECK_PDFTOPPM";
const MODEL_ENV: &str = "TALENT_DECK_MODEL";

pub struct SettingsStore {
    file_path: PathBuf,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsStore {
    pub fn new() -> Self {
        Self {
            file_path: settings_path(),
        }
    }

    pub fn at(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Settings file (or defaults), then environment overrides, then clamping.
    pub async fn load(&self) -> anyhow::Result<RuntimeSettings> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();

        let persisted = self.load_file().await?;
        Ok(apply_env_overrides(persisted, |key| std::env::var(key).ok()).sanitized())
    }

    async fn load_file(&self) -> anyhow::Result<RuntimeSettings> {
        if !tokio::fs::try_exists(&self.file_path)
            .await
            .unwrap_or(false)
        {
            return Ok(RuntimeSettings::default());
        }

        let content = tokio::fs::read_to_string(&self.file_path)
            .await
            .with_context(|| {
                format!("failed to read settings file {}", self.file_path.display())
            })?;

        serde_json::from_str::<RuntimeSettings>(&content).with_context(|| {
            format!("invalid JSON in settings file {}", self.file_path.display())
        })
    }

    /// Writes the settings as pretty JSON. The API key is never written.
    pub async fn save(&self, settings: &RuntimeSettings) -> anyhow::Result<()> {
        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(settings)?;
        tokio::fs::write(&self.file_path, json).await?;
        Ok(())
    }
}

fn apply_env_overrides(
    mut settings: RuntimeSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> RuntimeSettings {
    let value = |key: &str| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    if let Some(key) = value(API_KEY_ENV) {
        settings.gemini_api_key = Some(key);
    }
    if let Some(path) = value(TESSERACT_ENV) {
        settings.tesseract_path = path;
    }
    if let Some(path) = value(PDFTOPPM_ENV) {
        settings.pdftoppm_path = path;
    }
    if let Some(model) = value(MODEL_ENV) {
        settings.gemini_model = model;
    }
    settings
}

fn settings_path() -> PathBuf {
    app_data_root().join("settings.json")
}

pub fn app_data_root() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(local_app_data) = std::env::var("LOCALAPPDATA") {
            return PathBuf::from(local_app_data).join("TalentDeck");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = dirs::home_dir() {
            return home
                .join("Library")
                .join("Application Support")
                .join("TalentDeck");
        }
    }

    if let Some(path) = dirs::data_local_dir() {
        return path.join("TalentDeck");
    }

    PathBuf::from(".").join("TalentDeck")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::at(dir.path().join("settings.json"));

        let settings = store.load_file().await.unwrap();
        assert_eq!(settings, RuntimeSettings::default());
    }

    #[tokio::test]
    async fn saved_settings_round_trip_without_the_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::at(dir.path().join("nested").join("settings.json"));
        let settings = RuntimeSettings {
            match_threshold: 0.75,
            gemini_api_key: Some("secret".to_string()),
            ..RuntimeSettings::default()
        };

        store.save(&settings).await.unwrap();
        let written = std::fs::read_to_string(store.path()).unwrap();
        assert!(!written.contains("secret"));

        let loaded = store.load_file().await.unwrap();
        assert_eq!(loaded.match_threshold, 0.75);
        assert_eq!(loaded.gemini_api_key, None);
    }

    #[tokio::test]
    async fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "competencyTopN": 5 }"#).unwrap();

        let loaded = SettingsStore::at(&path).load_file().await.unwrap();
        assert_eq!(loaded.competency_top_n, 5);
        assert_eq!(loaded.ocr_language, "ind");
    }

    #[test]
    fn environment_overrides_apply_when_non_blank() {
        let env: HashMap<&str, &str> = HashMap::from([
            (API_KEY_ENV, " key-123 "),
            (TESSERACT_ENV, "/opt/tesseract"),
            (MODEL_ENV, "  "),
        ]);

        let settings = apply_env_overrides(RuntimeSettings::default(), |key| {
            env.get(key).map(|v| v.to_string())
        });

        assert_eq!(settings.gemini_api_key.as_deref(), Some("key-123"));
        assert_eq!(settings.tesseract_path, "/opt/tesseract");
        assert_eq!(settings.pdftoppm_path, "pdftoppm");
        assert_eq!(settings.gemini_model, RuntimeSettings::default().gemini_model);
    }
}
