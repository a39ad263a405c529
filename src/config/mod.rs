use crate::models::Options;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Configuration manager for the application data directory.
///
/// Owns the locations of every persisted file:
/// - Options (`options.yaml`): game path, disabled path, theme, window size, language
/// - Mod store (`mods.json`): per-mod metadata, see [`crate::store::MetadataStore`]
/// - Profiles (`profiles.json`): named mod sets, see [`crate::store::ProfileStore`]
/// - Trash (`trash/`): where deleted mods are sent
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    options_path: Utf8PathBuf,
    store_path: Utf8PathBuf,
    profiles_path: Utf8PathBuf,
    trash_dir: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager rooted at `config_dir`.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            options_path: config_dir.join("options.yaml"),
            store_path: config_dir.join("mods.json"),
            profiles_path: config_dir.join("profiles.json"),
            trash_dir: config_dir.join("trash"),
            config_dir,
        })
    }

    /// Load the options file.
    ///
    /// # Returns
    /// The loaded Options, or defaults if the file doesn't exist
    pub fn load_options(&self) -> Result<Options> {
        if !self.options_path.exists() {
            tracing::warn!(
                "Options file not found at {}, using defaults",
                self.options_path
            );
            return Ok(Options::default());
        }

        let file_contents = fs::read_to_string(&self.options_path)
            .with_context(|| format!("Failed to read options: {}", self.options_path))?;

        // An empty file is what a fresh install leaves behind
        if file_contents.trim().is_empty() {
            return Ok(Options::default());
        }

        let options: Options = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse options: {}", self.options_path))?;

        tracing::info!("Loaded options from {}", self.options_path);
        Ok(options)
    }

    /// Save the options file.
    pub fn save_options(&self, options: &Options) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(options).context("Failed to serialize options to YAML")?;

        fs::write(&self.options_path, yaml_string)
            .with_context(|| format!("Failed to write options: {}", self.options_path))?;

        tracing::info!("Saved options to {}", self.options_path);
        Ok(())
    }

    /// Resolve the disabled holding directory for `options`.
    pub fn disabled_dir(&self, options: &Options) -> Utf8PathBuf {
        options.disabled_dir(&self.config_dir)
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn options_path(&self) -> &Utf8Path {
        &self.options_path
    }

    pub fn store_path(&self) -> &Utf8Path {
        &self.store_path
    }

    pub fn profiles_path(&self) -> &Utf8Path {
        &self.profiles_path
    }

    pub fn trash_dir(&self) -> &Utf8Path {
        &self.trash_dir
    }
}
