use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Name of the default disabled holding directory, created next to the data files.
pub const DISABLED_MODS_DIR: &str = "disabled-mods";

pub const LIGHT_THEME: &str = "light";
pub const DARK_THEME: &str = "dark";

/// Global options from `options.yaml`
///
/// Loaded once at startup by [`crate::config::ConfigManager`], mutated through
/// the setters and persisted on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Game installation root. Empty until the user configures it.
    #[serde(default)]
    pub game_path: String,

    /// Disabled holding directory. Empty means `<data dir>/disabled-mods`.
    #[serde(default)]
    pub disabled_path: String,

    #[serde(default = "default_color_theme")]
    pub color_theme: String,

    #[serde(default = "default_window_size")]
    pub window_w: u32,

    #[serde(default = "default_window_size")]
    pub window_h: u32,

    #[serde(default = "default_update_alert")]
    pub update_alert: bool,

    #[serde(default = "default_lang")]
    pub lang: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            game_path: String::new(),
            disabled_path: String::new(),
            color_theme: default_color_theme(),
            window_w: default_window_size(),
            window_h: default_window_size(),
            update_alert: default_update_alert(),
            lang: default_lang(),
        }
    }
}

fn default_color_theme() -> String {
    LIGHT_THEME.to_string()
}

fn default_window_size() -> u32 {
    800
}

fn default_update_alert() -> bool {
    true
}

fn default_lang() -> String {
    "en_US".to_string()
}

impl Options {
    /// The configured game root, if any.
    pub fn game_root(&self) -> Option<Utf8PathBuf> {
        let trimmed = self.game_path.trim();
        (!trimmed.is_empty()).then(|| Utf8PathBuf::from(trimmed))
    }

    /// The disabled holding directory, falling back to `<data_dir>/disabled-mods`.
    pub fn disabled_dir(&self, data_dir: &Utf8Path) -> Utf8PathBuf {
        let trimmed = self.disabled_path.trim();
        if trimmed.is_empty() {
            data_dir.join(DISABLED_MODS_DIR)
        } else {
            Utf8PathBuf::from(trimmed)
        }
    }

    pub fn set_game_path(&mut self, path: impl Into<String>) {
        self.game_path = path.into();
    }

    pub fn set_disabled_path(&mut self, path: impl Into<String>) {
        self.disabled_path = path.into();
    }

    pub fn set_color_theme(&mut self, theme: impl Into<String>) {
        self.color_theme = theme.into();
    }

    pub fn window_size(&self) -> (u32, u32) {
        (self.window_w, self.window_h)
    }

    pub fn set_window_size(&mut self, width: u32, height: u32) {
        self.window_w = width;
        self.window_h = height;
    }

    pub fn set_update_alert(&mut self, alert: bool) {
        self.update_alert = alert;
    }

    pub fn set_lang(&mut self, lang: impl Into<String>) {
        self.lang = lang.into();
    }
}
