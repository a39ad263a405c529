use crate::models::{ModCategory, Options};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;

/// Top-level folders of `mods/` that belong to the mod loader, not to a mod.
pub const MODS_IGNORE: [&str; 4] = ["base", "logs", "saves", "downloads"];

/// Maps a mod's category and name to its directory on disk.
///
/// Every method except [`ensure_category_dirs`](Self::ensure_category_dirs) is
/// a pure function of the configured roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    game_root: Utf8PathBuf,
    disabled_dir: Utf8PathBuf,
}

impl PathResolver {
    pub fn new(game_root: impl Into<Utf8PathBuf>, disabled_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            game_root: game_root.into(),
            disabled_dir: disabled_dir.into(),
        }
    }

    /// Build a resolver from options, or `None` if no game path is configured.
    pub fn from_options(options: &Options, data_dir: &Utf8Path) -> Option<Self> {
        let game_root = options.game_root()?;
        Some(Self::new(game_root, options.disabled_dir(data_dir)))
    }

    pub fn game_root(&self) -> &Utf8Path {
        &self.game_root
    }

    pub fn disabled_dir(&self) -> &Utf8Path {
        &self.disabled_dir
    }

    /// A copy of this resolver pointing at another disabled directory.
    pub fn with_disabled_dir(&self, disabled_dir: impl Into<Utf8PathBuf>) -> Self {
        Self::new(self.game_root.clone(), disabled_dir)
    }

    pub fn category_dir(&self, category: ModCategory) -> Utf8PathBuf {
        match category {
            ModCategory::Mods => self.game_root.join("mods"),
            ModCategory::ModsOverride => self.game_root.join("assets").join("mod_overrides"),
            ModCategory::Maps => self.game_root.join("Maps"),
        }
    }

    /// Installed location of an enabled mod.
    pub fn mod_path(&self, category: ModCategory, name: &str) -> Utf8PathBuf {
        self.category_dir(category).join(name)
    }

    /// Location of a mod while it is disabled.
    pub fn disabled_path(&self, name: &str) -> Utf8PathBuf {
        self.disabled_dir.join(name)
    }

    /// Whether `name` is a reserved folder of the given category.
    ///
    /// Only `mods/` has reserved folders. Matching ignores ASCII case since
    /// the game mostly runs on case-insensitive filesystems.
    pub fn is_reserved(category: ModCategory, name: &str) -> bool {
        category == ModCategory::Mods
            && MODS_IGNORE
                .iter()
                .any(|reserved| reserved.eq_ignore_ascii_case(name))
    }

    /// Create the three category directories and the disabled directory.
    pub fn ensure_category_dirs(&self) -> io::Result<()> {
        for category in ModCategory::ALL {
            let dir = self.category_dir(category);
            if !dir.is_dir() {
                tracing::info!("Creating {} directory at {}", category, dir);
                fs::create_dir_all(&dir)?;
            }
        }

        if !self.disabled_dir.is_dir() {
            tracing::info!("Creating disabled directory at {}", self.disabled_dir);
            fs::create_dir_all(&self.disabled_dir)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn resolver() -> PathResolver {
        PathResolver::new("/games/PAYDAY 2", "/data/disabled-mods")
    }

    #[test]
    fn test_category_dirs() {
        let paths = resolver();
        assert_eq!(paths.category_dir(ModCategory::Mods), "/games/PAYDAY 2/mods");
        assert_eq!(
            paths.category_dir(ModCategory::ModsOverride),
            "/games/PAYDAY 2/assets/mod_overrides"
        );
        assert_eq!(paths.mod_path(ModCategory::Maps, "heist"), "/games/PAYDAY 2/Maps/heist");
        assert_eq!(paths.disabled_path("heist"), "/data/disabled-mods/heist");
    }

    #[test]
    fn test_reserved_only_in_mods() {
        assert!(PathResolver::is_reserved(ModCategory::Mods, "base"));
        assert!(PathResolver::is_reserved(ModCategory::Mods, "Logs"));
        assert!(!PathResolver::is_reserved(ModCategory::Maps, "base"));
        assert!(!PathResolver::is_reserved(ModCategory::Mods, "baseball"));
    }

    #[test]
    fn test_from_options_requires_game_path() {
        let mut options = Options::default();
        let data_dir = Utf8Path::new("/data");
        assert!(PathResolver::from_options(&options, data_dir).is_none());

        options.set_game_path("/games/PAYDAY 2");
        assert_eq!(PathResolver::from_options(&options, data_dir), Some(resolver()));
    }

    #[test]
    fn test_ensure_category_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let paths = PathResolver::new(root.join("game"), root.join("off"));

        paths.ensure_category_dirs().unwrap();
        paths.ensure_category_dirs().unwrap();

        for category in ModCategory::ALL {
            assert!(paths.category_dir(category).is_dir());
        }
        assert!(paths.disabled_dir().is_dir());
    }

    proptest! {
        #[test]
        fn mod_path_is_deterministic_and_named(name in "[A-Za-z0-9 _.-]{1,24}") {
            prop_assume!(name != "." && name != "..");
            let paths = resolver();
            for category in ModCategory::ALL {
                let first = paths.mod_path(category, &name);
                prop_assert_eq!(&first, &paths.mod_path(category, &name));
                prop_assert!(first.starts_with(paths.game_root()));
            }
            let disabled = paths.disabled_path(&name);
            prop_assert_eq!(disabled.parent(), Some(paths.disabled_dir()));
        }
    }
}
