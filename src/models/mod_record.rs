use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Where a mod is installed, relative to the game root.
///
/// The taxonomy is fixed: every known mod lives in exactly one of these
/// directories while enabled, or in the disabled holding directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModCategory {
    /// `mods/`
    Mods,
    /// `assets/mod_overrides/`
    ModsOverride,
    /// `Maps/`
    Maps,
}

impl ModCategory {
    /// All categories, in scan order.
    pub const ALL: [ModCategory; 3] = [
        ModCategory::ModsOverride,
        ModCategory::Mods,
        ModCategory::Maps,
    ];

    /// Stable identifier used in the store and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            ModCategory::Mods => "mods",
            ModCategory::ModsOverride => "mods_override",
            ModCategory::Maps => "maps",
        }
    }

    /// Parse a category identifier, case-insensitively.
    ///
    /// Returns `None` for anything outside the taxonomy.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        ModCategory::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for ModCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not one of the three categories.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mod category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for ModCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModCategory::parse(s).ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Persisted metadata for one mod.
///
/// Stored in `mods.json` keyed by the mod's directory name. The name is not
/// part of the serialized body; [`crate::store::MetadataStore`] fills it in
/// on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModRecord {
    #[serde(skip)]
    pub name: String,

    /// `None` means the mod has not been classified yet.
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub category: Option<ModCategory>,

    /// Cached for display; the disk layout is the source of truth.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub ignored: bool,

    /// Empty when unknown.
    #[serde(default, rename = "workshopAssetID", alias = "modworkshopid")]
    pub workshop_asset_id: String,

    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: BTreeSet<String>,
}

impl ModRecord {
    /// A freshly discovered mod: enabled, not ignored, no tags.
    pub fn new(name: impl Into<String>, category: Option<ModCategory>) -> Self {
        Self {
            name: name.into(),
            category,
            enabled: true,
            ignored: false,
            workshop_asset_id: String::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn has_workshop_asset_id(&self) -> bool {
        !self.workshop_asset_id.is_empty()
    }
}

fn default_enabled() -> bool {
    true
}

/// Accepts `null`, a missing key, or a list with duplicates and blank entries.
fn deserialize_tags<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let tags: Option<Vec<String>> = Option::deserialize(deserializer)?;
    Ok(normalize_tags(tags.unwrap_or_default()))
}

/// Trim, drop empty entries and collapse duplicates.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|tag| tag.as_ref().trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}
