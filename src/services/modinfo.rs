use camino::Utf8Path;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::fs;

/// Definition file of BLT mods (JSON).
pub const MOD_TXT: &str = "mod.txt";
/// Definition file of BeardLib mods and maps (XML).
pub const MAIN_XML: &str = "main.xml";

/// Reads a mod's definition files to find its version and workshop asset id.
///
/// Both lookups are best effort: unreadable or malformed files yield `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModInfoReader;

impl ModInfoReader {
    pub fn new() -> Self {
        Self
    }

    /// The version a mod declares, preferring `mod.txt` over `main.xml`.
    pub fn version(&self, mod_dir: &Utf8Path) -> Option<String> {
        self.mod_txt(mod_dir)
            .and_then(|json| {
                json.get("version")
                    .and_then(serde_json::Value::as_str)
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
            .or_else(|| main_xml(mod_dir)?.version)
    }

    /// The modworkshop asset id, from `main.xml` or a numeric `mod.txt` update identifier.
    pub fn workshop_asset_id(&self, mod_dir: &Utf8Path) -> Option<String> {
        if let Some(id) = main_xml(mod_dir).and_then(|xml| xml.asset_id) {
            return Some(id);
        }

        let json = self.mod_txt(mod_dir)?;
        json.get("updates")?
            .as_array()?
            .iter()
            .filter_map(|update| update.get("identifier"))
            .find_map(|identifier| match identifier {
                serde_json::Value::Number(n) => Some(n.to_string()),
                serde_json::Value::String(s) if is_numeric(s) => Some(s.trim().to_string()),
                _ => None,
            })
    }

    fn mod_txt(&self, mod_dir: &Utf8Path) -> Option<serde_json::Value> {
        let raw = read_definition(mod_dir, MOD_TXT)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!("Could not parse {}/{}: {}", mod_dir, MOD_TXT, e);
                None
            }
        }
    }
}

/// What `main.xml` declares.
#[derive(Debug, Default, PartialEq, Eq)]
struct MainXml {
    /// `version` attribute of the root element.
    version: Option<String>,
    /// Numeric `id` of the first `<AssetUpdates>` element.
    asset_id: Option<String>,
}

fn main_xml(mod_dir: &Utf8Path) -> Option<MainXml> {
    read_definition(mod_dir, MAIN_XML).map(|raw| parse_main_xml(&raw))
}

fn parse_main_xml(raw: &str) -> MainXml {
    let mut reader = Reader::from_reader(raw.as_bytes());
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut xml = MainXml::default();
    let mut seen_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if !seen_root {
                    seen_root = true;
                    xml.version = attr_value(&e, b"version")
                        .map(|v| v.trim().to_string())
                        .filter(|v| !v.is_empty());
                }
                if xml.asset_id.is_none() && e.local_name().as_ref().eq_ignore_ascii_case(b"AssetUpdates") {
                    xml.asset_id = attr_value(&e, b"id").filter(|id| is_numeric(id));
                }
                if xml.asset_id.is_some() {
                    break;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!("Stopped reading {} at byte {}: {}", MAIN_XML, reader.buffer_position(), e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    xml
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok())
        .map(|value| value.to_string())
}

fn read_definition(mod_dir: &Utf8Path, file: &str) -> Option<String> {
    let path = mod_dir.join(file);
    if !path.is_file() {
        return None;
    }
    fs::read_to_string(&path)
        .inspect_err(|e| tracing::debug!("Could not read {}: {}", path, e))
        .ok()
}

fn is_numeric(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}
