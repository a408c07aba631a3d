use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use anyhow::{anyhow, bail};
use log::{info, warn};
use serde_json::{Map, Value};
use crate::host::{
    ConfigStore, ConfigurationChange, Document,
    EXPECTED_ENCODING_KEY, SHOW_ERROR_MESSAGES_KEY, SHOW_STATUS_BAR_INDICATOR_KEY,
};
use crate::utils::{depth, folder_contains, folder_settings_path, override_languages};

/// One parsed settings document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    root: Map<String, Value>,
}

impl Settings {
    /// Accepts the JSON-with-comments dialect editors write: `//` and `/* */`
    /// comments and trailing commas.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        match json5::from_str::<Value>(text)? {
            Value::Object(root) => Ok(Self { root }),
            other => bail!("settings must be a JSON object, got {}", other),
        }
    }

    /// Plain (non language-specific) value of a dotted key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        lookup(&self.root, key)
    }

    /// Value of a dotted key inside a `[language]` block.
    pub fn get_for_language(&self, key: &str, language: &str) -> Option<&Value> {
        self.root
            .iter()
            .filter(|(k, _)| {
                override_languages(k).is_some_and(|langs| langs.contains(&language))
            })
            .filter_map(|(_, v)| v.as_object())
            .find_map(|block| lookup(block, key))
    }

    /// Leaf values keyed by (language block, dotted key). Plain keys use an
    /// empty block name.
    fn flatten(&self) -> BTreeMap<(String, String), Value> {
        let mut out = BTreeMap::new();
        for (key, value) in &self.root {
            match (override_languages(key), value) {
                (Some(_), Value::Object(block)) => flatten_into(key, "", block, &mut out),
                _ => flatten_value("", "", key, value, &mut out),
            }
        }
        out
    }
}

fn lookup<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if let Some(value) = map.get(key) {
        return Some(value);
    }
    key.match_indices('.').find_map(|(i, _)| {
        map.get(&key[..i])
            .and_then(Value::as_object)
            .and_then(|nested| lookup(nested, &key[i + 1..]))
    })
}

fn flatten_into(
    block: &str,
    prefix: &str,
    map: &Map<String, Value>,
    out: &mut BTreeMap<(String, String), Value>,
) {
    for (key, value) in map {
        flatten_value(block, prefix, key, value, out);
    }
}

fn flatten_value(
    block: &str,
    prefix: &str,
    key: &str,
    value: &Value,
    out: &mut BTreeMap<(String, String), Value>,
) {
    let full = if prefix.is_empty() { key.to_string() } else { format!("{}.{}", prefix, key) };
    match value {
        Value::Object(nested) if !nested.is_empty() => flatten_into(block, &full, nested, out),
        _ => {
            out.insert((block.to_string(), full), value.clone());
        }
    }
}

/// Dotted keys whose value differs between two snapshots.
pub fn changed_keys(old: &Settings, new: &Settings) -> BTreeSet<String> {
    let old = old.flatten();
    let new = new.flatten();
    old.keys()
        .chain(new.keys())
        .filter(|k| old.get(*k) != new.get(*k))
        .map(|(_, key)| key.clone())
        .collect()
}

#[derive(Debug, Clone)]
pub enum Layer {
    Loaded(Settings),
    Broken(String),
}

impl Layer {
    pub fn from_text(text: &str) -> Self {
        match Settings::parse(text) {
            Ok(settings) => Layer::Loaded(settings),
            Err(err) => Layer::Broken(err.to_string()),
        }
    }

    /// A missing file is an empty layer; an unreadable one is broken.
    pub fn read(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_text(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Layer::Loaded(Settings::default())
            }
            Err(err) => Layer::Broken(err.to_string()),
        }
    }

    fn settings(&self, path: &Path) -> anyhow::Result<&Settings> {
        match self {
            Layer::Loaded(settings) => Ok(settings),
            Layer::Broken(reason) => {
                Err(anyhow!("settings file {:?} is not usable: {}", path, reason))
            }
        }
    }
}

/// A settings file and, for folder layers, the folder it scopes.
#[derive(Debug, Clone)]
pub struct Source {
    pub path: PathBuf,
    pub folder: Option<PathBuf>,
    pub layer: Layer,
}

impl Source {
    pub fn user(path: PathBuf) -> Self {
        let layer = Layer::read(&path);
        Self { path, folder: None, layer }
    }

    pub fn folder(folder: PathBuf) -> Self {
        let path = folder_settings_path(&folder);
        let layer = Layer::read(&path);
        Self { path, folder: Some(folder), layer }
    }
}

/// Layered settings: workspace folders (deepest first) over user settings.
#[derive(Debug, Default)]
pub struct SettingsStore {
    user: Option<Source>,
    folders: Vec<Source>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: Source) {
        if let Layer::Broken(reason) = &source.layer {
            warn!("settings file {:?} is broken: {}", source.path, reason);
        }
        match source.folder {
            Some(_) => self.folders.push(source),
            None => self.user = Some(source),
        }
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.folders
            .iter()
            .chain(self.user.iter())
            .map(|source| source.path.clone())
            .collect()
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.folders
            .iter()
            .chain(self.user.iter())
            .any(|source| source.path.as_path() == path)
    }

    /// Re-reads the settings file at `path` and reports what changed.
    pub fn reload(&mut self, path: &Path) -> Option<ConfigurationChange> {
        let source = self.folders
            .iter_mut()
            .chain(self.user.iter_mut())
            .find(|source| source.path.as_path() == path)?;
        let layer = Layer::read(path);
        Some(replace_layer(source, layer))
    }

    /// Layers that apply to `path`, most specific first.
    fn layers_for(&self, path: &Path) -> Vec<&Source> {
        let mut layers: Vec<&Source> = self.folders
            .iter()
            .filter(|source| {
                source.folder.as_deref().is_some_and(|folder| folder_contains(folder, path))
            })
            .collect();
        layers.sort_by_key(|source| std::cmp::Reverse(source.folder.as_deref().map(depth)));
        layers.extend(self.user.iter());
        layers
    }

    /// Layers consulted for settings not tied to a document: the first
    /// workspace folder, then the user settings.
    fn window_layers(&self) -> Vec<&Source> {
        self.folders.iter().take(1).chain(self.user.iter()).collect()
    }
}

pub fn replace_layer(source: &mut Source, layer: Layer) -> ConfigurationChange {
    let change = match (&source.layer, &layer) {
        (Layer::Loaded(old), Layer::Loaded(new)) => ConfigurationChange::new(changed_keys(old, new)),
        (old, new) => {
            // Entering or leaving a broken state affects every read.
            let mut keys = BTreeSet::from([
                EXPECTED_ENCODING_KEY.to_string(),
                SHOW_ERROR_MESSAGES_KEY.to_string(),
                SHOW_STATUS_BAR_INDICATOR_KEY.to_string(),
            ]);
            for layer in [old, new] {
                if let Layer::Loaded(settings) = layer {
                    keys.extend(changed_keys(settings, &Settings::default()));
                }
            }
            ConfigurationChange::new(keys)
        }
    };

    match &layer {
        Layer::Loaded(_) => info!("reloaded settings {:?}", source.path),
        Layer::Broken(reason) => warn!("settings file {:?} is broken: {}", source.path, reason),
    }
    source.layer = layer;
    change
}

impl ConfigStore for SettingsStore {
    fn expected_encoding(&self, document: &Document) -> anyhow::Result<Option<String>> {
        let layers = self.layers_for(&document.path);
        let mut loaded = Vec::with_capacity(layers.len());
        for source in &layers {
            loaded.push(source.layer.settings(&source.path)?);
        }

        let language_value = loaded
            .iter()
            .find_map(|settings| settings.get_for_language(EXPECTED_ENCODING_KEY, &document.language_id));
        let value = language_value
            .or_else(|| loaded.iter().find_map(|settings| settings.get(EXPECTED_ENCODING_KEY)));

        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(label)) => Ok(Some(label.clone())),
            Some(other) => bail!("{} must be a string, got {}", EXPECTED_ENCODING_KEY, other),
        }
    }

    fn flag(&self, key: &str, default: bool) -> anyhow::Result<bool> {
        for source in self.window_layers() {
            match source.layer.settings(&source.path)?.get(key) {
                None | Some(Value::Null) => continue,
                Some(Value::Bool(value)) => return Ok(*value),
                Some(other) => bail!("{} must be a boolean, got {}", key, other),
            }
        }
        Ok(default)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn source(folder: Option<&str>, text: &str) -> Source {
        let path = match folder {
            Some(folder) => folder_settings_path(Path::new(folder)),
            None => PathBuf::from("/home/u/settings.json"),
        };
        Source {
            path,
            folder: folder.map(PathBuf::from),
            layer: Layer::from_text(text),
        }
    }

    fn doc(path: &str, language_id: &str) -> Document {
        Document {
            path: PathBuf::from(path),
            file_name: None,
            language_id: language_id.to_string(),
            encoding: "utf8".to_string(),
            is_untitled: false,
        }
    }

    #[test]
    fn test_dotted_and_nested_keys() -> anyhow::Result<()> {
        let settings = Settings::parse(indoc! {r#"
            {
                "files.encoding": "windows1252",
                "encodingMismatch": { "showErrorMessages": false }
            }
        "#})?;
        assert_eq!(settings.get("files.encoding"), Some(&Value::from("windows1252")));
        assert_eq!(settings.get(SHOW_ERROR_MESSAGES_KEY), Some(&Value::Bool(false)));
        assert_eq!(settings.get(SHOW_STATUS_BAR_INDICATOR_KEY), None);
        Ok(())
    }

    #[test]
    fn test_commented_settings_with_trailing_commas() -> anyhow::Result<()> {
        let mut store = SettingsStore::new();
        store.push(source(Some("/w"), indoc! {r#"
            {
                // legacy project
                "files.encoding": "windows1252",
                /* keep the banner quiet */
                "encodingMismatch.showErrorMessages": false,
            }
        "#}));

        let expected = store.expected_encoding(&doc("/w/a.txt", "plaintext"))?;
        assert_eq!(expected.as_deref(), Some("windows1252"));
        assert!(!store.flag(SHOW_ERROR_MESSAGES_KEY, true)?);
        Ok(())
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(Settings::parse("[1, 2]").is_err());
        assert!(Settings::parse("{ not json").is_err());
        assert_eq!(Settings::parse("  \n").ok(), Some(Settings::default()));
    }

    #[test]
    fn test_language_block_beats_plain_key_everywhere() -> anyhow::Result<()> {
        let mut store = SettingsStore::new();
        store.push(source(None, r#"{ "[python]": { "files.encoding": "latin1" } }"#));
        store.push(source(Some("/w"), r#"{ "files.encoding": "utf8" }"#));

        let python = store.expected_encoding(&doc("/w/main.py", "python"))?;
        assert_eq!(python.as_deref(), Some("latin1"));

        let text = store.expected_encoding(&doc("/w/notes.txt", "plaintext"))?;
        assert_eq!(text.as_deref(), Some("utf8"));
        Ok(())
    }

    #[test]
    fn test_deepest_folder_wins() -> anyhow::Result<()> {
        let mut store = SettingsStore::new();
        store.push(source(Some("/w"), r#"{ "files.encoding": "utf8" }"#));
        store.push(source(Some("/w/legacy"), r#"{ "files": { "encoding": "windows1252" } }"#));
        store.push(source(None, r#"{ "files.encoding": "utf16le" }"#));

        let legacy = store.expected_encoding(&doc("/w/legacy/a.txt", "plaintext"))?;
        assert_eq!(legacy.as_deref(), Some("windows1252"));

        let root = store.expected_encoding(&doc("/w/a.txt", "plaintext"))?;
        assert_eq!(root.as_deref(), Some("utf8"));

        let outside = store.expected_encoding(&doc("/elsewhere/a.txt", "plaintext"))?;
        assert_eq!(outside.as_deref(), Some("utf16le"));
        Ok(())
    }

    #[test]
    fn test_multi_language_block() -> anyhow::Result<()> {
        let mut store = SettingsStore::new();
        store.push(source(None, r#"{ "[c][cpp]": { "files.encoding": "cp437" } }"#));

        let cpp = store.expected_encoding(&doc("/w/a.cpp", "cpp"))?;
        assert_eq!(cpp.as_deref(), Some("cp437"));
        assert_eq!(store.expected_encoding(&doc("/w/a.rs", "rust"))?, None);
        Ok(())
    }

    #[test]
    fn test_absent_setting_is_no_expectation() -> anyhow::Result<()> {
        let store = SettingsStore::new();
        assert_eq!(store.expected_encoding(&doc("/w/a.txt", "plaintext"))?, None);
        assert!(store.flag(SHOW_ERROR_MESSAGES_KEY, true)?);
        Ok(())
    }

    #[test]
    fn test_broken_layer_fails_reads() {
        let mut store = SettingsStore::new();
        store.push(source(Some("/w"), "{ \"files.encoding\": "));

        assert!(store.expected_encoding(&doc("/w/a.txt", "plaintext")).is_err());
        assert!(store.flag(SHOW_STATUS_BAR_INDICATOR_KEY, true).is_err());
        // Documents outside the broken folder are unaffected.
        assert!(store.expected_encoding(&doc("/x/a.txt", "plaintext")).is_ok());
    }

    #[test]
    fn test_wrong_types_fail() {
        let mut store = SettingsStore::new();
        store.push(source(None, r#"{ "files.encoding": 5, "encodingMismatch.showErrorMessages": "no" }"#));

        assert!(store.expected_encoding(&doc("/w/a.txt", "plaintext")).is_err());
        assert!(store.flag(SHOW_ERROR_MESSAGES_KEY, true).is_err());
    }

    #[test]
    fn test_workspace_flag_beats_user_flag() -> anyhow::Result<()> {
        let mut store = SettingsStore::new();
        store.push(source(None, r#"{ "encodingMismatch.showStatusBarIndicator": true }"#));
        store.push(source(Some("/w"), r#"{ "encodingMismatch.showStatusBarIndicator": false }"#));

        assert!(!store.flag(SHOW_STATUS_BAR_INDICATOR_KEY, true)?);
        Ok(())
    }

    #[test]
    fn test_changed_keys() -> anyhow::Result<()> {
        let old = Settings::parse(indoc! {r#"
            {
                "files.encoding": "utf8",
                "editor.fontSize": 12,
                "[python]": { "files.encoding": "utf8" }
            }
        "#})?;
        let new = Settings::parse(indoc! {r#"
            {
                "files.encoding": "utf8",
                "editor.fontSize": 12,
                "[python]": { "files.encoding": "latin1" },
                "encodingMismatch": { "showStatusBarIndicator": false }
            }
        "#})?;

        let keys: Vec<String> = changed_keys(&old, &new).into_iter().collect();
        assert_eq!(keys, vec![
            "encodingMismatch.showStatusBarIndicator".to_string(),
            "files.encoding".to_string(),
        ]);
        assert!(changed_keys(&old, &old).is_empty());
        Ok(())
    }

    #[test]
    fn test_replace_layer_reports_broken_transitions() {
        let mut src = source(Some("/w"), r#"{ "editor.tabSize": 4 }"#);

        let change = replace_layer(&mut src, Layer::from_text("{"));
        assert!(change.affects(EXPECTED_ENCODING_KEY));
        assert!(change.affects(SHOW_STATUS_BAR_INDICATOR_KEY));
        assert!(change.affects("editor.tabSize"));

        let change = replace_layer(&mut src, Layer::from_text(r#"{ "editor.tabSize": 4 }"#));
        assert!(change.affects(EXPECTED_ENCODING_KEY));

        let change = replace_layer(&mut src, Layer::from_text(r#"{ "editor.tabSize": 2 }"#));
        assert!(!change.affects(EXPECTED_ENCODING_KEY));
        assert!(change.affects("editor"));
    }

    #[test]
    fn test_reload_from_disk() -> anyhow::Result<()> {
        let folder = std::env::temp_dir()
            .join(format!("encoding-sentinel-settings-{}", std::process::id()));
        let settings_path = folder_settings_path(&folder);
        std::fs::create_dir_all(settings_path.parent().unwrap())?;
        std::fs::write(&settings_path, r#"{ "files.encoding": "utf8" }"#)?;

        let mut store = SettingsStore::new();
        store.push(Source::folder(folder.clone()));
        assert_eq!(store.watched_paths(), vec![settings_path.clone()]);

        std::fs::write(&settings_path, r#"{ "files.encoding": "windows1252" }"#)?;
        let change = store.reload(&settings_path).expect("known settings file");
        assert!(change.affects(EXPECTED_ENCODING_KEY));

        let document = doc(&folder.join("a.txt").to_string_lossy(), "plaintext");
        assert_eq!(store.expected_encoding(&document)?.as_deref(), Some("windows1252"));

        std::fs::remove_file(&settings_path)?;
        let change = store.reload(&settings_path).expect("known settings file");
        assert!(change.affects(EXPECTED_ENCODING_KEY));
        assert_eq!(store.expected_encoding(&document)?, None);

        assert!(store.reload(Path::new("/nowhere/settings.json")).is_none());
        std::fs::remove_dir_all(&folder)?;
        Ok(())
    }
}
