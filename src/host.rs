use std::collections::BTreeSet;
use std::path::PathBuf;
use serde::Deserialize;

/// Setting that holds the expected encoding of a document.
pub const EXPECTED_ENCODING_KEY: &str = "files.encoding";
pub const SHOW_ERROR_MESSAGES_KEY: &str = "encodingMismatch.showErrorMessages";
pub const SHOW_STATUS_BAR_INDICATOR_KEY: &str = "encodingMismatch.showStatusBarIndicator";

/// A text document as the host reports it. `encoding` is the label the host
/// used to decode the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub path: PathBuf,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub language_id: String,
    pub encoding: String,
    #[serde(default)]
    pub is_untitled: bool,
}

impl Document {
    pub fn display_name(&self) -> String {
        match &self.file_name {
            Some(name) => name.clone(),
            None => self.path.display().to_string(),
        }
    }
}

/// Read-only view of the host configuration.
pub trait ConfigStore {
    /// Expected encoding for `document`, scoped by its language and location.
    fn expected_encoding(&self, document: &Document) -> anyhow::Result<Option<String>>;

    /// A boolean toggle by its full dotted key.
    fn flag(&self, key: &str, default: bool) -> anyhow::Result<bool>;
}

/// The persistent mismatch indicator.
pub trait Indicator {
    fn show(&mut self, tooltip: &str);
    fn hide(&mut self);

    /// Removes the indicator for good. Later calls are ignored.
    fn dispose(&mut self) {
        self.hide();
    }
}

/// Transient warning notifications.
pub trait Notifier {
    fn warn(&mut self, message: &str);
}

/// The dotted keys touched by a configuration change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationChange {
    keys: BTreeSet<String>,
}

impl ConfigurationChange {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { keys: keys.into_iter().map(Into::into).collect() }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// True when a changed key is `section`, lies below it, or contains it.
    pub fn affects(&self, section: &str) -> bool {
        self.keys.iter().any(|key| {
            key == section
                || is_below(key, section)
                || is_below(section, key)
        })
    }
}

fn is_below(key: &str, section: &str) -> bool {
    key.len() > section.len()
        && key.starts_with(section)
        && key.as_bytes()[section.len()] == b'.'
}
