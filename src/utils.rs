use std::path::{Path, PathBuf};

pub const SETTINGS_DIR: &str = ".vscode";
pub const SETTINGS_FILE: &str = "settings.json";

/// `<folder>/.vscode/settings.json`
pub fn folder_settings_path(folder: &Path) -> PathBuf {
    folder.join(SETTINGS_DIR).join(SETTINGS_FILE)
}

/// Component-wise containment, so `/w/ab` is not inside `/w/a`.
pub fn folder_contains(folder: &Path, path: &Path) -> bool {
    path.starts_with(folder)
}

pub fn depth(path: &Path) -> usize {
    path.components().count()
}

/// Absolute form of `path`, falling back to the input when the current
/// directory is unavailable.
pub fn absolutize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Splits a language override key such as `[c][cpp]` into its languages.
pub fn override_languages(key: &str) -> Option<Vec<&str>> {
    if !key.starts_with('[') || !key.ends_with(']') {
        return None;
    }
    let languages: Vec<&str> = key[1..key.len() - 1]
        .split("][")
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .collect();
    if languages.is_empty() { None } else { Some(languages) }
}
