use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use crate::equivalence::are_equivalent;
use crate::host::{
    ConfigStore, ConfigurationChange, Document, Indicator, Notifier,
    EXPECTED_ENCODING_KEY, SHOW_ERROR_MESSAGES_KEY, SHOW_STATUS_BAR_INDICATOR_KEY,
};
use crate::state::Workspace;

/// Outcome of comparing one document against its expected encoding.
/// Computed fresh on every check and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Untitled,
    NoExpectation,
    Match { expected: String, actual: String },
    Mismatch { expected: String, actual: String },
}

pub fn warning_message(file_name: &str, expected: &str, actual: &str) -> String {
    format!(
        "Encoding mismatch in \"{}\": expected \"{}\" but found \"{}\"",
        file_name, expected, actual
    )
}

pub fn tooltip(expected: &str, actual: &str) -> String {
    format!("Expected \"{}\" but found \"{}\"", expected, actual)
}

pub fn evaluate(document: &Document, config: &dyn ConfigStore) -> anyhow::Result<Verdict> {
    if document.is_untitled {
        return Ok(Verdict::Untitled);
    }

    let actual = document.encoding.clone();
    let expected = match config.expected_encoding(document)? {
        Some(expected) if !expected.is_empty() => expected,
        _ => return Ok(Verdict::NoExpectation),
    };

    if are_equivalent(&actual, &expected) {
        Ok(Verdict::Match { expected, actual })
    } else {
        Ok(Verdict::Mismatch { expected, actual })
    }
}

/// Re-evaluates `document` and drives both outputs. Any failed read leaves
/// the indicator hidden and emits nothing.
pub fn check(
    document: &Document,
    config: &dyn ConfigStore,
    indicator: &mut dyn Indicator,
    notifier: &mut dyn Notifier,
) {
    if let Err(err) = try_check(document, config, indicator, notifier) {
        warn!("check failed for {:?}: {:#}", document.path, err);
        indicator.hide();
    }
}

fn try_check(
    document: &Document,
    config: &dyn ConfigStore,
    indicator: &mut dyn Indicator,
    notifier: &mut dyn Notifier,
) -> anyhow::Result<()> {
    let verdict = evaluate(document, config)?;
    debug!("verdict {:?}", (&document.path, &verdict));

    let Verdict::Mismatch { expected, actual } = verdict else {
        indicator.hide();
        return Ok(());
    };

    let show_messages = config.flag(SHOW_ERROR_MESSAGES_KEY, true)?;
    let show_status_bar = config.flag(SHOW_STATUS_BAR_INDICATOR_KEY, true)?;

    if show_messages {
        notifier.warn(&warning_message(&document.display_name(), &expected, &actual));
    }

    if show_status_bar {
        indicator.show(&tooltip(&expected, &actual));
    } else {
        indicator.hide();
    }

    Ok(())
}

/// Owns the indicator and the open-document set, and maps host triggers
/// onto checks.
pub struct Reactor<C, I, N> {
    config: C,
    indicator: I,
    notifier: N,
    workspace: Workspace,
}

impl<C: ConfigStore, I: Indicator, N: Notifier> Reactor<C, I, N> {
    pub fn new(config: C, indicator: I, notifier: N) -> Self {
        Self {
            config,
            indicator,
            notifier,
            workspace: Workspace::new(),
        }
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut C {
        &mut self.config
    }

    #[cfg(test)]
    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    #[cfg(test)]
    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    #[cfg(test)]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn activate(&mut self, documents: Vec<Document>, active: Option<PathBuf>) {
        info!("activating with {} open documents", documents.len());
        self.indicator.hide();

        for document in documents {
            self.workspace.open(document);
        }
        self.workspace.active = active.filter(|path| self.workspace.documents.contains_key(path));

        self.check_all();
    }

    pub fn did_open(&mut self, document: Document) {
        self.workspace.open(document.clone());
        self.check_one(&document);
    }

    pub fn did_close(&mut self, path: &Path) {
        if self.workspace.close(path).is_none() {
            debug!("close for unknown document {:?}", path);
        }
    }

    pub fn did_change_active_editor(&mut self, document: Option<Document>) {
        match document {
            Some(document) => {
                self.workspace.active = Some(document.path.clone());
                self.workspace.open(document.clone());
                self.check_one(&document);
            }
            None => {
                self.workspace.active = None;
                self.indicator.hide();
            }
        }
    }

    pub fn did_change_configuration(&mut self, change: &ConfigurationChange) {
        if change.affects(EXPECTED_ENCODING_KEY) {
            info!("{} changed, re-checking open documents", EXPECTED_ENCODING_KEY);
            // Covers the active document too.
            self.check_all();
        } else if change.affects(SHOW_STATUS_BAR_INDICATOR_KEY) {
            if let Some(document) = self.workspace.active_document().cloned() {
                self.check_one(&document);
            }
        }
    }

    /// Consumes the reactor and disposes the indicator.
    pub fn deactivate(mut self) -> (C, I, N) {
        info!("deactivating");
        self.indicator.dispose();
        (self.config, self.indicator, self.notifier)
    }

    fn check_all(&mut self) {
        for document in self.workspace.in_check_order() {
            self.check_one(&document);
        }
    }

    fn check_one(&mut self, document: &Document) {
        check(document, &self.config, &mut self.indicator, &mut self.notifier);
    }
}
