use std::io::Write;
use std::path::PathBuf;
use log::error;
use serde::{Deserialize, Serialize};
use crate::host::{Document, Indicator, Notifier};

pub const INDICATOR_TEXT: &str = "\u{26a0} Encoding Mismatch";
pub const INDICATOR_ALIGNMENT: &str = "right";
pub const INDICATOR_PRIORITY: f64 = 100.2;
pub const WARNING_BACKGROUND: &str = "statusBarItem.warningBackground";
pub const WARNING_FOREGROUND: &str = "statusBarItem.warningForeground";

/// One line of host input.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
    #[serde(rename_all = "camelCase")]
    Activate {
        #[serde(default)]
        workspace_folders: Vec<PathBuf>,
        #[serde(default)]
        documents: Vec<Document>,
        #[serde(default)]
        active_document: Option<PathBuf>,
    },
    DidOpen { document: Document },
    DidClose { path: PathBuf },
    DidChangeActiveEditor {
        #[serde(default)]
        document: Option<Document>,
    },
    DidChangeConfiguration {
        #[serde(default)]
        sections: Vec<String>,
    },
    Deactivate,
}

impl HostEvent {
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

/// One line of output to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum HostCommand {
    #[serde(rename_all = "camelCase")]
    CreateStatusBarItem {
        alignment: String,
        priority: f64,
        text: String,
        background_color: String,
        color: String,
    },
    ShowStatusBarItem { tooltip: String },
    HideStatusBarItem,
    DisposeStatusBarItem,
    ShowWarningMessage { message: String },
}

fn send<W: Write>(out: &mut W, command: &HostCommand) {
    if let Err(err) = write_line(out, command) {
        error!("failed to send {:?}: {}", command, err);
    }
}

fn write_line<W: Write>(out: &mut W, command: &HostCommand) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *out, command)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemState {
    Hidden,
    Visible(String),
    Disposed,
}

/// The status bar indicator, rendered by the host. Only state transitions
/// are written out.
pub struct StatusBarItem<W: Write> {
    out: W,
    state: ItemState,
}

impl<W: Write> StatusBarItem<W> {
    /// Asks the host to create the item. It starts hidden.
    pub fn create(mut out: W) -> Self {
        send(&mut out, &HostCommand::CreateStatusBarItem {
            alignment: INDICATOR_ALIGNMENT.to_string(),
            priority: INDICATOR_PRIORITY,
            text: INDICATOR_TEXT.to_string(),
            background_color: WARNING_BACKGROUND.to_string(),
            color: WARNING_FOREGROUND.to_string(),
        });
        Self { out, state: ItemState::Hidden }
    }

    #[cfg(test)]
    pub fn state(&self) -> &ItemState {
        &self.state
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn transition(&mut self, next: ItemState, command: HostCommand) {
        if self.state == ItemState::Disposed || self.state == next {
            return;
        }
        send(&mut self.out, &command);
        self.state = next;
    }
}

impl<W: Write> Indicator for StatusBarItem<W> {
    fn show(&mut self, tooltip: &str) {
        self.transition(
            ItemState::Visible(tooltip.to_string()),
            HostCommand::ShowStatusBarItem { tooltip: tooltip.to_string() },
        );
    }

    fn hide(&mut self) {
        self.transition(ItemState::Hidden, HostCommand::HideStatusBarItem);
    }

    fn dispose(&mut self) {
        self.transition(ItemState::Disposed, HostCommand::DisposeStatusBarItem);
    }
}

pub struct WarningChannel<W: Write> {
    out: W,
}

impl<W: Write> WarningChannel<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Notifier for WarningChannel<W> {
    fn warn(&mut self, message: &str) {
        send(&mut self.out, &HostCommand::ShowWarningMessage { message: message.to_string() });
    }
}
