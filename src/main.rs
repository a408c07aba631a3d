use log::{debug, error, info, warn};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use anyhow::Result;
use std::io::{BufRead, Write};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use dotenv::dotenv;

mod equivalence;
mod host;
mod protocol;
mod reactor;
mod settings;
mod state;
mod utils;

use host::{ConfigurationChange, Document};
use protocol::{HostEvent, StatusBarItem, WarningChannel};
use reactor::Reactor;
use settings::{SettingsStore, Source};
use utils::absolutize;

const USER_SETTINGS_ENV: &str = "ENCODING_SENTINEL_USER_SETTINGS";

/// Quiet period after the last settings file event before it is re-read.
const SETTLE: Duration = Duration::from_millis(100);

#[derive(Debug)]
enum Trigger {
    Host(HostEvent),
    Watch(notify::Result<Event>),
    /// stdin reached end of file.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

type LiveReactor<W> = Reactor<SettingsStore, StatusBarItem<W>, WarningChannel<W>>;

/// Everything that exists between `activate` and `deactivate`.
struct Session<W: Write> {
    reactor: LiveReactor<W>,
    watcher: Option<RecommendedWatcher>,
    /// Settings files touched since the last reload.
    pending: BTreeSet<PathBuf>,
}

struct App<W: Write, F: Fn() -> W> {
    output: F,
    user_settings: Option<PathBuf>,
    watch_tx: mpsc::Sender<Trigger>,
    session: Option<Session<W>>,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();
}

impl<W: Write, F: Fn() -> W> App<W, F> {
    fn new(output: F, user_settings: Option<PathBuf>, watch_tx: mpsc::Sender<Trigger>) -> Self {
        Self {
            output,
            user_settings,
            watch_tx,
            session: None,
        }
    }

    fn handle(&mut self, trigger: Trigger) -> Flow {
        match trigger {
            Trigger::Host(event) => self.handle_host_event(event),
            Trigger::Watch(Ok(event)) => {
                self.handle_watch_event(&event);
                Flow::Continue
            }
            Trigger::Watch(Err(e)) => {
                warn!("watch error: {:?}", e);
                Flow::Continue
            }
            Trigger::Closed => {
                info!("host input closed");
                self.deactivate();
                Flow::Stop
            }
        }
    }

    fn handle_host_event(&mut self, event: HostEvent) -> Flow {
        debug!("host event: {:?}", event);

        if let HostEvent::Activate { workspace_folders, documents, active_document } = event {
            self.activate(workspace_folders, documents, active_document);
            return Flow::Continue;
        }
        if event == HostEvent::Deactivate {
            self.deactivate();
            return Flow::Stop;
        }

        let Some(session) = self.session.as_mut() else {
            warn!("ignoring {:?} before activation", event);
            return Flow::Continue;
        };
        let reactor = &mut session.reactor;

        match event {
            HostEvent::DidOpen { document } => reactor.did_open(document),
            HostEvent::DidClose { path } => reactor.did_close(&path),
            HostEvent::DidChangeActiveEditor { document } => {
                reactor.did_change_active_editor(document)
            }
            HostEvent::DidChangeConfiguration { sections } => {
                // The host may have written a settings file we have not seen yet.
                let mut keys: Vec<String> = sections;
                for path in reactor.config().watched_paths() {
                    if let Some(change) = reactor.config_mut().reload(&path) {
                        keys.extend(change.keys().map(str::to_string));
                    }
                }
                reactor.did_change_configuration(&ConfigurationChange::new(keys));
            }
            HostEvent::Activate { .. } | HostEvent::Deactivate => {}
        }
        Flow::Continue
    }

    fn activate(
        &mut self,
        folders: Vec<PathBuf>,
        documents: Vec<Document>,
        active: Option<PathBuf>,
    ) {
        if self.session.is_some() {
            warn!("already active, ignoring activate");
            return;
        }

        let mut store = SettingsStore::new();
        if let Some(path) = &self.user_settings {
            store.push(Source::user(absolutize(path)));
        }
        for folder in &folders {
            store.push(Source::folder(absolutize(folder)));
        }

        let watcher = match self.watch_settings(&store) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("settings changes will not be picked up: {:#}", e);
                None
            }
        };

        let indicator = StatusBarItem::create((self.output)());
        let notifier = WarningChannel::new((self.output)());
        let mut reactor = Reactor::new(store, indicator, notifier);
        reactor.activate(documents, active);

        self.session = Some(Session { reactor, watcher, pending: BTreeSet::new() });
    }

    fn watch_settings(&self, store: &SettingsStore) -> Result<RecommendedWatcher> {
        let tx = self.watch_tx.clone();
        let mut watcher = recommended_watcher(move |res| {
            let _ = tx.blocking_send(Trigger::Watch(res));
        })?;

        for path in store.watched_paths() {
            watch_settings_dir(&mut watcher, &path);
        }
        Ok(watcher)
    }

    /// Records which settings files changed. They are re-read by
    /// `flush_reloads` once events stop arriving.
    fn handle_watch_event(&mut self, event: &Event) {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
            _ => return,
        }
        let Some(session) = self.session.as_mut() else { return };
        let watched = session.reactor.config().watched_paths();

        for path in &event.paths {
            if session.reactor.config().is_watched(path) {
                session.pending.insert(path.clone());
                continue;
            }
            // A settings directory appeared after activation.
            let created = watched.iter().filter(|settings| settings.parent() == Some(path.as_path()));
            for settings in created {
                if let Some(watcher) = session.watcher.as_mut() {
                    watch_settings_dir(watcher, settings);
                }
                session.pending.insert(settings.clone());
            }
        }
    }

    fn has_pending_reloads(&self) -> bool {
        self.session.as_ref().is_some_and(|session| !session.pending.is_empty())
    }

    fn flush_reloads(&mut self) {
        let Some(session) = self.session.as_mut() else { return };
        let reactor = &mut session.reactor;

        for path in std::mem::take(&mut session.pending) {
            let Some(change) = reactor.config_mut().reload(&path) else { continue };
            if change.is_empty() {
                continue;
            }
            info!("settings {:?} changed: {:?}", path, change.keys().collect::<Vec<_>>());
            reactor.did_change_configuration(&change);
        }
    }

    fn deactivate(&mut self) {
        if let Some(session) = self.session.take() {
            session.reactor.deactivate();
        }
    }
}

/// Watches the directory holding `settings_path`, or the directory above it
/// while the settings directory does not exist yet.
fn watch_settings_dir(watcher: &mut RecommendedWatcher, settings_path: &Path) {
    let Some(dir) = settings_path.parent() else { return };
    if watcher.watch(dir, RecursiveMode::NonRecursive).is_ok() {
        info!("watching {:?}", dir);
        return;
    }
    let Some(parent) = dir.parent() else { return };
    match watcher.watch(parent, RecursiveMode::NonRecursive) {
        Ok(()) => info!("{:?} does not exist yet, watching {:?}", dir, parent),
        Err(e) => warn!("not watching settings {:?}: {}", settings_path, e),
    }
}

/// Handles triggers in order. Settings file events are collapsed until
/// `SETTLE` passes without another trigger, so a file is read after the
/// writer is done with it.
async fn run<W: Write, F: Fn() -> W>(app: &mut App<W, F>, rx: &mut mpsc::Receiver<Trigger>) {
    while let Some(trigger) = rx.recv().await {
        if app.handle(trigger) == Flow::Stop {
            return;
        }
        while app.has_pending_reloads() {
            match tokio::time::timeout(SETTLE, rx.recv()).await {
                Ok(Some(trigger)) => {
                    if app.handle(trigger) == Flow::Stop {
                        return;
                    }
                }
                Ok(None) | Err(_) => app.flush_reloads(),
            }
        }
    }
}

/// Blocking reader for host input. Sends `Closed` once input ends.
fn read_host_events<R: BufRead>(input: R, tx: mpsc::Sender<Trigger>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("failed to read host input: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match HostEvent::parse(&line) {
            Ok(event) => {
                if tx.blocking_send(Trigger::Host(event)).is_err() {
                    return;
                }
            }
            Err(e) => warn!("skipping malformed host line {:?}: {}", line, e),
        }
    }
    let _ = tx.blocking_send(Trigger::Closed);
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_logger();

    info!("Starting encoding-sentinel");

    let user_settings = std::env::var_os(USER_SETTINGS_ENV).map(PathBuf::from);
    if let Some(path) = &user_settings {
        info!("user settings at {:?}", path);
    }

    let (tx, mut rx) = mpsc::channel::<Trigger>(32);
    let stdin_tx = tx.clone();
    std::thread::spawn(move || read_host_events(std::io::stdin().lock(), stdin_tx));

    let mut app = App::new(std::io::stdout, user_settings, tx);

    run(&mut app, &mut rx).await;

    info!("encoding-sentinel stopped");
    Ok(())
}
