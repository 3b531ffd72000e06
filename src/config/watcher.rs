//! Hot reload of the config file.
//!
//! ```text
//! notify (parent directory) → events naming the config file
//!     → raw change channel
//!     → reload task: wait for a quiet period, load + validate,
//!       drop configs equal to the last one sent
//!     → update channel → CircuitBreakerManager::apply_config
//! ```
//!
//! The parent directory is watched rather than the file itself, so editors
//! that save by writing a temp file and renaming it still trigger a reload.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time;

use crate::config::loader::load_config;
use crate::config::schema::ResilienceConfig;

/// Quiet period after the last file event before reloading.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches a config file and emits each distinct, valid new version.
pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
    last_sent: ResilienceConfig,
    update_tx: mpsc::UnboundedSender<ResilienceConfig>,
}

impl ConfigWatcher {
    /// `current` is the config already in effect; an identical reload is skipped.
    pub fn new(path: &Path, current: ResilienceConfig) -> (Self, mpsc::UnboundedReceiver<ResilienceConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                debounce: DEFAULT_DEBOUNCE,
                last_sent: current,
                update_tx,
            },
            update_rx,
        )
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. Must be called inside a tokio runtime.
    ///
    /// The returned watcher must be kept alive for as long as updates are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let file_name = self.path.file_name().map(OsString::from);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if touches_file(&event, file_name.as_deref()) {
                        let _ = change_tx.send(());
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default(),
        )?;

        let dir = watch_dir(&self.path);
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, dir = ?dir, debounce_ms = self.debounce.as_millis() as u64, "Config watcher started");

        tokio::spawn(self.reload_on_change(change_rx));
        Ok(watcher)
    }

    async fn reload_on_change(mut self, mut changes: mpsc::UnboundedReceiver<()>) {
        while changes.recv().await.is_some() {
            // each further event restarts the quiet period
            while let Ok(Some(())) = time::timeout(self.debounce, changes.recv()).await {}
            self.reload();
        }
        tracing::debug!(path = ?self.path, "Config watcher stopped");
    }

    fn reload(&mut self) {
        let config = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                return;
            }
        };

        if config == self.last_sent {
            tracing::debug!(path = ?self.path, "Config file changed on disk but content is unchanged");
            return;
        }

        tracing::info!(path = ?self.path, circuits = config.circuits.len(), "Config change detected, reloading");
        self.last_sent = config.clone();
        let _ = self.update_tx.send(config);
    }
}

/// Directory to watch for `path`.
fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Whether `event` creates or modifies the file named `file_name`.
fn touches_file(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    if !(event.kind.is_modify() || event.kind.is_create()) {
        return false;
    }
    let Some(file_name) = file_name else {
        return false;
    };
    event.paths.iter().any(|p| p.file_name() == Some(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, EventKind, ModifyKind, RenameMode};

    const DB: &str = r#"
        [[circuits]]
        name = "db"
        error_threshold_percentage = 40.0
    "#;

    fn scratch_file(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("breaker-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_only_events_for_the_config_file_count() {
        let name = std::ffi::OsStr::new("breakers.toml");
        let at = |kind: EventKind, path: &str| Event::new(kind).add_path(PathBuf::from(path));

        let write = || EventKind::Modify(ModifyKind::Data(DataChange::Content));
        assert!(touches_file(&at(write(), "/etc/app/breakers.toml"), Some(name)));
        assert!(touches_file(
            &at(EventKind::Modify(ModifyKind::Name(RenameMode::To)), "/etc/app/breakers.toml"),
            Some(name)
        ));
        assert!(touches_file(&at(EventKind::Create(CreateKind::File), "/etc/app/breakers.toml"), Some(name)));

        assert!(!touches_file(&at(write(), "/etc/app/.breakers.toml.swp"), Some(name)));
        assert!(!touches_file(&at(EventKind::Access(AccessKind::Any), "/etc/app/breakers.toml"), Some(name)));
        assert!(!touches_file(&at(write(), "/etc/app/breakers.toml"), None));
    }

    #[test]
    fn test_watch_dir_of_bare_file_name() {
        assert_eq!(watch_dir(Path::new("breakers.toml")), PathBuf::from("."));
        assert_eq!(watch_dir(Path::new("/etc/app/breakers.toml")), PathBuf::from("/etc/app"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bursts_collapse_and_unchanged_content_is_skipped() {
        let path = scratch_file(DB);
        let current = load_config(&path).unwrap();
        let (watcher, mut updates) = ConfigWatcher::new(&path, current);
        let (changes, change_rx) = mpsc::unbounded_channel();
        tokio::spawn(watcher.reload_on_change(change_rx));

        let quiet = |updates: &mut mpsc::UnboundedReceiver<ResilienceConfig>| {
            assert!(updates.try_recv().is_err());
        };

        // an editor save with identical content
        for _ in 0..3 {
            changes.send(()).unwrap();
        }
        time::sleep(Duration::from_secs(1)).await;
        quiet(&mut updates);

        // a real edit arriving as a burst of events
        std::fs::write(&path, DB.replace("40.0", "25.0")).unwrap();
        for _ in 0..4 {
            changes.send(()).unwrap();
            time::sleep(Duration::from_millis(100)).await;
        }
        let reloaded = updates.recv().await.unwrap();
        assert_eq!(reloaded.circuits[0].error_threshold_percentage, 25.0);
        time::sleep(Duration::from_secs(1)).await;
        quiet(&mut updates);

        // an invalid file is not forwarded
        std::fs::write(&path, "[[circuits]]\nname = \"\"\n").unwrap();
        changes.send(()).unwrap();
        time::sleep(Duration::from_secs(1)).await;
        quiet(&mut updates);

        std::fs::remove_file(&path).unwrap();
    }
}
