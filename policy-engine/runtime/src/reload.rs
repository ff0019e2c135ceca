use crate::{loader, Metrics};
use anyhow::{Context, Result};
use mesh_policy_k8s_index::{Snapshot, Writer};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{sync::mpsc, time};
use tracing::{debug, info, warn};

/// Changes are applied once no further events arrive for this long.
const DEBOUNCE: Duration = Duration::from_millis(250);

/// Loads configuration from disk into the store, replacing its contents.
#[derive(Clone)]
pub struct Reloader {
    paths: Arc<[PathBuf]>,
    writer: Arc<Mutex<Writer>>,
    metrics: Metrics,
}

// === impl Reloader ===

impl Reloader {
    pub fn new(paths: Vec<PathBuf>, writer: Writer, metrics: Metrics) -> Self {
        Self {
            paths: paths.into(),
            writer: Arc::new(Mutex::new(writer)),
            metrics,
        }
    }

    /// Reads every configured path and publishes a new snapshot.
    ///
    /// If any file fails to load or the configuration is invalid, the previous snapshot remains
    /// in effect.
    pub async fn reload(&self) -> Result<Arc<Snapshot>> {
        let paths = self.paths.clone();
        let loaded = tokio::task::spawn_blocking(move || loader::load(&paths))
            .await
            .context("loader task failed")?;
        let res = loaded.and_then(|docs| self.writer.lock().reset(docs));
        self.metrics.reloaded(res.is_ok());
        let snapshot = res?;
        let counts = snapshot.counts();
        info!(
            generation = snapshot.generation(),
            resources = counts.total(),
            ignored = counts.ignored,
            "Configuration loaded"
        );
        Ok(snapshot)
    }

    /// Watches the configured paths, reloading when anything relevant changes.
    pub async fn watch(self) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // The receiver is gone only once the watch task has stopped.
            let _ = tx.send(res);
        })
        .context("failed to create file watcher")?;

        for dir in self.watched_dirs() {
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("failed to watch {}", dir.display()))?;
            debug!(path = %dir.display(), "Watching");
        }

        while let Some(res) = rx.recv().await {
            if !self.is_relevant(res) {
                continue;
            }

            // Wait for changes to settle so that editors' write-and-rename sequences result in a
            // single reload.
            loop {
                match time::timeout(DEBOUNCE, rx.recv()).await {
                    Ok(Some(_)) => continue,
                    Ok(None) => return Ok(()),
                    Err(_) => break,
                }
            }

            if let Err(error) = self.reload().await {
                warn!(error = %format_args!("{error:#}"), "Invalid configuration; keeping the previous snapshot");
            }
        }
        Ok(())
    }

    /// Directories are watched directly; for files, their parent directory is watched so that
    /// files replaced by a rename are still observed.
    fn watched_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self
            .paths
            .iter()
            .map(|path| {
                if path.is_dir() {
                    return path.clone();
                }
                match path.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                    _ => PathBuf::from("."),
                }
            })
            .collect::<Vec<_>>();
        dirs.sort();
        dirs.dedup();
        dirs
    }

    fn is_relevant(&self, res: notify::Result<Event>) -> bool {
        let event = match res {
            Ok(event) => event,
            Err(error) => {
                warn!(%error, "File watch error");
                return false;
            }
        };
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            return false;
        }
        event.paths.iter().any(|p| is_watched(&self.paths, p))
    }
}

/// Returns true if a change to `changed` can affect the configuration loaded from `paths`.
fn is_watched(paths: &[PathBuf], changed: &Path) -> bool {
    paths.iter().any(|path| {
        if changed == path {
            return true;
        }
        path.is_dir() && changed.parent() == Some(path.as_path()) && loader::is_config_file(changed)
    })
}
