//! Watch the sessions directory and keep the session store current.
//!
//! Changed or created `.jsonl` files are re-parsed and upserted; removed
//! files are evicted. Task resolution always reads the live cache, so a
//! stale reference simply stops resolving once its file is gone.

use crate::sessions::SessionStore;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, DebouncedEventKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Debounce duration for file changes
const DEBOUNCE_MS: u64 = 200;

/// Start watching the store's sessions directory. Runs until the process
/// exits; watcher failures disable invalidation but never take the server
/// down.
pub async fn start(store: Arc<SessionStore>) {
    let watch_path = store.sessions_dir.clone();
    info!(
        "Watching {} for session changes (debounce: {}ms)",
        watch_path.display(),
        DEBOUNCE_MS
    );

    // blocking_send works from the notify callback thread
    let (tx, mut rx) = tokio::sync::mpsc::channel::<PathBuf>(100);

    std::thread::spawn(move || {
        let mut debouncer = match new_debouncer(
            Duration::from_millis(DEBOUNCE_MS),
            move |res: Result<Vec<DebouncedEvent>, notify::Error>| match res {
                Ok(events) => {
                    for event in events {
                        if let DebouncedEventKind::Any = event.kind {
                            if let Err(e) = tx.blocking_send(event.path.clone()) {
                                error!("Failed to forward file event: {}", e);
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Session file watcher error: {:?}", e);
                }
            },
        ) {
            Ok(d) => d,
            Err(e) => {
                error!("Failed to create session file watcher: {}", e);
                return;
            }
        };

        if let Err(e) = debouncer
            .watcher()
            .watch(&watch_path, RecursiveMode::NonRecursive)
        {
            error!("Failed to watch {}: {}", watch_path.display(), e);
            return;
        }

        // Keep thread alive
        loop {
            std::thread::sleep(Duration::from_secs(60));
        }
    });

    while let Some(path) = rx.recv().await {
        if path.extension().map_or(true, |e| e != "jsonl") {
            continue;
        }
        if path.exists() {
            match store.reload_file(&path) {
                Ok(Some(id)) => debug!("Reloaded session {}", id),
                Ok(None) => {}
                Err(e) => warn!("Error reloading {}: {}", path.display(), e),
            }
        } else {
            debug!("Session file removed: {}", path.display());
            store.remove_file(&path);
        }
    }
    warn!("Session watcher event loop exited");
}
