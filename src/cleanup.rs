use std::path::Path;
use tracing::{info, warn};

/// Remove one evaluation run's workspace directory.
pub async fn remove_run_dir(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        warn!("Failed to cleanup {}: {}", path.display(), e);
    }
}

/// Scan the workspace base for run directories older than max_age_secs and
/// remove them. Catches workspaces orphaned by a crashed process.
pub async fn reap_stale_run_dirs(base: &Path, max_age_secs: u64) {
    let mut entries = match tokio::fs::read_dir(base).await {
        Ok(e) => e,
        Err(_) => return,
    };

    let now = std::time::SystemTime::now();
    let mut reaped = 0u32;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(_) => continue,
        };
        let modified = match metadata.modified() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age.as_secs() > max_age_secs {
            remove_run_dir(&path).await;
            reaped += 1;
        }
    }

    if reaped > 0 {
        info!("Reaped {} stale run directories", reaped);
    }
}
