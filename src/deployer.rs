//! Directory-watching workflow deployer (§11).
//!
//! Polls a directory on an interval with `walkdir` and deploys any
//! `*.workflow.yaml`/`*.workflow.yml` file whose modification time has
//! advanced since the last poll into the [`crate::store::Store`], the way
//! a developer points the emulator at a source tree instead of calling the
//! deploy API by hand for every iteration. A `notify`-based watcher would
//! react to changes immediately instead of on a poll interval; that's a
//! reasonable follow-up but isn't wired up here (see DESIGN.md).

use crate::store::Store;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

fn is_workflow_file(path: &Path) -> bool {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    file_name.ends_with(".workflow.yaml") || file_name.ends_with(".workflow.yml")
}

/// Derive a deployable workflow name from a source file's path relative to
/// the watched root: `billing/refund.workflow.yaml` under `root` becomes
/// `projects/default/locations/default/workflows/billing-refund`, matching
/// the resource-name shape the JSON/HTTP transport uses (§6.2).
fn workflow_name_for(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let stem = rel
        .to_string_lossy()
        .trim_end_matches(".workflow.yaml")
        .trim_end_matches(".workflow.yml")
        .replace(['/', '\\'], "-");
    format!("projects/default/locations/default/workflows/{stem}")
}

/// Poll `root` every `interval` and deploy any changed workflow file into
/// `store`. Runs until its caller drops/aborts the task; intended to be
/// spawned alongside the JSON/HTTP transport (`main.rs`'s `serve` command).
pub async fn watch(root: PathBuf, store: Arc<Store>, interval: Duration) {
    let mut last_seen: HashMap<PathBuf, SystemTime> = HashMap::new();
    tracing::info!(root = %root.display(), "deployer watching directory");
    loop {
        if let Err(e) = poll_once(&root, &store, &mut last_seen).await {
            tracing::warn!(error = %e, "deployer poll failed");
        }
        tokio::time::sleep(interval).await;
    }
}

async fn poll_once(
    root: &Path,
    store: &Arc<Store>,
    last_seen: &mut HashMap<PathBuf, SystemTime>,
) -> std::io::Result<()> {
    let root = root.to_path_buf();
    let store = store.clone();
    let mut last_seen_snapshot = std::mem::take(last_seen);
    let (updated, deployed) = tokio::task::spawn_blocking(move || {
        let mut deployed = Vec::new();
        for entry in WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_workflow_file(e.path()))
        {
            let path = entry.path().to_path_buf();
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let changed = last_seen_snapshot
                .get(&path)
                .map(|prev| modified > *prev)
                .unwrap_or(true);
            if changed {
                if let Ok(source) = std::fs::read_to_string(&path) {
                    let name = workflow_name_for(&root, &path);
                    let record = store.deploy_workflow(&name, source);
                    deployed.push((name, record.revision_id));
                }
                last_seen_snapshot.insert(path, modified);
            }
        }
        (last_seen_snapshot, deployed)
    })
    .await
    .unwrap_or_default();

    for (name, revision_id) in &deployed {
        tracing::info!(workflow = %name, revision = %revision_id, "deployer redeployed workflow");
    }
    *last_seen = updated;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_name_derives_from_relative_path() {
        let root = PathBuf::from("/workflows");
        let path = PathBuf::from("/workflows/billing/refund.workflow.yaml");
        assert_eq!(
            workflow_name_for(&root, &path),
            "projects/default/locations/default/workflows/billing-refund"
        );
    }

    #[test]
    fn recognizes_both_yaml_and_yml_extensions() {
        assert!(is_workflow_file(Path::new("a.workflow.yaml")));
        assert!(is_workflow_file(Path::new("a.workflow.yml")));
        assert!(!is_workflow_file(Path::new("a.yaml")));
        assert!(!is_workflow_file(Path::new("readme.md")));
    }

    #[tokio::test]
    async fn watch_deploys_a_workflow_file_written_before_first_poll() {
        let dir = tempfile_dir();
        std::fs::write(
            dir.join("hello.workflow.yaml"),
            "main:\n  steps:\n    - done:\n        return: 1\n",
        )
        .unwrap();
        let store = Store::new();
        let mut last_seen = HashMap::new();
        poll_once(&dir, &store, &mut last_seen).await.unwrap();
        let name = workflow_name_for(&dir, &dir.join("hello.workflow.yaml"));
        assert!(store.get_workflow(&name).is_some());
        std::fs::remove_dir_all(&dir).ok();
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "nika-deployer-test-{:?}",
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
