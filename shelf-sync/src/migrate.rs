//! Moving a module to a new name: folder first, then every catalog entry.

use std::path::Path;

use shelf_core::ModuleName;

use crate::collab::Confirmation;
use crate::context::SyncContext;
use crate::error::io_err;
use crate::SyncError;

/// Outcome of [`rename_module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    Moved,
    /// The destination folder existed and the user chose not to overwrite it.
    Aborted,
}

/// Rename `from` to `to` on disk and in the catalog.
///
/// The folder moves first. If the destination folder already exists the user
/// is asked whether to overwrite it. The catalog change is a single
/// checkpointed mutation; if that save fails the folder is moved back.
pub async fn rename_module(
    ctx: &SyncContext,
    from: &ModuleName,
    to: &ModuleName,
) -> Result<Migration, SyncError> {
    let _guard = ctx.locks.try_acquire(from).ok_or_else(|| {
        SyncError::Consistency(format!("cannot rename \"{from}\" while it is being updated"))
    })?;

    let src = ctx.module_dir(from);
    let dst = ctx.module_dir(to);
    let moved_folder = exists(&src).await?;

    if moved_folder {
        if exists(&dst).await? {
            let overwrite = ctx
                .prompter
                .confirm(Confirmation::new(
                    format!("\"{from}\" is now called \"{to}\""),
                    format!(
                        "A folder named \"{to}\" already exists at {}. Replace it with \"{from}\"?",
                        dst.display()
                    ),
                    "Overwrite",
                    "Abort",
                ))
                .await;
            if !overwrite {
                tracing::info!(from = %from, to = %to, "rename aborted by user");
                return Ok(Migration::Aborted);
            }
            tokio::fs::remove_dir_all(&dst)
                .await
                .map_err(|e| io_err(&dst, e))?;
        }
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }
        tokio::fs::rename(&src, &dst)
            .await
            .map_err(|e| io_err(&src, e))?;
    }

    if let Err(err) = ctx.state.mutate(|c| c.rename_module(from, to)).await {
        if moved_folder {
            if let Err(undo) = tokio::fs::rename(&dst, &src).await {
                tracing::error!(
                    from = %dst.display(),
                    to = %src.display(),
                    error = %undo,
                    "failed to move folder back after a failed rename",
                );
            }
        }
        return Err(err);
    }

    tracing::info!(from = %from, to = %to, folder = moved_folder, "module renamed");
    Ok(Migration::Moved)
}

pub(crate) async fn exists(path: &Path) -> Result<bool, SyncError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| io_err(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ScriptedPrompter;
    use crate::test_support::{manifest, Harness};
    use shelf_core::InstalledRecord;
    use std::fs;

    async fn seed_a(h: &Harness) {
        h.seed(|c| {
            c.manifests.insert("A".into(), manifest("A", "1.0.0"));
            c.installed.insert(
                "A".into(),
                InstalledRecord {
                    version: "1.0.0".to_string(),
                    content_hash: "h".to_string(),
                },
            );
        })
        .await;
        fs::create_dir_all(h.dir("A")).unwrap();
        fs::write(h.dir("A").join("a.md"), "alpha").unwrap();
    }

    #[tokio::test]
    async fn moves_folder_and_state() {
        let h = Harness::new();
        seed_a(&h).await;

        let out = rename_module(&h.ctx, &"A".into(), &"B".into()).await.unwrap();
        assert_eq!(out, Migration::Moved);
        assert!(!h.dir("A").exists());
        assert_eq!(fs::read_to_string(h.dir("B").join("a.md")).unwrap(), "alpha");
        let saved = h.store.snapshot();
        assert!(saved.installed.contains_key("B"));
        assert!(!saved.installed.contains_key("A"));
    }

    #[tokio::test]
    async fn existing_destination_asks_and_can_abort() {
        let h = Harness::with_prompter(ScriptedPrompter::answering(false));
        seed_a(&h).await;
        fs::create_dir_all(h.dir("B")).unwrap();
        fs::write(h.dir("B").join("mine.md"), "keep").unwrap();

        let out = rename_module(&h.ctx, &"A".into(), &"B".into()).await.unwrap();
        assert_eq!(out, Migration::Aborted);
        assert_eq!(h.prompter.asked().len(), 1);
        assert!(h.dir("A").join("a.md").exists());
        assert!(h.dir("B").join("mine.md").exists());
        assert!(h.store.snapshot().installed.contains_key("A"));
    }

    #[tokio::test]
    async fn existing_destination_can_be_overwritten() {
        let h = Harness::new();
        seed_a(&h).await;
        fs::create_dir_all(h.dir("B")).unwrap();
        fs::write(h.dir("B").join("mine.md"), "old").unwrap();

        rename_module(&h.ctx, &"A".into(), &"B".into()).await.unwrap();
        assert!(!h.dir("B").join("mine.md").exists());
        assert!(h.dir("B").join("a.md").exists());
    }

    #[tokio::test]
    async fn busy_module_is_not_renamed() {
        let h = Harness::new();
        seed_a(&h).await;
        let _held = h.ctx.locks.try_acquire(&"A".into()).unwrap();
        let err = rename_module(&h.ctx, &"A".into(), &"B".into()).await.unwrap_err();
        assert!(matches!(err, SyncError::Consistency(_)));
        assert!(h.dir("A").exists());
    }
}
