//! The default file-copier strategy.

use std::path::Path;

use async_trait::async_trait;

use super::FileCopier;
use crate::reporter::Reporter;

/// Replaces `dst` with a recursive copy of `src`, maintaining a declarative
/// workflow: whatever was at `dst` before is gone afterwards, regardless of
/// whether this update touches it.
pub struct SubpathCopier;

#[async_trait]
impl FileCopier for SubpathCopier {
    async fn copy_files(&self, src: &Path, dst: &Path, reporter: &Reporter) -> anyhow::Result<()> {
        reporter
            .basic_progress(format!("copying files to {}", dst.display()))
            .await;

        if dst.exists() {
            tokio::fs::remove_dir_all(dst).await?;
        }
        copy_dir_recursive(src, dst).await?;

        Ok(())
    }
}

#[async_recursion::async_recursion]
async fn copy_dir_recursive(src: &Path, dst: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dst).await?;
    let mut entries = tokio::fs::read_dir(src).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        let dst_path = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &dst_path).await?;
        } else {
            tokio::fs::copy(entry.path(), &dst_path).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copy_replaces_destination_contents() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();

        tokio::fs::write(src.path().join("a.yaml"), b"a").await.unwrap();
        tokio::fs::create_dir_all(src.path().join("nested")).await.unwrap();
        tokio::fs::write(src.path().join("nested/b.yaml"), b"b").await.unwrap();

        tokio::fs::write(dst.path().join("stale.yaml"), b"stale").await.unwrap();

        let (reporter, mut rx) = Reporter::channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let copier = SubpathCopier;
        copier.copy_files(src.path(), dst.path(), &reporter).await.unwrap();

        assert!(!dst.path().join("stale.yaml").exists());
        assert_eq!(tokio::fs::read(dst.path().join("a.yaml")).await.unwrap(), b"a");
        assert_eq!(
            tokio::fs::read(dst.path().join("nested/b.yaml")).await.unwrap(),
            b"b"
        );
    }
}
