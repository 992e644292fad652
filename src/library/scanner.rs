use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::library::Library;

/// Extensions the default scanner considers transcodable.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "webm", "m4v", "wmv", "flv", "ts",
];

/// Source of transcoding candidates for a library.
///
/// Implementations decide which files need encoding; the scheduler only
/// handles deduplication and queueing.
#[async_trait]
pub trait LibraryScanner: Send + Sync {
    async fn scan(&self, library: &Library) -> io::Result<Vec<PathBuf>>;
}

/// Recursive directory walker reporting every video file under the library
/// folder. Intermediate files written by the controller (`*.import.*`) are
/// skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsScanner;

#[async_trait]
impl LibraryScanner for FsScanner {
    async fn scan(&self, library: &Library) -> io::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        let mut pending = vec![library.folder.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if is_candidate(&path) {
                    found.push(path);
                }
            }
        }

        Ok(found)
    }
}

fn is_candidate(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    if !VIDEO_EXTENSIONS.iter().any(|v| ext.eq_ignore_ascii_case(v)) {
        return false;
    }
    !path.to_string_lossy().contains(".import.")
}
