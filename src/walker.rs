//! Discovery of image files, one batch per directory.
//!
//! The hash operation works directory by directory so that file handles
//! opened while probing are released before the next directory starts.
//! [`image_batches`] walks a root (recursively or not) with `walkdir` and
//! returns the image files of every directory, sorted by name.
//!
//! ```no_run
//! use imagedups::walker::image_batches;
//! use std::path::Path;
//!
//! for batch in image_batches(Path::new("/photos"), true).unwrap() {
//!     println!("{}: {} images", batch.dir.display(), batch.files.len());
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// File extensions treated as images, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpeg", "jpg", "tiff", "tif"];

/// Errors that prevent walking a root.
#[derive(Error, Debug)]
pub enum WalkError {
    /// The root cannot be resolved.
    #[error("Cannot access {path}: {source}")]
    Root {
        /// Root as given
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The root is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Image files of a single directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryBatch {
    /// Absolute directory path
    pub dir: PathBuf,
    /// Image files directly inside `dir`, sorted by name
    pub files: Vec<PathBuf>,
}

/// Whether `path` has one of the [`IMAGE_EXTENSIONS`].
#[must_use]
pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

fn is_file(entry: &DirEntry) -> bool {
    entry.file_type().is_file() || (entry.path_is_symlink() && entry.path().is_file())
}

/// Image files under `root`, grouped by directory.
///
/// The root is canonicalized first, so every returned path is absolute.
/// Without `recursive` only the root itself is listed. Directories without
/// images are left out. Unreadable subdirectories are logged and skipped.
///
/// # Errors
///
/// [`WalkError`] if the root does not exist or is not a directory.
pub fn image_batches(root: &Path, recursive: bool) -> Result<Vec<DirectoryBatch>, WalkError> {
    let root = fs::canonicalize(root).map_err(|source| WalkError::Root {
        path: root.to_path_buf(),
        source,
    })?;
    if !root.is_dir() {
        return Err(WalkError::NotADirectory(root));
    }

    let walker = WalkDir::new(&root)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name();

    let mut batches: Vec<DirectoryBatch> = Vec::new();
    let mut positions: HashMap<PathBuf, usize> = HashMap::new();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !is_file(&entry) || !is_image(entry.path()) {
            continue;
        }
        let Some(dir) = entry.path().parent() else {
            continue;
        };
        let pos = *positions.entry(dir.to_path_buf()).or_insert_with(|| {
            batches.push(DirectoryBatch {
                dir: dir.to_path_buf(),
                files: Vec::new(),
            });
            batches.len() - 1
        });
        batches[pos].files.push(entry.into_path());
    }

    // Parents come before their subdirectories.
    batches.sort_by(|a, b| a.dir.cmp(&b.dir));
    log::debug!(
        "Found {} images in {} directories under {}",
        batches.iter().map(|b| b.files.len()).sum::<usize>(),
        batches.len(),
        root.display()
    );
    Ok(batches)
}
