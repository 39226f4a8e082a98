//! Secure Storage
//!
//! Moves validated temporary uploads into the storage root: sanitized
//! filename, collision-free final path, owner-read-only permissions. All
//! submissions share one root; uniqueness comes from atomically claiming a
//! candidate name and probing suffixed alternatives on collision, not from
//! locking.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

use fp_common::SubmittedFile;

/// How many suffixed candidates to probe before giving up.
const MAX_COLLISION_PROBES: u32 = 10_000;

/// Errors from moving uploads into storage. Fatal to the submission.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Nothing usable left of the filename after sanitization.
    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    /// No free candidate name within the probe budget.
    #[error("Could not find a free storage name for {0:?}")]
    Exhausted(String),

    /// Creating the root, claiming a name, or moving the payload failed.
    #[error("Storage I/O failed for {name:?}")]
    Io {
        /// Original filename involved.
        name: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
}

/// A file that passed validation and now lives in the storage root.
#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Client-supplied name, pre-sanitization. For display only.
    pub original_name: String,
    /// Final path inside the storage root.
    pub stored_path: PathBuf,
    /// Payload size in bytes.
    pub size_bytes: u64,
    /// The field the file was submitted under.
    pub field_name: String,
    /// When the file was stored.
    pub stored_at: DateTime<Utc>,
}

/// Moves validated uploads into a collision-free, permission-restricted
/// storage root.
#[derive(Debug, Clone)]
pub struct SecureStorageManager {
    root: PathBuf,
}

impl SecureStorageManager {
    /// Create a manager over `root`. The directory is created on first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store every file of a validated submission.
    ///
    /// All-or-nothing: if any move fails, files already stored for this
    /// submission are best-effort removed and the error is returned. Callers
    /// must only pass files whose field verdicts were valid.
    pub fn store_submission(
        &self,
        files: &[SubmittedFile],
    ) -> Result<Vec<StoredFile>, StorageError> {
        fs::create_dir_all(&self.root).map_err(|source| StorageError::Io {
            name: self.root.display().to_string(),
            source,
        })?;

        let mut stored = Vec::with_capacity(files.len());
        for file in files {
            match self.store_one(file) {
                Ok(record) => stored.push(record),
                Err(e) => {
                    self.discard(&stored);
                    return Err(e);
                }
            }
        }
        Ok(stored)
    }

    /// Move one upload into the root.
    fn store_one(&self, file: &SubmittedFile) -> Result<StoredFile, StorageError> {
        let safe_name = sanitize_filename(&file.original_name);
        if safe_name.is_empty() {
            return Err(StorageError::InvalidFilename(file.original_name.clone()));
        }

        let (stored_path, dest) = self.claim_destination(&safe_name, &file.original_name)?;

        // Copy the temp payload into the claimed file, then drop the temp;
        // claim-then-copy stays atomic where a plain rename would race the
        // collision probe, and it works across devices.
        let moved = fs::File::open(&file.temp_path)
            .and_then(|mut src| {
                let mut dest = dest;
                io::copy(&mut src, &mut dest)
            })
            .and_then(|_| fs::remove_file(&file.temp_path))
            .and_then(|()| restrict_permissions(&stored_path));

        if let Err(source) = moved {
            // Don't leave a half-written claim behind
            if let Err(e) = fs::remove_file(&stored_path) {
                tracing::warn!(path = %stored_path.display(), error = %e, "Failed to remove partial stored file");
            }
            return Err(StorageError::Io {
                name: file.original_name.clone(),
                source,
            });
        }

        tracing::debug!(
            field_name = %file.field_name,
            original_name = %file.original_name,
            stored_path = %stored_path.display(),
            size = file.size_bytes,
            "Upload moved into storage"
        );

        Ok(StoredFile {
            original_name: file.original_name.clone(),
            stored_path,
            size_bytes: file.size_bytes,
            field_name: file.field_name.clone(),
            stored_at: Utc::now(),
        })
    }

    /// Probe for a free name, atomically claiming it with `create_new`.
    fn claim_destination(
        &self,
        safe_name: &str,
        original_name: &str,
    ) -> Result<(PathBuf, fs::File), StorageError> {
        let (stem, extension) = match safe_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (safe_name, None),
        };

        for attempt in 0..MAX_COLLISION_PROBES {
            let candidate = match (attempt, extension) {
                (0, _) => safe_name.to_string(),
                (n, Some(ext)) => format!("{stem}-{n}.{ext}"),
                (n, None) => format!("{stem}-{n}"),
            };
            let path = self.root.join(candidate);

            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(source) => {
                    return Err(StorageError::Io {
                        name: original_name.to_string(),
                        source,
                    })
                }
            }
        }

        Err(StorageError::Exhausted(original_name.to_string()))
    }

    /// Best-effort removal of files stored earlier in a failed submission.
    pub fn discard(&self, stored: &[StoredFile]) {
        for record in stored {
            if let Err(e) = fs::remove_file(&record.stored_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::error!(
                        path = %record.stored_path.display(),
                        error = %e,
                        "Failed to discard stored file after submission failure"
                    );
                }
            }
        }
    }
}

/// Make a stored file readable by its owner only.
fn restrict_permissions(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o400))
    }
    #[cfg(not(unix))]
    {
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_readonly(true);
        fs::set_permissions(path, permissions)
    }
}

/// Sanitize a client-supplied filename for storage.
///
/// Directory components are stripped first, then anything outside
/// alphanumerics, dots, dashes, and underscores; leading dots go too so a
/// stored file can never be a dotfile.
fn sanitize_filename(filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    name.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .skip_while(|c| *c == '.')
        .take(255)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn spool(dir: &Path, name: &str, contents: &[u8]) -> SubmittedFile {
        let temp_path = dir.join(format!("spool-{name}"));
        let mut f = fs::File::create(&temp_path).unwrap();
        f.write_all(contents).unwrap();
        SubmittedFile {
            field_name: "photos".to_string(),
            original_name: name.to_string(),
            claimed_mime: "image/jpeg".to_string(),
            size_bytes: contents.len() as u64,
            temp_path,
            upload_error: None,
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_filename("../../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("my photo (1).jpg"), "myphoto1.jpg");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename("..."), "");
        assert_eq!(sanitize_filename(""), "");
    }

    #[test]
    fn test_store_moves_temp_into_root() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("stored");
        let manager = SecureStorageManager::new(&root);

        let file = spool(temp.path(), "photo.jpg", b"jpeg bytes");
        let temp_path = file.temp_path.clone();
        let stored = manager.store_submission(&[file]).unwrap();

        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].stored_path, root.join("photo.jpg"));
        assert_eq!(fs::read(&stored[0].stored_path).unwrap(), b"jpeg bytes");
        assert!(!temp_path.exists(), "temp upload should be gone after move");
    }

    #[cfg(unix)]
    #[test]
    fn test_stored_file_is_owner_read_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let manager = SecureStorageManager::new(temp.path().join("stored"));

        let stored = manager
            .store_submission(&[spool(temp.path(), "photo.jpg", b"x")])
            .unwrap();

        let mode = fs::metadata(&stored[0].stored_path)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o400);
    }

    #[test]
    fn test_collision_probe_appends_suffix() {
        let temp = tempfile::tempdir().unwrap();
        let manager = SecureStorageManager::new(temp.path().join("stored"));

        let first = manager
            .store_submission(&[spool(temp.path(), "photo.jpg", b"one")])
            .unwrap();
        let second = manager
            .store_submission(&[spool(temp.path(), "photo.jpg", b"two")])
            .unwrap();
        let third = manager
            .store_submission(&[spool(temp.path(), "photo.jpg", b"three")])
            .unwrap();

        assert!(first[0].stored_path.ends_with("photo.jpg"));
        assert!(second[0].stored_path.ends_with("photo-1.jpg"));
        assert!(third[0].stored_path.ends_with("photo-2.jpg"));
        assert_eq!(fs::read(&second[0].stored_path).unwrap(), b"two");
    }

    #[test]
    fn test_unsanitizable_name_is_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let manager = SecureStorageManager::new(temp.path().join("stored"));

        let err = manager.store_submission(&[spool(temp.path(), "...", b"x")]);
        assert!(matches!(err, Err(StorageError::InvalidFilename(_))));
    }

    #[test]
    fn test_failed_move_rolls_back_earlier_files() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("stored");
        let manager = SecureStorageManager::new(&root);

        let good = spool(temp.path(), "first.jpg", b"ok");
        let mut bad = spool(temp.path(), "second.jpg", b"gone");
        fs::remove_file(&bad.temp_path).unwrap();
        bad.temp_path = temp.path().join("does-not-exist");

        let err = manager.store_submission(&[good, bad]);
        assert!(matches!(err, Err(StorageError::Io { .. })));
        assert!(
            !root.join("first.jpg").exists(),
            "earlier stored file should be rolled back"
        );
    }
}
