//! Checkpoint directory format and atomic publish.
//!
//! A checkpoint is a directory holding one file per component plus a
//! `MANIFEST.json` naming every file with its size and CRC32. Writers build
//! the directory under a staging name next to the target and publish it:
//!
//! 1. rename an existing target to `<target>.bak`
//! 2. rename staging to target
//! 3. remove `<target>.bak`
//! 4. fsync the parent directory
//!
//! A crash between 1 and 2 leaves only the `.bak` directory; readers fall
//! back to it. A staging directory is removed if the writer is dropped
//! before publishing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::telemetry::now_micros;

/// Manifest file name inside a checkpoint directory.
pub const MANIFEST_FILE: &str = "MANIFEST.json";

/// Format version written by this crate.
pub const FORMAT_VERSION: u32 = 1;

const MAGIC: &str = "HAKES-CHECKPOINT";

/// One persisted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// File name relative to the checkpoint directory.
    pub file: String,
    /// Exact size in bytes.
    pub bytes: u64,
    /// CRC32 (IEEE) of the contents.
    pub crc32: u32,
}

/// Which optional components a checkpoint carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestFlags {
    /// Coarse assignment uses an owned SQ8 centroid table.
    pub use_ivf_sq: bool,
    /// Approximate index present.
    pub has_base: bool,
    /// Refine index present.
    pub has_refine: bool,
    /// Secondary query quantizers present.
    pub has_query_path: bool,
    /// Refine index stores SQ8 codes instead of floats.
    pub use_refine_sq: bool,
}

/// Checkpoint manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Always `HAKES-CHECKPOINT`.
    pub magic: String,
    /// Format version.
    pub version: u32,
    /// Collection kind that wrote the checkpoint (`"hakes"`, `"flat"`).
    pub kind: String,
    /// Creation time, microseconds since the epoch.
    pub created_micros: u64,
    /// Optional components.
    pub flags: ManifestFlags,
    /// Persisted files.
    pub artifacts: Vec<ArtifactEntry>,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map_or_else(|| OsString::from("checkpoint"), ToOwned::to_owned);
    name.push(suffix);
    path.with_file_name(name)
}

/// `<target>.bak`.
#[must_use]
pub fn backup_path(target: &Path) -> PathBuf {
    with_suffix(target, ".bak")
}

fn parent_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Builds a checkpoint in a staging directory and publishes it.
#[derive(Debug)]
pub struct CheckpointWriter {
    target: PathBuf,
    staging: PathBuf,
    artifacts: Vec<ArtifactEntry>,
    published: bool,
}

impl CheckpointWriter {
    /// Creates a fresh staging directory next to `target`.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the staging directory cannot be created.
    pub fn create(target: &Path) -> Result<Self> {
        let parent = parent_of(target);
        fs::create_dir_all(&parent)?;
        let staging = with_suffix(target, &format!(".staging-{}", uuid::Uuid::new_v4().simple()));
        fs::create_dir(&staging)?;
        tracing::debug!(staging = %staging.display(), "checkpoint staging created");
        Ok(Self {
            target: target.to_path_buf(),
            staging,
            artifacts: Vec::new(),
            published: false,
        })
    }

    /// Writes raw bytes as `file` and records it in the manifest.
    ///
    /// # Errors
    ///
    /// Returns `Io` on write or fsync failure.
    pub fn write_bytes(&mut self, file: &str, bytes: &[u8]) -> Result<()> {
        let mut f = File::create(self.staging.join(file))?;
        f.write_all(bytes)?;
        f.sync_all()?;
        self.artifacts.push(ArtifactEntry {
            file: file.to_string(),
            bytes: bytes.len() as u64,
            crc32: crc32fast::hash(bytes),
        });
        Ok(())
    }

    /// Serializes `value` with bincode as `file`.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` or `Io`.
    pub fn write_bincode<T: Serialize + ?Sized>(&mut self, file: &str, value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.write_bytes(file, &bytes)
    }

    /// Writes the manifest and atomically publishes the directory.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Serialization`. On error the staging directory is
    /// removed and any previously published checkpoint is left in place.
    pub fn publish(mut self, kind: &str, flags: ManifestFlags) -> Result<()> {
        let manifest = Manifest {
            magic: MAGIC.to_string(),
            version: FORMAT_VERSION,
            kind: kind.to_string(),
            created_micros: now_micros(),
            flags,
            artifacts: std::mem::take(&mut self.artifacts),
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let mut f = File::create(self.staging.join(MANIFEST_FILE))?;
        f.write_all(&json)?;
        f.sync_all()?;
        sync_dir(&self.staging)?;

        // The backup is only dropped while a complete target exists.
        let backup = backup_path(&self.target);
        let had_previous = self.target.exists();
        if had_previous {
            if backup.exists() {
                fs::remove_dir_all(&backup)?;
            }
            fs::rename(&self.target, &backup)?;
        }
        if let Err(e) = fs::rename(&self.staging, &self.target) {
            if had_previous {
                if let Err(restore) = fs::rename(&backup, &self.target) {
                    tracing::warn!(error = %restore, "failed to restore previous checkpoint");
                }
            }
            return Err(e.into());
        }
        self.published = true;
        if backup.exists() {
            fs::remove_dir_all(&backup)?;
        }
        sync_dir(&parent_of(&self.target))?;

        tracing::info!(
            path = %self.target.display(),
            artifacts = manifest.artifacts.len(),
            kind,
            "checkpoint published"
        );
        Ok(())
    }
}

impl Drop for CheckpointWriter {
    fn drop(&mut self) {
        if !self.published && self.staging.exists() {
            if let Err(e) = fs::remove_dir_all(&self.staging) {
                tracing::warn!(
                    staging = %self.staging.display(),
                    error = %e,
                    "failed to remove checkpoint staging directory"
                );
            }
        }
    }
}

/// Validated view of a published checkpoint.
#[derive(Debug)]
pub struct CheckpointReader {
    dir: PathBuf,
    manifest: Manifest,
}

impl CheckpointReader {
    /// Opens the checkpoint at `path`, falling back to `<path>.bak` when
    /// `path` is missing, and checks magic, version and kind.
    ///
    /// # Errors
    ///
    /// Returns `Checkpoint` if nothing usable exists at either location or
    /// the manifest is from another format, and `CorruptedArtifact` if the
    /// manifest does not parse.
    pub fn open(path: &Path, kind: &str) -> Result<Self> {
        let dir = if path.exists() {
            path.to_path_buf()
        } else {
            let backup = backup_path(path);
            if !backup.exists() {
                return Err(Error::Checkpoint(format!(
                    "no checkpoint at {}",
                    path.display()
                )));
            }
            tracing::warn!(
                path = %path.display(),
                "checkpoint missing, recovering from interrupted publish"
            );
            backup
        };

        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(Error::Checkpoint(format!(
                "{} has no {MANIFEST_FILE}",
                dir.display()
            )));
        }
        let manifest: Manifest = serde_json::from_slice(&fs::read(&manifest_path)?)
            .map_err(|e| Error::CorruptedArtifact(format!("{MANIFEST_FILE}: {e}")))?;

        if manifest.magic != MAGIC {
            return Err(Error::Checkpoint(format!(
                "unexpected manifest magic {:?}",
                manifest.magic
            )));
        }
        if manifest.version != FORMAT_VERSION {
            return Err(Error::Checkpoint(format!(
                "unsupported checkpoint version {} (supported: {FORMAT_VERSION})",
                manifest.version
            )));
        }
        if manifest.kind != kind {
            return Err(Error::Checkpoint(format!(
                "checkpoint was written by a {:?} collection, expected {kind:?}",
                manifest.kind
            )));
        }

        Ok(Self { dir, manifest })
    }

    /// The manifest.
    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Optional-component flags.
    #[must_use]
    pub fn flags(&self) -> ManifestFlags {
        self.manifest.flags
    }

    /// Returns true if `file` is listed in the manifest.
    #[must_use]
    pub fn has(&self, file: &str) -> bool {
        self.entry(file).is_some()
    }

    fn entry(&self, file: &str) -> Option<&ArtifactEntry> {
        self.manifest.artifacts.iter().find(|a| a.file == file)
    }

    /// Reads `file` and verifies its size and CRC.
    ///
    /// # Errors
    ///
    /// Returns `Checkpoint` if the file is not listed or not on disk, and
    /// `CorruptedArtifact` on size or checksum mismatch.
    pub fn read_bytes(&self, file: &str) -> Result<Vec<u8>> {
        let entry = self.entry(file).ok_or_else(|| {
            Error::Checkpoint(format!("manifest does not list required artifact {file}"))
        })?;
        let path = self.dir.join(file);
        if !path.is_file() {
            return Err(Error::Checkpoint(format!("artifact {file} is missing")));
        }
        let bytes = fs::read(&path)?;
        if bytes.len() as u64 != entry.bytes {
            return Err(Error::CorruptedArtifact(format!(
                "{file} is {} bytes, manifest says {}",
                bytes.len(),
                entry.bytes
            )));
        }
        let crc = crc32fast::hash(&bytes);
        if crc != entry.crc32 {
            return Err(Error::CorruptedArtifact(format!(
                "{file} checksum {crc:08x} does not match manifest {:08x}",
                entry.crc32
            )));
        }
        Ok(bytes)
    }

    /// Reads and decodes a bincode artifact.
    ///
    /// # Errors
    ///
    /// As [`read_bytes`](Self::read_bytes), plus `CorruptedArtifact` if
    /// decoding fails.
    pub fn read_bincode<T: DeserializeOwned>(&self, file: &str) -> Result<T> {
        let bytes = self.read_bytes(file)?;
        bincode::deserialize(&bytes).map_err(|e| Error::CorruptedArtifact(format!("{file}: {e}")))
    }

    /// Reads a UTF-8 text artifact.
    ///
    /// # Errors
    ///
    /// As [`read_bytes`](Self::read_bytes), plus `CorruptedArtifact` for
    /// invalid UTF-8.
    pub fn read_text(&self, file: &str) -> Result<String> {
        String::from_utf8(self.read_bytes(file)?)
            .map_err(|e| Error::CorruptedArtifact(format!("{file}: {e}")))
    }
}
