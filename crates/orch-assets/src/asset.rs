//! Single assets backed by inline bytes or a local file, with lazy MD5 checksums.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use orch_core::errors::{invalid, io_error, ErrorInfo, OrchError};
use orch_core::hash::{md5_file, md5_hex};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
enum Source {
    Content(Arc<[u8]>),
    Path(PathBuf),
}

/// A single input file destined for a job working directory.
///
/// An asset is backed either by in-memory content or by a file on disk. The
/// MD5 checksum and, for path-backed assets, the content are computed on first
/// access and cached.
#[derive(Clone)]
pub struct Asset {
    filename: String,
    relative_path: String,
    source: Source,
    checksum: OnceLock<String>,
    bytes: OnceLock<Arc<[u8]>>,
}

/// Serializable summary of an asset, stored in metadata files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Leaf name.
    pub filename: String,
    /// Directory inside the job working directory, `""` for the root.
    #[serde(default)]
    pub relative_path: String,
    /// MD5 hex digest of the content.
    pub checksum: String,
    /// Content length in bytes.
    pub size: u64,
}

/// Normalizes a POSIX-style directory path: backslashes become `/`, empty and
/// `.` segments are dropped and leading separators removed. `..` is rejected.
pub fn normalize_relative_path(raw: &str) -> Result<String, OrchError> {
    let mut segments = Vec::new();
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(OrchError::Invalid(
                    ErrorInfo::new("asset.relative_path", "relative path may not contain '..'")
                        .with_context("relative_path", raw),
                ))
            }
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

fn validate_filename(filename: &str) -> Result<(), OrchError> {
    if filename.is_empty() || filename == "." || filename == ".." {
        return Err(invalid("asset.filename", "asset filename must be a non-empty leaf name"));
    }
    if filename.contains(['/', '\\']) {
        return Err(OrchError::Invalid(
            ErrorInfo::new("asset.filename", "asset filename may not contain path separators")
                .with_context("filename", filename),
        ));
    }
    Ok(())
}

impl Asset {
    /// Creates an asset from in-memory content.
    pub fn from_content(
        filename: impl Into<String>,
        relative_path: &str,
        content: impl Into<Vec<u8>>,
    ) -> Result<Self, OrchError> {
        let filename = filename.into();
        validate_filename(&filename)?;
        let content: Arc<[u8]> = Arc::from(content.into());
        let bytes = OnceLock::new();
        let _ = bytes.set(Arc::clone(&content));
        Ok(Self {
            filename,
            relative_path: normalize_relative_path(relative_path)?,
            source: Source::Content(content),
            checksum: OnceLock::new(),
            bytes,
        })
    }

    /// Creates an asset pointing at a file on disk. The filename defaults to
    /// the leaf of `path`.
    pub fn from_path(path: impl AsRef<Path>, relative_path: &str) -> Result<Self, OrchError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(OrchError::Invalid(
                ErrorInfo::new("asset.missing_file", "asset path does not name a file")
                    .with_context("path", path.display().to_string()),
            ));
        }
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| invalid("asset.filename", "asset path has no file name"))?;
        Self::from_path_named(path, filename, relative_path)
    }

    /// Creates a path-backed asset stored under a different filename.
    pub fn from_path_named(
        path: impl AsRef<Path>,
        filename: impl Into<String>,
        relative_path: &str,
    ) -> Result<Self, OrchError> {
        let filename = filename.into();
        validate_filename(&filename)?;
        Ok(Self {
            filename,
            relative_path: normalize_relative_path(relative_path)?,
            source: Source::Path(path.as_ref().to_path_buf()),
            checksum: OnceLock::new(),
            bytes: OnceLock::new(),
        })
    }

    /// Leaf name.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Normalized directory, `""` for the root.
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Location inside a job working directory: `relative_path/filename`.
    pub fn job_path(&self) -> String {
        if self.relative_path.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.relative_path, self.filename)
        }
    }

    /// Source file for path-backed assets.
    pub fn absolute_path(&self) -> Option<&Path> {
        match &self.source {
            Source::Path(path) => Some(path),
            Source::Content(_) => None,
        }
    }

    /// True when the content was supplied in memory.
    pub fn is_in_memory(&self) -> bool {
        matches!(self.source, Source::Content(_))
    }

    /// MD5 hex digest of the content. Path-backed files are streamed.
    pub fn checksum(&self) -> Result<&str, OrchError> {
        if let Some(sum) = self.checksum.get() {
            return Ok(sum);
        }
        let sum = match &self.source {
            Source::Content(content) => md5_hex(content),
            Source::Path(path) => md5_file(path)?,
        };
        let _ = self.checksum.set(sum);
        Ok(self.checksum.get().map(String::as_str).unwrap_or_default())
    }

    /// Content of the asset; path-backed content is read once and cached.
    pub fn bytes(&self) -> Result<Arc<[u8]>, OrchError> {
        if let Some(bytes) = self.bytes.get() {
            return Ok(Arc::clone(bytes));
        }
        let loaded: Arc<[u8]> = match &self.source {
            Source::Content(content) => Arc::clone(content),
            Source::Path(path) => {
                Arc::from(fs::read(path).map_err(|err| io_error("asset.read", path.display(), err))?)
            }
        };
        let _ = self.bytes.set(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Content length without loading path-backed files.
    pub fn size(&self) -> Result<u64, OrchError> {
        match &self.source {
            Source::Content(content) => Ok(content.len() as u64),
            Source::Path(path) => fs::metadata(path)
                .map(|meta| meta.len())
                .map_err(|err| io_error("asset.stat", path.display(), err)),
        }
    }

    /// True when `other` occupies the same `(filename, relative_path)` slot.
    pub fn same_location(&self, other: &Asset) -> bool {
        self.filename == other.filename && self.relative_path == other.relative_path
    }

    /// Companion `<filename>.md5` asset holding the checksum.
    pub fn md5_sidecar(&self) -> Result<Asset, OrchError> {
        let checksum = self.checksum()?.to_string();
        Asset::from_content(
            format!("{}.md5", self.filename),
            &self.relative_path,
            checksum.into_bytes(),
        )
    }

    /// Metadata summary of the asset.
    pub fn record(&self) -> Result<AssetRecord, OrchError> {
        Ok(AssetRecord {
            filename: self.filename.clone(),
            relative_path: self.relative_path.clone(),
            checksum: self.checksum()?.to_string(),
            size: self.size()?,
        })
    }
}

impl PartialEq for Asset {
    fn eq(&self, other: &Self) -> bool {
        if !self.same_location(other) {
            return false;
        }
        match (self.checksum(), other.checksum()) {
            (Ok(left), Ok(right)) => left == right,
            _ => false,
        }
    }
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Asset");
        out.field("filename", &self.filename)
            .field("relative_path", &self.relative_path);
        match &self.source {
            Source::Path(path) => out.field("absolute_path", path),
            Source::Content(content) => out.field("content_len", &content.len()),
        };
        out.field("checksum", &self.checksum.get()).finish()
    }
}
