//! Tracked input/output files with required-file dependencies.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::TRACING_TARGET;
use crate::error::{CoreError, CoreResult};

/// A file that must be made available in a job's run directory before the
/// job starts.
///
/// The source locator is either a plain filesystem path or a `file://` URL;
/// the latter is treated as already-local and never triggers a copy/resolve
/// step. The destination is relative to the job's working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredFile {
    /// Where the file currently lives: a plain path or a `file://` URL.
    pub source: String,
    /// Where the file must appear, relative to the run directory.
    pub destination: PathBuf,
}

impl RequiredFile {
    /// Creates a new required-file record.
    pub fn new(source: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Returns whether the source locator is a `file://` URL.
    pub fn is_local_url(&self) -> bool {
        Url::parse(&self.source)
            .map(|u| u.scheme() == "file")
            .unwrap_or(false)
    }

    /// Returns the source as a filesystem path, stripping a `file://`
    /// scheme if present.
    pub fn source_path(&self) -> PathBuf {
        match Url::parse(&self.source) {
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .unwrap_or_else(|_| PathBuf::from(&self.source)),
            _ => PathBuf::from(&self.source),
        }
    }
}

/// A tracked file: a logical role name, a concrete path, and the files the
/// job needs copied or linked alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Logical role of the file within the job, e.g. `osm` or `idf`.
    pub key: String,
    /// Full path to the file.
    pub full_path: PathBuf,
    /// Whether the file existed when this record was created.
    pub exists: bool,
    /// Files that must be made available before the owning job runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_files: Vec<RequiredFile>,
}

impl FileInfo {
    /// Creates a record for the given role and path, probing the filesystem
    /// for existence.
    pub fn new(key: impl Into<String>, full_path: impl Into<PathBuf>) -> Self {
        let full_path = full_path.into();
        let exists = full_path.exists();
        Self {
            key: key.into(),
            full_path,
            exists,
            required_files: Vec::new(),
        }
    }

    /// Creates a record with an explicit existence flag, for callers that
    /// already know (e.g. when rehydrating from a store).
    pub fn with_exists(
        key: impl Into<String>,
        full_path: impl Into<PathBuf>,
        exists: bool,
    ) -> Self {
        Self {
            key: key.into(),
            full_path: full_path.into(),
            exists,
            required_files: Vec::new(),
        }
    }

    /// Returns the lowercase extension of the tracked file, if any.
    pub fn extension(&self) -> Option<String> {
        self.full_path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }

    /// Returns the file name of the tracked file, if any.
    pub fn filename(&self) -> Option<String> {
        self.full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Adds a required file, verifying the source exists.
    ///
    /// Returns `false` (not an error) when the source cannot be found; the
    /// caller decides whether that is fatal. Adding the same source locator
    /// twice is detected and skipped with a diagnostic.
    pub fn add_required_file(
        &mut self,
        source: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> bool {
        self.add_required_file_relative_to(source, destination, Path::new(""))
    }

    /// Adds a required file, resolving the source against `relative_to`
    /// when it is non-empty.
    pub fn add_required_file_relative_to(
        &mut self,
        source: impl Into<String>,
        destination: impl Into<PathBuf>,
        relative_to: &Path,
    ) -> bool {
        let source = source.into();
        let destination = destination.into();

        let record = RequiredFile::new(source.clone(), destination);
        let resolved = if relative_to.as_os_str().is_empty() || record.is_local_url() {
            record.source_path()
        } else {
            relative_to.join(record.source_path())
        };

        if self.required_files.iter().any(|r| r.source == source) {
            tracing::debug!(
                target: TRACING_TARGET,
                key = %self.key,
                source = %source,
                "required file already registered, skipping duplicate"
            );
            return true;
        }

        if !record.is_local_url() && !resolved.exists() {
            tracing::warn!(
                target: TRACING_TARGET,
                key = %self.key,
                source = %source,
                resolved = %resolved.display(),
                "required file source does not exist"
            );
            return false;
        }

        self.required_files.push(RequiredFile {
            source,
            destination: record.destination,
        });
        true
    }
}

/// An ordered collection of tracked files.
///
/// Lookups are last-match: "last" means most recently appended, which lets
/// callers locate the newest artifact of a given role among many job
/// outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Files(Vec<FileInfo>);

impl Files {
    /// Creates an empty file collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collection from existing records.
    pub fn from_vec(files: Vec<FileInfo>) -> Self {
        Self(files)
    }

    /// Returns the number of tracked files.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends a file record.
    pub fn append(&mut self, file: FileInfo) {
        self.0.push(file);
    }

    /// Merges another collection into this one by appending its records.
    pub fn append_all(&mut self, files: Files) {
        self.0.extend(files.0);
    }

    /// Returns the most recently appended file with the given role key.
    pub fn get_last_by_key(&self, key: &str) -> CoreResult<&FileInfo> {
        self.0
            .iter()
            .rev()
            .find(|f| f.key == key)
            .ok_or_else(|| CoreError::FileNotFound(key.to_string()))
    }

    /// Returns the most recently appended file with the given extension
    /// (matched case-insensitively, without the leading dot).
    pub fn get_last_by_extension(&self, extension: &str) -> CoreResult<&FileInfo> {
        let wanted = extension.to_lowercase();
        self.0
            .iter()
            .rev()
            .find(|f| f.extension().as_deref() == Some(wanted.as_str()))
            .ok_or_else(|| CoreError::FileNotFound(format!("*.{extension}")))
    }

    /// Returns every file whose file name matches, oldest first.
    pub fn get_all_by_filename(&self, filename: &str) -> Vec<&FileInfo> {
        self.0
            .iter()
            .filter(|f| f.filename().as_deref() == Some(filename))
            .collect()
    }

    /// Iterates over the files in append order.
    pub fn iter(&self) -> impl Iterator<Item = &FileInfo> {
        self.0.iter()
    }

    /// Iterates mutably over the files in append order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FileInfo> {
        self.0.iter_mut()
    }

    /// Returns the first tracked file, if any. Input #0 is the seed input
    /// of a job by convention.
    pub fn first(&self) -> Option<&FileInfo> {
        self.0.first()
    }
}

impl FromIterator<FileInfo> for Files {
    fn from_iter<T: IntoIterator<Item = FileInfo>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<FileInfo> for Files {
    fn from(file: FileInfo) -> Self {
        Self(vec![file])
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_last_match_lookups() {
        let mut files = Files::new();
        files.append(FileInfo::with_exists("idf", "/run/a/in.idf", true));
        files.append(FileInfo::with_exists("idf", "/run/b/in.idf", true));
        files.append(FileInfo::with_exists("osm", "/run/model.osm", true));

        let last = files.get_last_by_key("idf").expect("idf present");
        assert_eq!(last.full_path, PathBuf::from("/run/b/in.idf"));

        let by_ext = files.get_last_by_extension("osm").expect("osm present");
        assert_eq!(by_ext.key, "osm");

        assert_eq!(files.get_all_by_filename("in.idf").len(), 2);
        assert!(files.get_last_by_key("epw").is_err());
    }

    #[test]
    fn test_required_file_dedup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("lib.rb");
        fs::write(&src, "# helper").expect("write");

        let mut info = FileInfo::with_exists("rb", dir.path().join("main.rb"), true);
        assert!(info.add_required_file(src.to_string_lossy(), "lib.rb"));
        assert!(info.add_required_file(src.to_string_lossy(), "lib.rb"));

        assert_eq!(info.required_files.len(), 1);
    }

    #[test]
    fn test_missing_required_file_reports_failure() {
        let mut info = FileInfo::with_exists("rb", "/tmp/main.rb", true);
        assert!(!info.add_required_file("/definitely/not/here.rb", "here.rb"));
        assert!(info.required_files.is_empty());
    }

    #[test]
    fn test_file_url_source_is_already_local() {
        let mut info = FileInfo::with_exists("rb", "/tmp/main.rb", true);
        // file:// locators are taken at face value, no existence probe.
        assert!(info.add_required_file("file:///somewhere/else.rb", "else.rb"));
        assert_eq!(info.required_files.len(), 1);
        assert!(info.required_files[0].is_local_url());
    }

    #[test]
    fn test_relative_resolution() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("helper.rb"), "# helper").expect("write");

        let mut info = FileInfo::with_exists("rb", dir.path().join("main.rb"), true);
        assert!(info.add_required_file_relative_to("helper.rb", "helper.rb", dir.path()));
        // Stored locator stays as given, resolution is for verification only.
        assert_eq!(info.required_files[0].source, "helper.rb");
    }
}
