//! ---
//! hfs_section: "04-testharness"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "Ephemeral per-service configuration files in the scratch directory."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use std::io::Write;
use std::path::{Path, PathBuf};

use hfs_common::{IniDocument, SectionSettings};
use parking_lot::Mutex;
use tempfile::{Builder, TempPath};
use tracing::{debug, info, warn};

use crate::error::{HarnessError, Result};

/// Writes `[section]` key=value files named `test*.cfg` into a scratch
/// directory.
///
/// Every file is registered for deletion: [`ConfigWriter::release`] removes
/// them explicitly and dropping the writer removes whatever is left, unless
/// the writer was told to keep its files.
#[derive(Debug)]
pub struct ConfigWriter {
    scratch: PathBuf,
    keep: bool,
    registry: Mutex<Vec<TempPath>>,
}

impl ConfigWriter {
    pub fn new(scratch: impl Into<PathBuf>) -> Self {
        Self {
            scratch: scratch.into(),
            keep: false,
            registry: Mutex::new(Vec::new()),
        }
    }

    /// Leave written files on disk at release.
    pub fn keep_files(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    /// Serialise `settings` under `section`, flush it to disk and return the
    /// file's location.
    pub fn write(&self, section: &str, settings: &SectionSettings) -> Result<PathBuf> {
        let document = IniDocument::new().with_section(section, settings.clone());
        self.write_document(&document)
    }

    pub fn write_document(&self, document: &IniDocument) -> Result<PathBuf> {
        let io_err = |source| HarnessError::ConfigWrite {
            path: self.scratch.clone(),
            source,
        };

        let rendered = document.render().map_err(HarnessError::ConfigRender)?;
        let mut file = Builder::new()
            .prefix("test")
            .suffix(".cfg")
            .tempfile_in(&self.scratch)
            .map_err(io_err)?;
        file.write_all(rendered.as_bytes()).map_err(io_err)?;
        file.flush().map_err(io_err)?;
        file.as_file().sync_all().map_err(io_err)?;

        let temp_path = file.into_temp_path();
        let path = temp_path.to_path_buf();
        debug!(path = %path.display(), sections = ?document.section_names().collect::<Vec<_>>(), "wrote temporary config file");
        self.registry.lock().push(temp_path);
        Ok(path)
    }

    /// Files written and not yet released.
    pub fn written(&self) -> Vec<PathBuf> {
        self.registry
            .lock()
            .iter()
            .map(|path| path.to_path_buf())
            .collect()
    }

    /// Delete (or keep) every registered file. Returns the files that could
    /// not be removed.
    pub fn release(&self) -> Vec<(PathBuf, std::io::Error)> {
        let paths: Vec<TempPath> = self.registry.lock().drain(..).collect();
        let mut failures = Vec::new();
        for temp_path in paths {
            let path = temp_path.to_path_buf();
            if self.keep {
                match temp_path.keep() {
                    Ok(kept) => info!(path = %kept.display(), "keeping temporary config file"),
                    Err(err) => failures.push((path, err.error)),
                }
                continue;
            }
            match temp_path.close() {
                Ok(()) => debug!(path = %path.display(), "removed temporary config file"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to remove temporary config file");
                    failures.push((path, err));
                }
            }
        }
        failures
    }
}

impl Drop for ConfigWriter {
    fn drop(&mut self) {
        if self.keep {
            // TempPath deletes on drop; keeping means disarming each one.
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hfs_common::ConfigError;
    use tempfile::tempdir;

    fn settings(pairs: &[(&str, &str)]) -> SectionSettings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn written_section_reads_back() {
        let scratch = tempdir().unwrap();
        let writer = ConfigWriter::new(scratch.path());
        let path = writer.write("X", &settings(&[("a", "1")])).unwrap();

        assert_eq!(path.parent(), Some(scratch.path()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("test") && name.ends_with(".cfg"), "{name}");

        let section = IniDocument::load_section(&path, "X").unwrap();
        assert_eq!(section.get("a"), Some("1"));
    }

    #[test]
    fn each_write_gets_a_unique_file() {
        let scratch = tempdir().unwrap();
        let writer = ConfigWriter::new(scratch.path());
        let first = writer.write("X", &settings(&[("a", "1")])).unwrap();
        let second = writer.write("X", &settings(&[("a", "2")])).unwrap();
        assert_ne!(first, second);
        assert_eq!(writer.written(), vec![first, second]);
    }

    #[test]
    fn release_deletes_files() {
        let scratch = tempdir().unwrap();
        let writer = ConfigWriter::new(scratch.path());
        let path = writer.write("X", &settings(&[("a", "1")])).unwrap();
        assert!(writer.release().is_empty());
        assert!(!path.exists());
        assert!(writer.written().is_empty());
    }

    #[test]
    fn dropping_the_writer_deletes_files() {
        let scratch = tempdir().unwrap();
        let path = {
            let writer = ConfigWriter::new(scratch.path());
            writer.write("X", &settings(&[("a", "1")])).unwrap()
        };
        assert!(!path.exists());
    }

    #[test]
    fn kept_files_survive_release_and_drop() {
        let scratch = tempdir().unwrap();
        let writer = ConfigWriter::new(scratch.path()).keep_files(true);
        let path = writer.write("X", &settings(&[("a", "1")])).unwrap();
        assert!(writer.release().is_empty());
        drop(writer);
        assert!(path.exists());
    }

    #[test]
    fn missing_scratch_directory_is_a_write_error() {
        let scratch = tempdir().unwrap();
        let writer = ConfigWriter::new(scratch.path().join("absent"));
        let err = writer.write("X", &settings(&[("a", "1")])).unwrap_err();
        assert!(matches!(err, HarnessError::ConfigWrite { .. }));
    }

    #[test]
    fn escapes_and_quotes_read_back_unchanged() {
        let scratch = tempdir().unwrap();
        let writer = ConfigWriter::new(scratch.path());
        let values = [
            ("windows-path", r"C:\tmp\new"),
            ("double-quoted", "\"abc\""),
            ("single-quoted", "'x'"),
            ("apostrophe", "it's"),
            ("two-lines", "first\nsecond"),
            ("inner-spaces", "a  b"),
        ];
        let path = writer.write("X", &settings(&values)).unwrap();

        let section = IniDocument::load_section(&path, "X").unwrap();
        for (key, value) in values {
            assert_eq!(section.get(key), Some(value), "{key}");
        }
    }

    #[test]
    fn padded_value_is_rejected_without_leaving_a_file() {
        let scratch = tempdir().unwrap();
        let writer = ConfigWriter::new(scratch.path());
        let err = writer
            .write("X", &settings(&[("a", "1"), ("padded", "  value ")]))
            .unwrap_err();

        assert!(
            matches!(&err, HarnessError::ConfigRender(ConfigError::InvalidValue { key, .. }) if key == "padded"),
            "{err}"
        );
        assert!(writer.written().is_empty());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }
}
