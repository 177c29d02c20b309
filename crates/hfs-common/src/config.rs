//! ---
//! hfs_section: "01-shared"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "Sectioned key=value configuration files and the deployment descriptor."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::logging::LogFormat;

/// Ordered key/value pairs belonging to one section.
pub type SectionSettings = IndexMap<String, String>;

const DEFAULT_AUTH_SERVICE_URL: &str = "https://ci.kbase.us/services/authorization";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration from {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration at {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },
    #[error("section [{section}] not found in {path:?}")]
    MissingSection { path: PathBuf, section: String },
    #[error("section [{section}] is missing required key '{key}'")]
    MissingKey { section: String, key: String },
    #[error("invalid value for '{key}' in section [{section}]: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        reason: String,
    },
    #[error("environment variable {var} is not set")]
    MissingEnv { var: &'static str },
}

/// A named section of a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    name: String,
    settings: SectionSettings,
}

impl Section {
    pub fn new(name: impl Into<String>, settings: SectionSettings) -> Self {
        Self {
            name: name.into(),
            settings,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &SectionSettings {
        &self.settings
    }

    /// Look up a key; matching ignores ASCII case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    /// Look up a key that must be present and non-empty.
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        match self.get(key).map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ConfigError::MissingKey {
                section: self.name.clone(),
                key: key.to_owned(),
            }),
        }
    }

    pub fn require_path(&self, key: &str) -> Result<PathBuf, ConfigError> {
        self.require(key).map(PathBuf::from)
    }

    /// Interpret a key as a boolean switch. Absent keys are `false`.
    pub fn flag(&self, key: &str) -> bool {
        matches!(
            self.get(key).map(|v| v.trim().to_ascii_lowercase()).as_deref(),
            Some("true" | "yes" | "1" | "on")
        )
    }
}

/// Escape the sequences the INI reader decodes: backslashes, quotes and line
/// breaks.
fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\'' => escaped.push_str("\\'"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\0' => escaped.push_str("\\0"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Sectioned key=value document, rendered in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: IndexMap<String, SectionSettings>,
}

impl IniDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_section(mut self, name: impl Into<String>, settings: SectionSettings) -> Self {
        self.insert_section(name, settings);
        self
    }

    /// Insert or replace a section.
    pub fn insert_section(&mut self, name: impl Into<String>, settings: SectionSettings) {
        self.sections.insert(name.into(), settings);
    }

    /// Retrieve a section by name; matching ignores ASCII case.
    pub fn section(&self, name: &str) -> Option<Section> {
        self.sections
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(candidate, settings)| Section::new(candidate.clone(), settings.clone()))
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Render the document as `[section]` headers followed by `key=value` lines.
    ///
    /// Values are escaped so [`IniDocument::load`] returns them unchanged. The
    /// reader trims every value, so a value with leading or trailing
    /// whitespace is rejected rather than written lossily.
    pub fn render(&self) -> Result<String, ConfigError> {
        let mut out = String::new();
        for (index, (name, settings)) in self.sections.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "[{name}]");
            for (key, value) in settings {
                if value.trim() != value {
                    return Err(ConfigError::InvalidValue {
                        section: name.clone(),
                        key: key.clone(),
                        reason: "leading or trailing whitespace cannot be stored".into(),
                    });
                }
                let _ = writeln!(out, "{key}={}", escape_value(value));
            }
        }
        Ok(out)
    }

    /// Parse a sectioned key=value file from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(config_path = %path.display(), "loading sectioned configuration");
        if let Err(source) = std::fs::metadata(path) {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }

        let parse_err = |source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };
        let raw = Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini).required(true))
            .build()
            .map_err(parse_err)?;
        let top: IndexMap<String, Value> = raw.try_deserialize().map_err(parse_err)?;

        let mut document = IniDocument::new();
        for (name, value) in top {
            // Keys outside any section carry no meaning for the harness.
            let Ok(table) = value.into_table() else {
                continue;
            };
            let mut settings = SectionSettings::new();
            for (key, value) in table {
                settings.insert(key, value.into_string().map_err(parse_err)?);
            }
            settings.sort_keys();
            document.insert_section(name, settings);
        }
        Ok(document)
    }

    /// Load a single section from disk, failing when it is absent.
    pub fn load_section(path: &Path, name: &str) -> Result<Section, ConfigError> {
        Self::load(path)?
            .section(name)
            .ok_or_else(|| ConfigError::MissingSection {
                path: path.to_path_buf(),
                section: name.to_owned(),
            })
    }
}

/// Pre-existing deployment descriptor naming the scratch area and store binary.
#[derive(Debug, Clone)]
pub struct DeploymentDescriptor {
    pub source: PathBuf,
    pub scratch: PathBuf,
    pub store_binary: Option<PathBuf>,
    pub auth_service_url: String,
    pub section: Section,
}

impl DeploymentDescriptor {
    pub const ENV_PATH: &'static str = "KB_DEPLOYMENT_CONFIG";
    pub const SECTION: &'static str = "HTMLFileSetServ";

    /// Load the descriptor named by `KB_DEPLOYMENT_CONFIG`.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(Self::ENV_PATH) {
            Ok(path) if !path.trim().is_empty() => Self::load(Path::new(path.trim())),
            _ => Err(ConfigError::MissingEnv {
                var: Self::ENV_PATH,
            }),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let section = IniDocument::load_section(path, Self::SECTION)?;
        let scratch = section.require_path("scratch")?;
        let store_binary = section
            .get("store-binary")
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let auth_service_url = section
            .get("auth-service-url")
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_AUTH_SERVICE_URL)
            .to_owned();

        Ok(Self {
            source: path.to_path_buf(),
            scratch,
            store_binary,
            auth_service_url,
            section,
        })
    }

    /// Build a descriptor in memory, bypassing the filesystem.
    pub fn in_memory(scratch: impl Into<PathBuf>) -> Self {
        let scratch = scratch.into();
        let mut settings = SectionSettings::new();
        settings.insert("scratch".into(), scratch.display().to_string());
        Self {
            source: PathBuf::new(),
            scratch,
            store_binary: None,
            auth_service_url: DEFAULT_AUTH_SERVICE_URL.to_owned(),
            section: Section::new(Self::SECTION, settings),
        }
    }
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_file() -> String {
    "test.log".to_owned()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_file")]
    pub file_name: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Log into `<directory>/test.log`.
    pub fn in_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn log_file(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            file_name: default_log_file(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn settings(pairs: &[(&str, &str)]) -> SectionSettings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn render_keeps_insertion_order() {
        let doc = IniDocument::new()
            .with_section("Workspace", settings(&[("store-host", "localhost:1"), ("a", "b")]))
            .with_section("Other", settings(&[("z", "1")]));
        assert_eq!(
            doc.render().unwrap(),
            "[Workspace]\nstore-host=localhost:1\na=b\n\n[Other]\nz=1\n"
        );
    }

    #[test]
    fn render_escapes_what_the_reader_decodes() {
        let doc = IniDocument::new()
            .with_section("S", settings(&[("path", r"a\b"), ("quoted", "\"q\""), ("lines", "1\n2")]));
        assert_eq!(
            doc.render().unwrap(),
            "[S]\npath=a\\\\b\nquoted=\\\"q\\\"\nlines=1\\n2\n"
        );
    }

    #[test]
    fn render_rejects_edge_whitespace() {
        let doc = IniDocument::new().with_section("S", settings(&[("k", "v ")]));
        assert!(matches!(
            doc.render(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "k"
        ));
    }

    #[test]
    fn load_reads_back_rendered_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svc.cfg");
        let doc = IniDocument::new().with_section(
            "HTMLFileSetServ",
            settings(&[
                ("endpoint-url", "http://localhost:4242"),
                ("scratch-dir", "/tmp/scratch"),
            ]),
        );
        std::fs::write(&path, doc.render().unwrap()).unwrap();

        let section = IniDocument::load_section(&path, "HTMLFileSetServ").unwrap();
        assert_eq!(section.get("endpoint-url"), Some("http://localhost:4242"));
        assert_eq!(section.require("scratch-dir").unwrap(), "/tmp/scratch");
    }

    #[test]
    fn missing_section_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svc.cfg");
        std::fs::write(&path, "[Other]\nkey=value\n").unwrap();
        let err = IniDocument::load_section(&path, "Workspace").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = IniDocument::load(&dir.path().join("absent.cfg")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn require_rejects_blank_values() {
        let section = Section::new("Workspace", settings(&[("store-host", "  ")]));
        let err = section.require("store-host").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { ref key, .. } if key == "store-host"));
    }

    #[test]
    fn flag_understands_common_spellings() {
        let section = Section::new(
            "Workspace",
            settings(&[("ignore-handle-service", "true"), ("other", "no")]),
        );
        assert!(section.flag("ignore-handle-service"));
        assert!(!section.flag("other"));
        assert!(!section.flag("absent"));
    }

    #[test]
    fn descriptor_loads_scratch_and_store_binary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deploy.cfg");
        std::fs::write(
            &path,
            format!(
                "[HTMLFileSetServ]\nscratch={}\nstore-binary=/opt/store/bin/docstore\n",
                dir.path().display()
            ),
        )
        .unwrap();

        let descriptor = DeploymentDescriptor::load(&path).unwrap();
        assert_eq!(descriptor.scratch, dir.path());
        assert_eq!(
            descriptor.store_binary.as_deref(),
            Some(Path::new("/opt/store/bin/docstore"))
        );
        assert_eq!(descriptor.auth_service_url, DEFAULT_AUTH_SERVICE_URL);
    }

    #[test]
    fn descriptor_requires_scratch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deploy.cfg");
        std::fs::write(&path, "[HTMLFileSetServ]\nauth-service-url=http://auth\n").unwrap();
        let err = DeploymentDescriptor::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { ref key, .. } if key == "scratch"));
    }
}
