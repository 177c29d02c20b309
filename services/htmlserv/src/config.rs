use std::path::{Path, PathBuf};

use hfs_common::config::{ConfigError, IniDocument, Section, SectionSettings};
use url::Url;

/// Section of the service configuration file read by the HTML server.
pub const SECTION: &str = "HTMLFileSetServ";

/// Settings of one HTML FileSet server instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlServSettings {
    /// Base URL of the workspace RPC server.
    pub endpoint_url: Url,
    /// Directory for cached files; created at start-up.
    pub scratch_dir: PathBuf,
    pub auth_service_url: String,
    /// Listening port; 0 picks a free one.
    pub port: u16,
}

impl HtmlServSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_section(&IniDocument::load_section(path, SECTION)?)
    }

    pub fn from_section(section: &Section) -> Result<Self, ConfigError> {
        let invalid = |key: &str, reason: String| ConfigError::InvalidValue {
            section: section.name().to_owned(),
            key: key.to_owned(),
            reason,
        };

        let raw_url = section.require("endpoint-url")?;
        let endpoint_url = Url::parse(raw_url).map_err(|err| invalid("endpoint-url", err.to_string()))?;
        if !matches!(endpoint_url.scheme(), "http" | "https") {
            return Err(invalid(
                "endpoint-url",
                format!("unsupported scheme '{}'", endpoint_url.scheme()),
            ));
        }

        let port = match section.get("port").map(str::trim) {
            None | Some("") => 0,
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|err| invalid("port", err.to_string()))?,
        };

        Ok(Self {
            endpoint_url,
            scratch_dir: section.require_path("scratch-dir")?,
            auth_service_url: section.require("auth-service-url")?.to_owned(),
            port,
        })
    }

    pub fn to_settings(&self) -> SectionSettings {
        let mut settings = SectionSettings::new();
        settings.insert("endpoint-url".into(), self.endpoint_url.to_string());
        settings.insert("scratch-dir".into(), self.scratch_dir.display().to_string());
        settings.insert("auth-service-url".into(), self.auth_service_url.clone());
        if self.port != 0 {
            settings.insert("port".into(), self.port.to_string());
        }
        settings
    }
}
