use std::path::{Path, PathBuf};

use hfs_common::config::{ConfigError, IniDocument, Section, SectionSettings};

/// Section of the service configuration file read by the workspace server.
pub const SECTION: &str = "Workspace";

/// Settings of one workspace server instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceSettings {
    /// `host:port` of the document store.
    pub store_host: String,
    /// Store database holding workspace objects and the settings document.
    pub store_database: String,
    pub auth_service_url: String,
    /// User name the workspace treats as its administrator.
    pub admin_identity: String,
    pub admin_credential: String,
    /// Directory for temporary files; created at start-up.
    pub scratch_dir: PathBuf,
    pub backend_secret: Option<String>,
    pub ignore_handle_service: bool,
    /// Listening port; 0 picks a free one.
    pub port: u16,
}

impl WorkspaceSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_section(&IniDocument::load_section(path, SECTION)?)
    }

    pub fn from_section(section: &Section) -> Result<Self, ConfigError> {
        let store_host = section.require("store-host")?.to_owned();
        if !is_host_port(&store_host) {
            return Err(ConfigError::InvalidValue {
                section: section.name().to_owned(),
                key: "store-host".into(),
                reason: format!("expected host:port, got '{store_host}'"),
            });
        }

        let port = match section.get("port").map(str::trim) {
            None | Some("") => 0,
            Some(raw) => raw.parse().map_err(|err: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    section: section.name().to_owned(),
                    key: "port".into(),
                    reason: err.to_string(),
                }
            })?,
        };

        Ok(Self {
            store_host,
            store_database: section.require("store-database")?.to_owned(),
            auth_service_url: section.require("auth-service-url")?.to_owned(),
            admin_identity: section.require("admin-identity")?.to_owned(),
            admin_credential: section.require("admin-credential")?.to_owned(),
            scratch_dir: section.require_path("scratch-dir")?,
            backend_secret: section
                .get("backend-secret")
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned),
            ignore_handle_service: section.flag("ignore-handle-service"),
            port,
        })
    }

    /// Render back into the key set `from_section` reads.
    pub fn to_settings(&self) -> SectionSettings {
        let mut settings = SectionSettings::new();
        settings.insert("store-host".into(), self.store_host.clone());
        settings.insert("store-database".into(), self.store_database.clone());
        settings.insert("auth-service-url".into(), self.auth_service_url.clone());
        settings.insert("admin-identity".into(), self.admin_identity.clone());
        settings.insert("admin-credential".into(), self.admin_credential.clone());
        settings.insert("scratch-dir".into(), self.scratch_dir.display().to_string());
        if let Some(secret) = &self.backend_secret {
            settings.insert("backend-secret".into(), secret.clone());
        }
        settings.insert(
            "ignore-handle-service".into(),
            self.ignore_handle_service.to_string(),
        );
        if self.port != 0 {
            settings.insert("port".into(), self.port.to_string());
        }
        settings
    }
}

fn is_host_port(value: &str) -> bool {
    matches!(
        value.rsplit_once(':'),
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok()
    )
}
