//! ---
//! hfs_section: "04-testharness"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "Ordered service definitions and the context their config builders see."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hfs_common::{ManagedService, SectionSettings};
use indexmap::IndexMap;
use tempfile::{Builder, TempDir};

use crate::error::{HarnessError, Result};
use crate::harness::HarnessOptions;
use crate::prerequisites::Prerequisites;

/// Resolved address of a running service. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn localhost(port: u16) -> Self {
        Self::new("localhost", port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`.
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `http://host:port`.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Settings for one service, rendered under `section`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub section: String,
    pub settings: SectionSettings,
}

impl ServiceConfig {
    pub fn new(section: impl Into<String>, settings: SectionSettings) -> Self {
        Self {
            section: section.into(),
            settings,
        }
    }
}

pub type ConfigBuilder = Box<dyn Fn(&mut SetupContext<'_>) -> Result<ServiceConfig> + Send + Sync>;
pub type ServiceFactory = Box<dyn Fn(&SetupContext<'_>) -> Arc<dyn ManagedService> + Send + Sync>;

/// One entry of a [`DependencyChain`].
pub struct ServiceDefinition {
    pub(crate) name: String,
    pub(crate) depends_on: Vec<String>,
    pub(crate) build_config: ConfigBuilder,
    pub(crate) factory: ServiceFactory,
}

impl ServiceDefinition {
    pub fn new<B, F>(name: impl Into<String>, build_config: B, factory: F) -> Self
    where
        B: Fn(&mut SetupContext<'_>) -> Result<ServiceConfig> + Send + Sync + 'static,
        F: Fn(&SetupContext<'_>) -> Arc<dyn ManagedService> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            build_config: Box::new(build_config),
            factory: Box::new(factory),
        }
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

/// Services in start order. Stop order is the exact reverse.
#[derive(Debug, Default)]
pub struct DependencyChain {
    pub(crate) definitions: Vec<ServiceDefinition>,
}

impl DependencyChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `definition`. Every dependency must already be in the chain.
    pub fn push(&mut self, definition: ServiceDefinition) -> Result<()> {
        if self.contains(&definition.name) {
            return Err(HarnessError::InvalidChain(format!(
                "service {} is defined twice",
                definition.name
            )));
        }
        if let Some(missing) = definition
            .depends_on
            .iter()
            .find(|dependency| !self.contains(dependency))
        {
            return Err(HarnessError::InvalidChain(format!(
                "service {} depends on {missing}, which does not come earlier in the chain",
                definition.name
            )));
        }
        self.definitions.push(definition);
        Ok(())
    }

    pub fn with(mut self, definition: ServiceDefinition) -> Result<Self> {
        self.push(definition)?;
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.iter().any(|definition| definition.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.definitions
            .iter()
            .map(|definition| definition.name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// What a config builder may see while its service is being prepared.
///
/// Endpoint lookups are limited to the service's declared dependencies, all
/// of which started earlier in the chain.
pub struct SetupContext<'a> {
    pub(crate) service: &'a str,
    pub(crate) depends_on: &'a [String],
    pub(crate) endpoints: &'a IndexMap<String, Endpoint>,
    pub(crate) scratch: &'a Path,
    pub(crate) scratch_dirs: &'a mut Vec<TempDir>,
    pub(crate) prerequisites: &'a Prerequisites,
    pub(crate) options: &'a HarnessOptions,
}

impl<'a> SetupContext<'a> {
    pub fn service(&self) -> &str {
        self.service
    }

    pub fn endpoint(&self, dependency: &str) -> Result<&Endpoint> {
        let unresolved = || HarnessError::UnresolvedDependency {
            service: self.service.to_owned(),
            dependency: dependency.to_owned(),
        };
        if !self.depends_on.iter().any(|name| name == dependency) {
            return Err(unresolved());
        }
        self.endpoints.get(dependency).ok_or_else(unresolved)
    }

    pub fn scratch(&self) -> &Path {
        self.scratch
    }

    /// Create a fresh directory under scratch, released at teardown.
    pub fn scratch_dir(&mut self, prefix: &str) -> Result<PathBuf> {
        let dir = Builder::new()
            .prefix(prefix)
            .tempdir_in(self.scratch)
            .map_err(|source| HarnessError::ConfigWrite {
                path: self.scratch.to_path_buf(),
                source,
            })?;
        let path = dir.path().to_path_buf();
        self.scratch_dirs.push(dir);
        Ok(path)
    }

    pub fn prerequisites(&self) -> &Prerequisites {
        self.prerequisites
    }

    pub fn options(&self) -> &HarnessOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use hfs_common::{AuthToken, DeploymentDescriptor};

    struct Inert;

    impl ManagedService for Inert {
        fn name(&self) -> &str {
            "inert"
        }
        fn startup(&self, _: &Path) -> anyhow::Result<()> {
            Ok(())
        }
        fn server_port(&self) -> Option<u16> {
            None
        }
        fn stop_server(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn definition(name: &str) -> ServiceDefinition {
        ServiceDefinition::new(
            name,
            |ctx| Ok(ServiceConfig::new(ctx.service(), SectionSettings::new())),
            |_| Arc::new(Inert) as Arc<dyn ManagedService>,
        )
    }

    #[test]
    fn dependencies_must_come_earlier() {
        let mut chain = DependencyChain::new();
        let err = chain
            .push(definition("Workspace").depends_on("DocStore"))
            .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidChain(_)));

        chain.push(definition("DocStore")).unwrap();
        chain
            .push(definition("Workspace").depends_on("DocStore"))
            .unwrap();
        assert_eq!(chain.names(), vec!["DocStore", "Workspace"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = DependencyChain::new()
            .with(definition("DocStore"))
            .unwrap()
            .with(definition("DocStore"))
            .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidChain(_)));
    }

    #[test]
    fn context_only_exposes_declared_dependencies() {
        let scratch = tempfile::tempdir().unwrap();
        let mut endpoints = IndexMap::new();
        endpoints.insert("DocStore".to_owned(), Endpoint::localhost(4000));
        endpoints.insert("Workspace".to_owned(), Endpoint::localhost(4001));
        let mut dirs = Vec::new();
        let prerequisites = Prerequisites::new(
            AuthToken::new("u", "t"),
            DeploymentDescriptor::in_memory(scratch.path()),
        );
        let options = HarnessOptions::default();
        let depends_on = vec!["Workspace".to_owned()];

        let mut ctx = SetupContext {
            service: "HTMLFileSetServ",
            depends_on: &depends_on,
            endpoints: &endpoints,
            scratch: scratch.path(),
            scratch_dirs: &mut dirs,
            prerequisites: &prerequisites,
            options: &options,
        };
        assert_eq!(ctx.endpoint("Workspace").unwrap().url(), "http://localhost:4001");
        assert!(matches!(
            ctx.endpoint("DocStore"),
            Err(HarnessError::UnresolvedDependency { .. })
        ));

        let dir = ctx.scratch_dir("tempstore").unwrap();
        assert!(dir.is_dir());
        assert!(dir.starts_with(scratch.path()));
        assert_eq!(dirs.len(), 1);
        assert_eq!(options.stop_grace, Duration::from_secs(10));
    }

    #[test]
    fn endpoint_formats() {
        let endpoint = Endpoint::localhost(8080);
        assert_eq!(endpoint.host_port(), "localhost:8080");
        assert_eq!(endpoint.url(), "http://localhost:8080");
        assert_eq!(endpoint.to_string(), "localhost:8080");
    }
}
