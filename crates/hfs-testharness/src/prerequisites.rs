//! ---
//! hfs_section: "04-testharness"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "External inputs resolved before any service starts."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use std::path::Path;

use hfs_common::{AuthToken, DeploymentDescriptor, TokenValidator};
use tracing::info;

use crate::error::Result;

/// The auth token and deployment descriptor a harness run depends on.
#[derive(Debug, Clone)]
pub struct Prerequisites {
    pub token: AuthToken,
    pub descriptor: DeploymentDescriptor,
}

impl Prerequisites {
    pub fn new(token: AuthToken, descriptor: DeploymentDescriptor) -> Self {
        Self { token, descriptor }
    }

    /// Resolve `KB_AUTH_TOKEN` through `validator` and load the descriptor
    /// named by `KB_DEPLOYMENT_CONFIG`.
    pub fn from_env(validator: &dyn TokenValidator) -> Result<Self> {
        let token = validator.validate_env()?;
        let descriptor = DeploymentDescriptor::from_env()?;
        info!(
            user = %token.user_name(),
            descriptor = %descriptor.source.display(),
            scratch = %descriptor.scratch.display(),
            "resolved harness prerequisites"
        );
        Ok(Self::new(token, descriptor))
    }

    pub fn scratch(&self) -> &Path {
        &self.descriptor.scratch
    }
}
