//! ---
//! hfs_section: "04-testharness"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "The standard document store, workspace and HTML FileSet chain."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
//! The standard chain: document store, then the workspace server backed by
//! it, then the HTML FileSet server pointing at the workspace.

use std::sync::Arc;

use anyhow::Context;
use hfs_common::{ManagedService, SectionSettings};
use hfs_docstore::DocStoreServer;
use hfs_htmlserv::{HtmlFileSetServer, HtmlServSettings};
use hfs_workspace::{WorkspaceServer, WorkspaceSettings};
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::chain::{DependencyChain, ServiceConfig, ServiceDefinition, SetupContext};
use crate::error::{HarnessError, Result};
use crate::harness::{Harness, HarnessOptions};
use crate::reset::DatastoreReset;
use crate::store::{ProcessStore, StoreSession};

pub const STORE: &str = "DocStore";
pub const WORKSPACE: &str = "Workspace";
pub const HTML: &str = "HTMLFileSetServ";

fn store_config(ctx: &mut SetupContext<'_>) -> Result<ServiceConfig> {
    let dbpath = ctx.scratch_dir("tempstore")?;
    let mut settings = SectionSettings::new();
    settings.insert("dbpath".into(), dbpath.display().to_string());
    Ok(ServiceConfig::new(hfs_docstore::server::SECTION, settings))
}

fn store_service(ctx: &SetupContext<'_>) -> Arc<dyn ManagedService> {
    match &ctx.prerequisites().descriptor.store_binary {
        Some(binary) => {
            info!(binary = %binary.display(), "using external document store");
            Arc::new(ProcessStore::new(binary))
        }
        None => Arc::new(DocStoreServer::new()),
    }
}

fn workspace_config(ctx: &mut SetupContext<'_>) -> Result<ServiceConfig> {
    let store = ctx.endpoint(STORE)?.clone();
    let options = ctx.options().clone();

    let session = StoreSession::connect(&store.host_port())?;
    session
        .initialize_workspace_db(&options.workspace_database, &options.type_database)
        .with_context(|| format!("initialising workspace database {}", options.workspace_database))?;

    let scratch_dir = ctx.scratch_dir("tempworkspace")?;
    let token = &ctx.prerequisites().token;
    let settings = WorkspaceSettings {
        store_host: store.host_port(),
        store_database: options.workspace_database,
        auth_service_url: ctx.prerequisites().descriptor.auth_service_url.clone(),
        admin_identity: token.user_name().to_owned(),
        admin_credential: token.token().to_owned(),
        scratch_dir,
        backend_secret: Some(Uuid::new_v4().simple().to_string()),
        ignore_handle_service: true,
        port: 0,
    };
    Ok(ServiceConfig::new(hfs_workspace::SECTION, settings.to_settings()))
}

fn html_config(ctx: &mut SetupContext<'_>) -> Result<ServiceConfig> {
    let workspace = ctx.endpoint(WORKSPACE)?;
    let endpoint_url = Url::parse(&workspace.url()).map_err(|err| {
        HarnessError::InvalidChain(format!("workspace endpoint {workspace} is not a URL: {err}"))
    })?;
    let settings = HtmlServSettings {
        endpoint_url,
        scratch_dir: ctx.scratch().to_path_buf(),
        auth_service_url: ctx.prerequisites().descriptor.auth_service_url.clone(),
        port: 0,
    };
    Ok(ServiceConfig::new(hfs_htmlserv::SECTION, settings.to_settings()))
}

/// Store, workspace and HTML server, in that order.
pub fn standard_chain() -> Result<DependencyChain> {
    DependencyChain::new()
        .with(ServiceDefinition::new(STORE, store_config, store_service))?
        .with(
            ServiceDefinition::new(WORKSPACE, workspace_config, |_| {
                Arc::new(WorkspaceServer::new()) as Arc<dyn ManagedService>
            })
            .depends_on(STORE),
        )?
        .with(
            ServiceDefinition::new(HTML, html_config, |_| {
                Arc::new(HtmlFileSetServer::new()) as Arc<dyn ManagedService>
            })
            .depends_on(WORKSPACE),
        )
}

/// A harness over [`standard_chain`] that wipes the workspace database
/// before each test.
pub fn standard_harness(options: HarnessOptions) -> Result<Harness> {
    let reset = DatastoreReset::new(STORE, options.workspace_database.clone());
    Ok(Harness::new(standard_chain()?, options).with_reset(reset))
}
