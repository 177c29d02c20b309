use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hfs_common::{IniDocument, ManagedService};
use hfs_docstore::{DocStoreClient, DocStoreServer, DocStoreSettings};
use hfs_workspace::rpc::{AUTH_REQUIRED, METHOD_NOT_FOUND, NO_SUCH_OBJECT};
use hfs_workspace::{
    initialize_workspace_db, WorkspaceClient, WorkspaceClientError, WorkspaceServer,
    WorkspaceSettings, SECTION, SERVER_VERSION,
};
use serde_json::json;
use tempfile::tempdir;
use url::Url;

type Worker = JoinHandle<anyhow::Result<()>>;

fn wait_for_port(service: &dyn ManagedService) -> u16 {
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        if let Some(port) = service.server_port() {
            return port;
        }
        assert!(Instant::now() < deadline, "{} never bound a port", service.name());
        thread::sleep(Duration::from_millis(20));
    }
}

fn start_store(dir: &Path) -> (Arc<DocStoreServer>, Worker, String) {
    let store = Arc::new(DocStoreServer::new());
    let settings = DocStoreSettings::new(dir.join("store"));
    let worker = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.run(&settings))
    };
    let port = wait_for_port(store.as_ref());
    (store, worker, format!("127.0.0.1:{port}"))
}

fn settings(dir: &Path, store_host: &str) -> WorkspaceSettings {
    WorkspaceSettings {
        store_host: store_host.to_owned(),
        store_database: "ws_test".into(),
        auth_service_url: "https://ci.kbase.us/services/authorization".into(),
        admin_identity: "harness-admin".into(),
        admin_credential: "admin-token".into(),
        scratch_dir: dir.join("tempworkspace"),
        backend_secret: Some("foo".into()),
        ignore_handle_service: true,
        port: 0,
    }
}

fn write_config(dir: &Path, settings: &WorkspaceSettings) -> std::path::PathBuf {
    let path = dir.join("workspace.cfg");
    let document = IniDocument::new().with_section(SECTION, settings.to_settings());
    std::fs::write(&path, document.render().unwrap()).unwrap();
    path
}

async fn join(worker: Worker) {
    tokio::task::spawn_blocking(move || worker.join().unwrap())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn serves_rpc_against_an_initialised_database() {
    let dir = tempdir().unwrap();
    let (store, store_worker, store_host) = start_store(dir.path());
    let client = DocStoreClient::connect(&store_host).await.unwrap();
    initialize_workspace_db(&client.database("ws_test"), "type_test")
        .await
        .unwrap();

    let config = write_config(dir.path(), &settings(dir.path(), &store_host));
    let workspace = Arc::new(WorkspaceServer::new());
    let ws_worker = {
        let workspace = Arc::clone(&workspace);
        thread::spawn(move || workspace.startup(&config))
    };
    let port = wait_for_port(workspace.as_ref());
    assert!(dir.path().join("tempworkspace").is_dir());

    let url = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
    let anonymous = WorkspaceClient::new(url.clone()).unwrap();
    assert_eq!(anonymous.ver().await.unwrap(), SERVER_VERSION);
    assert_eq!(anonymous.status().await.unwrap()["state"], "OK");

    let err = anonymous
        .save_object("ws1", "report", json!({"html": "<p/>"}))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkspaceClientError::Rpc(ref e) if e.code == AUTH_REQUIRED));

    let err = anonymous.call("Workspace.nope", Vec::new()).await.unwrap_err();
    assert!(matches!(err, WorkspaceClientError::Rpc(ref e) if e.code == METHOD_NOT_FOUND));

    let authed = anonymous.with_token("admin-token");
    let info = authed
        .save_object("ws1", "report", json!({"html": "<p>hello</p>"}))
        .await
        .unwrap();
    assert_eq!(info.saved_by, "harness-admin");

    let object = authed.get_object("ws1", "report").await.unwrap();
    assert_eq!(object.data["html"], "<p>hello</p>");
    assert_eq!(object.info.name, "report");
    let err = authed.get_object("ws1", "absent").await.unwrap_err();
    assert!(matches!(err, WorkspaceClientError::Rpc(ref e) if e.code == NO_SUCH_OBJECT));

    workspace.stop_server().unwrap();
    join(ws_worker).await;
    store.stop_server().unwrap();
    join(store_worker).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn startup_fails_without_workspace_settings() {
    let dir = tempdir().unwrap();
    let (store, store_worker, store_host) = start_store(dir.path());

    let workspace = Arc::new(WorkspaceServer::new());
    let worker = {
        let workspace = Arc::clone(&workspace);
        let settings = settings(dir.path(), &store_host);
        thread::spawn(move || workspace.run(&settings))
    };
    let outcome = tokio::task::spawn_blocking(move || worker.join().unwrap())
        .await
        .unwrap();
    let err = outcome.unwrap_err();
    assert!(format!("{err:#}").contains("initialize_workspace_db"));
    assert_eq!(workspace.server_port(), None);

    store.stop_server().unwrap();
    join(store_worker).await;
}
