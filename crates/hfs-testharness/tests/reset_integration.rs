use std::sync::Arc;
use std::time::Duration;

use hfs_common::SectionSettings;
use hfs_docstore::DocStoreServer;
use hfs_testharness::{
    ConfigWriter, DatastoreReset, Endpoint, ReadinessPoller, ResetError, ServiceHandle, StoreSession,
};
use serde_json::json;

fn start_store(scratch: &std::path::Path, writer: &ConfigWriter) -> (ServiceHandle, Endpoint) {
    let mut settings = SectionSettings::new();
    settings.insert("dbpath".into(), scratch.join("db").display().to_string());
    let path = writer.write("DocStore", &settings).unwrap();

    let mut handle = ServiceHandle::new(Arc::new(DocStoreServer::new()));
    handle.start(&path).unwrap();
    let port = ReadinessPoller::new(Duration::from_millis(20), Duration::from_secs(10))
        .await_ready(&handle)
        .unwrap();
    (handle, Endpoint::localhost(port))
}

#[test]
fn reset_empties_only_the_named_database_and_is_idempotent() {
    let scratch = tempfile::tempdir().unwrap();
    let writer = ConfigWriter::new(scratch.path());
    let (mut handle, endpoint) = start_store(scratch.path(), &writer);

    let session = StoreSession::connect(&endpoint.host_port()).unwrap();
    session.insert("ws_test", "objects", &json!({"name": "a"})).unwrap();
    session.insert("ws_test", "settings", &json!({"_id": "settings"})).unwrap();
    session.insert("type_test", "types", &json!({"name": "t"})).unwrap();

    let reset = DatastoreReset::new("DocStore", "ws_test");
    assert_eq!(reset.reset(&endpoint).unwrap(), 2);
    assert!(session.collection_names("ws_test").unwrap().is_empty());
    assert_eq!(session.find("type_test", "types").unwrap().len(), 1);

    assert_eq!(reset.reset(&endpoint).unwrap(), 0);
    assert!(session.collection_names("ws_test").unwrap().is_empty());

    handle.stop(Duration::from_secs(10)).unwrap();
    assert!(writer.release().is_empty());
}

#[test]
fn reset_against_a_stopped_store_is_a_connect_error() {
    let scratch = tempfile::tempdir().unwrap();
    let writer = ConfigWriter::new(scratch.path());
    let (mut handle, endpoint) = start_store(scratch.path(), &writer);
    handle.stop(Duration::from_secs(10)).unwrap();

    let err = DatastoreReset::new("DocStore", "ws_test")
        .reset(&endpoint)
        .unwrap_err();
    assert!(matches!(err, ResetError::Connect { .. }), "{err}");
}

#[test]
fn workspace_database_initialisation_writes_the_settings_document() {
    let scratch = tempfile::tempdir().unwrap();
    let writer = ConfigWriter::new(scratch.path());
    let (mut handle, endpoint) = start_store(scratch.path(), &writer);

    let session = StoreSession::connect(&endpoint.host_port()).unwrap();
    session.initialize_workspace_db("ws_test", "type_test").unwrap();
    let settings = session.find("ws_test", "settings").unwrap();
    assert_eq!(settings.len(), 1);
    assert_eq!(settings[0]["type_database"], "type_test");

    handle.stop(Duration::from_secs(10)).unwrap();
}
