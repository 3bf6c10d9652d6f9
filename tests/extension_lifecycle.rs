//! Extension lifecycle against the scripted connector

mod support;

use pretty_assertions::assert_eq;

use pgconverge::{ExtensionResource, ExtensionSpec, Resource};
use support::{extension_row, one_row, reconciler, MockConnector, DATABASE, EXTENSION, EXTENSION_EXISTS};

fn hstore(schema: Option<&str>, version: Option<&str>) -> ExtensionSpec {
    ExtensionSpec {
        name: "hstore".into(),
        database: None,
        schema: schema.map(str::to_string),
        version: version.map(str::to_string),
    }
}

#[tokio::test]
async fn create_then_verify() {
    let mock = MockConnector::new();
    mock.after_commit(EXTENSION, extension_row("hstore", "public", "1.8", "1.8"));
    let ctx = reconciler(&mock, "15.3");

    let reconciled = ExtensionResource::create(&ctx, &hstore(Some("public"), None)).await.unwrap();
    assert_eq!(reconciled.id, "app-hstore");
    assert!(reconciled.converged());
    assert_eq!(mock.state().statements(), vec!["CREATE EXTENSION \"hstore\" SCHEMA \"public\""]);
}

#[tokio::test]
async fn update_moves_schema_and_converges_to_default_version() {
    let mock = MockConnector::new();
    mock.answer(DATABASE, one_row());
    mock.answer(EXTENSION, extension_row("hstore", "public", "1.7", "1.8"));
    mock.after_commit(EXTENSION, extension_row("hstore", "extensions", "1.8", "1.8"));
    let ctx = reconciler(&mock, "15.3");

    let current = ExtensionResource::read(&ctx, "app-hstore", None).await.unwrap().unwrap();
    let reconciled =
        ExtensionResource::update(&ctx, "app-hstore", &current, &hstore(Some("extensions"), None)).await.unwrap();
    assert!(reconciled.converged());
    assert_eq!(
        mock.state().statements(),
        vec!["ALTER EXTENSION \"hstore\" SET SCHEMA \"extensions\"", "ALTER EXTENSION \"hstore\" UPDATE TO '1.8'"]
    );
}

#[tokio::test]
async fn pinned_version_is_kept() {
    let mock = MockConnector::new();
    mock.answer(DATABASE, one_row());
    mock.answer(EXTENSION, extension_row("hstore", "public", "1.7", "1.8"));
    let ctx = reconciler(&mock, "15.3");

    let current = ExtensionResource::read(&ctx, "app-hstore", None).await.unwrap().unwrap();
    assert!(ExtensionResource::plan(&ctx, Some(&current), &hstore(None, Some("1.7"))).unwrap().is_empty());
}

#[tokio::test]
async fn rename_requires_replacement() {
    let mock = MockConnector::new();
    mock.answer(DATABASE, one_row());
    mock.answer(EXTENSION, extension_row("hstore", "public", "1.8", "1.8"));
    let ctx = reconciler(&mock, "15.3");

    let current = ExtensionResource::read(&ctx, "app-hstore", None).await.unwrap().unwrap();
    let spec = ExtensionSpec { name: "citext".into(), ..hstore(None, None) };
    let err = ExtensionResource::update(&ctx, "app-hstore", &current, &spec).await.unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
    assert!(err.message().contains("requires replacement"));
    assert!(mock.state().executed.is_empty());
}

#[tokio::test]
async fn exists_checks_database_first() {
    let mock = MockConnector::new();
    mock.answer(EXTENSION_EXISTS, one_row());
    let ctx = reconciler(&mock, "15.3");

    // Database probe comes back empty, so the extension is never looked up
    assert!(!ExtensionResource::exists(&ctx, "analytics-hstore").await.unwrap());
    assert_eq!(mock.state().opened, vec![None]);

    mock.answer(DATABASE, one_row());
    assert!(ExtensionResource::exists(&ctx, "analytics-hstore").await.unwrap());
}

#[tokio::test]
async fn delete_drops_in_target_database() {
    let mock = MockConnector::new();
    let ctx = reconciler(&mock, "15.3");

    ExtensionResource::delete(&ctx, "analytics-hstore", &()).await.unwrap();
    let state = mock.state();
    assert_eq!(state.committed, vec!["DROP EXTENSION \"hstore\""]);
    assert_eq!(state.opened, vec![Some("analytics".to_string())]);
}

#[tokio::test]
async fn unsupported_before_nine_one() {
    let mock = MockConnector::new();
    let ctx = reconciler(&mock, "9.0.23");

    let err = ExtensionResource::create(&ctx, &hstore(None, None)).await.unwrap_err();
    assert_eq!(err.error_code(), "UNSUPPORTED_FEATURE");
    let err = ExtensionResource::delete(&ctx, "app-hstore", &()).await.unwrap_err();
    assert_eq!(err.error_code(), "UNSUPPORTED_FEATURE");
    assert!(mock.state().opened.is_empty());
    assert!(mock.state().executed.is_empty());
}
