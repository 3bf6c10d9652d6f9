//! Schema and policy lifecycle against the scripted connector

mod support;

use pretty_assertions::assert_eq;

use pgconverge::{PolicySpec, Resource, SchemaDropOptions, SchemaResource, SchemaSpec};
use support::{acl_rows, one_row, reconciler, schema_row, MockConnector, DATABASE, SCHEMA, SCHEMA_ACL, SCHEMA_EXISTS};

fn reporting(policies: Vec<PolicySpec>) -> SchemaSpec {
    SchemaSpec { owner: Some("app".into()), policies, ..SchemaSpec::named("reporting") }
}

fn usage(role: &str) -> PolicySpec {
    PolicySpec { role: role.into(), usage: true, ..PolicySpec::default() }
}

#[tokio::test]
async fn create_with_policies() {
    let mock = MockConnector::new();
    mock.after_commit(SCHEMA, schema_row("reporting", "app"));
    mock.after_commit(SCHEMA_ACL, acl_rows(&[("readers", "USAGE", false)]));
    let ctx = reconciler(&mock, "15.3");

    let reconciled = SchemaResource::create(&ctx, &reporting(vec![usage("readers")])).await.unwrap();
    assert_eq!(reconciled.id, "app-reporting");
    assert!(reconciled.converged());
    assert_eq!(
        mock.state().statements(),
        vec![
            "CREATE SCHEMA IF NOT EXISTS \"reporting\" AUTHORIZATION \"app\"",
            "GRANT USAGE ON SCHEMA \"reporting\" TO \"readers\"",
        ]
    );
}

#[tokio::test]
async fn create_without_if_not_exists_support() {
    let mock = MockConnector::new();
    let ctx = reconciler(&mock, "9.2.24");

    let plan = SchemaResource::plan(&ctx, None, &reporting(vec![])).unwrap();
    assert_eq!(plan.redacted(), vec!["CREATE SCHEMA \"reporting\" AUTHORIZATION \"app\""]);
}

#[tokio::test]
async fn create_in_another_database_opens_that_database() {
    let mock = MockConnector::new();
    mock.after_commit(SCHEMA, schema_row("reporting", "app"));
    let ctx = reconciler(&mock, "15.3");
    let spec = SchemaSpec { database: Some("analytics".into()), ..reporting(vec![]) };

    let reconciled = SchemaResource::create(&ctx, &spec).await.unwrap();
    assert_eq!(reconciled.id, "analytics-reporting");
    assert_eq!(reconciled.observed.database, "analytics");
    assert_eq!(mock.state().opened, vec![Some("analytics".to_string())]);
}

#[tokio::test]
async fn duplicate_and_owner_policies_are_normalized() {
    let mock = MockConnector::new();
    let ctx = reconciler(&mock, "15.3");
    let spec = reporting(vec![
        usage("readers"),
        PolicySpec { role: "readers".into(), create: true, ..PolicySpec::default() },
        usage("app"),
    ]);

    let plan = SchemaResource::plan(&ctx, None, &spec).unwrap();
    assert_eq!(
        plan.redacted()[1..],
        [
            "GRANT CREATE ON SCHEMA \"reporting\" TO \"readers\"",
            "GRANT USAGE ON SCHEMA \"reporting\" TO \"readers\"",
        ]
    );
}

#[tokio::test]
async fn update_revokes_before_grants() {
    let mock = MockConnector::new();
    mock.answer(SCHEMA, schema_row("reporting", "app"));
    mock.answer(
        SCHEMA_ACL,
        acl_rows(&[
            ("former", "USAGE", false),
            ("writers", "USAGE", true),
            ("writers", "CREATE", false),
        ]),
    );
    mock.answer(DATABASE, one_row());
    let ctx = reconciler(&mock, "15.3");

    let current = SchemaResource::read(&ctx, "app-reporting", None).await.unwrap().unwrap();
    let spec = reporting(vec![usage("readers"), usage("writers")]);
    let plan = SchemaResource::plan(&ctx, Some(&current), &spec).unwrap();
    assert_eq!(
        plan.redacted(),
        vec![
            "REVOKE ALL ON SCHEMA \"reporting\" FROM \"former\"",
            "REVOKE CREATE ON SCHEMA \"reporting\" FROM \"writers\"",
            "REVOKE USAGE ON SCHEMA \"reporting\" FROM \"writers\"",
            "GRANT USAGE ON SCHEMA \"reporting\" TO \"readers\"",
            "GRANT USAGE ON SCHEMA \"reporting\" TO \"writers\"",
        ]
    );
}

#[tokio::test]
async fn rename_and_owner_change_come_first() {
    let mock = MockConnector::new();
    mock.answer(SCHEMA, schema_row("reports", "postgres"));
    mock.answer(SCHEMA_ACL, acl_rows(&[]));
    mock.answer(DATABASE, one_row());
    mock.after_commit(SCHEMA, schema_row("reporting", "app"));
    let ctx = reconciler(&mock, "15.3");

    let current = SchemaResource::read(&ctx, "app-reports", None).await.unwrap().unwrap();
    let reconciled = SchemaResource::update(&ctx, "app-reports", &current, &reporting(vec![])).await.unwrap();
    assert_eq!(reconciled.id, "app-reporting");
    assert!(reconciled.converged());
    assert_eq!(
        mock.state().statements(),
        vec![
            "ALTER SCHEMA \"reports\" RENAME TO \"reporting\"",
            "ALTER SCHEMA \"reporting\" OWNER TO \"app\"",
        ]
    );
}

#[tokio::test]
async fn moving_between_databases_requires_replacement() {
    let mock = MockConnector::new();
    mock.answer(SCHEMA, schema_row("reporting", "app"));
    mock.answer(DATABASE, one_row());
    let ctx = reconciler(&mock, "15.3");

    let current = SchemaResource::read(&ctx, "app-reporting", None).await.unwrap().unwrap();
    let spec = SchemaSpec { database: Some("analytics".into()), ..reporting(vec![]) };
    let err = SchemaResource::update(&ctx, "app-reporting", &current, &spec).await.unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
    assert!(mock.state().executed.is_empty());
}

#[tokio::test]
async fn missing_database_reads_as_absent() {
    let mock = MockConnector::new();
    mock.answer(SCHEMA, schema_row("reporting", "app"));
    let ctx = reconciler(&mock, "15.3");

    assert!(SchemaResource::read(&ctx, "ghost-reporting", None).await.unwrap().is_none());
    assert!(!SchemaResource::exists(&ctx, "ghost-reporting").await.unwrap());
    // Only the default database was ever contacted
    assert!(mock.state().opened.iter().all(Option::is_none));
}

#[tokio::test]
async fn exists_checks_database_then_schema() {
    let mock = MockConnector::new();
    mock.answer(DATABASE, one_row());
    mock.answer(SCHEMA_EXISTS, one_row());
    let ctx = reconciler(&mock, "15.3");

    assert!(SchemaResource::exists(&ctx, "analytics-reporting").await.unwrap());
    assert_eq!(mock.state().opened, vec![None, Some("analytics".to_string())]);
}

#[tokio::test]
async fn delete_restricts_unless_cascading() {
    let mock = MockConnector::new();
    let ctx = reconciler(&mock, "15.3");

    SchemaResource::delete(&ctx, "app-reporting", &SchemaDropOptions::default()).await.unwrap();
    SchemaResource::delete(&ctx, "app-reporting", &SchemaDropOptions { cascade: true }).await.unwrap();
    assert_eq!(
        mock.state().committed,
        vec!["DROP SCHEMA \"reporting\" RESTRICT", "DROP SCHEMA \"reporting\" CASCADE"]
    );
}

#[tokio::test]
async fn malformed_identity_is_rejected() {
    let mock = MockConnector::new();
    let ctx = reconciler(&mock, "15.3");

    let err = SchemaResource::read(&ctx, "reporting", None).await.unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
    assert!(mock.state().opened.is_empty());
}
