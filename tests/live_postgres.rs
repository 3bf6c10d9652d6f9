//! Lifecycle tests against a real server
//!
//! Connection comes from `PGHOST`, `PGPORT`, `PGUSER`, `PGPASSWORD` and
//! `PGDATABASE`; the user must be allowed to create roles and schemas.

#![cfg(feature = "postgres")]

use pgconverge::engine::postgres::PostgresConnector;
use pgconverge::{
    ConnectionConfig, PolicySpec, Reconciler, Resource, RoleDropOptions, RoleResource, RoleSpec, SchemaDropOptions,
    SchemaResource, SchemaSpec,
};

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

async fn connect() -> Reconciler<PostgresConnector> {
    let config = ConnectionConfig::postgres(
        env_or("PGHOST", "localhost"),
        env_or("PGPORT", "5432").parse().unwrap(),
        env_or("PGUSER", "postgres"),
        std::env::var("PGPASSWORD").ok(),
        env_or("PGDATABASE", "postgres"),
    );
    Reconciler::connect(PostgresConnector::new(config)).await.unwrap()
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL instance"]
async fn role_create_update_delete() {
    let ctx = connect().await;
    let name = "pgconverge_live_role";
    let options = RoleDropOptions::default();
    if RoleResource::exists(&ctx, name).await.unwrap() {
        RoleResource::delete(&ctx, name, &options).await.unwrap();
    }

    let spec = RoleSpec {
        login: true,
        connection_limit: 5,
        password: Some("it's a \\ secret".into()),
        valid_until: "2099-01-01T00:00:00+00:00".into(),
        ..RoleSpec::named(name)
    };
    let created = RoleResource::create(&ctx, &spec).await.unwrap();
    assert!(created.converged(), "{:?}", created.drift);

    let current = RoleResource::read(&ctx, name, Some(&spec)).await.unwrap().unwrap();
    assert!(RoleResource::plan(&ctx, Some(&current), &spec).unwrap().is_empty());

    let narrower = RoleSpec { login: false, connection_limit: -1, ..spec.clone() };
    let updated = RoleResource::update(&ctx, name, &current, &narrower).await.unwrap();
    assert!(updated.converged(), "{:?}", updated.drift);
    assert!(!updated.observed.login);

    RoleResource::delete(&ctx, name, &options).await.unwrap();
    assert!(!RoleResource::exists(&ctx, name).await.unwrap());
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL instance"]
async fn schema_policies_converge() {
    let ctx = connect().await;
    let grantee = "pgconverge_live_reader";
    let schema = SchemaSpec {
        policies: vec![PolicySpec { role: grantee.into(), usage_with_grant: true, ..PolicySpec::default() }],
        ..SchemaSpec::named("pgconverge_live_schema")
    };
    let id = SchemaResource::identity(&ctx, &schema).unwrap();

    if SchemaResource::exists(&ctx, &id).await.unwrap() {
        SchemaResource::delete(&ctx, &id, &SchemaDropOptions { cascade: true }).await.unwrap();
    }
    if !RoleResource::exists(&ctx, grantee).await.unwrap() {
        RoleResource::create(&ctx, &RoleSpec::named(grantee)).await.unwrap();
    }

    let created = SchemaResource::create(&ctx, &schema).await.unwrap();
    assert!(created.converged(), "{:?}", created.drift);

    let narrowed = SchemaSpec {
        policies: vec![PolicySpec { role: grantee.into(), usage: true, ..PolicySpec::default() }],
        ..schema.clone()
    };
    let updated = SchemaResource::update(&ctx, &id, &created.observed, &narrowed).await.unwrap();
    assert!(updated.converged(), "{:?}", updated.drift);

    SchemaResource::delete(&ctx, &id, &SchemaDropOptions::default()).await.unwrap();
    RoleResource::delete(&ctx, grantee, &RoleDropOptions::default()).await.unwrap();
}
