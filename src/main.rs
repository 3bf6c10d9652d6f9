//! pgconverge CLI Entry Point
//!
//! Subcommands:
//! - `connect` - validate and save a connection profile
//! - `plan` - show the statements a desired-state document would run
//! - `apply` - converge every object in a desired-state document
//! - `read` - read one object's observed state
//! - `delete` - delete one object
//! - `schema` - print the JSON Schema of the desired-state document
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use pgconverge::config::{self, ConfigLocation, DesiredState, StoredConnection};
use pgconverge::engine::postgres::PostgresConnector;
use pgconverge::{
    apply_state, plan_state, ConnectionConfig, DefaultPrivilegesResource, ErrorEnvelope, ErrorInfo,
    ExtensionResource, Metadata, ReconcileError, Reconciler, Resource, RoleDropOptions, RoleResource,
    SchemaDropOptions, SchemaResource, SuccessEnvelope,
};

/// pgconverge - declarative PostgreSQL access-control reconciliation
#[derive(Parser)]
#[command(name = "pgconverge")]
#[command(about = "Converge PostgreSQL roles, schema policies, default privileges and extensions")]
#[command(version)]
struct Cli {
    /// Log at debug level on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a connection and save it as a named profile
    Connect {
        /// Profile name
        #[arg(long, default_value = "default")]
        name: String,

        #[arg(long, default_value = "localhost")]
        host: String,

        #[arg(long, default_value_t = 5432)]
        port: u16,

        #[arg(long)]
        user: String,

        /// Default database, also used for role operations
        #[arg(long, default_value = "postgres")]
        database: String,

        /// Environment variable holding the password (stored instead of the password)
        #[arg(long)]
        password_env: Option<String>,

        /// Mark the profile read-only
        #[arg(long)]
        readonly: bool,

        /// Save to the per-user config instead of `.pgconverge/`
        #[arg(long)]
        global: bool,
    },

    /// Show the statements needed to converge a desired-state document
    Plan {
        #[command(flatten)]
        target: Target,

        /// Desired-state JSON document
        #[arg(long, short)]
        file: PathBuf,
    },

    /// Converge every object in a desired-state document
    Apply {
        #[command(flatten)]
        target: Target,

        #[arg(long, short)]
        file: PathBuf,
    },

    /// Read one object's observed state
    Read {
        #[command(flatten)]
        target: Target,

        #[arg(value_enum)]
        kind: Kind,

        /// Object identity, e.g. `app`, `app-reporting`
        id: String,
    },

    /// Delete one object
    Delete {
        #[command(flatten)]
        target: Target,

        #[arg(value_enum)]
        kind: Kind,

        id: String,

        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,

        /// Schemas: drop contained objects too
        #[arg(long)]
        cascade: bool,

        /// Roles: keep owned objects where they are
        #[arg(long)]
        skip_reassign_owned: bool,

        /// Roles: reassign and drop owned objects but keep the role
        #[arg(long)]
        skip_drop_role: bool,
    },

    /// Print the JSON Schema of the desired-state document
    Schema,
}

/// Which server to talk to
#[derive(Args)]
struct Target {
    /// Connection profile, the project's default when unset
    #[arg(long)]
    profile: Option<String>,

    /// Reject catalog mutations regardless of the profile
    #[arg(long)]
    readonly: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Role,
    Schema,
    DefaultPrivileges,
    Extension,
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Plan { .. } => "plan",
            Self::Apply { .. } => "apply",
            Self::Read { .. } => "read",
            Self::Delete { .. } => "delete",
            Self::Schema => "schema",
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init().ok();
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => println!(r#"{{"ok":false,"error":{{"code":"INTERNAL_ERROR","message":"{e}"}}}}"#),
    }
}

fn error_envelope(command: &str, err: &anyhow::Error) -> ErrorEnvelope {
    match err.downcast_ref::<ReconcileError>() {
        Some(reconcile) => ErrorEnvelope::from_error(command, reconcile),
        None => ErrorEnvelope::new(command, ErrorInfo::new("CLI_ERROR", format!("{err:#}"))),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let command = cli.command.name();
    let started = Instant::now();
    match run(cli.command).await {
        Ok((data, applied)) => {
            let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            let meta = match applied {
                Some(n) => Metadata::with_statements(elapsed, n),
                None => Metadata::new(elapsed),
            };
            print_json(&SuccessEnvelope::new(command, data, meta));
        }
        Err(err) => {
            print_json(&error_envelope(command, &err));
            std::process::exit(1);
        }
    }
}

/// Returns the envelope payload and, for mutations, the statement count
async fn run(command: Commands) -> anyhow::Result<(Value, Option<usize>)> {
    match command {
        Commands::Connect { name, host, port, user, database, password_env, readonly, global } => {
            let mut stored = StoredConnection::new(ConnectionConfig::postgres(host, port, user, None, database));
            stored.password_env = password_env;
            stored.readonly = readonly.then_some(true);

            let (mut resolved, _) = stored.resolve()?;
            if resolved.password.is_none() {
                let password = dialoguer::Password::new()
                    .with_prompt("Password")
                    .allow_empty_password(true)
                    .interact()
                    .context("could not read password")?;
                resolved.password = Some(password);
            }

            let ctx = Reconciler::connect(PostgresConnector::new(resolved)).await?;
            let location = if global { ConfigLocation::Global } else { ConfigLocation::Local };
            let path = config::save_connection(&name, stored, location)?;
            Ok((json!({ "profile": name, "saved_to": path, "server": ctx.server() }), None))
        }

        Commands::Plan { target, file } => {
            let desired = DesiredState::load(&file)?;
            let ctx = open(&target).await?;
            let changes = plan_state(&ctx, &desired).await?;
            Ok((json!({ "converged": changes.is_empty(), "changes": changes }), None))
        }

        Commands::Apply { target, file } => {
            let desired = DesiredState::load(&file)?;
            let ctx = open(&target).await?;
            let results = apply_state(&ctx, &desired).await?;
            let applied = results.iter().map(|r| r.applied).sum();
            let converged = results.iter().all(|r| r.drift.is_empty());
            Ok((json!({ "converged": converged, "results": results }), Some(applied)))
        }

        Commands::Read { target, kind, id } => {
            let ctx = open(&target).await?;
            let observed = match kind {
                Kind::Role => to_json(RoleResource::read(&ctx, &id, None).await?)?,
                Kind::Schema => to_json(SchemaResource::read(&ctx, &id, None).await?)?,
                Kind::DefaultPrivileges => to_json(DefaultPrivilegesResource::read(&ctx, &id, None).await?)?,
                Kind::Extension => to_json(ExtensionResource::read(&ctx, &id, None).await?)?,
            };
            Ok((json!({ "id": id, "exists": !observed.is_null(), "observed": observed }), None))
        }

        Commands::Delete { target, kind, id, yes, cascade, skip_reassign_owned, skip_drop_role } => {
            let ctx = open(&target).await?;
            ctx.ensure_writable()?;
            if !yes {
                let confirmed = dialoguer::Confirm::new()
                    .with_prompt(format!("Delete {kind:?} '{id}'?"))
                    .default(false)
                    .interact()
                    .context("could not read confirmation")?;
                if !confirmed {
                    return Ok((json!({ "id": id, "deleted": false }), Some(0)));
                }
            }

            match kind {
                Kind::Role => {
                    let options = RoleDropOptions { skip_reassign_owned, skip_drop_role };
                    RoleResource::delete(&ctx, &id, &options).await?;
                }
                Kind::Schema => SchemaResource::delete(&ctx, &id, &SchemaDropOptions { cascade }).await?,
                Kind::DefaultPrivileges => DefaultPrivilegesResource::delete(&ctx, &id, &()).await?,
                Kind::Extension => ExtensionResource::delete(&ctx, &id, &()).await?,
            }
            Ok((json!({ "id": id, "deleted": true }), None))
        }

        Commands::Schema => Ok((serde_json::to_value(DesiredState::json_schema())?, None)),
    }
}

async fn open(target: &Target) -> anyhow::Result<Reconciler<PostgresConnector>> {
    let (config, readonly) = config::resolve_connection(target.profile.as_deref())?;
    let ctx = Reconciler::connect(PostgresConnector::new(config)).await?;
    Ok(ctx.readonly(readonly || target.readonly))
}

fn to_json<T: Serialize>(value: Option<T>) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(value)?)
}
