//! # netherlink
//!
//! Relay binary: runs the WebSocket server and offers a few administrative
//! commands against the same database and token settings.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use netherlink_auth::JwtAuth;
use netherlink_core::ids::{GroupId, UserId};
use netherlink_core::models::GroupRole;
use netherlink_server::metrics::install_recorder;
use netherlink_server::{RelayServer, ServerConfig};
use netherlink_settings::RelaySettings;
use netherlink_store::SqliteStore;
use netherlink_telemetry::{init_telemetry, TelemetryConfig};

/// NetherLink presence and message relay.
#[derive(Parser, Debug)]
#[command(name = "netherlink", about = "NetherLink presence and message relay")]
struct Cli {
    /// Settings file (defaults to `~/.netherlink/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, 0 for auto-assign (overrides settings).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print a signed login token for a user.
    Token {
        #[arg(long)]
        uid: String,
    },
    /// Manage users.
    #[command(subcommand)]
    User(UserCommand),
    /// Manage groups.
    #[command(subcommand)]
    Group(GroupCommand),
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Register a user profile.
    Add {
        #[arg(long)]
        uid: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        avatar: String,
    },
}

#[derive(Subcommand, Debug)]
enum GroupCommand {
    /// Create a group owned by an existing user.
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = "")]
        avatar: String,
    },
    /// Add a user to a group with the given role.
    AddMember {
        #[arg(long)]
        group: i64,
        #[arg(long)]
        uid: String,
        #[arg(long, default_value = "member", value_parser = parse_role)]
        role: GroupRole,
    },
}

fn parse_role(s: &str) -> Result<GroupRole, String> {
    s.parse()
}

fn load_settings(path: Option<&Path>) -> Result<RelaySettings> {
    let settings = match path {
        Some(path) => netherlink_settings::load_settings_from_path(path),
        None => netherlink_settings::load_settings(),
    };
    settings.context("Failed to load settings")
}

fn open_store(settings: &RelaySettings) -> Result<SqliteStore> {
    let path = &settings.database.path;
    SqliteStore::open(path).with_context(|| format!("Failed to open database: {}", path.display()))
}

fn jwt_auth(settings: &RelaySettings) -> JwtAuth {
    JwtAuth::new(
        &settings.jwt.secret,
        &settings.jwt.issuer,
        Duration::from_secs(settings.jwt.expire_secs),
    )
}

async fn serve(settings: RelaySettings, host: Option<String>, port: Option<u16>) -> Result<()> {
    if settings.jwt.uses_dev_secret() {
        warn!("using the built-in development JWT secret; set NETHERLINK_JWT__SECRET in production");
    }

    let store = open_store(&settings)?;
    let auth = jwt_auth(&settings);

    let mut config = ServerConfig::from(&settings.server);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let metrics = install_recorder().context("Failed to install metrics recorder")?;
    let handle = RelayServer::new(config, Arc::new(store), Arc::new(auth))
        .with_metrics(metrics)
        .start()
        .await
        .context("Failed to start server")?;

    info!(port = handle.port, "netherlink relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn issue_token(settings: &RelaySettings, uid: &str) -> Result<String> {
    jwt_auth(settings)
        .issue(&UserId::from_raw(uid))
        .context("Failed to sign token")
}

fn run_user(settings: &RelaySettings, command: UserCommand) -> Result<String> {
    let store = open_store(settings)?;
    match command {
        UserCommand::Add { uid, name, avatar } => {
            let user = store
                .create_user(&UserId::from_raw(uid), &name, &avatar)
                .context("Failed to create user")?;
            Ok(format!("created user {} ({})", user.uid, user.name))
        }
    }
}

fn run_group(settings: &RelaySettings, command: GroupCommand) -> Result<String> {
    let store = open_store(settings)?;
    match command {
        GroupCommand::Create {
            name,
            owner,
            avatar,
        } => {
            let group = store
                .create_group(&name, &UserId::from_raw(owner), &avatar)
                .context("Failed to create group")?;
            Ok(format!("created group {} ({})", group.id, group.name))
        }
        GroupCommand::AddMember { group, uid, role } => {
            let membership = store
                .add_member(GroupId(group), &UserId::from_raw(uid), role)
                .context("Failed to add member")?;
            Ok(format!(
                "added {} to group {} as {}",
                membership.user_id, membership.group_id, membership.role
            ))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Settings first: the log level comes from them.
    let settings = load_settings(args.config.as_deref())?;
    let telemetry = TelemetryConfig::from_level_str(&settings.logging.level, settings.logging.json)
        .context("Invalid logging settings")?;
    init_telemetry(&telemetry).context("Failed to initialize logging")?;

    match args.command {
        Command::Serve { host, port } => serve(settings, host, port).await,
        Command::Token { uid } => {
            println!("{}", issue_token(&settings, &uid)?);
            Ok(())
        }
        Command::User(command) => {
            println!("{}", run_user(&settings, command)?);
            Ok(())
        }
        Command::Group(command) => {
            println!("{}", run_group(&settings, command)?);
            Ok(())
        }
    }
}
