use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mbee::auth::{generate_password, hash_password};
use mbee::config::Config;
use mbee::controllers::DEFAULT_ORG;
use mbee::server::{AppState, create_router};
use mbee::store::{SqliteStore, Store};
use mbee::types::{Metadata, Org, Permissions, Role, User};
use mbee::validators::{validate_password, validate_username};

const PASSWORD_FILE: &str = ".admin_password";

#[cfg(unix)]
fn set_restrictive_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to set permissions on {}: {e}", path.display());
    }
}

#[derive(Parser)]
#[command(name = "mbee")]
#[command(about = "A model-based engineering data server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the server
    Serve {
        /// Host to bind to (overrides mbee.toml)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides mbee.toml)
        #[arg(long, short)]
        port: Option<u16>,

        /// Data directory for the database, config file and blobs
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Initialize the server (create the database, default org and admin user)
    Init {
        /// Data directory for the database, config file and blobs
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,

        /// Admin username
        #[arg(long, default_value = "admin")]
        username: String,

        /// Skip interactive prompts and generate the admin password
        #[arg(long)]
        non_interactive: bool,
    },
}

fn prompt_password() -> anyhow::Result<Option<String>> {
    let choose = inquire::Confirm::new("Would you like to choose the admin password?")
        .with_default(false)
        .prompt()?;
    if !choose {
        return Ok(None);
    }

    let password = inquire::Password::new("Password:")
        .with_validator(|input: &str| match validate_password(input) {
            Ok(()) => Ok(inquire::validator::Validation::Valid),
            Err(e) => Ok(inquire::validator::Validation::Invalid(e.to_string().into())),
        })
        .prompt()?;
    Ok(Some(password))
}

fn run_init(data_dir: &Path, username: &str, non_interactive: bool) -> anyhow::Result<()> {
    fs::create_dir_all(data_dir)?;
    validate_username(username)?;

    let config = Config::load(data_dir)?;
    let store = SqliteStore::new(config.server.db_path())?;
    store.initialize()?;

    if store.has_admin_user()? {
        bail!(
            "Server already initialized. Database exists at: {}",
            config.server.db_path().display()
        );
    }

    let chosen = if non_interactive {
        None
    } else {
        prompt_password()?
    };
    let generated = chosen.is_none();
    let password = chosen.unwrap_or_else(generate_password);

    let admin = User {
        username: username.to_string(),
        admin: true,
        password_hash: hash_password(&password)?,
        fname: None,
        lname: None,
        email: None,
        custom: json!({}),
        meta: Metadata::new(None),
    };
    store.create_user(&admin)?;

    if store.get_org(DEFAULT_ORG)?.is_none() {
        store.create_org(&Org {
            id: DEFAULT_ORG.to_string(),
            name: "Default Org".to_string(),
            permissions: Permissions::from([(username, Role::Admin)]),
            custom: json!({}),
            meta: Metadata::new(Some(username)),
        })?;
    }

    println!();
    println!("========================================");
    println!("Created admin user '{username}' and the '{DEFAULT_ORG}' org.");
    if generated {
        let password_file = data_dir.join(PASSWORD_FILE);
        fs::write(&password_file, &password)?;

        #[cfg(unix)]
        set_restrictive_permissions(&password_file);

        println!("Admin password (save this, it won't be shown again):");
        println!();
        println!("  {password}");
        println!();
        println!("Password also written to: {}", password_file.display());
    }
    println!("========================================");
    println!();

    Ok(())
}

async fn run_serve(data_dir: &Path, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = Config::load(data_dir)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let db_path = config.server.db_path();
    if !db_path.exists() {
        bail!("Server not initialized. Run 'mbee admin init' first to create the database and admin user.");
    }
    let store = SqliteStore::new(&db_path)?;
    store.initialize()?;
    if !store.has_admin_user()? {
        bail!("Server not initialized. Run 'mbee admin init' first to create the database and admin user.");
    }

    let artifacts = mbee::artifact::from_config(&config).await?;
    info!(strategy = artifacts.name(), "Artifact storage ready");

    let addr = config.server.socket_addr()?;
    let state = Arc::new(AppState::new(Arc::new(store), artifacts, config)?);
    let app = create_router(state);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mbee=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init {
                data_dir,
                username,
                non_interactive,
            } => run_init(&data_dir, &username, non_interactive)?,
        },
        Commands::Serve {
            host,
            port,
            data_dir,
        } => run_serve(&data_dir, host, port).await?,
    }

    Ok(())
}
