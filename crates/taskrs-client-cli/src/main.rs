//! taskrs - command-line administration client for a taskrs server.
//!
//! Keeps a persistent session (login, refresh, logout) and exposes the user,
//! category and permission endpoints. Results are printed as JSON on stdout;
//! logs go to stderr and optionally to a file.

mod cli;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use taskrs_client_core::auth::Navigator;
use taskrs_client_core::models::{Category, User};
use taskrs_client_core::{ApiClient, Config, SessionManager, SessionState};

use cli::{CategoriesCommand, Cli, Command, PermissionsCommand, UsersCommand};

/// Environment variable holding the login password, skips the prompt
const ENV_PASSWORD: &str = "TASKRS_PASSWORD";

/// Environment variable holding the password for `users create`
const ENV_NEW_PASSWORD: &str = "TASKRS_NEW_PASSWORD";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the log file and must live until exit.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Invalid log file path {}", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn state_name(state: SessionState) -> &'static str {
    match state {
        SessionState::NoSession => "none",
        SessionState::Active => "active",
        SessionState::Expired => "expired",
    }
}

fn print_status(manager: &SessionManager) -> Result<()> {
    let expiry = manager.access_token_expiration();
    print_json(&json!({
        "state": state_name(manager.state()),
        "expiresAt": expiry,
        "secondsRemaining": expiry.map(|e| (e - chrono::Utc::now()).num_seconds().max(0)),
    }))
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var(ENV_PASSWORD) {
        return Ok(password);
    }
    rpassword::prompt_password("Password: ").context("Failed to read password")
}

/// Password for a new account, from the environment or prompted twice.
/// The server stores whatever it gets, so empty or mismatched input is refused.
fn new_user_password(
    from_env: Option<String>,
    prompt: impl FnOnce() -> Result<(String, String)>,
) -> Result<String> {
    let password = match from_env {
        Some(password) => password,
        None => {
            let (password, confirmation) = prompt()?;
            if password != confirmation {
                bail!("Passwords do not match");
            }
            password
        }
    };
    if password.is_empty() {
        bail!("The new user's password must not be empty");
    }
    Ok(password)
}

fn prompt_new_password() -> Result<(String, String)> {
    let password = rpassword::prompt_password("New user's password: ")
        .context("Failed to read password")?;
    let confirmation =
        rpassword::prompt_password("Repeat password: ").context("Failed to read password")?;
    Ok((password, confirmation))
}

/// Refresh an expired session before an API call so the call carries a
/// valid token.
async fn ensure_fresh(manager: &SessionManager) -> Result<()> {
    match manager.state() {
        SessionState::NoSession => bail!("Not logged in. Run `taskrs login` first."),
        SessionState::Expired => {
            manager.refresh().await.context("Session expired and could not be renewed")?;
        }
        SessionState::Active => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;

    let mut config = Config::load()?;
    if let Some(ref url) = cli.base_url {
        config.base_url = url.clone();
    }

    let navigator: Arc<dyn Navigator> = Arc::new(|| {
        eprintln!("Session is no longer valid. Run `taskrs login` to sign in again.");
    });
    let store = config.session_store()?;
    // `watch` is the only long-lived command; it renews straight away
    let eager_refresh = matches!(cli.command, Command::Watch);
    let manager = config.session_manager(store, navigator, eager_refresh)?;

    match cli.command {
        Command::Login { email } => {
            let email = match email.or_else(|| config.last_email.clone()) {
                Some(email) => email,
                None => bail!("No email given. Use --email."),
            };
            let password = read_password()?;
            manager.login(&email, &password).await.context("Login failed")?;
            // Renewal is of no use to a one-shot command
            manager.cancel_renewal();

            // Only the email is persisted; overrides from flags and env stay one-off
            Config::save_last_email(&email)?;
            print_status(&manager)?;
        }
        Command::Logout => {
            manager.logout().await.context("Logout failed on the server")?;
            print_json(&json!({ "state": state_name(manager.state()) }))?;
        }
        Command::Status => print_status(&manager)?,
        Command::Refresh => {
            manager.refresh().await.context("Refresh failed")?;
            manager.cancel_renewal();
            print_status(&manager)?;
        }
        Command::Watch => watch(&manager).await?,
        Command::Users(command) => {
            ensure_fresh(&manager).await?;
            users(manager.api(), command).await?;
        }
        Command::Categories(command) => {
            ensure_fresh(&manager).await?;
            categories(manager.api(), command).await?;
        }
        Command::Permissions(command) => {
            ensure_fresh(&manager).await?;
            permissions(manager.api(), command).await?;
        }
    }

    Ok(())
}

async fn watch(manager: &SessionManager) -> Result<()> {
    if manager.state() == SessionState::NoSession {
        bail!("Not logged in. Run `taskrs login` first.");
    }
    info!("Watching session, press Ctrl-C to stop");
    eprintln!("Keeping the session alive. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;

    manager.cancel_renewal();
    info!("Stopped watching session");
    print_status(manager)
}

async fn users(api: &ApiClient, command: UsersCommand) -> Result<()> {
    match command {
        UsersCommand::List(args) => print_json(&api.all_users(Some(&args.to_filter())).await?),
        UsersCommand::Create {
            email,
            first_name,
            last_name,
            deactivated,
        } => {
            let password =
                new_user_password(std::env::var(ENV_NEW_PASSWORD).ok(), prompt_new_password)?;
            let user = User {
                email,
                password,
                first_name,
                last_name,
                activated: !deactivated,
                ..Default::default()
            };
            print_json(&api.create_user(&user).await?)
        }
        UsersCommand::Update {
            id,
            email,
            first_name,
            last_name,
            deactivated,
        } => {
            let user = User {
                id,
                email,
                first_name,
                last_name,
                activated: !deactivated,
                ..Default::default()
            };
            print_json(&api.update_user(&user).await?)
        }
        UsersCommand::Delete { id } => {
            api.delete_user(id).await?;
            print_json(&json!({ "deleted": id }))
        }
    }
}

async fn categories(api: &ApiClient, command: CategoriesCommand) -> Result<()> {
    match command {
        CategoriesCommand::List(args) => {
            print_json(&api.all_categories(Some(&args.to_filter())).await?)
        }
        CategoriesCommand::Sub { id } => print_json(&api.sub_categories(id).await?),
        CategoriesCommand::Create { name, parent } => {
            let category = Category {
                name,
                parent_category_id: parent,
                ..Default::default()
            };
            print_json(&api.create_category(&category).await?)
        }
        CategoriesCommand::Update { id, name, parent } => {
            let category = Category {
                id,
                name,
                parent_category_id: parent,
                ..Default::default()
            };
            print_json(&api.update_category(&category).await?)
        }
        CategoriesCommand::Delete { id, cascade } => {
            api.delete_category(id, Some(cascade)).await?;
            print_json(&json!({ "deleted": id, "cascade": cascade }))
        }
    }
}

async fn permissions(api: &ApiClient, command: PermissionsCommand) -> Result<()> {
    let (action, args) = match command {
        PermissionsCommand::List(args) => {
            return print_json(&api.all_permissions(Some(&args.to_filter())).await?);
        }
        PermissionsCommand::Grant(args) => {
            api.grant_permissions(args.user_id, &args.permission_ids).await?;
            ("granted", args)
        }
        PermissionsCommand::Revoke(args) => {
            api.revoke_permissions(args.user_id, &args.permission_ids).await?;
            ("revoked", args)
        }
        PermissionsCommand::Set(args) => {
            api.set_user_permissions(args.user_id, &args.permission_ids).await?;
            ("set", args)
        }
    };
    print_json(&json!({
        "userId": args.user_id,
        "permissionIds": args.permission_ids,
        "action": action,
    }))
}
