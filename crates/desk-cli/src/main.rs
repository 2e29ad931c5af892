use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use desk_proto::{ProfileUpdate, Role};
use desk_session::{
    open_controller, paths, AccessDecision, AccessGate, AuthSessionController, SessionSettings,
    SessionState,
};

const DEFAULT_LOG_FILTER: &str = "desk_cli=info,desk_session=info,desk_store=info";
const PASSWORD_ENV: &str = "DESKLINE_PASSWORD";

#[derive(Parser, Debug)]
#[command(name = "desk", author, version, about = "Deskline session client", long_about = None)]
struct Cli {
    /// Override the data directory (settings and session store)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in and store the session
    Login {
        #[arg(long)]
        email: String,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Sign out and clear the stored session
    Logout,
    /// Show the session state and token expiry
    Status,
    /// Renew the access token now
    Refresh,
    /// Print the signed-in user
    Whoami,
    /// Change profile fields of the signed-in user
    UpdateProfile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        avatar: Option<String>,
    },
    /// Check whether the signed-in user may open a route
    CanAccess {
        /// Roles allowed through; none means the route is public
        #[arg(long = "role")]
        roles: Vec<String>,
    },
    /// Keep the session alive with background refresh until Ctrl-C
    Watch,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data = match cli.data_dir {
        Some(dir) => dir,
        None => paths::data_dir()?,
    };
    let mut settings = SessionSettings::load(&data)?;
    settings.apply_env();

    let controller = open_controller(&settings, &data)?;
    controller.init().await;

    match cli.command {
        Commands::Login { email, password } => login_command(&controller, &email, password).await,
        Commands::Logout => {
            controller.logout();
            println!("Signed out");
            Ok(())
        }
        Commands::Status => status_command(&controller),
        Commands::Refresh => {
            if !controller.repository().has_token() {
                return Err(anyhow!("not signed in"));
            }
            if controller.refresh().await {
                status_command(&controller)
            } else {
                Err(anyhow!("refresh failed; session ended"))
            }
        }
        Commands::Whoami => match controller.current_user() {
            Some(user) => {
                println!("{}", serde_json::to_string_pretty(&user)?);
                Ok(())
            }
            None => Err(anyhow!("not signed in")),
        },
        Commands::UpdateProfile { name, avatar } => {
            let update = ProfileUpdate {
                name,
                avatar,
                ..ProfileUpdate::default()
            };
            if update.is_empty() {
                return Err(anyhow!("nothing to update; pass --name or --avatar"));
            }
            if !controller.update_profile(update) {
                return Err(anyhow!("profile update failed (not signed in or store unavailable)"));
            }
            println!("{}", serde_json::to_string_pretty(&controller.current_user())?);
            Ok(())
        }
        Commands::CanAccess { roles } => {
            let gate = AccessGate::roles(roles.iter().map(|r| Role::parse(r)));
            let decision = gate.decide_for(&controller.snapshot());
            match decision {
                AccessDecision::Allow => println!("allow"),
                AccessDecision::RedirectTo(path) => println!("redirect {path}"),
                AccessDecision::Pending => println!("pending"),
            }
            Ok(())
        }
        Commands::Watch => watch_command(&controller).await,
    }
}

async fn login_command(
    controller: &AuthSessionController,
    email: &str,
    password: Option<String>,
) -> Result<()> {
    let password = Zeroizing::new(match password {
        Some(pw) => pw,
        None => prompt_password()?,
    });
    let user = controller.login(email, &password).await?;
    println!("Signed in as {} ({})", user.name, user.role);
    Ok(())
}

fn prompt_password() -> Result<String> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(pw);
        }
    }
    rpassword::prompt_password("Password: ").map_err(|e| anyhow!("password prompt: {e}"))
}

fn status_command(controller: &AuthSessionController) -> Result<()> {
    let state = controller.snapshot();
    let repo = controller.repository();
    let expires_at = state
        .token()
        .and_then(|t| Utc.timestamp_millis_opt(t.expires_at).single())
        .map(|t| t.to_rfc3339());
    let status = json!({
        "state": state.label(),
        "email": state.user().map(|u| u.email.clone()),
        "role": state.user().map(|u| u.role.as_str()),
        "expiresAt": expires_at,
        "expiresInSecs": repo.millis_until_expiry().map(|ms| ms / 1000),
        "needsRefresh": repo.needs_refresh(),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn watch_command(controller: &AuthSessionController) -> Result<()> {
    let mut updates = controller.subscribe();
    if !updates.borrow_and_update().is_authenticated() {
        return Err(anyhow!("not signed in"));
    }
    info!("watching session; Ctrl-C to stop");

    loop {
        tokio::select! {
            res = signal::ctrl_c() => {
                res?;
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                print_transition(&state);
                if matches!(state, SessionState::Unauthenticated) {
                    break;
                }
            }
        }
    }

    controller.shutdown();
    info!("watch stopped");
    Ok(())
}

fn print_transition(state: &SessionState) {
    match state {
        SessionState::Authenticated { user, token } => {
            let expiry = Utc
                .timestamp_millis_opt(token.expires_at)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| token.expires_at.to_string());
            println!("{} authenticated as {} until {}", Utc::now().to_rfc3339(), user.email, expiry);
        }
        other => println!("{} {}", Utc::now().to_rfc3339(), other.label()),
    }
}
