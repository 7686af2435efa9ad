//! OAuth Pen administration CLI.
//!
//! Offline helpers for operating the provider core:
//!
//! - `new-client`: validate and print a freshly generated client application
//! - `session-hash`: print the configured administrator's session fingerprint
//! - `check-redirect`: evaluate a redirect URI against an allow-list
//! - `demo`: run a password grant and a refresh against an in-memory store,
//!   with the janitor running in the background
//!
//! ## Usage Examples
//!
//! ```bash
//! oauth-pen-admin new-client --name "My Client" \
//!   --grant-type authorization-code \
//!   --redirect-uri "https://localhost:3000/callback"
//!
//! SECRET_KEY=... ADMIN_PASSWORD=... oauth-pen-admin session-hash
//!
//! oauth-pen-admin check-redirect \
//!   --allowed "https://a.com/cb?x=1" "https://a.com/cb?x=1&y=2"
//! ```

use anyhow::Result;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use oauth_pen::{
    config::Config,
    janitor::Janitor,
    oauth::{
        AuthorizationGrantType, AuthorizationServer, ClientAuthentication, ClientRegistry,
        ClientType, GrantType, HmacPasswordHasher, NewApplication, PasswordManager,
        RandomTokenGenerator, SuperUser, SystemClock, TokenRequest, redirect_uri_allowed,
        identity::SUPER_USER_ID,
    },
    storage::MemoryOAuthStorage,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::prelude::*;

/// Main CLI application structure
#[derive(Parser)]
#[command(
    name = "oauth-pen-admin",
    about = "OAuth Pen administration CLI",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value = "json-pretty")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Compact JSON output
    Json,
    /// Pretty-printed JSON output
    JsonPretty,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Validate and print a new client application record
    NewClient(NewClientArgs),
    /// Print the administrator's session fingerprint
    SessionHash,
    /// Check a redirect URI against an allow-list
    CheckRedirect(CheckRedirectArgs),
    /// Run a token round trip against an in-memory store
    Demo(DemoArgs),
}

/// Registered grant types
#[derive(Debug, Clone, Copy, ValueEnum)]
enum GrantTypeArg {
    AuthorizationCode,
    Implicit,
    Password,
    ClientCredentials,
}

impl From<GrantTypeArg> for AuthorizationGrantType {
    fn from(value: GrantTypeArg) -> Self {
        match value {
            GrantTypeArg::AuthorizationCode => AuthorizationGrantType::AuthorizationCode,
            GrantTypeArg::Implicit => AuthorizationGrantType::Implicit,
            GrantTypeArg::Password => AuthorizationGrantType::Password,
            GrantTypeArg::ClientCredentials => AuthorizationGrantType::ClientCredentials,
        }
    }
}

/// Client types
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ClientTypeArg {
    Confidential,
    Public,
}

impl From<ClientTypeArg> for ClientType {
    fn from(value: ClientTypeArg) -> Self {
        match value {
            ClientTypeArg::Confidential => ClientType::Confidential,
            ClientTypeArg::Public => ClientType::Public,
        }
    }
}

/// Arguments for client generation
#[derive(Args)]
struct NewClientArgs {
    /// Human-readable name for the client
    #[arg(long)]
    name: String,

    /// Grant type the client is registered for
    #[arg(long = "grant-type", value_enum, default_value = "password")]
    grant_type: GrantTypeArg,

    /// Client type
    #[arg(long = "client-type", value_enum, default_value = "confidential")]
    client_type: ClientTypeArg,

    /// Redirect URI (can be specified multiple times)
    #[arg(long = "redirect-uri")]
    redirect_uris: Vec<String>,

    /// Skip the user consent step
    #[arg(long)]
    skip_authorization: bool,

    /// Free-form note
    #[arg(long, default_value = "")]
    remark: String,

    /// Owning user ID
    #[arg(long, default_value = SUPER_USER_ID)]
    owner: String,
}

/// Arguments for redirect checks
#[derive(Args)]
struct CheckRedirectArgs {
    /// Allow-listed redirect URI (can be specified multiple times)
    #[arg(long = "allowed", required = true, num_args = 1..)]
    allowed: Vec<String>,

    /// Redirect URI presented by the client
    candidate: String,
}

/// Arguments for the demo round trip
#[derive(Args)]
struct DemoArgs {
    /// Username of the demo resource owner
    #[arg(long, default_value = "demo")]
    username: String,

    /// Password of the demo resource owner
    #[arg(long, default_value = "demo-password")]
    password: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "oauth_pen=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::NewClient(args) => new_client(&cli, args),
        Commands::SessionHash => session_hash(&cli),
        Commands::CheckRedirect(args) => check_redirect(&cli, args),
        Commands::Demo(args) => demo(&cli, args).await,
    }
}

fn print_output<T: Serialize>(cli: &Cli, value: &T) -> Result<()> {
    let rendered = match cli.format {
        OutputFormat::Json => serde_json::to_string(value)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(value)?,
    };
    println!("{rendered}");
    Ok(())
}

fn new_client(cli: &Cli, args: &NewClientArgs) -> Result<()> {
    let application = NewApplication {
        client_name: args.name.clone(),
        client_type: args.client_type.into(),
        authorization_grant_type: args.grant_type.into(),
        skip_authorization: args.skip_authorization,
        redirect_uris: args.redirect_uris.join(" "),
        remark: args.remark.clone(),
    }
    .build(&args.owner, &RandomTokenGenerator, Utc::now())?;

    print_output(cli, &application)
}

fn session_hash(cli: &Cli) -> Result<()> {
    let config = Config::new()?;
    let passwords = PasswordManager::new(Arc::new(HmacPasswordHasher), config.secret_key.as_ref())?;
    let admin = SuperUser::from_config(&config, &passwords)?;

    print_output(
        cli,
        &json!({
            "username": config.admin.name,
            "session_auth_hash": admin.session_auth_hash(),
        }),
    )
}

fn check_redirect(cli: &Cli, args: &CheckRedirectArgs) -> Result<()> {
    let allowed = redirect_uri_allowed(args.allowed.iter().map(String::as_str), &args.candidate);
    print_output(
        cli,
        &json!({
            "candidate": args.candidate,
            "allowed": allowed,
        }),
    )
}

async fn demo(cli: &Cli, args: &DemoArgs) -> Result<()> {
    let config = Config::new()?;
    tracing::info!(version = ?config.version, "Starting OAuth Pen demo");

    let storage = Arc::new(MemoryOAuthStorage::new());
    let server = AuthorizationServer::from_config(storage.clone(), &config)?;
    let passwords = server.users().passwords().clone();
    let admin = SuperUser::from_config(&config, &passwords)?;

    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    if *config.janitor_enabled.as_ref() {
        let janitor = Janitor::new(
            storage.clone(),
            Arc::new(SystemClock),
            *config.janitor_interval.as_ref(),
        );
        tracker.spawn(janitor.run(token.clone()));
    }

    let registry = ClientRegistry::new(
        storage.clone(),
        Arc::new(RandomTokenGenerator),
        Arc::new(SystemClock),
    );
    let application = registry
        .register(
            &admin,
            NewApplication {
                client_name: "demo".to_string(),
                ..Default::default()
            },
        )
        .await?;
    server
        .users()
        .create_user(&args.username, &args.password)
        .await?;

    let client_auth =
        ClientAuthentication::new(&application.client_id, Some(&application.client_secret));

    let mut request = TokenRequest::new(GrantType::Password);
    request.username = Some(args.username.clone());
    request.password = Some(args.password.clone());
    let issued = server.token(request, &client_auth).await?;

    let mut request = TokenRequest::new(GrantType::RefreshToken);
    request.refresh_token = issued.refresh_token.clone();
    let refreshed = server.token(request, &client_auth).await?;

    tracker.close();
    token.cancel();
    tracker.wait().await;

    print_output(
        cli,
        &json!({
            "client_id": application.client_id,
            "issued": issued,
            "refreshed": refreshed,
        }),
    )
}
