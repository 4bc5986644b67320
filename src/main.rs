#![warn(clippy::all, rust_2018_idioms)]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

use okta_aws_auth::app::config::OktaConfig;
use okta_aws_auth::app::credential_process::{self, OutputFormat};
use okta_aws_auth::app::delegation::StsDelegationClient;
use okta_aws_auth::app::duo::DuoPushDispatcher;
use okta_aws_auth::app::role_selection::{FirstRoleSelector, PreferredRoleSelector, RoleSelector};
use okta_aws_auth::app::transport::OktaTransport;
use okta_aws_auth::OktaAuthenticator;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_COMMIT"), ")");

const DEFAULT_FILTER: &str =
    "okta_aws_auth=info,aws_config=warn,aws_smithy_runtime=warn,hyper=warn";
const VERBOSE_FILTER: &str =
    "okta_aws_auth=debug,aws_config=info,aws_smithy_runtime=warn,hyper=warn";

/// Log in to Okta and print temporary AWS credentials for a role.
#[derive(Parser, Debug)]
#[command(name = "okta-aws-auth", version = VERSION, about)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Named profile from the config file
    #[arg(long, conflicts_with = "role_arn")]
    profile: Option<String>,

    /// Target role ARN
    #[arg(long)]
    role_arn: Option<String>,

    /// Label for the role session name (defaults to the profile or username)
    #[arg(long)]
    session: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,

    /// Also append logs to a file in the data directory
    #[arg(long)]
    log_file: bool,
}

fn init_logging(verbose: bool, log_file: bool) -> Result<()> {
    // RUST_LOG wins over the built-in levels
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::builder()
            .parse(if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER })
            .context("Failed to parse log filter")?,
    };

    // stdout carries the credentials, so logs go to stderr
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let mut log_path = None;
    let file_layer = if log_file {
        let proj_dirs = directories::ProjectDirs::from("com", "", "okta-aws-auth")
            .context("Could not determine a data directory for the log file")?;
        let log_dir = proj_dirs.data_dir().join("logs");
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create {}", log_dir.display()))?;
        let path = log_dir.join("okta-aws-auth.log");

        let mut options = std::fs::OpenOptions::new();
        options.append(true).create(true);
        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        log_path = Some(path);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false),
        )
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    // reqwest and hyper still emit through the log crate
    tracing_log::LogTracer::init().context("Failed to initialize log-to-tracing bridge")?;

    if let Some(path) = log_path {
        tracing::debug!("Logging to {:?}", path);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let env = |key: &str| std::env::var(key).ok();

    let mut config = OktaConfig::load(args.config.as_deref())?;
    config.apply_env(env);
    config.validate()?;
    let login = config.login(env)?;
    let target_role = config.resolve_role(args.profile.as_deref(), args.role_arn.as_deref())?;
    let session_label = args
        .session
        .clone()
        .or_else(|| args.profile.clone())
        .unwrap_or_else(|| login.username.clone());

    let transport = OktaTransport::new(&config.base_url(), config.federation_path.clone())
        .context("Invalid Okta base URL")?;
    let selector: Arc<dyn RoleSelector> = match &config.source_role_arn {
        Some(role_arn) => Arc::new(PreferredRoleSelector::new(role_arn.clone())),
        None => Arc::new(FirstRoleSelector),
    };

    let mut dispatcher = DuoPushDispatcher::new();
    if let Some(device) = &config.mfa.device {
        dispatcher = dispatcher.with_device(device.clone());
    }

    let authenticator = OktaAuthenticator::new(
        login,
        Arc::new(transport),
        Arc::new(dispatcher),
        Arc::new(StsDelegationClient::new(config.region.clone())),
    )
    .with_role_selector(selector)
    .with_mfa_settings(config.mfa_settings());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling authentication");
            on_interrupt.cancel();
        }
    });

    tracing::info!(
        "Authenticating {} for {}",
        authenticator.username(),
        target_role
    );
    let credentials = authenticator
        .authenticate_with_cancel(&target_role, &session_label, cancel)
        .await
        .with_context(|| format!("Failed to obtain credentials for {}", target_role))?;

    let output = credential_process::render(&credentials, args.format)
        .context("Failed to render credentials")?;
    println!("{}", output.trim_end());
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose, args.log_file) {
        eprintln!("error: {:#}", e);
        std::process::exit(2);
    }
    tracing::debug!("okta-aws-auth {} starting", VERSION);

    if let Err(e) = run(args).await {
        tracing::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
