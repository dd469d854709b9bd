mod access;
mod audit;
mod cli;
mod config;
mod error;
mod gateway;
mod http;
mod loan;
mod session;
mod store;
mod token;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "loandesk", about = "Loan brokerage client")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "LOANDESK_API_URL", help = "API base URL (overrides config)")]
    pub base_url: Option<String>,

    #[arg(long, help = "Keep credentials in memory only")]
    pub ephemeral: bool,

    #[arg(long, help = "Debug output (print HTTP details)")]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Sign in and store the session
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "LOANDESK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in
    Register {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "LOANDESK_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Sign out and forget stored credentials
    Logout,
    /// Show the current session
    Status,
    /// Exchange the refresh token for a new session
    Refresh,
    /// Submit a loan application
    Apply {
        #[arg(long)]
        loan_type: String,
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        tenure_months: u32,
        #[arg(long)]
        monthly_income: f64,
        #[arg(long)]
        purpose: Option<String>,
    },
    /// Show recent session events
    Audit {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "loandesk=debug" } else { "loandesk=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.debug);

    let mut cfg = if let Some(config_path) = &args.config {
        config::Config::load_from(config_path)?
    } else {
        config::Config::load()?
    };

    if let Some(base_url) = &args.base_url {
        cfg.api.base_url = base_url.clone();
    }

    if let Err(errors) = cfg.validate() {
        for err in &errors {
            eprintln!("Config error {}", err);
        }
        return Err(anyhow::anyhow!(
            "Invalid configuration ({} error(s))",
            errors.len()
        ));
    }

    let store: Arc<dyn store::CredentialStore> = if args.ephemeral {
        Arc::new(store::MemoryStore::new())
    } else {
        Arc::new(store::FileStore::open(&cfg.credentials_path())?)
    };

    let audit = if cfg.audit.enabled && !args.ephemeral {
        let run_id = uuid::Uuid::new_v4().to_string();
        Some(audit::AuditLog::new(&cfg.audit_path(), &run_id)?)
    } else {
        None
    };

    let transport: Arc<dyn http::HttpTransport> =
        Arc::new(http::UreqTransport::new(cfg.api.timeout_ms));

    let session = session::SessionManager::new(
        session::SessionOptions {
            refresh_margin: cfg.refresh_margin(),
            audit,
            ..session::SessionOptions::new(&cfg.api.base_url)
        },
        transport.clone(),
        store,
    );
    let gateway = gateway::Gateway::new(
        &cfg.api.base_url,
        transport,
        session,
        Arc::new(cli::TerminalRedirect),
    );

    let ctx = cli::Context {
        config: cfg,
        gateway,
    };
    cli::run(&ctx, args.command)
}
