mod auth;
mod cart;
mod cli;
mod config;
mod guard;
mod session;
mod storage;
mod transcript;

use anyhow::Result;
use clap::Parser;
use std::cell::RefCell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "bistro",
    about = "Session and access client for the restaurant-chain backend"
)]
pub struct Args {
    #[arg(short, long, help = "Run a single command and exit (e.g. \"/open /admin\")")]
    pub command: Option<String>,

    #[arg(long, env = "BISTRO_API_URL", help = "Backend base URL (overrides config)")]
    pub api_url: Option<String>,

    #[arg(long, help = "Directory for session storage and transcripts")]
    pub state_dir: Option<PathBuf>,

    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Keep session state in memory only")]
    pub ephemeral: bool,

    #[arg(long, help = "Enable tracing of HTTP and guard activity")]
    pub trace: bool,

    #[arg(long, help = "Debug output (print settings)")]
    pub debug: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = if let Some(config_path) = &args.config {
        let mut cfg = config::Config::with_builtin_routes();
        cfg.merge(config::Config::load_from(config_path)?);
        cfg
    } else {
        config::Config::load().unwrap_or_else(|e| {
            eprintln!("Warning: {:#}; using built-in configuration", e);
            config::Config::with_builtin_routes()
        })
    };

    if let Some(api_url) = &args.api_url {
        cfg.api.base_url = Some(api_url.clone());
    }

    if let Err(errors) = cfg.validate() {
        for error in &errors {
            eprintln!("Config error {}", error);
        }
        return Err(anyhow::anyhow!(
            "Invalid configuration ({} error(s))",
            errors.len()
        ));
    }

    let state_dir = args.state_dir.clone().unwrap_or_else(|| cfg.state_dir());

    if args.debug {
        eprintln!("[DEBUG] API: {}", cfg.api.base_url());
        eprintln!("[DEBUG] Timeout: {:?}", cfg.api.timeout());
        eprintln!("[DEBUG] State dir: {}", state_dir.display());
        eprintln!("[DEBUG] Ephemeral: {}", args.ephemeral);
        eprintln!("[DEBUG] Protected routes: {}", cfg.routes.len());
    }

    let transcripts_dir = state_dir.join("sessions");
    std::fs::create_dir_all(&transcripts_dir)?;

    let session_id = uuid::Uuid::new_v4().to_string();
    let transcript_path = transcripts_dir.join(format!("{}.jsonl", session_id));
    let mut transcript = transcript::Transcript::new(&transcript_path, &session_id)?;

    let store: Box<dyn storage::Storage> = if args.ephemeral {
        Box::new(storage::MemoryStorage::new())
    } else {
        Box::new(storage::FileStorage::open(&state_dir.join("storage.json")))
    };
    let session = session::Session::initialize(store);
    let _ = transcript.session_start(session.user(), session.language(), session.currency());

    let timeout = cfg.api.timeout();
    let authenticator = auth::HttpAuthenticator::new(cfg.api.base_url(), timeout);
    let cart_api = cart::HttpCartClient::new(cfg.api.base_url(), timeout);
    let guard = guard::RouteGuard::new(&cfg.routes);

    let ctx = cli::Context {
        state_dir,
        transcript: RefCell::new(transcript),
        session_id,
        tracing: RefCell::new(args.trace),
        config: cfg,
        session: RefCell::new(session),
        guard,
        authenticator: Box::new(authenticator),
        cart_api: Box::new(cart_api),
    };

    if let Some(command) = &args.command {
        cli::run_once(&ctx, command)
    } else {
        cli::run_repl(ctx)
    }
}
