use clap::{Parser, Subcommand};
use lib::dispatch::{ChatController, SyncEvent};
use lib::gateway::{Gateway, HttpBackend};
use lib::session::{Role, Session};
use lib::telemetry::{TelemetrySample, TelemetrySampler};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Parley CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config and data directory).
    Init {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List stored sessions (newest first).
    Sessions {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Chat with the backend (interactive). Type /help for commands.
    Chat {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Model to use instead of the first one the backend lists.
        #[arg(long, short)]
        model: Option<String>,

        /// Optional existing session id to continue.
        #[arg(long, value_name = "ID")]
        session: Option<String>,
    },

    /// Show live resource usage of the backend host until Ctrl-C.
    Monitor {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Stop after this many samples.
        #[arg(long, short = 'n')]
        samples: Option<u64>,

        /// Print one JSON object per sample.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("parley {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Sessions { config }) => {
            if let Err(e) = run_sessions(config).await {
                log::error!("listing sessions failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat {
            config,
            model,
            session,
        }) => {
            if let Err(e) = run_chat(config, model, session).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Monitor {
            config,
            samples,
            json,
        }) => {
            if let Err(e) = run_monitor(config, samples, json).await {
                log::error!("monitor failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

fn connect(config_path: Option<PathBuf>) -> anyhow::Result<ChatController> {
    let (config, path) = lib::config::load_config(config_path)?;
    log::info!(
        "backend {} ({:?} session storage)",
        lib::config::resolve_backend_url(&config),
        config.storage.mode
    );
    Ok(ChatController::from_config(&config, &path))
}

fn session_label(session: &Session) -> &str {
    if session.title.is_empty() {
        "Empty Shell"
    } else {
        &session.title
    }
}

fn print_sessions(sessions: &[Session], active: Option<&str>) {
    if sessions.is_empty() {
        println!("(no sessions)");
        return;
    }
    for s in sessions {
        let marker = if active == Some(s.id.as_str()) { "*" } else { " " };
        println!(
            "{} {}  {}  ({} messages)",
            marker,
            s.id,
            session_label(s),
            s.messages.len()
        );
    }
}

fn print_transcript(session: &Session) {
    for m in &session.messages {
        match m.role {
            Role::User => println!("> {}", m.text),
            Role::Bot => println!("< {}", m.text.trim()),
        }
    }
}

async fn run_sessions(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let controller = connect(config_path)?;
    controller.load_all().await;
    print_sessions(&controller.sessions(), None);
    Ok(())
}

/// Print background sync failures as they happen.
fn report_sync_events(controller: &ChatController) {
    let mut events = controller.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SyncEvent::PersistFailed { session_id, error }) => {
                    eprintln!("! session {} was not saved: {}", session_id, error);
                }
                Ok(SyncEvent::DeleteFailed { session_id, error }) => {
                    eprintln!("! session {} was not deleted on the backend: {}", session_id, error);
                }
                Ok(SyncEvent::LocalSaveFailed { error }) => {
                    eprintln!("! sessions were not saved locally: {}", error);
                }
                Ok(other) => log::debug!("sync: {:?}", other),
                Err(RecvError::Lagged(n)) => log::debug!("sync: missed {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

const HELP: &str = "commands:
  /new            start a new conversation (the next message creates a session)
  /sessions       list sessions
  /open <id>      switch to a session and show its messages
  /delete [id]    delete a session (default: the current one)
  /models         list models
  /model <name>   select a model
  /help           show this help
  /exit           quit";

async fn run_chat(
    config_path: Option<PathBuf>,
    model: Option<String>,
    session: Option<String>,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let controller = connect(config_path)?;
    report_sync_events(&controller);
    let loaded = controller.load_all().await;
    controller.load_models().await;
    if let Some(m) = model {
        if !controller.select_model(&m) {
            eprintln!("unknown model {:?}; available: {}", m, controller.models().join(", "));
        }
    }
    if let Some(id) = session {
        controller.select_active(Some(&id));
        match controller.active_session() {
            Some(s) => print_transcript(&s),
            None => eprintln!("no session {}; starting a new one", id),
        }
    }
    let selected = controller.selected_model();
    println!(
        "{} sessions loaded, model {}. /help for commands.",
        loaded,
        if selected.is_empty() { "STANDBY" } else { selected.as_str() }
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim_end_matches(['\r', '\n']);
        if input.trim().is_empty() {
            continue;
        }
        if let Some(command) = input.trim().strip_prefix('/') {
            if !handle_command(&controller, command) {
                break;
            }
            continue;
        }

        controller.set_input(input);
        match controller.submit().await {
            Some(outcome) if outcome.delivered => println!("< {}", outcome.reply.trim()),
            Some(_) => eprintln!("(session was deleted before the reply arrived)"),
            None => {}
        }
    }

    Ok(())
}

/// Run a slash command. Returns false when the session should end.
fn handle_command(controller: &ChatController, command: &str) -> bool {
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((n, a)) => (n, a.trim()),
        None => (command, ""),
    };
    match name.to_ascii_lowercase().as_str() {
        "exit" | "quit" => return false,
        "help" => println!("{}", HELP),
        "new" => {
            controller.select_active(None);
            println!("new conversation; your next message starts a session");
        }
        "sessions" => {
            let active = controller.active_id();
            print_sessions(&controller.sessions(), active.as_deref());
        }
        "open" => {
            controller.select_active(Some(arg));
            match controller.active_session() {
                Some(s) => {
                    println!("# {}", session_label(&s));
                    print_transcript(&s);
                }
                None => println!("no session {:?}", arg),
            }
        }
        "delete" => {
            let id = if arg.is_empty() {
                controller.active_id()
            } else {
                Some(arg.to_string())
            };
            match id {
                Some(id) if controller.delete_session(&id) => println!("deleted {}", id),
                Some(id) => println!("no session {:?}", id),
                None => println!("no session is open"),
            }
        }
        "models" => {
            let selected = controller.selected_model();
            let models = controller.models();
            if models.is_empty() {
                println!("(no models)");
            }
            for m in models {
                let marker = if m == selected { "*" } else { " " };
                println!("{} {}", marker, m);
            }
        }
        "model" => {
            if controller.select_model(arg) {
                println!("using {}", arg);
            } else {
                println!("unknown model {:?}", arg);
            }
        }
        other => println!("unknown command /{}; /help lists commands", other),
    }
    true
}

fn format_sample(s: &TelemetrySample) -> String {
    format!(
        "{}  cpu {:>5.1}%  ram {:>5.1}% ({})  app cpu {:>5.1}%  app ram {}",
        s.time, s.cpu, s.ram_pct, s.ram_gb, s.app_cpu, s.app_ram
    )
}

async fn run_monitor(
    config_path: Option<PathBuf>,
    samples: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    let backend = HttpBackend::new(Some(lib::config::resolve_backend_url(&config)));
    let interval = config.telemetry.interval();
    let mut sampler = TelemetrySampler::new(Gateway::new(Arc::new(backend)), interval);
    sampler.start();

    let mut printed = 0;
    let mut ticker = tokio::time::interval(interval / 4);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let count = sampler.sample_count();
                if count == printed {
                    continue;
                }
                printed = count;
                let latest = sampler.latest();
                if json {
                    println!("{}", serde_json::to_string(&latest)?);
                } else {
                    println!("{}", format_sample(&latest));
                }
                if samples.is_some_and(|n| printed >= n) {
                    break;
                }
            }
        }
    }
    sampler.stop();
    Ok(())
}
