use clap::{Parser, Subcommand};
use legado::chat::{AttendanceMode, ChatSession, SendOutcome, SessionEvent, UserIdentity};
use legado::config::Config;
use legado::store::Message;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "legado")]
#[command(about = "Legado CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: LEGADO_CONFIG_PATH or ~/.legado/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Serve the built site (SPA fallback to index.html).
    Serve {
        /// Config file path (default: LEGADO_CONFIG_PATH or ~/.legado/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Port (overrides PORT env and config; default 3000)
        #[arg(long, short)]
        port: Option<u16>,

        /// Directory with the built assets (default from config or ./dist)
        #[arg(long, value_name = "DIR")]
        dist: Option<PathBuf>,
    },

    /// Run the local webhook simulator (automated replies, notifications, inbox).
    Simulate {
        /// Config file path (default: LEGADO_CONFIG_PATH or ~/.legado/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Port (default from config or 3001)
        #[arg(long, short)]
        port: Option<u16>,

        /// Reply delay in milliseconds
        #[arg(long, value_name = "MS")]
        latency: Option<u64>,
    },

    /// Chat with the configured webhooks from the terminal (interactive).
    Chat {
        /// Config file path (default: LEGADO_CONFIG_PATH or ~/.legado/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Visitor name sent with each message.
        #[arg(long)]
        name: Option<String>,

        /// Visitor email sent with each message.
        #[arg(long)]
        email: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("legado {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Serve { config, port, dist }) => run_serve(config, port, dist).await,
        Some(Commands::Simulate {
            config,
            port,
            latency,
        }) => run_simulate(config, port, latency).await,
        Some(Commands::Chat {
            config,
            name,
            email,
        }) => run_chat(config, name, email).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(legado::config::default_config_path);
    let dir = legado::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

fn load(config_path: Option<PathBuf>) -> anyhow::Result<Config> {
    let (config, path) = legado::config::load_config(config_path)?;
    log::debug!("loaded config from {}", path.display());
    Ok(config.with_env_overrides())
}

async fn run_serve(
    config_path: Option<PathBuf>,
    port: Option<u16>,
    dist: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = load(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    if let Some(d) = dist {
        config.server.dist_dir = d;
    }
    println!(
        "serving {} on port {}",
        config.server.dist_dir.display(),
        config.server.port
    );
    legado::server::run_server(&config).await
}

async fn run_simulate(
    config_path: Option<PathBuf>,
    port: Option<u16>,
    latency: Option<u64>,
) -> anyhow::Result<()> {
    let mut config = load(config_path)?;
    if let Some(p) = port {
        config.simulator.port = p;
    }
    if let Some(ms) = latency {
        config.simulator.latency_ms = ms;
    }
    println!(
        "webhook simulator on http://{}:{}",
        config.simulator.bind, config.simulator.port
    );
    legado::simulator::run_simulator(&config.simulator).await
}

fn print_bot_messages(name: &str, messages: &[Message]) {
    let bot: Vec<&Message> = messages.iter().filter(|m| m.is_bot()).collect();
    for (i, m) in bot.iter().enumerate() {
        println!("{}: {}", name, m.text);
        if i + 1 == bot.len() {
            println!("    {}", m.timestamp.with_timezone(&chrono::Local).format("%H:%M"));
        }
    }
}

fn print_help() {
    println!("commands: /human  /bot  /clear  /quick N  /quit");
}

async fn run_chat(
    config_path: Option<PathBuf>,
    name: Option<String>,
    email: Option<String>,
) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let session = ChatSession::with_webhooks(config.chat);
    if name.is_some() || email.is_some() {
        session
            .set_user_identity(UserIdentity { name, email })
            .await;
    }
    session.open().await;

    let display_name = session.config().display_name.clone();
    if let Some(warning) = session.config_warning() {
        eprintln!("! {}", warning);
    }
    print_bot_messages(&display_name, &session.messages().await);
    for (i, action) in session.quick_actions().await.iter().enumerate() {
        println!("  [{}] {}", i + 1, action.label);
    }
    print_help();

    // Replies (including operator messages from the inbox) are printed from events.
    let mut events = session.subscribe();
    let printer_name = display_name.clone();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Appended(messages)) => {
                    print_bot_messages(&printer_name, &messages)
                }
                Ok(SessionEvent::ModeChanged(AttendanceMode::Human)) => {
                    println!("-- atendimento humano --")
                }
                Ok(SessionEvent::ModeChanged(AttendanceMode::Automated)) => {
                    println!("-- atendimento automático --")
                }
                Ok(SessionEvent::Cleared) => println!("-- conversa reiniciada --"),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("chat: {} events skipped", n)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let outcome = match input {
            "/quit" | "/exit" => break,
            "/help" => {
                print_help();
                continue;
            }
            "/human" => {
                if let Err(e) = session.request_human().await {
                    log::debug!("chat: handoff failed: {}", e);
                }
                continue;
            }
            "/bot" => {
                if !session.return_to_automated().await {
                    println!("(already automated)");
                }
                continue;
            }
            "/clear" => {
                session.clear().await;
                print_bot_messages(&display_name, &session.messages().await);
                continue;
            }
            _ => match input.strip_prefix("/quick") {
                Some(n) => {
                    let action = n
                        .trim()
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| legado::chat::QUICK_ACTIONS.get(n.wrapping_sub(1)));
                    match action {
                        Some(action) => {
                            println!("you: {}", action.prompt);
                            session.run_quick_action(action.id).await
                        }
                        None => {
                            println!("usage: /quick 1-{}", legado::chat::QUICK_ACTIONS.len());
                            continue;
                        }
                    }
                }
                None => Some(session.send(input).await),
            },
        };
        match outcome {
            Some(SendOutcome::Busy) => println!("(still waiting for the previous reply)"),
            Some(SendOutcome::Failed(e)) => log::debug!("chat: send failed: {}", e),
            _ => {}
        }
    }

    session.shutdown().await;
    printer.abort();
    Ok(())
}
