use clap::{Parser, Subcommand};
use threadbot::agent::{agent_from_config, Agent, TurnRequest};
use threadbot::history::HistoryBuilder;
use threadbot::prompt::PromptContext;
use threadbot::response::{extract_answer, ResponseItem};
use threadbot::slack::ThreadReply;

#[derive(Parser)]
#[command(name = "threadbot")]
#[command(about = "Threadbot CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the Slack webhook gateway (POST /interactivity, GET / health).
    Serve {
        /// Config file path (default: THREADBOT_CONFIG_PATH or ~/.threadbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 3000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Chat with the configured agent from the terminal, without Slack (interactive).
    Chat {
        /// Config file path (default: THREADBOT_CONFIG_PATH or ~/.threadbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Some(Commands::Serve { .. }) => "info",
        _ => "warn",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match cli.command {
        Some(Commands::Version) => {
            println!("threadbot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config }) => {
            if let Err(e) = run_chat(config).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_serve(config_path: Option<std::path::PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = threadbot::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{} (config {})",
        config.gateway.bind,
        config.gateway.port,
        path.display()
    );
    threadbot::gateway::run_gateway(config).await
}

const LOCAL_USER: &str = "local";
const LOCAL_AGENT: &str = "agent";

/// Local transcript kept as thread replies, so history is built exactly as for a Slack thread.
async fn run_chat(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, _) = threadbot::config::load_config(config_path)?;
    let agent = agent_from_config(&config)?;
    let user_name = std::env::var("USER").unwrap_or_else(|_| "you".to_string());
    let mut transcript: Vec<ThreadReply> = Vec::new();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        let request = TurnRequest {
            history: HistoryBuilder::new(LOCAL_AGENT).build(&transcript),
            input: input.to_string(),
            context: PromptContext {
                responder_id: LOCAL_AGENT.to_string(),
                responder_name: LOCAL_AGENT.to_string(),
                channel_id: None,
                participants: Vec::new(),
            },
        };
        match agent.converse(request).await {
            Ok(items) => {
                print_items(&items);
                transcript.push(ThreadReply::new(LOCAL_USER, user_name.as_str(), input));
                match extract_answer(&items) {
                    Some(answer) => transcript.push(ThreadReply::new(LOCAL_AGENT, LOCAL_AGENT, answer)),
                    None => println!("(no answer)"),
                }
            }
            Err(e) => {
                eprintln!("chat error: {}", e);
            }
        }
    }

    Ok(())
}

fn print_items(items: &[ResponseItem]) {
    for item in items {
        match serde_json::to_string(item) {
            Ok(s) => println!("< {}", s),
            Err(e) => log::warn!("could not serialize response item: {}", e),
        }
    }
}
