// Консольный клиент: команды со stdin, события сессии в лог

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use roulette_lib::config::Config;
use roulette_lib::error::ConfigError;
use roulette_lib::{logger, CoordinatorHandle, Notice};

#[derive(Parser, Debug)]
#[command(name = "ssc-roulette", about = "Random one-to-one video chat client", version)]
struct Cli {
    /// JSON config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Signaling server URL (ws://, wss://, http:// or https://)
    #[arg(long)]
    signaling_url: Option<String>,

    /// Seconds to wait for the remote stream before giving up
    #[arg(long)]
    negotiation_timeout_secs: Option<u64>,

    /// Log filter, enables logging (e.g. "debug,webrtc=warn")
    #[arg(long, value_name = "FILTER")]
    log: Option<String>,

    /// Start searching right away
    #[arg(long)]
    search: bool,
}

impl Cli {
    /// defaults → файл → окружение → флаги
    fn load_config(&self) -> Result<Config, ConfigError> {
        self.load_config_with(|key| std::env::var(key).ok())
    }

    fn load_config_with(
        &self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_vars(var)?;

        if let Some(url) = &self.signaling_url {
            config.signaling_url = url.clone();
        }
        if let Some(secs) = self.negotiation_timeout_secs {
            config.negotiation_timeout = Duration::from_secs(secs);
        }
        if let Some(filter) = &self.log {
            config.logging.enabled = true;
            config.logging.filter = filter.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Search,
    Leave,
    Next,
    Say(String),
    Clear,
    Status,
    Quit,
}

fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    match word {
        "search" | "s" => Some(Input::Search),
        "leave" | "l" => Some(Input::Leave),
        "next" | "n" => Some(Input::Next),
        "say" if !rest.trim().is_empty() => Some(Input::Say(rest.trim().to_owned())),
        "clear" => Some(Input::Clear),
        "status" => Some(Input::Status),
        "quit" | "q" | "exit" => Some(Input::Quit),
        _ => None,
    }
}

fn report(notice: &Notice) {
    match notice {
        Notice::StateChanged {
            from,
            to,
            session_id,
        } => info!(%from, %to, session_id = ?session_id, "state"),
        Notice::RemoteStream(stream) => {
            info!(stream_id = stream.stream_id(), tracks = stream.tracks().len(), "remote stream")
        }
        Notice::Chat(message) => {
            info!(direction = ?message.direction, text = %message.text, "chat")
        }
        Notice::Error(err) => warn!(retryable = err.is_retryable(), "{err}"),
        Notice::Connectivity(status) => info!(?status, "signaling"),
    }
}

fn apply(handle: &CoordinatorHandle, input: Input) -> bool {
    match input {
        Input::Search => handle.start_search(),
        Input::Leave => handle.leave(),
        Input::Next => {
            // поиск стартует после возврата в Idle
            handle.leave();
            handle.start_search();
        }
        Input::Say(text) => handle.send_chat(text),
        Input::Clear => handle.clear_error(),
        Input::Status => {
            let snapshot = handle.snapshot();
            info!(
                state = %snapshot.state,
                session_id = ?snapshot.session_id,
                remote = ?snapshot.remote_address,
                connectivity = ?snapshot.connectivity,
                presence = ?snapshot.presence,
                messages = snapshot.chat.len(),
                error = ?snapshot.error,
                "status"
            );
        }
        Input::Quit => return false,
    }
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config().context("invalid configuration")?;
    logger::init(&config.logging);

    let client = roulette_lib::start(&config).context("failed to start client")?;
    let handle = client.handle.clone();
    info!(
        local = %client.local_address,
        "commands: search, leave, next, say <text>, clear, status, quit"
    );

    let mut notices = handle.notices();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => report(&notice),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notice stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if cli.search {
        handle.start_search();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("failed to read stdin")? {
                    Some(line) => match parse_input(&line) {
                        Some(input) => {
                            if !apply(&handle, input) {
                                break;
                            }
                        }
                        None if line.trim().is_empty() => {}
                        None => warn!(input = %line.trim(), "unknown command"),
                    },
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown();
    client.join().await;
    Ok(())
}
