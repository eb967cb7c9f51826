//! ikura-bot entry point.
//!
//! Loads the database, starts the snapshot and markov threads, and drives
//! the core from an interactive console channel until EOF or `/quit`.

#![allow(clippy::print_stdout)] // the console channel intentionally uses stdout

use clap::Parser;
use ikura_bot::channel::{Channel, Message};
use ikura_bot::config::{load_config, BotConfig};
use ikura_bot::db::Store;
use ikura_bot::markov::{self, MarkovWorker};
use ikura_bot::{commands, util};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// ikura - chat bot with a scripted command language and markov chatter
#[derive(Parser)]
#[command(name = "ikura-bot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database file path
    #[arg(long, env = "IKURA_DB", default_value = "ikura.db")]
    db: PathBuf,

    /// Create the database if it does not exist
    #[arg(long)]
    create: bool,

    /// Configuration file path
    #[arg(short, long, env = "IKURA_CONFIG")]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match cli.config {
        Some(ref path) => match load_config(path) {
            Ok(c) => c,
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to load config");
                return ExitCode::FAILURE;
            }
        },
        None => BotConfig::default(),
    };

    let store = match Store::load(&cli.db, cli.create) {
        Ok(s) => s,
        Err(e) => {
            error!(path = %cli.db.display(), error = %e, "failed to load database");
            return ExitCode::FAILURE;
        }
    };

    store.spawn_syncer();
    let worker = MarkovWorker::spawn(Arc::clone(&store));

    info!("console ready; /quit to exit");
    run_console(&store, &worker, &config);

    // orderly shutdown: drain the markov queue, then take a final snapshot
    worker.shutdown();
    store.sync();
    info!("shut down cleanly");

    ExitCode::SUCCESS
}

/// Initialize logging with the given verbosity level.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ikura_bot={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

/// Read stdin lines as chat in a synthetic console channel.
fn run_console(store: &Arc<Store>, worker: &MarkovWorker, config: &BotConfig) {
    let chan = ConsoleChannel;
    let stdin = std::io::stdin();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "/quit" => break,
            "/sync" => store.sync(),
            "/retrain" => worker.retrain(store),
            "/progress" => {
                let (done, total) = worker.retrain_progress();
                println!("retraining: {done}/{total}");
            }
            "/generate" => {
                let msg = store.markov_read(|m| markov::generate(m, &config.markov, &[]));
                if msg.is_empty() {
                    println!("(model is empty)");
                } else {
                    chan.send_message(&msg);
                }
            }
            _ => {
                let ran = commands::process_message(store, &chan, "console", "console", line);
                if !ran {
                    worker.feed(line, Vec::new());
                }
            }
        }
    }
}

/// The local console as a chat channel: commands run with owner rights and
/// replies go to stdout.
struct ConsoleChannel;

impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    fn username(&self) -> &str {
        "ikura"
    }

    fn command_prefix(&self) -> &str {
        "!"
    }

    fn silent_interp_errors(&self) -> bool {
        false
    }

    fn respond_to_pings(&self) -> bool {
        false
    }

    fn lurking(&self) -> bool {
        false
    }

    fn user_permissions(&self, _user_id: &str) -> u64 {
        ikura_bot::perms::OWNER | ikura_bot::perms::EVERYONE
    }

    fn send_message(&self, msg: &Message) {
        for chunk in util::split_outbound(&msg.flatten()) {
            println!("{chunk}");
        }
    }
}
