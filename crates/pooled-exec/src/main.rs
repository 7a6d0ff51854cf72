//! pooled-exec: run shell commands through a bounded handler pool.
//!
//! Reads one command per line and runs at most `--limit` of them at once,
//! printing one JSON line per event on stdout.

mod exec;
mod logging;

use std::path::{Path, PathBuf};
use std::process;

use futures::StreamExt;
use handler_pool::{HandlerPool, PoolConfig};
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{info, warn};

use crate::exec::{CommandHandler, ExecEvent, Job};

/// Longest accepted command line, in bytes.
const MAX_COMMAND_LEN: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
struct Options {
    /// Overrides HANDLER_POOL_LIMIT when set.
    limit: Option<usize>,
    shell: String,
    file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let options = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: pooled-exec [--limit N] [--shell SH] [--file PATH]");
            eprintln!();
            eprintln!("Reads one shell command per line from PATH or stdin.");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --limit <n>      Commands running at once [default: $HANDLER_POOL_LIMIT or 1]");
            eprintln!("  --shell <sh>     Shell used as `<sh> -c <command>` [default: sh]");
            eprintln!("  --file <path>    Read commands from a file instead of stdin");
            process::exit(2);
        }
    };

    logging::init_tracing();
    info!("pooled-exec {}", handler_pool::VERSION);

    match run(options).await {
        Ok(0) => {}
        Ok(failures) => {
            eprintln!("{failures} command(s) failed");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        limit: None,
        shell: "sh".to_string(),
        file: None,
    };

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--limit" => {
                i += 1;
                let raw = args.get(i).ok_or("--limit requires a value")?;
                let limit = raw
                    .parse::<usize>()
                    .map_err(|_| format!("invalid limit '{raw}', expected a positive integer"))?;
                if limit == 0 {
                    return Err("--limit must be at least 1".to_string());
                }
                options.limit = Some(limit);
            }
            "--shell" => {
                i += 1;
                options.shell = args.get(i).ok_or("--shell requires a value")?.clone();
            }
            "--file" => {
                i += 1;
                options.file = Some(PathBuf::from(args.get(i).ok_or("--file requires a value")?));
            }
            "--help" | "-h" => return Err(String::new()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(options)
}

/// The command on a line, or None for blank and `#` comment lines.
fn command_line(line: &str) -> Option<String> {
    let line = line.trim();
    (!line.is_empty() && !line.starts_with('#')).then(|| line.to_string())
}

fn parse_commands(text: &str) -> Vec<String> {
    text.lines().filter_map(command_line).collect()
}

async fn read_lines<R: AsyncRead + Unpin>(reader: R) -> anyhow::Result<Vec<String>> {
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_COMMAND_LEN));
    let mut commands = Vec::new();
    while let Some(line) = lines.next().await {
        commands.extend(command_line(&line?));
    }
    Ok(commands)
}

async fn read_commands(file: Option<&Path>) -> anyhow::Result<Vec<String>> {
    if let Some(path) = file {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        return Ok(parse_commands(&text));
    }

    read_lines(tokio::io::stdin()).await
}

/// Run every command and return how many failed.
async fn run(options: Options) -> anyhow::Result<usize> {
    let commands = read_commands(options.file.as_deref()).await?;

    let config = match options.limit {
        Some(limit) => PoolConfig::new().with_limit(limit),
        None => PoolConfig::from_env(),
    };
    if config.limit == 0 && !commands.is_empty() {
        anyhow::bail!("pool limit is 0, no command could ever run");
    }

    let shell = options.shell;
    let pool: HandlerPool<CommandHandler, Job, ExecEvent> =
        HandlerPool::new(move || Ok(CommandHandler::new(shell.clone())), config)?;
    info!(commands = commands.len(), limit = pool.limit(), "Dispatching commands");

    let mut subscriptions = Vec::with_capacity(commands.len());
    for (index, command) in commands.into_iter().enumerate() {
        let notifier = pool.invoke(Job { index, command })?;
        subscriptions.push(notifier.subscribe());
    }

    let mut events = futures::stream::select_all(subscriptions);
    let mut failures = 0;
    while let Some(event) = events.next().await {
        if event.is_failure() {
            warn!(index = event.index(), "Command failed");
            failures += 1;
        }
        println!("{}", serde_json::to_string(&event)?);
    }

    info!(stats = ?pool.stats(), failures, "All commands finished");
    Ok(failures)
}
