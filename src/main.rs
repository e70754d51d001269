use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use savebot::config::{self, Config};
use savebot::{Classify, ProviderError, RetryPolicy};

/// savebot - inspect the resilience settings of the relay bot
#[derive(Parser)]
#[command(name = "savebot", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/savebot/config.toml)
    #[arg(short, long, env = config::CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved configuration
    Config,
    /// Print the retry delay schedule of a policy
    Backoff {
        /// Call shape whose policy to show
        #[arg(short, long, value_enum, default_value_t = Shape::Throwing)]
        shape: Shape,
        /// Apply jitter to each delay
        #[arg(short, long)]
        jitter: bool,
        /// Attempts to show (defaults to the policy's retry budget)
        #[arg(short, long)]
        attempts: Option<u32>,
    },
    /// Show how a provider error would be handled
    Classify {
        /// RPC error code, or HTTP status with --bot-api
        code: i32,
        /// RPC error name (e.g. `FLOOD_WAIT_30`), or response body with --bot-api
        name: String,
        /// Treat the input as a Bot API HTTP response
        #[arg(long)]
        bot_api: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Shape {
    Throwing,
    Safe,
    Transfer,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,savebot=info",
        1 => "info,savebot=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_from(cli.config.as_deref())?;

    match cli.command {
        Command::Config => print_config(&config),
        Command::Backoff {
            shape,
            jitter,
            attempts,
        } => {
            let policy = match shape {
                Shape::Throwing => &config.retry.throwing,
                Shape::Safe => &config.retry.safe,
                Shape::Transfer => &config.retry.transfer,
            };
            print_schedule(policy, jitter, attempts.unwrap_or(policy.max_retries));
        }
        Command::Classify {
            code,
            name,
            bot_api,
        } => {
            let err = if bot_api {
                let status = u16::try_from(code)
                    .map_err(|_| anyhow::anyhow!("invalid HTTP status: {code}"))?;
                ProviderError::from_bot_api(status, &name)
            } else {
                ProviderError::from_rpc(code, &name)
            };
            let kind = err.kind();
            println!("error:     {err}");
            println!("kind:      {}", kind.label());
            println!("retryable: {}", kind.is_transient());
        }
    }

    Ok(())
}

fn print_config(config: &Config) {
    let c = &config.connection;
    println!("[connection]");
    println!("  cache_ttl:                  {:?}", c.cache_ttl);
    println!("  max_concurrent_connections: {}", c.max_concurrent_connections);
    println!(
        "  max_requests_per_minute:    {} per {:?}",
        c.max_requests_per_minute, c.rate_window
    );
    println!("  min_connection_interval:    {:?}", c.min_connection_interval);
    println!("  lock_spacing:               {:?}", c.lock_spacing);
    println!("  edit_cache_capacity:        {}", c.edit_cache_capacity);

    for (shape, policy) in [
        ("throwing", &config.retry.throwing),
        ("safe", &config.retry.safe),
        ("transfer", &config.retry.transfer),
    ] {
        println!("[retry.{shape}]");
        println!("  max_retries:       {}", policy.max_retries);
        println!(
            "  delay:             {:?} .. {:?} (±{:.0}%)",
            policy.base_delay,
            policy.max_delay,
            policy.jitter * 100.0
        );
        match policy.max_throttle_wait {
            Some(limit) => println!("  max_throttle_wait: {limit:?}"),
            None => println!("  max_throttle_wait: unlimited"),
        }
    }

    let chat = &config.chat_limit;
    println!("[chat_limit]");
    println!(
        "  {} calls per {:?}, then {:?} penalty",
        chat.max_requests, chat.window, chat.penalty
    );
}

fn print_schedule(policy: &RetryPolicy, jitter: bool, attempts: u32) {
    let mut total = std::time::Duration::ZERO;
    for attempt in 1..=attempts {
        let delay = if jitter {
            policy.delay_for_attempt(attempt)
        } else {
            policy.base_delay_for_attempt(attempt)
        };
        total = total.saturating_add(delay);
        println!("retry {attempt:>2}: wait {delay:.3?} (total {total:.3?})");
    }
}
