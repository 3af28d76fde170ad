//! Command-line harness for the reply correlation engine
//!
//! Every command runs over an in-process loopback bus carrying `char`
//! messages. `--reply` installs a peer that answers the sent message, which
//! is handy for trying out `any` and `all` patterns by hand.

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use reply_handling::{
    AsyncReplyHandler, BlockingReplyHandler, HookId, MessageBus, ReplyError, Sentinels, Timeout,
    Transport,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{parse_timeout, Config};

#[derive(Parser)]
#[command(name = "reply")]
#[command(about = "Send messages over a loopback bus and wait for pattern-matched replies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for the first message matching any pattern
    Any(WaitArgs),

    /// Wait until every pattern has been matched
    All(WaitArgs),

    /// Subscribe to a pattern, then send each message through the bus
    Watch {
        pattern: String,
        messages: Vec<String>,
    },
}

#[derive(Args)]
struct WaitArgs {
    /// Message to send once the patterns are registered
    #[arg(long)]
    send: String,

    /// Timeout in milliseconds, -1 waits forever
    #[arg(long, allow_hyphen_values = true)]
    timeout: Option<String>,

    /// Use the async waiter instead of the blocking one
    #[arg(long = "async")]
    use_async: bool,

    /// Reply the simulated peer sends back (repeatable, sent in order)
    #[arg(long = "reply")]
    replies: Vec<String>,

    /// Patterns to wait for
    #[arg(required = true)]
    patterns: Vec<String>,
}

#[derive(Clone, Copy)]
enum Mode {
    Any,
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,reply_handling=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let cli = Cli::parse();
    match cli.command {
        Commands::Any(args) => wait(&config, Mode::Any, args).await,
        Commands::All(args) => wait(&config, Mode::All, args).await,
        Commands::Watch { pattern, messages } => watch(&config, &pattern, &messages),
    }
}

async fn wait(config: &Config, mode: Mode, args: WaitArgs) -> Result<()> {
    let timeout = match &args.timeout {
        Some(value) => parse_timeout(value).context("--timeout must be a whole number")?,
        None => config.default_timeout,
    };

    let bus = MessageBus::new();
    let _peer = install_peer(&bus, &args.send, &args.replies);

    let message = chars(&args.send);
    let patterns: Vec<Vec<char>> = args.patterns.iter().map(|p| chars(p)).collect();

    let flavor = if args.use_async { "(async)" } else { "(blocking)" };
    println!(
        "{} {} {} {}",
        "→".bright_cyan(),
        args.send.bold(),
        format!("[{}]", timeout).dimmed(),
        flavor.dimmed()
    );

    let outcome = if args.use_async {
        let handler = AsyncReplyHandler::new(bus.clone(), config.sentinels());
        match mode {
            Mode::Any => handler
                .send_and_match_any(&message, timeout, &patterns)
                .await
                .map(|reply| vec![reply]),
            Mode::All => {
                handler
                    .send_and_match_all(&message, timeout, &patterns)
                    .await
            }
        }
    } else {
        let sentinels = config.sentinels();
        let bus = bus.clone();
        tokio::task::spawn_blocking(move || {
            wait_blocking(bus, sentinels, mode, &message, timeout, &patterns)
        })
        .await
        .context("blocking waiter panicked")?
    };

    match outcome {
        Ok(replies) => {
            for reply in &replies {
                println!("{} {}", "✓".bright_green(), text(reply).green());
            }
            Ok(())
        }
        Err(err @ ReplyError::Timeout { .. }) => {
            println!("{} {}", "✗".bright_red(), err.to_string().red());
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

fn wait_blocking(
    bus: MessageBus<char>,
    sentinels: Sentinels<char>,
    mode: Mode,
    message: &[char],
    timeout: Timeout,
    patterns: &[Vec<char>],
) -> reply_handling::Result<Vec<Vec<char>>> {
    let handler = BlockingReplyHandler::new(bus, sentinels);
    match mode {
        Mode::Any => handler
            .send_and_match_any(message, timeout, patterns)
            .map(|reply| vec![reply]),
        Mode::All => handler.send_and_match_all(message, timeout, patterns),
    }
}

fn watch(config: &Config, pattern: &str, messages: &[String]) -> Result<()> {
    let bus = MessageBus::new();
    let handler = BlockingReplyHandler::new(bus.clone(), config.sentinels());

    println!("{} {}", "watching".bright_cyan(), pattern.bold());
    let subscription = handler.subscribe(chars(pattern), |msg: &[char]| {
        println!("  {} {}", "✓".bright_green(), text(msg).green());
    });

    for message in messages {
        println!("{} {}", "→".dimmed(), message);
        bus.send(&chars(message))?;
    }

    drop(subscription);
    println!(
        "{} {} message(s) sent",
        "done".bright_blue(),
        messages.len()
    );
    Ok(())
}

/// Simulated peer answering one request. Dropping it detaches the hook,
/// which also releases the bus handle the hook holds.
struct Peer {
    bus: MessageBus<char>,
    hook: Option<HookId>,
}

/// Answer `request` with `replies`, in order, from inside the send.
fn install_peer(bus: &MessageBus<char>, request: &str, replies: &[String]) -> Peer {
    if replies.is_empty() {
        return Peer {
            bus: bus.clone(),
            hook: None,
        };
    }

    let peer = bus.clone();
    let request = chars(request);
    let replies: Vec<Vec<char>> = replies.iter().map(|r| chars(r)).collect();
    let hook = bus.attach(Arc::new(move |msg: &[char]| {
        if msg == request.as_slice() {
            for reply in &replies {
                peer.publish(reply);
            }
        }
    }));

    Peer {
        bus: bus.clone(),
        hook: Some(hook),
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            self.bus.detach(hook);
        }
    }
}

fn chars(s: &str) -> Vec<char> {
    s.chars().collect()
}

fn text(message: &[char]) -> String {
    message.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_peer_answers_request_until_dropped() {
        let bus = MessageBus::<char>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.attach(Arc::new(move |msg: &[char]| {
            sink.lock().unwrap().push(text(msg));
        }));

        let peer = install_peer(&bus, "ping", &["pong".to_string(), "done".to_string()]);
        assert_eq!(bus.hook_count(), 2);
        bus.send(&chars("ping")).unwrap();

        drop(peer);
        assert_eq!(bus.hook_count(), 1);
        bus.send(&chars("ping")).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["ping", "pong", "done", "ping"]);
    }

    #[test]
    fn test_peer_without_replies_attaches_nothing() {
        let bus = MessageBus::<char>::new();
        let peer = install_peer(&bus, "ping", &[]);
        assert_eq!(bus.hook_count(), 0);
        drop(peer);
    }
}
