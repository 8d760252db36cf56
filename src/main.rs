//! Command line interface for the live-stream node. Publishes live activity
//! and deletion events, queries relays, and bridges the live chat.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use castr::broadcast::PublishOutcome;
use castr::chat::{self, ChatFeed, StreamRef};
use castr::config::Settings;
use castr::event::{unix_now, KIND_LIVE_ACTIVITY};
use castr::filter::Filter;
use castr::keys::{hex_to_npub, npub_to_hex};
use castr::live::{self, Lifecycle, StreamSignal, STATUS_LIVE};
use castr::{Client, Published};

/// Command line interface entry point.
#[derive(Parser)]
#[command(name = "castr", author, version, about = "Nostr engine for a live-video node")]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Log at debug level.
    #[arg(long, short)]
    verbose: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Show the configured identity and relays.
    Whoami,
    /// Announce a new live session.
    Announce {
        /// Session identifier; defaults to the current Unix time.
        #[arg(long)]
        d: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },
    /// Change the status of an existing session.
    Update {
        #[arg(long)]
        d: String,
        #[arg(long, default_value = STATUS_LIVE)]
        status: String,
        /// Session start time; defaults to `d` when it is a timestamp.
        #[arg(long)]
        starts: Option<u64>,
        #[arg(long)]
        ends: Option<u64>,
    },
    /// Mark a session ended.
    End {
        #[arg(long)]
        d: String,
        #[arg(long)]
        starts: Option<u64>,
        /// End time; defaults to now.
        #[arg(long)]
        ends: Option<u64>,
    },
    /// Request deletion of an event.
    Delete {
        /// Id of the event to delete.
        id: String,
        /// Kind of the event to delete.
        #[arg(long)]
        kind: u32,
        #[arg(long, default_value = "")]
        reason: String,
        /// Coordinate (`kind:pubkey:d`) of a replaceable event.
        #[arg(long)]
        coordinate: Option<String>,
    },
    /// List recent live sessions.
    List {
        #[arg(long, default_value_t = 20)]
        limit: u32,
        /// Author as npub or hex; defaults to the configured key.
        #[arg(long)]
        author: Option<String>,
    },
    /// Fetch one event by id and print it as JSON.
    Get { id: String },
    /// Live chat for a session.
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },
    /// Drive the session lifecycle from stdin (`start`, `update <status>`,
    /// `reconnect`, `stop`).
    Live,
}

/// Operations available under `castr chat`.
#[derive(Subcommand)]
enum ChatAction {
    /// Print chat messages as they arrive.
    Tail {
        /// Session `d` tag, or a full `30311:<pubkey>:<d>` coordinate.
        #[arg(long)]
        d: String,
        #[arg(long)]
        author: Option<String>,
        /// Only messages newer than this Unix time.
        #[arg(long)]
        since: Option<u64>,
    },
    /// Post one chat message.
    Send {
        #[arg(long)]
        d: String,
        #[arg(long)]
        author: Option<String>,
        message: String,
        /// Id of the message being replied to.
        #[arg(long)]
        reply: Option<String>,
    },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = Settings::from_env(&cli.env)?;
    let client = Client::from_settings(&cfg).context("loading signing key")?;
    match cli.command {
        Commands::Whoami => {
            match (client.npub(), client.public_key()) {
                (Some(npub), Some(hex)) => {
                    println!("npub: {npub}");
                    println!("hex:  {hex}");
                }
                _ => println!("publishing disabled: NOSTR_NSEC is not configured"),
            }
            for relay in client.relays() {
                println!("relay: {relay}");
            }
        }
        Commands::Announce { d, title } => {
            let mut info = cfg.stream.clone();
            if let Some(title) = title {
                info.title = title;
            }
            let starts = unix_now();
            let d = d.unwrap_or_else(|| starts.to_string());
            let published = client.publish(live::announce(&d, &info, starts)).await?;
            println!("d: {d}");
            report(&published);
        }
        Commands::Update {
            d,
            status,
            starts,
            ends,
        } => {
            let starts = starts_for(&d, starts);
            let builder = live::update(&d, &cfg.stream, starts, &status, ends);
            report(&client.publish(builder).await?);
        }
        Commands::End { d, starts, ends } => {
            let starts = starts_for(&d, starts);
            let ends = ends.unwrap_or_else(unix_now);
            report(&client.publish(live::end(&d, &cfg.stream, starts, ends)).await?);
        }
        Commands::Delete {
            id,
            kind,
            reason,
            coordinate,
        } => {
            let builder = live::deletion(&id, kind, &reason, coordinate.as_deref());
            let published = client.publish(builder).await?;
            report(&published);
            published.require_accepted()?;
        }
        Commands::List { limit, author } => {
            let mut filter = Filter::new().kind(KIND_LIVE_ACTIVITY).limit(limit);
            if let Some(author) = author_hex(author)?.or_else(|| client.public_key()) {
                filter = filter.author(author);
            }
            let events = client.fetch(vec![filter], &[], None).await;
            for ev in live::latest_activities(events).into_iter().take(limit as usize) {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    ev.created_at,
                    ev.tag_value("d").unwrap_or_default(),
                    ev.tag_value("status").unwrap_or_default(),
                    ev.tag_value("title").unwrap_or_default(),
                    ev.id
                );
            }
        }
        Commands::Get { id } => match client.fetch_event(&id).await {
            Some(ev) => println!("{}", serde_json::to_string_pretty(&ev)?),
            None => bail!("event not found: {id}"),
        },
        Commands::Chat { action } => handle_chat(action, &client).await?,
        Commands::Live => drive_lifecycle(client, cfg).await?,
    }
    Ok(())
}

async fn handle_chat(action: ChatAction, client: &Client) -> anyhow::Result<()> {
    match action {
        ChatAction::Tail { d, author, since } => {
            let stream = stream_ref(client, author, d)?;
            let mut feed = ChatFeed::open(client, stream, since);
            loop {
                tokio::select! {
                    msg = feed.next() => match msg {
                        Some(msg) => println!("{}\t{}\t{}", msg.created_at, author_label(&msg.author), msg.content),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        feed.close();
                        break;
                    }
                }
            }
        }
        ChatAction::Send {
            d,
            author,
            message,
            reply,
        } => {
            let stream = stream_ref(client, author, d)?;
            let builder = chat::message(&stream, &message, reply.as_deref());
            report(&client.publish(builder).await?);
        }
    }
    Ok(())
}

async fn drive_lifecycle(client: Client, cfg: Settings) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel(16);
    let driver = tokio::spawn(Lifecycle::new(client, cfg.stream).run(rx));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match parse_signal(&line, unix_now()) {
            Some(signal) => tx.send(signal).await?,
            None => warn!(line = %line, "unknown command; expected start, update <status>, reconnect or stop"),
        }
    }
    drop(tx);
    let lifecycle = driver.await?;
    if let Some(session) = lifecycle.session() {
        println!("session {} still {}", session.d, session.status);
    }
    Ok(())
}

fn parse_signal(line: &str, now: u64) -> Option<StreamSignal> {
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "start" => Some(StreamSignal::Started { at: now }),
        "update" => Some(StreamSignal::Updated {
            status: parts.next().unwrap_or(STATUS_LIVE).to_string(),
        }),
        "reconnect" => Some(StreamSignal::Reconnected),
        "stop" => Some(StreamSignal::Stopped { at: now }),
        _ => None,
    }
}

fn stream_ref(client: &Client, author: Option<String>, d: String) -> anyhow::Result<StreamRef> {
    if d.contains(':') {
        let stream = StreamRef::parse(&d)?;
        return Ok(StreamRef::new(npub_or_hex(&stream.author)?, stream.d));
    }
    match author_hex(author)?.or_else(|| client.public_key()) {
        Some(author) => Ok(StreamRef::new(author, d)),
        None => bail!("--author is required when no signing key is configured"),
    }
}

fn author_hex(author: Option<String>) -> anyhow::Result<Option<String>> {
    author.as_deref().map(npub_or_hex).transpose()
}

/// Accept a public key as `npub1...` or hex; returns lowercase hex.
fn npub_or_hex(author: &str) -> anyhow::Result<String> {
    let author = author.trim();
    if author.get(..5).map_or(false, |p| p.eq_ignore_ascii_case("npub1")) {
        Ok(npub_to_hex(author)?)
    } else {
        Ok(author.to_ascii_lowercase())
    }
}

fn starts_for(d: &str, starts: Option<u64>) -> u64 {
    starts.or_else(|| d.parse().ok()).unwrap_or_else(unix_now)
}

/// Abbreviated npub for chat lines; falls back to the raw key prefix.
fn author_label(pubkey: &str) -> String {
    match hex_to_npub(pubkey) {
        Ok(npub) => npub.get(..16).unwrap_or(&npub).to_string(),
        Err(_) => pubkey.get(..8).unwrap_or(pubkey).to_string(),
    }
}

fn report(published: &Published) {
    match &published.event {
        Some(ev) => {
            println!("id: {}", ev.id);
            print!("{}", render_outcomes(&published.outcomes));
        }
        None => println!("publishing disabled; nothing sent"),
    }
}

/// Per-relay accept/reject table.
fn render_outcomes(outcomes: &[PublishOutcome]) -> String {
    let width = outcomes
        .iter()
        .map(|o| o.relay.len())
        .max()
        .unwrap_or(0)
        .max("RELAY".len());
    let mut out = format!("{:<width$}  {:<8}  MESSAGE\n", "RELAY", "RESULT");
    for o in outcomes {
        let result = if o.accepted { "accepted" } else { "rejected" };
        out.push_str(&format!(
            "{:<width$}  {:<8}  {}\n",
            o.relay,
            result,
            o.message.as_deref().unwrap_or("")
        ));
    }
    let accepted = outcomes.iter().filter(|o| o.accepted).count();
    out.push_str(&format!("{accepted}/{} relays accepted\n", outcomes.len()));
    out
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use castr::relay::ConnectOptions;
    use std::time::Duration;

    #[test]
    fn live_commands() {
        assert_eq!(parse_signal("start", 7), Some(StreamSignal::Started { at: 7 }));
        assert_eq!(
            parse_signal("update paused", 7),
            Some(StreamSignal::Updated {
                status: "paused".into()
            })
        );
        assert_eq!(
            parse_signal("update", 7),
            Some(StreamSignal::Updated {
                status: "live".into()
            })
        );
        assert_eq!(parse_signal(" reconnect ", 7), Some(StreamSignal::Reconnected));
        assert_eq!(parse_signal("stop", 9), Some(StreamSignal::Stopped { at: 9 }));
        assert_eq!(parse_signal("launch", 7), None);
    }

    #[test]
    fn outcome_table() {
        let table = render_outcomes(&[
            PublishOutcome {
                relay: "wss://a.example".into(),
                accepted: true,
                message: None,
            },
            PublishOutcome {
                relay: "wss://b".into(),
                accepted: false,
                message: Some("blocked: test".into()),
            },
        ]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("RELAY"));
        assert!(lines[1].starts_with("wss://a.example  accepted"));
        assert!(lines[2].starts_with("wss://b          rejected  blocked: test"));
        assert_eq!(lines[3], "1/2 relays accepted");
    }

    #[test]
    fn starts_defaults_to_numeric_d() {
        assert_eq!(starts_for("1700000000", None), 1700000000);
        assert_eq!(starts_for("1700000000", Some(5)), 5);
        assert!(starts_for("my-show", None) > 1_600_000_000);
    }

    const PK: &str = "1b84c5567b126440995d3ed5aaba0565d71e1834604819ff9c17f5e9d5dd078f";
    const NPUB: &str = "npub1rwzv24nmzfjypx2a8m264ws9vht3uxp5vpypnluuzl67n4waq78suk0wul";

    fn disabled_client() -> Client {
        let opts = ConnectOptions {
            timeout: Duration::from_secs(1),
            proxy: None,
        };
        Client::new("", vec![], opts, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn authors_accept_npub_or_hex() {
        assert_eq!(npub_or_hex(NPUB).unwrap(), PK);
        assert_eq!(npub_or_hex(&PK.to_uppercase()).unwrap(), PK);
        assert!(npub_or_hex("npub1broken").is_err());
        assert_eq!(author_hex(None).unwrap(), None);
    }

    #[test]
    fn stream_ref_accepts_full_coordinate() {
        let client = disabled_client();
        let stream = stream_ref(&client, None, format!("30311:{NPUB}:1700")).unwrap();
        assert_eq!(stream.coordinate(), format!("30311:{PK}:1700"));
        let stream = stream_ref(&client, Some(NPUB.into()), "42".into()).unwrap();
        assert_eq!(stream.author, PK);
        assert!(stream_ref(&client, None, "42".into()).is_err());
        assert!(stream_ref(&client, None, "1:pk:d".into()).is_err());
    }

    #[test]
    fn chat_author_label_uses_npub() {
        assert_eq!(author_label(PK), &NPUB[..16]);
        assert_eq!(author_label("not-hex-at-all"), "not-hex-");
    }

    #[test]
    fn cli_parses_nested_chat_command() {
        let cli = Cli::try_parse_from([
            "castr", "--env", "x.env", "chat", "send", "--d", "1", "hello", "--reply", "ee",
        ])
        .unwrap();
        assert_eq!(cli.env, "x.env");
        match cli.command {
            Commands::Chat {
                action: ChatAction::Send { d, message, reply, .. },
            } => {
                assert_eq!(d, "1");
                assert_eq!(message, "hello");
                assert_eq!(reply.as_deref(), Some("ee"));
            }
            _ => panic!("wrong command"),
        }
    }
}
