//! Subcommand implementations

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use mpapi_net::{Client, PushEvent, RelayServer, Session};
use serde_json::{json, Map, Value};

use crate::config::AppConfig;
use crate::state::Roster;

#[derive(Args, Debug, Default)]
pub struct PlayArgs {
    /// Send a game message every N seconds
    #[arg(long, value_name = "SECONDS")]
    pub tick: Option<u64>,
}

#[derive(Args, Debug)]
pub struct HostArgs {
    /// Session display name
    #[arg(long, default_value = "My session")]
    pub session_name: String,

    /// Hide the session from listings
    #[arg(long)]
    pub private: bool,

    /// Maximum number of participants (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_clients: i64,

    /// Hand the session to another participant when the host leaves
    #[arg(long)]
    pub host_migration: bool,

    /// Session payload as a JSON object
    #[arg(long, value_name = "JSON")]
    pub payload: Option<String>,

    #[command(flatten)]
    pub play: PlayArgs,
}

#[derive(Args, Debug)]
pub struct JoinArgs {
    /// Session code
    pub session: String,

    /// Extra join data as a JSON object
    #[arg(long, value_name = "JSON")]
    pub data: Option<String>,

    #[command(flatten)]
    pub play: PlayArgs,
}

/// Run a relay server until interrupted
pub async fn serve(config: &AppConfig) -> Result<()> {
    let server = RelayServer::start(config.server.port).await?;
    println!("Relay listening on {}", server.addr());

    tokio::signal::ctrl_c().await?;
    server.shutdown();
    Ok(())
}

pub async fn list(config: &AppConfig) -> Result<()> {
    let mut client = Client::from_config(&config.server)?;
    let sessions = client.list().await?;
    print_sessions(&sessions);
    client.shutdown().await;
    Ok(())
}

pub async fn host(config: &AppConfig, args: &HostArgs) -> Result<()> {
    let mut client = Client::from_config(&config.server)?;

    let mut data = Map::new();
    data.insert("name".into(), json!(args.session_name));
    data.insert("private".into(), json!(args.private));
    data.insert("maxClients".into(), json!(args.max_clients));
    data.insert("hostMigration".into(), json!(args.host_migration));
    data.insert("player".into(), json!(config.player.name));
    if let Some(payload) = &args.payload {
        data.insert("payload".into(), parse_object(payload)?);
    }

    let roster = watch_events(&client);
    let reply = client.host(Some(&Value::Object(data))).await?;
    println!(
        "Hosting session {} (client id {})",
        reply.session_id, reply.client_id
    );

    play(client, roster, &args.play).await
}

pub async fn join(config: &AppConfig, args: &JoinArgs) -> Result<()> {
    let mut client = Client::from_config(&config.server)?;

    let mut data = match &args.data {
        Some(text) => parse_object(text)?,
        None => json!({}),
    };
    data["name"] = json!(config.player.name);

    let roster = watch_events(&client);
    let reply = client.join(&args.session, Some(&data)).await?;
    println!(
        "Joined session {} (client id {})",
        reply.session_id, reply.client_id
    );

    play(client, roster, &args.play).await
}

pub async fn auto(config: &AppConfig, args: &PlayArgs) -> Result<()> {
    let mut client = Client::from_config(&config.server)?;

    let sessions = client.list().await?;
    print_sessions(&sessions);

    let first = sessions
        .iter()
        .find_map(|s| s.get("id").and_then(Value::as_str))
        .map(str::to_string);

    let roster = watch_events(&client);
    let data = json!({"name": config.player.name});
    let reply = match first {
        Some(session_id) => client.join(&session_id, Some(&data)).await?,
        None => client.host(Some(&data)).await?,
    };
    println!(
        "In session {} (client id {})",
        reply.session_id, reply.client_id
    );

    play(client, roster, args).await
}

/// Print every push event and keep the roster current.
///
/// Must be registered before host or join so that no early event is missed.
fn watch_events(client: &Client) -> Arc<Roster> {
    let roster = Arc::new(Roster::default());
    let tracked = roster.clone();

    client.listen(move |event: &PushEvent| {
        if let Some(notice) = tracked.apply(event) {
            println!("* {}", notice);
        }
        println!(
            "event: {} (msgId: {}, clientId: {})",
            event.kind.as_str(),
            event.message_id,
            event.client_id.as_deref().unwrap_or("null")
        );
        if !event.data.is_empty() {
            println!("data: {}", Value::Object(event.data.clone()));
        }
    });

    roster
}

/// Stay in the session until interrupted, optionally sending a message
/// every `tick` seconds
async fn play(mut client: Client, roster: Arc<Roster>, args: &PlayArgs) -> Result<()> {
    let session = client.session_info();
    roster.seed(&session);
    println!("Participants: {}", roster.members().join(", "));
    print_session(&session)?;

    let mut ticker = args
        .tick
        .map(|secs| tokio::time::interval(Duration::from_secs(secs.max(1))));
    let mut watchdog = tokio::time::interval(Duration::from_secs(1));
    let mut score: u64 = 0;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to wait for interrupt")?;
                break;
            }
            _ = next_tick(&mut ticker) => {
                score += 1;
                client.game(&json!({"score": score}), None).await?;
            }
            _ = watchdog.tick() => {}
        }

        if !client.is_receiving() {
            println!("Connection closed by server");
            break;
        }
    }

    let stats = client.stats();
    println!(
        "Sent {} messages ({} bytes), received {} ({} bytes)",
        stats.tx_messages, stats.tx_bytes, stats.rx_messages, stats.rx_bytes
    );
    client.shutdown().await;
    Ok(())
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn print_sessions(sessions: &[Value]) {
    if sessions.is_empty() {
        println!("No public sessions available.");
        return;
    }

    println!("{} public session(s):", sessions.len());
    for session in sessions {
        let id = session.get("id").and_then(Value::as_str).unwrap_or("?");
        let name = session.get("name").and_then(Value::as_str).unwrap_or("");
        println!(" - {} {}", id, name);
    }
}

fn print_session(session: &Session) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(session)?);
    Ok(())
}

fn parse_object(text: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(text).context("Invalid JSON")?;
    if !value.is_object() {
        bail!("Expected a JSON object, got {}", value);
    }
    Ok(value)
}
