//! # Scribe Session
//!
//! A standalone CLI walkthrough of collaborative editing with the Scribe SDK.
//! Every scenario runs a host and its followers on an in-memory relay, so
//! nothing leaves the process.
//!
//! ## Topology
//!
//! ```text
//!   follower ──┐
//!   follower ──┼── relay ── host   (host applies, then forwards)
//!   follower ──┘
//! ```

use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use colored::*;
use scribe_sdk::quick::{self, HOST_ID};
use scribe_sdk::{
    CursorKind, Index, MemoryRelay, Message, Payload, PeerId, ReplicaHandle, SessionToken,
};

const RECONNECT_MS: u64 = 100;
const WAIT: Duration = Duration::from_secs(5);

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "scribe-session")]
#[command(about = "Host-relayed collaborative text editing (Scribe SDK)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Basic demo: a host and two followers type concurrently and converge
    Demo,
    /// Late join: a follower arriving mid-session receives the full document
    Late,
    /// Reconnect: the relay drops a follower, then the host, and both recover
    Reconnect,
    /// Show how an entry URL maps to a role, and what goes over the wire
    Link {
        /// Entry URL; its query string names the host to join
        url: Option<String>,
    },
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn fail(text: &str) {
    println!("  {} {}", "✗".bright_red(), text.bright_red());
}

async fn show_replica(label: &str, replica: &ReplicaHandle) {
    let border = "─".repeat(44);
    println!("  ┌{}┐", border);
    println!("  │ {:^42} │", format!("Replica: {label}").bright_yellow().to_string());
    println!("  ├{}┤", border);

    match replica.state().await {
        Ok(state) => println!("  │ {:<42} │", format!("state: {state:?}")),
        Err(error) => println!("  │ {:<42} │", format!("stopped: {error}")),
    }
    if let Ok(roster) = replica.roster().await {
        let names: Vec<&str> = roster.iter().map(|p| p.name.as_str()).collect();
        println!("  │ {:<42} │", format!("peers: {}", names.join(", ")));
    }
    if let Ok(text) = replica.text().await {
        for line in text.split('\n') {
            println!("  │ {:<42} │", format!("  {line}"));
        }
    }
    println!("  └{}┘", border);
}

async fn texts(replicas: &[&ReplicaHandle]) -> Vec<String> {
    let mut texts = Vec::with_capacity(replicas.len());
    for replica in replicas {
        texts.push(replica.text().await.unwrap_or_default());
    }
    texts
}

async fn converge(replicas: &[&ReplicaHandle]) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        let texts = texts(replicas).await;
        if texts.windows(2).all(|pair| pair[0] == pair[1]) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn convergence_result(converged: bool) {
    if converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL REPLICAS CONVERGED: documents are identical!"
                .bright_green()
                .bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED: replicas differ!".bright_red().bold()
        );
    }
}

async fn go_live(label: &str, replica: &ReplicaHandle) {
    match replica.wait_until_live(WAIT).await {
        Ok(()) => step(&format!("{label} is live")),
        Err(error) => fail(&format!("{label}: {error}")),
    }
}

async fn wait_for_roster(replica: &ReplicaHandle, size: usize) {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if replica.roster().await.map_or(false, |r| r.len() == size) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn edit(label: &str, replica: &ReplicaHandle, at: Index, text: &str) {
    match replica.insert(at, text).await {
        Ok(_) => step(&format!("{label}: insert {text:?} at {}:{}", at.row, at.column)),
        Err(error) => fail(&format!("{label}: {error}")),
    }
}

// ─── Demo ──────────────────────────────────────────────────────────────────

async fn run_demo() {
    header("DEMO: Host-relayed Editing & Convergence");

    section("Phase 1: Start a session with two followers");
    let relay = MemoryRelay::new();
    let (host, followers) = quick::spawn_session(&relay, "Hana", &["Ari", "Bea"], RECONNECT_MS);
    go_live("Hana (host)", &host).await;
    for (name, follower) in ["Ari", "Bea"].iter().zip(&followers) {
        go_live(name, follower).await;
        wait_for_roster(follower, 2).await;
    }
    let (ari, bea) = (&followers[0], &followers[1]);

    section("Phase 2: Everyone types at the same time");
    edit("Hana", &host, Index::new(0, 0), "Shopping list\n").await;
    converge(&[&host, ari, bea]).await;
    let (a, b) = tokio::join!(
        ari.insert(Index::new(1, 0), "apples\n"),
        bea.insert(Index::new(1, 0), "bread\n"),
    );
    for (label, result) in [("Ari", a), ("Bea", b)] {
        match result {
            Ok(_) => step(&format!("{label}: typed on line 1")),
            Err(error) => fail(&format!("{label}: {error}")),
        }
    }
    if let Err(error) = bea.send_cursor(Index::new(1, 0), Index::new(1, 5), CursorKind::Selection).await {
        fail(&format!("Bea cursor: {error}"));
    }
    step("Bea: selected a word (cursor relayed through the host)");

    section("Phase 3: Post-sync state");
    let ok = converge(&[&host, ari, bea]).await;
    show_replica("Hana", &host).await;
    show_replica("Ari", ari).await;
    show_replica("Bea", bea).await;
    convergence_result(ok);

    for replica in [&host, ari, bea] {
        replica.shutdown().await;
    }
}

// ─── Late join ─────────────────────────────────────────────────────────────

async fn run_late() {
    header("LATE JOIN: Snapshot Transfer to a New Follower");

    section("Phase 1: The host writes alone");
    let relay = MemoryRelay::new();
    let (host, _) = quick::spawn_session(&relay, "Hana", &[], RECONNECT_MS);
    go_live("Hana (host)", &host).await;
    edit("Hana", &host, Index::new(0, 0), "Chapter 1\nIt was a dark night.").await;

    section("Phase 2: A follower arrives");
    let late = quick::spawn_follower(&relay, "Lou", RECONNECT_MS);
    go_live("Lou", &late).await;
    let ok = converge(&[&host, &late]).await;
    show_replica("Lou", &late).await;
    convergence_result(ok);

    section("Phase 3: The newcomer edits the received text");
    edit("Lou", &late, Index::new(1, 9), " stormy").await;
    let ok = converge(&[&host, &late]).await;
    show_replica("Hana", &host).await;
    convergence_result(ok);

    late.shutdown().await;
    host.shutdown().await;
}

// ─── Reconnect ─────────────────────────────────────────────────────────────

async fn run_reconnect() {
    header("RECONNECT: Dropped Links, Automatic Recovery & Resync");

    section("Phase 1: Baseline session");
    let relay = MemoryRelay::new();
    let (host, followers) = quick::spawn_session(&relay, "Hana", &["Ari"], RECONNECT_MS);
    let ari = &followers[0];
    go_live("Hana (host)", &host).await;
    go_live("Ari", ari).await;
    edit("Hana", &host, Index::new(0, 0), "v1").await;
    converge(&[&host, ari]).await;

    section("Phase 2: The relay drops Ari");
    if let Ok(Some(id)) = ari.peer_id().await {
        relay.drop_peer(&id);
        step(&format!("dropped registration {id}"));
    }
    edit("Hana", &host, Index::new(0, 2), " + offline edit").await;
    go_live("Ari (new registration)", ari).await;
    let ok = converge(&[&host, ari]).await;
    show_replica("Ari", ari).await;
    convergence_result(ok);

    section("Phase 3: The relay drops the host");
    relay.drop_peer(&PeerId::new(HOST_ID));
    step("host registration dropped; followers fall back to reconnecting");
    tokio::time::sleep(Duration::from_millis(RECONNECT_MS)).await;
    go_live("Hana (same session id)", &host).await;
    go_live("Ari", ari).await;
    edit("Ari", ari, Index::new(0, 0), "[back] ").await;
    let ok = converge(&[&host, ari]).await;
    show_replica("Hana", &host).await;
    convergence_result(ok);

    ari.shutdown().await;
    host.shutdown().await;
}

// ─── Link ──────────────────────────────────────────────────────────────────

fn run_link(url: Option<String>) {
    header("LINK: Entry URLs & Wire Format");

    let url = url.unwrap_or_else(|| format!("https://scribe.example/?{HOST_ID}"));
    section(&format!("Entry URL: {url}"));
    match SessionToken::from_url(&url) {
        SessionToken::Host => step("no host in the query: this replica hosts a new session"),
        SessionToken::Join(host) => step(&format!("joins the session hosted by {}", host.as_str().bright_magenta())),
    }

    section("A cursor message as sent over a channel");
    let message = Message::new(
        PeerId::new("follower-1"),
        Payload::Cursor {
            start: Index::new(0, 2),
            end: Index::new(0, 7),
            cursor_kind: CursorKind::Selection,
        },
    );
    match serde_json::to_string_pretty(&message) {
        Ok(json) => {
            for line in json.lines() {
                println!("    {}", line.dimmed());
            }
        }
        Err(error) => fail(&error.to_string()),
    }
}

// ─── Main ──────────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Demo => run_demo().await,
        Commands::Late => run_late().await,
        Commands::Reconnect => run_reconnect().await,
        Commands::Link { url } => run_link(url),
    }
}
