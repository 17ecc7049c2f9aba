//! # kgchat
//!
//! Terminal client for the multi-agent knowledge-graph chat service.
//! Connects with the persisted session identity, sends turns, and prints
//! finalized agent answers, deliberation progress and graph highlights.

#![deny(unsafe_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use kgchat_client::{
    ChatClient, Conversation, HighlightMap, HighlightSet, MessageKind, SessionIdentityStore,
};
use kgchat_core::{ChatMode, InboundEvent, ThinkTankEvent};
use kgchat_settings::KgchatSettings;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Quiet period that ends an orchestrator turn once it has answered.
const ORCHESTRATOR_SETTLE: Duration = Duration::from_secs(3);

/// Chat with the knowledge-graph agent team.
#[derive(Parser, Debug)]
#[command(name = "kgchat", about = "Chat with the knowledge-graph agent team")]
struct Cli {
    /// Backend WebSocket URL (overrides settings).
    #[arg(long, global = true)]
    url: Option<String>,

    /// Settings file (default `~/.kgchat/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message and print the answers.
    Chat {
        /// Routing mode: group, orchestrator or `think_tank`.
        #[arg(long)]
        mode: Option<ChatMode>,

        /// Give up after this many seconds without a frame.
        #[arg(long, default_value = "120")]
        idle_timeout: u64,

        /// Message text.
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Stay connected and print every event until Ctrl-C.
    Listen,
    /// Print the persisted session identity.
    Session,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli
        .settings
        .clone()
        .unwrap_or_else(kgchat_settings::settings_path);
    let mut settings = kgchat_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    if let Some(url) = cli.url {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            bail!("--url must use ws:// or wss://, got `{url}`");
        }
        settings.server.url = url;
    }
    kgchat_core::logging::init_subscriber(&settings.logging.level);

    match cli.command {
        Command::Session => {
            let store = SessionIdentityStore::from_settings(&settings.session);
            println!("{}", store.get_or_create_session_id());
            Ok(())
        }
        Command::Chat {
            mode,
            idle_timeout,
            message,
        } => {
            let mode = mode.unwrap_or(settings.chat.default_mode);
            chat(
                &settings,
                mode,
                &message.join(" "),
                Duration::from_secs(idle_timeout),
            )
            .await
        }
        Command::Listen => listen(&settings).await,
    }
}

async fn connect(
    settings: &KgchatSettings,
) -> Result<(ChatClient, mpsc::UnboundedReceiver<HighlightSet>)> {
    let (highlight_tx, highlight_rx) = mpsc::unbounded_channel();
    let client = ChatClient::websocket(settings, Box::new(highlight_tx));
    client.start().await;
    tokio::time::timeout(CONNECT_TIMEOUT, client.connection().wait_until_open())
        .await
        .with_context(|| format!("could not reach {}", settings.server.url))?;
    tracing::info!(url = %settings.server.url, "connected");
    Ok((client, highlight_rx))
}

async fn chat(settings: &KgchatSettings, mode: ChatMode, message: &str, idle: Duration) -> Result<()> {
    let (client, mut highlight_rx) = connect(settings).await?;
    let mut events = client.subscribe();
    client.send_chat(message, mode).context("failed to send message")?;

    let mut highlights = HighlightMap::new();
    let mut transcript = Transcript::default();
    let mut answered = false;
    loop {
        let wait = if answered { ORCHESTRATOR_SETTLE } else { idle };
        let event = match tokio::time::timeout(wait, events.recv()).await {
            Err(_) if answered => break,
            Err(_) => {
                eprintln!("no response for {}s, giving up", idle.as_secs());
                break;
            }
            Ok(Err(RecvError::Lagged(skipped))) => {
                tracing::warn!(skipped, "renderer fell behind");
                continue;
            }
            Ok(Err(RecvError::Closed)) => break,
            Ok(Ok(event)) => event,
        };
        while let Ok(set) = highlight_rx.try_recv() {
            highlights.merge(set);
        }
        render(&client, &mut transcript, &event);
        answered |= settles_turn(mode, &event);
        if turn_finished(mode, &event) {
            break;
        }
    }

    print_highlights(&highlights);
    client.shutdown().await;
    Ok(())
}

async fn listen(settings: &KgchatSettings) -> Result<()> {
    let (client, mut highlight_rx) = connect(settings).await?;
    let mut events = client.subscribe();
    let mut transcript = Transcript::default();
    eprintln!("listening on {} (Ctrl-C to quit)", settings.server.url);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    tracing::debug!(frame_type = event.kind(), "event");
                    render(&client, &mut transcript, &event);
                }
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "renderer fell behind"),
                Err(RecvError::Closed) => break,
            },
            Some(set) = highlight_rx.recv() => {
                eprintln!("  highlights from {}: {} node(s), {} edge(s)", set.agent_id, set.nodes.len(), set.edges.len());
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

/// Orchestrator turns have no completion frame; after the first response
/// the turn ends once the stream goes quiet.
fn settles_turn(mode: ChatMode, event: &InboundEvent) -> bool {
    mode == ChatMode::Orchestrator
        && matches!(event, InboundEvent::AgentResponse { response: Some(_), .. })
}

fn turn_finished(mode: ChatMode, event: &InboundEvent) -> bool {
    match event {
        InboundEvent::Error { .. } => true,
        InboundEvent::AllComplete => mode != ChatMode::ThinkTank,
        InboundEvent::ResponseComplete { final_summary } => *final_summary,
        _ => false,
    }
}

/// Prints each agent message once, as soon as it is finalized.
#[derive(Default)]
struct Transcript {
    printed: HashSet<usize>,
}

impl Transcript {
    fn flush(&mut self, conversation: &Conversation) {
        for (idx, msg) in conversation.messages().iter().enumerate() {
            if msg.kind != MessageKind::Agent || msg.streaming || !self.printed.insert(idx) {
                continue;
            }
            let name = msg
                .agent_name
                .as_deref()
                .or(msg.agent_id.as_deref())
                .unwrap_or("agent");
            println!("\n[{name}]\n{}", msg.content);
        }
    }
}

/// Print what `event` changed, reading the already-updated state.
fn render(client: &ChatClient, transcript: &mut Transcript, event: &InboundEvent) {
    let state = client.state();
    transcript.flush(state.conversation());
    match event {
        InboundEvent::Connected { graph_stats, .. } => {
            if let Some(stats) = graph_stats {
                eprintln!("graph: {} nodes, {} edges", stats.nodes, stats.edges);
            }
        }
        InboundEvent::Processing { message } => {
            eprintln!("{}", message.as_deref().unwrap_or("processing..."));
        }
        InboundEvent::AgentTyping { agent_id, agent_name } => {
            eprintln!("{} is typing...", agent_name.as_deref().unwrap_or(agent_id));
        }
        InboundEvent::Error { message } => eprintln!("error: {message}"),
        InboundEvent::ThinkTankSystem(sub) => {
            let rounds = state.rounds();
            match sub {
                ThinkTankEvent::RoundStart { round, max_rounds } => {
                    eprintln!("\n── round {round}/{max_rounds} ──");
                }
                ThinkTankEvent::Citations { agent_id, citations } => {
                    eprintln!("  {agent_id} made {} citation(s)", citations.len());
                }
                ThinkTankEvent::ConsensusUpdate { .. } => {
                    if let Some(consensus) = rounds.consensus() {
                        eprintln!("  consensus {:.0}%", consensus.score * 100.0);
                    }
                }
                ThinkTankEvent::RoundComplete { agents_responded } => {
                    eprintln!("  {agents_responded} agent(s) responded");
                }
                ThinkTankEvent::SummaryStart { .. } => eprintln!("\nsummarizing..."),
                ThinkTankEvent::Unknown => {}
            }
        }
        InboundEvent::ResponseComplete { final_summary: true } => {
            let citations = state.rounds().citations();
            if !citations.is_empty() {
                println!("\ncitations:");
                for c in citations {
                    println!("  {} ({})", c.original, c.agent_id);
                }
            }
        }
        _ => {}
    }
}

fn print_highlights(highlights: &HighlightMap) {
    if highlights.is_empty() {
        return;
    }
    println!("\nhighlighted in the graph:");
    for node in highlights.nodes() {
        println!(
            "  {:<24} {:>4.0}%{}  {}",
            node.node_id,
            node.intensity * 100.0,
            if node.pulse { " *" } else { "  " },
            node.agents.join(", ")
        );
    }
    for edge in highlights.edges() {
        println!(
            "  {} -[{}]-> {}",
            edge.source,
            edge.relationship.as_deref().unwrap_or("related"),
            edge.target
        );
    }
}
