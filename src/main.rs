use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use avatarcast::audio::{AudioProcessor, DirSfxLibrary, FfmpegClient, FilterKind, SfxLibrary};
use avatarcast::config::AppConfig;
use avatarcast::conns::{ConnectionManager, ControlPanelHub, QueueObserver};
use avatarcast::dsl;
use avatarcast::llm::{LlmClient, OpenAiClient};
use avatarcast::processor::{BroadcastProcessor, Collaborators, InteractionService};
use avatarcast::store::{Fixture, ImageStore, MemoryImageStore, MemoryStore, Store};
use avatarcast::tts::{HttpTtsClient, TtsEngine};

#[derive(Parser)]
#[command(name = "avatarcast", about = "Live AI-avatar broadcast runtime.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run processors for every broadcaster in a fixture and print overlay cues.
    Run {
        /// YAML config file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// YAML fixture with users, cards, rewards and queued messages
        #[arg(short, long)]
        fixture: PathBuf,
    },
    /// Parse universal TTS markup and print the resulting actions as JSON.
    Parse {
        text: String,
        /// Known voice short names
        #[arg(long, value_delimiter = ',')]
        voices: Vec<String>,
        /// Known sound effect names
        #[arg(long, value_delimiter = ',')]
        sfx: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("avatarcast=info".parse()?),
        )
        .init();

    match Cli::parse().command {
        Command::Run { config, fixture } => run(config, fixture).await,
        Command::Parse { text, voices, sfx } => parse(&text, &voices, &sfx),
    }
}

fn parse(text: &str, voices: &[String], sfx: &[String]) -> Result<()> {
    let voices: HashSet<&str> = voices.iter().map(String::as_str).collect();
    let sfx: HashSet<&str> = sfx.iter().map(String::as_str).collect();
    let actions = dsl::parse_message(
        text,
        |v| voices.contains(v.trim()),
        |f| FilterKind::from_name(f).is_some(),
        |s| sfx.contains(s),
    );
    println!("{}", serde_json::to_string_pretty(&actions)?);
    Ok(())
}

async fn run(config: Option<PathBuf>, fixture: PathBuf) -> Result<()> {
    let config = match config {
        Some(path) => AppConfig::load(&path)?,
        None => AppConfig::default(),
    };
    let fixture = Fixture::load(&fixture)
        .with_context(|| format!("failed to load fixture {}", fixture.display()))?;

    let store: Arc<dyn Store> = Arc::new(MemoryStore::from_fixture(&fixture));
    let images: Arc<dyn ImageStore> = Arc::new(MemoryImageStore::from_fixture(&fixture)?);
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(config.llm.clone()));
    let vision_llm = config
        .vision_llm
        .clone()
        .map(|c| Arc::new(OpenAiClient::new(c)) as Arc<dyn LlmClient>);
    let tts: Arc<dyn TtsEngine> = Arc::new(HttpTtsClient::new(&config.tts));
    let audio: Arc<dyn AudioProcessor> = Arc::new(FfmpegClient::new(config.ffmpeg.clone()));
    let sfx: Arc<dyn SfxLibrary> = Arc::new(DirSfxLibrary::new(config.sfx_dir.clone()));

    let hub = Arc::new(ControlPanelHub::default());
    let mut queue_events = hub.subscribe();
    tokio::spawn(async move {
        while let Ok(broadcaster_id) = queue_events.recv().await {
            info!(broadcaster = %broadcaster_id, "queue changed");
        }
    });
    let observer: Arc<dyn QueueObserver> = hub;

    let deps = Collaborators {
        store,
        images: Some(images),
        llm,
        vision_llm,
        tts,
        audio,
        sfx,
        observer,
    };
    let service = Arc::new(InteractionService::new(deps, config.processor.clone()));
    let processor = Arc::new(BroadcastProcessor::new(service));
    let manager = ConnectionManager::new(config.manager.clone(), processor);

    for user in &fixture.users {
        let (mut events, _unsubscribe) = manager.subscribe(user.id);
        let login = user.twitch_login.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match serde_json::to_string(&serde_json::json!({
                    "broadcaster": login,
                    "type": event.event_type,
                    "data": event.data_str(),
                })) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!(error = %e, "failed to encode event"),
                }
            }
        });
        manager.handle_user(user.id);
    }
    info!(users = fixture.users.len(), "avatarcast running, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    manager.shutdown();
    manager.wait().await;
    Ok(())
}
