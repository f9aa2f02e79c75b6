//! sitepulse CLI - headless visitor/session telemetry agent.
//!
//! Thin wrapper over sitepulse-core: binds the capability seams to real
//! facilities (system clock, OS randomness, SQLite, HTTP) and drives the
//! agent from stdin events plus a periodic tick.

mod wiring;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use crossbeam_channel::{select, tick, unbounded};
use sitepulse_core::agent::{Agent, AgentDeps, InitOutcome};
use sitepulse_core::config::AgentConfig;
use sitepulse_core::host::{ActivityKind, ClockSource, HostEnvironment, HostEvent, PageContext};
use sitepulse_core::logging::{init_logging, LogConfig, LogFormat};
use sitepulse_core::selftest::{run_self_test, SelfTestOutcome};
use sitepulse_core::storage::{MemoryJar, SqliteStore};
use tracing::info;

use wiring::{
    HeadlessFields, HttpScriptLoader, HttpTransport, OsRandom, SystemClock, UserAgentBotGate,
};

#[derive(Parser)]
#[command(name = "sp", version, about = "Visitor/session telemetry agent")]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Collector API base URL (overrides config)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Site identifier (overrides config)
    #[arg(long, global = true, env = "SITEPULSE_SITE_ID")]
    site_id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent for one page view, reading events from stdin
    ///
    /// Event lines: `move`, `key`, `touch`, `scroll <pct>`,
    /// `click <text>`, `hide`, `show`, `quit`. EOF tears the page down.
    Run {
        /// Page URL
        #[arg(long)]
        url: String,

        /// Page title
        #[arg(long, default_value = "")]
        title: String,

        /// Document referrer
        #[arg(long)]
        referrer: Option<String>,

        /// Reported user-agent string
        #[arg(long)]
        user_agent: Option<String>,

        /// Directory for the persistent store (defaults to the user data dir)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Check collector connectivity
    Selftest,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&LogConfig {
        level: cli.log_level.clone(),
        format: if cli.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
    })
    .context("failed to initialize logging")?;

    let config = load_config(&cli)?;

    match cli.command {
        Command::Run {
            ref url,
            ref title,
            ref referrer,
            ref user_agent,
            ref data_dir,
        } => run(
            config,
            PageContext {
                url: url.clone(),
                title: title.clone(),
                referrer: referrer.clone(),
            },
            user_agent.clone(),
            data_dir.clone(),
        ),
        Command::Selftest => selftest(&config),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<AgentConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            AgentConfig::from_toml_str(&text)?
        }
        None => AgentConfig::default(),
    };
    if let Some(base_url) = &cli.base_url {
        config.api_base_url = base_url.clone();
    }
    if let Some(site_id) = &cli.site_id {
        config.site_id = site_id.clone();
    }
    Ok(config)
}

fn run(
    config: AgentConfig,
    page: PageContext,
    user_agent: Option<String>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let clock = Arc::new(SystemClock);

    let dir = match data_dir {
        Some(d) => d,
        None => dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("sitepulse"),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let store = SqliteStore::open(
        &dir.join("agent.db"),
        Arc::clone(&clock) as Arc<dyn ClockSource>,
    )?;
    let jar = MemoryJar::new(Arc::clone(&clock) as Arc<dyn ClockSource>);

    let mut agent = Agent::new(
        config,
        page,
        AgentDeps {
            clock: Arc::clone(&clock) as Arc<dyn ClockSource>,
            random: Arc::new(OsRandom),
            ephemeral: Box::new(jar),
            persistent: Box::new(store),
            transport: Box::new(HttpTransport::new()?),
            loader: Box::new(HttpScriptLoader::new()?),
            bot_gate: Box::new(UserAgentBotGate::new(user_agent.clone(), false)),
            fields: Box::new(HeadlessFields::new(user_agent)),
        },
    );

    match agent.initialize(&HostEnvironment::default()) {
        InitOutcome::Started => {}
        InitOutcome::SkippedBot => bail!("viewer classified as a bot, not starting"),
        InitOutcome::SkippedEnvironment => bail!("environment preconditions failed"),
    }

    // Stdin lines become host events on a channel so the loop can wait on
    // input and the send timer at once.
    let (event_tx, event_rx) = unbounded::<String>();
    std::thread::Builder::new()
        .name("sp-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if event_tx.send(line).is_err() {
                    break;
                }
            }
        })?;

    let ticker = tick(Duration::from_millis(agent.send_interval_ms()));
    loop {
        select! {
            recv(ticker) -> _ => agent.handle_event(HostEvent::Tick),
            recv(event_rx) -> line => {
                let Ok(line) = line else { break };
                match parse_event(&line) {
                    Some(Input::Event(event)) => agent.handle_event(event),
                    Some(Input::Quit) => break,
                    None => {}
                }
            }
        }
    }

    agent.handle_event(HostEvent::Teardown);
    info!(pending = agent.pending_len(), "page torn down");
    Ok(())
}

enum Input {
    Event(HostEvent),
    Quit,
}

fn parse_event(line: &str) -> Option<Input> {
    let line = line.trim();
    let (head, rest) = match line.split_once(' ') {
        Some((h, r)) => (h, r.trim()),
        None => (line, ""),
    };
    let event = match head {
        "move" => HostEvent::Activity(ActivityKind::PointerMove),
        "key" => HostEvent::Activity(ActivityKind::KeyPress),
        "touch" => HostEvent::Activity(ActivityKind::TouchStart),
        "scroll" => HostEvent::Activity(ActivityKind::Scroll {
            depth_pct: rest.parse().unwrap_or(0.0),
        }),
        "click" => HostEvent::Activity(ActivityKind::Click {
            text: rest.to_string(),
            tag: "UNKNOWN".to_string(),
        }),
        "hide" => HostEvent::VisibilityChanged { visible: false },
        "show" => HostEvent::VisibilityChanged { visible: true },
        "quit" => return Some(Input::Quit),
        _ => return None,
    };
    Some(Input::Event(event))
}

fn selftest(config: &AgentConfig) -> anyhow::Result<()> {
    if config.site_id.is_empty() {
        bail!("selftest requires a site id (--site-id or config file)");
    }
    let transport = HttpTransport::post_only()?;
    let outcome = run_self_test(&transport, config);
    println!("{}", outcome.message());
    if outcome != SelfTestOutcome::Pass {
        std::process::exit(1);
    }
    Ok(())
}
