use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use vigil_broker::{NullTradingContext, OpenPosition};
use vigil_cli::alerts::{sanitize_webhook, WebhookNotifier};
use vigil_cli::llm::HttpAdvisor;
use vigil_cli::telemetry::init_tracing;
use vigil_config::{load_config, AppConfig};
use vigil_core::PositionSide;
use vigil_heartbeat::{Collaborators, HeartbeatSettings, HeartbeatSupervisor, ShutdownSignal};
use vigil_journal::JsonlJournal;
use vigil_paper::{PaperVenue, ScriptedAdvisor};

#[derive(Parser)]
#[command(author, version, about = "Vigil position-management heartbeat")]
struct Cli {
    /// Increases logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Selects which configuration environment to load (maps to config/{env}.toml)
    #[arg(long, default_value = "default")]
    env: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the heartbeat until interrupted
    Run(RunArgs),
    /// Validate configuration and print the effective settings
    Check,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Driver {
    /// Simulated in-process venue with a drifting mark price
    Paper,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum SideArg {
    Long,
    Short,
}

impl From<SideArg> for PositionSide {
    fn from(value: SideArg) -> Self {
        match value {
            SideArg::Long => PositionSide::Long,
            SideArg::Short => PositionSide::Short,
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Venue driver; real venues plug in through the vigil-broker traits
    #[arg(long, value_enum, default_value = "paper")]
    driver: Driver,
    /// Symbol of the position the paper venue seeds
    #[arg(long, default_value = "ETH")]
    symbol: String,
    #[arg(long, value_enum, default_value = "long")]
    side: SideArg,
    #[arg(long, default_value_t = 2080.0)]
    entry: f64,
    #[arg(long, default_value_t = 5.0)]
    size: f64,
    #[arg(long, default_value_t = 10_000.0)]
    equity: f64,
    /// Initial stop-loss price; omit to start unprotected
    #[arg(long)]
    stop: Option<f64>,
    /// Initial take-profit price
    #[arg(long)]
    tp: Option<f64>,
    #[arg(long)]
    liquidation: Option<f64>,
    /// Peak-to-trough amplitude of the simulated mark drift, percent
    #[arg(long, default_value_t = 2.0)]
    drift_pct: f64,
    #[arg(long)]
    webhook_url: Option<String>,
    #[arg(long)]
    journal_path: Option<PathBuf>,
    #[arg(long)]
    log_path: Option<PathBuf>,
    /// Override heartbeat.tick_interval_seconds
    #[arg(long)]
    tick_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(Some(&cli.env)).context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| match cli.verbose {
        0 => config.log_level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    });

    match cli.command {
        Commands::Run(args) => {
            init_tracing(&filter, args.log_path.as_deref())
                .context("failed to initialize logging")?;
            args.run(config).await
        }
        Commands::Check => {
            init_tracing(&filter, None).context("failed to initialize logging")?;
            let settings = HeartbeatSettings::from_config(&config.heartbeat, config.advisor.temperature);
            println!("configuration ok");
            println!("{settings:#?}");
            Ok(())
        }
    }
}

impl RunArgs {
    async fn run(self, mut config: AppConfig) -> Result<()> {
        if !config.heartbeat.enabled {
            bail!("heartbeat.enabled is false; nothing to do");
        }
        if let Some(secs) = self.tick_interval {
            config.heartbeat.tick_interval_seconds = secs;
            config.heartbeat.validate().context("invalid --tick-interval")?;
        }
        let settings =
            HeartbeatSettings::from_config(&config.heartbeat, config.advisor.temperature);

        let Driver::Paper = self.driver;
        let venue = self.build_paper_venue();

        let model: Arc<dyn vigil_broker::AdvisorModel> =
            match std::env::var(&config.advisor.api_key_env) {
                Ok(key) if !key.trim().is_empty() => {
                    info!(model = %config.advisor.model, "using HTTP advisor");
                    Arc::new(HttpAdvisor::new(
                        config.advisor.base_url.clone(),
                        key,
                        config.advisor.model.clone(),
                    ))
                }
                _ => {
                    warn!(
                        env = %config.advisor.api_key_env,
                        "advisor API key not set; using scripted hold-only advisor"
                    );
                    Arc::new(ScriptedAdvisor::new())
                }
            };

        let journal_path = self
            .journal_path
            .clone()
            .unwrap_or_else(|| config.journal.path.clone());
        let journal = JsonlJournal::open(&journal_path)
            .await
            .with_context(|| format!("failed to open journal {}", journal_path.display()))?;
        let webhook = sanitize_webhook(
            self.webhook_url
                .clone()
                .or_else(|| config.alerting.webhook_url.clone()),
        );

        let collab = Collaborators {
            market: Arc::new(venue.clone()),
            orders: Arc::new(venue.clone()),
            model,
            journal: Arc::new(journal),
            notifier: Arc::new(WebhookNotifier::new(webhook)),
            context: Arc::new(NullTradingContext),
        };

        let shutdown = ShutdownSignal::new();
        shutdown.listen_for_ctrl_c();
        self.spawn_drift(&venue, &shutdown);

        info!(
            symbol = %self.symbol,
            driver = ?self.driver,
            journal = %journal_path.display(),
            "starting heartbeat"
        );
        HeartbeatSupervisor::new(collab, settings).run(shutdown).await;
        Ok(())
    }

    fn build_paper_venue(&self) -> PaperVenue {
        let venue = PaperVenue::new(self.equity);
        let side: PositionSide = self.side.into();
        let liquidation = self.liquidation.unwrap_or(match side {
            PositionSide::Long => self.entry * 0.85,
            PositionSide::Short => self.entry * 1.15,
        });
        venue.open_position(
            OpenPosition {
                symbol: self.symbol.clone(),
                side,
                size: self.size,
                entry_price: self.entry,
                liquidation_price: liquidation,
                margin_used: self.equity * 0.1,
            },
            self.entry,
            0.00005,
        );
        if let Some(stop) = self.stop {
            venue.set_stop(&self.symbol, stop);
        }
        if let Some(tp) = self.tp {
            venue.set_take_profit(&self.symbol, tp);
        }
        venue
    }

    /// Wander the paper mark along a deterministic sine wave so triggers
    /// actually fire during a demo session.
    fn spawn_drift(&self, venue: &PaperVenue, shutdown: &ShutdownSignal) {
        let venue = venue.clone();
        let shutdown = shutdown.clone();
        let symbol = self.symbol.clone();
        let entry = self.entry;
        let amplitude = entry * self.drift_pct / 100.0;
        tokio::spawn(async move {
            let mut step = 0u64;
            while shutdown.sleep(Duration::from_secs(1)).await {
                step += 1;
                let phase = step as f64 / 90.0 * std::f64::consts::TAU;
                venue.set_mark(&symbol, entry + amplitude * phase.sin());
            }
        });
    }
}
