use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use disney_tips_pipeline::config::Config;
use disney_tips_pipeline::discovery::FeedClient;
use disney_tips_pipeline::embeddings::{Embedder, OpenAiEmbedder};
use disney_tips_pipeline::llm::create_llm;
use disney_tips_pipeline::pipeline::Pipeline;
use disney_tips_pipeline::staleness::{run_check_staleness, run_verify_live, LiveCheck};
use disney_tips_pipeline::transcript::{build_transcript_source, run_preflight};

#[derive(Parser)]
#[command(name = "disney-tips")]
#[command(about = "Disney park tips pipeline: discover videos, fetch transcripts, extract and curate tips")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to disney-tips.toml or config/disney-tips.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll channel feeds and store new videos with their transcripts
    FetchVideos,
    /// Retry transcripts for stored videos that have none
    BackfillTranscripts,
    /// Extract tips from videos not yet in the processed ledger
    ExtractTips,
    /// fetch-videos followed by extract-tips
    Run,
    /// Quality filter, dedup and top-tip selection over the published tips
    DedupeTips,
    /// Embed tips that have no vector yet
    EmbedTips,
    /// Search published tips
    Search {
        /// Query text
        #[arg(required = true)]
        query: Vec<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Check how old the published tips are
    CheckStaleness {
        /// Maximum allowed age in days
        #[arg(long, allow_negative_numbers = true)]
        threshold: Option<f64>,

        /// Also require the deployed copy to match
        #[arg(long)]
        check_dist: bool,
    },
    /// Check that the deployed site serves the local tips
    VerifyLive {
        /// Site base URL
        #[arg(long)]
        url: Option<String>,

        /// Allowed lastUpdated difference in seconds
        #[arg(long, allow_negative_numbers = true)]
        max_drift: Option<i64>,
    },
    /// Check the transcript tooling and proxy
    Preflight,
}

fn init_tracing(config: &Config) {
    let level = config.log_level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("disney_tips_pipeline={},disney_tips={},warn", level, level)));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) if cli.config.is_none() => {
            let config = Config::from_env();
            init_tracing(&config);
            warn!("Failed to load config, using defaults: {:#}", e);
            return dispatch(cli.command, config).await;
        }
        Err(e) => {
            init_tracing(&Config::from_env());
            error!("❌ {:#}", e);
            return ExitCode::from(2);
        }
    };

    init_tracing(&config);
    dispatch(cli.command, config).await
}

async fn dispatch(command: Commands, config: Config) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("❌ {:#}", e);
        return ExitCode::from(2);
    }
    debug!("{}", config.summary());

    match command {
        Commands::CheckStaleness { threshold, check_dist } => {
            let dist = config.paths.dist_tips_file();
            let status = run_check_staleness(
                &config.paths.tips_file(),
                check_dist.then_some(dist.as_path()),
                threshold.unwrap_or(config.staleness.threshold_days),
                chrono::Utc::now(),
            )
            .await;
            status.into()
        }
        Commands::VerifyLive { url, max_drift } => {
            let check = LiveCheck {
                base_url: url.unwrap_or_else(|| config.staleness.live_url.clone()),
                max_drift_seconds: max_drift.unwrap_or(config.staleness.max_drift_seconds),
                request_timeout: Duration::from_secs(config.staleness.request_timeout_seconds),
                health_timeout: Duration::from_secs(config.staleness.health_timeout_seconds),
            };
            run_verify_live(&config.paths.tips_file(), &check).await.into()
        }
        Commands::Preflight => {
            let result = run_preflight(&config.transcript).await;
            result.log();
            if result.ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        command => match run_stage(command, Pipeline::new(config)).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("❌ {:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}

async fn run_stage(command: Commands, pipeline: Pipeline) -> Result<()> {
    let config = pipeline.config();
    let start_time = std::time::Instant::now();

    match command {
        Commands::FetchVideos => {
            let feeds = FeedClient::new(&config.discovery)?;
            let source = build_transcript_source(&config.transcript).await?;
            pipeline.fetch_videos(&feeds, source.as_ref()).await?;
        }
        Commands::BackfillTranscripts => {
            let source = build_transcript_source(&config.transcript).await?;
            pipeline.backfill_transcripts(source.as_ref()).await?;
        }
        Commands::ExtractTips => {
            let llm = create_llm(&config.llm)?;
            let source = build_transcript_source(&config.transcript).await?;
            pipeline.extract_tips(source.as_ref(), llm).await?;
        }
        Commands::Run => {
            let llm = create_llm(&config.llm)?;
            let feeds = FeedClient::new(&config.discovery)?;
            let source = build_transcript_source(&config.transcript).await?;
            pipeline.run(&feeds, source.as_ref(), llm).await?;
        }
        Commands::DedupeTips => {
            let llm = create_llm(&config.llm)?;
            pipeline.dedupe_tips(llm).await?;
        }
        Commands::EmbedTips => {
            let embedder = OpenAiEmbedder::new(&config.embedding)?;
            pipeline.embed_tips(&embedder).await?;
        }
        Commands::Search { query, limit } => {
            let query = query.join(" ");
            let embedder: Option<Arc<dyn Embedder>> = match OpenAiEmbedder::new(&config.embedding) {
                Ok(embedder) => Some(Arc::new(embedder)),
                Err(e) => {
                    warn!("Semantic search unavailable ({:#}), falling back to keywords", e);
                    None
                }
            };

            let results = pipeline.search(&query, embedder.as_deref(), limit).await?;
            info!("🔎 {} results for \"{}\"", results.len(), query);
            for (hit, tip) in results {
                info!("  [{:.3}] {} ({} / {})", hit.score, tip.text, tip.category, tip.park);
            }
        }
        Commands::CheckStaleness { .. } | Commands::VerifyLive { .. } | Commands::Preflight => {}
    }

    info!("🎉 Completed in {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}
