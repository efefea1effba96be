// SYNOID Repurpose Entry Point
// Copyright (c) 2026 Xing_The_Creator | SYNOID

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use synoid_repurpose::agent::gpt_oss_bridge::SynoidAgent;
use synoid_repurpose::agent::memory_index::MemoryIndex;
use synoid_repurpose::agent::pipeline::{cancel_pair, PersonalizedScript, PipelineOrchestrator, PipelineRun, ServiceSet};
use synoid_repurpose::agent::rewriter::RewriteOptions;
use synoid_repurpose::agent::script::{render_scene_script, VideoAnalysis};
use synoid_repurpose::agent::vision_tools::FfmpegSceneDetector;
use synoid_repurpose::config::{PersonalizerConfig, DEFAULT_API_URL, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[command(name = "synoid-repurpose")]
#[command(about = "SYNOID Repurpose: rewrite reference scripts into your own grounded story", long_about = None)]
struct Cli {
    /// Personalizer config file (JSON)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Free-text personality file the rewrites are grounded in
    #[arg(long, default_value = "personality.txt")]
    personality: PathBuf,

    /// Name the rewriter speaks as (overrides the config file)
    #[arg(long)]
    persona: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a reference video and personalize its dialogue
    Video {
        /// Input video path
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the structured scene analysis
        #[arg(long, default_value = "video_analysis.json")]
        analysis: PathBuf,

        /// Where to write the human-readable scene script
        #[arg(long, default_value = "raw_script.txt")]
        raw_script: PathBuf,

        /// Personalized script output path
        #[arg(short, long, default_value = "personalized_script.txt")]
        output: PathBuf,

        /// Extra instructions for the rewriter (tone, length...)
        #[arg(long)]
        instructions: Option<String>,

        /// Offer to regenerate after each run
        #[arg(long)]
        interactive: bool,
    },

    /// Personalize a line-delimited reference script
    Script {
        /// Input script path
        #[arg(short, long)]
        input: PathBuf,

        /// Personalized script output path
        #[arg(short, long, default_value = "personalized_script.txt")]
        output: PathBuf,

        /// Extra instructions for the rewriter (tone, length...)
        #[arg(long)]
        instructions: Option<String>,

        /// Offer to regenerate after each run
        #[arg(long)]
        interactive: bool,
    },

    /// Build (or refresh) the persisted personality index and exit
    Index,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("--- SYNOID REPURPOSE v{} ---", env!("CARGO_PKG_VERSION"));

    let args = Cli::parse();
    let mut config = PersonalizerConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    if let Some(persona) = args.persona.clone() {
        config.persona_name = persona;
    }

    let api_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;
    let api_url = std::env::var("SYNOID_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
    let agent = Arc::new(SynoidAgent::new(&api_url, &api_key, &config).context("building API client")?);

    let personality = std::fs::read_to_string(&args.personality)
        .with_context(|| format!("reading personality file {}", args.personality.display()))?;

    if let Commands::Index = args.command {
        let index = MemoryIndex::build(
            &personality,
            config.chunk_size,
            config.chunk_overlap,
            agent.clone(),
            config.retry.clone(),
        )
        .await?;
        index.save(&config.index_path, config.chunk_size, config.chunk_overlap)?;
        info!("✅ Index with {} chunks written to {:?}", index.len(), config.index_path);
        return Ok(());
    }

    let mut services = ServiceSet::new(agent.clone(), agent.clone());
    services.vision = Some(agent.clone());
    services.transcriber = Some(agent.clone());
    services.detector = Some(Arc::new(FfmpegSceneDetector::new(
        config.scene_threshold,
        config.min_scene_len,
    )));

    let (cancel, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received, cancelling run...");
            cancel.cancel();
        }
    });

    let orchestrator = PipelineOrchestrator::with_judgment_classifier(config, services, signal)?;
    let mut run = PipelineRun::new();
    orchestrator
        .prepare_index(&mut run, &personality)
        .await
        .context("preparing personality index")?;

    match args.command {
        Commands::Video {
            input,
            analysis,
            raw_script,
            output,
            instructions,
            interactive,
        } => {
            if !input.exists() {
                bail!("input video {} does not exist", input.display());
            }
            let scenes = orchestrator.process_video(&mut run, &input).await?;
            VideoAnalysis::from_scenes(&input, &scenes).save(&analysis)?;
            std::fs::write(&raw_script, render_scene_script(&scenes))
                .with_context(|| format!("writing {}", raw_script.display()))?;
            info!("📝 Raw scene script saved to {:?}", raw_script);

            personalize_loop(&orchestrator, &mut run, &output, instructions, interactive).await
        }
        Commands::Script {
            input,
            output,
            instructions,
            interactive,
        } => {
            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("reading script {}", input.display()))?;
            if orchestrator.load_script(&mut run, &text) == 0 {
                warn!("⚠️ {} has no non-blank lines", input.display());
            }
            personalize_loop(&orchestrator, &mut run, &output, instructions, interactive).await
        }
        Commands::Index => Ok(()),
    }
}

async fn personalize_loop(
    orchestrator: &PipelineOrchestrator,
    run: &mut PipelineRun,
    output: &Path,
    instructions: Option<String>,
    interactive: bool,
) -> Result<()> {
    let options = RewriteOptions {
        extra_instructions: instructions.clone(),
        variation: None,
    };
    let script = orchestrator.personalize(run, &options).await?;
    write_script(&script, output)?;

    if !interactive {
        return Ok(());
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("\nRegenerate? (y/n)");
        let Some(answer) = stdin.next_line().await? else {
            break;
        };
        if !answer.trim().eq_ignore_ascii_case("y") {
            break;
        }
        match orchestrator.regenerate(run, instructions.clone()).await {
            Ok(script) => write_script(&script, output)?,
            Err(e) => {
                error!("❌ Regeneration failed: {}", e);
                return Err(e.into());
            }
        }
    }
    Ok(())
}

fn write_script(script: &PersonalizedScript, output: &Path) -> Result<()> {
    let text = script.text();
    std::fs::write(output, &text).with_context(|| format!("writing {}", output.display()))?;
    let summary = script.summary();
    info!(
        "✅ Personalized script saved to {:?} ({} rewritten, {} filler, {} ungrounded, {} failed)",
        output, summary.rewritten, summary.filler, summary.ungrounded, summary.failed
    );
    println!("\n{}", text);
    Ok(())
}
