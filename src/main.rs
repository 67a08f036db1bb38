// Command-line runner: links one clip read from JSON and prints the report.

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use image::Rgba;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tube_linker::core_modules::overlay;
use tube_linker::{Clip, LinkStrategy, LinkerConfig, ParallelLinker, TubeLinker};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Exhaustive,
    Dynamic,
    Beam,
}

#[derive(Debug, Parser)]
#[command(name = "tube_linker", about = "Link per-frame action proposals into a tube")]
struct Args {
    /// JSON clip: {"frames": [[{"bbox": {"x0":..,"y0":..,"x1":..,"y1":..}, "actionness": ..}, ..], ..]}
    #[arg(long)]
    clip: PathBuf,

    /// JSON linker configuration. Defaults to the clip's own frame and candidate counts.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured search strategy.
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    #[arg(long, default_value_t = 16)]
    beam_width: usize,

    /// Run exhaustive search on the worker pool. Other strategies still run sequentially.
    #[arg(long)]
    parallel: bool,

    /// One image per frame to draw the linked tube on.
    #[arg(long, num_args = 1..)]
    frames: Vec<PathBuf>,

    /// Where overlay images are written.
    #[arg(long, default_value = "tube_overlay")]
    out_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let clip_json = std::fs::read_to_string(&args.clip).with_context(|| format!("reading clip {:?}", args.clip))?;
    let clip: Clip = serde_json::from_str(&clip_json).context("parsing clip")?;

    let mut config = match &args.config {
        Some(path) => LinkerConfig::from_json_file(path)?,
        None => {
            let n_anchors = clip.candidate_counts().into_iter().max().unwrap_or(0);
            LinkerConfig::new(clip.num_frames(), n_anchors)
        }
    };
    if let Some(strategy) = args.strategy {
        config.strategy = match strategy {
            StrategyArg::Exhaustive => LinkStrategy::Exhaustive,
            StrategyArg::Dynamic => LinkStrategy::Dynamic,
            StrategyArg::Beam => LinkStrategy::Beam { width: args.beam_width },
        };
    }

    let report = if args.parallel {
        let linker = ParallelLinker::new(config)?;
        info!(workers = linker.worker_count(), "linking on worker pool");
        let report = linker.link(Arc::new(clip)).await?;
        linker.shutdown().await;
        report
    } else {
        TubeLinker::new(config)?.link(&clip)?
    };

    info!(
        indices = ?report.selected.tube.indices,
        score = report.selected.score,
        evaluations = report.evaluations,
        warnings = report.warnings.len(),
        "selected tube"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !args.frames.is_empty() {
        if args.frames.len() != report.selected.tube.len() {
            bail!(
                "{} frame images given for a {}-frame clip",
                args.frames.len(),
                report.selected.tube.len()
            );
        }
        let mut images = Vec::with_capacity(args.frames.len());
        for path in &args.frames {
            images.push(image::open(path).with_context(|| format!("opening frame {:?}", path))?.to_rgba8());
        }
        overlay::draw_tube(&mut images, &report.selected.tube, Rgba([255, 0, 0, 255]))?;

        std::fs::create_dir_all(&args.out_dir).with_context(|| format!("creating {:?}", args.out_dir))?;
        for (t, image) in images.iter().enumerate() {
            let path = args.out_dir.join(format!("frame_{:03}.png", t));
            overlay::save(&path, image).with_context(|| format!("writing {:?}", path))?;
        }
        info!(out_dir = ?args.out_dir, "wrote overlay frames");
    }

    Ok(())
}
