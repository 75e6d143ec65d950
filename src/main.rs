//! Channel ingestion CLI
//!
//! Usage:
//!   channel-ingest scrape                     # Scrape configured channels
//!   channel-ingest scrape --channel CheMed123 --days-back 3
//!   channel-ingest load                       # Load message batches
//!   channel-ingest detect                     # Classify downloaded images
//!   channel-ingest load-detections            # Append detection results
//!   channel-ingest run                        # All of the above, in order
//!   channel-ingest stats                      # Show load coverage

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use channel_ingest::config::Config;
use channel_ingest::context::PipelineContext;
use channel_ingest::logging::init_logging;
use channel_ingest::scraper::ChannelSummary;

#[derive(Debug, Parser)]
#[command(
    name = "channel-ingest",
    version,
    about = "Channel ingestion and image enrichment pipeline"
)]
struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = "config/settings.toml")]
    config: PathBuf,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scrape channels into per-day batch files
    Scrape(ScrapeArgs),
    /// Load message batch files into the staging table
    Load,
    /// Run the object detector over downloaded images
    Detect,
    /// Append the detection file to the staging table
    LoadDetections,
    /// Scrape, load, detect and load detections in sequence
    Run(ScrapeArgs),
    /// Show storage coverage per channel
    Stats,
}

#[derive(Debug, clap::Args)]
struct ScrapeArgs {
    /// Channel to scrape (repeatable); defaults to the configured list
    #[arg(long = "channel")]
    channels: Vec<String>,

    /// Only keep messages newer than this many days
    #[arg(long)]
    days_back: Option<u32>,

    /// Stop after this many messages per channel (rounded up to a page)
    #[arg(long)]
    max_messages: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    config.apply_env();

    let level = cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, config.logging.file.as_deref())?;

    let mut ctx = PipelineContext::open(config)?;

    match cli.command {
        Command::Scrape(args) => {
            run_scrape(&mut ctx, &args).await?;
        }
        Command::Load => {
            ctx.load_messages()?;
        }
        Command::Detect => {
            ctx.detect().await?;
        }
        Command::LoadDetections => {
            ctx.load_detections()?;
        }
        Command::Run(args) => {
            run_scrape(&mut ctx, &args).await?;
            ctx.load_messages()?;
            ctx.detect().await?;
            ctx.load_detections()?;
            info!("Pipeline run complete");
        }
        Command::Stats => {
            print_stats(&ctx)?;
        }
    }

    Ok(())
}

async fn run_scrape(ctx: &mut PipelineContext, args: &ScrapeArgs) -> Result<Vec<ChannelSummary>> {
    let channels = if args.channels.is_empty() {
        ctx.config.scraper.channels.clone()
    } else {
        args.channels.clone()
    };
    let days_back = args.days_back.unwrap_or(ctx.config.scraper.days_back);
    let max_messages = args.max_messages.unwrap_or(ctx.config.scraper.max_messages);

    info!(
        "Scraping {} channels (days_back={}, max_messages={})",
        channels.len(),
        days_back,
        max_messages
    );

    let summaries = ctx.scrape(&channels, days_back, max_messages).await?;
    for summary in &summaries {
        info!(
            "  {}: {} messages, {} images",
            summary.channel, summary.messages, summary.images
        );
    }

    Ok(summaries)
}

fn print_stats(ctx: &PipelineContext) -> Result<()> {
    let coverage = ctx.db.coverage_by_channel()?;

    println!("\nMessages by channel:");
    if coverage.is_empty() {
        println!("  (none loaded)");
    }
    for c in &coverage {
        println!(
            "  {:<24} {:>7} msgs  {:>6} media  {:>6} images  {} .. {}",
            c.channel_name,
            c.message_count,
            c.with_media,
            c.with_images,
            c.oldest.as_deref().unwrap_or("-"),
            c.newest.as_deref().unwrap_or("-"),
        );
    }

    println!("\nDetections by category:");
    for (category, count) in ctx.db.detections_by_category()? {
        println!("  {:<24} {:>7}", category, count);
    }

    Ok(())
}
