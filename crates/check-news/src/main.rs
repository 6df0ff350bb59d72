use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use shared::{Config, Pipeline, Stage, StageEvent, ValiditySummary};
use std::io::{self as stdio, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

const RULE: &str = "--------------------------------------------------";

#[derive(Parser)]
#[command(name = "check-news")]
#[command(about = "Check whether news articles are likely real, fake, or mixed")]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    /// Directory for pipeline artifacts (overrides CHECK_NEWS_OUTPUT_DIR)
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    /// Article URLs to check
    urls: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run every stage and print a verdict per URL
    Run { urls: Vec<String> },
    /// Fetch and extract articles
    Scrape {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Check scraped claims against Wikipedia
    FactCheck {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Label scraped text as real or fake
    Classify {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Reverse-search scraped images
    Images {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Summarize whatever artifacts exist for each URL
    Aggregate {
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

fn prompt_url() -> Result<String> {
    print!("Enter a news article URL: ");
    stdio::stdout().flush()?;

    let mut input = String::new();
    stdio::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn is_valid_url(url: &str) -> bool {
    url.starts_with("http")
}

/// Drop anything that is not an http(s) URL, reporting how many were dropped.
fn valid_urls(urls: Vec<String>) -> (Vec<String>, usize) {
    let (valid, invalid): (Vec<String>, Vec<String>) =
        urls.into_iter().partition(|u| is_valid_url(u));
    for url in &invalid {
        println!("✗ Not a valid URL (must start with http): {}", url);
    }
    (valid, invalid.len())
}

fn print_summary(summary: &ValiditySummary) {
    println!("URL: {}", summary.url);
    println!("Verdict: {:?}", summary.verdict);
    if !summary.missing.is_empty() {
        println!("Missing evidence: {:?}", summary.missing);
    }
    println!("Summary: {}", summary.summary);
    println!("{}", RULE);
}

/// Progress lines for a full run.
fn print_progress(event: &StageEvent<'_>) {
    match event {
        StageEvent::Started { url, stage } => {
            let n = stage.number();
            match stage {
                Stage::Scrape => println!("\n🌐 [{}/5] Scraping {}", n, url),
                Stage::FactCheck => println!("📚 [{}/5] Fact-checking against Wikipedia...", n),
                Stage::Classify => println!("🔎 [{}/5] Classifying text...", n),
                Stage::Images => println!("🖼  [{}/5] Evaluating images...", n),
                Stage::Aggregate => println!("🤖 [{}/5] Aggregating...", n),
            }
        }
        StageEvent::Scraped(record) => println!(
            "  ✓ {} ({} text blocks, {} images)",
            record.title, record.stats.blocks, record.stats.images
        ),
        StageEvent::FactChecked(report) => println!(
            "  ✓ {} claims, reliability {:.2}",
            report.statistics.total_claims, report.statistics.reliability_score
        ),
        StageEvent::Classified(c) => println!("  ✓ {:?} ({:.2})", c.label, c.confidence),
        StageEvent::ImagesEvaluated(evaluation) => {
            let failed = evaluation.failed_count();
            if failed > 0 {
                println!("  ⚠ {}/{} image lookups failed", failed, evaluation.images.len());
            } else {
                println!("  ✓ {} images checked", evaluation.images.len());
            }
        }
        StageEvent::Summarized(summary) => println!("  ✓ {:?}", summary.verdict),
        StageEvent::Failed { error, .. } => println!("  ✗ {}", error),
    }
}

async fn run_all(pipeline: &Pipeline, urls: Vec<String>) -> Result<usize> {
    let urls = if urls.is_empty() {
        let url = prompt_url()?;
        if !is_valid_url(&url) {
            anyhow::bail!("Invalid URL: {:?}. URLs must start with http.", url);
        }
        vec![url]
    } else {
        urls
    };

    let (urls, mut failed) = valid_urls(urls);
    let outcomes = pipeline.run_batch(&urls).await;

    println!("\n{}", RULE);
    for outcome in &outcomes {
        match &outcome.result {
            Ok(summary) => print_summary(summary),
            Err(e) => {
                println!("URL: {}", outcome.url);
                println!("Error: {}", e);
                println!("{}", RULE);
                failed += 1;
            }
        }
    }

    Ok(failed)
}

/// One stage over each URL, reading its inputs from the artifact directory.
async fn run_stage(pipeline: &Pipeline, stage: Stage, urls: Vec<String>) -> Result<usize> {
    let (urls, mut failed) = valid_urls(urls);

    for url in &urls {
        let result = match stage {
            Stage::Scrape => pipeline.scrape(url).await.map(|r| {
                format!("{} text blocks, {} images: {}", r.stats.blocks, r.stats.images, r.title)
            }),
            Stage::FactCheck => pipeline.fact_check(url).await.map(|r| {
                format!(
                    "{} claims, reliability {:.2}",
                    r.statistics.total_claims, r.statistics.reliability_score
                )
            }),
            Stage::Classify => pipeline
                .classify(url)
                .await
                .map(|c| format!("{:?} ({:.2})", c.label, c.confidence)),
            Stage::Images => pipeline.evaluate_images(url).await.map(|e| {
                format!("{} images, {} lookups failed", e.images.len(), e.failed_count())
            }),
            Stage::Aggregate => pipeline.aggregate_from_artifacts(url).await.map(|s| {
                print_summary(&s);
                format!("{:?}", s.verdict)
            }),
        };

        match result {
            Ok(line) => println!("✓ {} {}: {}", stage.name(), url, line),
            Err(e) => {
                println!("✗ {} {}: {}", stage.name(), url, e);
                failed += 1;
            }
        }
    }

    Ok(failed)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(stdio::stderr)
        .init();

    let args = Args::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(dir) = args.output_dir {
        config = config.with_output_dir(dir);
    }

    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!("Failed to create output directory {}", config.output_dir.display())
    })?;

    info!(output_dir = %config.output_dir.display(), "check-news starting");
    println!(
        "📰 check-news {} (artifacts in {})",
        Local::now().format("%Y-%m-%d %H:%M"),
        config.output_dir.display()
    );

    let pipeline = Pipeline::from_config(&config)
        .context("Failed to build pipeline")?
        .with_progress(print_progress);

    let failed = match args.command {
        None => run_all(&pipeline, args.urls).await?,
        Some(Command::Run { urls }) => run_all(&pipeline, urls).await?,
        Some(Command::Scrape { urls }) => run_stage(&pipeline, Stage::Scrape, urls).await?,
        Some(Command::FactCheck { urls }) => run_stage(&pipeline, Stage::FactCheck, urls).await?,
        Some(Command::Classify { urls }) => run_stage(&pipeline, Stage::Classify, urls).await?,
        Some(Command::Images { urls }) => run_stage(&pipeline, Stage::Images, urls).await?,
        Some(Command::Aggregate { urls }) => run_stage(&pipeline, Stage::Aggregate, urls).await?,
    };

    if failed > 0 {
        anyhow::bail!("{} URL(s) failed", failed);
    }

    Ok(())
}
