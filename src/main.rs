mod config;
mod db;
mod discovery;
mod download;
mod error;
mod extract;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::db::TradeRow;
use crate::discovery::BulletinLink;

#[derive(Parser)]
#[command(name = "spimex_etl", about = "SPIMEX oil-products trading results ETL")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the listing and show the discovered bulletins
    Discover {
        /// Stop at this year; bulletins dated in or before it are skipped
        #[arg(short, long)]
        year: Option<i32>,
        /// Print the link set as JSON
        #[arg(long)]
        json: bool,
    },
    /// Discover bulletins and download them into a directory
    Download {
        /// Stop at this year; bulletins dated in or before it are skipped
        #[arg(short, long)]
        year: Option<i32>,
        /// Destination directory for bulletin files
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Only the newest N bulletins
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Parse downloaded bulletins without touching the database
    Extract {
        /// Directory with downloaded bulletin files
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Parse downloaded bulletins and persist the rows
    Load {
        /// Directory with downloaded bulletin files
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Full pipeline: discover, download, extract, persist
    Run {
        /// Stop at this year; bulletins dated in or before it are skipped
        #[arg(short, long)]
        year: Option<i32>,
        /// Directory for downloaded bulletin files
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Only the newest N bulletins
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Keep the download directory instead of removing it after the load
        #[arg(long)]
        keep: bool,
    },
    /// Show what is already in the database
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load()?;

    let result = match cli.command {
        Commands::Discover { year, json } => {
            if let Some(year) = year {
                settings.cutoff_year = year;
            }
            let links = discovery::crawl_listing(&settings).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&links)?);
            } else {
                for (date, link) in &links {
                    println!("{date}  {:<16} {}", link.filename, link.url);
                }
                println!(
                    "\nFound {} bulletins newer than {}",
                    links.len(),
                    settings.cutoff_year
                );
            }
            Ok(())
        }
        Commands::Download { year, dir, limit } => {
            if let Some(year) = year {
                settings.cutoff_year = year;
            }
            if let Some(dir) = dir {
                settings.download_dir = dir;
            }
            let links = take_newest(discovery::crawl_listing(&settings).await?, limit);
            if links.is_empty() {
                println!("Nothing to download.");
                return Ok(());
            }
            println!(
                "Downloading {} bulletins to {} ...",
                links.len(),
                settings.download_dir.display()
            );
            let stats = download::download_all(&links, &settings.download_dir, &settings).await?;
            print_download_stats(&stats);
            Ok(())
        }
        Commands::Extract { dir } => {
            if let Some(dir) = dir {
                settings.download_dir = dir;
            }
            let batches = extract::extract_dir(&settings.download_dir)?;
            for batch in &batches {
                println!(
                    "{}  {:>6} rows  ({})",
                    batch.trade_date,
                    batch.rows.len(),
                    batch.source.display()
                );
            }
            let rows: usize = batches.iter().map(|b| b.rows.len()).sum();
            println!("\n{} files, {} rows", batches.len(), rows);
            Ok(())
        }
        Commands::Load { dir } => {
            if let Some(dir) = dir {
                settings.download_dir = dir;
            }
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let batches = extract::extract_dir(&settings.download_dir)?;
            let rows: Vec<TradeRow> = batches.into_iter().flat_map(|b| b.rows).collect();
            let saved = db::save_results(&conn, &rows)?;
            println!("Saved {} rows to {}", saved, settings.db_path.display());
            Ok(())
        }
        Commands::Run {
            year,
            dir,
            limit,
            keep,
        } => {
            if let Some(year) = year {
                settings.cutoff_year = year;
            }
            if let Some(dir) = dir {
                settings.download_dir = dir;
            }
            run_pipeline(&settings, limit, keep).await
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Rows:        {}", s.rows);
            println!("Trade dates: {}", s.dates);
            if let (Some(first), Some(last)) = (&s.first_date, &s.last_date) {
                println!("Date range:  {} .. {}", first, last);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run_pipeline(settings: &Settings, limit: Option<usize>, keep: bool) -> anyhow::Result<()> {
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;

    // Phase 1: Discover
    let t_discover = Instant::now();
    println!(
        "Pipeline: discovering bulletins newer than {}...",
        settings.cutoff_year
    );
    let links = take_newest(discovery::crawl_listing(settings).await?, limit);
    if links.is_empty() {
        println!("Nothing to do.");
        return Ok(());
    }
    println!(
        "Found {} bulletins in {:.1}s",
        links.len(),
        t_discover.elapsed().as_secs_f64()
    );

    // Phase 2: Download
    let t_download = Instant::now();
    println!("Downloading to {} ...", settings.download_dir.display());
    let stats = download::download_all(&links, &settings.download_dir, settings).await?;
    println!(
        "Downloaded {} of {} files ({} skipped{}) in {:.1}s",
        stats.ok,
        stats.total,
        stats.errors,
        if stats.timed_out { ", session timed out" } else { "" },
        t_download.elapsed().as_secs_f64()
    );

    // Phase 3: Extract
    let t_extract = Instant::now();
    let batches = extract::extract_dir(&settings.download_dir)?;
    let files = batches.len();
    let rows: Vec<TradeRow> = batches.into_iter().flat_map(|b| b.rows).collect();
    println!(
        "Extracted {} rows from {} files in {:.1}s",
        rows.len(),
        files,
        t_extract.elapsed().as_secs_f64()
    );

    // Phase 4: Persist in one transaction
    let saved = db::save_results(&conn, &rows)?;
    println!("Saved {} rows to {}", saved, settings.db_path.display());

    if !keep {
        std::fs::remove_dir_all(&settings.download_dir)?;
        println!("Removed {}", settings.download_dir.display());
    }

    Ok(())
}

/// Keep only the newest `limit` links; dates sort ascending in the map.
fn take_newest(
    links: BTreeMap<NaiveDate, BulletinLink>,
    limit: Option<usize>,
) -> BTreeMap<NaiveDate, BulletinLink> {
    match limit {
        Some(n) => {
            let skip = links.len().saturating_sub(n);
            links.into_iter().skip(skip).collect()
        }
        None => links,
    }
}

fn print_download_stats(stats: &download::DownloadStats) {
    println!(
        "Downloaded {} of {} files ({} skipped{})",
        stats.ok,
        stats.total,
        stats.errors,
        if stats.timed_out { ", session timed out" } else { "" }
    );
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
