//! Command-line front end for ad-hoc keyword scans.
//!
//! ```bash
//! scout-cli rust,chess --min-viewers 10
//! scout-cli speedrun --watch --interval 30
//! ```
//!
//! Without stored credentials every platform serves placeholder data, which
//! is still useful for exercising the ranking and polling machinery.

use eyre::Context;
use std::io::IsTerminal;
use std::sync::Arc;
use stream_scout::model::{ScanConfig, ScannerLimits};
use stream_scout::store::MemoryStore;
use stream_scout::{LiveStream, ScanCoordinator};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!(
        "usage: scout-cli <keyword[,keyword...]> [--min-viewers N] [--interval SECS] [--premium] [--watch]"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    let mut keywords: Vec<String> = Vec::new();
    let mut min_viewers = 0u32;
    let mut interval_secs = 60u64;
    let mut limits = ScannerLimits::default();
    let mut watch = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--min-viewers" => {
                let value = args.next().unwrap_or_else(|| usage());
                min_viewers = value.parse().context("parse --min-viewers")?;
            }
            "--interval" => {
                let value = args.next().unwrap_or_else(|| usage());
                interval_secs = value.parse().context("parse --interval")?;
            }
            "--premium" => limits = ScannerLimits::premium(),
            "--watch" => watch = true,
            "--help" | "-h" => usage(),
            other if other.starts_with('-') => usage(),
            list => keywords.extend(
                list.split(',')
                    .map(str::trim)
                    .filter(|kw| !kw.is_empty())
                    .map(str::to_string),
            ),
        }
    }
    if keywords.is_empty() {
        usage();
    }

    let scout = ScanCoordinator::new(Arc::new(MemoryStore::new()), limits);
    scout
        .start_scanning(ScanConfig {
            keywords,
            min_viewers,
            poll_interval_secs: interval_secs,
            ..ScanConfig::default()
        })
        .await
        .context("start scanning")?;

    print_results(&scout.latest_results());

    if watch {
        let mut results = scout.subscribe_results();
        loop {
            results.changed().await.context("scanner went away")?;
            let latest = results.borrow_and_update().clone();
            print_results(&latest);
        }
    }

    scout.stop_scanning();
    Ok(())
}

fn print_results(results: &[LiveStream]) {
    if results.is_empty() {
        println!("no live streams matched");
        return;
    }
    println!("{:>3}  {:>9}  {:<10} {:<24} title", "#", "viewers", "platform", "streamer");
    for (i, stream) in results.iter().enumerate() {
        println!(
            "{:>3}  {:>9}  {:<10} {:<24} {}",
            i + 1,
            stream.viewer_count,
            stream.platform,
            stream.display_name,
            stream.title,
        );
    }
    println!();
}
