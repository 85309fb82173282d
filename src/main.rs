// 🏛️ Legislature Scraper - Entry point
//
// Thin wiring only: environment → repository + fetcher → orchestrator / exporter.

use anyhow::{bail, Context, Result};
use chrono::Datelike;
use legislature_scraper::{
    init_tracing, read_failures_csv, BillType, Config, Exporter, HttpFetcher, Orchestrator,
    Repository, RunAborted, RunOptions, RunReport,
};
use std::env;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

const USAGE: &str = "usage:
  legislature-scraper init
  legislature-scraper limited
  legislature-scraper full <year> [--resume]
  legislature-scraper historical <first-year> [<last-year>] [--resume]
  legislature-scraper recent [--resume]
  legislature-scraper retry <failures.csv>
  legislature-scraper members <first-id> <last-id> <year>[,<year>...]
  legislature-scraper bills <first> <last> <TYPE>[,<TYPE>...] <year>[,<year>...]
  legislature-scraper export";

#[tokio::main]
async fn main() -> Result<()> {
    // Loads .env first so RUST_LOG from it reaches the subscriber
    let config = Config::from_env()?;
    init_tracing(&config);

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        std::process::exit(64);
    };

    let repo = Arc::new(
        Repository::open(&config.database_url)
            .with_context(|| format!("Failed to open {}", config.database_url))?,
    );

    match command.as_str() {
        "init" => {
            let counts = repo.table_counts()?;
            info!(location = repo.location(), rows = counts.total(), "Database initialized");
            Ok(())
        }
        "export" => {
            let set = Exporter::new(repo, config.export_dir.clone()).export()?;
            info!(documents = set.summary.documents.len(), "Done");
            Ok(())
        }
        "limited" | "full" | "historical" | "recent" | "retry" | "members" | "bills" => {
            scrape(&config, repo, command, &args[1..]).await
        }
        other => {
            eprintln!("unknown command `{}`\n{}", other, USAGE);
            std::process::exit(64);
        }
    }
}

async fn scrape(config: &Config, repo: Arc<Repository>, command: &str, args: &[String]) -> Result<()> {
    let fetcher = Arc::new(HttpFetcher::from_config(config)?);
    let orchestrator = Orchestrator::new(fetcher, repo, config.source_site()?);

    let stop = orchestrator.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Stop requested: finishing in-flight items");
            stop.stop();
        }
    });

    let options = RunOptions::from_config(config);
    let resume = args.iter().any(|a| a == "--resume");
    let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();

    let result = match command {
        "limited" => orchestrator.run_limited(&options).await,
        "full" => {
            let year = parse_year(positional.first().copied())?;
            let options = resumable(options, resume, format!("full-{}", year));
            orchestrator.run_full(year, &options).await
        }
        "historical" => {
            let first = parse_year(positional.first().copied())?;
            let last = match positional.get(1).copied() {
                Some(arg) => parse_year(Some(arg))?,
                None => current_year(),
            };
            if last < first {
                bail!("last year {} is before first year {}", last, first);
            }
            let options = resumable(options, resume, format!("full-{}-{}", first, last));
            orchestrator.run_historical(first, last, &options).await
        }
        "recent" => {
            let year = current_year();
            let options = resumable(options, resume, format!("recent-{}", year));
            orchestrator.run_recent(year, &options).await
        }
        "retry" => {
            let Some(path) = positional.first() else { bail!(USAGE) };
            let targets = read_failures_csv(Path::new(path.as_str()))?;
            info!(targets = targets.len(), "Retrying failed items");
            orchestrator.run_targets(targets, &options).await
        }
        "members" => {
            let [first, last, years] = args else { bail!(USAGE) };
            orchestrator
                .run_range_members(first.parse()?, last.parse()?, parse_years(years)?, &options)
                .await
        }
        "bills" => {
            let [first, last, types, years] = args else { bail!(USAGE) };
            let types = types
                .split(',')
                .map(|t| t.parse::<BillType>().map_err(anyhow::Error::msg))
                .collect::<Result<Vec<_>>>()?;
            orchestrator
                .run_range_bills(first.parse()?, last.parse()?, types, parse_years(years)?, &options)
                .await
        }
        _ => bail!(USAGE),
    };

    match result {
        Ok(report) => finish(config, &report),
        Err(RunAborted { report, cause }) => {
            error!(error = %cause, "{}", report.summary());
            write_failures(config, &report);
            Err(cause).context("run aborted")
        }
    }
}

fn finish(config: &Config, report: &RunReport) -> Result<()> {
    info!("{}", report.summary());
    if report.is_clean() {
        return Ok(());
    }
    write_failures(config, report);
    // partial run
    std::process::exit(2);
}

fn write_failures(config: &Config, report: &RunReport) {
    if report.failures.is_empty() {
        return;
    }
    if let Err(e) = std::fs::create_dir_all(&config.export_dir) {
        warn!(error = %e, "Could not create export directory");
        return;
    }
    let path = config.export_dir.join(format!("failures_{}.csv", report.run_id));
    match report.write_failures_csv(&path) {
        Ok(()) => info!(path = %path.display(), failures = report.failures.len(), "Failed items written"),
        Err(e) => warn!(error = %e, "Could not write failed items"),
    }
}

fn resumable(options: RunOptions, resume: bool, name: String) -> RunOptions {
    if resume {
        options.resumable(name)
    } else {
        options
    }
}

fn current_year() -> i32 {
    chrono::Local::now().year()
}

fn parse_year(arg: Option<&String>) -> Result<i32> {
    let Some(arg) = arg else { bail!(USAGE) };
    arg.parse().with_context(|| format!("invalid year: {}", arg))
}

fn parse_years(arg: &str) -> Result<Vec<i32>> {
    arg.split(',')
        .map(|y| y.trim().parse().with_context(|| format!("invalid year: {}", y)))
        .collect()
}
