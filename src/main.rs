mod config;
mod loader;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{AppConfig, RunParams};
use crate::models::{DateWindow, RunOutcome};
use crate::pipeline::finalize::finalize;
use crate::pipeline::report::{ChannelReporter, RunEvent, StopSignal, TracingReporter};
use crate::pipeline::Pipeline;
use crate::scraper::cleaner::parse_user_date;
use crate::scraper::WebDriverLauncher;

#[derive(Parser)]
#[command(name = "brvm-history", about = "BRVM equity history scraper", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory for the checkpoint, final and fallback files
    #[arg(long, global = true, env = "BRVM_OUT_DIR")]
    out_dir: Option<PathBuf>,
}

#[derive(clap::Args)]
struct Period {
    /// First day (YYYY-MM-DD or DD/MM/YYYY, default 2023-01-01)
    #[arg(long, value_parser = date_arg)]
    start: Option<NaiveDate>,

    /// Last day (default today)
    #[arg(long, value_parser = date_arg)]
    end: Option<NaiveDate>,

    /// Days per date window
    #[arg(long)]
    interval: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape every instrument's history over the period
    Scrape {
        #[command(flatten)]
        period: Period,

        /// Seconds to wait for any page element
        #[arg(long)]
        timeout: Option<u64>,

        /// Show the browser window
        #[arg(long)]
        headful: bool,

        /// WebDriver endpoint (chromedriver)
        #[arg(long)]
        webdriver: Option<String>,
    },

    /// Post-process a checkpoint left by an interrupted run
    Finalize {
        /// Checkpoint to read (default: the run's temp file)
        #[arg(long)]
        from: Option<PathBuf>,
    },

    /// Copy the final dataset somewhere else
    Export {
        dest: PathBuf,
    },

    /// Print the date windows a scrape would walk
    Windows {
        #[command(flatten)]
        period: Period,
    },
}

fn date_arg(s: &str) -> Result<NaiveDate, String> {
    parse_user_date(s).ok_or_else(|| format!("invalid date {s:?}, expected YYYY-MM-DD"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "brvm_history=info,warn",
        1 => "brvm_history=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;
    if let Some(dir) = cli.out_dir {
        config.output.dir = dir;
    }

    match cli.command {
        Command::Scrape { period, timeout, headful, webdriver } => {
            if let Some(t) = timeout {
                config.scraper.timeout_secs = t;
            }
            if headful {
                config.scraper.headless = false;
            }
            if let Some(url) = webdriver {
                config.scraper.webdriver_url = url;
            }
            config.scraper.validate()?;
            let params = config.run.resolve(period.start, period.end, period.interval)?;

            let outcome = run_scrape(&config, params).await?;
            print_outcome(&outcome);
            if !outcome.success {
                bail!(outcome.message.unwrap_or_else(|| "scrape failed".into()));
            }
        }

        Command::Finalize { from } => {
            let _t = utils::Timer::start("Finalize checkpoint");
            let path = from.unwrap_or_else(|| config.output.temp_path());
            let records = loader::load_checkpoint(&path)?;
            let outcome = finalize(records, &config.output, &TracingReporter);
            print_outcome(&outcome);
            if !outcome.success {
                bail!(outcome.message.unwrap_or_else(|| "finalize failed".into()));
            }
        }

        Command::Export { dest } => {
            let src = config.output.final_path();
            let bytes = storage::export_copy(&src, &dest)
                .with_context(|| format!("No dataset to export at {:?}, run a scrape first", src))?;
            info!("Exported {:?} to {:?} ({} bytes)", src, dest, bytes);
        }

        Command::Windows { period } => {
            let params = config.run.resolve(period.start, period.end, period.interval)?;
            let windows = DateWindow::tile(params.start, params.end, params.interval_days);
            println!(
                "{} windows of up to {} days:",
                windows.len(),
                DateWindow::max_len_days(params.interval_days)
            );
            for w in &windows {
                println!("  {}  ({} days)", w, w.len_days());
            }
        }
    }

    Ok(())
}

/// Run the scrape on a background task and render its events here.
async fn run_scrape(config: &AppConfig, params: RunParams) -> Result<RunOutcome> {
    let _t = utils::Timer::start(format!(
        "Scrape {} → {} every {} days",
        params.start, params.end, params.interval_days
    ));

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received, stopping after the current window");
                stop.request();
            }
        });
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reporter = ChannelReporter::new(tx);
    let pipeline = Pipeline::new(
        WebDriverLauncher::new(config.scraper.clone()),
        config.output.clone(),
    );

    let handle = tokio::spawn(async move {
        let result = pipeline.run(&params, &reporter, &stop).await;
        if let Ok(outcome) = &result {
            reporter.finished(outcome.clone());
        }
        result
    });

    while let Some(event) = rx.recv().await {
        match event {
            RunEvent::Progress { fraction, message } => {
                info!("{} {}", utils::fmt_percent(fraction), message);
            }
            RunEvent::Log(line) => println!("{}", line),
            RunEvent::Finished(_) => {}
        }
    }

    let outcome = handle
        .await
        .context("Scrape task panicked")?
        .context("Could not start the browser session")?;
    Ok(outcome)
}

fn print_outcome(outcome: &RunOutcome) {
    println!("─────────────────────────────────");
    if outcome.success {
        println!("  BRVM history — run complete");
        println!("─────────────────────────────────");
        println!("  Records    : {}", outcome.records);
        println!("  Actions    : {}", outcome.actions);
        println!("  Duplicates : {}", outcome.duplicates_removed);
        if let Some(file) = &outcome.file {
            println!("  File       : {}", file.display());
        }
    } else {
        println!("  BRVM history — run failed");
        println!("─────────────────────────────────");
        println!("  Error      : {}", outcome.message.as_deref().unwrap_or("unknown error"));
        if let Some(file) = &outcome.fallback_file {
            println!("  Fallback   : {}", file.display());
        }
    }
    let s = &outcome.stats;
    if s.instruments_found > 0 {
        println!(
            "  Windows    : {} scraped, {} empty, {} failed",
            s.windows_scraped, s.windows_empty, s.windows_failed
        );
        println!(
            "  Instruments: {} found, {} skipped",
            s.instruments_found, s.instruments_skipped
        );
    }
    if s.cancelled {
        println!("  Stopped early by user request");
    }
    println!("─────────────────────────────────");
}
