use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reachout_core::{OutreachRecord, TemplateChoice};
use reachout_sync::{build_scheduler, AppConfig, SearchRequest, Services};
use reachout_web::AppState;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "reachout")]
#[command(about = "Job-application outreach: send, reconcile replies, scan bounces, search boards")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send one message per record in a JSON file.
    Send {
        /// JSON array of `{hiringManagerEmail, jobTitle, hiringManager, companyName, seniorURL?}`.
        file: PathBuf,
        /// 0 = eager, 1 = formal first contact.
        #[arg(long, default_value_t = 0)]
        index: usize,
        #[arg(long)]
        referral: bool,
    },
    /// Email every lead in the lead sheet and mark them contacted.
    ScanLeads {
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    /// Walk the sent logs and record new replies.
    CheckReplies,
    /// Scan the inbox for bounces and mark the leads.
    Bounces,
    SearchJobs {
        query: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        source: Option<String>,
        /// Append the postings to the jobs sheet.
        #[arg(long)]
        record: bool,
    },
    UpdateStatus {
        job_url: String,
        status: String,
    },
    /// Run the HTTP surface, plus the cron jobs when they are enabled.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run only the cron jobs.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env().context("loading configuration")?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let services = Arc::new(Services::from_config(&config).await?);
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping");
                cancel.cancel();
            }
        });
    }

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Send {
            file,
            index,
            referral,
        } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let records: Vec<OutreachRecord> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing records in {}", file.display()))?;
            let choice = TemplateChoice::from_request(index, referral)?;
            let report = services.dispatcher.dispatch(records, choice, &cancel).await?;
            print_report(&services, &report)?;
            ensure_success(report.success, &report.message())?;
        }
        Commands::ScanLeads { index } => {
            let TemplateChoice::FirstContact(style) = TemplateChoice::from_request(index, false)?
            else {
                bail!("lead scans only send first-contact messages");
            };
            let report = services.dispatcher.dispatch_leads(style, &cancel).await?;
            print_report(&services, &report)?;
            ensure_success(report.success, &report.message())?;
        }
        Commands::CheckReplies => {
            let report = services.reconciler.run(&cancel).await;
            print_report(&services, &report)?;
            ensure_success(report.success, &report.message())?;
        }
        Commands::Bounces => {
            let report = services.bounces.run(&cancel).await?;
            print_report(&services, &report)?;
            ensure_success(report.success, &report.message())?;
        }
        Commands::SearchJobs {
            query,
            page,
            source,
            record,
        } => {
            let result = services
                .jobs
                .search(SearchRequest {
                    query,
                    page,
                    source,
                    record,
                })
                .await?;
            print_report(&services, &result)?;
        }
        Commands::UpdateStatus { job_url, status } => {
            let update = services.jobs.update_status(&job_url, &status).await?;
            print_report(&services, &update)?;
        }
        Commands::Serve { port } => {
            let scheduler = build_scheduler(services.clone(), &config.schedule, cancel.clone()).await?;
            if let Some(sched) = &scheduler {
                sched.start().await.context("starting scheduler")?;
                info!("cron jobs running");
            }
            let state = AppState::new(services, cancel);
            let served = reachout_web::serve(state, port.unwrap_or(config.port)).await;
            if let Some(mut sched) = scheduler {
                if let Err(err) = sched.shutdown().await {
                    warn!(%err, "scheduler shutdown failed");
                }
            }
            served?;
        }
        Commands::Schedule => {
            let Some(mut sched) = build_scheduler(services, &config.schedule, cancel.clone()).await?
            else {
                bail!("scheduling is disabled; set REACHOUT_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!(
                reconcile = %config.schedule.reconcile_cron,
                bounces = %config.schedule.bounce_cron,
                "cron jobs running"
            );
            cancel.cancelled().await;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}

fn print_report<T: Serialize>(services: &Services, report: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(report).context("serializing report")?;
    println!("{}", services.redact(&text));
    Ok(())
}

fn ensure_success(success: bool, message: &str) -> Result<()> {
    if !success {
        bail!("{message}");
    }
    Ok(())
}
