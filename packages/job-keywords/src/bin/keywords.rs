//! Keyword CLI
//!
//! Signs in with `SUPABASE_EMAIL` / `SUPABASE_PASSWORD`, submits or retries a
//! job posting, then prints the keyword list each time it changes.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use job_keywords::kernel::Level;
use job_keywords::{
    AppDeps, Config, JobId, JobProcessor, JobScrapingService, KeywordSnapshot, KeywordSync,
    Notification, NotificationHub, RetryPolicy,
};
use secrecy::ExposeSecret;
use supabase_client::SupabaseClient;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "keywords")]
#[command(about = "Submit job postings and follow their extracted keywords")]
struct Cli {
    /// Seconds to keep following keyword updates
    #[arg(long, default_value_t = 60, global = true)]
    wait_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit job-posting text (read from stdin when omitted)
    Submit { text: Option<String> },

    /// Follow keywords for an existing job posting
    Watch { job_id: JobId },

    /// Re-run extraction for a job posting, then follow its keywords
    Retry { job_id: JobId },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,job_keywords=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let client = SupabaseClient::new(
        &config.supabase_url,
        config.supabase_anon_key.expose_secret().to_string(),
    )
    .context("Failed to create Supabase client")?;

    let credentials = config
        .credentials
        .as_ref()
        .context("SUPABASE_EMAIL and SUPABASE_PASSWORD must be set")?;
    client
        .sign_in_with_password(&credentials.email, &credentials.password)
        .await
        .context("Failed to sign in")?;

    let hub = NotificationHub::new();
    let printer = tokio::spawn(print_notifications(hub.subscribe()));

    let deps = AppDeps::supabase(client.clone(), Arc::new(hub));
    let processor = JobProcessor::new(JobScrapingService::with_timeout(
        deps.clone(),
        config.processor_timeout,
    ));

    let outcome = run(
        cli.command,
        &deps,
        &processor,
        config.keyword_retry,
        Duration::from_secs(cli.wait_secs),
    )
    .await;

    if let Err(e) = client.sign_out().await {
        tracing::warn!(error = %e, "Failed to sign out");
    }
    printer.abort();

    outcome
}

async fn run(
    command: Commands,
    deps: &AppDeps,
    processor: &JobProcessor,
    policy: RetryPolicy,
    wait: Duration,
) -> Result<()> {
    let job_id = match command {
        Commands::Submit { text } => {
            let text = match text {
                Some(text) => text,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read job posting from stdin")?;
                    buf
                }
            };
            if text.trim().is_empty() {
                bail!("Job posting text is empty");
            }
            processor
                .process_job(&text)
                .await
                .context("Job posting was not submitted")?
        }
        Commands::Retry { job_id } => {
            processor
                .retry_job(job_id)
                .await
                .context("Job posting was not retried")?;
            job_id
        }
        Commands::Watch { job_id } => job_id,
    };

    follow_keywords(deps, job_id, policy, wait).await
}

async fn follow_keywords(
    deps: &AppDeps,
    job_id: JobId,
    policy: RetryPolicy,
    wait: Duration,
) -> Result<()> {
    let sync = KeywordSync::new(deps, policy);
    let mut updates = sync.watch();

    sync.sync(job_id)
        .await
        .context("Failed to subscribe to keyword changes")?;
    println!("Following keywords for job {} ({}s)", job_id, wait.as_secs());

    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                print_snapshot(&snapshot);
            }
        }
    }

    sync.reset().await;
    Ok(())
}

fn print_snapshot(snapshot: &KeywordSnapshot) {
    println!("\nUpdate #{}", snapshot.update_count);
    for keyword in &snapshot.keywords {
        println!("  {:>4}  {}", keyword.frequency, keyword.keyword);
    }
}

async fn print_notifications(mut rx: broadcast::Receiver<Notification>) {
    loop {
        match rx.recv().await {
            Ok(notification) => {
                let marker = match notification.level() {
                    Level::Success => "ok",
                    Level::Error => "error",
                };
                eprintln!("[{}] {}", marker, notification);
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
