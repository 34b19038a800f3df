use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use support_triage::channels::{EmailConfig, ImapSmtpTransport, MailTransport};
use support_triage::config::{AppConfig, llm_config_from_env};
use support_triage::llm::{LlmProvider, create_provider};
use support_triage::pipeline::{
    Answerer, EmailRouter, IngestStats, IngestionLoop, KnowledgeBase, LlmAnswerer, LlmClassifier,
    spawn_ingestion,
};
use support_triage::store::{
    DEMO_ORDERS, Database, LibSqlBackend, OrderRegistry, OrderStatus, OutcomeLog, ProcessedStore,
};

const REPORT_PROCESSED_LIMIT: usize = 50;
const REPORT_UNHANDLED_LIMIT: usize = 50;
const REPORT_NOT_FOUND_LIMIT: usize = 20;

const USAGE: &str = "usage: support-triage [run | once | report]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = AppConfig::from_env();
    let _log_guard = init_tracing(&config.log_dir)?;

    let command = std::env::args().nth(1).unwrap_or_else(|| "run".to_string());

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );

    if config.seed_demo_orders {
        let orders: Vec<(&str, OrderStatus)> = DEMO_ORDERS
            .iter()
            .map(|id| (*id, OrderStatus::Active))
            .collect();
        db.seed_orders(&orders).await?;
    }

    match command.as_str() {
        "run" => run(config, db, false).await,
        "once" => run(config, db, true).await,
        "report" => report(db.as_ref()).await,
        "-h" | "--help" | "help" => {
            println!("{USAGE}");
            Ok(())
        }
        other => anyhow::bail!("unknown command '{other}'\n{USAGE}"),
    }
}

/// stderr plus a daily-rolling file in `log_dir`. Keep the guard alive so
/// buffered file output is flushed on exit.
fn init_tracing(log_dir: &Path) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "support-triage.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

/// Poll until Ctrl-C (or for a single cycle with `once`).
async fn run(config: AppConfig, db: Arc<LibSqlBackend>, once: bool) -> anyhow::Result<()> {
    let accounts = EmailConfig::all_from_env();
    if accounts.is_empty() {
        anyhow::bail!("No mailbox configured: set EMAIL_IMAP_HOST or EMAIL_ACCOUNTS");
    }

    // ── LLM ──────────────────────────────────────────────────────────────
    let llm_config = llm_config_from_env()?;
    let llm = create_provider(&llm_config)?;
    let classifier = Arc::new(LlmClassifier::new(Arc::clone(&llm)));
    let answerer = load_answerer(&config.knowledge_base, llm);

    // ── Pipeline ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = db;
    let router = Arc::new(EmailRouter::new(db, classifier, answerer));

    let mailboxes: Vec<Arc<dyn MailTransport>> = accounts
        .into_iter()
        .map(|account| {
            info!(
                account = %account.name,
                imap = %account.imap_host,
                from = %account.from_address,
                "Mailbox configured"
            );
            Arc::new(ImapSmtpTransport::new(account)) as Arc<dyn MailTransport>
        })
        .collect();

    let ingest = IngestionLoop::new(router, mailboxes, config.poll.clone());
    let cancel = CancellationToken::new();

    if once {
        let mut stats = IngestStats::default();
        ingest.run_cycle(&cancel, &mut stats).await;
        stats.cycles = 1;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let (handle, mut progress) = spawn_ingestion(ingest, cancel.clone());

    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stop requested, finishing the current email");
            stop.cancel();
        }
    });

    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let stats = progress.borrow_and_update().clone();
            info!(
                cycles = stats.cycles,
                processed = stats.processed,
                skipped = stats.skipped,
                failed = stats.failed,
                "Polling cycle complete"
            );
        }
    });

    let stats = handle.await.context("Ingestion task panicked")?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn load_answerer(path: &Path, llm: Arc<dyn LlmProvider>) -> Option<Arc<dyn Answerer>> {
    match KnowledgeBase::load(path) {
        Ok(kb) if !kb.is_empty() => Some(Arc::new(LlmAnswerer::new(llm, kb))),
        Ok(_) => {
            warn!(path = %path.display(), "Knowledge base is empty, questions go to the unhandled sink");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Knowledge base unavailable, questions go to the unhandled sink");
            None
        }
    }
}

/// Print recent history as JSON.
async fn report(db: &LibSqlBackend) -> anyhow::Result<()> {
    let report = serde_json::json!({
        "processed": db.recent_processed(REPORT_PROCESSED_LIMIT).await?,
        "unhandled": db.recent_unhandled(REPORT_UNHANDLED_LIMIT).await?,
        "not_found_refunds": db.recent_not_found_refunds(REPORT_NOT_FOUND_LIMIT).await?,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
