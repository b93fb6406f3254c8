use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use mailthread::test_support::{MemoryMailbox, MemorySink};
use mailthread::{ConversationSink, DateFilter, JsonFileSink, PipelineConfig, PipelineCoordinator, ThreadMethod};

#[derive(Parser, Debug)]
#[command(
    name = "mailthread",
    about = "Thread a mailbox fixture into conversations"
)]
struct Args {
    /// JSON file mapping folder names to arrays of raw messages.
    #[arg(long)]
    fixture: PathBuf,

    /// Where to write the conversations as JSON (stdout when omitted).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Threading method: subject, references or hybrid.
    #[arg(long)]
    method: Option<ThreadMethod>,

    /// Number of extraction workers.
    #[arg(long)]
    workers: Option<usize>,

    /// Comma separated folder patterns, in precedence order.
    #[arg(long)]
    folders: Option<String>,

    /// Subject grouping window in days.
    #[arg(long)]
    window_days: Option<i64>,

    /// Only extract messages sent in these months, as MM/YYYY,MM/YYYY.
    #[arg(long, conflicts_with = "days_back")]
    date_range: Option<String>,

    /// Only extract messages sent in the last N days.
    #[arg(long)]
    days_back: Option<u32>,

    /// Maximum messages kept per folder (0 for no limit).
    #[arg(long)]
    max_emails: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    let mut config = PipelineConfig::from_env()?;
    if let Some(method) = args.method {
        config = config.with_thread_method(method);
    }
    if let Some(workers) = args.workers {
        config = config.with_max_workers(workers);
    }
    if let Some(folders) = &args.folders {
        config = config.with_folder_patterns(mailthread::config::split_patterns(folders));
    }
    if let Some(days) = args.window_days {
        config = config.with_subject_window(chrono::Duration::days(days));
    }
    if let Some(range) = &args.date_range {
        config = config.with_date_filter(DateFilter::parse_month_range(range)?);
    }
    if let Some(days) = args.days_back {
        config = config.with_date_filter(DateFilter::DaysBack(days));
    }
    if let Some(max_emails) = args.max_emails {
        config = config.with_max_emails(max_emails);
    }

    let mailbox = Arc::new(MemoryMailbox::from_json_file(&args.fixture)?);
    let memory_sink = Arc::new(MemorySink::new());
    let sink: Arc<dyn ConversationSink> = match &args.output {
        Some(path) => Arc::new(JsonFileSink::new(path)),
        None => memory_sink.clone(),
    };

    let coordinator = PipelineCoordinator::new(config, mailbox, sink)?;
    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let report = coordinator.run().await?;
    for job in report.failed_jobs() {
        writeln!(
            io::stderr(),
            "warning: folder '{}' failed: {}",
            job.folder_pattern,
            job.error_message.as_deref().unwrap_or("unknown error")
        )?;
    }
    log::info!(
        "{} conversations, {} duplicates merged, {} dropped, {} outside date window, {} cycles broken",
        report.stats.conversations,
        report.stats.duplicates_merged,
        report.stats.messages_dropped,
        report.stats.messages_filtered,
        report.stats.cycles_broken
    );

    if args.output.is_none() {
        let conversations = memory_sink.last_batch().unwrap_or_default();
        let mut stdout = io::stdout().lock();
        serde_json::to_writer_pretty(&mut stdout, &conversations)?;
        writeln!(stdout)?;
    }

    Ok(())
}
