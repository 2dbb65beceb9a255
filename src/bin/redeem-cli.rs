//! 命令行客户端：手动录入条码、查看/删除记录、实时查看变更

use std::time::Duration;

use clap::{Parser, Subcommand};
use env_logger::Env;

use redeem_backend::external::RemoteRecordStore;
use redeem_backend::flow::{ListEntry, Notification, NotificationLevel, RedemptionFlow};
use redeem_backend::models::RecordChange;
use redeem_backend::store::{RecordFilter, RecordStore};
use redeem_backend::utils::BarcodePolicy;

#[derive(Debug, Parser)]
#[command(name = "redeem-cli", version, about = "Record and inspect barcode redemptions")]
struct Cli {
    /// Redeem backend base URL
    #[arg(long, env = "REDEEM_API_URL", default_value = "http://localhost:8080")]
    api_url: String,

    /// Require barcodes to match this regex before submitting
    #[arg(long, env = "BARCODE_PATTERN")]
    pattern: Option<String>,

    /// Polling interval for `watch`, in seconds
    #[arg(long, env = "SYNC_POLL_INTERVAL_SECS", default_value = "5")]
    poll_interval: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List recent redemptions, newest first
    List {
        /// Only show barcodes containing this text
        #[arg(long, short = 's')]
        search: Option<String>,
        /// Maximum number of records to print
        #[arg(long, default_value = "20")]
        limit: u64,
    },
    /// Record a redemption
    Submit { barcode: String },
    /// Delete a redemption record
    Delete { id: i64 },
    /// Print redemptions as other clients record or delete them
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let store = RemoteRecordStore::new(&cli.api_url, Duration::from_secs(cli.poll_interval.max(1)))?;
    let policy = match cli.pattern.as_deref() {
        Some(pattern) => BarcodePolicy::pattern(pattern, format!("Barcode must match {pattern}"))?,
        None => BarcodePolicy::NonEmpty,
    };

    match cli.command {
        Command::List { search, limit } => {
            let filter = RecordFilter {
                search,
                offset: 0,
                limit: Some(limit),
            };
            let slice = store.list(&filter).await?;
            for record in &slice.items {
                println!(
                    "{:>8}  {}  {}",
                    record.id,
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.barcode
                );
            }
            println!("({} of {} shown)", slice.items.len(), slice.total);
        }
        Command::Submit { barcode } => {
            let mut flow = RedemptionFlow::new(store, policy).with_optimistic(false);
            let result = flow.submit_barcode(&barcode).await;
            print_notifications(flow.take_notifications());
            if let Some(field_error) = &flow.form().field_error {
                eprintln!("barcode: {field_error}");
            }
            if let Ok(record) = result {
                println!("{}", record.id);
            } else {
                std::process::exit(1);
            }
        }
        Command::Delete { id } => {
            let mut flow = RedemptionFlow::new(store, policy);
            let result = flow.delete(id).await;
            print_notifications(flow.take_notifications());
            if result.is_err() {
                std::process::exit(1);
            }
        }
        Command::Watch => {
            let mut flow = RedemptionFlow::new(store, policy);
            flow.refresh().await?;
            // 以刚加载的列表为基线，之后到达的变更都会推送
            let baseline = flow.list().records().map(|r| r.id).collect();
            let mut rx = flow.store().subscribe_from(Some(baseline));
            if let Some(ListEntry::Confirmed(head)) = flow.list().head() {
                println!("latest: {} ({})", head.barcode, head.created_at);
            }

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    change = rx.recv() => match change {
                        Ok(change) => {
                            print_change(&change);
                            flow.apply_change(change);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                            flow.refresh().await?;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        }
    }

    Ok(())
}

fn print_change(change: &RecordChange) {
    match change {
        RecordChange::Inserted { record } => {
            println!("+ {:>8}  {}  {}", record.id, record.created_at, record.barcode)
        }
        RecordChange::Deleted { id } => println!("- {id:>8}"),
    }
}

fn print_notifications(notifications: Vec<Notification>) {
    for n in notifications {
        match n.level {
            NotificationLevel::Success => println!("{}: {}", n.title, n.description),
            NotificationLevel::Error => eprintln!("{}: {}", n.title, n.description),
        }
    }
}
