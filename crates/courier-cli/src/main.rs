use std::error::Error;
use std::sync::Arc;

use tokio::time::{Duration, sleep};

use courier_core::impls::{MemoryLedger, SqliteLedger};
use courier_core::ports::DeliveryLedger;
use courier_core::telemetry::init_tracing;
use courier_core::{CourierConfig, DeliveryService, WebhookJob};

/// A job file holds one job object or an array of them.
fn read_jobs(path: &str) -> Result<Vec<WebhookJob>, Box<dyn Error>> {
    let raw = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let jobs = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        other => vec![serde_json::from_value(other)?],
    };
    Ok(jobs)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let config = CourierConfig::load()?;

    // (A) ledger: DB URL があれば SQLite、なければメモリ
    let ledger: Arc<dyn DeliveryLedger> = match config.ledger.database_url.as_deref() {
        Some(url) => Arc::new(SqliteLedger::connect(url).await?),
        None => {
            tracing::warn!("no ledger database configured, records are kept in memory");
            Arc::new(MemoryLedger::new())
        }
    };

    // (B) service 起動（backend はここで一度だけ決まる）
    let service = DeliveryService::start(&config, ledger).await?;

    // (C) 引数の JSON ファイルから job を投入
    for path in std::env::args().skip(1) {
        for job in read_jobs(&path)? {
            let id = service.enqueue_webhook(job).await?;
            println!("queued {id} from {path}");
        }
    }

    // (D) 空になるか Ctrl-C まで待つ
    loop {
        let stats = service.queue_stats().await;
        if stats.is_drained() {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break;
            }
            _ = sleep(Duration::from_millis(500)) => {}
        }
    }

    println!("{}", serde_json::to_string_pretty(&service.queue_stats().await)?);
    service.shutdown().await;
    Ok(())
}
