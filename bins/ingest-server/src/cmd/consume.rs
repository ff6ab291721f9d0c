use ingest::{IngestLoop, Worker};
use tokio_util::sync::CancellationToken;

use crate::backend;
use crate::config::{ConsumeArgs, IngestConfig};
use crate::error::ServerError;

// ═══════════════════════════════════════════════════════════════
//  consume: stream -> worker -> store
// ═══════════════════════════════════════════════════════════════

pub async fn run(args: ConsumeArgs) -> Result<(), ServerError> {
    let mut config = IngestConfig::load(&args.config)?;
    config.apply_consume_args(&args);
    config.consumer.validate()?;

    let store = backend::open_store(&config).await?;
    let (worker, worker_task) = Worker::new(store, config.worker.clone()).spawn();

    let mut client = backend::open_stream(&config)?;
    client.subscribe(&config.consumer.topic)?;
    tracing::info!(topic = %config.consumer.topic, "subscribed");

    let token = CancellationToken::new();
    let ingest = IngestLoop::new(client, worker, &config.consumer).with_cancellation(token.clone());

    // poll/commit block: the loop gets its own thread
    let mut running = tokio::task::spawn_blocking(move || ingest.run());
    let outcome = tokio::select! {
        res = &mut running => res?,
        sig = tokio::signal::ctrl_c() => {
            sig?;
            tracing::info!("interrupt received, stopping ingestion loop");
            token.cancel();
            running.await?
        }
    };

    // the loop owned the last handle; the worker drains its mailbox and exits
    let stats = worker_task.await?;
    tracing::info!(
        processed = stats.processed,
        persisted = stats.persisted,
        decode_failures = stats.decode_failures,
        persist_failures = stats.persist_failures,
        "worker stopped"
    );

    match outcome {
        Ok(summary) => {
            if summary.pending > 0 {
                tracing::warn!(pending = summary.pending, "uncommitted records will be re-delivered");
            }
            println!("Consumed {} messages from stream.", summary.records_observed);
            println!("Finished.");
            Ok(())
        }
        Err(failure) => {
            println!("Consumed {} messages from stream.", failure.records_observed);
            Err(ServerError::Failed(failure))
        }
    }
}
