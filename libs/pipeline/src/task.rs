use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use topic_engine::{Delivery, Subscription};

use crate::enrichment::EnrichmentService;

// ═══════════════════════════════════════════════════════════════
//  Enrichment task: subscription → service.handle() → ack/nack
// ═══════════════════════════════════════════════════════════════

/// Consume `subscription`, running up to `max_in_flight` invocations at once.
///
/// Success acks the delivery, failure nacks it so the channel redelivers.
/// On cancellation the loop stops receiving, in-flight invocations see the
/// cancelled token, and the task ends once they have settled.
pub fn spawn_enrichment_task(
    service: Arc<EnrichmentService>,
    mut subscription: Subscription,
    max_in_flight: usize,
    invocation_timeout: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let topic = subscription.topic().to_string();
        let permits = Arc::new(Semaphore::new(max_in_flight.max(1)));
        let mut in_flight = JoinSet::new();
        tracing::info!(topic = %topic, max_in_flight, "enrichment loop started");

        loop {
            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = token.cancelled() => break,
            };
            let delivery = tokio::select! {
                delivery = subscription.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
                _ = token.cancelled() => break,
            };

            let service = service.clone();
            let invocation_token = token.child_token();
            in_flight.spawn(async move {
                invoke(&service, delivery, invocation_timeout, &invocation_token).await;
                drop(permit);
            });

            while in_flight.try_join_next().is_some() {}
        }

        while in_flight.join_next().await.is_some() {}
        tracing::info!(topic = %topic, "enrichment loop stopped");
    })
}

async fn invoke(
    service: &EnrichmentService,
    delivery: Delivery,
    timeout: Duration,
    token: &CancellationToken,
) {
    match service.handle_within(delivery.message(), timeout, token).await {
        Ok(_) => delivery.ack(),
        Err(e) => {
            tracing::warn!(
                message_id = %delivery.message().id(),
                attempt = delivery.attempt(),
                kind = ?e.kind(),
                "delivery failed, returning it to the channel"
            );
            delivery.nack();
        }
    }
}
