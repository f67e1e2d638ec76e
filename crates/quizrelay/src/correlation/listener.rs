//! Background consumption of a family's response channel.

use super::ResponseCorrelator;
use crate::backbone::Subscription;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Feeds every record of `subscription` into `correlator` until `shutdown` is
/// cancelled or the subscription closes.
///
/// Records are committed after they have been filed, so the group's commit
/// position only covers responses the relay has seen. A failed commit is
/// logged and consumption continues; the next successful commit covers it.
pub async fn listen<S: Subscription>(
    correlator: Arc<ResponseCorrelator>,
    mut subscription: S,
    shutdown: CancellationToken,
) {
    let _family = correlator.family();
    #[cfg(feature = "tracing")]
    tracing::debug!(family = %_family, "response listener started");

    loop {
        let record = tokio::select! {
            () = shutdown.cancelled() => break,
            next = subscription.next() => match next {
                Some(record) => record,
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(family = %_family, "response subscription closed");
                    break;
                }
            },
        };

        if record.key.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::warn!(family = %_family, offset = record.offset, "dropping response without identity key");
        } else {
            correlator.accept(record.clone());
        }

        if let Err(_e) = subscription.commit(&record).await {
            #[cfg(feature = "tracing")]
            tracing::warn!(family = %_family, offset = record.offset, "commit failed: {_e}");
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(family = %_family, "response listener stopped");
}
