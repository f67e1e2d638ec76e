//! In-process stand-ins for the generation workers.
//!
//! With `--loopback`, one task per request channel consumes requests as a
//! member of the relay's consumer group, waits the configured latency and
//! answers with a canned response on the family's response channel, keyed by
//! the requesting identity. Commits advance as requests are handled, so queue
//! estimates behave as they would against real workers.

use core::time::Duration;
use quizrelay::{Backbone, Channel, KeyValueStore, Relay, Subscription};
use quizrelay_core::{
    Family,
    wire::{
        self, ExplanationRequest, ExplanationResponse, ExplanationWork, QuestionRequest,
        QuestionResponse, QuestionWork, Workload,
    },
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A workload the loopback pool can answer.
pub trait CannedResponse: Workload {
    fn respond(request: Self::Request) -> Self::Response;
}

impl CannedResponse for QuestionWork {
    fn respond(request: QuestionRequest) -> QuestionResponse {
        QuestionResponse {
            question_type: Some(request.question_type),
            title: format!("[loopback] {:?}", request.question_type),
            main_text: request.main_text,
            choices: (1..=5).map(|i| format!("choice {i}")).collect(),
            answer: "1".to_string(),
        }
    }
}

impl CannedResponse for ExplanationWork {
    fn respond(request: ExplanationRequest) -> ExplanationResponse {
        ExplanationResponse {
            translation: request.main_text,
            explanation: format!("[loopback] {}", request.title),
            answer: request.answer,
        }
    }
}

/// Spawns one loopback worker per request channel of every family.
pub fn spawn_workers<B, S>(
    relay: &Relay<B, S>,
    latency: Duration,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>>
where
    B: Backbone + Clone,
    S: KeyValueStore,
{
    let group_id = relay.config().group_id.clone();
    let mut handles = Vec::new();

    for channel in relay.channels(Family::Question) {
        handles.push(tokio::spawn(run_worker::<B, QuestionWork>(
            relay.backbone().clone(),
            channel,
            group_id.clone(),
            latency,
            shutdown.clone(),
        )));
    }
    for channel in relay.channels(Family::Explanation) {
        handles.push(tokio::spawn(run_worker::<B, ExplanationWork>(
            relay.backbone().clone(),
            channel,
            group_id.clone(),
            latency,
            shutdown.clone(),
        )));
    }

    #[cfg(feature = "tracing")]
    tracing::info!(workers = handles.len(), ?latency, "loopback workers started");

    handles
}

async fn run_worker<B: Backbone, W: CannedResponse>(
    backbone: B,
    channel: Channel,
    group_id: String,
    latency: Duration,
    shutdown: CancellationToken,
) {
    let topic = channel.name();
    let mut subscription = match backbone.subscribe(&topic, &group_id).await {
        Ok(subscription) => subscription,
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::error!(%channel, "loopback worker failed to subscribe: {_e}");
            return;
        }
    };

    loop {
        let record = tokio::select! {
            () = shutdown.cancelled() => break,
            next = subscription.next() => match next {
                Some(record) => record,
                None => break,
            },
        };

        match wire::decode::<W::Request>(&record.payload) {
            Ok(request) => {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(latency) => {}
                }
                let answer = wire::encode(&W::respond(request));
                match answer {
                    Ok(payload) => {
                        if let Err(_e) = backbone
                            .publish(W::FAMILY.response_topic(), &record.key, payload)
                            .await
                        {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(%channel, identity = %record.key, "loopback reply failed: {_e}");
                        }
                    }
                    Err(_e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(%channel, "loopback reply not encodable: {_e}");
                    }
                }
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%channel, offset = record.offset, "skipping undecodable request: {_e}");
            }
        }

        if let Err(_e) = subscription.commit(&record).await {
            #[cfg(feature = "tracing")]
            tracing::warn!(%channel, offset = record.offset, "loopback commit failed: {_e}");
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(%channel, "loopback worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizrelay::{
        ClientIdentity, CommittedPosition, MemoryBackbone, MemoryStore, RelayConfig,
        wire::QuestionType,
    };

    #[tokio::test(start_paused = true)]
    async fn loopback_answers_and_commits() {
        let backbone = MemoryBackbone::new();
        let config = RelayConfig {
            release_on_delivery: true,
            ..RelayConfig::default()
        };
        let group = config.group_id.clone();
        let relay = Relay::new(config, backbone.clone(), MemoryStore::new()).unwrap();
        relay.start().await.unwrap();

        let shutdown = CancellationToken::new();
        let handles = spawn_workers(&relay, Duration::from_millis(250), shutdown.clone());
        assert_eq!(handles.len(), 2);

        let id = ClientIdentity::from("session-1");
        relay
            .dispatch::<QuestionWork>(
                &id,
                &QuestionRequest {
                    question_type: QuestionType::Title,
                    definition: "title".to_string(),
                    main_text: "passage".to_string(),
                },
            )
            .await
            .unwrap();

        let question = relay
            .wait_fetch::<QuestionWork>(&id, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(question.question_type, Some(QuestionType::Title));
        assert_eq!(question.main_text, "passage");

        let explanation = relay
            .dispatch::<ExplanationWork>(
                &id,
                &ExplanationRequest::for_question(QuestionType::Title, &question, "explain"),
            )
            .await;
        assert!(explanation.is_ok());
        let explained = relay
            .wait_fetch::<ExplanationWork>(&id, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(explained.answer, "1");

        assert_eq!(
            backbone
                .committed_position("QuestionRequest1", &group)
                .await
                .unwrap(),
            CommittedPosition::At(1)
        );

        shutdown.cancel();
        futures::future::join_all(handles).await;
        relay.shutdown().await;
    }
}
