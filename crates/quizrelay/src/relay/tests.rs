use super::*;
use crate::{backbone::MemoryBackbone, store::MemoryStore};
use bytes::Bytes;
use quizrelay_core::{
    CommittedPosition,
    wire::{
        ExplanationRequest, ExplanationResponse, ExplanationWork, QuestionRequest,
        QuestionResponse, QuestionType, QuestionWork,
    },
};
use serde::Serialize;

type TestRelay = Relay<MemoryBackbone, MemoryStore>;

async fn started(config: RelayConfig) -> (TestRelay, MemoryBackbone) {
    let backbone = MemoryBackbone::new();
    let relay = Relay::new(config, backbone.clone(), MemoryStore::new()).unwrap();
    relay.start().await.unwrap();
    (relay, backbone)
}

fn question_request() -> QuestionRequest {
    QuestionRequest {
        question_type: QuestionType::Blank,
        definition: "pick the word for the blank".to_string(),
        main_text: "The quick brown fox ...".to_string(),
    }
}

fn question_response(title: &str) -> QuestionResponse {
    QuestionResponse {
        question_type: Some(QuestionType::Blank),
        title: title.to_string(),
        main_text: "The quick ___ fox".to_string(),
        choices: vec!["brown".to_string(), "green".to_string()],
        answer: "brown".to_string(),
    }
}

/// Publishes a worker answer for `identity` on the family's response channel.
async fn respond<T: Serialize>(backbone: &MemoryBackbone, family: Family, identity: &str, body: &T) {
    backbone
        .publish(
            family.response_topic(),
            identity,
            wire::encode(body).unwrap(),
        )
        .await
        .unwrap();
}

/// Yields until `condition` holds, failing the test after a generous bound.
async fn until(mut condition: impl FnMut() -> bool) {
    let settled = timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await;
    assert!(settled.is_ok(), "condition never held");
}

#[tokio::test]
async fn question_round_trip() {
    let (relay, backbone) = started(RelayConfig::default()).await;
    let id = ClientIdentity::from("session-1");

    let channel = relay.get_channel(&id, Family::Question).await.unwrap();
    assert_eq!(channel.name(), "QuestionRequest1");

    let marker = relay
        .dispatch::<QuestionWork>(&id, &question_request())
        .await
        .unwrap();
    assert_eq!(marker, SequenceMarker(0));
    assert_eq!(
        relay.state(&id, Family::Question),
        CorrelationState::AwaitingResponse {
            pending: 1,
            received: 0
        }
    );
    assert_eq!(relay.fetch::<QuestionWork>(&id).await.unwrap(), None);

    let published = backbone.records("QuestionRequest1");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key, "session-1");

    respond(&backbone, Family::Question, "session-1", &question_response("Q1")).await;
    let response = relay
        .wait_fetch::<QuestionWork>(&id, Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.title, "Q1");
    assert_eq!(relay.state(&id, Family::Question), CorrelationState::NoRequest);

    relay.shutdown().await;
}

#[tokio::test]
async fn explanation_round_trip() {
    let (relay, backbone) = started(RelayConfig::default()).await;
    let id = ClientIdentity::from("session-2");

    let request = ExplanationRequest::for_question(
        QuestionType::Blank,
        &question_response("Q1"),
        "explain why the answer fits",
    );
    relay
        .dispatch::<ExplanationWork>(&id, &request)
        .await
        .unwrap();
    assert_eq!(backbone.len("ExplanationRequest1"), 1);

    let answer = ExplanationResponse {
        translation: "translated".to_string(),
        explanation: "because".to_string(),
        answer: "brown".to_string(),
    };
    respond(&backbone, Family::Explanation, "session-2", &answer).await;

    let delivered = relay
        .wait_fetch::<ExplanationWork>(&id, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(delivered, Some(answer));
    // Families never cross.
    assert_eq!(relay.state(&id, Family::Question), CorrelationState::NoRequest);

    relay.shutdown().await;
}

#[tokio::test]
async fn second_request_within_lock_ttl_is_rejected() {
    let (relay, backbone) = started(RelayConfig::default()).await;
    let id = ClientIdentity::from("session-1");

    relay
        .dispatch::<QuestionWork>(&id, &question_request())
        .await
        .unwrap();
    let err = relay
        .dispatch::<QuestionWork>(&id, &question_request())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        Error::DuplicateRequest {
            identity: "session-1".to_string(),
            family: Family::Question,
        }
    );
    assert_eq!(err.code(), "E105");
    assert_eq!(backbone.len("QuestionRequest1"), 1);
    assert_eq!(relay.correlator(Family::Question).pending(&id), 1);

    // The other family has its own lock.
    let request = ExplanationRequest::for_question(
        QuestionType::Blank,
        &question_response("Q1"),
        "explain",
    );
    assert!(
        relay
            .dispatch::<ExplanationWork>(&id, &request)
            .await
            .is_ok()
    );

    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn bursty_client_receives_only_the_latest_response() {
    let (relay, backbone) = started(RelayConfig::default()).await;
    let id = ClientIdentity::from("session-1");

    let a = relay
        .dispatch::<QuestionWork>(&id, &question_request())
        .await
        .unwrap();
    tokio::time::advance(relay.config().question.lock_ttl + Duration::from_secs(1)).await;
    let b = relay
        .dispatch::<QuestionWork>(&id, &question_request())
        .await
        .unwrap();
    assert_eq!((a, b), (SequenceMarker(0), SequenceMarker(1)));

    respond(&backbone, Family::Question, "session-1", &question_response("A")).await;
    until(|| {
        relay.state(&id, Family::Question)
            == CorrelationState::AwaitingResponse {
                pending: 2,
                received: 1,
            }
    })
    .await;
    assert_eq!(relay.fetch::<QuestionWork>(&id).await.unwrap(), None);

    respond(&backbone, Family::Question, "session-1", &question_response("B")).await;
    until(|| relay.state(&id, Family::Question) == CorrelationState::Ready { pending: 2 }).await;

    let delivered = relay.fetch::<QuestionWork>(&id).await.unwrap().unwrap();
    assert_eq!(delivered.title, "B");
    assert_eq!(relay.fetch::<QuestionWork>(&id).await.unwrap(), None);

    relay.shutdown().await;
}

#[tokio::test]
async fn estimate_reports_gap_to_committed_position() {
    let config = RelayConfig::default();
    let group = config.group_id.clone();
    let (relay, backbone) = started(config).await;
    let id = ClientIdentity::from("session-1");

    // Ten requests from other clients are already queued.
    for i in 0..10 {
        backbone
            .publish("QuestionRequest1", &format!("other-{i}"), Bytes::new())
            .await
            .unwrap();
    }

    let before = relay.estimate(&id, Family::Question).await.unwrap();
    assert_eq!(before.channel, None);
    assert_eq!(before.messages_ahead(), None);

    let marker = relay
        .dispatch::<QuestionWork>(&id, &question_request())
        .await
        .unwrap();
    assert_eq!(marker, SequenceMarker(10));

    let cold = relay.estimate(&id, Family::Question).await.unwrap();
    assert_eq!(cold.committed, CommittedPosition::Unknown);
    assert_eq!(cold.messages_ahead(), None);

    backbone.commit_offset("QuestionRequest1", &group, 8);
    let estimate = relay.estimate(&id, Family::Question).await.unwrap();
    assert_eq!(estimate.channel, Some(Channel::new(Family::Question, 0)));
    assert_eq!(estimate.marker, Some(SequenceMarker(10)));
    assert_eq!(estimate.messages_ahead(), Some(3));

    relay.shutdown().await;
}

#[tokio::test]
async fn release_on_delivery_reopens_the_guard() {
    let config = RelayConfig {
        release_on_delivery: true,
        ..RelayConfig::default()
    };
    let (relay, backbone) = started(config).await;
    let id = ClientIdentity::from("session-1");

    relay
        .dispatch::<QuestionWork>(&id, &question_request())
        .await
        .unwrap();
    respond(&backbone, Family::Question, "session-1", &question_response("Q1")).await;
    relay
        .wait_fetch::<QuestionWork>(&id, Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();

    assert!(
        relay
            .dispatch::<QuestionWork>(&id, &question_request())
            .await
            .is_ok()
    );

    relay.shutdown().await;
}

#[tokio::test]
async fn failed_publish_releases_the_guard() {
    let (relay, backbone) = started(RelayConfig::default()).await;
    let id = ClientIdentity::from("session-1");
    relay.get_channel(&id, Family::Question).await.unwrap();

    backbone.set_available(false);
    let err = relay
        .dispatch::<QuestionWork>(&id, &question_request())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BackboneUnavailable { .. }));
    assert!(err.is_transient());

    backbone.set_available(true);
    assert!(
        relay
            .dispatch::<QuestionWork>(&id, &question_request())
            .await
            .is_ok()
    );

    relay.shutdown().await;
}

#[tokio::test]
async fn retry_after_rejected_publish_becomes_ready() {
    let (relay, backbone) = started(RelayConfig::default()).await;
    let id = ClientIdentity::from("session-1");

    backbone.set_available(false);
    assert!(
        relay
            .dispatch::<QuestionWork>(&id, &question_request())
            .await
            .is_err()
    );
    assert_eq!(relay.state(&id, Family::Question), CorrelationState::NoRequest);

    backbone.set_available(true);
    relay
        .dispatch::<QuestionWork>(&id, &question_request())
        .await
        .unwrap();
    assert_eq!(backbone.len("QuestionRequest1"), 1);
    assert_eq!(
        relay.state(&id, Family::Question),
        CorrelationState::AwaitingResponse {
            pending: 1,
            received: 0
        }
    );

    respond(&backbone, Family::Question, "session-1", &question_response("retried")).await;
    let delivered = relay
        .wait_fetch::<QuestionWork>(&id, Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.title, "retried");

    relay.shutdown().await;
}

#[tokio::test]
async fn destroyed_session_starts_fresh() {
    let (relay, backbone) = started(RelayConfig::default()).await;
    let id = ClientIdentity::from("session-1");

    relay
        .dispatch::<QuestionWork>(&id, &question_request())
        .await
        .unwrap();
    assert!(relay.destroy_session(&id).await.unwrap());

    assert_eq!(relay.fetch::<QuestionWork>(&id).await.unwrap(), None);
    assert_eq!(relay.state(&id, Family::Question), CorrelationState::NoRequest);
    let estimate = relay.estimate(&id, Family::Question).await.unwrap();
    assert_eq!(estimate, QueueEstimate::default());

    // A late answer to the destroyed request is an orphan and cannot satisfy
    // the next one.
    respond(&backbone, Family::Question, "session-1", &question_response("late")).await;
    until(|| relay.correlator(Family::Question).buffered(&id) == 1).await;

    relay
        .dispatch::<QuestionWork>(&id, &question_request())
        .await
        .unwrap();
    assert_eq!(relay.fetch::<QuestionWork>(&id).await.unwrap(), None);

    respond(&backbone, Family::Question, "session-1", &question_response("fresh")).await;
    let delivered = relay
        .wait_fetch::<QuestionWork>(&id, Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.title, "fresh");

    relay.shutdown().await;
}

#[tokio::test]
async fn destroy_releases_blocked_waiters() {
    let (relay, _backbone) = started(RelayConfig::default()).await;
    let id = ClientIdentity::from("session-1");
    relay
        .dispatch::<QuestionWork>(&id, &question_request())
        .await
        .unwrap();

    let waiter = {
        let relay = relay.clone();
        let id = id.clone();
        tokio::spawn(async move {
            relay
                .wait_fetch::<QuestionWork>(&id, Duration::from_secs(3600))
                .await
        })
    };
    tokio::task::yield_now().await;
    relay.destroy_session(&id).await.unwrap();

    let result = timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
    assert_eq!(result, Ok(None));

    relay.shutdown().await;
}

#[tokio::test]
async fn undecodable_response_is_a_serialization_error() {
    let (relay, backbone) = started(RelayConfig::default()).await;
    let id = ClientIdentity::from("session-1");
    relay
        .dispatch::<QuestionWork>(&id, &question_request())
        .await
        .unwrap();

    backbone
        .publish(
            Family::Question.response_topic(),
            "session-1",
            Bytes::from_static(br#"{"v":1,"unexpected":true}"#),
        )
        .await
        .unwrap();

    let err = relay
        .wait_fetch::<QuestionWork>(&id, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "E102");

    relay.shutdown().await;
}

#[tokio::test]
async fn stored_assignment_outside_pool_is_ignored() {
    let (relay, _backbone) = started(RelayConfig::default()).await;
    let id = ClientIdentity::from("session-1");
    relay
        .inner
        .store
        .set(&channel_key(&id, Family::Question), "QuestionRequest7", None)
        .await
        .unwrap();

    assert_eq!(relay.assigned_channel(&id, Family::Question).await.unwrap(), None);

    relay.shutdown().await;
}

#[tokio::test]
async fn shutdown_refuses_new_work() {
    let (relay, _backbone) = started(RelayConfig::default()).await;
    relay.shutdown().await;
    assert!(relay.is_shutdown());

    let id = ClientIdentity::from("session-1");
    assert_eq!(
        relay
            .dispatch::<QuestionWork>(&id, &question_request())
            .await,
        Err(Error::ServiceShutdown)
    );
    assert_eq!(
        relay.get_channel(&id, Family::Question).await,
        Err(Error::ServiceShutdown)
    );
    assert_eq!(relay.start().await, Err(Error::ServiceShutdown));
}

#[tokio::test]
async fn start_fails_when_backbone_is_down() {
    let backbone = MemoryBackbone::new();
    backbone.set_available(false);
    let relay: TestRelay =
        Relay::new(RelayConfig::default(), backbone.clone(), MemoryStore::new()).unwrap();

    assert!(matches!(
        relay.start().await,
        Err(Error::BackboneUnavailable { .. })
    ));

    backbone.set_available(true);
    relay.start().await.unwrap();
    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn idle_sessions_are_swept() {
    let config = RelayConfig {
        session_idle_ttl: Duration::from_secs(30),
        ..RelayConfig::default()
    };
    let (relay, _backbone) = started(config).await;
    let id = ClientIdentity::from("session-1");
    relay
        .dispatch::<QuestionWork>(&id, &question_request())
        .await
        .unwrap();
    assert_eq!(relay.session_count(), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(relay.sweep_idle_sessions().await, 1);
    assert_eq!(relay.session_count(), 0);
    assert_eq!(relay.correlator(Family::Question).pending(&id), 0);

    relay.shutdown().await;
}

#[test]
fn invalid_config_is_rejected() {
    let config = RelayConfig {
        group_id: String::new(),
        ..RelayConfig::default()
    };
    let result = Relay::new(config, MemoryBackbone::new(), MemoryStore::new());
    assert!(matches!(result, Err(Error::InvalidConfig { .. })));
}
