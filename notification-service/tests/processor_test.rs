mod common;

use common::{envelope, fast_settings, payload, transport, FlakyDedupStore, Harness};
use notification_service::error::ProcessingError;
use notification_service::models::{AttemptOutcome, ErrorClass, Outcome, ProcessingStatus};
use notification_service::services::{
    ChannelError, DedupStore, EventProcessor, InMemoryDeadLetterSink, InMemoryRetryLedger,
    MockDispatcher, RetryLedger,
};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Delivery and idempotence
// =============================================================================

#[tokio::test]
async fn successful_dispatch_is_delivered_and_remembered() {
    let harness = Harness::new(MockDispatcher::new(), fast_settings(5));

    let outcome = harness.processor.process(&envelope("e1")).await.unwrap();

    assert_eq!(outcome, Outcome::Delivered);
    assert!(harness.dedup.has("e1").await.unwrap());
    assert_eq!(harness.dispatcher.delivered(), vec!["e1".to_string()]);

    let record = harness.ledger.get("e1").await.unwrap().unwrap();
    assert_eq!(record.status, ProcessingStatus::Succeeded);
    assert_eq!(record.attempt_count, 1);
}

#[tokio::test]
async fn redelivered_event_is_a_duplicate_without_dispatch() {
    let harness = Harness::new(MockDispatcher::new(), fast_settings(5));

    harness.processor.process(&envelope("e1")).await.unwrap();
    let outcome = harness.processor.process(&envelope("e1")).await.unwrap();

    assert_eq!(outcome, Outcome::Duplicate);
    assert_eq!(harness.dispatcher.send_count(), 1);
}

#[tokio::test]
async fn succeeded_ledger_record_backfills_missing_dedup_entry() {
    let harness = Harness::new(MockDispatcher::new(), fast_settings(5));
    harness
        .ledger
        .record_attempt("e1", AttemptOutcome::Succeeded, chrono::Utc::now())
        .await
        .unwrap();

    let outcome = harness.processor.process(&envelope("e1")).await.unwrap();

    assert_eq!(outcome, Outcome::Duplicate);
    assert_eq!(harness.dispatcher.send_count(), 0);
    assert!(harness.dedup.has("e1").await.unwrap());
}

// =============================================================================
// Retries and dead-lettering
// =============================================================================

#[tokio::test]
async fn five_transient_failures_end_in_one_dead_letter() {
    let failures = (0..5)
        .map(|i| ChannelError::Unavailable(format!("attempt {}", i + 1)))
        .collect();
    let harness = Harness::new(MockDispatcher::failing_with(failures), fast_settings(5));
    let e2 = envelope("e2");

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        let outcome = harness.processor.process(&e2).await.unwrap();
        if let Outcome::RetryScheduled { next_eligible_at, .. } = &outcome {
            // What the retry queue does once the delay has passed
            let due = harness.ledger.due_for_retry(*next_eligible_at).await.unwrap();
            assert_eq!(due, vec!["e2".to_string()]);
        }
        outcomes.push(outcome);
    }

    for (i, outcome) in outcomes[..4].iter().enumerate() {
        assert!(
            matches!(outcome, Outcome::RetryScheduled { attempt, .. } if *attempt == i as u32 + 1),
            "unexpected outcome {:?}",
            outcome
        );
    }
    assert_eq!(outcomes[4], Outcome::DeadLettered { attempts: 5 });

    let dead_letters = harness.sink.records();
    assert_eq!(dead_letters.len(), 1);
    let dead_letter = &dead_letters[0];
    assert_eq!(dead_letter.event_id, "e2");
    assert_eq!(dead_letter.reason, ErrorClass::TransientDispatch);
    assert_eq!(dead_letter.attempts.len(), 5);
    assert!(dead_letter
        .attempts
        .windows(2)
        .all(|w| w[0].number + 1 == w[1].number && w[0].at <= w[1].at));

    assert!(!harness.dedup.has("e2").await.unwrap());
    let record = harness.ledger.get("e2").await.unwrap().unwrap();
    assert_eq!(record.status, ProcessingStatus::DeadLettered);
}

#[tokio::test]
async fn retry_delays_grow_until_the_cap() {
    let failures = (0..4)
        .map(|_| ChannelError::Timeout("slow provider".to_string()))
        .collect();
    let harness = Harness::new(MockDispatcher::failing_with(failures), fast_settings(10));
    let e3 = envelope("e3");

    let mut delays = Vec::new();
    for _ in 0..4 {
        let before = chrono::Utc::now();
        match harness.processor.process(&e3).await.unwrap() {
            Outcome::RetryScheduled { next_eligible_at, .. } => {
                delays.push((next_eligible_at - before).num_milliseconds());
                harness.ledger.due_for_retry(next_eligible_at).await.unwrap();
            }
            other => panic!("expected a retry, got {:?}", other),
        }
    }

    // 10ms, 20ms, 40ms, then capped at 40ms
    assert!(delays[0] >= 10);
    assert!(delays[1] >= 20);
    assert!(delays[2] >= 40 && delays[3] >= 40);
    assert!(delays[3] < 1_000);
}

#[tokio::test]
async fn permanent_failure_skips_retries() {
    let harness = Harness::new(
        MockDispatcher::failing_with(vec![ChannelError::InvalidRecipient(
            "unknown user".to_string(),
        )]),
        fast_settings(5),
    );

    let outcome = harness.processor.process(&envelope("e4")).await.unwrap();

    assert_eq!(outcome, Outcome::DeadLettered { attempts: 1 });
    let dead_letters = harness.sink.records();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].reason, ErrorClass::PermanentDispatch);
}

#[tokio::test]
async fn dead_lettered_event_is_never_dead_lettered_twice() {
    let harness = Harness::new(
        MockDispatcher::failing_with(vec![ChannelError::Rejected("blocked".to_string())]),
        fast_settings(5),
    );

    harness.processor.process(&envelope("e5")).await.unwrap();
    let outcome = harness.processor.process(&envelope("e5")).await.unwrap();

    assert_eq!(outcome, Outcome::Duplicate);
    assert_eq!(harness.sink.records().len(), 1);
    assert_eq!(harness.dispatcher.send_count(), 1);
}

// =============================================================================
// Rejection
// =============================================================================

#[tokio::test]
async fn malformed_payloads_are_rejected_without_side_effects() {
    let harness = Harness::new(MockDispatcher::new(), fast_settings(5));

    let bad_payloads: Vec<Option<Vec<u8>>> = vec![
        None,
        Some(b"   ".to_vec()),
        Some(b"{not json".to_vec()),
        Some(br#"{"orderId":"o1","userId":"u1","total":1,"currency":"USD","createdAt":"2024-01-01T00:00:00Z"}"#.to_vec()),
        Some(br#"{"eventId":"","orderId":"o1","userId":"u1","total":1,"currency":"USD","createdAt":"2024-01-01T00:00:00Z"}"#.to_vec()),
        Some(br#"{"eventId":"e6","orderId":"o1","userId":"u1","total":-1,"currency":"USD","createdAt":"2024-01-01T00:00:00Z"}"#.to_vec()),
    ];

    for (offset, bad) in bad_payloads.iter().enumerate() {
        let processed = harness
            .processor
            .process_payload(bad.as_deref(), transport(0, offset as i64))
            .await
            .unwrap();
        assert_eq!(processed.outcome, Outcome::Rejected);
        assert!(processed.envelope.is_none());
    }

    assert_eq!(harness.dispatcher.send_count(), 0);
    assert!(harness.ledger.is_empty());
    assert!(harness.dedup.is_empty());
}

#[tokio::test]
async fn valid_payload_with_unknown_fields_is_processed() {
    let harness = Harness::new(MockDispatcher::new(), fast_settings(5));
    let mut body: serde_json::Value = serde_json::from_slice(&payload("e7")).unwrap();
    body["channelHint"] = serde_json::json!("email");

    let processed = harness
        .processor
        .process_payload(Some(&serde_json::to_vec(&body).unwrap()), transport(0, 7))
        .await
        .unwrap();

    assert_eq!(processed.outcome, Outcome::Delivered);
    assert_eq!(processed.envelope.unwrap().transport.offset, 7);
}

// =============================================================================
// Infrastructure errors
// =============================================================================

#[tokio::test]
async fn store_outage_does_not_consume_an_attempt() {
    let ledger = Arc::new(InMemoryRetryLedger::new(Duration::from_secs(3600)));
    let dispatcher = Arc::new(MockDispatcher::new());
    let processor = EventProcessor::new(
        Arc::new(FlakyDedupStore::new(1)),
        ledger.clone(),
        Arc::new(InMemoryDeadLetterSink::new()),
        dispatcher.clone(),
        fast_settings(5),
    );

    let first = processor.process(&envelope("e8")).await;
    assert!(matches!(first, Err(ProcessingError::Infrastructure(_))));
    assert_eq!(dispatcher.send_count(), 0);
    assert!(ledger.is_empty());

    let second = processor.process(&envelope("e8")).await.unwrap();
    assert_eq!(second, Outcome::Delivered);
    assert_eq!(ledger.get("e8").await.unwrap().unwrap().attempt_count, 1);
}
