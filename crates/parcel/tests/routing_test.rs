//! Routing behaviour of a single invocation and of concurrent invocations.

mod common;

use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use common::{Harness, ScriptedSink, order};
use parcel::{KeyStrategy, MemoryQueue, OrderMessage, OrderProcessor, RetryPolicy, RoutingDecision};
use parcel_core::{MetricsController, init_metrics_test};

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn test_success_on_first_try() {
        let harness = Harness::failing_first(0, 4);
        let message = order("a", json!({"orderId": 1}));

        let decision = harness
            .processor
            .process(&message, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!decision.dead_lettered());
        assert_eq!(decision.attempts(), 1);
        let stored = harness.stored().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].1.as_ref(), br#"{"orderId":1}"#);
        assert!(harness.errors.is_empty().await);
    }

    #[tokio::test]
    async fn test_all_attempts_fail() {
        let harness = Harness::always_failing(4);
        let message = order("b", json!({"orderId": 2}));

        let decision = harness
            .processor
            .process(&message, &CancellationToken::new())
            .await
            .unwrap();

        assert!(decision.dead_lettered());
        assert_eq!(harness.sink.calls(), 4);
        assert!(harness.stored().await.is_empty());
        let parked = harness.errors.messages().await;
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].body().as_ref(), br#"{"orderId":2}"#);
    }

    #[tokio::test]
    async fn test_success_on_last_try() {
        init_metrics_test();
        let harness = Harness::failing_first(3, 4).with_target("scenario-c");
        let message = order("c", json!({"orderId": 3}));

        let decision = harness
            .processor
            .process(&message, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            decision,
            RoutingDecision::DeliveredToDurableSink { attempts: 4, .. }
        ));
        assert_eq!(harness.sink.calls(), 4);
        assert_eq!(harness.stored().await.len(), 1);
        assert!(harness.errors.is_empty().await);

        let output = MetricsController::get().unwrap().render();
        assert_eq!(attempts_recorded(&output, "scenario-c", "failure"), 3, "{output}");
        assert_eq!(attempts_recorded(&output, "scenario-c", "success"), 1, "{output}");
    }

    /// Value of `parcel_write_attempts_total` for one target and status.
    fn attempts_recorded(output: &str, target: &str, status: &str) -> u64 {
        let target = format!("target=\"{target}\"");
        let status = format!("status=\"{status}\"");
        output
            .lines()
            .filter(|line| line.starts_with("parcel_write_attempts_total{"))
            .filter(|line| line.contains(&target) && line.contains(&status))
            .filter_map(|line| line.rsplit(' ').next()?.parse::<f64>().ok())
            .map(|value| value as u64)
            .sum()
    }
}

mod properties {
    use super::*;

    #[tokio::test]
    async fn test_exactly_one_output_per_invocation() {
        for failures in 0..=5u64 {
            let harness = Harness::failing_first(failures, 4);
            let message = order("m", json!({"orderId": failures}));

            let decision = harness
                .processor
                .process(&message, &CancellationToken::new())
                .await
                .unwrap();

            let sink_writes = harness.stored().await.len();
            let dead_letters = harness.errors.len().await;
            assert_eq!(sink_writes + dead_letters, 1, "failures={failures}");
            assert_eq!(decision.dead_lettered(), failures >= 4, "failures={failures}");
            assert_eq!(
                decision.attempts() as u64,
                (failures + 1).min(4),
                "failures={failures}"
            );
        }
    }

    #[tokio::test]
    async fn test_single_attempt_budget_routes_after_one_failure() {
        let harness = Harness::always_failing(1);

        let decision = harness
            .processor
            .process(&order("x", json!({"orderId": 10})), &CancellationToken::new())
            .await
            .unwrap();

        assert!(decision.dead_lettered());
        assert_eq!(decision.attempts(), 1);
        assert_eq!(harness.sink.calls(), 1);
    }

    #[tokio::test]
    async fn test_single_attempt_budget_success() {
        let harness = Harness::failing_first(0, 1);

        let decision = harness
            .processor
            .process(&order("y", json!({"orderId": 11})), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!decision.dead_lettered());
        assert!(harness.errors.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_body_is_written() {
        let harness = Harness::failing_first(1, 4);
        let message = OrderMessage::from_optional_body("empty", None);

        let decision = harness
            .processor
            .process(&message, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(decision.attempts(), 2);
        let stored = harness.stored().await;
        assert_eq!(stored.len(), 1);
        assert!(stored[0].1.is_empty());
    }

    #[tokio::test]
    async fn test_empty_body_is_dead_lettered_unchanged() {
        let harness = Harness::always_failing(2);
        let message = OrderMessage::new("empty", Bytes::new());

        harness
            .processor
            .process(&message, &CancellationToken::new())
            .await
            .unwrap();

        let parked = harness.errors.messages().await;
        assert_eq!(parked.len(), 1);
        assert!(parked[0].body().is_empty());
    }

    #[tokio::test]
    async fn test_dead_letter_is_byte_identical() {
        let harness = Harness::always_failing(3);
        // Non-UTF-8 bytes and odd whitespace must survive untouched.
        let raw: &'static [u8] = b"{ \"orderId\" : 4 ,\n \"note\": \"\xff\xfe\" }";
        let message = OrderMessage::new("raw", raw);

        let decision = harness
            .processor
            .process(&message, &CancellationToken::new())
            .await
            .unwrap();

        let RoutingDecision::RoutedToErrorChannel { message: routed, .. } = decision else {
            panic!("expected dead letter");
        };
        assert_eq!(routed.body().as_ref(), raw);
        assert_eq!(harness.errors.messages().await[0].body().as_ref(), raw);
    }

    #[tokio::test]
    async fn test_budget_is_per_invocation() {
        // Sequential invocations on one processor each get a full budget.
        let harness = Harness::failing_first(3, 4);

        let first = harness
            .processor
            .process(&order("p1", json!({"orderId": 1})), &CancellationToken::new())
            .await
            .unwrap();
        let second = harness
            .processor
            .process(&order("p2", json!({"orderId": 2})), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(first.attempts(), 4);
        assert_eq!(second.attempts(), 1);
        assert!(harness.errors.is_empty().await);
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_invocations_are_independent() {
        const N: u64 = 40;
        let sink = Arc::new(ScriptedSink::default());
        let errors = Arc::new(MemoryQueue::new());
        let processor = OrderProcessor::new(sink.clone(), errors.clone(), RetryPolicy::immediate(4))
            .with_key_strategy(KeyStrategy::MessageId);

        let messages: Vec<OrderMessage> = (0..N)
            .map(|i| order(&format!("order-{i}"), json!({"orderId": i, "failFirst": i % 6})))
            .collect();

        let handles: Vec<_> = messages
            .iter()
            .cloned()
            .map(|message| {
                let processor = processor.clone();
                tokio::spawn(async move {
                    processor
                        .process(&message, &CancellationToken::new())
                        .await
                        .map(|decision| (message, decision))
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;

        let mut dead_lettered = Vec::new();
        for result in results {
            let (message, decision) = result.unwrap().unwrap();
            let i: u64 = message.id().trim_start_matches("order-").parse().unwrap();
            let fail_first = (i % 6) as u32;

            if fail_first >= 4 {
                assert!(decision.dead_lettered(), "{}", message.id());
                assert_eq!(decision.attempts(), 4);
                assert_eq!(sink.attempts_for(message.id()).await, 4);
                dead_lettered.push(message.id().to_string());
            } else {
                assert_eq!(decision.attempts(), fail_first + 1, "{}", message.id());
                assert_eq!(
                    sink.stored(message.id()).await.as_ref(),
                    Some(message.body())
                );
            }
        }

        let mut parked: Vec<String> = errors
            .messages()
            .await
            .iter()
            .map(|m| m.id().to_string())
            .collect();
        parked.sort();
        dead_lettered.sort();
        assert_eq!(parked, dead_lettered);
        assert_eq!(sink.stored_count().await + parked.len(), N as usize);
    }
}
