use std::io;
use std::time::Duration;

use rdkafka::error::KafkaError;
use tokio::sync::oneshot;

use checkpoint_consumer::client::{CheckpointClient, ClientError};
use checkpoint_consumer::consumer::{CheckpointConsumer, LoopState};
use checkpoint_consumer::error_sink::drain_errors;
use checkpoint_consumer::message::{ConsumedMessage, PartitionKey};
use checkpoint_consumer::shutdown::{ShutdownCoordinator, ShutdownOutcome, ShutdownRequest};
use checkpoint_consumer::test_utils::{CloseBehaviour, MockClient};

const PROCESSING_DELAY: Duration = Duration::from_millis(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

fn message(topic: &str, partition: i32, offset: i64) -> ConsumedMessage {
    ConsumedMessage::new(topic, partition, offset, format!("event {offset}").as_bytes())
}

fn interrupt() -> (
    oneshot::Sender<()>,
    impl std::future::Future<Output = io::Result<ShutdownRequest>>,
) {
    let (tx, rx) = oneshot::channel::<()>();
    let signal = async move {
        rx.await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(ShutdownRequest)
    };
    (tx, signal)
}

#[tokio::test(start_paused = true)]
async fn interrupt_mid_stream_closes_once_and_drains() {
    let (client, streams) = MockClient::new(4);
    let mut messages = streams.messages;

    let (interrupt_tx, signal) = interrupt();
    let coordinator = ShutdownCoordinator::new(client.clone(), CLOSE_TIMEOUT);
    let coordinator = tokio::spawn(coordinator.run(signal));
    let error_sink = tokio::spawn(drain_errors(streams.errors));

    let producer = {
        let client = client.clone();
        let mut interrupt_tx = Some(interrupt_tx);
        tokio::spawn(async move {
            let mut delivered: u64 = 0;
            for offset in 0.. {
                if !client.deliver(message("events", 0, offset)).await {
                    break;
                }
                delivered += 1;
                if offset == 9 {
                    if let Some(tx) = interrupt_tx.take() {
                        tx.send(()).unwrap();
                    }
                }
            }
            delivered
        })
    };

    let mut consumer = CheckpointConsumer::new(client.clone(), PROCESSING_DELAY);
    let summary = consumer.run(&mut messages).await;
    let delivered = producer.await.unwrap();

    assert_eq!(coordinator.await.unwrap(), ShutdownOutcome::Closed);
    assert_eq!(client.close_calls(), 1);
    assert_eq!(consumer.state(), LoopState::Stopped);

    // Everything that made it into the stream was processed and committed
    assert!(delivered >= 10);
    assert_eq!(summary.event_count, delivered);
    assert_eq!(client.commits().len() as u64, delivered);

    let key = PartitionKey::new("events", 0);
    assert_eq!(summary.ledger.get(&key), Some(&(delivered as i64 - 1)));

    client.finalize(&summary.ledger).unwrap();
    assert_eq!(client.finalized(), Some(summary.ledger));
    assert_eq!(error_sink.await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn gaps_are_reported_without_stopping_consumption() {
    let (client, streams) = MockClient::new(16);
    let mut messages = streams.messages;

    for (partition, offset) in [(0, 5), (0, 6), (1, 40), (0, 8), (1, 41), (0, 9)] {
        assert!(client.deliver(message("events", partition, offset)).await);
    }
    client.finish();

    let mut consumer = CheckpointConsumer::new(client.clone(), PROCESSING_DELAY);
    let summary = consumer.run(&mut messages).await;

    assert_eq!(summary.event_count, 6);
    assert_eq!(summary.ledger.get(&PartitionKey::new("events", 0)), Some(&9));
    assert_eq!(summary.ledger.get(&PartitionKey::new("events", 1)), Some(&41));

    let committed: Vec<i64> = client
        .commits()
        .into_iter()
        .map(|(_, offset)| offset)
        .collect();
    assert_eq!(committed, vec![5, 6, 40, 8, 41, 9]);
}

#[tokio::test(start_paused = true)]
async fn commit_failures_surface_on_the_error_stream() {
    let (client, streams) = MockClient::new(16);
    let mut messages = streams.messages;
    let error_sink = tokio::spawn(drain_errors(streams.errors));

    client.fail_commits(true);
    for offset in 0..3 {
        client.deliver(message("events", 0, offset)).await;
    }
    let finisher = {
        let client = client.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            client.finish();
        }
    };

    let mut consumer = CheckpointConsumer::new(client.clone(), PROCESSING_DELAY);
    let (summary, ()) = futures::join!(consumer.run(&mut messages), finisher);

    assert_eq!(summary.event_count, 3);
    assert!(client.commits().is_empty());

    // The final commit fails too, but is returned rather than reported
    assert!(matches!(
        client.finalize(&summary.ledger),
        Err(ClientError::FinalCommit { .. })
    ));
    assert_eq!(error_sink.await.unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn commit_failures_while_draining_reach_the_error_sink() {
    let (client, streams) = MockClient::new(8);
    let mut messages = streams.messages;
    let error_sink = tokio::spawn(drain_errors(streams.errors));

    client.fail_commits(true);
    for offset in 0..5 {
        assert!(client.deliver(message("events", 0, offset)).await);
    }

    let (interrupt_tx, signal) = interrupt();
    let coordinator = ShutdownCoordinator::new(client.clone(), CLOSE_TIMEOUT);
    interrupt_tx.send(()).unwrap();
    assert_eq!(coordinator.run(signal).await, ShutdownOutcome::Closed);

    // Closed before the loop ever ran: all five are drained from the buffer
    assert!(!client.deliver(message("events", 0, 5)).await);
    let mut consumer = CheckpointConsumer::new(client.clone(), PROCESSING_DELAY);
    let summary = consumer.run(&mut messages).await;

    assert_eq!(summary.event_count, 5);
    assert_eq!(consumer.state(), LoopState::Stopped);
    assert!(client.finalize(&summary.ledger).is_err());
    assert_eq!(error_sink.await.unwrap(), summary.event_count);
}

#[tokio::test(start_paused = true)]
async fn error_flood_does_not_delay_messages() {
    let (client, streams) = MockClient::new(16);
    let mut messages = streams.messages;

    // Nobody is draining errors yet; message delivery must not care
    for _ in 0..10_000 {
        assert!(client.report_error(ClientError::Kafka(KafkaError::Canceled)));
    }
    for offset in 0..5 {
        assert!(client.deliver(message("events", 0, offset)).await);
    }

    let error_sink = tokio::spawn(drain_errors(streams.errors));
    let finisher = {
        let client = client.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            client.finish();
        }
    };

    let mut consumer = CheckpointConsumer::new(client.clone(), PROCESSING_DELAY);
    let (summary, ()) = futures::join!(consumer.run(&mut messages), finisher);

    assert_eq!(summary.event_count, 5);
    client.finalize(&summary.ledger).unwrap();
    assert_eq!(error_sink.await.unwrap(), 10_000);
}

#[tokio::test(start_paused = true)]
async fn client_closing_on_its_own_stops_the_loop() {
    let (client, streams) = MockClient::new(4);
    let mut messages = streams.messages;

    let (_interrupt_tx, signal) = interrupt();
    let coordinator = ShutdownCoordinator::new(client.clone(), CLOSE_TIMEOUT);
    let coordinator = tokio::spawn(coordinator.run(signal));

    client.deliver(message("events", 2, 100)).await;
    client.finish();

    let mut consumer = CheckpointConsumer::new(client.clone(), PROCESSING_DELAY);
    let summary = consumer.run(&mut messages).await;

    assert_eq!(summary.event_count, 1);
    assert_eq!(consumer.state(), LoopState::Stopped);
    // No interrupt arrived, so no close was requested
    assert_eq!(client.close_calls(), 0);
    coordinator.abort();
}

#[tokio::test(start_paused = true)]
async fn failed_close_still_ends_when_the_client_stops() {
    let (client, streams) = MockClient::with_close_behaviour(4, CloseBehaviour::Fail);
    let mut messages = streams.messages;

    let (interrupt_tx, signal) = interrupt();
    let coordinator = ShutdownCoordinator::new(client.clone(), CLOSE_TIMEOUT);
    let coordinator = tokio::spawn(coordinator.run(signal));

    client.deliver(message("events", 0, 1)).await;
    interrupt_tx.send(()).unwrap();
    assert_eq!(coordinator.await.unwrap(), ShutdownOutcome::CloseFailed);

    // The client winds down independently of the failed close request
    client.deliver(message("events", 0, 2)).await;
    client.finish();

    let mut consumer = CheckpointConsumer::new(client.clone(), PROCESSING_DELAY);
    let summary = consumer.run(&mut messages).await;

    assert_eq!(summary.event_count, 2);
    assert_eq!(client.close_calls(), 1);
}
