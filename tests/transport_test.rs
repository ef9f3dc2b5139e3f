//! Address routing and the in-memory transport contract.

use laneq::model::{Bucket, Category, Phase};
use laneq::transport::memory::InMemoryTransport;
use laneq::transport::{Address, AddressPattern, Labels, Transport};
use rstest::rstest;
use serde_json::json;
use std::time::Duration;

fn addr(s: &str) -> Address {
    s.parse().unwrap()
}

#[test]
fn address_renders_and_parses() {
    let a = Address::new(Category::Etl, Phase::Extract, Bucket::High);
    assert_eq!(a.to_string(), "tasks.etl.extract.high");
    assert_eq!(a.queue_name(), "tasks_etl_extract_high");
    assert_eq!(addr("tasks.etl.extract.high"), a);
}

#[rstest]
#[case("etl.extract.high")]
#[case("tasks.etl.extract")]
#[case("tasks.etl.extract.urgent")]
#[case("jobs.etl.extract.high")]
#[case("tasks.nightly.extract.high")]
fn malformed_addresses_are_rejected(#[case] raw: &str) {
    assert!(raw.parse::<Address>().is_err());
}

#[test]
fn lanes_are_in_poll_order() {
    let lanes = Address::lanes(Category::Report, Phase::Render);
    let buckets: Vec<Bucket> = lanes.iter().map(|a| a.bucket).collect();
    assert_eq!(buckets, vec![Bucket::High, Bucket::Normal, Bucket::Low]);
    assert!(lanes.iter().all(|a| a.category == Category::Report));
}

#[rstest]
#[case("tasks.*.*.high", "tasks.etl.extract.high", true)]
#[case("tasks.*.*.high", "tasks.etl.extract.low", false)]
#[case("tasks.etl.>", "tasks.etl.load.normal", true)]
#[case("tasks.etl.>", "tasks.webapp.default.normal", false)]
#[case("tasks.>", "tasks.alert.deliver.low", true)]
#[case("tasks.etl.*", "tasks.etl.load.normal", false)]
#[case("tasks.etl.load.normal", "tasks.etl.load.normal", true)]
fn pattern_matching(#[case] pattern: &str, #[case] address: &str, #[case] expected: bool) {
    let pattern: AddressPattern = pattern.parse().unwrap();
    assert_eq!(pattern.matches(&addr(address)), expected);
}

#[rstest]
#[case("")]
#[case("tasks..high")]
#[case("tasks.>.high")]
fn invalid_patterns_are_rejected(#[case] raw: &str) {
    assert!(raw.parse::<AddressPattern>().is_err());
}

#[tokio::test]
async fn publish_then_fetch_is_fifo_per_address() {
    let transport = InMemoryTransport::default();
    let high = addr("tasks.etl.extract.high");
    let labels = Labels::new();

    let first = transport.publish(&high, &json!({"n": 1}), &labels).await.unwrap();
    let second = transport.publish(&high, &json!({"n": 2}), &labels).await.unwrap();
    assert!(second > first);

    let m1 = transport.fetch_one(&high, Duration::ZERO).await.unwrap().unwrap();
    let m2 = transport.fetch_one(&high, Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(m1.payload, json!({"n": 1}));
    assert_eq!(m2.payload, json!({"n": 2}));
    assert_eq!(m1.read_count, 1);
    assert!(transport.fetch_one(&high, Duration::ZERO).await.unwrap().is_none());
}

#[tokio::test]
async fn addresses_are_isolated() {
    let transport = InMemoryTransport::default();
    let high = addr("tasks.etl.extract.high");
    let low = addr("tasks.etl.extract.low");

    transport.publish(&low, &json!({}), &Labels::new()).await.unwrap();
    assert!(transport.fetch_one(&high, Duration::ZERO).await.unwrap().is_none());
    assert_eq!(transport.depth(&low), 1);
    assert_eq!(transport.depth(&high), 0);
}

#[tokio::test]
async fn labels_travel_with_the_message() {
    let transport = InMemoryTransport::default();
    let a = addr("tasks.alert.default.high");
    let labels = Labels::from([("priority".to_string(), "9".to_string())]);

    transport.publish(&a, &json!({}), &labels).await.unwrap();
    let msg = transport.fetch_one(&a, Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(msg.labels.get("priority").map(String::as_str), Some("9"));
    assert_eq!(msg.address, a);
}

#[tokio::test]
async fn unacked_message_reappears_after_visibility_timeout() {
    let transport = InMemoryTransport::new(Duration::from_millis(20));
    let a = addr("tasks.etl.load.normal");
    transport.publish(&a, &json!({}), &Labels::new()).await.unwrap();

    let msg = transport.fetch_one(&a, Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(transport.in_flight(), 1);
    assert!(transport.fetch_one(&a, Duration::ZERO).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(40)).await;
    let again = transport.fetch_one(&a, Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(again.id, msg.id);
    assert_eq!(again.read_count, 2);
}

#[tokio::test]
async fn acked_message_is_gone() {
    let transport = InMemoryTransport::new(Duration::from_millis(20));
    let a = addr("tasks.etl.load.normal");
    transport.publish(&a, &json!({}), &Labels::new()).await.unwrap();

    let msg = transport.fetch_one(&a, Duration::ZERO).await.unwrap().unwrap();
    transport.ack(&msg).await.unwrap();
    assert_eq!(transport.in_flight(), 0);

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(transport.fetch_one(&a, Duration::ZERO).await.unwrap().is_none());
}

#[tokio::test]
async fn fetch_waits_for_a_publish() {
    let transport = InMemoryTransport::default();
    let a = addr("tasks.webapp.default.normal");

    let publisher = transport.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher
            .publish(&a, &json!({"late": true}), &Labels::new())
            .await
            .unwrap();
    });

    let msg = transport
        .fetch_one(&a, Duration::from_secs(2))
        .await
        .unwrap()
        .expect("message published during the wait");
    assert_eq!(msg.payload, json!({"late": true}));
}

#[tokio::test]
async fn depth_matching_counts_across_addresses() {
    let transport = InMemoryTransport::default();
    for raw in [
        "tasks.etl.extract.high",
        "tasks.etl.load.high",
        "tasks.webapp.default.high",
        "tasks.etl.extract.low",
    ] {
        transport
            .publish(&addr(raw), &json!({}), &Labels::new())
            .await
            .unwrap();
    }

    let all_high: AddressPattern = "tasks.*.*.high".parse().unwrap();
    let all_etl: AddressPattern = "tasks.etl.>".parse().unwrap();
    assert_eq!(transport.depth_matching(&all_high), 3);
    assert_eq!(transport.depth_matching(&all_etl), 3);
}
