use std::time::Duration;

use chrono::{TimeZone, Utc};
use logship_core::{DestinationKey, Error, Record, SequenceTokenStore, Shipper, ShipperConfig};
use logship_testing::simplelogservice::{LogRequest, SimpleLogService};
use serde_json::{Value, json};
use test_log::test;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn record_at(millis: i64, value: Value) -> Record {
    let Value::Object(attributes) = value else {
        panic!("test records are objects");
    };
    Record::new(Utc.timestamp_millis_opt(millis).unwrap(), attributes)
}

fn config(stream_template: &str) -> ShipperConfig {
    let mut config = ShipperConfig::new("app", stream_template);
    config.message_template = Some("%{msg}".to_string());
    config.delivery.min_interval = Duration::from_millis(200);
    config.delivery.retry.initial_interval = Duration::from_millis(100);
    config.delivery.retry.jitter = 0.0;
    config
}

fn new_shipper(config: &ShipperConfig, service: &SimpleLogService) -> Shipper<SimpleLogService> {
    Shipper::new(config, service.clone(), SequenceTokenStore::new()).unwrap()
}

fn messages(service: &SimpleLogService, stream: &str) -> Vec<String> {
    service
        .events("app", stream)
        .into_iter()
        .map(|event| event.message)
        .collect()
}

#[test(tokio::test(start_paused = true))]
async fn two_hosts_land_in_two_streams() {
    let service = SimpleLogService::new();
    let shipper = new_shipper(&config("host-%{host}"), &service);

    let report = shipper
        .ship(
            vec![
                record_at(1, json!({"host": "a", "msg": "from a"})),
                record_at(2, json!({"host": "b", "msg": "from b"})),
            ],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.batches, 2);
    assert_eq!(messages(&service, "host-a"), vec!["from a"]);
    assert_eq!(messages(&service, "host-b"), vec!["from b"]);
    assert_eq!(shipper.tokens().len(), 2);
}

#[test(tokio::test(start_paused = true))]
async fn large_events_are_split_and_chained() {
    let service = SimpleLogService::new();
    service.create_stream_now("app", "s");
    let mut config = config("s");
    config.batch.max_size_bytes = 1_000_000;
    config.batch.per_event_overhead_bytes = 26;
    let shipper = new_shipper(&config, &service);

    let body = "x".repeat(300_000);
    let records = (0..5)
        .map(|i| record_at(i, json!({ "msg": format!("{i}{body}") })))
        .collect();
    let report = shipper
        .ship(records, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.batches, 2);
    assert_eq!(report.delivered_events, 5);
    let puts: Vec<_> = service
        .journal()
        .into_iter()
        .filter_map(|request| match request {
            LogRequest::Put { events, .. } => Some(events),
            _ => None,
        })
        .collect();
    assert_eq!(puts, vec![3, 2]);

    let tokens = service.put_tokens("app", "s");
    assert_eq!(tokens.first(), Some(&None));
    assert!(tokens.get(1).is_some_and(Option::is_some));

    let firsts: Vec<_> = messages(&service, "s")
        .iter()
        .map(|message| message.chars().next().unwrap())
        .collect();
    assert_eq!(firsts, vec!['0', '1', '2', '3', '4']);
}

#[test(tokio::test(start_paused = true))]
async fn tokens_chain_across_bulks() {
    let service = SimpleLogService::new();
    let shipper = new_shipper(&config("s"), &service);
    let cancel = CancellationToken::new();

    shipper
        .ship(vec![record_at(1, json!({"msg": "one"}))], &cancel)
        .await
        .unwrap();
    let token1 = shipper.tokens().get(&DestinationKey::new("app", "s"));
    assert!(token1.is_some());

    shipper
        .ship(vec![record_at(2, json!({"msg": "two"}))], &cancel)
        .await
        .unwrap();

    // not found, created, then chained
    assert_eq!(service.put_tokens("app", "s"), vec![None, None, token1]);
    assert_eq!(messages(&service, "s"), vec!["one", "two"]);
}

#[test(tokio::test(start_paused = true))]
async fn stale_token_is_replaced_from_the_rejection() {
    let service = SimpleLogService::new();
    service.create_stream_now("app", "s");
    service.set_stream_token("app", "s", "t7");
    let tokens = SequenceTokenStore::new();
    tokens.put(&DestinationKey::new("app", "s"), "t3");
    let shipper = Shipper::new(&config("s"), service.clone(), tokens).unwrap();

    let report = shipper
        .ship(vec![record_at(1, json!({"msg": "one"}))], &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(
        service.put_tokens("app", "s"),
        vec![Some("t3".to_string()), Some("t7".to_string())]
    );
    assert!(
        !service
            .journal()
            .iter()
            .any(|request| matches!(request, LogRequest::DescribeLogStreams { .. }))
    );
}

#[test(tokio::test(start_paused = true))]
async fn throttled_puts_are_paced() {
    let service = SimpleLogService::new();
    service.create_stream_now("app", "s");
    service.error_injector().throttle_puts(3);
    let config = config("s");
    let shipper = new_shipper(&config, &service);

    let start = Instant::now();
    let report = shipper
        .ship(vec![record_at(1, json!({"msg": "one"}))], &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(service.put_count(), 4);
    assert!(start.elapsed() >= config.delivery.min_interval * 3);
}

#[test(tokio::test(start_paused = true))]
async fn shippers_can_share_a_token_store() {
    let service = SimpleLogService::new();
    let tokens = SequenceTokenStore::new();
    let first = Shipper::new(&config("s"), service.clone(), tokens.clone()).unwrap();
    let second = Shipper::new(&config("s"), service.clone(), tokens.clone()).unwrap();
    let cancel = CancellationToken::new();

    first
        .ship(vec![record_at(1, json!({"msg": "one"}))], &cancel)
        .await
        .unwrap();
    second
        .ship(vec![record_at(2, json!({"msg": "two"}))], &cancel)
        .await
        .unwrap();

    // the second shipper never sees a stale token
    assert_eq!(service.put_count(), 3);
    assert_eq!(
        tokens.get(&DestinationKey::new("app", "s")),
        service.stream_token("app", "s")
    );
}

#[test(tokio::test(start_paused = true))]
async fn persistent_throttling_is_reported_not_dropped() {
    let service = SimpleLogService::new();
    service.create_stream_now("app", "s");
    service.error_injector().throttle_puts(usize::MAX);
    let mut config = config("s");
    config.delivery.retry.max_attempts = 2;
    let shipper = new_shipper(&config, &service);

    let report = shipper
        .ship(
            vec![
                record_at(1, json!({"msg": "one"})),
                record_at(2, json!({"msg": "two"})),
            ],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.events, 2);
    assert!(matches!(failure.error, Error::RetriesExhausted { .. }));
    assert_eq!(service.put_count(), 3);
}
