// Event hub semantics: per-subscriber ordering, drop-on-full delivery,
// and unsubscribe closing the channel.

use std::time::Duration;

use chrono::Utc;

use scribed::server::Hub;
use scribed::session::EventBroadcaster;
use scribed::storage::SummaryStatus;
use scribed::transcript::Segment;

fn segment(text: &str) -> Segment {
    Segment {
        speaker: 2,
        text: text.to_string(),
        start_time: 0.5,
        end_time: 1.1,
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn subscriber_receives_serialized_events_in_order() {
    let hub = Hub::new();
    let mut sub = hub.subscribe();

    hub.session_started("abc");
    hub.live_transcript(&segment("test line"));
    hub.session_ended("abc", Duration::from_secs(30));
    hub.summary_ready("abc", "done", SummaryStatus::Completed, "default");

    let mut types = Vec::new();
    for _ in 0..4 {
        let payload = sub.receiver.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["version"], 1);
        assert!(value["timestamp"].is_string());
        types.push(value["type"].as_str().unwrap().to_string());
    }
    assert_eq!(
        types,
        vec![
            "session_started",
            "live_transcript",
            "session_ended",
            "summary_ready"
        ]
    );

    hub.unsubscribe(sub.id);
}

#[tokio::test]
async fn live_transcript_carries_segment_fields() {
    let hub = Hub::new();
    let mut sub = hub.subscribe();

    hub.live_transcript(&segment("hello there"));

    let payload = sub.receiver.recv().await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(value["speaker"], 2);
    assert_eq!(value["text"], "hello there");
    assert_eq!(value["start_time"], 0.5);
    assert_eq!(value["end_time"], 1.1);

    hub.unsubscribe(sub.id);
}

#[tokio::test]
async fn interim_event_has_reduced_shape() {
    let hub = Hub::new();
    let mut sub = hub.subscribe();

    hub.live_transcript_interim(0, "hel", 0.0);

    let payload = sub.receiver.recv().await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(value["type"], "live_transcript_interim");
    assert_eq!(value["speaker"], 0);
    assert_eq!(value["text"], "hel");
    assert!(value.get("end_time").is_none());

    hub.unsubscribe(sub.id);
}

#[tokio::test]
async fn slow_subscriber_drops_excess_events_without_blocking() {
    let hub = Hub::new();
    let mut sub = hub.subscribe();

    // Channel capacity is 64; everything beyond drops silently.
    for i in 0..200 {
        hub.session_started(&format!("s{i}"));
    }

    let mut received = 0;
    while let Ok(payload) = sub.receiver.try_recv() {
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        // Delivered prefix stays in broadcast order.
        assert_eq!(value["session_id"], format!("s{received}"));
        received += 1;
    }
    assert_eq!(received, 64);

    hub.unsubscribe(sub.id);
}

#[tokio::test]
async fn unsubscribe_closes_the_channel() {
    let hub = Hub::new();
    let mut sub = hub.subscribe();
    assert_eq!(hub.subscriber_count(), 1);

    hub.unsubscribe(sub.id);
    assert_eq!(hub.subscriber_count(), 0);
    assert!(sub.receiver.recv().await.is_none());

    // Broadcasting to nobody is fine.
    hub.session_started("later");
}

#[tokio::test]
async fn each_subscriber_gets_every_event() {
    let hub = Hub::new();
    let mut first = hub.subscribe();
    let mut second = hub.subscribe();

    hub.broadcast_status_changed(true);

    for sub in [&mut first, &mut second] {
        let payload = sub.receiver.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["type"], "status_changed");
        assert_eq!(value["paused"], true);
    }

    hub.unsubscribe(first.id);
    hub.unsubscribe(second.id);
}
