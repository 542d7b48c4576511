//! Integration tests for the record-replay cycle

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::StubTransport;
use rewind::config::{Config, Mode};
use rewind::transport::for_mode;
use rewind::{
    derive_key, DirectoryStorage, KeyPolicy, RecorderTransport, ReplayTransport, RequestRecord,
    ResponseRecord, RewindError, Storage, Transport,
};

fn open(temp_dir: &TempDir) -> Arc<DirectoryStorage> {
    Arc::new(DirectoryStorage::open(temp_dir.path()).unwrap())
}

#[tokio::test]
async fn test_record_then_replay_hello() {
    let temp_dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let request = RequestRecord::new("GET", "http://example.com");

    // Phase 1: record
    let network = Arc::new(StubTransport::fixed(200, "hello"));
    let recorder = RecorderTransport::new(network.clone(), open(&temp_dir));
    let recorded = recorder.round_trip(request.clone(), &cancel).await.unwrap();
    assert_eq!(recorded.status, 200);
    assert_eq!(recorded.body, "hello");
    assert_eq!(network.calls(), 1);

    // Phase 2: replay with a fresh storage handle and no network at all
    let replay_network = Arc::new(StubTransport::fixed(500, "network must not be used"));
    let config = Config::new(Mode::Replay, temp_dir.path());
    let replay = for_mode(&config, replay_network.clone()).unwrap();

    let response = replay.round_trip(request, &cancel).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "hello");
    assert_eq!(replay_network.calls(), 0);
}

#[tokio::test]
async fn test_replay_missing_recording() {
    let temp_dir = TempDir::new().unwrap();
    let network = Arc::new(StubTransport::fixed(200, "unused"));
    let replay = for_mode(&Config::new(Mode::Replay, temp_dir.path()), network.clone()).unwrap();

    let err = replay
        .round_trip(
            RequestRecord::new("GET", "http://example.com/x"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RewindError::NoRecordingFound { .. }));
    assert!(err.to_string().contains("http://example.com/x"));
    assert_eq!(network.calls(), 0);
}

#[tokio::test]
async fn test_roundtrip_is_byte_identical() {
    let temp_dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let binary: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let cases = vec![
        (
            RequestRecord::new("GET", "http://example.com/empty"),
            ResponseRecord::new(204, Bytes::new()),
        ),
        (
            RequestRecord::new("PUT", "http://example.com/blob?v=2")
                .header("Content-Type", "application/octet-stream")
                .body(binary.clone()),
            ResponseRecord::new(200, binary.clone()).header("ETag", "\"abc\""),
        ),
        (
            RequestRecord::new("POST", "http://example.com/login").body("user=a&pass=b"),
            ResponseRecord::new(302, "")
                .header("Set-Cookie", "session=1; HttpOnly")
                .header("Set-Cookie", "theme=dark")
                .header("Location", "/home"),
        ),
    ];

    for (request, response) in cases {
        let canned = response.clone();
        let network = Arc::new(StubTransport::with(move |_, _| canned.clone()));
        let recorder = RecorderTransport::new(network, open(&temp_dir));
        recorder.round_trip(request.clone(), &cancel).await.unwrap();

        let replay = ReplayTransport::new(open(&temp_dir));
        let replayed = replay.round_trip(request, &cancel).await.unwrap();

        assert_eq!(replayed.status, response.status);
        assert_eq!(replayed.headers, response.headers);
        assert_eq!(replayed.body, response.body);
    }
}

#[tokio::test]
async fn test_rerecord_overwrites() {
    let temp_dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let request = RequestRecord::new("GET", "http://example.com/counter");

    let network = Arc::new(StubTransport::with(|_, call| {
        ResponseRecord::new(200, format!("response {call}"))
    }));
    let recorder = RecorderTransport::new(network, open(&temp_dir));
    recorder.round_trip(request.clone(), &cancel).await.unwrap();
    recorder.round_trip(request.clone(), &cancel).await.unwrap();

    let storage = open(&temp_dir);
    assert_eq!(storage.keys().await.unwrap().len(), 1);

    let replay = ReplayTransport::new(storage);
    let response = replay.round_trip(request, &cancel).await.unwrap();
    assert_eq!(response.body, "response 1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_recordings() {
    const N: usize = 32;

    let temp_dir = TempDir::new().unwrap();
    let network = Arc::new(StubTransport::with(|request, _| {
        ResponseRecord::new(200, format!("body for {}", request.url))
    }));
    let recorder = Arc::new(RecorderTransport::new(network, open(&temp_dir)));

    let mut handles = Vec::new();
    for i in 0..N {
        let recorder = Arc::clone(&recorder);
        handles.push(tokio::spawn(async move {
            let request = RequestRecord::new("GET", format!("http://example.com/item/{i}"));
            recorder
                .round_trip(request, &CancellationToken::new())
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(recorder.stats().recorded, N);

    let replay = ReplayTransport::new(open(&temp_dir));
    for i in 0..N {
        let url = format!("http://example.com/item/{i}");
        let response = replay
            .round_trip(RequestRecord::new("GET", url.clone()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.body, format!("body for {url}"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_to_same_key() {
    let temp_dir = TempDir::new().unwrap();
    let storage = open(&temp_dir);
    let request = RequestRecord::new("GET", "http://example.com/hot");
    let key = derive_key(&request, &KeyPolicy::default());

    let mut handles = Vec::new();
    for i in 0..16 {
        let storage = Arc::clone(&storage);
        let key = key.clone();
        let request = request.clone();
        handles.push(tokio::spawn(async move {
            let body = vec![i as u8; 64 * 1024];
            let exchange = rewind::Exchange::new(request, ResponseRecord::new(200, body));
            storage
                .put(&key, &exchange, &CancellationToken::new())
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stored = storage
        .get(&key, &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    let first = stored.response.body[0];
    assert!(stored.response.body.iter().all(|b| *b == first));

    let leftovers = std::fs::read_dir(temp_dir.path()).unwrap().count();
    assert_eq!(leftovers, 1, "temporary files must not be left behind");
}

#[tokio::test]
async fn test_cancel_mid_flight_stores_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let storage = open(&temp_dir);
    let network = Arc::new(StubTransport::fixed(200, "late").delayed(Duration::from_secs(30)));
    let recorder = RecorderTransport::new(network.clone(), storage.clone());

    let request = RequestRecord::new("GET", "http://example.com/slow");
    let key = derive_key(&request, &KeyPolicy::default());
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), recorder.round_trip(request, &cancel))
        .await
        .expect("cancellation must be prompt");

    assert!(matches!(result, Err(RewindError::Cancelled)));
    assert_eq!(network.calls(), 1);
    assert!(storage
        .get(&key, &CancellationToken::new())
        .await
        .unwrap()
        .is_none());
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_header_policy_must_match() {
    let temp_dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let policy = KeyPolicy::with_headers(["accept"]);

    let network = Arc::new(StubTransport::with(|request, _| {
        ResponseRecord::new(200, request.headers.get("accept").unwrap_or("none").to_string())
    }));
    let recorder = RecorderTransport::new(network, open(&temp_dir)).with_policy(policy.clone());

    let json = RequestRecord::new("GET", "http://example.com/doc").header("Accept", "application/json");
    let xml = RequestRecord::new("GET", "http://example.com/doc").header("Accept", "application/xml");
    recorder.round_trip(json.clone(), &cancel).await.unwrap();
    recorder.round_trip(xml.clone(), &cancel).await.unwrap();

    let replay = ReplayTransport::new(open(&temp_dir)).with_policy(policy);
    assert_eq!(
        replay.round_trip(json, &cancel).await.unwrap().body,
        "application/json"
    );
    assert_eq!(
        replay.round_trip(xml, &cancel).await.unwrap().body,
        "application/xml"
    );

    // Volatile headers do not matter under the default policy
    let default_replay = ReplayTransport::new(open(&temp_dir));
    let result = default_replay
        .round_trip(
            RequestRecord::new("GET", "http://example.com/doc").header("Date", "today"),
            &cancel,
        )
        .await;
    assert!(matches!(result, Err(RewindError::NoRecordingFound { .. })));
}

#[tokio::test]
async fn test_scoped_recordings() {
    let temp_dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let root = DirectoryStorage::open(temp_dir.path()).unwrap();
    let request = RequestRecord::new("GET", "http://example.com/me");

    for (scope, body) in [("alice", "alice"), ("bob", "bob")] {
        let network = Arc::new(StubTransport::fixed(200, body));
        let storage = Arc::new(root.scoped(scope).unwrap());
        RecorderTransport::new(network, storage)
            .round_trip(request.clone(), &cancel)
            .await
            .unwrap();
    }

    let alice = ReplayTransport::new(Arc::new(root.scoped("alice").unwrap()));
    let bob = ReplayTransport::new(Arc::new(root.scoped("bob").unwrap()));

    assert_eq!(alice.round_trip(request.clone(), &cancel).await.unwrap().body, "alice");
    assert_eq!(bob.round_trip(request, &cancel).await.unwrap().body, "bob");
}
