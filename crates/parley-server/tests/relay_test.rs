//! End-to-end tests against a relay listening on a loopback port.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use parley_server::{Registry, Relay, RelayError, ServerConfig};
use parley_shared::{Envelope, EnvelopeCodec};
use parley_store::Database;

const TIMEOUT: Duration = Duration::from_secs(5);

struct TestRelay {
    addr: SocketAddr,
    registry: Registry,
    db_path: PathBuf,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<Database, RelayError>>,
    _dir: tempfile::TempDir,
}

impl TestRelay {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("relay.db");

        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            database_path: db_path.clone(),
            ..ServerConfig::default()
        };
        let database = Database::open_at(&db_path).unwrap();
        let relay = Relay::bind(config, database).await.unwrap();
        let addr = relay.local_addr().unwrap();
        let registry = relay.registry();

        let (stop, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(relay.run_until(async {
            let _ = stop_rx.await;
        }));

        Self {
            addr,
            registry,
            db_path,
            stop,
            task,
            _dir: dir,
        }
    }

    fn reader(&self) -> Database {
        open_reader(&self.db_path)
    }

    async fn shutdown(self) -> Database {
        self.stop.send(()).unwrap();
        tokio::time::timeout(TIMEOUT, self.task)
            .await
            .expect("relay did not stop")
            .unwrap()
            .unwrap()
    }
}

fn open_reader(path: &Path) -> Database {
    Database::open_at(path).unwrap()
}

struct TestClient {
    framed: Framed<TcpStream, EnvelopeCodec>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(stream, EnvelopeCodec::default()),
        }
    }

    async fn login(addr: SocketAddr, name: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client
            .send(Envelope::Login {
                username: name.into(),
            })
            .await;
        match client.recv().await {
            Envelope::LoginAck { .. } => client,
            other => panic!("expected login ack, got {other:?}"),
        }
    }

    async fn send(&mut self, envelope: Envelope) {
        self.framed.send(envelope).await.unwrap();
    }

    async fn send_text(&mut self, receiver: &str, text: &str) {
        self.send(Envelope::Send {
            receiver: receiver.into(),
            text: text.into(),
        })
        .await;
    }

    async fn recv(&mut self) -> Envelope {
        tokio::time::timeout(TIMEOUT, self.framed.next())
            .await
            .expect("timed out waiting for envelope")
            .expect("connection closed")
            .unwrap()
            .unwrap()
    }
}

#[tokio::test]
async fn alice_and_bob_exchange_a_message() {
    let relay = TestRelay::start().await;
    let mut alice = TestClient::login(relay.addr, "alice").await;
    let mut bob = TestClient::login(relay.addr, "bob").await;

    alice.send_text("bob", "hello").await;

    let to_bob = bob.recv().await;
    let to_alice = alice.recv().await;
    assert_eq!(to_bob, to_alice);

    let timestamp = match to_bob {
        Envelope::Deliver {
            sender,
            receiver,
            text,
            timestamp,
        } => {
            assert_eq!(sender, "alice");
            assert_eq!(receiver, "bob");
            assert_eq!(text, "hello");
            timestamp
        }
        other => panic!("expected deliver, got {other:?}"),
    };

    let records = relay.reader().conversation("alice", "bob", 10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].sender, "alice");
    assert_eq!(records[0].receiver, "bob");
    assert_eq!(records[0].text, "hello");
    assert_eq!(records[0].timestamp_string(), timestamp);

    drop(alice);
    drop(bob);
    relay.shutdown().await;
}

#[tokio::test]
async fn message_to_offline_user_is_only_persisted() {
    let relay = TestRelay::start().await;
    let mut alice = TestClient::login(relay.addr, "alice").await;

    alice.send_text("bob", "hi").await;

    // The echo proves the worker has handled the message.
    assert!(matches!(alice.recv().await, Envelope::Deliver { .. }));

    let reader = relay.reader();
    assert_eq!(reader.count_messages().unwrap(), 1);
    assert_eq!(reader.messages_for_receiver("bob", 10).unwrap()[0].text, "hi");

    drop(alice);
    relay.shutdown().await;
}

#[tokio::test]
async fn malformed_frame_is_isolated() {
    let relay = TestRelay::start().await;
    let mut alice = TestClient::login(relay.addr, "alice").await;

    let garbage = b"{\"type\":\"send\",";
    let mut frame = (garbage.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(garbage);
    alice.framed.get_mut().write_all(&frame).await.unwrap();

    alice.send_text("alice", "still here").await;

    assert!(matches!(alice.recv().await, Envelope::Error { .. }));
    match alice.recv().await {
        Envelope::Deliver { text, .. } => assert_eq!(text, "still here"),
        other => panic!("unexpected {other:?}"),
    }

    assert_eq!(relay.reader().count_messages().unwrap(), 1);
    assert!(relay.registry.is_online("alice").await);

    drop(alice);
    relay.shutdown().await;
}

#[tokio::test]
async fn send_before_login_is_rejected_then_login_succeeds() {
    let relay = TestRelay::start().await;
    let mut client = TestClient::connect(relay.addr).await;

    client.send_text("bob", "sneaky").await;
    assert!(matches!(client.recv().await, Envelope::Error { .. }));

    client
        .send(Envelope::Login {
            username: "carol".into(),
        })
        .await;
    assert!(matches!(client.recv().await, Envelope::LoginAck { .. }));
    assert_eq!(relay.reader().count_messages().unwrap(), 0);

    drop(client);
    relay.shutdown().await;
}

#[tokio::test]
async fn relogin_takes_over_and_old_disconnect_is_harmless() {
    let relay = TestRelay::start().await;
    let old = TestClient::login(relay.addr, "alice").await;
    let mut new = TestClient::login(relay.addr, "alice").await;
    let mut bob = TestClient::login(relay.addr, "bob").await;

    drop(old);
    // Give the old handler a chance to run its cleanup.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(relay.registry.is_online("alice").await);

    bob.send_text("alice", "are you there?").await;
    match new.recv().await {
        Envelope::Deliver { sender, text, .. } => {
            assert_eq!(sender, "bob");
            assert_eq!(text, "are you there?");
        }
        other => panic!("unexpected {other:?}"),
    }

    drop(new);
    drop(bob);
    relay.shutdown().await;
}

#[tokio::test]
async fn messages_arrive_in_submission_order() {
    let relay = TestRelay::start().await;
    let mut alice = TestClient::login(relay.addr, "alice").await;
    let mut bob = TestClient::login(relay.addr, "bob").await;

    for i in 0..20 {
        alice.send_text("bob", &format!("msg-{i}")).await;
    }

    for i in 0..20 {
        match bob.recv().await {
            Envelope::Deliver { text, .. } => assert_eq!(text, format!("msg-{i}")),
            other => panic!("unexpected {other:?}"),
        }
    }

    let texts: Vec<String> = relay
        .reader()
        .conversation("alice", "bob", 100)
        .unwrap()
        .into_iter()
        .map(|r| r.text)
        .collect();
    let expected: Vec<String> = (0..20).map(|i| format!("msg-{i}")).collect();
    assert_eq!(texts, expected);

    drop(alice);
    drop(bob);
    relay.shutdown().await;
}

#[tokio::test]
async fn history_returns_prior_conversation() {
    let relay = TestRelay::start().await;
    let mut alice = TestClient::login(relay.addr, "alice").await;

    alice.send_text("bob", "one").await;
    alice.send_text("bob", "two").await;
    alice
        .send(Envelope::History {
            peer: "bob".into(),
            limit: None,
        })
        .await;

    // Two echoes, then the batch: history is queued behind the sends.
    assert!(matches!(alice.recv().await, Envelope::Deliver { .. }));
    assert!(matches!(alice.recv().await, Envelope::Deliver { .. }));
    match alice.recv().await {
        Envelope::HistoryBatch { peer, messages } => {
            assert_eq!(peer, "bob");
            let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
            assert_eq!(texts, vec!["one", "two"]);
        }
        other => panic!("unexpected {other:?}"),
    }

    drop(alice);
    relay.shutdown().await;
}

#[tokio::test]
async fn large_history_is_trimmed_to_fit_one_frame() {
    let relay = TestRelay::start().await;
    let mut alice = TestClient::login(relay.addr, "alice").await;

    for i in 0..50 {
        alice
            .send_text("bob", &format!("{i:02}-{}", "x".repeat(2000)))
            .await;
    }
    for _ in 0..50 {
        assert!(matches!(alice.recv().await, Envelope::Deliver { .. }));
    }

    alice
        .send(Envelope::History {
            peer: "bob".into(),
            limit: None,
        })
        .await;
    match alice.recv().await {
        Envelope::HistoryBatch { messages, .. } => {
            assert!(!messages.is_empty());
            assert!(messages.len() < 50);
            assert!(messages.last().unwrap().text.starts_with("49-"));
        }
        other => panic!("unexpected {other:?}"),
    }

    drop(alice);
    relay.shutdown().await;
}

#[tokio::test]
async fn oversized_deliver_is_rejected_before_persisting() {
    let relay = TestRelay::start().await;
    let mut alice = TestClient::login(relay.addr, "alice").await;
    let mut bob = TestClient::login(relay.addr, "bob").await;

    // Fits as a Send, but not once sender and timestamp are added.
    let text = "x".repeat(ServerConfig::default().max_frame_size - 50);
    alice.send_text("bob", &text).await;
    assert!(matches!(alice.recv().await, Envelope::Error { .. }));

    alice.send_text("bob", "small").await;
    match bob.recv().await {
        Envelope::Deliver { text, .. } => assert_eq!(text, "small"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(relay.reader().count_messages().unwrap(), 1);

    drop(alice);
    drop(bob);
    relay.shutdown().await;
}

#[tokio::test]
async fn shutdown_waits_for_open_connections() {
    let relay = TestRelay::start().await;
    let addr = relay.addr;
    let mut alice = TestClient::login(addr, "alice").await;

    relay.stop.send(()).unwrap();
    let mut task = relay.task;

    // Still open: the relay must not finish yet, and alice is still served.
    assert!(tokio::time::timeout(Duration::from_millis(200), &mut task)
        .await
        .is_err());
    alice.send_text("alice", "last words").await;
    assert!(matches!(alice.recv().await, Envelope::Deliver { .. }));

    // New connections are refused once the listener is gone.
    assert!(TcpStream::connect(addr).await.is_err());

    drop(alice);
    let db = tokio::time::timeout(TIMEOUT, task)
        .await
        .expect("relay did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(db.count_messages().unwrap(), 1);
}
