//! End-to-end tests over a real TCP socket: newline-delimited JSON
//! envelopes in, JSON responses (and watch events) out.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use visita::clock::ManualClock;
use visita::engine::Engine;
use visita::notify::NotifyHub;
use visita::wire;

async fn start_server(name: &str) -> SocketAddr {
    let dir = std::env::temp_dir().join("visita_test_wire");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);

    let now = chrono::NaiveDate::from_ymd_opt(2025, 6, 1)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap();
    let engine = Arc::new(
        Engine::new(path, Arc::new(NotifyHub::new()), Arc::new(ManualClock::new(now))).unwrap(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine).await;
            });
        }
    });
    addr
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    async fn send(&mut self, envelope: Value) {
        let mut line = envelope.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for response")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn request(&mut self, envelope: Value) -> Value {
        self.send(envelope).await;
        self.recv().await
    }
}

fn admin(req: Value) -> Value {
    json!({"user_id": "admin", "is_admin": true, "req": req})
}

fn user(user_id: &str, req: Value) -> Value {
    json!({"user_id": user_id, "req": req})
}

#[tokio::test]
async fn full_booking_flow_over_tcp() {
    let addr = start_server("full_flow.wal").await;
    let mut client = Client::connect(addr).await;

    let resp = client
        .request(admin(json!({
            "op": "create_visit",
            "title": "Tour A",
            "description": "guided tour",
            "capacity_per_slot": 15
        })))
        .await;
    assert_eq!(resp["result"], "visit");
    let visit_id = resp["visit"]["id"].as_str().unwrap().to_string();

    let resp = client
        .request(admin(json!({
            "op": "add_slot",
            "visit_id": visit_id,
            "date": "2025-06-02",
            "start_time": "10:00:00",
            "end_time": "12:00:00",
            "max_appointments": null
        })))
        .await;
    assert_eq!(resp["result"], "slot");
    assert_eq!(resp["slot"]["max_appointments"], 15);
    let slot_id = resp["slot"]["id"].as_str().unwrap().to_string();

    // Overbooking fails with a typed error
    let resp = client
        .request(user(
            "alice",
            json!({"op": "book", "slot_id": slot_id, "number_of_people": 16, "description": "big group"}),
        ))
        .await;
    assert_eq!(resp["result"], "error");
    assert_eq!(resp["kind"], "capacity_exceeded");

    // Exact fill succeeds
    let resp = client
        .request(user(
            "alice",
            json!({"op": "book", "slot_id": slot_id, "number_of_people": 15, "description": "full group"}),
        ))
        .await;
    assert_eq!(resp["result"], "appointment");
    assert_eq!(resp["appointment"]["status"], "pending");
    let appt_id = resp["appointment"]["id"].as_str().unwrap().to_string();

    // The full slot disappears from availability
    let resp = client
        .request(user(
            "bob",
            json!({"op": "list_available_slots", "visit_id": visit_id}),
        ))
        .await;
    assert_eq!(resp["result"], "slots");
    assert_eq!(resp["slots"].as_array().unwrap().len(), 0);

    // Approve, then the admin listing shows it
    let resp = client
        .request(admin(
            json!({"op": "transition", "appointment_id": appt_id, "status": "approved"}),
        ))
        .await;
    assert_eq!(resp["appointment"]["status"], "approved");

    let resp = client
        .request(admin(json!({
            "op": "list_appointments",
            "status": "approved",
            "page": null,
            "limit": null
        })))
        .await;
    assert_eq!(resp["result"], "appointments");
    assert_eq!(resp["total"], 1);
    assert_eq!(resp["appointments"][0]["id"].as_str().unwrap(), appt_id);
}

#[tokio::test]
async fn admin_requests_rejected_without_flag() {
    let addr = start_server("forbidden.wal").await;
    let mut client = Client::connect(addr).await;

    let resp = client
        .request(user(
            "mallory",
            json!({"op": "create_visit", "title": "X", "description": "", "capacity_per_slot": 1}),
        ))
        .await;
    assert_eq!(resp["result"], "error");
    assert_eq!(resp["kind"], "forbidden");

    // Reads stay open to everyone
    let resp = client.request(user("mallory", json!({"op": "list_visits"}))).await;
    assert_eq!(resp["result"], "visits");
}

#[tokio::test]
async fn malformed_line_yields_parse_error() {
    let addr = start_server("parse_error.wal").await;
    let mut client = Client::connect(addr).await;

    let mut line = String::from("this is not json\n");
    client.writer.write_all(line.as_bytes()).await.unwrap();
    line.clear();
    client.reader.read_line(&mut line).await.unwrap();
    let resp: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(resp["result"], "error");
    assert_eq!(resp["kind"], "parse");

    // The connection survives a bad line
    let resp = client.request(user("u", json!({"op": "list_visits"}))).await;
    assert_eq!(resp["result"], "visits");
}

#[tokio::test]
async fn watch_streams_committed_events() {
    let addr = start_server("watch.wal").await;
    let mut admin_client = Client::connect(addr).await;

    let resp = admin_client
        .request(admin(json!({
            "op": "create_visit",
            "title": "Tour A",
            "description": "",
            "capacity_per_slot": 5
        })))
        .await;
    let visit_id = resp["visit"]["id"].as_str().unwrap().to_string();

    let mut watcher = Client::connect(addr).await;
    let resp = watcher
        .request(user("observer", json!({"op": "watch", "visit_id": visit_id})))
        .await;
    assert_eq!(resp["result"], "watching");
    assert_eq!(resp["visit_id"].as_str().unwrap(), visit_id);

    // Another connection mutates the visit; the watcher sees the event
    let resp = admin_client
        .request(admin(json!({
            "op": "add_slot",
            "visit_id": visit_id,
            "date": "2025-06-02",
            "start_time": "09:00:00",
            "end_time": "11:00:00",
            "max_appointments": 3
        })))
        .await;
    assert_eq!(resp["result"], "slot");

    let event = watcher.recv().await;
    assert_eq!(event["result"], "event");
    assert_eq!(event["visit_id"].as_str().unwrap(), visit_id);

    let resp = watcher
        .request(user("observer", json!({"op": "watch", "visit_id": ulid::Ulid::new().to_string()})))
        .await;
    assert_eq!(resp["kind"], "not_found");
}
