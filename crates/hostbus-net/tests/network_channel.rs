use std::io::Write;
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use hostbus_frame::{encode_frame, opcode::net, ByteOrder};
use hostbus_net::{
    ClientId, Message, NetClient, NetError, NetworkChannel, NetworkConfig, NetworkHandler,
    PortSelection, ServiceThread,
};

#[derive(Debug, PartialEq)]
enum Seen {
    Connect(ClientId),
    Message(ClientId, Message),
    Disconnect(ClientId),
}

struct Recorder {
    tx: Mutex<Sender<Seen>>,
}

impl Recorder {
    fn record(&self, seen: Seen) {
        let _ = self.tx.lock().expect("lock should not be poisoned").send(seen);
    }
}

impl NetworkHandler for Recorder {
    fn on_connect(&self, client: ClientId) {
        self.record(Seen::Connect(client));
    }

    fn on_message(&self, client: ClientId, message: Message) {
        self.record(Seen::Message(client, message));
    }

    fn on_disconnect(&self, client: ClientId) {
        self.record(Seen::Disconnect(client));
    }
}

struct Harness {
    service: ServiceThread,
    events: Receiver<Seen>,
}

impl Harness {
    fn new() -> Self {
        let channel =
            Arc::new(NetworkChannel::listen(NetworkConfig::loopback()).expect("listen should work"));
        let (tx, events) = mpsc::channel();
        channel.set_handler(Arc::new(Recorder { tx: Mutex::new(tx) }));
        let service = ServiceThread::spawn(channel).expect("service should start");
        Self { service, events }
    }

    fn channel(&self) -> &NetworkChannel {
        self.service.channel()
    }

    fn next(&self) -> Seen {
        self.events
            .recv_timeout(Duration::from_secs(3))
            .expect("event should arrive")
    }

    fn connect(&self, agent: &str) -> (NetClient, ClientId) {
        let client =
            NetClient::connect(self.channel().local_addr(), agent).expect("connect should work");
        match self.next() {
            Seen::Connect(id) => (client, id),
            other => panic!("expected connect, got {other:?}"),
        }
    }
}

fn recv(client: &mut NetClient) -> Option<Message> {
    client
        .recv(Some(Duration::from_secs(3)))
        .expect("recv should succeed")
}

#[test]
fn text_and_binary_reach_handler() {
    let harness = Harness::new();
    let (mut client, id) = harness.connect("test-agent/1.0");

    client.send_text("[\"ping\"]").expect("send should succeed");
    client.send_binary(&[4, b'x', 0]).expect("send should succeed");

    assert_eq!(
        harness.next(),
        Seen::Message(id, Message::Text("[\"ping\"]".into()))
    );
    assert_eq!(
        harness.next(),
        Seen::Message(id, Message::Binary(vec![4u8, b'x', 0].into()))
    );
    assert_eq!(
        harness.channel().find_client_by_user_agent("test-agent"),
        Some(id)
    );
}

#[test]
fn unicast_reaches_only_its_client() {
    let harness = Harness::new();
    let (mut a, id_a) = harness.connect("a");
    let (mut b, _id_b) = harness.connect("b");

    harness
        .channel()
        .send(id_a, b"hello a", false)
        .expect("send should succeed");

    assert_eq!(recv(&mut a), Some(Message::Text("hello a".into())));
    assert_eq!(
        b.recv(Some(Duration::from_millis(200))).expect("recv should succeed"),
        None
    );
}

#[test]
fn broadcast_skips_excluded_client() {
    let harness = Harness::new();
    let (mut a, _) = harness.connect("a");
    let (mut b, id_b) = harness.connect("b");
    let (mut c, _) = harness.connect("c");

    let queued = harness.channel().broadcast(b"[1,2,3]", Some(id_b), false);
    assert_eq!(queued, 2);

    assert_eq!(recv(&mut a), Some(Message::Text("[1,2,3]".into())));
    assert_eq!(recv(&mut c), Some(Message::Text("[1,2,3]".into())));
    assert_eq!(
        b.recv(Some(Duration::from_millis(200))).expect("recv should succeed"),
        None
    );
}

#[test]
fn messages_to_one_client_keep_order() {
    let harness = Harness::new();
    let (mut client, id) = harness.connect("ordered");

    for i in 0..50 {
        harness
            .channel()
            .send(id, format!("m{i}").as_bytes(), i % 2 == 0)
            .expect("send should succeed");
    }
    for i in 0..50 {
        let message = recv(&mut client).expect("message should arrive");
        assert_eq!(message.as_bytes(), format!("m{i}").as_bytes());
        assert_eq!(message.is_binary(), i % 2 == 0);
    }
}

#[test]
fn large_message_survives_partial_writes() {
    let harness = Harness::new();
    let (mut client, id) = harness.connect("bulk");

    let payload: Vec<u8> = (0..2 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    harness
        .channel()
        .send(id, &payload, true)
        .expect("send should succeed");
    harness.channel().send(id, b"after", false).expect("send");

    assert_eq!(recv(&mut client), Some(Message::Binary(payload.into())));
    assert_eq!(recv(&mut client), Some(Message::Text("after".into())));
}

#[test]
fn fragmented_frames_are_reassembled() {
    let harness = Harness::new();
    let mut raw = TcpStream::connect(harness.channel().local_addr()).expect("connect");
    raw.set_nodelay(true).expect("nodelay");
    let id = match harness.next() {
        Seen::Connect(id) => id,
        other => panic!("expected connect, got {other:?}"),
    };

    let mut wire = BytesMut::new();
    encode_frame(net::TEXT, b"[\"broadcast\",\"hi\"]", ByteOrder::Little, &mut wire)
        .expect("encode");
    encode_frame(net::TEXT, b"[\"ping\"]", ByteOrder::Little, &mut wire).expect("encode");

    for byte in wire.iter() {
        raw.write_all(&[*byte]).expect("write should succeed");
        raw.flush().expect("flush should succeed");
        std::thread::sleep(Duration::from_micros(200));
    }

    assert_eq!(
        harness.next(),
        Seen::Message(id, Message::Text("[\"broadcast\",\"hi\"]".into()))
    );
    assert_eq!(harness.next(), Seen::Message(id, Message::Text("[\"ping\"]".into())));
}

#[test]
fn malformed_frame_drops_only_that_client() {
    let harness = Harness::new();
    let (mut good, _good_id) = harness.connect("good");
    let mut raw = TcpStream::connect(harness.channel().local_addr()).expect("connect");
    let bad_id = match harness.next() {
        Seen::Connect(id) => id,
        other => panic!("expected connect, got {other:?}"),
    };

    let mut header = Vec::new();
    header.extend_from_slice(&net::TEXT.to_le_bytes());
    header.extend_from_slice(&(-1i32).to_le_bytes());
    raw.write_all(&header).expect("write should succeed");

    assert_eq!(harness.next(), Seen::Disconnect(bad_id));
    assert_eq!(harness.channel().broadcast(b"still here", None, false), 1);
    assert_eq!(recv(&mut good), Some(Message::Text("still here".into())));
}

#[test]
fn disconnect_mid_broadcast_is_silent() {
    let harness = Harness::new();
    let (mut stay, _) = harness.connect("stay");
    let (leave, leave_id) = harness.connect("leave");

    drop(leave);
    for _ in 0..20 {
        harness.channel().broadcast(b"tick", None, false);
    }

    assert_eq!(harness.next(), Seen::Disconnect(leave_id));
    for _ in 0..20 {
        assert_eq!(recv(&mut stay), Some(Message::Text("tick".into())));
    }
    assert!(matches!(
        harness.channel().send(leave_id, b"late", false),
        Err(NetError::UnknownClient(id)) if id == leave_id
    ));
}

#[test]
fn client_ids_are_never_reused() {
    let harness = Harness::new();
    let (first, first_id) = harness.connect("one");
    drop(first);
    assert_eq!(harness.next(), Seen::Disconnect(first_id));

    let (_second, second_id) = harness.connect("two");
    assert_ne!(first_id, second_id);
    assert!(second_id > first_id);
}

#[test]
fn cancel_stops_serving_and_closes_clients() {
    let harness = Harness::new();
    let (mut client, _) = harness.connect("doomed");

    harness.channel().cancel();
    assert!(harness.channel().is_cancelled());
    assert_eq!(harness.channel().client_count(), 0);
    assert!(matches!(harness.channel().serve(false), Err(NetError::Closed)));

    let result = client.recv(Some(Duration::from_secs(2)));
    assert!(matches!(result, Err(NetError::Closed) | Err(NetError::Io(_))));
}

#[test]
fn non_blocking_serve_without_service_thread() {
    let channel = NetworkChannel::listen(NetworkConfig::loopback()).expect("listen should work");
    let mut client = NetClient::connect(channel.local_addr(), "manual").expect("connect");

    // Pump by hand until the client is accepted and its hello processed.
    for _ in 0..200 {
        channel.serve(false).expect("serve should succeed");
        if channel.find_client_by_user_agent("manual").is_some() {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    let id = channel
        .find_client_by_user_agent("manual")
        .expect("client should be registered");

    channel.send(id, b"pumped", false).expect("send should succeed");
    for _ in 0..10 {
        channel.serve(false).expect("serve should succeed");
    }
    assert_eq!(recv(&mut client), Some(Message::Text("pumped".into())));
}

#[test]
fn client_that_never_reads_is_dropped_at_queue_cap() {
    let config = NetworkConfig {
        max_queued_frames: 4,
        ..NetworkConfig::loopback()
    };
    let channel = NetworkChannel::listen(config).expect("listen should work");
    let (tx, events) = mpsc::channel();
    channel.set_handler(Arc::new(Recorder { tx: Mutex::new(tx) }));
    let _stalled = NetClient::connect(channel.local_addr(), "stalled").expect("connect");

    let mut id = None;
    for _ in 0..200 {
        channel.serve(false).expect("serve should succeed");
        if let Ok(Seen::Connect(seen)) = events.try_recv() {
            id = Some(seen);
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    let id = id.expect("client should be accepted");

    // Nothing is serviced in between, so every frame stays queued.
    for _ in 0..4 {
        assert_eq!(channel.broadcast(b"fill", None, false), 1);
    }
    assert_eq!(channel.broadcast(b"overflow", None, false), 0);
    assert!(matches!(
        channel.send(id, b"late", false),
        Err(NetError::QueueFull(full)) if full == id
    ));

    channel.serve(false).expect("serve should succeed");
    assert_eq!(
        events
            .recv_timeout(Duration::from_secs(1))
            .expect("disconnect should be reported"),
        Seen::Disconnect(id)
    );
    assert_eq!(channel.client_count(), 0);
}

#[test]
fn preferred_port_falls_back_to_probing_when_taken() {
    let held = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind should work");
    let taken = held.local_addr().expect("addr").port();
    let fallback = 50_200;

    let config = NetworkConfig {
        port: PortSelection::Preferred {
            port: taken,
            fallback,
        },
        ..NetworkConfig::loopback()
    };
    let channel = NetworkChannel::listen(config).expect("listen should fall back");
    assert_ne!(channel.port(), taken);
    assert!(channel.port() >= fallback);

    let free = channel.port();
    drop(channel);
    let config = NetworkConfig {
        port: PortSelection::Preferred {
            port: free,
            fallback,
        },
        ..NetworkConfig::loopback()
    };
    let channel = NetworkChannel::listen(config).expect("listen should work");
    assert_eq!(channel.port(), free);
}
