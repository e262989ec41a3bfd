//! Relay behaviour over a real socket.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

use dronesim_app::channel::{Producer, Subscription};
use dronesim_app::error::AppError;
use dronesim_app::router::{self, Router, RouterEvent};
use dronesim_app::worker::{ControlSender, Inbound, RunPaths, WorkerContext};
use dronesim_core::control::ControlMessage;
use dronesim_core::enums::{ChannelId, Consumer, ObjectKind, Role};
use dronesim_core::settings::Settings;
use dronesim_core::types::{GameBounds, ObjectSet};
use dronesim_core::wire::WireMessage;

const ATTEMPTS: u32 = 50;
const BACKOFF: Duration = Duration::from_millis(20);

struct Relay {
    _dir: tempfile::TempDir,
    socket: PathBuf,
    events: Sender<RouterEvent>,
    served: thread::JoinHandle<Result<(), AppError>>,
}

fn start_relay() -> Relay {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("router.sock");
    let listener = router::bind(&socket).unwrap();
    let (tx, rx) = mpsc::channel();
    router::spawn_acceptor(listener, tx.clone()).unwrap();

    let paths = RunPaths {
        run_id: "relay-test".into(),
        run_dir: dir.path().to_path_buf(),
        log_dir: dir.path().to_path_buf(),
    };
    let served = thread::spawn(move || {
        let mut ctx = WorkerContext::new(
            Role::Router,
            Settings::default(),
            paths,
            ControlSender::new(Box::new(std::io::sink())),
        );
        router::serve(&mut Router::new(), &rx, &mut ctx, Duration::from_millis(50))
    });

    Relay {
        _dir: dir,
        socket,
        events: tx,
        served,
    }
}

fn producer(socket: &Path, channel: ChannelId) -> Producer {
    Producer::connect(socket, channel, ATTEMPTS, BACKOFF).unwrap()
}

fn subscribe(socket: &Path, consumer: Consumer) -> Subscription {
    Subscription::connect(socket, consumer, ATTEMPTS, BACKOFF).unwrap()
}

fn resize(width: i32, height: i32) -> WireMessage {
    WireMessage::Resize(GameBounds::new(width, height).unwrap())
}

/// Publish a size record and wait until `subscription` sees it, which
/// proves the subscription is registered.
fn sync_on_size(size: &mut Producer, subscription: &mut Subscription) {
    size.publish(&resize(64, 16)).unwrap();
    loop {
        match subscription.recv().unwrap() {
            Some(WireMessage::Resize(bounds)) if bounds == GameBounds::new(64, 16).unwrap() => {
                return
            }
            Some(_) => continue,
            None => panic!("relay closed while syncing"),
        }
    }
}

#[test]
fn test_keys_keep_their_order_across_resizes() {
    let relay = start_relay();
    let mut physics = subscribe(&relay.socket, Consumer::Physics);
    let mut size = producer(&relay.socket, ChannelId::Size);
    sync_on_size(&mut size, &mut physics);

    let mut keys = producer(&relay.socket, ChannelId::Key);
    keys.publish(&WireMessage::Key(b'a')).unwrap();
    size.publish(&resize(100, 30)).unwrap();
    keys.publish(&WireMessage::Key(b'b')).unwrap();
    size.publish(&resize(101, 30)).unwrap();
    size.publish(&resize(102, 30)).unwrap();
    keys.publish(&WireMessage::Key(b'c')).unwrap();

    let mut seen_keys = Vec::new();
    let mut seen_widths = Vec::new();
    while seen_keys.len() < 3 || seen_widths.len() < 3 {
        match physics.recv().unwrap() {
            Some(WireMessage::Key(key)) => seen_keys.push(key),
            Some(WireMessage::Resize(bounds)) => seen_widths.push(bounds.width()),
            Some(other) => panic!("unexpected {other:?}"),
            None => panic!("relay closed early"),
        }
    }
    assert_eq!(seen_keys, b"abc");
    assert_eq!(seen_widths, [100, 101, 102]);

    relay
        .events
        .send(Inbound::Control(ControlMessage::Terminate))
        .unwrap();
    relay.served.join().unwrap().unwrap();
    assert!(physics.recv().unwrap().is_none());
}

#[test]
fn test_malformed_record_does_not_stop_the_channel() {
    let relay = start_relay();
    let mut viewer = subscribe(&relay.socket, Consumer::Viewer);
    let mut size = producer(&relay.socket, ChannelId::Size);
    sync_on_size(&mut size, &mut viewer);

    let mut obstacles = producer(&relay.socket, ChannelId::Obstacles);
    obstacles.publish_raw("3:1,1,o|2,2,o").unwrap();
    obstacles.publish_raw("2:1,1,o|9,9,o").unwrap();

    match viewer.recv().unwrap() {
        Some(WireMessage::Objects(set)) => {
            assert_eq!(set.len(), 2);
            assert_eq!(set.get(1).map(|o| (o.x, o.y)), Some((9, 9)));
        }
        other => panic!("unexpected {other:?}"),
    }

    relay
        .events
        .send(Inbound::Control(ControlMessage::Terminate))
        .unwrap();
    relay.served.join().unwrap().unwrap();
}

#[test]
fn test_invalid_utf8_key_record_does_not_close_the_channel() {
    let relay = start_relay();
    let mut physics = subscribe(&relay.socket, Consumer::Physics);
    let mut size = producer(&relay.socket, ChannelId::Size);
    sync_on_size(&mut size, &mut physics);

    let mut raw = UnixStream::connect(&relay.socket).unwrap();
    raw.write_all(b"produce key\na\n\xff\nb\n").unwrap();
    raw.flush().unwrap();

    let mut keys = Vec::new();
    while keys.len() < 2 {
        match physics.recv().unwrap() {
            Some(WireMessage::Key(key)) => keys.push(key),
            Some(_) => continue,
            None => panic!("relay closed early"),
        }
    }
    assert_eq!(keys, b"ab");

    relay
        .events
        .send(Inbound::Control(ControlMessage::Terminate))
        .unwrap();
    relay.served.join().unwrap().unwrap();
}

fn obstacle_set(count: i32) -> WireMessage {
    let mut set = ObjectSet::empty(ObjectKind::Obstacle);
    for i in 0..count {
        set.push(1 + i, 1 + i);
    }
    WireMessage::Objects(set)
}

#[test]
fn test_object_sets_are_replaced_whole() {
    const ROUNDS: usize = 50;
    let relay = start_relay();
    let mut viewer = subscribe(&relay.socket, Consumer::Viewer);
    let mut size = producer(&relay.socket, ChannelId::Size);
    sync_on_size(&mut size, &mut viewer);

    let reader = thread::spawn(move || {
        let mut lengths = Vec::new();
        while lengths.len() < 2 * ROUNDS {
            match viewer.recv() {
                Ok(Some(WireMessage::Objects(set))) => lengths.push(set.len()),
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(err) => panic!("subscriber saw a bad record: {err}"),
            }
        }
        lengths
    });

    let mut obstacles = producer(&relay.socket, ChannelId::Obstacles);
    for round in 0..ROUNDS {
        obstacles.publish(&obstacle_set(3)).unwrap();
        if round % 10 == 0 {
            // Count prefix promising more objects than the body carries.
            obstacles.publish_raw("5:1,1,o|2,2,o").unwrap();
        }
        obstacles.publish(&obstacle_set(5)).unwrap();
    }
    // A producer that dies halfway through a record.
    let mut cut = UnixStream::connect(&relay.socket).unwrap();
    cut.write_all(b"produce obstacles\n5:1,1,o|2,2,o|3,").unwrap();
    drop(cut);

    let lengths = reader.join().unwrap();
    assert_eq!(lengths.len(), 2 * ROUNDS);
    for pair in lengths.chunks(2) {
        assert_eq!(pair, [3, 5]);
    }

    relay
        .events
        .send(Inbound::Control(ControlMessage::Terminate))
        .unwrap();
    relay.served.join().unwrap().unwrap();
}

#[test]
fn test_generators_see_sizes_but_not_keys() {
    let relay = start_relay();
    let mut generator = subscribe(&relay.socket, Consumer::TargetGenerator);
    let mut viewer = subscribe(&relay.socket, Consumer::Viewer);
    let mut size = producer(&relay.socket, ChannelId::Size);
    sync_on_size(&mut size, &mut generator);
    sync_on_size(&mut size, &mut viewer);

    let mut keys = producer(&relay.socket, ChannelId::Key);
    keys.publish(&WireMessage::Key(b'w')).unwrap();
    loop {
        match viewer.recv().unwrap() {
            Some(WireMessage::Key(b'w')) => break,
            Some(_) => continue,
            None => panic!("relay closed early"),
        }
    }
    size.publish(&resize(90, 20)).unwrap();

    loop {
        match generator.recv().unwrap() {
            Some(WireMessage::Resize(bounds)) if bounds.width() == 90 => break,
            Some(WireMessage::Resize(_)) => continue,
            other => panic!("generator received {other:?}"),
        }
    }

    relay
        .events
        .send(Inbound::Control(ControlMessage::Terminate))
        .unwrap();
    relay.served.join().unwrap().unwrap();
}

#[test]
fn test_lost_supervisor_closes_every_subscriber() {
    let relay = start_relay();
    let mut viewer = subscribe(&relay.socket, Consumer::Viewer);
    let mut size = producer(&relay.socket, ChannelId::Size);
    sync_on_size(&mut size, &mut viewer);

    relay.events.send(Inbound::SupervisorLost).unwrap();
    let result = relay.served.join().unwrap();
    assert!(matches!(result, Err(AppError::PeerClosed(_))));
    assert!(viewer.recv().unwrap().is_none());
}
