//! Session tests against a fake streaming server on localhost

use nadi_io::config::ProtocolConfig;
use nadi_io::protocol::{ChannelKind, SubscriptionSet};
use nadi_io::session::{Session, SessionState};
use nadi_io::sink::{MemorySink, SinkRegistry, open_csv_sinks};
use nadi_io::transport::TcpConnector;
use parking_lot::Mutex;
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// What one accepted connection does once the client sends `pause OFF`
struct Script {
    data: &'static str,
    close_after_data: bool,
}

struct FakeServer {
    address: String,
    commands: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl FakeServer {
    /// Serve one connection per script, in order, then stop listening
    fn start(scripts: Vec<Script>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&commands);

        let handle = thread::spawn(move || {
            for script in scripts {
                let (stream, _) = listener.accept().unwrap();
                serve(stream, &script, &log);
            }
        });

        Self {
            address,
            commands,
            handle,
        }
    }

    fn connector(&self) -> Arc<TcpConnector> {
        Arc::new(TcpConnector::new(
            self.address.clone(),
            Duration::from_secs(1),
        ))
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

fn serve(stream: TcpStream, script: &Script, log: &Mutex<Vec<String>>) {
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let command = line.trim_end().to_string();
        log.lock().push(command.clone());

        let reply = if command == "device_list" {
            "R device_list 1 | A02DE7 Empatica_E4\n".to_string()
        } else {
            format!("R {} OK\n", command.trim_end_matches(" ON"))
        };
        if writer.write_all(reply.as_bytes()).is_err() {
            return;
        }

        if command == "pause OFF" {
            let _ = writer.write_all(script.data.as_bytes());
            if script.close_after_data {
                let _ = writer.shutdown(Shutdown::Both);
                return;
            }
        }
        if command == "device_disconnect" {
            return;
        }
    }
}

fn protocol() -> ProtocolConfig {
    ProtocolConfig {
        response_timeout_ms: 1000,
        read_timeout_ms: 20,
        stall_timeout_ms: 5000,
        ..ProtocolConfig::default()
    }
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_full_lifecycle_over_tcp() {
    let server = FakeServer::start(vec![Script {
        data: "E4_Acc 123.5 1 2 3\r\nE4_Bvp 123,6 0.5\r\nE4_Gsr 123.7 0.1\r\n",
        close_after_data: false,
    }]);

    let acc = MemorySink::new();
    let gsr = MemorySink::new();
    let (acc_rows, gsr_rows) = (acc.rows(), gsr.rows());
    let sinks = SinkRegistry::new()
        .with(ChannelKind::Accel, acc)
        .with(ChannelKind::Bvp, MemorySink::new())
        .with(ChannelKind::Gsr, gsr);
    let mut session = Session::new(protocol(), server.connector(), sinks);

    session.connect_server().unwrap();
    let devices = session.list_devices().unwrap();
    assert_eq!(devices[0].id, "A02DE7");
    session.connect_device("A02DE7").unwrap();
    session
        .configure_subscriptions(
            SubscriptionSet::new()
                .with(ChannelKind::Accel)
                .with(ChannelKind::Bvp)
                .with(ChannelKind::Gsr),
        )
        .unwrap();
    session.start_streaming().unwrap();

    wait_until("three samples", || session.stats().samples_written == 3);
    session.stop_streaming().unwrap();
    assert_eq!(session.current_state(), SessionState::Subscribed);
    session.disconnect().unwrap();
    assert_eq!(session.current_state(), SessionState::Idle);
    server.handle.join().unwrap();

    assert_eq!(acc_rows.text_rows(), vec!["123.5,1,2,3"]);
    assert_eq!(gsr_rows.text_rows(), vec!["123.7,0.1"]);
    assert_eq!(
        server.commands.lock().clone(),
        vec![
            "device_list",
            "device_connect A02DE7",
            "pause ON",
            "device_subscribe acc ON",
            "device_subscribe bvp ON",
            "device_subscribe gsr ON",
            "pause OFF",
            "pause ON",
            "device_disconnect",
        ]
    );
}

#[test]
fn test_csv_output_over_tcp() {
    let server = FakeServer::start(vec![Script {
        data: "E4_Ibi 10.0 0.8\nE4_Hr 10.0 75.0\nE4_Temperature 10.5 31,25\n",
        close_after_data: false,
    }]);
    let temp_dir = tempfile::TempDir::new().unwrap();
    let subscriptions = SubscriptionSet::new()
        .with(ChannelKind::Ibi)
        .with(ChannelKind::HeartRate)
        .with(ChannelKind::Temperature);

    let mut session = Session::new(protocol(), server.connector(), SinkRegistry::new());
    session.connect_server().unwrap();
    session.connect_device("A02DE7").unwrap();
    session
        .configure_subscriptions(subscriptions.clone())
        .unwrap();
    let sinks = open_csv_sinks(temp_dir.path(), "P07", &subscriptions).unwrap();
    session.set_sinks(sinks).unwrap();

    session.start_streaming().unwrap();
    wait_until("three samples", || session.stats().samples_written == 3);
    session.stop_streaming().unwrap();

    let dir = temp_dir.path().join("P07");
    let read = |name: &str| std::fs::read_to_string(dir.join(name)).unwrap();
    assert_eq!(read("ibi_data.csv"), "timestamp,IBI\n10.0,0.8\n");
    assert_eq!(read("hr_data.csv"), "timestamp,HR\n10.0,75.0\n");
    assert_eq!(read("tmp_data.csv"), "timestamp,Tmp\n10.5,31.25\n");

    session.disconnect().unwrap();
    // ibi serves both IBI and HR; subscribed once
    let commands = server.commands();
    assert_eq!(
        commands
            .iter()
            .filter(|c| c.as_str() == "device_subscribe ibi ON")
            .count(),
        1
    );
    assert!(commands.iter().any(|c| c == "device_subscribe tmp ON"));
}

#[test]
fn test_reconnect_after_device_lost() {
    let server = FakeServer::start(vec![
        Script {
            data: "E4_Temperature 1.0 31.5\nconnection lost to device A02DE7\n",
            close_after_data: false,
        },
        Script {
            data: "E4_Temperature 2.0 31.75\n",
            close_after_data: false,
        },
    ]);
    let tmp = MemorySink::new();
    let tmp_rows = tmp.rows();
    let sinks = SinkRegistry::new().with(ChannelKind::Temperature, tmp);
    let mut session = Session::new(protocol(), server.connector(), sinks);

    session.connect_server().unwrap();
    session.connect_device("A02DE7").unwrap();
    session
        .configure_subscriptions(SubscriptionSet::new().with(ChannelKind::Temperature))
        .unwrap();
    session.start_streaming().unwrap();

    wait_until("second sample", || session.stats().samples_written == 2);
    assert_eq!(session.current_state(), SessionState::Streaming);
    assert_eq!(session.stats().reconnects, 1);

    session.disconnect().unwrap();
    server.handle.join().unwrap();
    assert_eq!(tmp_rows.text_rows(), vec!["1.0,31.5", "2.0,31.75"]);
    assert_eq!(tmp_rows.header_count(), 1);
}

#[test]
fn test_server_gone_leaves_session_faulted() {
    let server = FakeServer::start(vec![Script {
        data: "E4_Bvp 1.0 0.5\n",
        close_after_data: true,
    }]);
    let mut session = Session::new(
        ProtocolConfig {
            response_timeout_ms: 300,
            ..protocol()
        },
        server.connector(),
        SinkRegistry::new().with(ChannelKind::Bvp, MemorySink::new()),
    );

    session.connect_server().unwrap();
    session.connect_device("A02DE7").unwrap();
    session
        .configure_subscriptions(SubscriptionSet::new().with(ChannelKind::Bvp))
        .unwrap();
    session.start_streaming().unwrap();

    wait_until("dispatcher exit", || session.dispatcher_finished());
    assert_eq!(session.current_state(), SessionState::Faulted);
    assert_eq!(session.stats().samples_written, 1);
    assert!(session.diagnostic().unwrap().contains("reconnect failed"));

    session.disconnect().unwrap();
    assert_eq!(session.current_state(), SessionState::Idle);
}
