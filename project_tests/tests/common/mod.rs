//! A scripted FIX-Net gateway on `127.0.0.1:0` for integration tests.
//!
//! Every received line is recorded and answered by a responder closure. Tests
//! can also push raw bytes to the newest connection or drop it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lib_fixnet::FixNetSettings;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub type Responder = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

enum Command {
    Send(Vec<u8>),
    Drop,
}

pub struct MockGateway {
    port: u16,
    received: Arc<Mutex<Vec<String>>>,
    /// One command sender per open connection, oldest first.
    clients: Arc<Mutex<Vec<mpsc::UnboundedSender<Command>>>>,
    connections: Arc<AtomicUsize>,
}

impl MockGateway {
    pub async fn start(responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock gateway");
        let port = listener.local_addr().expect("No local address").port();

        let received = Arc::new(Mutex::new(Vec::new()));
        let clients = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let (rec, cls, conns) = (
            Arc::clone(&received),
            Arc::clone(&clients),
            Arc::clone(&connections),
        );
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (tx, rx) = mpsc::unbounded_channel();
                {
                    let mut clients = cls.lock().unwrap();
                    clients.retain(|c: &mpsc::UnboundedSender<Command>| !c.is_closed());
                    clients.push(tx);
                }
                conns.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, Arc::clone(&responder), Arc::clone(&rec), rx));
            }
        });

        Self {
            port,
            received,
            clients,
            connections,
        }
    }

    /// Gateway answering from [`standard_points`].
    pub async fn standard() -> Self {
        Self::start(standard_responder(standard_points())).await
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Sends `line` plus a newline to the newest connection.
    pub fn push(&self, line: &str) {
        self.push_raw(format!("{}\n", line).as_bytes());
    }

    pub fn push_raw(&self, bytes: &[u8]) {
        if let Some(tx) = self.clients.lock().unwrap().last() {
            let _ = tx.send(Command::Send(bytes.to_vec()));
        }
    }

    /// Closes the newest connection from the server side.
    pub fn drop_connection(&self) {
        if let Some(tx) = self.clients.lock().unwrap().pop() {
            let _ = tx.send(Command::Drop);
        }
    }

    /// Waits until `n` connections were accepted and the newest can take pushes.
    pub async fn wait_client(&self, n: usize) -> bool {
        eventually(Duration::from_secs(2), || {
            self.connections() >= n && !self.clients.lock().unwrap().is_empty()
        })
        .await
    }

    /// Connections the server has not closed yet.
    pub fn open_connections(&self) -> usize {
        self.clients
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !c.is_closed())
            .count()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self, line: &str) -> usize {
        self.received.lock().unwrap().iter().filter(|l| *l == line).count()
    }
}

async fn serve(
    stream: TcpStream,
    responder: Responder,
    received: Arc<Mutex<Vec<String>>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    received.lock().unwrap().push(line.clone());
                    for reply in responder(&line) {
                        if writer.write_all(format!("{}\n", reply).as_bytes()).await.is_err() {
                            return;
                        }
                    }
                }
                _ => return,
            },
            cmd = commands.recv() => match cmd {
                Some(Command::Send(bytes)) => {
                    if writer.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
                // Senders stay in `clients` until an explicit drop.
                Some(Command::Drop) | None => return,
            },
        }
    }
}

/// key -> (report payload, read answer). Aux values use `key.aux` ids with an empty report.
pub fn standard_points() -> HashMap<String, (String, String)> {
    let mut points = HashMap::new();
    points.insert(
        "AOA".to_string(),
        (
            "AOA;Angle of Attack;float;-180;180;deg;200;Warn".to_string(),
            "12.3;10100".to_string(),
        ),
    );
    points.insert(
        "AOA.Warn".to_string(),
        (String::new(), "15".to_string()),
    );
    points.insert(
        "IAS".to_string(),
        (
            "IAS;Indicated Airspeed;int;0;300;knots;200;".to_string(),
            "90;00000".to_string(),
        ),
    );
    points
}

/// A stateless FIX-Net server over `points`. Silent for ids starting with `SILENT`.
pub fn standard_responder(points: HashMap<String, (String, String)>) -> Responder {
    Arc::new(move |line: &str| {
        let Some(cmd) = line.strip_prefix('@') else {
            return Vec::new();
        };
        let mut chars = cmd.chars();
        let Some(tag) = chars.next() else {
            return Vec::new();
        };
        let arg = chars.as_str();
        if arg.starts_with("SILENT") {
            return Vec::new();
        }
        let mut keys: Vec<&String> = points
            .iter()
            .filter(|(k, (report, _))| !k.contains('.') && !report.is_empty())
            .map(|(k, _)| k)
            .collect();
        keys.sort();

        let reply = match tag {
            'l' => {
                let ids: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
                return vec![format!("@l;1;{}", ids.join(",")), "@l;2;".to_string()];
            }
            'r' => match points.get(arg) {
                Some((_, value)) => format!("@r{};{}", arg, value),
                None => format!("@r{}!001", arg),
            },
            'q' => match points.get(arg) {
                Some((report, _)) if !report.is_empty() => format!("@q{}", report),
                _ => format!("@q{}!001", arg),
            },
            's' | 'u' => format!("@{}{}", tag, arg),
            'Q' => format!("@Q{}", arg.split(';').next().unwrap_or_default()),
            'U' => format!("@U{}", arg),
            'w' => match arg.split_once(';') {
                Some((id, value)) if points.contains_key(id) => {
                    format!("@w{};{};00000", id, value)
                }
                Some((id, _)) => format!("@w{}!001", id),
                None => return Vec::new(),
            },
            'f' => {
                let fields: Vec<&str> = arg.split(';').collect();
                match fields.as_slice() {
                    [id, _, _] if !points.contains_key(*id) => format!("@f{}!001", id),
                    [_, flag, _] if !"aobfs".contains(*flag) || flag.len() != 1 => {
                        format!("@f{}!002", flag)
                    }
                    _ => format!("@f{}", arg),
                }
            }
            'x' if arg == "status" => r#"@xstatus;{"Version":"0.1","Connections":1}"#.to_string(),
            'x' => format!("@x{}", arg),
            _ => return Vec::new(),
        };
        vec![reply]
    })
}

/// Client settings with short timings for tests.
pub fn settings(port: u16) -> FixNetSettings {
    let mut settings = FixNetSettings::for_server("127.0.0.1", port);
    settings.link.connect_timeout = Duration::from_millis(500);
    settings.link.read_timeout = Duration::from_millis(100);
    settings.link.reconnect_delay = Duration::from_millis(200);
    settings.channel.request_timeout = Duration::from_millis(500);
    settings.channel.list_fragment_timeout = Duration::from_millis(300);
    settings.store.tick_interval = Duration::from_millis(100);
    settings
}

/// Polls `check` every 10ms until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
