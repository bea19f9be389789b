//! In-memory transport for tests
//!
//! `MockConnector` hands out `MockTransport`s whose exec channels run a tiny
//! scripted "shell":
//!
//! | command     | behaviour                                         |
//! |-------------|---------------------------------------------------|
//! | `echo X`    | `X\n` on stdout, exit 0                           |
//! | `warn X`    | `X\n` on stderr, exit 0                           |
//! | `exit N`    | no output, exit N                                 |
//! | `sleep N`   | sleeps N seconds (tokio time), exit 0; cut short  |
//! |             | by a close of its transport                       |
//! | `flood N`   | N KiB on both stdout and stderr, exit 0           |
//! | `sever`     | `partial\n`, then the connection drops            |
//! | `kill`      | terminated by SIGKILL                             |
//! | `nostatus`  | channel closes without an exit status             |
//! | `reject`    | exec request refused                              |
//! | `true`      | exit 0                                            |
//! | other       | "command not found" on stderr, exit 127           |
//!
//! Password auth succeeds only with [`GOOD_PASSWORD`]. Host `unreachable`
//! refuses connections.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::session::{AuthMethod, Credentials};
use crate::transport::{
    ChannelError, ChannelEvent, ConnectionError, Connector, RawChannel, TransportHandle,
};

pub(crate) const GOOD_PASSWORD: &str = "secret";

const FLOOD_CHUNK: usize = 1024;

pub(crate) fn creds() -> Credentials {
    Credentials::with_password("host1", 22, "user", GOOD_PASSWORD)
}

pub(crate) fn bad_creds() -> Credentials {
    Credentials::with_password("host1", 22, "user", "wrong")
}

#[derive(Default)]
struct MockState {
    connects: AtomicUsize,
    closes: AtomicUsize,
    opens: AtomicUsize,
    connect_delay: Mutex<Duration>,
    transports: Mutex<Vec<Arc<Link>>>,
    log: Mutex<Vec<String>>,
}

impl MockState {
    fn record(&self, entry: String) {
        self.log.lock().push(entry);
    }
}

/// Liveness of one mock transport, shared with its channels
struct Link {
    alive: AtomicBool,
    closed: Notify,
}

impl Link {
    fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            closed: Notify::new(),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Returns whether the link was still up
    fn cut(&self) -> bool {
        let was_alive = self.alive.swap(false, Ordering::SeqCst);
        self.closed.notify_waiters();
        was_alive
    }

    /// Sleep for `duration` unless the link goes down first; false if it did
    async fn sleep(&self, duration: Duration) -> bool {
        let closed = self.closed.notified();
        tokio::pin!(closed);
        closed.as_mut().enable();
        if !self.is_alive() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = closed => false,
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection attempts so far
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Transports closed while still up
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Exec channels opened so far
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Kill every transport handed out so far, as if the network went away
    pub fn sever_all(&self) {
        for link in self.state.transports.lock().iter() {
            link.cut();
        }
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = delay;
    }

    /// `open <cmd>` / `done <cmd>` entries in the order they happened
    pub fn log(&self) -> Vec<String> {
        self.state.log.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<dyn TransportHandle>, ConnectionError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if credentials.host == "unreachable" {
            return Err(ConnectionError::Unreachable("Connection refused".to_string()));
        }
        if let AuthMethod::Password(password) = &credentials.auth {
            if password.as_str() != GOOD_PASSWORD {
                return Err(ConnectionError::AuthRejected(
                    "Permission denied (password)".to_string(),
                ));
            }
        }

        let link = Arc::new(Link::new());
        self.state.transports.lock().push(link.clone());
        Ok(Arc::new(MockTransport {
            state: self.state.clone(),
            link,
        }))
    }
}

struct MockTransport {
    state: Arc<MockState>,
    link: Arc<Link>,
}

#[async_trait]
impl TransportHandle for MockTransport {
    async fn open_exec(&self, command: &str) -> Result<Box<dyn RawChannel>, ChannelError> {
        if !self.is_alive() {
            return Err(ChannelError::OpenRejected("connection closed".to_string()));
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.state.record(format!("open {}", command));

        let mut channel = MockChannel::script(command);
        channel.link = Some((self.state.clone(), self.link.clone()));
        Ok(Box::new(channel))
    }

    fn is_alive(&self) -> bool {
        self.link.is_alive()
    }

    async fn close(&self) {
        if self.link.cut() {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

enum Step {
    Emit(ChannelEvent),
    Sleep(Duration),
    Sever,
}

/// Scripted exec channel; usable on its own or through a `MockTransport`
pub(crate) struct MockChannel {
    command: String,
    steps: VecDeque<Step>,
    link: Option<(Arc<MockState>, Arc<Link>)>,
}

impl MockChannel {
    pub fn script(command: &str) -> Self {
        use ChannelEvent::*;

        let (verb, arg) = command.split_once(' ').unwrap_or((command, ""));
        let mut steps = Vec::new();
        let finish = |steps: &mut Vec<Step>, status: Option<u32>| {
            if let Some(code) = status {
                steps.push(Step::Emit(ExitStatus(code)));
            }
            steps.push(Step::Emit(Eof));
            steps.push(Step::Emit(Closed));
        };

        match verb {
            "echo" => {
                steps.push(Step::Emit(Stdout(Bytes::from(format!("{}\n", arg)))));
                finish(&mut steps, Some(0));
            }
            "warn" => {
                steps.push(Step::Emit(Stderr(Bytes::from(format!("{}\n", arg)))));
                finish(&mut steps, Some(0));
            }
            "exit" => finish(&mut steps, Some(arg.parse().unwrap_or(1))),
            "sleep" => {
                steps.push(Step::Sleep(Duration::from_secs(arg.parse().unwrap_or(1))));
                finish(&mut steps, Some(0));
            }
            "flood" => {
                for _ in 0..arg.parse::<usize>().unwrap_or(1) {
                    steps.push(Step::Emit(Stdout(Bytes::from(vec![b'o'; FLOOD_CHUNK]))));
                    steps.push(Step::Emit(Stderr(Bytes::from(vec![b'e'; FLOOD_CHUNK]))));
                }
                finish(&mut steps, Some(0));
            }
            "sever" => {
                steps.push(Step::Emit(Stdout(Bytes::from_static(b"partial\n"))));
                steps.push(Step::Sever);
            }
            "kill" => {
                steps.push(Step::Emit(ExitSignal {
                    signal: "KILL".to_string(),
                    message: "killed".to_string(),
                }));
                finish(&mut steps, None);
            }
            "nostatus" => finish(&mut steps, None),
            "reject" => steps.push(Step::Emit(Failure)),
            "true" => finish(&mut steps, Some(0)),
            _ => {
                steps.push(Step::Emit(Stderr(Bytes::from(format!(
                    "sh: {}: command not found\n",
                    verb
                )))));
                finish(&mut steps, Some(127));
            }
        }

        Self {
            command: command.to_string(),
            steps: steps.into(),
            link: None,
        }
    }
}

#[async_trait]
impl RawChannel for MockChannel {
    async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.steps.pop_front()? {
                Step::Emit(ChannelEvent::Closed) => {
                    if let Some((state, _)) = &self.link {
                        state.record(format!("done {}", self.command));
                    }
                    return Some(ChannelEvent::Closed);
                }
                Step::Emit(event) => return Some(event),
                Step::Sleep(duration) => {
                    let Some((_, link)) = &self.link else {
                        tokio::time::sleep(duration).await;
                        continue;
                    };
                    if !link.sleep(duration).await {
                        self.steps.clear();
                        return None;
                    }
                }
                Step::Sever => {
                    if let Some((_, link)) = &self.link {
                        link.cut();
                    }
                    self.steps.clear();
                    return None;
                }
            }
        }
    }
}
