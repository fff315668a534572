//! In-memory remote host for tests
//!
//! [`MockRemote`] is both the remote filesystem and the [`SessionFactory`].
//! Faults are injected per path (stream failures) or per host (auth and
//! connect failures). Every session shares the same filesystem.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, ReadBuf};

use super::error::SftpError;
use super::path_utils::remote_basename;
use super::session::{RemoteReader, RemoteSession, SessionFactory, SessionState};
use super::types::{FileEntry, FileType};
use crate::ssh::HostDescriptor;

/// What happens when a stream reaches an injected fault offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Read returns an I/O error; the session stays usable
    Stream,
    /// Read returns end-of-stream early
    Truncate,
    /// Read returns an error and the session's connection is gone
    Connection,
}

#[derive(Debug, Clone, Copy)]
struct StreamFault {
    at: u64,
    kind: FaultKind,
}

#[derive(Debug, Clone)]
enum Node {
    Dir { mtime: i64 },
    File { data: Arc<Vec<u8>>, mtime: i64 },
    Link { target: String, mtime: i64 },
}

const MAX_LINK_DEPTH: usize = 8;

impl MockState {
    /// Node at `path` with symlinks followed, like SFTP `STAT` and `OPEN`
    fn resolve(&self, path: &str) -> Option<&Node> {
        let mut current = path.to_string();
        for _ in 0..MAX_LINK_DEPTH {
            match self.nodes.get(&current)? {
                Node::Link { target, .. } => current = normalize(target),
                node => return Some(node),
            }
        }
        None
    }
}

#[derive(Debug, Default)]
struct MockState {
    nodes: BTreeMap<String, Node>,
    denied: HashSet<String>,
    broken: HashSet<String>,
    faults: HashMap<String, VecDeque<StreamFault>>,
    auth_failures: HashSet<String>,
    connect_failures: HashMap<String, u32>,
    connects: HashMap<String, u32>,
    opens: Vec<(String, u64)>,
    active: usize,
    peak: usize,
    connect_delay: Duration,
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Shared in-memory remote
#[derive(Debug, Clone, Default)]
pub struct MockRemote {
    state: Arc<Mutex<MockState>>,
}

impl MockRemote {
    pub fn new() -> Self {
        let remote = Self::default();
        remote.add_dir("/", 0);
        remote
    }

    pub fn add_dir(&self, path: &str, mtime: i64) {
        let path = normalize(path);
        let mut state = self.state.lock();
        let mut current = path.as_str();
        loop {
            state
                .nodes
                .entry(current.to_string())
                .or_insert(Node::Dir { mtime });
            if current == "/" {
                break;
            }
            current = parent_of(current);
        }
    }

    pub fn add_file(&self, path: &str, data: Vec<u8>, mtime: i64) {
        let path = normalize(path);
        self.add_dir(parent_of(&path), 0);
        self.state.lock().nodes.insert(
            path,
            Node::File {
                data: Arc::new(data),
                mtime,
            },
        );
    }

    /// Symlink at `path` pointing to the absolute path `target`
    pub fn add_symlink(&self, path: &str, target: &str, mtime: i64) {
        let path = normalize(path);
        self.add_dir(parent_of(&path), 0);
        self.state.lock().nodes.insert(
            path,
            Node::Link {
                target: target.to_string(),
                mtime,
            },
        );
    }

    /// Listing `path` fails with permission denied
    pub fn deny(&self, path: &str) {
        self.state.lock().denied.insert(normalize(path));
    }

    /// Listing `path` fails with a connection error
    pub fn break_listing(&self, path: &str) {
        self.state.lock().broken.insert(normalize(path));
    }

    /// The next stream opened on `path` fails once it reaches offset `at`.
    /// Faults queue up; each open consumes at most one.
    pub fn inject_fault(&self, path: &str, at: u64, kind: FaultKind) {
        self.state
            .lock()
            .faults
            .entry(normalize(path))
            .or_default()
            .push_back(StreamFault { at, kind });
    }

    pub fn fail_auth(&self, host_name: &str) {
        self.state.lock().auth_failures.insert(host_name.to_string());
    }

    /// The next `times` connects to `host_name` fail at the TCP level
    pub fn fail_connects(&self, host_name: &str, times: u32) {
        self.state
            .lock()
            .connect_failures
            .insert(host_name.to_string(), times);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = delay;
    }

    /// Connect attempts made to `host_name`
    pub fn connect_count(&self, host_name: &str) -> u32 {
        self.state
            .lock()
            .connects
            .get(host_name)
            .copied()
            .unwrap_or(0)
    }

    /// Every `open_read` call as `(path, offset)`
    pub fn open_log(&self) -> Vec<(String, u64)> {
        self.state.lock().opens.clone()
    }

    /// Highest number of simultaneously connected sessions
    pub fn peak_sessions(&self) -> usize {
        self.state.lock().peak
    }

    pub fn active_sessions(&self) -> usize {
        self.state.lock().active
    }
}

impl SessionFactory for MockRemote {
    fn create(&self, host: &HostDescriptor) -> Box<dyn RemoteSession> {
        Box::new(MockSession {
            host: host.clone(),
            remote: self.clone(),
            state: SessionState::Disconnected,
            alive: Arc::new(AtomicBool::new(false)),
        })
    }
}

pub struct MockSession {
    host: HostDescriptor,
    remote: MockRemote,
    state: SessionState,
    alive: Arc<AtomicBool>,
}

impl MockSession {
    fn check_connected(&self) -> Result<(), SftpError> {
        if self.state != SessionState::Connected {
            return Err(SftpError::NotConnected(self.host.name.clone()));
        }
        if !self.alive.load(Ordering::SeqCst) {
            return Err(SftpError::ConnectionFailed(
                "connection reset by peer".to_string(),
            ));
        }
        Ok(())
    }

    fn release(&mut self) {
        if self.state == SessionState::Connected {
            self.alive.store(false, Ordering::SeqCst);
            let mut state = self.remote.state.lock();
            state.active = state.active.saturating_sub(1);
        }
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    fn host(&self) -> &HostDescriptor {
        &self.host
    }

    fn state(&self) -> SessionState {
        self.state
    }

    async fn connect(&mut self) -> Result<(), SftpError> {
        match self.state {
            SessionState::Connected => return Ok(()),
            SessionState::Closed => return Err(SftpError::NotConnected(self.host.name.clone())),
            _ => {}
        }
        self.state = SessionState::Connecting;

        let delay = {
            let mut state = self.remote.state.lock();
            *state.connects.entry(self.host.name.clone()).or_default() += 1;
            state.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.remote.state.lock();
        if state.auth_failures.contains(&self.host.name) {
            self.state = SessionState::Disconnected;
            return Err(SftpError::AuthenticationFailed(format!(
                "{}@{} rejected credentials",
                self.host.username, self.host.host
            )));
        }
        if let Some(left) = state.connect_failures.get_mut(&self.host.name) {
            if *left > 0 {
                *left -= 1;
                self.state = SessionState::Disconnected;
                return Err(SftpError::ConnectionFailed(format!(
                    "{}: connection refused",
                    self.host.address()
                )));
            }
        }

        state.active += 1;
        state.peak = state.peak.max(state.active);
        drop(state);

        self.alive = Arc::new(AtomicBool::new(true));
        self.state = SessionState::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.release();
        if self.state != SessionState::Closed {
            self.state = SessionState::Disconnected;
        }
    }

    async fn close(&mut self) {
        self.disconnect().await;
        self.state = SessionState::Closed;
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>, SftpError> {
        self.check_connected()?;
        let path = normalize(path);
        let state = self.remote.state.lock();

        if state.broken.contains(&path) {
            return Err(SftpError::ConnectionFailed(format!(
                "connection lost while listing {}",
                path
            )));
        }
        if state.denied.contains(&path) {
            return Err(SftpError::PermissionDenied(path));
        }
        match state.resolve(&path) {
            Some(Node::Dir { .. }) => {}
            _ => return Err(SftpError::FileNotFound(path)),
        }

        Ok(state
            .nodes
            .iter()
            .filter(|(p, _)| p.as_str() != "/" && parent_of(p) == path)
            .map(|(p, node)| entry_for(p, node))
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<FileEntry, SftpError> {
        self.check_connected()?;
        let path = normalize(path);
        let state = self.remote.state.lock();
        state
            .resolve(&path)
            .map(|node| entry_for(&path, node))
            .ok_or(SftpError::FileNotFound(path))
    }

    async fn open_read(&self, path: &str, offset: u64) -> Result<RemoteReader, SftpError> {
        self.check_connected()?;
        let path = normalize(path);
        let mut state = self.remote.state.lock();

        let data = match state.resolve(&path) {
            Some(Node::File { data, .. }) => data.clone(),
            _ => return Err(SftpError::FileNotFound(path)),
        };
        let fault = state.faults.get_mut(&path).and_then(|q| q.pop_front());
        state.opens.push((path, offset));

        Ok(Box::pin(MockReader {
            data,
            pos: offset as usize,
            fault,
            alive: self.alive.clone(),
        }))
    }
}

fn entry_for(path: &str, node: &Node) -> FileEntry {
    let (file_type, size, modified) = match node {
        Node::Dir { mtime } => (FileType::Directory, 0, *mtime),
        Node::File { data, mtime } => (FileType::File, data.len() as u64, *mtime),
        Node::Link { target, mtime } => (FileType::Symlink, target.len() as u64, *mtime),
    };
    FileEntry {
        name: remote_basename(path).to_string(),
        path: path.to_string(),
        file_type,
        size,
        modified,
    }
}

struct MockReader {
    data: Arc<Vec<u8>>,
    pos: usize,
    fault: Option<StreamFault>,
    alive: Arc<AtomicBool>,
}

impl AsyncRead for MockReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if !this.alive.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }

        let mut limit = this.data.len();
        if let Some(fault) = this.fault {
            let at = fault.at as usize;
            if this.pos >= at {
                this.fault = None;
                return Poll::Ready(match fault.kind {
                    FaultKind::Truncate => Ok(()),
                    FaultKind::Stream => Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("corrupt packet at offset {}", at),
                    )),
                    FaultKind::Connection => {
                        this.alive.store(false, Ordering::SeqCst);
                        Err(io::Error::new(
                            io::ErrorKind::ConnectionReset,
                            "connection reset by peer",
                        ))
                    }
                });
            }
            limit = limit.min(at);
        }

        let start = this.pos.min(limit);
        let end = limit.min(start + buf.remaining());
        buf.put_slice(&this.data[start..end]);
        this.pos = end;
        Poll::Ready(Ok(()))
    }
}

/// Host descriptor for tests
pub fn host(name: &str) -> HostDescriptor {
    HostDescriptor::new(
        name,
        format!("{}.internal", name),
        "collector",
        crate::ssh::AuthMethod::password("secret"),
    )
}

/// Deterministic, non-repeating-ish test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}
