//! In-memory SFTP server for the adapter tests.

use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::SftpConnectionOptions;
use crate::errors::{BoxError, ConnectionStage, FsError, FsResult};
use crate::sftp::transport::{RemoteFileType, RemoteStat, SftpDialer, SftpTransport};

pub(crate) const MODIFIED_AT: u64 = 1_704_450_600;

#[derive(Debug, Clone)]
pub(crate) struct FakeFile {
    pub contents: Vec<u8>,
    pub mode: u32,
}

#[derive(Debug, Default)]
struct ServerState {
    files: BTreeMap<String, FakeFile>,
    dirs: BTreeMap<String, u32>,
    failures: HashSet<(String, String)>,
    unreachable_dials: usize,
    reject_auth: bool,
    generation: usize,
    dials: usize,
    closes: usize,
    pings: usize,
}

impl ServerState {
    fn check(&self, operation: &str, path: &str) -> Result<(), BoxError> {
        let failing = self.failures.contains(&(operation.to_string(), path.to_string()))
            || self.failures.contains(&(operation.to_string(), "*".to_string()));
        if failing {
            return Err(format!("{operation} refused for {path}").into());
        }
        Ok(())
    }

    fn stat(&self, path: &str) -> Option<RemoteStat> {
        if let Some(file) = self.files.get(path) {
            return Some(RemoteStat {
                file_type: RemoteFileType::File,
                size: Some(file.contents.len() as u64),
                permissions: Some(0o100000 | file.mode),
                mtime: Some(MODIFIED_AT),
            });
        }
        self.dirs.get(path).map(|mode| RemoteStat {
            file_type: RemoteFileType::Directory,
            size: Some(4096),
            permissions: Some(0o040000 | mode),
            mtime: Some(MODIFIED_AT),
        })
    }

    fn has_children(&self, dir: &str) -> bool {
        self.files
            .keys()
            .chain(self.dirs.keys())
            .any(|path| path != dir && parent_of(path) == dir)
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

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(index) => &path[..index],
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Handle on the shared server state; clones observe the same server.
#[derive(Clone)]
pub(crate) struct FakeSftpServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeSftpServer {
    /// Server with every directory leading to `root` in place.
    pub fn new(root: &str) -> Self {
        let mut state = ServerState::default();
        state.dirs.insert("/".to_string(), 0o755);
        let mut current = String::new();
        for segment in root.split('/').filter(|segment| !segment.is_empty()) {
            current = format!("{current}/{segment}");
            state.dirs.insert(current.clone(), 0o755);
        }
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn dialer(&self) -> Box<dyn SftpDialer> {
        Box::new(FakeSftpDialer {
            server: self.clone(),
        })
    }

    pub fn add_dir(&self, path: &str, mode: u32) -> &Self {
        self.state().dirs.insert(path.to_string(), mode);
        self
    }

    pub fn add_file(&self, path: &str, contents: &[u8], mode: u32) -> &Self {
        self.state().files.insert(
            path.to_string(),
            FakeFile {
                contents: contents.to_vec(),
                mode,
            },
        );
        self
    }

    pub fn file(&self, path: &str) -> Option<FakeFile> {
        self.state().files.get(path).cloned()
    }

    pub fn dir_mode(&self, path: &str) -> Option<u32> {
        self.state().dirs.get(path).copied()
    }

    /// Makes `operation` fail for `path`; `*` matches every path.
    pub fn fail(&self, operation: &str, path: &str) -> &Self {
        self.state()
            .failures
            .insert((operation.to_string(), path.to_string()));
        self
    }

    pub fn make_unreachable_for(&self, dials: usize) -> &Self {
        self.state().unreachable_dials = dials;
        self
    }

    pub fn reject_authentication(&self) -> &Self {
        self.state().reject_auth = true;
        self
    }

    /// Every session dialed so far reports itself as disconnected.
    pub fn drop_sessions(&self) -> &Self {
        self.state().generation += 1;
        self
    }

    pub fn dials(&self) -> usize {
        self.state().dials
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    pub fn pings(&self) -> usize {
        self.state().pings
    }
}

struct FakeSftpDialer {
    server: FakeSftpServer,
}

impl SftpDialer for FakeSftpDialer {
    fn dial(&self, options: &SftpConnectionOptions) -> FsResult<Box<dyn SftpTransport>> {
        let mut state = self.server.state();
        state.dials += 1;
        if state.unreachable_dials > 0 {
            state.unreachable_dials -= 1;
            return Err(FsError::connection(
                ConnectionStage::ConnectToHost,
                format!("unable to connect to host {}:{}", options.host, options.port),
            ));
        }
        if state.reject_auth {
            return Err(FsError::connection(
                ConnectionStage::Authenticate,
                format!("unable to authenticate user {}", options.username),
            ));
        }
        Ok(Box::new(FakeSftpTransport {
            server: self.server.clone(),
            generation: state.generation,
            closed: false,
        }))
    }
}

struct FakeSftpTransport {
    server: FakeSftpServer,
    generation: usize,
    closed: bool,
}

impl FakeSftpTransport {
    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.server.state()
    }
}

impl SftpTransport for FakeSftpTransport {
    fn is_connected(&self) -> bool {
        !self.closed && self.state().generation == self.generation
    }

    fn ping(&mut self) -> Result<(), BoxError> {
        self.state().pings += 1;
        Ok(())
    }

    fn stat(&mut self, path: &str) -> Result<Option<RemoteStat>, BoxError> {
        let state = self.state();
        let path = normalize(path);
        state.check("stat", &path)?;
        Ok(state.stat(&path))
    }

    fn read_dir(&mut self, path: &str) -> Result<Vec<(String, RemoteStat)>, BoxError> {
        let state = self.state();
        let dir = normalize(path);
        state.check("read_dir", &dir)?;
        if !state.dirs.contains_key(&dir) {
            return Err(format!("no such directory {dir}").into());
        }

        let mut entries: Vec<(String, RemoteStat)> = state
            .files
            .keys()
            .chain(state.dirs.keys())
            .filter(|entry| entry.as_str() != "/" && parent_of(entry) == dir)
            .filter_map(|entry| {
                state
                    .stat(entry)
                    .map(|stat| (name_of(entry).to_string(), stat))
            })
            .collect();
        entries.sort_by(|left, right| left.0.cmp(&right.0));
        Ok(entries)
    }

    fn download(&mut self, path: &str, sink: &mut dyn Write) -> Result<(), BoxError> {
        let state = self.state();
        let path = normalize(path);
        state.check("download", &path)?;
        let file = state
            .files
            .get(&path)
            .ok_or_else(|| format!("no such file {path}"))?;
        sink.write_all(&file.contents)?;
        Ok(())
    }

    fn upload(&mut self, path: &str, source: &mut dyn Read) -> Result<(), BoxError> {
        let mut contents = Vec::new();
        source.read_to_end(&mut contents)?;

        let mut state = self.state();
        let path = normalize(path);
        state.check("upload", &path)?;
        if !state.dirs.contains_key(parent_of(&path)) {
            return Err(format!("no such directory for {path}").into());
        }
        let mode = state.files.get(&path).map_or(0o644, |file| file.mode);
        state.files.insert(path, FakeFile { contents, mode });
        Ok(())
    }

    fn mkdir(&mut self, path: &str, mode: u32) -> Result<(), BoxError> {
        let mut state = self.state();
        let path = normalize(path);
        state.check("mkdir", &path)?;
        if state.dirs.contains_key(&path) || !state.dirs.contains_key(parent_of(&path)) {
            return Err(format!("cannot create directory {path}").into());
        }
        state.dirs.insert(path, mode);
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> Result<(), BoxError> {
        let mut state = self.state();
        let path = normalize(path);
        state.check("rmdir", &path)?;
        if !state.dirs.contains_key(&path) || state.has_children(&path) {
            return Err(format!("cannot remove directory {path}").into());
        }
        state.dirs.remove(&path);
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> Result<(), BoxError> {
        let mut state = self.state();
        let path = normalize(path);
        state.check("unlink", &path)?;
        match state.files.remove(&path) {
            Some(_) => Ok(()),
            None => Err(format!("no such file {path}").into()),
        }
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), BoxError> {
        let mut state = self.state();
        let source = normalize(from);
        let destination = normalize(to);
        state.check("rename", &source)?;
        if state.files.contains_key(&destination) || state.dirs.contains_key(&destination) {
            return Err(format!("{destination} already exists").into());
        }
        if !state.dirs.contains_key(parent_of(&destination)) {
            return Err(format!("no such directory for {destination}").into());
        }
        let file = state
            .files
            .remove(&source)
            .ok_or_else(|| format!("no such file {source}"))?;
        state.files.insert(destination, file);
        Ok(())
    }

    fn chmod(&mut self, path: &str, mode: u32) -> Result<(), BoxError> {
        let mut state = self.state();
        let path = normalize(path);
        state.check("chmod", &path)?;
        if let Some(file) = state.files.get_mut(&path) {
            file.mode = mode;
            return Ok(());
        }
        match state.dirs.get_mut(&path) {
            Some(existing) => {
                *existing = mode;
                Ok(())
            }
            None => Err(format!("no such file or directory {path}").into()),
        }
    }

    fn close(&mut self) -> Result<(), BoxError> {
        self.closed = true;
        self.state().closes += 1;
        Ok(())
    }
}
