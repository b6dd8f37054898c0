//! In-memory FTP server speaking just enough of the control channel for the
//! adapter tests.

use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{FtpConnectionOptions, TransferMode};
use crate::errors::{BoxError, ConnectionStage, FsError, FsResult};
use crate::ftp::transport::{FtpDialer, FtpResponse, FtpTransport};

/// Fixed modification time reported for every file.
pub(crate) const MODIFIED_AT: i64 = 1_704_450_600;

#[derive(Debug, Clone)]
pub(crate) struct FakeFile {
    pub contents: Vec<u8>,
    pub mode: u32,
}

#[derive(Debug, Default)]
struct ServerState {
    files: BTreeMap<String, FakeFile>,
    dirs: BTreeMap<String, u32>,
    cwd: String,
    home: String,
    windows: bool,
    failures: HashSet<(String, String)>,
    failing_probes: usize,
    probes: usize,
    connects: usize,
    closes: usize,
    help: String,
    syst: String,
    commands: Vec<String>,
}

impl ServerState {
    fn resolve(&self, path: &str) -> String {
        let unescaped = unescape(path);
        let mut parts: Vec<&str> = if unescaped.starts_with('/') {
            Vec::new()
        } else {
            self.cwd.split('/').filter(|part| !part.is_empty()).collect()
        };
        for part in unescaped.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        format!("/{}", parts.join("/"))
    }

    fn check(&self, operation: &str, path: &str) -> Result<(), BoxError> {
        let failing = self.failures.contains(&(operation.to_string(), path.to_string()))
            || self.failures.contains(&(operation.to_string(), "*".to_string()));
        if failing {
            return Err(format!("550 {operation} refused for {path}").into());
        }
        Ok(())
    }

    fn is_empty_dir(&self, dir: &str) -> bool {
        !self
            .files
            .keys()
            .chain(self.dirs.keys())
            .any(|path| path != dir && parent_of(path) == dir)
    }

    fn children(&self, dir: &str) -> Vec<(String, bool)> {
        let mut children: Vec<(String, bool)> = self
            .dirs
            .keys()
            .filter(|path| path.as_str() != "/" && parent_of(path) == dir)
            .map(|path| (path.clone(), true))
            .chain(
                self.files
                    .keys()
                    .filter(|path| parent_of(path) == dir)
                    .map(|path| (path.clone(), false)),
            )
            .collect();
        children.sort_by(|left, right| name_of(&left.0).cmp(name_of(&right.0)));
        children
    }

    fn entry_line(&self, path: &str, is_dir: bool, display_name: &str) -> String {
        if self.windows {
            return if is_dir {
                format!("01-05-24  10:30AM       <DIR>          {display_name}")
            } else {
                let size = self.files.get(path).map_or(0, |file| file.contents.len());
                format!("01-05-24  10:30AM {size:>18} {display_name}")
            };
        }

        let (kind, mode, size) = if is_dir {
            ('d', self.dirs.get(path).copied().unwrap_or(0o755), 4096)
        } else {
            let file = self.files.get(path);
            (
                '-',
                file.map_or(0o644, |file| file.mode),
                file.map_or(0, |file| file.contents.len()),
            )
        };
        format!(
            "{} 1 1000 1000 {size} Jan 05  2024 {display_name}",
            permission_string(kind, mode)
        )
    }

    fn render_block(&self, dir: &str, display: &str, recursive: bool, out: &mut Vec<String>) {
        let children = self.children(dir);
        if recursive {
            out.push(format!("{display}:"));
        }
        if !self.windows {
            out.push(format!("total {}", children.len()));
            out.push(self.entry_line(dir, true, "."));
            out.push(self.entry_line(dir, true, ".."));
        }
        for (path, is_dir) in &children {
            out.push(self.entry_line(path, *is_dir, name_of(path)));
        }
        if recursive {
            for (path, is_dir) in &children {
                if *is_dir {
                    out.push(String::new());
                    let nested = format!("{}/{}", display.trim_end_matches('/'), name_of(path));
                    self.render_block(path, &nested, true, out);
                }
            }
        }
    }
}

fn unescape(path: &str) -> String {
    let mut unescaped = String::with_capacity(path.len());
    let mut chars = path.chars();
    while let Some(character) = chars.next() {
        if character == '\\' {
            if let Some(escaped) = chars.next() {
                unescaped.push(escaped);
            }
            continue;
        }
        unescaped.push(character);
    }
    unescaped
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

fn permission_string(kind: char, mode: u32) -> String {
    let mut permissions = String::from(kind);
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        permissions.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        permissions.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        permissions.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    permissions
}

/// Handle on the shared server state; clones observe the same server.
#[derive(Clone)]
pub(crate) struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    /// Server whose login directory is `home`.
    pub fn new(home: &str) -> Self {
        let mut state = ServerState {
            cwd: "/".to_string(),
            help: "214 The following commands are recognized".to_string(),
            syst: "215 UNIX Type: I".to_string(),
            ..ServerState::default()
        };
        state.dirs.insert("/".to_string(), 0o755);
        let mut current = String::new();
        for segment in home.split('/').filter(|segment| !segment.is_empty()) {
            current = format!("{current}/{segment}");
            state.dirs.insert(current.clone(), 0o755);
        }
        state.home = if current.is_empty() { "/".to_string() } else { current };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn dialer(&self) -> Box<dyn FtpDialer> {
        Box::new(FakeDialer {
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

    pub fn fail_next_probes(&self, count: usize) -> &Self {
        self.state().failing_probes = count;
        self
    }

    pub fn use_windows_listings(&self) -> &Self {
        self.state().windows = true;
        self
    }

    pub fn set_help(&self, help: &str) -> &Self {
        self.state().help = help.to_string();
        self
    }

    pub fn set_syst(&self, syst: &str) -> &Self {
        self.state().syst = syst.to_string();
        self
    }

    pub fn connects(&self) -> usize {
        self.state().connects
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    pub fn probes(&self) -> usize {
        self.state().probes
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }
}

struct FakeDialer {
    server: FakeServer,
}

impl FtpDialer for FakeDialer {
    fn dial(&self, options: &FtpConnectionOptions) -> FsResult<Box<dyn FtpTransport>> {
        let mut state = self.server.state();
        if state.check("dial", "*").is_err() {
            return Err(FsError::connection(
                ConnectionStage::ConnectToHost,
                format!("unable to connect to host {}", options.host),
            ));
        }
        state.connects += 1;
        state.cwd = state.home.clone();
        Ok(Box::new(FakeTransport {
            server: self.server.clone(),
        }))
    }
}

struct FakeTransport {
    server: FakeServer,
}

impl FakeTransport {
    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.server.state()
    }

    fn reply(code: u32, lines: Vec<String>) -> FtpResponse {
        FtpResponse { code, lines }
    }
}

impl FtpTransport for FakeTransport {
    fn login(&mut self, username: &str, password: &str) -> Result<(), BoxError> {
        let mut state = self.state();
        state.commands.push(format!("USER {username}"));
        if password == "wrong" {
            return Err("530 Login incorrect".into());
        }
        Ok(())
    }

    fn raw(&mut self, command: &str) -> Result<FtpResponse, BoxError> {
        let mut state = self.state();
        state.commands.push(command.to_string());

        if command == "NOOP" {
            state.probes += 1;
            if state.failing_probes > 0 {
                state.failing_probes -= 1;
                return Ok(Self::reply(421, vec!["421 Timeout".to_string()]));
            }
            return Ok(Self::reply(200, vec!["200 NOOP ok".to_string()]));
        }
        if command == "HELP" {
            return Ok(Self::reply(214, vec![state.help.clone()]));
        }
        if command == "SYST" {
            return Ok(Self::reply(215, vec![state.syst.clone()]));
        }
        if command == "OPTS UTF8 ON" {
            return Ok(Self::reply(200, vec!["200 Always in UTF8 mode".to_string()]));
        }
        if let Some(path) = command.strip_prefix("STAT ") {
            let resolved = state.resolve(path);
            let line = if state.files.contains_key(&resolved) {
                state.entry_line(&resolved, false, &resolved)
            } else if state.dirs.contains_key(&resolved) {
                state.entry_line(&resolved, true, &resolved)
            } else {
                format!("ftpd: {resolved}: No such file or directory")
            };
            return Ok(Self::reply(
                213,
                vec!["213-STAT".to_string(), line, "213 End.".to_string()],
            ));
        }
        Ok(Self::reply(500, vec!["500 Unknown command".to_string()]))
    }

    fn set_passive(&mut self, passive: bool) -> Result<(), BoxError> {
        let mut state = self.state();
        state.commands.push(if passive { "PASV" } else { "PORT" }.to_string());
        state.check("passive", "*")
    }

    fn set_use_passive_address(&mut self, enabled: bool) -> Result<(), BoxError> {
        self.state()
            .commands
            .push(format!("USEPASVADDRESS {enabled}"));
        Ok(())
    }

    fn chdir(&mut self, path: &str) -> Result<(), BoxError> {
        let mut state = self.state();
        let resolved = state.resolve(path);
        if !state.dirs.contains_key(&resolved) {
            return Err(format!("550 {path}: No such directory").into());
        }
        state.cwd = resolved;
        Ok(())
    }

    fn pwd(&mut self) -> Result<String, BoxError> {
        let state = self.state();
        state.check("pwd", "*")?;
        Ok(state.cwd.clone())
    }

    fn raw_list(&mut self, argument: &str, recursive: bool) -> Result<Vec<String>, BoxError> {
        let mut state = self.state();
        state.commands.push(format!("LIST {argument}").trim_end().to_string());
        let location = match argument.split_once(' ') {
            Some((options, location)) if options.starts_with('-') => location,
            _ if argument.starts_with('-') => "",
            _ => argument,
        };
        let resolved = state.resolve(location);
        state.check("list", &resolved)?;
        if !state.dirs.contains_key(&resolved) {
            return Ok(Vec::new());
        }

        let mut lines = Vec::new();
        let display = unescape(location);
        state.render_block(&resolved, &display, recursive, &mut lines);
        Ok(lines)
    }

    fn size(&mut self, path: &str) -> Result<u64, BoxError> {
        let state = self.state();
        let resolved = state.resolve(path);
        state.check("size", &resolved)?;
        state
            .files
            .get(&resolved)
            .map(|file| file.contents.len() as u64)
            .ok_or_else(|| format!("550 {path}: not a plain file").into())
    }

    fn mdtm(&mut self, path: &str) -> Result<i64, BoxError> {
        let state = self.state();
        let resolved = state.resolve(path);
        if !state.files.contains_key(&resolved) {
            return Err(format!("550 {path}: not a plain file").into());
        }
        Ok(MODIFIED_AT)
    }

    fn mkdir(&mut self, path: &str) -> Result<(), BoxError> {
        let mut state = self.state();
        let resolved = state.resolve(path);
        state.check("mkdir", &resolved)?;
        if state.dirs.contains_key(&resolved) || !state.dirs.contains_key(parent_of(&resolved)) {
            return Err(format!("550 {path}: cannot create directory").into());
        }
        state.dirs.insert(resolved, 0o755);
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> Result<(), BoxError> {
        let mut state = self.state();
        let resolved = state.resolve(path);
        state.check("rmdir", &resolved)?;
        if !state.dirs.contains_key(&resolved) || !state.is_empty_dir(&resolved) {
            return Err(format!("550 {path}: cannot remove directory").into());
        }
        state.dirs.remove(&resolved);
        Ok(())
    }

    fn delete(&mut self, path: &str) -> Result<(), BoxError> {
        let mut state = self.state();
        let resolved = state.resolve(path);
        state.check("delete", &resolved)?;
        state
            .files
            .remove(&resolved)
            .map(|_| ())
            .ok_or_else(|| format!("550 {path}: no such file").into())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), BoxError> {
        let mut state = self.state();
        let source = state.resolve(from);
        let destination = state.resolve(to);
        state.check("rename", &source)?;
        if !state.dirs.contains_key(parent_of(&destination)) {
            return Err(format!("550 {to}: no such directory").into());
        }
        let file = state
            .files
            .remove(&source)
            .ok_or_else(|| format!("550 {from}: no such file"))?;
        state.files.insert(destination, file);
        Ok(())
    }

    fn chmod(&mut self, mode: u32, path: &str) -> Result<(), BoxError> {
        let mut state = self.state();
        let resolved = state.resolve(path);
        state.check("chmod", &resolved)?;
        state.commands.push(format!("SITE CHMOD {mode:o} {path}"));
        if let Some(file) = state.files.get_mut(&resolved) {
            file.mode = mode;
            return Ok(());
        }
        match state.dirs.get_mut(&resolved) {
            Some(existing) => {
                *existing = mode;
                Ok(())
            }
            None => Err(format!("550 {path}: no such file or directory").into()),
        }
    }

    fn get(&mut self, path: &str, _mode: TransferMode, sink: &mut dyn Write) -> Result<(), BoxError> {
        let mut state = self.state();
        state.commands.push(format!("RETR {path}"));
        let resolved = state.resolve(path);
        state.check("get", &resolved)?;
        let file = state
            .files
            .get(&resolved)
            .ok_or_else(|| format!("550 {path}: no such file"))?;
        sink.write_all(&file.contents)?;
        Ok(())
    }

    fn put(
        &mut self,
        path: &str,
        _mode: TransferMode,
        source: &mut dyn Read,
    ) -> Result<(), BoxError> {
        let mut contents = Vec::new();
        source.read_to_end(&mut contents)?;

        let mut state = self.state();
        let resolved = state.resolve(path);
        state.check("put", &resolved)?;
        if !state.dirs.contains_key(parent_of(&resolved)) {
            return Err(format!("553 {path}: no such directory").into());
        }
        let mode = state.files.get(&resolved).map_or(0o644, |file| file.mode);
        state.files.insert(resolved, FakeFile { contents, mode });
        Ok(())
    }

    fn close(&mut self) -> Result<(), BoxError> {
        self.state().closes += 1;
        Ok(())
    }
}
