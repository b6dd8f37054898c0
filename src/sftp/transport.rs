use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;

use ssh2::{ErrorCode, FileStat, HashType, OpenFlags, OpenType, RenameFlags, Session, Sftp};
use tracing::debug;

use crate::config::{SftpAuth, SftpConnectionOptions};
use crate::errors::{BoxError, ConnectionStage, FsError, FsResult};

/// `SSH_FX_NO_SUCH_FILE`.
const NO_SUCH_FILE: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFileType {
    File,
    Directory,
    Symlink,
    Other,
}

/// Attributes the server reports for a remote path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStat {
    pub file_type: RemoteFileType,
    pub size: Option<u64>,
    pub permissions: Option<u32>,
    pub mtime: Option<u64>,
}

impl RemoteStat {
    pub fn is_file(&self) -> bool {
        self.file_type == RemoteFileType::File
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == RemoteFileType::Directory
    }
}

impl From<&FileStat> for RemoteStat {
    fn from(stat: &FileStat) -> Self {
        let file_type = stat.file_type();
        let file_type = if file_type.is_dir() {
            RemoteFileType::Directory
        } else if file_type.is_symlink() {
            RemoteFileType::Symlink
        } else if file_type.is_file() {
            RemoteFileType::File
        } else {
            RemoteFileType::Other
        };
        Self {
            file_type,
            size: stat.size,
            permissions: stat.perm,
            mtime: stat.mtime,
        }
    }
}

/// SFTP operations the adapter needs from a session.
pub trait SftpTransport: Send {
    fn is_connected(&self) -> bool;

    /// Keepalive round trip.
    fn ping(&mut self) -> Result<(), BoxError>;

    /// `None` when the path does not exist.
    fn stat(&mut self, path: &str) -> Result<Option<RemoteStat>, BoxError>;

    /// Entry names with their attributes, without `.` and `..`.
    fn read_dir(&mut self, path: &str) -> Result<Vec<(String, RemoteStat)>, BoxError>;

    fn download(&mut self, path: &str, sink: &mut dyn Write) -> Result<(), BoxError>;

    fn upload(&mut self, path: &str, source: &mut dyn Read) -> Result<(), BoxError>;

    /// Creates a single directory; parents must exist.
    fn mkdir(&mut self, path: &str, mode: u32) -> Result<(), BoxError>;

    fn rmdir(&mut self, path: &str) -> Result<(), BoxError>;

    fn unlink(&mut self, path: &str) -> Result<(), BoxError>;

    /// Fails when `to` already exists.
    fn rename(&mut self, from: &str, to: &str) -> Result<(), BoxError>;

    fn chmod(&mut self, path: &str, mode: u32) -> Result<(), BoxError>;

    fn close(&mut self) -> Result<(), BoxError>;
}

/// Opens and authenticates an SFTP session.
pub trait SftpDialer: Send {
    fn dial(&self, options: &SftpConnectionOptions) -> FsResult<Box<dyn SftpTransport>>;
}

/// Compares a configured fingerprint with a raw host key hash. Hex digits
/// are compared case-insensitively and colons are ignored.
pub fn fingerprint_matches(expected: &str, hash: &[u8]) -> bool {
    let expected: String = expected
        .chars()
        .filter(|character| *character != ':')
        .map(|character| character.to_ascii_lowercase())
        .collect();
    let actual: String = hash.iter().map(|byte| format!("{byte:02x}")).collect();
    !expected.is_empty() && expected == actual
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Ssh2Dialer;

impl Ssh2Dialer {
    fn verify_host(session: &Session, expected: &str) -> FsResult<()> {
        let matches = [HashType::Sha256, HashType::Md5]
            .into_iter()
            .filter_map(|hash_type| session.host_key_hash(hash_type))
            .any(|hash| fingerprint_matches(expected, hash));
        if matches {
            return Ok(());
        }
        Err(FsError::connection(
            ConnectionStage::HostAuthenticity,
            "the host fingerprint does not match the configured fingerprint",
        ))
    }

    fn authenticate(session: &Session, options: &SftpConnectionOptions) -> FsResult<()> {
        let user = options.username.as_str();
        let authenticated = match &options.auth {
            SftpAuth::Agent => session.userauth_agent(user),
            SftpAuth::Password { password } => session.userauth_password(user, password),
            SftpAuth::KeyFile { path, passphrase } => {
                if !path.is_file() {
                    return Err(FsError::connection(
                        ConnectionStage::LoadPrivateKey,
                        format!("unable to load private key from {}", path.display()),
                    ));
                }
                session.userauth_pubkey_file(user, None, path, passphrase.as_deref())
            }
        };
        authenticated.map_err(|err| {
            FsError::connection(
                ConnectionStage::Authenticate,
                format!("unable to authenticate user {user}"),
            )
            .caused_by(err)
        })?;

        if !session.authenticated() {
            return Err(FsError::connection(
                ConnectionStage::Authenticate,
                format!("sftp auth failed for {user}"),
            ));
        }
        Ok(())
    }
}

impl SftpDialer for Ssh2Dialer {
    fn dial(&self, options: &SftpConnectionOptions) -> FsResult<Box<dyn SftpTransport>> {
        let endpoint = format!("{}:{}", options.host, options.port);
        let connect_error = |err: BoxError| {
            FsError::connection(
                ConnectionStage::ConnectToHost,
                format!("unable to connect to host {endpoint}"),
            )
            .caused_by(err)
        };

        let address = endpoint
            .to_socket_addrs()
            .map_err(|err| connect_error(err.into()))?
            .next()
            .ok_or_else(|| connect_error("host resolved to no address".into()))?;
        let tcp = TcpStream::connect_timeout(&address, options.timeout())
            .map_err(|err| connect_error(err.into()))?;
        tcp.set_read_timeout(Some(options.timeout()))
            .and_then(|()| tcp.set_write_timeout(Some(options.timeout())))
            .map_err(|err| connect_error(err.into()))?;

        let mut session = Session::new().map_err(|err| connect_error(err.into()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(options.timeout().as_millis()).unwrap_or(u32::MAX));
        session.handshake().map_err(|err| connect_error(err.into()))?;

        if let Some(expected) = &options.host_fingerprint {
            Self::verify_host(&session, expected)?;
        }
        Self::authenticate(&session, options)?;

        let sftp = session.sftp().map_err(|err| {
            FsError::connection(
                ConnectionStage::OpenSubsystem,
                "unable to open the sftp subsystem",
            )
            .caused_by(err)
        })?;
        debug!(host = %endpoint, "sftp session established");

        Ok(Box::new(Ssh2Transport {
            session,
            sftp,
            closed: false,
        }))
    }
}

pub struct Ssh2Transport {
    session: Session,
    sftp: Sftp,
    closed: bool,
}

impl SftpTransport for Ssh2Transport {
    fn is_connected(&self) -> bool {
        !self.closed && self.session.authenticated()
    }

    fn ping(&mut self) -> Result<(), BoxError> {
        self.session.keepalive_send()?;
        Ok(())
    }

    fn stat(&mut self, path: &str) -> Result<Option<RemoteStat>, BoxError> {
        match self.sftp.stat(Path::new(path)) {
            Ok(stat) => Ok(Some(RemoteStat::from(&stat))),
            Err(err) if matches!(err.code(), ErrorCode::SFTP(NO_SUCH_FILE)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn read_dir(&mut self, path: &str) -> Result<Vec<(String, RemoteStat)>, BoxError> {
        let mut entries = Vec::new();
        for (entry_path, stat) in self.sftp.readdir(Path::new(path))? {
            let Some(name) = entry_path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
            else {
                continue;
            };
            if name == "." || name == ".." {
                continue;
            }
            entries.push((name, RemoteStat::from(&stat)));
        }
        Ok(entries)
    }

    fn download(&mut self, path: &str, sink: &mut dyn Write) -> Result<(), BoxError> {
        let mut file = self.sftp.open(Path::new(path))?;
        io::copy(&mut file, sink)?;
        Ok(())
    }

    fn upload(&mut self, path: &str, source: &mut dyn Read) -> Result<(), BoxError> {
        let mut file = self.sftp.open_mode(
            Path::new(path),
            OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            0o644,
            OpenType::File,
        )?;
        io::copy(source, &mut file)?;
        Ok(())
    }

    fn mkdir(&mut self, path: &str, mode: u32) -> Result<(), BoxError> {
        let mode = i32::try_from(mode)?;
        Ok(self.sftp.mkdir(Path::new(path), mode)?)
    }

    fn rmdir(&mut self, path: &str) -> Result<(), BoxError> {
        Ok(self.sftp.rmdir(Path::new(path))?)
    }

    fn unlink(&mut self, path: &str) -> Result<(), BoxError> {
        Ok(self.sftp.unlink(Path::new(path))?)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), BoxError> {
        Ok(self
            .sftp
            .rename(Path::new(from), Path::new(to), Some(RenameFlags::empty()))?)
    }

    fn chmod(&mut self, path: &str, mode: u32) -> Result<(), BoxError> {
        let stat = FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: Some(mode),
            atime: None,
            mtime: None,
        };
        Ok(self.sftp.setstat(Path::new(path), stat)?)
    }

    fn close(&mut self) -> Result<(), BoxError> {
        self.closed = true;
        Ok(self.session.disconnect(None, "closing connection", None)?)
    }
}
