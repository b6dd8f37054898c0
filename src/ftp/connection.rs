use tracing::{debug, warn};

use crate::config::FtpConnectionOptions;
use crate::errors::{ConnectionStage, FsError, FsResult};
use crate::ftp::transport::{FtpDialer, FtpTransport, SuppaFtpDialer};
use crate::path::PathPrefixer;

/// Decides whether an established connection is still usable.
pub trait ConnectivityChecker: Send {
    fn is_connected(&self, transport: &mut dyn FtpTransport) -> bool;
}

/// Sends `NOOP` and expects reply code 200.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCommandChecker;

impl ConnectivityChecker for NoopCommandChecker {
    fn is_connected(&self, transport: &mut dyn FtpTransport) -> bool {
        matches!(transport.raw("NOOP"), Ok(response) if response.code == 200)
    }
}

/// For servers that answer `NOOP` oddly: a listing of the working
/// directory has to succeed.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawListChecker;

impl ConnectivityChecker for RawListChecker {
    fn is_connected(&self, transport: &mut dyn FtpTransport) -> bool {
        transport.raw_list("./", false).is_ok()
    }
}

/// Dials a transport and brings it into the configured state.
pub struct FtpConnectionProvider {
    dialer: Box<dyn FtpDialer>,
}

impl Default for FtpConnectionProvider {
    fn default() -> Self {
        Self::new(Box::new(SuppaFtpDialer))
    }
}

impl FtpConnectionProvider {
    pub fn new(dialer: Box<dyn FtpDialer>) -> Self {
        Self { dialer }
    }

    /// A transport that fails any setup step is closed before the error is
    /// returned.
    pub fn create_connection(
        &self,
        options: &FtpConnectionOptions,
    ) -> FsResult<Box<dyn FtpTransport>> {
        let mut transport = self.dialer.dial(options)?;
        if let Err(err) = prepare(transport.as_mut(), options) {
            close_quietly(transport.as_mut());
            return Err(err);
        }
        Ok(transport)
    }
}

fn prepare(transport: &mut dyn FtpTransport, options: &FtpConnectionOptions) -> FsResult<()> {
    let endpoint = format!("{}::{}", options.host, options.port);

    transport
        .login(&options.username, &options.password)
        .map_err(|err| {
            FsError::connection(
                ConnectionStage::Authenticate,
                "unable to login/authenticate with ftp",
            )
            .caused_by(err)
        })?;

    if options.utf8 {
        let response = transport.raw("OPTS UTF8 ON").map_err(|err| {
            FsError::connection(
                ConnectionStage::EnableUtf8Mode,
                format!("could not set utf-8 mode for connection: {endpoint}"),
            )
            .caused_by(err)
        })?;
        if !matches!(response.code, 200 | 202) {
            return Err(FsError::connection(
                ConnectionStage::EnableUtf8Mode,
                format!(
                    "could not set utf-8 mode for connection: {endpoint} ({})",
                    response.text()
                ),
            ));
        }
    }

    if let Some(ignore) = options.ignore_passive_address {
        transport.set_use_passive_address(!ignore).map_err(|err| {
            FsError::connection(
                ConnectionStage::SetOption,
                "unable to set ftp option use passive address",
            )
            .caused_by(err)
        })?;
    }

    transport.set_passive(options.passive).map_err(|err| {
        FsError::connection(
            ConnectionStage::MakePassive,
            format!("could not set passive mode for connection: {endpoint}"),
        )
        .caused_by(err)
    })
}

fn close_quietly(transport: &mut dyn FtpTransport) {
    if let Err(err) = transport.close() {
        warn!(error = %err, "closing ftp connection failed");
    }
}

/// Changes into the configured root and pins the working directory the
/// server reports.
fn resolve_connection_root(transport: &mut dyn FtpTransport, root: &str) -> FsResult<String> {
    if !root.is_empty() {
        transport
            .chdir(root)
            .map_err(|err| FsError::RootResolution {
                root: root.to_string(),
                reason: format!("it does not exist: {err}"),
            })?;
    }

    transport.pwd().map_err(|err| FsError::RootResolution {
        root: root.to_string(),
        reason: format!("could not get the current directory: {err}"),
    })
}

/// Borrowed view of a live connection.
pub(crate) struct Session<'a> {
    pub transport: &'a mut dyn FtpTransport,
    pub prefixer: &'a PathPrefixer,
    capabilities: &'a mut ServerCapabilities,
}

impl Session<'_> {
    /// Pure-FTPd needs glob characters in paths escaped.
    pub fn is_pure_ftpd(&mut self) -> bool {
        if let Some(detected) = self.capabilities.pure_ftpd {
            return detected;
        }

        let help = self
            .transport
            .raw("HELP")
            .map(|response| response.text())
            .unwrap_or_default();
        let detected = help.to_ascii_lowercase().contains("pure-ftpd");
        debug!(detected, "probed ftp server for pure-ftpd");
        self.capabilities.pure_ftpd = Some(detected);
        detected
    }

    /// Whether `LIST` accepts `-aln` style options on this server.
    pub fn supports_list_options(&mut self) -> bool {
        if let Some(supported) = self.capabilities.list_options {
            return supported;
        }

        let syst = self
            .transport
            .raw("SYST")
            .map(|response| response.text())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let supported = !syst.contains("filezilla") && !syst.contains("l8");
        debug!(supported, "probed ftp server for list option support");
        self.capabilities.list_options = Some(supported);
        supported
    }
}

/// Server traits detected once and kept across reconnects.
#[derive(Debug, Default)]
struct ServerCapabilities {
    pure_ftpd: Option<bool>,
    list_options: Option<bool>,
}

enum ConnectionState {
    Disconnected,
    Connected {
        transport: Box<dyn FtpTransport>,
        root: String,
        prefixer: PathPrefixer,
    },
}

/// Owns the adapter's single connection and the server capabilities probed
/// over it.
pub(crate) struct ConnectionManager {
    options: FtpConnectionOptions,
    provider: FtpConnectionProvider,
    checker: Box<dyn ConnectivityChecker>,
    state: ConnectionState,
    capabilities: ServerCapabilities,
}

impl ConnectionManager {
    pub fn new(options: FtpConnectionOptions) -> Self {
        let capabilities = ServerCapabilities {
            pure_ftpd: None,
            list_options: options.use_raw_list_options,
        };
        Self {
            options,
            provider: FtpConnectionProvider::default(),
            checker: Box::new(NoopCommandChecker),
            state: ConnectionState::Disconnected,
            capabilities,
        }
    }

    pub fn set_provider(&mut self, provider: FtpConnectionProvider) {
        self.provider = provider;
    }

    pub fn set_checker(&mut self, checker: Box<dyn ConnectivityChecker>) {
        self.checker = checker;
    }

    /// Prefixer of the current connection, without probing it.
    pub fn current_prefixer(&self) -> Option<&PathPrefixer> {
        match &self.state {
            ConnectionState::Connected { prefixer, .. } => Some(prefixer),
            ConnectionState::Disconnected => None,
        }
    }

    /// Hands out a usable connection, connecting on first use and replacing
    /// the connection once when its health check fails.
    pub fn connection(&mut self) -> FsResult<Session<'_>> {
        self.ensure_connected()?;
        match &mut self.state {
            ConnectionState::Connected {
                transport,
                prefixer,
                ..
            } => Ok(Session {
                transport: transport.as_mut(),
                prefixer,
                capabilities: &mut self.capabilities,
            }),
            ConnectionState::Disconnected => Err(FsError::connection(
                ConnectionStage::HealthCheck,
                "no ftp connection available",
            )),
        }
    }

    fn ensure_connected(&mut self) -> FsResult<()> {
        if matches!(self.state, ConnectionState::Disconnected) {
            self.state = self.connect()?;
            return Ok(());
        }

        if self.is_healthy() {
            self.return_to_root();
            return Ok(());
        }

        warn!(host = %self.options.host, "ftp health check failed, reconnecting");
        self.disconnect();
        self.state = self.connect()?;
        if self.is_healthy() {
            return Ok(());
        }

        self.disconnect();
        Err(FsError::connection(
            ConnectionStage::HealthCheck,
            "connection failed its health check after reconnecting",
        ))
    }

    fn connect(&self) -> FsResult<ConnectionState> {
        debug!(host = %self.options.host, port = self.options.port, "opening ftp connection");
        let mut transport = self.provider.create_connection(&self.options)?;
        let root = match resolve_connection_root(transport.as_mut(), &self.options.root) {
            Ok(root) => root,
            Err(err) => {
                close_quietly(transport.as_mut());
                return Err(err);
            }
        };
        debug!(root = %root, "resolved ftp connection root");

        let prefixer = PathPrefixer::new(&root, '/');
        Ok(ConnectionState::Connected {
            transport,
            root,
            prefixer,
        })
    }

    fn is_healthy(&mut self) -> bool {
        match &mut self.state {
            ConnectionState::Connected { transport, .. } => {
                self.checker.is_connected(transport.as_mut())
            }
            ConnectionState::Disconnected => false,
        }
    }

    fn return_to_root(&mut self) {
        if let ConnectionState::Connected {
            transport, root, ..
        } = &mut self.state
        {
            if let Err(err) = transport.chdir(root) {
                warn!(root = %root, error = %err, "unable to return to the ftp connection root");
            }
        }
    }

    pub fn disconnect(&mut self) {
        if let ConnectionState::Connected { mut transport, .. } =
            std::mem::replace(&mut self.state, ConnectionState::Disconnected)
        {
            close_quietly(transport.as_mut());
        }
    }
}
