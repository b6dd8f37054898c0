use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::SftpConnectionOptions;
use crate::errors::{ConnectionStage, FsError, FsResult};
use crate::sftp::transport::{SftpDialer, SftpTransport, Ssh2Dialer};

/// Pause before the second connection attempt; later attempts wait
/// proportionally longer.
const RETRY_DELAY: Duration = Duration::from_millis(120);

/// Health check run before a cached session is reused.
#[derive(Debug, Default, Clone, Copy)]
pub struct SftpConnectivityChecker {
    use_ping: bool,
}

impl SftpConnectivityChecker {
    pub fn new(use_ping: bool) -> Self {
        Self { use_ping }
    }

    pub fn is_connected(&self, transport: &mut dyn SftpTransport) -> bool {
        if !transport.is_connected() {
            return false;
        }
        !self.use_ping || transport.ping().is_ok()
    }
}

/// Lazily dials the session and replaces it when it stops passing the
/// health check.
pub struct SftpConnectionProvider {
    options: SftpConnectionOptions,
    dialer: Box<dyn SftpDialer>,
    checker: SftpConnectivityChecker,
    retry_delay: Duration,
    connection: Option<Box<dyn SftpTransport>>,
}

impl SftpConnectionProvider {
    pub fn new(options: SftpConnectionOptions) -> Self {
        let checker = SftpConnectivityChecker::new(options.use_ping);
        Self {
            options,
            dialer: Box::new(Ssh2Dialer),
            checker,
            retry_delay: RETRY_DELAY,
            connection: None,
        }
    }

    pub fn set_dialer(&mut self, dialer: Box<dyn SftpDialer>) {
        self.dialer = dialer;
    }

    pub fn set_checker(&mut self, checker: SftpConnectivityChecker) {
        self.checker = checker;
    }

    pub fn set_retry_delay(&mut self, delay: Duration) {
        self.retry_delay = delay;
    }

    pub fn provide_connection(&mut self) -> FsResult<&mut dyn SftpTransport> {
        let healthy = match self.connection.as_mut() {
            Some(transport) => self.checker.is_connected(transport.as_mut()),
            None => false,
        };
        if !healthy {
            if let Some(mut stale) = self.connection.take() {
                warn!(host = %self.options.host, "sftp session is no longer connected, reconnecting");
                close_quietly(stale.as_mut());
            }
            self.connection = Some(self.connect()?);
        }

        match self.connection.as_deref_mut() {
            Some(transport) => Ok(transport),
            None => Err(FsError::connection(
                ConnectionStage::HealthCheck,
                "no sftp session available",
            )),
        }
    }

    /// Only failures to reach the host are retried; authentication errors
    /// are returned straight away.
    fn connect(&self) -> FsResult<Box<dyn SftpTransport>> {
        let attempts = self.options.max_tries.max(1);
        let mut attempt = 1;
        loop {
            debug!(host = %self.options.host, attempt, "opening sftp session");
            match self.dialer.dial(&self.options) {
                Ok(transport) => return Ok(transport),
                Err(err @ FsError::Connection {
                    stage: ConnectionStage::ConnectToHost,
                    ..
                }) if attempt < attempts => {
                    warn!(attempt, error = %err, "sftp connect attempt failed");
                    thread::sleep(self.retry_delay * attempt);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.connection.take() {
            close_quietly(transport.as_mut());
        }
    }
}

fn close_quietly(transport: &mut dyn SftpTransport) {
    if let Err(err) = transport.close() {
        warn!(error = %err, "closing sftp session failed");
    }
}
