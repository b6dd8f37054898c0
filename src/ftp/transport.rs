use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};

use suppaftp::types::{FileType, FormatControl};
use suppaftp::{FtpError, FtpStream, Mode, Status};
use tracing::debug;

use crate::config::{FtpConnectionOptions, TransferMode};
use crate::errors::{BoxError, ConnectionStage, FsError, FsResult};

/// Reply to a raw control-channel command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpResponse {
    pub code: u32,
    pub lines: Vec<String>,
}

impl FtpResponse {
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }
}

/// Control-channel operations the adapter needs from an FTP client.
pub trait FtpTransport: Send {
    fn login(&mut self, username: &str, password: &str) -> Result<(), BoxError>;

    fn raw(&mut self, command: &str) -> Result<FtpResponse, BoxError>;

    fn set_passive(&mut self, passive: bool) -> Result<(), BoxError>;

    /// Whether the address announced in a PASV reply is used for the data
    /// channel, as opposed to the control connection's peer address.
    fn set_use_passive_address(&mut self, enabled: bool) -> Result<(), BoxError>;

    fn chdir(&mut self, path: &str) -> Result<(), BoxError>;

    fn pwd(&mut self) -> Result<String, BoxError>;

    /// `LIST` with `argument` passed verbatim: options, then the path.
    fn raw_list(&mut self, argument: &str, recursive: bool) -> Result<Vec<String>, BoxError>;

    fn size(&mut self, path: &str) -> Result<u64, BoxError>;

    fn mdtm(&mut self, path: &str) -> Result<i64, BoxError>;

    fn mkdir(&mut self, path: &str) -> Result<(), BoxError>;

    fn rmdir(&mut self, path: &str) -> Result<(), BoxError>;

    fn delete(&mut self, path: &str) -> Result<(), BoxError>;

    fn rename(&mut self, from: &str, to: &str) -> Result<(), BoxError>;

    fn chmod(&mut self, mode: u32, path: &str) -> Result<(), BoxError>;

    fn get(&mut self, path: &str, mode: TransferMode, sink: &mut dyn Write) -> Result<(), BoxError>;

    fn put(
        &mut self,
        path: &str,
        mode: TransferMode,
        source: &mut dyn Read,
    ) -> Result<(), BoxError>;

    fn close(&mut self) -> Result<(), BoxError>;
}

/// Opens the control connection to a host.
pub trait FtpDialer: Send {
    fn dial(&self, options: &FtpConnectionOptions) -> FsResult<Box<dyn FtpTransport>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SuppaFtpDialer;

impl FtpDialer for SuppaFtpDialer {
    fn dial(&self, options: &FtpConnectionOptions) -> FsResult<Box<dyn FtpTransport>> {
        let host = format!("{}:{}", options.host, options.port);
        if options.ssl {
            return Err(FsError::connection(
                ConnectionStage::ConnectToHost,
                format!("unable to connect to host {host} using ssl: tls transport is not available"),
            ));
        }

        let address = resolve(&host).map_err(|err| {
            FsError::connection(
                ConnectionStage::ConnectToHost,
                format!("unable to resolve host {host}"),
            )
            .caused_by(err)
        })?;
        let stream = FtpStream::connect_timeout(address, options.timeout()).map_err(|err| {
            FsError::connection(
                ConnectionStage::ConnectToHost,
                format!("unable to connect to host {host}"),
            )
            .caused_by(err)
        })?;
        debug!(host = %host, "ftp control connection established");

        Ok(Box::new(SuppaFtpTransport { stream }))
    }
}

fn resolve(host: &str) -> io::Result<SocketAddr> {
    host.to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host resolved to no address"))
}

pub struct SuppaFtpTransport {
    stream: FtpStream,
}

impl SuppaFtpTransport {
    fn transfer_type(&mut self, mode: TransferMode) -> Result<(), FtpError> {
        let file_type = match mode {
            TransferMode::Ascii => FileType::Ascii(FormatControl::Default),
            TransferMode::Binary => FileType::Binary,
        };
        self.stream.transfer_type(file_type)
    }
}

impl FtpTransport for SuppaFtpTransport {
    fn login(&mut self, username: &str, password: &str) -> Result<(), BoxError> {
        Ok(self.stream.login(username, password)?)
    }

    fn raw(&mut self, command: &str) -> Result<FtpResponse, BoxError> {
        let response = match self
            .stream
            .custom_command(command, &[Status::CommandOk])
        {
            Ok(response) => response,
            Err(FtpError::UnexpectedResponse(response)) => response,
            Err(err) => return Err(err.into()),
        };
        let lines = String::from_utf8_lossy(&response.body)
            .lines()
            .map(str::to_string)
            .collect();
        Ok(FtpResponse {
            code: response.status.code(),
            lines,
        })
    }

    fn set_passive(&mut self, passive: bool) -> Result<(), BoxError> {
        self.stream.set_mode(if passive {
            Mode::Passive
        } else {
            Mode::Active
        });
        Ok(())
    }

    fn set_use_passive_address(&mut self, enabled: bool) -> Result<(), BoxError> {
        self.stream.set_passive_nat_workaround(!enabled);
        Ok(())
    }

    fn chdir(&mut self, path: &str) -> Result<(), BoxError> {
        Ok(self.stream.cwd(path)?)
    }

    fn pwd(&mut self) -> Result<String, BoxError> {
        Ok(self.stream.pwd()?)
    }

    fn raw_list(&mut self, argument: &str, _recursive: bool) -> Result<Vec<String>, BoxError> {
        let argument = (!argument.is_empty()).then_some(argument);
        Ok(self.stream.list(argument)?)
    }

    fn size(&mut self, path: &str) -> Result<u64, BoxError> {
        Ok(self.stream.size(path)? as u64)
    }

    fn mdtm(&mut self, path: &str) -> Result<i64, BoxError> {
        Ok(self.stream.mdtm(path)?.and_utc().timestamp())
    }

    fn mkdir(&mut self, path: &str) -> Result<(), BoxError> {
        Ok(self.stream.mkdir(path)?)
    }

    fn rmdir(&mut self, path: &str) -> Result<(), BoxError> {
        Ok(self.stream.rmdir(path)?)
    }

    fn delete(&mut self, path: &str) -> Result<(), BoxError> {
        Ok(self.stream.rm(path)?)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), BoxError> {
        Ok(self.stream.rename(from, to)?)
    }

    fn chmod(&mut self, mode: u32, path: &str) -> Result<(), BoxError> {
        let response = self.raw(&format!("SITE CHMOD {mode:o} {path}"))?;
        if response.code != Status::CommandOk.code() {
            return Err(format!("chmod refused: {}", response.text()).into());
        }
        Ok(())
    }

    fn get(&mut self, path: &str, mode: TransferMode, sink: &mut dyn Write) -> Result<(), BoxError> {
        self.transfer_type(mode)?;
        let mut buffer = self.stream.retr_as_buffer(path)?;
        io::copy(&mut buffer, sink)?;
        Ok(())
    }

    fn put(
        &mut self,
        path: &str,
        mode: TransferMode,
        mut source: &mut dyn Read,
    ) -> Result<(), BoxError> {
        self.transfer_type(mode)?;
        self.stream.put_file(path, &mut source)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), BoxError> {
        Ok(self.stream.quit()?)
    }
}
