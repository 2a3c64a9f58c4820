// src/transport/ssh.rs

//! SFTP backend.
//!
//! `ssh2` is a blocking library, so each open stream runs a dedicated
//! worker thread that owns the session and the remote file handle. The
//! async facade sends it read/write/seek/finish commands over a channel and
//! awaits oneshot replies; when the facade is dropped the channel closes
//! and the worker exits, releasing the connection.

use std::io::{Read, Seek, SeekFrom, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use super::{TransportReader, TransportWriter};
use crate::error::{Error, Result};
use crate::mode::Direction;
use crate::params::SshParams;

pub(crate) const BACKEND: &str = "ssh";

/// Connection settings resolved from the URI and [`SshParams`]; URI
/// components win on collision.
#[derive(Debug, Clone)]
pub(crate) struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
    pub connect_timeout: Option<Duration>,
    pub path: String,
}

impl SshTarget {
    pub(crate) fn resolve(
        host: &str,
        port: Option<u16>,
        user: Option<&str>,
        password: Option<&str>,
        path: &str,
        params: &SshParams,
    ) -> Result<Self> {
        if user.is_some() && params.user.is_some() {
            tracing::warn!("URI user overrides ssh.user parameter");
        }
        let resolved_user = user
            .map(str::to_string)
            .or_else(|| params.user.clone())
            .or_else(|| std::env::var("USER").ok())
            .ok_or_else(|| Error::transport(BACKEND, "no user given and $USER is unset"))?;
        Ok(Self {
            host: host.to_string(),
            port: port.or(params.port).unwrap_or(crate::uri::DEFAULT_SSH_PORT),
            user: resolved_user,
            password: password.map(str::to_string).or_else(|| params.password.clone()),
            private_key: params.private_key.clone(),
            connect_timeout: params.connect_timeout_secs.map(Duration::from_secs),
            path: path.to_string(),
        })
    }
}

enum SftpRequest {
    Read {
        len: usize,
        reply: oneshot::Sender<std::io::Result<Vec<u8>>>,
    },
    Write {
        data: Vec<u8>,
        reply: oneshot::Sender<std::io::Result<()>>,
    },
    Seek {
        pos: SeekFrom,
        reply: oneshot::Sender<std::io::Result<u64>>,
    },
    Finish {
        reply: oneshot::Sender<std::io::Result<()>>,
    },
}

/// Connects, authenticates and opens the remote file, then serves requests
/// until the channel closes.
fn worker_main(
    target: SshTarget,
    direction: Direction,
    ready: oneshot::Sender<std::io::Result<()>>,
    requests: std_mpsc::Receiver<SftpRequest>,
) {
    let mut file = match connect(&target, direction) {
        Ok(file) => {
            let _ = ready.send(Ok(()));
            file
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while let Ok(request) = requests.recv() {
        match request {
            SftpRequest::Read { len, reply } => {
                let mut buf = vec![0u8; len];
                let result = file.read(&mut buf).map(|n| {
                    buf.truncate(n);
                    buf
                });
                let _ = reply.send(result);
            }
            SftpRequest::Write { data, reply } => {
                let _ = reply.send(file.write_all(&data));
            }
            SftpRequest::Seek { pos, reply } => {
                let _ = reply.send(file.seek(pos));
            }
            SftpRequest::Finish { reply } => {
                let result = file.fsync().map_err(std::io::Error::from);
                let _ = reply.send(result);
                return;
            }
        }
    }
    // Facade dropped: the file and session close with this thread.
}

fn connect(target: &SshTarget, direction: Direction) -> std::io::Result<ssh2::File> {
    let addr = format!("{}:{}", target.host, target.port);
    let tcp = match target.connect_timeout {
        Some(timeout) => {
            let mut addrs = std::net::ToSocketAddrs::to_socket_addrs(&addr)?;
            let addr = addrs.next().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "host did not resolve")
            })?;
            TcpStream::connect_timeout(&addr, timeout)?
        }
        None => TcpStream::connect(&addr)?,
    };

    let mut session = ssh2::Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake()?;

    if let Some(password) = &target.password {
        session.userauth_password(&target.user, password)?;
    } else if let Some(key) = &target.private_key {
        session.userauth_pubkey_file(&target.user, None, key, None)?;
    } else {
        session.userauth_agent(&target.user)?;
    }

    let sftp = session.sftp()?;
    let path = std::path::Path::new(&target.path);
    let file = match direction {
        Direction::Read => sftp.open(path)?,
        Direction::Write => sftp.open_mode(
            path,
            ssh2::OpenFlags::WRITE | ssh2::OpenFlags::CREATE | ssh2::OpenFlags::TRUNCATE,
            0o644,
            ssh2::OpenType::File,
        )?,
        Direction::Append => sftp.open_mode(
            path,
            ssh2::OpenFlags::WRITE | ssh2::OpenFlags::CREATE | ssh2::OpenFlags::APPEND,
            0o644,
            ssh2::OpenType::File,
        )?,
    };
    Ok(file)
}

/// Spawns the worker and waits for the connection to come up.
async fn spawn_worker(
    target: SshTarget,
    direction: Direction,
) -> Result<std_mpsc::Sender<SftpRequest>> {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (request_tx, request_rx) = std_mpsc::channel();

    std::thread::Builder::new()
        .name("unistream-sftp".to_string())
        .spawn(move || worker_main(target, direction, ready_tx, request_rx))
        .map_err(|e| Error::transport_with_source(BACKEND, "failed to spawn worker", e))?;

    match ready_rx.await {
        Ok(Ok(())) => Ok(request_tx),
        Ok(Err(e)) => Err(Error::transport_with_source(BACKEND, "connection failed", e)),
        Err(_) => Err(Error::transport(BACKEND, "worker exited before connecting")),
    }
}

async fn roundtrip<T>(
    tx: &std_mpsc::Sender<SftpRequest>,
    make: impl FnOnce(oneshot::Sender<std::io::Result<T>>) -> SftpRequest,
) -> Result<T> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(make(reply_tx))
        .map_err(|_| Error::transport(BACKEND, "worker is gone"))?;
    match reply_rx.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::transport_with_source(BACKEND, "remote I/O failed", e)),
        Err(_) => Err(Error::transport(BACKEND, "worker dropped the request")),
    }
}

pub struct SshReader {
    tx: std_mpsc::Sender<SftpRequest>,
}

impl SshReader {
    pub(crate) async fn open(target: SshTarget) -> Result<Self> {
        let tx = spawn_worker(target, Direction::Read).await?;
        Ok(Self { tx })
    }
}

#[async_trait]
impl TransportReader for SshReader {
    async fn read(&mut self, len: usize) -> Result<Bytes> {
        let data = roundtrip(&self.tx, |reply| SftpRequest::Read { len, reply }).await?;
        Ok(Bytes::from(data))
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        roundtrip(&self.tx, |reply| SftpRequest::Seek { pos, reply }).await
    }

    fn seekable(&self) -> bool {
        true
    }
}

pub struct SshWriter {
    tx: Option<std_mpsc::Sender<SftpRequest>>,
    written: u64,
}

impl SshWriter {
    pub(crate) async fn open(target: SshTarget, direction: Direction) -> Result<Self> {
        debug_assert!(matches!(direction, Direction::Write | Direction::Append));
        let tx = spawn_worker(target, direction).await?;
        Ok(Self {
            tx: Some(tx),
            written: 0,
        })
    }
}

#[async_trait]
impl TransportWriter for SshWriter {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::io("write on a finished stream"))?;
        let len = data.len() as u64;
        let data = data.to_vec();
        roundtrip(tx, |reply| SftpRequest::Write { data, reply }).await?;
        self.written += len;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| Error::io("finish on a finished stream"))?;
        roundtrip(&tx, |reply| SftpRequest::Finish { reply }).await
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }
}
