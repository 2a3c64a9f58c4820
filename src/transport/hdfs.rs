// src/transport/hdfs.rs

//! HDFS backend over the external `hdfs` CLI.
//!
//! The native RPC protocol stays outside this layer: reads pipe
//! `hdfs dfs -cat <path>` stdout, writes pipe into `hdfs dfs -put -f - <path>`
//! stdin. The child is killed if a stream is dropped mid-transfer.

use std::process::Stdio;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::{TransportReader, TransportWriter};
use crate::error::{Error, Result};

pub(crate) const BACKEND: &str = "hdfs";

pub struct HdfsReader {
    child: Child,
    stdout: ChildStdout,
    eof: bool,
}

impl HdfsReader {
    pub(crate) fn open(path: &str) -> Result<Self> {
        Self::spawn("hdfs", &["dfs", "-cat", path])
    }

    fn spawn(program: &str, args: &[&str]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::transport_with_source(BACKEND, format!("failed to spawn {program}"), e)
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::transport(BACKEND, "child has no stdout"))?;
        Ok(Self {
            child,
            stdout,
            eof: false,
        })
    }
}

#[async_trait]
impl TransportReader for HdfsReader {
    async fn read(&mut self, len: usize) -> Result<Bytes> {
        if self.eof {
            return Ok(Bytes::new());
        }
        let mut buf = BytesMut::with_capacity(len);
        while buf.len() < len {
            let n = self
                .stdout
                .read_buf(&mut buf)
                .await
                .map_err(|e| Error::transport_with_source(BACKEND, "read from child failed", e))?;
            if n == 0 {
                self.eof = true;
                let status = self.child.wait().await.map_err(|e| {
                    Error::transport_with_source(BACKEND, "failed to wait for child", e)
                })?;
                if !status.success() {
                    return Err(Error::transport(
                        BACKEND,
                        format!("child exited with {status}"),
                    ));
                }
                break;
            }
        }
        Ok(buf.freeze())
    }
}

pub struct HdfsWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    written: u64,
}

impl HdfsWriter {
    pub(crate) fn open(path: &str) -> Result<Self> {
        Self::spawn("hdfs", &["dfs", "-put", "-f", "-", path])
    }

    fn spawn(program: &str, args: &[&str]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::transport_with_source(BACKEND, format!("failed to spawn {program}"), e)
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::transport(BACKEND, "child has no stdin"))?;
        Ok(Self {
            child,
            stdin: Some(stdin),
            written: 0,
        })
    }
}

#[async_trait]
impl TransportWriter for HdfsWriter {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::io("write on a finished stream"))?;
        stdin
            .write_all(data)
            .await
            .map_err(|e| Error::transport_with_source(BACKEND, "write to child failed", e))?;
        self.written += data.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        // Closing stdin signals end of input.
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| Error::transport_with_source(BACKEND, "failed to wait for child", e))?;
        if !status.success() {
            return Err(Error::transport(
                BACKEND,
                format!("child exited with {status}"),
            ));
        }
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }
}
