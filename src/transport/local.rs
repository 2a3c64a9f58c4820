// src/transport/local.rs

//! Local filesystem backend.
//!
//! A thin passthrough to `tokio::fs` streams. Reads of large files can go
//! through a memory map when enabled in [`LocalParams`]; behavior is
//! identical, only the I/O path differs.

use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use memmap2::Mmap;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};

use super::{TransportReader, TransportWriter};
use crate::error::{Error, Result};
use crate::params::LocalParams;

/// Opens a local file for reading.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or mapped.
pub async fn open_read(path: &Path, params: &LocalParams) -> Result<Box<dyn TransportReader>> {
    let file = File::open(path)
        .await
        .map_err(|e| Error::io_with_source(format!("failed to open {}", path.display()), e))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| Error::io_with_source(format!("failed to stat {}", path.display()), e))?
        .len();

    if params.use_mmap && size >= params.mmap_threshold {
        let std_file = file.into_std().await;
        // SAFETY: the file is opened read-only and the map lives as long as
        // the reader.
        let mmap = unsafe { Mmap::map(&std_file) }
            .map_err(|e| Error::io_with_source(format!("failed to map {}", path.display()), e))?;
        return Ok(Box::new(MmapReader { mmap, pos: 0 }));
    }

    Ok(Box::new(LocalReader { file, size }))
}

/// Opens a local file for writing, creating parent directories as needed.
///
/// # Errors
///
/// Returns an error if the file cannot be created or opened.
pub async fn open_write(
    path: &Path,
    append: bool,
    params: &LocalParams,
) -> Result<Box<dyn TransportWriter>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::io_with_source(format!("failed to create {}", parent.display()), e)
            })?;
        }
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true);
    if append {
        options.append(true);
    } else {
        options.truncate(true);
    }
    let file = options
        .open(path)
        .await
        .map_err(|e| Error::io_with_source(format!("failed to create {}", path.display()), e))?;

    Ok(Box::new(LocalWriter {
        writer: Some(BufWriter::with_capacity(params.buffer_size, file)),
        written: 0,
    }))
}

struct LocalReader {
    file: File,
    size: u64,
}

#[async_trait]
impl TransportReader for LocalReader {
    async fn read(&mut self, len: usize) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(len);
        while buf.len() < len {
            let n = self.file.read_buf(&mut buf).await?;
            if n == 0 {
                break;
            }
        }
        Ok(buf.freeze())
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.file.seek(pos).await?)
    }

    fn seekable(&self) -> bool {
        true
    }
}

impl LocalReader {
    #[allow(dead_code)]
    fn size(&self) -> u64 {
        self.size
    }
}

struct MmapReader {
    mmap: Mmap,
    pos: usize,
}

#[async_trait]
impl TransportReader for MmapReader {
    async fn read(&mut self, len: usize) -> Result<Bytes> {
        let remaining = &self.mmap[self.pos.min(self.mmap.len())..];
        let take = len.min(remaining.len());
        let chunk = Bytes::copy_from_slice(&remaining[..take]);
        self.pos += take;
        Ok(chunk)
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.mmap.len() as i64 + offset,
            SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if new_pos < 0 {
            return Err(Error::io("seek to negative position"));
        }
        self.pos = new_pos as usize;
        Ok(new_pos as u64)
    }

    fn seekable(&self) -> bool {
        true
    }
}

struct LocalWriter {
    writer: Option<BufWriter<File>>,
    written: u64,
}

#[async_trait]
impl TransportWriter for LocalWriter {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::io("write on a finished stream"))?;
        writer.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| Error::io("finish on a finished stream"))?;
        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        let params = LocalParams::default();

        let mut writer = open_write(&path, false, &params).await.unwrap();
        writer.write_all(b"hello ").await.unwrap();
        writer.write_all(b"world").await.unwrap();
        assert_eq!(writer.bytes_written(), 11);
        writer.finish().await.unwrap();

        let mut reader = open_read(&path, &params).await.unwrap();
        let data = reader.read(64).await.unwrap();
        assert_eq!(&data[..], b"hello world");
        assert!(reader.read(64).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seek() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seek.bin");
        let params = LocalParams::default();

        let mut writer = open_write(&path, false, &params).await.unwrap();
        writer.write_all(b"0123456789").await.unwrap();
        writer.finish().await.unwrap();

        let mut reader = open_read(&path, &params).await.unwrap();
        assert!(reader.seekable());
        assert_eq!(reader.seek(SeekFrom::Start(5)).await.unwrap(), 5);
        assert_eq!(&reader.read(2).await.unwrap()[..], b"56");
        assert_eq!(reader.seek(SeekFrom::End(-3)).await.unwrap(), 7);
        assert_eq!(&reader.read(10).await.unwrap()[..], b"789");
    }

    #[tokio::test]
    async fn test_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.txt");
        let params = LocalParams::default();

        let writer = open_write(&path, false, &params).await.unwrap();
        let mut writer = writer;
        writer.write_all(b"one\n").await.unwrap();
        writer.finish().await.unwrap();

        let mut writer = open_write(&path, true, &params).await.unwrap();
        writer.write_all(b"two\n").await.unwrap();
        writer.finish().await.unwrap();

        let mut reader = open_read(&path, &params).await.unwrap();
        assert_eq!(&reader.read(64).await.unwrap()[..], b"one\ntwo\n");
    }

    #[tokio::test]
    async fn test_mmap_read_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let params = LocalParams {
            use_mmap: true,
            mmap_threshold: 16,
            ..Default::default()
        };

        let payload: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        let mut writer = open_write(&path, false, &params).await.unwrap();
        writer.write_all(&payload).await.unwrap();
        writer.finish().await.unwrap();

        let mut reader = open_read(&path, &params).await.unwrap();
        reader.seek(SeekFrom::Start(100)).await.unwrap();
        let chunk = reader.read(50).await.unwrap();
        assert_eq!(&chunk[..], &payload[100..150]);
    }

    #[tokio::test]
    async fn test_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c.txt");
        let params = LocalParams::default();

        let mut writer = open_write(&path, false, &params).await.unwrap();
        writer.write_all(b"x").await.unwrap();
        writer.finish().await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = open_read(&dir.path().join("nope"), &LocalParams::default()).await;
        assert!(result.is_err());
    }
}
