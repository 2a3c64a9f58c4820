// src/transport/s3/writer.rs

//! Multipart upload state machine.
//!
//! The writer buffers appends and flushes exact `min_part_size` slices as
//! numbered parts; the final part (any size) goes out on `finish` together
//! with `CompleteMultipartUpload`. A stream that never saw a byte is
//! finalized as one empty single-shot PUT, so no empty multipart upload is
//! ever created. Any surfaced upload failure aborts the upload best-effort
//! and poisons the writer; dropping an unfinished writer spawns the same
//! best-effort abort.

use std::sync::Arc;

use async_trait::async_trait;

use super::{S3Api, UploadPart, BACKEND};
use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::params::{S3Params, S3_MAX_PART_COUNT, S3_MAX_PART_SIZE, S3_MIN_PART_SIZE};
use crate::transport::TransportWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Completed,
    Aborted,
}

pub struct S3Writer {
    api: Arc<dyn S3Api>,
    multipart: bool,
    min_part_size: usize,
    buffer: ByteBuffer,
    upload_id: Option<String>,
    parts: Vec<UploadPart>,
    next_part_number: i32,
    written: u64,
    state: WriterState,
}

impl std::fmt::Debug for S3Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Writer")
            .field("multipart", &self.multipart)
            .field("min_part_size", &self.min_part_size)
            .field("upload_id", &self.upload_id)
            .field("parts", &self.parts)
            .field("next_part_number", &self.next_part_number)
            .field("written", &self.written)
            .field("state", &self.state)
            .finish()
    }
}

impl S3Writer {
    /// Creates a writer.
    ///
    /// # Errors
    ///
    /// Returns `LimitExceeded` when `min_part_size` is outside the service
    /// bounds of 5 MiB ..= 5 GiB.
    pub(crate) fn new(api: Arc<dyn S3Api>, params: &S3Params) -> Result<Self> {
        if params.min_part_size < S3_MIN_PART_SIZE {
            return Err(Error::limit_exceeded(
                "min_part_size below the 5 MiB service minimum",
            ));
        }
        if params.min_part_size as u64 > S3_MAX_PART_SIZE {
            return Err(Error::limit_exceeded(
                "min_part_size above the 5 GiB service maximum",
            ));
        }
        Ok(Self {
            api,
            multipart: params.multipart_upload,
            min_part_size: params.min_part_size,
            buffer: ByteBuffer::new(),
            upload_id: None,
            parts: Vec::new(),
            next_part_number: 1,
            written: 0,
            state: WriterState::Open,
        })
    }

    /// Uploads `size` buffered bytes as the next part.
    async fn flush_part(&mut self, size: usize) -> Result<()> {
        if self.next_part_number > S3_MAX_PART_COUNT {
            self.abort_best_effort().await;
            return Err(Error::limit_exceeded(format!(
                "multipart upload exceeds {S3_MAX_PART_COUNT} parts"
            )));
        }

        let upload_id = match &self.upload_id {
            Some(id) => id.clone(),
            None => return Err(Error::transport(BACKEND, "no multipart upload in flight")),
        };
        let part_number = self.next_part_number;
        let data = self.buffer.read(size);
        debug_assert!(!data.is_empty());

        match self.api.upload_part(&upload_id, part_number, data).await {
            Ok(etag) => {
                tracing::debug!(part_number, etag = %etag, "uploaded part");
                self.parts.push(UploadPart { part_number, etag });
                self.next_part_number += 1;
                Ok(())
            }
            Err(e) => {
                self.abort_best_effort().await;
                Err(e)
            }
        }
    }

    /// Issues `AbortMultipartUpload` if one is in flight; failures are
    /// logged, never re-raised.
    async fn abort_best_effort(&mut self) {
        self.state = WriterState::Aborted;
        if let Some(upload_id) = self.upload_id.take() {
            if let Err(e) = self.api.abort_multipart_upload(&upload_id).await {
                tracing::warn!(error = %e, "failed to abort multipart upload");
            }
        }
    }
}

#[async_trait]
impl TransportWriter for S3Writer {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self.state {
            WriterState::Open => {}
            WriterState::Completed => return Err(Error::io("write on a finished stream")),
            WriterState::Aborted => return Err(Error::io("write on an aborted stream")),
        }
        if data.is_empty() {
            return Ok(());
        }

        if !self.multipart {
            // Single-shot path: everything stays buffered until finish.
            if self.written + data.len() as u64 > S3_MAX_PART_SIZE {
                self.state = WriterState::Aborted;
                return Err(Error::limit_exceeded(
                    "single-part upload larger than 5 GiB",
                ));
            }
            self.buffer.write(data);
            self.written += data.len() as u64;
            return Ok(());
        }

        if self.upload_id.is_none() {
            match self.api.create_multipart_upload().await {
                Ok(id) => {
                    tracing::debug!(upload_id = %id, "initiated multipart upload");
                    self.upload_id = Some(id);
                }
                Err(e) => {
                    self.state = WriterState::Aborted;
                    return Err(e);
                }
            }
        }

        self.buffer.write(data);
        self.written += data.len() as u64;

        while self.buffer.len() >= self.min_part_size {
            self.flush_part(self.min_part_size).await?;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        match self.state {
            WriterState::Open => {}
            WriterState::Completed => return Ok(()),
            WriterState::Aborted => return Err(Error::io("finish on an aborted stream")),
        }

        if !self.multipart {
            let data = self.buffer.read(self.buffer.len());
            self.api.put_object(data).await?;
            self.state = WriterState::Completed;
            return Ok(());
        }

        let upload_id = match self.upload_id.clone() {
            // No byte was ever written: a single empty PUT, never an empty
            // multipart upload.
            None => {
                self.api.put_object(bytes::Bytes::new()).await?;
                self.state = WriterState::Completed;
                return Ok(());
            }
            Some(id) => id,
        };

        if !self.buffer.is_empty() || self.parts.is_empty() {
            let remainder = self.buffer.len();
            self.flush_part(remainder).await?;
        }

        match self
            .api
            .complete_multipart_upload(&upload_id, &self.parts)
            .await
        {
            Ok(()) => {
                self.state = WriterState::Completed;
                self.upload_id = None;
                Ok(())
            }
            Err(e) => {
                self.abort_best_effort().await;
                Err(e)
            }
        }
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl Drop for S3Writer {
    fn drop(&mut self) {
        if self.state != WriterState::Open {
            return;
        }
        if let Some(upload_id) = self.upload_id.take() {
            tracing::warn!(
                upload_id = %upload_id,
                "S3 writer dropped without finish; aborting multipart upload"
            );
            let api = self.api.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = api.abort_multipart_upload(&upload_id).await {
                        tracing::warn!(error = %e, "failed to abort multipart upload");
                    }
                });
            } else {
                tracing::warn!("no async runtime available; multipart upload leaked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    const MIB: usize = 1024 * 1024;

    #[derive(Default)]
    struct FakeState {
        upload_id: Option<String>,
        parts: Vec<(i32, Bytes)>,
        completed_with: Option<Vec<UploadPart>>,
        complete_calls: usize,
        aborted: bool,
        single_puts: Vec<Bytes>,
        fail_part: Option<i32>,
    }

    #[derive(Default)]
    struct FakeApi {
        state: Mutex<FakeState>,
        abort_seen: AtomicBool,
    }

    impl FakeApi {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn failing_on_part(part: i32) -> Arc<Self> {
            let api = Self::default();
            api.state.lock().unwrap().fail_part = Some(part);
            Arc::new(api)
        }

        fn object_bytes(&self) -> Vec<u8> {
            let state = self.state.lock().unwrap();
            if let Some(put) = state.single_puts.last() {
                return put.to_vec();
            }
            let mut parts = state.parts.clone();
            parts.sort_by_key(|(n, _)| *n);
            parts.iter().flat_map(|(_, d)| d.to_vec()).collect()
        }
    }

    #[async_trait]
    impl S3Api for FakeApi {
        async fn put_object(&self, data: Bytes) -> Result<()> {
            self.state.lock().unwrap().single_puts.push(data);
            Ok(())
        }

        async fn create_multipart_upload(&self) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            assert!(state.upload_id.is_none(), "upload initiated twice");
            state.upload_id = Some("upload-1".to_string());
            Ok("upload-1".to_string())
        }

        async fn upload_part(
            &self,
            upload_id: &str,
            part_number: i32,
            data: Bytes,
        ) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            assert_eq!(upload_id, "upload-1");
            if state.fail_part == Some(part_number) {
                return Err(Error::transport(BACKEND, "injected part failure"));
            }
            state.parts.push((part_number, data));
            Ok(format!("etag-{part_number}"))
        }

        async fn complete_multipart_upload(
            &self,
            upload_id: &str,
            parts: &[UploadPart],
        ) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            assert_eq!(upload_id, "upload-1");
            state.complete_calls += 1;
            state.completed_with = Some(parts.to_vec());
            Ok(())
        }

        async fn abort_multipart_upload(&self, _upload_id: &str) -> Result<()> {
            self.state.lock().unwrap().aborted = true;
            self.abort_seen.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn small_part_params() -> S3Params {
        S3Params {
            min_part_size: 5 * MIB,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_twelve_mib_in_small_writes_makes_three_parts() {
        let api = FakeApi::new();
        let mut writer = Box::new(S3Writer::new(api.clone(), &small_part_params()).unwrap());

        let payload: Vec<u8> = (0..12 * MIB).map(|i| (i % 241) as u8).collect();
        for chunk in payload.chunks(1024) {
            writer.write_all(chunk).await.unwrap();
        }
        assert_eq!(writer.bytes_written(), 12 * MIB as u64);
        writer.finish().await.unwrap();

        let state = api.state.lock().unwrap();
        assert_eq!(state.complete_calls, 1);
        let completed = state.completed_with.as_ref().unwrap();
        assert_eq!(
            completed.iter().map(|p| p.part_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(completed.iter().all(|p| !p.etag.is_empty()));
        let sizes: Vec<usize> = state.parts.iter().map(|(_, d)| d.len()).collect();
        assert_eq!(sizes, vec![5 * MIB, 5 * MIB, 2 * MIB]);
        drop(state);
        assert_eq!(api.object_bytes(), payload);
    }

    #[tokio::test]
    async fn test_exactly_min_part_size_is_single_part() {
        let api = FakeApi::new();
        let mut writer = Box::new(S3Writer::new(api.clone(), &small_part_params()).unwrap());

        writer.write_all(&vec![7u8; 5 * MIB]).await.unwrap();
        writer.finish().await.unwrap();

        let state = api.state.lock().unwrap();
        assert_eq!(state.parts.len(), 1);
        assert_eq!(state.parts[0].1.len(), 5 * MIB);
        assert_eq!(state.complete_calls, 1);
        assert!(state.single_puts.is_empty());
    }

    #[tokio::test]
    async fn test_small_payload_still_uses_multipart() {
        let api = FakeApi::new();
        let mut writer = Box::new(S3Writer::new(api.clone(), &small_part_params()).unwrap());

        writer.write_all(b"tiny").await.unwrap();
        writer.finish().await.unwrap();

        let state = api.state.lock().unwrap();
        assert_eq!(state.parts.len(), 1);
        assert_eq!(&state.parts[0].1[..], b"tiny");
        assert_eq!(state.complete_calls, 1);
    }

    #[tokio::test]
    async fn test_zero_bytes_issues_single_empty_put() {
        let api = FakeApi::new();
        let writer = Box::new(S3Writer::new(api.clone(), &small_part_params()).unwrap());
        writer.finish().await.unwrap();

        let state = api.state.lock().unwrap();
        assert!(state.upload_id.is_none(), "no multipart upload was created");
        assert_eq!(state.single_puts.len(), 1);
        assert!(state.single_puts[0].is_empty());
        assert_eq!(state.complete_calls, 0);
    }

    #[tokio::test]
    async fn test_single_part_mode_buffers_and_puts_once() {
        let api = FakeApi::new();
        let params = S3Params {
            multipart_upload: false,
            min_part_size: 5 * MIB,
            ..Default::default()
        };
        let mut writer = Box::new(S3Writer::new(api.clone(), &params).unwrap());

        let payload: Vec<u8> = (0..300_000).map(|i| (i % 199) as u8).collect();
        for chunk in payload.chunks(977) {
            writer.write_all(chunk).await.unwrap();
        }
        writer.finish().await.unwrap();

        let state = api.state.lock().unwrap();
        assert!(state.upload_id.is_none());
        assert_eq!(state.single_puts.len(), 1);
        assert_eq!(state.single_puts[0].to_vec(), payload);
    }

    #[tokio::test]
    async fn test_part_failure_aborts_and_poisons() {
        let api = FakeApi::failing_on_part(2);
        let mut writer = Box::new(S3Writer::new(api.clone(), &small_part_params()).unwrap());

        writer.write_all(&vec![1u8; 5 * MIB]).await.unwrap();
        let err = writer.write_all(&vec![2u8; 5 * MIB]).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert!(api.state.lock().unwrap().aborted);

        // Poisoned: further writes and finish fail without new requests.
        assert!(writer.write_all(b"more").await.is_err());
        assert!(writer.finish().await.is_err());
        assert_eq!(api.state.lock().unwrap().complete_calls, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_without_finish_aborts() {
        let api = FakeApi::new();
        {
            let mut writer = Box::new(S3Writer::new(api.clone(), &small_part_params()).unwrap());
            writer.write_all(&vec![0u8; 6 * MIB]).await.unwrap();
            // Dropped here without finish.
        }
        for _ in 0..100 {
            if api.abort_seen.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(api.abort_seen.load(Ordering::SeqCst));
        assert_eq!(api.state.lock().unwrap().complete_calls, 0);
    }

    #[tokio::test]
    async fn test_completed_writer_drop_does_not_abort() {
        let api = FakeApi::new();
        let mut writer = Box::new(S3Writer::new(api.clone(), &small_part_params()).unwrap());
        writer.write_all(b"data").await.unwrap();
        writer.finish().await.unwrap();
        tokio::task::yield_now().await;
        assert!(!api.state.lock().unwrap().aborted);
    }

    #[tokio::test]
    async fn test_min_part_size_bounds() {
        let api = FakeApi::new();
        let params = S3Params {
            min_part_size: MIB,
            ..Default::default()
        };
        match S3Writer::new(api, &params) {
            Err(Error::LimitExceeded { .. }) => {}
            other => panic!("expected LimitExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_part_count_limit() {
        let api = FakeApi::new();
        let mut writer = Box::new(S3Writer::new(api.clone(), &small_part_params()).unwrap());
        writer.write_all(&vec![0u8; 5 * MIB]).await.unwrap();
        // Pretend the service already accepted the maximum part count.
        writer.next_part_number = S3_MAX_PART_COUNT + 1;
        let err = writer.write_all(&vec![0u8; 5 * MIB]).await.unwrap_err();
        assert!(matches!(err, Error::LimitExceeded { .. }));
        assert!(api.state.lock().unwrap().aborted);
    }

    #[tokio::test]
    async fn test_single_part_rejects_oversized_payload() {
        let api = FakeApi::new();
        let params = S3Params {
            multipart_upload: false,
            min_part_size: 5 * MIB,
            ..Default::default()
        };
        let mut writer = Box::new(S3Writer::new(api.clone(), &params).unwrap());
        writer.written = S3_MAX_PART_SIZE - 10;
        let err = writer.write_all(&[0u8; 32]).await.unwrap_err();
        assert!(matches!(err, Error::LimitExceeded { .. }));
    }
}
