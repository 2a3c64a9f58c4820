// src/transport/s3/bucket.rs

//! Parallel bucket download pipeline.
//!
//! Three stages behind bounded channels: one lister task paginates the
//! bucket and pushes accepted keys, `workers` downloader tasks pull keys by
//! dequeue and fetch whole objects with retry, and the caller drains the
//! result channel. Results arrive in completion order; every
//! listed-and-accepted key is yielded exactly once, as a payload or as a
//! per-key error.
//!
//! Dropping the stream closes the channels; tasks notice on their next send
//! and exit within one in-flight request.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::BACKEND;
use crate::error::{Error, Result};
use crate::retry::{run_with_retries, Attempt, RetryPolicy};

/// Key filter callback.
pub type AcceptKey = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Parameters for [`iter_bucket`](crate::iter_bucket).
#[derive(Clone)]
pub struct IterBucketParams {
    /// Only keys starting with this prefix are listed.
    pub prefix: String,
    /// Optional per-key filter applied after the prefix.
    pub accept_key: Option<AcceptKey>,
    /// Stop after this many accepted keys.
    pub key_limit: Option<usize>,
    /// Number of downloader tasks.
    pub workers: usize,
    /// Transient-failure retries per key.
    pub retries: u32,
    /// Injected session client; a default one is built when absent.
    pub client: Option<aws_sdk_s3::Client>,
}

impl Default for IterBucketParams {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            accept_key: None,
            key_limit: None,
            workers: 16,
            retries: 3,
            client: None,
        }
    }
}

impl std::fmt::Debug for IterBucketParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterBucketParams")
            .field("prefix", &self.prefix)
            .field("accept_key", &self.accept_key.is_some())
            .field("key_limit", &self.key_limit)
            .field("workers", &self.workers)
            .field("retries", &self.retries)
            .finish()
    }
}

/// Listing and whole-object fetch, as used by the pipeline.
#[async_trait]
pub(crate) trait BucketApi: Send + Sync {
    /// One page of keys under `prefix`, plus the next continuation token.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> Result<(Vec<String>, Option<String>)>;

    /// Fetches a whole object into memory.
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Bytes>;
}

pub(crate) struct SdkBucketApi {
    client: aws_sdk_s3::Client,
}

impl SdkBucketApi {
    pub(crate) fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BucketApi for SdkBucketApi {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> Result<(Vec<String>, Option<String>)> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|e| {
                Error::transport_with_source(
                    BACKEND,
                    format!("ListObjectsV2 s3://{bucket}/{prefix} failed"),
                    e,
                )
            })?;

        let keys = resp
            .contents()
            .iter()
            .filter_map(|o| o.key().map(str::to_string))
            .collect();
        let next = resp.next_continuation_token().map(str::to_string);
        Ok((keys, next))
    }

    async fn fetch(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                Error::transport_with_source(BACKEND, format!("GET s3://{bucket}/{key} failed"), e)
            })?;
        let aggregated = resp.body.collect().await.map_err(|e| {
            Error::transport_with_source(
                BACKEND,
                format!("body read for s3://{bucket}/{key} failed"),
                e,
            )
        })?;
        Ok(aggregated.into_bytes())
    }
}

/// Lazy sequence of `(key, result)` pairs from a bucket download pipeline.
pub struct BucketStream {
    inner: ReceiverStream<(String, Result<Bytes>)>,
}

impl BucketStream {
    /// Next completed download, or `None` when the pipeline is drained.
    pub async fn next(&mut self) -> Option<(String, Result<Bytes>)> {
        StreamExt::next(&mut self.inner).await
    }
}

impl Stream for BucketStream {
    type Item = (String, Result<Bytes>);

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Streams `(key, body)` pairs for every accepted key under a prefix.
///
/// Downloads fan out across `params.workers` tasks and arrive in
/// completion order; a key whose retries are exhausted arrives as an `Err`
/// marker instead of being dropped.
///
/// # Errors
///
/// Returns an error only when the default client cannot be constructed;
/// listing and download failures surface through the stream itself.
pub async fn iter_bucket(bucket: &str, params: IterBucketParams) -> Result<BucketStream> {
    let client = match &params.client {
        Some(client) => client.clone(),
        None => {
            let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            aws_sdk_s3::Client::new(&config)
        }
    };
    let api = Arc::new(SdkBucketApi::new(client));
    Ok(spawn_pipeline(api, bucket.to_string(), params))
}

/// Starts the lister and downloader tasks and returns the result stream.
pub(crate) fn spawn_pipeline(
    api: Arc<dyn BucketApi>,
    bucket: String,
    params: IterBucketParams,
) -> BucketStream {
    let workers = params.workers.max(1);
    let retries = params.retries;
    let queue_capacity = 2 * workers;

    let (key_tx, key_rx) = mpsc::channel::<String>(queue_capacity);
    let (result_tx, result_rx) = mpsc::channel::<(String, Result<Bytes>)>(queue_capacity);
    let key_rx = Arc::new(tokio::sync::Mutex::new(key_rx));

    // Lister: paginate, filter, push; blocks on the bounded channel for
    // backpressure.
    {
        let api = api.clone();
        let bucket = bucket.clone();
        let result_tx = result_tx.clone();
        let policy = RetryPolicy::with_retries(retries);
        tokio::spawn(async move {
            let mut token: Option<String> = None;
            let mut accepted = 0usize;
            'pages: loop {
                let page = run_with_retries(&policy, || {
                    let api = api.clone();
                    let bucket = bucket.clone();
                    let prefix = params.prefix.clone();
                    let token = token.clone();
                    async move {
                        match api.list_page(&bucket, &prefix, token).await {
                            Ok(page) => Attempt::Ok(page),
                            Err(e) => Attempt::Transient(e),
                        }
                    }
                })
                .await;

                let (keys, next) = match page {
                    Ok(page) => page,
                    Err(e) => {
                        // Listing is not attributable to a single key; the
                        // prefix stands in so the failure still surfaces.
                        let _ = result_tx.send((params.prefix.clone(), Err(e))).await;
                        break;
                    }
                };

                for key in keys {
                    if let Some(accept) = &params.accept_key {
                        if !accept(&key) {
                            continue;
                        }
                    }
                    if key_tx.send(key).await.is_err() {
                        break 'pages; // consumer gone
                    }
                    accepted += 1;
                    if params.key_limit.is_some_and(|limit| accepted >= limit) {
                        break 'pages;
                    }
                }

                match next {
                    Some(t) => token = Some(t),
                    None => break,
                }
            }
            tracing::debug!(accepted, "bucket listing finished");
        });
    }

    // Downloaders: pull keys by dequeue, fetch with retry, emit results.
    for _ in 0..workers {
        let api = api.clone();
        let bucket = bucket.clone();
        let key_rx = key_rx.clone();
        let result_tx = result_tx.clone();
        let policy = RetryPolicy::with_retries(retries);
        tokio::spawn(async move {
            loop {
                let key = { key_rx.lock().await.recv().await };
                let key = match key {
                    Some(k) => k,
                    None => break,
                };

                let result = run_with_retries(&policy, || {
                    let api = api.clone();
                    let bucket = bucket.clone();
                    let key = key.clone();
                    async move {
                        match api.fetch(&bucket, &key).await {
                            Ok(body) => Attempt::Ok(body),
                            Err(e) => Attempt::Transient(e),
                        }
                    }
                })
                .await;

                if result_tx.send((key, result)).await.is_err() {
                    break; // consumer gone
                }
            }
        });
    }

    BucketStream {
        inner: ReceiverStream::new(result_rx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeBucket {
        objects: Vec<(String, Bytes)>,
        page_size: usize,
        /// key -> number of failures to inject before succeeding
        failures: Mutex<HashMap<String, u32>>,
        fetch_calls: AtomicUsize,
    }

    impl FakeBucket {
        fn new(objects: Vec<(String, Bytes)>, page_size: usize) -> Arc<Self> {
            Arc::new(Self {
                objects,
                page_size,
                failures: Mutex::new(HashMap::new()),
                fetch_calls: AtomicUsize::new(0),
            })
        }

        fn fail_key(&self, key: &str, times: u32) {
            self.failures.lock().unwrap().insert(key.to_string(), times);
        }
    }

    #[async_trait]
    impl BucketApi for FakeBucket {
        async fn list_page(
            &self,
            _bucket: &str,
            prefix: &str,
            token: Option<String>,
        ) -> Result<(Vec<String>, Option<String>)> {
            let matching: Vec<String> = self
                .objects
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect();
            let offset: usize = token.and_then(|t| t.parse().ok()).unwrap_or(0);
            let end = (offset + self.page_size).min(matching.len());
            let page = matching[offset..end].to_vec();
            let next = (end < matching.len()).then(|| end.to_string());
            Ok((page, next))
        }

        async fn fetch(&self, _bucket: &str, key: &str) -> Result<Bytes> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut failures = self.failures.lock().unwrap();
                if let Some(left) = failures.get_mut(key) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(Error::transport(BACKEND, "injected failure"));
                    }
                }
            }
            self.objects
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| Error::transport(BACKEND, "no such key"))
        }
    }

    fn hundred_keys() -> Vec<(String, Bytes)> {
        (0..100)
            .map(|i| {
                let ext = if i % 5 == 0 { "json" } else { "bin" };
                let key = format!("foo/obj-{i:03}.{ext}");
                let body = Bytes::from(format!("body of {key}"));
                (key, body)
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_filtered_limited_iteration() {
        let api = FakeBucket::new(hundred_keys(), 7);
        let params = IterBucketParams {
            prefix: "foo/".to_string(),
            accept_key: Some(Arc::new(|k: &str| k.ends_with(".json"))),
            key_limit: Some(10),
            workers: 4,
            ..Default::default()
        };
        let mut stream = spawn_pipeline(api, "b".to_string(), params);

        let mut seen = Vec::new();
        while let Some((key, result)) = stream.next().await {
            let body = result.unwrap();
            assert!(key.starts_with("foo/"));
            assert!(key.ends_with(".json"));
            assert_eq!(body, Bytes::from(format!("body of {key}")));
            seen.push(key);
        }
        assert_eq!(seen.len(), 10);
        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_key_yielded_exactly_once() {
        let api = FakeBucket::new(hundred_keys(), 13);
        let params = IterBucketParams {
            prefix: String::new(),
            workers: 8,
            ..Default::default()
        };
        let mut stream = spawn_pipeline(api, "b".to_string(), params);

        let mut seen = Vec::new();
        while let Some((key, result)) = stream.next().await {
            assert!(result.is_ok());
            seen.push(key);
        }
        assert_eq!(seen.len(), 100);
        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retried() {
        let api = FakeBucket::new(hundred_keys(), 50);
        api.fail_key("foo/obj-000.json", 2);
        let params = IterBucketParams {
            prefix: "foo/obj-000".to_string(),
            retries: 3,
            workers: 2,
            ..Default::default()
        };
        let mut stream = spawn_pipeline(api.clone(), "b".to_string(), params);

        let (key, result) = stream.next().await.unwrap();
        assert_eq!(key, "foo/obj-000.json");
        assert!(result.is_ok());
        assert!(stream.next().await.is_none());
        // 2 failures + 1 success
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_as_marker() {
        let api = FakeBucket::new(hundred_keys(), 50);
        api.fail_key("foo/obj-005.bin", 100);
        let params = IterBucketParams {
            prefix: "foo/obj-005".to_string(),
            retries: 2,
            workers: 2,
            ..Default::default()
        };
        let mut stream = spawn_pipeline(api.clone(), "b".to_string(), params);

        let (key, result) = stream.next().await.unwrap();
        assert_eq!(key, "foo/obj-005.bin");
        assert!(matches!(result, Err(Error::Transport { .. })));
        assert!(stream.next().await.is_none());
        // Initial attempt + 2 retries, exactly one marker.
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stream_stops_pipeline() {
        let api = FakeBucket::new(hundred_keys(), 5);
        let params = IterBucketParams {
            workers: 2,
            ..Default::default()
        };
        let mut stream = spawn_pipeline(api.clone(), "b".to_string(), params);
        let _ = stream.next().await;
        drop(stream);

        // Give tasks a chance to observe the closed channels.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // Fetches stop well short of the full listing.
        assert!(api.fetch_calls.load(Ordering::SeqCst) < 100);
    }
}
