//! S3 backend: keys under a bucket/prefix stand in for a file tree. S3 has no
//! native notion of directories — `isdir`/`exists` are derived from whether
//! any object exists under a given key prefix.

use std::fmt;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;

use crate::error::{StorageError, StorageResult};
use crate::fs::{Content, FileSystem, SeekableWriteStream, Stat};
use crate::path;
use crate::retry::{retry_with, RetryPolicy};

/// Substrings of a transient S3/network failure the original retried on.
/// Kept as literal substring matching (rather than status-code matching)
/// since that is what distinguishes a retriable SDK error here from a
/// permanent one like `NoSuchKey` or `AccessDenied`.
const RETRIABLE_SUBSTRINGS: &[&str] = &[
    "SlowDown",
    "Could not connect to the endpoint URL",
    "InternalError",
    "Connection reset by peer",
    "Remote end closed connection without response",
    "reached max retries",
    "Service Unavailable",
];

fn is_retriable_message(message: &str) -> bool {
    RETRIABLE_SUBSTRINGS.iter().any(|s| message.contains(s))
}

pub struct S3Backend {
    client: Client,
    bucket: String,
    key_prefix: String,
}

impl S3Backend {
    pub async fn new(bucket: impl Into<String>, key_prefix: impl Into<String>) -> StorageResult<Self> {
        let bucket = bucket.into();
        let key_prefix = path::with_trailing_sep(path::normalize(&key_prefix.into())?.as_str());

        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        let client = Client::new(&config);

        let backend = Self {
            client,
            bucket,
            key_prefix,
        };

        if !backend.isdir("").await {
            return Err(StorageError::InvalidConfig {
                backend: "s3".to_string(),
                message: format!("bucket '{}' (prefix '{}') is not reachable", backend.bucket, backend.key_prefix),
            });
        }
        Ok(backend)
    }

    fn path_to_key(&self, path: &str) -> StorageResult<String> {
        let normalized = path::normalize(path)?;
        if normalized.is_empty() {
            Ok(self.key_prefix.trim_end_matches('/').to_string())
        } else {
            Ok(format!("{}{}", self.key_prefix, normalized))
        }
    }

    async fn retrying<F, Fut, R>(&self, op: F) -> StorageResult<R>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = StorageResult<R>>,
    {
        retry_with(
            &RetryPolicy::s3(),
            |err| match err {
                StorageError::Other { backend, message } if backend == "s3" => is_retriable_message(message),
                _ => err.is_retriable(),
            },
            |_| async {},
            op,
        )
        .await
    }

    fn map_sdk_error(&self, err: impl std::fmt::Display) -> StorageError {
        StorageError::Other {
            backend: "s3".to_string(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for S3Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S3Backend(bucket='{}', keyPrefix='{}')", self.bucket, self.key_prefix)
    }
}

#[async_trait]
impl FileSystem for S3Backend {
    async fn exists(&self, path: &str) -> bool {
        self.isdir(path).await || self.isfile(path).await
    }

    async fn isdir(&self, path: &str) -> bool {
        match path::normalize(path) {
            Ok(normalized) if normalized.is_empty() => return true,
            Ok(_) => {}
            Err(_) => return false,
        }
        let Ok(key) = self.path_to_key(path) else {
            return false;
        };
        let prefix = path::with_trailing_sep(&key);
        let result = self
            .retrying(|| async {
                self.client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&prefix)
                    .max_keys(1)
                    .send()
                    .await
                    .map_err(|e| self.map_sdk_error(e))
            })
            .await;
        matches!(result, Ok(output) if output.key_count().unwrap_or(0) > 0)
    }

    async fn isfile(&self, path: &str) -> bool {
        let Ok(key) = self.path_to_key(path) else {
            return false;
        };
        if key.is_empty() {
            return false;
        }
        self.retrying(|| async {
            self.client
                .head_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| self.map_sdk_error(e))
        })
        .await
        .is_ok()
    }

    async fn getmtime(&self, path: &str) -> StorageResult<f64> {
        let key = self.path_to_key(path)?;
        let head = self
            .retrying(|| async {
                self.client
                    .head_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .send()
                    .await
                    .map_err(|e| self.map_sdk_error(e))
            })
            .await
            .map_err(|_| StorageError::not_found(path, "s3"))?;

        let last_modified = head
            .last_modified()
            .ok_or_else(|| StorageError::not_found(path, "s3"))?;
        Ok(last_modified.as_secs_f64())
    }

    async fn getsize(&self, path: &str) -> StorageResult<u64> {
        let key = self.path_to_key(path)?;
        let head = self
            .retrying(|| async {
                self.client
                    .head_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .send()
                    .await
                    .map_err(|e| self.map_sdk_error(e))
            })
            .await
            .map_err(|_| StorageError::not_found(path, "s3"))?;
        Ok(head.content_length().unwrap_or(0).max(0) as u64)
    }

    /// Paginated, delimiter-based listing. The delimiter always stays on so
    /// `CommonPrefixes` surfaces "directories" at every level; a recursive
    /// listing walks into each `CommonPrefix` in turn rather than dropping
    /// the delimiter, since a flat listing of S3 keys can never itself name
    /// a directory.
    async fn listdir(
        &self,
        path: &str,
        recursive: bool,
        max_entries: Option<usize>,
    ) -> StorageResult<Vec<String>> {
        let key = self.path_to_key(path)?;
        let dir_prefix = if key.is_empty() {
            String::new()
        } else {
            path::with_trailing_sep(&key)
        };

        let mut out = Vec::new();
        self.listdir_into(&dir_prefix, recursive, max_entries, &mut out).await?;
        Ok(out)
    }

    async fn get(&self, path: &str) -> StorageResult<Bytes> {
        let key = self.path_to_key(path)?;
        let output = self
            .retrying(|| async {
                self.client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .send()
                    .await
                    .map_err(|e| self.map_sdk_error(e))
            })
            .await
            .map_err(|_| StorageError::not_found(path, "s3"))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| self.map_sdk_error(e))?
            .into_bytes();
        Ok(bytes)
    }

    async fn get_into(&self, path: &str, stream: &mut dyn SeekableWriteStream) -> StorageResult<()> {
        let data = self.get(path).await?;
        crate::stream::rewind(stream).await?;
        tokio::io::AsyncWriteExt::write_all(stream, &data).await?;
        Ok(())
    }

    async fn set(&self, path: &str, content: Content<'_>) -> StorageResult<()> {
        let key = self.path_to_key(path)?;
        let bytes = match content {
            Content::Bytes(bytes) => bytes,
            Content::Stream(stream) => {
                use tokio::io::{AsyncReadExt, AsyncSeekExt};
                stream.seek(std::io::SeekFrom::Start(0)).await?;
                let mut buf = Vec::new();
                stream.read_to_end(&mut buf).await?;
                Bytes::from(buf)
            }
        };

        self.retrying(|| {
            let bytes = bytes.clone();
            async move {
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .body(ByteStream::from(bytes))
                    .send()
                    .await
                    .map_err(|e| self.map_sdk_error(e))
            }
        })
        .await?;
        Ok(())
    }

    async fn rm(&self, path: &str) -> StorageResult<()> {
        let key = self.path_to_key(path)?;
        if !self.isfile(path).await {
            return Err(StorageError::not_found(path, "s3"));
        }
        self.retrying(|| async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| self.map_sdk_error(e))
        })
        .await?;
        Ok(())
    }

    fn is_suitable_cache_front(&self) -> bool {
        false
    }
}

impl S3Backend {
    fn key_to_path(&self, key: &str) -> String {
        key.strip_prefix(&self.key_prefix).unwrap_or(key).to_string()
    }

    fn listdir_into<'a>(
        &'a self,
        dir_prefix: &'a str,
        recursive: bool,
        max_entries: Option<usize>,
        out: &'a mut Vec<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = StorageResult<()>> + 'a>> {
        Box::pin(async move {
            let mut continuation: Option<String> = None;
            let mut subdirs = Vec::new();
            loop {
                let continuation_token = continuation.clone();
                let page = self
                    .retrying(|| {
                        let continuation_token = continuation_token.clone();
                        async move {
                            let mut req = self
                                .client
                                .list_objects_v2()
                                .bucket(&self.bucket)
                                .prefix(dir_prefix)
                                .delimiter("/");
                            if let Some(token) = continuation_token {
                                req = req.continuation_token(token);
                            }
                            req.send().await.map_err(|e| self.map_sdk_error(e))
                        }
                    })
                    .await?;

                for object in page.contents() {
                    if let Some(object_key) = object.key() {
                        if object_key == dir_prefix {
                            continue;
                        }
                        out.push(self.key_to_path(object_key));
                        if let Some(max) = max_entries {
                            if out.len() >= max {
                                return Ok(());
                            }
                        }
                    }
                }
                for common in page.common_prefixes() {
                    if let Some(p) = common.prefix() {
                        out.push(self.key_to_path(p.trim_end_matches('/')));
                        if let Some(max) = max_entries {
                            if out.len() >= max {
                                return Ok(());
                            }
                        }
                        if recursive {
                            subdirs.push(p.to_string());
                        }
                    }
                }

                if page.is_truncated().unwrap_or(false) {
                    continuation = page.next_continuation_token().map(|s| s.to_string());
                } else {
                    break;
                }
            }

            for sub in subdirs {
                if let Some(max) = max_entries {
                    if out.len() >= max {
                        return Ok(());
                    }
                }
                self.listdir_into(&sub, recursive, max_entries, out).await?;
            }
            Ok(())
        })
    }
}

impl PartialEq for S3Backend {
    fn eq(&self, other: &Self) -> bool {
        self.bucket == other.bucket && self.key_prefix == other.key_prefix
    }
}

impl std::hash::Hash for S3Backend {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        "S3Backend".hash(state);
        self.bucket.hash(state);
        self.key_prefix.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_substrings_match_known_transient_errors() {
        assert!(is_retriable_message("SlowDown: please reduce your request rate"));
        assert!(is_retriable_message("500 InternalError"));
        assert!(!is_retriable_message("NoSuchKey"));
        assert!(!is_retriable_message("AccessDenied"));
    }
}
