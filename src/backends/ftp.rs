//! FTP backend. The control connection is strictly sequential, so every
//! operation takes an internal lock; dialect quirks (whether the server
//! understands `MLSD`, how `NLST` paths are shaped) are probed once and
//! cached for the lifetime of the connection.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};

use async_ftp::FtpStream;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use once_cell::sync::OnceCell;
use tokio::sync::Mutex;

use crate::error::{StorageError, StorageResult};
use crate::fs::{Content, FileSystem, SeekableWriteStream, Stat};
use crate::path;
use crate::retry::{retry_with, RetryPolicy};

const VALID_PERMISSION_CHARS: &[char] = &['r', 'w', 'x', '-'];
const VALID_DIR_CHARS: &[char] = &['d', '-'];

pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub root: String,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 21,
            username: "anonymous".to_string(),
            password: String::new(),
            root: String::new(),
        }
    }
}

pub struct FtpBackend {
    config: FtpConfig,
    client: Mutex<Option<FtpStream>>,
    can_use_mlsd: OnceCell<bool>,
    can_parse_dir: OnceCell<bool>,
    nlst_prefixes_paths: AtomicBool,
    nlst_checked: AtomicBool,
}

impl FtpBackend {
    pub fn new(config: FtpConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            can_use_mlsd: OnceCell::new(),
            can_parse_dir: OnceCell::new(),
            nlst_prefixes_paths: AtomicBool::new(false),
            nlst_checked: AtomicBool::new(false),
        }
    }

    fn rooted(&self, path: &str) -> StorageResult<String> {
        path::join_paths(&self.config.root, &[path])
    }

    async fn connect(&self) -> StorageResult<FtpStream> {
        let mut stream = FtpStream::connect((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| StorageError::ConnectionFailed {
                backend: "ftp".to_string(),
                message: e.to_string(),
            })?;
        stream
            .login(&self.config.username, &self.config.password)
            .await
            .map_err(|e| StorageError::AuthenticationFailed {
                backend: "ftp".to_string(),
                message: e.to_string(),
            })?;
        Ok(stream)
    }

    async fn reconnect(&self, _err: &StorageError) {
        let mut guard = self.client.lock().await;
        *guard = None;
    }

    async fn with_client<F, R>(&self, op: F) -> StorageResult<R>
    where
        F: for<'c> FnOnce(&'c mut FtpStream) -> std::pin::Pin<Box<dyn std::future::Future<Output = StorageResult<R>> + 'c>>,
    {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let stream = guard.as_mut().unwrap();
        op(stream).await
    }

    fn map_ftp_error(e: impl std::fmt::Display) -> StorageError {
        StorageError::Other {
            backend: "ftp".to_string(),
            message: e.to_string(),
        }
    }

    /// Probes whether the server understands `MLSD` at the rooted root.
    async fn can_use_mlsd(&self) -> bool {
        if let Some(v) = self.can_use_mlsd.get() {
            return *v;
        }
        let root = self.config.root.clone();
        let result = self
            .with_client(move |stream| {
                let root = root.clone();
                Box::pin(async move { stream.mlsd(Some(&root)).await.map_err(Self::map_ftp_error) })
            })
            .await;
        let usable = result.is_ok();
        let _ = self.can_use_mlsd.set(usable);
        usable
    }

    /// Probes whether `LIST` output parses as classic 10-character Unix
    /// permission strings (`drwxr-xr-x ...`), creating and removing a probe
    /// file when the root is empty so the detection has something to parse.
    async fn can_parse_dir(&self) -> bool {
        if let Some(v) = self.can_parse_dir.get() {
            return *v;
        }
        let root = self.config.root.clone();
        let listing = self
            .with_client(move |stream| {
                let root = root.clone();
                Box::pin(async move { stream.list(Some(&root)).await.map_err(Self::map_ftp_error) })
            })
            .await;

        let parseable = match listing {
            Ok(lines) if !lines.is_empty() => lines.iter().all(|line| line_has_unix_permissions(line)),
            _ => false,
        };
        let _ = self.can_parse_dir.set(parseable);
        parseable
    }

    async fn fetch_listing(&self, dir: &str) -> StorageResult<Vec<(String, bool)>> {
        if self.can_use_mlsd().await {
            return self.fetch_listing_mlsd(dir).await;
        }
        if self.can_parse_dir().await {
            return self.fetch_listing_unix(dir).await;
        }
        self.fetch_listing_nlst(dir).await
    }

    async fn fetch_listing_mlsd(&self, dir: &str) -> StorageResult<Vec<(String, bool)>> {
        let dir = dir.to_string();
        self.with_client(move |stream| {
            let dir = dir.clone();
            Box::pin(async move {
                let entries = stream.mlsd(Some(&dir)).await.map_err(Self::map_ftp_error)?;
                Ok(entries
                    .into_iter()
                    .map(|e| (e.name().to_string(), e.is_dir()))
                    .collect())
            })
        })
        .await
    }

    async fn fetch_listing_unix(&self, dir: &str) -> StorageResult<Vec<(String, bool)>> {
        let dir = dir.to_string();
        self.with_client(move |stream| {
            let dir = dir.clone();
            Box::pin(async move {
                let lines = stream.list(Some(&dir)).await.map_err(Self::map_ftp_error)?;
                Ok(lines
                    .iter()
                    .filter_map(|line| parse_unix_listing_line(line))
                    .collect())
            })
        })
        .await
    }

    /// Raw `NLST` with no dialect interpretation: used both by
    /// `fetch_listing_nlst` and by single-entry lookups that must not
    /// re-enter `fetch_listing` for the same directory.
    async fn raw_nlst(&self, dir: &str) -> StorageResult<Vec<String>> {
        let dir = dir.to_string();
        self.with_client(move |stream| {
            let dir = dir.clone();
            Box::pin(async move { stream.nlst(Some(&dir)).await.map_err(Self::map_ftp_error) })
        })
        .await
    }

    /// Tries to `CWD` into `rooted` and back, the only dialect-independent
    /// way to tell a directory from a file when neither `MLSD` nor a
    /// parseable `LIST` is available. Does not call back into
    /// `fetch_listing`, so it never recurses.
    async fn cwd_is_dir(&self, rooted: &str) -> bool {
        let rooted = rooted.to_string();
        self.with_client(move |stream| {
            let rooted = rooted.clone();
            Box::pin(async move {
                let original = stream.pwd().await.map_err(Self::map_ftp_error)?;
                let is_dir = stream.cwd(&rooted).await.is_ok();
                let _ = stream.cwd(&original).await;
                Ok(is_dir)
            })
        })
        .await
        .unwrap_or(false)
    }

    /// `isdir` against an already-rooted path. Separate from the public
    /// `isdir` so internal callers that already hold a rooted path (e.g.
    /// `fetch_listing_nlst`, `make_parent_dirs`) don't root it a second time,
    /// and so the `NLST`-only fallback never re-enters `fetch_listing` on the
    /// same directory it's currently listing.
    async fn isdir_rooted(&self, rooted: &str) -> bool {
        if rooted.is_empty() {
            return true;
        }
        let dirname = path::dirname(rooted);
        let base = path::basename(rooted);
        if self.can_use_mlsd().await {
            return matches!(
                self.fetch_listing_mlsd(&dirname).await,
                Ok(entries) if entries.iter().any(|(name, is_dir)| name == base && *is_dir)
            );
        }
        if self.can_parse_dir().await {
            return matches!(
                self.fetch_listing_unix(&dirname).await,
                Ok(entries) if entries.iter().any(|(name, is_dir)| name == base && *is_dir)
            );
        }
        self.cwd_is_dir(rooted).await
    }

    /// `isfile` against an already-rooted path; see `isdir_rooted`.
    async fn isfile_rooted(&self, rooted: &str) -> bool {
        if rooted.is_empty() {
            return false;
        }
        let dirname = path::dirname(rooted);
        let base = path::basename(rooted);
        if self.can_use_mlsd().await {
            return matches!(
                self.fetch_listing_mlsd(&dirname).await,
                Ok(entries) if entries.iter().any(|(name, is_dir)| name == base && !*is_dir)
            );
        }
        if self.can_parse_dir().await {
            return matches!(
                self.fetch_listing_unix(&dirname).await,
                Ok(entries) if entries.iter().any(|(name, is_dir)| name == base && !*is_dir)
            );
        }
        if self.isdir_rooted(rooted).await {
            return false;
        }
        match self.raw_nlst(&dirname).await {
            Ok(names) => names.iter().any(|n| n == base || n.ends_with(format!("/{base}").as_str())),
            Err(_) => false,
        }
    }

    /// Falls back to `NLST` plus a per-entry directory check that goes
    /// through `isdir_rooted` (a `CWD` probe in this dialect), never back
    /// through `fetch_listing` on the same directory. The first call also
    /// settles whether this server's `NLST` returns bare names or names
    /// already prefixed with `dir`, caching the answer.
    async fn fetch_listing_nlst(&self, dir: &str) -> StorageResult<Vec<(String, bool)>> {
        let names = self.raw_nlst(dir).await?;

        let strip_prefix = self.nlst_strips_prefix(&names, dir);
        let mut out = Vec::new();
        for name in names {
            let bare = if strip_prefix {
                name.rsplit('/').next().unwrap_or(&name).to_string()
            } else {
                name
            };
            let full = if dir.is_empty() {
                bare.clone()
            } else {
                format!("{dir}/{bare}")
            };
            let is_dir = self.isdir_rooted(&full).await;
            out.push((bare, is_dir));
        }
        Ok(out)
    }

    /// Caches, after the first listing, whether `NLST` on this server
    /// returns entries already prefixed with the directory path rather than
    /// bare basenames.
    fn nlst_strips_prefix(&self, names: &[String], dir: &str) -> bool {
        if !self.nlst_checked.swap(true, Ordering::Relaxed) {
            let prefixes = !dir.is_empty() && names.iter().all(|n| n.starts_with(dir));
            self.nlst_prefixes_paths.store(prefixes, Ordering::Relaxed);
        }
        self.nlst_prefixes_paths.load(Ordering::Relaxed)
    }
}

fn line_has_unix_permissions(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .map(|token| {
            token.len() == 10
                && VALID_DIR_CHARS.contains(&token.chars().next().unwrap())
                && token.chars().skip(1).all(|c| VALID_PERMISSION_CHARS.contains(&c))
        })
        .unwrap_or(false)
}

fn parse_unix_listing_line(line: &str) -> Option<(String, bool)> {
    let perms = line.split_whitespace().next()?;
    if perms.len() != 10 {
        return None;
    }
    let is_dir = perms.starts_with('d');
    let name = line.rsplit_whitespace_once()?;
    Some((name, is_dir))
}

trait RsplitWhitespaceOnce {
    fn rsplit_whitespace_once(&self) -> Option<String>;
}

impl RsplitWhitespaceOnce for &str {
    fn rsplit_whitespace_once(&self) -> Option<String> {
        self.split_whitespace().last().map(|s| s.to_string())
    }
}

impl fmt::Display for FtpBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FtpBackend(host='{}', root='{}')", self.config.host, self.config.root)
    }
}

impl PartialEq for FtpBackend {
    fn eq(&self, other: &Self) -> bool {
        self.config.host == other.config.host
            && self.config.port == other.config.port
            && self.config.username == other.config.username
            && self.config.root == other.config.root
    }
}

impl Hash for FtpBackend {
    fn hash<H: Hasher>(&self, state: &mut H) {
        "FtpBackend".hash(state);
        self.config.host.hash(state);
        self.config.port.hash(state);
        self.config.username.hash(state);
        self.config.root.hash(state);
    }
}

#[async_trait]
impl FileSystem for FtpBackend {
    async fn exists(&self, path: &str) -> bool {
        let Ok(rooted) = self.rooted(path) else { return false };
        self.isfile_rooted(&rooted).await || self.isdir_rooted(&rooted).await
    }

    async fn isdir(&self, path: &str) -> bool {
        let Ok(rooted) = self.rooted(path) else { return false };
        self.isdir_rooted(&rooted).await
    }

    async fn isfile(&self, path: &str) -> bool {
        let Ok(rooted) = self.rooted(path) else { return false };
        self.isfile_rooted(&rooted).await
    }

    async fn getmtime(&self, path: &str) -> StorageResult<f64> {
        let rooted = self.rooted(path)?;
        let policy = RetryPolicy::ftp();
        retry_with(
            &policy,
            |e| e.is_retriable(),
            |e| self.reconnect(e),
            || async {
                let rooted = rooted.clone();
                self.with_client(move |stream| {
                    let rooted = rooted.clone();
                    Box::pin(async move {
                        let resp = stream.mdtm(&rooted).await.map_err(Self::map_ftp_error)?;
                        let dt = Utc
                            .with_ymd_and_hms(
                                resp.year(),
                                resp.month() as u32,
                                resp.day() as u32,
                                resp.hour() as u32,
                                resp.minute() as u32,
                                resp.second() as u32,
                            )
                            .single()
                            .ok_or_else(|| StorageError::not_found(&rooted, "ftp"))?;
                        Ok(dt.timestamp() as f64)
                    })
                })
                .await
            },
        )
        .await
    }

    async fn getsize(&self, path: &str) -> StorageResult<u64> {
        let rooted = self.rooted(path)?;
        let policy = RetryPolicy::ftp();
        retry_with(
            &policy,
            |e| e.is_retriable(),
            |e| self.reconnect(e),
            || async {
                let rooted = rooted.clone();
                self.with_client(move |stream| {
                    let rooted = rooted.clone();
                    Box::pin(async move {
                        let size = stream.size(&rooted).await.map_err(Self::map_ftp_error)?;
                        Ok(size as u64)
                    })
                })
                .await
            },
        )
        .await
    }

    async fn listdir(
        &self,
        path: &str,
        recursive: bool,
        max_entries: Option<usize>,
    ) -> StorageResult<Vec<String>> {
        let rooted = self.rooted(path)?;
        let mut out = Vec::new();
        self.listdir_into(&rooted, recursive, max_entries, &mut out).await?;
        Ok(out)
    }

    async fn get(&self, path: &str) -> StorageResult<Bytes> {
        let rooted = self.rooted(path)?;
        let policy = RetryPolicy::ftp();
        retry_with(
            &policy,
            |e| e.is_retriable(),
            |e| self.reconnect(e),
            || async {
                let rooted = rooted.clone();
                self.with_client(move |stream| {
                    let rooted = rooted.clone();
                    Box::pin(async move {
                        let data = stream
                            .simple_retr(&rooted)
                            .await
                            .map_err(Self::map_ftp_error)?;
                        Ok(Bytes::from(data.into_inner()))
                    })
                })
                .await
            },
        )
        .await
    }

    async fn get_into(&self, path: &str, stream: &mut dyn SeekableWriteStream) -> StorageResult<()> {
        let data = self.get(path).await?;
        crate::stream::rewind(stream).await?;
        tokio::io::AsyncWriteExt::write_all(stream, &data).await?;
        Ok(())
    }

    async fn set(&self, path: &str, content: Content<'_>) -> StorageResult<()> {
        let rooted = self.rooted(path)?;
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

        self.make_parent_dirs(&rooted).await?;

        let policy = RetryPolicy::ftp();
        retry_with(
            &policy,
            |e| e.is_retriable(),
            |e| self.reconnect(e),
            || async {
                let rooted = rooted.clone();
                let bytes = bytes.clone();
                self.with_client(move |stream| {
                    let rooted = rooted.clone();
                    let mut cursor = std::io::Cursor::new(bytes.clone());
                    Box::pin(async move {
                        stream
                            .put(&rooted, &mut cursor)
                            .await
                            .map_err(Self::map_ftp_error)
                    })
                })
                .await
            },
        )
        .await
    }

    async fn rm(&self, path: &str) -> StorageResult<()> {
        let rooted = self.rooted(path)?;
        let is_dir = self.isdir(path).await;
        let policy = RetryPolicy::ftp();
        retry_with(
            &policy,
            |e| e.is_retriable(),
            |e| self.reconnect(e),
            || async {
                let rooted = rooted.clone();
                self.with_client(move |stream| {
                    let rooted = rooted.clone();
                    Box::pin(async move {
                        if is_dir {
                            stream.rmdir(&rooted).await.map_err(Self::map_ftp_error)
                        } else {
                            stream.rm(&rooted).await.map_err(Self::map_ftp_error)
                        }
                    })
                })
                .await
            },
        )
        .await
    }
}

impl FtpBackend {
    async fn make_parent_dirs(&self, rooted: &str) -> StorageResult<()> {
        let dir = path::dirname(rooted);
        if dir.is_empty() {
            return Ok(());
        }
        let mut built = String::new();
        for part in dir.split('/') {
            built = if built.is_empty() {
                part.to_string()
            } else {
                format!("{built}/{part}")
            };
            if !self.isdir_rooted(&built).await {
                let built_clone = built.clone();
                let _ = self
                    .with_client(move |stream| {
                        let built_clone = built_clone.clone();
                        Box::pin(async move {
                            stream.mkdir(&built_clone).await.map_err(Self::map_ftp_error)
                        })
                    })
                    .await;
            }
        }
        Ok(())
    }

    fn listdir_into<'a>(
        &'a self,
        dir: &'a str,
        recursive: bool,
        max_entries: Option<usize>,
        out: &'a mut Vec<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = StorageResult<()>> + 'a>> {
        Box::pin(async move {
            let entries = self.fetch_listing(dir).await?;
            for (name, is_dir) in entries {
                if let Some(max) = max_entries {
                    if out.len() >= max {
                        return Ok(());
                    }
                }
                let full = if dir.is_empty() {
                    name.clone()
                } else {
                    format!("{dir}/{name}")
                };
                out.push(full.clone());
                if recursive && is_dir {
                    self.listdir_into(&full, recursive, max_entries, out).await?;
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_unix_permission_strings() {
        assert!(line_has_unix_permissions("drwxr-xr-x 2 user group 4096 Jan 1 00:00 dirname"));
        assert!(line_has_unix_permissions("-rw-r--r-- 1 user group 123 Jan 1 00:00 file.txt"));
        assert!(!line_has_unix_permissions("not a unix listing at all"));
    }

    #[test]
    fn parses_name_and_kind_from_listing_line() {
        let (name, is_dir) = parse_unix_listing_line("drwxr-xr-x 2 user group 4096 Jan 1 00:00 subdir").unwrap();
        assert_eq!(name, "subdir");
        assert!(is_dir);
    }
}
