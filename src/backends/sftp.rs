//! SFTP backend over `ssh2`, which is a blocking library — every call runs
//! inside `spawn_blocking`. Unlike a naive port, transfers are streamed
//! chunk-by-chunk through a channel rather than buffered whole in memory,
//! matching the streaming behavior of the system this backend replaces.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use ssh2::{Session, Sftp};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

use crate::error::{StorageError, StorageResult};
use crate::fs::{Content, FileSystem, SeekableWriteStream, Stat};
use crate::path;
use crate::retry::{retry_with, RetryPolicy};
use crate::stream::DEFAULT_CHUNK_SIZE;

pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_path: Option<String>,
    pub root: String,
}

struct Connection {
    _session: Session,
    sftp: Sftp,
}

pub struct SftpBackend {
    config: SftpConfig,
    connection: Mutex<Option<Arc<Connection>>>,
}

fn io_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other {
        backend: "sftp".to_string(),
        message: e.to_string(),
    }
}

impl SftpBackend {
    pub fn new(config: SftpConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    fn rooted(&self, path: &str) -> StorageResult<String> {
        path::join_paths(&self.config.root, &[path])
    }

    fn connect_blocking(config: &SftpConfig) -> StorageResult<Connection> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .map_err(|e| StorageError::ConnectionFailed {
                backend: "sftp".to_string(),
                message: e.to_string(),
            })?;
        let mut session = Session::new().map_err(io_err)?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| StorageError::ConnectionFailed {
            backend: "sftp".to_string(),
            message: e.to_string(),
        })?;

        if let Some(key_path) = &config.private_key_path {
            session
                .userauth_pubkey_file(&config.username, None, Path::new(key_path), None)
                .map_err(|e| StorageError::AuthenticationFailed {
                    backend: "sftp".to_string(),
                    message: e.to_string(),
                })?;
        } else {
            session
                .userauth_password(&config.username, config.password.as_deref().unwrap_or(""))
                .map_err(|e| StorageError::AuthenticationFailed {
                    backend: "sftp".to_string(),
                    message: e.to_string(),
                })?;
        }

        let sftp = session.sftp().map_err(io_err)?;
        Ok(Connection { _session: session, sftp })
    }

    async fn connection(&self) -> StorageResult<Arc<Connection>> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let config = self.config.clone_for_connect();
        let conn = tokio::task::spawn_blocking(move || Self::connect_blocking(&config))
            .await
            .map_err(io_err)??;
        let conn = Arc::new(conn);
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn reconnect(&self, _err: &StorageError) {
        let mut guard = self.connection.lock().await;
        *guard = None;
    }

    async fn with_sftp<F, R>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&Sftp) -> StorageResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.connection().await?;
        tokio::task::spawn_blocking(move || f(&conn.sftp))
            .await
            .map_err(io_err)?
    }

    async fn retrying<F, Fut, R>(&self, op: F) -> StorageResult<R>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = StorageResult<R>>,
    {
        retry_with(&RetryPolicy::default(), |e| e.is_retriable(), |e| self.reconnect(e), op).await
    }

    async fn make_parent_dirs(&self, rooted: &str) -> StorageResult<()> {
        let dir = path::dirname(rooted);
        if dir.is_empty() {
            return Ok(());
        }
        let mut built = String::new();
        for part in dir.split('/') {
            built = if built.is_empty() { part.to_string() } else { format!("{built}/{part}") };
            if !self.isdir(&built).await {
                let built_clone = built.clone();
                let _ = self
                    .with_sftp(move |sftp| {
                        sftp.mkdir(Path::new(&built_clone), 0o755).map_err(io_err)
                    })
                    .await;
            }
        }
        Ok(())
    }
}

impl SftpConfig {
    fn clone_for_connect(&self) -> SftpConfig {
        SftpConfig {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            private_key_path: self.private_key_path.clone(),
            root: self.root.clone(),
        }
    }
}

impl fmt::Display for SftpBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SftpBackend(host='{}', root='{}')", self.config.host, self.config.root)
    }
}

impl PartialEq for SftpBackend {
    fn eq(&self, other: &Self) -> bool {
        self.config.host == other.config.host
            && self.config.port == other.config.port
            && self.config.username == other.config.username
            && self.config.root == other.config.root
    }
}

impl Hash for SftpBackend {
    fn hash<H: Hasher>(&self, state: &mut H) {
        "SftpBackend".hash(state);
        self.config.host.hash(state);
        self.config.port.hash(state);
        self.config.username.hash(state);
        self.config.root.hash(state);
    }
}

#[async_trait]
impl FileSystem for SftpBackend {
    async fn exists(&self, path: &str) -> bool {
        let Ok(rooted) = self.rooted(path) else { return false };
        self.with_sftp(move |sftp| {
            Ok(sftp.lstat(Path::new(&rooted)).is_ok())
        })
        .await
        .unwrap_or(false)
    }

    async fn isdir(&self, path: &str) -> bool {
        let Ok(rooted) = self.rooted(path) else { return false };
        if rooted.is_empty() {
            return true;
        }
        self.with_sftp(move |sftp| {
            Ok(sftp
                .lstat(Path::new(&rooted))
                .map(|st| st.is_dir())
                .unwrap_or(false))
        })
        .await
        .unwrap_or(false)
    }

    async fn isfile(&self, path: &str) -> bool {
        let Ok(rooted) = self.rooted(path) else { return false };
        self.with_sftp(move |sftp| {
            Ok(sftp
                .lstat(Path::new(&rooted))
                .map(|st| st.is_file())
                .unwrap_or(false))
        })
        .await
        .unwrap_or(false)
    }

    async fn getmtime(&self, path: &str) -> StorageResult<f64> {
        let rooted = self.rooted(path)?;
        self.retrying(|| {
            let rooted = rooted.clone();
            async move {
                self.with_sftp(move |sftp| {
                    let st = sftp
                        .lstat(Path::new(&rooted))
                        .map_err(|_| StorageError::not_found(&rooted, "sftp"))?;
                    st.mtime
                        .map(|t| t as f64)
                        .ok_or_else(|| StorageError::not_found(&rooted, "sftp"))
                })
                .await
            }
        })
        .await
    }

    async fn getsize(&self, path: &str) -> StorageResult<u64> {
        let rooted = self.rooted(path)?;
        self.retrying(|| {
            let rooted = rooted.clone();
            async move {
                self.with_sftp(move |sftp| {
                    let st = sftp
                        .lstat(Path::new(&rooted))
                        .map_err(|_| StorageError::not_found(&rooted, "sftp"))?;
                    st.size
                        .ok_or_else(|| StorageError::not_found(&rooted, "sftp"))
                })
                .await
            }
        })
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
        self.retrying(|| {
            let rooted = rooted.clone();
            async move {
                self.with_sftp(move |sftp| {
                    let mut file = sftp
                        .open(Path::new(&rooted))
                        .map_err(|_| StorageError::not_found(&rooted, "sftp"))?;
                    let mut buf = Vec::new();
                    file.read_to_end(&mut buf).map_err(io_err)?;
                    Ok(Bytes::from(buf))
                })
                .await
            }
        })
        .await
    }

    /// Streams file content in `DEFAULT_CHUNK_SIZE` chunks over a bounded
    /// channel: a blocking task reads from the remote file and sends chunks;
    /// this task receives and writes them into `stream`, so the whole file
    /// is never buffered at once.
    async fn get_into(&self, path: &str, stream: &mut dyn SeekableWriteStream) -> StorageResult<()> {
        let rooted = self.rooted(path)?;
        crate::stream::rewind(stream).await?;

        let conn = self.connection().await?;
        let (tx, mut rx) = mpsc::channel::<StorageResult<Vec<u8>>>(4);
        let read_path = rooted.clone();
        tokio::task::spawn_blocking(move || {
            let result = (|| -> StorageResult<()> {
                let mut file = conn
                    .sftp
                    .open(Path::new(&read_path))
                    .map_err(|_| StorageError::not_found(&read_path, "sftp"))?;
                let mut buf = vec![0u8; DEFAULT_CHUNK_SIZE];
                loop {
                    let n = file.read(&mut buf).map_err(io_err)?;
                    if n == 0 {
                        break;
                    }
                    if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Ok(())
            })();
            if let Err(e) = result {
                let _ = tx.blocking_send(Err(e));
            }
        });

        while let Some(chunk) = rx.recv().await {
            stream.write_all(&chunk?).await?;
        }
        Ok(())
    }

    async fn set(&self, path: &str, content: Content<'_>) -> StorageResult<()> {
        let rooted = self.rooted(path)?;
        self.make_parent_dirs(&rooted).await?;

        match content {
            Content::Bytes(bytes) => {
                self.retrying(|| {
                    let rooted = rooted.clone();
                    let bytes = bytes.clone();
                    async move {
                        self.with_sftp(move |sftp| {
                            let mut file = sftp.create(Path::new(&rooted)).map_err(io_err)?;
                            file.write_all(&bytes).map_err(io_err)
                        })
                        .await
                    }
                })
                .await
            }
            Content::Stream(source) => {
                source.seek(SeekFrom::Start(0)).await?;
                let conn = self.connection().await?;
                let write_path = rooted.clone();
                let (tx, mut rx) = mpsc::channel::<Vec<u8>>(4);

                let writer = tokio::task::spawn_blocking(move || -> StorageResult<()> {
                    let mut file = conn.sftp.create(Path::new(&write_path)).map_err(io_err)?;
                    while let Some(chunk) = rx.blocking_recv() {
                        file.write_all(&chunk).map_err(io_err)?;
                    }
                    Ok(())
                });

                let mut buf = vec![0u8; DEFAULT_CHUNK_SIZE];
                loop {
                    let n = source.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
                drop(tx);
                writer.await.map_err(io_err)?
            }
        }
    }

    async fn rm(&self, path: &str) -> StorageResult<()> {
        let rooted = self.rooted(path)?;
        let is_dir = self.isdir(path).await;
        self.retrying(|| {
            let rooted = rooted.clone();
            async move {
                self.with_sftp(move |sftp| {
                    let result = if is_dir {
                        sftp.rmdir(Path::new(&rooted))
                    } else {
                        sftp.unlink(Path::new(&rooted))
                    };
                    result.map_err(|_| StorageError::not_found(&rooted, "sftp"))
                })
                .await
            }
        })
        .await
    }

    async fn stat(&self, path: &str) -> StorageResult<Stat> {
        let modtime = self.getmtime(path).await?;
        let size = self.getsize(path).await?;
        Ok(Stat { modtime, size })
    }
}

impl SftpBackend {
    fn listdir_into<'a>(
        &'a self,
        dir: &'a str,
        recursive: bool,
        max_entries: Option<usize>,
        out: &'a mut Vec<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = StorageResult<()>> + 'a>> {
        Box::pin(async move {
            let dir_owned = dir.to_string();
            let entries = self
                .with_sftp(move |sftp| {
                    sftp.readdir(Path::new(if dir_owned.is_empty() { "." } else { &dir_owned }))
                        .map_err(io_err)
                })
                .await?;

            for (entry_path, stat) in entries {
                if let Some(max) = max_entries {
                    if out.len() >= max {
                        return Ok(());
                    }
                }
                let name = entry_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string();
                let full = if dir.is_empty() { name } else { format!("{dir}/{}", entry_path.file_name().and_then(|n| n.to_str()).unwrap_or_default()) };
                out.push(full.clone());
                if recursive && stat.is_dir() {
                    self.listdir_into(&full, recursive, max_entries, out).await?;
                }
            }
            Ok(())
        })
    }
}
