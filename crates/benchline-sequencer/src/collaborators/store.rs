use crate::error::{StorageError, StorageResult};
use benchline_core::Session;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Destination of finished sessions.
///
/// Called once per session, after it reached a terminal status.
pub trait SessionStore: Send + Sync {
    fn save<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, StorageResult<()>>;
}

/// Keeps sessions in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<Vec<Session>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `save` fail with a backend error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Saved sessions, oldest first.
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemoryStore {
    fn save<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Backend("store is read-only".into()));
            }
            self.sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(session.clone());
            Ok(())
        })
    }
}

/// Appends one JSON document per session to a file.
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonLinesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every stored session. A missing file holds no sessions.
    ///
    /// # Errors
    /// `StorageError::Io` if the file cannot be read and
    /// `StorageError::Serialization` for a corrupt line.
    pub async fn load_all(&self) -> StorageResult<Vec<Session>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StorageError::from))
            .collect()
    }
}

impl SessionStore for JsonLinesStore {
    fn save<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(session)?;
            line.push(b'\n');

            let _guard = self.write_lock.lock().await;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(&line).await?;
            file.flush().await?;

            debug!("Stored {} in {}", session.id, self.path.display());
            Ok(())
        })
    }
}
