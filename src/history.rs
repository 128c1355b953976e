//! Per-peer chat history persistence
//!
//! Histories are keyed by the peer's display name. Changes are staged with
//! [`HistoryStore::replace`] and written by [`HistoryStore::save`]; each staged
//! document is rewritten in full, and documents of other peers are left alone.

use anyhow::{Context, Result};
use async_trait::async_trait;
use btchat_shared::{codec, ChatHistory};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, info};

/// Key-value store of chat histories, one document per peer name
#[async_trait]
pub trait HistoryStore: Send {
    /// History for `name`; empty if nothing was stored yet
    async fn load(&mut self, name: &str) -> Result<ChatHistory>;

    /// Stage `doc` as the full history for `name`
    async fn replace(&mut self, name: &str, doc: ChatHistory) -> Result<()>;

    /// Persist every staged document
    async fn save(&mut self) -> Result<()>;
}

/// History store writing one file per peer under a directory
pub struct FileHistoryStore {
    dir: PathBuf,
    staged: HashMap<String, ChatHistory>,
}

impl FileHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            staged: HashMap::new(),
        }
    }

    /// Path of the document stored for `name`
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.history", file_stem(name)))
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn load(&mut self, name: &str) -> Result<ChatHistory> {
        if let Some(doc) = self.staged.get(name) {
            return Ok(doc.clone());
        }

        let path = self.path_for(name);
        match tokio::fs::read(&path).await {
            Ok(buf) => {
                let doc = codec::decode(&buf)
                    .with_context(|| format!("corrupt history file {}", path.display()))?;
                debug!("[HISTORY] Loaded {} lines for {}", doc.len(), name);
                Ok(doc)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ChatHistory::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn replace(&mut self, name: &str, doc: ChatHistory) -> Result<()> {
        self.staged.insert(name.to_string(), doc);
        Ok(())
    }

    async fn save(&mut self) -> Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;

        let writes = self
            .staged
            .iter()
            .map(|(name, doc)| write_document(self.path_for(name), doc));
        try_join_all(writes).await?;

        info!("[HISTORY] Saved {} document(s)", self.staged.len());
        self.staged.clear();
        Ok(())
    }
}

/// Write a document to a temp file and rename it into place
async fn write_document(path: PathBuf, doc: &ChatHistory) -> Result<()> {
    let encoded = codec::encode(doc)?;
    let tmp = path.with_extension("history.tmp");

    tokio::fs::write(&tmp, &encoded)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

/// File-name-safe form of a display name
fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "_".to_string()
    } else {
        stem
    }
}
