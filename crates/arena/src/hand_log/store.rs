//! Append-only per-player hand log files.
//!
//! Each player has one file, `<dir>/<identity>.jsonl`, holding one JSON
//! record per completed hand. Records are appended with a single write so
//! concurrent sessions of the same player never interleave within a line.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::assembler::HandRecord;
use crate::identity::PlayerId;

/// Errors from reading or writing hand logs.
#[derive(Error, Debug)]
pub enum HandLogError {
    #[error("failed to serialize hand record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("hand log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hand log task failed: {0}")]
    Task(String),
}

/// Directory of per-player hand logs.
#[derive(Debug, Clone)]
pub struct HandLogStore {
    dir: PathBuf,
}

impl HandLogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The log file for a player.
    pub fn path_for(&self, player: &PlayerId) -> PathBuf {
        self.dir.join(format!("{player}.jsonl"))
    }

    /// Appends one record as a single line.
    ///
    /// The directory is created on first use.
    pub async fn append(&self, player: &PlayerId, record: &HandRecord) -> Result<(), HandLogError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let dir = self.dir.clone();
        let path = self.path_for(player);
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&dir)?;
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(&line)?;
            file.flush()
        })
        .await
        .map_err(|e| HandLogError::Task(e.to_string()))??;

        Ok(())
    }

    /// Reads a player's whole log.
    ///
    /// Returns `None` when the player has no log yet.
    pub async fn read(&self, player: &PlayerId) -> Result<Option<String>, HandLogError> {
        match tokio::fs::read_to_string(self.path_for(player)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
