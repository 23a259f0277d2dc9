//! Persistence of finished results.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use contactscout_shared::{Result, RetrievalResult, ScoutError};

/// Accepts one immutable result per record, in completion order.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn accept(&self, result: &RetrievalResult) -> Result<()>;

    /// Flush buffered output. Called once after the batch.
    async fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes each result as one JSON line.
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    /// Create (or truncate) the output file, making parent directories.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ScoutError::io(parent, e))?;
        }
        let file = File::create(&path)
            .await
            .map_err(|e| ScoutError::io(&path, e))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultSink for JsonLinesSink {
    async fn accept(&self, result: &RetrievalResult) -> Result<()> {
        let mut line = serde_json::to_vec(result).map_err(|e| ScoutError::Sink(e.to_string()))?;
        line.push(b'\n');

        // One write per line under the lock keeps lines whole.
        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| ScoutError::Sink(format!("{}: {e}", self.path.display())))?;
        debug!(record_id = result.record_id(), "result written");
        Ok(())
    }

    async fn finish(&self) -> Result<()> {
        let mut file = self.file.lock().await;
        file.flush()
            .await
            .map_err(|e| ScoutError::Sink(format!("{}: {e}", self.path.display())))?;
        file.sync_all()
            .await
            .map_err(|e| ScoutError::io(&self.path, e))
    }
}

/// Keeps results in memory.
#[derive(Default)]
pub struct MemorySink {
    results: std::sync::Mutex<Vec<RetrievalResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<RetrievalResult> {
        self.results
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn accept(&self, result: &RetrievalResult) -> Result<()> {
        self.results
            .lock()
            .map_err(|_| ScoutError::Sink("result buffer poisoned".into()))?
            .push(result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use contactscout_shared::{AuditTrail, MatchStatus, Termination};
    use uuid::Uuid;

    use super::*;

    fn not_found(id: &str) -> RetrievalResult {
        let mut trail = AuditTrail::new(id);
        trail.last_tier = 3;
        trail.visited_urls.push("https://npiprofile.com/npi/1".into());
        RetrievalResult::not_found(trail, Termination::TiersExhausted)
    }

    #[tokio::test]
    async fn writes_one_line_per_result() {
        let dir = std::env::temp_dir().join(format!("cs-sink-test-{}", Uuid::now_v7()));
        let path = dir.join("nested").join("results.jsonl");
        let sink = JsonLinesSink::create(&path).await.unwrap();

        sink.accept(&not_found("r-1")).await.unwrap();
        sink.accept(&not_found("r-2")).await.unwrap();
        sink.finish().await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: RetrievalResult = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.record_id(), "r-2");
        assert_eq!(parsed.status(), MatchStatus::NotFound);
        assert_eq!(parsed.tier(), 3);
        assert_eq!(parsed.visited_urls().len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn memory_sink_collects() {
        let sink = MemorySink::new();
        sink.accept(&not_found("r-1")).await.unwrap();
        assert_eq!(sink.results().len(), 1);
    }
}
