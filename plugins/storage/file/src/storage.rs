use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use gyro_api::{StoreError, TelemetryRecord, TelemetryStore};

use super::config::{DeviceLine, FileStoreConfig};

const RECORDS_FILE: &str = "records.jsonl";
const DEVICES_FILE: &str = "devices.jsonl";

// ════════════════════════════════════════════════════════════════
//  FileStore
// ════════════════════════════════════════════════════════════════

/// JSON-lines store: one record per line in `records.jsonl`, one
/// registered device per line in `devices.jsonl`. Records are only ever
/// appended; `delete_all` truncates the records file.
pub struct FileStore {
    records_path: PathBuf,
    devices_path: PathBuf,
    /// Serializes writers so a wipe never interleaves with an append
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create the data directory if needed and open the store. A line
    /// left unterminated by an interrupted append is completed if it
    /// parses and cut off otherwise, so later appends start on a fresh line.
    pub async fn open(config: &FileStoreConfig) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&config.dir)
            .await
            .map_err(|e| StoreError::io(format!("mkdir {}: {e}", config.dir.display())))?;
        let store = Self {
            records_path: config.dir.join(RECORDS_FILE),
            devices_path: config.dir.join(DEVICES_FILE),
            write_lock: Mutex::new(()),
        };
        repair_tail(&store.records_path).await?;
        repair_tail(&store.devices_path).await?;
        Ok(store)
    }

    pub fn records_path(&self) -> &Path {
        &self.records_path
    }

    async fn read_records(&self) -> Result<Vec<TelemetryRecord>, StoreError> {
        read_lines(&self.records_path).await
    }

    async fn read_devices(&self) -> Result<Vec<String>, StoreError> {
        let lines: Vec<DeviceLine> = read_lines(&self.devices_path).await?;
        Ok(lines.into_iter().map(|l| l.device_id).collect())
    }
}

// ════════════════════════════════════════════════════════════════
//  TelemetryStore impl
// ════════════════════════════════════════════════════════════════

type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

impl TelemetryStore for FileStore {
    fn append(&self, record: &TelemetryRecord) -> StoreFuture<'_, ()> {
        let line = serde_json::to_string(record)
            .map_err(|e| StoreError::format_err(format!("json serialize: {e}")));
        Box::pin(async move {
            let line = line?;
            let _guard = self.write_lock.lock().await;
            append_line(&self.records_path, &line).await
        })
    }

    fn find_all(&self) -> StoreFuture<'_, Vec<TelemetryRecord>> {
        Box::pin(self.read_records())
    }

    fn find_by_device(&self, device_id: &str) -> StoreFuture<'_, Vec<TelemetryRecord>> {
        let device_id = device_id.to_string();
        Box::pin(async move {
            let mut records = self.read_records().await?;
            records.retain(|r| r.device_id == device_id);
            Ok(records)
        })
    }

    fn find_latest(&self, device_id: &str) -> StoreFuture<'_, Option<TelemetryRecord>> {
        let device_id = device_id.to_string();
        Box::pin(async move {
            let records = self.read_records().await?;
            Ok(records
                .into_iter()
                .filter(|r| r.device_id == device_id)
                .max_by_key(|r| r.sequence))
        })
    }

    fn delete_all(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            // Counted without parsing: a damaged file must still be wipeable.
            let count = count_lines(&self.records_path).await?;
            tokio::fs::write(&self.records_path, b"")
                .await
                .map_err(|e| StoreError::io(format!("truncate {}: {e}", self.records_path.display())))?;
            Ok(count)
        })
    }

    fn register_device(&self, device_id: &str) -> StoreFuture<'_, ()> {
        let device_id = device_id.to_string();
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            if self.read_devices().await?.contains(&device_id) {
                return Ok(());
            }
            let line = serde_json::to_string(&DeviceLine { device_id })?;
            append_line(&self.devices_path, &line).await
        })
    }

    fn list_devices(&self) -> StoreFuture<'_, Vec<String>> {
        Box::pin(self.read_devices())
    }

    fn flush(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            // Appends open and close the file each time; just wait for the
            // one in flight.
            let _guard = self.write_lock.lock().await;
            Ok(())
        })
    }
}

// ════════════════════════════════════════════════════════════════
//  Helpers
// ════════════════════════════════════════════════════════════════

async fn append_line(path: &Path, line: &str) -> Result<(), StoreError> {
    let mut f = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| StoreError::io(format!("open {}: {e}", path.display())))?;
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    f.write_all(&buf)
        .await
        .map_err(|e| StoreError::io(format!("write {}: {e}", path.display())))?;
    f.flush()
        .await
        .map_err(|e| StoreError::io(format!("flush {}: {e}", path.display())))
}

async fn read_bytes(path: &Path) -> Result<Vec<u8>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StoreError::io(format!("read {}: {e}", path.display()))),
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Parse every non-empty line of a JSONL file. A missing file reads as
/// empty. An unterminated last line that does not parse is the remains
/// of an interrupted append: it is skipped with a warning. Any other
/// bad line is a format error.
async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let content = read_bytes(path).await?;
    let terminated = content.last() == Some(&b'\n');
    let lines: Vec<&[u8]> = content.split(|&b| b == b'\n').collect();
    let last = lines.len() - 1;

    let mut items = Vec::with_capacity(lines.len());
    for (i, line) in lines.into_iter().enumerate() {
        if is_blank(line) {
            continue;
        }
        match serde_json::from_slice(line) {
            Ok(item) => items.push(item),
            Err(e) if i == last && !terminated => {
                tracing::warn!(
                    path = %path.display(),
                    line = i + 1,
                    bytes = line.len(),
                    error = %e,
                    "skipping torn trailing line"
                );
            }
            Err(e) => {
                return Err(StoreError::format_err(format!("{}:{}: {e}", path.display(), i + 1)));
            }
        }
    }
    Ok(items)
}

/// Non-blank, newline-terminated lines
async fn count_lines(path: &Path) -> Result<u64, StoreError> {
    let content = read_bytes(path).await?;
    Ok(content
        .split_inclusive(|&b| b == b'\n')
        .filter(|line| line.ends_with(b"\n") && !is_blank(line))
        .count() as u64)
}

/// Finish or drop an unterminated last line.
async fn repair_tail(path: &Path) -> Result<(), StoreError> {
    let content = read_bytes(path).await?;
    if content.is_empty() || content.ends_with(b"\n") {
        return Ok(());
    }
    let start = content.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
    let tail = &content[start..];

    if serde_json::from_slice::<serde_json::Value>(tail).is_ok() {
        append_line(path, "").await?;
        tracing::info!(path = %path.display(), "terminated last line");
        return Ok(());
    }

    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| StoreError::io(format!("open {}: {e}", path.display())))?;
    file.set_len(start as u64)
        .await
        .map_err(|e| StoreError::io(format!("truncate {}: {e}", path.display())))?;
    tracing::warn!(
        path = %path.display(),
        dropped_bytes = tail.len(),
        "dropped torn trailing line"
    );
    Ok(())
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
