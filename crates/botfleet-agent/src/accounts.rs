//! Persistent account list: one previously authenticated handle per line.

use botfleet_core::AgentHandle;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

pub struct AccountStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AccountStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored handles in file order. A missing file is an empty list.
    pub async fn load(&self) -> botfleet_core::Result<Vec<AgentHandle>> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out: Vec<AgentHandle> = Vec::new();
        for name in parse_lines(&text) {
            let handle = AgentHandle::new(name);
            if !out.contains(&handle) {
                out.push(handle);
            }
        }
        Ok(out)
    }

    /// Append `name` unless already present. Returns whether it was added.
    pub async fn record(&self, name: &str) -> botfleet_core::Result<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(false);
        }
        let _guard = self.write_lock.lock().await;

        let existing = match fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        if parse_lines(&existing).any(|n| n == name) {
            return Ok(false);
        }

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut line = String::new();
        if !existing.is_empty() && !existing.ends_with('\n') {
            line.push('\n');
        }
        line.push_str(name);
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        info!(account = name, path = %self.path.display(), "account saved");
        Ok(true)
    }
}

fn parse_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::new(dir.path().join("accounts.txt"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_appends_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::new(dir.path().join("accounts.txt"));
        assert!(store.record("Alice").await.unwrap());
        assert!(store.record("Bob").await.unwrap());
        assert!(!store.record("Alice").await.unwrap());
        let names: Vec<String> = store
            .load()
            .await
            .unwrap()
            .iter()
            .map(|h| h.to_string())
            .collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
    }

    #[tokio::test]
    async fn load_skips_blanks_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.txt");
        std::fs::write(&path, "Alice\n\n  Bob  \nAlice\n").unwrap();
        let store = AccountStore::new(&path);
        let names: Vec<String> = store
            .load()
            .await
            .unwrap()
            .iter()
            .map(|h| h.to_string())
            .collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
    }

    #[tokio::test]
    async fn record_repairs_missing_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.txt");
        std::fs::write(&path, "Alice").unwrap();
        let store = AccountStore::new(&path);
        store.record("Bob").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Alice\nBob\n");
    }
}
