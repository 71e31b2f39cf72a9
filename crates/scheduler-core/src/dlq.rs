//! Dead-letter queue (§3, §4.9): a bounded ring, oldest entry dropped on
//! overflow, optionally mirrored to an append-only `dlq.jsonl` file that is
//! rewritten atomically on `pop`/`clear` — the same tmp-write-then-rename
//! discipline the teacher's lease store uses for its own on-disk state.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use agent_common::DlqEntry;

const DEFAULT_CAPACITY: usize = 1000;

pub struct DeadLetterQueue {
    capacity: usize,
    entries: VecDeque<DlqEntry>,
    mirror_path: Option<PathBuf>,
}

impl DeadLetterQueue {
    pub fn new(capacity: usize, mirror_dir: Option<PathBuf>) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            mirror_path: mirror_dir.map(|dir| dir.join("dlq.jsonl")),
        }
    }

    pub fn with_default_capacity(mirror_dir: Option<PathBuf>) -> Self {
        Self::new(DEFAULT_CAPACITY, mirror_dir)
    }

    /// Loads a pre-existing `dlq.jsonl` mirror, if any, so entries survive a
    /// process restart.
    pub fn load(capacity: usize, mirror_dir: Option<PathBuf>) -> std::io::Result<Self> {
        let mut queue = Self::new(capacity, mirror_dir);
        if let Some(path) = queue.mirror_path.clone()
            && path.exists()
        {
            let raw = std::fs::read_to_string(&path)?;
            for line in raw.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(entry) = serde_json::from_str::<DlqEntry>(line) {
                    queue.entries.push_back(entry);
                }
            }
            while queue.entries.len() > queue.capacity {
                queue.entries.pop_front();
            }
        }
        Ok(queue)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pushes `entry`, dropping the oldest on overflow, and appends the
    /// entry to the mirror file (a pure append, no rewrite needed unless
    /// the ring itself just overflowed).
    pub async fn push(&mut self, entry: DlqEntry) -> std::io::Result<()> {
        let overflowed = self.entries.len() >= self.capacity;
        if overflowed {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);

        if overflowed {
            self.rewrite().await
        } else {
            self.append_last().await
        }
    }

    pub fn pop(&mut self) -> Option<DlqEntry> {
        self.entries.pop_front()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> impl Iterator<Item = &DlqEntry> {
        self.entries.iter()
    }

    /// Call after `pop`/`clear` to keep the mirror file in sync with the
    /// in-memory ring.
    pub async fn sync_mirror(&self) -> std::io::Result<()> {
        self.rewrite().await
    }

    async fn append_last(&self) -> std::io::Result<()> {
        let Some(path) = self.mirror_path.clone() else {
            return Ok(());
        };
        let Some(entry) = self.entries.back().cloned() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || append_line(&path, &entry))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?
    }

    async fn rewrite(&self) -> std::io::Result<()> {
        let Some(path) = self.mirror_path.clone() else {
            return Ok(());
        };
        let entries: Vec<DlqEntry> = self.entries.iter().cloned().collect();
        tokio::task::spawn_blocking(move || rewrite_file(&path, &entries))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?
    }
}

fn append_line(path: &Path, entry: &DlqEntry) -> std::io::Result<()> {
    use std::io::Write;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", serde_json::to_string(entry)?)?;
    Ok(())
}

fn rewrite_file(path: &Path, entries: &[DlqEntry]) -> std::io::Result<()> {
    if entries.is_empty() {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        return Ok(());
    }
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other("invalid dlq mirror path"))?;
    std::fs::create_dir_all(dir)?;

    let mut body = String::new();
    for entry in entries {
        body.push_str(&serde_json::to_string(entry)?);
        body.push('\n');
    }
    let tmp = path.with_extension("jsonl.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}
