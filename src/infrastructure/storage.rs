//! Storage Adapter
//!
//! Hierarchical byte storage used by the node: recording sinks, the pending
//! transfer manifest and the files read back during transfer. Paths are
//! `/`-separated and relative to the storage root.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// One entry of a bounded directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub path: String,
    pub depth: usize,
    pub is_dir: bool,
    pub size: u64,
}

pub trait Storage {
    /// Create (or truncate) a file for writing
    fn create(&mut self, path: &str) -> io::Result<Box<dyn Write>>;

    fn open_read(&mut self, path: &str) -> io::Result<Box<dyn Read>>;

    fn exists(&self, path: &str) -> bool;

    fn delete(&mut self, path: &str) -> io::Result<()>;

    /// Append `line` plus a newline, creating the file if needed
    fn append_line(&mut self, path: &str, line: &str) -> io::Result<()>;

    fn read_lines(&self, path: &str) -> io::Result<Vec<String>>;

    /// Empty the file, creating it if needed
    fn truncate(&mut self, path: &str) -> io::Result<()>;

    /// Walk `dir` at most `max_depth` levels deep
    fn list(&self, dir: &str, max_depth: usize) -> io::Result<Vec<DirEntry>>;
}

/// Join a directory and a file name with `/`
pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

fn invalid_path(path: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("path escapes storage root: {}", path),
    )
}

// ------------------------------ Filesystem ------------------------------ //

/// Storage backed by a directory on the host filesystem
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(invalid_path(path));
        }
        Ok(self.root.join(relative))
    }

    fn ensure_parent(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn walk(
        &self,
        dir: &Path,
        prefix: &str,
        depth: usize,
        max_depth: usize,
        out: &mut Vec<DirEntry>,
    ) -> io::Result<()> {
        let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = entry.metadata()?;
            let path = join(prefix, &name);
            out.push(DirEntry {
                path: path.clone(),
                depth,
                is_dir: metadata.is_dir(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
            });
            if metadata.is_dir() && depth + 1 < max_depth {
                self.walk(&entry.path(), &path, depth + 1, max_depth, out)?;
            }
        }
        Ok(())
    }
}

impl Storage for FsStorage {
    fn create(&mut self, path: &str) -> io::Result<Box<dyn Write>> {
        let full = self.resolve(path)?;
        Self::ensure_parent(&full)?;
        let file = File::create(&full)?;
        debug!("Created {}", full.display());
        // Unbuffered so a failing write surfaces on the tick that made it
        Ok(Box::new(file))
    }

    fn open_read(&mut self, path: &str) -> io::Result<Box<dyn Read>> {
        let file = File::open(self.resolve(path)?)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn delete(&mut self, path: &str) -> io::Result<()> {
        fs::remove_file(self.resolve(path)?)
    }

    fn append_line(&mut self, path: &str, line: &str) -> io::Result<()> {
        let full = self.resolve(path)?;
        Self::ensure_parent(&full)?;
        let mut file = OpenOptions::new().create(true).append(true).open(full)?;
        writeln!(file, "{}", line)
    }

    fn read_lines(&self, path: &str) -> io::Result<Vec<String>> {
        let file = File::open(self.resolve(path)?)?;
        BufReader::new(file).lines().collect()
    }

    fn truncate(&mut self, path: &str) -> io::Result<()> {
        let full = self.resolve(path)?;
        Self::ensure_parent(&full)?;
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(full)?;
        Ok(())
    }

    fn list(&self, dir: &str, max_depth: usize) -> io::Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        if max_depth == 0 {
            return Ok(out);
        }
        let full = self.resolve(dir)?;
        self.walk(&full, dir.trim_end_matches('/'), 0, max_depth, &mut out)?;
        Ok(out)
    }
}

// ------------------------------- In-memory ------------------------------- //

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, Vec<u8>>,
    fail_writes: bool,
}

/// Shared in-memory storage. Clones see the same files, so a test can keep a
/// handle while the node owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or replace a whole file
    pub fn put(&self, path: &str, contents: impl AsRef<[u8]>) {
        self.state()
            .files
            .insert(path.to_string(), contents.as_ref().to_vec());
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(path).cloned()
    }

    /// Make every subsequent sink write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    pub fn paths(&self) -> Vec<String> {
        self.state().files.keys().cloned().collect()
    }
}

struct MemoryWriter {
    state: Arc<Mutex<MemoryState>>,
    path: String,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        state
            .files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::Other, "injected flush failure"));
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn create(&mut self, path: &str) -> io::Result<Box<dyn Write>> {
        self.state().files.insert(path.to_string(), Vec::new());
        Ok(Box::new(MemoryWriter {
            state: Arc::clone(&self.state),
            path: path.to_string(),
        }))
    }

    fn open_read(&mut self, path: &str) -> io::Result<Box<dyn Read>> {
        match self.state().files.get(path) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            None => Err(io::Error::new(io::ErrorKind::NotFound, path.to_string())),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.state().files.contains_key(path)
    }

    fn delete(&mut self, path: &str) -> io::Result<()> {
        match self.state().files.remove(path) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, path.to_string())),
        }
    }

    fn append_line(&mut self, path: &str, line: &str) -> io::Result<()> {
        let mut state = self.state();
        let file = state.files.entry(path.to_string()).or_default();
        file.extend_from_slice(line.as_bytes());
        file.push(b'\n');
        Ok(())
    }

    fn read_lines(&self, path: &str) -> io::Result<Vec<String>> {
        match self.state().files.get(path) {
            Some(bytes) => Ok(String::from_utf8_lossy(bytes)
                .lines()
                .map(str::to_string)
                .collect()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, path.to_string())),
        }
    }

    fn truncate(&mut self, path: &str) -> io::Result<()> {
        self.state().files.insert(path.to_string(), Vec::new());
        Ok(())
    }

    fn list(&self, dir: &str, max_depth: usize) -> io::Result<Vec<DirEntry>> {
        let dir = dir.trim_end_matches('/');
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };

        let state = self.state();
        let mut seen: BTreeMap<String, DirEntry> = BTreeMap::new();
        for (path, bytes) in state.files.iter() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            let parts: Vec<&str> = rest.split('/').collect();
            for (depth, _) in parts.iter().enumerate().take(max_depth) {
                let is_dir = depth + 1 < parts.len();
                let entry_path = join(dir, &parts[..=depth].join("/"));
                seen.entry(entry_path.clone()).or_insert(DirEntry {
                    path: entry_path,
                    depth,
                    is_dir,
                    size: if is_dir { 0 } else { bytes.len() as u64 },
                });
            }
        }
        Ok(seen.into_values().collect())
    }
}
