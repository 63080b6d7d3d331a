//! Deterministic directory traversal

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use walkdir::{DirEntry, WalkDir};

use crate::archive::{DirectoryEntry, EntryKind};
use crate::error::ArchiveError;

/// Directory names pruned by default (interpreter bytecode caches)
pub const DEFAULT_IGNORED_DIRS: &[&str] = &["__pycache__"];

/// Configuration for which entries the walk skips
#[derive(Debug, Clone)]
pub struct WalkConfig {
    /// Skip every entry whose name starts with `.`
    pub skip_hidden: bool,
    /// Directory names pruned together with their contents
    pub ignored_dirs: Vec<String>,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            skip_hidden: true,
            ignored_dirs: DEFAULT_IGNORED_DIRS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl WalkConfig {
    fn is_ignored(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        if self.skip_hidden && name.starts_with('.') {
            return true;
        }
        entry.file_type().is_dir() && self.ignored_dirs.iter().any(|d| *d == name)
    }
}

/// A non-fatal problem met during the walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkIssue {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for WalkIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

/// Entries in traversal order plus everything that had to be skipped
#[derive(Debug, Clone, Default)]
pub struct WalkOutput {
    pub entries: Vec<DirectoryEntry>,
    pub issues: Vec<WalkIssue>,
}

/// Walks a directory depth-first.
///
/// Within each directory, files come first and subdirectories after, each
/// group sorted by name. The decoder rebuilds the hierarchy from this order
/// and the depth of each line alone.
pub struct TreeWalker {
    config: WalkConfig,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl TreeWalker {
    pub fn new(config: WalkConfig) -> Self {
        Self {
            config,
            cancel_flag: None,
        }
    }

    /// Check `flag` at every entry and stop with [`ArchiveError::Cancelled`] once it is set
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Walk `root`, returning the synthetic root entry followed by every kept descendant
    pub fn walk(&self, root: &Path) -> Result<WalkOutput, ArchiveError> {
        if !root.is_dir() {
            return Err(ArchiveError::NotADirectory(root.to_path_buf()));
        }
        let root_name = root_name(root)?;

        let mut output = WalkOutput::default();
        let config = self.config.clone();
        let mut walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by(files_before_dirs)
            .into_iter()
            .filter_entry(move |e| e.depth() == 0 || !config.is_ignored(e));

        while let Some(next) = walker.next() {
            if self.is_cancelled() {
                tracing::info!("Walk cancelled after {} entries", output.entries.len());
                return Err(ArchiveError::Cancelled);
            }

            let entry = match next {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                    tracing::warn!("Skipping unreadable entry {}: {}", path.display(), err);
                    output.issues.push(WalkIssue {
                        path,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            if entry.depth() == 0 {
                output.entries.push(DirectoryEntry {
                    relative_path: String::new(),
                    name: root_name.clone(),
                    kind: EntryKind::Directory,
                    depth: 0,
                });
                continue;
            }

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                tracing::debug!("Skipping symlink {}", entry.path().display());
                continue;
            }

            let relative_path = match relative_path(root, entry.path()) {
                Ok(path) => path,
                Err(reason) => {
                    tracing::warn!("Skipping {}: {}", entry.path().display(), reason);
                    output.issues.push(WalkIssue {
                        path: entry.path().to_path_buf(),
                        reason,
                    });
                    if file_type.is_dir() {
                        walker.skip_current_dir();
                    }
                    continue;
                }
            };

            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            let name = relative_path
                .rsplit('/')
                .next()
                .unwrap_or(relative_path.as_str())
                .to_string();

            tracing::debug!("Walked {:?} {}", kind, relative_path);
            output.entries.push(DirectoryEntry {
                relative_path,
                name,
                kind,
                depth: entry.depth(),
            });
        }

        Ok(output)
    }
}

impl Default for TreeWalker {
    fn default() -> Self {
        Self::new(WalkConfig::default())
    }
}

fn files_before_dirs(a: &DirEntry, b: &DirEntry) -> CmpOrdering {
    a.file_type()
        .is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}

/// Display name of the root line. It only labels the decode target, so it is
/// flattened to something a Structure line can hold instead of rejected.
fn root_name(root: &Path) -> Result<String, ArchiveError> {
    let canonical = root
        .canonicalize()
        .map_err(|e| ArchiveError::Io(e, root.to_path_buf()))?;
    let name = canonical
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| canonical.to_string_lossy().into_owned());
    let name = name.replace(['\n', '\r'], " ");
    let name = name.trim();
    Ok(if name.is_empty() { "root".to_string() } else { name.to_string() })
}

/// Slash separated path of `path` below `root`, if every component can be
/// written on a single document line
fn relative_path(root: &Path, path: &Path) -> Result<String, String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| format!("failed to strip root prefix: {}", e))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| "name is not valid UTF-8".to_string())?;
        if part.contains('\n') || part.contains('\r') {
            return Err("name contains a line break".to_string());
        }
        // Leading whitespace would read back as indentation
        if part.starts_with(char::is_whitespace) {
            return Err("name starts with whitespace".to_string());
        }
        parts.push(part);
    }
    Ok(parts.join("/"))
}
