//! Directory tree encoder

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::archive::{
    fence_for, ArchiveDocument, Compatibility, DirectoryEntry, FileFailure, FileRecord,
    CONTENTS_HEADER, FILE_HEADER_PREFIX, OVERVIEW_HEADER, STRUCTURE_HEADER, TITLE_PREFIX,
};
use crate::error::ArchiveError;
use crate::reader::read_text;
use crate::walker::{TreeWalker, WalkConfig, WalkIssue};

/// Directory name used by the original tool for side-car copies
pub const SIDECAR_DIR_NAME: &str = "selected_files_content";

/// A standalone copy of one allow-listed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sidecar {
    pub source: PathBuf,
    /// `<basename>.txt`
    pub file_name: String,
    pub content: String,
}

/// Everything one encode call produces
#[derive(Debug, Clone)]
pub struct EncodeOutput {
    pub document: ArchiveDocument,
    /// Relative paths of files listed in the structure but not embedded
    pub incompatible: Vec<String>,
    pub sidecars: Vec<Sidecar>,
    /// Entries the walk had to skip
    pub walk_issues: Vec<WalkIssue>,
}

/// Encodes a directory tree into an archive document
pub struct Encoder {
    walk_config: WalkConfig,
    overview: Option<String>,
    selected: Vec<PathBuf>,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl Encoder {
    /// Create a new encoder with the default walk configuration
    pub fn new() -> Self {
        Self {
            walk_config: WalkConfig::default(),
            overview: None,
            selected: Vec::new(),
            cancel_flag: None,
        }
    }

    pub fn with_walk_config(mut self, config: WalkConfig) -> Self {
        self.walk_config = config;
        self
    }

    /// Opaque text placed before the structure section
    pub fn with_overview(mut self, overview: impl Into<String>) -> Self {
        self.overview = Some(overview.into());
        self
    }

    /// Files to also return as standalone side-car copies
    pub fn with_selected(mut self, paths: Vec<PathBuf>) -> Self {
        self.selected = paths;
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    fn check_cancelled(&self) -> Result<(), ArchiveError> {
        match &self.cancel_flag {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(ArchiveError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Encode the tree under `root`
    pub fn encode(&self, root: &Path) -> Result<EncodeOutput, ArchiveError> {
        self.check_cancelled()?;

        let mut walker = TreeWalker::new(self.walk_config.clone());
        if let Some(flag) = &self.cancel_flag {
            walker = walker.with_cancel_flag(flag.clone());
        }
        let walked = walker.walk(root)?;

        let root_name = walked
            .entries
            .first()
            .map(|entry| entry.name.clone())
            .unwrap_or_default();

        let mut document = ArchiveDocument::new();
        document.push(format!("{}{}", TITLE_PREFIX, root_name));
        document.push_blank();

        if let Some(overview) = &self.overview {
            Self::encode_overview(&mut document, overview);
        }

        Self::encode_structure(&mut document, &walked.entries);

        document.push(CONTENTS_HEADER);
        document.push_blank();

        let mut incompatible = Vec::new();
        let mut embedded = 0usize;
        for entry in walked.entries.iter().filter(|e| !e.is_dir()) {
            let compatibility = Compatibility::classify(&entry.name);
            if compatibility == Compatibility::Incompatible {
                tracing::debug!("Skipping incompatible file: {}", entry.relative_path);
                incompatible.push(entry.relative_path.clone());
                continue;
            }

            self.check_cancelled()?;
            let content = read_text(&root.join(&entry.relative_path));
            let record = FileRecord {
                entry: entry.clone(),
                content: content.text,
                origin: content.origin,
                compatibility,
            };
            Self::encode_file(&mut document, &record);
            embedded += 1;
        }

        let sidecars = self.collect_sidecars()?;

        tracing::info!(
            "Encoded {}: {} entries, {} embedded, {} incompatible",
            root.display(),
            walked.entries.len(),
            embedded,
            incompatible.len()
        );

        Ok(EncodeOutput {
            document,
            incompatible,
            sidecars,
            walk_issues: walked.issues,
        })
    }

    fn encode_overview(document: &mut ArchiveDocument, overview: &str) {
        let lines: Vec<&str> = overview.trim_end_matches('\n').split('\n').collect();
        let fence = fence_for(lines.iter().copied());

        document.push(OVERVIEW_HEADER);
        document.push_blank();
        document.push(format!("{}markdown", fence));
        for line in lines {
            document.push(line);
        }
        document.push(fence);
        document.push_blank();
    }

    fn encode_structure(document: &mut ArchiveDocument, entries: &[DirectoryEntry]) {
        let lines: Vec<String> = entries.iter().map(DirectoryEntry::structure_line).collect();
        let fence = fence_for(lines.iter().map(String::as_str));

        document.push(STRUCTURE_HEADER);
        document.push_blank();
        document.push(fence.clone());
        for line in lines {
            document.push(line);
        }
        document.push(fence);
        document.push_blank();
    }

    /// Encode a single file block.
    ///
    /// Content is split on `\n` only, one piece per line, so the decoder
    /// recovers it exactly by joining the fenced lines with `\n`.
    fn encode_file(document: &mut ArchiveDocument, record: &FileRecord) {
        let lines: Vec<&str> = record.content.split('\n').collect();
        let fence = fence_for(lines.iter().copied());

        document.push(format!("{}{}", FILE_HEADER_PREFIX, record.entry.relative_path));
        document.push_blank();
        document.push(format!("{}{}", fence, record.info_string()));
        for line in lines {
            document.push(line);
        }
        document.push(fence);
        document.push_blank();
    }

    fn collect_sidecars(&self) -> Result<Vec<Sidecar>, ArchiveError> {
        let mut sidecars = Vec::with_capacity(self.selected.len());
        for source in &self.selected {
            self.check_cancelled()?;

            let Some(base) = source.file_name() else {
                tracing::warn!("Skipping side-car without a file name: {}", source.display());
                continue;
            };
            let content = read_text(source);
            sidecars.push(Sidecar {
                source: source.clone(),
                file_name: format!("{}.txt", base.to_string_lossy()),
                content: content.text,
            });
        }
        Ok(sidecars)
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write side-cars into `dir`, creating it if needed.
///
/// Individual write failures are returned, not raised. A side-car whose name
/// is already taken by an earlier one is reported instead of overwriting it.
pub fn write_sidecars(dir: &Path, sidecars: &[Sidecar]) -> Result<Vec<FileFailure>, ArchiveError> {
    std::fs::create_dir_all(dir).map_err(|e| ArchiveError::Io(e, dir.to_path_buf()))?;

    let mut failures = Vec::new();
    let mut claimed: HashMap<&str, &Path> = HashMap::new();
    for sidecar in sidecars {
        if let Some(first) = claimed.get(sidecar.file_name.as_str()) {
            tracing::warn!(
                "Side-car name {} of {} is already used by {}",
                sidecar.file_name,
                sidecar.source.display(),
                first.display()
            );
            failures.push(FileFailure {
                path: sidecar.source.display().to_string(),
                reason: format!(
                    "side-car name {} is already used by {}",
                    sidecar.file_name,
                    first.display()
                ),
            });
            continue;
        }
        claimed.insert(&sidecar.file_name, &sidecar.source);

        let path = dir.join(&sidecar.file_name);
        match std::fs::write(&path, &sidecar.content) {
            Ok(()) => tracing::debug!("Created side-car {}", path.display()),
            Err(e) => {
                tracing::warn!("Failed to write side-car {}: {}", path.display(), e);
                failures.push(FileFailure {
                    path: sidecar.source.display().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(failures)
}

/// Write the list of incompatible files in the original tool's report format
pub fn write_incompatible_report(path: &Path, incompatible: &[String]) -> Result<(), ArchiveError> {
    let mut report = String::from("Incompatible files:\n");
    report.push_str(&incompatible.join("\n"));
    std::fs::write(path, report).map_err(|e| ArchiveError::Io(e, path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, relative: &str, content: &[u8]) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn project() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir(&root).unwrap();
        (dir, root)
    }

    #[test]
    fn test_encode_simple_tree() {
        let (_dir, root) = project();
        write(&root, "a.txt", b"hi");
        write(&root, "sub/b.txt", b"bye");

        let output = Encoder::new().encode(&root).unwrap();
        let text = output.document.to_text();

        let expected = "\
# Project Documentation: root

## Project Structure

```
root/
  a.txt
  sub/
    b.txt
```

## Files Content

### File: a.txt

```text
hi
```

### File: sub/b.txt

```text
bye
```

";
        assert_eq!(text, expected);
        assert!(output.incompatible.is_empty());
    }

    #[test]
    fn test_encode_empty_tree() {
        let (_dir, root) = project();

        let output = Encoder::new().encode(&root).unwrap();
        let lines = output.document.lines();

        let structure = lines.iter().position(|l| l == STRUCTURE_HEADER).unwrap();
        assert_eq!(lines[structure + 2], "```");
        assert_eq!(lines[structure + 3], "root/");
        assert_eq!(lines[structure + 4], "```");
        assert_eq!(lines.last().unwrap(), "");
        assert!(!lines.iter().any(|l| l.starts_with(FILE_HEADER_PREFIX)));
    }

    #[test]
    fn test_encode_incompatible_files_not_embedded() {
        let (_dir, root) = project();
        write(&root, "logo.png", &[0x89, 0x50, 0x4E, 0x47, 0x00, 0xFF]);
        write(&root, "main.py", b"print('hi')");

        let output = Encoder::new().encode(&root).unwrap();
        let text = output.document.to_text();

        assert_eq!(output.incompatible, vec!["logo.png".to_string()]);
        assert!(text.contains("\n  logo.png\n"));
        assert!(!text.contains("### File: logo.png"));
        assert!(text.contains("### File: main.py\n\n```python\nprint('hi')\n```\n"));
    }

    #[test]
    fn test_encode_widens_fence_for_conflicting_content() {
        let (_dir, root) = project();
        write(&root, "notes.md", b"before\n```\ninside\n```\nafter");

        let output = Encoder::new().encode(&root).unwrap();
        let text = output.document.to_text();

        assert!(text.contains("````markdown\nbefore\n```\ninside\n```\nafter\n````\n"));
    }

    #[test]
    fn test_encode_tags_detected_encoding() {
        let (_dir, root) = project();
        write(&root, "legacy.txt", b"na\xefve caf\xe9 r\xe9sum\xe9 fa\xe7ade");

        let output = Encoder::new().encode(&root).unwrap();
        let text = output.document.to_text();

        assert!(text.contains("```text encoding="));
    }

    #[test]
    fn test_encode_with_overview() {
        let (_dir, root) = project();
        write(&root, "a.txt", b"hi");

        let output = Encoder::new()
            .with_overview("## Project Structure\nA tricky overview.\n")
            .encode(&root)
            .unwrap();
        let lines = output.document.lines();

        assert_eq!(lines[2], OVERVIEW_HEADER);
        assert_eq!(lines[4], "```markdown");
        assert_eq!(lines[5], "## Project Structure");
        assert_eq!(lines[6], "A tricky overview.");
        assert_eq!(lines[7], "```");
    }

    #[test]
    fn test_encode_is_deterministic() {
        let (_dir, root) = project();
        write(&root, "z.txt", b"z");
        write(&root, "a/b/c.md", b"# c");
        write(&root, "a/a.json", b"{}");

        let first = Encoder::new().encode(&root).unwrap().document.to_text();
        let second = Encoder::new().encode(&root).unwrap().document.to_text();
        assert_eq!(first, second);
    }

    #[test]
    fn test_encode_collects_sidecars() {
        let (dir, root) = project();
        write(&root, "a.txt", b"hi");
        let outside = dir.path().join("extra.py");
        fs::write(&outside, "x = 1").unwrap();

        let output = Encoder::new()
            .with_selected(vec![outside.clone()])
            .encode(&root)
            .unwrap();
        assert_eq!(output.sidecars.len(), 1);
        assert_eq!(output.sidecars[0].file_name, "extra.py.txt");
        assert_eq!(output.sidecars[0].content, "x = 1");

        let sidecar_dir = dir.path().join(SIDECAR_DIR_NAME);
        let failures = write_sidecars(&sidecar_dir, &output.sidecars).unwrap();
        assert!(failures.is_empty());
        assert_eq!(fs::read_to_string(sidecar_dir.join("extra.py.txt")).unwrap(), "x = 1");
    }

    #[test]
    fn test_write_sidecars_reports_name_collisions() {
        let (dir, root) = project();
        write(&root, "a/util.py", b"first = 1");
        write(&root, "b/util.py", b"second = 2");

        let output = Encoder::new()
            .with_selected(vec![root.join("a/util.py"), root.join("b/util.py")])
            .encode(&root)
            .unwrap();
        assert_eq!(output.sidecars.len(), 2);

        let sidecar_dir = dir.path().join(SIDECAR_DIR_NAME);
        let failures = write_sidecars(&sidecar_dir, &output.sidecars).unwrap();

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, root.join("b/util.py").display().to_string());
        assert!(failures[0].reason.contains("util.py.txt"));
        assert_eq!(
            fs::read_to_string(sidecar_dir.join("util.py.txt")).unwrap(),
            "first = 1"
        );
    }

    #[test]
    fn test_write_incompatible_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incompatible_files.txt");
        write_incompatible_report(&path, &["a.png".to_string(), "b/c.bin".to_string()]).unwrap();
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "Incompatible files:\na.png\nb/c.bin"
        );
    }

    #[test]
    fn test_encode_cancelled() {
        let (_dir, root) = project();
        let flag = Arc::new(AtomicBool::new(true));
        let result = Encoder::new().with_cancel_flag(flag).encode(&root);
        assert!(matches!(result, Err(ArchiveError::Cancelled)));
    }
}
