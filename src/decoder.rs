//! Archive document decoder

use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::archive::{
    parse_opening_fence, resolve_relative, EntryKind, FileFailure, StructureLine,
    CONTENTS_HEADER, FILE_HEADER_PREFIX, OVERVIEW_HEADER, STRUCTURE_HEADER, TITLE_PREFIX,
};
use crate::error::ArchiveError;

/// One filesystem step of a decode, relative to the target root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Create a directory (the empty path is the target root itself)
    CreateDir(String),
    /// Create an empty file as part of the skeleton
    CreateFile(String),
    /// Write a file's embedded content
    WriteFile { path: String, content: String },
}

impl Operation {
    pub fn path(&self) -> &str {
        match self {
            Operation::CreateDir(path) | Operation::CreateFile(path) => path,
            Operation::WriteFile { path, .. } => path,
        }
    }
}

/// Result of parsing a document, before anything touches the disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodePlan {
    /// Name from the title line, if present
    pub title: Option<String>,
    pub overview: Option<String>,
    /// Structure lines with explicit depths, in document order
    pub structure: Vec<StructureLine>,
    /// Skeleton operations first, then content writes
    pub operations: Vec<Operation>,
    /// File blocks that could not be parsed
    pub issues: Vec<FileFailure>,
}

impl DecodePlan {
    /// Number of files with embedded content
    pub fn embedded_files(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::WriteFile { .. }))
            .count()
    }
}

/// What a decode did on disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeReport {
    pub created_dirs: usize,
    pub written_files: usize,
    pub failures: Vec<FileFailure>,
}

impl DecodeReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A fenced block located in the document
struct Fenced<'a> {
    info: &'a str,
    body: Vec<&'a str>,
    /// Index of the first line after the closing fence
    next: usize,
}

/// Decodes archive documents back into directory trees
pub struct Decoder {
    // Currently stateless
}

impl Decoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self {}
    }

    /// Parse a document and recreate its tree under `target`.
    ///
    /// Fails without touching the disk when the document has no usable
    /// Structure section. Per-file problems end up in the report.
    pub fn decode_into(&self, input: &str, target: &Path) -> Result<DecodeReport, ArchiveError> {
        let plan = self.parse(input)?;
        Ok(self.apply(&plan, target))
    }

    /// Parse a document into a plan
    pub fn parse(&self, input: &str) -> Result<DecodePlan, ArchiveError> {
        let lines: Vec<&str> = input.split('\n').collect();
        let mut plan = DecodePlan::default();

        let structure_at = self.parse_preamble(&lines, &mut plan)?;
        let after_structure = self.parse_structure(&lines, structure_at, &mut plan)?;

        match find_header(&lines, after_structure, CONTENTS_HEADER) {
            Some(contents_at) => self.parse_contents(&lines, contents_at + 1, &mut plan),
            None => tracing::warn!("Section '{}' not found, no content to write", CONTENTS_HEADER),
        }

        tracing::debug!(
            "Parsed {} operations, {} issues",
            plan.operations.len(),
            plan.issues.len()
        );
        Ok(plan)
    }

    /// Read the title and overview; return the index of the Structure header
    fn parse_preamble(&self, lines: &[&str], plan: &mut DecodePlan) -> Result<usize, ArchiveError> {
        let mut i = 0;
        while i < lines.len() {
            let line = grammar(lines[i]);

            if line == STRUCTURE_HEADER {
                return Ok(i);
            }

            if let Some(title) = line.strip_prefix(TITLE_PREFIX) {
                plan.title.get_or_insert_with(|| title.trim().to_string());
            } else if line == OVERVIEW_HEADER {
                if let Some(start) = next_non_blank(lines, i + 1) {
                    if parse_opening_fence(lines[start]).is_some() {
                        let block = read_fenced(lines, start).ok_or(ArchiveError::UnterminatedFence {
                            section: OVERVIEW_HEADER,
                            line: start + 1,
                        })?;
                        plan.overview = Some(block.body.join("\n"));
                        i = block.next;
                        continue;
                    }
                }
            } else if parse_opening_fence(line).is_some() {
                // Stray fenced block, its content cannot be a header
                match read_fenced(lines, i) {
                    Some(block) => {
                        i = block.next;
                        continue;
                    }
                    None => break,
                }
            }
            i += 1;
        }
        Err(ArchiveError::MissingSection(STRUCTURE_HEADER))
    }

    /// Turn the Structure block into skeleton operations.
    ///
    /// The directory stack is local to this call: before each line it is cut
    /// back to the line's depth, so each line resolves against its parent.
    fn parse_structure(
        &self,
        lines: &[&str],
        header_at: usize,
        plan: &mut DecodePlan,
    ) -> Result<usize, ArchiveError> {
        let malformed = |line: usize, reason: &str| ArchiveError::MalformedStructure {
            line: line + 1,
            reason: reason.to_string(),
        };

        let start = next_non_blank(lines, header_at + 1)
            .filter(|&i| parse_opening_fence(lines[i]).is_some())
            .ok_or_else(|| malformed(header_at, "structure header is not followed by a fenced block"))?;
        let block = read_fenced(lines, start).ok_or(ArchiveError::UnterminatedFence {
            section: STRUCTURE_HEADER,
            line: start + 1,
        })?;

        let mut stack: Vec<String> = Vec::new();
        for (offset, raw) in block.body.iter().enumerate() {
            let line_no = start + 1 + offset;
            let Some(entry) = StructureLine::parse(raw).map_err(|reason| malformed(line_no, &reason))? else {
                continue;
            };

            if plan.structure.is_empty() {
                if entry.depth != 0 || entry.kind != EntryKind::Directory {
                    return Err(malformed(line_no, "first entry must be the root directory"));
                }
                plan.operations.push(Operation::CreateDir(String::new()));
                plan.structure.push(entry);
                continue;
            }

            if entry.depth == 0 {
                return Err(malformed(line_no, "more than one root directory"));
            }
            if entry.depth > stack.len() + 1 {
                return Err(malformed(line_no, "entry skips a directory level"));
            }
            stack.truncate(entry.depth - 1);

            let path = if stack.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", stack.join("/"), entry.name)
            };
            match entry.kind {
                EntryKind::Directory => {
                    stack.push(entry.name.clone());
                    plan.operations.push(Operation::CreateDir(path));
                }
                EntryKind::File => plan.operations.push(Operation::CreateFile(path)),
            }
            plan.structure.push(entry);
        }

        if plan.structure.is_empty() {
            return Err(malformed(start, "structure block is empty"));
        }
        Ok(block.next)
    }

    /// Collect one write per `### File:` block. Problems are recorded per file
    fn parse_contents(&self, lines: &[&str], from: usize, plan: &mut DecodePlan) {
        let mut i = from;
        while i < lines.len() {
            let line = grammar(lines[i]);

            if let Some(path) = line.strip_prefix(FILE_HEADER_PREFIX) {
                let path = path.to_string();
                let Some(start) = next_non_blank(lines, i + 1)
                    .filter(|&s| parse_opening_fence(lines[s]).is_some())
                else {
                    tracing::warn!("File block '{}' has no content fence", path);
                    plan.issues.push(FileFailure {
                        path,
                        reason: "missing content fence".to_string(),
                    });
                    i += 1;
                    continue;
                };

                match read_fenced(lines, start) {
                    Some(block) => {
                        tracing::debug!("Parsed content for {} ({})", path, block.info);
                        plan.operations.push(Operation::WriteFile {
                            path,
                            content: block.body.join("\n"),
                        });
                        i = block.next;
                    }
                    None => {
                        tracing::warn!("File block '{}' has an unterminated fence", path);
                        plan.issues.push(FileFailure {
                            path,
                            reason: format!("unterminated content fence at line {}", start + 1),
                        });
                        return;
                    }
                }
                continue;
            }

            if parse_opening_fence(line).is_some() {
                match read_fenced(lines, i) {
                    Some(block) => {
                        i = block.next;
                        continue;
                    }
                    None => return,
                }
            }
            i += 1;
        }
    }

    /// Perform the plan's operations under `target`.
    ///
    /// Every failing operation is recorded and skipped; the rest still run.
    pub fn apply(&self, plan: &DecodePlan, target: &Path) -> DecodeReport {
        let mut report = DecodeReport {
            failures: plan.issues.clone(),
            ..Default::default()
        };
        let mut failed: HashSet<&str> = HashSet::new();

        for op in &plan.operations {
            let result = resolve_relative(target, op.path()).and_then(|path| {
                let outcome = match op {
                    Operation::CreateDir(_) => fs::create_dir_all(&path),
                    Operation::CreateFile(_) => {
                        create_parent(&path).and_then(|()| fs::File::create(&path).map(|_| ()))
                    }
                    Operation::WriteFile { content, .. } => {
                        create_parent(&path).and_then(|()| write_file(&path, content))
                    }
                };
                outcome.map_err(|e| e.to_string())
            });

            match result {
                Ok(()) => match op {
                    Operation::CreateDir(path) => {
                        tracing::debug!("Created directory '{}'", path);
                        report.created_dirs += 1;
                    }
                    Operation::CreateFile(path) => tracing::debug!("Created file '{}'", path),
                    Operation::WriteFile { path, .. } => {
                        tracing::debug!("Wrote content to '{}'", path);
                        report.written_files += 1;
                    }
                },
                Err(reason) => {
                    tracing::warn!("Failed to write '{}': {}", op.path(), reason);
                    if failed.insert(op.path()) {
                        report.failures.push(FileFailure {
                            path: op.path().to_string(),
                            reason,
                        });
                    }
                }
            }
        }

        tracing::info!(
            "Decoded into {}: {} directories, {} files written, {} failures",
            target.display(),
            report.created_dirs,
            report.written_files,
            report.failures.len()
        );
        report
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// A line as the grammar sees it, tolerant of CRLF documents
fn grammar(line: &str) -> &str {
    line.trim_end_matches('\r')
}

fn next_non_blank(lines: &[&str], from: usize) -> Option<usize> {
    (from..lines.len()).find(|&i| !lines[i].trim().is_empty())
}

/// Index of `header` at top level, starting at `from` and skipping fenced blocks
fn find_header(lines: &[&str], from: usize, header: &str) -> Option<usize> {
    let mut i = from;
    while i < lines.len() {
        let line = grammar(lines[i]);
        if line == header {
            return Some(i);
        }
        if parse_opening_fence(line).is_some() {
            i = read_fenced(lines, i)?.next;
            continue;
        }
        i += 1;
    }
    None
}

/// Read the block opened at `start`; `None` if it is never closed
fn read_fenced<'a>(lines: &[&'a str], start: usize) -> Option<Fenced<'a>> {
    let (fence, info) = parse_opening_fence(lines[start])?;
    let close = (start + 1..lines.len()).find(|&i| grammar(lines[i]) == fence)?;
    Some(Fenced {
        info,
        body: lines[start + 1..close].to_vec(),
        next: close + 1,
    })
}

fn create_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

/// Write `content` through a buffered handle that is flushed before it is
/// dropped, on the error path too
fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    let written = writer.write_all(content.as_bytes());
    let flushed = writer.flush();
    written.and(flushed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "\
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

    #[test]
    fn test_parse_simple_document() {
        let plan = Decoder::new().parse(SIMPLE).unwrap();

        assert_eq!(plan.title.as_deref(), Some("root"));
        assert_eq!(plan.structure.len(), 4);
        assert_eq!(
            plan.operations,
            vec![
                Operation::CreateDir(String::new()),
                Operation::CreateFile("a.txt".into()),
                Operation::CreateDir("sub".into()),
                Operation::CreateFile("sub/b.txt".into()),
                Operation::WriteFile { path: "a.txt".into(), content: "hi".into() },
                Operation::WriteFile { path: "sub/b.txt".into(), content: "bye".into() },
            ]
        );
        assert!(plan.issues.is_empty());
        assert_eq!(plan.embedded_files(), 2);
    }

    #[test]
    fn test_parse_files_after_nested_dirs_return_to_parent() {
        let input = "\
## Project Structure
```
root/
  a/
    b/
      deep.txt
  top.txt
```
";
        let plan = Decoder::new().parse(input).unwrap();
        assert_eq!(
            plan.operations,
            vec![
                Operation::CreateDir(String::new()),
                Operation::CreateDir("a".into()),
                Operation::CreateDir("a/b".into()),
                Operation::CreateFile("a/b/deep.txt".into()),
                Operation::CreateFile("top.txt".into()),
            ]
        );
    }

    #[test]
    fn test_parse_missing_structure_fails() {
        let input = "# Project Documentation: x\n\n## Files Content\n\n### File: a.txt\n\n```\nhi\n```\n";
        let result = Decoder::new().parse(input);
        assert!(matches!(result, Err(ArchiveError::MissingSection(STRUCTURE_HEADER))));
        assert!(result.unwrap_err().to_string().contains("Project Structure"));
    }

    #[test]
    fn test_parse_unterminated_structure_fails() {
        let input = "## Project Structure\n\n```\nroot/\n  a.txt\n";
        assert!(matches!(
            Decoder::new().parse(input),
            Err(ArchiveError::UnterminatedFence { section: STRUCTURE_HEADER, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_indentation() {
        let input = "## Project Structure\n```\nroot/\n   a.txt\n```\n";
        let err = Decoder::new().parse(input).unwrap_err();
        assert!(matches!(err, ArchiveError::MalformedStructure { line: 4, .. }));
    }

    #[test]
    fn test_parse_rejects_skipped_level() {
        let input = "## Project Structure\n```\nroot/\n    a.txt\n```\n";
        assert!(matches!(
            Decoder::new().parse(input),
            Err(ArchiveError::MalformedStructure { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_file_as_root() {
        let input = "## Project Structure\n```\nroot.txt\n```\n";
        assert!(matches!(
            Decoder::new().parse(input),
            Err(ArchiveError::MalformedStructure { .. })
        ));
    }

    #[test]
    fn test_parse_content_with_inner_fences() {
        let input = "\
## Project Structure
```
root/
  notes.md
```
## Files Content
### File: notes.md

````markdown
```
### File: fake.txt
```
````
";
        let plan = Decoder::new().parse(input).unwrap();
        assert_eq!(
            plan.operations.last(),
            Some(&Operation::WriteFile {
                path: "notes.md".into(),
                content: "```\n### File: fake.txt\n```".into(),
            })
        );
        assert_eq!(plan.embedded_files(), 1);
    }

    #[test]
    fn test_parse_overview_cannot_hide_structure() {
        let input = "\
# Project Documentation: root

## PROJECT GENERAL OVERVIEW

```markdown
## Project Structure
not the real one
```

## Project Structure

```
root/
```
";
        let plan = Decoder::new().parse(input).unwrap();
        assert_eq!(plan.overview.as_deref(), Some("## Project Structure\nnot the real one"));
        assert_eq!(plan.operations, vec![Operation::CreateDir(String::new())]);
    }

    #[test]
    fn test_parse_records_broken_file_blocks() {
        let input = "\
## Project Structure
```
root/
```
## Files Content
### File: nofence.txt
just text
### File: ok.txt
```
fine
```
### File: open.txt
```
never closed
";
        let plan = Decoder::new().parse(input).unwrap();
        assert_eq!(plan.embedded_files(), 1);
        let failed: Vec<_> = plan.issues.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(failed, vec!["nofence.txt", "open.txt"]);
    }

    #[test]
    fn test_parse_crlf_document() {
        let input = SIMPLE.replace('\n', "\r\n");
        let plan = Decoder::new().parse(&input).unwrap();
        assert_eq!(plan.structure.len(), 4);
        assert_eq!(plan.embedded_files(), 2);
    }

    #[test]
    fn test_decode_into_writes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");

        let report = Decoder::new().decode_into(SIMPLE, &out).unwrap();

        assert!(report.is_success());
        assert_eq!(report.written_files, 2);
        assert_eq!(fs::read_to_string(out.join("a.txt")).unwrap(), "hi");
        assert_eq!(fs::read_to_string(out.join("sub/b.txt")).unwrap(), "bye");
    }

    #[test]
    fn test_decode_missing_structure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");

        let result = Decoder::new().decode_into("## Files Content\n", &out);
        assert!(result.is_err());
        assert!(!out.exists());
    }

    #[test]
    fn test_decode_isolates_failed_writes() {
        let input = "\
## Project Structure
```
root/
  good.txt
```
## Files Content
### File: ../escape.txt
```
bad
```
### File: good.txt
```
good
```
### File: extra/unlisted.txt
```
still written
```
";
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");

        let report = Decoder::new().decode_into(input, &out).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, "../escape.txt");
        assert!(!dir.path().join("escape.txt").exists());
        assert_eq!(fs::read_to_string(out.join("good.txt")).unwrap(), "good");
        assert_eq!(
            fs::read_to_string(out.join("extra/unlisted.txt")).unwrap(),
            "still written"
        );
    }

    #[test]
    fn test_decode_skeleton_creates_empty_incompatible_files() {
        let input = "## Project Structure\n```\nroot/\n  logo.png\n  empty/\n```\n## Files Content\n";
        let dir = tempfile::tempdir().unwrap();

        let report = Decoder::new().decode_into(input, dir.path()).unwrap();

        assert!(report.is_success());
        assert_eq!(fs::read(dir.path().join("logo.png")).unwrap(), b"");
        assert!(dir.path().join("empty").is_dir());
    }
}
