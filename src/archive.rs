//! Archive data structures and the textual grammar shared by the encoder and decoder

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::ArchiveError;

// Document grammar constants. These are the wire format: changing any of them
// breaks decoding of previously produced documents.
pub const TITLE_PREFIX: &str = "# Project Documentation: ";
pub const OVERVIEW_HEADER: &str = "## PROJECT GENERAL OVERVIEW";
pub const STRUCTURE_HEADER: &str = "## Project Structure";
pub const CONTENTS_HEADER: &str = "## Files Content";
pub const FILE_HEADER_PREFIX: &str = "### File: ";
pub const DIR_SUFFIX: char = '/';
pub const INDENT_UNIT: &str = "  ";
pub const FENCE_CHAR: char = '`';
pub const MIN_FENCE_LEN: usize = 3;
pub const ENCODING_TAG_PREFIX: &str = "encoding=";
pub const DIAGNOSTIC_TAG: &str = "diagnostic";

/// Extensions whose files are embedded in the Contents section.
pub const TEXT_EXTENSIONS: &[&str] = &[
    "py", "json", "log", "yaml", "yml", "svg", "lock", "scss", "cts", "cjs", "js", "map", "mts",
    "tsx", "md", "ts", "mjs", "toml", "txt", "htm", "html", "mdx", "css", "markdown", "node",
    "cmd", "ninja", "sh", "cc", "cs", "bash", "fish", "ps1", "zsh", "rs",
];

/// Code fence label per extension. Anything missing falls back to `text`.
const LANGUAGE_TAGS: &[(&str, &str)] = &[
    ("py", "python"),
    ("cts", "python"),
    ("js", "python"),
    ("mjs", "python"),
    ("ts", "python"),
    ("tsx", "python"),
    ("cs", "python"),
    ("json", "json"),
    ("yaml", "json"),
    ("yml", "json"),
    ("toml", "json"),
    ("map", "json"),
    ("node", "json"),
    ("ninja", "json"),
    ("md", "markdown"),
    ("markdown", "markdown"),
    ("mdx", "markdown"),
    ("htm", "html"),
    ("html", "html"),
    ("scss", "css"),
    ("css", "css"),
    ("svg", "xml"),
    ("lock", "xml"),
    ("sh", "bash"),
    ("cmd", "bash"),
    ("bash", "bash"),
    ("fish", "bash"),
    ("zsh", "bash"),
    ("ps1", "bash"),
    ("cc", "cpp"),
    ("rs", "rust"),
];

const DEFAULT_LANGUAGE_TAG: &str = "text";

/// Kind of a walked entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// One node of a walked tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Slash separated path relative to the archive root (empty for the root)
    pub relative_path: String,
    /// Final path component, or the root directory's own name
    pub name: String,
    pub kind: EntryKind,
    /// Number of ancestor directories, the root itself is at depth 0
    pub depth: usize,
}

impl DirectoryEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Render this entry as one indented Structure line
    pub fn structure_line(&self) -> String {
        StructureLine {
            depth: self.depth,
            name: self.name.clone(),
            kind: self.kind,
        }
        .to_string()
    }
}

/// Whether a file's content is embedded in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    Eligible,
    Incompatible,
}

impl Compatibility {
    /// Classify a file name by its (case-insensitive) extension
    pub fn classify(name: &str) -> Self {
        match extension_of(name) {
            Some(ext) if TEXT_EXTENSIONS.contains(&ext.as_str()) => Compatibility::Eligible,
            _ => Compatibility::Incompatible,
        }
    }
}

/// Where a piece of embedded text came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentOrigin {
    /// Bytes were valid UTF-8
    Utf8,
    /// Bytes were decoded with a detected encoding
    Detected(&'static str),
    /// The file could not be decoded, the content is a diagnostic message
    Diagnostic,
}

impl ContentOrigin {
    /// Suffix for the opening fence info string, if any
    pub fn fence_tag(&self) -> Option<String> {
        match self {
            ContentOrigin::Utf8 => None,
            ContentOrigin::Detected(name) => Some(format!("{}{}", ENCODING_TAG_PREFIX, name)),
            ContentOrigin::Diagnostic => Some(DIAGNOSTIC_TAG.to_string()),
        }
    }
}

/// A file entry paired with its text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub entry: DirectoryEntry,
    pub content: String,
    pub origin: ContentOrigin,
    pub compatibility: Compatibility,
}

impl FileRecord {
    /// Opening fence info string: language tag plus an optional origin tag
    pub fn info_string(&self) -> String {
        let tag = language_tag(&self.entry.name);
        match self.origin.fence_tag() {
            Some(origin) => format!("{} {}", tag, origin),
            None => tag.to_string(),
        }
    }
}

/// A Structure line with an explicit depth.
///
/// Indentation exists only in the rendered form; parsing converts it back to
/// a depth once, so nothing downstream counts whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureLine {
    pub depth: usize,
    pub name: String,
    pub kind: EntryKind,
}

impl StructureLine {
    /// Parse one rendered line; `Ok(None)` for blank lines
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            return Ok(None);
        }

        let indent = line.len() - line.trim_start_matches(' ').len();
        if indent % INDENT_UNIT.len() != 0 {
            return Err(format!(
                "indentation of {} spaces is not a multiple of {}",
                indent,
                INDENT_UNIT.len()
            ));
        }
        let rest = &line[indent..];
        if rest.starts_with('\t') {
            return Err("tab indentation is not supported".to_string());
        }

        let (name, kind) = match rest.strip_suffix(DIR_SUFFIX) {
            Some(name) => (name, EntryKind::Directory),
            None => (rest, EntryKind::File),
        };
        if name.is_empty() {
            return Err("entry has no name".to_string());
        }

        Ok(Some(Self {
            depth: indent / INDENT_UNIT.len(),
            name: name.to_string(),
            kind,
        }))
    }
}

impl fmt::Display for StructureLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.depth {
            f.write_str(INDENT_UNIT)?;
        }
        f.write_str(&self.name)?;
        if self.kind == EntryKind::Directory {
            write!(f, "{}", DIR_SUFFIX)?;
        }
        Ok(())
    }
}

/// The serialized artifact: an ordered sequence of lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveDocument {
    lines: Vec<String>,
}

impl ArchiveDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn push_blank(&mut self) {
        self.lines.push(String::new());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Render the document as newline separated text with a trailing newline
    pub fn to_text(&self) -> String {
        let mut output = String::new();
        for line in &self.lines {
            output.push_str(line);
            output.push('\n');
        }
        output
    }

    /// Encode the document directly to a writer
    pub fn write_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writer.write_all(self.to_text().as_bytes())?;
        writer.flush()
    }

    /// Write the document to a file
    pub fn write_to_file(&self, path: &Path) -> Result<(), ArchiveError> {
        std::fs::write(path, self.to_text()).map_err(|e| ArchiveError::Io(e, path.to_path_buf()))
    }
}

/// A single file or directory that could not be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    /// Path as written in the document, or the source path for side-cars
    pub path: String,
    pub reason: String,
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Pick a fence that no line in `lines` can be mistaken for.
///
/// The fence is one backtick longer than the longest line made only of
/// backticks (leading whitespace ignored), and never shorter than
/// [`MIN_FENCE_LEN`]. Closing fences are matched exactly, so every shorter
/// backtick run inside the region is plain content.
pub fn fence_for<'a, I>(lines: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let longest = lines
        .into_iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && line.chars().all(|c| c == FENCE_CHAR))
        .map(|line| line.len())
        .max()
        .unwrap_or(0);

    let width = (longest + 1).max(MIN_FENCE_LEN);
    std::iter::repeat(FENCE_CHAR).take(width).collect()
}

/// If `line` opens a fence, return the fence and the info string after it
pub fn parse_opening_fence(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_end_matches('\r');
    let width = line.len() - line.trim_start_matches(FENCE_CHAR).len();
    if width < MIN_FENCE_LEN {
        return None;
    }
    let (fence, info) = line.split_at(width);
    Some((fence, info.trim()))
}

/// Lower-cased extension of a file name, without the dot
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Fence label for a file name
pub fn language_tag(name: &str) -> &'static str {
    extension_of(name)
        .and_then(|ext| {
            LANGUAGE_TAGS
                .iter()
                .find(|(candidate, _)| *candidate == ext)
                .map(|(_, tag)| *tag)
        })
        .unwrap_or(DEFAULT_LANGUAGE_TAG)
}

/// Join a slash separated relative path onto `root`, rejecting anything that
/// could escape it
pub fn resolve_relative(root: &Path, relative: &str) -> Result<PathBuf, String> {
    if relative.is_empty() {
        return Ok(root.to_path_buf());
    }
    if relative.starts_with('/') {
        return Err("absolute paths are not allowed".to_string());
    }

    let mut path = root.to_path_buf();
    for component in relative.split('/') {
        match component {
            "" => return Err("empty path component".to_string()),
            "." | ".." => return Err(format!("path component '{}' is not allowed", component)),
            c if c.contains('\0') => return Err("path contains a NUL character".to_string()),
            c if c.contains('\\') => return Err("path contains a backslash".to_string()),
            c => path.push(c),
        }
    }
    Ok(path)
}
