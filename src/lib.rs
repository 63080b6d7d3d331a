//! # treedoc
//!
//! Serializes a directory tree into one human-readable text document and
//! rebuilds the tree from that document.
//!
//! ## Document Format
//!
//! ````text
//! # Project Documentation: root
//!
//! ## Project Structure
//!
//! ```
//! root/
//!   a.txt
//!   sub/
//!     b.txt
//! ```
//!
//! ## Files Content
//!
//! ### File: a.txt
//!
//! ```text
//! hi
//! ```
//! ````
//!
//! The Structure block lists every kept entry, two spaces of indentation per
//! level. Within a directory, files come before subdirectories and each group
//! is sorted by name; the decoder relies on that order plus the indentation.
//!
//! Only files with a recognised text extension are embedded in the Contents
//! section. Everything else is listed in the structure and reported back as
//! incompatible.
//!
//! ## Fences
//!
//! Every fenced block uses a backtick run one longer than any backtick-only
//! line it contains, so file content that itself contains fences (Markdown,
//! for instance) decodes unchanged.
//!
//! ## Reading Files
//!
//! Content that is not valid UTF-8 is decoded with a detected encoding and the
//! fence is tagged `encoding=<name>`. If that fails as well the block holds a
//! one-line diagnostic and is tagged `diagnostic`. A file is never dropped
//! silently.

pub mod archive;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod reader;
pub mod walker;

pub use archive::{
    ArchiveDocument, Compatibility, ContentOrigin, DirectoryEntry, EntryKind, FileFailure,
    FileRecord, StructureLine,
};
pub use decoder::{DecodePlan, DecodeReport, Decoder, Operation};
pub use encoder::{write_incompatible_report, write_sidecars, EncodeOutput, Encoder, Sidecar};
pub use error::ArchiveError;
pub use reader::{read_text, ReadContent};
pub use walker::{TreeWalker, WalkConfig, WalkIssue, WalkOutput};
