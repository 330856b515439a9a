use crate::marks::Mark;

/// One parsed record from the export stream.
///
/// Records are created by the parser, handed once to the filter, handed once
/// to the emitter if they survive, then dropped. `dumped` starts true and the
/// filter flips it to suppress emission.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRecord {
  Blob(Blob),
  Commit(Commit),
  Reset(Reset),
  Tag(Tag),
}

/// Blob header fields. The payload itself never lands in the record: the
/// pipeline streams it from the reader straight to the sink (or drains it)
/// once the filter has decided.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
  pub old_mark: Mark,
  pub mark: Option<Mark>,
  pub oid: Vec<u8>,
  pub size: u64,
  pub dumped: bool,
}

/// Target of an `M` file-change: a stream mark for blobs carried in-stream,
/// or a raw 40-hex id for gitlinks, tree refs, and reference-only exports.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeTarget {
  Mark(Mark),
  Oid(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileChange {
  Modify {
    mode: Vec<u8>,
    target: ChangeTarget,
    path: Vec<u8>,
  },
  Delete {
    path: Vec<u8>,
  },
  Rename {
    src: Vec<u8>,
    dst: Vec<u8>,
  },
}

impl FileChange {
  /// Modes whose id is a tree or gitlink rather than a blob; those refs are
  /// kept verbatim by the filter.
  pub fn is_tree_or_gitlink(mode: &[u8]) -> bool {
    mode == b"040000" || mode == b"160000"
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
  pub old_mark: Mark,
  pub mark: Option<Mark>,
  pub oid: Vec<u8>,
  pub ref_name: Vec<u8>,
  /// Full author/committer lines minus the keyword and trailing LF.
  pub author: Option<Vec<u8>>,
  pub committer: Option<Vec<u8>>,
  pub message: Vec<u8>,
  /// First parent; `None` for roots (the grammar's `from :0`).
  pub from: Option<Mark>,
  pub merges: Vec<Mark>,
  pub file_changes: Vec<FileChange>,
  pub dumped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reset {
  pub ref_name: Vec<u8>,
  pub from: Option<Mark>,
  pub dumped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
  pub old_mark: Mark,
  pub mark: Option<Mark>,
  pub name: Vec<u8>,
  pub from: Option<Mark>,
  pub oid: Vec<u8>,
  pub tagger: Vec<u8>,
  pub message: Vec<u8>,
  pub dumped: bool,
}
