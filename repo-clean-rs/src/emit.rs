use std::fs::File;
use std::io::{self, Write};
use std::process::ChildStdin;

use crate::marks::{Mark, MarkRegistry};
use crate::pathutil::encode_path;
use crate::record::{Blob, ChangeTarget, Commit, FileChange, Reset, Tag};

/// Output side of the pipeline: every byte goes to the filtered debug
/// mirror, and to the importer's stdin when one is attached (dry runs have
/// none). A broken import pipe is remembered rather than fatal so the
/// supervisor can surface the importer's own exit status instead.
pub struct StreamSink {
  mirror: File,
  import: Option<ChildStdin>,
  pub import_broken: bool,
}

impl StreamSink {
  pub fn new(mirror: File, import: Option<ChildStdin>) -> Self {
    StreamSink {
      mirror,
      import,
      import_broken: false,
    }
  }

  pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
    self.mirror.write_all(buf)?;
    if let Some(ref mut import) = self.import {
      if let Err(e) = import.write_all(buf) {
        if e.kind() == io::ErrorKind::BrokenPipe {
          self.import_broken = true;
          self.import = None;
        } else {
          return Err(e);
        }
      }
    }
    Ok(())
  }

  /// Close the importer's stdin so it finalizes. Flushes the mirror too.
  pub fn close_import(&mut self) -> io::Result<()> {
    self.mirror.flush()?;
    if let Some(stdin) = self.import.take() {
      drop(stdin);
    }
    Ok(())
  }
}

fn mark_line(out: &mut Vec<u8>, keyword: &str, mark: Mark) {
  out.extend_from_slice(keyword.as_bytes());
  out.extend_from_slice(b" :");
  out.extend_from_slice(mark.to_string().as_bytes());
  out.push(b'\n');
}

/// Assign a fresh mark, register the rename, and bind the oid. Shared by
/// every marked record kind.
fn allocate_mark(marks: &mut MarkRegistry, old_mark: Mark, oid: &[u8]) -> Mark {
  let fresh = marks.new_mark();
  marks.record_rename(old_mark, fresh);
  marks.mark_emitted(old_mark);
  marks.bind_oid(fresh, oid.to_vec());
  fresh
}

/// Write a blob's header lines. The payload follows separately (streamed by
/// the pipeline), then `finish_blob`.
pub fn emit_blob_header(
  sink: &mut StreamSink,
  marks: &mut MarkRegistry,
  blob: &mut Blob,
) -> io::Result<()> {
  blob.mark = Some(allocate_mark(marks, blob.old_mark, &blob.oid));
  let mut out = Vec::with_capacity(96);
  out.extend_from_slice(b"blob\n");
  if let Some(m) = blob.mark {
    mark_line(&mut out, "mark", m);
  }
  out.extend_from_slice(b"original-oid ");
  out.extend_from_slice(&blob.oid);
  out.push(b'\n');
  out.extend_from_slice(b"data ");
  out.extend_from_slice(blob.size.to_string().as_bytes());
  out.push(b'\n');
  sink.write_all(&out)
}

pub fn finish_blob(sink: &mut StreamSink) -> io::Result<()> {
  sink.write_all(b"\n")
}

pub fn emit_commit(
  sink: &mut StreamSink,
  marks: &mut MarkRegistry,
  commit: &mut Commit,
) -> io::Result<()> {
  let fresh = allocate_mark(marks, commit.old_mark, &commit.oid);
  commit.mark = Some(fresh);
  marks.set_last_commit_on_ref(&commit.ref_name, fresh, commit.old_mark);

  let mut out = Vec::with_capacity(256 + commit.message.len());
  out.extend_from_slice(b"commit ");
  out.extend_from_slice(&commit.ref_name);
  out.push(b'\n');
  if let Some(m) = commit.mark {
    mark_line(&mut out, "mark", m);
  }
  out.extend_from_slice(b"original-oid ");
  out.extend_from_slice(&commit.oid);
  out.push(b'\n');
  if let Some(author) = &commit.author {
    out.extend_from_slice(b"author ");
    out.extend_from_slice(author);
    out.push(b'\n');
  }
  if let Some(committer) = &commit.committer {
    out.extend_from_slice(b"committer ");
    out.extend_from_slice(committer);
    out.push(b'\n');
  }
  out.extend_from_slice(b"data ");
  out.extend_from_slice(commit.message.len().to_string().as_bytes());
  out.push(b'\n');
  // no separator after the message: the exporter's own rendering relies on
  // the counted bytes alone, and round-trips must stay byte-equal
  out.extend_from_slice(&commit.message);
  if let Some(from) = commit.from {
    mark_line(&mut out, "from", from);
  }
  for merge in &commit.merges {
    mark_line(&mut out, "merge", *merge);
  }
  for change in &commit.file_changes {
    render_file_change(&mut out, change);
  }
  out.push(b'\n');
  sink.write_all(&out)
}

fn render_file_change(out: &mut Vec<u8>, change: &FileChange) {
  match change {
    FileChange::Modify { mode, target, path } => {
      out.extend_from_slice(b"M ");
      out.extend_from_slice(mode);
      out.push(b' ');
      match target {
        ChangeTarget::Mark(m) => {
          out.push(b':');
          out.extend_from_slice(m.to_string().as_bytes());
        }
        ChangeTarget::Oid(oid) => out.extend_from_slice(oid),
      }
      out.push(b' ');
      out.extend_from_slice(&encode_path(path));
      out.push(b'\n');
    }
    FileChange::Delete { path } => {
      out.extend_from_slice(b"D ");
      out.extend_from_slice(&encode_path(path));
      out.push(b'\n');
    }
    FileChange::Rename { src, dst } => {
      out.extend_from_slice(b"R ");
      out.extend_from_slice(&encode_path(src));
      out.push(b' ');
      out.extend_from_slice(&encode_path(dst));
      out.push(b'\n');
    }
  }
}

/// A reset that introduces the commit right after it carries no `from` and
/// no separator; standalone resets carry both.
pub fn emit_reset(sink: &mut StreamSink, reset: &Reset) -> io::Result<()> {
  let mut out = Vec::with_capacity(16 + reset.ref_name.len());
  out.extend_from_slice(b"reset ");
  out.extend_from_slice(&reset.ref_name);
  out.push(b'\n');
  if let Some(from) = reset.from {
    mark_line(&mut out, "from", from);
    out.push(b'\n');
  }
  sink.write_all(&out)
}

pub fn emit_tag(sink: &mut StreamSink, marks: &mut MarkRegistry, tag: &mut Tag) -> io::Result<()> {
  tag.mark = Some(allocate_mark(marks, tag.old_mark, &tag.oid));
  let mut out = Vec::with_capacity(160 + tag.message.len());
  out.extend_from_slice(b"tag ");
  out.extend_from_slice(&tag.name);
  out.push(b'\n');
  if let Some(m) = tag.mark {
    mark_line(&mut out, "mark", m);
  }
  if let Some(from) = tag.from {
    mark_line(&mut out, "from", from);
  }
  out.extend_from_slice(b"original-oid ");
  out.extend_from_slice(&tag.oid);
  out.push(b'\n');
  out.extend_from_slice(b"tagger ");
  out.extend_from_slice(&tag.tagger);
  out.push(b'\n');
  out.extend_from_slice(b"data ");
  out.extend_from_slice(tag.message.len().to_string().as_bytes());
  out.push(b'\n');
  out.extend_from_slice(&tag.message);
  out.push(b'\n');
  sink.write_all(&out)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sink_pair() -> (StreamSink, std::path::PathBuf) {
    let dir = std::env::temp_dir();
    let path = dir.join(format!(
      "repo-clean-emit-{}-{:?}",
      std::process::id(),
      std::thread::current().id()
    ));
    let file = File::create(&path).expect("create sink file");
    (StreamSink::new(file, None), path)
  }

  fn written(path: &std::path::Path) -> Vec<u8> {
    let bytes = std::fs::read(path).expect("read sink file");
    let _ = std::fs::remove_file(path);
    bytes
  }

  const OID: &[u8] = b"401fb905f1abf1d35331d0cddc8556ba23c1a212";

  #[test]
  fn blob_header_is_byte_exact() {
    let (mut sink, path) = sink_pair();
    let mut marks = MarkRegistry::new();
    let mut blob = Blob {
      old_mark: 9,
      mark: None,
      oid: OID.to_vec(),
      size: 5,
      dumped: true,
    };
    emit_blob_header(&mut sink, &mut marks, &mut blob).unwrap();
    sink.write_all(b"hello").unwrap();
    finish_blob(&mut sink).unwrap();
    sink.close_import().unwrap();
    let expected = format!(
      "blob\nmark :1\noriginal-oid {}\ndata 5\nhello\n",
      String::from_utf8_lossy(OID)
    );
    assert_eq!(written(&path), expected.into_bytes());
    assert_eq!(blob.mark, Some(1));
    assert_eq!(marks.translate(9), 1);
    assert!(marks.was_emitted(9));
  }

  #[test]
  fn commit_fields_render_in_grammar_order() {
    let (mut sink, path) = sink_pair();
    let mut marks = MarkRegistry::new();
    let mut commit = Commit {
      old_mark: 25,
      mark: None,
      oid: OID.to_vec(),
      ref_name: b"refs/heads/main".to_vec(),
      author: Some(b"A <a@x> 1 +0000".to_vec()),
      committer: Some(b"C <c@x> 2 +0000".to_vec()),
      message: b"fix\n".to_vec(),
      from: Some(3),
      merges: vec![4, 5],
      file_changes: vec![
        FileChange::Modify {
          mode: b"100644".to_vec(),
          target: ChangeTarget::Mark(2),
          path: b"sp ace.txt".to_vec(),
        },
        FileChange::Delete {
          path: b"old.bin".to_vec(),
        },
      ],
      dumped: true,
    };
    emit_commit(&mut sink, &mut marks, &mut commit).unwrap();
    sink.close_import().unwrap();
    let expected = format!(
      "commit refs/heads/main\nmark :1\noriginal-oid {}\n\
       author A <a@x> 1 +0000\ncommitter C <c@x> 2 +0000\n\
       data 4\nfix\nfrom :3\nmerge :4\nmerge :5\n\
       M 100644 :2 \"sp ace.txt\"\nD old.bin\n\n",
      String::from_utf8_lossy(OID)
    );
    assert_eq!(String::from_utf8(written(&path)).unwrap(), expected);
    assert_eq!(marks.last_commit_on_ref(b"refs/heads/main"), Some(1));
  }

  #[test]
  fn resets_render_bare_and_standalone() {
    let (mut sink, path) = sink_pair();
    emit_reset(
      &mut sink,
      &Reset {
        ref_name: b"refs/heads/main".to_vec(),
        from: None,
        dumped: true,
      },
    )
    .unwrap();
    emit_reset(
      &mut sink,
      &Reset {
        ref_name: b"refs/heads/dev".to_vec(),
        from: Some(7),
        dumped: true,
      },
    )
    .unwrap();
    sink.close_import().unwrap();
    assert_eq!(
      written(&path),
      b"reset refs/heads/main\nreset refs/heads/dev\nfrom :7\n\n".to_vec()
    );
  }

  #[test]
  fn tag_renders_per_grammar() {
    let (mut sink, path) = sink_pair();
    let mut marks = MarkRegistry::new();
    let mut tag = Tag {
      old_mark: 13,
      mark: None,
      name: b"v1.0.1".to_vec(),
      from: Some(12),
      oid: OID.to_vec(),
      tagger: b"T <t@x> 3 +0000".to_vec(),
      message: b"heavy tag\n".to_vec(),
      dumped: true,
    };
    emit_tag(&mut sink, &mut marks, &mut tag).unwrap();
    sink.close_import().unwrap();
    let expected = format!(
      "tag v1.0.1\nmark :1\nfrom :12\noriginal-oid {}\n\
       tagger T <t@x> 3 +0000\ndata 10\nheavy tag\n\n",
      String::from_utf8_lossy(OID)
    );
    assert_eq!(String::from_utf8(written(&path)).unwrap(), expected);
  }
}
