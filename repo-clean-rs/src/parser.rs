use std::io::Read;
use std::sync::OnceLock;

use regex::bytes::Regex;

use crate::error::{Result, RewriteError};
use crate::marks::Mark;
use crate::pathutil::unquote_path;
use crate::reader::StreamReader;
use crate::record::{Blob, ChangeTarget, Commit, FileChange, Reset, StreamRecord, Tag};

/// Result of pulling one item off the stream.
#[derive(Debug)]
pub enum Parsed {
  Record(StreamRecord),
  /// A `feature …` preamble line, forwarded verbatim.
  Feature(Vec<u8>),
  /// The `done` terminator.
  Done,
  Eof,
}

const NULL_OID: &[u8] = b"0000000000000000000000000000000000000000";

/// Decode the next record. Stateless per record; everything the filter needs
/// later travels inside the returned value. Blob payloads stay in the reader
/// so the pipeline can stream or drain them after the filter's verdict.
pub fn parse_next<R: Read>(reader: &mut StreamReader<R>) -> Result<Parsed> {
  loop {
    let line = match reader.next_line()? {
      Some(l) => l,
      None => return Ok(Parsed::Eof),
    };
    if line == b"\n" {
      continue;
    }
    if line == b"done\n" {
      return Ok(Parsed::Done);
    }
    if line.starts_with(b"feature ") {
      return Ok(Parsed::Feature(line));
    }
    if line == b"blob\n" {
      return parse_blob(reader).map(|b| Parsed::Record(StreamRecord::Blob(b)));
    }
    if line.starts_with(b"commit ") {
      return parse_commit(reader, &line).map(|c| Parsed::Record(StreamRecord::Commit(c)));
    }
    if line.starts_with(b"reset ") {
      return parse_reset(reader, &line).map(|r| Parsed::Record(StreamRecord::Reset(r)));
    }
    if line.starts_with(b"tag ") {
      return parse_tag(reader, &line).map(|t| Parsed::Record(StreamRecord::Tag(t)));
    }
    return Err(RewriteError::malformed(format!(
      "unrecognized line: {}",
      String::from_utf8_lossy(trim_lf(&line))
    )));
  }
}

fn parse_blob<R: Read>(reader: &mut StreamReader<R>) -> Result<Blob> {
  let mark = require_line(reader, "blob mark")
    .and_then(|l| parse_mark_line(&l).ok_or_else(|| RewriteError::malformed("blob missing mark")))?;
  let oid = require_line(reader, "blob original-oid").and_then(|l| parse_oid_line(&l))?;
  let size = require_line(reader, "blob data header").and_then(|l| parse_data_header(&l))?;
  Ok(Blob {
    old_mark: mark,
    mark: None,
    oid,
    size,
    dumped: true,
  })
}

fn parse_commit<R: Read>(reader: &mut StreamReader<R>, header: &[u8]) -> Result<Commit> {
  let ref_name = trim_lf(&header[b"commit ".len()..]).to_vec();
  if ref_name.is_empty() {
    return Err(RewriteError::malformed("commit with empty ref"));
  }
  let mark = require_line(reader, "commit mark").and_then(|l| {
    parse_mark_line(&l).ok_or_else(|| RewriteError::malformed("commit missing mark"))
  })?;
  let oid = require_line(reader, "commit original-oid").and_then(|l| parse_oid_line(&l))?;

  let mut author = None;
  let mut committer = None;
  loop {
    let line = require_line(reader, "commit header")?;
    if let Some(rest) = strip_keyword(&line, b"author ") {
      author = Some(parse_user_line(rest)?);
    } else if let Some(rest) = strip_keyword(&line, b"committer ") {
      committer = Some(parse_user_line(rest)?);
    } else if line.starts_with(b"data ") {
      reader.push_back(line);
      break;
    } else {
      return Err(RewriteError::malformed(format!(
        "unexpected commit header line: {}",
        String::from_utf8_lossy(trim_lf(&line))
      )));
    }
  }
  let size = require_line(reader, "commit data header").and_then(|l| parse_data_header(&l))?;
  let message = reader.read_exact_buf(size)?;

  let mut from = None;
  let mut merges = Vec::new();
  let mut file_changes = Vec::new();
  let mut seen_from = false;
  loop {
    let line = match reader.next_line()? {
      Some(l) => l,
      None => break,
    };
    if line == b"\n" {
      break;
    }
    if is_record_start(&line) {
      // the exporter ended this commit without a blank separator
      reader.push_back(line);
      break;
    }
    if let Some(rest) = strip_keyword(&line, b"from ") {
      if seen_from {
        return Err(RewriteError::malformed("commit with multiple from lines"));
      }
      seen_from = true;
      from = parse_parent_value(rest)?;
      continue;
    }
    if let Some(rest) = strip_keyword(&line, b"merge ") {
      match parse_parent_value(rest)? {
        Some(m) => merges.push(m),
        None => {
          return Err(RewriteError::malformed("merge line referencing mark 0"));
        }
      }
      continue;
    }
    file_changes.push(parse_file_change(&line)?);
  }

  Ok(Commit {
    old_mark: mark,
    mark: None,
    oid,
    ref_name,
    author,
    committer,
    message,
    from,
    merges,
    file_changes,
    dumped: true,
  })
}

fn parse_reset<R: Read>(reader: &mut StreamReader<R>, header: &[u8]) -> Result<Reset> {
  let ref_name = trim_lf(&header[b"reset ".len()..]).to_vec();
  if ref_name.is_empty() {
    return Err(RewriteError::malformed("reset with empty ref"));
  }
  let mut from = None;
  // peek: a reset directly followed by its commit carries no from line
  if let Some(next) = reader.peek_line()? {
    if next.starts_with(b"from ") {
      let line = require_line(reader, "reset from")?;
      let rest = &line[b"from ".len()..];
      from = parse_parent_value(rest)?;
      if let Some(after) = reader.peek_line()? {
        if after == b"\n" {
          reader.next_line()?;
        }
      }
    }
  }
  Ok(Reset {
    ref_name,
    from,
    dumped: true,
  })
}

fn parse_tag<R: Read>(reader: &mut StreamReader<R>, header: &[u8]) -> Result<Tag> {
  let name = trim_lf(&header[b"tag ".len()..]).to_vec();
  if name.is_empty() {
    return Err(RewriteError::malformed("tag with empty name"));
  }
  let mark = require_line(reader, "tag mark")
    .and_then(|l| parse_mark_line(&l).ok_or_else(|| RewriteError::malformed("tag missing mark")))?;
  let from_line = require_line(reader, "tag from")?;
  let rest = strip_keyword(&from_line, b"from ")
    .ok_or_else(|| RewriteError::malformed("tag missing from"))?;
  let from = parse_parent_value(rest)?;
  let oid = require_line(reader, "tag original-oid").and_then(|l| parse_oid_line(&l))?;
  let tagger_line = require_line(reader, "tagger")?;
  let tagger_rest = strip_keyword(&tagger_line, b"tagger ")
    .ok_or_else(|| RewriteError::malformed("tag missing tagger"))?;
  let tagger = parse_user_line(tagger_rest)?;
  let size = require_line(reader, "tag data header").and_then(|l| parse_data_header(&l))?;
  let message = reader.read_exact_buf(size)?;
  if let Some(next) = reader.peek_line()? {
    if next == b"\n" {
      reader.next_line()?;
    }
  }
  Ok(Tag {
    old_mark: mark,
    mark: None,
    name,
    from,
    oid,
    tagger,
    message,
    dumped: true,
  })
}

// ---- field-level helpers -------------------------------------------------

fn trim_lf(bytes: &[u8]) -> &[u8] {
  match bytes.last() {
    Some(b'\n') => &bytes[..bytes.len() - 1],
    _ => bytes,
  }
}

fn is_record_start(line: &[u8]) -> bool {
  line == b"blob\n"
    || line == b"done\n"
    || line.starts_with(b"commit ")
    || line.starts_with(b"reset ")
    || line.starts_with(b"tag ")
    || line.starts_with(b"feature ")
}

fn strip_keyword<'a>(line: &'a [u8], keyword: &[u8]) -> Option<&'a [u8]> {
  if line.starts_with(keyword) {
    Some(&line[keyword.len()..])
  } else {
    None
  }
}

fn require_line<R: Read>(reader: &mut StreamReader<R>, what: &str) -> Result<Vec<u8>> {
  reader
    .next_line()?
    .ok_or_else(|| RewriteError::malformed(format!("stream ended while reading {what}")))
}

fn parse_decimal(bytes: &[u8]) -> Option<u64> {
  let digits = trim_lf(bytes);
  if digits.is_empty() {
    return None;
  }
  let mut value: u64 = 0;
  for &b in digits {
    if !b.is_ascii_digit() {
      return None;
    }
    value = value.checked_mul(10)?.checked_add((b - b'0') as u64)?;
  }
  Some(value)
}

/// `mark :N`
pub fn parse_mark_line(line: &[u8]) -> Option<Mark> {
  let rest = strip_keyword(line, b"mark :")?;
  let value = parse_decimal(rest)?;
  if value == 0 || value > Mark::MAX as u64 {
    return None;
  }
  Some(value as Mark)
}

/// `original-oid H` with H exactly 40 lowercase hex characters.
fn parse_oid_line(line: &[u8]) -> Result<Vec<u8>> {
  let rest = strip_keyword(line, b"original-oid ").ok_or_else(|| {
    RewriteError::malformed(format!(
      "expected original-oid, got: {}",
      String::from_utf8_lossy(trim_lf(line))
    ))
  })?;
  let oid = trim_lf(rest);
  if oid.len() != 40 || !oid.iter().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
    return Err(RewriteError::malformed(format!(
      "invalid original-oid: {}",
      String::from_utf8_lossy(oid)
    )));
  }
  Ok(oid.to_vec())
}

/// `data S`
fn parse_data_header(line: &[u8]) -> Result<u64> {
  strip_keyword(line, b"data ")
    .and_then(parse_decimal)
    .ok_or_else(|| {
      RewriteError::malformed(format!(
        "invalid data header: {}",
        String::from_utf8_lossy(trim_lf(line))
      ))
    })
}

/// Value part of a `from`/`merge` line. `:0` means "no parent". A literal
/// all-zero 40-hex value is how the exporter surfaces nested tags, which the
/// stream grammar cannot express.
fn parse_parent_value(rest: &[u8]) -> Result<Option<Mark>> {
  let value = trim_lf(rest);
  if value == NULL_OID {
    return Err(RewriteError::NestedTags);
  }
  let digits = value
    .strip_prefix(b":")
    .ok_or_else(|| {
      RewriteError::malformed(format!(
        "expected mark reference, got: {}",
        String::from_utf8_lossy(value)
      ))
    })?;
  if digits == NULL_OID {
    return Err(RewriteError::NestedTags);
  }
  let parsed = parse_decimal(digits).ok_or_else(|| {
    RewriteError::malformed(format!(
      "invalid parent reference: {}",
      String::from_utf8_lossy(value)
    ))
  })?;
  if parsed == 0 {
    Ok(None)
  } else if parsed > Mark::MAX as u64 {
    Err(RewriteError::malformed(format!(
      "parent mark out of range: {parsed}"
    )))
  } else {
    Ok(Some(parsed as Mark))
  }
}

fn user_line_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"^(.*?) <(.*?)> (.*)$").expect("static user-line pattern"))
}

/// Validate `NAME <EMAIL> TIMESTAMP TZ` and return it minus the trailing LF.
fn parse_user_line(rest: &[u8]) -> Result<Vec<u8>> {
  let user = trim_lf(rest);
  if !user_line_re().is_match(user) {
    return Err(RewriteError::malformed(format!(
      "invalid user line: {}",
      String::from_utf8_lossy(user)
    )));
  }
  Ok(user.to_vec())
}

/// `M mode id path`, `D path`, `R old new`. Anything else is fatal.
fn parse_file_change(line: &[u8]) -> Result<FileChange> {
  let body = trim_lf(line);
  match body.first() {
    Some(b'M') if body.get(1) == Some(&b' ') => {
      let rest = &body[2..];
      let sp1 = find_space(rest, "file-change mode")?;
      let mode = rest[..sp1].to_vec();
      let rest = &rest[sp1 + 1..];
      let sp2 = find_space(rest, "file-change id")?;
      let id = &rest[..sp2];
      let path_bytes = &rest[sp2 + 1..];
      let target = parse_change_target(id)?;
      Ok(FileChange::Modify {
        mode,
        target,
        path: decode_path(path_bytes),
      })
    }
    Some(b'D') if body.get(1) == Some(&b' ') => Ok(FileChange::Delete {
      path: decode_path(&body[2..]),
    }),
    Some(b'R') if body.get(1) == Some(&b' ') => {
      let rest = &body[2..];
      let (src, tail) = split_path(rest)?;
      let tail = tail.strip_prefix(b" ").ok_or_else(|| {
        RewriteError::malformed(format!(
          "invalid rename line: {}",
          String::from_utf8_lossy(body)
        ))
      })?;
      let (dst, tail) = split_path(tail)?;
      if !tail.is_empty() {
        return Err(RewriteError::malformed(format!(
          "trailing bytes on rename line: {}",
          String::from_utf8_lossy(body)
        )));
      }
      Ok(FileChange::Rename { src, dst })
    }
    _ => Err(RewriteError::UnsupportedFileChange(
      String::from_utf8_lossy(body).into_owned(),
    )),
  }
}

fn find_space(bytes: &[u8], what: &str) -> Result<usize> {
  bytes
    .iter()
    .position(|&b| b == b' ')
    .ok_or_else(|| RewriteError::malformed(format!("truncated {what}")))
}

fn parse_change_target(id: &[u8]) -> Result<ChangeTarget> {
  if let Some(digits) = id.strip_prefix(b":") {
    let value = parse_decimal(digits).ok_or_else(|| {
      RewriteError::malformed(format!(
        "invalid file-change mark: {}",
        String::from_utf8_lossy(id)
      ))
    })?;
    if value > Mark::MAX as u64 {
      return Err(RewriteError::malformed(format!(
        "file-change mark out of range: {value}"
      )));
    }
    return Ok(ChangeTarget::Mark(value as Mark));
  }
  if id.len() == 40 && id.iter().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
    return Ok(ChangeTarget::Oid(id.to_vec()));
  }
  Err(RewriteError::malformed(format!(
    "invalid file-change id: {}",
    String::from_utf8_lossy(id)
  )))
}

fn decode_path(bytes: &[u8]) -> Vec<u8> {
  if bytes.first() == Some(&b'"') && bytes.last() == Some(&b'"') && bytes.len() >= 2 {
    unquote_path(&bytes[1..bytes.len() - 1])
  } else {
    bytes.to_vec()
  }
}

/// Split one possibly-quoted path off the front of `input`.
fn split_path(input: &[u8]) -> Result<(Vec<u8>, &[u8])> {
  if input.first() == Some(&b'"') {
    let mut idx = 1usize;
    while idx < input.len() {
      if input[idx] == b'"' {
        let mut backslashes = 0usize;
        let mut j = idx;
        while j > 0 && input[j - 1] == b'\\' {
          backslashes += 1;
          j -= 1;
        }
        if backslashes % 2 == 1 {
          idx += 1;
          continue;
        }
        return Ok((unquote_path(&input[1..idx]), &input[idx + 1..]));
      }
      idx += 1;
    }
    Err(RewriteError::malformed("unterminated quoted path"))
  } else {
    match input.iter().position(|&b| b == b' ') {
      Some(pos) => Ok((input[..pos].to_vec(), &input[pos..])),
      None => Ok((input.to_vec(), &input[input.len()..])),
    }
  }
}
