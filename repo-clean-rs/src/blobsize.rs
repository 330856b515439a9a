use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::opts::Options;

/// Blob sizes for the whole repository, keyed by object id.
///
/// Built once before the main pass from `git cat-file --batch-all-objects`;
/// consulted when a size predicate has to be applied to a file-change that
/// carries a raw object id instead of an in-stream mark. When the batch
/// enumeration fails (shallow clones, odd setups) lookups fall back to
/// per-object `cat-file -s` calls and the answers are cached.
pub struct BlobSizeIndex {
  source: PathBuf,
  sizes: HashMap<Vec<u8>, u64>,
  prefetch_ok: bool,
}

impl BlobSizeIndex {
  pub fn new(opts: &Options) -> Self {
    let mut index = BlobSizeIndex {
      source: opts.source.clone(),
      sizes: HashMap::new(),
      prefetch_ok: false,
    };
    if opts.limit.is_some() {
      if let Err(e) = index.prefetch() {
        index.sizes.clear();
        if !opts.quiet {
          eprintln!(
            "Warning: batch blob size pre-computation failed ({e}), falling back to on-demand sizing"
          );
        }
      }
    }
    index
  }

  fn prefetch(&mut self) -> io::Result<()> {
    let mut child = Command::new("git")
      .arg("-C")
      .arg(&self.source)
      .arg("cat-file")
      .arg("--batch-all-objects")
      .arg("--batch-check=%(objectname) %(objecttype) %(objectsize)")
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("failed to run git cat-file batch: {e}")))?;
    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "missing stdout from git cat-file batch"))?;
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::with_capacity(128);
    loop {
      line.clear();
      if reader.read_until(b'\n', &mut line)? == 0 {
        break;
      }
      while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
        line.pop();
      }
      if line.is_empty() {
        continue;
      }
      let mut it = line.split(|b| *b == b' ');
      let oid = match it.next() {
        Some(s) if !s.is_empty() => s,
        _ => continue,
      };
      if it.next() != Some(b"blob") {
        continue;
      }
      let size = it
        .next()
        .and_then(|s| std::str::from_utf8(s).ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
      self.sizes.insert(oid.to_ascii_lowercase(), size);
    }
    let mut stderr_buf = Vec::new();
    if let Some(mut err) = child.stderr.take() {
      err.read_to_end(&mut stderr_buf)?;
    }
    let status = child.wait()?;
    if !status.success() {
      let msg = String::from_utf8_lossy(&stderr_buf);
      return Err(io::Error::new(io::ErrorKind::Other, format!("git cat-file batch failed: {msg}")));
    }
    self.prefetch_ok = true;
    Ok(())
  }

  pub fn size_of(&mut self, oid: &[u8]) -> Option<u64> {
    if let Some(size) = self.sizes.get(oid) {
      return Some(*size);
    }
    if self.prefetch_ok {
      return None;
    }
    let oid_str = String::from_utf8_lossy(oid).to_string();
    let output = Command::new("git")
      .arg("-C")
      .arg(&self.source)
      .arg("cat-file")
      .arg("-s")
      .arg(&oid_str)
      .output();
    let size = match output {
      Ok(out) if out.status.success() => std::str::from_utf8(&out.stdout)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok()),
      _ => None,
    };
    if let Some(size) = size {
      self.sizes.insert(oid.to_vec(), size);
    }
    size
  }

  pub fn is_oversize(&mut self, oid: &[u8], limit: u64) -> bool {
    self.size_of(oid).map(|s| s > limit).unwrap_or(false)
  }

  #[cfg(test)]
  pub(crate) fn prefetch_success(&self) -> bool {
    self.prefetch_ok
  }
}
