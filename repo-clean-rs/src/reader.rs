use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};

/// Line-oriented reader over the exporter's output.
///
/// Yields LF-terminated lines (trailing LF included) plus a bounded peek and
/// exact-length payload reads. Consumed bytes can be teed into a debug file
/// so the original stream survives for inspection. Lines handed back via
/// `push_back` are replayed before anything new is read, which is how the
/// parser copes with payloads that run straight into the next field.
pub struct StreamReader<R: Read> {
  inner: BufReader<R>,
  pushback: Vec<Vec<u8>>,
  tee: Option<File>,
}

impl<R: Read> StreamReader<R> {
  pub fn new(inner: R) -> Self {
    StreamReader {
      inner: BufReader::with_capacity(64 * 1024, inner),
      pushback: Vec::new(),
      tee: None,
    }
  }

  pub fn with_tee(inner: R, tee: File) -> Self {
    let mut r = StreamReader::new(inner);
    r.tee = Some(tee);
    r
  }

  /// Next LF-terminated line, or `None` at EOF. Only a true EOF can produce
  /// a line without a trailing LF.
  pub fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
    if let Some(line) = self.pushback.pop() {
      return Ok(Some(line));
    }
    self.read_line_inner()
  }

  fn read_line_inner(&mut self) -> io::Result<Option<Vec<u8>>> {
    let mut line = Vec::with_capacity(256);
    let n = self.inner.read_until(b'\n', &mut line)?;
    if n == 0 {
      return Ok(None);
    }
    if let Some(t) = self.tee.as_mut() {
      t.write_all(&line)?;
    }
    Ok(Some(line))
  }

  /// Hand a line back; it becomes the next `next_line` result.
  pub fn push_back(&mut self, line: Vec<u8>) {
    self.pushback.push(line);
  }

  /// Look at the next line without consuming it.
  pub fn peek_line(&mut self) -> io::Result<Option<&[u8]>> {
    if self.pushback.is_empty() {
      match self.read_line_inner()? {
        Some(line) => self.pushback.push(line),
        None => return Ok(None),
      }
    }
    Ok(self.pushback.last().map(|l| l.as_slice()))
  }

  /// Bounded lookahead: up to `n` buffered bytes, without consuming.
  pub fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
    if self.pushback.is_empty() {
      let buf = self.inner.fill_buf()?;
      let take = n.min(buf.len());
      Ok(&buf[..take])
    } else {
      let last = &self.pushback[self.pushback.len() - 1];
      Ok(&last[..n.min(last.len())])
    }
  }

  /// Consume a single LF if one is next. Used for the separator the exporter
  /// writes after each data payload; absent in the abutting-field quirk.
  pub fn consume_newline(&mut self) -> io::Result<bool> {
    let is_nl = self.peek(1)?.first() == Some(&b'\n');
    if !is_nl {
      return Ok(false);
    }
    if let Some(line) = self.pushback.last_mut() {
      if line.len() == 1 {
        self.pushback.pop();
      } else {
        line.remove(0);
      }
    } else {
      self.inner.consume(1);
      if let Some(t) = self.tee.as_mut() {
        t.write_all(b"\n")?;
      }
    }
    Ok(true)
  }

  /// Stream exactly `n` payload bytes into `write`, in buffer-sized chunks.
  /// Payloads may reach blob scale, so nothing here holds more than one
  /// buffered chunk at a time.
  pub fn copy_exact(
    &mut self,
    mut n: u64,
    mut write: impl FnMut(&[u8]) -> io::Result<()>,
  ) -> io::Result<()> {
    while n > 0 {
      if let Some(line) = self.pushback.pop() {
        if (line.len() as u64) <= n {
          n -= line.len() as u64;
          write(&line)?;
        } else {
          let take = n as usize;
          write(&line[..take])?;
          self.pushback.push(line[take..].to_vec());
          n = 0;
        }
        continue;
      }
      let used = {
        let buf = self.inner.fill_buf()?;
        if buf.is_empty() {
          return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "unexpected EOF inside data payload",
          ));
        }
        let take = (buf.len() as u64).min(n) as usize;
        write(&buf[..take])?;
        if let Some(t) = self.tee.as_mut() {
          t.write_all(&buf[..take])?;
        }
        take
      };
      self.inner.consume(used);
      n -= used as u64;
    }
    Ok(())
  }

  /// Discard exactly `n` payload bytes.
  pub fn drain_exact(&mut self, n: u64) -> io::Result<()> {
    self.copy_exact(n, |_| Ok(()))
  }

  /// Read exactly `n` bytes into memory. Meant for commit and tag messages,
  /// not blob payloads.
  pub fn read_exact_buf(&mut self, n: u64) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(n.min(1 << 20) as usize);
    self.copy_exact(n, |chunk| {
      out.extend_from_slice(chunk);
      Ok(())
    })?;
    Ok(out)
  }
}
