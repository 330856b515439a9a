use std::fs::{create_dir_all, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ChildStdout;

use crate::emit::{self, StreamSink};
use crate::error::Result;
use crate::filter::{BlobAction, RepoFilter};
use crate::gitutil::git_dir;
use crate::lfs;
use crate::marks::MarkRegistry;
use crate::opts::Options;
use crate::parser::{parse_next, Parsed};
use crate::pipes::Supervisor;
use crate::reader::StreamReader;
use crate::record::{Reset, StreamRecord};

/// Run one full rewrite: spawn the exporter and importer, stream every
/// record through parse -> tweak -> emit, then shut both children down and
/// surface their exit status.
pub fn run(opts: &Options) -> Result<()> {
  let target_git_dir = git_dir(&opts.target).map_err(|e| {
    io::Error::new(
      io::ErrorKind::Other,
      format!("target {:?} is not a git repo: {e}", opts.target),
    )
  })?;
  if opts.source != opts.target {
    git_dir(&opts.source).map_err(|e| {
      io::Error::new(
        io::ErrorKind::Other,
        format!("source {:?} is not a git repo: {e}", opts.source),
      )
    })?;
  }

  let debug_dir = target_git_dir.join("repo-clean");
  if !debug_dir.exists() {
    create_dir_all(&debug_dir)?;
  }
  let orig_file = File::create(debug_dir.join("fast-export.original"))?;
  let filt_file = File::create(debug_dir.join("fast-export.filtered"))?;

  let mut filter = RepoFilter::new(opts)?;
  let mut sup = Supervisor::spawn(opts)?;
  let export_out = match sup.take_export_reader() {
    Ok(out) => out,
    Err(e) => {
      sup.abort();
      return Err(e.into());
    }
  };
  let mut reader = StreamReader::with_tee(export_out, orig_file);
  let mut sink = StreamSink::new(filt_file, sup.take_import_writer());
  let mut marks = MarkRegistry::new();

  let outcome = pump(
    opts,
    &target_git_dir,
    &mut filter,
    &mut reader,
    &mut sink,
    &mut marks,
  );
  let close = sink.close_import();
  match outcome {
    Ok(()) => {
      close?;
      sup.finish()?;
    }
    Err(e) => {
      sup.abort();
      return Err(e);
    }
  }

  if opts.write_report {
    write_report(opts, &debug_dir, &filter)?;
  }
  if opts.verbose {
    eprintln!(
      "rewrite finished: {} blob(s) stripped, {} file-change(s) dropped, {} commit(s) skipped",
      filter.report.blobs_stripped_by_oid + filter.report.blobs_stripped_by_size,
      filter.report.filechanges_dropped,
      filter.report.commits_skipped
    );
  }
  Ok(())
}

fn pump(
  opts: &Options,
  git_dir: &Path,
  filter: &mut RepoFilter,
  reader: &mut StreamReader<ChildStdout>,
  sink: &mut StreamSink,
  marks: &mut MarkRegistry,
) -> Result<()> {
  // A reset with no `from` introduces the commit right after it; hold it so
  // it lives or dies with that commit.
  let mut pending_reset: Option<Reset> = None;

  loop {
    match parse_next(reader)? {
      Parsed::Eof => {
        flush_pending(&mut pending_reset, sink)?;
        break;
      }
      Parsed::Done => {
        flush_pending(&mut pending_reset, sink)?;
        sink.write_all(b"done\n")?;
        break;
      }
      Parsed::Feature(line) => {
        sink.write_all(&line)?;
      }
      Parsed::Record(StreamRecord::Blob(mut blob)) => {
        // the exporter puts preamble resets directly before their commit, so
        // a blob here means the pending reset stands alone
        flush_pending(&mut pending_reset, sink)?;
        let action = filter.tweak_blob(&mut blob, marks);
        if !blob.dumped {
          reader.drain_exact(blob.size)?;
          reader.consume_newline()?;
        } else if action == BlobAction::LfsConvert {
          let pointer = lfs::convert_blob(reader, &mut blob, git_dir)?;
          reader.consume_newline()?;
          emit::emit_blob_header(sink, marks, &mut blob)?;
          sink.write_all(&pointer)?;
          emit::finish_blob(sink)?;
        } else {
          emit::emit_blob_header(sink, marks, &mut blob)?;
          reader.copy_exact(blob.size, |chunk| sink.write_all(chunk))?;
          reader.consume_newline()?;
          emit::finish_blob(sink)?;
        }
      }
      Parsed::Record(StreamRecord::Commit(mut commit)) => {
        let mut held: Option<Reset> = None;
        if let Some(reset) = pending_reset.take() {
          if reset.ref_name == commit.ref_name {
            held = Some(reset);
          } else {
            emit::emit_reset(sink, &reset)?;
          }
        }
        filter.tweak_commit(&mut commit, marks);
        if commit.dumped {
          if let Some(reset) = held {
            emit::emit_reset(sink, &reset)?;
          }
          emit::emit_commit(sink, marks, &mut commit)?;
        }
        // a held reset whose commit was skipped is dropped with it
      }
      Parsed::Record(StreamRecord::Reset(mut reset)) => {
        flush_pending(&mut pending_reset, sink)?;
        filter.tweak_reset(&mut reset, marks);
        if reset.dumped {
          if reset.from.is_none() {
            pending_reset = Some(reset);
          } else {
            emit::emit_reset(sink, &reset)?;
          }
        }
      }
      Parsed::Record(StreamRecord::Tag(mut tag)) => {
        flush_pending(&mut pending_reset, sink)?;
        filter.tweak_tag(&mut tag, marks);
        if tag.dumped {
          emit::emit_tag(sink, marks, &mut tag)?;
        }
      }
    }
    if sink.import_broken && !opts.dry_run {
      // the importer died under us; stop feeding it and let the supervisor
      // report its exit status
      break;
    }
  }
  Ok(())
}

fn flush_pending(pending: &mut Option<Reset>, sink: &mut StreamSink) -> io::Result<()> {
  if let Some(reset) = pending.take() {
    emit::emit_reset(sink, &reset)?;
  }
  Ok(())
}

fn write_report(opts: &Options, debug_dir: &Path, filter: &RepoFilter) -> io::Result<()> {
  let report = &filter.report;
  if opts.report_json {
    let path: PathBuf = debug_dir.join("report.json");
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, report)
      .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("failed to write report: {e}")))?;
    return Ok(());
  }
  let mut file = File::create(debug_dir.join("report.txt"))?;
  writeln!(file, "Blobs stripped by id: {}", report.blobs_stripped_by_oid)?;
  writeln!(file, "Blobs stripped by size: {}", report.blobs_stripped_by_size)?;
  writeln!(file, "Blobs converted to LFS: {}", report.blobs_converted_to_lfs)?;
  writeln!(file, "File-changes dropped: {}", report.filechanges_dropped)?;
  writeln!(file, "Commits skipped: {}", report.commits_skipped)?;
  writeln!(file, "Tags skipped: {}", report.tags_skipped)?;
  writeln!(file, "Resets dropped: {}", report.resets_dropped)?;
  if !report.sample_paths.is_empty() {
    writeln!(file, "Affected paths (sample):")?;
    for path in &report.sample_paths {
      writeln!(file, "  {path}")?;
    }
  }
  Ok(())
}
