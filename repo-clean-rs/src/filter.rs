use std::collections::HashSet;
use std::io::{self, BufRead};
use std::path::Path;

use serde::Serialize;

use crate::blobsize::BlobSizeIndex;
use crate::error::{Result, RewriteError};
use crate::marks::{Mark, MarkRegistry};
use crate::opts::Options;
use crate::pathutil::{glob_match, has_suffix};
use crate::record::{Blob, ChangeTarget, Commit, FileChange, Reset, Tag};

const REPORT_SAMPLE_LIMIT: usize = 20;

/// Blob fingerprints slated for deletion, as handed over by the operator.
pub struct TargetSet {
  oids: HashSet<Vec<u8>>,
}

impl TargetSet {
  pub fn empty() -> Self {
    TargetSet { oids: HashSet::new() }
  }

  pub fn from_file(path: &Path) -> io::Result<Self> {
    let file = std::fs::File::open(path)?;
    let reader = io::BufReader::new(file);
    let mut oids = HashSet::new();
    for line in reader.lines() {
      let line = line?;
      let trimmed = line.trim();
      if trimmed.len() != 40 || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        continue;
      }
      oids.insert(trimmed.to_ascii_lowercase().into_bytes());
    }
    Ok(TargetSet { oids })
  }

  pub fn contains(&self, oid: &[u8]) -> bool {
    self.oids.contains(oid)
  }
}

/// What the pipeline should do with a blob after filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobAction {
  Keep,
  Skip,
  LfsConvert,
}

/// Counters and path samples for the end-of-run summary.
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
  pub blobs_stripped_by_oid: usize,
  pub blobs_stripped_by_size: usize,
  pub blobs_converted_to_lfs: usize,
  pub filechanges_dropped: usize,
  pub commits_skipped: usize,
  pub tags_skipped: usize,
  pub resets_dropped: usize,
  pub sample_paths: Vec<String>,
}

impl RunReport {
  fn sample(&mut self, path: &[u8]) {
    if self.sample_paths.len() >= REPORT_SAMPLE_LIMIT {
      return;
    }
    let shown = String::from_utf8_lossy(path).into_owned();
    if !self.sample_paths.contains(&shown) {
      self.sample_paths.push(shown);
    }
  }
}

/// Decides, record by record, what survives the rewrite.
///
/// The tweak functions mutate records in place and flip `dumped` to drop
/// them; all cross-record bookkeeping lives in the shared [`MarkRegistry`].
pub struct RepoFilter {
  targets: TargetSet,
  sizes: BlobSizeIndex,
  limit: Option<u64>,
  suffixes: Vec<Vec<u8>>,
  globs: Vec<Vec<u8>>,
  lfs: bool,
  verbose: bool,
  pub report: RunReport,
}

impl RepoFilter {
  pub fn new(opts: &Options) -> Result<Self> {
    let targets = match &opts.strip_blobs_with_ids {
      Some(path) => TargetSet::from_file(path).map_err(|e| {
        RewriteError::InvalidOptions(format!(
          "failed to load --strip-blobs-with-ids {}: {e}",
          path.display()
        ))
      })?,
      None => TargetSet::empty(),
    };
    Ok(RepoFilter {
      targets,
      sizes: BlobSizeIndex::new(opts),
      limit: opts.limit,
      suffixes: opts.strip_suffixes.clone(),
      globs: opts.path_globs.clone(),
      lfs: opts.lfs,
      verbose: opts.verbose,
      report: RunReport::default(),
    })
  }

  #[cfg(test)]
  pub(crate) fn for_tests(targets: TargetSet, limit: Option<u64>) -> Self {
    let mut opts = Options::default();
    opts.quiet = true;
    RepoFilter {
      targets,
      sizes: BlobSizeIndex::new(&opts),
      limit,
      suffixes: Vec::new(),
      globs: Vec::new(),
      lfs: false,
      verbose: false,
      report: RunReport::default(),
    }
  }

  /// Blob verdict: delete targeted or oversize payloads, or swap them for
  /// LFS pointers when the operator asked for that.
  pub fn tweak_blob(&mut self, blob: &mut Blob, marks: &mut MarkRegistry) -> BlobAction {
    let targeted = self.targets.contains(&blob.oid);
    let oversize = self.limit.map(|max| blob.size > max).unwrap_or(false);
    if !targeted && !oversize {
      return BlobAction::Keep;
    }
    if targeted {
      self.report.blobs_stripped_by_oid += 1;
    } else {
      self.report.blobs_stripped_by_size += 1;
    }
    if self.lfs {
      self.report.blobs_converted_to_lfs += 1;
      return BlobAction::LfsConvert;
    }
    blob.dumped = false;
    marks.mark_skipped(blob.old_mark);
    if self.verbose {
      eprintln!("stripping blob {}", String::from_utf8_lossy(&blob.oid));
    }
    BlobAction::Skip
  }

  /// Commit rewrite: drop file-changes whose blob vanished or whose path
  /// matches a predicate, reroute parents through the registry, then decide
  /// whether anything is left worth emitting.
  pub fn tweak_commit(&mut self, commit: &mut Commit, marks: &mut MarkRegistry) {
    let orig_from = commit.from;

    let mut dropped = 0usize;
    let targets = &self.targets;
    let limit = self.limit;
    let sizes = &mut self.sizes;
    let suffixes = &self.suffixes;
    let globs = &self.globs;
    let report = &mut self.report;
    let verbose = self.verbose;
    commit.file_changes.retain_mut(|fc| {
      let keep = match fc {
        FileChange::Modify { mode, target, path } => match target {
          ChangeTarget::Mark(m) => {
            let mark = *m;
            if marks.is_skipped(mark) || !marks.was_emitted(mark) {
              false
            } else if path_matches(path, suffixes, globs) {
              false
            } else {
              *m = marks.translate(mark);
              true
            }
          }
          ChangeTarget::Oid(oid) => {
            if FileChange::is_tree_or_gitlink(mode) {
              true
            } else if targets.contains(oid) {
              false
            } else if limit.map(|max| sizes.is_oversize(oid, max)).unwrap_or(false) {
              false
            } else if path_matches(path, suffixes, globs) {
              false
            } else {
              // a blob that did travel in-stream is referenced by its mark
              if let Some(m) = marks.mark_of_oid(oid) {
                *target = ChangeTarget::Mark(m);
              }
              true
            }
          }
        },
        FileChange::Delete { path } => !path_matches(path, suffixes, globs),
        // renames pass through untouched, matching the exporter's own output
        FileChange::Rename { .. } => true,
      };
      if !keep {
        dropped += 1;
        if let FileChange::Modify { path, .. } | FileChange::Delete { path } = fc {
          report.sample(path);
          if verbose {
            eprintln!("dropping file-change for {}", String::from_utf8_lossy(path));
          }
        }
      }
      keep
    });
    self.report.filechanges_dropped += dropped;

    // a commit that omits `from` continues its branch; the implied parent is
    // the branch tip as the input stream saw it
    let effective_from = orig_from.or_else(|| marks.last_orig_commit_on_ref(&commit.ref_name));
    // translate first, consult the skipped set second
    let resolved_from: Option<Mark> = match effective_from {
      None => None,
      Some(parent) => {
        if marks.was_emitted(parent) {
          Some(marks.translate(parent))
        } else {
          // the parent was skipped; chase the redirect recorded when it was
          // dropped, then fall back to the newest survivor on this ref
          let redirected = marks.translate(parent);
          if redirected != parent {
            Some(redirected)
          } else {
            marks.last_commit_on_ref(&commit.ref_name)
          }
        }
      }
    };
    commit.merges.retain(|m| marks.was_emitted(*m));
    for m in commit.merges.iter_mut() {
      *m = marks.translate(*m);
    }

    if effective_from.is_some() && resolved_from.is_none() {
      // every version of this content was a delta on a chain that no longer
      // exists
      self.skip_commit(commit, marks);
      return;
    }
    if resolved_from.is_none() && commit.merges.is_empty() && commit.file_changes.is_empty() {
      // first commit gone empty
      self.skip_commit(commit, marks);
      return;
    }
    // empty commits that still have a parent are preserved so the chain and
    // its messages survive. Keep the `from` implicit when the input left it
    // implicit and the importer would pick the same parent anyway.
    if orig_from.is_none() && resolved_from == marks.last_commit_on_ref(&commit.ref_name) {
      commit.from = None;
    } else {
      commit.from = resolved_from;
    }
  }

  fn skip_commit(&mut self, commit: &mut Commit, marks: &mut MarkRegistry) {
    commit.dumped = false;
    marks.mark_skipped(commit.old_mark);
    // future references chase the newest survivor on the same ref
    let substitute = marks.last_commit_on_ref(&commit.ref_name);
    if let Some(to) = substitute {
      marks.record_rename(commit.old_mark, to);
    }
    self.report.commits_skipped += 1;
    if self.verbose {
      let resolved_to = substitute
        .and_then(|to| marks.oid_of(to))
        .map(|oid| String::from_utf8_lossy(oid).into_owned())
        .unwrap_or_else(|| "nothing".to_string());
      eprintln!(
        "skipping commit {} on {} (references now resolve to {})",
        String::from_utf8_lossy(&commit.oid),
        String::from_utf8_lossy(&commit.ref_name),
        resolved_to
      );
    }
  }

  /// Resets referencing commits that no longer exist are dropped; survivors
  /// update the per-ref tip used for parent substitution.
  pub fn tweak_reset(&mut self, reset: &mut Reset, marks: &mut MarkRegistry) {
    match reset.from {
      Some(from) if marks.was_emitted(from) => {
        let current = marks.translate(from);
        reset.from = Some(current);
        marks.set_last_commit_on_ref(&reset.ref_name, current, from);
      }
      Some(_) => {
        reset.dumped = false;
        self.report.resets_dropped += 1;
        if self.verbose {
          eprintln!(
            "dropping reset of {} to a removed commit",
            String::from_utf8_lossy(&reset.ref_name)
          );
        }
      }
      // a bare reset re-anchors the branch: the next from-less commit on
      // this ref starts a new root
      None => marks.clear_last_commit_on_ref(&reset.ref_name),
    }
  }

  /// Tags pointing at removed objects are removed themselves, and their own
  /// marks join the skipped set so tag-of-tag chains collapse with them.
  pub fn tweak_tag(&mut self, tag: &mut Tag, marks: &mut MarkRegistry) {
    match tag.from {
      Some(from) if marks.was_emitted(from) => {
        tag.from = Some(marks.translate(from));
      }
      _ => {
        tag.dumped = false;
        marks.mark_skipped(tag.old_mark);
        self.report.tags_skipped += 1;
        if self.verbose {
          eprintln!("dropping tag {}", String::from_utf8_lossy(&tag.name));
        }
      }
    }
  }
}

fn path_matches(path: &[u8], suffixes: &[Vec<u8>], globs: &[Vec<u8>]) -> bool {
  suffixes.iter().any(|s| has_suffix(path, s)) || globs.iter().any(|g| glob_match(g, path))
}
