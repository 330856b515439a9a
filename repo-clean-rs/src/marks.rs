use std::collections::{HashMap, HashSet};

pub type Mark = u32;

/// Translation tables shared by the whole rewrite.
///
/// Input marks ("old") and output marks ("fresh") are distinct spaces: the
/// emitter allocates a fresh mark for every record it writes and registers
/// the rename here, so any later reference to an old mark resolves through
/// `translate`. Skipped records land in `skipped` by their old mark, and the
/// per-ref tip pointers supply substitute parents when a chain loses
/// commits.
pub struct MarkRegistry {
  next_mark: Mark,
  translations: HashMap<Mark, Mark>,
  skipped: HashSet<Mark>,
  emitted: HashSet<Mark>,
  id_to_oid: HashMap<Mark, Vec<u8>>,
  oid_to_id: HashMap<Vec<u8>, Mark>,
  last_commit_on_ref: HashMap<Vec<u8>, Mark>,
  last_orig_commit_on_ref: HashMap<Vec<u8>, Mark>,
}

impl MarkRegistry {
  pub fn new() -> Self {
    MarkRegistry {
      next_mark: 1,
      translations: HashMap::new(),
      skipped: HashSet::new(),
      emitted: HashSet::new(),
      id_to_oid: HashMap::new(),
      oid_to_id: HashMap::new(),
      last_commit_on_ref: HashMap::new(),
      last_orig_commit_on_ref: HashMap::new(),
    }
  }

  /// Allocate the next output mark. Allocation order matches emission order.
  pub fn new_mark(&mut self) -> Mark {
    let m = self.next_mark;
    self.next_mark += 1;
    m
  }

  /// Record `old -> new`. Identity renames are not stored; repeated calls
  /// with the same pair are harmless.
  pub fn record_rename(&mut self, old: Mark, new: Mark) {
    if old != new {
      self.translations.insert(old, new);
    }
  }

  /// Resolve an old mark to its current value; unknown marks map to
  /// themselves.
  pub fn translate(&self, old: Mark) -> Mark {
    self.translations.get(&old).copied().unwrap_or(old)
  }

  pub fn mark_skipped(&mut self, old: Mark) {
    self.skipped.insert(old);
  }

  pub fn is_skipped(&self, old: Mark) -> bool {
    self.skipped.contains(&old)
  }

  /// Note that the record carrying input mark `old` made it into the output.
  pub fn mark_emitted(&mut self, old: Mark) {
    self.emitted.insert(old);
  }

  pub fn was_emitted(&self, old: Mark) -> bool {
    self.emitted.contains(&old)
  }

  /// Bind an emitted mark to its object fingerprint, both directions.
  pub fn bind_oid(&mut self, mark: Mark, oid: Vec<u8>) {
    self.oid_to_id.insert(oid.clone(), mark);
    self.id_to_oid.insert(mark, oid);
  }

  pub fn oid_of(&self, mark: Mark) -> Option<&[u8]> {
    self.id_to_oid.get(&mark).map(|v| v.as_slice())
  }

  pub fn mark_of_oid(&self, oid: &[u8]) -> Option<Mark> {
    self.oid_to_id.get(oid).copied()
  }

  /// Remember the newest surviving commit on a ref (fresh mark) and the
  /// input mark it came from.
  pub fn set_last_commit_on_ref(&mut self, ref_name: &[u8], fresh: Mark, orig: Mark) {
    self.last_commit_on_ref.insert(ref_name.to_vec(), fresh);
    self.last_orig_commit_on_ref.insert(ref_name.to_vec(), orig);
  }

  /// Forget a ref's tip. A bare reset re-anchors the branch, so the next
  /// commit that omits `from` really is a root.
  pub fn clear_last_commit_on_ref(&mut self, ref_name: &[u8]) {
    self.last_commit_on_ref.remove(ref_name);
    self.last_orig_commit_on_ref.remove(ref_name);
  }

  pub fn last_commit_on_ref(&self, ref_name: &[u8]) -> Option<Mark> {
    self.last_commit_on_ref.get(ref_name).copied()
  }

  pub fn last_orig_commit_on_ref(&self, ref_name: &[u8]) -> Option<Mark> {
    self.last_orig_commit_on_ref.get(ref_name).copied()
  }
}
