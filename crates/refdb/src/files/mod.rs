pub(crate) mod loose;
pub(crate) mod packed;
mod rename;
mod update;

pub use rename::RefRename;
pub use update::{RefUpdate, UpdateResult};

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use arc_swap::ArcSwap;
use refdb_hash::ObjectId;
use refdb_utils::{FileSnapshot, LockFile};

use crate::error::RefError;
use crate::name::RefName;
use crate::reference::{Ref, Storage};
use crate::reflist::{RefItem, RefList};
use crate::reflog::{self, ReflogWriter};
use crate::ObjectPeeler;

use self::loose::LooseRef;
use self::packed::PackedRefList;

/// Prefixes tried in order when resolving a short ref name; first match wins.
pub const SEARCH_PATH: [&str; 5] = ["", "refs/", "refs/tags/", "refs/heads/", "refs/remotes/"];

/// Pseudo-refs living next to `HEAD` that are read on demand and never
/// cached or packed.
pub const ADDITIONAL_REF_NAMES: [&str; 4] =
    ["MERGE_HEAD", "FETCH_HEAD", "ORIG_HEAD", "CHERRY_PICK_HEAD"];

/// Longest chain of symbolic refs followed before giving up.
pub(crate) const MAX_SYMBOLIC_REF_DEPTH: usize = 5;

/// The filesystem-backed reference database of a repository.
///
/// Presents one logical namespace unified from loose ref files and the
/// `packed-refs` file, where a loose value wins over a packed one for the
/// same name. Reads are lock-free: the two caches live in atomic cells
/// holding immutable lists, installed by compare-and-swap; a losing writer
/// silently discards its result. On-disk mutations are serialized through
/// sibling `.lock` files.
pub struct RefDirectory {
    git_dir: PathBuf,
    packed_refs_path: PathBuf,
    log_writer: ReflogWriter,
    loose: ArcSwap<RefList<LooseRef>>,
    packed: ArcSwap<PackedRefList>,
    /// Advances on every observed change, internal or external.
    mod_cnt: AtomicU64,
    /// Value of `mod_cnt` when the listener last ran.
    last_notified_mod_cnt: AtomicU64,
    listener: RwLock<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl RefDirectory {
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        let git_dir = git_dir.into();
        let packed_refs_path = git_dir.join("packed-refs");
        let log_writer = ReflogWriter::new(git_dir.clone());
        Self {
            git_dir,
            packed_refs_path,
            log_writer,
            loose: ArcSwap::from_pointee(RefList::empty()),
            packed: ArcSwap::from_pointee(PackedRefList::missing()),
            mod_cnt: AtomicU64::new(0),
            last_notified_mod_cnt: AtomicU64::new(0),
            listener: RwLock::new(None),
        }
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn log_writer(&self) -> &ReflogWriter {
        &self.log_writer
    }

    /// Create the directory skeleton: `refs/`, `refs/heads/`, `refs/tags/`
    /// and the reflog tree.
    pub fn create(&self) -> Result<(), RefError> {
        for dir in ["refs", "refs/heads", "refs/tags"] {
            let path = self.git_dir.join(dir);
            fs::create_dir_all(&path).map_err(|e| RefError::IoPath { path, source: e })?;
        }
        self.log_writer.create()
    }

    /// Drop both caches so the next read rescans everything.
    pub fn refresh(&self) {
        self.loose.store(Arc::new(RefList::empty()));
        self.packed.store(Arc::new(PackedRefList::missing()));
    }

    /// Install the callback invoked when the set of refs changes.
    pub fn set_refs_changed_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut slot) = self.listener.write() {
            *slot = Some(Arc::new(listener));
        }
    }

    /// Find `name` along the search path and resolve its symbolic chain.
    ///
    /// `Ok(None)` when no candidate exists or its chain is too deep. A
    /// symbolic ref with a missing target is returned unresolved, its leaf
    /// id unknown.
    pub fn get_ref(&self, name: &str) -> Result<Option<Ref>, RefError> {
        let packed = self.get_packed_refs()?;
        let mut result = None;
        for prefix in SEARCH_PATH {
            let full = format!("{prefix}{name}");
            if let Some(r) = self.read_ref(&full, &packed)? {
                result = self.resolve(r, 0, "", None, &packed)?;
                if result.is_some() {
                    break;
                }
            }
        }
        self.fire_refs_changed();
        Ok(result)
    }

    /// All refs whose names start with `prefix`, symbolic refs resolved to
    /// their leaves. Broken symbolic refs (missing leaf, too-deep chain)
    /// are omitted. Loose values win over packed ones.
    pub fn get_refs(&self, prefix: &str) -> Result<BTreeMap<String, Ref>, RefError> {
        let packed = self.get_packed_refs()?;

        let scan_prefix: String = if prefix.is_empty() || !prefix.starts_with("refs/") {
            String::new()
        } else if prefix.ends_with('/') {
            prefix.to_string()
        } else {
            match prefix.rfind('/') {
                Some(i) => prefix[..=i].to_string(),
                None => String::new(),
            }
        };

        let old_loose = self.loose.load_full();
        let scan = loose::scan_loose(&self.git_dir, &old_loose, &scan_prefix);
        let loose_list: Arc<RefList<LooseRef>> = match scan.new_loose {
            Some(nl) => {
                let nl = Arc::new(nl);
                if self.cas_loose_arc(&old_loose, nl.clone()) {
                    self.bump();
                }
                nl
            }
            None => old_loose,
        };
        self.fire_refs_changed();

        let mut out = BTreeMap::new();
        for r in packed.list.iter() {
            if r.name().as_str().starts_with(prefix) {
                out.insert(r.name().as_str().to_string(), r.clone());
            }
        }
        for lr in loose_list.iter() {
            let r = lr.as_ref();
            if r.is_symbolic() || !r.name().as_str().starts_with(prefix) {
                continue;
            }
            out.insert(r.name().as_str().to_string(), r.clone());
        }
        for sym in &scan.symbolic {
            let r = sym.as_ref();
            if !r.name().as_str().starts_with(prefix) {
                continue;
            }
            match self.resolve(r.clone(), 0, &scan_prefix, Some(&*loose_list), &packed)? {
                Some(resolved) if resolved.object_id().is_some() => {
                    out.insert(resolved.name().as_str().to_string(), resolved);
                }
                _ => {}
            }
        }
        Ok(out)
    }

    /// The subset of the additional pseudo-refs that currently exist.
    pub fn get_additional_refs(&self) -> Result<Vec<Ref>, RefError> {
        let mut out = Vec::new();
        for name in ADDITIONAL_REF_NAMES {
            if let Some(r) = self.get_ref(name)? {
                out.push(r);
            }
        }
        Ok(out)
    }

    /// Would creating `name` collide with an existing ref? True when an
    /// existing ref is an ancestor path of `name`, or lives beneath
    /// `name + "/"`.
    pub fn is_name_conflicting(&self, name: &str) -> Result<bool, RefError> {
        let packed = self.get_packed_refs()?;
        let loose = self.get_loose_refs();

        // Cannot be nested inside an existing reference.
        let mut last_slash = name.rfind('/');
        while let Some(i) = last_slash {
            let needle = &name[..i];
            if loose.contains(needle) || packed.list.contains(needle) {
                return Ok(true);
            }
            last_slash = name[..i].rfind('/');
        }

        // Nor may existing references live beneath it.
        let prefix = format!("{name}/");
        let idx = match packed.list.find(&prefix) {
            Ok(i) | Err(i) => i,
        };
        if idx < packed.list.len() && packed.list.get_index(idx).name().as_str().starts_with(&prefix)
        {
            return Ok(true);
        }
        let idx = match loose.find(&prefix) {
            Ok(i) | Err(i) => i,
        };
        if idx < loose.len() && loose.get_index(idx).name().starts_with(&prefix) {
            return Ok(true);
        }
        Ok(false)
    }

    /// Determine the peeled value of `r`'s leaf via `peeler` and memoize it
    /// into the loose cache when the leaf is still the cached value.
    pub fn peel(&self, peeler: &dyn ObjectPeeler, r: &Ref) -> Result<Ref, RefError> {
        let leaf = r.leaf();
        let id = match leaf.object_id() {
            Some(id) if !leaf.is_peeled() => id,
            _ => return Ok(r.clone()),
        };

        let new_leaf = match peeler.peel_tag(id)? {
            Some(peeled) => Ref::peeled_tag(leaf.storage(), leaf.name().clone(), id, peeled),
            None => Ref::peeled_non_tag(leaf.storage(), leaf.name().clone(), id),
        };

        if leaf.storage().is_loose() {
            let cur = self.loose.load_full();
            if let Ok(idx) = cur.find(leaf.name().as_str()) {
                let cached = cur.get_index(idx);
                if cached.as_ref() == leaf {
                    if let Ok(peeled_entry) = cached.peel(&new_leaf) {
                        let _ = self.cas_loose(&cur, cur.set(idx, peeled_entry));
                    }
                }
            }
        }

        Ok(recreate(r, new_leaf))
    }

    /// An update handle for `name`. With `detach`, a symbolic ref is
    /// replaced by a direct ref at `name` itself when the update commits.
    pub fn new_update(&self, name: &str, detach: bool) -> Result<RefUpdate<'_>, RefError> {
        let packed = self.get_packed_refs()?;
        let r = match self.read_ref(name, &packed)? {
            Some(r) => self.resolve(r, 0, "", None, &packed)?,
            None => None,
        };
        let (r, detaching) = match r {
            None => (
                Ref::unpeeled(Storage::New, RefName::new(name)?, None),
                false,
            ),
            Some(r) if detach && r.is_symbolic() => {
                let id = r.object_id();
                (Ref::unpeeled(Storage::Loose, RefName::new(name)?, id), true)
            }
            Some(r) => (r, false),
        };
        Ok(RefUpdate::new(self, r, detaching))
    }

    /// A rename operation moving `from` onto `to`.
    pub fn new_rename(&self, from: &str, to: &str) -> Result<RefRename<'_>, RefError> {
        let source = self.new_update(from, false)?;
        let destination = self.new_update(to, false)?;
        Ok(RefRename::new(self, source, destination))
    }

    /// Remove `name` everywhere: from `packed-refs` (rewritten under its
    /// lock), from the loose cache, and from disk, pruning now-empty parent
    /// directories. One change is observed regardless of how many stores
    /// held the ref.
    ///
    /// `lock` is the caller's lock on the loose file; it is released before
    /// the file is unlinked so directory pruning is not blocked by it.
    pub(crate) fn delete_ref(
        &self,
        name: &RefName,
        was_loose: bool,
        lock: Option<LockFile>,
    ) -> Result<(), RefError> {
        let packed = self.get_packed_refs()?;
        if packed.list.contains(name.as_str()) {
            let lck = LockFile::try_acquire(&self.packed_refs_path)?.ok_or_else(|| {
                RefError::LockFailed {
                    path: self.packed_refs_path.clone(),
                }
            })?;
            // Re-read under the lock so an external edit is not lost.
            let cur = packed::read(&self.packed_refs_path)?;
            match cur.list.find(name.as_str()) {
                Ok(idx) => self.commit_packed_refs(lck, cur.list.remove(idx), &packed)?,
                Err(_) => lck.rollback().map_err(RefError::Io)?,
            }
        }

        loop {
            let cur = self.loose.load_full();
            let idx = match cur.find(name.as_str()) {
                Ok(i) => i,
                Err(_) => break,
            };
            if self.cas_loose(&cur, cur.remove(idx)) {
                break;
            }
        }

        let levels = levels_in(name.as_str()).saturating_sub(2);
        reflog::delete_file_and_prune(&self.log_writer.log_for(name.as_str()), levels)?;
        if let Some(lck) = lock {
            lck.rollback().map_err(RefError::Io)?;
        }
        if was_loose {
            reflog::delete_file_and_prune(&self.file_for(name.as_str()), levels)?;
        }

        self.bump();
        self.fire_refs_changed();
        Ok(())
    }

    /// Read one ref by exact name, preferring the loose cache and falling
    /// back to the packed list. Cache maintenance happens as a side effect:
    /// stale entries are replaced or dropped via compare-and-swap.
    pub(crate) fn read_ref(
        &self,
        name: &str,
        packed: &PackedRefList,
    ) -> Result<Option<Ref>, RefError> {
        let cur_list = self.loose.load_full();
        match cur_list.find(name) {
            Ok(idx) => {
                let cached = cur_list.get_index(idx).clone();
                let name_r = cached.as_ref().name().clone();
                match loose::scan_ref(&self.git_dir, Some(&cached), &name_r)? {
                    None => {
                        // The loose file is gone.
                        if self.cas_loose(&cur_list, cur_list.remove(idx)) {
                            self.bump();
                        }
                        Ok(packed.list.get(name).cloned())
                    }
                    Some(n) => {
                        if n == cached {
                            return Ok(Some(cached.into_ref()));
                        }
                        if self.cas_loose(&cur_list, cur_list.set(idx, n.clone())) {
                            self.bump();
                        }
                        Ok(Some(n.into_ref()))
                    }
                }
            }
            Err(ins) => {
                let Ok(name_r) = RefName::new(name) else {
                    return Ok(None);
                };
                match loose::scan_ref(&self.git_dir, None, &name_r)? {
                    None => Ok(packed.list.get(name).cloned()),
                    Some(n) => {
                        if !ADDITIONAL_REF_NAMES.contains(&name) {
                            if self.cas_loose(&cur_list, cur_list.add(ins, n.clone())) {
                                self.bump();
                            }
                        }
                        Ok(Some(n.into_ref()))
                    }
                }
            }
        }
    }

    /// Follow `r`'s symbolic chain, bounded by [`MAX_SYMBOLIC_REF_DEPTH`].
    ///
    /// When `loose` is given, targets under `prefix` are taken from that
    /// already-consistent snapshot; everything else is re-read from disk.
    /// `Ok(None)` = chain too deep; an unresolvable target returns the ref
    /// unchanged.
    pub(crate) fn resolve(
        &self,
        r: Ref,
        depth: usize,
        prefix: &str,
        loose: Option<&RefList<LooseRef>>,
        packed: &PackedRefList,
    ) -> Result<Option<Ref>, RefError> {
        if !r.is_symbolic() {
            return Ok(Some(r));
        }
        if depth >= MAX_SYMBOLIC_REF_DEPTH {
            return Ok(None);
        }
        let target_name = match r.symbolic_target() {
            Some(t) => t.name().clone(),
            None => return Ok(Some(r)),
        };

        let dst = match loose {
            Some(list) if target_name.as_str().starts_with(prefix) => {
                match list.find(target_name.as_str()) {
                    Ok(i) => list.get_index(i).as_ref().clone(),
                    Err(_) => match packed.list.get(target_name.as_str()) {
                        Some(p) => p.clone(),
                        None => return Ok(Some(r)),
                    },
                }
            }
            _ => match self.read_ref(target_name.as_str(), packed)? {
                Some(d) => d,
                None => return Ok(Some(r)),
            },
        };

        match self.resolve(dst, depth + 1, prefix, loose, packed)? {
            Some(dst) => Ok(Some(Ref::symbolic(r.storage(), r.name().clone(), dst))),
            None => Ok(None),
        }
    }

    /// The cached packed list, re-parsed when the file's snapshot changed.
    pub(crate) fn get_packed_refs(&self) -> Result<Arc<PackedRefList>, RefError> {
        let cur = self.packed.load_full();
        if !cur.snapshot.is_modified(&self.packed_refs_path) {
            return Ok(cur);
        }
        let new = Arc::new(packed::read(&self.packed_refs_path)?);
        let prev = self.packed.compare_and_swap(&cur, new.clone());
        if Arc::ptr_eq(&prev, &cur) && cur.list != new.list {
            self.bump();
        }
        Ok(new)
    }

    /// Write `refs` as the new `packed-refs` under an already-held lock and
    /// install the result in the cache.
    fn commit_packed_refs(
        &self,
        mut lck: LockFile,
        refs: RefList<Ref>,
        old: &Arc<PackedRefList>,
    ) -> Result<(), RefError> {
        let content = packed::encode(&refs);
        lck.set_fsync(true);
        lck.set_need_snapshot(true);
        lck.write_all(&content).map_err(|e| RefError::WriteFailed {
            path: self.packed_refs_path.clone(),
            source: e,
        })?;
        lck.wait_for_stat_change()?;
        let snapshot = lck
            .commit()?
            .unwrap_or_else(|| FileSnapshot::save(&self.packed_refs_path));
        let new = Arc::new(PackedRefList {
            list: refs,
            snapshot,
        });
        let _ = self.packed.compare_and_swap(old, new);
        Ok(())
    }

    /// Fully rescanned loose list, installed in the cache.
    fn get_loose_refs(&self) -> Arc<RefList<LooseRef>> {
        let old = self.loose.load_full();
        let scan = loose::scan_loose(&self.git_dir, &old, "");
        match scan.new_loose {
            Some(nl) => {
                let nl = Arc::new(nl);
                if self.cas_loose_arc(&old, nl.clone()) {
                    self.bump();
                }
                nl
            }
            None => old,
        }
    }

    /// Record a committed direct write in the loose cache.
    pub(crate) fn stored(&self, name: RefName, id: ObjectId, snapshot: FileSnapshot) {
        self.put_loose_ref(LooseRef::direct(snapshot, name, id));
    }

    /// Record a committed symbolic write in the loose cache.
    pub(crate) fn stored_symbolic(&self, name: RefName, target: RefName, snapshot: FileSnapshot) {
        self.put_loose_ref(LooseRef::symbolic(snapshot, name, target));
    }

    fn put_loose_ref(&self, lr: LooseRef) {
        if !ADDITIONAL_REF_NAMES.contains(&lr.name()) {
            loop {
                let cur = self.loose.load_full();
                if self.cas_loose(&cur, cur.put(lr.clone())) {
                    break;
                }
            }
        }
        self.bump();
        self.fire_refs_changed();
    }

    pub(crate) fn file_for(&self, name: &str) -> PathBuf {
        loose::loose_path(&self.git_dir, name)
    }

    fn cas_loose(&self, cur: &Arc<RefList<LooseRef>>, new: RefList<LooseRef>) -> bool {
        self.cas_loose_arc(cur, Arc::new(new))
    }

    fn cas_loose_arc(&self, cur: &Arc<RefList<LooseRef>>, new: Arc<RefList<LooseRef>>) -> bool {
        let prev = self.loose.compare_and_swap(cur, new);
        Arc::ptr_eq(&prev, cur)
    }

    pub(crate) fn bump(&self) {
        self.mod_cnt.fetch_add(1, Ordering::SeqCst);
    }

    /// Run the listener when `mod_cnt` advanced past the last notified
    /// value. The compare-exchange guarantees one notification per distinct
    /// transition; the initial transition away from zero is suppressed.
    pub(crate) fn fire_refs_changed(&self) {
        let last = self.last_notified_mod_cnt.load(Ordering::SeqCst);
        let curr = self.mod_cnt.load(Ordering::SeqCst);
        if last != curr
            && self
                .last_notified_mod_cnt
                .compare_exchange(last, curr, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            && last != 0
        {
            let listener = self.listener.read().ok().and_then(|slot| slot.clone());
            if let Some(listener) = listener {
                listener();
            }
        }
    }
}

/// Rebuild `old`'s symbolic wrapper chain around a replacement leaf.
fn recreate(old: &Ref, new_leaf: Ref) -> Ref {
    match old.symbolic_target() {
        Some(t) => Ref::symbolic(old.storage(), old.name().clone(), recreate(t, new_leaf)),
        None => new_leaf,
    }
}

/// Number of `/`-separated levels above the final component.
pub(crate) fn levels_in(name: &str) -> usize {
    name.matches('/').count()
}
