use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use bstr::{BString, ByteSlice};
use refdb_hash::{ObjectId, HEX_LENGTH};
use refdb_utils::FileSnapshot;

use crate::error::RefError;
use crate::name::RefName;
use crate::reference::{Ref, Storage};
use crate::reflist::{ListBuilder, RefItem, RefList};

/// Upper bound on loose ref file content. A symbolic ref that fills the
/// whole buffer may have been truncated and is treated as unreadable.
pub(crate) const MAX_LOOSE_SIZE: usize = 4096;

const SYMREF_PREFIX: &[u8] = b"ref: ";

/// A reference read from a loose file, together with the file snapshot
/// that produced it. The snapshot answers "is my cached value still
/// current?" without re-reading content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LooseRef {
    pub(crate) snapshot: FileSnapshot,
    inner: Ref,
}

impl LooseRef {
    pub(crate) fn direct(snapshot: FileSnapshot, name: RefName, id: ObjectId) -> Self {
        Self {
            snapshot,
            inner: Ref::unpeeled(Storage::Loose, name, Some(id)),
        }
    }

    pub(crate) fn symbolic(snapshot: FileSnapshot, name: RefName, target: RefName) -> Self {
        let dst = Ref::unpeeled(Storage::New, target, None);
        Self {
            snapshot,
            inner: Ref::symbolic(Storage::Loose, name, dst),
        }
    }

    pub(crate) fn as_ref(&self) -> &Ref {
        &self.inner
    }

    pub(crate) fn into_ref(self) -> Ref {
        self.inner
    }

    /// Replace this entry's value with a peeled rendering of the same ref.
    pub(crate) fn peel(&self, new_leaf: &Ref) -> Result<LooseRef, RefError> {
        if self.inner.is_symbolic() {
            return Err(RefError::PeelNotSupported);
        }
        Ok(LooseRef {
            snapshot: self.snapshot.clone(),
            inner: new_leaf.clone(),
        })
    }
}

impl RefItem for LooseRef {
    fn name(&self) -> &str {
        self.inner.name().as_str()
    }
}

/// The file backing a loose ref name.
pub(crate) fn loose_path(git_dir: &Path, name: &str) -> PathBuf {
    git_dir.join(name)
}

/// Read one loose ref file, reusing `cached` when its snapshot (or its
/// content) is unchanged.
///
/// Returns `Ok(None)` for a missing file, an empty file, an impossibly
/// short value, or a possibly-truncated symbolic ref. Malformed content is
/// an error naming the file.
pub(crate) fn scan_ref(
    git_dir: &Path,
    cached: Option<&LooseRef>,
    name: &RefName,
) -> Result<Option<LooseRef>, RefError> {
    let path = loose_path(git_dir, name.as_str());

    if let Some(cur) = cached {
        if !cur.snapshot.is_modified(&path) {
            return Ok(Some(cur.clone()));
        }
    }

    let snapshot = FileSnapshot::save(&path);
    let buf = match read_some(&path)? {
        Some(buf) => buf,
        None => return Ok(None),
    };

    if buf.is_empty() {
        return Ok(None);
    }

    if buf.starts_with(SYMREF_PREFIX) {
        if buf.len() == MAX_LOOSE_SIZE {
            log::debug!("possibly truncated symbolic ref: {}", path.display());
            return Ok(None);
        }
        let trimmed = buf.trim_end();
        if trimmed.len() <= SYMREF_PREFIX.len() {
            return Err(malformed(name, &buf));
        }
        let target = trimmed[SYMREF_PREFIX.len()..].as_bstr();
        let target = RefName::new(BString::from(target.as_bytes()))
            .map_err(|_| malformed(name, &buf))?;

        if let Some(cur) = cached {
            if let Some(t) = cur.inner.symbolic_target() {
                if *t.name() == target {
                    cur.snapshot.set_clean(&snapshot);
                    return Ok(Some(cur.clone()));
                }
            }
        }
        return Ok(Some(LooseRef::symbolic(snapshot, name.clone(), target)));
    }

    if buf.len() < HEX_LENGTH {
        return Ok(None);
    }
    let id = std::str::from_utf8(&buf[..HEX_LENGTH])
        .ok()
        .and_then(|h| ObjectId::from_hex(h).ok())
        .ok_or_else(|| malformed(name, &buf))?;

    if let Some(cur) = cached {
        if !cur.inner.is_symbolic() && cur.inner.object_id() == Some(id) {
            cur.snapshot.set_clean(&snapshot);
            return Ok(Some(cur.clone()));
        }
    }
    Ok(Some(LooseRef::direct(snapshot, name.clone(), id)))
}

fn malformed(name: &RefName, buf: &[u8]) -> RefError {
    RefError::Malformed {
        name: name.as_str().to_string(),
        content: buf.trim_end().as_bstr().to_str_lossy().into_owned(),
    }
}

/// Read up to `MAX_LOOSE_SIZE` bytes of `path`. `Ok(None)` when the path
/// does not exist or is not a regular file.
fn read_some(path: &Path) -> Result<Option<Vec<u8>>, RefError> {
    // Also covers a parent component being a regular file, in which case
    // no ref by this name can exist.
    if !path.is_file() {
        return Ok(None);
    }

    let mut file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(RefError::IoPath {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let mut buf = vec![0u8; MAX_LOOSE_SIZE];
    let mut n = 0;
    while n < MAX_LOOSE_SIZE {
        match file.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(r) => n += r,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(RefError::IoPath {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }
    }
    buf.truncate(n);
    Ok(Some(buf))
}

/// Result of reconciling the cached loose list with the directory tree.
pub(crate) struct ScanResult {
    /// Replacement list, or `None` when nothing diverged from the cache.
    pub(crate) new_loose: Option<RefList<LooseRef>>,
    /// Symbolic refs encountered, in name order.
    pub(crate) symbolic: Vec<LooseRef>,
}

/// Walk `HEAD` plus the `refs/` tree (or the subtree named by `prefix`,
/// which must be `""` or `refs/…/`) and reconcile with `cur`.
pub(crate) fn scan_loose(git_dir: &Path, cur: &RefList<LooseRef>, prefix: &str) -> ScanResult {
    let mut scan = LooseScanner {
        git_dir,
        cur,
        cur_idx: 0,
        new_loose: None,
        symbolic: Vec::new(),
    };
    scan.scan(prefix);
    ScanResult {
        new_loose: scan.new_loose.map(|mut b| {
            b.sort();
            b.to_ref_list()
        }),
        symbolic: scan.symbolic,
    }
}

struct LooseScanner<'a> {
    git_dir: &'a Path,
    cur: &'a RefList<LooseRef>,
    /// Position in `cur` of the next entry not yet reconciled.
    cur_idx: usize,
    /// Allocated lazily on the first divergence from `cur`.
    new_loose: Option<ListBuilder<LooseRef>>,
    symbolic: Vec<LooseRef>,
}

impl LooseScanner<'_> {
    fn scan(&mut self, prefix: &str) {
        if prefix.is_empty() {
            self.scan_one("HEAD");
            self.scan_tree("refs/", &self.git_dir.join("refs"));
            // Cached entries with no disk counterpart were deleted.
            if self.cur_idx < self.cur.len() {
                self.diverge();
            }
        } else {
            debug_assert!(prefix.starts_with("refs/") && prefix.ends_with('/'));
            self.cur_idx = match self.cur.find(prefix) {
                Ok(i) | Err(i) => i,
            };
            let dir = self.git_dir.join(&prefix[..prefix.len() - 1]);
            self.scan_tree(prefix, &dir);

            // Entries still inside the prefix were deleted from disk.
            while self.cur_idx < self.cur.len()
                && self.cur.get_index(self.cur_idx).name().starts_with(prefix)
            {
                self.diverge();
                self.cur_idx += 1;
            }

            // Entries outside the prefix are preserved unchanged.
            if self.new_loose.is_some() {
                while self.cur_idx < self.cur.len() {
                    let keep = self.cur.get_index(self.cur_idx).clone();
                    self.push_kept(keep);
                    self.cur_idx += 1;
                }
            }
        }
    }

    fn scan_tree(&mut self, prefix: &str, dir: &Path) {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => return,
        };

        let mut names: Vec<String> = Vec::new();
        for entry in entries.flatten() {
            let os_name = entry.file_name();
            let Some(fname) = os_name.to_str() else {
                continue;
            };
            if fname.ends_with(".lock") {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                // Directories sort after flat siblings, matching the order
                // of the full ref names they contain.
                names.push(format!("{fname}/"));
            } else if path.is_file() {
                names.push(fname.to_string());
            }
        }
        names.sort();

        for n in &names {
            if let Some(stem) = n.strip_suffix('/') {
                self.scan_tree(&format!("{prefix}{n}"), &dir.join(stem));
            } else {
                self.scan_one(&format!("{prefix}{n}"));
            }
        }
    }

    fn scan_one(&mut self, name: &str) {
        let mut cached: Option<LooseRef> = None;
        while self.cur_idx < self.cur.len() {
            let c = self.cur.get_index(self.cur_idx);
            match c.name().cmp(name) {
                std::cmp::Ordering::Less => {
                    // No longer present on disk.
                    self.diverge();
                    self.cur_idx += 1;
                }
                std::cmp::Ordering::Equal => {
                    cached = Some(c.clone());
                    break;
                }
                std::cmp::Ordering::Greater => break,
            }
        }

        let name_r = match RefName::new(name) {
            Ok(n) => n,
            Err(_) => return,
        };

        let scanned = match scan_ref(self.git_dir, cached.as_ref(), &name_r) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("skipping unreadable ref {name}: {e}");
                None
            }
        };

        match scanned {
            None => {
                if cached.is_some() {
                    self.diverge();
                    self.cur_idx += 1;
                }
            }
            Some(n) => {
                let unchanged = cached.as_ref() == Some(&n);
                if unchanged {
                    self.push_kept(n.clone());
                    self.cur_idx += 1;
                } else {
                    self.diverge();
                    if cached.is_some() {
                        self.cur_idx += 1;
                    }
                    if let Some(b) = &mut self.new_loose {
                        b.push(n.clone());
                    }
                }
                if n.as_ref().is_symbolic() {
                    self.symbolic.push(n);
                }
            }
        }
    }

    /// Record an entry identical to the cached one at the current position.
    fn push_kept(&mut self, entry: LooseRef) {
        if let Some(b) = &mut self.new_loose {
            b.push(entry);
        }
    }

    /// Start building a replacement list, seeded with everything kept so far.
    fn diverge(&mut self) {
        if self.new_loose.is_none() {
            self.new_loose = Some(self.cur.copy(self.cur_idx));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> RefName {
        RefName::new(s).unwrap()
    }

    fn oid(hex: &str) -> ObjectId {
        ObjectId::from_hex(hex).unwrap()
    }

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn write_ref(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn read_direct_ref() {
        let dir = tempfile::tempdir().unwrap();
        write_ref(dir.path(), "refs/heads/main", &format!("{A}\n"));

        let r = scan_ref(dir.path(), None, &name("refs/heads/main"))
            .unwrap()
            .unwrap();
        assert_eq!(r.as_ref().object_id(), Some(oid(A)));
        assert_eq!(r.as_ref().storage(), Storage::Loose);
    }

    #[test]
    fn read_symbolic_ref() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("HEAD"), "ref: refs/heads/main\n").unwrap();

        let r = scan_ref(dir.path(), None, &name("HEAD")).unwrap().unwrap();
        let target = r.as_ref().symbolic_target().unwrap();
        assert_eq!(target.name().as_str(), "refs/heads/main");
        assert_eq!(target.storage(), Storage::New);
        assert_eq!(r.as_ref().object_id(), None);
    }

    #[test]
    fn read_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_ref(dir.path(), None, &name("refs/heads/none"))
            .unwrap()
            .is_none());

        fs::write(dir.path().join("HEAD"), "").unwrap();
        assert!(scan_ref(dir.path(), None, &name("HEAD")).unwrap().is_none());
    }

    #[test]
    fn read_trims_trailing_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("HEAD"), "ref: refs/heads/main \n\n").unwrap();
        let r = scan_ref(dir.path(), None, &name("HEAD")).unwrap().unwrap();
        assert_eq!(
            r.as_ref().symbolic_target().unwrap().name().as_str(),
            "refs/heads/main"
        );
    }

    #[test]
    fn full_buffer_symref_reads_as_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = b"ref: refs/heads/".to_vec();
        content.resize(MAX_LOOSE_SIZE, b'x');
        fs::write(dir.path().join("HEAD"), &content).unwrap();
        assert!(scan_ref(dir.path(), None, &name("HEAD")).unwrap().is_none());
    }

    #[test]
    fn short_content_reads_as_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_ref(dir.path(), "refs/heads/main", "da39a3");
        assert!(scan_ref(dir.path(), None, &name("refs/heads/main"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn malformed_content_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_ref(
            dir.path(),
            "refs/heads/main",
            "zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz\n",
        );
        let err = scan_ref(dir.path(), None, &name("refs/heads/main")).unwrap_err();
        match err {
            RefError::Malformed { name, .. } => assert_eq!(name, "refs/heads/main"),
            other => panic!("expected Malformed, got {other}"),
        }
    }

    #[test]
    fn fetch_head_style_content_parses_first_id() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("FETCH_HEAD"),
            format!("{A}\t\tbranch 'main' of example\n"),
        )
        .unwrap();
        let r = scan_ref(dir.path(), None, &name("FETCH_HEAD"))
            .unwrap()
            .unwrap();
        assert_eq!(r.as_ref().object_id(), Some(oid(A)));
    }

    #[test]
    fn unchanged_snapshot_reuses_cached_value() {
        let dir = tempfile::tempdir().unwrap();
        write_ref(dir.path(), "refs/heads/main", &format!("{A}\n"));

        let first = scan_ref(dir.path(), None, &name("refs/heads/main"))
            .unwrap()
            .unwrap();
        let second = scan_ref(dir.path(), Some(&first), &name("refs/heads/main"))
            .unwrap()
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn changed_content_replaces_cached_value() {
        let dir = tempfile::tempdir().unwrap();
        write_ref(dir.path(), "refs/heads/main", &format!("{A}\n"));
        let first = scan_ref(dir.path(), None, &name("refs/heads/main"))
            .unwrap()
            .unwrap();

        write_ref(dir.path(), "refs/heads/main", &format!("{B}\n"));
        let second = scan_ref(dir.path(), Some(&first), &name("refs/heads/main"))
            .unwrap()
            .unwrap();
        assert_eq!(second.as_ref().object_id(), Some(oid(B)));
    }

    fn scan_all(dir: &Path, cur: &RefList<LooseRef>) -> ScanResult {
        scan_loose(dir, cur, "")
    }

    #[test]
    fn scan_finds_head_and_tree_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("HEAD"), "ref: refs/heads/main\n").unwrap();
        write_ref(dir.path(), "refs/heads/main", &format!("{A}\n"));
        write_ref(dir.path(), "refs/tags/v1", &format!("{B}\n"));

        let result = scan_all(dir.path(), &RefList::empty());
        let list = result.new_loose.expect("list changed");
        let names: Vec<_> = list.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, ["HEAD", "refs/heads/main", "refs/tags/v1"]);
        assert_eq!(result.symbolic.len(), 1);
        assert_eq!(result.symbolic[0].name(), "HEAD");
    }

    #[test]
    fn scan_orders_directories_after_flat_siblings() {
        let dir = tempfile::tempdir().unwrap();
        write_ref(dir.path(), "refs/heads/a-b", &format!("{A}\n"));
        write_ref(dir.path(), "refs/heads/a/c", &format!("{A}\n"));
        write_ref(dir.path(), "refs/heads/a0", &format!("{A}\n"));

        let result = scan_all(dir.path(), &RefList::empty());
        let list = result.new_loose.unwrap();
        let names: Vec<_> = list.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(
            names,
            ["refs/heads/a-b", "refs/heads/a/c", "refs/heads/a0"]
        );
    }

    #[test]
    fn unchanged_rescan_returns_no_new_list() {
        let dir = tempfile::tempdir().unwrap();
        write_ref(dir.path(), "refs/heads/main", &format!("{A}\n"));

        let first = scan_all(dir.path(), &RefList::empty());
        let list = first.new_loose.unwrap();

        let second = scan_all(dir.path(), &list);
        assert!(second.new_loose.is_none());
    }

    #[test]
    fn deleted_entry_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        write_ref(dir.path(), "refs/heads/a", &format!("{A}\n"));
        write_ref(dir.path(), "refs/heads/b", &format!("{B}\n"));

        let first = scan_all(dir.path(), &RefList::empty());
        let list = first.new_loose.unwrap();
        assert_eq!(list.len(), 2);

        fs::remove_file(dir.path().join("refs/heads/a")).unwrap();
        let second = scan_all(dir.path(), &list);
        let list = second.new_loose.expect("deletion diverges");
        assert_eq!(list.len(), 1);
        assert_eq!(list.get_index(0).name(), "refs/heads/b");
    }

    #[test]
    fn subtree_scan_preserves_outside_entries() {
        let dir = tempfile::tempdir().unwrap();
        write_ref(dir.path(), "refs/heads/main", &format!("{A}\n"));
        write_ref(dir.path(), "refs/tags/v1", &format!("{B}\n"));

        let all = scan_all(dir.path(), &RefList::empty());
        let list = all.new_loose.unwrap();

        // Change only the heads subtree; tags entry must survive untouched.
        write_ref(dir.path(), "refs/heads/other", &format!("{B}\n"));
        let result = scan_loose(dir.path(), &list, "refs/heads/");
        let list = result.new_loose.expect("subtree diverged");
        let names: Vec<_> = list.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(
            names,
            ["refs/heads/main", "refs/heads/other", "refs/tags/v1"]
        );
    }

    #[test]
    fn scan_skips_lock_files() {
        let dir = tempfile::tempdir().unwrap();
        write_ref(dir.path(), "refs/heads/main", &format!("{A}\n"));
        write_ref(dir.path(), "refs/heads/main.lock", &format!("{B}\n"));

        let result = scan_all(dir.path(), &RefList::empty());
        let list = result.new_loose.unwrap();
        assert_eq!(list.len(), 1);
    }
}
