use std::fs;
use std::path::Path;

use bstr::{BString, ByteSlice};
use refdb_hash::ObjectId;
use refdb_utils::FileSnapshot;

use crate::error::RefError;
use crate::name::RefName;
use crate::reference::{Ref, Storage, Target};
use crate::reflist::{ListBuilder, RefList};

/// Header comment of the `packed-refs` file. Flags follow, space-separated;
/// unknown flags are ignored.
const HEADER_PREFIX: &[u8] = b"# pack-refs with: ";

/// Header flag: direct refs without a `^` line are known non-tags.
const PEELED_FLAG: &str = "peeled";

/// The parsed `packed-refs` file together with the snapshot it was read
/// under. The snapshot decides when the cache must be refreshed.
#[derive(Debug)]
pub(crate) struct PackedRefList {
    pub(crate) list: RefList<Ref>,
    pub(crate) snapshot: FileSnapshot,
}

impl PackedRefList {
    /// Sentinel for an absent `packed-refs` file.
    pub(crate) fn missing() -> Self {
        Self {
            list: RefList::empty(),
            snapshot: FileSnapshot::missing(),
        }
    }
}

/// Read and parse `packed-refs`. A missing file yields the empty list.
pub(crate) fn read(path: &Path) -> Result<PackedRefList, RefError> {
    let snapshot = FileSnapshot::save(path);
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(PackedRefList::missing())
        }
        Err(e) => {
            return Err(RefError::IoPath {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    Ok(PackedRefList {
        list: parse(&data)?,
        snapshot,
    })
}

/// Parse the body of a `packed-refs` file.
///
/// Out-of-order input is accepted and sorted. A `^` line before any ref is
/// an error.
pub(crate) fn parse(data: &[u8]) -> Result<RefList<Ref>, RefError> {
    let mut all: ListBuilder<Ref> = ListBuilder::new();
    let mut peeled = false;
    let mut need_sort = false;
    let mut last_name: Option<BString> = None;

    for line in data.lines() {
        if line.is_empty() {
            continue;
        }

        if line[0] == b'#' {
            if let Some(flags) = line.strip_prefix(HEADER_PREFIX) {
                peeled = flags
                    .split_str(b" ")
                    .any(|f| f == PEELED_FLAG.as_bytes());
            }
            continue;
        }

        if line[0] == b'^' {
            if all.is_empty() {
                return Err(malformed(line));
            }
            let peeled_id = parse_id(&line[1..]).ok_or_else(|| malformed(line))?;
            let idx = all.len() - 1;
            let (prev_name, tag) = {
                let prev = all.get(idx);
                let tag = prev.object_id().ok_or_else(|| malformed(line))?;
                (prev.name().clone(), tag)
            };
            all.set(idx, Ref::peeled_tag(Storage::Packed, prev_name, tag, peeled_id));
            continue;
        }

        let sp = line.find_byte(b' ').ok_or_else(|| malformed(line))?;
        let id = parse_id(&line[..sp]).ok_or_else(|| malformed(line))?;
        let name_bytes = line[sp + 1..].trim_end();
        let name = RefName::new(BString::from(name_bytes)).map_err(|_| malformed(line))?;

        if let Some(last) = &last_name {
            if last.as_bstr() > name.as_bstr() {
                need_sort = true;
            }
        }
        last_name = Some(name.as_bstr().to_owned());

        let r = if peeled {
            Ref::peeled_non_tag(Storage::Packed, name, id)
        } else {
            Ref::unpeeled(Storage::Packed, name, Some(id))
        };
        all.push(r);
    }

    if need_sort {
        all.sort();
    }
    Ok(all.to_ref_list())
}

fn parse_id(bytes: &[u8]) -> Option<ObjectId> {
    let hex = std::str::from_utf8(bytes.trim_end()).ok()?;
    ObjectId::from_hex(hex).ok()
}

fn malformed(line: &[u8]) -> RefError {
    RefError::Malformed {
        name: "packed-refs".into(),
        content: line.as_bstr().to_str_lossy().into_owned(),
    }
}

/// Encode a list as the canonical `packed-refs` file content.
///
/// The header is emitted when any ref carries a known peel state, so that
/// parsing the output reproduces the input. Only packed-storage direct refs
/// are written.
pub(crate) fn encode(refs: &RefList<Ref>) -> Vec<u8> {
    let peeled = refs
        .iter()
        .any(|r| r.storage().is_packed() && r.is_peeled());

    let mut out = Vec::new();
    if peeled {
        out.extend_from_slice(HEADER_PREFIX);
        out.extend_from_slice(PEELED_FLAG.as_bytes());
        out.push(b'\n');
    }

    for r in refs.iter() {
        if !r.storage().is_packed() {
            continue;
        }
        let Some(id) = r.object_id() else {
            continue;
        };
        out.extend_from_slice(id.to_hex().as_bytes());
        out.push(b' ');
        out.extend_from_slice(r.name().as_bstr().as_bytes());
        out.push(b'\n');
        if let Target::PeeledTag { peeled, .. } = r.target() {
            out.push(b'^');
            out.extend_from_slice(peeled.to_hex().as_bytes());
            out.push(b'\n');
        }
    }
    out
}
