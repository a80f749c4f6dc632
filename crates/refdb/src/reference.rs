use refdb_hash::ObjectId;

use crate::name::RefName;

/// Where a reference value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Not yet persisted anywhere.
    New,
    /// A file under `refs/` (or a top-level pseudo-ref file).
    Loose,
    /// A line in the `packed-refs` file.
    Packed,
    /// Present both as a loose file and a packed line.
    LoosePacked,
    /// Received over the wire, not backed by local storage.
    Network,
}

impl Storage {
    pub fn is_loose(self) -> bool {
        matches!(self, Storage::Loose | Storage::LoosePacked)
    }

    pub fn is_packed(self) -> bool {
        matches!(self, Storage::Packed | Storage::LoosePacked)
    }
}

/// What a reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// An object id whose peel state is unknown. The id itself may be
    /// unknown when the ref stands in for an unresolved symbolic target.
    Unpeeled(Option<ObjectId>),
    /// An annotated tag together with the non-tag object it peels to.
    PeeledTag { tag: ObjectId, peeled: ObjectId },
    /// An object known not to be a tag; it is its own peeled value.
    PeeledNonTag(ObjectId),
    /// Another reference, by value.
    Symbolic(Box<Ref>),
}

/// A named, immutable reference snapshot.
///
/// Values are never edited in place; updates replace whole entries in the
/// containing list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    name: RefName,
    storage: Storage,
    target: Target,
}

impl Ref {
    /// A direct ref whose peel status is not known.
    pub fn unpeeled(storage: Storage, name: RefName, id: Option<ObjectId>) -> Self {
        Self {
            name,
            storage,
            target: Target::Unpeeled(id),
        }
    }

    /// A direct ref naming an annotated tag, with its peeled target.
    pub fn peeled_tag(storage: Storage, name: RefName, tag: ObjectId, peeled: ObjectId) -> Self {
        Self {
            name,
            storage,
            target: Target::PeeledTag { tag, peeled },
        }
    }

    /// A direct ref known not to name a tag.
    pub fn peeled_non_tag(storage: Storage, name: RefName, id: ObjectId) -> Self {
        Self {
            name,
            storage,
            target: Target::PeeledNonTag(id),
        }
    }

    /// A symbolic ref pointing at `target`.
    pub fn symbolic(storage: Storage, name: RefName, target: Ref) -> Self {
        Self {
            name,
            storage,
            target: Target::Symbolic(Box::new(target)),
        }
    }

    pub fn name(&self) -> &RefName {
        &self.name
    }

    pub fn storage(&self) -> Storage {
        self.storage
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self.target, Target::Symbolic(_))
    }

    /// The immediate target if this is a symbolic ref.
    pub fn symbolic_target(&self) -> Option<&Ref> {
        match &self.target {
            Target::Symbolic(t) => Some(t),
            _ => None,
        }
    }

    /// The terminal direct reference reached by following symbolic targets.
    pub fn leaf(&self) -> &Ref {
        let mut cur = self;
        while let Target::Symbolic(t) = &cur.target {
            cur = t;
        }
        cur
    }

    /// The object id of the leaf, if known.
    pub fn object_id(&self) -> Option<ObjectId> {
        match &self.leaf().target {
            Target::Unpeeled(id) => *id,
            Target::PeeledTag { tag, .. } => Some(*tag),
            Target::PeeledNonTag(id) => Some(*id),
            Target::Symbolic(_) => None,
        }
    }

    /// The peeled id of the leaf. `Some` only for a peeled annotated tag.
    pub fn peeled_object_id(&self) -> Option<ObjectId> {
        match &self.leaf().target {
            Target::PeeledTag { peeled, .. } => Some(*peeled),
            _ => None,
        }
    }

    /// Has the leaf's peel status been determined?
    pub fn is_peeled(&self) -> bool {
        matches!(
            &self.leaf().target,
            Target::PeeledTag { .. } | Target::PeeledNonTag(_)
        )
    }
}

impl crate::reflist::RefItem for Ref {
    fn name(&self) -> &str {
        self.name.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(hex: &str) -> ObjectId {
        ObjectId::from_hex(hex).unwrap()
    }

    fn name(s: &str) -> RefName {
        RefName::new(s).unwrap()
    }

    #[test]
    fn direct_ref_accessors() {
        let oid = id("da39a3ee5e6b4b0d3255bfef95601890afd80709");
        let r = Ref::unpeeled(Storage::Loose, name("refs/heads/main"), Some(oid));
        assert!(!r.is_symbolic());
        assert!(!r.is_peeled());
        assert_eq!(r.object_id(), Some(oid));
        assert_eq!(r.peeled_object_id(), None);
        assert_eq!(r.leaf().name().as_str(), "refs/heads/main");
    }

    #[test]
    fn peeled_tag_exposes_both_ids() {
        let tag = id("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let peeled = id("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        let r = Ref::peeled_tag(Storage::Packed, name("refs/tags/v1"), tag, peeled);
        assert!(r.is_peeled());
        assert_eq!(r.object_id(), Some(tag));
        assert_eq!(r.peeled_object_id(), Some(peeled));
    }

    #[test]
    fn peeled_non_tag_is_its_own_peel() {
        let oid = id("cccccccccccccccccccccccccccccccccccccccc");
        let r = Ref::peeled_non_tag(Storage::Packed, name("refs/heads/a"), oid);
        assert!(r.is_peeled());
        assert_eq!(r.object_id(), Some(oid));
        assert_eq!(r.peeled_object_id(), None);
    }

    #[test]
    fn symbolic_chain_leaf() {
        let oid = id("da39a3ee5e6b4b0d3255bfef95601890afd80709");
        let main = Ref::unpeeled(Storage::Loose, name("refs/heads/main"), Some(oid));
        let head = Ref::symbolic(Storage::Loose, name("HEAD"), main);
        assert!(head.is_symbolic());
        assert_eq!(head.leaf().name().as_str(), "refs/heads/main");
        assert_eq!(head.object_id(), Some(oid));
    }

    #[test]
    fn unresolved_symbolic_target_has_no_id() {
        let target = Ref::unpeeled(Storage::New, name("refs/heads/unborn"), None);
        let head = Ref::symbolic(Storage::Loose, name("HEAD"), target);
        assert_eq!(head.object_id(), None);
        assert!(!head.is_peeled());
    }

    #[test]
    fn storage_classification() {
        assert!(Storage::Loose.is_loose());
        assert!(Storage::LoosePacked.is_loose());
        assert!(Storage::LoosePacked.is_packed());
        assert!(Storage::Packed.is_packed());
        assert!(!Storage::New.is_loose());
        assert!(!Storage::Network.is_packed());
    }
}
