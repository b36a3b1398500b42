// ident.rs
//
// Process-wide identifier interning. Every distinct name maps to exactly one
// `Ident` handle for the lifetime of the process, so name equality is a
// handle comparison.

use std::fmt;
use std::hash::BuildHasher;
use std::sync::LazyLock;

use hashbrown::hash_map::RawEntryMut;
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Interned identifier handle.
///
/// Handles are only created by the process-wide table and are never freed,
/// so they stay valid across sessions, arenas and threads.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ident(u32);

static TABLE: LazyLock<IdentTable> = LazyLock::new(IdentTable::new);

impl Ident {
    /// Intern `text`, returning the canonical handle.
    pub fn new(text: &str) -> Ident {
        TABLE.intern(text)
    }

    /// Build `parent ++ sep ++ segment` without hashing the full string when
    /// the same composition has been seen before.
    pub fn compose(parent: Ident, sep: char, segment: &str) -> Ident {
        TABLE.compose(parent, sep, segment)
    }

    /// Concatenate two identifiers with a separator.
    pub fn prefix(a: Ident, b: Ident, sep: char) -> Ident {
        TABLE.compose(a, sep, b.as_str())
    }

    /// Generate a fresh identifier `prefix ++ n` that has not been interned yet.
    pub fn uniq(prefix: &str) -> Ident {
        TABLE.uniq(prefix)
    }

    pub fn as_str(self) -> &'static str {
        TABLE.resolve(self)
    }

    pub fn len(self) -> usize {
        self.as_str().len()
    }

    pub fn is_empty(self) -> bool {
        self.as_str().is_empty()
    }

    /// Raw table index, stable for the lifetime of the process.
    pub fn index(self) -> u32 {
        self.0
    }

    /// The identifier this one was composed from, if it was built with
    /// [`Ident::compose`] at any point.
    pub fn parent(self) -> Option<Ident> {
        TABLE.parent(self).map(|(parent, _)| parent)
    }

    /// Prefix up to (not including) the first `sep`, or `self` when absent.
    pub fn until(self, sep: char) -> Ident {
        match self.as_str().find(sep) {
            Some(pos) => Ident::new(&self.as_str()[..pos]),
            None => self,
        }
    }

    /// Prefix up to (not including) the last `sep`, or `self` when absent.
    pub fn runtil(self, sep: char) -> Ident {
        if let Some((parent, psep)) = TABLE.parent(self)
            && psep == sep
        {
            return parent;
        }
        match self.as_str().rfind(sep) {
            Some(pos) => Ident::new(&self.as_str()[..pos]),
            None => self,
        }
    }

    /// Suffix after the last `sep`, or `None` when `sep` does not occur.
    pub fn rfrom(self, sep: char) -> Option<Ident> {
        let text = self.as_str();
        text.rfind(sep)
            .map(|pos| Ident::new(&text[pos + sep.len_utf8()..]))
    }

    /// Last segment of a separated name (`self` when there is no separator).
    pub fn last_segment(self, sep: char) -> Ident {
        self.rfrom(sep).unwrap_or(self)
    }

    /// Iterate over the separated segments of a selected name, e.g.
    /// `WORK.PKG.F` yields `WORK`, `PKG`, `F`.
    pub fn walk_selected(self, sep: char) -> impl Iterator<Item = Ident> {
        self.as_str()
            .split(sep)
            .filter(|s| !s.is_empty())
            .map(Ident::new)
    }

    pub fn starts_with(self, prefix: Ident) -> bool {
        self.as_str().starts_with(prefix.as_str())
    }

    /// Number of identifiers interned so far.
    pub fn table_len() -> usize {
        TABLE.len()
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ident({:?})", self.as_str())
    }
}

impl From<&str> for Ident {
    fn from(text: &str) -> Self {
        Ident::new(text)
    }
}

impl Serialize for Ident {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Ident {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Ident::new(&text))
    }
}

struct Record {
    text: &'static str,
    parent: Option<(Ident, char)>,
}

#[derive(PartialEq, Eq, Hash)]
struct ComposeKey {
    parent: Ident,
    sep: char,
    segment: &'static str,
}

/// Borrowed mirror of `ComposeKey`; hashes identically.
#[derive(Hash)]
struct ComposeKeyRef<'a> {
    parent: Ident,
    sep: char,
    segment: &'a str,
}

struct TableInner {
    map: hashbrown::HashMap<&'static str, Ident, FxBuildHasher>,
    composed: hashbrown::HashMap<ComposeKey, Ident, FxBuildHasher>,
    records: Vec<Record>,
    next_uniq: u32,
}

impl TableInner {
    fn insert_hashed(&mut self, hash: u64, text: &str, parent: Option<(Ident, char)>) -> Ident {
        match self.map.raw_entry_mut().from_hash(hash, |k| *k == text) {
            RawEntryMut::Occupied(e) => {
                let id = *e.get();
                let record = &mut self.records[id.0 as usize];
                if record.parent.is_none() {
                    record.parent = parent;
                }
                id
            }
            RawEntryMut::Vacant(e) => {
                let id = Ident(self.records.len() as u32);
                // Records are never removed, leaking gives every handle a
                // 'static view of its text.
                let leaked: &'static str = Box::leak(text.to_owned().into_boxed_str());
                self.records.push(Record {
                    text: leaked,
                    parent,
                });
                e.insert_hashed_nocheck(hash, leaked, id);
                id
            }
        }
    }
}

/// The interning table behind [`Ident`].
///
/// Lookups take a shared lock; a miss re-checks under the exclusive lock so
/// concurrent callers interning the same text always agree on one handle.
pub struct IdentTable {
    inner: RwLock<TableInner>,
    hasher: FxBuildHasher,
}

impl IdentTable {
    fn new() -> Self {
        Self {
            inner: RwLock::new(TableInner {
                map: hashbrown::HashMap::with_hasher(FxBuildHasher),
                composed: hashbrown::HashMap::with_hasher(FxBuildHasher),
                records: Vec::new(),
                next_uniq: 0,
            }),
            hasher: FxBuildHasher,
        }
    }

    fn intern(&self, text: &str) -> Ident {
        let hash = self.hasher.hash_one(text);
        {
            let inner = self.inner.read();
            if let Some((_, id)) = inner.map.raw_entry().from_hash(hash, |k| *k == text) {
                return *id;
            }
        }
        self.inner.write().insert_hashed(hash, text, None)
    }

    fn compose(&self, parent: Ident, sep: char, segment: &str) -> Ident {
        let key = ComposeKeyRef {
            parent,
            sep,
            segment,
        };
        let key_hash = self.hasher.hash_one(&key);
        let matches = |k: &ComposeKey| k.parent == parent && k.sep == sep && k.segment == segment;

        {
            let inner = self.inner.read();
            if let Some((_, id)) = inner.composed.raw_entry().from_hash(key_hash, matches) {
                return *id;
            }
        }

        let mut inner = self.inner.write();
        if let Some((_, id)) = inner.composed.raw_entry().from_hash(key_hash, matches) {
            return *id;
        }

        let parent_text = inner.records[parent.0 as usize].text;
        let mut full = String::with_capacity(parent_text.len() + sep.len_utf8() + segment.len());
        full.push_str(parent_text);
        full.push(sep);
        full.push_str(segment);

        let full_hash = self.hasher.hash_one(full.as_str());
        let id = inner.insert_hashed(full_hash, &full, Some((parent, sep)));

        let text = inner.records[id.0 as usize].text;
        let stored_segment = &text[parent_text.len() + sep.len_utf8()..];
        inner.composed.raw_entry_mut().from_hash(key_hash, matches).or_insert_with(|| {
            (
                ComposeKey {
                    parent,
                    sep,
                    segment: stored_segment,
                },
                id,
            )
        });
        id
    }

    fn uniq(&self, prefix: &str) -> Ident {
        let mut inner = self.inner.write();
        loop {
            let candidate = format!("{}{}", prefix, inner.next_uniq);
            inner.next_uniq += 1;
            let hash = self.hasher.hash_one(candidate.as_str());
            let known = inner
                .map
                .raw_entry()
                .from_hash(hash, |k| *k == candidate)
                .is_some();
            if !known {
                return inner.insert_hashed(hash, &candidate, None);
            }
        }
    }

    fn resolve(&self, id: Ident) -> &'static str {
        self.inner.read().records[id.0 as usize].text
    }

    fn parent(&self, id: Ident) -> Option<(Ident, char)> {
        self.inner.read().records[id.0 as usize].parent
    }

    fn len(&self) -> usize {
        self.inner.read().records.len()
    }
}

impl<'a> ComposeKeyRef<'a> {
    #[cfg(test)]
    fn owned_hash_matches(&self, hasher: &FxBuildHasher) -> bool {
        let owned = ComposeKey {
            parent: self.parent,
            sep: self.sep,
            segment: Box::leak(self.segment.to_owned().into_boxed_str()),
        };
        hasher.hash_one(&owned) == hasher.hash_one(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn intern_returns_same_handle() {
        let a = Ident::new("clk");
        let b = Ident::new("clk");
        let c = Ident::new("rst");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "clk");
    }

    #[test]
    fn compose_matches_direct_intern() {
        let work = Ident::new("WORK");
        let composed = Ident::compose(work, '.', "COUNTER");
        assert_eq!(composed, Ident::new("WORK.COUNTER"));
        assert_eq!(composed.parent(), Some(work));
        // Second composition hits the compose cache.
        assert_eq!(Ident::compose(work, '.', "COUNTER"), composed);
    }

    #[test]
    fn compose_after_plain_intern_records_parent() {
        let plain = Ident::new(":late:child");
        let parent = Ident::new(":late");
        assert_eq!(Ident::compose(parent, ':', "child"), plain);
        assert_eq!(plain.parent(), Some(parent));
    }

    #[test]
    fn selected_name_helpers() {
        let name = Ident::new("WORK.PKG.FUNC");
        assert_eq!(name.until('.'), Ident::new("WORK"));
        assert_eq!(name.runtil('.'), Ident::new("WORK.PKG"));
        assert_eq!(name.rfrom('.'), Some(Ident::new("FUNC")));
        assert_eq!(Ident::new("PLAIN").rfrom('.'), None);
        assert_eq!(Ident::new("PLAIN").last_segment('.'), Ident::new("PLAIN"));
        let segments: Vec<_> = name.walk_selected('.').collect();
        assert_eq!(
            segments,
            vec![Ident::new("WORK"), Ident::new("PKG"), Ident::new("FUNC")]
        );
    }

    #[test]
    fn uniq_never_collides() {
        let taken = Ident::new("_tmp_uniq0");
        let fresh = Ident::uniq("_tmp_uniq");
        assert_ne!(fresh, taken);
        assert!(fresh.as_str().starts_with("_tmp_uniq"));
    }

    #[test]
    fn concurrent_interning_agrees() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(|| {
                    (0..200)
                        .map(|i| Ident::new(&format!("concurrent_{i}")))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<Vec<Ident>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for other in &results[1..] {
            assert_eq!(&results[0], other);
        }
    }

    #[test]
    fn compose_key_hashes_like_borrowed_key() {
        let key = ComposeKeyRef {
            parent: Ident::new("A"),
            sep: '.',
            segment: "B",
        };
        assert!(key.owned_hash_matches(&FxBuildHasher));
    }
}
