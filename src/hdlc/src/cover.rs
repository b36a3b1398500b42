// src/cover.rs
//! Coverage tagging during elaboration.
//!
//! Each elaborated instance opens a scope named by its hierarchical path.
//! Concurrent statements, processes and the branches of `if` statements get a
//! tag whose name extends the enclosing scope: a labelled statement uses its
//! label, anything else a generated `_S<n>` or `_B<n>` name numbered per scope.
//! Logical and relational operators get `_E<n>` tags, and bit-like signals and
//! ports one toggle tag per scalar element named after the object.
//!
//! Only the kinds in the session's [`CoverMask`] are recorded. Scopes and
//! generated names do not depend on the mask, so databases tagged with
//! different masks still agree on the names they share.
//!
//! A database is written with [`CoverTagging::dump`]: the magic `HDCV`, a
//! little-endian `u32` format version, then one bincode record. Databases from
//! several runs combine with [`CoverTagging::merge`], which matches tags by
//! hierarchical name.

use hdlc_identity::{FileRef, Ident, Loc};
use hdlc_object::{Builtin, Direction, ObjectStore, StaticRange, Tree, TreeKind};
use hdlc_sema::CoverMask;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const HIER_SEP: char = ':';

pub const MAGIC: &[u8; 4] = b"HDCV";
pub const FORMAT_VERSION: u32 = 1;

/// Bins a tag tracks in [`CoverTag::flags`] and has hit in [`CoverTag::data`].
pub mod bins {
    pub const TRUE: u32 = 1 << 0;
    pub const FALSE: u32 = 1 << 1;
    /// Operand combinations of binary logical operators, left bit first.
    pub const OPERANDS_00: u32 = 1 << 2;
    pub const OPERANDS_01: u32 = 1 << 3;
    pub const OPERANDS_10: u32 = 1 << 4;
    pub const OPERANDS_11: u32 = 1 << 5;
    pub const RISE: u32 = 1 << 8;
    pub const FALL: u32 = 1 << 9;
}

#[derive(Debug, Error)]
pub enum CoverError {
    #[error("not a coverage database")]
    BadMagic,

    #[error("coverage database format {found}, expected {expected}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("tag {hier} is a {found:?} tag here but a {expected:?} tag in the merged database")]
    KindMismatch {
        hier: String,
        expected: TagKind,
        found: TagKind,
    },

    #[error("{found} counters for {expected} tags")]
    CountMismatch { expected: usize, found: usize },

    #[error("exclude line {line}: expected 'exclude <pattern>', found '{text}'")]
    ExcludeSyntax { line: usize, text: String },

    #[error("encode failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagKind {
    Statement,
    Branch,
    Toggle,
    Expression,
}

impl TagKind {
    fn mask(self) -> CoverMask {
        match self {
            TagKind::Statement => CoverMask::STATEMENT,
            TagKind::Branch => CoverMask::BRANCH,
            TagKind::Toggle => CoverMask::TOGGLE,
            TagKind::Expression => CoverMask::EXPRESSION,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoverTag {
    pub kind: TagKind,
    /// Sequence number across the whole design.
    pub id: u32,
    pub hier: Ident,
    pub loc: Loc,
    /// Bins the tag tracks; statements and branches track none.
    pub flags: u32,
    /// Hit count for statements and branches, hit bins for the others.
    pub data: u32,
    pub excluded: bool,
}

impl CoverTag {
    pub fn is_covered(&self) -> bool {
        if self.excluded {
            return true;
        }
        match self.kind {
            TagKind::Statement | TagKind::Branch => self.data > 0,
            TagKind::Toggle | TagKind::Expression => self.data & self.flags == self.flags,
        }
    }

    fn accumulate(&mut self, data: u32) {
        match self.kind {
            TagKind::Statement | TagKind::Branch => self.data = self.data.saturating_add(data),
            TagKind::Toggle | TagKind::Expression => self.data |= data,
        }
    }
}

/// Shape of an object that gets toggle tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleShape {
    Scalar,
    Array(StaticRange),
}

struct CoverScope {
    hier: Ident,
    stmt_label: u32,
    branch_label: u32,
    expr_label: u32,
}

#[derive(Serialize, Deserialize)]
struct TagRecord {
    kind: TagKind,
    hier: Ident,
    file: Option<String>,
    line: u32,
    column: u32,
    flags: u32,
    data: u32,
    excluded: bool,
}

#[derive(Serialize, Deserialize)]
struct Database {
    mask: u32,
    array_limit: u32,
    tags: Vec<TagRecord>,
}

pub struct CoverTagging {
    mask: CoverMask,
    array_limit: u32,
    scopes: Vec<CoverScope>,
    tags: Vec<CoverTag>,
}

impl CoverTagging {
    /// Tag the kinds in `mask`. Arrays of `array_limit` or more elements get
    /// no toggle tags unless the limit is 0.
    pub fn new(mask: CoverMask, array_limit: u32) -> CoverTagging {
        CoverTagging {
            mask,
            array_limit,
            scopes: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn mask(&self) -> CoverMask {
        self.mask
    }

    pub fn enabled(&self, kind: TagKind) -> bool {
        self.mask.contains(kind.mask())
    }

    pub fn push_scope(&mut self, hier: Ident) {
        self.scopes.push(CoverScope {
            hier,
            stmt_label: 0,
            branch_label: 0,
            expr_label: 0,
        });
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.pop().is_none() {
            panic!("INTERNAL: coverage scope stack underflow");
        }
    }

    fn scope(&mut self) -> &mut CoverScope {
        match self.scopes.last_mut() {
            Some(scope) => scope,
            None => panic!("INTERNAL: coverage tag outside any scope"),
        }
    }

    /// Name a tag in the current scope and record it when its kind is
    /// enabled. Returns the hierarchical name either way.
    pub fn add_tag(&mut self, kind: TagKind, label: Option<Ident>, loc: Loc) -> Ident {
        let scope = self.scope();
        let segment = match (label, kind) {
            (Some(label), _) => label.as_str().to_owned(),
            (None, TagKind::Statement | TagKind::Toggle) => {
                scope.stmt_label += 1;
                format!("_S{}", scope.stmt_label - 1)
            }
            (None, TagKind::Branch) => {
                scope.branch_label += 1;
                format!("_B{}", scope.branch_label - 1)
            }
            (None, TagKind::Expression) => {
                scope.expr_label += 1;
                format!("_E{}", scope.expr_label - 1)
            }
        };
        let hier = Ident::compose(scope.hier, HIER_SEP, &segment);
        self.record(kind, hier, loc, 0);
        hier
    }

    fn record(&mut self, kind: TagKind, hier: Ident, loc: Loc, flags: u32) {
        if !self.enabled(kind) {
            return;
        }
        let id = self.tags.len() as u32;
        self.tags.push(CoverTag {
            kind,
            id,
            hier,
            loc,
            flags,
            data: 0,
            excluded: false,
        });
    }

    /// Tag the concurrent statements of one instance, recursing into process
    /// bodies.
    pub fn tag_statements(&mut self, store: &ObjectStore, stmts: &[Tree]) {
        for &stmt in stmts {
            let node = store.tree(stmt);
            match node.kind {
                // Instances get their own scope when elaborated.
                TreeKind::Instance => {}
                TreeKind::Process => {
                    let hier = self.add_tag(TagKind::Statement, node.ident, node.loc);
                    self.push_scope(hier);
                    self.tag_sequential(store, &node.stmts);
                    self.pop_scope();
                }
                _ => {
                    self.add_tag(TagKind::Statement, node.ident, node.loc);
                    if let Some(value) = node.value {
                        self.tag_expression(store, value);
                    }
                }
            }
        }
    }

    fn tag_sequential(&mut self, store: &ObjectStore, stmts: &[Tree]) {
        for &stmt in stmts {
            let node = store.tree(stmt);
            self.add_tag(TagKind::Statement, None, node.loc);
            if let Some(value) = node.value {
                self.tag_expression(store, value);
            }
            match node.kind {
                TreeKind::If => {
                    for branch in [&node.stmts, &node.else_stmts] {
                        let hier = self.add_tag(TagKind::Branch, None, node.loc);
                        self.push_scope(hier);
                        self.tag_sequential(store, branch);
                        self.pop_scope();
                    }
                }
                TreeKind::While | TreeKind::For => self.tag_sequential(store, &node.stmts),
                _ => {}
            }
        }
    }

    /// Tag the logical and relational operator calls in `expr`, operands
    /// first.
    fn tag_expression(&mut self, store: &ObjectStore, expr: Tree) {
        let node = store.tree(expr);
        if node.kind != TreeKind::FCall {
            return;
        }
        for &param in &node.params {
            if let Some(value) = store.tree(param).value {
                self.tag_expression(store, value);
            }
        }
        let builtin = node.reference.and_then(|decl| store.tree(decl).builtin);
        let Some(flags) = builtin.and_then(expression_bins) else {
            return;
        };
        let scope = self.scope();
        scope.expr_label += 1;
        let segment = format!("_E{}", scope.expr_label - 1);
        let hier = Ident::compose(scope.hier, HIER_SEP, &segment);
        self.record(TagKind::Expression, hier, node.loc, flags);
    }

    /// Toggle tags for a signal or port of the current scope, one per scalar
    /// element. Returns how many were added.
    pub fn tag_toggles(&mut self, name: Ident, shape: ToggleShape, loc: Loc) -> usize {
        if !self.enabled(TagKind::Toggle) {
            return 0;
        }
        let flags = bins::RISE | bins::FALL;
        let scope_hier = self.scope().hier;
        let range = match shape {
            ToggleShape::Scalar => {
                let hier = Ident::compose(scope_hier, HIER_SEP, name.as_str());
                self.record(TagKind::Toggle, hier, loc, flags);
                return 1;
            }
            ToggleShape::Array(range) => range,
        };
        let length = u64::try_from(range.length()).unwrap_or(0);
        if self.array_limit != 0 && length >= u64::from(self.array_limit) {
            tracing::debug!(object = %name, length, limit = self.array_limit, "array skipped for toggle coverage");
            return 0;
        }
        let indices: Box<dyn Iterator<Item = i64>> = match range.direction {
            Direction::To => Box::new(range.left..=range.right),
            Direction::Downto => Box::new((range.right..=range.left).rev()),
        };
        let mut added = 0;
        for index in indices {
            let segment = format!("{}({index})", name.as_str());
            let hier = Ident::compose(scope_hier, HIER_SEP, &segment);
            self.record(TagKind::Toggle, hier, loc, flags);
            added += 1;
        }
        added
    }

    pub fn count(&self, kind: TagKind) -> usize {
        self.tags.iter().filter(|t| t.kind == kind).count()
    }

    /// Covered and total tags of one kind. Excluded tags count as covered.
    pub fn summary(&self, kind: TagKind) -> (usize, usize) {
        let mut covered = 0;
        let mut total = 0;
        for tag in self.tags.iter().filter(|t| t.kind == kind) {
            total += 1;
            if tag.is_covered() {
                covered += 1;
            }
        }
        (covered, total)
    }

    pub fn tags(&self) -> &[CoverTag] {
        &self.tags
    }

    pub fn find(&self, hier: &str) -> Option<&CoverTag> {
        self.tags.iter().find(|t| t.hier.as_str() == hier)
    }

    /// Fold the counters of one run into the tags, indexed by tag id.
    pub fn apply_counts(&mut self, counts: &[u32]) -> Result<(), CoverError> {
        if counts.len() != self.tags.len() {
            return Err(CoverError::CountMismatch {
                expected: self.tags.len(),
                found: counts.len(),
            });
        }
        for (tag, &data) in self.tags.iter_mut().zip(counts) {
            tag.accumulate(data);
        }
        Ok(())
    }

    /// Add the results of `other` into this database. Statement and branch
    /// counts add up, bins are combined. Tags of `other` missing here are
    /// skipped. Returns the number of tags merged.
    pub fn merge(&mut self, other: &CoverTagging) -> Result<usize, CoverError> {
        let index: FxHashMap<Ident, usize> = self
            .tags
            .iter()
            .enumerate()
            .map(|(i, t)| (t.hier, i))
            .collect();
        let mut merged = 0;
        for theirs in &other.tags {
            let Some(&i) = index.get(&theirs.hier) else {
                tracing::warn!(tag = %theirs.hier, "coverage tag missing from merged database");
                continue;
            };
            let ours = &mut self.tags[i];
            if ours.kind != theirs.kind {
                return Err(CoverError::KindMismatch {
                    hier: theirs.hier.as_str().to_owned(),
                    expected: ours.kind,
                    found: theirs.kind,
                });
            }
            ours.accumulate(theirs.data);
            ours.excluded |= theirs.excluded;
            merged += 1;
        }
        tracing::debug!(merged, skipped = other.tags.len() - merged, "merged coverage");
        Ok(merged)
    }

    /// Apply an exclusion list. Each line holds `exclude <pattern>`, where `*`
    /// in the pattern matches any run of characters; `#` starts a comment.
    /// Returns the number of tags excluded.
    pub fn exclude(&mut self, text: &str) -> Result<usize, CoverError> {
        let mut excluded = 0;
        for (number, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut words = line.split_whitespace();
            let pattern = match (words.next(), words.next(), words.next()) {
                (Some(word), Some(pattern), None) if word.eq_ignore_ascii_case("exclude") => {
                    pattern.to_ascii_uppercase()
                }
                _ => {
                    return Err(CoverError::ExcludeSyntax {
                        line: number + 1,
                        text: line.to_owned(),
                    });
                }
            };
            let mut matched = 0;
            for tag in &mut self.tags {
                if glob_match(pattern.as_bytes(), tag.hier.as_str().as_bytes()) {
                    tag.excluded = true;
                    matched += 1;
                }
            }
            if matched == 0 {
                tracing::warn!(%pattern, "exclude pattern matches no coverage tag");
            }
            excluded += matched;
        }
        Ok(excluded)
    }

    pub fn dump(&self) -> Result<Vec<u8>, CoverError> {
        let db = Database {
            mask: self.mask.bits(),
            array_limit: self.array_limit,
            tags: self
                .tags
                .iter()
                .map(|t| TagRecord {
                    kind: t.kind,
                    hier: t.hier,
                    file: (t.loc != Loc::INVALID).then(|| t.loc.file().name().to_owned()),
                    line: t.loc.first_line(),
                    column: t.loc.first_column(),
                    flags: t.flags,
                    data: t.data,
                    excluded: t.excluded,
                })
                .collect(),
        };
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend(bincode::serde::encode_to_vec(&db, bincode::config::standard())?);
        tracing::debug!(tags = db.tags.len(), bytes = bytes.len(), "dumped coverage");
        Ok(bytes)
    }

    pub fn read(bytes: &[u8]) -> Result<CoverTagging, CoverError> {
        if bytes.len() < 8 || &bytes[..4] != MAGIC {
            return Err(CoverError::BadMagic);
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[4..8]);
        let found = u32::from_le_bytes(version);
        if found != FORMAT_VERSION {
            return Err(CoverError::VersionMismatch {
                expected: FORMAT_VERSION,
                found,
            });
        }
        let (db, _): (Database, usize) =
            bincode::serde::decode_from_slice(&bytes[8..], bincode::config::standard())?;
        let tags = db
            .tags
            .into_iter()
            .enumerate()
            .map(|(id, r)| CoverTag {
                kind: r.kind,
                id: id as u32,
                hier: r.hier,
                loc: match r.file {
                    Some(file) => Loc::point(FileRef::intern(&file), r.line, r.column),
                    None => Loc::INVALID,
                },
                flags: r.flags,
                data: r.data,
                excluded: r.excluded,
            })
            .collect();
        Ok(CoverTagging {
            mask: CoverMask::from_bits_truncate(db.mask),
            array_limit: db.array_limit,
            scopes: Vec::new(),
            tags,
        })
    }
}

/// Bins an operator's tag must hit to be covered; `None` for operators that
/// are not tagged.
fn expression_bins(builtin: Builtin) -> Option<u32> {
    use self::bins::*;
    match builtin {
        Builtin::And | Builtin::Nand => Some(OPERANDS_01 | OPERANDS_10 | OPERANDS_11),
        Builtin::Or | Builtin::Nor => Some(OPERANDS_00 | OPERANDS_01 | OPERANDS_10),
        Builtin::Xor | Builtin::Xnor => Some(OPERANDS_00 | OPERANDS_01 | OPERANDS_10 | OPERANDS_11),
        Builtin::Eq | Builtin::Neq | Builtin::Lt | Builtin::Le | Builtin::Gt | Builtin::Ge | Builtin::Not => {
            Some(TRUE | FALSE)
        }
        _ => None,
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| glob_match(rest, &text[skip..])),
        Some((&c, rest)) => text.first() == Some(&c) && glob_match(rest, &text[1..]),
    }
}

impl std::fmt::Debug for CoverTagging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverTagging")
            .field("mask", &self.mask)
            .field("depth", &self.scopes.len())
            .field("tags", &self.tags.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use hdlc_object::builder::build_unit;

    use super::*;

    fn statements_and_branches() -> CoverTagging {
        CoverTagging::new(CoverMask::STATEMENT | CoverMask::BRANCH, 0)
    }

    #[test]
    fn unnamed_statements_are_numbered_per_scope() {
        let mut cover = statements_and_branches();
        cover.push_scope(Ident::new(":TOP"));
        let s0 = cover.add_tag(TagKind::Statement, None, Loc::INVALID);
        let named = cover.add_tag(TagKind::Statement, Some(Ident::new("DRIVE")), Loc::INVALID);
        let s1 = cover.add_tag(TagKind::Statement, None, Loc::INVALID);

        cover.push_scope(Ident::new(":TOP:U1"));
        let inner = cover.add_tag(TagKind::Statement, None, Loc::INVALID);
        cover.pop_scope();

        assert_eq!(s0.as_str(), ":TOP:_S0");
        assert_eq!(named.as_str(), ":TOP:DRIVE");
        assert_eq!(s1.as_str(), ":TOP:_S1");
        assert_eq!(inner.as_str(), ":TOP:U1:_S0");
        assert_eq!(cover.tags().iter().map(|t| t.id).collect::<Vec<_>>(), [0, 1, 2, 3]);
    }

    fn process_with_if(store: &mut ObjectStore) -> Vec<Tree> {
        let id = store.insert(build_unit("cover.vhd", |b| {
            let cond = b.name("true");
            let a = b.null();
            let c = b.null();
            let choice = b.if_(cond, vec![a], vec![c]);
            let wait = b.wait(vec![]);
            let p = b.process("p", vec![], vec![], vec![choice, wait]);
            b.architecture("rtl", "top", vec![], vec![p])
        }));
        let root = store.arena(id).and_then(|a| a.root()).unwrap();
        store.tree(root).stmts.clone()
    }

    #[test]
    fn if_branches_are_tagged_inside_processes() {
        let mut store = ObjectStore::new();
        let stmts = process_with_if(&mut store);

        let mut cover = statements_and_branches();
        cover.push_scope(Ident::new(":TOP"));
        cover.tag_statements(&store, &stmts);
        cover.pop_scope();

        // process, if, two nulls and the wait
        assert_eq!(cover.count(TagKind::Statement), 5);
        assert_eq!(cover.count(TagKind::Branch), 2);
        assert!(cover.find(":TOP:P").is_some());
        assert!(cover.find(":TOP:P:_B1").is_some());
        assert!(cover.find(":TOP:P:_B0:_S0").is_some());
    }

    #[test]
    fn masked_kinds_keep_the_names_of_the_others() {
        let mut store = ObjectStore::new();
        let stmts = process_with_if(&mut store);

        let mut cover = CoverTagging::new(CoverMask::BRANCH, 0);
        cover.push_scope(Ident::new(":TOP"));
        cover.tag_statements(&store, &stmts);
        cover.pop_scope();

        assert_eq!(cover.count(TagKind::Statement), 0);
        assert_eq!(cover.count(TagKind::Branch), 2);
        assert!(cover.find(":TOP:P:_B1").is_some());
        assert_eq!(cover.tags()[1].id, 1);
    }

    #[test]
    fn toggles_cover_each_element_unless_the_array_is_too_long() {
        let mut cover = CoverTagging::new(CoverMask::TOGGLE, 8);
        cover.push_scope(Ident::new(":TOP"));
        let clk = cover.tag_toggles(Ident::new("CLK"), ToggleShape::Scalar, Loc::INVALID);
        let nibble = StaticRange {
            left: 3,
            direction: Direction::Downto,
            right: 0,
        };
        let bus = cover.tag_toggles(Ident::new("BUS"), ToggleShape::Array(nibble), Loc::INVALID);
        let wide = StaticRange {
            left: 0,
            direction: Direction::To,
            right: 7,
        };
        let skipped = cover.tag_toggles(Ident::new("WIDE"), ToggleShape::Array(wide), Loc::INVALID);
        cover.pop_scope();

        assert_eq!((clk, bus, skipped), (1, 4, 0));
        assert_eq!(cover.count(TagKind::Toggle), 5);
        assert_eq!(cover.tags()[1].hier.as_str(), ":TOP:BUS(3)");
        assert_eq!(cover.tags()[4].hier.as_str(), ":TOP:BUS(0)");
        assert_eq!(cover.find(":TOP:CLK").unwrap().flags, bins::RISE | bins::FALL);
        assert!(cover.find(":TOP:WIDE(0)").is_none());
    }

    #[test]
    fn toggles_are_not_tagged_without_the_toggle_kind() {
        let mut cover = statements_and_branches();
        cover.push_scope(Ident::new(":TOP"));
        assert_eq!(cover.tag_toggles(Ident::new("CLK"), ToggleShape::Scalar, Loc::INVALID), 0);
        assert!(cover.tags().is_empty());
    }

    fn toggled_design() -> CoverTagging {
        let mut cover = CoverTagging::new(CoverMask::STATEMENT | CoverMask::TOGGLE, 0);
        cover.push_scope(Ident::new(":TOP"));
        cover.add_tag(TagKind::Statement, None, Loc::point(FileRef::intern("top.vhd"), 4, 2));
        cover.tag_toggles(Ident::new("CLK"), ToggleShape::Scalar, Loc::INVALID);
        cover.pop_scope();
        cover
    }

    #[test]
    fn dumped_databases_merge_their_results() {
        let mut first = toggled_design();
        first.apply_counts(&[2, bins::RISE]).unwrap();
        let mut second = toggled_design();
        second.apply_counts(&[3, bins::FALL]).unwrap();

        let mut merged = CoverTagging::read(&first.dump().unwrap()).unwrap();
        let loaded = CoverTagging::read(&second.dump().unwrap()).unwrap();
        assert_eq!(merged.merge(&loaded).unwrap(), 2);

        let stmt = merged.find(":TOP:_S0").unwrap();
        assert_eq!(stmt.data, 5);
        assert_eq!(stmt.loc.first_line(), 4);
        assert_eq!(stmt.loc.file().name(), "top.vhd");
        assert!(merged.find(":TOP:CLK").unwrap().is_covered());
        assert_eq!(merged.summary(TagKind::Toggle), (1, 1));
        assert_eq!(merged.mask(), CoverMask::STATEMENT | CoverMask::TOGGLE);
    }

    #[test]
    fn merging_tags_of_another_kind_fails() {
        let mut ours = toggled_design();
        let mut theirs = CoverTagging::new(CoverMask::BRANCH, 0);
        theirs.push_scope(Ident::new(":TOP"));
        theirs.add_tag(TagKind::Branch, Some(Ident::new("CLK")), Loc::INVALID);
        theirs.pop_scope();

        let err = ours.merge(&theirs).unwrap_err();
        assert!(matches!(
            err,
            CoverError::KindMismatch {
                expected: TagKind::Toggle,
                found: TagKind::Branch,
                ..
            }
        ));
    }

    #[test]
    fn foreign_bytes_and_short_counters_are_rejected() {
        assert!(matches!(CoverTagging::read(b"HDLA\x01\0\0\0"), Err(CoverError::BadMagic)));
        let mut bytes = toggled_design().dump().unwrap();
        bytes[4] = 9;
        assert!(matches!(
            CoverTagging::read(&bytes),
            Err(CoverError::VersionMismatch { found: 9, .. })
        ));
        assert!(matches!(
            toggled_design().apply_counts(&[1]),
            Err(CoverError::CountMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn excluded_tags_count_as_covered() {
        let mut cover = toggled_design();
        let text = "# generated\nexclude :top:clk*\n\nexclude :TOP:NOTHING\n";
        assert_eq!(cover.exclude(text).unwrap(), 1);
        assert_eq!(cover.summary(TagKind::Toggle), (1, 1));
        assert_eq!(cover.summary(TagKind::Statement), (0, 1));

        let err = cover.exclude("include :TOP:*").unwrap_err();
        assert!(matches!(err, CoverError::ExcludeSyntax { line: 1, .. }));
    }
}
