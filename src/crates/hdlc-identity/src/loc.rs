// loc.rs
//
// Packed source locations and the process-wide file-name table.

use std::fmt;
use std::sync::LazyLock;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Reference into the interned file-name table.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileRef(u16);

struct FileTable {
    names: Vec<&'static str>,
    lookup: FxHashMap<&'static str, FileRef>,
}

static FILES: LazyLock<RwLock<FileTable>> = LazyLock::new(|| {
    RwLock::new(FileTable {
        names: Vec::new(),
        lookup: FxHashMap::default(),
    })
});

impl FileRef {
    /// No file (synthesised objects, invalid locations).
    pub const INVALID: FileRef = FileRef(u16::MAX);

    /// Intern a file name. Saturates to [`FileRef::INVALID`] once the table
    /// holds `u16::MAX - 1` entries.
    pub fn intern(name: &str) -> FileRef {
        if let Some(file) = FILES.read().lookup.get(name) {
            return *file;
        }
        let mut files = FILES.write();
        if let Some(file) = files.lookup.get(name) {
            return *file;
        }
        if files.names.len() >= (u16::MAX - 1) as usize {
            return FileRef::INVALID;
        }
        let file = FileRef(files.names.len() as u16);
        let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
        files.names.push(leaked);
        files.lookup.insert(leaked, file);
        file
    }

    pub fn name(self) -> &'static str {
        if self == FileRef::INVALID {
            return "";
        }
        FILES.read().names[self.0 as usize]
    }

    pub fn is_invalid(self) -> bool {
        self == FileRef::INVALID
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn from_raw(raw: u16) -> FileRef {
        FileRef(raw)
    }
}

impl fmt::Debug for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            f.write_str("FileRef(<invalid>)")
        } else {
            write!(f, "FileRef({:?})", self.name())
        }
    }
}

const LINE_BITS: u32 = 20;
const COLUMN_BITS: u32 = 12;
const DELTA_BITS: u32 = 8;

const LINE_INVALID: u32 = (1 << LINE_BITS) - 1;
const COLUMN_INVALID: u32 = (1 << COLUMN_BITS) - 1;
const DELTA_INVALID: u32 = (1 << DELTA_BITS) - 1;

const COLUMN_SHIFT: u32 = LINE_BITS;
const LINE_DELTA_SHIFT: u32 = COLUMN_SHIFT + COLUMN_BITS;
const COLUMN_DELTA_SHIFT: u32 = LINE_DELTA_SHIFT + DELTA_BITS;
const FILE_SHIFT: u32 = COLUMN_DELTA_SHIFT + DELTA_BITS;

/// Source location packed into 64 bits:
/// `first_line:20 first_column:12 line_delta:8 column_delta:8 file:16`.
///
/// Values that do not fit saturate to the field's invalid marker, so a very
/// long line or a huge span degrades to "unknown end" rather than wrapping.
///
/// The file field is a process-local table index; serialized images remap it
/// through their own file table (see [`Loc::with_file`]).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Loc(u64);

impl Loc {
    pub const INVALID: Loc = Loc(u64::MAX);

    pub fn new(
        file: FileRef,
        first_line: u32,
        first_column: u32,
        last_line: u32,
        last_column: u32,
    ) -> Loc {
        let line = first_line.min(LINE_INVALID);
        let column = first_column.min(COLUMN_INVALID);

        let line_delta = if last_line >= first_line && line != LINE_INVALID {
            (last_line - first_line).min(DELTA_INVALID)
        } else {
            DELTA_INVALID
        };
        let column_delta = if last_column >= first_column && column != COLUMN_INVALID {
            (last_column - first_column).min(DELTA_INVALID)
        } else {
            DELTA_INVALID
        };

        Loc(line as u64
            | (column as u64) << COLUMN_SHIFT
            | (line_delta as u64) << LINE_DELTA_SHIFT
            | (column_delta as u64) << COLUMN_DELTA_SHIFT
            | (file.0 as u64) << FILE_SHIFT)
    }

    /// A single-point location.
    pub fn point(file: FileRef, line: u32, column: u32) -> Loc {
        Loc::new(file, line, column, line, column)
    }

    pub fn from_raw(raw: u64) -> Loc {
        Loc(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    /// Same range, different file.
    pub fn with_file(self, file: FileRef) -> Loc {
        let mask = !((u16::MAX as u64) << FILE_SHIFT);
        Loc((self.0 & mask) | (file.0 as u64) << FILE_SHIFT)
    }

    pub fn file(self) -> FileRef {
        FileRef((self.0 >> FILE_SHIFT) as u16)
    }

    pub fn first_line(self) -> u32 {
        (self.0 as u32) & LINE_INVALID
    }

    pub fn first_column(self) -> u32 {
        ((self.0 >> COLUMN_SHIFT) as u32) & COLUMN_INVALID
    }

    fn line_delta(self) -> u32 {
        ((self.0 >> LINE_DELTA_SHIFT) as u32) & DELTA_INVALID
    }

    fn column_delta(self) -> u32 {
        ((self.0 >> COLUMN_DELTA_SHIFT) as u32) & DELTA_INVALID
    }

    /// Last line of the range, `None` when it was not representable.
    pub fn last_line(self) -> Option<u32> {
        match self.line_delta() {
            DELTA_INVALID => None,
            delta => Some(self.first_line() + delta),
        }
    }

    pub fn last_column(self) -> Option<u32> {
        match self.column_delta() {
            DELTA_INVALID => None,
            delta => Some(self.first_column() + delta),
        }
    }

    pub fn is_invalid(self) -> bool {
        self.first_line() == LINE_INVALID || self.file().is_invalid()
    }

    /// Span from the start of `self` to the end of `other` (same file).
    pub fn merge(self, other: Loc) -> Loc {
        if self.is_invalid() {
            return other;
        }
        if other.is_invalid() || other.file() != self.file() {
            return self;
        }
        Loc::new(
            self.file(),
            self.first_line(),
            self.first_column(),
            other.last_line().unwrap_or(other.first_line()),
            other.last_column().unwrap_or(other.first_column()),
        )
    }
}

impl Default for Loc {
    fn default() -> Self {
        Loc::INVALID
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            return f.write_str("<unknown>");
        }
        write!(
            f,
            "{}:{}:{}",
            self.file().name(),
            self.first_line(),
            self.first_column()
        )
    }
}

impl fmt::Debug for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Loc({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks_fields() {
        let file = FileRef::intern("counter.vhd");
        let loc = Loc::new(file, 42, 7, 43, 19);
        assert_eq!(loc.file(), file);
        assert_eq!(loc.file().name(), "counter.vhd");
        assert_eq!(loc.first_line(), 42);
        assert_eq!(loc.first_column(), 7);
        assert_eq!(loc.last_line(), Some(43));
        assert_eq!(loc.last_column(), Some(19));
        assert_eq!(Loc::from_raw(loc.raw()), loc);
    }

    #[test]
    fn oversized_deltas_saturate() {
        let file = FileRef::intern("big.vhd");
        let loc = Loc::new(file, 1, 1, 1000, 1);
        assert_eq!(loc.first_line(), 1);
        assert_eq!(loc.last_line(), None);
        assert!(!loc.is_invalid());
    }

    #[test]
    fn invalid_loc_displays_unknown() {
        assert!(Loc::INVALID.is_invalid());
        assert_eq!(Loc::default(), Loc::INVALID);
        assert_eq!(Loc::INVALID.to_string(), "<unknown>");
    }

    #[test]
    fn file_interning_is_stable() {
        let a = FileRef::intern("a.vhd");
        let b = FileRef::intern("a.vhd");
        assert_eq!(a, b);
        let loc = Loc::point(a, 3, 4);
        assert_eq!(loc.to_string(), "a.vhd:3:4");
    }

    #[test]
    fn with_file_keeps_range() {
        let a = FileRef::intern("first.vhd");
        let b = FileRef::intern("second.vhd");
        let loc = Loc::new(a, 10, 2, 11, 8).with_file(b);
        assert_eq!(loc.file(), b);
        assert_eq!(loc.first_line(), 10);
        assert_eq!(loc.last_column(), Some(8));
    }

    #[test]
    fn merge_spans_both_locations() {
        let file = FileRef::intern("merge.vhd");
        let merged = Loc::point(file, 2, 5).merge(Loc::new(file, 2, 9, 2, 12));
        assert_eq!(merged.first_column(), 5);
        assert_eq!(merged.last_column(), Some(12));
    }
}
