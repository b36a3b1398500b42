// library.rs
//! Design libraries.
//!
//! A [`Library`] maps unit names (`LIB.ENT`, `LIB.ENT-ARCH`, `LIB.PKG`,
//! `LIB.PKG-body`) to serialized arena images, either purely in memory or
//! backed by a directory with one file per unit. A [`LibraryStore`] holds the
//! search path plus the single mutable work library.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hdlc_identity::Ident;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::arena::{ArenaId, Tree};
use crate::errors::{LibraryError, LibraryResult, SerialError};
use crate::serialize;
use crate::store::ObjectStore;

/// Separator between a unit and its secondary unit (`ENT-ARCH`).
pub const SECONDARY_SEP: char = '-';

/// Dependency chains longer than this are treated as cycles.
const MAX_LOAD_DEPTH: usize = 64;

#[derive(Clone)]
struct LibUnit {
    blob: Arc<[u8]>,
    /// Insertion order; later analysis wins when picking a default
    /// architecture.
    serial: u64,
    dirty: bool,
}

#[derive(Default)]
struct Units {
    map: FxHashMap<Ident, LibUnit>,
    next_serial: u64,
}

pub struct Library {
    name: Ident,
    dir: Option<PathBuf>,
    units: RwLock<Units>,
}

impl Library {
    /// A library that lives only as long as the process.
    pub fn in_memory(name: Ident) -> Library {
        Library {
            name,
            dir: None,
            units: RwLock::new(Units::default()),
        }
    }

    /// Open (creating if needed) a directory-backed library and read its
    /// units. Images are validated lazily on load; unreadable ones are
    /// reported here and again on lookup.
    pub fn open(name: Ident, dir: impl AsRef<Path>) -> LibraryResult<Library> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| LibraryError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let library = Library {
            name,
            dir: Some(dir.clone()),
            units: RwLock::new(Units::default()),
        };

        let entries = fs::read_dir(&dir).map_err(|source| LibraryError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let mut found: Vec<(Ident, Vec<u8>, std::time::SystemTime)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| LibraryError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let bytes = fs::read(&path).map_err(|source| LibraryError::Io {
                path: path.display().to_string(),
                source,
            })?;
            if let Err(err) = serialize::peek(&bytes) {
                tracing::warn!(unit = file_name, error = %err, "unreadable library unit");
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            found.push((Ident::new(file_name), bytes, modified));
        }
        // Preserve analysis order across sessions as far as the file system
        // allows.
        found.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.as_str().cmp(b.0.as_str())));
        {
            let mut units = library.units.write();
            for (unit, bytes, _) in found {
                let serial = units.next_serial;
                units.next_serial += 1;
                units.map.insert(
                    unit,
                    LibUnit {
                        blob: bytes.into(),
                        serial,
                        dirty: false,
                    },
                );
            }
        }
        tracing::debug!(library = %name, units = library.len(), "opened library");
        Ok(library)
    }

    pub fn name(&self) -> Ident {
        self.name
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn len(&self) -> usize {
        self.units.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, unit: Ident) -> bool {
        self.units.read().map.contains_key(&unit)
    }

    pub fn blob(&self, unit: Ident) -> Option<Arc<[u8]>> {
        self.units.read().map.get(&unit).map(|u| Arc::clone(&u.blob))
    }

    /// Unit names in analysis order.
    pub fn units(&self) -> Vec<Ident> {
        let units = self.units.read();
        let mut names: Vec<(u64, Ident)> =
            units.map.iter().map(|(name, u)| (u.serial, *name)).collect();
        names.sort_unstable_by_key(|(serial, _)| *serial);
        names.into_iter().map(|(_, name)| name).collect()
    }

    /// Freeze the arena and store its image under the arena's name.
    pub fn put(&self, store: &mut ObjectStore, arena: ArenaId) -> LibraryResult<Ident> {
        let target = store
            .arena_mut(arena)
            .ok_or(SerialError::Arena(crate::errors::ArenaError::StaleArena { arena }))?;
        let name = target.name().ok_or(LibraryError::Unnamed { arena })?;
        target.freeze();
        let bytes = serialize::serialize(store, arena)?;
        self.put_blob(name, bytes);
        Ok(name)
    }

    /// Store an already serialized image.
    pub fn put_blob(&self, unit: Ident, bytes: Vec<u8>) {
        let mut units = self.units.write();
        let serial = units.next_serial;
        units.next_serial += 1;
        units.map.insert(
            unit,
            LibUnit {
                blob: bytes.into(),
                serial,
                dirty: true,
            },
        );
        tracing::debug!(library = %self.name, %unit, "stored unit");
    }

    /// Deserialize a unit into `store`. Dependencies must already be loaded;
    /// see [`LibraryStore::get_unit`] for the recursive variant.
    pub fn load(&self, store: &mut ObjectStore, unit: Ident) -> LibraryResult<ArenaId> {
        let blob = self.blob(unit).ok_or(LibraryError::UnitNotFound {
            library: self.name,
            unit,
        })?;
        serialize::deserialize(store, &blob).map_err(|source| LibraryError::Load {
            library: self.name,
            unit,
            source,
        })
    }

    /// Write units added since the last save. No-op for in-memory libraries.
    pub fn save(&self) -> LibraryResult<usize> {
        let Some(dir) = &self.dir else {
            return Ok(0);
        };
        let mut units = self.units.write();
        let mut written = 0;
        for (name, unit) in units.map.iter_mut().filter(|(_, u)| u.dirty) {
            let path = dir.join(name.as_str());
            fs::write(&path, &unit.blob).map_err(|source| LibraryError::Io {
                path: path.display().to_string(),
                source,
            })?;
            unit.dirty = false;
            written += 1;
        }
        tracing::debug!(library = %self.name, written, "saved library");
        Ok(written)
    }

    /// Architectures of `entity` (`LIB.ENT`), most recently analysed last.
    pub fn architectures_of(&self, entity: Ident) -> Vec<Ident> {
        let prefix = format!("{}{}", entity.as_str(), SECONDARY_SEP);
        self.units()
            .into_iter()
            .filter(|unit| {
                unit.as_str().starts_with(&prefix)
                    && !unit.as_str()[prefix.len()..].eq_ignore_ascii_case("body")
            })
            .collect()
    }
}

/// The set of libraries visible to a session.
#[derive(Default)]
pub struct LibraryStore {
    search: Vec<Arc<Library>>,
    work: Option<Arc<Library>>,
    writer: Mutex<()>,
}

impl LibraryStore {
    pub fn new() -> LibraryStore {
        LibraryStore::default()
    }

    pub fn add_search_path(&mut self, library: Library) {
        self.search.push(Arc::new(library));
    }

    pub fn set_work(&mut self, library: Library) {
        self.work = Some(Arc::new(library));
    }

    pub fn work(&self) -> Option<&Library> {
        self.work.as_deref()
    }

    /// Library by name. `WORK` always means the work library.
    pub fn find(&self, name: Ident) -> Option<&Library> {
        if let Some(work) = &self.work
            && (work.name() == name || name.as_str().eq_ignore_ascii_case("WORK"))
        {
            return Some(work);
        }
        self.search
            .iter()
            .find(|lib| lib.name() == name)
            .map(|lib| &**lib)
    }

    /// Rewrite a `WORK.`-prefixed unit name to use the work library's name.
    pub fn canonical(&self, qualified: Ident) -> Ident {
        match (&self.work, qualified.as_str().split_once('.')) {
            (Some(work), Some((lib, rest))) if lib.eq_ignore_ascii_case("WORK") => {
                Ident::compose(work.name(), '.', rest)
            }
            _ => qualified,
        }
    }

    /// Library holding the qualified unit `LIB.UNIT`.
    pub fn lookup(&self, qualified: Ident) -> Option<&Library> {
        let qualified = self.canonical(qualified);
        let lib = self.find(qualified.until('.'))?;
        lib.contains(qualified).then_some(lib)
    }

    /// Store a unit in the work library. Writers are serialized.
    pub fn put_work(&self, store: &mut ObjectStore, arena: ArenaId) -> LibraryResult<Ident> {
        let work = self.work.as_ref().ok_or(LibraryError::NoWork)?;
        let _guard = self.writer.lock();
        work.put(store, arena)
    }

    pub fn put_work_blob(&self, unit: Ident, bytes: Vec<u8>) -> LibraryResult<()> {
        let work = self.work.as_ref().ok_or(LibraryError::NoWork)?;
        let _guard = self.writer.lock();
        work.put_blob(unit, bytes);
        Ok(())
    }

    /// Root of a unit, loading it and everything it depends on into `store`
    /// if needed. `Ok(None)` when no library has it.
    pub fn get_unit(&self, store: &mut ObjectStore, qualified: Ident) -> LibraryResult<Option<Tree>> {
        self.get_unit_at_depth(store, self.canonical(qualified), 0)
    }

    fn get_unit_at_depth(
        &self,
        store: &mut ObjectStore,
        unit: Ident,
        depth: usize,
    ) -> LibraryResult<Option<Tree>> {
        if let Some(root) = store.unit(unit) {
            return Ok(Some(root));
        }
        let Some(lib) = self.lookup(unit) else {
            return Ok(None);
        };
        let Some(blob) = lib.blob(unit) else {
            return Ok(None);
        };
        let head = serialize::peek(&blob).map_err(|source| LibraryError::Load {
            library: lib.name(),
            unit,
            source,
        })?;
        for (dep, _) in &head.deps {
            if store.find(*dep).is_some() {
                continue;
            }
            if depth >= MAX_LOAD_DEPTH {
                return Err(LibraryError::Load {
                    library: lib.name(),
                    unit,
                    source: SerialError::MissingDependency { name: *dep },
                });
            }
            if self.get_unit_at_depth(store, *dep, depth + 1)?.is_none() {
                return Err(LibraryError::Load {
                    library: lib.name(),
                    unit,
                    source: SerialError::MissingDependency { name: *dep },
                });
            }
        }
        let id = lib.load(store, unit)?;
        tracing::debug!(%unit, arena = ?id, "loaded unit from library");
        Ok(store.arena(id).and_then(|a| a.root()))
    }

    /// Architectures of a qualified entity name across the visible libraries.
    pub fn architectures_of(&self, entity: Ident) -> Vec<Ident> {
        let entity = self.canonical(entity);
        match self.find(entity.until('.')) {
            Some(lib) => lib.architectures_of(entity),
            None => Vec::new(),
        }
    }
}
