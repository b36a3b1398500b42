// src/pipeline.rs
//! Compilation pipeline: analyse units in order, persist them to the work
//! library, lower packages for the evaluator and elaborate the top level.

use hdlc_codegen::{CodegenError, Evaluator, lower_unit};
use hdlc_identity::Ident;
use hdlc_object::{
    LibraryError, LibraryStore, ObjectArena, ObjectStore, SerialError, Tree, TreeKind,
    serialize,
};
use hdlc_sema::{Analysis, Diagnostic, Options, Session, Standard, analyse_unit};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::elab::{ElabError, ElabGraph, Elaborator};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{unit}: analysis failed with {errors} error(s)")]
    Analysis { unit: String, errors: u32 },

    #[error("unit arena has no root tree")]
    EmptyUnit,

    #[error("no entity to elaborate")]
    NoTopLevel,

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error(transparent)]
    Serial(#[from] SerialError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Elab(#[from] ElabError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Everything one compilation works on: the loaded units, the libraries,
/// the diagnostic session and the compile-time evaluator.
pub struct Compilation {
    pub store: ObjectStore,
    pub libs: LibraryStore,
    pub session: Session,
    pub evaluator: Evaluator,
    last_entity: Option<Tree>,
}

impl Compilation {
    /// A compilation with an in-memory work library named `WORK`.
    pub fn new(options: Options) -> Compilation {
        let mut libs = LibraryStore::new();
        libs.set_work(hdlc_object::Library::in_memory(Ident::new("WORK")));
        Compilation::with_libraries(options, libs)
    }

    pub fn with_libraries(options: Options, libs: LibraryStore) -> Compilation {
        // Library images depend on the standard package being loaded.
        let mut store = ObjectStore::new();
        Standard::install(&mut store);
        Compilation {
            store,
            libs,
            session: Session::new(options),
            evaluator: Evaluator::new(options.eval_options()),
            last_entity: None,
        }
    }

    pub fn from_config(config: &Config) -> PipelineResult<Compilation> {
        let options = config.analysis_options()?;
        let libs = config.library_store()?;
        Ok(Compilation::with_libraries(options, libs))
    }

    pub fn options(&self) -> Options {
        self.session.options()
    }

    /// Load a parsed unit into the object store.
    pub fn add(&mut self, arena: ObjectArena) -> PipelineResult<Tree> {
        let root = arena.root().ok_or(PipelineError::EmptyUnit)?;
        self.store.insert(arena);
        Ok(root)
    }

    /// Run the analysis passes over `root`. A clean unit is stored in the work
    /// library and, for packages, registered with the evaluator.
    pub fn analyse(&mut self, root: Tree) -> PipelineResult<Analysis> {
        let analysis = analyse_unit(
            &mut self.store,
            &self.libs,
            &mut self.session,
            root,
            Some(&mut self.evaluator),
        );
        let name = self.store.arena(root.arena()).and_then(ObjectArena::name);
        if !analysis.is_ok() {
            let unit = name.map_or_else(|| String::from("<unnamed>"), |n| n.to_string());
            return Err(PipelineError::Analysis {
                unit,
                errors: analysis.errors,
            });
        }

        let kind = self.store.tree(root).kind;
        if matches!(kind, TreeKind::Package | TreeKind::PackageBody) {
            let lowered = lower_unit(&self.store, root)?;
            tracing::debug!(unit = ?name, functions = lowered.functions.len(), "unit lowered");
            self.evaluator.register(lowered);
        }
        let stored = self.libs.put_work(&mut self.store, root.arena())?;
        if kind == TreeKind::Entity {
            self.last_entity = Some(root);
        }
        tracing::debug!(unit = %stored, passes = analysis.passes.len(), "unit analysed");
        Ok(analysis)
    }

    /// Most recently analysed entity.
    pub fn last_entity(&self) -> Option<Tree> {
        self.last_entity
    }

    /// Analyse `units` in order and elaborate the last entity among them.
    pub fn run_elab(&mut self, units: Vec<ObjectArena>) -> PipelineResult<ElabGraph> {
        for arena in units {
            let root = self.add(arena)?;
            self.analyse(root)?;
        }
        let top = self.last_entity.ok_or(PipelineError::NoTopLevel)?;
        self.elaborate(top)
    }

    pub fn elaborate(&mut self, top: Tree) -> PipelineResult<ElabGraph> {
        Ok(Elaborator::new(self).elaborate(top)?)
    }

    /// Store the images of cleanly analysed units in the work library.
    /// Returns how many were stored.
    pub fn absorb(&self, reports: &[UnitReport]) -> PipelineResult<usize> {
        let mut stored = 0;
        for report in reports {
            if let (Some(name), Some(image)) = (report.name, &report.image) {
                self.libs.put_work_blob(name, image.clone())?;
                stored += 1;
            }
        }
        Ok(stored)
    }
}

/// Result of analysing one unit on a worker thread.
#[derive(Debug)]
pub struct UnitReport {
    pub name: Option<Ident>,
    pub analysis: Analysis,
    pub diagnostics: Vec<Diagnostic>,
    /// Serialized image of the analysed unit; absent when analysis failed.
    pub image: Option<Vec<u8>>,
}

impl UnitReport {
    pub fn is_ok(&self) -> bool {
        self.analysis.is_ok() && self.image.is_some()
    }
}

/// Analyse independent units in parallel. Each worker has its own object
/// store and session; units see `libs` read-only. Reports come back in input
/// order.
pub fn analyse_parallel(
    units: Vec<ObjectArena>,
    options: Options,
    libs: &LibraryStore,
) -> Vec<UnitReport> {
    units
        .into_par_iter()
        .map(|arena| analyse_isolated(arena, options, libs))
        .collect()
}

fn analyse_isolated(arena: ObjectArena, options: Options, libs: &LibraryStore) -> UnitReport {
    let mut store = ObjectStore::new();
    let mut session = Session::new(options);
    let root = arena.root();
    let id = store.insert(arena);
    let Some(root) = root else {
        return UnitReport {
            name: None,
            analysis: Analysis::default(),
            diagnostics: Vec::new(),
            image: None,
        };
    };

    let analysis = analyse_unit(&mut store, libs, &mut session, root, None);
    let name = store.arena(id).and_then(ObjectArena::name);
    let image = if analysis.is_ok() {
        if let Some(arena) = store.arena_mut(id) {
            arena.freeze();
        }
        match serialize::serialize(&store, id) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                tracing::warn!(unit = ?name, error = %err, "cannot serialize analysed unit");
                None
            }
        }
    } else {
        None
    };
    UnitReport {
        name,
        analysis,
        diagnostics: session.take_diagnostics(),
        image,
    }
}

#[cfg(test)]
mod tests {
    use hdlc_object::Literal;
    use hdlc_object::builder::build_unit;

    use super::*;

    fn package(name: &'static str, value: i64) -> ObjectArena {
        build_unit("pipeline.vhd", move |b| {
            let mark = b.mark("integer");
            let v = b.int(value);
            let c = b.constant("C", mark, Some(v));
            b.package(name, vec![c])
        })
    }

    #[test]
    fn analysed_units_land_in_the_work_library() {
        let mut comp = Compilation::new(Options::default());
        let root = comp.add(package("p", 1)).unwrap();
        comp.analyse(root).unwrap();
        let work = comp.libs.work().unwrap();
        assert!(work.contains(Ident::new("WORK.P")));
        assert!(comp.store.arena(root.arena()).unwrap().is_frozen());
    }

    #[test]
    fn failed_analysis_is_not_stored() {
        let mut comp = Compilation::new(Options::default());
        let root = comp
            .add(build_unit("bad.vhd", |b| {
                let mark = b.mark("integer");
                let v = b.name("undefined");
                let c = b.constant("C", mark, Some(v));
                b.package("bad", vec![c])
            }))
            .unwrap();
        let err = comp.analyse(root).unwrap_err();
        assert!(matches!(err, PipelineError::Analysis { errors: 1, .. }));
        assert!(!comp.libs.work().unwrap().contains(Ident::new("WORK.BAD")));
    }

    #[test]
    fn package_functions_fold_in_later_units() {
        let mut comp = Compilation::new(Options::default());
        let pkg = build_unit("funcs.vhd", |b| {
            let pm = b.mark("integer");
            let x = b.param("x", pm);
            let rm = b.mark("integer");
            let f = b.function_decl("triple", vec![x], rm);
            b.package("funcs", vec![f])
        });
        let body = build_unit("funcs.vhd", |b| {
            let pm = b.mark("integer");
            let x = b.param("x", pm);
            let rm = b.mark("integer");
            let xr = b.name("x");
            let three = b.int(3);
            let prod = b.binary("*", xr, three);
            let ret = b.ret(Some(prod));
            let f = b.function("triple", vec![x], rm, vec![], vec![ret]);
            b.package_body("funcs", vec![f])
        });
        let user = build_unit("user.vhd", |b| {
            let mark = b.mark("integer");
            let arg = b.int(14);
            let call = b.call("triple", &[arg]);
            let c = b.constant("K", mark, Some(call));
            let p = b.package("user", vec![c]);
            b.use_all(p, "work.funcs")
        });
        let roots: Vec<Tree> = [pkg, body, user]
            .into_iter()
            .map(|a| comp.add(a).unwrap())
            .collect();
        comp.analyse(roots[0]).unwrap();
        comp.analyse(roots[1]).unwrap();
        assert!(comp.libs.work().unwrap().contains(Ident::new("WORK.FUNCS-body")));
        let analysis = comp.analyse(roots[2]).unwrap();
        assert_eq!(analysis.folding.calls_evaluated, 1);

        let c = comp.store.tree(roots[2]).decls[0];
        let value = comp.store.tree(c).value.unwrap();
        assert_eq!(comp.store.tree(value).literal, Some(Literal::Int(42)));
    }

    #[test]
    fn run_elab_without_an_entity_fails() {
        let mut comp = Compilation::new(Options::default());
        let err = comp.run_elab(vec![package("p", 1)]).unwrap_err();
        assert!(matches!(err, PipelineError::NoTopLevel));
    }

    #[test]
    fn parallel_reports_follow_input_order() {
        let libs = {
            let mut libs = LibraryStore::new();
            libs.set_work(hdlc_object::Library::in_memory(Ident::new("WORK")));
            libs
        };
        let bad = build_unit("bad.vhd", |b| {
            let mark = b.mark("integer");
            let v = b.name("nowhere");
            let c = b.constant("C", mark, Some(v));
            b.package("q", vec![c])
        });
        let units = vec![package("a", 1), bad, package("b", 2)];
        let reports = analyse_parallel(units, Options::default(), &libs);

        let names: Vec<_> = reports.iter().map(|r| r.name.map(|n| n.to_string())).collect();
        assert_eq!(
            names,
            [Some("WORK.A".into()), Some("WORK.Q".into()), Some("WORK.B".into())]
        );
        assert!(reports[0].is_ok());
        assert!(!reports[1].is_ok());
        assert_eq!(reports[1].diagnostics.len(), 1);
        assert!(reports[2].is_ok());
    }
}
