// src/analysis.rs
//! Pass driver for one design unit.
//!
//! Checking, simplification and bounds checking run in that order. A pass
//! that reports an error stops the unit: later passes assume a clean tree.

use hdlc_codegen::Evaluator;
use hdlc_object::{LibraryStore, ObjectStore, Tree};
use smallvec::SmallVec;

use crate::bounds::bounds_check_unit;
use crate::check::check_unit;
use crate::session::Session;
use crate::simplify::{FoldingStats, simplify_unit};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pass {
    Check,
    Simplify,
    Bounds,
}

/// Outcome of analysing one unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Analysis {
    /// Passes that ran, in order.
    pub passes: SmallVec<[Pass; 3]>,
    /// Errors reported for the unit.
    pub errors: u32,
    pub folding: FoldingStats,
}

impl Analysis {
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }
}

/// Analyse `unit` in place.
#[tracing::instrument(skip(store, libs, session, evaluator))]
pub fn analyse_unit(
    store: &mut ObjectStore,
    libs: &LibraryStore,
    session: &mut Session,
    unit: Tree,
    evaluator: Option<&mut Evaluator>,
) -> Analysis {
    let before = session.error_count();
    let mut analysis = Analysis::default();
    let failed = |session: &Session| session.error_count() > before;

    analysis.passes.push(Pass::Check);
    check_unit(store, libs, session, unit);
    if !failed(session) {
        analysis.passes.push(Pass::Simplify);
        analysis.folding = simplify_unit(store, session, unit, evaluator);
    }
    if !failed(session) {
        analysis.passes.push(Pass::Bounds);
        bounds_check_unit(store, session, unit);
    }

    analysis.errors = session.error_count() - before;
    if let Some(&last) = analysis.passes.last()
        && analysis.errors > 0
    {
        tracing::debug!(pass = ?last, errors = analysis.errors, "later passes skipped");
    }
    analysis
}
