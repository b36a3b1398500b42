// tests/common/mod.rs
//! Shared helpers for the integration tests: design builders and an
//! expected-errors harness.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};

use hdlc::{Compilation, Options, Session};
use hdlc_identity::Loc;
use hdlc_object::builder::{TreeBuilder, build_unit};
use hdlc_object::{Direction, ObjectArena, PortMode, Tree};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Route `tracing` output to the test writer when `HDLC_LOG` is set.
pub fn init_tracing() {
    TRACING.call_once(|| {
        if let Ok(filter) = EnvFilter::try_from_env("HDLC_LOG") {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_test_writer()
                .try_init();
        }
    });
}

pub fn unit(file: &str, f: impl FnOnce(&mut TreeBuilder<'_>) -> Tree) -> ObjectArena {
    build_unit(file, f)
}

/// Analyse `units` in order into a fresh compilation. Panics on the first
/// unit that fails, showing its diagnostics.
pub fn compile(options: Options, units: Vec<ObjectArena>) -> Compilation {
    init_tracing();
    let mut comp = Compilation::new(options);
    for arena in units {
        let root = comp.add(arena).expect("unit has a root");
        if let Err(err) = comp.analyse(root) {
            panic!("{err}: {:#?}", comp.session.diagnostics());
        }
    }
    comp
}

pub fn empty_entity(name: &'static str) -> ObjectArena {
    unit("design.vhd", move |b| b.entity(name, vec![], vec![], vec![], vec![]))
}

pub fn empty_architecture(entity: &'static str) -> ObjectArena {
    unit("design.vhd", move |b| b.architecture("rtl", entity, vec![], vec![]))
}

/// `entity reg is generic (WIDTH : positive := 1); port (d : in
/// bit_vector(WIDTH - 1 downto 0); q : out bit_vector(WIDTH - 1 downto 0))`
/// with an architecture holding `constant BITS : natural := WIDTH` and a
/// `state` signal of the port type.
pub fn register_units() -> Vec<ObjectArena> {
    let entity = unit("reg.vhd", |b| {
        let gm = b.mark("positive");
        let one = b.int(1);
        let width = b.generic("width", gm, Some(one));
        let d = port_vector(b, "d", PortMode::In);
        let q = port_vector(b, "q", PortMode::Out);
        b.entity("reg", vec![width], vec![d, q], vec![], vec![])
    });
    let arch = unit("reg.vhd", |b| {
        let bm = b.mark("natural");
        let w = b.name("width");
        let bits = b.constant("bits", bm, Some(w));
        let sm = vector_mark(b);
        let state = b.signal("state", sm, None);
        b.architecture("rtl", "reg", vec![bits, state], vec![])
    });
    vec![entity, arch]
}

fn vector_mark(b: &mut TreeBuilder<'_>) -> Tree {
    let (w, one) = (b.name("width"), b.int(1));
    let high = b.binary("-", w, one);
    let zero = b.int(0);
    let range = b.range(high, Direction::Downto, zero);
    b.constrained("bit_vector", &[range])
}

fn port_vector(b: &mut TreeBuilder<'_>, name: &str, mode: PortMode) -> Tree {
    let mark = vector_mark(b);
    b.port(name, mode, mark, None)
}

/// Expected `(line, snippet)` errors, consumed in order by the session's
/// error handler.
pub struct ExpectedErrors {
    pending: Arc<Mutex<VecDeque<(u32, &'static str)>>>,
    failures: Arc<Mutex<Vec<String>>>,
    seen: Arc<Mutex<u32>>,
}

impl ExpectedErrors {
    pub fn install(session: &mut Session, expected: &[(u32, &'static str)]) -> ExpectedErrors {
        let harness = ExpectedErrors {
            pending: Arc::new(Mutex::new(expected.iter().copied().collect())),
            failures: Arc::default(),
            seen: Arc::default(),
        };
        let (pending, failures, seen) = (
            Arc::clone(&harness.pending),
            Arc::clone(&harness.failures),
            Arc::clone(&harness.seen),
        );
        session.set_error_fn(Some(Box::new(move |message: &str, loc: Loc| {
            *seen.lock().unwrap() += 1;
            let next = pending.lock().unwrap().pop_front();
            let failure = match next {
                None => Some(format!("unexpected error at line {}: {message}", loc.first_line())),
                Some((line, snippet)) if line != loc.first_line() || !message.contains(snippet) => {
                    Some(format!(
                        "expected '{snippet}' at line {line}, got '{message}' at line {}",
                        loc.first_line()
                    ))
                }
                Some(_) => None,
            };
            if let Some(failure) = failure {
                failures.lock().unwrap().push(failure);
            }
        })));
        harness
    }

    /// Every expected error arrived in order and the session count agrees
    /// with the handler invocations.
    pub fn check(&self, session: &Session) {
        let failures = self.failures.lock().unwrap();
        assert!(failures.is_empty(), "{failures:#?}");
        let pending = self.pending.lock().unwrap();
        assert!(pending.is_empty(), "missing errors: {pending:?}");
        assert_eq!(session.error_count(), *self.seen.lock().unwrap());
    }
}
