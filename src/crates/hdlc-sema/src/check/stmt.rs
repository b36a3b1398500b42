// src/check/stmt.rs
//
// Concurrent and sequential statements, instances and their association
// lists - impl Checker methods.

use hdlc_identity::{Ident, Loc};
use hdlc_object::{AssocKind, Class, PortMode, Tree, TreeKind, Type, library::SECONDARY_SEP};

use super::{Checker, Place, ProcessState};
use crate::errors::{SemanticError, SemanticWarning};
use crate::options::{RelaxRules, StandardRevision};

/// What an assignment target must denote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TargetKind {
    Variable,
    Signal,
}

impl TargetKind {
    fn describe(self) -> &'static str {
        match self {
            TargetKind::Variable => "variable assignment",
            TargetKind::Signal => "signal assignment",
        }
    }
}

fn mode_name(mode: PortMode) -> &'static str {
    match mode {
        PortMode::In => "in",
        PortMode::Out => "out",
        PortMode::InOut => "inout",
        PortMode::Buffer => "buffer",
    }
}

impl Checker<'_> {
    // Concurrent statements

    pub(super) fn concurrent(&mut self, owner: Tree) {
        let stmts = self.store.tree(owner).stmts.clone();
        for stmt in stmts {
            if self.stop() {
                return;
            }
            let node = self.store.tree(stmt);
            let (kind, target, value, loc) = (node.kind, node.target, node.value, node.loc);
            match kind {
                TreeKind::Process => self.process(stmt),
                TreeKind::Instance if self.place == Place::Architecture => self.instance(stmt),
                TreeKind::CondAssign => {
                    if let (Some(target), Some(value)) = (target, value) {
                        let ty = self.target(target, TargetKind::Signal);
                        self.check_expr(value, ty);
                    }
                }
                _ => {
                    let error = SemanticError::StatementNotAllowed {
                        what: statement_name(kind),
                        place: self.place.describe(),
                    };
                    self.error(error, loc);
                }
            }
        }
    }

    fn process(&mut self, process: Tree) {
        let node = self.store.tree(process);
        let (label, triggers, stmts, loc) = (node.ident, node.triggers.clone(), node.stmts.clone(), node.loc);
        for &trigger in &triggers {
            self.sensitivity(trigger);
        }

        let prefix = match label {
            Some(label) => Ident::prefix(self.prefix, label, '.'),
            None => self.prefix,
        };
        let saved = (self.place, self.prefix, self.process);
        self.place = Place::Process;
        self.prefix = prefix;
        self.process = Some(ProcessState {
            sensitive: !triggers.is_empty(),
            waits: false,
        });
        self.scope.push();
        self.decls(process);
        self.sequential(&stmts);
        self.scope.pop();

        if let Some(state) = self.process
            && !state.sensitive
            && !state.waits
        {
            let name = label.map_or_else(|| String::from("<anonymous>"), |l| l.to_string());
            self.session.warning(SemanticWarning::ProcessNeverWaits { name }, loc);
        }
        (self.place, self.prefix, self.process) = saved;
    }

    /// A name in a sensitivity list or `wait on` clause: must be a signal.
    fn sensitivity(&mut self, trigger: Tree) {
        self.expr(trigger, None);
        let is_signal = self.root_decl(trigger).is_some_and(|d| {
            let n = self.store.tree(d);
            matches!(n.kind, TreeKind::SignalDecl | TreeKind::PortDecl)
                || (n.kind == TreeKind::ParamDecl && n.class == Some(Class::Signal))
        });
        let resolved = self.store.tree(trigger).ty.is_some_and(|ty| !self.is_error(ty));
        if resolved && !is_signal {
            let error = SemanticError::NotASignal {
                name: self.describe_name(trigger),
            };
            let loc = self.loc(trigger);
            self.error(error, loc);
        }
    }

    // Sequential statements

    pub(super) fn sequential(&mut self, stmts: &[Tree]) {
        for &stmt in stmts {
            if self.stop() {
                return;
            }
            self.statement(stmt);
        }
    }

    fn statement(&mut self, stmt: Tree) {
        let node = self.store.tree(stmt);
        let kind = node.kind;
        let loc = node.loc;
        let (target, value) = (node.target, node.value);
        match kind {
            TreeKind::VarAssign => {
                if let (Some(target), Some(value)) = (target, value) {
                    let ty = self.target(target, TargetKind::Variable);
                    self.check_expr(value, ty);
                }
            }
            TreeKind::SignalAssign => {
                if self.place == Place::Subprogram {
                    let error = SemanticError::StatementNotAllowed {
                        what: "signal assignment",
                        place: self.place.describe(),
                    };
                    self.error(error, loc);
                }
                if let (Some(target), Some(value)) = (target, value) {
                    let ty = self.target(target, TargetKind::Signal);
                    self.check_expr(value, ty);
                }
            }
            TreeKind::If => {
                let (then, otherwise) = (node.stmts.clone(), node.else_stmts.clone());
                if let Some(cond) = value {
                    self.condition(cond);
                }
                self.sequential(&then);
                self.sequential(&otherwise);
            }
            TreeKind::While => {
                let body = node.stmts.clone();
                if let Some(cond) = value {
                    self.condition(cond);
                }
                self.sequential(&body);
            }
            TreeKind::For => self.for_loop(stmt),
            TreeKind::Return => self.return_stmt(value, loc),
            TreeKind::Assert => {
                let (message, severity) = (node.message, node.severity);
                if let Some(cond) = value {
                    self.condition(cond);
                }
                if let Some(message) = message {
                    self.expr(message, None);
                }
                if let Some(severity) = severity {
                    let level = self.std.severity_level;
                    self.check_expr(severity, level);
                }
            }
            TreeKind::Wait => self.wait(stmt),
            TreeKind::Null => {}
            _ => {
                let error = SemanticError::StatementNotAllowed {
                    what: statement_name(kind),
                    place: self.place.describe(),
                };
                self.error(error, loc);
            }
        }
    }

    fn for_loop(&mut self, stmt: Tree) {
        let node = self.store.tree(stmt);
        let (range, param, body) = (node.ranges.first().copied(), node.decls.first().copied(), node.stmts.clone());
        let (Some(range), Some(param)) = (range, param) else {
            return;
        };
        self.scope.push();
        let ty = self.discrete_range(range, None);
        let ty = if !self.is_error(ty) && self.store.static_range(range).is_some() {
            let base = self.store.base_type(ty);
            self.constrained(base, &[range])
        } else {
            ty
        };
        self.set_ty(param, ty);
        self.declare(param);
        self.sequential(&body);
        self.scope.pop();
    }

    fn return_stmt(&mut self, value: Option<Tree>, loc: Loc) {
        let Some(sub) = self.subprogram else {
            self.error(SemanticError::ReturnOutsideSubprogram, loc);
            if let Some(value) = value {
                self.expr(value, None);
            }
            return;
        };
        match value {
            Some(value) => {
                self.check_expr(value, sub.result);
            }
            None => {
                let error = SemanticError::ReturnWithoutValue {
                    function: sub.name.to_string(),
                };
                self.error(error, loc);
            }
        }
    }

    fn wait(&mut self, stmt: Tree) {
        let node = self.store.tree(stmt);
        let (triggers, cond, loc) = (node.triggers.clone(), node.value, node.loc);
        if self.place == Place::Subprogram {
            self.error(SemanticError::WaitNotAllowed { context: "in a function" }, loc);
        }
        if let Some(state) = self.process.as_mut() {
            state.waits = true;
            if state.sensitive {
                let context = "in a process with a sensitivity list";
                self.error(SemanticError::WaitNotAllowed { context }, loc);
            }
        }
        for trigger in triggers {
            self.sensitivity(trigger);
        }
        if let Some(cond) = cond {
            self.condition(cond);
        }
    }

    /// Check an assignment target and return its type.
    fn target(&mut self, target: Tree, kind: TargetKind) -> Type {
        let saved = self.in_target;
        self.in_target = true;
        let ty = self.expr(target, None);
        self.in_target = saved;
        if self.is_error(ty) {
            return ty;
        }

        let loc = self.loc(target);
        let Some(decl) = self.root_decl(target) else {
            let error = SemanticError::InvalidTarget {
                kind: kind.describe(),
                name: self.describe_name(target),
            };
            self.error(error, loc);
            return self.error_ty;
        };
        let dnode = self.store.tree(decl);
        let (dkind, mode, class) = (dnode.kind, dnode.mode, dnode.class);
        let valid = match kind {
            TargetKind::Variable => {
                dkind == TreeKind::VarDecl
                    || (dkind == TreeKind::ParamDecl && class == Some(Class::Variable))
            }
            TargetKind::Signal => match dkind {
                TreeKind::SignalDecl => true,
                TreeKind::PortDecl if mode == Some(PortMode::In) => {
                    let name = self.describe_name(target);
                    self.error(SemanticError::AssignToInPort { name }, loc);
                    return ty;
                }
                TreeKind::PortDecl => true,
                TreeKind::ParamDecl => class == Some(Class::Signal),
                _ => false,
            },
        };
        if !valid {
            let error = SemanticError::InvalidTarget {
                kind: kind.describe(),
                name: self.describe_name(target),
            };
            self.error(error, loc);
        }
        ty
    }

    /// Simple name of the object at the root of a name, for diagnostics.
    fn describe_name(&self, tree: Tree) -> String {
        let mut tree = tree;
        loop {
            let node = self.store.tree(tree);
            match (node.kind, node.value) {
                (TreeKind::ArrayRef | TreeKind::RecordRef, Some(prefix)) => tree = prefix,
                _ => {
                    return node
                        .ident
                        .map_or_else(|| format!("{:?}", node.kind), |i| i.to_string());
                }
            }
        }
    }

    // Component instances

    fn instance(&mut self, inst: Tree) {
        let node = self.store.tree(inst);
        let (entity, arch, genmaps, portmaps, loc) = (
            node.ident2,
            node.ident3,
            node.genmaps.clone(),
            node.portmaps.clone(),
            node.loc,
        );
        let Some(entity) = entity else { return };
        let qualified = self.qualify(entity);
        let Some(root) = self.load_unit(qualified, loc) else {
            return;
        };
        if self.store.tree(root).kind != TreeKind::Entity {
            let error = SemanticError::NotAnEntity {
                name: qualified.to_string(),
            };
            self.error(error, loc);
            return;
        }
        if let Some(arch) = arch {
            let unit = Ident::prefix(self.libs.canonical(qualified), arch, SECONDARY_SEP);
            let known = self.store.unit(unit).is_some() || self.libs.lookup(unit).is_some();
            if !known {
                let error = SemanticError::ArchitectureNotFound {
                    entity: qualified.to_string(),
                    arch: arch.to_string(),
                };
                self.error(error, loc);
            }
        }
        self.store.tree_mut(inst).reference = Some(root);

        let enode = self.store.tree(root);
        let (generics, ports) = (enode.generics.clone(), enode.ports.clone());
        let unit = qualified.to_string();

        let bound = self.associate(&unit, "generic", &generics, &genmaps, loc);
        for (formal, actual) in bound {
            let Some(value) = self.store.tree(actual).value else {
                continue;
            };
            let ty = self.decl_ty(formal);
            self.check_expr(value, ty);
        }

        let bound = self.associate(&unit, "port", &ports, &portmaps, loc);
        for (formal, actual) in bound {
            self.port_actual(formal, actual);
        }
    }

    /// Match an association list against formals. Matched actuals are
    /// rewritten as named associations; returns (formal, actual) pairs.
    fn associate(
        &mut self,
        unit: &str,
        what: &'static str,
        formals: &[Tree],
        actuals: &[Tree],
        loc: Loc,
    ) -> Vec<(Tree, Tree)> {
        let mut slots: Vec<Option<Tree>> = vec![None; formals.len()];
        let mut named = false;
        let mut next = 0;
        let mut extra = 0;

        for &actual in actuals {
            let node = self.store.tree(actual);
            let (kind, ident, aloc) = (node.assoc, node.ident, node.loc);
            let pos = match kind.unwrap_or(AssocKind::Positional) {
                AssocKind::Named => {
                    named = true;
                    let Some(name) = ident else { continue };
                    let found = formals
                        .iter()
                        .position(|&f| self.store.tree(f).ident == Some(name));
                    let Some(pos) = found else {
                        let error = SemanticError::NoSuchFormal {
                            unit: unit.to_string(),
                            what,
                            name: name.to_string(),
                        };
                        self.error(error, aloc);
                        continue;
                    };
                    pos
                }
                AssocKind::Positional | AssocKind::Others => {
                    if named {
                        self.error(SemanticError::PositionalAfterNamed, aloc);
                        continue;
                    }
                    next += 1;
                    if next > formals.len() {
                        extra += 1;
                        continue;
                    }
                    next - 1
                }
            };
            if slots[pos].is_some() {
                let error = SemanticError::DuplicateAssociation {
                    what,
                    name: self.store.tree(formals[pos]).name().to_string(),
                };
                self.error(error, aloc);
                continue;
            }
            slots[pos] = Some(actual);
        }

        if extra > 0 {
            let error = SemanticError::TooManyActuals {
                unit: unit.to_string(),
                expected: formals.len(),
                found: formals.len() + extra,
            };
            self.error(error, loc);
        }

        let mut bound = Vec::with_capacity(formals.len());
        for (&formal, slot) in formals.iter().zip(&slots) {
            let fnode = self.store.tree(formal);
            let (name, has_default, mode) = (fnode.name(), fnode.value.is_some(), fnode.mode);
            match slot {
                Some(actual) => {
                    let anode = self.store.tree_mut(*actual);
                    anode.assoc = Some(AssocKind::Named);
                    anode.ident = Some(name);
                    bound.push((formal, *actual));
                }
                None => {
                    let required = !has_default
                        && (fnode.kind == TreeKind::GenericDecl || mode == Some(PortMode::In));
                    if required {
                        let error = SemanticError::MissingActual {
                            what,
                            name: name.to_string(),
                        };
                        self.error(error, loc);
                    }
                }
            }
        }
        bound
    }

    fn port_actual(&mut self, formal: Tree, actual: Tree) {
        let Some(value) = self.store.tree(actual).value else {
            return;
        };
        let fnode = self.store.tree(formal);
        let (fname, fmode) = (fnode.name(), fnode.mode.unwrap_or(PortMode::In));
        let fty = self.decl_ty(formal);

        let saved = self.in_target;
        self.in_target = true;
        let found = self.expr(value, Some(fty));
        self.in_target = saved;
        if self.is_error(found) {
            return;
        }
        let loc = self.loc(value);
        if !self.compatible(fty, found) {
            self.mismatch(fty, found, loc);
            return;
        }

        let decl = self.root_decl(value).map(|d| {
            let n = self.store.tree(d);
            (n.kind, n.mode, n.ident)
        });
        let (amode, aname) = match decl {
            Some((TreeKind::PortDecl, mode, Some(name))) => (mode.unwrap_or(PortMode::In), name),
            Some((TreeKind::SignalDecl, ..)) => return,
            // VHDL-2008 lets an input port take any expression.
            _ if fmode == PortMode::In && self.options.standard >= StandardRevision::Vhdl08 => {
                return;
            }
            _ => {
                let error = SemanticError::PortActualNotSignal {
                    formal: fname.to_string(),
                };
                self.error(error, loc);
                return;
            }
        };

        let out_reads = self.options.standard >= StandardRevision::Vhdl08
            || self.options.is_relaxed(RelaxRules::OUT_PORT_READ);
        let allowed = match fmode {
            PortMode::In => match amode {
                PortMode::In | PortMode::InOut | PortMode::Buffer => true,
                PortMode::Out => out_reads,
            },
            PortMode::Out => matches!(amode, PortMode::Out | PortMode::InOut | PortMode::Buffer),
            PortMode::InOut => amode == PortMode::InOut,
            PortMode::Buffer => matches!(amode, PortMode::Buffer | PortMode::Out | PortMode::InOut),
        };
        if !allowed {
            let error = SemanticError::PortModeMismatch {
                actual: aname.to_string(),
                actual_mode: mode_name(amode),
                formal: fname.to_string(),
                formal_mode: mode_name(fmode),
            };
            self.error(error, loc);
        }
    }
}

fn statement_name(kind: TreeKind) -> &'static str {
    match kind {
        TreeKind::Process => "process statement",
        TreeKind::Instance => "component instance",
        TreeKind::CondAssign => "concurrent signal assignment",
        TreeKind::VarAssign => "variable assignment",
        TreeKind::SignalAssign => "signal assignment",
        TreeKind::If => "if statement",
        TreeKind::While => "while loop",
        TreeKind::For => "for loop",
        TreeKind::Return => "return statement",
        TreeKind::Assert => "assertion",
        TreeKind::Wait => "wait statement",
        TreeKind::Null => "null statement",
        _ => "statement",
    }
}
