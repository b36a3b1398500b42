// src/elab.rs
//! Elaboration of a design hierarchy.
//!
//! Each hierarchy node goes through four phases driven by an explicit work
//! list: `Bind` evaluates the generic actuals, `Instantiate` evaluates the
//! constants and creates the signals and ports, `Recurse` walks the component
//! instances of the architecture one at a time and `Attach` links the finished
//! instance to its parent.
//!
//! Every instance owns a fresh arena. Generics and constants are copied into
//! it as constant declarations holding their literal values, and expressions
//! are copied with references rewritten to those declarations before they are
//! lowered and evaluated. Two instances of the same unit therefore never share
//! objects, even when their generics are equal.

use std::fmt;
use std::sync::Arc;

use hdlc_codegen::{ArrayValue, EvalError, Value, lower_thunk};
use hdlc_identity::{Ident, Loc};
use hdlc_object::library::SECONDARY_SEP;
use hdlc_object::{
    ArenaId, Direction, Flags, Literal, ObjectArena, ObjectStore, PortMode, StaticRange, Tree,
    TreeKind, TreeNode, Type, TypeKind, TypeNode,
};
use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::cover::{CoverTagging, HIER_SEP, ToggleShape};
use crate::pipeline::Compilation;

/// Instantiation depth at which elaboration gives up.
pub const MAX_DEPTH: usize = 256;

const THUNK_NAME: &str = "<elab>";

#[derive(Debug, Error, Diagnostic)]
pub enum ElabError {
    #[error("{name} is not an entity")]
    #[diagnostic(code(E4001))]
    NotAnEntity { name: String },

    #[error("no architecture found for entity {entity}")]
    #[diagnostic(code(E4002))]
    ArchitectureNotFound { entity: String },

    #[error("missing value for generic {name} of {instance}")]
    #[diagnostic(code(E4003), help("give an actual in the generic map or a default value"))]
    MissingGeneric { instance: String, name: String },

    #[error("{entity} has no generic named {name}")]
    #[diagnostic(code(E4004))]
    NoSuchGeneric { entity: String, name: String },

    #[error("value {value} for generic {name} is outside subtype {ty}")]
    #[diagnostic(code(E4005))]
    GenericOutOfRange { name: String, value: i64, ty: String },

    #[error("{what} is not static: {reason}")]
    #[diagnostic(code(E4006))]
    NotStatic { what: String, reason: String, loc: Loc },

    #[error("evaluating {what}: {source}")]
    #[diagnostic(code(E4007))]
    Evaluation {
        what: String,
        #[source]
        source: EvalError,
    },

    #[error("instance {path} is nested more than {limit} levels deep")]
    #[diagnostic(code(E4008), help("check for an entity that instantiates itself"))]
    HierarchyTooDeep { path: String, limit: usize },

    #[error("cannot load {unit}: {reason}")]
    #[diagnostic(code(E4009))]
    UnitLoad { unit: String, reason: String },

    #[error("{what} has {elements} elements, more than the limit of {limit}")]
    #[diagnostic(code(E4010), help("raise eval-max-steps to elaborate larger objects"))]
    ObjectTooLarge {
        what: String,
        elements: u64,
        limit: u64,
        loc: Loc,
    },
}

impl ElabError {
    pub fn loc(&self) -> Option<Loc> {
        match self {
            ElabError::NotStatic { loc, .. } | ElabError::ObjectTooLarge { loc, .. } => Some(*loc),
            ElabError::Evaluation { source, .. } => source.loc(),
            _ => None,
        }
    }
}

pub type ElabResult<T> = Result<T, ElabError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u32);

impl InstanceId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Signal {
    pub name: Ident,
    pub ty: Option<Type>,
    /// Index range for arrays, value range for discrete scalars.
    pub range: Option<StaticRange>,
    pub value: Value,
    pub loc: Loc,
}

/// What a port is connected to in the parent instance.
#[derive(Clone, Debug, PartialEq)]
pub enum PortBinding {
    Signal(Ident),
    Port(Ident),
    Value(Value),
    Open,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Port {
    pub name: Ident,
    pub mode: PortMode,
    pub ty: Option<Type>,
    pub range: Option<StaticRange>,
    /// Default value of the port.
    pub value: Value,
    pub binding: PortBinding,
    pub loc: Loc,
}

pub struct Instance {
    path: Ident,
    label: Ident,
    entity: Ident,
    architecture: Option<Ident>,
    arena: ArenaId,
    parent: Option<InstanceId>,
    generics: Vec<(Ident, Value)>,
    constants: Vec<(Ident, Value)>,
    signals: Vec<Signal>,
    ports: Vec<Port>,
    children: Vec<InstanceId>,
    /// Declaration in the design unit -> its copy in this instance's arena.
    subst: FxHashMap<Tree, Tree>,
}

fn lookup<'a, T>(items: &'a [(Ident, T)], name: &str) -> Option<&'a T> {
    items
        .iter()
        .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

impl Instance {
    /// Hierarchical path such as `:TOP:U1`.
    pub fn path(&self) -> Ident {
        self.path
    }

    pub fn label(&self) -> Ident {
        self.label
    }

    /// Library unit name of the entity.
    pub fn entity(&self) -> Ident {
        self.entity
    }

    pub fn architecture(&self) -> Option<Ident> {
        self.architecture
    }

    pub fn arena(&self) -> ArenaId {
        self.arena
    }

    pub fn parent(&self) -> Option<InstanceId> {
        self.parent
    }

    pub fn generic(&self, name: &str) -> Option<&Value> {
        lookup(&self.generics, name)
    }

    pub fn generics(&self) -> &[(Ident, Value)] {
        &self.generics
    }

    pub fn constant(&self, name: &str) -> Option<&Value> {
        lookup(&self.constants, name)
    }

    pub fn signal(&self, name: &str) -> Option<&Signal> {
        self.signals
            .iter()
            .find(|s| s.name.as_str().eq_ignore_ascii_case(name))
    }

    pub fn signal_mut(&mut self, name: &str) -> Option<&mut Signal> {
        self.signals
            .iter_mut()
            .find(|s| s.name.as_str().eq_ignore_ascii_case(name))
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports
            .iter()
            .find(|p| p.name.as_str().eq_ignore_ascii_case(name))
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn children(&self) -> &[InstanceId] {
        &self.children
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("path", &self.path)
            .field("entity", &self.entity)
            .field("architecture", &self.architecture)
            .field("generics", &self.generics)
            .field("signals", &self.signals.len())
            .field("ports", &self.ports.len())
            .field("children", &self.children)
            .finish()
    }
}

/// Result of a successful elaboration. The root instance comes first.
#[derive(Debug)]
pub struct ElabGraph {
    instances: Vec<Instance>,
    coverage: Option<CoverTagging>,
}

impl ElabGraph {
    pub fn root(&self) -> &Instance {
        &self.instances[0]
    }

    pub fn root_id(&self) -> InstanceId {
        InstanceId(0)
    }

    pub fn instance(&self, id: InstanceId) -> &Instance {
        &self.instances[id.index()]
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> &mut Instance {
        &mut self.instances[id.index()]
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter()
    }

    pub fn find(&self, path: &str) -> Option<InstanceId> {
        self.instances
            .iter()
            .position(|i| i.path.as_str().eq_ignore_ascii_case(path))
            .map(|pos| InstanceId(pos as u32))
    }

    pub fn children(&self, id: InstanceId) -> impl Iterator<Item = &Instance> {
        self.instance(id)
            .children
            .iter()
            .map(|&child| self.instance(child))
    }

    pub fn coverage(&self) -> Option<&CoverTagging> {
        self.coverage.as_ref()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Bind,
    Instantiate,
    Recurse { next: usize },
    Attach,
}

struct Frame {
    instance: InstanceId,
    entity: Tree,
    architecture: Tree,
    /// The instance statement in the parent architecture; `None` at the top.
    stmt: Option<Tree>,
    depth: usize,
    phase: Phase,
}

pub struct Elaborator<'c> {
    comp: &'c mut Compilation,
    instances: Vec<Instance>,
    cover: Option<CoverTagging>,
}

impl<'c> Elaborator<'c> {
    pub fn new(comp: &'c mut Compilation) -> Elaborator<'c> {
        let options = comp.options();
        let cover = (!options.cover.is_empty())
            .then(|| CoverTagging::new(options.cover, options.cover_array_limit));
        Elaborator {
            comp,
            instances: Vec::new(),
            cover,
        }
    }

    pub fn elaborate(self, top: Tree) -> ElabResult<ElabGraph> {
        self.elaborate_with(top, &[])
    }

    /// Elaborate `top`, taking the values of its generics from `overrides`
    /// before falling back to their defaults.
    #[tracing::instrument(skip(self, overrides), fields(overrides = overrides.len()))]
    pub fn elaborate_with(mut self, top: Tree, overrides: &[(&str, Value)]) -> ElabResult<ElabGraph> {
        let before: FxHashSet<ArenaId> = self.comp.store.ids().collect();
        match self.run(top, overrides) {
            Ok(()) => Ok(ElabGraph {
                instances: self.instances,
                coverage: self.cover,
            }),
            Err(err) => {
                // Instance arenas and units loaded on the way out.
                let added: Vec<ArenaId> = self
                    .comp
                    .store
                    .ids()
                    .filter(|id| !before.contains(id))
                    .collect();
                for &id in &added {
                    self.comp.store.discard(id);
                }
                tracing::debug!(error = %err, released = added.len(), "elaboration failed");
                Err(err)
            }
        }
    }

    fn run(&mut self, top: Tree, overrides: &[(&str, Value)]) -> ElabResult<()> {
        let node = self.comp.store.tree(top);
        if node.kind != TreeKind::Entity {
            return Err(ElabError::NotAnEntity {
                name: node.ident.map_or_else(|| format!("{:?}", node.kind), |i| i.to_string()),
            });
        }
        let label = node.name();
        let entity = self.unit_name(top);
        self.check_overrides(top, entity, overrides)?;
        let architecture = self.pick_architecture(entity, None)?;
        let path = Ident::compose(Ident::new(""), HIER_SEP, label.as_str());
        let root = self.new_instance(path, label, top, architecture, None);

        let mut work = vec![Frame {
            instance: root,
            entity: top,
            architecture,
            stmt: None,
            depth: 0,
            phase: Phase::Bind,
        }];
        while let Some(frame) = work.last_mut() {
            match frame.phase {
                Phase::Bind => {
                    self.bind_generics(frame, overrides)?;
                    frame.phase = Phase::Instantiate;
                }
                Phase::Instantiate => {
                    self.instantiate(frame)?;
                    frame.phase = Phase::Recurse { next: 0 };
                }
                Phase::Recurse { next } => {
                    let stmts = &self.comp.store.tree(frame.architecture).stmts;
                    let found = stmts[next.min(stmts.len())..]
                        .iter()
                        .position(|&s| self.comp.store.tree(s).kind == TreeKind::Instance)
                        .map(|offset| (next + offset, stmts[next + offset]));
                    match found {
                        Some((index, stmt)) => {
                            frame.phase = Phase::Recurse { next: index + 1 };
                            let (parent, depth) = (frame.instance, frame.depth + 1);
                            let child = self.child_frame(parent, stmt, depth)?;
                            work.push(child);
                        }
                        None => frame.phase = Phase::Attach,
                    }
                }
                Phase::Attach => {
                    let id = frame.instance;
                    work.pop();
                    self.attach(id);
                }
            }
        }
        Ok(())
    }

    fn unit_name(&self, unit: Tree) -> Ident {
        let arena = self.comp.store.arena(unit.arena());
        match arena.and_then(ObjectArena::name) {
            Some(name) => name,
            None => self.comp.store.tree(unit).name(),
        }
    }

    fn check_overrides(&self, top: Tree, entity: Ident, overrides: &[(&str, Value)]) -> ElabResult<()> {
        let generics = &self.comp.store.tree(top).generics;
        for (name, _) in overrides {
            let known = generics.iter().any(|&g| {
                self.comp
                    .store
                    .tree(g)
                    .ident
                    .is_some_and(|i| i.as_str().eq_ignore_ascii_case(name))
            });
            if !known {
                return Err(ElabError::NoSuchGeneric {
                    entity: entity.to_string(),
                    name: name.to_ascii_uppercase(),
                });
            }
        }
        Ok(())
    }

    /// The named architecture of `entity`, or the most recently analysed one.
    fn pick_architecture(&mut self, entity: Ident, named: Option<Ident>) -> ElabResult<Tree> {
        let candidates = match named {
            Some(arch) => vec![Ident::prefix(entity, arch, SECONDARY_SEP)],
            None => {
                let mut found = self.comp.libs.architectures_of(entity);
                if found.is_empty() {
                    found = self.loaded_architectures(entity);
                }
                found
            }
        };
        let Some(&unit) = candidates.last() else {
            return Err(ElabError::ArchitectureNotFound {
                entity: entity.to_string(),
            });
        };
        match self.comp.libs.get_unit(&mut self.comp.store, unit) {
            Ok(Some(root)) => Ok(root),
            Ok(None) => match self.comp.store.unit(unit) {
                Some(root) => Ok(root),
                None => Err(ElabError::ArchitectureNotFound {
                    entity: entity.to_string(),
                }),
            },
            Err(e) => Err(ElabError::UnitLoad {
                unit: unit.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Architectures already in the object store but not in any library.
    fn loaded_architectures(&self, entity: Ident) -> Vec<Ident> {
        let prefix = format!("{entity}{SECONDARY_SEP}");
        let mut found: Vec<(ArenaId, Ident)> = self
            .comp
            .store
            .ids()
            .filter_map(|id| {
                let arena = self.comp.store.arena(id)?;
                let name = arena.name()?;
                let root = arena.root()?;
                let is_arch = arena.tree(root).kind == TreeKind::Architecture;
                (is_arch && name.as_str().starts_with(&prefix)).then_some((id, name))
            })
            .collect();
        found.sort_by_key(|&(id, _)| id);
        found.into_iter().map(|(_, name)| name).collect()
    }

    fn new_instance(
        &mut self,
        path: Ident,
        label: Ident,
        entity: Tree,
        architecture: Tree,
        parent: Option<InstanceId>,
    ) -> InstanceId {
        let arena = ObjectArena::new().with_name(path);
        let arena = self.comp.store.insert(arena);
        let entity = self.unit_name(entity);
        let architecture = self.comp.store.tree(architecture).ident;
        let id = InstanceId(self.instances.len() as u32);
        self.instances.push(Instance {
            path,
            label,
            entity,
            architecture,
            arena,
            parent,
            generics: Vec::new(),
            constants: Vec::new(),
            signals: Vec::new(),
            ports: Vec::new(),
            children: Vec::new(),
            subst: FxHashMap::default(),
        });
        id
    }

    fn child_frame(&mut self, parent: InstanceId, stmt: Tree, depth: usize) -> ElabResult<Frame> {
        let node = self.comp.store.tree(stmt);
        let (label, arch, reference) = (node.name(), node.ident3, node.reference);
        let path = Ident::compose(self.instances[parent.index()].path, HIER_SEP, label.as_str());
        if depth > MAX_DEPTH {
            return Err(ElabError::HierarchyTooDeep {
                path: path.to_string(),
                limit: MAX_DEPTH,
            });
        }
        let Some(entity) = reference else {
            return Err(ElabError::NotAnEntity {
                name: node.ident2.map_or_else(String::new, |i| i.to_string()),
            });
        };
        if self.comp.store.tree(entity).kind != TreeKind::Entity {
            return Err(ElabError::NotAnEntity {
                name: self.unit_name(entity).to_string(),
            });
        }
        let unit = self.unit_name(entity);
        let architecture = self.pick_architecture(unit, arch)?;
        let instance = self.new_instance(path, label, entity, architecture, Some(parent));
        Ok(Frame {
            instance,
            entity,
            architecture,
            stmt: Some(stmt),
            depth,
            phase: Phase::Bind,
        })
    }

    fn attach(&mut self, id: InstanceId) {
        if let Some(cover) = &mut self.cover {
            cover.pop_scope();
        }
        let inst = &self.instances[id.index()];
        tracing::debug!(
            path = %inst.path,
            generics = inst.generics.len(),
            signals = inst.signals.len(),
            ports = inst.ports.len(),
            "instance elaborated"
        );
        if let Some(parent) = inst.parent {
            self.instances[parent.index()].children.push(id);
        }
    }

    // Bind

    fn bind_generics(&mut self, frame: &Frame, overrides: &[(&str, Value)]) -> ElabResult<()> {
        let id = frame.instance;
        let generics = self.comp.store.tree(frame.entity).generics.clone();
        let actuals = match frame.stmt {
            Some(stmt) => self.comp.store.tree(stmt).genmaps.clone(),
            None => Vec::new(),
        };
        let parent = self.instances[id.index()].parent;

        for generic in generics {
            let gnode = self.comp.store.tree(generic);
            let (name, ty, default, loc) = (gnode.name(), gnode.ty, gnode.value, gnode.loc);
            let actual = actuals.iter().find_map(|&a| {
                let anode = self.comp.store.tree(a);
                (anode.ident == Some(name)).then_some(anode.value).flatten()
            });
            let what = format!("generic {name}");
            let value = if let (Some(actual), Some(parent)) = (actual, parent) {
                self.evaluate_in(parent, id, actual, &what)?
            } else if let Some((_, value)) = overrides
                .iter()
                .find(|(n, _)| frame.stmt.is_none() && n.eq_ignore_ascii_case(name.as_str()))
            {
                value.clone()
            } else if let Some(default) = default {
                self.evaluate_in(id, id, default, &what)?
            } else {
                return Err(ElabError::MissingGeneric {
                    instance: self.instances[id.index()].path.to_string(),
                    name: name.to_string(),
                });
            };

            if let (Some(ty), Some(v)) = (ty, value.as_int())
                && let Some(range) = self.comp.store.discrete_range(ty)
                && !range.contains(v)
            {
                return Err(ElabError::GenericOutOfRange {
                    name: name.to_string(),
                    value: v,
                    ty: self.comp.store.type_name(ty),
                });
            }
            self.bind_constant(id, generic, name, ty, &value, loc, Flags::ELAB_GENERIC);
            self.instances[id.index()].generics.push((name, value));
        }
        Ok(())
    }

    /// Record `value` for `decl` in the instance: a constant declaration in
    /// the instance arena that later expressions are redirected to.
    #[allow(clippy::too_many_arguments)]
    fn bind_constant(
        &mut self,
        id: InstanceId,
        decl: Tree,
        name: Ident,
        ty: Option<Type>,
        value: &Value,
        loc: Loc,
        flags: Flags,
    ) {
        let arena = self.instances[id.index()].arena;
        let literal = self.value_tree(arena, ty, value, loc);
        let mut node = TreeNode::new(TreeKind::ConstDecl, loc).with_ident(name);
        node.ty = ty;
        node.value = Some(literal);
        node.flags = flags;
        let copy = self.alloc(arena, node);
        self.instances[id.index()].subst.insert(decl, copy);
    }

    fn value_tree(&mut self, arena: ArenaId, ty: Option<Type>, value: &Value, loc: Loc) -> Tree {
        match value {
            Value::Int(v) => {
                let is_enum = ty.is_some_and(|t| self.comp.store.type_kind(t) == TypeKind::Enum);
                let literal = match u32::try_from(*v) {
                    Ok(pos) if is_enum => Literal::Enum(pos),
                    _ => Literal::Int(*v),
                };
                self.literal(arena, ty, literal, loc)
            }
            Value::Real(v) => self.literal(arena, ty, Literal::Real(*v), loc),
            Value::Array(array) => {
                let elem_ty = ty.and_then(|t| self.comp.store.element_type(t));
                let elems: Vec<Tree> = array
                    .elems
                    .iter()
                    .map(|e| {
                        let value = self.value_tree(arena, elem_ty, e, loc);
                        let mut assoc = TreeNode::new(TreeKind::Param, loc);
                        assoc.value = Some(value);
                        self.alloc(arena, assoc)
                    })
                    .collect();
                let subtype = ty.map(|t| self.array_subtype(arena, t, array, loc));
                let mut node = TreeNode::new(TreeKind::Aggregate, loc);
                node.ty = subtype;
                node.params = elems;
                self.alloc(arena, node)
            }
        }
    }

    fn literal(&mut self, arena: ArenaId, ty: Option<Type>, literal: Literal, loc: Loc) -> Tree {
        let mut node = TreeNode::new(TreeKind::Literal, loc);
        node.ty = ty;
        node.literal = Some(literal);
        self.alloc(arena, node)
    }

    /// Subtype of the array type `ty` constrained to the bounds of `array`.
    fn array_subtype(&mut self, arena: ArenaId, ty: Type, array: &ArrayValue, loc: Loc) -> Type {
        let len = array.elems.len() as i64;
        let (direction, right) = if array.ascending {
            (Direction::To, array.left + len - 1)
        } else {
            (Direction::Downto, array.left - len + 1)
        };
        let left = self.literal(arena, None, Literal::Int(array.left), loc);
        let right = self.literal(arena, None, Literal::Int(right), loc);
        let mut range = TreeNode::new(TreeKind::Range, loc);
        range.left = Some(left);
        range.right = Some(right);
        range.direction = Some(direction);
        let range = self.alloc(arena, range);

        let mut node = TypeNode::new(TypeKind::Subtype);
        node.base = Some(self.comp.store.base_type(ty));
        node.ranges.push(range);
        self.arena_mut(arena).intern_type(node)
    }

    fn arena_mut(&mut self, arena: ArenaId) -> &mut ObjectArena {
        match self.comp.store.arena_mut(arena) {
            Some(arena) => arena,
            None => panic!("INTERNAL: instance arena left the object store"),
        }
    }

    fn alloc(&mut self, arena: ArenaId, node: TreeNode) -> Tree {
        self.arena_mut(arena).alloc_tree(node)
    }

    // Instantiate

    fn instantiate(&mut self, frame: &Frame) -> ElabResult<()> {
        let id = frame.instance;
        if let Some(cover) = &mut self.cover {
            let store = &self.comp.store;
            cover.push_scope(self.instances[id.index()].path);
            for unit in [frame.entity, frame.architecture] {
                cover.tag_statements(store, &store.tree(unit).stmts);
            }
        }

        let mut decls = self.comp.store.tree(frame.entity).decls.clone();
        decls.extend_from_slice(&self.comp.store.tree(frame.architecture).decls);
        for decl in decls {
            match self.comp.store.tree(decl).kind {
                TreeKind::ConstDecl => self.constant(id, decl)?,
                TreeKind::SignalDecl => self.signal(id, decl)?,
                _ => {}
            }
        }

        let ports = self.comp.store.tree(frame.entity).ports.clone();
        let actuals = match frame.stmt {
            Some(stmt) => self.comp.store.tree(stmt).portmaps.clone(),
            None => Vec::new(),
        };
        for port in ports {
            self.port(id, port, &actuals)?;
        }
        self.tag_toggles(id);
        Ok(())
    }

    fn tag_toggles(&mut self, id: InstanceId) {
        let Some(cover) = &mut self.cover else {
            return;
        };
        let store = &self.comp.store;
        let inst = &self.instances[id.index()];
        let objects = inst
            .signals
            .iter()
            .map(|s| (s.name, s.ty, s.range, s.loc))
            .chain(inst.ports.iter().map(|p| (p.name, p.ty, p.range, p.loc)));
        for (name, ty, range, loc) in objects {
            if let Some(shape) = ty.and_then(|ty| toggle_shape(store, ty, range)) {
                cover.tag_toggles(name, shape, loc);
            }
        }
    }

    fn constant(&mut self, id: InstanceId, decl: Tree) -> ElabResult<()> {
        let node = self.comp.store.tree(decl);
        let (name, ty, value, loc) = (node.name(), node.ty, node.value, node.loc);
        let Some(expr) = value else {
            return Ok(());
        };
        match self.evaluate_in(id, id, expr, &format!("constant {name}")) {
            Ok(value) => {
                self.bind_constant(id, decl, name, ty, &value, loc, Flags::empty());
                self.instances[id.index()].constants.push((name, value));
                Ok(())
            }
            // Constants that need run-time information stay unevaluated.
            Err(ElabError::NotStatic { reason, .. }) => {
                tracing::debug!(constant = %name, %reason, "constant left unevaluated");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn signal(&mut self, id: InstanceId, decl: Tree) -> ElabResult<()> {
        let node = self.comp.store.tree(decl);
        let (name, ty, init, loc) = (node.name(), node.ty, node.value, node.loc);
        let what = format!("signal {name}");
        let range = match ty {
            Some(ty) => self.object_range(id, ty, &what, loc)?,
            None => None,
        };
        let value = match (init, ty) {
            (Some(init), _) => self.evaluate_in(id, id, init, &what)?,
            (None, Some(ty)) => self.default_value(id, ty, &what, loc)?,
            (None, None) => Value::Int(0),
        };
        self.instances[id.index()].signals.push(Signal {
            name,
            ty,
            range,
            value,
            loc,
        });
        Ok(())
    }

    fn port(&mut self, id: InstanceId, port: Tree, actuals: &[Tree]) -> ElabResult<()> {
        let node = self.comp.store.tree(port);
        let (name, mode, ty, default, loc) = (
            node.name(),
            node.mode.unwrap_or(PortMode::In),
            node.ty,
            node.value,
            node.loc,
        );
        let what = format!("port {name}");
        let range = match ty {
            Some(ty) => self.object_range(id, ty, &what, loc)?,
            None => None,
        };
        let value = match (default, ty) {
            (Some(default), _) => self.evaluate_in(id, id, default, &what)?,
            (None, Some(ty)) => self.default_value(id, ty, &what, loc)?,
            (None, None) => Value::Int(0),
        };

        let actual = actuals.iter().find_map(|&a| {
            let anode = self.comp.store.tree(a);
            (anode.ident == Some(name)).then_some(anode.value).flatten()
        });
        let binding = match (actual, self.instances[id.index()].parent) {
            (Some(actual), Some(parent)) => self.port_binding(parent, id, actual, &what)?,
            _ => PortBinding::Open,
        };
        self.instances[id.index()].ports.push(Port {
            name,
            mode,
            ty,
            range,
            value,
            binding,
            loc,
        });
        Ok(())
    }

    fn port_binding(
        &mut self,
        parent: InstanceId,
        id: InstanceId,
        actual: Tree,
        what: &str,
    ) -> ElabResult<PortBinding> {
        let node = self.comp.store.tree(actual);
        if node.kind == TreeKind::Ref
            && let Some(decl) = node.reference
        {
            let dnode = self.comp.store.tree(decl);
            match dnode.kind {
                TreeKind::SignalDecl => return Ok(PortBinding::Signal(dnode.name())),
                TreeKind::PortDecl => return Ok(PortBinding::Port(dnode.name())),
                _ => {}
            }
        }
        let value = self.evaluate_in(parent, id, actual, what)?;
        Ok(PortBinding::Value(value))
    }

    // Values

    /// Copy `expr` into the arena of `into`, redirecting references through
    /// the bindings of `ctx`, then evaluate it.
    fn evaluate_in(&mut self, ctx: InstanceId, into: InstanceId, expr: Tree, what: &str) -> ElabResult<Value> {
        let arena = self.instances[into.index()].arena;
        let copy = copy_tree(
            &mut self.comp.store,
            arena,
            &self.instances[ctx.index()].subst,
            expr,
        );
        let func = lower_thunk(&self.comp.store, copy, Ident::new(THUNK_NAME)).map_err(|e| {
            ElabError::NotStatic {
                what: what.to_owned(),
                reason: e.kind.to_string(),
                loc: e.loc.unwrap_or(Loc::INVALID),
            }
        })?;
        self.comp
            .evaluator
            .evaluate_function(&func, &[])
            .map_err(|source| ElabError::Evaluation {
                what: what.to_owned(),
                source,
            })
    }

    fn evaluate_int(&mut self, ctx: InstanceId, expr: Tree, what: &str, loc: Loc) -> ElabResult<i64> {
        self.evaluate_in(ctx, ctx, expr, what)?
            .as_int()
            .ok_or_else(|| ElabError::NotStatic {
                what: what.to_owned(),
                reason: String::from("bound is not discrete"),
                loc,
            })
    }

    /// Bounds of a `Range` tree, evaluating them when not literal.
    fn resolve_range(&mut self, ctx: InstanceId, range: Tree, what: &str, loc: Loc) -> ElabResult<StaticRange> {
        if let Some(r) = self.comp.store.static_range(range) {
            return Ok(r);
        }
        let node = self.comp.store.tree(range);
        let (Some(left), Some(right), Some(direction)) = (node.left, node.right, node.direction) else {
            return Err(ElabError::NotStatic {
                what: what.to_owned(),
                reason: format!("{:?} is not a range", node.kind),
                loc,
            });
        };
        Ok(StaticRange {
            left: self.evaluate_int(ctx, left, what, loc)?,
            direction,
            right: self.evaluate_int(ctx, right, what, loc)?,
        })
    }

    /// Index range of an array type or value range of a discrete type.
    fn object_range(&mut self, ctx: InstanceId, ty: Type, what: &str, loc: Loc) -> ElabResult<Option<StaticRange>> {
        let store = &self.comp.store;
        let range = match store.type_kind(ty) {
            TypeKind::Array => store.index_constraint(ty, 0),
            TypeKind::Integer | TypeKind::Enum => {
                if let Some(r) = store.discrete_range(ty) {
                    return Ok(Some(r));
                }
                store.scalar_range(ty)
            }
            _ => None,
        };
        match range {
            Some(range) => self.resolve_range(ctx, range, what, loc).map(Some),
            None => Ok(None),
        }
    }

    /// Initial value of an object of type `ty` without an explicit one: the
    /// left bound for scalars, element defaults for composites.
    fn default_value(&mut self, ctx: InstanceId, ty: Type, what: &str, loc: Loc) -> ElabResult<Value> {
        match self.comp.store.type_kind(ty) {
            TypeKind::Integer | TypeKind::Enum => {
                let range = self.object_range(ctx, ty, what, loc)?;
                Ok(Value::Int(range.map_or(0, |r| r.left)))
            }
            TypeKind::Real => {
                let Some(range) = self.comp.store.scalar_range(ty) else {
                    return Ok(Value::Real(0.0));
                };
                let left = self.comp.store.tree(range).left;
                match left.and_then(|l| self.comp.store.tree(l).literal) {
                    Some(Literal::Real(v)) => Ok(Value::Real(v)),
                    _ => match left {
                        Some(left) => self.evaluate_in(ctx, ctx, left, what),
                        None => Ok(Value::Real(0.0)),
                    },
                }
            }
            TypeKind::Array => {
                // Unconstrained: the actual supplies the bounds.
                let Some(range) = self.object_range(ctx, ty, what, loc)? else {
                    return Ok(Value::Array(Arc::new(ArrayValue {
                        left: 0,
                        ascending: true,
                        elems: Vec::new(),
                    })));
                };
                let elem = match self.comp.store.element_type(ty) {
                    Some(elem) => self.default_value(ctx, elem, what, loc)?,
                    None => Value::Int(0),
                };
                let len = u64::try_from(range.length()).unwrap_or(0);
                let limit = self.comp.options().eval_max_steps;
                let elements = len.saturating_mul(scalar_count(&elem).max(1));
                if elements > limit {
                    return Err(ElabError::ObjectTooLarge {
                        what: what.to_owned(),
                        elements,
                        limit,
                        loc,
                    });
                }
                let len = len as usize;
                Ok(Value::Array(Arc::new(ArrayValue {
                    left: range.left,
                    ascending: range.direction == Direction::To,
                    elems: vec![elem; len],
                })))
            }
            TypeKind::Record => {
                let base = self.comp.store.base_type(ty);
                let fields: Vec<Type> = self
                    .comp
                    .store
                    .ty(base)
                    .members
                    .iter()
                    .filter_map(|&f| self.comp.store.tree(f).ty)
                    .collect();
                let elems = fields
                    .into_iter()
                    .map(|f| self.default_value(ctx, f, what, loc))
                    .collect::<ElabResult<Vec<_>>>()?;
                Ok(Value::Array(Arc::new(ArrayValue {
                    left: 0,
                    ascending: true,
                    elems,
                })))
            }
            // Null for access types.
            _ => Ok(Value::Int(0)),
        }
    }
}

/// Scalars making up a value.
/// Objects of enumeration type, or arrays of them, toggle.
fn toggle_shape(store: &ObjectStore, ty: Type, range: Option<StaticRange>) -> Option<ToggleShape> {
    match store.type_kind(ty) {
        TypeKind::Enum => Some(ToggleShape::Scalar),
        TypeKind::Array => {
            let elem = store.element_type(ty)?;
            (store.type_kind(elem) == TypeKind::Enum).then_some(ToggleShape::Array(range?))
        }
        _ => None,
    }
}

fn scalar_count(value: &Value) -> u64 {
    match value {
        Value::Array(array) => array.elems.iter().map(scalar_count).sum(),
        _ => 1,
    }
}

/// Deep copy of an expression into `arena`. References found in `subst` are
/// redirected; everything else keeps pointing at the original declarations.
fn copy_tree(store: &mut ObjectStore, arena: ArenaId, subst: &FxHashMap<Tree, Tree>, tree: Tree) -> Tree {
    let mut node = store.tree(tree).clone();
    if let Some(target) = node.reference.and_then(|r| subst.get(&r)) {
        node.reference = Some(*target);
    }
    node.map_children(|child| copy_tree(store, arena, subst, child));
    match store.arena_mut(arena) {
        Some(target) => target.alloc_tree(node),
        None => panic!("INTERNAL: instance arena left the object store"),
    }
}
