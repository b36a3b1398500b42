// builder.rs
//! Construction helpers producing trees in the shape the parser emits.
//!
//! Names are upper-cased as the parser does; operator names are stored quoted
//! in lower case (`"+"`, `"mod"`). Every node gets the builder's current
//! position, which callers move with [`TreeBuilder::at`].

use hdlc_identity::{FileRef, Ident, Loc};

use crate::arena::{ObjectArena, Tree};
use crate::tree::{AssocKind, AttrKind, Direction, Flags, Literal, PortMode, TreeKind, TreeNode};

/// Canonical spelling of a simple name.
pub fn canonical_name(text: &str) -> Ident {
    Ident::new(&text.to_ascii_uppercase())
}

/// Canonical spelling of an operator designator.
pub fn operator_name(symbol: &str) -> Ident {
    Ident::new(&format!("\"{}\"", symbol.to_ascii_lowercase()))
}

pub struct TreeBuilder<'a> {
    arena: &'a mut ObjectArena,
    file: FileRef,
    line: u32,
    column: u32,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(arena: &'a mut ObjectArena, file: FileRef) -> TreeBuilder<'a> {
        TreeBuilder {
            arena,
            file,
            line: 1,
            column: 1,
        }
    }

    /// Move the position used for subsequent nodes.
    pub fn at(&mut self, line: u32, column: u32) -> &mut Self {
        self.line = line;
        self.column = column;
        self
    }

    pub fn loc(&self) -> Loc {
        Loc::point(self.file, self.line, self.column)
    }

    pub fn arena(&mut self) -> &mut ObjectArena {
        self.arena
    }

    fn node(&self, kind: TreeKind) -> TreeNode {
        TreeNode::new(kind, self.loc())
    }

    fn alloc(&mut self, node: TreeNode) -> Tree {
        self.arena.alloc_tree(node)
    }

    // Expressions

    pub fn int(&mut self, value: i64) -> Tree {
        let mut n = self.node(TreeKind::Literal);
        n.literal = Some(Literal::Int(value));
        self.alloc(n)
    }

    pub fn real(&mut self, value: f64) -> Tree {
        let mut n = self.node(TreeKind::Literal);
        n.literal = Some(Literal::Real(value));
        self.alloc(n)
    }

    pub fn name(&mut self, text: &str) -> Tree {
        let n = self.node(TreeKind::Ref).with_ident(canonical_name(text));
        self.alloc(n)
    }

    /// Positional association.
    pub fn pos(&mut self, value: Tree) -> Tree {
        let mut n = self.node(TreeKind::Param);
        n.value = Some(value);
        n.assoc = Some(AssocKind::Positional);
        self.alloc(n)
    }

    /// Named association `formal => value`.
    pub fn named(&mut self, formal: &str, value: Tree) -> Tree {
        let mut n = self.node(TreeKind::Param).with_ident(canonical_name(formal));
        n.value = Some(value);
        n.assoc = Some(AssocKind::Named);
        self.alloc(n)
    }

    pub fn others(&mut self, value: Tree) -> Tree {
        let mut n = self.node(TreeKind::Param);
        n.value = Some(value);
        n.assoc = Some(AssocKind::Others);
        self.alloc(n)
    }

    /// Call of a named function with positional arguments.
    pub fn call(&mut self, func: &str, args: &[Tree]) -> Tree {
        let ident = canonical_name(func);
        self.call_ident(ident, args)
    }

    fn call_ident(&mut self, ident: Ident, args: &[Tree]) -> Tree {
        let params = args.iter().map(|&a| self.pos(a)).collect();
        let mut n = self.node(TreeKind::FCall).with_ident(ident);
        n.params = params;
        self.alloc(n)
    }

    pub fn binary(&mut self, op: &str, left: Tree, right: Tree) -> Tree {
        self.call_ident(operator_name(op), &[left, right])
    }

    pub fn unary(&mut self, op: &str, operand: Tree) -> Tree {
        self.call_ident(operator_name(op), &[operand])
    }

    pub fn index(&mut self, prefix: Tree, indices: &[Tree]) -> Tree {
        let params = indices.iter().map(|&i| self.pos(i)).collect();
        let mut n = self.node(TreeKind::ArrayRef);
        n.value = Some(prefix);
        n.params = params;
        self.alloc(n)
    }

    pub fn field(&mut self, prefix: Tree, name: &str) -> Tree {
        let mut n = self.node(TreeKind::RecordRef).with_ident(canonical_name(name));
        n.value = Some(prefix);
        self.alloc(n)
    }

    pub fn attr(&mut self, prefix: Tree, attr: AttrKind) -> Tree {
        let mut n = self.node(TreeKind::AttrRef);
        n.value = Some(prefix);
        n.attr = Some(attr);
        self.alloc(n)
    }

    /// Aggregate from prebuilt associations (see [`TreeBuilder::pos`],
    /// [`TreeBuilder::named`], [`TreeBuilder::others`]).
    pub fn aggregate(&mut self, assocs: Vec<Tree>) -> Tree {
        let mut n = self.node(TreeKind::Aggregate);
        n.params = assocs;
        self.alloc(n)
    }

    /// Positional aggregate.
    pub fn aggregate_of(&mut self, elems: &[Tree]) -> Tree {
        let assocs = elems.iter().map(|&e| self.pos(e)).collect();
        self.aggregate(assocs)
    }

    pub fn range(&mut self, left: Tree, direction: Direction, right: Tree) -> Tree {
        let mut n = self.node(TreeKind::Range);
        n.left = Some(left);
        n.right = Some(right);
        n.direction = Some(direction);
        self.alloc(n)
    }

    pub fn to(&mut self, left: i64, right: i64) -> Tree {
        let l = self.int(left);
        let r = self.int(right);
        self.range(l, Direction::To, r)
    }

    pub fn downto(&mut self, left: i64, right: i64) -> Tree {
        let l = self.int(left);
        let r = self.int(right);
        self.range(l, Direction::Downto, r)
    }

    // Subtype indications

    pub fn mark(&mut self, type_name: &str) -> Tree {
        let n = self.node(TreeKind::TypeMark).with_ident(canonical_name(type_name));
        self.alloc(n)
    }

    /// `type_name range ...` or `type_name(r1, r2, ...)`.
    pub fn constrained(&mut self, type_name: &str, ranges: &[Tree]) -> Tree {
        let mut n = self.node(TreeKind::TypeMark).with_ident(canonical_name(type_name));
        n.ranges = ranges.iter().copied().collect();
        self.alloc(n)
    }

    // Declarations

    fn object_decl(&mut self, kind: TreeKind, name: &str, mark: Tree, value: Option<Tree>) -> Tree {
        let mut n = self.node(kind).with_ident(canonical_name(name));
        n.mark = Some(mark);
        n.value = value;
        self.alloc(n)
    }

    pub fn constant(&mut self, name: &str, mark: Tree, value: Option<Tree>) -> Tree {
        let t = self.object_decl(TreeKind::ConstDecl, name, mark, value);
        if value.is_none() {
            self.arena.tree_mut(t).flags.insert(Flags::DEFERRED);
        }
        t
    }

    pub fn signal(&mut self, name: &str, mark: Tree, init: Option<Tree>) -> Tree {
        self.object_decl(TreeKind::SignalDecl, name, mark, init)
    }

    pub fn variable(&mut self, name: &str, mark: Tree, init: Option<Tree>) -> Tree {
        self.object_decl(TreeKind::VarDecl, name, mark, init)
    }

    pub fn generic(&mut self, name: &str, mark: Tree, default: Option<Tree>) -> Tree {
        self.object_decl(TreeKind::GenericDecl, name, mark, default)
    }

    pub fn port(&mut self, name: &str, mode: PortMode, mark: Tree, default: Option<Tree>) -> Tree {
        let t = self.object_decl(TreeKind::PortDecl, name, mark, default);
        self.arena.tree_mut(t).mode = Some(mode);
        t
    }

    pub fn param(&mut self, name: &str, mark: Tree) -> Tree {
        let mut n = self.node(TreeKind::ParamDecl).with_ident(canonical_name(name));
        n.mark = Some(mark);
        n.mode = Some(PortMode::In);
        self.alloc(n)
    }

    fn type_decl(&mut self, name: &str, def: Option<Tree>) -> Tree {
        let mut n = self.node(TreeKind::TypeDecl).with_ident(canonical_name(name));
        n.value = def;
        self.alloc(n)
    }

    /// `type name is range ...`
    pub fn type_range(&mut self, name: &str, range: Tree) -> Tree {
        let mut def = self.node(TreeKind::RangeDef);
        def.ranges.push(range);
        let def = self.alloc(def);
        self.type_decl(name, Some(def))
    }

    /// `type name is (A, B, ...)`
    pub fn type_enum(&mut self, name: &str, literals: &[&str]) -> Tree {
        let lits = literals
            .iter()
            .enumerate()
            .map(|(pos, lit)| {
                let mut n = self.node(TreeKind::EnumLit).with_ident(canonical_name(lit));
                n.position = pos as u32;
                self.alloc(n)
            })
            .collect();
        let mut def = self.node(TreeKind::EnumDef);
        def.decls = lits;
        let def = self.alloc(def);
        self.type_decl(name, Some(def))
    }

    /// `type name is array (r1, ...) of elem`
    pub fn type_array(&mut self, name: &str, index: &[Tree], elem: Tree) -> Tree {
        let mut def = self.node(TreeKind::ArrayDef);
        def.ranges = index.iter().copied().collect();
        def.mark = Some(elem);
        let def = self.alloc(def);
        self.type_decl(name, Some(def))
    }

    /// `type name is array (idx range <>, ...) of elem`
    pub fn type_unconstrained_array(&mut self, name: &str, index: &[Tree], elem: Tree) -> Tree {
        let mut def = self.node(TreeKind::ArrayDef);
        def.params = index.to_vec();
        def.mark = Some(elem);
        let def = self.alloc(def);
        self.type_decl(name, Some(def))
    }

    pub fn type_record(&mut self, name: &str, fields: &[(&str, Tree)]) -> Tree {
        let decls = fields
            .iter()
            .map(|&(field, mark)| {
                let mut n = self.node(TreeKind::FieldDecl).with_ident(canonical_name(field));
                n.mark = Some(mark);
                self.alloc(n)
            })
            .collect();
        let mut def = self.node(TreeKind::RecordDef);
        def.decls = decls;
        let def = self.alloc(def);
        self.type_decl(name, Some(def))
    }

    pub fn type_access(&mut self, name: &str, designated: Tree) -> Tree {
        let mut def = self.node(TreeKind::AccessDef);
        def.mark = Some(designated);
        let def = self.alloc(def);
        self.type_decl(name, Some(def))
    }

    /// `type name;`
    pub fn type_incomplete(&mut self, name: &str) -> Tree {
        self.type_decl(name, None)
    }

    pub fn subtype(&mut self, name: &str, mark: Tree) -> Tree {
        let mut n = self.node(TreeKind::SubtypeDecl).with_ident(canonical_name(name));
        n.mark = Some(mark);
        self.alloc(n)
    }

    pub fn function_decl(&mut self, name: &str, params: Vec<Tree>, result: Tree) -> Tree {
        let mut n = self.node(TreeKind::FuncDecl).with_ident(canonical_name(name));
        n.params = params;
        n.mark = Some(result);
        self.alloc(n)
    }

    pub fn function(
        &mut self,
        name: &str,
        params: Vec<Tree>,
        result: Tree,
        decls: Vec<Tree>,
        stmts: Vec<Tree>,
    ) -> Tree {
        let mut n = self.node(TreeKind::FuncBody).with_ident(canonical_name(name));
        n.params = params;
        n.mark = Some(result);
        n.decls = decls;
        n.stmts = stmts;
        self.alloc(n)
    }

    /// Mark a function declaration or body impure.
    pub fn impure(&mut self, func: Tree) -> Tree {
        self.arena.tree_mut(func).flags.insert(Flags::IMPURE);
        func
    }

    // Sequential statements

    pub fn var_assign(&mut self, target: Tree, value: Tree) -> Tree {
        let mut n = self.node(TreeKind::VarAssign);
        n.target = Some(target);
        n.value = Some(value);
        self.alloc(n)
    }

    pub fn signal_assign(&mut self, target: Tree, value: Tree) -> Tree {
        let mut n = self.node(TreeKind::SignalAssign);
        n.target = Some(target);
        n.value = Some(value);
        self.alloc(n)
    }

    pub fn if_(&mut self, cond: Tree, then: Vec<Tree>, otherwise: Vec<Tree>) -> Tree {
        let mut n = self.node(TreeKind::If);
        n.value = Some(cond);
        n.stmts = then;
        n.else_stmts = otherwise;
        self.alloc(n)
    }

    pub fn while_(&mut self, cond: Tree, body: Vec<Tree>) -> Tree {
        let mut n = self.node(TreeKind::While);
        n.value = Some(cond);
        n.stmts = body;
        self.alloc(n)
    }

    /// `for var in range loop ... end loop`; declares the loop parameter.
    pub fn for_(&mut self, var: &str, range: Tree, body: Vec<Tree>) -> Tree {
        let mut param = self.node(TreeKind::ConstDecl).with_ident(canonical_name(var));
        param.flags.insert(Flags::LOOP_PARAM);
        let param = self.alloc(param);
        let mut n = self.node(TreeKind::For).with_ident(canonical_name(var));
        n.ranges.push(range);
        n.decls = vec![param];
        n.stmts = body;
        self.alloc(n)
    }

    pub fn ret(&mut self, value: Option<Tree>) -> Tree {
        let mut n = self.node(TreeKind::Return);
        n.value = value;
        self.alloc(n)
    }

    pub fn assert_(&mut self, cond: Tree, message: Option<Tree>) -> Tree {
        let mut n = self.node(TreeKind::Assert);
        n.value = Some(cond);
        n.message = message;
        self.alloc(n)
    }

    pub fn wait(&mut self, on: Vec<Tree>) -> Tree {
        let mut n = self.node(TreeKind::Wait);
        n.triggers = on;
        self.alloc(n)
    }

    pub fn null(&mut self) -> Tree {
        let n = self.node(TreeKind::Null);
        self.alloc(n)
    }

    // Concurrent statements

    pub fn process(&mut self, label: &str, sensitivity: Vec<Tree>, decls: Vec<Tree>, stmts: Vec<Tree>) -> Tree {
        let mut n = self.node(TreeKind::Process).with_ident(canonical_name(label));
        n.triggers = sensitivity;
        n.decls = decls;
        n.stmts = stmts;
        self.alloc(n)
    }

    pub fn cond_assign(&mut self, label: &str, target: Tree, value: Tree) -> Tree {
        let mut n = self.node(TreeKind::CondAssign).with_ident(canonical_name(label));
        n.target = Some(target);
        n.value = Some(value);
        self.alloc(n)
    }

    /// `label: entity lib.ent(arch) generic map (...) port map (...)`; the
    /// maps are built with [`TreeBuilder::named`] or [`TreeBuilder::pos`].
    pub fn instance(
        &mut self,
        label: &str,
        entity: &str,
        arch: Option<&str>,
        generic_map: Vec<Tree>,
        port_map: Vec<Tree>,
    ) -> Tree {
        let mut n = self.node(TreeKind::Instance).with_ident(canonical_name(label));
        n.ident2 = Some(canonical_name(entity));
        n.ident3 = arch.map(canonical_name);
        n.genmaps = generic_map;
        n.portmaps = port_map;
        self.alloc(n)
    }

    // Design units

    pub fn entity(
        &mut self,
        name: &str,
        generics: Vec<Tree>,
        ports: Vec<Tree>,
        decls: Vec<Tree>,
        stmts: Vec<Tree>,
    ) -> Tree {
        let mut n = self.node(TreeKind::Entity).with_ident(canonical_name(name));
        n.generics = number(self.arena, generics);
        n.ports = number(self.arena, ports);
        n.decls = decls;
        n.stmts = stmts;
        self.alloc(n)
    }

    pub fn architecture(&mut self, name: &str, entity: &str, decls: Vec<Tree>, stmts: Vec<Tree>) -> Tree {
        let mut n = self.node(TreeKind::Architecture).with_ident(canonical_name(name));
        n.ident2 = Some(canonical_name(entity));
        n.decls = decls;
        n.stmts = stmts;
        self.alloc(n)
    }

    pub fn package(&mut self, name: &str, decls: Vec<Tree>) -> Tree {
        let mut n = self.node(TreeKind::Package).with_ident(canonical_name(name));
        n.decls = decls;
        self.alloc(n)
    }

    pub fn package_body(&mut self, name: &str, decls: Vec<Tree>) -> Tree {
        let mut n = self.node(TreeKind::PackageBody).with_ident(canonical_name(name));
        n.decls = decls;
        self.alloc(n)
    }

    /// Add `use LIB.PKG.all` to a design unit's context clause.
    pub fn use_all(&mut self, unit: Tree, package: &str) -> Tree {
        let clause = self.node(TreeKind::Use).with_ident(canonical_name(package));
        let clause = self.alloc(clause);
        self.arena.tree_mut(unit).context.push(clause);
        unit
    }

    /// Set `root` as the arena's root and return it.
    pub fn finish(&mut self, root: Tree) -> Tree {
        self.arena.set_root(root);
        root
    }
}

fn number(arena: &mut ObjectArena, decls: Vec<Tree>) -> Vec<Tree> {
    for (pos, &decl) in decls.iter().enumerate() {
        arena.tree_mut(decl).position = pos as u32;
    }
    decls
}

/// Build one parsed design unit in a fresh arena.
pub fn build_unit(file: &str, f: impl FnOnce(&mut TreeBuilder<'_>) -> Tree) -> ObjectArena {
    let mut arena = ObjectArena::new();
    let mut builder = TreeBuilder::new(&mut arena, FileRef::intern(file));
    let root = f(&mut builder);
    builder.finish(root);
    arena
}
