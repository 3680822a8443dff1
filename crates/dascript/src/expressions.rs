//! The expression tree.
//!
//! [`Expression`] is what the parser produces and inference mutates: every
//! node carries its source location, a type slot that inference fills, and a
//! tagged [`ExprKind`]. Resolution state (variable references, chosen
//! overloads, field offsets, loop slots) is written into the nodes during
//! inference so lowering can run as a pure read.

use std::rc::Rc;

use smallvec::SmallVec;
use strum::Display;

use crate::{
    context::EvalFlags,
    source::LineInfo,
    structure::Enumeration,
    typedecl::{BaseType, TypeDecl},
    vm::{
        NativeFunction,
        policy::{Op1Kind, Op2Kind},
    },
};

/// Hard limit on parallel `for` sources.
pub const MAX_FOR_ITERATORS: usize = 16;

/// Operators as they appear in source. The display form doubles as the
/// function name operators are registered and resolved under; unary and
/// binary uses of the same symbol share the name and are told apart by
/// arity during overload resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Operator {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "&")]
    BinAnd,
    #[strum(serialize = "|")]
    BinOr,
    #[strum(serialize = "^")]
    BinXor,
    #[strum(serialize = "~")]
    BinNot,
    #[strum(serialize = "&&")]
    BoolAnd,
    #[strum(serialize = "||")]
    BoolOr,
    #[strum(serialize = "^^")]
    BoolXor,
    #[strum(serialize = "!")]
    BoolNot,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    NotEq,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEq,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEq,
    #[strum(serialize = "+=")]
    AddAssign,
    #[strum(serialize = "-=")]
    SubAssign,
    #[strum(serialize = "*=")]
    MulAssign,
    #[strum(serialize = "/=")]
    DivAssign,
    #[strum(serialize = "%=")]
    ModAssign,
    #[strum(serialize = "&=")]
    AndAssign,
    #[strum(serialize = "|=")]
    OrAssign,
    #[strum(serialize = "^=")]
    XorAssign,
    #[strum(serialize = "++")]
    Inc,
    #[strum(serialize = "--")]
    Dec,
    #[strum(serialize = "+++")]
    PostInc,
    #[strum(serialize = "---")]
    PostDec,
}

/// A declared variable: a global, a function argument, or a `let` local.
///
/// `index` is the dense global index (globals only); `stack_top` is the byte
/// offset into the frame (locals only). Both are assigned during inference.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub type_: TypeDecl,
    pub init: Option<Expression>,
    pub at: LineInfo,
    pub index: i32,
    pub stack_top: u32,
}

impl Variable {
    #[must_use]
    pub fn new(name: impl Into<String>, type_: TypeDecl, at: LineInfo) -> Self {
        Self {
            name: name.into(),
            type_,
            init: None,
            at,
            index: -1,
            stack_top: 0,
        }
    }

    #[must_use]
    pub fn with_init(mut self, init: Expression) -> Self {
        self.init = Some(init);
        self
    }
}

/// Where a variable reference resolved to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VarRef {
    #[default]
    Unresolved,
    /// A `let` local or loop iterator. `ref_in_slot` is true when the slot
    /// stores a reference rather than the value itself.
    Local { stack_top: u32, ref_in_slot: bool },
    Argument { index: u32 },
    Global { index: u32 },
}

/// A resolved structure or handle field: byte offset from the container base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    pub offset: u32,
}

/// What a call or operator resolved to.
#[derive(Debug, Clone)]
pub enum CallTarget {
    /// A user (simulated) function, by its dense function index.
    User { fn_index: u32 },
    /// A built-in unary operator lowered through the policy table.
    Policy1 { kind: Op1Kind, ty: BaseType },
    /// A built-in binary operator lowered through the policy table.
    Policy2 { kind: Op2Kind, ty: BaseType },
    /// A built-in native function invoked directly, without a prologue.
    Native(NativeFunction),
}

/// A loop iterator variable with its assigned stack slot.
#[derive(Debug, Clone)]
pub struct IterVar {
    pub name: String,
    pub stack_top: u32,
    pub type_: TypeDecl,
}

/// The expression variants. Boxes keep the enum small; `Vec` children are
/// evaluated in order.
#[derive(Debug, Clone)]
pub enum ExprKind {
    ConstBool(bool),
    ConstInt(i32),
    ConstUInt(u32),
    ConstInt64(i64),
    ConstUInt64(u64),
    ConstFloat(f32),
    ConstDouble(f64),
    ConstString(String),
    /// The null pointer literal.
    ConstPtr,
    /// An enumeration entry, resolved to its numeric value at construction.
    ConstEnum { enum_type: Rc<Enumeration>, value: i32 },
    /// A name. Resolution order: innermost local, then function argument,
    /// then global.
    Var { name: String, resolved: VarRef },
    /// `value.name` on a structure, handle, or pointer to either. Yields a
    /// reference to the field; container constness propagates.
    Field {
        value: Box<Expression>,
        name: String,
        resolved: Option<FieldRef>,
    },
    /// `value?.name` on a pointer. Yields a (possibly null) pointer to the
    /// field; when the field itself is a pointer, no extra wrapping happens.
    SafeField {
        value: Box<Expression>,
        name: String,
        resolved: Option<FieldRef>,
        skip_wrap: bool,
    },
    /// `subexpr[index]` over tables, dynamic arrays, handles, or fixed dims.
    At {
        subexpr: Box<Expression>,
        index: Box<Expression>,
    },
    /// Implicit load of a simple scalar through a reference. Inserted by
    /// inference; never produced by a parser.
    Ref2Value { subexpr: Box<Expression> },
    /// `*subexpr` — pointer to reference, with a runtime null check.
    Ptr2Ref { subexpr: Box<Expression> },
    /// `addr(subexpr)` — reference to pointer; the unsafe address-of form.
    Ref2Ptr { subexpr: Box<Expression> },
    /// `subexpr ?? default`.
    NullCoalescing {
        subexpr: Box<Expression>,
        default: Box<Expression>,
    },
    Op1 {
        op: Operator,
        subexpr: Box<Expression>,
        resolved: Option<CallTarget>,
    },
    Op2 {
        op: Operator,
        left: Box<Expression>,
        right: Box<Expression>,
        resolved: Option<CallTarget>,
    },
    /// The conditional operator `cond ? left : right`.
    Op3 {
        cond: Box<Expression>,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// `left = right`.
    Copy {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// `left <- right`, for movable non-copyable types; zeroes the source of
    /// non-pod values.
    Move {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// Parser-internal pairing of expressions; must not survive into a typed
    /// program.
    Sequence {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Assert { args: Vec<Expression> },
    Debug { args: Vec<Expression> },
    Hash { args: Vec<Expression> },
    SizeOf {
        subexpr: Box<Expression>,
        resolved: Option<TypeDecl>,
    },
    /// `new T` for structure or handle `T`; yields `T?`.
    New { type_: TypeDecl },
    /// `delete x` for pointers, arrays, and tables.
    Delete { subexpr: Box<Expression> },
    /// `push(array, value[, at])`.
    Push { args: Vec<Expression> },
    /// `resize(array, new_size)`.
    Resize { args: Vec<Expression> },
    /// `reserve(array, capacity)`.
    Reserve { args: Vec<Expression> },
    /// `erase(array, index)` or `erase(table, key)`.
    Erase { args: Vec<Expression> },
    /// `find(table, key)`; array find is rejected at inference.
    Find { args: Vec<Expression> },
    /// `keys(table)` — iterator over key references.
    Keys { args: Vec<Expression> },
    /// `values(table)` — iterator over value references.
    Values { args: Vec<Expression> },
    /// `invoke(block)`.
    Invoke { args: Vec<Expression> },
    /// Captures the current frame into a block value.
    MakeBlock { block: Box<Expression> },
    Call {
        name: String,
        args: Vec<Expression>,
        resolved: Option<CallTarget>,
    },
    IfThenElse {
        cond: Box<Expression>,
        if_true: Box<Expression>,
        if_false: Option<Box<Expression>>,
    },
    While {
        cond: Box<Expression>,
        body: Box<Expression>,
    },
    /// `for a, b in src1, src2 [where filter]` — lock-step parallel
    /// iteration until the shortest source ends.
    For {
        iterators: Vec<String>,
        sources: Vec<Expression>,
        body: Box<Expression>,
        filter: Option<Box<Expression>>,
        iter_vars: Vec<IterVar>,
        fixed_size: u32,
    },
    Let {
        variables: Vec<Variable>,
        subexpr: Option<Box<Expression>>,
        /// Scoped lets pop their locals at block exit.
        scoped: bool,
        returns_value: bool,
    },
    Block {
        list: Vec<Expression>,
        /// Set when the block is captured by `MakeBlock`.
        closure: bool,
        /// Set when the block's tail expression is its value.
        returns_value: bool,
    },
    Return { subexpr: Option<Box<Expression>> },
    Break,
    Continue,
    TryCatch {
        try_block: Box<Expression>,
        catch_block: Box<Expression>,
    },
}

/// One node of the tree: location, inferred type, and the variant payload.
#[derive(Debug, Clone)]
pub struct Expression {
    pub at: LineInfo,
    /// Filled in by inference; `None` before, and left `None` on nodes whose
    /// inference failed so dependents fail quietly.
    pub type_: Option<TypeDecl>,
    pub kind: ExprKind,
}

impl Expression {
    #[must_use]
    pub fn new(at: LineInfo, kind: ExprKind) -> Self {
        Self {
            at,
            type_: None,
            kind,
        }
    }

    // ---- constructors the parser (and tests) build trees with ----

    #[must_use]
    pub fn const_bool(at: LineInfo, v: bool) -> Self {
        Self::new(at, ExprKind::ConstBool(v))
    }

    #[must_use]
    pub fn const_int(at: LineInfo, v: i32) -> Self {
        Self::new(at, ExprKind::ConstInt(v))
    }

    #[must_use]
    pub fn const_uint(at: LineInfo, v: u32) -> Self {
        Self::new(at, ExprKind::ConstUInt(v))
    }

    #[must_use]
    pub fn const_int64(at: LineInfo, v: i64) -> Self {
        Self::new(at, ExprKind::ConstInt64(v))
    }

    #[must_use]
    pub fn const_uint64(at: LineInfo, v: u64) -> Self {
        Self::new(at, ExprKind::ConstUInt64(v))
    }

    #[must_use]
    pub fn const_float(at: LineInfo, v: f32) -> Self {
        Self::new(at, ExprKind::ConstFloat(v))
    }

    #[must_use]
    pub fn const_double(at: LineInfo, v: f64) -> Self {
        Self::new(at, ExprKind::ConstDouble(v))
    }

    #[must_use]
    pub fn const_string(at: LineInfo, v: impl Into<String>) -> Self {
        Self::new(at, ExprKind::ConstString(v.into()))
    }

    #[must_use]
    pub fn null_ptr(at: LineInfo) -> Self {
        Self::new(at, ExprKind::ConstPtr)
    }

    #[must_use]
    pub fn var(at: LineInfo, name: impl Into<String>) -> Self {
        Self::new(
            at,
            ExprKind::Var {
                name: name.into(),
                resolved: VarRef::Unresolved,
            },
        )
    }

    #[must_use]
    pub fn field(at: LineInfo, value: Self, name: impl Into<String>) -> Self {
        Self::new(
            at,
            ExprKind::Field {
                value: Box::new(value),
                name: name.into(),
                resolved: None,
            },
        )
    }

    #[must_use]
    pub fn safe_field(at: LineInfo, value: Self, name: impl Into<String>) -> Self {
        Self::new(
            at,
            ExprKind::SafeField {
                value: Box::new(value),
                name: name.into(),
                resolved: None,
                skip_wrap: false,
            },
        )
    }

    #[must_use]
    pub fn at_index(at: LineInfo, subexpr: Self, index: Self) -> Self {
        Self::new(
            at,
            ExprKind::At {
                subexpr: Box::new(subexpr),
                index: Box::new(index),
            },
        )
    }

    #[must_use]
    pub fn ptr2ref(at: LineInfo, subexpr: Self) -> Self {
        Self::new(
            at,
            ExprKind::Ptr2Ref {
                subexpr: Box::new(subexpr),
            },
        )
    }

    #[must_use]
    pub fn addr_of(at: LineInfo, subexpr: Self) -> Self {
        Self::new(
            at,
            ExprKind::Ref2Ptr {
                subexpr: Box::new(subexpr),
            },
        )
    }

    #[must_use]
    pub fn null_coalescing(at: LineInfo, subexpr: Self, default: Self) -> Self {
        Self::new(
            at,
            ExprKind::NullCoalescing {
                subexpr: Box::new(subexpr),
                default: Box::new(default),
            },
        )
    }

    #[must_use]
    pub fn op1(at: LineInfo, op: Operator, subexpr: Self) -> Self {
        Self::new(
            at,
            ExprKind::Op1 {
                op,
                subexpr: Box::new(subexpr),
                resolved: None,
            },
        )
    }

    #[must_use]
    pub fn op2(at: LineInfo, op: Operator, left: Self, right: Self) -> Self {
        Self::new(
            at,
            ExprKind::Op2 {
                op,
                left: Box::new(left),
                right: Box::new(right),
                resolved: None,
            },
        )
    }

    #[must_use]
    pub fn op3(at: LineInfo, cond: Self, left: Self, right: Self) -> Self {
        Self::new(
            at,
            ExprKind::Op3 {
                cond: Box::new(cond),
                left: Box::new(left),
                right: Box::new(right),
            },
        )
    }

    #[must_use]
    pub fn copy(at: LineInfo, left: Self, right: Self) -> Self {
        Self::new(
            at,
            ExprKind::Copy {
                left: Box::new(left),
                right: Box::new(right),
            },
        )
    }

    #[must_use]
    pub fn move_(at: LineInfo, left: Self, right: Self) -> Self {
        Self::new(
            at,
            ExprKind::Move {
                left: Box::new(left),
                right: Box::new(right),
            },
        )
    }

    #[must_use]
    pub fn size_of(at: LineInfo, subexpr: Self) -> Self {
        Self::new(
            at,
            ExprKind::SizeOf {
                subexpr: Box::new(subexpr),
                resolved: None,
            },
        )
    }

    #[must_use]
    pub fn new_value(at: LineInfo, type_: TypeDecl) -> Self {
        Self::new(at, ExprKind::New { type_ })
    }

    #[must_use]
    pub fn delete(at: LineInfo, subexpr: Self) -> Self {
        Self::new(
            at,
            ExprKind::Delete {
                subexpr: Box::new(subexpr),
            },
        )
    }

    #[must_use]
    pub fn make_block(at: LineInfo, block: Self) -> Self {
        Self::new(
            at,
            ExprKind::MakeBlock {
                block: Box::new(block),
            },
        )
    }

    #[must_use]
    pub fn call(at: LineInfo, name: impl Into<String>, args: Vec<Self>) -> Self {
        Self::new(
            at,
            ExprKind::Call {
                name: name.into(),
                args,
                resolved: None,
            },
        )
    }

    #[must_use]
    pub fn if_then_else(at: LineInfo, cond: Self, if_true: Self, if_false: Option<Self>) -> Self {
        Self::new(
            at,
            ExprKind::IfThenElse {
                cond: Box::new(cond),
                if_true: Box::new(if_true),
                if_false: if_false.map(Box::new),
            },
        )
    }

    #[must_use]
    pub fn while_loop(at: LineInfo, cond: Self, body: Self) -> Self {
        Self::new(
            at,
            ExprKind::While {
                cond: Box::new(cond),
                body: Box::new(body),
            },
        )
    }

    #[must_use]
    pub fn for_loop(
        at: LineInfo,
        iterators: Vec<String>,
        sources: Vec<Self>,
        body: Self,
        filter: Option<Self>,
    ) -> Self {
        Self::new(
            at,
            ExprKind::For {
                iterators,
                sources,
                body: Box::new(body),
                filter: filter.map(Box::new),
                iter_vars: Vec::new(),
                fixed_size: 0,
            },
        )
    }

    #[must_use]
    pub fn let_in(at: LineInfo, variables: Vec<Variable>, subexpr: Option<Self>) -> Self {
        Self::new(
            at,
            ExprKind::Let {
                variables,
                subexpr: subexpr.map(Box::new),
                scoped: true,
                returns_value: false,
            },
        )
    }

    #[must_use]
    pub fn block(at: LineInfo, list: Vec<Self>) -> Self {
        Self::new(
            at,
            ExprKind::Block {
                list,
                closure: false,
                returns_value: false,
            },
        )
    }

    #[must_use]
    pub fn ret(at: LineInfo, subexpr: Option<Self>) -> Self {
        Self::new(
            at,
            ExprKind::Return {
                subexpr: subexpr.map(Box::new),
            },
        )
    }

    #[must_use]
    pub fn brk(at: LineInfo) -> Self {
        Self::new(at, ExprKind::Break)
    }

    #[must_use]
    pub fn cont(at: LineInfo) -> Self {
        Self::new(at, ExprKind::Continue)
    }

    #[must_use]
    pub fn try_catch(at: LineInfo, try_block: Self, catch_block: Self) -> Self {
        Self::new(
            at,
            ExprKind::TryCatch {
                try_block: Box::new(try_block),
                catch_block: Box::new(catch_block),
            },
        )
    }

    // ---- shared queries ----

    /// Fills the argument list of any call-shaped node; used with the
    /// intrinsic factories returned by [`crate::Program::make_call`].
    #[must_use]
    pub fn with_call_args(mut self, new_args: Vec<Self>) -> Self {
        match &mut self.kind {
            ExprKind::Assert { args }
            | ExprKind::Debug { args }
            | ExprKind::Hash { args }
            | ExprKind::Push { args }
            | ExprKind::Resize { args }
            | ExprKind::Reserve { args }
            | ExprKind::Erase { args }
            | ExprKind::Find { args }
            | ExprKind::Keys { args }
            | ExprKind::Values { args }
            | ExprKind::Invoke { args }
            | ExprKind::Call { args, .. } => *args = new_args,
            _ => {}
        }
        self
    }

    #[must_use]
    pub fn is_string_constant(&self) -> bool {
        matches!(self.kind, ExprKind::ConstString(_))
    }

    #[must_use]
    pub fn is_sequence(&self) -> bool {
        matches!(self.kind, ExprKind::Sequence { .. })
    }

    /// Marks a block (or trailing let) as yielding the value of its tail
    /// expression. Applied before inference by whoever consumes the value.
    pub fn set_block_returns_value(&mut self) {
        match &mut self.kind {
            ExprKind::Block { list, returns_value, .. } => {
                *returns_value = true;
                if let Some(tail) = list.last_mut() {
                    tail.set_block_returns_value();
                }
            }
            ExprKind::Let {
                subexpr, returns_value, ..
            } => {
                *returns_value = true;
                if let Some(sub) = subexpr {
                    sub.set_block_returns_value();
                }
            }
            _ => {}
        }
    }

    /// Which control-flow interruptions evaluating this node may leave set.
    /// Loops swallow break/continue, try/catch swallows throw, and a captured
    /// block contributes nothing at its creation site.
    #[must_use]
    pub fn eval_flags(&self) -> EvalFlags {
        let mut flags = EvalFlags::empty();
        match &self.kind {
            ExprKind::Return { subexpr } => {
                if let Some(sub) = subexpr {
                    flags |= sub.eval_flags();
                }
                flags |= EvalFlags::RETURN;
            }
            ExprKind::Break => flags |= EvalFlags::BREAK,
            ExprKind::Continue => flags |= EvalFlags::CONTINUE,
            ExprKind::While { cond, body } => {
                flags |= cond.eval_flags();
                flags |= body.eval_flags() & !(EvalFlags::BREAK | EvalFlags::CONTINUE);
            }
            ExprKind::For {
                sources, body, filter, ..
            } => {
                for src in sources {
                    flags |= src.eval_flags();
                }
                if let Some(f) = filter {
                    flags |= f.eval_flags() & !(EvalFlags::BREAK | EvalFlags::CONTINUE);
                }
                flags |= body.eval_flags() & !(EvalFlags::BREAK | EvalFlags::CONTINUE);
            }
            ExprKind::TryCatch {
                try_block,
                catch_block,
            } => {
                flags |= (try_block.eval_flags() | catch_block.eval_flags()) & !EvalFlags::THROW;
            }
            ExprKind::MakeBlock { .. } => {}
            _ => self.for_each_child(&mut |child| flags |= child.eval_flags()),
        }
        flags
    }

    /// Calls `f` for each direct child, in evaluation order.
    pub(crate) fn for_each_child(&self, f: &mut impl FnMut(&Self)) {
        match &self.kind {
            ExprKind::ConstBool(_)
            | ExprKind::ConstInt(_)
            | ExprKind::ConstUInt(_)
            | ExprKind::ConstInt64(_)
            | ExprKind::ConstUInt64(_)
            | ExprKind::ConstFloat(_)
            | ExprKind::ConstDouble(_)
            | ExprKind::ConstString(_)
            | ExprKind::ConstPtr
            | ExprKind::ConstEnum { .. }
            | ExprKind::Var { .. }
            | ExprKind::New { .. }
            | ExprKind::Break
            | ExprKind::Continue => {}
            ExprKind::Field { value, .. } | ExprKind::SafeField { value, .. } => f(value),
            ExprKind::At { subexpr, index } => {
                f(subexpr);
                f(index);
            }
            ExprKind::Ref2Value { subexpr }
            | ExprKind::Ptr2Ref { subexpr }
            | ExprKind::Ref2Ptr { subexpr }
            | ExprKind::Delete { subexpr }
            | ExprKind::SizeOf { subexpr, .. }
            | ExprKind::Op1 { subexpr, .. } => f(subexpr),
            ExprKind::NullCoalescing { subexpr, default } => {
                f(subexpr);
                f(default);
            }
            ExprKind::Op2 { left, right, .. }
            | ExprKind::Copy { left, right }
            | ExprKind::Move { left, right }
            | ExprKind::Sequence { left, right } => {
                f(left);
                f(right);
            }
            ExprKind::Op3 { cond, left, right } => {
                f(cond);
                f(left);
                f(right);
            }
            ExprKind::Assert { args }
            | ExprKind::Debug { args }
            | ExprKind::Hash { args }
            | ExprKind::Push { args }
            | ExprKind::Resize { args }
            | ExprKind::Reserve { args }
            | ExprKind::Erase { args }
            | ExprKind::Find { args }
            | ExprKind::Keys { args }
            | ExprKind::Values { args }
            | ExprKind::Invoke { args }
            | ExprKind::Call { args, .. } => {
                for arg in args {
                    f(arg);
                }
            }
            ExprKind::MakeBlock { block } => f(block),
            ExprKind::IfThenElse {
                cond,
                if_true,
                if_false,
            } => {
                f(cond);
                f(if_true);
                if let Some(e) = if_false {
                    f(e);
                }
            }
            ExprKind::While { cond, body } => {
                f(cond);
                f(body);
            }
            ExprKind::For {
                sources, body, filter, ..
            } => {
                for src in sources {
                    f(src);
                }
                if let Some(filt) = filter {
                    f(filt);
                }
                f(body);
            }
            ExprKind::Let { variables, subexpr, .. } => {
                for var in variables {
                    if let Some(init) = &var.init {
                        f(init);
                    }
                }
                if let Some(sub) = subexpr {
                    f(sub);
                }
            }
            ExprKind::Block { list, .. } => {
                for e in list {
                    f(e);
                }
            }
            ExprKind::Return { subexpr } => {
                if let Some(sub) = subexpr {
                    f(sub);
                }
            }
            ExprKind::TryCatch {
                try_block,
                catch_block,
            } => {
                f(try_block);
                f(catch_block);
            }
        }
    }
}

/// Types of the supplied arguments at a call site, used by overload
/// resolution and diagnostics.
pub(crate) fn argument_types(args: &[Expression]) -> SmallVec<[&TypeDecl; 4]> {
    args.iter().filter_map(|a| a.type_.as_ref()).collect()
}
