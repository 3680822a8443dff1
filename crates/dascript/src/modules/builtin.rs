//! The built-in module.
//!
//! Registers the operator overload tables for every numeric type, bool,
//! string, and pointer, the range constructors, and the intrinsic call
//! factories (`assert`, `debug`, `hash`, `invoke`, `push`, `erase`, `find`,
//! `keys`, `values`, `resize`, `reserve`). Every program links this module;
//! overload resolution picks one entry per call site.

use crate::{
    expressions::{ExprKind, Expression, Variable},
    module::{BuiltinImpl, Function, Module},
    register::{RangeVal, Register},
    source::LineInfo,
    typedecl::{BaseType, TypeDecl},
    vm::{
        policy::{Op1Kind, Op2Kind},
        NativeFunction, Vm,
    },
};

const NO_AT: LineInfo = LineInfo { line: 0, column: 0 };

fn arg(name: &str, type_: TypeDecl) -> Variable {
    Variable::new(name, type_, NO_AT)
}

fn add_op1(module: &mut Module, sym: &str, kind: Op1Kind, ty: BaseType, operand: TypeDecl, result: TypeDecl) {
    let func = Function::new(sym, result, NO_AT)
        .with_argument(arg("x", operand))
        .with_builtin(BuiltinImpl::Policy1 { kind, ty });
    module.add_function(func);
}

fn add_op2(
    module: &mut Module,
    sym: &str,
    kind: Op2Kind,
    ty: BaseType,
    left: TypeDecl,
    right: TypeDecl,
    result: TypeDecl,
) {
    let func = Function::new(sym, result, NO_AT)
        .with_argument(arg("x", left))
        .with_argument(arg("y", right))
        .with_builtin(BuiltinImpl::Policy2 { kind, ty });
    module.add_function(func);
}

fn add_native(module: &mut Module, name: &str, args: Vec<Variable>, result: TypeDecl, func: NativeFunction) {
    let mut f = Function::new(name, result, NO_AT).with_builtin(BuiltinImpl::Native(func));
    for a in args {
        f = f.with_argument(a);
    }
    module.add_function(f);
}

/// Arithmetic, comparison, and in-place operators for one numeric type.
fn add_numeric_ops(module: &mut Module, ty: BaseType) {
    let value = || TypeDecl::new(ty);
    let reference = || TypeDecl::new(ty).with_ref();
    let boolean = || TypeDecl::new(BaseType::Bool);
    for (sym, kind) in [
        ("+", Op2Kind::Add),
        ("-", Op2Kind::Sub),
        ("*", Op2Kind::Mul),
        ("/", Op2Kind::Div),
        ("%", Op2Kind::Mod),
    ] {
        add_op2(module, sym, kind, ty, value(), value(), value());
    }
    for (sym, kind) in [
        ("==", Op2Kind::Equ),
        ("!=", Op2Kind::NotEqu),
        ("<", Op2Kind::Less),
        ("<=", Op2Kind::LessEqu),
        (">", Op2Kind::Gt),
        (">=", Op2Kind::GtEqu),
    ] {
        add_op2(module, sym, kind, ty, value(), value(), boolean());
    }
    for (sym, kind) in [
        ("+=", Op2Kind::SetAdd),
        ("-=", Op2Kind::SetSub),
        ("*=", Op2Kind::SetMul),
        ("/=", Op2Kind::SetDiv),
        ("%=", Op2Kind::SetMod),
    ] {
        add_op2(module, sym, kind, ty, reference(), value(), reference());
    }
    add_op1(module, "+", Op1Kind::Unp, ty, value(), value());
    add_op1(module, "-", Op1Kind::Unm, ty, value(), value());
    add_op1(module, "++", Op1Kind::Inc, ty, reference(), reference());
    add_op1(module, "--", Op1Kind::Dec, ty, reference(), reference());
    add_op1(module, "+++", Op1Kind::IncPost, ty, reference(), value());
    add_op1(module, "---", Op1Kind::DecPost, ty, reference(), value());
}

/// Bitwise operators; integers only.
fn add_bit_ops(module: &mut Module, ty: BaseType) {
    let value = || TypeDecl::new(ty);
    let reference = || TypeDecl::new(ty).with_ref();
    for (sym, kind) in [
        ("&", Op2Kind::BinAnd),
        ("|", Op2Kind::BinOr),
        ("^", Op2Kind::BinXor),
    ] {
        add_op2(module, sym, kind, ty, value(), value(), value());
    }
    for (sym, kind) in [
        ("&=", Op2Kind::SetBinAnd),
        ("|=", Op2Kind::SetBinOr),
        ("^=", Op2Kind::SetBinXor),
    ] {
        add_op2(module, sym, kind, ty, reference(), value(), reference());
    }
    add_op1(module, "~", Op1Kind::BinNot, ty, value(), value());
}

/// Elementwise vector operators.
fn add_vector_ops(module: &mut Module, ty: BaseType) {
    let value = || TypeDecl::new(ty);
    let reference = || TypeDecl::new(ty).with_ref();
    let boolean = || TypeDecl::new(BaseType::Bool);
    for (sym, kind) in [
        ("+", Op2Kind::Add),
        ("-", Op2Kind::Sub),
        ("*", Op2Kind::Mul),
        ("/", Op2Kind::Div),
        ("%", Op2Kind::Mod),
    ] {
        add_op2(module, sym, kind, ty, value(), value(), value());
    }
    add_op2(module, "==", Op2Kind::Equ, ty, value(), value(), boolean());
    add_op2(module, "!=", Op2Kind::NotEqu, ty, value(), value(), boolean());
    for (sym, kind) in [
        ("+=", Op2Kind::SetAdd),
        ("-=", Op2Kind::SetSub),
        ("*=", Op2Kind::SetMul),
        ("/=", Op2Kind::SetDiv),
    ] {
        add_op2(module, sym, kind, ty, reference(), value(), reference());
    }
    add_op1(module, "+", Op1Kind::Unp, ty, value(), value());
    add_op1(module, "-", Op1Kind::Unm, ty, value(), value());
}

fn native_range(vm: &mut Vm<'_>, args: &[Register]) -> Register {
    let _ = vm;
    Register::put(RangeVal {
        from: args[0].get::<i32>(),
        to: args[1].get::<i32>(),
    })
}

fn native_urange(vm: &mut Vm<'_>, args: &[Register]) -> Register {
    let _ = vm;
    Register::put(RangeVal {
        from: args[0].get::<u32>() as i32,
        to: args[1].get::<u32>() as i32,
    })
}

/// Builds the built-in module.
#[must_use]
pub fn make_module() -> Module {
    let mut module = Module::new("builtin");

    let numerics = [
        BaseType::Int8,
        BaseType::Int16,
        BaseType::Int,
        BaseType::Int64,
        BaseType::UInt8,
        BaseType::UInt16,
        BaseType::UInt,
        BaseType::UInt64,
        BaseType::Float,
        BaseType::Double,
    ];
    for ty in numerics {
        add_numeric_ops(&mut module, ty);
    }
    for ty in [
        BaseType::Int8,
        BaseType::Int16,
        BaseType::Int,
        BaseType::Int64,
        BaseType::UInt8,
        BaseType::UInt16,
        BaseType::UInt,
        BaseType::UInt64,
    ] {
        add_bit_ops(&mut module, ty);
    }
    for ty in [
        BaseType::Int2,
        BaseType::Int3,
        BaseType::Int4,
        BaseType::UInt2,
        BaseType::UInt3,
        BaseType::UInt4,
        BaseType::Float2,
        BaseType::Float3,
        BaseType::Float4,
    ] {
        add_vector_ops(&mut module, ty);
    }

    // bool logic; `&&` and `||` get short-circuit nodes at lowering
    let boolean = || TypeDecl::new(BaseType::Bool);
    let bool_ref = || TypeDecl::new(BaseType::Bool).with_ref();
    add_op1(&mut module, "!", Op1Kind::BoolNot, BaseType::Bool, boolean(), boolean());
    for (sym, kind) in [
        ("&&", Op2Kind::BoolAnd),
        ("||", Op2Kind::BoolOr),
        ("^^", Op2Kind::BoolXor),
        ("==", Op2Kind::Equ),
        ("!=", Op2Kind::NotEqu),
    ] {
        add_op2(&mut module, sym, kind, BaseType::Bool, boolean(), boolean(), boolean());
    }
    for (sym, kind) in [
        ("&&=", Op2Kind::SetBoolAnd),
        ("||=", Op2Kind::SetBoolOr),
        ("^^=", Op2Kind::SetBoolXor),
    ] {
        add_op2(&mut module, sym, kind, BaseType::Bool, bool_ref(), boolean(), bool_ref());
    }

    // strings: concatenation and ordering
    let string = || TypeDecl::new(BaseType::String);
    add_op2(
        &mut module,
        "+",
        Op2Kind::Add,
        BaseType::String,
        string(),
        string(),
        string(),
    );
    for (sym, kind) in [
        ("==", Op2Kind::Equ),
        ("!=", Op2Kind::NotEqu),
        ("<", Op2Kind::Less),
        ("<=", Op2Kind::LessEqu),
        (">", Op2Kind::Gt),
        (">=", Op2Kind::GtEqu),
    ] {
        add_op2(
            &mut module,
            sym,
            kind,
            BaseType::String,
            string(),
            string(),
            TypeDecl::new(BaseType::Bool),
        );
    }

    // pointer identity
    let pointer = TypeDecl::void_pointer;
    add_op2(
        &mut module,
        "==",
        Op2Kind::Equ,
        BaseType::Pointer,
        pointer(),
        pointer(),
        TypeDecl::new(BaseType::Bool),
    );
    add_op2(
        &mut module,
        "!=",
        Op2Kind::NotEqu,
        BaseType::Pointer,
        pointer(),
        pointer(),
        TypeDecl::new(BaseType::Bool),
    );

    // range constructors
    add_native(
        &mut module,
        "range",
        vec![arg("from", TypeDecl::new(BaseType::Int)), arg("to", TypeDecl::new(BaseType::Int))],
        TypeDecl::new(BaseType::Range),
        native_range,
    );
    add_native(
        &mut module,
        "urange",
        vec![arg("from", TypeDecl::new(BaseType::UInt)), arg("to", TypeDecl::new(BaseType::UInt))],
        TypeDecl::new(BaseType::URange),
        native_urange,
    );

    // intrinsic call factories
    module.add_call_factory("assert", |at| Expression::new(at, ExprKind::Assert { args: Vec::new() }));
    module.add_call_factory("debug", |at| Expression::new(at, ExprKind::Debug { args: Vec::new() }));
    module.add_call_factory("hash", |at| Expression::new(at, ExprKind::Hash { args: Vec::new() }));
    module.add_call_factory("invoke", |at| Expression::new(at, ExprKind::Invoke { args: Vec::new() }));
    module.add_call_factory("push", |at| Expression::new(at, ExprKind::Push { args: Vec::new() }));
    module.add_call_factory("erase", |at| Expression::new(at, ExprKind::Erase { args: Vec::new() }));
    module.add_call_factory("find", |at| Expression::new(at, ExprKind::Find { args: Vec::new() }));
    module.add_call_factory("keys", |at| Expression::new(at, ExprKind::Keys { args: Vec::new() }));
    module.add_call_factory("values", |at| Expression::new(at, ExprKind::Values { args: Vec::new() }));
    module.add_call_factory("resize", |at| Expression::new(at, ExprKind::Resize { args: Vec::new() }));
    module.add_call_factory("reserve", |at| {
        Expression::new(at, ExprKind::Reserve { args: Vec::new() })
    });

    module
}
