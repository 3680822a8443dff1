//! Shared helpers for the integration suites: short constructors and a
//! compile-and-run harness over the public API.
#![allow(dead_code, reason = "each suite uses its own subset of the helpers")]

use dascript::{
    BaseType, Context, Expression, Function, LineInfo, Program, Register, TypeDecl, Variable,
};

pub fn at() -> LineInfo {
    LineInfo::new(1, 1)
}

pub fn int() -> TypeDecl {
    TypeDecl::new(BaseType::Int)
}

pub fn boolean() -> TypeDecl {
    TypeDecl::new(BaseType::Bool)
}

pub fn void() -> TypeDecl {
    TypeDecl::new(BaseType::Void)
}

pub fn float() -> TypeDecl {
    TypeDecl::new(BaseType::Float)
}

pub fn string() -> TypeDecl {
    TypeDecl::new(BaseType::String)
}

pub fn i(v: i32) -> Expression {
    Expression::const_int(at(), v)
}

pub fn var(name: &str) -> Expression {
    Expression::var(at(), name)
}

pub fn block(list: Vec<Expression>) -> Expression {
    Expression::block(at(), list)
}

pub fn ret(value: Expression) -> Expression {
    Expression::ret(at(), Some(value))
}

pub fn local(name: &str, type_: TypeDecl) -> Variable {
    Variable::new(name, type_, at())
}

/// One function named `main` with the given body and result type, inferred.
pub fn program_with_main(body: Expression, result: TypeDecl) -> Program {
    let mut program = Program::new();
    program.add_function(Function::new("main", result, at()).with_body(body));
    program.infer();
    program
}

/// Infers, simulates, and calls `main` with no arguments.
pub fn run_main(body: Expression, result: TypeDecl) -> (Context, Register) {
    let program = program_with_main(body, result);
    assert!(
        !program.failed(),
        "compilation failed: {:#?}",
        program.errors
    );
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").expect("main exists");
    let value = context.eval(main, &[]);
    (context, value)
}

/// Shorthand for scenarios returning `int`.
pub fn run_main_i32(body: Expression) -> i32 {
    run_main(body, int()).1.get::<i32>()
}

/// Shorthand for scenarios returning `bool`.
pub fn run_main_bool(body: Expression) -> bool {
    run_main(body, boolean()).1.get::<bool>()
}
