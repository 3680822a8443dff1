//! Inference diagnostics: every scenario checks both that compilation fails
//! and that the expected error kind was recorded, and that a failed program
//! refuses to simulate.

mod common;

use common::*;
use dascript::{
    CompilationError, Context, Expression, Function, Operator, Program, TypeDecl, Variable,
};

fn op(o: Operator, l: Expression, r: Expression) -> Expression {
    Expression::op2(at(), o, l, r)
}

fn expect_error(program: &mut Program, kind: CompilationError) {
    program.infer();
    assert!(program.failed(), "expected a compile error");
    assert!(
        program.errors.iter().any(|e| e.cerr == kind),
        "expected {kind:?} in {:#?}",
        program.errors
    );
    let mut context = Context::new();
    assert!(!program.simulate(&mut context), "failed programs must not simulate");
}

fn main_with(body: Expression, result: TypeDecl) -> Program {
    let mut program = Program::new();
    program.add_function(Function::new("main", result, at()).with_body(body));
    program
}

#[test]
fn unknown_variable() {
    let mut program = main_with(block(vec![ret(var("nope"))]), int());
    expect_error(&mut program, CompilationError::VariableNotFound);
}

#[test]
fn condition_must_be_boolean() {
    let body = block(vec![
        Expression::if_then_else(at(), i(1), ret(i(1)), None),
        ret(i(0)),
    ]);
    let mut program = main_with(body, int());
    expect_error(&mut program, CompilationError::ConditionMustBeBool);
}

#[test]
fn cant_write_to_a_value() {
    let body = block(vec![Expression::copy(at(), i(1), i(2)), ret(i(0))]);
    let mut program = main_with(body, int());
    expect_error(&mut program, CompilationError::CantWriteToNonReference);
}

#[test]
fn cant_write_through_const() {
    let body = Expression::let_in(
        at(),
        vec![local("c", int().with_const()).with_init(i(1))],
        Some(block(vec![Expression::copy(at(), var("c"), i(2)), ret(i(0))])),
    );
    let mut program = main_with(body, int());
    expect_error(&mut program, CompilationError::CantWriteToConst);
}

#[test]
fn move_of_copyable_type_is_rejected() {
    let body = Expression::let_in(
        at(),
        vec![local("a", int()), local("b", int())],
        Some(block(vec![
            Expression::move_(at(), var("a"), var("b")),
            ret(i(0)),
        ])),
    );
    let mut program = main_with(body, int());
    expect_error(&mut program, CompilationError::CantMove);
}

#[test]
fn copy_of_array_is_rejected() {
    let array = || TypeDecl::array_of(int());
    let body = Expression::let_in(
        at(),
        vec![local("a", array()), local("b", array())],
        Some(block(vec![
            Expression::copy(at(), var("a"), var("b")),
            ret(i(0)),
        ])),
    );
    let mut program = main_with(body, int());
    expect_error(&mut program, CompilationError::CantCopy);
}

#[test]
fn break_outside_a_loop() {
    let body = block(vec![Expression::brk(at()), ret(i(0))]);
    let mut program = main_with(body, int());
    expect_error(&mut program, CompilationError::InvalidBlock);
}

#[test]
fn continue_outside_a_loop() {
    let body = block(vec![Expression::cont(at()), ret(i(0))]);
    let mut program = main_with(body, int());
    expect_error(&mut program, CompilationError::InvalidBlock);
}

#[test]
fn value_block_may_not_return_out() {
    // invoke(make_block { return 1 }) with a value-returning block
    let mut program = Program::new();
    let mut inner = block(vec![ret(i(1))]);
    inner.set_block_returns_value();
    let invoke = program
        .make_call(at(), "invoke")
        .with_call_args(vec![Expression::make_block(at(), inner)]);
    program.add_function(
        Function::new("main", int(), at()).with_body(block(vec![invoke, ret(i(0))])),
    );
    expect_error(&mut program, CompilationError::InvalidBlock);
}

#[test]
fn new_of_primitive_is_rejected() {
    let body = block(vec![
        Expression::new_value(at(), int()),
        ret(i(0)),
    ]);
    let mut program = main_with(body, int());
    expect_error(&mut program, CompilationError::InvalidNewType);
}

#[test]
fn find_over_arrays_is_rejected() {
    let mut program = Program::new();
    let find = program
        .make_call(at(), "find")
        .with_call_args(vec![var("v"), i(1)]);
    let body = Expression::let_in(
        at(),
        vec![local("v", TypeDecl::array_of(int()))],
        Some(block(vec![find, ret(i(0))])),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    expect_error(&mut program, CompilationError::FunctionNotFound);
}

#[test]
fn local_references_are_rejected() {
    let body = Expression::let_in(
        at(),
        vec![local("r", int().with_ref())],
        Some(block(vec![ret(i(0))])),
    );
    let mut program = main_with(body, int());
    expect_error(&mut program, CompilationError::InvalidVariableType);
}

#[test]
fn void_return_takes_no_value() {
    let body = block(vec![ret(i(1))]);
    let mut program = main_with(body, void());
    expect_error(&mut program, CompilationError::NotExpectingReturnValue);
}

#[test]
fn non_void_return_needs_a_value() {
    let body = block(vec![Expression::ret(at(), None)]);
    let mut program = main_with(body, int());
    expect_error(&mut program, CompilationError::ExpectingReturnValue);
}

#[test]
fn return_type_must_match() {
    let body = block(vec![ret(Expression::const_float(at(), 1.0))]);
    let mut program = main_with(body, int());
    expect_error(&mut program, CompilationError::InvalidReturnType);
}

#[test]
fn structure_locals_do_not_return_by_value() {
    // f(): Point { let q: Point; return q } — structures never load into a
    // register, so the local stays a reference and a reference into the
    // dying frame cannot satisfy the declared by-value result
    let mut program = Program::new();
    let point = program
        .add_structure(dascript::Structure::with_fields(
            "Point",
            at(),
            vec![dascript::FieldDeclaration::new("x", int(), at())],
        ))
        .unwrap();
    let point_type = TypeDecl::structure(point);
    let body = Expression::let_in(
        at(),
        vec![local("q", point_type.clone())],
        Some(block(vec![ret(var("q"))])),
    );
    program.add_function(Function::new("f", point_type, at()).with_body(body));
    program.add_function(
        Function::new("main", int(), at()).with_body(block(vec![ret(i(0))])),
    );
    expect_error(&mut program, CompilationError::InvalidReturnType);
}

#[test]
fn mixed_operand_types_have_no_operator() {
    let body = block(vec![ret(op(
        Operator::Add,
        i(1),
        Expression::const_float(at(), 2.0),
    ))]);
    let mut program = main_with(body, int());
    expect_error(&mut program, CompilationError::OperatorNotFound);
}

#[test]
fn table_index_key_type_must_match() {
    let body = Expression::let_in(
        at(),
        vec![local("t", TypeDecl::table_of(string(), int()))],
        Some(block(vec![ret(Expression::at_index(at(), var("t"), i(1)))])),
    );
    let mut program = main_with(body, int());
    expect_error(&mut program, CompilationError::InvalidIndexType);
}

#[test]
fn duplicate_declarations_are_diagnosed() {
    let mut program = Program::new();
    program.add_variable(Variable::new("g", int(), at()));
    program.add_variable(Variable::new("g", int(), at()));
    assert!(program.failed());
    assert!(
        program
            .errors
            .iter()
            .any(|e| e.cerr == CompilationError::GlobalVariableAlreadyDeclared)
    );

    let mut program = Program::new();
    let make = || {
        Function::new("f", int(), at())
            .with_argument(Variable::new("x", int(), at()))
            .with_body(block(vec![ret(var("x"))]))
    };
    program.add_function(make());
    program.add_function(make());
    assert!(program.failed());
    assert!(
        program
            .errors
            .iter()
            .any(|e| e.cerr == CompilationError::FunctionAlreadyDeclared)
    );
}

#[test]
fn inference_reports_multiple_diagnostics_in_one_pass() {
    // two independent mistakes, both reported
    let body = block(vec![
        Expression::copy(at(), i(1), i(2)),
        ret(var("nope")),
    ]);
    let mut program = main_with(body, int());
    program.infer();
    assert!(program.failed());
    assert!(program.errors.len() >= 2, "{:#?}", program.errors);
}
