//! Overload resolution rules: arity with defaults, reference parameters,
//! const monotonicity, and the exactly-one-candidate requirement.

mod common;

use common::*;
use dascript::{
    CompilationError, Context, Expression, Function, Operator, Program, TypeDecl, Variable,
};
use pretty_assertions::assert_eq;

fn arg(name: &str, type_: TypeDecl) -> Variable {
    Variable::new(name, type_, at())
}

#[test]
fn overloads_pick_by_argument_types() {
    let mut program = Program::new();
    program.add_function(
        Function::new("pick", int(), at())
            .with_argument(arg("x", int()))
            .with_body(block(vec![ret(i(1))])),
    );
    program.add_function(
        Function::new("pick", int(), at())
            .with_argument(arg("x", float()))
            .with_body(block(vec![ret(i(2))])),
    );
    program.add_function(
        Function::new("main", int(), at()).with_body(block(vec![ret(Expression::op2(
            at(),
            Operator::Add,
            Expression::call(at(), "pick", vec![i(0)]),
            Expression::op2(
                at(),
                Operator::Mul,
                Expression::call(at(), "pick", vec![Expression::const_float(at(), 0.0)]),
                i(10),
            ),
        ))])),
    );
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert_eq!(context.eval(main, &[]).get::<i32>(), 21);
}

#[test]
fn trailing_parameters_need_defaults() {
    let mut program = Program::new();
    program.add_function(
        Function::new("f", int(), at())
            .with_argument(arg("x", int()))
            .with_argument(arg("y", int()))
            .with_body(block(vec![ret(Expression::op2(
                at(),
                Operator::Add,
                var("x"),
                var("y"),
            ))])),
    );
    program.add_function(
        Function::new("main", int(), at())
            .with_body(block(vec![ret(Expression::call(at(), "f", vec![i(1)]))])),
    );
    program.infer();
    assert!(program.failed());
    assert!(
        program
            .errors
            .iter()
            .any(|e| e.cerr == CompilationError::FunctionNotFound)
    );
}

#[test]
fn reference_parameters_require_reference_arguments() {
    let mut program = Program::new();
    // bump(x: int&) { x += 1 }
    program.add_function(
        Function::new("bump", void(), at())
            .with_argument(arg("x", int().with_ref()))
            .with_body(block(vec![Expression::op2(
                at(),
                Operator::AddAssign,
                var("x"),
                i(1),
            )])),
    );
    // calling with a literal (an rvalue) matches nothing
    program.add_function(
        Function::new("main", int(), at()).with_body(block(vec![
            Expression::call(at(), "bump", vec![i(1)]),
            ret(i(0)),
        ])),
    );
    program.infer();
    assert!(program.failed());
    assert!(
        program
            .errors
            .iter()
            .any(|e| e.cerr == CompilationError::FunctionNotFound)
    );
}

#[test]
fn reference_parameters_mutate_the_caller_local() {
    let mut program = Program::new();
    program.add_function(
        Function::new("bump", void(), at())
            .with_argument(arg("x", int().with_ref()))
            .with_body(block(vec![Expression::op2(
                at(),
                Operator::AddAssign,
                var("x"),
                i(1),
            )])),
    );
    let body = Expression::let_in(
        at(),
        vec![local("n", int()).with_init(i(41))],
        Some(block(vec![
            Expression::call(at(), "bump", vec![var("n")]),
            ret(var("n")),
        ])),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert_eq!(context.eval(main, &[]).get::<i32>(), 42);
}

#[test]
fn reference_parameters_never_drop_const() {
    let mut program = Program::new();
    program.add_function(
        Function::new("mutate", void(), at())
            .with_argument(arg("x", int().with_ref()))
            .with_body(block(vec![Expression::op2(
                at(),
                Operator::AddAssign,
                var("x"),
                i(1),
            )])),
    );
    // a const local is a const reference; passing it must not match
    let body = Expression::let_in(
        at(),
        vec![local("c", int().with_const()).with_init(i(1))],
        Some(block(vec![
            Expression::call(at(), "mutate", vec![var("c")]),
            ret(i(0)),
        ])),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(program.failed());
    assert!(
        program
            .errors
            .iter()
            .any(|e| e.cerr == CompilationError::FunctionNotFound)
    );
}

#[test]
fn ambiguous_calls_are_too_many_matches() {
    let mut program = Program::new();
    // two overloads differing only in constness both accept an int argument
    program.add_function(
        Function::new("amb", int(), at())
            .with_argument(arg("x", int()))
            .with_body(block(vec![ret(i(1))])),
    );
    program.add_function(
        Function::new("amb", int(), at())
            .with_argument(arg("x", int().with_const()))
            .with_body(block(vec![ret(i(2))])),
    );
    program.add_function(
        Function::new("main", int(), at())
            .with_body(block(vec![ret(Expression::call(at(), "amb", vec![i(1)]))])),
    );
    program.infer();
    assert!(program.failed());
    let err = program
        .errors
        .iter()
        .find(|e| e.cerr == CompilationError::FunctionNotFound)
        .expect("ambiguity diagnostic");
    assert!(err.what.contains("too many matching"), "{}", err.what);
    assert!(err.what.contains("candidate"), "{}", err.what);
}

#[test]
fn matching_set_is_a_function_of_the_types_alone() {
    // property 3: the same library and argument types always produce the
    // same matching set
    let program = Program::new();
    let int_t = int();
    let args = [&int_t, &int_t];
    let first: Vec<String> = program
        .library
        .find_matching_functions("+", &args)
        .iter()
        .map(|f| f.mangled_name())
        .collect();
    for _ in 0..8 {
        let again: Vec<String> = program
            .library
            .find_matching_functions("+", &args)
            .iter()
            .map(|f| f.mangled_name())
            .collect();
        assert_eq!(first, again);
    }
    assert_eq!(first.len(), 1, "{first:?}");
}

#[test]
fn user_operator_overloads_resolve_like_builtins() {
    let mut program = Program::new();
    let foo = program
        .add_structure(dascript::Structure::with_fields(
            "Pair",
            at(),
            vec![
                dascript::FieldDeclaration::new("a", int(), at()),
                dascript::FieldDeclaration::new("b", int(), at()),
            ],
        ))
        .unwrap();
    let pair = TypeDecl::structure(foo);
    // operator +(p: Pair, q: Pair): int
    program.add_function(
        Function::new("+", int(), at())
            .with_argument(arg("p", pair.clone()))
            .with_argument(arg("q", pair.clone()))
            .with_body(block(vec![ret(Expression::op2(
                at(),
                Operator::Add,
                Expression::field(at(), var("p"), "a"),
                Expression::field(at(), var("q"), "b"),
            ))])),
    );
    let body = Expression::let_in(
        at(),
        vec![local("x", pair.clone()), local("y", pair)],
        Some(block(vec![
            Expression::copy(at(), Expression::field(at(), var("x"), "a"), i(40)),
            Expression::copy(at(), Expression::field(at(), var("y"), "b"), i(2)),
            ret(Expression::op2(at(), Operator::Add, var("x"), var("y"))),
        ])),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert_eq!(context.eval(main, &[]).get::<i32>(), 42);
}
