//! Runtime failure semantics: the throw bit, exception messages, try/catch
//! containment, and recovery through restart.

mod common;

use common::*;
use dascript::{Context, EvalFlags, Expression, Function, Operator, Program, TypeDecl};
use pretty_assertions::assert_eq;

fn op(o: Operator, l: Expression, r: Expression) -> Expression {
    Expression::op2(at(), o, l, r)
}

fn compile(program: &mut Program) -> (Context, u32) {
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    (context, main)
}

#[test]
fn division_by_zero_throws_through_the_call() {
    // S4: f() { return 10 / 0 }; main calls f, gets a zero register and the
    // exception message
    let mut program = Program::new();
    program.add_function(
        Function::new("f", int(), at())
            .with_body(block(vec![ret(op(Operator::Div, i(10), i(0)))])),
    );
    program.add_function(
        Function::new("main", int(), at())
            .with_body(block(vec![ret(Expression::call(at(), "f", vec![]))])),
    );
    let (mut context, main) = compile(&mut program);
    let value = context.eval(main, &[]);
    assert_eq!(value.get::<i32>(), 0);
    assert_eq!(context.exception(), Some("division by zero"));
    assert!(context.stop_flags().contains(EvalFlags::THROW));
}

#[test]
fn modulo_by_zero_throws_too() {
    let body = block(vec![ret(op(Operator::Mod, i(10), i(0)))]);
    let mut program = Program::new();
    program.add_function(Function::new("main", int(), at()).with_body(body));
    let (mut context, main) = compile(&mut program);
    context.eval(main, &[]);
    assert_eq!(context.exception(), Some("division by zero"));
}

#[test]
fn assert_failure_reports_its_message() {
    let mut program = Program::new();
    let check = program.make_call(at(), "assert").with_call_args(vec![
        Expression::const_bool(at(), false),
        Expression::const_string(at(), "boom"),
    ]);
    program.add_function(
        Function::new("main", int(), at()).with_body(block(vec![check, ret(i(1))])),
    );
    let (mut context, main) = compile(&mut program);
    let value = context.eval(main, &[]);
    assert_eq!(value.get::<i32>(), 0);
    assert_eq!(context.exception(), Some("boom"));
}

#[test]
fn array_index_out_of_range_throws() {
    let mut program = Program::new();
    let push = program
        .make_call(at(), "push")
        .with_call_args(vec![var("v"), i(1)]);
    let body = Expression::let_in(
        at(),
        vec![local("v", TypeDecl::array_of(int()))],
        Some(block(vec![
            push,
            ret(Expression::at_index(at(), var("v"), i(5))),
        ])),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    let (mut context, main) = compile(&mut program);
    context.eval(main, &[]);
    assert_eq!(context.exception(), Some("index out of range"));
}

#[test]
fn fixed_dim_bounds_are_checked() {
    let body = Expression::let_in(
        at(),
        vec![local("a", int().with_dim(&[2]))],
        Some(block(vec![ret(Expression::at_index(at(), var("a"), i(7)))])),
    );
    let mut program = Program::new();
    program.add_function(Function::new("main", int(), at()).with_body(body));
    let (mut context, main) = compile(&mut program);
    context.eval(main, &[]);
    assert_eq!(context.exception(), Some("index out of range"));
}

#[test]
fn null_dereference_throws() {
    let body = Expression::let_in(
        at(),
        vec![local("p", TypeDecl::pointer_to(int()))],
        Some(block(vec![ret(Expression::ptr2ref(at(), var("p")))])),
    );
    let mut program = Program::new();
    program.add_function(Function::new("main", int(), at()).with_body(body));
    let (mut context, main) = compile(&mut program);
    context.eval(main, &[]);
    assert_eq!(context.exception(), Some("dereferencing null pointer"));
}

#[test]
fn runaway_recursion_overflows_the_stack() {
    let mut program = Program::new();
    program.add_function(
        Function::new("rec", int(), at()).with_body(block(vec![ret(op(
            Operator::Add,
            Expression::call(at(), "rec", vec![]),
            i(1),
        ))])),
    );
    program.add_function(
        Function::new("main", int(), at())
            .with_body(block(vec![ret(Expression::call(at(), "rec", vec![]))])),
    );
    let (mut context, main) = compile(&mut program);
    context.eval(main, &[]);
    assert_eq!(context.exception(), Some("stack overflow"));
}

#[test]
fn try_catch_consumes_only_the_throw() {
    // try { 1/0 } catch { caught = 1 }; return caught
    let body = Expression::let_in(
        at(),
        vec![local("caught", int()).with_init(i(0))],
        Some(block(vec![
            Expression::try_catch(
                at(),
                block(vec![op(Operator::Div, i(1), i(0))]),
                block(vec![Expression::copy(at(), var("caught"), i(1))]),
            ),
            ret(var("caught")),
        ])),
    );
    let mut program = Program::new();
    program.add_function(Function::new("main", int(), at()).with_body(body));
    let (mut context, main) = compile(&mut program);
    let value = context.eval(main, &[]);
    assert_eq!(value.get::<i32>(), 1);
    assert_eq!(context.exception(), None);
    assert!(context.stop_flags().is_empty());
}

#[test]
fn try_catch_does_not_catch_return() {
    // a return inside try must still return from the function
    let body = block(vec![
        Expression::try_catch(at(), block(vec![ret(i(7))]), block(vec![ret(i(-1))])),
        ret(i(0)),
    ]);
    let mut program = Program::new();
    program.add_function(Function::new("main", int(), at()).with_body(body));
    let (mut context, main) = compile(&mut program);
    assert_eq!(context.eval(main, &[]).get::<i32>(), 7);
}

#[test]
fn throw_in_first_argument_skips_the_rest() {
    // property 6: g is never called once f throws
    let mut program = Program::new();
    program.add_variable(dascript::Variable::new("calls", int(), at()).with_init(i(0)));
    program.add_function(
        Function::new("f", int(), at())
            .with_body(block(vec![ret(op(Operator::Div, i(1), i(0)))])),
    );
    program.add_function(
        Function::new("g", int(), at()).with_body(block(vec![
            op(Operator::AddAssign, var("calls"), i(1)),
            ret(i(2)),
        ])),
    );
    program.add_function(
        Function::new("sum2", int(), at())
            .with_argument(dascript::Variable::new("a", int(), at()))
            .with_argument(dascript::Variable::new("b", int(), at()))
            .with_body(block(vec![ret(op(Operator::Add, var("a"), var("b")))])),
    );
    program.add_function(
        Function::new("main", int(), at()).with_body(block(vec![ret(Expression::call(
            at(),
            "sum2",
            vec![
                Expression::call(at(), "f", vec![]),
                Expression::call(at(), "g", vec![]),
            ],
        ))])),
    );
    program.add_function(
        Function::new("observed", int(), at())
            .with_body(block(vec![ret(var("calls"))])),
    );
    let (mut context, main) = compile(&mut program);
    context.eval(main, &[]);
    assert_eq!(context.exception(), Some("division by zero"));
    // the throw bit blocks further evaluation until restart
    context.restart();
    context.run_init_script();
    let observed = context.find_function("observed").unwrap();
    assert_eq!(context.eval(observed, &[]).get::<i32>(), 0);
}

#[test]
fn locked_arrays_reject_mutation_while_iterated() {
    let mut program = Program::new();
    let seed = program
        .make_call(at(), "push")
        .with_call_args(vec![var("v"), i(1)]);
    let mutate = program
        .make_call(at(), "push")
        .with_call_args(vec![var("v"), i(2)]);
    let body = Expression::let_in(
        at(),
        vec![local("v", TypeDecl::array_of(int()))],
        Some(block(vec![
            seed,
            Expression::for_loop(
                at(),
                vec!["x".to_owned()],
                vec![var("v")],
                mutate,
                None,
            ),
            ret(i(0)),
        ])),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    let (mut context, main) = compile(&mut program);
    context.eval(main, &[]);
    assert_eq!(context.exception(), Some("can't change locked array"));
}

#[test]
fn restart_clears_the_exception_and_the_heap() {
    let mut program = Program::new();
    program.add_function(
        Function::new("main", int(), at())
            .with_body(block(vec![ret(op(Operator::Div, i(1), i(0)))])),
    );
    let (mut context, main) = compile(&mut program);
    context.eval(main, &[]);
    assert!(context.exception().is_some());
    context.restart();
    assert_eq!(context.exception(), None);
    assert!(context.stop_flags().is_empty());
    assert_eq!(context.heap_bytes_allocated(), 0);
}
