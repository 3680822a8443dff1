//! End-to-end evaluation scenarios: arithmetic, containers, control flow,
//! blocks, pointers, and parallel loops, all driven through the public
//! pipeline (build AST, infer, simulate, eval).

mod common;

use std::{cell::RefCell, rc::Rc};

use common::*;
use dascript::{
    BaseType, Context, Expression, Function, Operator, PrintWriter, Program, Register, TypeDecl,
    Variable,
};
use pretty_assertions::assert_eq;

/// `PrintWriter` sharing its buffer so tests can read captured output after
/// the context consumed the writer.
#[derive(Debug, Clone, Default)]
struct SharedOutput(Rc<RefCell<String>>);

impl PrintWriter for SharedOutput {
    fn output(&mut self, text: &str) {
        self.0.borrow_mut().push_str(text);
    }
}

fn op(o: Operator, l: Expression, r: Expression) -> Expression {
    Expression::op2(at(), o, l, r)
}

#[test]
fn arithmetic_with_precedence_and_debug() {
    // S1: let a = 1 + 2 * 3; debug(a); return a
    let mut program = Program::new();
    let debug_call = program
        .make_call(at(), "debug")
        .with_call_args(vec![var("a")]);
    let body = Expression::let_in(
        at(),
        vec![local("a", int()).with_init(op(
            Operator::Add,
            i(1),
            op(Operator::Mul, i(2), i(3)),
        ))],
        Some(block(vec![debug_call, ret(var("a"))])),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);

    let mut context = Context::new();
    let captured = SharedOutput::default();
    context.set_print_writer(Box::new(captured.clone()));
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert_eq!(context.eval(main, &[]).get::<i32>(), 7);
    assert_eq!(captured.0.borrow().as_str(), "7\n");
}

fn push_call(program: &mut Program, args: Vec<Expression>) -> Expression {
    program.make_call(at(), "push").with_call_args(args)
}

#[test]
fn array_push_with_insertion_index() {
    // S2: push(v,10); push(v,20); push(v,30,1) inserts before index 1,
    // pushing 20 down: v == [10, 30, 20]
    let mut program = Program::new();
    let p1 = push_call(&mut program, vec![var("v"), i(10)]);
    let p2 = push_call(&mut program, vec![var("v"), i(20)]);
    let p3 = push_call(&mut program, vec![var("v"), i(30), i(1)]);
    let element =
        |idx: i32| Expression::at_index(at(), var("v"), i(idx));
    let sum_check = op(
        Operator::Add,
        op(
            Operator::Mul,
            element(0),
            i(10000),
        ),
        op(
            Operator::Add,
            op(Operator::Mul, element(1), i(100)),
            element(2),
        ),
    );
    let body = Expression::let_in(
        at(),
        vec![local("v", TypeDecl::array_of(int()))],
        Some(block(vec![p1, p2, p3, ret(sum_check)])),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    // 10*10000 + 30*100 + 20
    assert_eq!(context.eval(main, &[]).get::<i32>(), 103_020);
}

#[test]
fn table_index_find_and_erase() {
    // S3: t["a"] = 1; t["b"] = 2;
    // (find(t,"a") != null) && (find(t,"c") == null) && erase(t,"a")
    let mut program = Program::new();
    let s = |text: &str| Expression::const_string(at(), text);
    let store = |key: &str, value: i32| {
        Expression::copy(
            at(),
            Expression::at_index(at(), var("t"), s(key)),
            i(value),
        )
    };
    let find = |program: &mut Program, key: &str| {
        program
            .make_call(at(), "find")
            .with_call_args(vec![var("t"), s(key)])
    };
    let find_a = find(&mut program, "a");
    let find_c = find(&mut program, "c");
    let erase_a = program
        .make_call(at(), "erase")
        .with_call_args(vec![var("t"), s("a")]);
    let cond = op(
        Operator::BoolAnd,
        op(Operator::NotEq, find_a, Expression::null_ptr(at())),
        op(
            Operator::BoolAnd,
            op(Operator::Eq, find_c, Expression::null_ptr(at())),
            erase_a,
        ),
    );
    let body = Expression::let_in(
        at(),
        vec![local("t", TypeDecl::table_of(string(), int()))],
        Some(block(vec![store("a", 1), store("b", 2), ret(cond)])),
    );
    program.add_function(Function::new("main", boolean(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert!(context.eval(main, &[]).get::<bool>());
}

#[test]
fn null_coalescing_over_null_and_real_pointers() {
    // S5: var p: int?; p ?? 42 == 42; then r = addr(q) and r ?? 42 == 5
    let first = Expression::let_in(
        at(),
        vec![local("p", TypeDecl::pointer_to(int()))],
        Some(block(vec![Expression::if_then_else(
            at(),
            op(
                Operator::NotEq,
                Expression::null_coalescing(at(), var("p"), i(42)),
                i(42),
            ),
            ret(i(-1)),
            None,
        )])),
    );
    let second = Expression::let_in(
        at(),
        vec![
            local("q", int()).with_init(i(5)),
            local("r", TypeDecl::pointer_to(int()))
                .with_init(Expression::addr_of(at(), var("q"))),
        ],
        Some(block(vec![ret(Expression::null_coalescing(
            at(),
            var("r"),
            i(42),
        ))])),
    );
    let body = block(vec![first, second]);
    assert_eq!(run_main_i32(body), 5);
}

#[test]
fn parallel_for_over_two_fixed_arrays() {
    // S6: for i, j in [1,2,3,4], [10,20] { sum += i * j } -> 50
    let fill = |name: &str, values: &[i32]| -> Vec<Expression> {
        values
            .iter()
            .enumerate()
            .map(|(idx, &v)| {
                Expression::copy(
                    at(),
                    Expression::at_index(at(), var(name), i(idx as i32)),
                    i(v),
                )
            })
            .collect()
    };
    let mut statements = Vec::new();
    statements.extend(fill("a", &[1, 2, 3, 4]));
    statements.extend(fill("b", &[10, 20]));
    statements.push(Expression::for_loop(
        at(),
        vec!["i".to_owned(), "j".to_owned()],
        vec![var("a"), var("b")],
        op(
            Operator::AddAssign,
            var("sum"),
            op(Operator::Mul, var("i"), var("j")),
        ),
        None,
    ));
    statements.push(ret(var("sum")));
    let body = Expression::let_in(
        at(),
        vec![
            local("a", int().with_dim(&[4])),
            local("b", int().with_dim(&[2])),
            local("sum", int()).with_init(i(0)),
        ],
        Some(block(statements)),
    );
    assert_eq!(run_main_i32(body), 50);
}

#[test]
fn for_over_range_with_filter() {
    // for x in range(0,10) where x % 2 == 0 { sum += x } -> 20
    let mut program = Program::new();
    let source = program
        .make_call(at(), "range")
        .with_call_args(vec![i(0), i(10)]);
    let body = Expression::let_in(
        at(),
        vec![local("sum", int()).with_init(i(0))],
        Some(block(vec![
            Expression::for_loop(
                at(),
                vec!["x".to_owned()],
                vec![source],
                op(Operator::AddAssign, var("sum"), var("x")),
                Some(op(
                    Operator::Eq,
                    op(Operator::Mod, var("x"), i(2)),
                    i(0),
                )),
            ),
            ret(var("sum")),
        ])),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert_eq!(context.eval(main, &[]).get::<i32>(), 20);
}

#[test]
fn for_over_dynamic_array_and_table_values() {
    // push three values into an array and a table, then sum both sides
    let mut program = Program::new();
    let pushes: Vec<Expression> = [3, 4, 5]
        .iter()
        .map(|&v| push_call(&mut program, vec![var("arr"), i(v)]))
        .collect();
    let store = |key: i32, value: i32| {
        Expression::copy(
            at(),
            Expression::at_index(at(), var("t"), i(key)),
            i(value),
        )
    };
    let values_iter = program
        .make_call(at(), "values")
        .with_call_args(vec![var("t")]);
    let mut statements = pushes;
    statements.push(store(1, 100));
    statements.push(store(2, 200));
    statements.push(Expression::for_loop(
        at(),
        vec!["x".to_owned()],
        vec![var("arr")],
        op(Operator::AddAssign, var("sum"), var("x")),
        None,
    ));
    statements.push(Expression::for_loop(
        at(),
        vec!["v".to_owned()],
        vec![values_iter],
        op(Operator::AddAssign, var("sum"), var("v")),
        None,
    ));
    statements.push(ret(var("sum")));
    let body = Expression::let_in(
        at(),
        vec![
            local("arr", TypeDecl::array_of(int())),
            local("t", TypeDecl::table_of(int(), int())),
            local("sum", int()).with_init(i(0)),
        ],
        Some(block(statements)),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert_eq!(context.eval(main, &[]).get::<i32>(), 3 + 4 + 5 + 100 + 200);
}

#[test]
fn while_loop_with_break_and_continue() {
    // sum odd numbers below 10, stopping at 7: 1 + 3 + 5 + 7 = 16
    let body = Expression::let_in(
        at(),
        vec![
            local("n", int()).with_init(i(0)),
            local("sum", int()).with_init(i(0)),
        ],
        Some(block(vec![
            Expression::while_loop(
                at(),
                op(Operator::Less, var("n"), i(10)),
                block(vec![
                    op(Operator::AddAssign, var("n"), i(1)),
                    Expression::if_then_else(
                        at(),
                        op(Operator::Eq, op(Operator::Mod, var("n"), i(2)), i(0)),
                        Expression::cont(at()),
                        None,
                    ),
                    op(Operator::AddAssign, var("sum"), var("n")),
                    Expression::if_then_else(
                        at(),
                        op(Operator::GreaterEq, var("n"), i(7)),
                        Expression::brk(at()),
                        None,
                    ),
                ]),
            ),
            ret(var("sum")),
        ])),
    );
    assert_eq!(run_main_i32(body), 16);
}

#[test]
fn structure_fields_read_back_what_was_written() {
    let mut program = Program::new();
    let foo = program
        .add_structure(dascript::Structure::with_fields(
            "Foo",
            at(),
            vec![
                dascript::FieldDeclaration::new("a", int(), at()),
                dascript::FieldDeclaration::new("b", int(), at()),
            ],
        ))
        .unwrap();
    let body = Expression::let_in(
        at(),
        vec![local("s", TypeDecl::structure(foo))],
        Some(block(vec![
            Expression::copy(at(), Expression::field(at(), var("s"), "a"), i(12)),
            Expression::copy(at(), Expression::field(at(), var("s"), "b"), i(30)),
            ret(op(
                Operator::Add,
                Expression::field(at(), var("s"), "a"),
                Expression::field(at(), var("s"), "b"),
            )),
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
fn structure_arguments_pass_by_reference() {
    // get_x(p: Point): int { return p.x } with a structure-typed local passed
    // directly — the argument register carries a reference, never a copy
    let mut program = Program::new();
    let point = program
        .add_structure(dascript::Structure::with_fields(
            "Point",
            at(),
            vec![dascript::FieldDeclaration::new("x", int(), at())],
        ))
        .unwrap();
    let point_type = TypeDecl::structure(point);
    program.add_function(
        Function::new("get_x", int(), at())
            .with_argument(Variable::new("p", point_type.clone(), at()))
            .with_body(block(vec![ret(Expression::field(at(), var("p"), "x"))])),
    );
    let body = Expression::let_in(
        at(),
        vec![local("s", point_type)],
        Some(block(vec![
            Expression::copy(at(), Expression::field(at(), var("s"), "x"), i(7)),
            ret(Expression::call(at(), "get_x", vec![var("s")])),
        ])),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert_eq!(context.eval(main, &[]).get::<i32>(), 7);
}

#[test]
fn structure_results_travel_by_reference() {
    // f(p: Point): Point { return p } — the result register carries the
    // reference the argument already was, aliasing the caller's storage
    let mut program = Program::new();
    let point = program
        .add_structure(dascript::Structure::with_fields(
            "Point",
            at(),
            vec![dascript::FieldDeclaration::new("x", int(), at())],
        ))
        .unwrap();
    let point_type = TypeDecl::structure(point);
    program.add_function(
        Function::new("f", point_type.clone(), at())
            .with_argument(Variable::new("p", point_type.clone(), at()))
            .with_body(block(vec![ret(var("p"))])),
    );
    let body = Expression::let_in(
        at(),
        vec![local("s", point_type)],
        Some(block(vec![
            Expression::copy(at(), Expression::field(at(), var("s"), "x"), i(7)),
            ret(Expression::field(
                at(),
                Expression::call(at(), "f", vec![var("s")]),
                "x",
            )),
        ])),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert_eq!(context.eval(main, &[]).get::<i32>(), 7);
}

#[test]
fn ternary_over_structure_references_reads_the_chosen_field() {
    // (b ? p : q).x where p is an argument and q a local: both arms are
    // structure references, neither is loaded, and the chosen one is read
    let mut program = Program::new();
    let point = program
        .add_structure(dascript::Structure::with_fields(
            "Point",
            at(),
            vec![dascript::FieldDeclaration::new("x", int(), at())],
        ))
        .unwrap();
    let point_type = TypeDecl::structure(point);
    let choose_body = Expression::let_in(
        at(),
        vec![local("q", point_type.clone())],
        Some(block(vec![
            Expression::copy(at(), Expression::field(at(), var("q"), "x"), i(20)),
            ret(Expression::field(
                at(),
                Expression::op3(at(), var("b"), var("p"), var("q")),
                "x",
            )),
        ])),
    );
    program.add_function(
        Function::new("choose", int(), at())
            .with_argument(Variable::new("b", boolean(), at()))
            .with_argument(Variable::new("p", point_type.clone(), at()))
            .with_body(choose_body),
    );
    let body = Expression::let_in(
        at(),
        vec![local("s", point_type)],
        Some(block(vec![
            Expression::copy(at(), Expression::field(at(), var("s"), "x"), i(10)),
            ret(op(
                Operator::Add,
                Expression::call(
                    at(),
                    "choose",
                    vec![Expression::const_bool(at(), true), var("s")],
                ),
                Expression::call(
                    at(),
                    "choose",
                    vec![Expression::const_bool(at(), false), var("s")],
                ),
            )),
        ])),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert_eq!(context.eval(main, &[]).get::<i32>(), 30);
}

#[test]
fn new_delete_and_pointer_fields() {
    let mut program = Program::new();
    let foo = program
        .add_structure(dascript::Structure::with_fields(
            "Foo",
            at(),
            vec![dascript::FieldDeclaration::new("a", int(), at())],
        ))
        .unwrap();
    let foo_type = TypeDecl::structure(foo);
    let body = Expression::let_in(
        at(),
        vec![local("p", TypeDecl::pointer_to(foo_type.clone()))
            .with_init(Expression::new_value(at(), foo_type))],
        Some(block(vec![
            Expression::copy(at(), Expression::field(at(), var("p"), "a"), i(9)),
            Expression::let_in(
                at(),
                vec![local("got", int())
                    .with_init(Expression::field(at(), var("p"), "a"))],
                Some(block(vec![
                    Expression::delete(at(), var("p")),
                    Expression::if_then_else(
                        at(),
                        op(Operator::Eq, var("p"), Expression::null_ptr(at())),
                        ret(var("got")),
                        Some(ret(i(-1))),
                    ),
                ])),
            ),
        ])),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert_eq!(context.eval(main, &[]).get::<i32>(), 9);
}

#[test]
fn safe_field_on_null_pointer_yields_null() {
    let mut program = Program::new();
    let foo = program
        .add_structure(dascript::Structure::with_fields(
            "Foo",
            at(),
            vec![dascript::FieldDeclaration::new("a", int(), at())],
        ))
        .unwrap();
    let body = Expression::let_in(
        at(),
        vec![local("p", TypeDecl::pointer_to(TypeDecl::structure(foo)))],
        Some(block(vec![ret(op(
            Operator::Eq,
            Expression::safe_field(at(), var("p"), "a"),
            Expression::null_ptr(at()),
        ))])),
    );
    assert!(run_main_bool(body));
}

#[test]
fn blocks_capture_their_frame() {
    // let x = 0; invoke(block { x = 13 }); return x
    let mut program = Program::new();
    let invoke = program.make_call(at(), "invoke").with_call_args(vec![
        Expression::make_block(
            at(),
            block(vec![Expression::copy(at(), var("x"), i(13))]),
        ),
    ]);
    let body = Expression::let_in(
        at(),
        vec![local("x", int()).with_init(i(0))],
        Some(block(vec![invoke, ret(var("x"))])),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert_eq!(context.eval(main, &[]).get::<i32>(), 13);
}

#[test]
fn calls_pass_arguments_and_fill_defaults() {
    let mut program = Program::new();
    // def add(x: int, y: int = 1): return x + y
    let add_body = block(vec![ret(op(Operator::Add, var("x"), var("y")))]);
    program.add_function(
        Function::new("add", int(), at())
            .with_argument(Variable::new("x", int(), at()))
            .with_argument(Variable::new("y", int(), at()).with_init(i(1)))
            .with_body(add_body),
    );
    let body = block(vec![ret(op(
        Operator::Add,
        Expression::call(at(), "add", vec![i(40), i(2)]),
        Expression::call(at(), "add", vec![i(-43)]),
    ))]);
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert_eq!(context.eval(main, &[]).get::<i32>(), 0);
    // and calling through the host API with explicit arguments
    let add = context.find_function("add").unwrap();
    let out = context.eval(add, &[Register::put(20i32), Register::put(3i32)]);
    assert_eq!(out.get::<i32>(), 23);
}

#[test]
fn strings_concatenate_and_compare() {
    let s = |text: &str| Expression::const_string(at(), text);
    let body = block(vec![ret(op(
        Operator::Eq,
        op(Operator::Add, s("da"), s("Script")),
        s("daScript"),
    ))]);
    assert!(run_main_bool(body));
}

#[test]
fn sizeof_uses_the_full_dimensioned_size() {
    let body = Expression::let_in(
        at(),
        vec![local("a", int().with_dim(&[4]))],
        Some(block(vec![ret(Expression::size_of(at(), var("a")))])),
    );
    assert_eq!(run_main_i32(body), 16);
}

#[test]
fn hash_is_deterministic_and_discriminates() {
    let mut program = Program::new();
    let h5 = program.make_call(at(), "hash").with_call_args(vec![i(5)]);
    let h5b = program.make_call(at(), "hash").with_call_args(vec![i(5)]);
    let h6 = program.make_call(at(), "hash").with_call_args(vec![i(6)]);
    let body = block(vec![ret(op(
        Operator::BoolAnd,
        op(Operator::Eq, h5, h5b),
        op(Operator::NotEq, program.make_call(at(), "hash").with_call_args(vec![i(5)]), h6),
    ))]);
    program.add_function(Function::new("main", boolean(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert!(context.eval(main, &[]).get::<bool>());
}

#[test]
fn ternary_selects_by_condition() {
    let body = block(vec![ret(Expression::op3(
        at(),
        op(Operator::Less, i(1), i(2)),
        i(10),
        i(20),
    ))]);
    assert_eq!(run_main_i32(body), 10);
}

#[test]
fn math_module_natives_resolve_like_any_function() {
    let mut program = Program::new();
    program.add_module(dascript::modules::math::make_module());
    let body = block(vec![ret(Expression::call(
        at(),
        "max",
        vec![
            Expression::call(at(), "abs", vec![i(-40)]),
            i(2),
        ],
    ))]);
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert_eq!(context.eval(main, &[]).get::<i32>(), 40);
}

#[test]
fn globals_initialize_once_and_reinitialize_after_restart() {
    let mut program = Program::new();
    program.add_variable(Variable::new("g", int(), at()).with_init(i(5)));
    let body = block(vec![
        op(Operator::AddAssign, var("g"), i(1)),
        ret(var("g")),
    ]);
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert_eq!(context.eval(main, &[]).get::<i32>(), 6);
    assert_eq!(context.eval(main, &[]).get::<i32>(), 7);
    // restart drops the heap and stack; init re-runs and the global resets
    context.restart();
    context.run_init_script();
    assert_eq!(context.eval(main, &[]).get::<i32>(), 6);
}

#[test]
fn for_loop_runs_min_of_runtime_lengths() {
    // property 8: array of 3 zipped with array of 5 iterates 3 times
    let mut program = Program::new();
    let mut statements: Vec<Expression> = Vec::new();
    for v in [1, 1, 1] {
        statements.push(push_call(&mut program, vec![var("a"), i(v)]));
    }
    for v in [1, 1, 1, 1, 1] {
        statements.push(push_call(&mut program, vec![var("b"), i(v)]));
    }
    statements.push(Expression::for_loop(
        at(),
        vec!["x".to_owned(), "y".to_owned()],
        vec![var("a"), var("b")],
        op(Operator::AddAssign, var("count"), i(1)),
        None,
    ));
    statements.push(ret(var("count")));
    let body = Expression::let_in(
        at(),
        vec![
            local("a", TypeDecl::array_of(int())),
            local("b", TypeDecl::array_of(int())),
            local("count", int()).with_init(i(0)),
        ],
        Some(block(statements)),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    assert_eq!(context.eval(main, &[]).get::<i32>(), 3);
}

#[test]
fn fixed_dim_values_print_through_debug() {
    let mut program = Program::new();
    let debug_call = program
        .make_call(at(), "debug")
        .with_call_args(vec![var("a"), Expression::const_string(at(), "a")]);
    let body = Expression::let_in(
        at(),
        vec![local("a", int().with_dim(&[2]))],
        Some(block(vec![
            Expression::copy(at(), Expression::at_index(at(), var("a"), i(0)), i(1)),
            Expression::copy(at(), Expression::at_index(at(), var("a"), i(1)), i(2)),
            debug_call,
            ret(i(0)),
        ])),
    );
    program.add_function(Function::new("main", int(), at()).with_body(body));
    program.infer();
    assert!(!program.failed(), "{:#?}", program.errors);
    let mut context = Context::new();
    let captured = SharedOutput::default();
    context.set_print_writer(Box::new(captured.clone()));
    assert!(program.simulate(&mut context));
    let main = context.find_function("main").unwrap();
    context.eval(main, &[]);
    assert_eq!(captured.0.borrow().as_str(), "a: [1, 2]\n");
}

#[test]
fn base_type_is_exposed_on_inferred_programs() {
    // the typed tree is visible to embedders after inference
    let program = program_with_main(block(vec![ret(i(1))]), int());
    assert!(!program.failed());
    let (_, func) = program
        .user_module()
        .functions
        .iter()
        .next()
        .expect("main was declared");
    assert_eq!(func.result.base, BaseType::Int);
    assert_eq!(func.total_stack_size % 16, 0);
}
