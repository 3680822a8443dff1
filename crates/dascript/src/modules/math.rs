//! Optional math module: native float intrinsics plus integer/float
//! min/max/abs. Hosts link it with `Program::add_module(math::make_module())`.

use crate::{
    expressions::Variable,
    module::{BuiltinImpl, Function, Module},
    register::Register,
    source::LineInfo,
    typedecl::{BaseType, TypeDecl},
    vm::{NativeFunction, Vm},
};

const NO_AT: LineInfo = LineInfo { line: 0, column: 0 };

fn add_native(
    module: &mut Module,
    name: &str,
    args: &[(&str, BaseType)],
    result: BaseType,
    func: NativeFunction,
) {
    let mut f = Function::new(name, TypeDecl::new(result), NO_AT)
        .with_builtin(BuiltinImpl::Native(func));
    for (arg_name, ty) in args {
        f = f.with_argument(Variable::new(*arg_name, TypeDecl::new(*ty), NO_AT));
    }
    module.add_function(f);
}

macro_rules! float_fn {
    ($name:ident, $method:ident) => {
        fn $name(_vm: &mut Vm<'_>, args: &[Register]) -> Register {
            Register::put(args[0].get::<f32>().$method())
        }
    };
}

float_fn!(native_sqrt, sqrt);
float_fn!(native_sin, sin);
float_fn!(native_cos, cos);
float_fn!(native_tan, tan);
float_fn!(native_exp, exp);
float_fn!(native_ln, ln);
float_fn!(native_floor, floor);
float_fn!(native_ceil, ceil);
float_fn!(native_fabs, abs);

fn native_pow(_vm: &mut Vm<'_>, args: &[Register]) -> Register {
    Register::put(args[0].get::<f32>().powf(args[1].get::<f32>()))
}

fn native_abs_int(_vm: &mut Vm<'_>, args: &[Register]) -> Register {
    Register::put(args[0].get::<i32>().wrapping_abs())
}

fn native_min_int(_vm: &mut Vm<'_>, args: &[Register]) -> Register {
    Register::put(args[0].get::<i32>().min(args[1].get::<i32>()))
}

fn native_max_int(_vm: &mut Vm<'_>, args: &[Register]) -> Register {
    Register::put(args[0].get::<i32>().max(args[1].get::<i32>()))
}

fn native_min_float(_vm: &mut Vm<'_>, args: &[Register]) -> Register {
    Register::put(args[0].get::<f32>().min(args[1].get::<f32>()))
}

fn native_max_float(_vm: &mut Vm<'_>, args: &[Register]) -> Register {
    Register::put(args[0].get::<f32>().max(args[1].get::<f32>()))
}

/// Builds the math module.
#[must_use]
pub fn make_module() -> Module {
    let mut module = Module::new("math");
    use BaseType::{Float, Int};
    add_native(&mut module, "sqrt", &[("x", Float)], Float, native_sqrt);
    add_native(&mut module, "sin", &[("x", Float)], Float, native_sin);
    add_native(&mut module, "cos", &[("x", Float)], Float, native_cos);
    add_native(&mut module, "tan", &[("x", Float)], Float, native_tan);
    add_native(&mut module, "exp", &[("x", Float)], Float, native_exp);
    add_native(&mut module, "log", &[("x", Float)], Float, native_ln);
    add_native(&mut module, "pow", &[("x", Float), ("y", Float)], Float, native_pow);
    add_native(&mut module, "floor", &[("x", Float)], Float, native_floor);
    add_native(&mut module, "ceil", &[("x", Float)], Float, native_ceil);
    add_native(&mut module, "abs", &[("x", Float)], Float, native_fabs);
    add_native(&mut module, "abs", &[("x", Int)], Int, native_abs_int);
    add_native(&mut module, "min", &[("x", Int), ("y", Int)], Int, native_min_int);
    add_native(&mut module, "max", &[("x", Int), ("y", Int)], Int, native_max_int);
    add_native(&mut module, "min", &[("x", Float), ("y", Float)], Float, native_min_float);
    add_native(&mut module, "max", &[("x", Float), ("y", Float)], Float, native_max_float);
    module
}
