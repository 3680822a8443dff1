//! Base-type-keyed arithmetic and logic policies.
//!
//! Operator lowering records an operation kind and a base type; evaluation
//! dispatches here. Integer division and modulo by zero throw. In-place
//! (`Set*`, `Inc`, `Dec`) kinds receive the left operand as a reference and
//! return that reference, matching how assignment operators chain.

use strum::Display;

use crate::{
    register::{MemPtr, RegValue, Register},
    typedecl::BaseType,
    vm::{string, Vm},
};

/// Unary operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Op1Kind {
    /// Unary plus; identity.
    Unp,
    /// Unary minus.
    Unm,
    Inc,
    Dec,
    IncPost,
    DecPost,
    BoolNot,
    BinNot,
}

/// Binary operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Op2Kind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Equ,
    NotEqu,
    Less,
    LessEqu,
    Gt,
    GtEqu,
    BoolAnd,
    BoolOr,
    BoolXor,
    BinAnd,
    BinOr,
    BinXor,
    SetAdd,
    SetSub,
    SetMul,
    SetDiv,
    SetMod,
    SetBoolAnd,
    SetBoolOr,
    SetBoolXor,
    SetBinAnd,
    SetBinOr,
    SetBinXor,
}

/// Integer scalar operations, wrapping like the target machine.
trait IntPolicy: RegValue + Copy + PartialOrd + Eq {
    const ZERO: Self;
    fn wadd(a: Self, b: Self) -> Self;
    fn wsub(a: Self, b: Self) -> Self;
    fn wmul(a: Self, b: Self) -> Self;
    fn wdiv(a: Self, b: Self) -> Self;
    fn wmod(a: Self, b: Self) -> Self;
    fn wneg(a: Self) -> Self;
    fn bnot(a: Self) -> Self;
    fn band(a: Self, b: Self) -> Self;
    fn bor(a: Self, b: Self) -> Self;
    fn bxor(a: Self, b: Self) -> Self;
    fn one() -> Self;
}

macro_rules! int_policy {
    ($($t:ty),*) => {$(
        impl IntPolicy for $t {
            const ZERO: Self = 0;
            fn wadd(a: Self, b: Self) -> Self { a.wrapping_add(b) }
            fn wsub(a: Self, b: Self) -> Self { a.wrapping_sub(b) }
            fn wmul(a: Self, b: Self) -> Self { a.wrapping_mul(b) }
            fn wdiv(a: Self, b: Self) -> Self { a.wrapping_div(b) }
            fn wmod(a: Self, b: Self) -> Self { a.wrapping_rem(b) }
            fn wneg(a: Self) -> Self { a.wrapping_neg() }
            fn bnot(a: Self) -> Self { !a }
            fn band(a: Self, b: Self) -> Self { a & b }
            fn bor(a: Self, b: Self) -> Self { a | b }
            fn bxor(a: Self, b: Self) -> Self { a ^ b }
            fn one() -> Self { 1 }
        }
    )*};
}

int_policy!(i8, i16, i32, i64, u8, u16, u32, u64);

fn op1_int<T: IntPolicy>(vm: &mut Vm<'_>, kind: Op1Kind, x: Register) -> Register {
    match kind {
        Op1Kind::Unp => x,
        Op1Kind::Unm => Register::put(T::wneg(x.get::<T>())),
        Op1Kind::BinNot => Register::put(T::bnot(x.get::<T>())),
        Op1Kind::Inc | Op1Kind::Dec => {
            let ptr = x.get::<MemPtr>();
            let v = vm.load::<T>(ptr);
            let next = if kind == Op1Kind::Inc {
                T::wadd(v, T::one())
            } else {
                T::wsub(v, T::one())
            };
            vm.store(ptr, next);
            x
        }
        Op1Kind::IncPost | Op1Kind::DecPost => {
            let ptr = x.get::<MemPtr>();
            let v = vm.load::<T>(ptr);
            let next = if kind == Op1Kind::IncPost {
                T::wadd(v, T::one())
            } else {
                T::wsub(v, T::one())
            };
            vm.store(ptr, next);
            Register::put(v)
        }
        Op1Kind::BoolNot => Register::ZERO,
    }
}

fn op2_int<T: IntPolicy>(vm: &mut Vm<'_>, kind: Op2Kind, a: Register, b: Register) -> Register {
    let set_in_place = |vm: &mut Vm<'_>, f: fn(T, T) -> T| -> Register {
        let ptr = a.get::<MemPtr>();
        let cur = vm.load::<T>(ptr);
        vm.store(ptr, f(cur, b.get::<T>()));
        a
    };
    match kind {
        Op2Kind::Add => Register::put(T::wadd(a.get(), b.get())),
        Op2Kind::Sub => Register::put(T::wsub(a.get(), b.get())),
        Op2Kind::Mul => Register::put(T::wmul(a.get(), b.get())),
        Op2Kind::Div => {
            if b.get::<T>() == T::ZERO {
                vm.throw("division by zero");
                return Register::ZERO;
            }
            Register::put(T::wdiv(a.get(), b.get()))
        }
        Op2Kind::Mod => {
            if b.get::<T>() == T::ZERO {
                vm.throw("division by zero");
                return Register::ZERO;
            }
            Register::put(T::wmod(a.get(), b.get()))
        }
        Op2Kind::Equ => Register::put(a.get::<T>() == b.get::<T>()),
        Op2Kind::NotEqu => Register::put(a.get::<T>() != b.get::<T>()),
        Op2Kind::Less => Register::put(a.get::<T>() < b.get::<T>()),
        Op2Kind::LessEqu => Register::put(a.get::<T>() <= b.get::<T>()),
        Op2Kind::Gt => Register::put(a.get::<T>() > b.get::<T>()),
        Op2Kind::GtEqu => Register::put(a.get::<T>() >= b.get::<T>()),
        Op2Kind::BinAnd => Register::put(T::band(a.get(), b.get())),
        Op2Kind::BinOr => Register::put(T::bor(a.get(), b.get())),
        Op2Kind::BinXor => Register::put(T::bxor(a.get(), b.get())),
        Op2Kind::SetAdd => set_in_place(vm, T::wadd),
        Op2Kind::SetSub => set_in_place(vm, T::wsub),
        Op2Kind::SetMul => set_in_place(vm, T::wmul),
        Op2Kind::SetDiv => {
            if b.get::<T>() == T::ZERO {
                vm.throw("division by zero");
                return Register::ZERO;
            }
            set_in_place(vm, T::wdiv)
        }
        Op2Kind::SetMod => {
            if b.get::<T>() == T::ZERO {
                vm.throw("division by zero");
                return Register::ZERO;
            }
            set_in_place(vm, T::wmod)
        }
        Op2Kind::SetBinAnd => set_in_place(vm, T::band),
        Op2Kind::SetBinOr => set_in_place(vm, T::bor),
        Op2Kind::SetBinXor => set_in_place(vm, T::bxor),
        Op2Kind::BoolAnd
        | Op2Kind::BoolOr
        | Op2Kind::BoolXor
        | Op2Kind::SetBoolAnd
        | Op2Kind::SetBoolOr
        | Op2Kind::SetBoolXor => Register::ZERO,
    }
}

/// Float scalar operations: `f32` or `f64`.
trait FloatPolicy: RegValue + Copy + PartialOrd {
    fn fadd(a: Self, b: Self) -> Self;
    fn fsub(a: Self, b: Self) -> Self;
    fn fmul(a: Self, b: Self) -> Self;
    fn fdiv(a: Self, b: Self) -> Self;
    fn fmod(a: Self, b: Self) -> Self;
    fn fneg(a: Self) -> Self;
}

macro_rules! float_policy {
    ($($t:ty),*) => {$(
        impl FloatPolicy for $t {
            fn fadd(a: Self, b: Self) -> Self { a + b }
            fn fsub(a: Self, b: Self) -> Self { a - b }
            fn fmul(a: Self, b: Self) -> Self { a * b }
            fn fdiv(a: Self, b: Self) -> Self { a / b }
            fn fmod(a: Self, b: Self) -> Self { a % b }
            fn fneg(a: Self) -> Self { -a }
        }
    )*};
}

float_policy!(f32, f64);

fn op1_float<T: FloatPolicy>(vm: &mut Vm<'_>, kind: Op1Kind, x: Register) -> Register {
    match kind {
        Op1Kind::Unp => x,
        Op1Kind::Unm => Register::put(T::fneg(x.get::<T>())),
        Op1Kind::Inc | Op1Kind::Dec | Op1Kind::IncPost | Op1Kind::DecPost => {
            let ptr = x.get::<MemPtr>();
            let v = vm.load::<T>(ptr);
            let delta = if matches!(kind, Op1Kind::Inc | Op1Kind::IncPost) {
                1.0f64
            } else {
                -1.0f64
            };
            let next = T::fadd(v, float_from_f64::<T>(delta));
            vm.store(ptr, next);
            if matches!(kind, Op1Kind::IncPost | Op1Kind::DecPost) {
                Register::put(v)
            } else {
                x
            }
        }
        Op1Kind::BoolNot | Op1Kind::BinNot => Register::ZERO,
    }
}

fn float_from_f64<T: FloatPolicy>(v: f64) -> T {
    // only f32 and f64 implement FloatPolicy; route through the byte image
    if size_of::<T>() == 4 {
        T::from_reg(Register::put(v as f32))
    } else {
        T::from_reg(Register::put(v))
    }
}

fn op2_float<T: FloatPolicy>(vm: &mut Vm<'_>, kind: Op2Kind, a: Register, b: Register) -> Register {
    let set_in_place = |vm: &mut Vm<'_>, f: fn(T, T) -> T| -> Register {
        let ptr = a.get::<MemPtr>();
        let cur = vm.load::<T>(ptr);
        vm.store(ptr, f(cur, b.get::<T>()));
        a
    };
    match kind {
        Op2Kind::Add => Register::put(T::fadd(a.get(), b.get())),
        Op2Kind::Sub => Register::put(T::fsub(a.get(), b.get())),
        Op2Kind::Mul => Register::put(T::fmul(a.get(), b.get())),
        Op2Kind::Div => Register::put(T::fdiv(a.get(), b.get())),
        Op2Kind::Mod => Register::put(T::fmod(a.get(), b.get())),
        Op2Kind::Equ => Register::put(a.get::<T>() == b.get::<T>()),
        Op2Kind::NotEqu => Register::put(a.get::<T>() != b.get::<T>()),
        Op2Kind::Less => Register::put(a.get::<T>() < b.get::<T>()),
        Op2Kind::LessEqu => Register::put(a.get::<T>() <= b.get::<T>()),
        Op2Kind::Gt => Register::put(a.get::<T>() > b.get::<T>()),
        Op2Kind::GtEqu => Register::put(a.get::<T>() >= b.get::<T>()),
        Op2Kind::SetAdd => set_in_place(vm, T::fadd),
        Op2Kind::SetSub => set_in_place(vm, T::fsub),
        Op2Kind::SetMul => set_in_place(vm, T::fmul),
        Op2Kind::SetDiv => set_in_place(vm, T::fdiv),
        Op2Kind::SetMod => set_in_place(vm, T::fmod),
        _ => Register::ZERO,
    }
}

fn op1_bool(kind: Op1Kind, x: Register) -> Register {
    match kind {
        Op1Kind::BoolNot => Register::put(!x.get::<bool>()),
        _ => Register::ZERO,
    }
}

fn op2_bool(vm: &mut Vm<'_>, kind: Op2Kind, a: Register, b: Register) -> Register {
    let set_in_place = |vm: &mut Vm<'_>, f: fn(bool, bool) -> bool| -> Register {
        let ptr = a.get::<MemPtr>();
        let cur = vm.load::<bool>(ptr);
        vm.store(ptr, f(cur, b.get::<bool>()));
        a
    };
    match kind {
        Op2Kind::Equ => Register::put(a.get::<bool>() == b.get::<bool>()),
        Op2Kind::NotEqu | Op2Kind::BoolXor => Register::put(a.get::<bool>() != b.get::<bool>()),
        // non-short-circuit forms; `&&`/`||` lower to dedicated nodes
        Op2Kind::BoolAnd => Register::put(a.get::<bool>() && b.get::<bool>()),
        Op2Kind::BoolOr => Register::put(a.get::<bool>() || b.get::<bool>()),
        Op2Kind::SetBoolAnd => set_in_place(vm, |x, y| x && y),
        Op2Kind::SetBoolOr => set_in_place(vm, |x, y| x || y),
        Op2Kind::SetBoolXor => set_in_place(vm, |x, y| x != y),
        _ => Register::ZERO,
    }
}

fn op2_pointer(kind: Op2Kind, a: Register, b: Register) -> Register {
    match kind {
        Op2Kind::Equ => Register::put(a.get::<MemPtr>() == b.get::<MemPtr>()),
        Op2Kind::NotEqu => Register::put(a.get::<MemPtr>() != b.get::<MemPtr>()),
        _ => Register::ZERO,
    }
}

/// Elementwise vector operations over `lanes` lanes of `i32`, `u32`, or
/// `f32`. Lane counts come from the base type; scalar broadcasts
/// (`vec * scalar`) reuse the same kinds with the scalar splatted by the
/// caller-side registration.
fn op2_vec_f32(vm: &mut Vm<'_>, kind: Op2Kind, lanes: usize, a: Register, b: Register) -> Register {
    let av = a.get::<[f32; 4]>();
    let bv = b.get::<[f32; 4]>();
    let mut out = [0f32; 4];
    let apply = |f: fn(f32, f32) -> f32, out: &mut [f32; 4]| {
        for i in 0..lanes {
            out[i] = f(av[i], bv[i]);
        }
    };
    match kind {
        Op2Kind::Add => apply(|x, y| x + y, &mut out),
        Op2Kind::Sub => apply(|x, y| x - y, &mut out),
        Op2Kind::Mul => apply(|x, y| x * y, &mut out),
        Op2Kind::Div => apply(|x, y| x / y, &mut out),
        Op2Kind::Mod => apply(|x, y| x % y, &mut out),
        Op2Kind::Equ => return Register::put(av[..lanes] == bv[..lanes]),
        Op2Kind::NotEqu => return Register::put(av[..lanes] != bv[..lanes]),
        Op2Kind::SetAdd | Op2Kind::SetSub | Op2Kind::SetMul | Op2Kind::SetDiv => {
            let ptr = a.get::<MemPtr>();
            let cur = vm.load_sized(ptr, (lanes * 4) as u32).get::<[f32; 4]>();
            let mut next = [0f32; 4];
            for i in 0..lanes {
                next[i] = match kind {
                    Op2Kind::SetAdd => cur[i] + bv[i],
                    Op2Kind::SetSub => cur[i] - bv[i],
                    Op2Kind::SetMul => cur[i] * bv[i],
                    _ => cur[i] / bv[i],
                };
            }
            vm.store_sized(ptr, Register::put(next), (lanes * 4) as u32);
            return a;
        }
        _ => return Register::ZERO,
    }
    Register::put(out)
}

fn op2_vec_i32(
    vm: &mut Vm<'_>,
    kind: Op2Kind,
    lanes: usize,
    signed: bool,
    a: Register,
    b: Register,
) -> Register {
    let av = a.get::<[i32; 4]>();
    let bv = b.get::<[i32; 4]>();
    let mut out = [0i32; 4];
    let lane = |x: i32, y: i32, kind: Op2Kind, vm: &mut Vm<'_>| -> Option<i32> {
        Some(match kind {
            Op2Kind::Add | Op2Kind::SetAdd => x.wrapping_add(y),
            Op2Kind::Sub | Op2Kind::SetSub => x.wrapping_sub(y),
            Op2Kind::Mul | Op2Kind::SetMul => x.wrapping_mul(y),
            Op2Kind::Div | Op2Kind::SetDiv | Op2Kind::Mod | Op2Kind::SetMod => {
                if y == 0 {
                    vm.throw("division by zero");
                    return None;
                }
                let div = matches!(kind, Op2Kind::Div | Op2Kind::SetDiv);
                if signed {
                    if div { x.wrapping_div(y) } else { x.wrapping_rem(y) }
                } else {
                    let (xu, yu) = (x as u32, y as u32);
                    (if div { xu / yu } else { xu % yu }) as i32
                }
            }
            _ => 0,
        })
    };
    match kind {
        Op2Kind::Equ => return Register::put(av[..lanes] == bv[..lanes]),
        Op2Kind::NotEqu => return Register::put(av[..lanes] != bv[..lanes]),
        Op2Kind::Add | Op2Kind::Sub | Op2Kind::Mul | Op2Kind::Div | Op2Kind::Mod => {
            for i in 0..lanes {
                match lane(av[i], bv[i], kind, vm) {
                    Some(v) => out[i] = v,
                    None => return Register::ZERO,
                }
            }
        }
        Op2Kind::SetAdd | Op2Kind::SetSub | Op2Kind::SetMul | Op2Kind::SetDiv | Op2Kind::SetMod => {
            let ptr = a.get::<MemPtr>();
            let cur = vm.load_sized(ptr, (lanes * 4) as u32).get::<[i32; 4]>();
            let mut next = [0i32; 4];
            for i in 0..lanes {
                match lane(cur[i], bv[i], kind, vm) {
                    Some(v) => next[i] = v,
                    None => return Register::ZERO,
                }
            }
            vm.store_sized(ptr, Register::put(next), (lanes * 4) as u32);
            return a;
        }
        _ => return Register::ZERO,
    }
    Register::put(out)
}

fn op1_vec(kind: Op1Kind, ty: BaseType, x: Register) -> Register {
    let lanes = (ty.size_of() / 4) as usize;
    match kind {
        Op1Kind::Unp => x,
        Op1Kind::Unm => match ty {
            BaseType::Float2 | BaseType::Float3 | BaseType::Float4 => {
                let mut v = x.get::<[f32; 4]>();
                for lane in v.iter_mut().take(lanes) {
                    *lane = -*lane;
                }
                Register::put(v)
            }
            _ => {
                let mut v = x.get::<[i32; 4]>();
                for lane in v.iter_mut().take(lanes) {
                    *lane = lane.wrapping_neg();
                }
                Register::put(v)
            }
        },
        _ => Register::ZERO,
    }
}

/// Dispatches a unary operation by base type.
pub(crate) fn eval_op1(vm: &mut Vm<'_>, kind: Op1Kind, ty: BaseType, x: Register) -> Register {
    match ty {
        BaseType::Bool => op1_bool(kind, x),
        BaseType::Int8 => op1_int::<i8>(vm, kind, x),
        BaseType::Int16 => op1_int::<i16>(vm, kind, x),
        BaseType::Int | BaseType::Enumeration => op1_int::<i32>(vm, kind, x),
        BaseType::Int64 => op1_int::<i64>(vm, kind, x),
        BaseType::UInt8 => op1_int::<u8>(vm, kind, x),
        BaseType::UInt16 => op1_int::<u16>(vm, kind, x),
        BaseType::UInt => op1_int::<u32>(vm, kind, x),
        BaseType::UInt64 => op1_int::<u64>(vm, kind, x),
        BaseType::Float => op1_float::<f32>(vm, kind, x),
        BaseType::Double => op1_float::<f64>(vm, kind, x),
        _ if ty.is_vector() => op1_vec(kind, ty, x),
        _ => Register::ZERO,
    }
}

/// Dispatches a binary operation by base type.
pub(crate) fn eval_op2(
    vm: &mut Vm<'_>,
    kind: Op2Kind,
    ty: BaseType,
    a: Register,
    b: Register,
) -> Register {
    match ty {
        BaseType::Bool => op2_bool(vm, kind, a, b),
        BaseType::Int8 => op2_int::<i8>(vm, kind, a, b),
        BaseType::Int16 => op2_int::<i16>(vm, kind, a, b),
        BaseType::Int | BaseType::Enumeration => op2_int::<i32>(vm, kind, a, b),
        BaseType::Int64 => op2_int::<i64>(vm, kind, a, b),
        BaseType::UInt8 => op2_int::<u8>(vm, kind, a, b),
        BaseType::UInt16 => op2_int::<u16>(vm, kind, a, b),
        BaseType::UInt => op2_int::<u32>(vm, kind, a, b),
        BaseType::UInt64 => op2_int::<u64>(vm, kind, a, b),
        BaseType::Float => op2_float::<f32>(vm, kind, a, b),
        BaseType::Double => op2_float::<f64>(vm, kind, a, b),
        BaseType::String => string::eval_op2(vm, kind, a, b),
        BaseType::Pointer => op2_pointer(kind, a, b),
        BaseType::Float2 => op2_vec_f32(vm, kind, 2, a, b),
        BaseType::Float3 => op2_vec_f32(vm, kind, 3, a, b),
        BaseType::Float4 => op2_vec_f32(vm, kind, 4, a, b),
        BaseType::Int2 => op2_vec_i32(vm, kind, 2, true, a, b),
        BaseType::Int3 => op2_vec_i32(vm, kind, 3, true, a, b),
        BaseType::Int4 => op2_vec_i32(vm, kind, 4, true, a, b),
        BaseType::UInt2 => op2_vec_i32(vm, kind, 2, false, a, b),
        BaseType::UInt3 => op2_vec_i32(vm, kind, 3, false, a, b),
        BaseType::UInt4 => op2_vec_i32(vm, kind, 4, false, a, b),
        BaseType::Range | BaseType::URange => match kind {
            Op2Kind::Equ => Register::put(a.get::<u64>() == b.get::<u64>()),
            Op2Kind::NotEqu => Register::put(a.get::<u64>() != b.get::<u64>()),
            _ => Register::ZERO,
        },
        _ => Register::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_kinds_render_for_diagnostics() {
        assert_eq!(Op2Kind::Add.to_string(), "Add");
        assert_eq!(Op1Kind::BoolNot.to_string(), "BoolNot");
    }
}
