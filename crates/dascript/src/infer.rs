//! The type-inference pass.
//!
//! One post-parse walk assigns a type to every expression, resolves names
//! and overloads, inserts implicit dereferences, and lays out stack slots.
//! Errors never abort the walk: a node that fails keeps `type_ == None`,
//! which makes everything depending on it fail quietly, so one pass yields
//! many diagnostics.
//!
//! Inference runs in three steps: structure layouts are already sealed at
//! declaration; globals get dense indices and typed initializers; then every
//! user function gets a dense function index up front (so calls between
//! functions resolve regardless of order) and its body is walked with the
//! frame layout growing from the prologue down.

use std::mem;

use crate::{
    context::{EvalFlags, PROLOGUE_SIZE},
    errors::{CompilationError, Error},
    expressions::{
        argument_types, CallTarget, ExprKind, Expression, FieldRef, IterVar, VarRef,
        MAX_FOR_ITERATORS,
    },
    module::{BuiltinImpl, ModuleLibrary},
    program::Program,
    source::LineInfo,
    typedecl::{BaseType, TypeDecl},
};

/// Local-slot alignment: every local lands on a 16-byte boundary.
fn slot_size(type_: &TypeDecl) -> u32 {
    (type_.size_of() + 0xf) & !0xf
}

/// One visible local during the walk.
struct LocalVar {
    name: String,
    type_: TypeDecl,
    stack_top: u32,
}

/// Walk state for one function (or one global initializer).
pub(crate) struct InferContext<'a> {
    lib: &'a ModuleLibrary,
    user_module: usize,
    errors: Vec<Error>,
    func_result: TypeDecl,
    func_args: Vec<(String, TypeDecl)>,
    locals: Vec<LocalVar>,
    loop_depth: u32,
    stack_top: u32,
    max_stack: u32,
}

impl<'a> InferContext<'a> {
    fn new(lib: &'a ModuleLibrary, user_module: usize) -> Self {
        Self {
            lib,
            user_module,
            errors: Vec::new(),
            func_result: TypeDecl::new(BaseType::Void),
            func_args: Vec::new(),
            locals: Vec::new(),
            loop_depth: 0,
            stack_top: PROLOGUE_SIZE,
            max_stack: PROLOGUE_SIZE,
        }
    }

    fn error(&mut self, what: impl Into<String>, at: LineInfo, cerr: CompilationError) {
        self.errors.push(Error::new(what, at, cerr));
    }

    fn bump_stack(&mut self, type_: &TypeDecl) -> u32 {
        let at = self.stack_top;
        self.stack_top += slot_size(type_);
        self.max_stack = self.max_stack.max(self.stack_top);
        at
    }
}

/// Entry point: see [`Program::infer`].
pub(crate) fn infer_program(program: &mut Program) {
    let user = 1usize;

    // pass 1: dense indices first — globals and functions both — so any
    // initializer or body can reference anything regardless of order
    {
        let module = program.user_module_mut();
        let mut index = 0i32;
        for (_, var) in &mut module.globals {
            var.index = index;
            index += 1;
        }
        let mut total = 0i32;
        for (_, func) in &mut module.functions {
            if func.builtin.is_none() {
                func.index = total;
                total += 1;
            }
        }
        program.total_functions = total as u32;
    }

    // pass 2a: global initializers
    let global_names: Vec<String> = program.user_module().globals.keys().cloned().collect();
    for name in &global_names {
        let (type_, at, init) = {
            let var = program.user_module_mut().globals.get_mut(name).unwrap();
            (var.type_.clone(), var.at, var.init.take())
        };
        if type_.ref_ {
            program.error(
                format!("global variable {name} can't be a reference"),
                at,
                CompilationError::InvalidVariableType,
            );
        }
        if type_.is_void() {
            program.error(
                format!("global variable {name} can't be void"),
                at,
                CompilationError::InvalidVariableType,
            );
        }
        if type_.is_handle()
            && let Some(ann) = &type_.annotation
            && !ann.is_local()
        {
            program.error(
                format!("handled type {} can't be global", ann.name()),
                at,
                CompilationError::InvalidVariableType,
            );
        }
        let Some(mut init) = init else { continue };
        let mut ctx = InferContext::new(&program.library, user);
        init.infer(&mut ctx);
        if let Some(init_type) = &init.type_ {
            if !type_.is_same(init_type, false, false) {
                ctx.error(
                    format!("global initialization type mismatch, {type_} = {init_type}"),
                    at,
                    CompilationError::CantInitialize,
                );
            } else if type_.base == BaseType::Structure {
                ctx.error(
                    "can't initialize structures",
                    at,
                    CompilationError::CantInitialize,
                );
            } else if !init_type.can_copy() && !init_type.can_move() {
                ctx.error(
                    format!("global variable {name} can't be initialized at all"),
                    at,
                    CompilationError::CantInitialize,
                );
            }
        }
        let errors = mem::take(&mut ctx.errors);
        let init_stack = ctx.max_stack;
        drop(ctx);
        for e in errors {
            program.push_error(e);
        }
        let var = program.user_module_mut().globals.get_mut(name).unwrap();
        var.init = Some(init);
        // globals reuse the local-slot field to carry the frame size their
        // initializer needs at init-script time
        var.stack_top = init_stack;
    }

    // pass 2b: function bodies
    let fn_names: Vec<String> = program
        .user_module()
        .functions
        .iter()
        .filter(|(_, f)| f.builtin.is_none())
        .map(|(mangled, _)| mangled.clone())
        .collect();
    for mangled in &fn_names {
        let (result, args, mut body, at) = {
            let func = program
                .user_module_mut()
                .functions
                .get_mut(mangled)
                .unwrap();
            (
                func.result.clone(),
                func.arguments.clone(),
                func.body.take(),
                func.at,
            )
        };
        let mut ctx = InferContext::new(&program.library, user);
        ctx.func_result = result;
        ctx.func_args = args.iter().map(|a| (a.name.clone(), a.type_.clone())).collect();
        // argument defaults type-check against the declared argument
        let mut checked_args = args;
        for arg in &mut checked_args {
            if let Some(init) = &mut arg.init {
                init.infer(&mut ctx);
                if let Some(init_type) = &init.type_
                    && !arg.type_.is_same(init_type, true, false)
                {
                    ctx.error(
                        format!(
                            "function argument default value type mismatch, {} vs {init_type}",
                            arg.type_
                        ),
                        init.at,
                        CompilationError::InvalidArgumentType,
                    );
                }
            }
        }
        if let Some(body) = &mut body {
            body.infer(&mut ctx);
        } else {
            ctx.error(
                format!("function {mangled} has no body"),
                at,
                CompilationError::MissingNode,
            );
        }
        let errors = mem::take(&mut ctx.errors);
        let max_stack = ctx.max_stack;
        drop(ctx);
        for e in errors {
            program.push_error(e);
        }
        let func = program
            .user_module_mut()
            .functions
            .get_mut(mangled)
            .unwrap();
        func.arguments = checked_args;
        func.body = body;
        func.total_stack_size = max_stack;
    }
}

/// Wraps a reference to a register-sized, copyable value in an implicit
/// load.
///
/// Structures, arrays, tables, tuples, and fixed-dim values are inherently
/// reference-held (`is_ref_type`) and never load into a register; they pass
/// through unchanged and whatever consumed the value keeps seeing a
/// reference type. Pointers and strings do load: their reference is the
/// variable slot, the loaded value is the pointer itself.
fn auto_deref(expr: Expression) -> Expression {
    match &expr.type_ {
        Some(t) if t.ref_ && !t.is_ref_type() && t.can_copy() => {
            let mut ty = t.clone();
            ty.ref_ = false;
            Expression {
                at: expr.at,
                type_: Some(ty),
                kind: ExprKind::Ref2Value {
                    subexpr: Box::new(expr),
                },
            }
        }
        _ => expr,
    }
}

fn auto_deref_in_place(slot: &mut Expression) {
    let taken = mem::replace(slot, Expression::brk(LineInfo::default()));
    *slot = auto_deref(taken);
}

fn auto_deref_boxed(slot: &mut Box<Expression>) {
    let taken = mem::replace(slot, Box::new(Expression::brk(LineInfo::default())));
    *slot = Box::new(auto_deref(*taken));
}

/// `(name type1 type2 ...)` for overload diagnostics.
fn format_call(name: &str, args: &[Expression]) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();
    let _ = write!(out, "({name}");
    for arg in args {
        match &arg.type_ {
            Some(t) => {
                let _ = write!(out, " {t}");
            }
            None => out.push_str(" ???"),
        }
    }
    out.push(')');
    out
}

/// Resolves one call (or operator use) against the library. On a unique
/// match, applies default arguments and auto-dereferencing and returns the
/// lowering target plus the result type.
fn resolve_call(
    ctx: &mut InferContext<'_>,
    at: LineInfo,
    name: &str,
    args: &mut Vec<Expression>,
    operator: bool,
) -> Option<(CallTarget, TypeDecl)> {
    let lib = ctx.lib;
    let types = argument_types(args);
    if types.len() != args.len() {
        return None; // an argument failed to infer; stay quiet
    }
    let matching = lib.find_matching_functions(name, &types);
    drop(types);
    let cerr = if operator {
        CompilationError::OperatorNotFound
    } else {
        CompilationError::FunctionNotFound
    };
    match matching.len() {
        0 => {
            let candidates = lib.find_candidates(name);
            let listing = ModuleLibrary::describe_candidates(&candidates);
            let kind = if operator { "operator" } else { "function" };
            ctx.error(
                format!("no matching {kind} {}\n{listing}", format_call(name, args)),
                at,
                cerr,
            );
            None
        }
        1 => {
            let func = matching[0];
            let result = func.result.clone();
            let target = match &func.builtin {
                Some(BuiltinImpl::Policy1 { kind, ty }) => CallTarget::Policy1 { kind: *kind, ty: *ty },
                Some(BuiltinImpl::Policy2 { kind, ty }) => CallTarget::Policy2 { kind: *kind, ty: *ty },
                Some(BuiltinImpl::Native(f)) => CallTarget::Native(*f),
                None => CallTarget::User {
                    fn_index: func.index as u32,
                },
            };
            // trailing defaults fill unsupplied parameters
            let defaults: Vec<Expression> = func.arguments[args.len()..]
                .iter()
                .filter_map(|a| a.init.clone())
                .collect();
            let arg_refs: Vec<bool> = func.arguments.iter().map(|a| a.type_.is_ref()).collect();
            for mut default in defaults {
                if default.type_.is_none() {
                    default.infer(ctx);
                }
                args.push(default);
            }
            for (arg, takes_ref) in args.iter_mut().zip(arg_refs) {
                if !takes_ref {
                    auto_deref_in_place(arg);
                }
            }
            Some((target, result))
        }
        _ => {
            let listing = ModuleLibrary::describe_candidates(&matching);
            let kind = if operator { "operator" } else { "function" };
            ctx.error(
                format!(
                    "too many matching {kind}s {}\n{listing}",
                    format_call(name, args)
                ),
                at,
                cerr,
            );
            None
        }
    }
}

/// Shared inference of `keys(table)` / `values(table)`: an iterator over
/// references to the chosen side of the table.
fn infer_table_iterator(
    ctx: &mut InferContext<'_>,
    at: LineInfo,
    args: &mut [Expression],
    keys: bool,
) -> Option<TypeDecl> {
    let name = if keys { "keys" } else { "values" };
    if args.len() != 1 {
        ctx.error(
            format!("expecting {name}(table)"),
            at,
            CompilationError::InvalidArgumentCount,
        );
        return None;
    }
    if !infer_arguments(ctx, args) {
        return None;
    }
    let table_type = args[0].type_.clone().unwrap();
    if !table_type.is_good_table() {
        ctx.error(
            "first argument must be a fully qualified table",
            at,
            CompilationError::InvalidArgumentType,
        );
        return None;
    }
    let elem = if keys {
        table_type.first_type.as_ref().unwrap()
    } else {
        table_type.second_type.as_ref().unwrap()
    };
    let mut elem = (**elem).clone();
    elem.ref_ = true;
    Some(TypeDecl::iterator_of(elem))
}

/// Infers types for every argument of a call-shaped node. True when all of
/// them got a type.
fn infer_arguments(ctx: &mut InferContext<'_>, args: &mut [Expression]) -> bool {
    let mut ok = true;
    for arg in args.iter_mut() {
        arg.infer(ctx);
        ok &= arg.type_.is_some();
    }
    ok
}

impl Expression {
    /// Assigns this node's type, resolving names and overloads and inserting
    /// implicit dereferences underneath. A failed node keeps `type_ = None`.
    pub(crate) fn infer(&mut self, ctx: &mut InferContext<'_>) {
        self.type_ = None;
        let at = self.at;
        match &mut self.kind {
            ExprKind::ConstBool(_) => self.type_ = Some(TypeDecl::new(BaseType::Bool)),
            ExprKind::ConstInt(_) => self.type_ = Some(TypeDecl::new(BaseType::Int)),
            ExprKind::ConstUInt(_) => self.type_ = Some(TypeDecl::new(BaseType::UInt)),
            ExprKind::ConstInt64(_) => self.type_ = Some(TypeDecl::new(BaseType::Int64)),
            ExprKind::ConstUInt64(_) => self.type_ = Some(TypeDecl::new(BaseType::UInt64)),
            ExprKind::ConstFloat(_) => self.type_ = Some(TypeDecl::new(BaseType::Float)),
            ExprKind::ConstDouble(_) => self.type_ = Some(TypeDecl::new(BaseType::Double)),
            ExprKind::ConstString(_) => self.type_ = Some(TypeDecl::new(BaseType::String)),
            ExprKind::ConstPtr => self.type_ = Some(TypeDecl::void_pointer()),
            ExprKind::ConstEnum { enum_type, .. } => {
                self.type_ = Some(TypeDecl::enumeration(enum_type.clone()));
            }
            ExprKind::Var { name, resolved } => {
                // innermost local first
                if let Some(local) = ctx.locals.iter().rev().find(|l| l.name == *name) {
                    *resolved = VarRef::Local {
                        stack_top: local.stack_top,
                        ref_in_slot: local.type_.ref_,
                    };
                    let mut ty = local.type_.clone();
                    ty.ref_ = true;
                    self.type_ = Some(ty);
                    return;
                }
                // then function arguments
                if let Some(index) = ctx.func_args.iter().position(|(n, _)| n == name) {
                    *resolved = VarRef::Argument {
                        index: index as u32,
                    };
                    self.type_ = Some(ctx.func_args[index].1.clone());
                    return;
                }
                // then globals of the user module
                if let Some(var) = ctx.lib.module(ctx.user_module).find_variable(name) {
                    *resolved = VarRef::Global {
                        index: var.index as u32,
                    };
                    let mut ty = var.type_.clone();
                    ty.ref_ = true;
                    self.type_ = Some(ty);
                    return;
                }
                ctx.error(
                    format!("can't locate variable {name}"),
                    at,
                    CompilationError::VariableNotFound,
                );
            }
            ExprKind::Field {
                value,
                name,
                resolved,
            } => {
                value.infer(ctx);
                let Some(val_type) = value.type_.clone() else {
                    return;
                };
                if val_type.is_fixed_array() {
                    ctx.error(
                        "can't get field of an array",
                        at,
                        CompilationError::CantGetField,
                    );
                    return;
                }
                let mut field: Option<(u32, TypeDecl)> = None;
                if val_type.is_handle() {
                    field = val_type.annotation.as_ref().and_then(|a| a.field(name));
                } else if val_type.base == BaseType::Structure {
                    field = val_type
                        .struct_type
                        .as_ref()
                        .and_then(|st| st.find_field(name))
                        .map(|f| (f.offset, f.type_.clone()));
                } else if val_type.is_pointer() {
                    auto_deref_boxed(value);
                    if let Some(pointee) = &val_type.first_type {
                        if pointee.base == BaseType::Structure {
                            field = pointee
                                .struct_type
                                .as_ref()
                                .and_then(|st| st.find_field(name))
                                .map(|f| (f.offset, f.type_.clone()));
                        } else if pointee.is_handle() {
                            field = pointee.annotation.as_ref().and_then(|a| a.field(name));
                        }
                    }
                }
                match field {
                    Some((offset, field_type)) => {
                        *resolved = Some(FieldRef { offset });
                        let mut ty = field_type;
                        ty.ref_ = true;
                        ty.constant |= val_type.constant;
                        self.type_ = Some(ty);
                    }
                    None => ctx.error(
                        format!("field {name} not found"),
                        at,
                        CompilationError::CantGetField,
                    ),
                }
            }
            ExprKind::SafeField {
                value,
                name,
                resolved,
                skip_wrap,
            } => {
                value.infer(ctx);
                let Some(val_type) = value.type_.clone() else {
                    return;
                };
                if !val_type.is_pointer() || val_type.first_type.is_none() {
                    ctx.error(
                        format!("can only safe-dereference a pointer to a structure or handle, got {val_type}"),
                        at,
                        CompilationError::CantGetField,
                    );
                    return;
                }
                auto_deref_boxed(value);
                let pointee = val_type.first_type.as_ref().unwrap();
                let field = if pointee.base == BaseType::Structure {
                    pointee
                        .struct_type
                        .as_ref()
                        .and_then(|st| st.find_field(name))
                        .map(|f| (f.offset, f.type_.clone()))
                } else if pointee.is_handle() {
                    pointee.annotation.as_ref().and_then(|a| a.field(name))
                } else {
                    None
                };
                let Some((offset, field_type)) = field else {
                    ctx.error(
                        format!("can't get field {name}"),
                        at,
                        CompilationError::CantGetField,
                    );
                    return;
                };
                *resolved = Some(FieldRef { offset });
                *skip_wrap = field_type.is_pointer();
                let mut ty = if *skip_wrap {
                    field_type
                } else {
                    TypeDecl::pointer_to(field_type)
                };
                ty.constant |= val_type.constant;
                self.type_ = Some(ty);
            }
            ExprKind::At { subexpr, index } => {
                subexpr.infer(ctx);
                index.infer(ctx);
                let (Some(sub_type), Some(_)) = (subexpr.type_.clone(), index.type_.as_ref())
                else {
                    return;
                };
                auto_deref_boxed(index);
                let index_type = index.type_.as_ref().unwrap();
                if sub_type.is_good_table() {
                    let key = sub_type.first_type.as_ref().unwrap();
                    if !key.is_same(index_type, true, false) {
                        ctx.error(
                            "table index type mismatch",
                            index.at,
                            CompilationError::InvalidIndexType,
                        );
                        return;
                    }
                    let mut ty = (**sub_type.second_type.as_ref().unwrap()).clone();
                    ty.ref_ = true;
                    ty.constant |= sub_type.constant;
                    self.type_ = Some(ty);
                } else if sub_type.is_handle() {
                    let indexed = sub_type
                        .annotation
                        .as_ref()
                        .and_then(|a| a.index(index_type));
                    match indexed {
                        Some((mut ty, _)) => {
                            ty.constant |= sub_type.constant;
                            self.type_ = Some(ty);
                        }
                        None => ctx.error(
                            "handle does not support this index type",
                            index.at,
                            CompilationError::InvalidIndexType,
                        ),
                    }
                } else {
                    if !index_type.is_index() {
                        ctx.error(
                            "index must be int or uint",
                            index.at,
                            CompilationError::InvalidIndexType,
                        );
                        return;
                    }
                    if sub_type.is_good_array() {
                        let mut ty = (**sub_type.first_type.as_ref().unwrap()).clone();
                        ty.ref_ = true;
                        ty.constant |= sub_type.constant;
                        self.type_ = Some(ty);
                    } else if !sub_type.is_ref() {
                        ctx.error("can only index a reference", subexpr.at, CompilationError::CantIndex);
                    } else if sub_type.dim.is_empty() {
                        ctx.error("can only index arrays", subexpr.at, CompilationError::CantIndex);
                    } else {
                        let mut ty = sub_type.clone();
                        ty.ref_ = true;
                        ty.dim.pop();
                        self.type_ = Some(ty);
                    }
                }
            }
            ExprKind::Ref2Value { subexpr } => {
                subexpr.infer(ctx);
                let Some(sub_type) = subexpr.type_.clone() else {
                    return;
                };
                if !sub_type.is_ref() {
                    ctx.error("can only dereference a reference", at, CompilationError::CantDereference);
                } else if sub_type.is_ref_type() {
                    // structures, arrays, tables, fixed dims stay references
                    ctx.error(
                        "can only dereference a register-sized value",
                        at,
                        CompilationError::CantDereference,
                    );
                } else if !sub_type.can_copy() {
                    ctx.error(
                        "can't dereference a non-copyable type",
                        at,
                        CompilationError::CantDereference,
                    );
                } else {
                    let mut ty = sub_type;
                    ty.ref_ = false;
                    self.type_ = Some(ty);
                }
            }
            ExprKind::Ref2Ptr { subexpr } => {
                subexpr.infer(ctx);
                let Some(sub_type) = subexpr.type_.clone() else {
                    return;
                };
                if !sub_type.is_ref() {
                    ctx.error(
                        "can only take the address of a reference",
                        at,
                        CompilationError::CantDereference,
                    );
                    return;
                }
                let mut pointee = sub_type;
                pointee.ref_ = false;
                self.type_ = Some(TypeDecl::pointer_to(pointee));
            }
            ExprKind::Ptr2Ref { subexpr } => {
                subexpr.infer(ctx);
                if subexpr.type_.is_none() {
                    return;
                }
                auto_deref_boxed(subexpr);
                let sub_type = subexpr.type_.as_ref().unwrap();
                if !sub_type.is_pointer() {
                    ctx.error("can only dereference a pointer", at, CompilationError::CantDereference);
                } else if sub_type.first_type.as_ref().is_none_or(|f| f.is_void()) {
                    ctx.error(
                        "can only dereference a pointer to something",
                        at,
                        CompilationError::CantDereference,
                    );
                } else {
                    let mut ty = (**sub_type.first_type.as_ref().unwrap()).clone();
                    ty.ref_ = true;
                    ty.constant |= sub_type.constant;
                    self.type_ = Some(ty);
                }
            }
            ExprKind::NullCoalescing { subexpr, default } => {
                subexpr.infer(ctx);
                default.infer(ctx);
                if subexpr.type_.is_none() || default.type_.is_none() {
                    return;
                }
                auto_deref_boxed(subexpr);
                let se_type = subexpr.type_.clone().unwrap();
                let dv_type = default.type_.clone().unwrap();
                if !se_type.is_pointer() {
                    ctx.error("can only dereference a pointer", at, CompilationError::CantDereference);
                } else if se_type.first_type.as_ref().is_none_or(|f| f.is_void()) {
                    ctx.error(
                        "can only dereference a pointer to something",
                        at,
                        CompilationError::CantDereference,
                    );
                } else if !se_type
                    .first_type
                    .as_ref()
                    .unwrap()
                    .is_same(&dv_type, false, false)
                {
                    ctx.error(
                        format!(
                            "default value type mismatch in {} vs {dv_type}",
                            se_type.first_type.as_ref().unwrap()
                        ),
                        at,
                        CompilationError::CantDereference,
                    );
                } else if !se_type.is_const() && dv_type.is_const() {
                    ctx.error(
                        format!(
                            "default value type mismatch, constant matters in {se_type} vs {dv_type}"
                        ),
                        at,
                        CompilationError::CantDereference,
                    );
                } else {
                    let mut ty = dv_type;
                    ty.constant |= se_type.constant;
                    self.type_ = Some(ty);
                }
            }
            ExprKind::Op1 {
                op,
                subexpr,
                resolved,
            } => {
                subexpr.infer(ctx);
                if subexpr.type_.is_none() {
                    return;
                }
                let name = op.to_string();
                let mut args = vec![mem::replace(&mut **subexpr, Expression::brk(at))];
                let outcome = resolve_call(ctx, at, &name, &mut args, true);
                **subexpr = args.pop().unwrap();
                if let Some((target, result)) = outcome {
                    *resolved = Some(target);
                    self.type_ = Some(result);
                }
            }
            ExprKind::Op2 {
                op,
                left,
                right,
                resolved,
            } => {
                left.infer(ctx);
                right.infer(ctx);
                let (Some(lt), Some(rt)) = (left.type_.clone(), right.type_.clone()) else {
                    return;
                };
                if lt.is_pointer() && rt.is_pointer() && !lt.is_same(&rt, false, false) {
                    ctx.error(
                        "operations on incompatible pointers are prohibited",
                        at,
                        CompilationError::OperatorNotFound,
                    );
                }
                let name = op.to_string();
                let mut args = vec![
                    mem::replace(&mut **left, Expression::brk(at)),
                    mem::replace(&mut **right, Expression::brk(at)),
                ];
                let outcome = resolve_call(ctx, at, &name, &mut args, true);
                **right = args.pop().unwrap();
                **left = args.pop().unwrap();
                if let Some((target, result)) = outcome {
                    *resolved = Some(target);
                    self.type_ = Some(result);
                }
            }
            ExprKind::Op3 { cond, left, right } => {
                cond.infer(ctx);
                left.infer(ctx);
                right.infer(ctx);
                if cond.type_.is_none() || left.type_.is_none() || right.type_.is_none() {
                    return;
                }
                auto_deref_boxed(cond);
                if !cond.type_.as_ref().unwrap().is_simple_of(BaseType::Bool) {
                    ctx.error(
                        "conditional operator condition must be boolean",
                        at,
                        CompilationError::ConditionMustBeBool,
                    );
                } else if !left
                    .type_
                    .as_ref()
                    .unwrap()
                    .is_same(right.type_.as_ref().unwrap(), false, false)
                {
                    ctx.error(
                        "conditional operator must return the same type on both sides",
                        at,
                        CompilationError::OperatorNotFound,
                    );
                } else {
                    // if only one arm is a reference, load both; non-simple
                    // types answer is_ref on both sides and stay references
                    if left.type_.as_ref().unwrap().is_ref()
                        != right.type_.as_ref().unwrap().is_ref()
                    {
                        auto_deref_boxed(left);
                        auto_deref_boxed(right);
                    }
                    let mut ty = left.type_.clone().unwrap();
                    ty.constant |= right.type_.as_ref().unwrap().constant;
                    self.type_ = Some(ty);
                }
            }
            ExprKind::Copy { left, right } => {
                left.infer(ctx);
                right.infer(ctx);
                let (Some(lt), Some(rt)) = (left.type_.clone(), right.type_.clone()) else {
                    return;
                };
                if !lt.is_same(&rt, false, false) {
                    ctx.error(
                        format!("can only copy the same type, {lt} vs {rt}"),
                        at,
                        CompilationError::OperatorNotFound,
                    );
                } else if !lt.is_ref() {
                    ctx.error(
                        "can only copy to a reference",
                        at,
                        CompilationError::CantWriteToNonReference,
                    );
                } else if lt.constant {
                    ctx.error(
                        "can't write to a constant value",
                        at,
                        CompilationError::CantWriteToConst,
                    );
                }
                if !lt.can_copy() {
                    ctx.error(
                        "this type can't be copied, use <- instead",
                        at,
                        CompilationError::CantCopy,
                    );
                }
                self.type_ = Some(lt);
            }
            ExprKind::Move { left, right } => {
                left.infer(ctx);
                right.infer(ctx);
                let (Some(lt), Some(rt)) = (left.type_.clone(), right.type_.clone()) else {
                    return;
                };
                if !lt.is_same(&rt, false, false) {
                    ctx.error("can only move the same type", at, CompilationError::OperatorNotFound);
                } else if !lt.is_ref() {
                    ctx.error(
                        "can only move to a reference",
                        at,
                        CompilationError::CantWriteToNonReference,
                    );
                } else if lt.constant {
                    ctx.error(
                        "can't move to a constant value",
                        at,
                        CompilationError::CantMoveToConst,
                    );
                } else if !lt.can_move() {
                    ctx.error("this type can't be moved", at, CompilationError::CantMove);
                } else if lt.can_copy() {
                    ctx.error(
                        "this type can be copied, use = instead",
                        at,
                        CompilationError::CantMove,
                    );
                }
                self.type_ = Some(lt);
            }
            ExprKind::Sequence { .. } => {
                ctx.error(
                    "sequence must be expanded by the parser",
                    at,
                    CompilationError::MissingNode,
                );
            }
            ExprKind::Assert { args } => {
                if args.len() < 1 || args.len() > 2 {
                    ctx.error(
                        "assert(expr) or assert(expr,string)",
                        at,
                        CompilationError::InvalidArgumentCount,
                    );
                    return;
                }
                if !infer_arguments(ctx, args) {
                    return;
                }
                for arg in args.iter_mut() {
                    auto_deref_in_place(arg);
                }
                if !args[0].type_.as_ref().unwrap().is_simple_of(BaseType::Bool) {
                    ctx.error(
                        "assert condition must be boolean",
                        at,
                        CompilationError::InvalidArgumentType,
                    );
                }
                if args.len() == 2 && !args[1].is_string_constant() {
                    ctx.error(
                        "assert message must be a string constant",
                        at,
                        CompilationError::InvalidArgumentType,
                    );
                }
                self.type_ = Some(TypeDecl::new(BaseType::Void));
            }
            ExprKind::Debug { args } => {
                if args.len() < 1 || args.len() > 2 {
                    ctx.error(
                        "debug(expr) or debug(expr,string)",
                        at,
                        CompilationError::InvalidArgumentCount,
                    );
                    return;
                }
                if !infer_arguments(ctx, args) {
                    return;
                }
                if args.len() == 2 && !args[1].is_string_constant() {
                    ctx.error(
                        "debug label must be a string constant",
                        at,
                        CompilationError::InvalidArgumentType,
                    );
                }
                self.type_ = args[0].type_.clone();
            }
            ExprKind::Hash { args } => {
                if args.len() != 1 {
                    ctx.error("hash(expr)", at, CompilationError::InvalidArgumentCount);
                    return;
                }
                if !infer_arguments(ctx, args) {
                    return;
                }
                self.type_ = Some(TypeDecl::new(BaseType::UInt64));
            }
            ExprKind::SizeOf { subexpr, resolved } => {
                subexpr.infer(ctx);
                let Some(sub_type) = subexpr.type_.clone() else {
                    return;
                };
                *resolved = Some(sub_type);
                self.type_ = Some(TypeDecl::new(BaseType::Int));
            }
            ExprKind::New { type_ } => {
                if type_.ref_ {
                    ctx.error("can't new a reference", at, CompilationError::InvalidNewType);
                } else if !type_.dim.is_empty() {
                    ctx.error("can only new a single object", at, CompilationError::InvalidNewType);
                } else if type_.base == BaseType::Structure || type_.is_handle() {
                    self.type_ = Some(TypeDecl::pointer_to(type_.clone()));
                } else {
                    ctx.error(
                        "can only new structures or handles",
                        at,
                        CompilationError::InvalidNewType,
                    );
                }
            }
            ExprKind::Delete { subexpr } => {
                subexpr.infer(ctx);
                let Some(sub_type) = subexpr.type_.clone() else {
                    return;
                };
                if sub_type.constant {
                    ctx.error(
                        "can't delete a constant value",
                        at,
                        CompilationError::CantDelete,
                    );
                } else if sub_type.is_pointer() {
                    if !sub_type.ref_ {
                        ctx.error(
                            "can only delete a pointer variable",
                            at,
                            CompilationError::CantDelete,
                        );
                    } else if sub_type.first_type.as_ref().is_none_or(|f| f.is_void()) {
                        ctx.error(
                            "can only delete a pointer to something",
                            at,
                            CompilationError::CantDelete,
                        );
                    } else {
                        self.type_ = Some(TypeDecl::new(BaseType::Void));
                    }
                } else if sub_type.is_good_array() || sub_type.is_good_table() {
                    self.type_ = Some(TypeDecl::new(BaseType::Void));
                } else {
                    ctx.error(
                        "can only delete pointers, arrays, or tables",
                        at,
                        CompilationError::CantDelete,
                    );
                }
            }
            ExprKind::Push { args } => {
                if args.len() != 2 && args.len() != 3 {
                    ctx.error(
                        "push(array,value) or push(array,value,at)",
                        at,
                        CompilationError::InvalidArgumentCount,
                    );
                    return;
                }
                if !infer_arguments(ctx, args) {
                    return;
                }
                let array_type = args[0].type_.clone().unwrap();
                let value_type = args[1].type_.clone().unwrap();
                if !array_type.is_good_array() {
                    ctx.error(
                        "push first argument must be a fully qualified array",
                        at,
                        CompilationError::InvalidArgumentType,
                    );
                    return;
                }
                if !array_type
                    .first_type
                    .as_ref()
                    .unwrap()
                    .is_same(&value_type, false, false)
                {
                    ctx.error(
                        "can't push a value of a different type",
                        at,
                        CompilationError::InvalidArgumentType,
                    );
                }
                if args.len() == 3 {
                    auto_deref_in_place(&mut args[2]);
                    if !args[2].type_.as_ref().unwrap().is_index() {
                        ctx.error(
                            "push index must be int or uint",
                            at,
                            CompilationError::InvalidArgumentType,
                        );
                    }
                }
                self.type_ = Some(TypeDecl::new(BaseType::Void));
            }
            ExprKind::Resize { args } | ExprKind::Reserve { args } => {
                if args.len() != 2 {
                    ctx.error(
                        "expecting an array and a size",
                        at,
                        CompilationError::InvalidArgumentCount,
                    );
                    return;
                }
                if !infer_arguments(ctx, args) {
                    return;
                }
                if !args[0].type_.as_ref().unwrap().is_good_array() {
                    ctx.error(
                        "first argument must be a fully qualified array",
                        at,
                        CompilationError::InvalidArgumentType,
                    );
                    return;
                }
                auto_deref_in_place(&mut args[1]);
                if !args[1].type_.as_ref().unwrap().is_index() {
                    ctx.error(
                        "size must be int or uint",
                        at,
                        CompilationError::InvalidArgumentType,
                    );
                }
                self.type_ = Some(TypeDecl::new(BaseType::Void));
            }
            ExprKind::Erase { args } => {
                if args.len() != 2 {
                    ctx.error(
                        "erase(array,index) or erase(table,key)",
                        at,
                        CompilationError::InvalidArgumentCount,
                    );
                    return;
                }
                if !infer_arguments(ctx, args) {
                    return;
                }
                auto_deref_in_place(&mut args[1]);
                let container = args[0].type_.clone().unwrap();
                let value_type = args[1].type_.clone().unwrap();
                if container.is_good_array() {
                    if !value_type.is_index() {
                        ctx.error(
                            "index must be int or uint",
                            at,
                            CompilationError::InvalidArgumentType,
                        );
                    }
                    self.type_ = Some(TypeDecl::new(BaseType::Void));
                } else if container.is_good_table() {
                    if !container
                        .first_type
                        .as_ref()
                        .unwrap()
                        .is_same(&value_type, false, false)
                    {
                        ctx.error(
                            "key must be of the same type as table<key,...>",
                            at,
                            CompilationError::InvalidArgumentType,
                        );
                    }
                    self.type_ = Some(TypeDecl::new(BaseType::Bool));
                } else {
                    ctx.error(
                        "first argument must be a fully qualified array or table",
                        at,
                        CompilationError::InvalidArgumentType,
                    );
                }
            }
            ExprKind::Find { args } => {
                if args.len() != 2 {
                    ctx.error("find(table,key)", at, CompilationError::InvalidArgumentCount);
                    return;
                }
                if !infer_arguments(ctx, args) {
                    return;
                }
                auto_deref_in_place(&mut args[1]);
                let container = args[0].type_.clone().unwrap();
                let value_type = args[1].type_.clone().unwrap();
                if container.is_good_table() {
                    if !container
                        .first_type
                        .as_ref()
                        .unwrap()
                        .is_same(&value_type, false, false)
                    {
                        ctx.error(
                            "key must be of the same type as table<key,...>",
                            at,
                            CompilationError::InvalidArgumentType,
                        );
                    }
                    self.type_ = Some(TypeDecl::pointer_to(
                        (**container.second_type.as_ref().unwrap()).clone(),
                    ));
                } else if container.is_good_array() {
                    ctx.error(
                        "find over arrays is not supported; use find(table,key)",
                        at,
                        CompilationError::FunctionNotFound,
                    );
                } else {
                    ctx.error(
                        "first argument must be a fully qualified table",
                        at,
                        CompilationError::InvalidArgumentType,
                    );
                }
            }
            ExprKind::Keys { args } => {
                self.type_ = infer_table_iterator(ctx, at, args, true);
            }
            ExprKind::Values { args } => {
                self.type_ = infer_table_iterator(ctx, at, args, false);
            }
            ExprKind::Invoke { args } => {
                if args.len() != 1 {
                    ctx.error("invoke(block)", at, CompilationError::InvalidArgumentCount);
                    return;
                }
                if !infer_arguments(ctx, args) {
                    return;
                }
                auto_deref_in_place(&mut args[0]);
                let block_type = args[0].type_.clone().unwrap();
                if !block_type.is_good_block() {
                    ctx.error("expecting a block", at, CompilationError::InvalidArgumentType);
                }
                self.type_ = match block_type.first_type {
                    Some(result) => Some(*result),
                    None => Some(TypeDecl::new(BaseType::Void)),
                };
            }
            ExprKind::MakeBlock { block } => {
                if let ExprKind::Block { closure, .. } = &mut block.kind {
                    *closure = true;
                }
                block.infer(ctx);
                let mut ty = TypeDecl::new(BaseType::Block);
                if let Some(block_type) = &block.type_ {
                    ty.first_type = Some(Box::new(block_type.clone()));
                }
                self.type_ = Some(ty);
            }
            ExprKind::Call {
                name,
                args,
                resolved,
            } => {
                if !infer_arguments(ctx, args) {
                    return;
                }
                let name = name.clone();
                if let Some((target, result)) = resolve_call(ctx, at, &name, args, false) {
                    *resolved = Some(target);
                    self.type_ = Some(result);
                }
            }
            ExprKind::IfThenElse {
                cond,
                if_true,
                if_false,
            } => {
                cond.infer(ctx);
                if_true.infer(ctx);
                if let Some(e) = if_false {
                    e.infer(ctx);
                }
                if cond.type_.is_none() {
                    return;
                }
                auto_deref_boxed(cond);
                if !cond.type_.as_ref().unwrap().is_simple_of(BaseType::Bool) {
                    ctx.error(
                        "if condition must be boolean",
                        at,
                        CompilationError::ConditionMustBeBool,
                    );
                }
                self.type_ = Some(TypeDecl::new(BaseType::Void));
            }
            ExprKind::While { cond, body } => {
                cond.infer(ctx);
                if cond.type_.is_none() {
                    return;
                }
                auto_deref_boxed(cond);
                if !cond.type_.as_ref().unwrap().is_simple_of(BaseType::Bool) {
                    ctx.error(
                        "while condition must be boolean",
                        at,
                        CompilationError::ConditionMustBeBool,
                    );
                } else {
                    ctx.loop_depth += 1;
                    body.infer(ctx);
                    ctx.loop_depth -= 1;
                }
                self.type_ = Some(TypeDecl::new(BaseType::Void));
            }
            ExprKind::For {
                iterators,
                sources,
                body,
                filter,
                iter_vars,
                fixed_size,
            } => {
                if iterators.is_empty() {
                    ctx.error("for needs at least one iterator", at, CompilationError::InvalidIterationSource);
                    return;
                }
                if iterators.len() != sources.len() {
                    ctx.error(
                        "for needs as many iterators as sources",
                        at,
                        CompilationError::InvalidIterationSource,
                    );
                    return;
                }
                if sources.len() > MAX_FOR_ITERATORS {
                    ctx.error("too many for sources", at, CompilationError::InvalidIterationSource);
                    return;
                }
                let saved_stack = ctx.stack_top;
                let saved_locals = ctx.locals.len();
                let mut smallest = u32::MAX;
                for src in sources.iter_mut() {
                    src.infer(ctx);
                    let Some(src_type) = &src.type_ else { return };
                    if src_type.is_fixed_array() {
                        smallest = smallest.min(*src_type.dim.last().unwrap());
                    }
                }
                iter_vars.clear();
                for (name, src) in iterators.iter().zip(sources.iter()) {
                    let src_type = src.type_.as_ref().unwrap();
                    let var_type = if src_type.is_fixed_array() {
                        let mut ty = src_type.clone();
                        ty.ref_ = true;
                        ty.dim.pop();
                        Some(ty)
                    } else if src_type.is_good_iterator() {
                        Some((**src_type.first_type.as_ref().unwrap()).clone())
                    } else if src_type.is_good_array() {
                        let mut ty = (**src_type.first_type.as_ref().unwrap()).clone();
                        ty.ref_ = true;
                        Some(ty)
                    } else if src_type.is_range() {
                        Some(TypeDecl::new(src_type.range_base_type()))
                    } else {
                        None
                    };
                    let Some(var_type) = var_type else {
                        ctx.error(
                            format!("unsupported iteration source for {name}"),
                            at,
                            CompilationError::InvalidIterationSource,
                        );
                        ctx.stack_top = saved_stack;
                        ctx.locals.truncate(saved_locals);
                        return;
                    };
                    let stack_top = ctx.bump_stack(&var_type);
                    ctx.locals.push(LocalVar {
                        name: name.clone(),
                        type_: var_type.clone(),
                        stack_top,
                    });
                    iter_vars.push(IterVar {
                        name: name.clone(),
                        stack_top,
                        type_: var_type,
                    });
                }
                *fixed_size = smallest;
                ctx.loop_depth += 1;
                if let Some(f) = filter {
                    f.infer(ctx);
                    if let Some(filter_type) = &f.type_ {
                        if filter_type.is_ref() {
                            auto_deref_boxed(f);
                        }
                        if !f.type_.as_ref().unwrap().is_simple_of(BaseType::Bool) {
                            ctx.error(
                                "where clause must be boolean",
                                at,
                                CompilationError::ConditionMustBeBool,
                            );
                        }
                    }
                }
                body.infer(ctx);
                ctx.loop_depth -= 1;
                ctx.stack_top = saved_stack;
                ctx.locals.truncate(saved_locals);
                self.type_ = Some(TypeDecl::new(BaseType::Void));
            }
            ExprKind::Let {
                variables,
                subexpr,
                scoped,
                returns_value,
            } => {
                let saved_stack = ctx.stack_top;
                let saved_locals = ctx.locals.len();
                for var in variables.iter_mut() {
                    if var.type_.ref_ {
                        ctx.error(
                            "local variable can't be a reference",
                            var.at,
                            CompilationError::InvalidVariableType,
                        );
                    }
                    if var.type_.is_void() {
                        ctx.error(
                            "local variable can't be void",
                            var.at,
                            CompilationError::InvalidVariableType,
                        );
                    }
                    if var.type_.is_handle()
                        && let Some(ann) = &var.type_.annotation
                        && !ann.is_local()
                    {
                        ctx.error(
                            format!("handled type {} can't be local", ann.name()),
                            var.at,
                            CompilationError::InvalidVariableType,
                        );
                    }
                    var.stack_top = ctx.bump_stack(&var.type_);
                    ctx.locals.push(LocalVar {
                        name: var.name.clone(),
                        type_: var.type_.clone(),
                        stack_top: var.stack_top,
                    });
                    if let Some(init) = &mut var.init {
                        init.infer(ctx);
                        let Some(init_type) = &init.type_ else {
                            continue;
                        };
                        if !var.type_.is_same(init_type, false, false) {
                            ctx.error(
                                format!(
                                    "variable initialization type mismatch, {} = {init_type}",
                                    var.type_
                                ),
                                var.at,
                                CompilationError::CantInitialize,
                            );
                        } else if var.type_.base == BaseType::Structure {
                            ctx.error(
                                "can't initialize structures",
                                var.at,
                                CompilationError::CantInitialize,
                            );
                        } else if !init_type.can_copy() && !init_type.can_move() {
                            ctx.error(
                                "this variable can't be initialized at all",
                                var.at,
                                CompilationError::CantInitialize,
                            );
                        }
                    }
                }
                if let Some(sub) = subexpr {
                    sub.infer(ctx);
                    if *returns_value && sub.type_.is_some() {
                        auto_deref_boxed(sub);
                        self.type_ = sub.type_.clone();
                    }
                }
                if self.type_.is_none() {
                    self.type_ = Some(TypeDecl::new(BaseType::Void));
                }
                if *scoped {
                    ctx.stack_top = saved_stack;
                    ctx.locals.truncate(saved_locals);
                }
            }
            ExprKind::Block {
                list,
                closure,
                returns_value,
            } => {
                let saved_locals = ctx.locals.len();
                for expr in list.iter_mut() {
                    expr.infer(ctx);
                }
                if *returns_value && !list.is_empty() {
                    let flags: EvalFlags = list.iter().fold(EvalFlags::empty(), |acc, e| {
                        acc | e.eval_flags()
                    });
                    if flags.contains(EvalFlags::RETURN) {
                        ctx.error(
                            "a captured block can't return outside of the block",
                            at,
                            CompilationError::InvalidBlock,
                        );
                    } else if flags.contains(EvalFlags::BREAK) {
                        ctx.error(
                            "a captured block can't break outside of the block",
                            at,
                            CompilationError::InvalidBlock,
                        );
                    } else {
                        let tail = list.last_mut().unwrap();
                        if tail.type_.is_some() {
                            auto_deref_in_place(tail);
                            self.type_ = tail.type_.clone();
                        }
                    }
                }
                let _ = closure;
                if self.type_.is_none() {
                    self.type_ = Some(TypeDecl::new(BaseType::Void));
                }
                ctx.locals.truncate(saved_locals);
            }
            ExprKind::Return { subexpr } => {
                if let Some(sub) = subexpr {
                    sub.infer(ctx);
                    if sub.type_.is_none() {
                        return;
                    }
                    auto_deref_boxed(sub);
                }
                let result = ctx.func_result.clone();
                if result.is_void() {
                    if subexpr.is_some() {
                        ctx.error(
                            "a void function has no return value",
                            at,
                            CompilationError::NotExpectingReturnValue,
                        );
                    }
                    self.type_ = Some(TypeDecl::new(BaseType::Void));
                } else if let Some(sub) = subexpr {
                    let sub_type = sub.type_.as_ref().unwrap();
                    if !result.is_same(sub_type, true, false) {
                        ctx.error(
                            format!("incompatible return type, expecting {result} vs {sub_type}"),
                            at,
                            CompilationError::InvalidReturnType,
                        );
                    }
                    if result.is_pointer() && !result.is_const() && sub_type.is_const() {
                        ctx.error(
                            format!(
                                "incompatible return type, constant matters. expecting {result} vs {sub_type}"
                            ),
                            at,
                            CompilationError::InvalidReturnType,
                        );
                    }
                    let mut ty = result;
                    ty.ref_ = true;
                    self.type_ = Some(ty);
                } else {
                    ctx.error("must return a value", at, CompilationError::ExpectingReturnValue);
                }
            }
            ExprKind::Break => {
                if ctx.loop_depth == 0 {
                    ctx.error("break without a loop", at, CompilationError::InvalidBlock);
                }
                self.type_ = Some(TypeDecl::new(BaseType::Void));
            }
            ExprKind::Continue => {
                if ctx.loop_depth == 0 {
                    ctx.error("continue without a loop", at, CompilationError::InvalidBlock);
                }
                self.type_ = Some(TypeDecl::new(BaseType::Void));
            }
            ExprKind::TryCatch {
                try_block,
                catch_block,
            } => {
                try_block.infer(ctx);
                catch_block.infer(ctx);
                self.type_ = Some(TypeDecl::new(BaseType::Void));
            }
        }
    }
}
