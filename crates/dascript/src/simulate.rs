//! Lowering: typed AST to SimNodes.
//!
//! Runs only on a program that inferred cleanly, as a pure read of the AST:
//! every node resolution lowering needs was recorded during inference. Where
//! behavior depends on a base type (copies, operators, hashing), the node is
//! specialized by that type; generic reference operations carry a byte size
//! instead.

use crate::{
    context::{Context, NodeId, SimFunction, SimGlobal},
    debug_info::DebugInfoBuilder,
    expressions::{CallTarget, ExprKind, Expression, VarRef, Variable},
    program::Program,
    register::{MemPtr, Register},
    typedecl::{align_up, BaseType, TypeDecl},
    vm::{
        iterator::IterSource,
        policy::Op2Kind,
        DeleteKind, SimNode,
    },
};

pub(crate) struct Lower<'a> {
    code: &'a mut crate::context::CodeStore,
    debug: DebugInfoBuilder,
}

impl Lower<'_> {
    fn node(&mut self, node: SimNode) -> NodeId {
        self.code.push_node(node)
    }

    fn name(&mut self, text: &str) -> MemPtr {
        self.code.allocate_name(text)
    }
}

/// Populates the context from a typed program: global slots and init nodes,
/// then every simulated function in index order.
pub(crate) fn simulate_program(program: &Program, context: &mut Context) {
    // re-simulating replaces the whole arena; nothing is freed piecemeal
    context.code = crate::context::CodeStore::default();
    let mut lw = Lower {
        code: &mut context.code,
        debug: DebugInfoBuilder::default(),
    };
    let module = program.user_module();

    let mut offset = 0u32;
    for (_, var) in &module.globals {
        offset = align_up(offset, 16);
        let size = var.type_.size_of();
        let debug = lw.debug.make_var_info(lw.code, var);
        let index = lw.code.globals.len() as u32;
        let init = var
            .init
            .as_ref()
            .map(|init| simulate_global_init(&mut lw, var, index, init));
        lw.code.globals.push(SimGlobal {
            name: var.name.clone(),
            offset,
            size,
            init,
            init_stack_size: var.stack_top,
            debug,
        });
        offset += size.max(1);
    }
    lw.code.globals_size = align_up(offset, 16);

    let mut functions: Vec<&crate::module::Function> = module
        .functions
        .values()
        .filter(|f| f.builtin.is_none() && f.index >= 0)
        .collect();
    functions.sort_by_key(|f| f.index);
    for func in functions {
        let body = func
            .body
            .as_ref()
            .expect("typed function has a body");
        let code = body.simulate(&mut lw);
        let debug = lw.debug.make_func_info(lw.code, func);
        lw.code.functions.push(SimFunction {
            name: func.name.clone(),
            code,
            stack_size: func.total_stack_size,
            debug,
        });
    }
}

/// Copy specialization: byte copy for reference values, register store for
/// everything else.
fn make_copy(lw: &mut Lower<'_>, right_type: &TypeDecl, l: NodeId, r: NodeId) -> NodeId {
    if right_type.is_ref() {
        lw.node(SimNode::CopyRefValue {
            l,
            r,
            size: right_type.size_of(),
        })
    } else {
        lw.node(SimNode::CopyValue {
            l,
            r,
            size: right_type.size_of(),
        })
    }
}

/// Move specialization: byte copy plus source zeroing for non-pod values.
fn make_move(lw: &mut Lower<'_>, right_type: &TypeDecl, l: NodeId, r: NodeId) -> NodeId {
    lw.node(SimNode::MoveRefValue {
        l,
        r,
        size: right_type.size_of(),
        zero_source: !right_type.is_pod(),
    })
}

/// An initializer lowered as `destination (=|<-) init`.
fn simulate_init(lw: &mut Lower<'_>, var: &Variable, get: NodeId, init: &Expression) -> NodeId {
    let init_type = init.type_.as_ref().expect("typed initializer");
    let r = init.simulate(lw);
    if var.type_.can_copy() {
        make_copy(lw, init_type, get, r)
    } else {
        make_move(lw, init_type, get, r)
    }
}

fn simulate_global_init(lw: &mut Lower<'_>, var: &Variable, index: u32, init: &Expression) -> NodeId {
    let get = lw.node(SimNode::GetGlobal { index });
    simulate_init(lw, var, get, init)
}

fn simulate_local_init(lw: &mut Lower<'_>, var: &Variable, init: &Expression) -> NodeId {
    let get = lw.node(SimNode::GetLocal {
        stack_top: var.stack_top,
    });
    simulate_init(lw, var, get, init)
}

fn string_constant(args: &[Expression], index: usize) -> &str {
    match args.get(index).map(|a| &a.kind) {
        Some(ExprKind::ConstString(s)) => s,
        _ => "",
    }
}

impl Expression {
    /// The inferred type; lowering only runs on typed programs.
    fn ty(&self) -> &TypeDecl {
        self.type_.as_ref().expect("expression was typed by inference")
    }

    /// Lowers this expression into the context arena.
    pub(crate) fn simulate(&self, lw: &mut Lower<'_>) -> NodeId {
        match &self.kind {
            ExprKind::ConstBool(v) => lw.node(SimNode::ConstReg {
                value: Register::put(*v),
            }),
            ExprKind::ConstInt(v) => lw.node(SimNode::ConstReg {
                value: Register::put(*v),
            }),
            ExprKind::ConstUInt(v) => lw.node(SimNode::ConstReg {
                value: Register::put(*v),
            }),
            ExprKind::ConstInt64(v) => lw.node(SimNode::ConstReg {
                value: Register::put(*v),
            }),
            ExprKind::ConstUInt64(v) => lw.node(SimNode::ConstReg {
                value: Register::put(*v),
            }),
            ExprKind::ConstFloat(v) => lw.node(SimNode::ConstReg {
                value: Register::put(*v),
            }),
            ExprKind::ConstDouble(v) => lw.node(SimNode::ConstReg {
                value: Register::put(*v),
            }),
            ExprKind::ConstString(s) => {
                let text = lw.name(s);
                lw.node(SimNode::ConstReg {
                    value: Register::put(text),
                })
            }
            ExprKind::ConstPtr => lw.node(SimNode::ConstReg {
                value: Register::put(MemPtr::NULL),
            }),
            ExprKind::ConstEnum { value, .. } => lw.node(SimNode::ConstReg {
                value: Register::put(*value),
            }),
            ExprKind::Var { resolved, .. } => match *resolved {
                VarRef::Local {
                    stack_top,
                    ref_in_slot,
                } => {
                    if ref_in_slot {
                        lw.node(SimNode::GetLocalRef { stack_top })
                    } else {
                        lw.node(SimNode::GetLocal { stack_top })
                    }
                }
                VarRef::Argument { index } => lw.node(SimNode::GetArgument { index }),
                VarRef::Global { index } => lw.node(SimNode::GetGlobal { index }),
                VarRef::Unresolved => unreachable!("unresolved variable survived inference"),
            },
            ExprKind::Field { value, resolved, .. } => {
                let offset = resolved.expect("resolved field").offset;
                let v = value.simulate(lw);
                if value.ty().is_pointer() {
                    lw.node(SimNode::PtrFieldDeref { value: v, offset })
                } else {
                    lw.node(SimNode::FieldDeref { value: v, offset })
                }
            }
            ExprKind::SafeField {
                value,
                resolved,
                skip_wrap,
                ..
            } => {
                let offset = resolved.expect("resolved field").offset;
                let v = value.simulate(lw);
                if *skip_wrap {
                    lw.node(SimNode::SafeFieldDerefPtr { value: v, offset })
                } else {
                    lw.node(SimNode::SafeFieldDeref { value: v, offset })
                }
            }
            ExprKind::At { subexpr, index } => {
                let sub_type = subexpr.ty().clone();
                let value = subexpr.simulate(lw);
                let idx = index.simulate(lw);
                if sub_type.is_good_table() {
                    let key = sub_type.first_type.as_ref().unwrap();
                    let value_size = sub_type.second_type.as_ref().unwrap().size_of();
                    lw.node(SimNode::TableIndex {
                        table: value,
                        key: idx,
                        key_ty: key.base,
                        value_size,
                    })
                } else if sub_type.is_good_array() {
                    lw.node(SimNode::ArrayAt {
                        array: value,
                        index: idx,
                        stride: sub_type.first_type.as_ref().unwrap().size_of(),
                    })
                } else if sub_type.is_handle() {
                    let (_, stride) = sub_type
                        .annotation
                        .as_ref()
                        .and_then(|a| a.index(&TypeDecl::new(BaseType::Int)))
                        .expect("indexable handle");
                    lw.node(SimNode::At {
                        value,
                        index: idx,
                        stride,
                        range: u32::MAX,
                    })
                } else {
                    lw.node(SimNode::At {
                        value,
                        index: idx,
                        stride: sub_type.stride(),
                        range: *sub_type.dim.last().unwrap(),
                    })
                }
            }
            ExprKind::Ref2Value { subexpr } => {
                let sub = subexpr.simulate(lw);
                lw.node(SimNode::Ref2Value {
                    subexpr: sub,
                    size: self.ty().size_of(),
                })
            }
            ExprKind::Ptr2Ref { subexpr } => {
                let sub = subexpr.simulate(lw);
                lw.node(SimNode::Ptr2Ref { subexpr: sub })
            }
            // a reference already is the pointer value; no node of its own
            ExprKind::Ref2Ptr { subexpr } => subexpr.simulate(lw),
            ExprKind::NullCoalescing { subexpr, default } => {
                let sub = subexpr.simulate(lw);
                let def = default.simulate(lw);
                if self.ty().ref_ {
                    lw.node(SimNode::NullCoalescingRef {
                        subexpr: sub,
                        default: def,
                    })
                } else {
                    lw.node(SimNode::NullCoalescing {
                        subexpr: sub,
                        default: def,
                        size: self.ty().size_of(),
                    })
                }
            }
            ExprKind::Op1 {
                subexpr, resolved, ..
            } => {
                let target = resolved.as_ref().expect("resolved operator");
                match target {
                    CallTarget::Policy1 { kind, ty } => {
                        let x = subexpr.simulate(lw);
                        lw.node(SimNode::Op1 {
                            kind: *kind,
                            ty: *ty,
                            x,
                        })
                    }
                    CallTarget::User { fn_index } => {
                        let x = subexpr.simulate(lw);
                        let args = lw.code.push_list(&[x]);
                        lw.node(SimNode::Call {
                            fn_index: *fn_index,
                            args,
                            line: self.at.line,
                        })
                    }
                    CallTarget::Native(func) => {
                        let x = subexpr.simulate(lw);
                        let args = lw.code.push_list(&[x]);
                        lw.node(SimNode::CallNative { func: *func, args })
                    }
                    CallTarget::Policy2 { .. } => unreachable!("unary operator with binary target"),
                }
            }
            ExprKind::Op2 {
                left,
                right,
                resolved,
                ..
            } => {
                let target = resolved.as_ref().expect("resolved operator");
                match target {
                    CallTarget::Policy2 { kind, ty } => {
                        let l = left.simulate(lw);
                        let r = right.simulate(lw);
                        match (kind, ty) {
                            (Op2Kind::BoolAnd, BaseType::Bool) => {
                                lw.node(SimNode::BoolAndSc { l, r })
                            }
                            (Op2Kind::BoolOr, BaseType::Bool) => lw.node(SimNode::BoolOrSc { l, r }),
                            _ => lw.node(SimNode::Op2 {
                                kind: *kind,
                                ty: *ty,
                                l,
                                r,
                            }),
                        }
                    }
                    CallTarget::User { fn_index } => {
                        let l = left.simulate(lw);
                        let r = right.simulate(lw);
                        let args = lw.code.push_list(&[l, r]);
                        lw.node(SimNode::Call {
                            fn_index: *fn_index,
                            args,
                            line: self.at.line,
                        })
                    }
                    CallTarget::Native(func) => {
                        let l = left.simulate(lw);
                        let r = right.simulate(lw);
                        let args = lw.code.push_list(&[l, r]);
                        lw.node(SimNode::CallNative { func: *func, args })
                    }
                    CallTarget::Policy1 { .. } => unreachable!("binary operator with unary target"),
                }
            }
            ExprKind::Op3 { cond, left, right } => {
                let c = cond.simulate(lw);
                let t = left.simulate(lw);
                let f = right.simulate(lw);
                lw.node(SimNode::IfThenElse {
                    cond: c,
                    if_true: t,
                    if_false: Some(f),
                })
            }
            ExprKind::Copy { left, right } => {
                let l = left.simulate(lw);
                let r = right.simulate(lw);
                make_copy(lw, right.ty(), l, r)
            }
            ExprKind::Move { left, right } => {
                let l = left.simulate(lw);
                let r = right.simulate(lw);
                make_move(lw, right.ty(), l, r)
            }
            ExprKind::Sequence { .. } => unreachable!("sequence survived inference"),
            ExprKind::Assert { args } => {
                let sub = args[0].simulate(lw);
                let message = lw.name(string_constant(args, 1));
                lw.node(SimNode::Assert {
                    subexpr: sub,
                    message,
                })
            }
            ExprKind::Debug { args } => {
                let arg_type = args[0].ty().clone();
                let sub = args[0].simulate(lw);
                let type_info = lw.debug.make_type_info(lw.code, &arg_type);
                let message = lw.name(string_constant(args, 1));
                lw.node(SimNode::Debug {
                    subexpr: sub,
                    type_info,
                    message,
                    by_ref: arg_type.is_ref(),
                })
            }
            ExprKind::Hash { args } => {
                let arg_type = args[0].ty().clone();
                let sub = args[0].simulate(lw);
                if !arg_type.is_ref() {
                    lw.node(SimNode::HashOfValue {
                        subexpr: sub,
                        size: arg_type.size_of().min(16),
                    })
                } else if arg_type.is_pod() {
                    lw.node(SimNode::HashOfRef {
                        subexpr: sub,
                        size: arg_type.size_of(),
                    })
                } else {
                    let type_info = lw.debug.make_type_info(lw.code, &arg_type);
                    lw.node(SimNode::HashOfMixed {
                        subexpr: sub,
                        type_info,
                    })
                }
            }
            ExprKind::SizeOf { resolved, .. } => {
                let size = resolved.as_ref().expect("resolved sizeof").size_of();
                lw.node(SimNode::ConstReg {
                    value: Register::put(size as i32),
                })
            }
            ExprKind::New { type_ } => lw.node(SimNode::New {
                bytes: type_.size_of(),
            }),
            ExprKind::Delete { subexpr } => {
                let sub_type = subexpr.ty().clone();
                let sub = subexpr.simulate(lw);
                let kind = if sub_type.is_pointer() {
                    DeleteKind::Pointer {
                        bytes: sub_type.first_type.as_ref().unwrap().size_of(),
                    }
                } else if sub_type.is_good_array() {
                    DeleteKind::Array {
                        stride: sub_type.first_type.as_ref().unwrap().size_of(),
                    }
                } else {
                    DeleteKind::Table {
                        key_size: sub_type.first_type.as_ref().unwrap().size_of(),
                        value_size: sub_type.second_type.as_ref().unwrap().size_of(),
                    }
                };
                lw.node(SimNode::Delete { subexpr: sub, kind })
            }
            ExprKind::Push { args } => {
                let elem_size = args[0]
                    .ty()
                    .first_type
                    .as_ref()
                    .unwrap()
                    .size_of();
                let by_ref = args[1].ty().is_ref();
                let array = args[0].simulate(lw);
                let value = args[1].simulate(lw);
                let at_index = args.get(2).map(|a| a.simulate(lw));
                if by_ref {
                    lw.node(SimNode::ArrayPushRef {
                        array,
                        value,
                        at_index,
                        size: elem_size,
                    })
                } else {
                    lw.node(SimNode::ArrayPushValue {
                        array,
                        value,
                        at_index,
                        size: elem_size,
                    })
                }
            }
            ExprKind::Resize { args } => {
                let stride = args[0].ty().first_type.as_ref().unwrap().size_of();
                let array = args[0].simulate(lw);
                let new_size = args[1].simulate(lw);
                lw.node(SimNode::ArrayResize {
                    array,
                    new_size,
                    stride,
                })
            }
            ExprKind::Reserve { args } => {
                let stride = args[0].ty().first_type.as_ref().unwrap().size_of();
                let array = args[0].simulate(lw);
                let capacity = args[1].simulate(lw);
                lw.node(SimNode::ArrayReserve {
                    array,
                    capacity,
                    stride,
                })
            }
            ExprKind::Erase { args } => {
                let container = args[0].ty().clone();
                let c = args[0].simulate(lw);
                let v = args[1].simulate(lw);
                if container.is_good_array() {
                    lw.node(SimNode::ArrayErase {
                        array: c,
                        index: v,
                        stride: container.first_type.as_ref().unwrap().size_of(),
                    })
                } else {
                    lw.node(SimNode::TableErase {
                        table: c,
                        key: v,
                        key_ty: container.first_type.as_ref().unwrap().base,
                        value_size: container.second_type.as_ref().unwrap().size_of(),
                    })
                }
            }
            ExprKind::Find { args } => {
                let container = args[0].ty().clone();
                let c = args[0].simulate(lw);
                let v = args[1].simulate(lw);
                lw.node(SimNode::TableFind {
                    table: c,
                    key: v,
                    key_ty: container.first_type.as_ref().unwrap().base,
                    value_size: container.second_type.as_ref().unwrap().size_of(),
                })
            }
            ExprKind::Keys { args } => {
                let stride = args[0].ty().first_type.as_ref().unwrap().size_of();
                let table = args[0].simulate(lw);
                lw.node(SimNode::TableKeys { table, stride })
            }
            ExprKind::Values { args } => {
                let stride = args[0].ty().second_type.as_ref().unwrap().size_of();
                let table = args[0].simulate(lw);
                lw.node(SimNode::TableValues { table, stride })
            }
            ExprKind::Invoke { args } => {
                let block = args[0].simulate(lw);
                lw.node(SimNode::Invoke { block })
            }
            ExprKind::MakeBlock { block } => {
                let body = block.simulate(lw);
                lw.node(SimNode::MakeBlock { body })
            }
            ExprKind::Call { args, resolved, .. } => {
                let target = resolved.as_ref().expect("resolved call");
                let mut lowered = Vec::with_capacity(args.len());
                for arg in args {
                    lowered.push(arg.simulate(lw));
                }
                let list = lw.code.push_list(&lowered);
                match target {
                    CallTarget::User { fn_index } => lw.node(SimNode::Call {
                        fn_index: *fn_index,
                        args: list,
                        line: self.at.line,
                    }),
                    CallTarget::Native(func) => lw.node(SimNode::CallNative {
                        func: *func,
                        args: list,
                    }),
                    CallTarget::Policy1 { kind, ty } => {
                        let x = lowered[0];
                        lw.node(SimNode::Op1 {
                            kind: *kind,
                            ty: *ty,
                            x,
                        })
                    }
                    CallTarget::Policy2 { kind, ty } => {
                        let (l, r) = (lowered[0], lowered[1]);
                        lw.node(SimNode::Op2 {
                            kind: *kind,
                            ty: *ty,
                            l,
                            r,
                        })
                    }
                }
            }
            ExprKind::IfThenElse {
                cond,
                if_true,
                if_false,
            } => {
                let c = cond.simulate(lw);
                let t = if_true.simulate(lw);
                let f = if_false.as_ref().map(|e| e.simulate(lw));
                lw.node(SimNode::IfThenElse {
                    cond: c,
                    if_true: t,
                    if_false: f,
                })
            }
            ExprKind::While { cond, body } => {
                let c = cond.simulate(lw);
                let b = body.simulate(lw);
                lw.node(SimNode::While { cond: c, body: b })
            }
            ExprKind::For {
                sources,
                body,
                filter,
                iter_vars,
                fixed_size,
                ..
            } => {
                let mut fixed = 0usize;
                let mut good = 0usize;
                let mut ranges = 0usize;
                let mut iterators = 0usize;
                for src in sources {
                    let src_type = src.ty();
                    if src_type.is_fixed_array() {
                        fixed += 1;
                    } else if src_type.is_good_array() {
                        good += 1;
                    } else if src_type.is_range() {
                        ranges += 1;
                    } else {
                        iterators += 1;
                    }
                }
                let stack_tops: Vec<u32> = iter_vars.iter().map(|v| v.stack_top).collect();
                let b = body.simulate(lw);
                let f = filter.as_ref().map(|e| e.simulate(lw));
                let single_kind =
                    [fixed, good, ranges].iter().filter(|&&n| n > 0).count() == 1 && iterators == 0;
                if single_kind && ranges == 1 && sources.len() == 1 {
                    let source = sources[0].simulate(lw);
                    lw.node(SimNode::ForRange {
                        source,
                        stack_top: stack_tops[0],
                        body: b,
                        filter: f,
                    })
                } else if single_kind && good == sources.len() {
                    let mut nodes = Vec::new();
                    let mut strides = Vec::new();
                    for src in sources {
                        strides.push(src.ty().first_type.as_ref().unwrap().size_of());
                        nodes.push(src.simulate(lw));
                    }
                    lw.node(SimNode::ForGoodArray {
                        sources: nodes.into_boxed_slice(),
                        strides: strides.into_boxed_slice(),
                        stack_tops: stack_tops.into_boxed_slice(),
                        body: b,
                        filter: f,
                    })
                } else if single_kind && fixed == sources.len() {
                    let mut nodes = Vec::new();
                    let mut strides = Vec::new();
                    for src in sources {
                        strides.push(src.ty().stride());
                        nodes.push(src.simulate(lw));
                    }
                    lw.node(SimNode::ForFixedArray {
                        sources: nodes.into_boxed_slice(),
                        strides: strides.into_boxed_slice(),
                        stack_tops: stack_tops.into_boxed_slice(),
                        size: *fixed_size,
                        body: b,
                        filter: f,
                    })
                } else {
                    // mixed shapes (or any first-class iterator) go through
                    // the generic iterator protocol
                    let mut iter_sources = Vec::with_capacity(sources.len());
                    for src in sources {
                        let src_type = src.ty().clone();
                        let node = src.simulate(lw);
                        let source = if src_type.is_fixed_array() {
                            IterSource::FixedArray {
                                node,
                                size: *src_type.dim.last().unwrap(),
                                stride: src_type.stride(),
                            }
                        } else if src_type.is_good_array() {
                            IterSource::GoodArray {
                                node,
                                stride: src_type.first_type.as_ref().unwrap().size_of(),
                            }
                        } else if src_type.is_range() {
                            IterSource::Range {
                                node,
                                signed: src_type.base == BaseType::Range,
                            }
                        } else {
                            IterSource::Value { node }
                        };
                        iter_sources.push(source);
                    }
                    lw.node(SimNode::ForWithIterator {
                        sources: iter_sources.into_boxed_slice(),
                        stack_tops: stack_tops.into_boxed_slice(),
                        body: b,
                        filter: f,
                    })
                }
            }
            ExprKind::Let {
                variables, subexpr, ..
            } => {
                let mut inits = Vec::with_capacity(variables.len());
                for var in variables {
                    let node = match &var.init {
                        Some(init) => simulate_local_init(lw, var, init),
                        None => lw.node(SimNode::InitLocal {
                            stack_top: var.stack_top,
                            size: var.type_.size_of(),
                        }),
                    };
                    inits.push(node);
                }
                let list = lw.code.push_list(&inits);
                let sub = subexpr.as_ref().map(|e| e.simulate(lw));
                lw.node(SimNode::Let { list, subexpr: sub })
            }
            ExprKind::Block { list, .. } => {
                if list.len() == 1 {
                    return list[0].simulate(lw);
                }
                let mut nodes = Vec::with_capacity(list.len());
                for expr in list {
                    nodes.push(expr.simulate(lw));
                }
                let list = lw.code.push_list(&nodes);
                lw.node(SimNode::Block { list })
            }
            ExprKind::Return { subexpr } => {
                let sub = subexpr.as_ref().map(|e| e.simulate(lw));
                lw.node(SimNode::Return { subexpr: sub })
            }
            ExprKind::Break => lw.node(SimNode::Break),
            ExprKind::Continue => lw.node(SimNode::Continue),
            ExprKind::TryCatch {
                try_block,
                catch_block,
            } => {
                let t = try_block.simulate(lw);
                let c = catch_block.simulate(lw);
                lw.node(SimNode::TryCatch {
                    try_block: t,
                    catch_block: c,
                })
            }
        }
    }
}
