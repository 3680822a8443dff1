//! The SimNode evaluator.
//!
//! Lowering turns the typed AST into a flat arena of [`SimNode`]s; this
//! module walks them. One dispatch loop, helper submodules for the container
//! runtimes, and a policy table for base-type-specialized arithmetic.
//!
//! Control flow is a bitfield, not unwinding: every arm checks
//! `stop_flags` after evaluating a child and returns a zero register while
//! any bit is set. Loops clear `CONTINUE` at each iteration boundary and
//! `BREAK` on exit; calls clear `RETURN` at the rendezvous; only a try/catch
//! clears `THROW`.

pub(crate) mod array;
pub(crate) mod iterator;
pub mod policy;
pub(crate) mod string;
pub(crate) mod table;

use smallvec::SmallVec;

use crate::{
    context::{
        CodeStore, EvalFlags, NodeId, NodeList, RunState, PROLOGUE_ARGV, PROLOGUE_FUNC,
        PROLOGUE_LINE, PROLOGUE_RESULT,
    },
    debug_info::{TypeInfoId, ValueRef},
    hash::Fnv64,
    register::{BlockVal, MemArea, MemPtr, RegValue, Register},
    typedecl::BaseType,
};

pub(crate) use array::{read_array_header, write_array_header, ArrayHeader};
pub(crate) use table::{read_table_header, write_table_header, TableHeader};

use iterator::{IterSource, RuntimeIter};
use policy::{Op1Kind, Op2Kind};

/// A built-in function body: called with evaluated argument registers,
/// bypassing the frame prologue.
pub type NativeFunction = fn(&mut Vm<'_>, &[Register]) -> Register;

/// What a `delete` node deallocates.
#[derive(Debug, Clone, Copy)]
pub enum DeleteKind {
    /// A pointer to a heap object of `bytes`; the pointer slot is zeroed.
    Pointer { bytes: u32 },
    /// A dynamic array; payload freed, header zeroed.
    Array { stride: u32 },
    /// A table; payload freed, header zeroed.
    Table { key_size: u32, value_size: u32 },
}

/// One lowered evaluator node. Children are arena indices; per-node payload
/// is everything lowering could precompute (sizes, strides, offsets).
#[derive(Debug)]
pub enum SimNode {
    ConstReg { value: Register },
    GetLocal { stack_top: u32 },
    GetLocalRef { stack_top: u32 },
    InitLocal { stack_top: u32, size: u32 },
    GetArgument { index: u32 },
    GetGlobal { index: u32 },
    FieldDeref { value: NodeId, offset: u32 },
    PtrFieldDeref { value: NodeId, offset: u32 },
    SafeFieldDeref { value: NodeId, offset: u32 },
    SafeFieldDerefPtr { value: NodeId, offset: u32 },
    At { value: NodeId, index: NodeId, stride: u32, range: u32 },
    ArrayAt { array: NodeId, index: NodeId, stride: u32 },
    TableIndex { table: NodeId, key: NodeId, key_ty: BaseType, value_size: u32 },
    TableFind { table: NodeId, key: NodeId, key_ty: BaseType, value_size: u32 },
    TableErase { table: NodeId, key: NodeId, key_ty: BaseType, value_size: u32 },
    TableKeys { table: NodeId, stride: u32 },
    TableValues { table: NodeId, stride: u32 },
    Ref2Value { subexpr: NodeId, size: u32 },
    Ptr2Ref { subexpr: NodeId },
    NullCoalescing { subexpr: NodeId, default: NodeId, size: u32 },
    NullCoalescingRef { subexpr: NodeId, default: NodeId },
    Assert { subexpr: NodeId, message: MemPtr },
    Debug {
        subexpr: NodeId,
        type_info: TypeInfoId,
        message: MemPtr,
        by_ref: bool,
    },
    HashOfValue { subexpr: NodeId, size: u32 },
    HashOfRef { subexpr: NodeId, size: u32 },
    HashOfMixed { subexpr: NodeId, type_info: TypeInfoId },
    New { bytes: u32 },
    Delete { subexpr: NodeId, kind: DeleteKind },
    CopyValue { l: NodeId, r: NodeId, size: u32 },
    CopyRefValue { l: NodeId, r: NodeId, size: u32 },
    MoveRefValue {
        l: NodeId,
        r: NodeId,
        size: u32,
        zero_source: bool,
    },
    Block { list: NodeList },
    Let { list: NodeList, subexpr: Option<NodeId> },
    IfThenElse {
        cond: NodeId,
        if_true: NodeId,
        if_false: Option<NodeId>,
    },
    While { cond: NodeId, body: NodeId },
    Return { subexpr: Option<NodeId> },
    Break,
    Continue,
    TryCatch { try_block: NodeId, catch_block: NodeId },
    Op1 { kind: Op1Kind, ty: BaseType, x: NodeId },
    Op2 {
        kind: Op2Kind,
        ty: BaseType,
        l: NodeId,
        r: NodeId,
    },
    BoolAndSc { l: NodeId, r: NodeId },
    BoolOrSc { l: NodeId, r: NodeId },
    Call { fn_index: u32, args: NodeList, line: u32 },
    CallNative { func: NativeFunction, args: NodeList },
    Invoke { block: NodeId },
    MakeBlock { body: NodeId },
    ArrayPushValue {
        array: NodeId,
        value: NodeId,
        at_index: Option<NodeId>,
        size: u32,
    },
    ArrayPushRef {
        array: NodeId,
        value: NodeId,
        at_index: Option<NodeId>,
        size: u32,
    },
    ArrayResize { array: NodeId, new_size: NodeId, stride: u32 },
    ArrayReserve { array: NodeId, capacity: NodeId, stride: u32 },
    ArrayErase { array: NodeId, index: NodeId, stride: u32 },
    ForRange {
        source: NodeId,
        stack_top: u32,
        body: NodeId,
        filter: Option<NodeId>,
    },
    ForGoodArray {
        sources: Box<[NodeId]>,
        strides: Box<[u32]>,
        stack_tops: Box<[u32]>,
        body: NodeId,
        filter: Option<NodeId>,
    },
    ForFixedArray {
        sources: Box<[NodeId]>,
        strides: Box<[u32]>,
        stack_tops: Box<[u32]>,
        size: u32,
        body: NodeId,
        filter: Option<NodeId>,
    },
    ForWithIterator {
        sources: Box<[IterSource]>,
        stack_tops: Box<[u32]>,
        body: NodeId,
        filter: Option<NodeId>,
    },
}

/// The evaluator: the immutable code arena plus the mutable run state.
pub struct Vm<'a> {
    pub(crate) code: &'a CodeStore,
    pub(crate) st: &'a mut RunState,
}

impl<'a> Vm<'a> {
    pub(crate) fn new(code: &'a CodeStore, st: &'a mut RunState) -> Self {
        Self { code, st }
    }

    // ---- memory ----

    fn area(&self, area: MemArea) -> &[u8] {
        match area {
            MemArea::Code => &self.code.names,
            MemArea::Heap => self.st.heap.data(),
            MemArea::Global => &self.st.globals_mem,
            MemArea::Stack => self.st.stack.data(),
        }
    }

    fn area_mut(&mut self, area: MemArea) -> &mut [u8] {
        match area {
            MemArea::Code => unreachable!("constants are immutable"),
            MemArea::Heap => self.st.heap.data_mut(),
            MemArea::Global => &mut self.st.globals_mem,
            MemArea::Stack => self.st.stack.data_mut(),
        }
    }

    pub(crate) fn mem(&self, ptr: MemPtr, len: u32) -> &[u8] {
        let area = ptr.area().expect("dereferencing invalid pointer");
        let at = ptr.offset() as usize;
        &self.area(area)[at..at + len as usize]
    }

    pub(crate) fn mem_mut(&mut self, ptr: MemPtr, len: u32) -> &mut [u8] {
        let area = ptr.area().expect("writing through invalid pointer");
        let at = ptr.offset() as usize;
        &mut self.area_mut(area)[at..at + len as usize]
    }

    pub(crate) fn load<T: RegValue>(&self, ptr: MemPtr) -> T {
        T::from_reg(Register::from_bytes(self.mem(ptr, T::SIZE as u32)))
    }

    pub(crate) fn store<T: RegValue>(&mut self, ptr: MemPtr, value: T) {
        let reg = value.to_reg();
        self.mem_mut(ptr, T::SIZE as u32)
            .copy_from_slice(&reg.bytes()[..T::SIZE]);
    }

    /// Loads up to 16 bytes into a register.
    pub(crate) fn load_sized(&self, ptr: MemPtr, size: u32) -> Register {
        Register::from_bytes(self.mem(ptr, size))
    }

    pub(crate) fn store_sized(&mut self, ptr: MemPtr, reg: Register, size: u32) {
        self.mem_mut(ptr, size)
            .copy_from_slice(&reg.bytes()[..size as usize]);
    }

    /// memcpy between any two script memory places.
    pub(crate) fn copy_bytes(&mut self, dst: MemPtr, src: MemPtr, size: u32) {
        if size == 0 {
            return;
        }
        let (dst_area, src_area) = (
            dst.area().expect("copy to invalid pointer"),
            src.area().expect("copy from invalid pointer"),
        );
        if dst_area == src_area {
            let area = self.area_mut(dst_area);
            let (d, s) = (dst.offset() as usize, src.offset() as usize);
            area.copy_within(s..s + size as usize, d);
        } else {
            let tmp: Vec<u8> = self.mem(src, size).to_vec();
            self.mem_mut(dst, size).copy_from_slice(&tmp);
        }
    }

    pub(crate) fn zero_bytes(&mut self, ptr: MemPtr, size: u32) {
        self.mem_mut(ptr, size).fill(0);
    }

    /// Allocates zeroed heap memory; throws "out of heap" on exhaustion.
    pub(crate) fn heap_allocate(&mut self, size: u32) -> MemPtr {
        match self.st.heap.allocate(size) {
            Some(offset) => {
                let ptr = MemPtr::new(MemArea::Heap, offset);
                self.zero_bytes(ptr, size);
                ptr
            }
            None => {
                self.throw("out of heap");
                MemPtr::NULL
            }
        }
    }

    // ---- control flow ----

    pub(crate) fn throw(&mut self, message: impl Into<String>) {
        self.st.exception = Some(message.into());
        self.st.stop_flags.insert(EvalFlags::THROW);
    }

    pub(crate) fn stopped(&self) -> bool {
        !self.st.stop_flags.is_empty()
    }

    // ---- typed eval fast paths ----

    pub(crate) fn eval_bool(&mut self, node: NodeId) -> bool {
        self.eval(node).get::<bool>()
    }

    pub(crate) fn eval_ptr(&mut self, node: NodeId) -> MemPtr {
        self.eval(node).get::<MemPtr>()
    }

    pub(crate) fn eval_u32(&mut self, node: NodeId) -> u32 {
        self.eval(node).get::<u32>()
    }

    // ---- the prologue ----

    fn prologue_base(&self) -> MemPtr {
        MemPtr::new(MemArea::Stack, self.st.stack.sp())
    }

    pub(crate) fn abi_arguments_base(&self) -> u32 {
        self.load::<u32>(self.prologue_base().add(PROLOGUE_ARGV))
    }

    fn write_result(&mut self, value: Register) {
        let at = self.prologue_base().add(PROLOGUE_RESULT);
        self.store_sized(at, value, 16);
    }

    fn read_result(&self) -> Register {
        self.load_sized(self.prologue_base().add(PROLOGUE_RESULT), 16)
    }

    // ---- calls ----

    /// Calls a simulated function: pushes its frame, writes the prologue,
    /// evaluates the body, and reads the result back. Clears `RETURN` at the
    /// rendezvous.
    pub(crate) fn call_function(&mut self, fn_index: u32, args: &[Register], line: u32) -> Register {
        let code = self.code;
        let Some(func) = code.functions.get(fn_index as usize) else {
            self.throw("invalid function");
            return Register::ZERO;
        };
        let (code_node, stack_size) = (func.code, func.stack_size);
        let argv_base = self.st.arg_stack.len() as u32;
        self.st.arg_stack.extend_from_slice(args);
        let Some(watermark) = self.st.stack.push(stack_size) else {
            self.st.arg_stack.truncate(argv_base as usize);
            self.throw("stack overflow");
            return Register::ZERO;
        };
        let base = self.prologue_base();
        self.store_sized(base.add(PROLOGUE_RESULT), Register::ZERO, 16);
        self.store::<u32>(base.add(PROLOGUE_ARGV), argv_base);
        self.store::<u32>(base.add(PROLOGUE_FUNC), fn_index);
        self.store::<u32>(base.add(PROLOGUE_LINE), line);
        self.eval(code_node);
        self.st.stop_flags.remove(EvalFlags::RETURN);
        let result = self.read_result();
        self.st.stack.pop(watermark);
        self.st.arg_stack.truncate(argv_base as usize);
        result
    }

    /// Enters a captured block: rebases the execution stack onto the frame
    /// the block closed over and runs its body.
    pub(crate) fn invoke_block(&mut self, block: BlockVal) -> Register {
        let watermark = self.st.stack.invoke(block.stack_offset);
        let result = self.eval(NodeId(block.body));
        self.st.stack.pop(watermark);
        result
    }

    /// Evaluates argument nodes left-to-right, short-circuiting on any stop
    /// flag. Returns `None` when interrupted.
    fn eval_args(&mut self, list: NodeList) -> Option<SmallVec<[Register; 8]>> {
        let code = self.code;
        let ids = code.list(list);
        let mut out = SmallVec::with_capacity(ids.len());
        for &id in ids {
            out.push(self.eval(id));
            if self.stopped() {
                return None;
            }
        }
        Some(out)
    }

    // ---- the dispatch loop ----

    /// Evaluates one node. Returns a zero register whenever a stop flag is
    /// raised mid-node.
    pub(crate) fn eval(&mut self, id: NodeId) -> Register {
        // the node borrow lives in the arena, not in `self`, so arms are free
        // to re-enter the evaluator
        let code = self.code;
        match code.node(id) {
            SimNode::ConstReg { value } => *value,
            SimNode::GetLocal { stack_top } => {
                Register::put(MemPtr::new(MemArea::Stack, self.st.stack.sp() + stack_top))
            }
            SimNode::GetLocalRef { stack_top } => {
                let slot = MemPtr::new(MemArea::Stack, self.st.stack.sp() + stack_top);
                Register::put(self.load::<MemPtr>(slot))
            }
            &SimNode::InitLocal { stack_top, size } => {
                let slot = MemPtr::new(MemArea::Stack, self.st.stack.sp() + stack_top);
                self.zero_bytes(slot, size);
                Register::ZERO
            }
            &SimNode::GetArgument { index } => {
                let base = self.abi_arguments_base();
                self.st.arg_stack[(base + index) as usize]
            }
            &SimNode::GetGlobal { index } => {
                let offset = self.code.globals[index as usize].offset;
                Register::put(MemPtr::new(MemArea::Global, offset))
            }
            &SimNode::FieldDeref { value, offset } => {
                let ptr = self.eval_ptr(value);
                if self.stopped() {
                    return Register::ZERO;
                }
                Register::put(ptr.add(offset))
            }
            &SimNode::PtrFieldDeref { value, offset } => {
                let ptr = self.eval_ptr(value);
                if self.stopped() {
                    return Register::ZERO;
                }
                if ptr.is_null() {
                    self.throw("dereferencing null pointer");
                    return Register::ZERO;
                }
                Register::put(ptr.add(offset))
            }
            &SimNode::SafeFieldDeref { value, offset } => {
                let ptr = self.eval_ptr(value);
                if self.stopped() || ptr.is_null() {
                    return Register::put(MemPtr::NULL);
                }
                Register::put(ptr.add(offset))
            }
            &SimNode::SafeFieldDerefPtr { value, offset } => {
                let ptr = self.eval_ptr(value);
                if self.stopped() || ptr.is_null() {
                    return Register::put(MemPtr::NULL);
                }
                Register::put(self.load::<MemPtr>(ptr.add(offset)))
            }
            &SimNode::At {
                value,
                index,
                stride,
                range,
            } => {
                let ptr = self.eval_ptr(value);
                if self.stopped() {
                    return Register::ZERO;
                }
                let idx = self.eval_u32(index);
                if self.stopped() {
                    return Register::ZERO;
                }
                if idx >= range {
                    self.throw("index out of range");
                    return Register::ZERO;
                }
                Register::put(ptr.add(idx * stride))
            }
            &SimNode::ArrayAt { array, index, stride } => self.array_at(array, index, stride),
            &SimNode::TableIndex {
                table,
                key,
                key_ty,
                value_size,
            } => self.table_index(table, key, key_ty, value_size),
            &SimNode::TableFind {
                table,
                key,
                key_ty,
                value_size,
            } => self.table_find(table, key, key_ty, value_size),
            &SimNode::TableErase {
                table,
                key,
                key_ty,
                value_size,
            } => self.table_erase(table, key, key_ty, value_size),
            &SimNode::TableKeys { table, stride } => self.table_keys_iterator(table, stride),
            &SimNode::TableValues { table, stride } => self.table_values_iterator(table, stride),
            &SimNode::Ref2Value { subexpr, size } => {
                let ptr = self.eval_ptr(subexpr);
                if self.stopped() {
                    return Register::ZERO;
                }
                self.load_sized(ptr, size)
            }
            &SimNode::Ptr2Ref { subexpr } => {
                let ptr = self.eval_ptr(subexpr);
                if self.stopped() {
                    return Register::ZERO;
                }
                if ptr.is_null() {
                    self.throw("dereferencing null pointer");
                    return Register::ZERO;
                }
                Register::put(ptr)
            }
            &SimNode::NullCoalescing {
                subexpr,
                default,
                size,
            } => {
                let ptr = self.eval_ptr(subexpr);
                if self.stopped() {
                    return Register::ZERO;
                }
                if ptr.is_null() {
                    self.eval(default)
                } else {
                    self.load_sized(ptr, size)
                }
            }
            &SimNode::NullCoalescingRef { subexpr, default } => {
                let ptr = self.eval_ptr(subexpr);
                if self.stopped() {
                    return Register::ZERO;
                }
                if ptr.is_null() {
                    self.eval(default)
                } else {
                    Register::put(ptr)
                }
            }
            &SimNode::Assert { subexpr, message } => {
                let ok = self.eval_bool(subexpr);
                if self.stopped() {
                    return Register::ZERO;
                }
                if !ok {
                    let text = self.string_text(message);
                    if text.is_empty() {
                        self.throw("assert failed");
                    } else {
                        self.throw(text);
                    }
                }
                Register::ZERO
            }
            &SimNode::Debug {
                subexpr,
                type_info,
                message,
                by_ref,
            } => {
                let value = self.eval(subexpr);
                if self.stopped() {
                    return Register::ZERO;
                }
                let mut text = String::new();
                let label = self.string_text(message);
                if !label.is_empty() {
                    text.push_str(&label);
                    text.push_str(": ");
                }
                let vref = if by_ref {
                    ValueRef::Mem(value.get::<MemPtr>())
                } else {
                    ValueRef::Reg(value)
                };
                self.describe_value(vref, type_info, &mut text);
                text.push('\n');
                self.st.out.output(&text);
                value
            }
            &SimNode::HashOfValue { subexpr, size } => {
                let value = self.eval(subexpr);
                if self.stopped() {
                    return Register::ZERO;
                }
                let mut state = Fnv64::new();
                state.write(&value.bytes()[..size as usize]);
                Register::put(state.finish())
            }
            &SimNode::HashOfRef { subexpr, size } => {
                let ptr = self.eval_ptr(subexpr);
                if self.stopped() {
                    return Register::ZERO;
                }
                let mut state = Fnv64::new();
                state.write(self.mem(ptr, size));
                Register::put(state.finish())
            }
            &SimNode::HashOfMixed { subexpr, type_info } => {
                let ptr = self.eval_ptr(subexpr);
                if self.stopped() {
                    return Register::ZERO;
                }
                let mut state = Fnv64::new();
                self.hash_value(ValueRef::Mem(ptr), type_info, &mut state);
                Register::put(state.finish())
            }
            &SimNode::New { bytes } => {
                let ptr = self.heap_allocate(bytes);
                if self.stopped() {
                    return Register::ZERO;
                }
                Register::put(ptr)
            }
            &SimNode::Delete { subexpr, kind } => self.eval_delete(subexpr, kind),
            &SimNode::CopyValue { l, r, size } => {
                let dst = self.eval_ptr(l);
                if self.stopped() {
                    return Register::ZERO;
                }
                let value = self.eval(r);
                if self.stopped() {
                    return Register::ZERO;
                }
                self.store_sized(dst, value, size);
                Register::put(dst)
            }
            &SimNode::CopyRefValue { l, r, size } => {
                let dst = self.eval_ptr(l);
                if self.stopped() {
                    return Register::ZERO;
                }
                let src = self.eval_ptr(r);
                if self.stopped() {
                    return Register::ZERO;
                }
                self.copy_bytes(dst, src, size);
                Register::put(dst)
            }
            &SimNode::MoveRefValue {
                l,
                r,
                size,
                zero_source,
            } => {
                let dst = self.eval_ptr(l);
                if self.stopped() {
                    return Register::ZERO;
                }
                let src = self.eval_ptr(r);
                if self.stopped() {
                    return Register::ZERO;
                }
                self.copy_bytes(dst, src, size);
                if zero_source {
                    self.zero_bytes(src, size);
                }
                Register::put(dst)
            }
            &SimNode::Block { list } => {
                let mut last = Register::ZERO;
                for &child in code.list(list) {
                    last = self.eval(child);
                    if self.stopped() {
                        return Register::ZERO;
                    }
                }
                last
            }
            &SimNode::Let { list, subexpr } => {
                for &child in code.list(list) {
                    self.eval(child);
                    if self.stopped() {
                        return Register::ZERO;
                    }
                }
                match subexpr {
                    Some(sub) => self.eval(sub),
                    None => Register::ZERO,
                }
            }
            &SimNode::IfThenElse {
                cond,
                if_true,
                if_false,
            } => {
                let c = self.eval_bool(cond);
                if self.stopped() {
                    return Register::ZERO;
                }
                if c {
                    self.eval(if_true)
                } else if let Some(e) = if_false {
                    self.eval(e)
                } else {
                    Register::ZERO
                }
            }
            &SimNode::While { cond, body } => {
                loop {
                    let c = self.eval_bool(cond);
                    if self.stopped() || !c {
                        break;
                    }
                    self.eval(body);
                    self.st.stop_flags.remove(EvalFlags::CONTINUE);
                    if self.stopped() {
                        break;
                    }
                }
                self.st.stop_flags.remove(EvalFlags::BREAK);
                Register::ZERO
            }
            &SimNode::Return { subexpr } => {
                if let Some(sub) = subexpr {
                    let value = self.eval(sub);
                    if self.stopped() {
                        return Register::ZERO;
                    }
                    self.write_result(value);
                }
                self.st.stop_flags.insert(EvalFlags::RETURN);
                Register::ZERO
            }
            SimNode::Break => {
                self.st.stop_flags.insert(EvalFlags::BREAK);
                Register::ZERO
            }
            SimNode::Continue => {
                self.st.stop_flags.insert(EvalFlags::CONTINUE);
                Register::ZERO
            }
            &SimNode::TryCatch {
                try_block,
                catch_block,
            } => {
                self.eval(try_block);
                if self.st.stop_flags.contains(EvalFlags::THROW) {
                    self.st.stop_flags.remove(EvalFlags::THROW);
                    self.st.exception = None;
                    self.eval(catch_block);
                }
                Register::ZERO
            }
            &SimNode::Op1 { kind, ty, x } => {
                let value = self.eval(x);
                if self.stopped() {
                    return Register::ZERO;
                }
                policy::eval_op1(self, kind, ty, value)
            }
            &SimNode::Op2 { kind, ty, l, r } => {
                let lv = self.eval(l);
                if self.stopped() {
                    return Register::ZERO;
                }
                let rv = self.eval(r);
                if self.stopped() {
                    return Register::ZERO;
                }
                policy::eval_op2(self, kind, ty, lv, rv)
            }
            &SimNode::BoolAndSc { l, r } => {
                if !self.eval_bool(l) {
                    return Register::put(false);
                }
                if self.stopped() {
                    return Register::ZERO;
                }
                self.eval(r)
            }
            &SimNode::BoolOrSc { l, r } => {
                if self.eval_bool(l) {
                    return Register::put(true);
                }
                if self.stopped() {
                    return Register::ZERO;
                }
                self.eval(r)
            }
            &SimNode::Call {
                fn_index,
                args,
                line,
            } => {
                let Some(argv) = self.eval_args(args) else {
                    return Register::ZERO;
                };
                self.call_function(fn_index, &argv, line)
            }
            &SimNode::CallNative { func, args } => {
                let Some(argv) = self.eval_args(args) else {
                    return Register::ZERO;
                };
                func(self, &argv)
            }
            &SimNode::Invoke { block } => {
                let value = self.eval(block);
                if self.stopped() {
                    return Register::ZERO;
                }
                self.invoke_block(value.get::<BlockVal>())
            }
            &SimNode::MakeBlock { body } => Register::put(BlockVal {
                stack_offset: self.st.stack.sp(),
                body: body.0,
            }),
            &SimNode::ArrayPushValue {
                array,
                value,
                at_index,
                size,
            } => self.array_push(array, value, at_index, size, false),
            &SimNode::ArrayPushRef {
                array,
                value,
                at_index,
                size,
            } => self.array_push(array, value, at_index, size, true),
            &SimNode::ArrayResize {
                array,
                new_size,
                stride,
            } => self.array_resize(array, new_size, stride),
            &SimNode::ArrayReserve {
                array,
                capacity,
                stride,
            } => self.array_reserve(array, capacity, stride),
            &SimNode::ArrayErase {
                array,
                index,
                stride,
            } => self.array_erase_at(array, index, stride),
            &SimNode::ForRange {
                source,
                stack_top,
                body,
                filter,
            } => self.for_range(source, stack_top, body, filter),
            SimNode::ForGoodArray {
                sources,
                strides,
                stack_tops,
                body,
                filter,
            } => self.for_good_array(sources, strides, stack_tops, *body, *filter),
            SimNode::ForFixedArray {
                sources,
                strides,
                stack_tops,
                size,
                body,
                filter,
            } => self.for_fixed_array(sources, strides, stack_tops, *size, *body, *filter),
            SimNode::ForWithIterator {
                sources,
                stack_tops,
                body,
                filter,
            } => self.for_with_iterator(sources, stack_tops, *body, *filter),
        }
    }

    fn eval_delete(&mut self, subexpr: NodeId, kind: DeleteKind) -> Register {
        let place = self.eval_ptr(subexpr);
        if self.stopped() {
            return Register::ZERO;
        }
        match kind {
            DeleteKind::Pointer { bytes } => {
                let target = self.load::<MemPtr>(place);
                if !target.is_null() {
                    if target.area() == Some(MemArea::Heap) {
                        self.st.heap.free(target.offset(), bytes);
                    }
                    self.store(place, MemPtr::NULL);
                }
            }
            DeleteKind::Array { stride } => {
                let arr = read_array_header(self, place);
                if arr.lock != 0 {
                    self.throw("can't delete locked array");
                    return Register::ZERO;
                }
                if !arr.data.is_null() {
                    self.st.heap.free(arr.data.offset(), arr.capacity * stride);
                }
                write_array_header(self, place, &ArrayHeader::default());
            }
            DeleteKind::Table {
                key_size,
                value_size,
            } => {
                let tab = read_table_header(self, place);
                if tab.lock != 0 {
                    self.throw("can't delete locked table");
                    return Register::ZERO;
                }
                if !tab.data.is_null() {
                    let bytes = tab.capacity * (value_size + key_size + 4);
                    self.st.heap.free(tab.data.offset(), bytes);
                }
                write_table_header(self, place, &TableHeader::default());
            }
        }
        Register::ZERO
    }

    /// Registers a first-class iterator value and returns its handle
    /// register (slab index + 1).
    pub(crate) fn register_iterator(&mut self, iter: RuntimeIter) -> Register {
        self.st.iterators.push(Some(iter));
        Register::put(self.st.iterators.len() as u64)
    }

    /// Takes ownership of a previously registered iterator.
    pub(crate) fn take_iterator(&mut self, handle: u64) -> Option<RuntimeIter> {
        let index = usize::try_from(handle).ok()?.checked_sub(1)?;
        self.st.iterators.get_mut(index)?.take()
    }
}
