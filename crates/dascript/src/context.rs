//! The runtime context: the lowered program and its mutable state.
//!
//! [`Context`] is split per the arena+index design: [`CodeStore`] is the
//! write-once arena holding SimNodes, argument lists, interned constants, and
//! the function/global/debug tables; [`RunState`] is everything execution
//! mutates (stack, heap, globals storage, control flow). Nothing in the
//! arena is freed individually; dropping or rebuilding the context frees it
//! all at once.

use bitflags::bitflags;

use crate::{
    debug_info::{FuncInfo, FuncInfoId, StructInfo, StructInfoId, TypeInfo, TypeInfoId, VarInfo, VarInfoId},
    heap::{HeapAllocator, StackAllocator, write_string_with_header, STRING_HEADER_SIZE},
    io::{PrintWriter, StdPrint},
    register::{MemArea, MemPtr, Register},
    vm::{iterator::RuntimeIter, SimNode, Vm},
};

bitflags! {
    /// Control-flow interruption bits. Evaluators return immediately while
    /// any bit is set; each bit is cleared only by its designated consumer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EvalFlags: u32 {
        const BREAK    = 1 << 0;
        const RETURN   = 1 << 1;
        const CONTINUE = 1 << 2;
        const THROW    = 1 << 3;
    }
}

/// Index of a [`SimNode`] in the context arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(pub(crate) u32);

/// A contiguous run of node ids in the argument-list arena.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeList {
    pub(crate) start: u32,
    pub(crate) len: u32,
}

impl NodeList {
    #[must_use]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// One lowered function.
#[derive(Debug)]
pub struct SimFunction {
    pub name: String,
    pub code: NodeId,
    pub stack_size: u32,
    pub debug: FuncInfoId,
}

/// One lowered global: a slot in the globals byte region plus its init node.
#[derive(Debug)]
pub struct SimGlobal {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    pub init: Option<NodeId>,
    /// Frame bytes the init node needs while it runs.
    pub init_stack_size: u32,
    pub debug: VarInfoId,
}

/// Frame prologue layout, written at the frame base (16-byte aligned):
/// `{ result: Register, argv: u32, func: u32, line: u32, pad: u32 }`.
pub(crate) const PROLOGUE_SIZE: u32 = 32;
pub(crate) const PROLOGUE_RESULT: u32 = 0;
pub(crate) const PROLOGUE_ARGV: u32 = 16;
pub(crate) const PROLOGUE_FUNC: u32 = 20;
pub(crate) const PROLOGUE_LINE: u32 = 24;

/// The write-once side of the context.
#[derive(Debug, Default)]
pub struct CodeStore {
    pub(crate) nodes: Vec<SimNode>,
    pub(crate) node_lists: Vec<NodeId>,
    /// Interned constants (strings with headers); the `Code` memory area.
    pub(crate) names: Vec<u8>,
    pub(crate) functions: Vec<SimFunction>,
    pub(crate) globals: Vec<SimGlobal>,
    pub(crate) globals_size: u32,
    pub(crate) type_infos: Vec<TypeInfo>,
    pub(crate) struct_infos: Vec<StructInfo>,
    pub(crate) var_infos: Vec<VarInfo>,
    pub(crate) func_infos: Vec<FuncInfo>,
}

impl CodeStore {
    pub(crate) fn push_node(&mut self, node: SimNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub(crate) fn push_list(&mut self, nodes: &[NodeId]) -> NodeList {
        let start = self.node_lists.len() as u32;
        self.node_lists.extend_from_slice(nodes);
        NodeList {
            start,
            len: nodes.len() as u32,
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> &SimNode {
        &self.nodes[id.0 as usize]
    }

    pub(crate) fn list(&self, list: NodeList) -> &[NodeId] {
        &self.node_lists[list.start as usize..(list.start + list.len) as usize]
    }

    /// Interns a constant string into the `Code` area, returning a pointer to
    /// its text (header immediately before).
    pub(crate) fn allocate_name(&mut self, text: &str) -> MemPtr {
        let offset = self.names.len() as u32;
        self.names
            .resize(self.names.len() + (STRING_HEADER_SIZE as usize) + text.len() + 1, 0);
        write_string_with_header(&mut self.names, offset as usize, text.as_bytes());
        MemPtr::new(MemArea::Code, offset + STRING_HEADER_SIZE)
    }

    pub(crate) fn push_type_info(&mut self, info: TypeInfo) -> TypeInfoId {
        let id = TypeInfoId(self.type_infos.len() as u32);
        self.type_infos.push(info);
        id
    }

    pub(crate) fn push_struct_info(&mut self, info: StructInfo) -> StructInfoId {
        let id = StructInfoId(self.struct_infos.len() as u32);
        self.struct_infos.push(info);
        id
    }

    pub(crate) fn push_var_info(&mut self, info: VarInfo) -> VarInfoId {
        let id = VarInfoId(self.var_infos.len() as u32);
        self.var_infos.push(info);
        id
    }

    pub(crate) fn push_func_info(&mut self, info: FuncInfo) -> FuncInfoId {
        let id = FuncInfoId(self.func_infos.len() as u32);
        self.func_infos.push(info);
        id
    }
}

/// The mutable side of the context.
pub struct RunState {
    pub(crate) stack: StackAllocator,
    pub(crate) heap: HeapAllocator,
    pub(crate) globals_mem: Vec<u8>,
    /// Evaluated call arguments; frames reference runs of this by index.
    pub(crate) arg_stack: Vec<Register>,
    /// First-class iterator values live here until a loop consumes them.
    pub(crate) iterators: Vec<Option<RuntimeIter>>,
    pub(crate) stop_flags: EvalFlags,
    pub(crate) exception: Option<String>,
    pub(crate) out: Box<dyn PrintWriter>,
}

impl std::fmt::Debug for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunState")
            .field("stack_sp", &self.stack.sp())
            .field("heap_bytes", &self.heap.bytes_allocated())
            .field("stop_flags", &self.stop_flags)
            .field("exception", &self.exception)
            .finish_non_exhaustive()
    }
}

/// Default evaluation stack size.
pub const DEFAULT_STACK_SIZE: u32 = 16 * 1024;
/// Default script heap size.
pub const DEFAULT_HEAP_SIZE: u32 = 1024 * 1024;
/// Default threshold above which the heap bypasses the buddy allocator.
pub const DEFAULT_BIG_ALLOC_THRESHOLD: u32 = 64 * 1024;

/// One interpreter instance: the lowered program plus its runtime state.
#[derive(Debug)]
pub struct Context {
    pub(crate) code: CodeStore,
    pub(crate) state: RunState,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::with_sizes(DEFAULT_STACK_SIZE, DEFAULT_HEAP_SIZE)
    }

    #[must_use]
    pub fn with_sizes(stack_size: u32, heap_size: u32) -> Self {
        Self {
            code: CodeStore::default(),
            state: RunState {
                stack: StackAllocator::new(stack_size),
                heap: HeapAllocator::new(heap_size, DEFAULT_BIG_ALLOC_THRESHOLD),
                globals_mem: Vec::new(),
                arg_stack: Vec::new(),
                iterators: Vec::new(),
                stop_flags: EvalFlags::empty(),
                exception: None,
                out: Box::new(StdPrint),
            },
        }
    }

    /// Replaces the output sink for `debug` and runtime diagnostics.
    pub fn set_print_writer(&mut self, out: Box<dyn PrintWriter>) {
        self.state.out = out;
    }

    /// Finds a simulated function by name. Overloads share a name; the first
    /// one lowered wins.
    #[must_use]
    pub fn find_function(&self, name: &str) -> Option<u32> {
        self.code
            .functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| i as u32)
    }

    /// Calls function `fn_index` with the given argument registers.
    ///
    /// Clears the control-flow bits modulo `THROW` first; a still-pending
    /// exception short-circuits to a zero register until [`Self::restart`].
    pub fn eval(&mut self, fn_index: u32, args: &[Register]) -> Register {
        self.state.stop_flags &= EvalFlags::THROW;
        if self.state.stop_flags.contains(EvalFlags::THROW) {
            return Register::ZERO;
        }
        let (code, state) = (&self.code, &mut self.state);
        Vm::new(code, state).call_function(fn_index, args, 0)
    }

    /// The message of the last uncaught throw, if any.
    #[must_use]
    pub fn exception(&self) -> Option<&str> {
        if self.state.stop_flags.contains(EvalFlags::THROW) {
            self.state.exception.as_deref()
        } else {
            None
        }
    }

    /// Resets stack, heap, and control flow, keeping the compiled code.
    /// Globals must be re-initialized with [`Self::run_init_script`]; heap
    /// pointers from before the restart are no longer dereferenceable.
    pub fn restart(&mut self) {
        self.state.stack.reset();
        self.state.heap.reset();
        self.state.arg_stack.clear();
        self.state.iterators.clear();
        self.state.stop_flags = EvalFlags::empty();
        self.state.exception = None;
    }

    /// Zeroes global storage and runs every global's init node once, in
    /// declaration order. Stops at the first throw.
    pub fn run_init_script(&mut self) {
        self.state.globals_mem.clear();
        self.state.globals_mem.resize(self.code.globals_size as usize, 0);
        for i in 0..self.code.globals.len() {
            let Some(init) = self.code.globals[i].init else {
                continue;
            };
            let frame = self.code.globals[i].init_stack_size.max(PROLOGUE_SIZE);
            let Some(watermark) = self.state.stack.push(frame) else {
                self.state.exception = Some("stack overflow".to_owned());
                self.state.stop_flags.insert(EvalFlags::THROW);
                break;
            };
            let (code, state) = (&self.code, &mut self.state);
            Vm::new(code, state).eval(init);
            self.state.stack.pop(watermark);
            if self.state.stop_flags.contains(EvalFlags::THROW) {
                break;
            }
            self.state.stop_flags = EvalFlags::empty();
        }
    }

    /// Current control-flow bits; exposed for tests and embedders.
    #[must_use]
    pub fn stop_flags(&self) -> EvalFlags {
        self.state.stop_flags
    }

    /// Heap bytes currently allocated by the running program.
    #[must_use]
    pub fn heap_bytes_allocated(&self) -> u32 {
        self.state.heap.bytes_allocated()
    }
}
