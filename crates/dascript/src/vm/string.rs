//! String runtime.
//!
//! A string value is a pointer to NUL-terminated text preceded by an 8-byte
//! `{hash, length}` header. Constants live in the code area, dynamic results
//! in the heap. Null reads as the canonical empty string. Comparison and
//! concatenation use the header's length; equality short-circuits on the
//! cached hash.

use std::cmp::Ordering;

use crate::{
    heap::STRING_HEADER_SIZE,
    register::{MemArea, MemPtr, Register},
    vm::{policy::Op2Kind, Vm},
};

impl Vm<'_> {
    fn string_len(&self, ptr: MemPtr) -> u32 {
        if ptr.is_null() {
            return 0;
        }
        let header = MemPtr::from_raw(ptr.raw() - u64::from(STRING_HEADER_SIZE));
        self.load::<u32>(header.add(4))
    }

    fn string_bytes(&self, ptr: MemPtr) -> &[u8] {
        if ptr.is_null() {
            return &[];
        }
        let len = self.string_len(ptr);
        self.mem(ptr, len)
    }

    fn string_compare(&self, a: MemPtr, b: MemPtr) -> Ordering {
        self.string_bytes(a).cmp(self.string_bytes(b))
    }

    fn string_equal(&self, a: MemPtr, b: MemPtr) -> bool {
        if a == b {
            return true;
        }
        if self.string_len(a) != self.string_len(b) {
            return false;
        }
        self.string_bytes(a) == self.string_bytes(b)
    }

    /// Concatenates two strings into a fresh heap string.
    fn string_concat(&mut self, a: MemPtr, b: MemPtr) -> MemPtr {
        let mut text = Vec::with_capacity((self.string_len(a) + self.string_len(b)) as usize);
        text.extend_from_slice(self.string_bytes(a));
        text.extend_from_slice(self.string_bytes(b));
        match self.st.heap.allocate_string(&text) {
            Some(offset) => MemPtr::new(MemArea::Heap, offset),
            None => {
                self.throw("out of heap");
                MemPtr::NULL
            }
        }
    }

    /// Interns `text` on the heap and returns its string pointer.
    pub(crate) fn allocate_heap_string(&mut self, text: &str) -> MemPtr {
        match self.st.heap.allocate_string(text.as_bytes()) {
            Some(offset) => MemPtr::new(MemArea::Heap, offset),
            None => {
                self.throw("out of heap");
                MemPtr::NULL
            }
        }
    }
}

/// Binary string operations, dispatched from the policy table.
pub(crate) fn eval_op2(vm: &mut Vm<'_>, kind: Op2Kind, a: Register, b: Register) -> Register {
    let (pa, pb) = (a.get::<MemPtr>(), b.get::<MemPtr>());
    match kind {
        Op2Kind::Add => Register::put(vm.string_concat(pa, pb)),
        Op2Kind::Equ => Register::put(vm.string_equal(pa, pb)),
        Op2Kind::NotEqu => Register::put(!vm.string_equal(pa, pb)),
        Op2Kind::Less => Register::put(vm.string_compare(pa, pb) == Ordering::Less),
        Op2Kind::LessEqu => Register::put(vm.string_compare(pa, pb) != Ordering::Greater),
        Op2Kind::Gt => Register::put(vm.string_compare(pa, pb) == Ordering::Greater),
        Op2Kind::GtEqu => Register::put(vm.string_compare(pa, pb) != Ordering::Less),
        _ => Register::ZERO,
    }
}
