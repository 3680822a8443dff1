//! Dynamic array runtime.
//!
//! An `array<T>` value is a 24-byte header living wherever the variable
//! lives: `{ data: ptr, size: u32, capacity: u32, lock: u32 }`. The payload
//! is heap-allocated. Iteration locks the array; mutating a locked array
//! throws.

use crate::{
    context::NodeId,
    register::{MemPtr, Register},
    vm::Vm,
};

/// Decoded array header.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ArrayHeader {
    pub data: MemPtr,
    pub size: u32,
    pub capacity: u32,
    pub lock: u32,
}

pub(crate) fn read_array_header(vm: &Vm<'_>, at: MemPtr) -> ArrayHeader {
    ArrayHeader {
        data: MemPtr::from_raw(vm.load::<u64>(at)),
        size: vm.load::<u32>(at.add(8)),
        capacity: vm.load::<u32>(at.add(12)),
        lock: vm.load::<u32>(at.add(16)),
    }
}

pub(crate) fn write_array_header(vm: &mut Vm<'_>, at: MemPtr, header: &ArrayHeader) {
    vm.store::<u64>(at, header.data.raw());
    vm.store::<u32>(at.add(8), header.size);
    vm.store::<u32>(at.add(12), header.capacity);
    vm.store::<u32>(at.add(16), header.lock);
}

impl Vm<'_> {
    /// Bumps the iteration lock; loops hold it for their whole run.
    pub(crate) fn array_lock(&mut self, at: MemPtr) {
        let lock = self.load::<u32>(at.add(16));
        self.store::<u32>(at.add(16), lock + 1);
    }

    pub(crate) fn array_unlock(&mut self, at: MemPtr) {
        let lock = self.load::<u32>(at.add(16));
        self.store::<u32>(at.add(16), lock.saturating_sub(1));
    }

    /// Grows capacity to at least `capacity` elements, preserving contents.
    /// False when the heap is exhausted or the array is locked.
    fn array_grow(&mut self, at: MemPtr, capacity: u32, stride: u32) -> bool {
        let header = read_array_header(self, at);
        if header.capacity >= capacity {
            return true;
        }
        if header.lock != 0 {
            self.throw("can't change locked array");
            return false;
        }
        let new_capacity = capacity.max(16).max(header.capacity * 2);
        let new_offset = if header.data.is_null() {
            self.st.heap.allocate(new_capacity * stride)
        } else {
            self.st.heap.reallocate(
                header.data.offset(),
                header.capacity * stride,
                new_capacity * stride,
            )
        };
        let Some(offset) = new_offset else {
            self.throw("out of heap");
            return false;
        };
        let data = MemPtr::new(crate::register::MemArea::Heap, offset);
        // newly exposed capacity starts zeroed
        self.zero_bytes(
            data.add(header.capacity * stride),
            (new_capacity - header.capacity) * stride,
        );
        write_array_header(
            self,
            at,
            &ArrayHeader {
                data,
                capacity: new_capacity,
                ..header
            },
        );
        true
    }

    /// `array[index]` — a reference to the element, bounds-checked.
    pub(crate) fn array_at(&mut self, array: NodeId, index: NodeId, stride: u32) -> Register {
        let at = self.eval_ptr(array);
        if self.stopped() {
            return Register::ZERO;
        }
        let idx = self.eval_u32(index);
        if self.stopped() {
            return Register::ZERO;
        }
        let header = read_array_header(self, at);
        if idx >= header.size {
            self.throw("index out of range");
            return Register::ZERO;
        }
        Register::put(header.data.add(idx * stride))
    }

    /// `push(array, value[, at])`: grows by one and inserts. An explicit
    /// index inserts before it, shifting the tail up; without one the value
    /// appends. Reference values are copied by `size` bytes, register values
    /// stored directly.
    pub(crate) fn array_push(
        &mut self,
        array: NodeId,
        value: NodeId,
        at_index: Option<NodeId>,
        size: u32,
        by_ref: bool,
    ) -> Register {
        let at = self.eval_ptr(array);
        if self.stopped() {
            return Register::ZERO;
        }
        let value = self.eval(value);
        if self.stopped() {
            return Register::ZERO;
        }
        let index = match at_index {
            Some(node) => {
                let idx = self.eval_u32(node);
                if self.stopped() {
                    return Register::ZERO;
                }
                Some(idx)
            }
            None => None,
        };
        let header = read_array_header(self, at);
        if header.lock != 0 {
            self.throw("can't change locked array");
            return Register::ZERO;
        }
        if !self.array_grow(at, header.size + 1, size) {
            return Register::ZERO;
        }
        let mut header = read_array_header(self, at);
        let idx = match index {
            Some(i) if i <= header.size => i,
            Some(_) => {
                self.throw("index out of range");
                return Register::ZERO;
            }
            None => header.size,
        };
        // shift the tail up to open the slot
        if idx < header.size {
            let from = header.data.add(idx * size);
            let count = (header.size - idx) * size;
            let to = header.data.add((idx + 1) * size);
            let tmp: Vec<u8> = self.mem(from, count).to_vec();
            self.mem_mut(to, count).copy_from_slice(&tmp);
        }
        let slot = header.data.add(idx * size);
        if by_ref {
            let src = value.get::<MemPtr>();
            self.copy_bytes(slot, src, size);
        } else {
            self.store_sized(slot, value, size);
        }
        header.size += 1;
        write_array_header(self, at, &header);
        Register::ZERO
    }

    /// `resize(array, new_size)` — grows zero-filled or shrinks in place.
    pub(crate) fn array_resize(&mut self, array: NodeId, new_size: NodeId, stride: u32) -> Register {
        let at = self.eval_ptr(array);
        if self.stopped() {
            return Register::ZERO;
        }
        let size = self.eval_u32(new_size);
        if self.stopped() {
            return Register::ZERO;
        }
        let header = read_array_header(self, at);
        if header.lock != 0 {
            self.throw("can't change locked array");
            return Register::ZERO;
        }
        if size > header.capacity && !self.array_grow(at, size, stride) {
            return Register::ZERO;
        }
        let mut header = read_array_header(self, at);
        // elements exposed by growth read as zero
        if size > header.size {
            self.zero_bytes(
                header.data.add(header.size * stride),
                (size - header.size) * stride,
            );
        }
        header.size = size;
        write_array_header(self, at, &header);
        Register::ZERO
    }

    /// `reserve(array, capacity)` — capacity only, size untouched.
    pub(crate) fn array_reserve(&mut self, array: NodeId, capacity: NodeId, stride: u32) -> Register {
        let at = self.eval_ptr(array);
        if self.stopped() {
            return Register::ZERO;
        }
        let capacity = self.eval_u32(capacity);
        if self.stopped() {
            return Register::ZERO;
        }
        self.array_grow(at, capacity, stride);
        Register::ZERO
    }

    /// `erase(array, index)` — removes one element, shifting the tail down.
    pub(crate) fn array_erase_at(&mut self, array: NodeId, index: NodeId, stride: u32) -> Register {
        let at = self.eval_ptr(array);
        if self.stopped() {
            return Register::ZERO;
        }
        let idx = self.eval_u32(index);
        if self.stopped() {
            return Register::ZERO;
        }
        let mut header = read_array_header(self, at);
        if header.lock != 0 {
            self.throw("can't change locked array");
            return Register::ZERO;
        }
        if idx >= header.size {
            self.throw("index out of range");
            return Register::ZERO;
        }
        if idx + 1 < header.size {
            let from = header.data.add((idx + 1) * stride);
            let count = (header.size - idx - 1) * stride;
            let to = header.data.add(idx * stride);
            let tmp: Vec<u8> = self.mem(from, count).to_vec();
            self.mem_mut(to, count).copy_from_slice(&tmp);
        }
        header.size -= 1;
        // the vacated tail slot reads as zero
        self.zero_bytes(header.data.add(header.size * stride), stride);
        write_array_header(self, at, &header);
        Register::ZERO
    }
}
