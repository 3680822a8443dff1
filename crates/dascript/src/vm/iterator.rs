//! Iterators and the `for` loop drivers.
//!
//! All iteration funnels through one protocol: `first`/`next` write the
//! current element into a caller-owned slot and report whether it exists;
//! `close` releases locks. Reference elements (arrays, tables) put a pointer
//! in the slot, ranges put the value itself.
//!
//! Loops where every source is the same shape use a fused driver; mixed
//! shapes and first-class iterator values go through the generic driver.
//! Either way a parallel loop runs exactly as many iterations as its
//! shortest source.

use smallvec::SmallVec;

use crate::{
    context::{EvalFlags, NodeId},
    hash::HASH_KILLED32,
    register::{MemArea, MemPtr, RangeVal, Register},
    vm::{read_array_header, read_table_header, Vm},
};

/// One `for` source in the generic driver.
#[derive(Debug, Clone, Copy)]
pub enum IterSource {
    /// An expression producing a first-class iterator value.
    Value { node: NodeId },
    /// A dynamic array reference.
    GoodArray { node: NodeId, stride: u32 },
    /// A fixed-dim value reference.
    FixedArray { node: NodeId, size: u32, stride: u32 },
    /// A range value; `signed` distinguishes `range` from `urange`.
    Range { node: NodeId, signed: bool },
}

/// Live iterator state.
#[derive(Debug)]
pub(crate) enum RuntimeIter {
    FixedArray {
        data: MemPtr,
        size: u32,
        stride: u32,
        index: u32,
    },
    GoodArray {
        array: MemPtr,
        data: MemPtr,
        size: u32,
        stride: u32,
        index: u32,
    },
    Range {
        current: i64,
        end: i64,
    },
    Table {
        table: MemPtr,
        /// Iterate value slots instead of keys.
        values: bool,
        /// Base of the iterated region; filled in by `first`.
        elements: MemPtr,
        hashes: MemPtr,
        capacity: u32,
        stride: u32,
        bucket: u32,
    },
}

impl RuntimeIter {
    pub(crate) fn fixed_array(data: MemPtr, size: u32, stride: u32) -> Self {
        Self::FixedArray {
            data,
            size,
            stride,
            index: 0,
        }
    }

    pub(crate) fn good_array(array: MemPtr, stride: u32) -> Self {
        // header fields are read in `first`, after the lock is taken
        Self::GoodArray {
            array,
            data: MemPtr::NULL,
            size: 0,
            stride,
            index: 0,
        }
    }

    pub(crate) fn range(value: RangeVal, signed: bool) -> Self {
        if signed {
            Self::Range {
                current: i64::from(value.from),
                end: i64::from(value.to),
            }
        } else {
            Self::Range {
                current: i64::from(value.from as u32),
                end: i64::from(value.to as u32),
            }
        }
    }

    pub(crate) fn table_keys(table: MemPtr, stride: u32) -> Self {
        Self::Table {
            table,
            values: false,
            elements: MemPtr::NULL,
            hashes: MemPtr::NULL,
            capacity: 0,
            stride,
            bucket: 0,
        }
    }

    pub(crate) fn table_values(table: MemPtr, stride: u32) -> Self {
        Self::Table {
            table,
            values: true,
            elements: MemPtr::NULL,
            hashes: MemPtr::NULL,
            capacity: 0,
            stride,
            bucket: 0,
        }
    }

    /// Positions on the first element and writes it into `slot`.
    pub(crate) fn first(&mut self, vm: &mut Vm<'_>, slot: MemPtr) -> bool {
        match self {
            Self::FixedArray { data, size, index, .. } => {
                *index = 0;
                if *size == 0 {
                    return false;
                }
                vm.store(slot, *data);
                true
            }
            Self::GoodArray {
                array,
                data,
                size,
                index,
                ..
            } => {
                vm.array_lock(*array);
                let header = read_array_header(vm, *array);
                *data = header.data;
                *size = header.size;
                *index = 0;
                if *size == 0 {
                    return false;
                }
                vm.store(slot, *data);
                true
            }
            Self::Range { current, end } => {
                if *current >= *end {
                    return false;
                }
                vm.store(slot, *current as i32);
                true
            }
            Self::Table {
                table,
                values,
                elements,
                hashes,
                capacity,
                stride,
                bucket,
            } => {
                vm.table_lock(*table);
                let header = read_table_header(vm, *table);
                *hashes = header.hashes;
                *capacity = header.capacity;
                *elements = if *values { header.data } else { header.keys };
                *bucket = 0;
                while *bucket < *capacity {
                    let kh = vm.load::<u32>(hashes.add(*bucket * 4));
                    if kh > HASH_KILLED32 {
                        vm.store(slot, elements.add(*bucket * *stride));
                        return true;
                    }
                    *bucket += 1;
                }
                false
            }
        }
    }

    /// Advances and writes the next element into `slot`.
    pub(crate) fn next(&mut self, vm: &mut Vm<'_>, slot: MemPtr) -> bool {
        match self {
            Self::FixedArray { data, size, stride, index } => {
                *index += 1;
                if *index >= *size {
                    return false;
                }
                vm.store(slot, data.add(*index * *stride));
                true
            }
            Self::GoodArray {
                data, size, stride, index, ..
            } => {
                *index += 1;
                if *index >= *size {
                    return false;
                }
                vm.store(slot, data.add(*index * *stride));
                true
            }
            Self::Range { current, end } => {
                *current += 1;
                if *current >= *end {
                    return false;
                }
                vm.store(slot, *current as i32);
                true
            }
            Self::Table {
                elements,
                hashes,
                capacity,
                stride,
                bucket,
                ..
            } => {
                *bucket += 1;
                while *bucket < *capacity {
                    let kh = vm.load::<u32>(hashes.add(*bucket * 4));
                    if kh > HASH_KILLED32 {
                        vm.store(slot, elements.add(*bucket * *stride));
                        return true;
                    }
                    *bucket += 1;
                }
                false
            }
        }
    }

    /// Releases iteration locks. Must not throw.
    pub(crate) fn close(&mut self, vm: &mut Vm<'_>) {
        match self {
            Self::GoodArray { array, .. } => vm.array_unlock(*array),
            Self::Table { table, .. } => vm.table_unlock(*table),
            _ => {}
        }
    }
}

impl Vm<'_> {
    pub(crate) fn table_lock(&mut self, at: MemPtr) {
        let lock = self.load::<u32>(at.add(32));
        self.store::<u32>(at.add(32), lock + 1);
    }

    pub(crate) fn table_unlock(&mut self, at: MemPtr) {
        let lock = self.load::<u32>(at.add(32));
        self.store::<u32>(at.add(32), lock.saturating_sub(1));
    }

    fn loop_slot(&self, stack_top: u32) -> MemPtr {
        MemPtr::new(MemArea::Stack, self.st.stack.sp() + stack_top)
    }

    /// Shared tail of every loop iteration: filter, body, continue clearing.
    /// True to keep looping.
    fn loop_body(&mut self, body: NodeId, filter: Option<NodeId>) -> bool {
        if let Some(f) = filter {
            let keep = self.eval_bool(f);
            if self.stopped() {
                return false;
            }
            if !keep {
                return true;
            }
        }
        self.eval(body);
        self.st.stop_flags.remove(EvalFlags::CONTINUE);
        !self.stopped()
    }

    /// Fused single-source range loop.
    pub(crate) fn for_range(
        &mut self,
        source: NodeId,
        stack_top: u32,
        body: NodeId,
        filter: Option<NodeId>,
    ) -> Register {
        let range = self.eval(source).get::<RangeVal>();
        if self.stopped() {
            return Register::ZERO;
        }
        let slot = self.loop_slot(stack_top);
        let mut i = i64::from(range.from);
        let end = i64::from(range.to);
        while i < end {
            self.store(slot, i as i32);
            if !self.loop_body(body, filter) {
                break;
            }
            i += 1;
        }
        self.st.stop_flags.remove(EvalFlags::BREAK);
        Register::ZERO
    }

    /// Fused loop over dynamic arrays only; iterates the shortest.
    pub(crate) fn for_good_array(
        &mut self,
        sources: &[NodeId],
        strides: &[u32],
        stack_tops: &[u32],
        body: NodeId,
        filter: Option<NodeId>,
    ) -> Register {
        let mut arrays: SmallVec<[MemPtr; 4]> = SmallVec::new();
        for &src in sources {
            let at = self.eval_ptr(src);
            if self.stopped() {
                for &a in &arrays {
                    self.array_unlock(a);
                }
                return Register::ZERO;
            }
            self.array_lock(at);
            arrays.push(at);
        }
        let mut data: SmallVec<[MemPtr; 4]> = SmallVec::new();
        let mut count = u32::MAX;
        for &at in &arrays {
            let header = read_array_header(self, at);
            data.push(header.data);
            count = count.min(header.size);
        }
        let slots: SmallVec<[MemPtr; 4]> = stack_tops.iter().map(|&t| self.loop_slot(t)).collect();
        for i in 0..count {
            for t in 0..sources.len() {
                self.store(slots[t], data[t].add(i * strides[t]));
            }
            if !self.loop_body(body, filter) {
                break;
            }
        }
        for &a in &arrays {
            self.array_unlock(a);
        }
        self.st.stop_flags.remove(EvalFlags::BREAK);
        Register::ZERO
    }

    /// Fused loop over fixed-dim values only; `size` is the smallest dim.
    pub(crate) fn for_fixed_array(
        &mut self,
        sources: &[NodeId],
        strides: &[u32],
        stack_tops: &[u32],
        size: u32,
        body: NodeId,
        filter: Option<NodeId>,
    ) -> Register {
        let mut bases: SmallVec<[MemPtr; 4]> = SmallVec::new();
        for &src in sources {
            let base = self.eval_ptr(src);
            if self.stopped() {
                return Register::ZERO;
            }
            bases.push(base);
        }
        let slots: SmallVec<[MemPtr; 4]> = stack_tops.iter().map(|&t| self.loop_slot(t)).collect();
        for i in 0..size {
            for t in 0..sources.len() {
                self.store(slots[t], bases[t].add(i * strides[t]));
            }
            if !self.loop_body(body, filter) {
                break;
            }
        }
        self.st.stop_flags.remove(EvalFlags::BREAK);
        Register::ZERO
    }

    /// Generic driver: mixed source shapes through the iterator protocol.
    pub(crate) fn for_with_iterator(
        &mut self,
        sources: &[IterSource],
        stack_tops: &[u32],
        body: NodeId,
        filter: Option<NodeId>,
    ) -> Register {
        let mut iters: SmallVec<[RuntimeIter; 4]> = SmallVec::new();
        for source in sources {
            let iter = match *source {
                IterSource::Value { node } => {
                    let handle = self.eval(node).get::<u64>();
                    if self.stopped() {
                        break;
                    }
                    match self.take_iterator(handle) {
                        Some(it) => it,
                        None => {
                            self.throw("invalid iterator");
                            break;
                        }
                    }
                }
                IterSource::GoodArray { node, stride } => {
                    let at = self.eval_ptr(node);
                    if self.stopped() {
                        break;
                    }
                    RuntimeIter::good_array(at, stride)
                }
                IterSource::FixedArray { node, size, stride } => {
                    let base = self.eval_ptr(node);
                    if self.stopped() {
                        break;
                    }
                    RuntimeIter::fixed_array(base, size, stride)
                }
                IterSource::Range { node, signed } => {
                    let value = self.eval(node).get::<RangeVal>();
                    if self.stopped() {
                        break;
                    }
                    RuntimeIter::range(value, signed)
                }
            };
            iters.push(iter);
        }
        if iters.len() == sources.len() && !self.stopped() {
            let slots: SmallVec<[MemPtr; 4]> =
                stack_tops.iter().map(|&t| self.loop_slot(t)).collect();
            let mut live = true;
            for (t, iter) in iters.iter_mut().enumerate() {
                live = iter.first(self, slots[t]) && live;
                if !self.st.stop_flags.is_empty() {
                    live = false;
                    break;
                }
            }
            while live {
                if !self.loop_body(body, filter) {
                    break;
                }
                for (t, iter) in iters.iter_mut().enumerate() {
                    if !iter.next(self, slots[t]) || !self.st.stop_flags.is_empty() {
                        live = false;
                        break;
                    }
                }
            }
        }
        for iter in &mut iters {
            iter.close(self);
        }
        self.st.stop_flags.remove(EvalFlags::BREAK);
        Register::ZERO
    }
}
