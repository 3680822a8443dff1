//! Hash table runtime.
//!
//! A `table<K,V>` value is a 48-byte header; the payload is one heap
//! allocation holding three parallel regions: values, keys, then 32-bit
//! bucket hashes. Open addressing with linear probing and tombstones: bucket
//! hash 0 is empty, 1 is killed, real hashes never collide with either.
//! Indexing reserves a zeroed value slot for missing keys; `find` returns a
//! pointer or null; `erase` reports whether the key existed.

use crate::{
    context::NodeId,
    hash::{hash32, HASH_EMPTY32, HASH_KILLED32},
    register::{MemArea, MemPtr, Register},
    typedecl::BaseType,
    vm::{iterator::RuntimeIter, Vm},
};

const MIN_CAPACITY: u32 = 64;
const MIN_LOOKUPS: u32 = 4;

/// Decoded table header.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TableHeader {
    pub data: MemPtr,
    pub keys: MemPtr,
    pub hashes: MemPtr,
    pub size: u32,
    pub capacity: u32,
    pub lock: u32,
    pub max_lookups: u32,
    pub shift: u32,
}

pub(crate) fn read_table_header(vm: &Vm<'_>, at: MemPtr) -> TableHeader {
    TableHeader {
        data: MemPtr::from_raw(vm.load::<u64>(at)),
        keys: MemPtr::from_raw(vm.load::<u64>(at.add(8))),
        hashes: MemPtr::from_raw(vm.load::<u64>(at.add(16))),
        size: vm.load::<u32>(at.add(24)),
        capacity: vm.load::<u32>(at.add(28)),
        lock: vm.load::<u32>(at.add(32)),
        max_lookups: vm.load::<u32>(at.add(36)),
        shift: vm.load::<u32>(at.add(40)),
    }
}

pub(crate) fn write_table_header(vm: &mut Vm<'_>, at: MemPtr, header: &TableHeader) {
    vm.store::<u64>(at, header.data.raw());
    vm.store::<u64>(at.add(8), header.keys.raw());
    vm.store::<u64>(at.add(16), header.hashes.raw());
    vm.store::<u32>(at.add(24), header.size);
    vm.store::<u32>(at.add(28), header.capacity);
    vm.store::<u32>(at.add(32), header.lock);
    vm.store::<u32>(at.add(36), header.max_lookups);
    vm.store::<u32>(at.add(40), header.shift);
}

fn compute_shift(capacity: u32) -> u32 {
    (capacity - 1).leading_zeros()
}

fn compute_max_lookups(capacity: u32) -> u32 {
    let desired = 32 - (capacity - 1).leading_zeros();
    MIN_LOOKUPS.max(desired * 6)
}

fn key_size(key_ty: BaseType) -> u32 {
    key_ty.size_of()
}

impl Vm<'_> {
    /// Hash of one key register. Strings hash their content (cached in the
    /// string header); everything else hashes its value bytes.
    fn table_key_hash(&self, key_ty: BaseType, key: Register) -> u32 {
        if key_ty == BaseType::String {
            let ptr = key.get::<MemPtr>();
            if ptr.is_null() {
                return hash32(b"");
            }
            let header = MemPtr::from_raw(ptr.raw() - 8);
            let cached = self.load::<u32>(header);
            if cached > HASH_KILLED32 {
                return cached;
            }
            return hash32(self.string_text(ptr).as_bytes());
        }
        let size = key_size(key_ty) as usize;
        hash32(&key.bytes()[..size])
    }

    fn table_key_equal(&self, key_ty: BaseType, stored_at: MemPtr, key: Register) -> bool {
        let size = key_size(key_ty) as usize;
        if key_ty == BaseType::String {
            let a = MemPtr::from_raw(self.load::<u64>(stored_at));
            let b = key.get::<MemPtr>();
            if a == b {
                return true;
            }
            return self.string_text(a) == self.string_text(b);
        }
        self.mem(stored_at, size as u32) == &key.bytes()[..size]
    }

    fn bucket_hash(&self, header: &TableHeader, index: u32) -> u32 {
        self.load::<u32>(header.hashes.add(index * 4))
    }

    /// Probes for `key`; `None` when absent.
    fn table_lookup(
        &self,
        header: &TableHeader,
        key_ty: BaseType,
        key: Register,
        hash: u32,
    ) -> Option<u32> {
        if header.capacity == 0 {
            return None;
        }
        let ksize = key_size(key_ty);
        let mask = header.capacity - 1;
        let mut index = hash >> header.shift;
        let last = (index + header.max_lookups) & mask;
        while index != last {
            let kh = self.bucket_hash(header, index);
            if kh == HASH_EMPTY32 {
                return None;
            }
            if kh == hash && self.table_key_equal(key_ty, header.keys.add(index * ksize), key) {
                return Some(index);
            }
            index = (index + 1) & mask;
        }
        None
    }

    /// Probes for a free or matching bucket in a freshly sized table; used
    /// during rehash where no tombstones exist yet.
    fn table_insert_new(&self, header: &TableHeader, hash: u32) -> Option<u32> {
        let mask = header.capacity - 1;
        let mut index = hash >> header.shift;
        let last = (index + header.max_lookups) & mask;
        while index != last {
            if self.bucket_hash(header, index) == HASH_EMPTY32 {
                return Some(index);
            }
            index = (index + 1) & mask;
        }
        None
    }

    /// Grows the table payload, rehashing live entries. False on heap
    /// exhaustion (a throw is raised).
    fn table_grow(&mut self, at: MemPtr, key_ty: BaseType, value_size: u32) -> bool {
        let old = read_table_header(self, at);
        let ksize = key_size(key_ty);
        let mut new_capacity = MIN_CAPACITY.max(old.capacity * 2);
        'grow: loop {
            let bytes = new_capacity * (value_size + ksize + 4);
            let Some(offset) = self.st.heap.allocate(bytes) else {
                self.throw("out of heap");
                return false;
            };
            let data = MemPtr::new(MemArea::Heap, offset);
            self.zero_bytes(data, bytes);
            let new_header = TableHeader {
                data,
                keys: data.add(new_capacity * value_size),
                hashes: data.add(new_capacity * (value_size + ksize)),
                size: old.size,
                capacity: new_capacity,
                lock: old.lock,
                max_lookups: compute_max_lookups(new_capacity),
                shift: compute_shift(new_capacity),
            };
            for i in 0..old.capacity {
                let hash = self.bucket_hash(&old, i);
                if hash <= HASH_KILLED32 {
                    continue;
                }
                let Some(index) = self.table_insert_new(&new_header, hash) else {
                    // probe run exhausted; double again and retry
                    self.st.heap.free(offset, bytes);
                    new_capacity *= 2;
                    continue 'grow;
                };
                self.store::<u32>(new_header.hashes.add(index * 4), hash);
                self.copy_bytes(
                    new_header.keys.add(index * ksize),
                    old.keys.add(i * ksize),
                    ksize,
                );
                self.copy_bytes(
                    new_header.data.add(index * value_size),
                    old.data.add(i * value_size),
                    value_size,
                );
            }
            if !old.data.is_null() {
                self.st
                    .heap
                    .free(old.data.offset(), old.capacity * (value_size + ksize + 4));
            }
            write_table_header(self, at, &new_header);
            return true;
        }
    }

    /// Finds or inserts the bucket for `key`, zeroing the value slot of new
    /// entries. Returns the bucket index.
    fn table_reserve(
        &mut self,
        at: MemPtr,
        key_ty: BaseType,
        key: Register,
        hash: u32,
        value_size: u32,
    ) -> Option<u32> {
        let ksize = key_size(key_ty);
        loop {
            let header = read_table_header(self, at);
            if header.capacity > 0 {
                let mask = header.capacity - 1;
                let mut index = hash >> header.shift;
                let last = (index + header.max_lookups) & mask;
                while index != last {
                    let kh = self.bucket_hash(&header, index);
                    if kh <= HASH_KILLED32 {
                        self.store::<u32>(header.hashes.add(index * 4), hash);
                        let key_at = header.keys.add(index * ksize);
                        self.store_sized(key_at, key, ksize);
                        let mut header = header;
                        header.size += 1;
                        write_table_header(self, at, &header);
                        return Some(index);
                    }
                    if kh == hash && self.table_key_equal(key_ty, header.keys.add(index * ksize), key)
                    {
                        return Some(index);
                    }
                    index = (index + 1) & mask;
                }
            }
            if header.lock != 0 {
                self.throw("can't change locked table");
                return None;
            }
            if !self.table_grow(at, key_ty, value_size) {
                return None;
            }
        }
    }

    /// `table[key]` — a reference to the value slot, inserting a zeroed slot
    /// for a missing key.
    pub(crate) fn table_index(
        &mut self,
        table: NodeId,
        key: NodeId,
        key_ty: BaseType,
        value_size: u32,
    ) -> Register {
        let at = self.eval_ptr(table);
        if self.stopped() {
            return Register::ZERO;
        }
        let key = self.eval(key);
        if self.stopped() {
            return Register::ZERO;
        }
        let hash = self.table_key_hash(key_ty, key);
        let Some(index) = self.table_reserve(at, key_ty, key, hash, value_size) else {
            return Register::ZERO;
        };
        let header = read_table_header(self, at);
        Register::put(header.data.add(index * value_size))
    }

    /// `find(table, key)` — pointer to the value slot, or null.
    pub(crate) fn table_find(
        &mut self,
        table: NodeId,
        key: NodeId,
        key_ty: BaseType,
        value_size: u32,
    ) -> Register {
        let at = self.eval_ptr(table);
        if self.stopped() {
            return Register::ZERO;
        }
        let key = self.eval(key);
        if self.stopped() {
            return Register::ZERO;
        }
        let header = read_table_header(self, at);
        let hash = self.table_key_hash(key_ty, key);
        match self.table_lookup(&header, key_ty, key, hash) {
            Some(index) => Register::put(header.data.add(index * value_size)),
            None => Register::put(MemPtr::NULL),
        }
    }

    /// `erase(table, key)` — true when the key was present.
    pub(crate) fn table_erase(
        &mut self,
        table: NodeId,
        key: NodeId,
        key_ty: BaseType,
        value_size: u32,
    ) -> Register {
        let at = self.eval_ptr(table);
        if self.stopped() {
            return Register::ZERO;
        }
        let key = self.eval(key);
        if self.stopped() {
            return Register::ZERO;
        }
        let mut header = read_table_header(self, at);
        if header.lock != 0 {
            self.throw("can't change locked table");
            return Register::ZERO;
        }
        let hash = self.table_key_hash(key_ty, key);
        let Some(index) = self.table_lookup(&header, key_ty, key, hash) else {
            return Register::put(false);
        };
        self.store::<u32>(header.hashes.add(index * 4), HASH_KILLED32);
        self.zero_bytes(header.data.add(index * value_size), value_size);
        header.size -= 1;
        write_table_header(self, at, &header);
        Register::put(true)
    }

    /// `keys(table)` — a first-class iterator over key references.
    pub(crate) fn table_keys_iterator(&mut self, table: NodeId, stride: u32) -> Register {
        let at = self.eval_ptr(table);
        if self.stopped() {
            return Register::ZERO;
        }
        self.register_iterator(RuntimeIter::table_keys(at, stride))
    }

    /// `values(table)` — a first-class iterator over value references.
    pub(crate) fn table_values_iterator(&mut self, table: NodeId, stride: u32) -> Register {
        let at = self.eval_ptr(table);
        if self.stopped() {
            return Register::ZERO;
        }
        self.register_iterator(RuntimeIter::table_values(at, stride))
    }
}
