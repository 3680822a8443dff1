//! Runtime-visible type descriptors.
//!
//! Inference works on [`crate::typedecl::TypeDecl`]; the runtime gets a
//! flattened mirror interned in the context arena: [`TypeInfo`],
//! [`StructInfo`], [`VarInfo`], and [`FuncInfo`]. The `debug` intrinsic walks
//! these to print any value, and `hash` walks them to hash non-pod values
//! structurally.

use ahash::AHashMap;

use crate::{
    context::CodeStore,
    expressions::Variable,
    hash::Fnv64,
    heap::STRING_HEADER_SIZE,
    module::Function,
    register::{MemPtr, RangeVal, Register},
    typedecl::{BaseType, TypeDecl},
    vm::{Vm, read_array_header, read_table_header},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfoId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructInfoId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarInfoId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncInfoId(pub(crate) u32);

/// Flattened runtime descriptor of one type.
#[derive(Debug)]
pub struct TypeInfo {
    pub base: BaseType,
    pub dim: Box<[u32]>,
    /// Whether a register of this type carries a pointer to the value.
    pub ref_: bool,
    pub can_copy: bool,
    pub is_pod: bool,
    /// Scalar size, dims not applied.
    pub base_size: u32,
    pub struct_info: Option<StructInfoId>,
    pub first: Option<TypeInfoId>,
    pub second: Option<TypeInfoId>,
    /// Handle annotation name, for handles.
    pub annotation: Option<String>,
}

impl TypeInfo {
    /// Size with dims applied.
    #[must_use]
    pub fn full_size(&self) -> u32 {
        self.base_size * self.dim.iter().product::<u32>()
    }
}

#[derive(Debug)]
pub struct VarInfo {
    pub name: String,
    pub type_info: TypeInfoId,
}

#[derive(Debug)]
pub struct StructInfo {
    pub name: String,
    pub fields: Box<[VarInfoId]>,
    /// Field offsets, parallel to `fields`.
    pub offsets: Box<[u32]>,
    pub size: u32,
}

#[derive(Debug)]
pub struct FuncInfo {
    pub name: String,
    pub stack_size: u32,
    pub args: Box<[VarInfoId]>,
}

/// Interns type descriptors into a [`CodeStore`], de-duplicating structure
/// infos by name so recursive and repeated uses share one descriptor.
#[derive(Debug, Default)]
pub(crate) struct DebugInfoBuilder {
    structs: AHashMap<String, StructInfoId>,
}

impl DebugInfoBuilder {
    pub(crate) fn make_type_info(&mut self, code: &mut CodeStore, type_: &TypeDecl) -> TypeInfoId {
        let struct_info = if type_.base == BaseType::Structure {
            type_
                .struct_type
                .as_ref()
                .map(|st| self.make_struct_info(code, st))
        } else {
            None
        };
        let first = type_
            .first_type
            .as_ref()
            .map(|t| self.make_type_info(code, t));
        let second = type_
            .second_type
            .as_ref()
            .map(|t| self.make_type_info(code, t));
        let info = TypeInfo {
            base: type_.base,
            dim: type_.dim.iter().copied().collect(),
            ref_: type_.is_ref(),
            can_copy: type_.can_copy(),
            is_pod: type_.is_pod(),
            base_size: type_.base_size_of(),
            struct_info,
            first,
            second,
            annotation: type_.annotation.as_ref().map(|a| a.name().to_owned()),
        };
        code.push_type_info(info)
    }

    fn make_struct_info(
        &mut self,
        code: &mut CodeStore,
        st: &crate::structure::Structure,
    ) -> StructInfoId {
        if let Some(&id) = self.structs.get(&st.name) {
            return id;
        }
        // reserve the slot first so recursive pointer fields terminate
        let id = code.push_struct_info(StructInfo {
            name: st.name.clone(),
            fields: Box::new([]),
            offsets: Box::new([]),
            size: st.size_of(),
        });
        self.structs.insert(st.name.clone(), id);
        let mut fields = Vec::with_capacity(st.fields.len());
        let mut offsets = Vec::with_capacity(st.fields.len());
        for field in &st.fields {
            let ti = self.make_type_info(code, &field.type_);
            fields.push(code.push_var_info(VarInfo {
                name: field.name.clone(),
                type_info: ti,
            }));
            offsets.push(field.offset);
        }
        code.struct_infos[id.0 as usize].fields = fields.into_boxed_slice();
        code.struct_infos[id.0 as usize].offsets = offsets.into_boxed_slice();
        id
    }

    pub(crate) fn make_var_info(&mut self, code: &mut CodeStore, var: &Variable) -> VarInfoId {
        let ti = self.make_type_info(code, &var.type_);
        code.push_var_info(VarInfo {
            name: var.name.clone(),
            type_info: ti,
        })
    }

    pub(crate) fn make_func_info(&mut self, code: &mut CodeStore, func: &Function) -> FuncInfoId {
        let args: Vec<VarInfoId> = func
            .arguments
            .iter()
            .map(|a| self.make_var_info(code, a))
            .collect();
        code.push_func_info(FuncInfo {
            name: func.name.clone(),
            stack_size: func.total_stack_size,
            args: args.into_boxed_slice(),
        })
    }
}

/// Either a by-value register or a place in script memory.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ValueRef {
    Reg(Register),
    Mem(MemPtr),
}

impl Vm<'_> {
    fn value_reg(&self, value: ValueRef, size: u32) -> Register {
        match value {
            ValueRef::Reg(reg) => reg,
            ValueRef::Mem(ptr) => self.load_sized(ptr, size.min(16)),
        }
    }

    /// Renders one value using its runtime descriptor.
    pub(crate) fn describe_value(&self, value: ValueRef, ti_id: TypeInfoId, out: &mut String) {
        let ti = &self.code.type_infos[ti_id.0 as usize];
        self.describe_dims(value, ti, ti.dim.len(), out);
    }

    /// Renders `dims_left` trailing dimensions of `ti`, then the scalar.
    fn describe_dims(&self, value: ValueRef, ti: &TypeInfo, dims_left: usize, out: &mut String) {
        if dims_left == 0 {
            self.describe_scalar(value, ti, out);
            return;
        }
        let ValueRef::Mem(base) = value else {
            out.push_str("[?]");
            return;
        };
        let count = ti.dim[dims_left - 1];
        let stride: u32 = ti.base_size * ti.dim[..dims_left - 1].iter().product::<u32>();
        out.push('[');
        for i in 0..count {
            if i > 0 {
                out.push_str(", ");
            }
            self.describe_dims(ValueRef::Mem(base.add(i * stride)), ti, dims_left - 1, out);
        }
        out.push(']');
    }

    fn describe_scalar(&self, value: ValueRef, ti: &TypeInfo, out: &mut String) {
        use std::fmt::Write as _;
        match ti.base {
            BaseType::None | BaseType::Void => out.push_str("void"),
            BaseType::Bool => {
                let _ = write!(out, "{}", self.value_reg(value, 1).get::<bool>());
            }
            BaseType::Int8 => {
                let _ = write!(out, "{}", self.value_reg(value, 1).get::<i8>());
            }
            BaseType::UInt8 => {
                let _ = write!(out, "{}", self.value_reg(value, 1).get::<u8>());
            }
            BaseType::Int16 => {
                let _ = write!(out, "{}", self.value_reg(value, 2).get::<i16>());
            }
            BaseType::UInt16 => {
                let _ = write!(out, "{}", self.value_reg(value, 2).get::<u16>());
            }
            BaseType::Int | BaseType::Enumeration => {
                let _ = write!(out, "{}", self.value_reg(value, 4).get::<i32>());
            }
            BaseType::UInt => {
                let _ = write!(out, "{}", self.value_reg(value, 4).get::<u32>());
            }
            BaseType::Int64 => {
                let _ = write!(out, "{}", self.value_reg(value, 8).get::<i64>());
            }
            BaseType::UInt64 => {
                let _ = write!(out, "{}", self.value_reg(value, 8).get::<u64>());
            }
            BaseType::Float => {
                let mut buf = ryu::Buffer::new();
                out.push_str(buf.format(self.value_reg(value, 4).get::<f32>()));
            }
            BaseType::Double => {
                let mut buf = ryu::Buffer::new();
                out.push_str(buf.format(self.value_reg(value, 8).get::<f64>()));
            }
            BaseType::Range | BaseType::URange => {
                let r = self.value_reg(value, 8).get::<RangeVal>();
                if ti.base == BaseType::Range {
                    let _ = write!(out, "{}..{}", r.from, r.to);
                } else {
                    let _ = write!(out, "{}..{}", r.from as u32, r.to as u32);
                }
            }
            BaseType::Int2 | BaseType::Int3 | BaseType::Int4 => {
                let v = self.value_reg(value, ti.base_size).get::<[i32; 4]>();
                out.push('(');
                for i in 0..(ti.base_size / 4) as usize {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "{}", v[i]);
                }
                out.push(')');
            }
            BaseType::UInt2 | BaseType::UInt3 | BaseType::UInt4 => {
                let v = self.value_reg(value, ti.base_size).get::<[u32; 4]>();
                out.push('(');
                for i in 0..(ti.base_size / 4) as usize {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "{}", v[i]);
                }
                out.push(')');
            }
            BaseType::Float2 | BaseType::Float3 | BaseType::Float4 => {
                let v = self.value_reg(value, ti.base_size).get::<[f32; 4]>();
                out.push('(');
                for i in 0..(ti.base_size / 4) as usize {
                    if i > 0 {
                        out.push(',');
                    }
                    let mut buf = ryu::Buffer::new();
                    out.push_str(buf.format(v[i]));
                }
                out.push(')');
            }
            BaseType::String => {
                let ptr = self.value_reg(value, 8).get::<MemPtr>();
                out.push('"');
                out.push_str(&self.string_text(ptr));
                out.push('"');
            }
            BaseType::Pointer => {
                let ptr = self.value_reg(value, 8).get::<MemPtr>();
                if ptr.is_null() {
                    out.push_str("null");
                } else {
                    out.push('*');
                }
            }
            BaseType::Structure => {
                let ValueRef::Mem(base) = value else {
                    out.push_str("{?}");
                    return;
                };
                let Some(si_id) = ti.struct_info else {
                    out.push_str("{}");
                    return;
                };
                let si = &self.code.struct_infos[si_id.0 as usize];
                out.push_str("{ ");
                for (i, (&field, &offset)) in si.fields.iter().zip(si.offsets.iter()).enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let vi = &self.code.var_infos[field.0 as usize];
                    let _ = write!(out, "{} = ", vi.name);
                    self.describe_value(ValueRef::Mem(base.add(offset)), vi.type_info, out);
                }
                out.push_str(" }");
            }
            BaseType::Array => {
                let ValueRef::Mem(base) = value else {
                    out.push_str("[?]");
                    return;
                };
                let arr = read_array_header(self, base);
                let Some(first) = ti.first else {
                    let _ = write!(out, "array[{}]", arr.size);
                    return;
                };
                let elem_size = self.code.type_infos[first.0 as usize].full_size();
                out.push('[');
                for i in 0..arr.size {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.describe_value(ValueRef::Mem(arr.data.add(i * elem_size)), first, out);
                }
                out.push(']');
            }
            BaseType::Table => {
                let ValueRef::Mem(base) = value else {
                    out.push_str("table");
                    return;
                };
                let tab = read_table_header(self, base);
                let _ = write!(out, "table[{}]", tab.size);
            }
            BaseType::Handle => {
                out.push_str(ti.annotation.as_deref().unwrap_or("handle"));
            }
            BaseType::Iterator => out.push_str("iterator"),
            BaseType::Block => out.push_str("block"),
            BaseType::Function => out.push_str("function"),
            BaseType::Lambda => out.push_str("lambda"),
            BaseType::Tuple => out.push_str("tuple"),
        }
    }

    /// Structural hash of a value through its descriptor; feeds `state`.
    pub(crate) fn hash_value(&self, value: ValueRef, ti_id: TypeInfoId, state: &mut Fnv64) {
        let ti = &self.code.type_infos[ti_id.0 as usize];
        if !ti.dim.is_empty() {
            let ValueRef::Mem(base) = value else { return };
            if ti.is_pod {
                state.write(self.mem(base, ti.full_size()));
            } else {
                // walk elements of the outermost dimension
                let count = *ti.dim.last().unwrap();
                let stride: u32 =
                    ti.base_size * ti.dim[..ti.dim.len() - 1].iter().product::<u32>();
                for i in 0..count {
                    self.hash_scalar(ValueRef::Mem(base.add(i * stride)), ti, state);
                }
            }
            return;
        }
        self.hash_scalar(value, ti, state);
    }

    fn hash_scalar(&self, value: ValueRef, ti: &TypeInfo, state: &mut Fnv64) {
        match ti.base {
            BaseType::String => {
                let ptr = self.value_reg(value, 8).get::<MemPtr>();
                state.write(self.string_text(ptr).as_bytes());
            }
            BaseType::Structure => {
                let ValueRef::Mem(base) = value else { return };
                let Some(si_id) = ti.struct_info else { return };
                let si = &self.code.struct_infos[si_id.0 as usize];
                for (&field, &offset) in si.fields.iter().zip(si.offsets.iter()) {
                    let vi = &self.code.var_infos[field.0 as usize];
                    self.hash_value(ValueRef::Mem(base.add(offset)), vi.type_info, state);
                }
            }
            BaseType::Array => {
                let ValueRef::Mem(base) = value else { return };
                let arr = read_array_header(self, base);
                state.write(&arr.size.to_le_bytes());
                if let Some(first) = ti.first {
                    let elem_size = self.code.type_infos[first.0 as usize].full_size();
                    for i in 0..arr.size {
                        self.hash_value(ValueRef::Mem(arr.data.add(i * elem_size)), first, state);
                    }
                }
            }
            BaseType::Table => {
                let ValueRef::Mem(base) = value else { return };
                let tab = read_table_header(self, base);
                state.write(&tab.size.to_le_bytes());
            }
            _ => {
                let size = ti.base_size.min(16);
                let reg = self.value_reg(value, size);
                state.write(&reg.bytes()[..size as usize]);
            }
        }
    }

    /// Reads the text of a string value; null renders as the empty string.
    pub(crate) fn string_text(&self, ptr: MemPtr) -> String {
        if ptr.is_null() {
            return String::new();
        }
        let header = MemPtr::from_raw(ptr.raw() - u64::from(STRING_HEADER_SIZE));
        let len = self.load::<u32>(header.add(4));
        String::from_utf8_lossy(self.mem(ptr, len)).into_owned()
    }
}
