//! The recursive type model.
//!
//! A [`TypeDecl`] describes every type a program can express: primitives,
//! vectors, ranges, strings, pointers, iterators, arrays, tables, blocks,
//! structures, handles, and fixed-dimension forms of all of these. The whole
//! inference and overload machinery keys off three operations here:
//! structural equality under ref/const flags, size/alignment computation, and
//! the canonical mangled name.

use std::{fmt, rc::Rc};

use smallvec::SmallVec;
use strum::{Display, IntoStaticStr};

use crate::{
    annotation::TypeAnnotation,
    source::LineInfo,
    structure::{Enumeration, Structure},
};

/// Closed tag for every base type the language knows.
///
/// Each tag has a fixed byte size and alignment except `Structure`, `Tuple`,
/// and `Handle`, which defer to their descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BaseType {
    #[default]
    None,
    Void,
    Bool,
    Int8,
    Int16,
    Int,
    Int64,
    UInt8,
    UInt16,
    UInt,
    UInt64,
    Float,
    Double,
    Int2,
    Int3,
    Int4,
    UInt2,
    UInt3,
    UInt4,
    Float2,
    Float3,
    Float4,
    Range,
    URange,
    String,
    Pointer,
    Enumeration,
    Iterator,
    Array,
    Table,
    Structure,
    Handle,
    Block,
    Function,
    Lambda,
    Tuple,
}

impl BaseType {
    /// Byte size of a scalar of this base type. Descriptor-sized types
    /// (structure, handle, tuple) return 0 here; [`TypeDecl::base_size_of`]
    /// consults the descriptor instead.
    #[must_use]
    pub fn size_of(self) -> u32 {
        match self {
            Self::None | Self::Void => 0,
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int | Self::UInt | Self::Float | Self::Enumeration => 4,
            Self::Int64
            | Self::UInt64
            | Self::Double
            | Self::Range
            | Self::URange
            | Self::Int2
            | Self::UInt2
            | Self::Float2
            | Self::String
            | Self::Pointer
            | Self::Iterator
            | Self::Block
            | Self::Function
            | Self::Lambda => 8,
            Self::Int3 | Self::UInt3 | Self::Float3 => 12,
            Self::Int4 | Self::UInt4 | Self::Float4 => 16,
            Self::Array => 24,
            Self::Table => 48,
            Self::Structure | Self::Handle | Self::Tuple => 0,
        }
    }

    /// Natural alignment of a scalar of this base type.
    #[must_use]
    pub fn align_of(self) -> u32 {
        match self {
            Self::None | Self::Void => 1,
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int
            | Self::UInt
            | Self::Float
            | Self::Enumeration
            | Self::Range
            | Self::URange
            | Self::Int3
            | Self::UInt3
            | Self::Float3
            | Self::Block => 4,
            Self::Int64
            | Self::UInt64
            | Self::Double
            | Self::Int2
            | Self::UInt2
            | Self::Float2
            | Self::String
            | Self::Pointer
            | Self::Iterator
            | Self::Array
            | Self::Table
            | Self::Function
            | Self::Lambda => 8,
            Self::Int4 | Self::UInt4 | Self::Float4 => 16,
            Self::Structure | Self::Handle | Self::Tuple => 1,
        }
    }

    /// True for the numeric scalar tags policies are generated for.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int
                | Self::Int64
                | Self::UInt8
                | Self::UInt16
                | Self::UInt
                | Self::UInt64
                | Self::Float
                | Self::Double
        )
    }

    /// True for the vector tags (2/3/4-wide int, uint, float).
    #[must_use]
    pub fn is_vector(self) -> bool {
        matches!(
            self,
            Self::Int2
                | Self::Int3
                | Self::Int4
                | Self::UInt2
                | Self::UInt3
                | Self::UInt4
                | Self::Float2
                | Self::Float3
                | Self::Float4
        )
    }
}

/// A node in the recursive type tree.
///
/// `first_type` carries the element for arrays, pointers, iterators, and the
/// return type for blocks; `second_type` carries the table value type.
/// `dim` holds fixed array dimensions, innermost last. `ref_` marks a
/// reference to storage of the base type; `constant` forbids writes through
/// this type. The two flags commute.
#[derive(Debug, Clone, Default)]
pub struct TypeDecl {
    pub base: BaseType,
    pub struct_type: Option<Rc<Structure>>,
    pub enum_type: Option<Rc<Enumeration>>,
    pub annotation: Option<Rc<dyn TypeAnnotation>>,
    pub first_type: Option<Box<TypeDecl>>,
    pub second_type: Option<Box<TypeDecl>>,
    /// Argument types for block/function/lambda/tuple types, when declared.
    pub arg_types: Vec<TypeDecl>,
    pub dim: SmallVec<[u32; 2]>,
    pub ref_: bool,
    pub constant: bool,
    pub at: LineInfo,
}

impl TypeDecl {
    #[must_use]
    pub fn new(base: BaseType) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn structure(st: Rc<Structure>) -> Self {
        Self {
            base: BaseType::Structure,
            struct_type: Some(st),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn enumeration(en: Rc<Enumeration>) -> Self {
        Self {
            base: BaseType::Enumeration,
            enum_type: Some(en),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn handle(annotation: Rc<dyn TypeAnnotation>) -> Self {
        Self {
            base: BaseType::Handle,
            annotation: Some(annotation),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn array_of(element: TypeDecl) -> Self {
        Self {
            base: BaseType::Array,
            first_type: Some(Box::new(element)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn table_of(key: TypeDecl, value: TypeDecl) -> Self {
        Self {
            base: BaseType::Table,
            first_type: Some(Box::new(key)),
            second_type: Some(Box::new(value)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn pointer_to(pointee: TypeDecl) -> Self {
        Self {
            base: BaseType::Pointer,
            first_type: Some(Box::new(pointee)),
            ..Self::default()
        }
    }

    /// `void ?` — the pointer with no pointee type.
    #[must_use]
    pub fn void_pointer() -> Self {
        Self::new(BaseType::Pointer)
    }

    #[must_use]
    pub fn iterator_of(element: TypeDecl) -> Self {
        Self {
            base: BaseType::Iterator,
            first_type: Some(Box::new(element)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn block_returning(result: TypeDecl) -> Self {
        Self {
            base: BaseType::Block,
            first_type: Some(Box::new(result)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_ref(mut self) -> Self {
        self.ref_ = true;
        self
    }

    #[must_use]
    pub fn with_const(mut self) -> Self {
        self.constant = true;
        self
    }

    #[must_use]
    pub fn with_dim(mut self, dim: &[u32]) -> Self {
        self.dim = dim.iter().copied().collect();
        self
    }

    /// Structural equality. Structures and handles compare by declaration
    /// identity; compound types recurse; `dim` compares element-wise;
    /// block/function/lambda/tuple also compare argument lists when both
    /// sides declare them.
    #[must_use]
    pub fn is_same(&self, other: &Self, ref_matters: bool, const_matters: bool) -> bool {
        if self.base != other.base {
            return false;
        }
        match self.base {
            BaseType::Handle => {
                let same = match (&self.annotation, &other.annotation) {
                    (Some(a), Some(b)) => Rc::ptr_eq(a, b),
                    (None, None) => true,
                    _ => false,
                };
                if !same {
                    return false;
                }
            }
            BaseType::Structure => {
                let same = match (&self.struct_type, &other.struct_type) {
                    (Some(a), Some(b)) => Rc::ptr_eq(a, b),
                    (None, None) => true,
                    _ => false,
                };
                if !same {
                    return false;
                }
            }
            BaseType::Enumeration => {
                let same = match (&self.enum_type, &other.enum_type) {
                    (Some(a), Some(b)) => Rc::ptr_eq(a, b),
                    (None, None) => true,
                    _ => false,
                };
                if !same {
                    return false;
                }
            }
            BaseType::Pointer | BaseType::Iterator | BaseType::Array | BaseType::Block => {
                if let (Some(a), Some(b)) = (&self.first_type, &other.first_type)
                    && !a.is_same(b, true, true)
                {
                    return false;
                }
            }
            BaseType::Table => {
                if let (Some(a), Some(b)) = (&self.first_type, &other.first_type)
                    && !a.is_same(b, true, true)
                {
                    return false;
                }
                if let (Some(a), Some(b)) = (&self.second_type, &other.second_type)
                    && !a.is_same(b, true, true)
                {
                    return false;
                }
            }
            _ => {}
        }
        if matches!(
            self.base,
            BaseType::Block | BaseType::Function | BaseType::Lambda | BaseType::Tuple
        ) && !self.arg_types.is_empty()
            && !other.arg_types.is_empty()
        {
            if self.arg_types.len() != other.arg_types.len() {
                return false;
            }
            for (a, b) in self.arg_types.iter().zip(&other.arg_types) {
                if !a.is_same(b, true, true) {
                    return false;
                }
            }
        }
        if self.dim != other.dim {
            return false;
        }
        if ref_matters && self.ref_ != other.ref_ {
            return false;
        }
        if const_matters && self.constant != other.constant {
            return false;
        }
        true
    }

    /// True when this type or its pointee carries `constant`.
    #[must_use]
    pub fn is_const(&self) -> bool {
        if self.constant {
            return true;
        }
        if self.base == BaseType::Pointer
            && let Some(first) = &self.first_type
        {
            return first.constant;
        }
        false
    }

    #[must_use]
    pub fn is_void(&self) -> bool {
        self.base == BaseType::Void && self.dim.is_empty()
    }

    #[must_use]
    pub fn is_pointer(&self) -> bool {
        self.base == BaseType::Pointer && self.dim.is_empty()
    }

    #[must_use]
    pub fn is_handle(&self) -> bool {
        self.base == BaseType::Handle && self.dim.is_empty()
    }

    #[must_use]
    pub fn is_range(&self) -> bool {
        matches!(self.base, BaseType::Range | BaseType::URange) && self.dim.is_empty()
    }

    /// Base type an iteration over a range produces.
    #[must_use]
    pub fn range_base_type(&self) -> BaseType {
        match self.base {
            BaseType::Range => BaseType::Int,
            BaseType::URange => BaseType::UInt,
            _ => BaseType::None,
        }
    }

    /// `int` or `uint`, scalar — the only types accepted as indexes.
    #[must_use]
    pub fn is_index(&self) -> bool {
        matches!(self.base, BaseType::Int | BaseType::UInt) && self.dim.is_empty()
    }

    /// A fixed-dimension value (`int[4]`, `Foo[2][3]`, ...).
    #[must_use]
    pub fn is_fixed_array(&self) -> bool {
        !self.dim.is_empty()
    }

    /// A fully typed dynamic array: `array<T>`, no dims.
    #[must_use]
    pub fn is_good_array(&self) -> bool {
        self.base == BaseType::Array && self.dim.is_empty() && self.first_type.is_some()
    }

    /// A fully typed table: `table<K,V>`, no dims.
    #[must_use]
    pub fn is_good_table(&self) -> bool {
        self.base == BaseType::Table
            && self.dim.is_empty()
            && self.first_type.is_some()
            && self.second_type.is_some()
    }

    /// A fully typed iterator: `iterator<T>`, no dims.
    #[must_use]
    pub fn is_good_iterator(&self) -> bool {
        self.base == BaseType::Iterator && self.dim.is_empty() && self.first_type.is_some()
    }

    /// A block value, no dims.
    #[must_use]
    pub fn is_good_block(&self) -> bool {
        self.base == BaseType::Block && self.dim.is_empty()
    }

    /// Simple scalar: something that fits a register and is not a structure,
    /// pointer, or fixed-dim value. Only these can be dereferenced by value.
    #[must_use]
    pub fn is_simple(&self) -> bool {
        if matches!(
            self.base,
            BaseType::None | BaseType::Void | BaseType::Structure | BaseType::Pointer
        ) {
            return false;
        }
        self.dim.is_empty()
    }

    #[must_use]
    pub fn is_simple_of(&self, base: BaseType) -> bool {
        self.base == base && self.is_simple()
    }

    /// True when values of this type are reference-valued or inherently
    /// reference-held (structures, arrays, tables, fixed dims, ref handles).
    #[must_use]
    pub fn is_ref(&self) -> bool {
        self.ref_ || self.is_ref_type()
    }

    /// True when storage of this type always travels by reference.
    #[must_use]
    pub fn is_ref_type(&self) -> bool {
        if self.base == BaseType::Handle {
            return self.annotation.as_ref().is_some_and(|a| a.is_ref_type());
        }
        matches!(
            self.base,
            BaseType::Structure | BaseType::Array | BaseType::Table | BaseType::Tuple
        ) || !self.dim.is_empty()
    }

    /// False if the type contains an array, table, string, or block anywhere.
    #[must_use]
    pub fn is_pod(&self) -> bool {
        match self.base {
            BaseType::Array | BaseType::Table | BaseType::String | BaseType::Block => false,
            BaseType::Structure => self.struct_type.as_ref().is_none_or(|st| st.is_pod()),
            BaseType::Handle => self.annotation.as_ref().is_none_or(|a| a.is_pod()),
            _ => true,
        }
    }

    /// Arrays, tables, and blocks are not copyable; structures recurse;
    /// handles answer via their annotation.
    #[must_use]
    pub fn can_copy(&self) -> bool {
        match self.base {
            BaseType::Array | BaseType::Table | BaseType::Block => false,
            BaseType::Structure => self.struct_type.as_ref().is_none_or(|st| st.can_copy()),
            BaseType::Handle => self.annotation.as_ref().is_none_or(|a| a.can_copy()),
            _ => true,
        }
    }

    /// Everything but blocks moves; handles answer via their annotation.
    #[must_use]
    pub fn can_move(&self) -> bool {
        match self.base {
            BaseType::Block => false,
            BaseType::Handle => self.annotation.as_ref().is_none_or(|a| a.can_move()),
            _ => true,
        }
    }

    /// Scalar size before dims are applied.
    #[must_use]
    pub fn base_size_of(&self) -> u32 {
        match self.base {
            BaseType::Structure => self.struct_type.as_ref().map_or(0, |st| st.size_of()),
            BaseType::Handle => self.annotation.as_ref().map_or(0, |a| a.size_of()),
            BaseType::Tuple => {
                let mut offset = 0u32;
                let mut align = 1u32;
                for arg in &self.arg_types {
                    let a = arg.align_of();
                    align = align.max(a);
                    offset = align_up(offset, a) + arg.size_of();
                }
                align_up(offset, align)
            }
            base => base.size_of(),
        }
    }

    /// Full size: `base_size_of * product(dim)`.
    #[must_use]
    pub fn size_of(&self) -> u32 {
        self.dim.iter().product::<u32>() * self.base_size_of()
    }

    /// Max alignment of constituent parts.
    #[must_use]
    pub fn align_of(&self) -> u32 {
        match self.base {
            BaseType::Structure => self.struct_type.as_ref().map_or(1, |st| st.align_of()),
            BaseType::Handle => self.annotation.as_ref().map_or(1, |a| a.align_of()),
            BaseType::Tuple => self.arg_types.iter().map(TypeDecl::align_of).max().unwrap_or(1),
            base => base.align_of(),
        }
    }

    /// Row stride for multi-dim indexing: product of all but the last dim
    /// times the base size.
    #[must_use]
    pub fn stride(&self) -> u32 {
        let mut size = 1u32;
        if self.dim.len() > 1 {
            for d in &self.dim[..self.dim.len() - 1] {
                size *= d;
            }
        }
        self.base_size_of() * size
    }

    /// The canonical textual key for this type. Injective: two types mangle
    /// identically iff `is_same(_, _, true, true)` holds.
    #[must_use]
    pub fn mangled_name(&self) -> String {
        let mut out = String::new();
        self.mangle_into(&mut out);
        out
    }

    fn mangle_into(&self, out: &mut String) {
        use fmt::Write as _;
        if self.constant {
            out.push_str("#const");
        }
        match self.base {
            BaseType::Handle => {
                out.push_str("#handle#");
                if let Some(ann) = &self.annotation {
                    out.push_str(ann.name());
                }
            }
            BaseType::Array => {
                out.push_str("#array");
                if let Some(first) = &self.first_type {
                    out.push('#');
                    first.mangle_into(out);
                }
            }
            BaseType::Table => {
                out.push_str("#table");
                if let Some(first) = &self.first_type {
                    out.push('#');
                    first.mangle_into(out);
                }
                if let Some(second) = &self.second_type {
                    out.push('#');
                    second.mangle_into(out);
                }
            }
            BaseType::Pointer => {
                out.push_str("#ptr");
                if let Some(first) = &self.first_type {
                    out.push('#');
                    first.mangle_into(out);
                }
            }
            BaseType::Iterator => {
                out.push_str("#iterator");
                if let Some(first) = &self.first_type {
                    out.push('#');
                    first.mangle_into(out);
                }
            }
            BaseType::Block | BaseType::Function | BaseType::Lambda | BaseType::Tuple => {
                let tag = match self.base {
                    BaseType::Block => "#block",
                    BaseType::Function => "#function",
                    BaseType::Lambda => "#lambda",
                    _ => "#tuple",
                };
                out.push_str(tag);
                if let Some(first) = &self.first_type {
                    out.push('#');
                    first.mangle_into(out);
                }
                for arg in &self.arg_types {
                    out.push('#');
                    arg.mangle_into(out);
                }
            }
            BaseType::Structure => {
                if let Some(st) = &self.struct_type {
                    out.push_str(&st.name);
                } else {
                    out.push_str("structure?");
                }
            }
            BaseType::Enumeration => {
                if let Some(en) = &self.enum_type {
                    out.push_str(&en.name);
                } else {
                    out.push_str("enumeration?");
                }
            }
            base => {
                let _ = write!(out, "{base}");
            }
        }
        if self.ref_ {
            out.push_str("#ref");
        }
        for d in &self.dim {
            let _ = write!(out, "#{d}");
        }
    }

    /// Human-readable description used in diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

pub(crate) fn align_up(offset: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    offset.div_ceil(align) * align
}

impl fmt::Display for TypeDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base {
            BaseType::Handle => {
                if let Some(ann) = &self.annotation {
                    write!(f, "{}", ann.name())?;
                } else {
                    write!(f, "handle")?;
                }
            }
            BaseType::Array => {
                if let Some(first) = &self.first_type {
                    write!(f, "array<{first}>")?;
                } else {
                    write!(f, "array")?;
                }
            }
            BaseType::Table => {
                if let (Some(first), Some(second)) = (&self.first_type, &self.second_type) {
                    write!(f, "table<{first},{second}>")?;
                } else {
                    write!(f, "table")?;
                }
            }
            BaseType::Structure => {
                if let Some(st) = &self.struct_type {
                    write!(f, "{}", st.name)?;
                } else {
                    write!(f, "unspecified")?;
                }
            }
            BaseType::Enumeration => {
                if let Some(en) = &self.enum_type {
                    write!(f, "{}", en.name)?;
                } else {
                    write!(f, "enumeration")?;
                }
            }
            BaseType::Pointer => {
                if let Some(first) = &self.first_type {
                    write!(f, "{first}?")?;
                } else {
                    write!(f, "void ?")?;
                }
            }
            BaseType::Iterator => {
                if let Some(first) = &self.first_type {
                    write!(f, "iterator<{first}>")?;
                } else {
                    write!(f, "iterator")?;
                }
            }
            BaseType::Block => {
                if let Some(first) = &self.first_type {
                    write!(f, "block<{first}>")?;
                } else {
                    write!(f, "block")?;
                }
            }
            base => write!(f, "{base}")?,
        }
        if self.constant {
            write!(f, " const")?;
        }
        for d in &self.dim {
            write!(f, "[{d}]")?;
        }
        if self.ref_ {
            write!(f, "&")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_sizes_are_multiples_of_alignment() {
        let all = [
            BaseType::Bool,
            BaseType::Int8,
            BaseType::Int16,
            BaseType::Int,
            BaseType::Int64,
            BaseType::UInt8,
            BaseType::UInt16,
            BaseType::UInt,
            BaseType::UInt64,
            BaseType::Float,
            BaseType::Double,
            BaseType::Int2,
            BaseType::Int3,
            BaseType::Int4,
            BaseType::UInt2,
            BaseType::UInt3,
            BaseType::UInt4,
            BaseType::Float2,
            BaseType::Float3,
            BaseType::Float4,
            BaseType::Range,
            BaseType::URange,
            BaseType::String,
            BaseType::Pointer,
            BaseType::Iterator,
            BaseType::Array,
            BaseType::Table,
            BaseType::Block,
        ];
        for base in all {
            let t = TypeDecl::new(base);
            assert_eq!(t.size_of() % t.align_of(), 0, "{base}");
        }
    }

    #[test]
    fn dims_multiply_and_stride_drops_last() {
        let t = TypeDecl::new(BaseType::Int).with_dim(&[2, 3]);
        assert_eq!(t.size_of(), 4 * 6);
        assert_eq!(t.stride(), 4 * 2);
        let scalar = TypeDecl::new(BaseType::Int);
        assert_eq!(scalar.stride(), 4);
    }

    #[test]
    fn mangling_distinguishes_ref_const_and_dims() {
        let t = TypeDecl::new(BaseType::Int);
        assert_eq!(t.mangled_name(), "int");
        assert_eq!(t.clone().with_ref().mangled_name(), "int#ref");
        assert_eq!(t.clone().with_const().mangled_name(), "#constint");
        assert_eq!(t.clone().with_dim(&[4]).mangled_name(), "int#4");
        let arr = TypeDecl::array_of(TypeDecl::new(BaseType::Float));
        assert_eq!(arr.mangled_name(), "#array#float");
        let tab = TypeDecl::table_of(
            TypeDecl::new(BaseType::String),
            TypeDecl::new(BaseType::Int),
        );
        assert_eq!(tab.mangled_name(), "#table#string#int");
    }

    #[test]
    fn ref_and_const_commute_in_equality() {
        let a = TypeDecl::new(BaseType::Int).with_ref().with_const();
        let b = TypeDecl::new(BaseType::Int).with_const().with_ref();
        assert!(a.is_same(&b, true, true));
        assert!(!a.is_same(&TypeDecl::new(BaseType::Int), true, false));
        assert!(a.is_same(&TypeDecl::new(BaseType::Int), false, false));
    }

    #[test]
    fn containers_are_reference_held_and_non_copyable() {
        let arr = TypeDecl::array_of(TypeDecl::new(BaseType::Int));
        assert!(arr.is_ref());
        assert!(!arr.can_copy());
        assert!(arr.can_move());
        assert!(!arr.is_pod());
        let fixed = TypeDecl::new(BaseType::Int).with_dim(&[4]);
        assert!(fixed.is_ref());
        assert!(fixed.is_pod());
    }
}
