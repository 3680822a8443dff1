//! The 128-bit value register and the script memory addressing scheme.
//!
//! Every evaluation produces one [`Register`]: enough for any primitive, a
//! vector, a range, a pointer, or a block descriptor. Larger values travel by
//! reference. A value's register image is exactly its in-memory byte image
//! (low bytes), so loads and stores are plain byte copies.
//!
//! Script pointers and references are [`MemPtr`] values: an area tag plus a
//! byte offset into that area. Raw zero is the null pointer in every area.

/// Which byte region a [`MemPtr`] addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemArea {
    /// Interned constants owned by the code store; never reset.
    Code = 1,
    /// The script heap; reset collectively.
    Heap = 2,
    /// Global variable storage.
    Global = 3,
    /// The evaluation stack buffer.
    Stack = 4,
}

/// A script-visible pointer: `(area << 32) | offset`, with 0 as null.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MemPtr(u64);

impl MemPtr {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub fn new(area: MemArea, offset: u32) -> Self {
        Self(((area as u64) << 32) | u64::from(offset))
    }

    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The area tag; `None` for null or malformed pointers.
    #[must_use]
    pub fn area(self) -> Option<MemArea> {
        match self.0 >> 32 {
            1 => Some(MemArea::Code),
            2 => Some(MemArea::Heap),
            3 => Some(MemArea::Global),
            4 => Some(MemArea::Stack),
            _ => None,
        }
    }

    #[must_use]
    pub fn offset(self) -> u32 {
        self.0 as u32
    }

    /// Pointer arithmetic within the same area.
    #[must_use]
    pub fn add(self, bytes: u32) -> Self {
        debug_assert!(!self.is_null());
        Self(self.0 + u64::from(bytes))
    }

    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// A `range`/`urange` value: `[from, to)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeVal {
    pub from: i32,
    pub to: i32,
}

/// A captured block: the frame it closed over and its body node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockVal {
    /// Evaluation-stack offset of the capturing frame.
    pub stack_offset: u32,
    /// Node index of the block body.
    pub body: u32,
}

/// The 128-bit evaluation register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Register([u8; 16]);

impl Register {
    pub const ZERO: Self = Self([0; 16]);

    #[must_use]
    pub fn bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Builds a register from up to 16 leading bytes.
    #[must_use]
    pub fn from_bytes(src: &[u8]) -> Self {
        debug_assert!(src.len() <= 16);
        let mut out = [0u8; 16];
        out[..src.len()].copy_from_slice(src);
        Self(out)
    }

    #[must_use]
    pub fn get<T: RegValue>(self) -> T {
        T::from_reg(self)
    }

    #[must_use]
    pub fn put<T: RegValue>(v: T) -> Self {
        v.to_reg()
    }
}

/// Values that fit a register. The byte image in the register equals the
/// in-memory image, so typed loads/stores round-trip through byte copies.
pub trait RegValue: Copy {
    /// Bytes this value occupies in memory and in the register image.
    const SIZE: usize;

    fn to_reg(self) -> Register;
    fn from_reg(reg: Register) -> Self;
}

macro_rules! numeric_reg_value {
    ($($t:ty),*) => {$(
        impl RegValue for $t {
            const SIZE: usize = size_of::<$t>();

            fn to_reg(self) -> Register {
                Register::from_bytes(&self.to_le_bytes())
            }

            fn from_reg(reg: Register) -> Self {
                let mut buf = [0u8; size_of::<$t>()];
                buf.copy_from_slice(&reg.0[..size_of::<$t>()]);
                <$t>::from_le_bytes(buf)
            }
        }
    )*};
}

numeric_reg_value!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl RegValue for bool {
    const SIZE: usize = 1;

    fn to_reg(self) -> Register {
        Register::from_bytes(&[u8::from(self)])
    }

    fn from_reg(reg: Register) -> Self {
        reg.0[0] != 0
    }
}

impl RegValue for MemPtr {
    const SIZE: usize = 8;

    fn to_reg(self) -> Register {
        Register::from_bytes(&self.0.to_le_bytes())
    }

    fn from_reg(reg: Register) -> Self {
        Self(u64::from_reg(reg))
    }
}

impl RegValue for RangeVal {
    const SIZE: usize = 8;

    fn to_reg(self) -> Register {
        let mut out = [0u8; 16];
        out[..4].copy_from_slice(&self.from.to_le_bytes());
        out[4..8].copy_from_slice(&self.to.to_le_bytes());
        Register(out)
    }

    fn from_reg(reg: Register) -> Self {
        let mut from = [0u8; 4];
        let mut to = [0u8; 4];
        from.copy_from_slice(&reg.0[..4]);
        to.copy_from_slice(&reg.0[4..8]);
        Self {
            from: i32::from_le_bytes(from),
            to: i32::from_le_bytes(to),
        }
    }
}

impl RegValue for BlockVal {
    const SIZE: usize = 8;

    fn to_reg(self) -> Register {
        let mut out = [0u8; 16];
        out[..4].copy_from_slice(&self.stack_offset.to_le_bytes());
        out[4..8].copy_from_slice(&self.body.to_le_bytes());
        Register(out)
    }

    fn from_reg(reg: Register) -> Self {
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        a.copy_from_slice(&reg.0[..4]);
        b.copy_from_slice(&reg.0[4..8]);
        Self {
            stack_offset: u32::from_le_bytes(a),
            body: u32::from_le_bytes(b),
        }
    }
}

macro_rules! lane_reg_value {
    ($($n:literal),*) => {$(
        impl RegValue for [i32; $n] {
            const SIZE: usize = 4 * $n;

            fn to_reg(self) -> Register {
                let mut out = [0u8; 16];
                for (i, v) in self.iter().enumerate() {
                    out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
                }
                Register(out)
            }

            fn from_reg(reg: Register) -> Self {
                let mut out = [0i32; $n];
                for (i, v) in out.iter_mut().enumerate() {
                    let mut buf = [0u8; 4];
                    buf.copy_from_slice(&reg.0[i * 4..i * 4 + 4]);
                    *v = i32::from_le_bytes(buf);
                }
                out
            }
        }

        impl RegValue for [u32; $n] {
            const SIZE: usize = 4 * $n;

            fn to_reg(self) -> Register {
                let mut out = [0u8; 16];
                for (i, v) in self.iter().enumerate() {
                    out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
                }
                Register(out)
            }

            fn from_reg(reg: Register) -> Self {
                let mut out = [0u32; $n];
                for (i, v) in out.iter_mut().enumerate() {
                    let mut buf = [0u8; 4];
                    buf.copy_from_slice(&reg.0[i * 4..i * 4 + 4]);
                    *v = u32::from_le_bytes(buf);
                }
                out
            }
        }

        impl RegValue for [f32; $n] {
            const SIZE: usize = 4 * $n;

            fn to_reg(self) -> Register {
                let mut out = [0u8; 16];
                for (i, v) in self.iter().enumerate() {
                    out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
                }
                Register(out)
            }

            fn from_reg(reg: Register) -> Self {
                let mut out = [0f32; $n];
                for (i, v) in out.iter_mut().enumerate() {
                    let mut buf = [0u8; 4];
                    buf.copy_from_slice(&reg.0[i * 4..i * 4 + 4]);
                    *v = f32::from_le_bytes(buf);
                }
                out
            }
        }
    )*};
}

lane_reg_value!(2, 3, 4);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_round_trip() {
        assert_eq!(Register::put(42i32).get::<i32>(), 42);
        assert_eq!(Register::put(-7i64).get::<i64>(), -7);
        assert_eq!(Register::put(1.5f32).get::<f32>(), 1.5);
        assert!(Register::put(true).get::<bool>());
        let r = RangeVal { from: 3, to: 9 };
        assert_eq!(Register::put(r).get::<RangeVal>(), r);
        let v = [1.0f32, 2.0, 3.0];
        assert_eq!(Register::put(v).get::<[f32; 3]>(), v);
    }

    #[test]
    fn pointers_encode_area_and_offset() {
        let p = MemPtr::new(MemArea::Heap, 0x40);
        assert!(!p.is_null());
        assert_eq!(p.area(), Some(MemArea::Heap));
        assert_eq!(p.offset(), 0x40);
        assert_eq!(p.add(8).offset(), 0x48);
        assert!(MemPtr::NULL.is_null());
        // a zero-offset pointer is not null; the area tag keeps it distinct
        assert!(!MemPtr::new(MemArea::Heap, 0).is_null());
    }
}
