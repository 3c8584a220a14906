//! Vertex attribute tables.
//!
//! The same table type describes both sides of a binding: what a vertex
//! buffer provides (type, count, offset, flags from its format string) and
//! what a linked program consumes (name and shader-assigned index).

use bitflags::bitflags;

use crate::gl::enums;
use crate::gl::{AttribFormat, GlError};

use super::name::NameHash;

/// Scalar element type of a vertex attribute.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum AttribType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F16,
    F32,
    F64,
    /// Packed signed 10-10-10-2; always four components in four bytes.
    I2_10_10_10,
    U2_10_10_10,
}

impl AttribType {
    /// Parses a format-string type code.
    pub fn from_code(c: char) -> Option<Self> {
        Some(match c {
            'b' => AttribType::I8,
            'B' => AttribType::U8,
            's' => AttribType::I16,
            'S' => AttribType::U16,
            'i' => AttribType::I32,
            'I' => AttribType::U32,
            'h' => AttribType::F16,
            'f' => AttribType::F32,
            'd' => AttribType::F64,
            'r' => AttribType::I2_10_10_10,
            'R' => AttribType::U2_10_10_10,
            _ => return None,
        })
    }

    pub fn code(self) -> char {
        match self {
            AttribType::I8 => 'b',
            AttribType::U8 => 'B',
            AttribType::I16 => 's',
            AttribType::U16 => 'S',
            AttribType::I32 => 'i',
            AttribType::U32 => 'I',
            AttribType::F16 => 'h',
            AttribType::F32 => 'f',
            AttribType::F64 => 'd',
            AttribType::I2_10_10_10 => 'r',
            AttribType::U2_10_10_10 => 'R',
        }
    }

    /// Bytes per component; packed types report their whole 4-byte word.
    pub fn size(self) -> u32 {
        match self {
            AttribType::I8 | AttribType::U8 => 1,
            AttribType::I16 | AttribType::U16 | AttribType::F16 => 2,
            AttribType::I32 | AttribType::U32 | AttribType::F32 => 4,
            AttribType::I2_10_10_10 | AttribType::U2_10_10_10 => 4,
            AttribType::F64 => 8,
        }
    }

    pub fn is_packed(self) -> bool {
        matches!(self, AttribType::I2_10_10_10 | AttribType::U2_10_10_10)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            AttribType::I8
                | AttribType::U8
                | AttribType::I16
                | AttribType::U16
                | AttribType::I32
                | AttribType::U32
        )
    }

    pub fn gl_enum(self) -> u32 {
        match self {
            AttribType::I8 => enums::BYTE,
            AttribType::U8 => enums::UNSIGNED_BYTE,
            AttribType::I16 => enums::SHORT,
            AttribType::U16 => enums::UNSIGNED_SHORT,
            AttribType::I32 => enums::INT,
            AttribType::U32 => enums::UNSIGNED_INT,
            AttribType::F16 => enums::HALF_FLOAT,
            AttribType::F32 => enums::FLOAT,
            AttribType::F64 => enums::DOUBLE,
            AttribType::I2_10_10_10 => enums::INT_2_10_10_10_REV,
            AttribType::U2_10_10_10 => enums::UNSIGNED_INT_2_10_10_10_REV,
        }
    }

    /// Decomposes a reflected attribute type into `(element type, count)`.
    pub fn from_gl_type(gl_type: u32) -> Result<(Self, u8), GlError> {
        Ok(match gl_type {
            enums::FLOAT => (AttribType::F32, 1),
            enums::FLOAT_VEC2 => (AttribType::F32, 2),
            enums::FLOAT_VEC3 => (AttribType::F32, 3),
            enums::FLOAT_VEC4 => (AttribType::F32, 4),
            enums::INT => (AttribType::I32, 1),
            enums::INT_VEC2 => (AttribType::I32, 2),
            enums::INT_VEC3 => (AttribType::I32, 3),
            enums::INT_VEC4 => (AttribType::I32, 4),
            enums::UNSIGNED_INT => (AttribType::U32, 1),
            enums::UNSIGNED_INT_VEC2 => (AttribType::U32, 2),
            enums::UNSIGNED_INT_VEC3 => (AttribType::U32, 3),
            enums::UNSIGNED_INT_VEC4 => (AttribType::U32, 4),
            _ => return Err(GlError::UnsupportedType(gl_type)),
        })
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
    pub struct AttribFlags: u8 {
        /// Fixed-point values are mapped to [0, 1] / [-1, 1].
        const NORMALIZED = 1 << 0;
        /// Read as integers by the shader.
        const INTEGRAL = 1 << 1;
        /// Advances once per instance instead of once per vertex.
        const INSTANCED = 1 << 2;
    }
}

/// One attribute entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Attrib {
    pub name_hash: NameHash,
    pub gpu_type: AttribType,
    pub count: u8,
    pub offset: u32,
    pub flags: AttribFlags,
    /// Shader-assigned index; `None` until a program reports it.
    pub bound_index: Option<u32>,
}

impl Attrib {
    pub fn format(&self) -> AttribFormat {
        AttribFormat {
            gpu_type: self.gpu_type,
            count: self.count,
            normalized: self.flags.contains(AttribFlags::NORMALIZED),
            integral: self.flags.contains(AttribFlags::INTEGRAL),
            offset: self.offset,
        }
    }

    pub fn is_instanced(&self) -> bool {
        self.flags.contains(AttribFlags::INSTANCED)
    }

    /// Bytes this attribute occupies in a vertex, rounded up to 4.
    pub fn padded_size(&self) -> u32 {
        let raw = if self.gpu_type.is_packed() {
            self.gpu_type.size()
        } else {
            self.gpu_type.size() * u32::from(self.count)
        };
        raw.next_multiple_of(4)
    }
}

/// Attribute entries, at most one per name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeTable {
    entries: Vec<Attrib>,
}

impl AttributeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the element format of `name`. A shader index
    /// already recorded for it is kept.
    pub fn set_format(
        &mut self,
        name: impl Into<NameHash>,
        gpu_type: AttribType,
        count: u8,
        offset: u32,
        flags: AttribFlags,
    ) {
        let name_hash = name.into();
        debug_assert!((1..=4).contains(&count), "attribute count {count} out of range");
        match self.find_mut(name_hash) {
            Some(a) => {
                a.gpu_type = gpu_type;
                a.count = count;
                a.offset = offset;
                a.flags = flags;
            }
            None => self.entries.push(Attrib {
                name_hash,
                gpu_type,
                count,
                offset,
                flags,
                bound_index: None,
            }),
        }
    }

    /// Records the index a linked program assigned to `name`.
    pub fn init_from_shader(&mut self, name: impl Into<NameHash>, bound_index: u32) {
        let name_hash = name.into();
        match self.find_mut(name_hash) {
            Some(a) => a.bound_index = Some(bound_index),
            None => self.entries.push(Attrib {
                name_hash,
                gpu_type: AttribType::F32,
                count: 4,
                offset: 0,
                flags: AttribFlags::empty(),
                bound_index: Some(bound_index),
            }),
        }
    }

    /// Reflection entry point: records index and the shader-side type.
    ///
    /// Returns false (and records nothing) for types with no attribute
    /// equivalent, such as matrices.
    pub fn init_attrib(&mut self, name: &str, gl_type: u32, bound_index: u32) -> bool {
        let (gpu_type, count) = match AttribType::from_gl_type(gl_type) {
            Ok(decomposed) => decomposed,
            Err(err) => {
                log::debug!("attribute '{name}' skipped: {err}");
                return false;
            }
        };
        let flags = if gpu_type.is_integer() { AttribFlags::INTEGRAL } else { AttribFlags::empty() };
        let hash = NameHash::of(super::name::base_name(name));
        self.set_format(hash, gpu_type, count, 0, flags);
        self.init_from_shader(hash, bound_index);
        true
    }

    pub fn get(&self, name: impl Into<NameHash>) -> Option<&Attrib> {
        let name_hash = name.into();
        self.entries.iter().find(|a| a.name_hash == name_hash)
    }

    fn find_mut(&mut self, name_hash: NameHash) -> Option<&mut Attrib> {
        self.entries.iter_mut().find(|a| a.name_hash == name_hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attrib> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether this table holds `name` bound at `index`.
    pub fn contains_binding(&self, name: NameHash, index: Option<u32>) -> bool {
        self.entries.iter().any(|a| a.name_hash == name && a.bound_index == index)
    }

    /// Whether every `(name, index)` pair of `other` is present here.
    pub fn satisfies(&self, other: &AttributeTable) -> bool {
        other.iter().all(|a| self.contains_binding(a.name_hash, a.bound_index))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_format_upserts_and_keeps_index() {
        let mut t = AttributeTable::new();
        t.init_from_shader("a_pos", 3);
        t.set_format("a_pos", AttribType::F32, 2, 0, AttribFlags::empty());
        t.set_format("a_pos", AttribType::I16, 2, 4, AttribFlags::NORMALIZED);
        assert_eq!(t.len(), 1);

        let a = t.get("a_pos").copied();
        let a = a.as_ref();
        assert_eq!(a.map(|a| a.gpu_type), Some(AttribType::I16));
        assert_eq!(a.map(|a| a.offset), Some(4));
        assert_eq!(a.and_then(|a| a.bound_index), Some(3));
    }

    #[test]
    fn satisfies_compares_name_and_index() {
        let mut cached = AttributeTable::new();
        cached.init_from_shader("a_pos", 0);
        cached.init_from_shader("a_col", 1);

        let mut subset = AttributeTable::new();
        subset.init_from_shader("a_col", 1);
        assert!(cached.satisfies(&subset));

        let mut moved = AttributeTable::new();
        moved.init_from_shader("a_col", 2);
        assert!(!cached.satisfies(&moved));
    }

    #[test]
    fn reflected_integer_attribs_are_integral() {
        let mut t = AttributeTable::new();
        assert!(t.init_attrib("a_ids", enums::UNSIGNED_INT_VEC2, 5));
        assert!(!t.init_attrib("a_model", enums::FLOAT_MAT4, 6));

        let a = t.get("a_ids").copied();
        assert_eq!(a.map(|a| (a.gpu_type, a.count)), Some((AttribType::U32, 2)));
        assert!(a.is_some_and(|a| a.flags.contains(AttribFlags::INTEGRAL)));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn padded_sizes() {
        let mut t = AttributeTable::new();
        t.set_format("a", AttribType::I16, 3, 0, AttribFlags::empty());
        t.set_format("b", AttribType::U2_10_10_10, 4, 8, AttribFlags::NORMALIZED);
        t.set_format("c", AttribType::F64, 2, 12, AttribFlags::empty());
        let sizes: Vec<u32> = t.iter().map(Attrib::padded_size).collect();
        assert_eq!(sizes, vec![8, 4, 16]);
    }
}
