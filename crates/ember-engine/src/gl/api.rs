//! The GPU function-table seam.
//!
//! Everything the core does to the driver goes through [`GlApi`]. The trait is
//! object safe so a [`GlContext`](super::GlContext) can hold whichever backend
//! is live (`GlowApi` on desktop/ES drivers, `RecordingGl` headless).

use std::num::NonZeroU32;

use bitflags::bitflags;

use crate::shader::{AttribType, ScalarType};

use super::caps::GlVersion;
use super::enums;
use super::error::GlError;
use super::state::BlendMode;

/// Driver-side object name (buffer, vertex array, program, texture, sampler).
///
/// Zero is never a valid name, so `Option<RawHandle>` stands for "nothing bound".
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RawHandle(NonZeroU32);

impl RawHandle {
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    pub const fn from_non_zero(raw: NonZeroU32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0.get()
    }

    pub const fn non_zero(self) -> NonZeroU32 {
        self.0
    }
}

// ── buffers ───────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BufferTarget {
    Vertex,
    Index,
}

impl BufferTarget {
    pub const fn gl_enum(self) -> u32 {
        match self {
            BufferTarget::Vertex => enums::ARRAY_BUFFER,
            BufferTarget::Index => enums::ELEMENT_ARRAY_BUFFER,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum BufferUsage {
    Static,
    #[default]
    Dynamic,
    Stream,
}

impl BufferUsage {
    pub const fn gl_enum(self) -> u32 {
        match self {
            BufferUsage::Static => enums::STATIC_DRAW,
            BufferUsage::Dynamic => enums::DYNAMIC_DRAW,
            BufferUsage::Stream => enums::STREAM_DRAW,
        }
    }
}

bitflags! {
    /// Extra semantics for a write-only buffer map.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct MapAccess: u32 {
        /// Previous contents of the mapped range may be discarded.
        const INVALIDATE_RANGE = enums::MAP_INVALIDATE_RANGE_BIT;
        /// Previous contents of the whole buffer may be discarded.
        const INVALIDATE_BUFFER = enums::MAP_INVALIDATE_BUFFER_BIT;
        /// Skip the implicit wait for in-flight GPU reads.
        const UNSYNCHRONIZED = enums::MAP_UNSYNCHRONIZED_BIT;
    }
}

impl MapAccess {
    /// Access bitfield for `glMapBufferRange`, always including the write bit.
    pub const fn gl_bits(self) -> u32 {
        self.bits() | enums::MAP_WRITE_BIT
    }
}

// ── attributes ────────────────────────────────────────────────────────────

/// Element format of one vertex attribute inside its buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct AttribFormat {
    pub gpu_type: AttribType,
    pub count: u8,
    pub normalized: bool,
    /// Read as integers in the shader (`glVertexAttribIPointer`).
    pub integral: bool,
    /// Byte offset from the start of a vertex.
    pub offset: u32,
}

// ── uniforms ──────────────────────────────────────────────────────────────

/// Which typed `glUniform*` entry point an upload goes through.
///
/// `Vector` is the `glUniform{1,2,3,4}{f,i,ui}v` family, `Matrix` the
/// `glUniformMatrix{R}x{C}fv` family where `rows` counts column vectors and
/// `cols` their component count (square matrices use the non-"x" variant).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum UniformCall {
    Vector { scalar: ScalarType, len: u8 },
    Matrix { rows: u8, cols: u8 },
}

impl UniformCall {
    pub fn entry_point(self) -> &'static str {
        match self {
            UniformCall::Vector { scalar, len } => match (scalar, len) {
                (ScalarType::Float, 1) => "glUniform1fv",
                (ScalarType::Float, 2) => "glUniform2fv",
                (ScalarType::Float, 3) => "glUniform3fv",
                (ScalarType::Float, _) => "glUniform4fv",
                (ScalarType::Int, 1) => "glUniform1iv",
                (ScalarType::Int, 2) => "glUniform2iv",
                (ScalarType::Int, 3) => "glUniform3iv",
                (ScalarType::Int, _) => "glUniform4iv",
                (ScalarType::Uint, 1) => "glUniform1uiv",
                (ScalarType::Uint, 2) => "glUniform2uiv",
                (ScalarType::Uint, 3) => "glUniform3uiv",
                (ScalarType::Uint, _) => "glUniform4uiv",
            },
            UniformCall::Matrix { rows, cols } => match (rows, cols) {
                (2, 2) => "glUniformMatrix2fv",
                (3, 3) => "glUniformMatrix3fv",
                (4, 4) => "glUniformMatrix4fv",
                (2, 3) => "glUniformMatrix2x3fv",
                (2, 4) => "glUniformMatrix2x4fv",
                (3, 2) => "glUniformMatrix3x2fv",
                (3, 4) => "glUniformMatrix3x4fv",
                (4, 2) => "glUniformMatrix4x2fv",
                _ => "glUniformMatrix4x3fv",
            },
        }
    }
}

/// One active attribute or uniform reported by program reflection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveVariable {
    pub name: String,
    pub gl_type: u32,
    /// Array length (1 for non-arrays).
    pub size: u32,
    /// Attribute index or uniform location; `None` for built-ins and block members.
    pub location: Option<u32>,
}

// ── function table ────────────────────────────────────────────────────────

/// GPU entry points consumed by the core.
///
/// Every method is a thin wrapper over one driver call (or, for `map_write`,
/// the map/copy/unmap sequence). Redundancy elimination happens above this
/// layer; implementations issue exactly what they are asked for.
pub trait GlApi {
    // ── capability queries ──
    fn version(&self) -> GlVersion;
    fn has_extension(&self, name: &str) -> bool;
    fn max_vertex_attribs(&self) -> u32;

    // ── buffers ──
    fn create_buffer(&self) -> Result<RawHandle, GlError>;
    fn delete_buffer(&self, buffer: RawHandle);
    fn bind_buffer(&self, target: BufferTarget, buffer: Option<RawHandle>);
    /// Allocates `size` uninitialized bytes for the bound buffer, orphaning
    /// the previous storage.
    fn buffer_data(&self, target: BufferTarget, size: usize, usage: BufferUsage);
    fn buffer_sub_data(&self, target: BufferTarget, offset: usize, data: &[u8]);
    /// Maps `offset..offset + data.len()` write-only with `access`, copies
    /// `data` in and unmaps.
    fn map_write(
        &self,
        target: BufferTarget,
        offset: usize,
        data: &[u8],
        access: MapAccess,
    ) -> Result<(), GlError>;

    // ── vertex arrays / attributes ──
    fn create_vertex_array(&self) -> Result<RawHandle, GlError>;
    fn delete_vertex_array(&self, vao: RawHandle);
    fn bind_vertex_array(&self, vao: Option<RawHandle>);
    fn enable_vertex_attrib_array(&self, index: u32);
    fn disable_vertex_attrib_array(&self, index: u32);
    /// Legacy combined format + buffer call against the bound `ARRAY_BUFFER`.
    fn vertex_attrib_pointer(&self, index: u32, format: &AttribFormat, stride: u32);
    fn vertex_attrib_divisor(&self, index: u32, divisor: u32);
    /// Separate-format path (`ARB_vertex_attrib_binding`).
    fn vertex_attrib_format(&self, index: u32, format: &AttribFormat);
    fn vertex_attrib_binding(&self, index: u32, binding: u32);
    fn bind_vertex_buffer(&self, binding: u32, buffer: Option<RawHandle>, stride: u32);
    fn vertex_binding_divisor(&self, binding: u32, divisor: u32);

    // ── programs / textures / blending ──
    fn use_program(&self, program: Option<RawHandle>);
    fn active_texture(&self, unit: u32);
    fn create_texture(&self) -> Result<RawHandle, GlError>;
    fn delete_texture(&self, texture: RawHandle);
    /// Binds a 2D texture on the active unit.
    fn bind_texture(&self, texture: Option<RawHandle>);
    fn create_sampler(&self) -> Result<RawHandle, GlError>;
    fn delete_sampler(&self, sampler: RawHandle);
    fn bind_sampler(&self, unit: u32, sampler: Option<RawHandle>);
    fn set_blend(&self, mode: BlendMode);

    // ── uniforms / reflection ──
    /// Uploads `count` elements from `data` to `location` of the bound program.
    fn upload_uniform(&self, location: u32, call: UniformCall, count: u32, data: &[u32]);
    /// Reads the current value of one uniform element into `out`.
    fn read_uniform(&self, program: RawHandle, location: u32, scalar: ScalarType, out: &mut [u32]);
    fn active_attributes(&self, program: RawHandle) -> Vec<ActiveVariable>;
    fn active_uniforms(&self, program: RawHandle) -> Vec<ActiveVariable>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_handle_rejects_zero() {
        assert!(RawHandle::new(0).is_none());
        assert_eq!(RawHandle::new(7).map(RawHandle::get), Some(7));
    }

    #[test]
    fn map_access_always_writes() {
        let bits = (MapAccess::UNSYNCHRONIZED | MapAccess::INVALIDATE_RANGE).gl_bits();
        assert_eq!(bits, 0x0002 | 0x0004 | 0x0020);
        assert_eq!(MapAccess::empty().gl_bits(), 0x0002);
    }

    #[test]
    fn square_matrices_use_plain_entry_point() {
        assert_eq!(UniformCall::Matrix { rows: 3, cols: 3 }.entry_point(), "glUniformMatrix3fv");
        assert_eq!(UniformCall::Matrix { rows: 2, cols: 4 }.entry_point(), "glUniformMatrix2x4fv");
        let call = UniformCall::Vector { scalar: ScalarType::Uint, len: 2 };
        assert_eq!(call.entry_point(), "glUniform2uiv");
    }
}
