//! Raw OpenGL enum values used outside the backends.
//!
//! Only the handful of values the core needs for type decomposition and
//! buffer/attribute descriptions. Backends translate from the typed wrappers in
//! [`super::api`], so nothing here is backend specific.

// ── buffer targets / usage ────────────────────────────────────────────────

pub const ARRAY_BUFFER: u32 = 0x8892;
pub const ELEMENT_ARRAY_BUFFER: u32 = 0x8893;

pub const STREAM_DRAW: u32 = 0x88E0;
pub const STATIC_DRAW: u32 = 0x88E4;
pub const DYNAMIC_DRAW: u32 = 0x88E8;

// ── map access bits ───────────────────────────────────────────────────────

pub const MAP_WRITE_BIT: u32 = 0x0002;
pub const MAP_INVALIDATE_RANGE_BIT: u32 = 0x0004;
pub const MAP_INVALIDATE_BUFFER_BIT: u32 = 0x0008;
pub const MAP_UNSYNCHRONIZED_BIT: u32 = 0x0020;

// ── scalar / attribute component types ────────────────────────────────────

pub const BYTE: u32 = 0x1400;
pub const UNSIGNED_BYTE: u32 = 0x1401;
pub const SHORT: u32 = 0x1402;
pub const UNSIGNED_SHORT: u32 = 0x1403;
pub const INT: u32 = 0x1404;
pub const UNSIGNED_INT: u32 = 0x1405;
pub const FLOAT: u32 = 0x1406;
pub const DOUBLE: u32 = 0x140A;
pub const HALF_FLOAT: u32 = 0x140B;
pub const INT_2_10_10_10_REV: u32 = 0x8D9F;
pub const UNSIGNED_INT_2_10_10_10_REV: u32 = 0x8368;

// ── uniform / attribute reflection types ──────────────────────────────────

pub const FLOAT_VEC2: u32 = 0x8B50;
pub const FLOAT_VEC3: u32 = 0x8B51;
pub const FLOAT_VEC4: u32 = 0x8B52;
pub const INT_VEC2: u32 = 0x8B53;
pub const INT_VEC3: u32 = 0x8B54;
pub const INT_VEC4: u32 = 0x8B55;
pub const BOOL: u32 = 0x8B56;
pub const BOOL_VEC2: u32 = 0x8B57;
pub const BOOL_VEC3: u32 = 0x8B58;
pub const BOOL_VEC4: u32 = 0x8B59;
pub const FLOAT_MAT2: u32 = 0x8B5A;
pub const FLOAT_MAT3: u32 = 0x8B5B;
pub const FLOAT_MAT4: u32 = 0x8B5C;
pub const FLOAT_MAT2X3: u32 = 0x8B65;
pub const FLOAT_MAT2X4: u32 = 0x8B66;
pub const FLOAT_MAT3X2: u32 = 0x8B67;
pub const FLOAT_MAT3X4: u32 = 0x8B68;
pub const FLOAT_MAT4X2: u32 = 0x8B69;
pub const FLOAT_MAT4X3: u32 = 0x8B6A;
pub const UNSIGNED_INT_VEC2: u32 = 0x8DC6;
pub const UNSIGNED_INT_VEC3: u32 = 0x8DC7;
pub const UNSIGNED_INT_VEC4: u32 = 0x8DC8;

pub const SAMPLER_2D: u32 = 0x8B5E;
pub const SAMPLER_EXTERNAL_OES: u32 = 0x8D66;

/// Returns true for every sampler/image-sampler reflection type.
///
/// Covers the classic range (`SAMPLER_1D..SAMPLER_2D_RECT_SHADOW`), the GL3
/// array/buffer/integer samplers and the multisample samplers.
pub const fn is_sampler(gl_type: u32) -> bool {
    matches!(
        gl_type,
        0x8B5D..=0x8B64 | 0x8DC0..=0x8DC5 | 0x8DC9..=0x8DD8 | 0x9108..=0x910D | SAMPLER_EXTERNAL_OES
    )
}
