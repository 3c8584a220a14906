//! Typed uniform storage with redundant-upload elimination.
//!
//! A [`UniformTable`] keeps every value in one flat run of 4-byte slots.
//! Binding a table against the "last uploaded" snapshot of a program compares
//! slots byte for byte and only uploads entries that differ.

use bytemuck::Pod;

use crate::gl::{enums, GlApi, GlContext, GlError, RawHandle, UniformCall};

use super::name::{base_name, NameHash};

/// Scalar class of a uniform as seen by the upload entry points.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ScalarType {
    Int,
    Uint,
    Float,
}

/// `(scalar, rows, cols, count)` of a uniform.
///
/// `rows == 1` is a scalar or vector of `cols` components. For matrices
/// `rows` counts column vectors and `cols` their components, so a GLSL
/// `mat2x3` is `rows: 2, cols: 3`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct UniformShape {
    pub scalar: ScalarType,
    pub rows: u8,
    pub cols: u8,
    /// Array length; 1 for non-arrays.
    pub count: u32,
}

impl UniformShape {
    pub const fn new(scalar: ScalarType, rows: u8, cols: u8, count: u32) -> Self {
        Self { scalar, rows, cols, count }
    }

    /// Slots one element occupies.
    pub const fn element_slots(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    pub const fn slots(&self) -> usize {
        self.element_slots() * self.count as usize
    }

    pub fn call(&self) -> UniformCall {
        if self.rows == 1 {
            UniformCall::Vector { scalar: self.scalar, len: self.cols }
        } else {
            UniformCall::Matrix { rows: self.rows, cols: self.cols }
        }
    }

    /// Decomposes a reflected uniform type. Booleans and samplers collapse
    /// to integers.
    pub fn from_gl_type(gl_type: u32, count: u32) -> Result<Self, GlError> {
        use ScalarType::{Float, Int, Uint};
        let (scalar, rows, cols) = match gl_type {
            enums::FLOAT => (Float, 1, 1),
            enums::FLOAT_VEC2 => (Float, 1, 2),
            enums::FLOAT_VEC3 => (Float, 1, 3),
            enums::FLOAT_VEC4 => (Float, 1, 4),
            enums::INT | enums::BOOL => (Int, 1, 1),
            enums::INT_VEC2 | enums::BOOL_VEC2 => (Int, 1, 2),
            enums::INT_VEC3 | enums::BOOL_VEC3 => (Int, 1, 3),
            enums::INT_VEC4 | enums::BOOL_VEC4 => (Int, 1, 4),
            enums::UNSIGNED_INT => (Uint, 1, 1),
            enums::UNSIGNED_INT_VEC2 => (Uint, 1, 2),
            enums::UNSIGNED_INT_VEC3 => (Uint, 1, 3),
            enums::UNSIGNED_INT_VEC4 => (Uint, 1, 4),
            enums::FLOAT_MAT2 => (Float, 2, 2),
            enums::FLOAT_MAT3 => (Float, 3, 3),
            enums::FLOAT_MAT4 => (Float, 4, 4),
            enums::FLOAT_MAT2X3 => (Float, 2, 3),
            enums::FLOAT_MAT2X4 => (Float, 2, 4),
            enums::FLOAT_MAT3X2 => (Float, 3, 2),
            enums::FLOAT_MAT3X4 => (Float, 3, 4),
            enums::FLOAT_MAT4X2 => (Float, 4, 2),
            enums::FLOAT_MAT4X3 => (Float, 4, 3),
            t if enums::is_sampler(t) => (Int, 1, 1),
            _ => return Err(GlError::UnsupportedType(gl_type)),
        };
        Ok(Self::new(scalar, rows, cols, count.max(1)))
    }
}

/// Rust types that can be stored as one uniform element.
pub trait UniformValue: Pod {
    const SCALAR: ScalarType;
    const ROWS: u8;
    const COLS: u8;
}

macro_rules! uniform_value {
    ($scalar:ident: $($ty:ty => ($rows:literal, $cols:literal)),+ $(,)?) => {
        $(
            impl UniformValue for $ty {
                const SCALAR: ScalarType = ScalarType::$scalar;
                const ROWS: u8 = $rows;
                const COLS: u8 = $cols;
            }
        )+
    };
}

uniform_value!(Float:
    f32 => (1, 1), [f32; 2] => (1, 2), [f32; 3] => (1, 3), [f32; 4] => (1, 4),
    [[f32; 2]; 2] => (2, 2), [[f32; 3]; 3] => (3, 3), [[f32; 4]; 4] => (4, 4),
    [[f32; 3]; 2] => (2, 3), [[f32; 4]; 2] => (2, 4),
    [[f32; 2]; 3] => (3, 2), [[f32; 4]; 3] => (3, 4),
    [[f32; 2]; 4] => (4, 2), [[f32; 3]; 4] => (4, 3),
);
uniform_value!(Int: i32 => (1, 1), [i32; 2] => (1, 2), [i32; 3] => (1, 3), [i32; 4] => (1, 4));
uniform_value!(Uint: u32 => (1, 1), [u32; 2] => (1, 2), [u32; 3] => (1, 3), [u32; 4] => (1, 4));

/// Per-uniform bookkeeping.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UniformInfo {
    pub name_hash: NameHash,
    pub shape: UniformShape,
    /// First slot in the table's storage.
    pub offset: usize,
    /// Location in the program this table was reflected from.
    pub location: Option<u32>,
}

impl UniformInfo {
    fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.shape.slots()
    }
}

/// Uniform values keyed by name hash.
#[derive(Debug, Clone, Default)]
pub struct UniformTable {
    entries: Vec<UniformInfo>,
    storage: Vec<u32>,
}

impl UniformTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_uniform<V: UniformValue>(&mut self, name: impl Into<NameHash>, value: V) {
        self.set_uniform_array(name, std::slice::from_ref(&value));
    }

    /// Stores an array uniform; the first call for a name fixes its length.
    pub fn set_uniform_array<V: UniformValue>(&mut self, name: impl Into<NameHash>, values: &[V]) {
        let name = name.into();
        if values.is_empty() {
            log::debug!("ignoring empty array for uniform {name}");
            return;
        }
        let count = u32::try_from(values.len()).unwrap_or(u32::MAX);
        let shape = UniformShape::new(V::SCALAR, V::ROWS, V::COLS, count);
        self.write(name, shape, bytemuck::cast_slice(values));
    }

    /// Stores raw slots under an explicit shape.
    pub fn set_raw(&mut self, name: impl Into<NameHash>, shape: UniformShape, slots: &[u32]) {
        debug_assert_eq!(slots.len(), shape.slots(), "slot count does not match shape");
        self.write(name.into(), shape, slots);
    }

    fn write(&mut self, name: NameHash, shape: UniformShape, slots: &[u32]) -> usize {
        match self.position(name) {
            Some(i) => {
                let info = self.entries[i];
                debug_assert_eq!(
                    info.shape, shape,
                    "uniform {name} re-set with a different shape"
                );
                let n = slots.len().min(info.shape.slots());
                self.storage[info.offset..info.offset + n].copy_from_slice(&slots[..n]);
                i
            }
            None => {
                let offset = self.storage.len();
                self.storage.extend_from_slice(slots);
                self.storage.resize(offset + shape.slots(), 0);
                self.entries.push(UniformInfo { name_hash: name, shape, offset, location: None });
                self.entries.len() - 1
            }
        }
    }

    /// Reflection entry point for one active uniform of a linked program.
    ///
    /// Reads the driver's current value so uniforms the application never
    /// sets still carry their default. Returns false for unsupported types.
    pub fn init_uniform(
        &mut self,
        api: &dyn GlApi,
        name: &str,
        program: RawHandle,
        location: u32,
        size: u32,
        gl_type: u32,
    ) -> bool {
        let shape = match UniformShape::from_gl_type(gl_type, size) {
            Ok(shape) => shape,
            Err(err) => {
                log::debug!("uniform '{name}' skipped: {err}");
                return false;
            }
        };

        let per = shape.element_slots();
        let mut slots = vec![0u32; shape.slots()];
        for (i, chunk) in slots.chunks_mut(per).enumerate() {
            // Array elements occupy consecutive locations.
            api.read_uniform(program, location + i as u32, shape.scalar, chunk);
        }

        let i = self.write(NameHash::of(base_name(name)), shape, &slots);
        self.entries[i].location = Some(location);
        true
    }

    // ── diff-and-bind ─────────────────────────────────────────────────────

    /// Uploads every entry whose value differs from `active`, the snapshot
    /// of what `program` currently holds, and updates the snapshot.
    ///
    /// Entries absent from `active`, without a location, or of a different
    /// shape are skipped. Always returns true.
    pub fn bind(&self, ctx: &mut GlContext, program: RawHandle, active: &mut UniformTable) -> bool {
        ctx.use_program(Some(program));
        let Some(api) = ctx.api() else { return true };

        for entry in &self.entries {
            let Some(target) = active.position(entry.name_hash).map(|i| active.entries[i]) else {
                continue;
            };
            if target.shape != entry.shape {
                log::trace!("uniform {} shape differs from program; skipped", entry.name_hash);
                continue;
            }
            let Some(location) = target.location else { continue };

            let src = &self.storage[entry.range()];
            let dst = &mut active.storage[target.range()];
            if src == dst {
                continue;
            }
            dst.copy_from_slice(src);
            let call = entry.shape.call();
            log::trace!("{} at location {location} for uniform {}", call.entry_point(), entry.name_hash);
            api.upload_uniform(location, call, entry.shape.count, src);
        }
        true
    }

    // ── lookup ────────────────────────────────────────────────────────────

    fn position(&self, name: NameHash) -> Option<usize> {
        self.entries.iter().position(|e| e.name_hash == name)
    }

    pub fn info(&self, name: impl Into<NameHash>) -> Option<&UniformInfo> {
        let name = name.into();
        self.entries.iter().find(|e| e.name_hash == name)
    }

    pub fn shape(&self, name: impl Into<NameHash>) -> Option<UniformShape> {
        self.info(name).map(|i| i.shape)
    }

    pub fn location(&self, name: impl Into<NameHash>) -> Option<u32> {
        self.info(name).and_then(|i| i.location)
    }

    /// Raw slots of one uniform.
    pub fn get_raw(&self, name: impl Into<NameHash>) -> Option<&[u32]> {
        self.info(name).map(|i| &self.storage[i.range()])
    }

    pub fn get_bytes(&self, name: impl Into<NameHash>) -> Option<&[u8]> {
        self.get_raw(name).map(bytemuck::cast_slice)
    }

    /// Typed copy of the first element of a uniform, if the shape matches.
    pub fn get<V: UniformValue>(&self, name: impl Into<NameHash>) -> Option<V> {
        let info = self.info(name)?;
        let s = info.shape;
        if (s.scalar, s.rows, s.cols) != (V::SCALAR, V::ROWS, V::COLS) {
            return None;
        }
        let slots = &self.storage[info.offset..info.offset + s.element_slots()];
        Some(bytemuck::pod_read_unaligned(bytemuck::cast_slice(slots)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &UniformInfo> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.storage.clear();
    }

    /// Whether every entry here exists in `other` with the same shape and
    /// identical value.
    pub fn covers(&self, other: &UniformTable) -> bool {
        self.entries.iter().all(|e| {
            other
                .info(e.name_hash)
                .is_some_and(|o| o.shape == e.shape && other.storage[o.range()] == self.storage[e.range()])
        })
    }
}

/// Tables are equal when each covers the other; locations are ignored.
impl PartialEq for UniformTable {
    fn eq(&self, other: &Self) -> bool {
        self.covers(other) && other.covers(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::{GlCall, GlConfig, RecordingGl};

    fn live() -> (GlContext, RecordingGl) {
        let gl = RecordingGl::new();
        let ctx = GlContext::with_api(Box::new(gl.clone()), GlConfig::default()).unwrap();
        (ctx, gl)
    }

    fn program() -> RawHandle {
        RawHandle::new(40).unwrap()
    }

    fn uploads(gl: &RecordingGl) -> usize {
        gl.log().count(|c| matches!(c, GlCall::Uniform { .. }))
    }

    #[test]
    fn timer_uploads_once() {
        let (mut ctx, gl) = live();
        let mut active = UniformTable::new();
        assert!(active.init_uniform(ctx.api().unwrap(), "timer", program(), 3, 1, enums::FLOAT));

        let mut material = UniformTable::new();
        material.set_uniform("timer", 1.5f32);
        material.set_uniform("timer", 1.5f32);
        assert_eq!(material.len(), 1);
        assert_eq!(material.get_raw("timer"), Some(&[1.5f32.to_bits()][..]));

        gl.log().clear();
        assert!(material.bind(&mut ctx, program(), &mut active));
        assert!(material.bind(&mut ctx, program(), &mut active));

        let calls = gl.log().calls();
        let uniform_calls: Vec<_> =
            calls.iter().filter(|c| matches!(c, GlCall::Uniform { .. })).collect();
        assert_eq!(uniform_calls.len(), 1);
        assert_eq!(
            uniform_calls[0],
            &GlCall::Uniform {
                location: 3,
                call: UniformCall::Vector { scalar: ScalarType::Float, len: 1 },
                count: 1,
                data: vec![1.5f32.to_bits()],
            }
        );
        // Program bound once; the second bind hits the cache.
        assert_eq!(gl.log().count(|c| matches!(c, GlCall::UseProgram(_))), 1);
    }

    #[test]
    fn driver_default_suppresses_identical_upload() {
        let (mut ctx, gl) = live();
        gl.set_uniform_value(program(), 0, &[2.0f32.to_bits()]);
        let mut active = UniformTable::new();
        active.init_uniform(ctx.api().unwrap(), "u_scale", program(), 0, 1, enums::FLOAT);
        assert_eq!(active.get::<f32>("u_scale"), Some(2.0));

        let mut material = UniformTable::new();
        material.set_uniform("u_scale", 2.0f32);
        material.bind(&mut ctx, program(), &mut active);
        assert_eq!(uploads(&gl), 0);

        material.set_uniform("u_scale", 3.0f32);
        material.bind(&mut ctx, program(), &mut active);
        assert_eq!(uploads(&gl), 1);
        assert_eq!(active.get::<f32>("u_scale"), Some(3.0));
    }

    #[test]
    fn skips_missing_and_mismatched_entries() {
        let (mut ctx, gl) = live();
        let mut active = UniformTable::new();
        active.init_uniform(ctx.api().unwrap(), "u_color", program(), 1, 1, enums::FLOAT_VEC4);

        let mut material = UniformTable::new();
        material.set_uniform("u_unused", 1i32);
        material.set_uniform("u_color", [1.0f32, 0.0, 0.0]);
        material.bind(&mut ctx, program(), &mut active);
        assert_eq!(uploads(&gl), 0);
    }

    #[test]
    fn round_trips_every_shape() {
        let mut t = UniformTable::new();
        t.set_uniform("s", 0.25f32);
        t.set_uniform("v2", [1.0f32, 2.0]);
        t.set_uniform("v3", [1i32, -2, 3]);
        t.set_uniform("v4", [1u32, 2, 3, 4]);
        let m2 = [[1.0f32, 2.0], [3.0, 4.0]];
        let m3 = [[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let m4 = [[0.5f32; 4]; 4];
        let m23 = [[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let m42 = [[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0]];
        t.set_uniform("m2", m2);
        t.set_uniform("m3", m3);
        t.set_uniform("m4", m4);
        t.set_uniform("m23", m23);
        t.set_uniform("m42", m42);

        assert_eq!(t.get_bytes("s"), Some(bytemuck::bytes_of(&0.25f32)));
        assert_eq!(t.get_bytes("v3"), Some(bytemuck::bytes_of(&[1i32, -2, 3])));
        assert_eq!(t.get_bytes("v4"), Some(bytemuck::bytes_of(&[1u32, 2, 3, 4])));
        assert_eq!(t.get_bytes("m2"), Some(bytemuck::bytes_of(&m2)));
        assert_eq!(t.get_bytes("m3"), Some(bytemuck::bytes_of(&m3)));
        assert_eq!(t.get_bytes("m4"), Some(bytemuck::bytes_of(&m4)));
        assert_eq!(t.get_bytes("m23"), Some(bytemuck::bytes_of(&m23)));
        assert_eq!(t.get::<[[f32; 2]; 4]>("m42"), Some(m42));
        assert_eq!(t.get::<[f32; 2]>("v2"), Some([1.0, 2.0]));

        let shape = t.shape("m23").unwrap();
        assert_eq!((shape.rows, shape.cols), (2, 3));
        assert_eq!(shape.call(), UniformCall::Matrix { rows: 2, cols: 3 });
    }

    #[test]
    fn arrays_read_consecutive_locations() {
        let (ctx, gl) = live();
        gl.set_uniform_value(program(), 8, &[1.0f32.to_bits(), 2.0f32.to_bits()]);
        gl.set_uniform_value(program(), 9, &[3.0f32.to_bits(), 4.0f32.to_bits()]);

        let mut active = UniformTable::new();
        active.init_uniform(ctx.api().unwrap(), "u_offsets[0]", program(), 8, 3, enums::FLOAT_VEC2);
        let raw: Vec<f32> =
            active.get_raw("u_offsets").unwrap().iter().map(|b| f32::from_bits(*b)).collect();
        assert_eq!(raw, vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0]);
        assert_eq!(active.shape("u_offsets").map(|s| s.count), Some(3));
    }

    #[test]
    fn samplers_and_bools_are_ints() {
        let s = UniformShape::from_gl_type(enums::SAMPLER_2D, 1).unwrap();
        assert_eq!((s.scalar, s.rows, s.cols), (ScalarType::Int, 1, 1));
        let b = UniformShape::from_gl_type(enums::BOOL_VEC3, 1).unwrap();
        assert_eq!((b.scalar, b.cols), (ScalarType::Int, 3));
        assert_eq!(UniformShape::from_gl_type(0xDEAD, 1), Err(GlError::UnsupportedType(0xDEAD)));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "different shape")]
    fn reshaping_a_uniform_asserts() {
        let mut t = UniformTable::new();
        t.set_uniform("u_tint", [1.0f32, 1.0, 1.0]);
        t.set_uniform("u_tint", [1.0f32, 1.0, 1.0, 1.0]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "different shape")]
    fn reflected_shape_is_binding() {
        let gl = RecordingGl::new();
        let mut t = UniformTable::new();
        t.init_uniform(&gl, "u_count", program(), 0, 1, enums::INT);
        t.set_uniform("u_count", 1u32);
    }

    #[test]
    fn equality_is_symmetric() {
        let mut a = UniformTable::new();
        a.set_uniform("x", 1.0f32);
        let mut b = a.clone();
        assert_eq!(a, b);
        assert!(a.covers(&b));

        b.set_uniform("y", 2.0f32);
        assert!(a.covers(&b));
        assert!(!b.covers(&a));
        assert_ne!(a, b);

        a.set_uniform("y", 2.5f32);
        assert_ne!(a, b);
    }

    #[test]
    fn bind_without_context_is_a_no_op() {
        let mut ctx = GlContext::default();
        let mut active = UniformTable::new();
        active.set_raw("u", UniformShape::new(ScalarType::Float, 1, 1, 1), &[0]);
        let mut t = UniformTable::new();
        t.set_uniform("u", 1.0f32);
        assert!(t.bind(&mut ctx, program(), &mut active));
        assert_eq!(active.get::<f32>("u"), Some(0.0));
    }
}
