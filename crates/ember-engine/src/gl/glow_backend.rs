//! [`GlApi`] over the `glow` bindings.

use anyhow::Result;
use glow::HasContext;

use crate::shader::ScalarType;

use super::api::{
    ActiveVariable, AttribFormat, BufferTarget, BufferUsage, GlApi, MapAccess, RawHandle,
    UniformCall,
};
use super::caps::GlVersion;
use super::error::GlError;
use super::state::BlendMode;

/// Native OpenGL / GLES function table.
pub struct GlowApi {
    gl: glow::Context,
}

fn gl_int(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn handle(raw: Option<RawHandle>) -> Option<std::num::NonZeroU32> {
    raw.map(RawHandle::non_zero)
}

impl GlowApi {
    pub fn new(gl: glow::Context) -> Self {
        Self { gl }
    }

    /// Loads the function table from the current native context.
    ///
    /// # Safety
    ///
    /// A GL context must be current on this thread and `loader` must return
    /// entry points belonging to it.
    pub unsafe fn from_loader_function<F>(loader: F) -> Result<Self>
    where
        F: FnMut(&str) -> *const std::ffi::c_void,
    {
        let gl = unsafe { glow::Context::from_loader_function(loader) };
        let version = gl.version();
        anyhow::ensure!(
            version.major >= 2,
            "driver reports GL {}.{}; at least 2.0 is required",
            version.major,
            version.minor
        );
        log::info!(
            "loaded GL {}.{}{} ({})",
            version.major,
            version.minor,
            if version.is_embedded { " ES" } else { "" },
            version.vendor_info
        );
        Ok(Self { gl })
    }

    pub fn context(&self) -> &glow::Context {
        &self.gl
    }

    fn created<T>(result: Result<T, String>, wrap: impl FnOnce(T) -> std::num::NonZeroU32) -> Result<RawHandle, GlError> {
        result
            .map(|obj| RawHandle::from_non_zero(wrap(obj)))
            .map_err(GlError::ObjectCreation)
    }
}

impl GlApi for GlowApi {
    fn version(&self) -> GlVersion {
        let v = self.gl.version();
        GlVersion { major: v.major, minor: v.minor, embedded: v.is_embedded }
    }

    fn has_extension(&self, name: &str) -> bool {
        self.gl.supported_extensions().contains(name)
    }

    fn max_vertex_attribs(&self) -> u32 {
        let n = unsafe { self.gl.get_parameter_i32(glow::MAX_VERTEX_ATTRIBS) };
        u32::try_from(n).unwrap_or(0)
    }

    // ── buffers ───────────────────────────────────────────────────────────

    fn create_buffer(&self) -> Result<RawHandle, GlError> {
        Self::created(unsafe { self.gl.create_buffer() }, |b| b.0)
    }

    fn delete_buffer(&self, buffer: RawHandle) {
        unsafe { self.gl.delete_buffer(glow::NativeBuffer(buffer.non_zero())) }
    }

    fn bind_buffer(&self, target: BufferTarget, buffer: Option<RawHandle>) {
        unsafe { self.gl.bind_buffer(target.gl_enum(), handle(buffer).map(glow::NativeBuffer)) }
    }

    fn buffer_data(&self, target: BufferTarget, size: usize, usage: BufferUsage) {
        unsafe { self.gl.buffer_data_size(target.gl_enum(), gl_int(size), usage.gl_enum()) }
    }

    fn buffer_sub_data(&self, target: BufferTarget, offset: usize, data: &[u8]) {
        unsafe { self.gl.buffer_sub_data_u8_slice(target.gl_enum(), gl_int(offset), data) }
    }

    fn map_write(
        &self,
        target: BufferTarget,
        offset: usize,
        data: &[u8],
        access: MapAccess,
    ) -> Result<(), GlError> {
        let failed = GlError::MapFailed { offset, length: data.len() };
        unsafe {
            let ptr = self.gl.map_buffer_range(
                target.gl_enum(),
                gl_int(offset),
                gl_int(data.len()),
                access.gl_bits(),
            );
            if ptr.is_null() {
                return Err(failed);
            }
            // The mapping covers exactly `data.len()` bytes starting at `offset`.
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
            self.gl.unmap_buffer(target.gl_enum());
        }
        Ok(())
    }

    // ── vertex arrays / attributes ────────────────────────────────────────

    fn create_vertex_array(&self) -> Result<RawHandle, GlError> {
        Self::created(unsafe { self.gl.create_vertex_array() }, |v| v.0)
    }

    fn delete_vertex_array(&self, vao: RawHandle) {
        unsafe { self.gl.delete_vertex_array(glow::NativeVertexArray(vao.non_zero())) }
    }

    fn bind_vertex_array(&self, vao: Option<RawHandle>) {
        unsafe { self.gl.bind_vertex_array(handle(vao).map(glow::NativeVertexArray)) }
    }

    fn enable_vertex_attrib_array(&self, index: u32) {
        unsafe { self.gl.enable_vertex_attrib_array(index) }
    }

    fn disable_vertex_attrib_array(&self, index: u32) {
        unsafe { self.gl.disable_vertex_attrib_array(index) }
    }

    fn vertex_attrib_pointer(&self, index: u32, format: &AttribFormat, stride: u32) {
        let size = i32::from(format.count);
        let ty = format.gpu_type.gl_enum();
        let stride = gl_int(stride as usize);
        let offset = gl_int(format.offset as usize);
        unsafe {
            if format.integral {
                self.gl.vertex_attrib_pointer_i32(index, size, ty, stride, offset);
            } else {
                self.gl
                    .vertex_attrib_pointer_f32(index, size, ty, format.normalized, stride, offset);
            }
        }
    }

    fn vertex_attrib_divisor(&self, index: u32, divisor: u32) {
        unsafe { self.gl.vertex_attrib_divisor(index, divisor) }
    }

    fn vertex_attrib_format(&self, index: u32, format: &AttribFormat) {
        let size = i32::from(format.count);
        let ty = format.gpu_type.gl_enum();
        unsafe {
            if format.integral {
                self.gl.vertex_attrib_format_i32(index, size, ty, format.offset);
            } else {
                self.gl
                    .vertex_attrib_format_f32(index, size, ty, format.normalized, format.offset);
            }
        }
    }

    fn vertex_attrib_binding(&self, index: u32, binding: u32) {
        unsafe { self.gl.vertex_attrib_binding(index, binding) }
    }

    fn bind_vertex_buffer(&self, binding: u32, buffer: Option<RawHandle>, stride: u32) {
        unsafe {
            self.gl.bind_vertex_buffer(
                binding,
                handle(buffer).map(glow::NativeBuffer),
                0,
                gl_int(stride as usize),
            )
        }
    }

    fn vertex_binding_divisor(&self, binding: u32, divisor: u32) {
        unsafe { self.gl.vertex_binding_divisor(binding, divisor) }
    }

    // ── programs / textures / blending ────────────────────────────────────

    fn use_program(&self, program: Option<RawHandle>) {
        unsafe { self.gl.use_program(handle(program).map(glow::NativeProgram)) }
    }

    fn active_texture(&self, unit: u32) {
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) }
    }

    fn create_texture(&self) -> Result<RawHandle, GlError> {
        Self::created(unsafe { self.gl.create_texture() }, |t| t.0)
    }

    fn delete_texture(&self, texture: RawHandle) {
        unsafe { self.gl.delete_texture(glow::NativeTexture(texture.non_zero())) }
    }

    fn bind_texture(&self, texture: Option<RawHandle>) {
        unsafe {
            self.gl
                .bind_texture(glow::TEXTURE_2D, handle(texture).map(glow::NativeTexture))
        }
    }

    fn create_sampler(&self) -> Result<RawHandle, GlError> {
        Self::created(unsafe { self.gl.create_sampler() }, |s| s.0)
    }

    fn delete_sampler(&self, sampler: RawHandle) {
        unsafe { self.gl.delete_sampler(glow::NativeSampler(sampler.non_zero())) }
    }

    fn bind_sampler(&self, unit: u32, sampler: Option<RawHandle>) {
        unsafe { self.gl.bind_sampler(unit, handle(sampler).map(glow::NativeSampler)) }
    }

    fn set_blend(&self, mode: BlendMode) {
        let (src, dst) = match mode {
            BlendMode::Opaque => {
                unsafe { self.gl.disable(glow::BLEND) };
                return;
            }
            BlendMode::Alpha => (glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA),
            BlendMode::Premultiplied => (glow::ONE, glow::ONE_MINUS_SRC_ALPHA),
            BlendMode::Additive => (glow::SRC_ALPHA, glow::ONE),
            BlendMode::Multiply => (glow::DST_COLOR, glow::ZERO),
        };
        unsafe {
            self.gl.enable(glow::BLEND);
            self.gl.blend_equation(glow::FUNC_ADD);
            self.gl.blend_func(src, dst);
        }
    }

    // ── uniforms / reflection ─────────────────────────────────────────────

    fn upload_uniform(&self, location: u32, call: UniformCall, _count: u32, data: &[u32]) {
        let loc = glow::NativeUniformLocation(location);
        let loc = Some(&loc);
        let gl = &self.gl;
        unsafe {
            match call {
                UniformCall::Vector { scalar: ScalarType::Float, len } => {
                    let v: &[f32] = bytemuck::cast_slice(data);
                    match len {
                        1 => gl.uniform_1_f32_slice(loc, v),
                        2 => gl.uniform_2_f32_slice(loc, v),
                        3 => gl.uniform_3_f32_slice(loc, v),
                        _ => gl.uniform_4_f32_slice(loc, v),
                    }
                }
                UniformCall::Vector { scalar: ScalarType::Int, len } => {
                    let v: &[i32] = bytemuck::cast_slice(data);
                    match len {
                        1 => gl.uniform_1_i32_slice(loc, v),
                        2 => gl.uniform_2_i32_slice(loc, v),
                        3 => gl.uniform_3_i32_slice(loc, v),
                        _ => gl.uniform_4_i32_slice(loc, v),
                    }
                }
                UniformCall::Vector { scalar: ScalarType::Uint, len } => match len {
                    1 => gl.uniform_1_u32_slice(loc, data),
                    2 => gl.uniform_2_u32_slice(loc, data),
                    3 => gl.uniform_3_u32_slice(loc, data),
                    _ => gl.uniform_4_u32_slice(loc, data),
                },
                UniformCall::Matrix { rows, cols } => {
                    let v: &[f32] = bytemuck::cast_slice(data);
                    match (rows, cols) {
                        (2, 2) => gl.uniform_matrix_2_f32_slice(loc, false, v),
                        (3, 3) => gl.uniform_matrix_3_f32_slice(loc, false, v),
                        (4, 4) => gl.uniform_matrix_4_f32_slice(loc, false, v),
                        (2, 3) => gl.uniform_matrix_2x3_f32_slice(loc, false, v),
                        (2, 4) => gl.uniform_matrix_2x4_f32_slice(loc, false, v),
                        (3, 2) => gl.uniform_matrix_3x2_f32_slice(loc, false, v),
                        (3, 4) => gl.uniform_matrix_3x4_f32_slice(loc, false, v),
                        (4, 2) => gl.uniform_matrix_4x2_f32_slice(loc, false, v),
                        _ => gl.uniform_matrix_4x3_f32_slice(loc, false, v),
                    }
                }
            }
        }
    }

    fn read_uniform(&self, program: RawHandle, location: u32, scalar: ScalarType, out: &mut [u32]) {
        let program = glow::NativeProgram(program.non_zero());
        let loc = glow::NativeUniformLocation(location);
        unsafe {
            match scalar {
                ScalarType::Float => {
                    self.gl.get_uniform_f32(program, &loc, bytemuck::cast_slice_mut(out))
                }
                // Unsigned values share the bit pattern of the signed query.
                ScalarType::Int | ScalarType::Uint => {
                    self.gl.get_uniform_i32(program, &loc, bytemuck::cast_slice_mut(out))
                }
            }
        }
    }

    fn active_attributes(&self, program: RawHandle) -> Vec<ActiveVariable> {
        let program = glow::NativeProgram(program.non_zero());
        unsafe {
            let n = self.gl.get_active_attributes(program);
            (0..n)
                .filter_map(|i| self.gl.get_active_attribute(program, i))
                .map(|a| ActiveVariable {
                    location: self.gl.get_attrib_location(program, &a.name),
                    name: a.name,
                    gl_type: a.atype,
                    size: u32::try_from(a.size).unwrap_or(1),
                })
                .collect()
        }
    }

    fn active_uniforms(&self, program: RawHandle) -> Vec<ActiveVariable> {
        let program = glow::NativeProgram(program.non_zero());
        unsafe {
            let n = self.gl.get_active_uniforms(program);
            (0..n)
                .filter_map(|i| self.gl.get_active_uniform(program, i))
                .map(|u| ActiveVariable {
                    location: self.gl.get_uniform_location(program, &u.name).map(|l| l.0),
                    name: u.name,
                    gl_type: u.utype,
                    size: u32::try_from(u.size).unwrap_or(1),
                })
                .collect()
        }
    }
}
