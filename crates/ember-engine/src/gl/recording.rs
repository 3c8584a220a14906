//! Headless [`GlApi`] backend.
//!
//! Hands out fresh object names, keeps a byte-exact copy of every buffer's
//! contents and records each call in a shared [`CallLog`]. Tests use it as a
//! call-counting driver stand-in; tools can use it to run the renderer
//! without a window.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::rc::Rc;

use crate::shader::ScalarType;

use super::api::{
    ActiveVariable, AttribFormat, BufferTarget, BufferUsage, GlApi, MapAccess, RawHandle,
    UniformCall,
};
use super::caps::{GlCaps, GlVersion};
use super::error::GlError;
use super::state::BlendMode;

/// One recorded driver call. Handles are recorded as raw names.
#[derive(Debug, Clone, PartialEq)]
pub enum GlCall {
    CreateBuffer(u32),
    DeleteBuffer(u32),
    BindBuffer(BufferTarget, Option<u32>),
    BufferData { target: BufferTarget, size: usize, usage: BufferUsage },
    BufferSubData { target: BufferTarget, offset: usize, data: Vec<u8> },
    MapWrite { target: BufferTarget, offset: usize, data: Vec<u8>, access: MapAccess },
    CreateVertexArray(u32),
    DeleteVertexArray(u32),
    BindVertexArray(Option<u32>),
    EnableAttrib(u32),
    DisableAttrib(u32),
    AttribPointer { index: u32, format: AttribFormat, stride: u32 },
    AttribDivisor { index: u32, divisor: u32 },
    AttribFormat { index: u32, format: AttribFormat },
    AttribBinding { index: u32, binding: u32 },
    BindVertexBuffer { binding: u32, buffer: Option<u32>, stride: u32 },
    BindingDivisor { binding: u32, divisor: u32 },
    UseProgram(Option<u32>),
    ActiveTexture(u32),
    CreateTexture(u32),
    DeleteTexture(u32),
    BindTexture(Option<u32>),
    CreateSampler(u32),
    DeleteSampler(u32),
    BindSampler { unit: u32, sampler: Option<u32> },
    SetBlend(BlendMode),
    Uniform { location: u32, call: UniformCall, count: u32, data: Vec<u32> },
    ReadUniform { program: u32, location: u32 },
}

impl GlCall {
    /// Calls that describe or toggle vertex attribute arrays.
    pub fn is_attrib_setup(&self) -> bool {
        matches!(
            self,
            GlCall::EnableAttrib(_)
                | GlCall::DisableAttrib(_)
                | GlCall::AttribPointer { .. }
                | GlCall::AttribDivisor { .. }
                | GlCall::AttribFormat { .. }
                | GlCall::AttribBinding { .. }
                | GlCall::BindVertexBuffer { .. }
                | GlCall::BindingDivisor { .. }
        )
    }

    /// Calls that move buffer bytes to the GPU.
    pub fn is_buffer_upload(&self) -> bool {
        matches!(
            self,
            GlCall::BufferData { .. } | GlCall::BufferSubData { .. } | GlCall::MapWrite { .. }
        )
    }
}

/// Shared, append-only record of driver calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<GlCall>>>);

impl CallLog {
    fn push(&self, call: GlCall) {
        log::trace!("{call:?}");
        self.0.borrow_mut().push(call);
    }

    pub fn calls(&self) -> Vec<GlCall> {
        self.0.borrow().clone()
    }

    /// Returns the recorded calls and clears the log.
    pub fn take(&self) -> Vec<GlCall> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn count(&self, pred: impl Fn(&GlCall) -> bool) -> usize {
        self.0.borrow().iter().filter(|c| pred(c)).count()
    }
}

struct Inner {
    version: GlVersion,
    extensions: HashSet<String>,
    max_attribs: u32,
    next_name: Cell<NonZeroU32>,
    fail_maps: Cell<bool>,
    fail_buffers: Cell<bool>,
    bound: RefCell<[Option<u32>; 2]>,
    memory: RefCell<HashMap<u32, Vec<u8>>>,
    uniform_values: RefCell<HashMap<(u32, u32), Vec<u32>>>,
    attributes: RefCell<HashMap<u32, Vec<ActiveVariable>>>,
    uniforms: RefCell<HashMap<u32, Vec<ActiveVariable>>>,
    log: CallLog,
}

/// Recording backend. Clones share state, so a test can keep one clone while
/// a [`GlContext`](super::GlContext) owns another.
#[derive(Clone)]
pub struct RecordingGl(Rc<Inner>);

impl RecordingGl {
    /// Desktop GL 4.5: every optional capability present.
    pub fn new() -> Self {
        Self::with_version(GlVersion::desktop(4, 5))
    }

    /// Desktop GL 2.1 without extensions: no VAOs, no buffer mapping.
    pub fn legacy() -> Self {
        Self::with_version(GlVersion::desktop(2, 1))
    }

    pub fn with_version(version: GlVersion) -> Self {
        Self::with_extensions(version, &[])
    }

    pub fn with_extensions(version: GlVersion, extensions: &[&str]) -> Self {
        Self(Rc::new(Inner {
            version,
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            max_attribs: 16,
            next_name: Cell::new(NonZeroU32::MIN),
            fail_maps: Cell::new(false),
            fail_buffers: Cell::new(false),
            bound: RefCell::new([None; 2]),
            memory: RefCell::new(HashMap::new()),
            uniform_values: RefCell::new(HashMap::new()),
            attributes: RefCell::new(HashMap::new()),
            uniforms: RefCell::new(HashMap::new()),
            log: CallLog::default(),
        }))
    }

    pub fn log(&self) -> &CallLog {
        &self.0.log
    }

    /// Makes every subsequent `map_write` fail as if the driver returned null.
    pub fn set_fail_maps(&self, fail: bool) {
        self.0.fail_maps.set(fail);
    }

    /// Makes every subsequent `create_buffer` fail.
    pub fn set_fail_buffers(&self, fail: bool) {
        self.0.fail_buffers.set(fail);
    }

    /// Simulated GPU-side contents of a buffer.
    pub fn buffer_contents(&self, buffer: RawHandle) -> Option<Vec<u8>> {
        self.0.memory.borrow().get(&buffer.get()).cloned()
    }

    /// Value `read_uniform` reports for `(program, location)`; unset
    /// uniforms read as zero.
    pub fn set_uniform_value(&self, program: RawHandle, location: u32, slots: &[u32]) {
        self.0
            .uniform_values
            .borrow_mut()
            .insert((program.get(), location), slots.to_vec());
    }

    pub fn add_active_attribute(&self, program: RawHandle, var: ActiveVariable) {
        self.0.attributes.borrow_mut().entry(program.get()).or_default().push(var);
    }

    pub fn add_active_uniform(&self, program: RawHandle, var: ActiveVariable) {
        self.0.uniforms.borrow_mut().entry(program.get()).or_default().push(var);
    }

    fn fresh_name(&self) -> RawHandle {
        let n = self.0.next_name.get();
        self.0.next_name.set(n.saturating_add(1));
        RawHandle::from_non_zero(n)
    }

    fn slot(target: BufferTarget) -> usize {
        match target {
            BufferTarget::Vertex => 0,
            BufferTarget::Index => 1,
        }
    }

    fn bound(&self, target: BufferTarget) -> Option<u32> {
        self.0.bound.borrow()[Self::slot(target)]
    }

    fn write_bound(&self, target: BufferTarget, offset: usize, data: &[u8]) {
        let Some(name) = self.bound(target) else {
            log::error!("write to {target:?} with no buffer bound");
            return;
        };
        let mut memory = self.0.memory.borrow_mut();
        let store = memory.entry(name).or_default();
        let Some(dst) = store.get_mut(offset..offset + data.len()) else {
            log::error!(
                "write {offset}..{} past end of buffer {name} ({} bytes)",
                offset + data.len(),
                store.len()
            );
            return;
        };
        dst.copy_from_slice(data);
    }
}

impl Default for RecordingGl {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecordingGl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingGl")
            .field("version", &self.0.version)
            .field("calls", &self.0.log.len())
            .finish()
    }
}

fn raw(h: Option<RawHandle>) -> Option<u32> {
    h.map(RawHandle::get)
}

impl GlApi for RecordingGl {
    fn version(&self) -> GlVersion {
        self.0.version
    }

    fn has_extension(&self, name: &str) -> bool {
        self.0.extensions.contains(name)
    }

    fn max_vertex_attribs(&self) -> u32 {
        self.0.max_attribs
    }

    fn create_buffer(&self) -> Result<RawHandle, GlError> {
        if self.0.fail_buffers.get() {
            return Err(GlError::ObjectCreation("buffer creation disabled".into()));
        }
        let h = self.fresh_name();
        self.0.memory.borrow_mut().insert(h.get(), Vec::new());
        self.0.log.push(GlCall::CreateBuffer(h.get()));
        Ok(h)
    }

    fn delete_buffer(&self, buffer: RawHandle) {
        self.0.memory.borrow_mut().remove(&buffer.get());
        for slot in self.0.bound.borrow_mut().iter_mut() {
            if *slot == Some(buffer.get()) {
                *slot = None;
            }
        }
        self.0.log.push(GlCall::DeleteBuffer(buffer.get()));
    }

    fn bind_buffer(&self, target: BufferTarget, buffer: Option<RawHandle>) {
        self.0.bound.borrow_mut()[Self::slot(target)] = raw(buffer);
        self.0.log.push(GlCall::BindBuffer(target, raw(buffer)));
    }

    fn buffer_data(&self, target: BufferTarget, size: usize, usage: BufferUsage) {
        if let Some(name) = self.bound(target) {
            self.0.memory.borrow_mut().insert(name, vec![0; size]);
        }
        self.0.log.push(GlCall::BufferData { target, size, usage });
    }

    fn buffer_sub_data(&self, target: BufferTarget, offset: usize, data: &[u8]) {
        self.write_bound(target, offset, data);
        self.0.log.push(GlCall::BufferSubData { target, offset, data: data.to_vec() });
    }

    fn map_write(
        &self,
        target: BufferTarget,
        offset: usize,
        data: &[u8],
        access: MapAccess,
    ) -> Result<(), GlError> {
        let mappable = GlCaps::detect(self).map_buffer_range;
        if self.0.fail_maps.get() || !mappable {
            return Err(GlError::MapFailed { offset, length: data.len() });
        }
        self.write_bound(target, offset, data);
        self.0.log.push(GlCall::MapWrite { target, offset, data: data.to_vec(), access });
        Ok(())
    }

    fn create_vertex_array(&self) -> Result<RawHandle, GlError> {
        if !GlCaps::detect(self).vertex_array_objects {
            return Err(GlError::ObjectCreation("vertex arrays unsupported".into()));
        }
        let h = self.fresh_name();
        self.0.log.push(GlCall::CreateVertexArray(h.get()));
        Ok(h)
    }

    fn delete_vertex_array(&self, vao: RawHandle) {
        self.0.log.push(GlCall::DeleteVertexArray(vao.get()));
    }

    fn bind_vertex_array(&self, vao: Option<RawHandle>) {
        self.0.log.push(GlCall::BindVertexArray(raw(vao)));
    }

    fn enable_vertex_attrib_array(&self, index: u32) {
        self.0.log.push(GlCall::EnableAttrib(index));
    }

    fn disable_vertex_attrib_array(&self, index: u32) {
        self.0.log.push(GlCall::DisableAttrib(index));
    }

    fn vertex_attrib_pointer(&self, index: u32, format: &AttribFormat, stride: u32) {
        self.0.log.push(GlCall::AttribPointer { index, format: *format, stride });
    }

    fn vertex_attrib_divisor(&self, index: u32, divisor: u32) {
        self.0.log.push(GlCall::AttribDivisor { index, divisor });
    }

    fn vertex_attrib_format(&self, index: u32, format: &AttribFormat) {
        self.0.log.push(GlCall::AttribFormat { index, format: *format });
    }

    fn vertex_attrib_binding(&self, index: u32, binding: u32) {
        self.0.log.push(GlCall::AttribBinding { index, binding });
    }

    fn bind_vertex_buffer(&self, binding: u32, buffer: Option<RawHandle>, stride: u32) {
        self.0.log.push(GlCall::BindVertexBuffer { binding, buffer: raw(buffer), stride });
    }

    fn vertex_binding_divisor(&self, binding: u32, divisor: u32) {
        self.0.log.push(GlCall::BindingDivisor { binding, divisor });
    }

    fn use_program(&self, program: Option<RawHandle>) {
        self.0.log.push(GlCall::UseProgram(raw(program)));
    }

    fn active_texture(&self, unit: u32) {
        self.0.log.push(GlCall::ActiveTexture(unit));
    }

    fn create_texture(&self) -> Result<RawHandle, GlError> {
        let h = self.fresh_name();
        self.0.log.push(GlCall::CreateTexture(h.get()));
        Ok(h)
    }

    fn delete_texture(&self, texture: RawHandle) {
        self.0.log.push(GlCall::DeleteTexture(texture.get()));
    }

    fn bind_texture(&self, texture: Option<RawHandle>) {
        self.0.log.push(GlCall::BindTexture(raw(texture)));
    }

    fn create_sampler(&self) -> Result<RawHandle, GlError> {
        let h = self.fresh_name();
        self.0.log.push(GlCall::CreateSampler(h.get()));
        Ok(h)
    }

    fn delete_sampler(&self, sampler: RawHandle) {
        self.0.log.push(GlCall::DeleteSampler(sampler.get()));
    }

    fn bind_sampler(&self, unit: u32, sampler: Option<RawHandle>) {
        self.0.log.push(GlCall::BindSampler { unit, sampler: raw(sampler) });
    }

    fn set_blend(&self, mode: BlendMode) {
        self.0.log.push(GlCall::SetBlend(mode));
    }

    fn upload_uniform(&self, location: u32, call: UniformCall, count: u32, data: &[u32]) {
        self.0.log.push(GlCall::Uniform { location, call, count, data: data.to_vec() });
    }

    fn read_uniform(&self, program: RawHandle, location: u32, _scalar: ScalarType, out: &mut [u32]) {
        out.fill(0);
        if let Some(value) = self.0.uniform_values.borrow().get(&(program.get(), location)) {
            let n = value.len().min(out.len());
            out[..n].copy_from_slice(&value[..n]);
        }
        self.0.log.push(GlCall::ReadUniform { program: program.get(), location });
    }

    fn active_attributes(&self, program: RawHandle) -> Vec<ActiveVariable> {
        self.0.attributes.borrow().get(&program.get()).cloned().unwrap_or_default()
    }

    fn active_uniforms(&self, program: RawHandle) -> Vec<ActiveVariable> {
        self.0.uniforms.borrow().get(&program.get()).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_buffer_contents() {
        let gl = RecordingGl::new();
        let b = gl.create_buffer().unwrap();
        gl.bind_buffer(BufferTarget::Vertex, Some(b));
        gl.buffer_data(BufferTarget::Vertex, 8, BufferUsage::Dynamic);
        gl.buffer_sub_data(BufferTarget::Vertex, 2, &[1, 2, 3]);
        gl.map_write(BufferTarget::Vertex, 6, &[9, 9], MapAccess::UNSYNCHRONIZED).unwrap();
        assert_eq!(gl.buffer_contents(b), Some(vec![0, 0, 1, 2, 3, 0, 9, 9]));
    }

    #[test]
    fn legacy_driver_cannot_map() {
        let gl = RecordingGl::legacy();
        let b = gl.create_buffer().unwrap();
        gl.bind_buffer(BufferTarget::Vertex, Some(b));
        gl.buffer_data(BufferTarget::Vertex, 4, BufferUsage::Stream);
        assert!(gl.map_write(BufferTarget::Vertex, 0, &[1], MapAccess::empty()).is_err());
        assert!(gl.create_vertex_array().is_err());
    }

    #[test]
    fn failing_maps_are_not_logged() {
        let gl = RecordingGl::new();
        gl.set_fail_maps(true);
        assert!(gl.map_write(BufferTarget::Index, 0, &[1], MapAccess::empty()).is_err());
        assert_eq!(gl.log().count(GlCall::is_buffer_upload), 0);
    }

    #[test]
    fn clones_share_the_log() {
        let gl = RecordingGl::new();
        let other = gl.clone();
        other.use_program(RawHandle::new(3));
        assert_eq!(gl.log().calls(), vec![GlCall::UseProgram(Some(3))]);
    }
}
