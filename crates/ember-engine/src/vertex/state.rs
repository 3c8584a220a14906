//! Vertex input binding.
//!
//! A [`VertexState`] ties vertex buffers and an optional index buffer to the
//! attribute layout of whatever program draws with them. With vertex array
//! objects the attribute setup lives in the VAO and is only re-specified when
//! the layout changes; without them every draw re-points attributes at the
//! shared default state.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

use crate::buffer::StreamingBuffer;
use crate::gl::{BufferTarget, GlContext, GpuObjectKind, ObjectId};
use crate::shader::{Attrib, AttributeTable};

static INTEGER_FALLBACK: Once = Once::new();

pub type SharedBuffer = Rc<RefCell<StreamingBuffer>>;

/// Binding slots available to the separate format/buffer path.
pub const MAX_VERTEX_BUFFERS: usize = 16;

fn bits(mut mask: u32) -> impl Iterator<Item = u32> {
    std::iter::from_fn(move || {
        if mask == 0 {
            return None;
        }
        let i = mask.trailing_zeros();
        mask &= mask - 1;
        Some(i)
    })
}

#[derive(Debug, Default)]
pub struct VertexState {
    vao: Option<ObjectId>,
    /// A VAO of ours is bound and holds the attribute setup.
    vao_active: bool,
    epoch: Option<u64>,
    buffers: Vec<SharedBuffer>,
    index: Option<SharedBuffer>,
    /// Layout last specified into the VAO.
    layout: AttributeTable,
    /// Attribute arrays enabled in the VAO.
    enabled: u32,
}

impl VertexState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vertex buffer and returns its binding slot.
    pub fn add_vertex_buffer(&mut self, buffer: SharedBuffer) -> u32 {
        debug_assert!(self.buffers.len() < MAX_VERTEX_BUFFERS, "too many vertex buffers");
        self.buffers.push(buffer);
        self.layout.clear();
        (self.buffers.len() - 1) as u32
    }

    pub fn set_index_buffer(&mut self, buffer: Option<SharedBuffer>) {
        self.index = buffer;
    }

    pub fn buffers(&self) -> &[SharedBuffer] {
        &self.buffers
    }

    pub fn index_buffer(&self) -> Option<&SharedBuffer> {
        self.index.as_ref()
    }

    pub fn uses_vertex_array(&self) -> bool {
        self.vao_active
    }

    pub fn layout(&self) -> &AttributeTable {
        &self.layout
    }

    fn forget_layout(&mut self) {
        self.layout.clear();
        self.enabled = 0;
    }

    /// Binds the VAO (or the default state) and brings every buffer up to
    /// date. Returns false without a live context.
    pub fn bind(&mut self, ctx: &mut GlContext) -> bool {
        if !ctx.is_live() {
            return false;
        }

        if ctx.vertex_arrays_enabled() {
            let id = *self
                .vao
                .get_or_insert_with(|| ctx.register_default(GpuObjectKind::VertexArray));
            let handle = ctx.validate_object(id);
            let epoch = ctx.object_epoch(id);
            if epoch != self.epoch || handle.is_none() {
                self.forget_layout();
                self.epoch = epoch;
            }
            self.vao_active = handle.is_some();
            ctx.bind_vertex_array(handle);
        } else {
            self.vao_active = false;
            if ctx.caps().vertex_array_objects {
                ctx.bind_vertex_array(None);
            }
        }

        for buffer in &self.buffers {
            buffer.borrow_mut().update(ctx);
        }
        if let Some(index) = &self.index {
            let mut index = index.borrow_mut();
            index.update(ctx);
            let handle = index.handle(ctx);
            ctx.bind_buffer(BufferTarget::Index, handle);
        }
        true
    }

    /// Points every attribute of `layout` at the buffer that provides it.
    ///
    /// `layout` is the program's reflected attribute table. Attributes no
    /// buffer provides are left unbound. Returns the number of attributes
    /// specified; 0 when the VAO already holds this layout.
    pub fn set_attrib_arrays(&mut self, ctx: &mut GlContext, layout: &AttributeTable) -> usize {
        if !ctx.is_live() {
            return 0;
        }
        if self.vao_active && self.layout.satisfies(layout) {
            return 0;
        }

        let caps = *ctx.caps();
        let separate = self.vao_active && ctx.attrib_binding_enabled();
        let mut mask = 0u32;
        let mut slots_bound = 0u32;
        let mut specified = 0;
        let mut incomplete = false;

        for wanted in layout.iter() {
            let Some(index) = wanted.bound_index else { continue };
            if index >= caps.max_vertex_attribs {
                log::warn!(
                    "attribute index {index} exceeds driver limit {}; skipped",
                    caps.max_vertex_attribs
                );
                continue;
            }
            let Some((slot, buffer, source)) = self.provider(wanted) else {
                log::trace!("no vertex buffer provides attribute {}", wanted.name_hash);
                continue;
            };
            if self.vao_active && self.layout.contains_binding(wanted.name_hash, Some(index)) {
                mask |= 1 << index;
                continue;
            }

            let buffer = buffer.borrow();
            let Some(handle) = buffer.handle(ctx) else {
                log::debug!("vertex buffer for attribute {index} unavailable; retrying next draw");
                incomplete = true;
                continue;
            };
            mask |= 1 << index;
            let stride = buffer.stride();
            let mut format = source.format();
            if format.integral && !caps.integer_attributes {
                INTEGER_FALLBACK.call_once(|| {
                    log::warn!("driver lacks integer vertex attributes; uploading them as floats");
                });
                format.integral = false;
            }

            if separate {
                let Some(api) = ctx.api() else { return specified };
                if slots_bound & (1 << slot) == 0 {
                    api.bind_vertex_buffer(slot, Some(handle), stride);
                    if caps.instancing {
                        let per_instance = buffer.format().is_some_and(|f| f.is_instanced());
                        api.vertex_binding_divisor(slot, u32::from(per_instance));
                    }
                    slots_bound |= 1 << slot;
                }
                api.vertex_attrib_format(index, &format);
                api.vertex_attrib_binding(index, slot);
            } else {
                ctx.bind_buffer(BufferTarget::Vertex, Some(handle));
                let Some(api) = ctx.api() else { return specified };
                api.vertex_attrib_pointer(index, &format, stride);
                if caps.instancing {
                    api.vertex_attrib_divisor(index, u32::from(source.is_instanced()));
                } else if source.is_instanced() {
                    log::debug!("instanced attribute {index} on a driver without instancing");
                }
            }
            specified += 1;
        }

        let previous = if self.vao_active { self.enabled } else { ctx.state().enabled_attribs() };
        if let Some(api) = ctx.api() {
            for i in bits(mask & !previous) {
                api.enable_vertex_attrib_array(i);
            }
            for i in bits(previous & !mask) {
                api.disable_vertex_attrib_array(i);
            }
        }

        if self.vao_active {
            self.enabled = mask;
            if incomplete {
                self.layout.clear();
            } else {
                self.layout = layout.clone();
            }
        } else if let Some((_, state)) = ctx.parts() {
            state.set_enabled_attribs(mask);
        }
        specified
    }

    /// First buffer, in slot order, whose format declares `wanted`.
    fn provider(&self, wanted: &Attrib) -> Option<(u32, SharedBuffer, Attrib)> {
        self.buffers.iter().enumerate().find_map(|(slot, buffer)| {
            let source = buffer.borrow().attributes()?.get(wanted.name_hash).copied()?;
            Some((slot as u32, Rc::clone(buffer), source))
        })
    }

    /// [`bind`](Self::bind) followed by [`set_attrib_arrays`](Self::set_attrib_arrays).
    pub fn draw_ready(&mut self, ctx: &mut GlContext, layout: &AttributeTable) -> bool {
        if !self.bind(ctx) {
            return false;
        }
        self.set_attrib_arrays(ctx, layout);
        true
    }

    /// Releases the VAO. Buffers are shared and stay alive.
    pub fn destroy(mut self, ctx: &mut GlContext) {
        if let Some(id) = self.vao.take() {
            ctx.unregister_object(id);
        }
    }
}
