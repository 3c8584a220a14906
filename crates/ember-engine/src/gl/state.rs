use super::api::{BufferTarget, GlApi, RawHandle};

/// Number of texture/sampler units tracked by [`RenderState`].
pub const TEXTURE_UNITS: usize = 8;

/// Fixed-function blend configurations used by the renderers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum BlendMode {
    /// Blending disabled.
    #[default]
    Opaque,
    /// `src * a + dst * (1 - a)`.
    Alpha,
    /// `src + dst * (1 - a)` for premultiplied colors.
    Premultiplied,
    /// `src * a + dst`.
    Additive,
    /// `src * dst`.
    Multiply,
}

/// Cache of what is currently bound on the GPU for one context generation.
///
/// Every binder consults this before issuing a call; a call is skipped when the
/// cached value already matches. `reset` returns to the all-zero state, which is
/// what a freshly created context has bound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderState {
    program: Option<RawHandle>,
    vertex_array: Option<RawHandle>,
    array_buffer: Option<RawHandle>,
    element_buffer: Option<RawHandle>,
    active_unit: u32,
    textures: [Option<RawHandle>; TEXTURE_UNITS],
    samplers: [Option<RawHandle>; TEXTURE_UNITS],
    /// `None` until the first explicit blend call of the generation.
    blend: Option<BlendMode>,
    /// Enabled attribute arrays of the default (VAO-less) vertex state.
    enabled_attribs: u32,
}

impl RenderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn program(&self) -> Option<RawHandle> {
        self.program
    }

    pub fn vertex_array(&self) -> Option<RawHandle> {
        self.vertex_array
    }

    pub fn buffer(&self, target: BufferTarget) -> Option<RawHandle> {
        match target {
            BufferTarget::Vertex => self.array_buffer,
            BufferTarget::Index => self.element_buffer,
        }
    }

    pub fn texture(&self, unit: usize) -> Option<RawHandle> {
        self.textures.get(unit).copied().flatten()
    }

    pub fn sampler(&self, unit: usize) -> Option<RawHandle> {
        self.samplers.get(unit).copied().flatten()
    }

    pub fn blend(&self) -> Option<BlendMode> {
        self.blend
    }

    pub fn enabled_attribs(&self) -> u32 {
        self.enabled_attribs
    }

    pub(crate) fn set_enabled_attribs(&mut self, mask: u32) {
        self.enabled_attribs = mask;
    }

    /// True when nothing has been bound since the last reset.
    pub fn is_reset(&self) -> bool {
        *self == Self::default()
    }

    // ── binders ───────────────────────────────────────────────────────────
    //
    // Each returns whether a GL call was issued.

    pub fn use_program(&mut self, api: &dyn GlApi, program: Option<RawHandle>) -> bool {
        if self.program == program {
            return false;
        }
        api.use_program(program);
        self.program = program;
        true
    }

    /// Binds a vertex array object.
    ///
    /// The element-buffer binding belongs to the vertex array, so the cached
    /// index buffer becomes unknown whenever the vertex array changes.
    pub fn bind_vertex_array(&mut self, api: &dyn GlApi, vao: Option<RawHandle>) -> bool {
        if self.vertex_array == vao {
            return false;
        }
        api.bind_vertex_array(vao);
        self.vertex_array = vao;
        self.element_buffer = None;
        true
    }

    pub fn bind_buffer(
        &mut self,
        api: &dyn GlApi,
        target: BufferTarget,
        buffer: Option<RawHandle>,
    ) -> bool {
        let slot = match target {
            BufferTarget::Vertex => &mut self.array_buffer,
            BufferTarget::Index => &mut self.element_buffer,
        };
        if *slot == buffer {
            return false;
        }
        api.bind_buffer(target, buffer);
        *slot = buffer;
        true
    }

    /// Forgets a deleted buffer so a recycled name is not mistaken for bound.
    pub(crate) fn forget_buffer(&mut self, buffer: RawHandle) {
        if self.array_buffer == Some(buffer) {
            self.array_buffer = None;
        }
        if self.element_buffer == Some(buffer) {
            self.element_buffer = None;
        }
    }

    pub(crate) fn forget_vertex_array(&mut self, vao: RawHandle) {
        if self.vertex_array == Some(vao) {
            self.vertex_array = None;
            self.element_buffer = None;
        }
    }

    pub fn bind_texture(&mut self, api: &dyn GlApi, unit: usize, texture: Option<RawHandle>) -> bool {
        let Some(slot) = self.textures.get(unit).copied() else {
            log::warn!("texture unit {unit} out of range (max {TEXTURE_UNITS})");
            return false;
        };
        if slot == texture {
            return false;
        }
        self.activate_unit(api, unit as u32);
        api.bind_texture(texture);
        self.textures[unit] = texture;
        true
    }

    pub fn bind_sampler(&mut self, api: &dyn GlApi, unit: usize, sampler: Option<RawHandle>) -> bool {
        let Some(slot) = self.samplers.get(unit).copied() else {
            log::warn!("sampler unit {unit} out of range (max {TEXTURE_UNITS})");
            return false;
        };
        if slot == sampler {
            return false;
        }
        api.bind_sampler(unit as u32, sampler);
        self.samplers[unit] = sampler;
        true
    }

    pub fn set_blend(&mut self, api: &dyn GlApi, mode: BlendMode) -> bool {
        if self.blend == Some(mode) {
            return false;
        }
        api.set_blend(mode);
        self.blend = Some(mode);
        true
    }

    fn activate_unit(&mut self, api: &dyn GlApi, unit: u32) {
        if self.active_unit != unit {
            api.active_texture(unit);
            self.active_unit = unit;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::{GlCall, RecordingGl};

    fn h(n: u32) -> Option<RawHandle> {
        RawHandle::new(n)
    }

    #[test]
    fn repeated_program_binds_are_elided() {
        let gl = RecordingGl::new();
        let mut state = RenderState::new();
        assert!(state.use_program(&gl, h(3)));
        assert!(!state.use_program(&gl, h(3)));
        assert!(state.use_program(&gl, h(4)));
        assert_eq!(gl.log().count(|c| matches!(c, GlCall::UseProgram(_))), 2);
    }

    #[test]
    fn vertex_array_change_forgets_element_buffer() {
        let gl = RecordingGl::new();
        let mut state = RenderState::new();
        state.bind_vertex_array(&gl, h(1));
        state.bind_buffer(&gl, BufferTarget::Index, h(9));
        assert_eq!(state.buffer(BufferTarget::Index), h(9));

        state.bind_vertex_array(&gl, h(2));
        assert_eq!(state.buffer(BufferTarget::Index), None);
        assert!(state.bind_buffer(&gl, BufferTarget::Index, h(9)));
    }

    #[test]
    fn texture_binds_switch_units_lazily() {
        let gl = RecordingGl::new();
        let mut state = RenderState::new();
        state.bind_texture(&gl, 0, h(5));
        state.bind_texture(&gl, 2, h(6));
        state.bind_texture(&gl, 2, h(6));
        let calls = gl.log().take();
        assert_eq!(
            calls,
            vec![
                GlCall::BindTexture(Some(5)),
                GlCall::ActiveTexture(2),
                GlCall::BindTexture(Some(6)),
            ]
        );
    }

    #[test]
    fn out_of_range_unit_is_ignored() {
        let gl = RecordingGl::new();
        let mut state = RenderState::new();
        assert!(!state.bind_texture(&gl, TEXTURE_UNITS, h(1)));
        assert!(!state.bind_sampler(&gl, TEXTURE_UNITS + 3, h(1)));
        assert!(gl.log().is_empty());
    }

    #[test]
    fn first_blend_call_always_issues() {
        let gl = RecordingGl::new();
        let mut state = RenderState::new();
        assert!(state.set_blend(&gl, BlendMode::Opaque));
        assert!(!state.set_blend(&gl, BlendMode::Opaque));
        assert!(state.set_blend(&gl, BlendMode::Additive));
    }

    #[test]
    fn reset_returns_to_zero() {
        let gl = RecordingGl::new();
        let mut state = RenderState::new();
        state.use_program(&gl, h(1));
        state.bind_sampler(&gl, 1, h(2));
        state.set_enabled_attribs(0b101);
        assert!(!state.is_reset());
        state.reset();
        assert!(state.is_reset());
        assert_eq!(state.enabled_attribs(), 0);
    }
}
