use anyhow::{Context as _, Result};

use crate::buffer::StreamingStrategy;

use super::api::{BufferTarget, GlApi, RawHandle};
use super::caps::GlCaps;
use super::registry::{GpuObjectKind, ObjectId, ObjectRegistry, RecreateFn};
use super::state::{BlendMode, RenderState};

/// Tunables for the GPU layer.
///
/// Every field is a request; capability gating happens when a context is
/// created, so a request the driver cannot serve is downgraded, not rejected.
#[derive(Debug, Clone)]
pub struct GlConfig {
    /// Upload strategy for append-only streaming buffers.
    ///
    /// `None` picks the fastest strategy the driver supports.
    pub streaming: Option<StreamingStrategy>,

    /// The incremental strategy falls back to a full respecify once wasted
    /// bytes exceed `capacity / waste_divisor`.
    pub waste_divisor: usize,

    /// Use hardware vertex array objects when available.
    pub use_vertex_arrays: bool,

    /// Use the separate attribute format/binding API when available.
    pub use_attrib_binding: bool,
}

impl Default for GlConfig {
    fn default() -> Self {
        Self {
            streaming: None,
            waste_divisor: 4,
            use_vertex_arrays: true,
            use_attrib_binding: true,
        }
    }
}

/// Capability context: the live function table plus everything tied to one
/// context generation.
///
/// Owns the [`RenderState`] cache and the [`ObjectRegistry`]. Components
/// receive `&mut GlContext` instead of reaching for globals; with no live
/// context every GPU-facing operation becomes a no-op that leaves its caller
/// dirty.
pub struct GlContext {
    api: Option<Box<dyn GlApi>>,
    caps: GlCaps,
    config: GlConfig,
    /// Requested strategy; `None` means probe per context.
    requested: Option<StreamingStrategy>,
    streaming: StreamingStrategy,
    generation: u64,
    state: RenderState,
    registry: ObjectRegistry,
}

impl GlContext {
    /// Creates a context manager with no live GL context.
    pub fn new(config: GlConfig) -> Self {
        let requested = config.streaming;
        Self {
            api: None,
            caps: GlCaps::baseline(),
            config,
            requested,
            streaming: StreamingStrategy::DiscardAndSubData,
            generation: 0,
            state: RenderState::new(),
            registry: ObjectRegistry::new(),
        }
    }

    /// Creates a context manager and installs `api` as its first context.
    pub fn with_api(api: Box<dyn GlApi>, config: GlConfig) -> Result<Self> {
        let mut ctx = Self::new(config);
        ctx.create_context(api)?;
        Ok(ctx)
    }

    /// Installs a new native context.
    ///
    /// Reloads capabilities, resets the render-state cache and recreates every
    /// registered object that is invalid, each exactly once. A context that is
    /// still installed is deleted first.
    pub fn create_context(&mut self, api: Box<dyn GlApi>) -> Result<()> {
        if self.api.is_some() {
            log::debug!("create_context while a context is live; deleting the old one first");
            self.delete_context();
        }

        let version = api.version();
        anyhow::ensure!(
            version.major >= 2,
            "GL {}.{} is below the supported baseline",
            version.major,
            version.minor
        );

        let caps = GlCaps::detect(api.as_ref());
        anyhow::ensure!(caps.max_vertex_attribs > 0, "driver reports no vertex attributes");

        self.generation += 1;
        self.caps = caps;
        self.state.reset();
        self.streaming = self.requested.unwrap_or_else(|| StreamingStrategy::best_for(&caps));
        self.resolve_streaming();

        let api = self.api.insert(api);
        let recreated = self.registry.recreate_invalid(api.as_ref(), self.generation);

        log::info!(
            "GL {}.{}{} context generation {} ({recreated} objects recreated, streaming: {})",
            version.major,
            version.minor,
            if version.embedded { " ES" } else { "" },
            self.generation,
            self.streaming,
        );
        log::debug!("capabilities: {caps:?}");
        Ok(())
    }

    /// Tears down the live context.
    ///
    /// Marks every registered object invalid without calling the driver,
    /// drops the function table and resets the render-state cache. Returns the
    /// function table so a caller can reuse it for the next context.
    pub fn delete_context(&mut self) -> Option<Box<dyn GlApi>> {
        let api = self.api.take()?;
        let invalidated = self.registry.invalidate_all();
        self.state.reset();
        self.caps = GlCaps::baseline();
        log::info!(
            "GL context generation {} deleted ({invalidated} objects invalidated)",
            self.generation
        );
        Some(api)
    }

    pub fn is_live(&self) -> bool {
        self.api.is_some()
    }

    /// Monotonic context counter; 0 until the first context is created.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn api(&self) -> Option<&dyn GlApi> {
        self.api.as_deref()
    }

    pub fn caps(&self) -> &GlCaps {
        &self.caps
    }

    pub fn config(&self) -> &GlConfig {
        &self.config
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    /// Splits the context into the function table and the binding cache.
    pub fn parts(&mut self) -> Option<(&dyn GlApi, &mut RenderState)> {
        let api = self.api.as_deref()?;
        Some((api, &mut self.state))
    }

    /// True when vertex array objects are both available and enabled.
    pub fn vertex_arrays_enabled(&self) -> bool {
        self.caps.vertex_array_objects && self.config.use_vertex_arrays
    }

    /// True when the separate attribute format/binding path is usable.
    pub fn attrib_binding_enabled(&self) -> bool {
        self.vertex_arrays_enabled() && self.caps.vertex_attrib_binding && self.config.use_attrib_binding
    }

    // ── object registry ───────────────────────────────────────────────────

    /// Registers a GPU-backed object. Nothing is created until
    /// [`validate_object`](Self::validate_object) or the next context creation.
    pub fn register_object(&mut self, kind: GpuObjectKind, recreate: RecreateFn) -> ObjectId {
        self.registry.register(kind, recreate)
    }

    /// Registers an object recreated with the kind's default constructor.
    pub fn register_default(&mut self, kind: GpuObjectKind) -> ObjectId {
        self.registry.register(kind, Box::new(move |api| kind.create(api)))
    }

    /// Removes an object, deleting its handle if the context is live.
    pub fn unregister_object(&mut self, id: ObjectId) {
        let kind = self.registry.kind(id);
        let Some(handle) = self.registry.unregister(id, self.api.as_deref()) else { return };
        match kind {
            Some(GpuObjectKind::Buffer) => self.state.forget_buffer(handle),
            Some(GpuObjectKind::VertexArray) => self.state.forget_vertex_array(handle),
            _ => {}
        }
    }

    /// Returns the live handle of `id`, recreating it now if it is invalid.
    ///
    /// Used by components holding another GPU object that must not be used
    /// stale while `create_context` has not reached it yet.
    pub fn validate_object(&mut self, id: ObjectId) -> Option<RawHandle> {
        let api = self.api.as_deref()?;
        match self.registry.validate(id, api, self.generation) {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::warn!("failed to validate GPU object {id:?}: {err}");
                None
            }
        }
    }

    /// Context generation the object's current handle was created in.
    pub fn object_epoch(&self, id: ObjectId) -> Option<u64> {
        self.registry.epoch(id)
    }

    pub fn is_object_valid(&self, id: ObjectId) -> bool {
        self.registry.is_valid(id)
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    // ── streaming strategy ────────────────────────────────────────────────

    /// Strategy currently in effect.
    pub fn streaming_strategy(&self) -> StreamingStrategy {
        self.streaming
    }

    /// Requests a strategy; returns the one actually in effect after gating.
    pub fn set_streaming_strategy(&mut self, strategy: StreamingStrategy) -> StreamingStrategy {
        self.requested = Some(strategy);
        self.streaming = strategy;
        self.resolve_streaming()
    }

    /// Gates the current strategy against the live capabilities, downgrading
    /// one step at a time with a warning per step.
    pub(crate) fn resolve_streaming(&mut self) -> StreamingStrategy {
        while !self.streaming.is_supported(&self.caps) {
            let next = self.streaming.safer();
            log::warn!(
                "streaming strategy '{}' unsupported by driver; falling back to '{next}'",
                self.streaming
            );
            self.streaming = next;
            self.requested = Some(next);
        }
        self.streaming
    }

    /// Records that buffer mapping failed at runtime and permanently drops
    /// every strategy that maps.
    pub(crate) fn disable_buffer_mapping(&mut self, reason: &dyn std::fmt::Display) -> StreamingStrategy {
        if self.caps.map_buffer_range {
            log::warn!("buffer mapping unavailable ({reason}); disabling mapped streaming");
            self.caps.map_buffer_range = false;
        }
        self.resolve_streaming()
    }

    // ── cached binds ──────────────────────────────────────────────────────
    //
    // Each returns whether a GL call was issued. All are no-ops without a live
    // context.

    pub fn use_program(&mut self, program: Option<RawHandle>) -> bool {
        self.parts().is_some_and(|(api, state)| state.use_program(api, program))
    }

    pub fn bind_vertex_array(&mut self, vao: Option<RawHandle>) -> bool {
        self.parts().is_some_and(|(api, state)| state.bind_vertex_array(api, vao))
    }

    pub fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<RawHandle>) -> bool {
        self.parts().is_some_and(|(api, state)| state.bind_buffer(api, target, buffer))
    }

    pub fn bind_texture(&mut self, unit: usize, texture: Option<RawHandle>) -> bool {
        self.parts().is_some_and(|(api, state)| state.bind_texture(api, unit, texture))
    }

    pub fn bind_sampler(&mut self, unit: usize, sampler: Option<RawHandle>) -> bool {
        if !self.caps.sampler_objects {
            return false;
        }
        self.parts().is_some_and(|(api, state)| state.bind_sampler(api, unit, sampler))
    }

    pub fn set_blend(&mut self, mode: BlendMode) -> bool {
        self.parts().is_some_and(|(api, state)| state.set_blend(api, mode))
    }
}

impl Default for GlContext {
    fn default() -> Self {
        Self::new(GlConfig::default())
    }
}

impl std::fmt::Debug for GlContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlContext")
            .field("live", &self.is_live())
            .field("generation", &self.generation)
            .field("caps", &self.caps)
            .field("streaming", &self.streaming)
            .field("state", &self.state)
            .field("registry", &self.registry)
            .finish()
    }
}

/// Installs a context, attaching which generation failed to the error.
pub fn recreate_context(ctx: &mut GlContext, api: Box<dyn GlApi>) -> Result<u64> {
    ctx.delete_context();
    let next = ctx.generation() + 1;
    ctx.create_context(api)
        .with_context(|| format!("failed to create GL context generation {next}"))?;
    Ok(ctx.generation())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::gl::{GlVersion, RecordingGl};

    fn live(gl: &RecordingGl) -> GlContext {
        GlContext::with_api(Box::new(gl.clone()), GlConfig::default()).unwrap()
    }

    #[test]
    fn probes_fastest_strategy() {
        let ctx = live(&RecordingGl::new());
        assert_eq!(ctx.streaming_strategy(), StreamingStrategy::MapUnsynchronizedAppend);
        assert_eq!(ctx.generation(), 1);
    }

    #[test]
    fn manual_override_is_capability_gated() {
        let config = GlConfig {
            streaming: Some(StreamingStrategy::MapInvalidateFull),
            ..GlConfig::default()
        };
        let ctx = GlContext::with_api(Box::new(RecordingGl::legacy()), config).unwrap();
        assert_eq!(ctx.streaming_strategy(), StreamingStrategy::OrphanAndRespecify);
    }

    #[test]
    fn set_strategy_at_runtime() {
        let mut ctx = live(&RecordingGl::new());
        let s = ctx.set_streaming_strategy(StreamingStrategy::DiscardAndSubData);
        assert_eq!(s, StreamingStrategy::DiscardAndSubData);
        assert_eq!(ctx.streaming_strategy(), s);
    }

    #[test]
    fn rejects_ancient_drivers() {
        let gl = RecordingGl::with_version(GlVersion::desktop(1, 5));
        assert!(GlContext::with_api(Box::new(gl), GlConfig::default()).is_err());
    }

    #[test]
    fn context_loss_recreates_each_object_once() {
        let gl = RecordingGl::new();
        let mut ctx = live(&gl);
        let hits = Rc::new(Cell::new(0));

        let ids: Vec<_> = (0..4)
            .map(|_| {
                let hits = Rc::clone(&hits);
                ctx.register_object(
                    GpuObjectKind::Buffer,
                    Box::new(move |api| {
                        hits.set(hits.get() + 1);
                        api.create_buffer()
                    }),
                )
            })
            .collect();
        for &id in &ids {
            ctx.validate_object(id).unwrap();
        }
        assert_eq!(hits.get(), 4);

        let first = ctx.validate_object(ids[0]);
        ctx.bind_buffer(BufferTarget::Vertex, first);
        ctx.use_program(RawHandle::new(12));
        assert!(!ctx.state().is_reset());

        let api = ctx.delete_context().unwrap();
        assert!(!ctx.is_live());
        assert!(ids.iter().all(|&id| !ctx.is_object_valid(id)));
        assert!(ctx.state().is_reset());
        assert!(ctx.validate_object(ids[0]).is_none());

        ctx.create_context(api).unwrap();
        assert_eq!(hits.get(), 8);
        assert!(ctx.state().is_reset());
        assert!(ids.iter().all(|&id| ctx.object_epoch(id) == Some(2)));

        for &id in &ids {
            ctx.validate_object(id).unwrap();
        }
        assert_eq!(hits.get(), 8);
    }

    #[test]
    fn binds_are_noops_without_context() {
        let mut ctx = GlContext::default();
        assert!(!ctx.use_program(RawHandle::new(1)));
        assert!(!ctx.set_blend(BlendMode::Alpha));
        assert!(ctx.parts().is_none());
    }

    #[test]
    fn unregister_forgets_bound_buffer() {
        let gl = RecordingGl::new();
        let mut ctx = live(&gl);
        let id = ctx.register_default(GpuObjectKind::Buffer);
        let handle = ctx.validate_object(id);
        ctx.bind_buffer(BufferTarget::Vertex, handle);
        ctx.unregister_object(id);
        assert_eq!(ctx.state().buffer(BufferTarget::Vertex), None);
    }

    #[test]
    fn disabling_mapping_downgrades_permanently() {
        let gl = RecordingGl::new();
        let mut ctx = live(&gl);
        let s = ctx.disable_buffer_mapping(&"test");
        assert_eq!(s, StreamingStrategy::OrphanAndRespecify);

        let api = ctx.delete_context().unwrap();
        ctx.create_context(api).unwrap();
        assert_eq!(ctx.streaming_strategy(), StreamingStrategy::OrphanAndRespecify);
    }

    #[test]
    fn recreate_context_bumps_generation() {
        let gl = RecordingGl::new();
        let mut ctx = live(&gl);
        let generation = recreate_context(&mut ctx, Box::new(gl.clone())).unwrap();
        assert_eq!(generation, 2);
    }
}
