//! GPU mirror of a [`ByteStream`].

use std::rc::Rc;

use crate::gl::{
    BufferTarget, BufferUsage, GlApi, GlContext, GlError, GpuObjectKind, MapAccess, ObjectId,
    RawHandle,
};
use crate::shader::{AttributeTable, FormatError, VertexFormat};

use super::stream::{ByteStream, SharedStream};
use super::strategy::StreamingStrategy;

/// What one [`StreamingBuffer::update`] did.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UploadOutcome {
    /// GPU copy already matched.
    Clean,
    /// No live context; the buffer stays dirty.
    Deferred,
    /// Whole used range re-uploaded.
    Full { bytes: usize },
    /// Only newly appended bytes uploaded.
    Append { bytes: usize },
}

/// Running counters, mostly for debug overlays and tests.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct UploadStats {
    pub full_uploads: u64,
    pub append_uploads: u64,
    /// Fresh GPU allocations (`BufferData`).
    pub reallocations: u64,
    pub bytes_uploaded: u64,
    pub bytes_compacted: u64,
}

/// One GPU buffer object mirroring a caller-owned [`ByteStream`].
///
/// The GPU handle lives in the context's object registry, so it survives
/// context loss by being recreated and fully re-uploaded on the next
/// [`update`](Self::update). Call [`destroy`](Self::destroy) to release it.
#[derive(Debug)]
pub struct StreamingBuffer {
    stream: SharedStream,
    object: ObjectId,
    target: BufferTarget,
    usage: BufferUsage,
    /// Append-only buffers may use the mapped strategies.
    append_only: bool,
    gpu_capacity: usize,
    gpu_size: usize,
    /// Registry epoch the GPU bookkeeping above belongs to.
    epoch: Option<u64>,
    force_full: bool,
    format: Option<VertexFormat>,
    stats: UploadStats,
}

impl StreamingBuffer {
    pub fn new(
        ctx: &mut GlContext,
        stream: SharedStream,
        target: BufferTarget,
        usage: BufferUsage,
        append_only: bool,
    ) -> Self {
        let object = ctx.register_default(GpuObjectKind::Buffer);
        Self {
            stream,
            object,
            target,
            usage,
            append_only,
            gpu_capacity: 0,
            gpu_size: 0,
            epoch: None,
            force_full: true,
            format: None,
            stats: UploadStats::default(),
        }
    }

    /// Append-only vertex buffer laid out by a format string.
    pub fn vertex(ctx: &mut GlContext, stream: SharedStream, format: &str) -> Result<Self, FormatError> {
        let format = VertexFormat::parse(format)?;
        Ok(Self::with_format(ctx, stream, format))
    }

    pub fn with_format(ctx: &mut GlContext, stream: SharedStream, format: VertexFormat) -> Self {
        let mut buffer = Self::new(ctx, stream, BufferTarget::Vertex, BufferUsage::Stream, true);
        buffer.format = Some(format);
        buffer
    }

    /// Index buffer; never uses the mapped strategies.
    pub fn index(ctx: &mut GlContext, stream: SharedStream) -> Self {
        Self::new(ctx, stream, BufferTarget::Index, BufferUsage::Dynamic, false)
    }

    pub fn stream(&self) -> &SharedStream {
        &self.stream
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn target(&self) -> BufferTarget {
        self.target
    }

    pub fn is_append_only(&self) -> bool {
        self.append_only
    }

    pub fn format(&self) -> Option<&VertexFormat> {
        self.format.as_ref()
    }

    pub fn attributes(&self) -> Option<&AttributeTable> {
        self.format.as_ref().map(VertexFormat::attributes)
    }

    pub fn stride(&self) -> u32 {
        self.format.as_ref().map_or(0, VertexFormat::stride)
    }

    pub fn stats(&self) -> UploadStats {
        self.stats
    }

    /// True unless the GPU copy is known to equal the stream.
    pub fn is_dirty(&self) -> bool {
        self.force_full || self.stream.borrow().is_dirty()
    }

    pub fn mark_dirty(&mut self) {
        self.force_full = true;
    }

    /// Live GPU handle, recreating it first if the context was replaced.
    pub fn handle(&self, ctx: &mut GlContext) -> Option<RawHandle> {
        ctx.validate_object(self.object)
    }

    /// Releases the GPU object.
    pub fn destroy(self, ctx: &mut GlContext) {
        ctx.unregister_object(self.object);
    }

    /// The handle was recreated: the new object has no storage yet.
    fn on_context_recreate(&mut self, epoch: Option<u64>) {
        if self.epoch.is_some() {
            log::debug!("buffer {:?} recreated; scheduling full upload", self.object);
        }
        self.epoch = epoch;
        self.gpu_capacity = 0;
        self.gpu_size = 0;
        self.force_full = true;
    }

    // ── upload ────────────────────────────────────────────────────────────

    /// Brings the GPU copy up to date with the stream.
    ///
    /// Must run before any draw reading this buffer. Leaves the buffer bound
    /// to its target when something was uploaded.
    pub fn update(&mut self, ctx: &mut GlContext) -> UploadOutcome {
        let Some(handle) = ctx.validate_object(self.object) else {
            return UploadOutcome::Deferred;
        };
        let epoch = ctx.object_epoch(self.object);
        if epoch != self.epoch {
            self.on_context_recreate(epoch);
        }

        let stream = Rc::clone(&self.stream);
        let mut stream = stream.borrow_mut();
        if !self.force_full && !stream.is_dirty() {
            return UploadOutcome::Clean;
        }

        let strategy = if self.append_only {
            ctx.resolve_streaming()
        } else {
            StreamingStrategy::DiscardAndSubData
        };
        let divisor = ctx.config().waste_divisor;
        ctx.bind_buffer(self.target, Some(handle));

        let first = match ctx.api() {
            Some(api) => self.upload(api, &mut stream, strategy, divisor),
            None => return UploadOutcome::Deferred,
        };
        let outcome = match first {
            Ok(outcome) => outcome,
            Err(err) => {
                let fallback = ctx.disable_buffer_mapping(&err);
                let Some(api) = ctx.api() else { return UploadOutcome::Deferred };
                match self.upload(api, &mut stream, fallback, divisor) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        log::error!("buffer upload failed after fallback to '{fallback}': {err}");
                        return UploadOutcome::Deferred;
                    }
                }
            }
        };

        self.gpu_capacity = stream.capacity();
        self.gpu_size = stream.len();
        self.force_full = false;
        stream.mark_synced();

        match outcome {
            UploadOutcome::Full { bytes } => {
                self.stats.full_uploads += 1;
                self.stats.bytes_uploaded += bytes as u64;
            }
            UploadOutcome::Append { bytes } => {
                self.stats.append_uploads += 1;
                self.stats.bytes_uploaded += bytes as u64;
            }
            UploadOutcome::Clean | UploadOutcome::Deferred => {}
        }
        outcome
    }

    fn upload(
        &mut self,
        api: &dyn GlApi,
        stream: &mut ByteStream,
        strategy: StreamingStrategy,
        waste_divisor: usize,
    ) -> Result<UploadOutcome, GlError> {
        let resized = self.force_full || stream.capacity() != self.gpu_capacity;

        match strategy {
            StreamingStrategy::MapUnsynchronizedAppend => {
                let used = stream.len();
                let appended_only =
                    used >= self.gpu_size && stream.dirty_from().is_none_or(|d| d >= self.gpu_size);
                // A zero divisor never falls back on waste.
                let wasteful = stream.unused_bytes().saturating_mul(waste_divisor) > stream.capacity();

                if !resized && appended_only && !wasteful {
                    let delta = &stream.as_bytes()[self.gpu_size..used];
                    if !delta.is_empty() {
                        api.map_write(
                            self.target,
                            self.gpu_size,
                            delta,
                            MapAccess::UNSYNCHRONIZED | MapAccess::INVALIDATE_RANGE,
                        )?;
                    }
                    return Ok(UploadOutcome::Append { bytes: delta.len() });
                }
                if wasteful {
                    log::trace!(
                        "{} of {} bytes wasted; respecifying",
                        stream.unused_bytes(),
                        stream.capacity()
                    );
                }
                self.compact(stream);
                Ok(self.respecify(api, stream))
            }
            StreamingStrategy::OrphanAndRespecify => {
                self.compact(stream);
                Ok(self.respecify(api, stream))
            }
            StreamingStrategy::MapInvalidateFull => {
                self.compact(stream);
                if resized {
                    return Ok(self.respecify(api, stream));
                }
                let bytes = stream.as_bytes();
                if !bytes.is_empty() {
                    api.map_write(self.target, 0, bytes, MapAccess::INVALIDATE_BUFFER)?;
                }
                Ok(UploadOutcome::Full { bytes: bytes.len() })
            }
            StreamingStrategy::DiscardAndSubData => {
                self.compact(stream);
                if resized {
                    return Ok(self.respecify(api, stream));
                }
                let bytes = stream.as_bytes();
                if !bytes.is_empty() {
                    api.buffer_sub_data(self.target, 0, bytes);
                }
                Ok(UploadOutcome::Full { bytes: bytes.len() })
            }
        }
    }

    fn compact(&mut self, stream: &mut ByteStream) {
        self.stats.bytes_compacted += stream.compact() as u64;
    }

    /// Fresh allocation sized to the stream's capacity, then fill.
    fn respecify(&mut self, api: &dyn GlApi, stream: &ByteStream) -> UploadOutcome {
        api.buffer_data(self.target, stream.capacity(), self.usage);
        let bytes = stream.as_bytes();
        if !bytes.is_empty() {
            api.buffer_sub_data(self.target, 0, bytes);
        }
        self.stats.reallocations += 1;
        UploadOutcome::Full { bytes: bytes.len() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ByteStream;
    use crate::gl::{GlCall, GlConfig, GlVersion, RecordingGl};

    fn context(gl: &RecordingGl, streaming: Option<StreamingStrategy>) -> GlContext {
        let config = GlConfig { streaming, ..GlConfig::default() };
        GlContext::with_api(Box::new(gl.clone()), config).unwrap()
    }

    fn maps(calls: &[GlCall]) -> Vec<(usize, usize)> {
        calls
            .iter()
            .filter_map(|c| match c {
                GlCall::MapWrite { offset, data, .. } => Some((*offset, data.len())),
                _ => None,
            })
            .collect()
    }

    fn allocations(calls: &[GlCall]) -> usize {
        calls.iter().filter(|c| matches!(c, GlCall::BufferData { .. })).count()
    }

    #[test]
    fn append_path_maps_only_new_bytes() {
        let gl = RecordingGl::new();
        let mut ctx = context(&gl, Some(StreamingStrategy::MapUnsynchronizedAppend));
        let stream = ByteStream::shared();
        let mut buf = StreamingBuffer::vertex(&mut ctx, stream.clone(), "a_pos:2f").unwrap();

        stream.borrow_mut().push_bytes(&[1; 16]);
        assert_eq!(buf.update(&mut ctx), UploadOutcome::Full { bytes: 16 });

        gl.log().clear();
        for k in 1..=3u8 {
            stream.borrow_mut().push_bytes(&[k; 8]);
            assert_eq!(buf.update(&mut ctx), UploadOutcome::Append { bytes: 8 });
        }
        let calls = gl.log().take();
        assert_eq!(maps(&calls), vec![(16, 8), (24, 8), (32, 8)]);
        assert_eq!(allocations(&calls), 0);
        assert!(calls.iter().all(|c| match c {
            GlCall::MapWrite { access, .. } =>
                *access == MapAccess::UNSYNCHRONIZED | MapAccess::INVALIDATE_RANGE,
            _ => true,
        }));

        assert_eq!(buf.update(&mut ctx), UploadOutcome::Clean);
        let handle = buf.handle(&mut ctx).unwrap();
        let gpu = gl.buffer_contents(handle).unwrap();
        assert_eq!(&gpu[..40], stream.borrow().as_bytes());
        assert_eq!(buf.stats().append_uploads, 3);
    }

    #[test]
    fn waste_threshold_forces_respecify() {
        let gl = RecordingGl::new();
        let mut ctx = context(&gl, Some(StreamingStrategy::MapUnsynchronizedAppend));
        let stream = ByteStream::shared();
        let mut buf = StreamingBuffer::vertex(&mut ctx, stream.clone(), "a_pos:2f").unwrap();

        stream.borrow_mut().push_bytes(&[0; 128]);
        buf.update(&mut ctx);

        // 64 of 256 bytes wasted is still within a quarter.
        stream.borrow_mut().invalidate(0, 64, None);
        stream.borrow_mut().push_bytes(&[1; 8]);
        assert_eq!(buf.update(&mut ctx), UploadOutcome::Append { bytes: 8 });
        assert_eq!(stream.borrow().len(), 136);

        gl.log().clear();
        stream.borrow_mut().invalidate(64, 8, None);
        stream.borrow_mut().push_bytes(&[2; 8]);
        assert_eq!(buf.update(&mut ctx), UploadOutcome::Full { bytes: 72 });
        assert_eq!(stream.borrow().len(), 72);
        assert_eq!(stream.borrow().unused_bytes(), 0);

        let calls = gl.log().take();
        assert_eq!(allocations(&calls), 1);
        assert!(maps(&calls).is_empty());

        // The append cursor restarted at the compacted size.
        stream.borrow_mut().push_bytes(&[3; 4]);
        buf.update(&mut ctx);
        assert_eq!(maps(&gl.log().take()), vec![(72, 4)]);
    }

    #[test]
    fn growth_reallocates() {
        let gl = RecordingGl::new();
        let mut ctx = context(&gl, Some(StreamingStrategy::MapUnsynchronizedAppend));
        let stream = ByteStream::shared();
        let mut buf = StreamingBuffer::vertex(&mut ctx, stream.clone(), "a_pos:2f").unwrap();
        stream.borrow_mut().push_bytes(&[0; 200]);
        buf.update(&mut ctx);

        gl.log().clear();
        stream.borrow_mut().push_bytes(&[0; 100]);
        assert_eq!(buf.update(&mut ctx), UploadOutcome::Full { bytes: 300 });
        let calls = gl.log().take();
        assert!(calls.contains(&GlCall::BufferData {
            target: BufferTarget::Vertex,
            size: 512,
            usage: BufferUsage::Stream,
        }));
    }

    #[test]
    fn map_invalidate_maps_whole_range() {
        let gl = RecordingGl::new();
        let mut ctx = context(&gl, Some(StreamingStrategy::MapInvalidateFull));
        let stream = ByteStream::shared();
        let mut buf = StreamingBuffer::vertex(&mut ctx, stream.clone(), "a_pos:2f").unwrap();
        stream.borrow_mut().push_bytes(&[0; 32]);
        buf.update(&mut ctx);

        gl.log().clear();
        stream.borrow_mut().invalidate(8, 8, None);
        stream.borrow_mut().push_bytes(&[1; 8]);
        assert_eq!(buf.update(&mut ctx), UploadOutcome::Full { bytes: 32 });
        let calls = gl.log().take();
        assert_eq!(maps(&calls), vec![(0, 32)]);
        assert_eq!(allocations(&calls), 0);
    }

    #[test]
    fn orphan_respecifies_every_time() {
        let gl = RecordingGl::new();
        let mut ctx = context(&gl, Some(StreamingStrategy::OrphanAndRespecify));
        let stream = ByteStream::shared();
        let mut buf = StreamingBuffer::vertex(&mut ctx, stream.clone(), "a_pos:2f").unwrap();
        for _ in 0..3 {
            stream.borrow_mut().push_bytes(&[0; 8]);
            buf.update(&mut ctx);
        }
        assert_eq!(allocations(&gl.log().calls()), 3);
        assert_eq!(buf.stats().reallocations, 3);
    }

    #[test]
    fn index_buffers_use_sub_data() {
        let gl = RecordingGl::new();
        let mut ctx = context(&gl, Some(StreamingStrategy::MapUnsynchronizedAppend));
        let stream = ByteStream::shared();
        let mut ibo = StreamingBuffer::index(&mut ctx, stream.clone());
        stream.borrow_mut().extend(&[0u16, 1, 2]);
        ibo.update(&mut ctx);

        gl.log().clear();
        stream.borrow_mut().extend(&[2u16, 3, 0]);
        assert_eq!(ibo.update(&mut ctx), UploadOutcome::Full { bytes: 12 });
        let calls = gl.log().take();
        assert!(maps(&calls).is_empty());
        assert!(calls.iter().any(|c| matches!(
            c,
            GlCall::BufferSubData { target: BufferTarget::Index, offset: 0, data } if data.len() == 12
        )));
    }

    #[test]
    fn map_failure_downgrades_globally() {
        let gl = RecordingGl::new();
        let mut ctx = context(&gl, None);
        assert_eq!(ctx.streaming_strategy(), StreamingStrategy::MapUnsynchronizedAppend);
        let stream = ByteStream::shared();
        let mut buf = StreamingBuffer::vertex(&mut ctx, stream.clone(), "a_pos:2f").unwrap();
        stream.borrow_mut().push_bytes(&[0; 16]);
        buf.update(&mut ctx);

        gl.set_fail_maps(true);
        stream.borrow_mut().push_bytes(&[7; 16]);
        assert_eq!(buf.update(&mut ctx), UploadOutcome::Full { bytes: 32 });
        assert_eq!(ctx.streaming_strategy(), StreamingStrategy::OrphanAndRespecify);
        assert!(!ctx.caps().map_buffer_range);
        assert!(!buf.is_dirty());

        let handle = buf.handle(&mut ctx).unwrap();
        assert_eq!(gl.buffer_contents(handle).unwrap()[16..32], [7; 16]);
    }

    #[test]
    fn legacy_driver_never_maps() {
        let gl = RecordingGl::with_version(GlVersion::desktop(2, 1));
        let mut ctx = context(&gl, Some(StreamingStrategy::MapUnsynchronizedAppend));
        assert_eq!(ctx.streaming_strategy(), StreamingStrategy::OrphanAndRespecify);

        let stream = ByteStream::shared();
        let mut buf = StreamingBuffer::vertex(&mut ctx, stream.clone(), "a_pos:2f").unwrap();
        stream.borrow_mut().push_bytes(&[0; 16]);
        buf.update(&mut ctx);
        assert!(maps(&gl.log().calls()).is_empty());
    }

    #[test]
    fn context_loss_reuploads_from_cpu_copy() {
        let gl = RecordingGl::new();
        let mut ctx = context(&gl, Some(StreamingStrategy::MapUnsynchronizedAppend));
        let stream = ByteStream::shared();
        let mut buf = StreamingBuffer::vertex(&mut ctx, stream.clone(), "a_pos:2f").unwrap();
        stream.borrow_mut().push_bytes(&[5; 24]);
        buf.update(&mut ctx);
        let old = buf.handle(&mut ctx).unwrap();

        let api = ctx.delete_context().unwrap();
        assert_eq!(buf.update(&mut ctx), UploadOutcome::Deferred);
        ctx.create_context(api).unwrap();

        gl.log().clear();
        assert_eq!(buf.update(&mut ctx), UploadOutcome::Full { bytes: 24 });
        let new = buf.handle(&mut ctx).unwrap();
        assert_ne!(old, new);
        assert_eq!(gl.buffer_contents(new).unwrap()[..24], [5; 24]);
        assert_eq!(allocations(&gl.log().calls()), 1);
    }

    #[test]
    fn destroy_releases_the_handle() {
        let gl = RecordingGl::new();
        let mut ctx = context(&gl, None);
        let buf = StreamingBuffer::index(&mut ctx, ByteStream::shared());
        let handle = buf.handle(&mut ctx).unwrap();
        buf.destroy(&mut ctx);
        assert!(gl.log().calls().contains(&GlCall::DeleteBuffer(handle.get())));
        assert!(ctx.registry().is_empty());
    }
}
