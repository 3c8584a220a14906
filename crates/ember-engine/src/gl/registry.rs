//! Arena of GPU-backed objects that must survive context loss.
//!
//! Each record owns the driver handle of one object plus the closure that
//! recreates it. Owners keep only an [`ObjectId`]; they never see a handle from
//! a dead context because `delete_context` drops every handle at once.

use super::api::{GlApi, RawHandle};
use super::error::GlError;

/// Kind of driver object behind a record; decides how the handle is released.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum GpuObjectKind {
    Buffer,
    VertexArray,
    Texture,
    Sampler,
}

impl GpuObjectKind {
    /// Default recreation for objects with no extra GPU-side setup.
    pub fn create(self, api: &dyn GlApi) -> Result<RawHandle, GlError> {
        match self {
            GpuObjectKind::Buffer => api.create_buffer(),
            GpuObjectKind::VertexArray => api.create_vertex_array(),
            GpuObjectKind::Texture => api.create_texture(),
            GpuObjectKind::Sampler => api.create_sampler(),
        }
    }

    fn delete(self, api: &dyn GlApi, handle: RawHandle) {
        match self {
            GpuObjectKind::Buffer => api.delete_buffer(handle),
            GpuObjectKind::VertexArray => api.delete_vertex_array(handle),
            GpuObjectKind::Texture => api.delete_texture(handle),
            GpuObjectKind::Sampler => api.delete_sampler(handle),
        }
    }
}

/// Recreation callback. Runs with the live function table, exactly once per
/// context generation in which the object is used.
pub type RecreateFn = Box<dyn FnMut(&dyn GlApi) -> Result<RawHandle, GlError>>;

/// Stable identity of a registered object.
///
/// The stamp detects reuse of an arena slot after `unregister`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ObjectId {
    index: u32,
    stamp: u32,
}

struct Record {
    kind: GpuObjectKind,
    handle: Option<RawHandle>,
    /// Context generation `handle` was created in.
    epoch: u64,
    recreate: RecreateFn,
}

impl Record {
    fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    fn rebuild(&mut self, api: &dyn GlApi, generation: u64) -> Result<RawHandle, GlError> {
        let handle = (self.recreate)(api)?;
        self.handle = Some(handle);
        self.epoch = generation;
        Ok(handle)
    }
}

struct Slot {
    stamp: u32,
    record: Option<Record>,
}

#[derive(Default)]
pub struct ObjectRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an invalid record. The object is created on first validation.
    pub fn register(&mut self, kind: GpuObjectKind, recreate: RecreateFn) -> ObjectId {
        let record = Record { kind, handle: None, epoch: 0, recreate };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.record = Some(record);
            return ObjectId { index, stamp: slot.stamp };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot { stamp: 0, record: Some(record) });
        ObjectId { index, stamp: 0 }
    }

    /// Removes a record, deleting its handle through `api` when one is live.
    ///
    /// Returns the released handle, if any. Stale ids are ignored.
    pub fn unregister(&mut self, id: ObjectId, api: Option<&dyn GlApi>) -> Option<RawHandle> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.stamp != id.stamp {
            return None;
        }
        let record = slot.record.take()?;
        slot.stamp = slot.stamp.wrapping_add(1);
        self.free.push(id.index);

        let handle = record.handle?;
        if let Some(api) = api {
            record.kind.delete(api, handle);
        }
        Some(handle)
    }

    fn record(&self, id: ObjectId) -> Option<&Record> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.stamp != id.stamp {
            return None;
        }
        slot.record.as_ref()
    }

    fn record_mut(&mut self, id: ObjectId) -> Option<&mut Record> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.stamp != id.stamp {
            return None;
        }
        slot.record.as_mut()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.record(id).is_some()
    }

    pub fn is_valid(&self, id: ObjectId) -> bool {
        self.record(id).is_some_and(Record::is_valid)
    }

    pub fn handle(&self, id: ObjectId) -> Option<RawHandle> {
        self.record(id).and_then(|r| r.handle)
    }

    pub fn kind(&self, id: ObjectId) -> Option<GpuObjectKind> {
        self.record(id).map(|r| r.kind)
    }

    /// Context generation the object's current handle belongs to.
    pub fn epoch(&self, id: ObjectId) -> Option<u64> {
        self.record(id).filter(|r| r.is_valid()).map(|r| r.epoch)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.record.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks every record invalid without touching the driver; the context the
    /// handles belonged to is already gone.
    pub fn invalidate_all(&mut self) -> usize {
        let mut n = 0;
        for record in self.slots.iter_mut().filter_map(|s| s.record.as_mut()) {
            if record.handle.take().is_some() {
                n += 1;
            }
        }
        n
    }

    /// Recreates every invalid record. Failures stay invalid and are retried
    /// by the next `validate`.
    pub fn recreate_invalid(&mut self, api: &dyn GlApi, generation: u64) -> usize {
        let mut n = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(record) = slot.record.as_mut() else { continue };
            if record.is_valid() {
                continue;
            }
            match record.rebuild(api, generation) {
                Ok(_) => n += 1,
                Err(err) => log::warn!("failed to recreate {:?} #{index}: {err}", record.kind),
            }
        }
        n
    }

    /// Returns the live handle for `id`, recreating it first if needed.
    pub fn validate(
        &mut self,
        id: ObjectId,
        api: &dyn GlApi,
        generation: u64,
    ) -> Result<RawHandle, GlError> {
        let record = self.record_mut(id).ok_or(GlError::ContextLost)?;
        match record.handle {
            Some(handle) => Ok(handle),
            None => record.rebuild(api, generation),
        }
    }
}

impl std::fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("live", &self.len())
            .field("free", &self.free.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::gl::{GlCall, RecordingGl};

    fn counting(kind: GpuObjectKind, counter: &Rc<Cell<u32>>) -> RecreateFn {
        let counter = Rc::clone(counter);
        Box::new(move |api| {
            counter.set(counter.get() + 1);
            kind.create(api)
        })
    }

    #[test]
    fn register_is_lazy() {
        let gl = RecordingGl::new();
        let mut reg = ObjectRegistry::new();
        let hits = Rc::new(Cell::new(0));
        let id = reg.register(GpuObjectKind::Buffer, counting(GpuObjectKind::Buffer, &hits));
        assert!(!reg.is_valid(id));
        assert_eq!(hits.get(), 0);

        let handle = reg.validate(id, &gl, 1).unwrap();
        assert_eq!(reg.handle(id), Some(handle));
        assert_eq!(reg.epoch(id), Some(1));
        reg.validate(id, &gl, 1).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn recreate_invalid_runs_each_callback_once() {
        let gl = RecordingGl::new();
        let mut reg = ObjectRegistry::new();
        let hits = Rc::new(Cell::new(0));
        let ids: Vec<_> = (0..3)
            .map(|_| reg.register(GpuObjectKind::Texture, counting(GpuObjectKind::Texture, &hits)))
            .collect();
        for &id in &ids {
            reg.validate(id, &gl, 1).unwrap();
        }
        assert_eq!(hits.get(), 3);

        assert_eq!(reg.invalidate_all(), 3);
        assert!(ids.iter().all(|&id| !reg.is_valid(id)));

        assert_eq!(reg.recreate_invalid(&gl, 2), 3);
        assert_eq!(reg.recreate_invalid(&gl, 2), 0);
        assert_eq!(hits.get(), 6);
        assert!(ids.iter().all(|&id| reg.epoch(id) == Some(2)));
    }

    #[test]
    fn unregister_deletes_and_recycles_slot() {
        let gl = RecordingGl::new();
        let mut reg = ObjectRegistry::new();
        let a = reg.register(GpuObjectKind::Buffer, Box::new(|api| api.create_buffer()));
        let handle = reg.validate(a, &gl, 1).unwrap();

        assert_eq!(reg.unregister(a, Some(&gl)), Some(handle));
        assert!(gl.log().calls().contains(&GlCall::DeleteBuffer(handle.get())));
        assert!(!reg.contains(a));

        let b = reg.register(GpuObjectKind::Sampler, Box::new(|api| api.create_sampler()));
        assert_ne!(a, b);
        assert!(reg.unregister(a, Some(&gl)).is_none());
        assert!(reg.contains(b));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn failed_recreation_stays_invalid() {
        let gl = RecordingGl::new();
        let mut reg = ObjectRegistry::new();
        let id = reg.register(
            GpuObjectKind::Buffer,
            Box::new(|_| Err(GlError::ObjectCreation("out of names".into()))),
        );
        assert_eq!(reg.recreate_invalid(&gl, 1), 0);
        assert!(!reg.is_valid(id));
        assert!(reg.validate(id, &gl, 1).is_err());
    }
}
