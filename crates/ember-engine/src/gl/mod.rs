//! GPU function table, capability probing, binding cache and the
//! context-generation object registry.

mod api;
mod caps;
mod context;
pub mod enums;
mod error;
#[cfg(not(target_arch = "wasm32"))]
mod glow_backend;
mod recording;
mod registry;
mod state;

pub use api::{
    ActiveVariable, AttribFormat, BufferTarget, BufferUsage, GlApi, MapAccess, RawHandle,
    UniformCall,
};
pub use caps::{GlCaps, GlVersion};
pub use context::{recreate_context, GlConfig, GlContext};
pub use error::GlError;
#[cfg(not(target_arch = "wasm32"))]
pub use glow_backend::GlowApi;
pub use recording::{CallLog, GlCall, RecordingGl};
pub use registry::{GpuObjectKind, ObjectId, ObjectRegistry, RecreateFn};
pub use state::{BlendMode, RenderState, TEXTURE_UNITS};
