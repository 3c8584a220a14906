mod state;

pub use state::{SharedBuffer, VertexState, MAX_VERTEX_BUFFERS};
