mod attribs;
mod format;
mod name;
mod reflect;
mod uniforms;

pub use attribs::{Attrib, AttribFlags, AttribType, AttributeTable};
pub use format::{FormatError, VertexFormat};
pub use name::{base_name, NameHash};
pub use reflect::{reflect_program, ShaderInterface};
pub use uniforms::{ScalarType, UniformInfo, UniformShape, UniformTable, UniformValue};
