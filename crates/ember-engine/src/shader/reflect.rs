use crate::gl::{GlContext, GlError, RawHandle};

use super::attribs::AttributeTable;
use super::uniforms::UniformTable;

/// What a linked program consumes, as reported by the driver.
#[derive(Debug, Clone, Default)]
pub struct ShaderInterface {
    /// Active attributes with their shader-assigned indices.
    pub attributes: AttributeTable,
    /// Active uniforms holding the driver's current values. Use it as the
    /// `active` snapshot when binding material tables.
    pub uniforms: UniformTable,
}

/// Builds the attribute layout and uniform snapshot of a linked program.
///
/// Variables without a location (built-ins, block members) and types with no
/// table representation are skipped.
pub fn reflect_program(ctx: &GlContext, program: RawHandle) -> Result<ShaderInterface, GlError> {
    let api = ctx.api().ok_or(GlError::ContextLost)?;
    let mut interface = ShaderInterface::default();

    for var in api.active_attributes(program) {
        let Some(index) = var.location else { continue };
        interface.attributes.init_attrib(&var.name, var.gl_type, index);
    }

    for var in api.active_uniforms(program) {
        let Some(location) = var.location else { continue };
        interface
            .uniforms
            .init_uniform(api, &var.name, program, location, var.size, var.gl_type);
    }

    log::debug!(
        "reflected program {}: {} attributes, {} uniforms",
        program.get(),
        interface.attributes.len(),
        interface.uniforms.len()
    );
    Ok(interface)
}
