use super::api::GlApi;

/// Driver version as reported by the context.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct GlVersion {
    pub major: u32,
    pub minor: u32,
    /// OpenGL ES (or WebGL) rather than desktop GL.
    pub embedded: bool,
}

impl GlVersion {
    pub const fn desktop(major: u32, minor: u32) -> Self {
        Self { major, minor, embedded: false }
    }

    pub const fn embedded(major: u32, minor: u32) -> Self {
        Self { major, minor, embedded: true }
    }

    /// Returns true if this is at least `desktop` on desktop GL or at least
    /// `es` on GLES. `None` means the feature is never core on that flavour.
    pub fn at_least(self, desktop: (u32, u32), es: Option<(u32, u32)>) -> bool {
        let want = if self.embedded {
            match es {
                Some(v) => v,
                None => return false,
            }
        } else {
            desktop
        };
        (self.major, self.minor) >= want
    }
}

/// Optional driver features the core adapts to.
///
/// Derived once per context generation. Everything not listed here is assumed
/// present on any driver the engine runs on (GL 2.1 / ES 2.0 baseline).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct GlCaps {
    pub vertex_array_objects: bool,
    /// Separate attribute format and buffer binding (`glVertexAttribFormat`).
    pub vertex_attrib_binding: bool,
    /// `glMapBufferRange` with invalidate/unsynchronized bits.
    pub map_buffer_range: bool,
    pub instancing: bool,
    pub sampler_objects: bool,
    /// `glVertexAttribIPointer` and unsigned integer uniforms.
    pub integer_attributes: bool,
    /// Clamped to 32 so attribute enable masks fit a `u32`.
    pub max_vertex_attribs: u32,
}

impl GlCaps {
    /// Mask width limit for enabled-attribute bookkeeping.
    pub const MAX_TRACKED_ATTRIBS: u32 = 32;

    /// Capabilities of a baseline GL 2.1 / ES 2.0 driver with no extensions.
    pub const fn baseline() -> Self {
        Self {
            vertex_array_objects: false,
            vertex_attrib_binding: false,
            map_buffer_range: false,
            instancing: false,
            sampler_objects: false,
            integer_attributes: false,
            max_vertex_attribs: 8,
        }
    }

    pub fn from_parts(version: GlVersion, has_ext: impl Fn(&str) -> bool, max_attribs: u32) -> Self {
        let vertex_array_objects = version.at_least((3, 0), Some((3, 0)))
            || has_ext("GL_ARB_vertex_array_object")
            || has_ext("GL_OES_vertex_array_object");

        let map_buffer_range = version.at_least((3, 0), Some((3, 0)))
            || has_ext("GL_ARB_map_buffer_range")
            || has_ext("GL_EXT_map_buffer_range");

        let vertex_attrib_binding = vertex_array_objects
            && (version.at_least((4, 3), Some((3, 1))) || has_ext("GL_ARB_vertex_attrib_binding"));

        let instancing = version.at_least((3, 3), Some((3, 0)))
            || has_ext("GL_ARB_instanced_arrays")
            || has_ext("GL_EXT_instanced_arrays");

        let sampler_objects =
            version.at_least((3, 3), Some((3, 0))) || has_ext("GL_ARB_sampler_objects");

        let integer_attributes = version.at_least((3, 0), Some((3, 0)));

        Self {
            vertex_array_objects,
            vertex_attrib_binding,
            map_buffer_range,
            instancing,
            sampler_objects,
            integer_attributes,
            max_vertex_attribs: max_attribs.min(Self::MAX_TRACKED_ATTRIBS),
        }
    }

    /// Probes a live backend.
    pub fn detect(api: &dyn GlApi) -> Self {
        Self::from_parts(api.version(), |ext| api.has_extension(ext), api.max_vertex_attribs())
    }
}

impl Default for GlCaps {
    fn default() -> Self {
        Self::baseline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_ext(_: &str) -> bool {
        false
    }

    #[test]
    fn desktop_45_has_everything() {
        let caps = GlCaps::from_parts(GlVersion::desktop(4, 5), no_ext, 16);
        assert!(caps.vertex_array_objects);
        assert!(caps.vertex_attrib_binding);
        assert!(caps.map_buffer_range);
        assert!(caps.instancing);
        assert!(caps.sampler_objects);
        assert_eq!(caps.max_vertex_attribs, 16);
    }

    #[test]
    fn gles2_is_baseline_without_extensions() {
        let caps = GlCaps::from_parts(GlVersion::embedded(2, 0), no_ext, 8);
        assert_eq!(caps, GlCaps::baseline());
    }

    #[test]
    fn gles2_picks_up_oes_vao() {
        let caps =
            GlCaps::from_parts(GlVersion::embedded(2, 0), |e| e == "GL_OES_vertex_array_object", 8);
        assert!(caps.vertex_array_objects);
        assert!(!caps.vertex_attrib_binding);
        assert!(!caps.map_buffer_range);
    }

    #[test]
    fn gles31_has_attrib_binding() {
        let caps = GlCaps::from_parts(GlVersion::embedded(3, 1), no_ext, 16);
        assert!(caps.vertex_attrib_binding);
    }

    #[test]
    fn attrib_count_is_clamped_to_mask_width() {
        let caps = GlCaps::from_parts(GlVersion::desktop(4, 6), no_ext, 64);
        assert_eq!(caps.max_vertex_attribs, 32);
    }
}
