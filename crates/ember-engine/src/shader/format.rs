//! Vertex format strings.
//!
//! `"a_pos:2f|a_col:4BN|a_offset:2f/"` declares one attribute per `|`
//! separated item: `name:<count><type>[flags]`. Offsets accumulate in
//! declaration order, each attribute padded to 4 bytes.

use std::fmt;
use std::str::FromStr;

use super::attribs::{Attrib, AttribFlags, AttribType, AttributeTable};
use super::name::NameHash;

/// A malformed vertex format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatError {
    pub message: String,
    /// Byte offset into the format string.
    pub position: usize,
}

impl FormatError {
    pub(crate) fn new(msg: impl Into<String>, position: usize) -> Self {
        Self { message: msg.into(), position }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vertex format error at byte {}: {}", self.position, self.message)
    }
}

impl std::error::Error for FormatError {}

/// Parsed per-buffer vertex layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexFormat {
    attributes: AttributeTable,
    names: Vec<String>,
    stride: u32,
}

impl VertexFormat {
    pub fn parse(source: &str) -> Result<Self, FormatError> {
        if source.trim().is_empty() {
            return Err(FormatError::new("empty vertex format", 0));
        }

        let mut attributes = AttributeTable::new();
        let mut names: Vec<String> = Vec::new();
        let mut stride = 0u32;
        let mut start = 0usize;

        for item in source.split('|') {
            let (name, count, gpu_type, flags) = parse_item(item, start)?;
            if names.iter().any(|n| n == name) {
                return Err(FormatError::new(format!("duplicate attribute '{name}'"), start));
            }

            let attrib = Attrib {
                name_hash: NameHash::of(name),
                gpu_type,
                count,
                offset: stride,
                flags,
                bound_index: None,
            };
            stride += attrib.padded_size();
            attributes.set_format(attrib.name_hash, gpu_type, count, attrib.offset, flags);
            names.push(name.to_string());
            start += item.len() + 1;
        }

        Ok(Self { attributes, names, stride })
    }

    pub fn attributes(&self) -> &AttributeTable {
        &self.attributes
    }

    /// Bytes per vertex.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Attribute names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn is_instanced(&self) -> bool {
        self.attributes.iter().any(Attrib::is_instanced)
    }
}

fn parse_item(item: &str, at: usize) -> Result<(&str, u8, AttribType, AttribFlags), FormatError> {
    let Some((name, elem)) = item.split_once(':') else {
        return Err(FormatError::new(format!("expected 'name:<count><type>', found '{item}'"), at));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(FormatError::new("attribute name is empty", at));
    }

    let elem_at = at + item.find(':').map_or(0, |i| i + 1);
    let mut chars = elem.trim_end().char_indices();

    let count = match chars.next() {
        Some((_, c @ '1'..='4')) => c as u8 - b'0',
        Some((i, c)) => {
            return Err(FormatError::new(format!("count must be 1-4, found '{c}'"), elem_at + i));
        }
        None => return Err(FormatError::new(format!("'{name}' has no element format"), elem_at)),
    };

    let gpu_type = match chars.next() {
        Some((i, c)) => AttribType::from_code(c)
            .ok_or_else(|| FormatError::new(format!("unknown type code '{c}'"), elem_at + i))?,
        None => return Err(FormatError::new(format!("'{name}' has no type code"), elem_at + 1)),
    };
    if gpu_type.is_packed() && count != 4 {
        return Err(FormatError::new("packed 10-10-10-2 attributes need count 4", elem_at));
    }

    let mut flags = AttribFlags::empty();
    for (i, c) in chars {
        let flag = match c {
            'N' => AttribFlags::NORMALIZED,
            'I' => AttribFlags::INTEGRAL,
            '/' => AttribFlags::INSTANCED,
            _ => return Err(FormatError::new(format!("unknown flag '{c}'"), elem_at + i)),
        };
        if flags.contains(flag) {
            return Err(FormatError::new(format!("repeated flag '{c}'"), elem_at + i));
        }
        flags |= flag;
    }

    if flags.contains(AttribFlags::INTEGRAL) {
        if !gpu_type.is_integer() {
            return Err(FormatError::new("integral flag needs an integer type", elem_at));
        }
        if flags.contains(AttribFlags::NORMALIZED) {
            return Err(FormatError::new("attribute cannot be both normalized and integral", elem_at));
        }
    }

    Ok((name, count, gpu_type, flags))
}

impl FromStr for VertexFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VertexFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, a)) in self.names.iter().zip(self.attributes.iter()).enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            write!(f, "{name}:{}{}", a.count, a.gpu_type.code())?;
            if a.flags.contains(AttribFlags::NORMALIZED) {
                f.write_str("N")?;
            }
            if a.flags.contains(AttribFlags::INTEGRAL) {
                f.write_str("I")?;
            }
            if a.flags.contains(AttribFlags::INSTANCED) {
                f.write_str("/")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_position_and_byte_color() {
        let fmt = VertexFormat::parse("a_pos:2s|a_col:4BN").unwrap();
        assert_eq!(fmt.stride(), 8);

        let pos = fmt.attributes().get("a_pos").unwrap();
        assert_eq!((pos.gpu_type, pos.count, pos.offset), (AttribType::I16, 2, 0));
        assert!(pos.flags.is_empty());

        let col = fmt.attributes().get("a_col").unwrap();
        assert_eq!((col.gpu_type, col.count, col.offset), (AttribType::U8, 4, 4));
        assert_eq!(col.flags, AttribFlags::NORMALIZED);
    }

    #[test]
    fn offsets_round_up_to_four() {
        let fmt: VertexFormat = "a_pos:3f|a_uv:3S|a_id:1II|a_off:2f/".parse().unwrap();
        let offsets: Vec<u32> = fmt.attributes().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 20, 24]);
        assert_eq!(fmt.stride(), 32);
        assert!(fmt.is_instanced());
        assert_eq!(fmt.to_string(), "a_pos:3f|a_uv:3S|a_id:1II|a_off:2f/");
    }

    #[test]
    fn packed_normals() {
        let fmt = VertexFormat::parse("a_nrm:4rN|a_pos:3f").unwrap();
        assert_eq!(fmt.attributes().get("a_pos").map(|a| a.offset), Some(4));
        assert_eq!(fmt.stride(), 16);
        assert!(VertexFormat::parse("a_nrm:3r").is_err());
    }

    #[test]
    fn rejects_malformed_items() {
        let err = VertexFormat::parse("a_pos:2f|a_col:5B").unwrap_err();
        assert_eq!(err.position, 15);

        let err = VertexFormat::parse("a_pos:2x").unwrap_err();
        assert_eq!(err.position, 7);
        assert!(err.message.contains("'x'"));

        assert!(VertexFormat::parse("").is_err());
        assert!(VertexFormat::parse("a_pos").is_err());
        assert!(VertexFormat::parse(":2f").is_err());
        assert!(VertexFormat::parse("a:2f|a:2f").is_err());
        assert!(VertexFormat::parse("a:2fI").is_err());
        assert!(VertexFormat::parse("a:2BNI").is_err());
        assert!(VertexFormat::parse("a:2fNN").is_err());
        assert!(VertexFormat::parse("a:2fQ").is_err());
    }
}
