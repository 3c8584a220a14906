use std::fmt;
use std::str::FromStr;

use crate::gl::GlCaps;

/// How a dirty [`StreamingBuffer`](super::StreamingBuffer) reaches the GPU.
///
/// The active strategy is a per-context setting. A strategy the driver cannot
/// serve is downgraded along [`StreamingStrategy::safer`] until one fits.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum StreamingStrategy {
    /// Compact, orphan the storage with a fresh allocation, then upload the
    /// used range.
    OrphanAndRespecify,
    /// Compact, then map the used range write-only with whole-buffer
    /// invalidation.
    MapInvalidateFull,
    /// Map and copy only the bytes appended since the last upload, without
    /// synchronizing against in-flight draws.
    MapUnsynchronizedAppend,
    /// Compact, then plain `BufferSubData` of the used range.
    DiscardAndSubData,
}

impl StreamingStrategy {
    pub const ALL: [StreamingStrategy; 4] = [
        StreamingStrategy::MapUnsynchronizedAppend,
        StreamingStrategy::MapInvalidateFull,
        StreamingStrategy::OrphanAndRespecify,
        StreamingStrategy::DiscardAndSubData,
    ];

    pub fn is_supported(self, caps: &GlCaps) -> bool {
        match self {
            StreamingStrategy::MapUnsynchronizedAppend | StreamingStrategy::MapInvalidateFull => {
                caps.map_buffer_range
            }
            StreamingStrategy::OrphanAndRespecify | StreamingStrategy::DiscardAndSubData => true,
        }
    }

    /// Next strategy in the downgrade chain; `DiscardAndSubData` is terminal.
    pub fn safer(self) -> StreamingStrategy {
        match self {
            StreamingStrategy::MapUnsynchronizedAppend => StreamingStrategy::MapInvalidateFull,
            StreamingStrategy::MapInvalidateFull => StreamingStrategy::OrphanAndRespecify,
            StreamingStrategy::OrphanAndRespecify | StreamingStrategy::DiscardAndSubData => {
                StreamingStrategy::DiscardAndSubData
            }
        }
    }

    /// Fastest strategy `caps` supports.
    pub fn best_for(caps: &GlCaps) -> StreamingStrategy {
        Self::ALL
            .into_iter()
            .find(|s| s.is_supported(caps))
            .unwrap_or(StreamingStrategy::DiscardAndSubData)
    }

    pub fn name(self) -> &'static str {
        match self {
            StreamingStrategy::OrphanAndRespecify => "orphan",
            StreamingStrategy::MapInvalidateFull => "map_invalidate",
            StreamingStrategy::MapUnsynchronizedAppend => "map_unsynchronized",
            StreamingStrategy::DiscardAndSubData => "subdata",
        }
    }
}

impl fmt::Display for StreamingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error for an unknown strategy name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStrategy(pub String);

impl fmt::Display for UnknownStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown streaming strategy '{}' (expected orphan, map_invalidate, map_unsynchronized or subdata)",
            self.0
        )
    }
}

impl std::error::Error for UnknownStrategy {}

impl FromStr for StreamingStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.name().eq_ignore_ascii_case(s))
            .or_else(|| match s {
                "0" => Some(StreamingStrategy::OrphanAndRespecify),
                "1" => Some(StreamingStrategy::MapInvalidateFull),
                "2" => Some(StreamingStrategy::MapUnsynchronizedAppend),
                "3" => Some(StreamingStrategy::DiscardAndSubData),
                _ => None,
            })
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::GlVersion;

    #[test]
    fn names_parse_back() {
        for s in StreamingStrategy::ALL {
            assert_eq!(s.to_string().parse::<StreamingStrategy>(), Ok(s));
        }
        assert_eq!("2".parse(), Ok(StreamingStrategy::MapUnsynchronizedAppend));
        assert_eq!(" SubData ".parse(), Ok(StreamingStrategy::DiscardAndSubData));
        assert!("fastest".parse::<StreamingStrategy>().is_err());
    }

    #[test]
    fn downgrade_chain_ends_in_subdata() {
        let mut s = StreamingStrategy::MapUnsynchronizedAppend;
        let mut steps = 0;
        while s != StreamingStrategy::DiscardAndSubData {
            s = s.safer();
            steps += 1;
        }
        assert_eq!(steps, 3);
        assert_eq!(s.safer(), s);
    }

    #[test]
    fn best_strategy_follows_map_support() {
        let modern = GlCaps::from_parts(GlVersion::desktop(3, 3), |_| false, 16);
        assert_eq!(StreamingStrategy::best_for(&modern), StreamingStrategy::MapUnsynchronizedAppend);
        assert_eq!(
            StreamingStrategy::best_for(&GlCaps::baseline()),
            StreamingStrategy::OrphanAndRespecify
        );
    }
}
