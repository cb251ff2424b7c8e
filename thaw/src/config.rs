//! Runtime flags that influence deserialization.

use serde::{Deserialize, Serialize};

/// Flags set by the host.
///
/// Every field has a default, so a configuration file
/// only needs to mention the flags it wants to change.
///
/// # Examples
///
/// ```
/// # use thaw::config::{CodeArch, Flags};
/// let flags = Flags::from_json(r#"{"code_arch": "split_immediate"}"#).unwrap();
/// assert_eq!(flags.code_arch, CodeArch::SplitImmediate);
/// assert!(flags.rehash_snapshot);
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Flags
{
    /// Recompute hashes of snapshot objects that can be rehashed.
    ///
    /// Only has an effect if the snapshot says it can be rehashed.
    pub rehash_snapshot: bool,

    /// Keep track of deserialized type descriptors
    /// so they can be reported after deserialization.
    pub trace_maps: bool,

    /// Value to which interpreter interrupt budgets are reset.
    pub interrupt_budget: i64,

    /// How code objects encode branch targets and constants.
    pub code_arch: CodeArch,

    /// Maximum number of bytes of off-heap backing stores,
    /// or no limit if [`None`].
    pub max_off_heap_bytes: Option<usize>,

    /// Seed for string hashes.
    pub hash_seed: u64,
}

/// How code objects encode branch targets and constants.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeArch
{
    /// Targets are stored as plain 64-bit little-endian addresses.
    Absolute,

    /// Targets are split over two 32-bit immediates,
    /// the high half first, like a pair of move-wide instructions.
    SplitImmediate,
}

impl Flags
{
    /// Parse flags from a JSON object.
    pub fn from_json(json: &str) -> serde_json::Result<Self>
    {
        serde_json::from_str(json)
    }
}

impl Default for Flags
{
    fn default() -> Self
    {
        Self{
            rehash_snapshot:    true,
            trace_maps:         false,
            interrupt_budget:   144 * 1024,
            code_arch:          CodeArch::Absolute,
            max_off_heap_bytes: None,
            hash_seed:          0,
        }
    }
}

impl CodeArch
{
    /// Whether targets are encoded in instruction immediates
    /// rather than in plain address slots.
    pub fn codes_specially(self) -> bool
    {
        match self {
            Self::Absolute       => false,
            Self::SplitImmediate => true,
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn empty_object_is_default()
    {
        assert_eq!(Flags::from_json("{}").unwrap(), Flags::default());
    }

    #[test]
    fn overrides()
    {
        let flags = Flags::from_json(r#"{
            "rehash_snapshot": false,
            "trace_maps": true,
            "interrupt_budget": 10,
            "max_off_heap_bytes": 4096
        }"#).unwrap();
        assert!(!flags.rehash_snapshot);
        assert!(flags.trace_maps);
        assert_eq!(flags.interrupt_budget, 10);
        assert_eq!(flags.max_off_heap_bytes, Some(4096));
        assert_eq!(flags.code_arch, CodeArch::Absolute);
    }

    #[test]
    fn unknown_field()
    {
        assert!(Flags::from_json(r#"{"rehash": true}"#).is_err());
    }

    #[test]
    fn round_trip_through_json()
    {
        let flags = Flags{code_arch: CodeArch::SplitImmediate, ..Flags::default()};
        let json = serde_json::to_string(&flags).unwrap();
        assert_eq!(Flags::from_json(&json).unwrap(), flags);
    }
}
