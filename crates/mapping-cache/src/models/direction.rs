use serde::{Deserialize, Serialize};

/// Direction of a symbol conversion.
///
/// Deliberately has no `Default` impl: every call site must name the
/// direction it means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingDirection {
    /// Provider-specific symbol to standardized symbol (e.g. "AAPL.US" -> "AAPL").
    ToStandard,
    /// Standardized symbol to provider-specific symbol (e.g. "AAPL" -> "AAPL.US").
    FromStandard,
}

impl MappingDirection {
    /// Key segment for this direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToStandard => "to_standard",
            Self::FromStandard => "from_standard",
        }
    }

    pub const ALL: [MappingDirection; 2] = [Self::ToStandard, Self::FromStandard];
}

impl std::fmt::Display for MappingDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
