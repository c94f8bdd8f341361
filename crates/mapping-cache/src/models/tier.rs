use serde::{Deserialize, Serialize};

/// Cache tier label. This is a closed set; nothing else is ever reported as a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// Rule cache
    L1,
    /// Per-symbol cache
    L2,
    /// Batch-result cache
    L3,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L1 => "l1",
            Self::L2 => "l2",
            Self::L3 => "l3",
        }
    }

    pub const ALL: [CacheTier; 3] = [Self::L1, Self::L2, Self::L3];
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
