use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MappingDirection;

/// Result of one batch mapping call, as returned to callers.
///
/// Every requested symbol is either a key of `mapping_details` or an element
/// of `failed_symbols`, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMappingResult {
    pub mapping_details: BTreeMap<String, String>,
    pub failed_symbols: Vec<String>,
    pub provider: String,
    pub direction: MappingDirection,
    pub total_processed: usize,
    pub cache_hits: usize,
    pub processing_time_ms: u64,
}

impl BatchMappingResult {
    pub(crate) fn empty(provider: &str, direction: MappingDirection) -> Self {
        Self {
            mapping_details: BTreeMap::new(),
            failed_symbols: Vec::new(),
            provider: provider.to_string(),
            direction,
            total_processed: 0,
            cache_hits: 0,
            processing_time_ms: 0,
        }
    }
}

/// L3 record as persisted in the backing store.
///
/// Carries the involved-symbols index next to the result. Never handed out
/// directly; [`StoredBatchResult::to_public`] builds the caller-facing copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredBatchResult {
    pub mapping_details: BTreeMap<String, String>,
    pub failed_symbols: Vec<String>,
    pub provider: String,
    pub direction: MappingDirection,
    pub total_processed: usize,
    /// Union of mapping keys, mapping values and failed symbols.
    pub involved_symbols: BTreeSet<String>,
    pub cached_at: DateTime<Utc>,
}

impl StoredBatchResult {
    pub fn from_result(result: &BatchMappingResult) -> Self {
        let involved_symbols = result
            .mapping_details
            .iter()
            .flat_map(|(from, to)| [from.clone(), to.clone()])
            .chain(result.failed_symbols.iter().cloned())
            .collect();

        Self {
            mapping_details: result.mapping_details.clone(),
            failed_symbols: result.failed_symbols.clone(),
            provider: result.provider.clone(),
            direction: result.direction,
            total_processed: result.total_processed,
            involved_symbols,
            cached_at: Utc::now(),
        }
    }

    /// Builds the whitelisted, caller-facing copy of this record.
    pub fn to_public(&self, cache_hits: usize, processing_time_ms: u64) -> BatchMappingResult {
        BatchMappingResult {
            mapping_details: self.mapping_details.clone(),
            failed_symbols: self.failed_symbols.clone(),
            provider: self.provider.clone(),
            direction: self.direction,
            total_processed: self.total_processed,
            cache_hits,
            processing_time_ms,
        }
    }

    pub fn involves_any(&self, symbols: &HashSet<String>) -> bool {
        if self.involved_symbols.len() <= symbols.len() {
            self.involved_symbols.iter().any(|s| symbols.contains(s))
        } else {
            symbols.iter().any(|s| self.involved_symbols.contains(s))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BatchMappingResult {
        let mut mapping_details = BTreeMap::new();
        mapping_details.insert("AAPL".to_string(), "AAPL.US".to_string());
        BatchMappingResult {
            mapping_details,
            failed_symbols: vec!["INVALID".to_string()],
            provider: "acme".to_string(),
            direction: MappingDirection::FromStandard,
            total_processed: 2,
            cache_hits: 0,
            processing_time_ms: 3,
        }
    }

    #[test]
    fn test_index_covers_keys_values_and_failures() {
        let stored = StoredBatchResult::from_result(&sample());
        let expected: BTreeSet<String> = ["AAPL", "AAPL.US", "INVALID"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(stored.involved_symbols, expected);
    }

    #[test]
    fn test_involves_any_matches_failed_symbols() {
        let stored = StoredBatchResult::from_result(&sample());
        let affected: HashSet<String> = ["INVALID".to_string()].into_iter().collect();
        assert!(stored.involves_any(&affected));

        let unrelated: HashSet<String> = ["MSFT".to_string()].into_iter().collect();
        assert!(!stored.involves_any(&unrelated));
    }

    #[test]
    fn test_public_copy_has_no_index_field() {
        let stored = StoredBatchResult::from_result(&sample());
        let public = stored.to_public(2, 1);
        assert_eq!(public.cache_hits, 2);

        let json = serde_json::to_value(&public).unwrap();
        assert!(json.get("involvedSymbols").is_none());
        assert!(json.get("cachedAt").is_none());
        assert_eq!(json["failedSymbols"][0], "INVALID");
    }
}
