use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::MappingDirection;

/// Transport the rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    Rest,
    Stream,
}

impl ApiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Stream => "stream",
        }
    }
}

impl std::fmt::Display for ApiType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApiType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rest" => Ok(Self::Rest),
            "stream" => Ok(Self::Stream),
            other => Err(format!("unknown api type '{}'", other)),
        }
    }
}

/// One standard-symbol <-> provider-symbol pair, owned by the external rule store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRule {
    /// Stable identifier used for direct rule-cache lookups.
    pub id: String,
    pub provider: String,
    pub api_type: ApiType,
    pub rule_list_type: String,
    pub standard_symbol: String,
    pub sdk_symbol: String,
    pub market: String,
    pub symbol_type: String,
    pub is_active: bool,
    /// Free-text note. Never affects invalidation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MappingRule {
    /// Identity of the rule for version diffing: `standardSymbol:sdkSymbol`.
    pub fn diff_key(&self) -> String {
        format!("{}:{}", self.standard_symbol, self.sdk_symbol)
    }

    /// True when a field that changes mapping output differs.
    ///
    /// Only `market`, `symbol_type` and `is_active` count; descriptive fields
    /// such as `description` are ignored.
    pub fn materially_differs(&self, other: &MappingRule) -> bool {
        self.market != other.market
            || self.symbol_type != other.symbol_type
            || self.is_active != other.is_active
    }

    /// The symbol this rule consumes for the given direction.
    pub fn source_symbol(&self, direction: MappingDirection) -> &str {
        match direction {
            MappingDirection::FromStandard => &self.standard_symbol,
            MappingDirection::ToStandard => &self.sdk_symbol,
        }
    }

    /// The symbol this rule produces for the given direction.
    pub fn target_symbol(&self, direction: MappingDirection) -> &str {
        match direction {
            MappingDirection::FromStandard => &self.sdk_symbol,
            MappingDirection::ToStandard => &self.standard_symbol,
        }
    }
}

/// The rule list the rule store considers the best match for
/// `(provider, api_type, rule_list_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRuleSet {
    pub provider: String,
    pub api_type: ApiType,
    pub rule_list_type: String,
    pub rules: Vec<MappingRule>,
}

impl MappingRuleSet {
    /// Builds a lookup of active rules keyed by source symbol.
    ///
    /// If two active rules share a source symbol, the first one wins.
    pub fn lookup(&self, direction: MappingDirection) -> HashMap<&str, &str> {
        let mut index = HashMap::with_capacity(self.rules.len());
        for rule in self.rules.iter().filter(|r| r.is_active) {
            index
                .entry(rule.source_symbol(direction))
                .or_insert_with(|| rule.target_symbol(direction));
        }
        index
    }
}

/// Rule-change notification emitted by the rule store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleChange {
    pub provider: String,
    pub old_rules: Vec<MappingRule>,
    pub new_rules: Vec<MappingRule>,
}
