//! Merge policies for features sharing a gene symbol.

use crate::error::ConsolidateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Seed used for the `random` policy when none is given.
pub const DEFAULT_SEED: u64 = 42;

/// How a group of same-symbol features collapses into one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum MergeMethod {
    /// Keep the earliest row in table order.
    First,
    /// Keep one row drawn uniformly with a seeded generator.
    Random,
    /// Per-sample arithmetic mean; metadata from the earliest row.
    Average,
    /// Keep the row with the highest mean count; ties go to the earliest row.
    Highest,
}

impl MergeMethod {
    pub fn name(&self) -> &'static str {
        match self {
            MergeMethod::First => "first",
            MergeMethod::Random => "random",
            MergeMethod::Average => "average",
            MergeMethod::Highest => "highest",
        }
    }
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MergeMethod {
    type Err = ConsolidateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(MergeMethod::First),
            "random" => Ok(MergeMethod::Random),
            "average" | "mean" => Ok(MergeMethod::Average),
            "highest" | "max" => Ok(MergeMethod::Highest),
            _ => Err(ConsolidateError::UnknownMethod(s.to_string())),
        }
    }
}

impl TryFrom<String> for MergeMethod {
    type Error = ConsolidateError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("first".parse::<MergeMethod>().unwrap(), MergeMethod::First);
        assert_eq!("Average".parse::<MergeMethod>().unwrap(), MergeMethod::Average);
        assert_eq!(" highest ".parse::<MergeMethod>().unwrap(), MergeMethod::Highest);
        assert_eq!("random".parse::<MergeMethod>().unwrap(), MergeMethod::Random);
    }

    #[test]
    fn test_unknown_method() {
        let err = "median".parse::<MergeMethod>().unwrap_err();
        assert!(matches!(err, ConsolidateError::UnknownMethod(name) if name == "median"));
    }

    #[test]
    fn test_deserialize_accepts_aliases() {
        let method: MergeMethod = serde_json::from_str("\"mean\"").unwrap();
        assert_eq!(method, MergeMethod::Average);
        let method: MergeMethod = serde_yaml::from_str("Max").unwrap();
        assert_eq!(method, MergeMethod::Highest);
        assert_eq!(serde_json::to_string(&MergeMethod::Average).unwrap(), "\"average\"");
        assert!(serde_json::from_str::<MergeMethod>("\"median\"").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for method in [MergeMethod::First, MergeMethod::Random, MergeMethod::Average, MergeMethod::Highest] {
            assert_eq!(method.to_string().parse::<MergeMethod>().unwrap(), method);
        }
    }
}
