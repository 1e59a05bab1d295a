//! Policy conditions evaluated against one field of the request context.
//!
//! Stored and exchanged as `{"type": "<Name>Condition", "options": {...}}`.

use std::net::IpAddr;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("unknown condition type '{0}'")]
    UnknownType(String),
    #[error("condition '{kind}' requires option '{option}'")]
    MissingOption { kind: &'static str, option: &'static str },
    #[error("invalid regular expression '{0}'")]
    InvalidRegex(String),
    #[error("invalid CIDR '{0}'")]
    InvalidCidr(String),
}

/// An IP network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl FromStr for Cidr {
    type Err = ConditionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ConditionError::InvalidCidr(value.to_string());
        let (address, prefix) = match value.split_once('/') {
            Some((address, prefix)) => (address, Some(prefix)),
            None => (value, None),
        };
        let network: IpAddr = address.trim().parse().map_err(|_| invalid())?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(prefix) => prefix.trim().parse::<u8>().map_err(|_| invalid())?,
            None => max,
        };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { network, prefix })
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl Cidr {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(network), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(network) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(network), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(network) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Condition {
    /// The context value is a string equal to `equals`.
    StringEqual { equals: String },
    /// The context value is a string matching `matches` anywhere.
    StringMatch { matches: String, regex: Regex },
    /// The context value is a list of two-element string pairs, each pair equal.
    StringPairsEqual,
    /// The context value is a list of two-element string pairs, at least one unequal.
    StringPairsNotEqual,
    /// The context value equals the subject of the request.
    EqualsSubject,
    /// The context value is an IP address inside `cidr`.
    Cidr(Cidr),
}

/// Wire form of a condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCondition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

fn string_option(options: &Map<String, Value>, kind: &'static str, option: &'static str) -> Result<String, ConditionError> {
    options
        .get(option)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ConditionError::MissingOption { kind, option })
}

impl TryFrom<RawCondition> for Condition {
    type Error = ConditionError;

    fn try_from(raw: RawCondition) -> Result<Self, Self::Error> {
        Ok(match raw.kind.as_str() {
            "StringEqualCondition" => Condition::StringEqual {
                equals: string_option(&raw.options, "StringEqualCondition", "equals")?,
            },
            "StringMatchCondition" => {
                let matches = string_option(&raw.options, "StringMatchCondition", "matches")?;
                let regex = Regex::new(&matches).map_err(|_| ConditionError::InvalidRegex(matches.clone()))?;
                Condition::StringMatch { matches, regex }
            }
            "StringPairsEqualCondition" => Condition::StringPairsEqual,
            "StringPairsNotEqualCondition" => Condition::StringPairsNotEqual,
            "EqualsSubjectCondition" => Condition::EqualsSubject,
            "CIDRCondition" => Condition::Cidr(string_option(&raw.options, "CIDRCondition", "cidr")?.parse()?),
            _ => return Err(ConditionError::UnknownType(raw.kind)),
        })
    }
}

impl From<&Condition> for RawCondition {
    fn from(condition: &Condition) -> Self {
        let (kind, options) = match condition {
            Condition::StringEqual { equals } => ("StringEqualCondition", json!({ "equals": equals })),
            Condition::StringMatch { matches, .. } => ("StringMatchCondition", json!({ "matches": matches })),
            Condition::StringPairsEqual => ("StringPairsEqualCondition", json!({})),
            Condition::StringPairsNotEqual => ("StringPairsNotEqualCondition", json!({})),
            Condition::EqualsSubject => ("EqualsSubjectCondition", json!({})),
            Condition::Cidr(cidr) => ("CIDRCondition", json!({ "cidr": cidr.to_string() })),
        };
        RawCondition {
            kind: kind.to_string(),
            options: match options {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }
}

/// `Some(pairs)` when `value` is a list of two-element string lists.
fn string_pairs(value: &Value) -> Option<Vec<(&str, &str)>> {
    value
        .as_array()?
        .iter()
        .map(|pair| match pair.as_array().map(Vec::as_slice) {
            Some([a, b]) => Some((a.as_str()?, b.as_str()?)),
            _ => None,
        })
        .collect()
}

impl Condition {
    /// Whether the context value `value` satisfies this condition for `subject`.
    /// A missing value never does.
    pub fn fulfills(&self, value: Option<&Value>, subject: &str) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            Condition::StringEqual { equals } => value.as_str() == Some(equals.as_str()),
            Condition::StringMatch { regex, .. } => value.as_str().is_some_and(|s| regex.is_match(s)),
            Condition::StringPairsEqual => string_pairs(value).is_some_and(|pairs| pairs.iter().all(|(a, b)| a == b)),
            Condition::StringPairsNotEqual => {
                string_pairs(value).is_some_and(|pairs| pairs.iter().any(|(a, b)| a != b))
            }
            Condition::EqualsSubject => value.as_str() == Some(subject),
            Condition::Cidr(cidr) => value
                .as_str()
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
                .is_some_and(|ip| cidr.contains(ip)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: Value) -> Result<Condition, ConditionError> {
        let raw: RawCondition = serde_json::from_value(value).unwrap();
        Condition::try_from(raw)
    }

    #[test]
    fn missing_context_fails_every_condition() {
        let conditions = [
            parse(json!({"type": "StringEqualCondition", "options": {"equals": "a"}})).unwrap(),
            parse(json!({"type": "StringPairsNotEqualCondition"})).unwrap(),
            parse(json!({"type": "EqualsSubjectCondition"})).unwrap(),
            parse(json!({"type": "CIDRCondition", "options": {"cidr": "10.0.0.0/8"}})).unwrap(),
        ];
        for condition in conditions {
            assert!(!condition.fulfills(None, "alice"));
        }
    }

    #[test]
    fn string_conditions() {
        let equal = parse(json!({"type": "StringEqualCondition", "options": {"equals": "eu"}})).unwrap();
        assert!(equal.fulfills(Some(&json!("eu")), "alice"));
        assert!(!equal.fulfills(Some(&json!("us")), "alice"));
        assert!(!equal.fulfills(Some(&json!(1)), "alice"));

        let matching = parse(json!({"type": "StringMatchCondition", "options": {"matches": "^team-[a-z]+$"}})).unwrap();
        assert!(matching.fulfills(Some(&json!("team-blue")), "alice"));
        assert!(!matching.fulfills(Some(&json!("team-42")), "alice"));

        let subject = parse(json!({"type": "EqualsSubjectCondition"})).unwrap();
        assert!(subject.fulfills(Some(&json!("alice")), "alice"));
        assert!(!subject.fulfills(Some(&json!("bob")), "alice"));
    }

    #[test]
    fn string_pair_conditions() {
        let equal = parse(json!({"type": "StringPairsEqualCondition"})).unwrap();
        let not_equal = parse(json!({"type": "StringPairsNotEqualCondition", "options": {}})).unwrap();

        let same = json!([["1", "1"], ["2", "2"]]);
        let mixed = json!([["1", "1"], ["2", "3"]]);
        let malformed = json!([["1", "1", "1"]]);

        assert!(equal.fulfills(Some(&same), "s"));
        assert!(!equal.fulfills(Some(&mixed), "s"));
        assert!(!equal.fulfills(Some(&malformed), "s"));

        assert!(!not_equal.fulfills(Some(&same), "s"));
        assert!(not_equal.fulfills(Some(&mixed), "s"));
        assert!(!not_equal.fulfills(Some(&malformed), "s"));
    }

    #[test]
    fn cidr_condition() {
        let cidr = parse(json!({"type": "CIDRCondition", "options": {"cidr": "192.168.0.0/16"}})).unwrap();
        assert!(cidr.fulfills(Some(&json!("192.168.10.1")), "s"));
        assert!(!cidr.fulfills(Some(&json!("10.0.0.1")), "s"));
        assert!(!cidr.fulfills(Some(&json!("::1")), "s"));
        assert!(!cidr.fulfills(Some(&json!("not-an-ip")), "s"));
    }

    #[test]
    fn cidr_parsing() {
        let any: Cidr = "0.0.0.0/0".parse().unwrap();
        assert!(any.contains("8.8.8.8".parse().unwrap()));

        let host: Cidr = "10.1.2.3".parse().unwrap();
        assert!(host.contains("10.1.2.3".parse().unwrap()));
        assert!(!host.contains("10.1.2.4".parse().unwrap()));

        let v6: Cidr = "2001:db8::/32".parse().unwrap();
        assert!(v6.contains("2001:db8::1".parse().unwrap()));
        assert!(!v6.contains("2001:db9::1".parse().unwrap()));

        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
        assert!("10.0.0/8".parse::<Cidr>().is_err());
    }

    #[test]
    fn unknown_and_incomplete_conditions_are_rejected() {
        assert_eq!(
            parse(json!({"type": "ResourceContainsCondition"})).unwrap_err(),
            ConditionError::UnknownType("ResourceContainsCondition".into())
        );
        assert_eq!(
            parse(json!({"type": "StringEqualCondition"})).unwrap_err(),
            ConditionError::MissingOption {
                kind: "StringEqualCondition",
                option: "equals"
            }
        );
    }

    #[test]
    fn wire_form_survives_a_round_trip() {
        let original = json!({"type": "CIDRCondition", "options": {"cidr": "10.0.0.0/8"}});
        let condition = parse(original.clone()).unwrap();
        assert_eq!(serde_json::to_value(RawCondition::from(&condition)).unwrap(), original);
    }
}
