//! # bobcat-predicate
//!
//! Link predicate DSL for the bobcat simulator.
//!
//! Predicates are short strings over message fields, used when designing
//! links, for example:
//!
//! ```yaml
//! Node_Name:
//!     type: nodetype
//!     Node_To_Link_To: SimTime > 10
//! ```
//!
//! This creates a link that only forwards messages after a sim time of 10
//! seconds. Parsing is pattern-based: an ordered list of regexes is tried
//! and the first match wins. `SimTime` on the left-hand side reads the
//! current simulation time instead of a payload field. An empty predicate,
//! `~`, or `null` always passes. An unknown field in a comparison makes the
//! predicate evaluate false, never an error.

use bobcat_core::Value;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

/// Payload key injected by the link layer before routing so percentage
/// routes (`A <=> B`) can draw from one engine-owned random stream.
pub const RANDOM_ROUTER_KEY: &str = "random_router_value";

/// Predicate parse errors. Always fatal at scenario load.
#[derive(Debug, Error)]
pub enum PredicateError {
    /// No pattern matched the predicate text.
    #[error("Condition didn't parse correctly: {0}")]
    Unparseable(String),

    /// A `regex`/`failed_reg` predicate carried an invalid pattern.
    #[error("Invalid regex in predicate '{predicate}': {source}")]
    BadRegex {
        /// The full predicate text.
        predicate: String,
        /// Underlying regex error.
        source: regex::Error,
    },

    /// A percentage route bound was not an integer.
    #[error("Percentage route bounds must be integers: {0}")]
    BadPercentage(String),
}

/// Comparison literal: numeric when it parses as a number, text otherwise.
#[derive(Debug, Clone)]
enum Literal {
    Num(f64),
    Text(String),
}

impl Literal {
    fn parse(raw: &str) -> Literal {
        let trimmed = raw.trim();
        if let Ok(num) = trimmed.parse::<f64>() {
            return Literal::Num(num);
        }
        // Quoted strings are literals; strip one layer of quotes.
        let unquoted = trimmed
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .or_else(|| trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
            .unwrap_or(trimmed);
        Literal::Text(unquoted.to_string())
    }
}

#[derive(Debug, Clone)]
enum Op {
    Always,
    Gt(f64),
    Gte(f64),
    Lt(f64),
    Lte(f64),
    Eq(Literal),
    Ne(Literal),
    Exists,
    Missing,
    Matches(Regex),
    MatchFailed(Regex),
    Percentage(i64, i64),
    StartsWith(String),
}

/// A compiled link predicate: a field selector plus an operation.
#[derive(Debug, Clone)]
pub struct Predicate {
    source: String,
    field: String,
    op: Op,
}

/// Pattern table in priority order. Spacing is significant: `A >= 5` cannot
/// match the `>` pattern because its literal ` > ` never occurs.
fn patterns() -> &'static [(Regex, u8)] {
    static PATTERNS: OnceLock<Vec<(Regex, u8)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            ("^(.*) > (.*)$", 0u8),
            ("^(.*) >= (.*)$", 1),
            ("^(.*) < (.*)$", 2),
            ("^(.*) <= (.*)$", 3),
            ("^(.*) == (.*)$", 4),
            ("^(.*) != (.*)$", 5),
            ("^(.*) EXISTS$", 6),
            ("^(.*) MISSING$", 7),
            ("^(.*) NOT_EXISTS$", 7),
            ("^(.*) regex '(.*)'$", 8),
            ("^(.*) failed_reg '(.*)'$", 9),
            ("^(.*) <=> (.*)$", 10),
            ("^(.*) starts_with (.*)$", 11),
        ]
        .into_iter()
        .map(|(pattern, tag)| (Regex::new(pattern).expect("static predicate pattern"), tag))
        .collect()
    })
}

impl Predicate {
    /// The always-true predicate (`~` in scenario files).
    pub fn always() -> Predicate {
        Predicate {
            source: "~".to_string(),
            field: String::new(),
            op: Op::Always,
        }
    }

    /// Parse predicate text. The first matching pattern wins; text that
    /// matches no pattern is a load-time error.
    pub fn parse(text: &str) -> Result<Predicate, PredicateError> {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == "~" || trimmed.eq_ignore_ascii_case("null") {
            return Ok(Predicate::always());
        }

        for (pattern, tag) in patterns() {
            let Some(captures) = pattern.captures(trimmed) else {
                continue;
            };
            let field = captures.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
            let rhs = captures.get(2).map(|m| m.as_str()).unwrap_or_default();

            let numeric = |raw: &str| -> Result<f64, PredicateError> {
                raw.trim()
                    .parse::<f64>()
                    .map_err(|_| PredicateError::Unparseable(trimmed.to_string()))
            };

            let op = match *tag {
                0 => Op::Gt(numeric(rhs)?),
                1 => Op::Gte(numeric(rhs)?),
                2 => Op::Lt(numeric(rhs)?),
                3 => Op::Lte(numeric(rhs)?),
                4 => Op::Eq(Literal::parse(rhs)),
                5 => Op::Ne(Literal::parse(rhs)),
                6 => Op::Exists,
                7 => Op::Missing,
                8 | 9 => {
                    let regex = Regex::new(rhs).map_err(|source| PredicateError::BadRegex {
                        predicate: trimmed.to_string(),
                        source,
                    })?;
                    if *tag == 8u8 {
                        Op::Matches(regex)
                    } else {
                        Op::MatchFailed(regex)
                    }
                }
                10 => {
                    let start = field
                        .parse::<i64>()
                        .map_err(|_| PredicateError::BadPercentage(trimmed.to_string()))?;
                    let end = rhs
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| PredicateError::BadPercentage(trimmed.to_string()))?;
                    Op::Percentage(start, end)
                }
                _ => Op::StartsWith(rhs.trim().to_string()),
            };

            return Ok(Predicate {
                source: trimmed.to_string(),
                field,
                op,
            });
        }

        Err(PredicateError::Unparseable(trimmed.to_string()))
    }

    /// The predicate text as written in the scenario.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The field the predicate reads (empty for the always form).
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Whether this is the always-true sentinel.
    pub fn is_always(&self) -> bool {
        matches!(self.op, Op::Always)
    }

    /// Left-hand side value: `SimTime` reads the clock, anything else reads
    /// the payload.
    fn left_value(&self, simtime_secs: f64, payload: &BTreeMap<String, Value>) -> Option<Value> {
        if self.field == "SimTime" {
            Some(Value::Float(simtime_secs))
        } else {
            payload.get(&self.field).cloned()
        }
    }

    /// Evaluate against the current simtime (seconds) and a message payload.
    pub fn eval(&self, simtime_secs: f64, payload: &BTreeMap<String, Value>) -> bool {
        match &self.op {
            Op::Always => true,
            Op::Exists => self.field == "SimTime" || payload.contains_key(&self.field),
            Op::Missing => self.field != "SimTime" && !payload.contains_key(&self.field),
            Op::Percentage(start, end) => payload
                .get(RANDOM_ROUTER_KEY)
                .and_then(Value::as_f64)
                .map(|draw| draw as i64 >= *start && draw as i64 <= *end)
                .unwrap_or(false),
            op => {
                let Some(left) = self.left_value(simtime_secs, payload) else {
                    return false;
                };
                match op {
                    Op::Gt(rhs) => left.as_f64().map(|l| l > *rhs).unwrap_or(false),
                    Op::Gte(rhs) => left.as_f64().map(|l| l >= *rhs).unwrap_or(false),
                    Op::Lt(rhs) => left.as_f64().map(|l| l < *rhs).unwrap_or(false),
                    Op::Lte(rhs) => left.as_f64().map(|l| l <= *rhs).unwrap_or(false),
                    Op::Eq(literal) => compare_eq(&left, literal),
                    Op::Ne(literal) => !compare_eq(&left, literal),
                    Op::Matches(regex) => regex.is_match(&left.render()),
                    Op::MatchFailed(regex) => !regex.is_match(&left.render()),
                    Op::StartsWith(prefix) => left.render().starts_with(prefix.as_str()),
                    _ => unreachable!("handled above"),
                }
            }
        }
    }
}

/// Equality: numeric when both sides are numbers, text rendering otherwise.
/// `True`/`False` literals line up with boolean payload fields through the
/// shared rendering.
fn compare_eq(left: &Value, literal: &Literal) -> bool {
    match literal {
        Literal::Num(rhs) => left.as_f64().map(|l| l == *rhs).unwrap_or(false),
        Literal::Text(text) => left.render() == *text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(fields: &[(&str, Value)]) -> BTreeMap<String, Value> {
        fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_always_forms() {
        for text in ["", "~", "null", "  "] {
            let p = Predicate::parse(text).unwrap();
            assert!(p.is_always());
            assert!(p.eval(0.0, &BTreeMap::new()));
        }
    }

    #[test]
    fn test_numeric_comparisons() {
        let data = payload(&[("size_mbits", Value::Int(50))]);
        assert!(Predicate::parse("size_mbits > 10").unwrap().eval(0.0, &data));
        assert!(Predicate::parse("size_mbits >= 50").unwrap().eval(0.0, &data));
        assert!(!Predicate::parse("size_mbits > 50").unwrap().eval(0.0, &data));
        assert!(Predicate::parse("size_mbits < 100").unwrap().eval(0.0, &data));
        assert!(Predicate::parse("size_mbits <= 50").unwrap().eval(0.0, &data));
    }

    #[test]
    fn test_gte_is_not_swallowed_by_gt() {
        // " > " never occurs in "x >= 5" so the >= pattern must win.
        let data = payload(&[("x", Value::Int(5))]);
        assert!(Predicate::parse("x >= 5").unwrap().eval(0.0, &data));
    }

    #[test]
    fn test_equality_typed() {
        let data = payload(&[
            ("color", Value::Str("red".into())),
            ("count", Value::Int(3)),
            ("armed", Value::Bool(true)),
        ]);
        assert!(Predicate::parse("color == \"red\"").unwrap().eval(0.0, &data));
        assert!(Predicate::parse("color == red").unwrap().eval(0.0, &data));
        assert!(!Predicate::parse("color == blue").unwrap().eval(0.0, &data));
        assert!(Predicate::parse("count == 3").unwrap().eval(0.0, &data));
        assert!(Predicate::parse("count != 4").unwrap().eval(0.0, &data));
        assert!(Predicate::parse("armed == True").unwrap().eval(0.0, &data));
        assert!(!Predicate::parse("armed == False").unwrap().eval(0.0, &data));
    }

    #[test]
    fn test_unknown_field_is_false_not_error() {
        let data = BTreeMap::new();
        assert!(!Predicate::parse("missing == 1").unwrap().eval(0.0, &data));
        assert!(!Predicate::parse("missing > 1").unwrap().eval(0.0, &data));
        assert!(!Predicate::parse("missing != 1").unwrap().eval(0.0, &data));
    }

    #[test]
    fn test_existence() {
        let data = payload(&[("Schedule", Value::Int(1))]);
        assert!(Predicate::parse("Schedule EXISTS").unwrap().eval(0.0, &data));
        assert!(!Predicate::parse("Schedule MISSING").unwrap().eval(0.0, &data));
        assert!(Predicate::parse("Other MISSING").unwrap().eval(0.0, &data));
        assert!(Predicate::parse("Other NOT_EXISTS").unwrap().eval(0.0, &data));
        // SimTime is always present.
        assert!(Predicate::parse("SimTime EXISTS").unwrap().eval(0.0, &data));
        assert!(!Predicate::parse("SimTime MISSING").unwrap().eval(0.0, &data));
    }

    #[test]
    fn test_simtime_comparisons() {
        let data = BTreeMap::new();
        let p = Predicate::parse("SimTime > 10").unwrap();
        assert!(!p.eval(5.0, &data));
        assert!(p.eval(10.5, &data));
    }

    #[test]
    fn test_regex_routes() {
        let data = payload(&[("target", Value::Str("SAT-12".into()))]);
        assert!(Predicate::parse("target regex 'SAT-[0-9]+'").unwrap().eval(0.0, &data));
        assert!(!Predicate::parse("target failed_reg 'SAT-[0-9]+'").unwrap().eval(0.0, &data));
        assert!(Predicate::parse("target starts_with SAT").unwrap().eval(0.0, &data));
    }

    #[test]
    fn test_percentage_route_uses_router_value() {
        let mut data = BTreeMap::new();
        let p = Predicate::parse("0 <=> 49").unwrap();
        assert!(!p.eval(0.0, &data));
        data.insert(RANDOM_ROUTER_KEY.to_string(), Value::Int(25));
        assert!(p.eval(0.0, &data));
        data.insert(RANDOM_ROUTER_KEY.to_string(), Value::Int(80));
        assert!(!p.eval(0.0, &data));
    }

    #[test]
    fn test_parse_failure_is_fatal() {
        assert!(Predicate::parse("complete nonsense").is_err());
        assert!(Predicate::parse("field regex '['").is_err());
    }
}
