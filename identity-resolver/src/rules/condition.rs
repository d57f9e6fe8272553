use serde_json::Value;

use super::Facts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Gte,
    Lte,
    Gt,
    Lt,
    Eq,
}

impl Comparator {
    // Two-character operators first so ">=" is not read as ">".
    const PREFIXES: [(&'static str, Comparator); 5] = [
        (">=", Comparator::Gte),
        ("<=", Comparator::Lte),
        ("==", Comparator::Eq),
        (">", Comparator::Gt),
        ("<", Comparator::Lt),
    ];

    pub fn compare(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparator::Gte => lhs >= rhs,
            Comparator::Lte => lhs <= rhs,
            Comparator::Gt => lhs > rhs,
            Comparator::Lt => lhs < rhs,
            Comparator::Eq => lhs == rhs,
        }
    }
}

/// A parsed rule condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition<'a> {
    Equals(&'a Value),
    Compare(Comparator, f64),
    /// Comparator prefix with a non-numeric operand. Never holds.
    Malformed(&'a str),
}

impl<'a> Condition<'a> {
    pub fn parse(expected: &'a Value) -> Self {
        let Value::String(raw) = expected else {
            return Condition::Equals(expected);
        };
        let trimmed = raw.trim_start();
        for (prefix, comparator) in Comparator::PREFIXES {
            if let Some(operand) = trimmed.strip_prefix(prefix) {
                return match operand.trim().parse::<f64>() {
                    Ok(operand) if operand.is_finite() => Condition::Compare(comparator, operand),
                    _ => Condition::Malformed(raw),
                };
            }
        }
        Condition::Equals(expected)
    }
}

fn fact_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn values_equal(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::String(e), Value::String(a)) => e == a,
        (Value::Number(e), Value::Number(a)) => match (e.as_f64(), a.as_f64()) {
            (Some(e), Some(a)) => e == a,
            _ => false,
        },
        (Value::Bool(e), Value::Bool(a)) => e == a,
        _ => false,
    }
}

/// Whether `attribute` satisfies `expected` in `facts`.
///
/// An attribute absent from the facts (or null) never satisfies a
/// condition.
pub fn condition_holds(attribute: &str, expected: &Value, facts: &Facts) -> bool {
    let actual = match facts.get(attribute) {
        None | Some(Value::Null) => return false,
        Some(actual) => actual,
    };

    match Condition::parse(expected) {
        Condition::Equals(expected) => values_equal(expected, actual),
        Condition::Compare(comparator, operand) => match fact_as_f64(actual) {
            Some(value) => comparator.compare(value, operand),
            None => {
                tracing::debug!(
                    attribute,
                    value = %actual,
                    "fact is not numeric, comparator condition does not hold"
                );
                false
            }
        },
        Condition::Malformed(raw) => {
            tracing::warn!(attribute, condition = raw, "malformed comparator condition");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn facts(value: Value) -> Facts {
        Facts::from([("credit_score".to_string(), value)])
    }

    #[test_case(json!(700) => true; "at boundary")]
    #[test_case(json!(699) => false; "just below")]
    #[test_case(json!(701.5) => true; "fractional above")]
    #[test_case(json!("700") => true; "numeric string fact")]
    #[test_case(json!("seven hundred") => false; "non numeric fact")]
    #[test_case(json!(true) => false; "bool fact")]
    fn test_gte_boundary(value: Value) -> bool {
        condition_holds("credit_score", &json!(">=700"), &facts(value))
    }

    #[test_case(">700", 700.0 => false)]
    #[test_case("<700", 699.0 => true)]
    #[test_case("<=700", 700.0 => true)]
    #[test_case("== 700", 700.0 => true)]
    #[test_case("  > 10", 11.0 => true)]
    fn test_comparators(condition: &str, fact: f64) -> bool {
        condition_holds("credit_score", &json!(condition), &facts(json!(fact)))
    }

    #[test]
    fn test_missing_attribute_never_matches() {
        let empty = Facts::new();
        assert!(!condition_holds("credit_score", &json!(">=0"), &empty));
        assert!(!condition_holds("credit_score", &json!("x"), &empty));
        assert!(!condition_holds("credit_score", &json!(">=0"), &facts(Value::Null)));
    }

    #[test]
    fn test_equality_is_type_aware() {
        let f = Facts::from([
            ("product".to_string(), json!("top_up")),
            ("tenure".to_string(), json!(12)),
            ("is_employee".to_string(), json!(true)),
        ]);
        assert!(condition_holds("product", &json!("top_up"), &f));
        assert!(!condition_holds("product", &json!("Top_Up"), &f));
        assert!(condition_holds("tenure", &json!(12.0), &f));
        assert!(!condition_holds("tenure", &json!("12"), &f));
        assert!(condition_holds("is_employee", &json!(true), &f));
        assert!(!condition_holds("is_employee", &json!("true"), &f));
    }

    #[test]
    fn test_malformed_comparator_never_matches() {
        assert_eq!(
            Condition::parse(&json!(">=abc")),
            Condition::Malformed(">=abc")
        );
        assert!(!condition_holds("credit_score", &json!(">=abc"), &facts(json!(900))));
    }
}
