use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Declared type of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    String,
    Number,
    Decimal,
    Boolean,
    Object,
    Array,
}

/// A dynamically-typed parameter value.
///
/// Decimals use [`rust_decimal::Decimal`] throughout — parameter policy often
/// carries monetary amounts, and native floats would lose exactness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterValue {
    String(String),
    Number(i64),
    Decimal(Decimal),
    Boolean(bool),
    Object(serde_json::Map<String, serde_json::Value>),
    Array(Vec<serde_json::Value>),
}

impl ParameterValue {
    /// The [`DataType`] tag of this value.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::String(_) => DataType::String,
            Self::Number(_) => DataType::Number,
            Self::Decimal(_) => DataType::Decimal,
            Self::Boolean(_) => DataType::Boolean,
            Self::Object(_) => DataType::Object,
            Self::Array(_) => DataType::Array,
        }
    }

    /// Read as an integer. Numbers convert directly; decimals convert only
    /// when they have no fractional part.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Decimal(d) => {
                if d.fract().is_zero() {
                    d.to_string().parse().ok()
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Read as a decimal. Numbers widen losslessly.
    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(d) => Some(*d),
            Self::Number(n) => Some(Decimal::from(*n)),
            _ => None,
        }
    }

    /// Read as a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Read as a string slice.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn data_type_tags() {
        assert_eq!(ParameterValue::Number(7).data_type(), DataType::Number);
        assert_eq!(
            ParameterValue::Decimal(Decimal::from_str("1.5").unwrap()).data_type(),
            DataType::Decimal
        );
        assert_eq!(
            ParameterValue::Boolean(true).data_type(),
            DataType::Boolean
        );
    }

    #[test]
    fn as_i64_conversions() {
        assert_eq!(ParameterValue::Number(42).as_i64(), Some(42));
        assert_eq!(
            ParameterValue::Decimal(Decimal::from_str("42").unwrap()).as_i64(),
            Some(42)
        );
        assert_eq!(
            ParameterValue::Decimal(Decimal::from_str("42.5").unwrap()).as_i64(),
            None
        );
        assert_eq!(ParameterValue::String("42".into()).as_i64(), None);
    }

    #[test]
    fn as_decimal_widens_numbers() {
        assert_eq!(
            ParameterValue::Number(10).as_decimal(),
            Some(Decimal::from(10))
        );
    }

    #[test]
    fn serde_tagged_roundtrip() {
        let v = ParameterValue::Decimal(Decimal::from_str("12.50").unwrap());
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.contains("\"DECIMAL\""));
        let back: ParameterValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn decimal_preserves_exactness() {
        // 0.1 + 0.2 is exactly 0.3 in decimal arithmetic.
        let a = Decimal::from_str("0.1").unwrap();
        let b = Decimal::from_str("0.2").unwrap();
        assert_eq!(a + b, Decimal::from_str("0.3").unwrap());

        let v = ParameterValue::Decimal(a + b);
        let json = serde_json::to_string(&v).unwrap();
        let back: ParameterValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_decimal().unwrap().to_string(), "0.3");
    }

    #[test]
    fn object_and_array_roundtrip() {
        let mut map = serde_json::Map::new();
        map.insert("levels".into(), serde_json::json!(["L1", "L2"]));
        let v = ParameterValue::Object(map);
        let json = serde_json::to_string(&v).unwrap();
        let back: ParameterValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
