//! Typed device properties
//!
//! A device is described by a fixed set of [`PropertySpec`]s. Each spec fixes
//! the value type, an optional range, the default, and which direction the
//! value is synchronized in.

use std::fmt;

use serde_json::Value;

use crate::{Error, Result};

/// Default number of significant digits compared when verifying floats
pub const DEFAULT_FLOAT_PRECISION: u32 = 12;

/// Value of a single property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PropertyValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(i) => Some(*i as f64),
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, PropertyValue::Float(f) if f.is_nan())
    }

    /// JSON form sent to the device. Non-finite floats become `null`.
    pub fn to_json(&self) -> Value {
        match self {
            PropertyValue::Bool(b) => Value::Bool(*b),
            PropertyValue::Int(i) => Value::from(*i),
            PropertyValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            PropertyValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Int(i) => write!(f, "{}", i),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(v as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<f32> for PropertyValue {
    fn from(v: f32) -> Self {
        PropertyValue::Float(v as f64)
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

/// Value type of a property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    Bool,
    Int,
    Float { range: Option<(f64, f64)> },
    Text,
    /// One of a fixed set of strings
    Enum(Vec<String>),
}

/// Direction a property is synchronized in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Local writes go to the device, device updates come back
    #[default]
    Bidirectional,
    /// Only the device writes it (sensor readings)
    ReadOnly,
    /// Never leaves the client (connectivity, status text)
    LocalOnly,
}

/// Definition of one property
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    pub name: String,
    pub kind: PropertyKind,
    pub sync: SyncMode,
    pub default: PropertyValue,
}

impl PropertySpec {
    pub fn bool(name: &str, default: bool) -> Self {
        Self::new(name, PropertyKind::Bool, PropertyValue::Bool(default))
    }

    pub fn int(name: &str, default: i64) -> Self {
        Self::new(name, PropertyKind::Int, PropertyValue::Int(default))
    }

    pub fn float(name: &str, default: f64) -> Self {
        Self::new(
            name,
            PropertyKind::Float { range: None },
            PropertyValue::Float(default),
        )
    }

    pub fn text(name: &str, default: &str) -> Self {
        Self::new(name, PropertyKind::Text, PropertyValue::from(default))
    }

    /// Enumerated string; the first choice is the default
    pub fn choice(name: &str, choices: &[&str]) -> Self {
        let default = choices.first().copied().unwrap_or_default();
        Self::new(
            name,
            PropertyKind::Enum(choices.iter().map(|c| c.to_string()).collect()),
            PropertyValue::from(default),
        )
    }

    fn new(name: &str, kind: PropertyKind, default: PropertyValue) -> Self {
        Self {
            name: name.to_string(),
            kind,
            sync: SyncMode::Bidirectional,
            default,
        }
    }

    /// Limit a float property to `[low, high]`
    pub fn range(mut self, low: f64, high: f64) -> Self {
        if let PropertyKind::Float { range } = &mut self.kind {
            *range = Some((low, high));
        }
        self
    }

    pub fn read_only(mut self) -> Self {
        self.sync = SyncMode::ReadOnly;
        self
    }

    pub fn local_only(mut self) -> Self {
        self.sync = SyncMode::LocalOnly;
        self
    }

    /// Whether a local write is sent to the device
    pub fn syncs_outbound(&self) -> bool {
        self.sync == SyncMode::Bidirectional
    }

    /// Whether a device value is applied locally
    pub fn syncs_inbound(&self) -> bool {
        self.sync != SyncMode::LocalOnly
    }

    /// Check a locally supplied value, widening integers for float properties
    pub fn validate(&self, value: PropertyValue) -> Result<PropertyValue> {
        match (&self.kind, value) {
            (PropertyKind::Bool, v @ PropertyValue::Bool(_)) => Ok(v),
            (PropertyKind::Int, v @ PropertyValue::Int(_)) => Ok(v),
            (PropertyKind::Float { range }, v @ (PropertyValue::Float(_) | PropertyValue::Int(_))) => {
                let f = v.as_f64().unwrap_or(f64::NAN);
                if let Some((low, high)) = range {
                    if !(f >= *low && f <= *high) {
                        return Err(Error::invalid_value(
                            &self.name,
                            format!("{} outside [{}, {}]", f, low, high),
                        ));
                    }
                }
                Ok(PropertyValue::Float(f))
            }
            (PropertyKind::Text, v @ PropertyValue::Text(_)) => Ok(v),
            (PropertyKind::Enum(choices), PropertyValue::Text(s)) => {
                if choices.iter().any(|c| *c == s) {
                    Ok(PropertyValue::Text(s))
                } else {
                    Err(Error::invalid_value(
                        &self.name,
                        format!("{:?} is not one of {:?}", s, choices),
                    ))
                }
            }
            (kind, other) => Err(Error::invalid_value(
                &self.name,
                format!("expected {:?}, got {:?}", kind, other),
            )),
        }
    }

    /// Convert a JSON value from the device.
    ///
    /// `null` for a float property decodes as NaN: the firmware reports
    /// unreadable sensors as `NaN`, which the codec turns into `null`.
    pub fn coerce(&self, value: &Value) -> Result<PropertyValue> {
        let typed = match (&self.kind, value) {
            (PropertyKind::Bool, Value::Bool(b)) => PropertyValue::Bool(*b),
            (PropertyKind::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                PropertyValue::Int(n.as_i64().ok_or_else(|| {
                    Error::invalid_value(&self.name, format!("{} out of range", n))
                })?)
            }
            (PropertyKind::Float { .. }, Value::Number(n)) => {
                PropertyValue::Float(n.as_f64().unwrap_or(f64::NAN))
            }
            (PropertyKind::Float { .. }, Value::Null) => return Ok(PropertyValue::Float(f64::NAN)),
            (PropertyKind::Text | PropertyKind::Enum(_), Value::String(s)) => {
                PropertyValue::Text(s.clone())
            }
            (kind, other) => {
                return Err(Error::invalid_value(
                    &self.name,
                    format!("expected {:?}, got {}", kind, other),
                ))
            }
        };
        self.validate(typed)
    }
}

/// Compare a requested value against the device's echo.
///
/// Floats match when equal to `precision` significant digits, which absorbs
/// the rounding picked up by a trip through the firmware's float formatting.
/// Everything else must be identical.
pub fn values_match(requested: &PropertyValue, echoed: &PropertyValue, precision: u32) -> bool {
    match (requested, echoed) {
        (PropertyValue::Float(a), PropertyValue::Float(b)) => {
            match (round_significant(*a, precision), round_significant(*b, precision)) {
                (Some(a), Some(b)) => a == b,
                // NaN and infinities never confirm a write
                _ => false,
            }
        }
        (a, b) => a == b,
    }
}

/// Canonical text of `value` rounded to `digits` significant digits
fn round_significant(value: f64, digits: u32) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    let decimals = digits.saturating_sub(1) as usize;
    let text = format!("{:.*e}", decimals, value);
    // -0 and 0 are the same reading
    Some(if text.starts_with("-0.") && value == 0.0 {
        text[1..].to_string()
    } else {
        text
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_float_tolerance() {
        let requested = PropertyValue::Float(1.000000000001);
        assert!(values_match(
            &requested,
            &PropertyValue::Float(1.000000000002),
            DEFAULT_FLOAT_PRECISION
        ));
        assert!(!values_match(
            &requested,
            &PropertyValue::Float(2.0),
            DEFAULT_FLOAT_PRECISION
        ));
    }

    #[test]
    fn test_float_tolerance_scales_with_magnitude() {
        assert!(values_match(
            &PropertyValue::Float(25.0),
            &PropertyValue::Float(25.000000000000004),
            DEFAULT_FLOAT_PRECISION
        ));
        assert!(!values_match(
            &PropertyValue::Float(25.0),
            &PropertyValue::Float(24.0),
            DEFAULT_FLOAT_PRECISION
        ));
    }

    #[test]
    fn test_nan_never_matches() {
        let nan = PropertyValue::Float(f64::NAN);
        assert!(!values_match(&nan, &nan, DEFAULT_FLOAT_PRECISION));
    }

    #[test]
    fn test_exact_match_for_other_types() {
        assert!(values_match(
            &PropertyValue::from("heat"),
            &PropertyValue::from("heat"),
            12
        ));
        assert!(!values_match(&PropertyValue::Int(6), &PropertyValue::Int(7), 12));
        assert!(!values_match(
            &PropertyValue::Bool(true),
            &PropertyValue::Bool(false),
            12
        ));
    }

    #[test]
    fn test_validate_range() {
        let spec = PropertySpec::float("hysteresisTemp", 0.6).range(0.2, 10.0);
        assert!(spec.validate(PropertyValue::Float(1.0)).is_ok());
        assert!(spec.validate(PropertyValue::Float(11.0)).is_err());
        assert_eq!(
            spec.validate(PropertyValue::Int(2)).unwrap(),
            PropertyValue::Float(2.0)
        );
    }

    #[test]
    fn test_validate_enum() {
        let spec = PropertySpec::choice("systemMode", &["off", "heat", "cool"]);
        assert_eq!(spec.default, PropertyValue::from("off"));
        assert!(spec.validate(PropertyValue::from("cool")).is_ok());
        assert!(spec.validate(PropertyValue::from("auto")).is_err());
        assert!(spec.validate(PropertyValue::Int(1)).is_err());
    }

    #[test]
    fn test_coerce_from_json() {
        let temp = PropertySpec::float("desiredTemp", 24.0);
        assert_eq!(temp.coerce(&json!(25)).unwrap(), PropertyValue::Float(25.0));
        assert!(temp.coerce(&Value::Null).unwrap().is_nan());
        assert!(temp.coerce(&json!("hot")).is_err());

        let pin = PropertySpec::int("ledPin", 13);
        assert_eq!(pin.coerce(&json!(12)).unwrap(), PropertyValue::Int(12));
        assert!(pin.coerce(&json!(12.5)).is_err());

        let led = PropertySpec::bool("ledActive", false);
        assert_eq!(led.coerce(&json!(true)).unwrap(), PropertyValue::Bool(true));
    }

    #[test]
    fn test_sync_modes() {
        let inside = PropertySpec::float("insideTemp", 24.0).read_only();
        assert!(!inside.syncs_outbound());
        assert!(inside.syncs_inbound());

        let status = PropertySpec::text("status", "").local_only();
        assert!(!status.syncs_outbound());
        assert!(!status.syncs_inbound());

        let desired = PropertySpec::float("desiredTemp", 24.0);
        assert!(desired.syncs_outbound());
        assert!(desired.syncs_inbound());
    }

    #[test]
    fn test_float_to_json() {
        assert_eq!(PropertyValue::Float(21.5).to_json(), json!(21.5));
        assert_eq!(PropertyValue::Float(f64::NAN).to_json(), Value::Null);
    }
}
