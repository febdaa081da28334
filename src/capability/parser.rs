//! Value conversions between raw cluster values and capability values.
//!
//! Parsers are plain data so bindings can be built from manifests; the
//! `Custom` variants carry a closure for device-specific quirks.

use std::fmt;
use std::sync::Arc;

use super::CapabilityValue;
use super::battery::{BatteryState, percentage_from_decivolts};
use crate::error::ParseError;
use crate::zcl::AttributeValue;

pub type ParseFn =
    Arc<dyn Fn(&AttributeValue) -> Result<Option<CapabilityValue>, ParseError> + Send + Sync>;
pub type SetFn = Arc<dyn Fn(&CapabilityValue) -> Result<AttributeValue, ParseError> + Send + Sync>;

/// Raw attribute value → capability value.
///
/// `Ok(None)` means "no update".
#[derive(Clone)]
pub enum ValueParser {
    /// Numbers become `Number`, booleans and text pass through.
    Passthrough,
    /// Non-zero integers and `true` become `true`.
    Boolean,
    /// A single bit of an integer bitmask.
    Bit(u8),
    /// `raw / divisor`.
    Scale { divisor: f64 },
    /// Half-percent battery scale, `clamp(round(raw / 2), 0, 100)`.
    BatteryPercentage,
    /// Half-percent battery scale compared against a low threshold.
    BatteryLow { threshold: u8 },
    /// Battery voltage in decivolts through the coin cell curve.
    BatteryVoltage,
    Custom(ParseFn),
}

impl ValueParser {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&AttributeValue) -> Result<Option<CapabilityValue>, ParseError>
            + Send
            + Sync
            + 'static,
    {
        ValueParser::Custom(Arc::new(f))
    }

    pub fn parse(&self, raw: &AttributeValue) -> Result<Option<CapabilityValue>, ParseError> {
        match self {
            ValueParser::Passthrough => Ok(Some(match raw {
                AttributeValue::Bool(b) => CapabilityValue::Bool(*b),
                AttributeValue::Int(v) => CapabilityValue::Number(*v as f64),
                AttributeValue::Float(v) => CapabilityValue::Number(*v),
                AttributeValue::Text(s) => CapabilityValue::Text(s.clone()),
                AttributeValue::Bytes(b) => CapabilityValue::Text(hex::encode(b)),
            })),
            ValueParser::Boolean => {
                let v = integer(raw)?;
                Ok(Some(CapabilityValue::Bool(v != 0)))
            }
            ValueParser::Bit(bit) => {
                if *bit >= 64 {
                    return Err(ParseError::OutOfRange(format!("bit {}", bit)));
                }
                let v = integer(raw)?;
                Ok(Some(CapabilityValue::Bool((v >> bit) & 1 == 1)))
            }
            ValueParser::Scale { divisor } => {
                if *divisor == 0.0 {
                    return Err(ParseError::OutOfRange("divisor 0".to_string()));
                }
                let v = number(raw)?;
                Ok(Some(CapabilityValue::Number(v / divisor)))
            }
            ValueParser::BatteryPercentage => {
                let battery = BatteryState::new(integer(raw)?);
                Ok(Some(CapabilityValue::Number(f64::from(battery.percentage()))))
            }
            ValueParser::BatteryLow { threshold } => {
                let battery = BatteryState::new(integer(raw)?).with_low_threshold(*threshold);
                Ok(Some(CapabilityValue::Bool(battery.is_low())))
            }
            ValueParser::BatteryVoltage => {
                let v = integer(raw)?;
                Ok(Some(CapabilityValue::Number(f64::from(
                    percentage_from_decivolts(v),
                ))))
            }
            ValueParser::Custom(f) => f(raw),
        }
    }
}

impl fmt::Debug for ValueParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueParser::Passthrough => write!(f, "Passthrough"),
            ValueParser::Boolean => write!(f, "Boolean"),
            ValueParser::Bit(bit) => write!(f, "Bit({})", bit),
            ValueParser::Scale { divisor } => write!(f, "Scale({})", divisor),
            ValueParser::BatteryPercentage => write!(f, "BatteryPercentage"),
            ValueParser::BatteryLow { threshold } => write!(f, "BatteryLow({})", threshold),
            ValueParser::BatteryVoltage => write!(f, "BatteryVoltage"),
            ValueParser::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Capability value → raw attribute value for writes and commands.
#[derive(Clone)]
pub enum SetParser {
    Passthrough,
    /// `true`/`false` → 1/0.
    BoolToInt,
    /// `value * multiplier`, rounded to an integer.
    Scale { multiplier: f64 },
    Custom(SetFn),
}

impl SetParser {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&CapabilityValue) -> Result<AttributeValue, ParseError> + Send + Sync + 'static,
    {
        SetParser::Custom(Arc::new(f))
    }

    pub fn parse(&self, value: &CapabilityValue) -> Result<AttributeValue, ParseError> {
        match self {
            SetParser::Passthrough => Ok(match value {
                CapabilityValue::Bool(b) => AttributeValue::Bool(*b),
                CapabilityValue::Number(n) if n.fract() == 0.0 => AttributeValue::Int(*n as i64),
                CapabilityValue::Number(n) => AttributeValue::Float(*n),
                CapabilityValue::Text(s) => AttributeValue::Text(s.clone()),
            }),
            SetParser::BoolToInt => match value {
                CapabilityValue::Bool(b) => Ok(AttributeValue::Int(i64::from(*b))),
                other => Err(ParseError::UnexpectedType {
                    expected: "bool",
                    actual: other.to_string(),
                }),
            },
            SetParser::Scale { multiplier } => match value {
                CapabilityValue::Number(n) => {
                    Ok(AttributeValue::Int((n * multiplier).round() as i64))
                }
                other => Err(ParseError::UnexpectedType {
                    expected: "number",
                    actual: other.to_string(),
                }),
            },
            SetParser::Custom(f) => f(value),
        }
    }
}

impl fmt::Debug for SetParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetParser::Passthrough => write!(f, "Passthrough"),
            SetParser::BoolToInt => write!(f, "BoolToInt"),
            SetParser::Scale { multiplier } => write!(f, "Scale({})", multiplier),
            SetParser::Custom(_) => write!(f, "Custom"),
        }
    }
}

fn integer(raw: &AttributeValue) -> Result<i64, ParseError> {
    raw.as_i64().ok_or_else(|| ParseError::UnexpectedType {
        expected: "integer",
        actual: raw.type_name().to_string(),
    })
}

fn number(raw: &AttributeValue) -> Result<f64, ParseError> {
    raw.as_f64().ok_or_else(|| ParseError::UnexpectedType {
        expected: "number",
        actual: raw.type_name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_parser_reads_single_bit() {
        let alarm = ValueParser::Bit(0);
        let tamper = ValueParser::Bit(2);
        let status = AttributeValue::Int(0b0101);
        assert_eq!(alarm.parse(&status), Ok(Some(CapabilityValue::Bool(true))));
        assert_eq!(tamper.parse(&status), Ok(Some(CapabilityValue::Bool(true))));
        assert_eq!(
            ValueParser::Bit(1).parse(&status),
            Ok(Some(CapabilityValue::Bool(false)))
        );
    }

    #[test]
    fn test_scale_and_battery() {
        let temp = ValueParser::Scale { divisor: 100.0 };
        assert_eq!(
            temp.parse(&AttributeValue::Int(2150)),
            Ok(Some(CapabilityValue::Number(21.5)))
        );
        assert_eq!(
            ValueParser::BatteryPercentage.parse(&AttributeValue::Int(136)),
            Ok(Some(CapabilityValue::Number(68.0)))
        );
        assert_eq!(
            ValueParser::BatteryLow { threshold: 20 }.parse(&AttributeValue::Int(30)),
            Ok(Some(CapabilityValue::Bool(true)))
        );
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let result = ValueParser::Boolean.parse(&AttributeValue::Text("on".into()));
        assert!(matches!(result, Err(ParseError::UnexpectedType { .. })));
    }

    #[test]
    fn test_custom_parser_can_skip() {
        let parser = ValueParser::custom(|raw| match raw.as_i64() {
            Some(0xFFFF) => Ok(None),
            Some(v) => Ok(Some(CapabilityValue::Number(v as f64))),
            None => Err(ParseError::Custom("not a number".into())),
        });
        assert_eq!(parser.parse(&AttributeValue::Int(0xFFFF)), Ok(None));
        assert_eq!(
            parser.parse(&AttributeValue::Int(7)),
            Ok(Some(CapabilityValue::Number(7.0)))
        );
    }

    #[test]
    fn test_set_parsers() {
        assert_eq!(
            SetParser::Passthrough.parse(&CapabilityValue::Number(22.0)),
            Ok(AttributeValue::Int(22))
        );
        assert_eq!(
            SetParser::BoolToInt.parse(&CapabilityValue::Bool(true)),
            Ok(AttributeValue::Int(1))
        );
        assert_eq!(
            SetParser::Scale { multiplier: 10.0 }.parse(&CapabilityValue::Number(21.55)),
            Ok(AttributeValue::Int(216))
        );
    }
}
