//! Reply parsing.
//!
//! Replies are not self-describing: each query has a fixed-width answer and the
//! value sits at a hard-coded offset. The table in [`QueryKind::layout`] holds
//! those offsets together with the conversion applied to the extracted field.

use std::fmt;

use crate::error::{LightError, Result};
use crate::protocol::{cmds, FULL_SCALE, PRECISE_FULL_SCALE};

/// Every read-only query the controllers answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    KnobPosition,
    RearAnalogInput,
    BoardTemperature,
    FrontSwitch,
    DigitalInput,
    FirmwareVersion,
    FanSpeed,
    FrontLockout,
    AnalogLockout,
    Intensity,
    PreciseIntensity,
    ControlLockout,
    OutputEnabled,
    HeatsinkTemperature,
    ControlSource,
    ProductName,
    InputVoltage,
    SerialNumber,
    ModelNumber,
}

/// Where the value sits inside the reply line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// The last `n` characters.
    Tail(usize),
    /// Everything from index `i` on. The field must not be empty.
    From(usize),
}

/// How the extracted field becomes a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    Flag,
    Integer,
    /// Decimal number divided by a fixed scale (one implied decimal digit -> 10).
    Decimal { scale: f64 },
    /// Hex magnitude normalized by full scale, rounded to two decimals.
    HexIntensity,
    /// 3-hex-digit magnitude, capped at full scale.
    HexPreciseIntensity,
    Text,
    ControlSource,
    ControlLockout,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplyLayout {
    pub window: Window,
    pub conversion: Conversion,
}

impl QueryKind {
    pub const ALL: [QueryKind; 19] = [
        QueryKind::KnobPosition,
        QueryKind::RearAnalogInput,
        QueryKind::BoardTemperature,
        QueryKind::FrontSwitch,
        QueryKind::DigitalInput,
        QueryKind::FirmwareVersion,
        QueryKind::FanSpeed,
        QueryKind::FrontLockout,
        QueryKind::AnalogLockout,
        QueryKind::Intensity,
        QueryKind::PreciseIntensity,
        QueryKind::ControlLockout,
        QueryKind::OutputEnabled,
        QueryKind::HeatsinkTemperature,
        QueryKind::ControlSource,
        QueryKind::ProductName,
        QueryKind::InputVoltage,
        QueryKind::SerialNumber,
        QueryKind::ModelNumber,
    ];

    pub fn command(self) -> &'static str {
        match self {
            QueryKind::KnobPosition => cmds::KNOB_POSITION,
            QueryKind::RearAnalogInput => cmds::REAR_ANALOG,
            QueryKind::BoardTemperature => cmds::BOARD_TEMP,
            QueryKind::FrontSwitch => cmds::FRONT_SWITCH,
            QueryKind::DigitalInput => cmds::DIGITAL_INPUT,
            QueryKind::FirmwareVersion => cmds::FIRMWARE,
            QueryKind::FanSpeed => cmds::FAN_SPEED,
            QueryKind::FrontLockout => cmds::FRONT_LOCKOUT,
            QueryKind::AnalogLockout => cmds::ANALOG_LOCKOUT,
            QueryKind::Intensity => cmds::INTENSITY,
            QueryKind::PreciseIntensity => cmds::PRECISE_INTENSITY,
            QueryKind::ControlLockout => cmds::CONTROL_LOCKOUT,
            QueryKind::OutputEnabled => cmds::OUTPUT_ENABLED,
            QueryKind::HeatsinkTemperature => cmds::HEATSINK_TEMP,
            QueryKind::ControlSource => cmds::CONTROL_SOURCE,
            QueryKind::ProductName => cmds::PRODUCT_NAME,
            QueryKind::InputVoltage => cmds::INPUT_VOLTAGE,
            QueryKind::SerialNumber => cmds::SERIAL_NUMBER,
            QueryKind::ModelNumber => cmds::MODEL_NUMBER,
        }
    }

    /// Reply layout from the MC-LS command set.
    pub fn layout(self) -> ReplyLayout {
        let (window, conversion) = match self {
            QueryKind::KnobPosition
            | QueryKind::RearAnalogInput
            | QueryKind::BoardTemperature
            | QueryKind::HeatsinkTemperature
            | QueryKind::InputVoltage => (Window::From(2), Conversion::Decimal { scale: 10.0 }),
            QueryKind::FrontSwitch
            | QueryKind::DigitalInput
            | QueryKind::FrontLockout
            | QueryKind::AnalogLockout
            | QueryKind::OutputEnabled => (Window::Tail(1), Conversion::Flag),
            QueryKind::FirmwareVersion | QueryKind::ProductName | QueryKind::SerialNumber => {
                (Window::From(1), Conversion::Text)
            }
            QueryKind::ModelNumber => (Window::From(2), Conversion::Text),
            QueryKind::FanSpeed => (Window::From(1), Conversion::Integer),
            QueryKind::Intensity => (Window::Tail(2), Conversion::HexIntensity),
            QueryKind::PreciseIntensity => (Window::Tail(3), Conversion::HexPreciseIntensity),
            QueryKind::ControlLockout => (Window::Tail(1), Conversion::ControlLockout),
            QueryKind::ControlSource => (Window::Tail(1), Conversion::ControlSource),
        };
        ReplyLayout { window, conversion }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.command())
    }
}

/// Which interface currently drives the light output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSource {
    FrontPanel,
    RearAnalog,
    Rs232,
    Usb,
}

impl ControlSource {
    /// Digits the device does not document map to `None` ("no controller").
    pub fn from_digit(digit: char) -> Option<Self> {
        match digit {
            '0' => Some(ControlSource::FrontPanel),
            '1' => Some(ControlSource::RearAnalog),
            '2' => Some(ControlSource::Rs232),
            '4' => Some(ControlSource::Usb),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ControlSource::FrontPanel => "Front panel",
            ControlSource::RearAnalog => "Rear analog control",
            ControlSource::Rs232 => "RS232 port",
            ControlSource::Usb => "USB port",
        }
    }
}

impl fmt::Display for ControlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Physical controls currently disabled on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlLockout {
    None,
    FrontPanel,
    Analog,
    FrontPanelAndAnalog,
}

impl ControlLockout {
    pub fn from_digit(digit: char) -> Option<Self> {
        match digit {
            '0' => Some(ControlLockout::None),
            '1' => Some(ControlLockout::FrontPanel),
            '2' => Some(ControlLockout::Analog),
            '3' => Some(ControlLockout::FrontPanelAndAnalog),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ControlLockout::None => "No lockout",
            ControlLockout::FrontPanel => "Front panel locked",
            ControlLockout::Analog => "Analog input locked",
            ControlLockout::FrontPanelAndAnalog => "Front panel and analog input locked",
        }
    }
}

impl fmt::Display for ControlLockout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A parsed reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Flag(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Source(Option<ControlSource>),
    Lockout(Option<ControlLockout>),
}

/// Strip the terminator from a raw reply and decode it as ASCII.
///
/// The terminator is optional so a line cut short by the transport still decodes.
pub fn decode_line(raw: &[u8], terminator: &str) -> Result<String> {
    let body = raw.strip_suffix(terminator.as_bytes()).unwrap_or(raw);
    if !body.is_ascii() {
        return Err(LightError::Decode {
            reply: raw.to_vec(),
        });
    }
    // ASCII is always valid UTF-8
    Ok(body.iter().map(|&b| b as char).collect())
}

/// Parse a decoded reply line using the default layout of `kind`.
pub fn parse(line: &str, kind: QueryKind) -> Result<Value> {
    parse_with(line, kind, kind.layout())
}

/// Parse a decoded reply line with an explicit layout.
pub fn parse_with(line: &str, kind: QueryKind, layout: ReplyLayout) -> Result<Value> {
    // offsets below are byte offsets
    if !line.is_ascii() {
        return Err(LightError::Decode {
            reply: line.as_bytes().to_vec(),
        });
    }
    let field = extract(line, kind, layout.window)?;
    let format_err = || LightError::Format {
        kind,
        field: field.to_string(),
    };

    let value = match layout.conversion {
        Conversion::Flag => match field {
            "0" => Value::Flag(false),
            "1" => Value::Flag(true),
            _ => return Err(format_err()),
        },
        Conversion::Integer => {
            let digits = field.trim();
            if !is_digits(digits) {
                return Err(format_err());
            }
            Value::Integer(digits.parse().map_err(|_| format_err())?)
        }
        Conversion::Decimal { scale } => {
            let number = field.trim();
            if !is_decimal(number) {
                return Err(format_err());
            }
            let raw: f64 = number.parse().map_err(|_| format_err())?;
            Value::Float(raw / scale)
        }
        Conversion::HexIntensity => {
            if !is_hex(field) {
                return Err(format_err());
            }
            let magnitude = u32::from_str_radix(field, 16).map_err(|_| format_err())?;
            let normalized = magnitude.min(FULL_SCALE) as f64 / FULL_SCALE as f64;
            Value::Float((normalized * 100.0).round() / 100.0)
        }
        Conversion::HexPreciseIntensity => {
            if !is_hex(field) {
                return Err(format_err());
            }
            let magnitude = u32::from_str_radix(field, 16).map_err(|_| format_err())?;
            Value::Float(magnitude.min(PRECISE_FULL_SCALE) as f64 / PRECISE_FULL_SCALE as f64)
        }
        Conversion::Text => Value::Text(field.trim().to_string()),
        Conversion::ControlSource => Value::Source(last_char(field).and_then(ControlSource::from_digit)),
        Conversion::ControlLockout => {
            Value::Lockout(last_char(field).and_then(ControlLockout::from_digit))
        }
    };
    Ok(value)
}

fn extract(line: &str, kind: QueryKind, window: Window) -> Result<&str> {
    let too_short = || LightError::Protocol {
        kind,
        reply: line.to_string(),
    };
    // decoded lines are ASCII, so byte offsets are char offsets
    match window {
        Window::Tail(n) => line
            .len()
            .checked_sub(n)
            .map(|start| &line[start..])
            .ok_or_else(too_short),
        Window::From(i) if line.len() > i => Ok(&line[i..]),
        Window::From(_) => Err(too_short()),
    }
}

fn is_digits(field: &str) -> bool {
    !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit())
}

/// Plain decimal notation only: optional sign, digits, at most one point.
/// Rejects what `f64::from_str` also takes, like "nan", "inf" or "1e3".
fn is_decimal(field: &str) -> bool {
    let unsigned = field.strip_prefix('-').unwrap_or(field);
    let mut parts = unsigned.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    match parts.next() {
        Some(frac) => {
            (!whole.is_empty() || !frac.is_empty())
                && whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit())
        }
        None => is_digits(whole),
    }
}

fn is_hex(field: &str) -> bool {
    !field.is_empty() && field.bytes().all(|b| b.is_ascii_hexdigit())
}

fn last_char(field: &str) -> Option<char> {
    field.chars().last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_strips_protocol_terminator() {
        assert_eq!(decode_line(b"I7f\r", "\r").unwrap(), "I7f");
        assert_eq!(decode_line(b"I7f;", ";").unwrap(), "I7f");
        // a \r is payload for a ';'-terminated protocol
        assert_eq!(decode_line(b"I7f\r", ";").unwrap(), "I7f\r");
    }

    #[test]
    fn test_decode_rejects_non_ascii() {
        let err = decode_line(&[b'Q', 0xC3, 0xA9, b'\r'], "\r").unwrap_err();
        assert!(matches!(err, LightError::Decode { .. }));
    }

    #[test]
    fn test_intensity_is_normalized_and_rounded() {
        assert_eq!(parse("I7f", QueryKind::Intensity).unwrap(), Value::Float(0.5));
        assert_eq!(parse("Iff", QueryKind::Intensity).unwrap(), Value::Float(1.0));
        assert_eq!(parse("I00", QueryKind::Intensity).unwrap(), Value::Float(0.0));
        assert_eq!(parse("I1A", QueryKind::Intensity).unwrap(), Value::Float(0.1));
    }

    #[test]
    fn test_precise_intensity_is_capped() {
        assert_eq!(
            parse("IP7ff", QueryKind::PreciseIntensity).unwrap(),
            Value::Float(1.0)
        );
        assert_eq!(
            parse("IPfff", QueryKind::PreciseIntensity).unwrap(),
            Value::Float(1.0)
        );
        assert_eq!(
            parse("IP400", QueryKind::PreciseIntensity).unwrap(),
            Value::Float(1024.0 / 2047.0)
        );
    }

    #[test]
    fn test_control_source_digits() {
        let source = |reply: &str| match parse(reply, QueryKind::ControlSource).unwrap() {
            Value::Source(s) => s.map(ControlSource::description),
            other => panic!("unexpected value {other:?}"),
        };
        assert_eq!(source("M0"), Some("Front panel"));
        assert_eq!(source("M1"), Some("Rear analog control"));
        assert_eq!(source("M2"), Some("RS232 port"));
        assert_eq!(source("M4"), Some("USB port"));
        assert_eq!(source("M7"), None);
        // undocumented digits must not crash
        assert_eq!(source("M3"), None);
        assert_eq!(source("M9"), None);
        assert_eq!(source("Mx"), None);
    }

    #[test]
    fn test_control_lockout_digits() {
        assert_eq!(
            parse("K3", QueryKind::ControlLockout).unwrap(),
            Value::Lockout(Some(ControlLockout::FrontPanelAndAnalog))
        );
        assert_eq!(
            parse("K8", QueryKind::ControlLockout).unwrap(),
            Value::Lockout(None)
        );
    }

    #[test]
    fn test_flags() {
        assert_eq!(parse("L1", QueryKind::OutputEnabled).unwrap(), Value::Flag(true));
        assert_eq!(parse("HLF0", QueryKind::FrontLockout).unwrap(), Value::Flag(false));
        assert!(matches!(
            parse("D07", QueryKind::FrontSwitch),
            Err(LightError::Format { .. })
        ));
    }

    #[test]
    fn test_decimal_fields() {
        assert_eq!(parse("A0500", QueryKind::KnobPosition).unwrap(), Value::Float(50.0));
        assert_eq!(parse("BT312", QueryKind::BoardTemperature).unwrap(), Value::Float(31.2));
        assert_eq!(parse("VI120", QueryKind::InputVoltage).unwrap(), Value::Float(12.0));
        assert_eq!(parse("G2400", QueryKind::FanSpeed).unwrap(), Value::Integer(2400));
    }

    #[test]
    fn test_text_fields() {
        assert_eq!(
            parse("QMC-LS", QueryKind::ProductName).unwrap(),
            Value::Text("MC-LS".into())
        );
        assert_eq!(
            parse("ZM4100", QueryKind::ModelNumber).unwrap(),
            Value::Text("4100".into())
        );
    }

    #[test]
    fn test_short_reply_is_protocol_error() {
        assert!(matches!(
            parse("I", QueryKind::Intensity),
            Err(LightError::Protocol { .. })
        ));
        assert!(matches!(
            parse("BT", QueryKind::BoardTemperature),
            Err(LightError::Protocol { .. })
        ));
        assert!(matches!(
            parse("", QueryKind::OutputEnabled),
            Err(LightError::Protocol { .. })
        ));
    }

    #[test]
    fn test_bad_number_is_format_error() {
        assert!(matches!(
            parse("Ixz", QueryKind::Intensity),
            Err(LightError::Format { .. })
        ));
        assert!(matches!(
            parse("LT2a.", QueryKind::HeatsinkTemperature),
            Err(LightError::Format { .. })
        ));
    }

    #[test]
    fn test_non_ascii_line_is_decode_error() {
        assert!(matches!(
            parse("é1", QueryKind::Intensity),
            Err(LightError::Decode { .. })
        ));
        assert!(matches!(
            parse("Qé", QueryKind::ProductName),
            Err(LightError::Decode { .. })
        ));
    }

    #[test]
    fn test_numeric_fields_reject_non_digits() {
        for reply in ["BTnan", "BTinf", "BT1e3", "BT+12", "BT1.2.3", "BT."] {
            assert!(
                matches!(
                    parse(reply, QueryKind::BoardTemperature),
                    Err(LightError::Format { .. })
                ),
                "{reply}"
            );
        }
        assert!(matches!(
            parse("I+f", QueryKind::Intensity),
            Err(LightError::Format { .. })
        ));
        assert!(matches!(
            parse("IP+ff", QueryKind::PreciseIntensity),
            Err(LightError::Format { .. })
        ));
        assert!(matches!(
            parse("G+12", QueryKind::FanSpeed),
            Err(LightError::Format { .. })
        ));
        assert_eq!(
            parse("BT-5", QueryKind::BoardTemperature).unwrap(),
            Value::Float(-0.5)
        );
        assert_eq!(
            parse("BT31.5", QueryKind::BoardTemperature).unwrap(),
            Value::Float(3.15)
        );
    }

    #[test]
    fn test_every_kind_has_a_command() {
        for kind in QueryKind::ALL {
            assert!(!kind.command().is_empty());
            assert!(kind.command().is_ascii());
        }
    }
}
