//! # Light Source Command Protocol
//!
//! Framing and serial settings for the two Schott controller families. Both speak
//! the same command vocabulary; they only differ in the start token and terminator
//! wrapped around every command line.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serialport::{DataBits, Parity, StopBits};

use crate::error::{LightError, Result};
use crate::reply::{QueryKind, ReplyLayout};

// ==========================================
// 指令清單 (MC-LS command set)
// ==========================================
pub mod cmds {
    pub const OUTPUT_ON: &str          = "L1";
    pub const OUTPUT_OFF: &str         = "L0";
    pub const SET_INTENSITY: &str      = "I";
    pub const KNOB_POSITION: &str      = "A0?";
    pub const REAR_ANALOG: &str        = "A1?";
    pub const BOARD_TEMP: &str         = "BT?";
    pub const FRONT_SWITCH: &str       = "D0?";
    pub const DIGITAL_INPUT: &str      = "D1?";
    pub const FIRMWARE: &str           = "F?";
    pub const FAN_SPEED: &str          = "G?";
    pub const FRONT_LOCKOUT: &str      = "HLF?";
    pub const ANALOG_LOCKOUT: &str     = "HLM?";
    pub const INTENSITY: &str          = "I?";
    pub const PRECISE_INTENSITY: &str  = "IP?";
    pub const CONTROL_LOCKOUT: &str    = "K?";
    pub const OUTPUT_ENABLED: &str     = "L?";
    pub const HEATSINK_TEMP: &str      = "LT?";
    pub const CONTROL_SOURCE: &str     = "M?";
    pub const PRODUCT_NAME: &str       = "Q";
    pub const INPUT_VOLTAGE: &str      = "VI?";
    pub const SERIAL_NUMBER: &str      = "Z";
    pub const MODEL_NUMBER: &str       = "ZM";
}

/// Full scale of the 2-hex-digit intensity register.
pub const FULL_SCALE: u32 = 255;
/// Full scale of the 3-hex-digit "precise" intensity register.
pub const PRECISE_FULL_SCALE: u32 = 2047;

/// Serial settings and framing tokens of one controller family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtocolConfig {
    pub name: &'static str,
    pub start_token: &'static str,
    pub terminator: &'static str,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    /// `None` lets a read block until the terminator shows up.
    pub timeout: Option<Duration>,
    /// Reply layouts that differ from the shared MC-LS table.
    pub overrides: &'static [(QueryKind, ReplyLayout)],
}

/// MC-LS controllers (USB or RS232).
pub const MCLS: ProtocolConfig = ProtocolConfig {
    name: "MCLS",
    start_token: "&",
    terminator: "\r",
    baud_rate: 9600,
    data_bits: DataBits::Eight,
    stop_bits: StopBits::One,
    parity: Parity::None,
    timeout: None,
    overrides: &[],
};

/// KL series cold light sources.
pub const KL: ProtocolConfig = ProtocolConfig {
    name: "KL",
    start_token: "0",
    terminator: ";",
    baud_rate: 9600,
    data_bits: DataBits::Eight,
    stop_bits: StopBits::One,
    parity: Parity::None,
    timeout: Some(Duration::from_millis(500)),
    overrides: &[],
};

impl Default for ProtocolConfig {
    fn default() -> Self {
        MCLS
    }
}

impl ProtocolConfig {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Wrap a command body into a ready-to-send frame.
    ///
    /// Fails with [`LightError::Encoding`] when the body is not ASCII or carries
    /// the terminator, which would split the frame on the device side.
    pub fn frame(&self, body: &str) -> Result<Vec<u8>> {
        if !body.is_ascii() || body.contains(self.terminator) {
            return Err(LightError::Encoding {
                command: body.to_string(),
            });
        }
        let mut frame =
            Vec::with_capacity(self.start_token.len() + body.len() + self.terminator.len());
        frame.extend_from_slice(self.start_token.as_bytes());
        frame.extend_from_slice(body.as_bytes());
        frame.extend_from_slice(self.terminator.as_bytes());
        Ok(frame)
    }

    /// Last byte of the terminator, which ends every reply line.
    pub fn terminator_byte(&self) -> u8 {
        self.terminator.as_bytes().last().copied().unwrap_or(b'\r')
    }

    pub fn layout_for(&self, kind: QueryKind) -> ReplyLayout {
        self.overrides
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, layout)| *layout)
            .unwrap_or_else(|| kind.layout())
    }
}

/// Known controller families, selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Mcls,
    Kl,
}

impl Protocol {
    pub fn config(self) -> ProtocolConfig {
        match self {
            Protocol::Mcls => MCLS,
            Protocol::Kl => KL,
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mcls" | "mc-ls" => Ok(Protocol::Mcls),
            "kl" => Ok(Protocol::Kl),
            other => Err(format!("unknown protocol '{other}' (expected mcls or kl)")),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config().name)
    }
}
