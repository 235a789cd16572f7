//! # Light Source Session
//!
//! One open connection to one controller. Every exchange is a blocking
//! write-then-readline held under a single lock, so a session shared between
//! threads never interleaves frames.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info, warn};

use crate::error::{LightError, Result};
use crate::protocol::{cmds, ProtocolConfig, FULL_SCALE, MCLS};
use crate::reply::{self, ControlLockout, ControlSource, QueryKind, Value};
use crate::transport::{self, Transport};

/// Read deadline used while probing ports, when the protocol has none.
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Output state as last confirmed by the device.
///
/// Tracked locally from `L1`/`L0` acknowledgements, never polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputState {
    #[default]
    Unknown,
    On,
    Off,
}

#[derive(Debug, Default)]
struct Cache {
    output: OutputState,
    intensity: Option<f64>,
}

/// Port and cache share one lock, so a cache update always matches the last
/// frame the device answered.
struct Session<T> {
    port: T,
    cache: Cache,
}

/// Driver for the Schott MC-LS / KL light sources.
pub struct Light<T: Transport = Box<dyn SerialPort>> {
    config: ProtocolConfig,
    session: Mutex<Session<T>>,
}

impl Light {
    /// Open an MC-LS controller on `port` ("COM3", "/dev/ttyUSB0", ...).
    pub fn open(port: &str) -> Result<Self> {
        Self::open_with(port, MCLS)
    }

    pub fn open_with(port: &str, config: ProtocolConfig) -> Result<Self> {
        let handle = transport::open_port(port, &config)?;
        info!(port, protocol = config.name, "light source port opened");
        Ok(Self::new(handle, config))
    }
}

impl<T: Transport> Light<T> {
    pub fn new(transport: T, config: ProtocolConfig) -> Self {
        Self {
            config,
            session: Mutex::new(Session {
                port: transport,
                cache: Cache::default(),
            }),
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Release the port.
    pub fn close(self) {
        info!(protocol = self.config.name, "light source session closed");
    }

    /// Send `body` and return the decoded reply line.
    pub fn query(&self, body: &str) -> Result<String> {
        self.exchange(body, |line, _| line.to_string())
    }

    /// One locked round trip; `then` runs on the reply before the lock is released.
    fn exchange<R>(&self, body: &str, then: impl FnOnce(&str, &mut Cache) -> R) -> Result<R> {
        let frame = self.config.frame(body)?;
        let mut session = self.lock()?;
        // 清空 Input Buffer (避免讀到上一個指令的遲到回應)
        session.port.clear_input()?;
        session.port.write_all(&frame)?;
        debug!(tx = body, "frame sent");
        let raw = session
            .port
            .read_until(self.config.terminator_byte(), self.config.timeout)?;
        let line = reply::decode_line(&raw, self.config.terminator)?;
        debug!(rx = %line, "reply received");
        Ok(then(&line, &mut session.cache))
    }

    /// Issue the query for `kind` and parse its reply.
    pub fn query_value(&self, kind: QueryKind) -> Result<Value> {
        let line = self.query(kind.command())?;
        reply::parse_with(&line, kind, self.config.layout_for(kind))
    }

    /// Enable the LED output.
    pub fn set_on(&self) -> Result<()> {
        self.switch_output(cmds::OUTPUT_ON, '1', OutputState::On)
    }

    /// Disable the LED output.
    pub fn set_off(&self) -> Result<()> {
        self.switch_output(cmds::OUTPUT_OFF, '0', OutputState::Off)
    }

    fn switch_output(&self, body: &str, confirm: char, target: OutputState) -> Result<()> {
        self.exchange(body, |line, cache| {
            if line.ends_with(confirm) {
                cache.output = target;
                info!(state = ?target, "light output switched");
            } else {
                warn!(command = body, reply = %line, "output change not confirmed, keeping cached state");
            }
        })
    }

    /// Set the LED intensity, `e` in (0, 1].
    ///
    /// Values outside the range are ignored and nothing is sent.
    pub fn set_intensity(&self, e: f64) -> Result<()> {
        if !(e > 0.0 && e <= 1.0) {
            warn!(intensity = e, "intensity outside (0, 1], ignored");
            return Ok(());
        }
        let level = (e * FULL_SCALE as f64) as u32;
        self.exchange(&format!("{}{:x}", cmds::SET_INTENSITY, level), |line, cache| {
            debug!(reply = %line, level, "intensity set");
            cache.intensity = Some(e);
        })
    }

    pub fn output_state(&self) -> OutputState {
        self.lock().map(|s| s.cache.output).unwrap_or_default()
    }

    pub fn is_on(&self) -> bool {
        self.output_state() == OutputState::On
    }

    /// Last intensity accepted by [`set_intensity`](Self::set_intensity).
    pub fn cached_intensity(&self) -> Option<f64> {
        self.lock().ok().and_then(|s| s.cache.intensity)
    }

    /// Front knob position in percent.
    pub fn knob_position(&self) -> Result<f64> {
        self.query_float(QueryKind::KnobPosition)
    }

    /// Rear analog input in percent.
    pub fn rear_analog_input(&self) -> Result<f64> {
        self.query_float(QueryKind::RearAnalogInput)
    }

    /// Board temperature in °C.
    pub fn board_temperature(&self) -> Result<f64> {
        self.query_float(QueryKind::BoardTemperature)
    }

    pub fn front_switch(&self) -> Result<bool> {
        self.query_flag(QueryKind::FrontSwitch)
    }

    pub fn digital_input(&self) -> Result<bool> {
        self.query_flag(QueryKind::DigitalInput)
    }

    pub fn firmware_version(&self) -> Result<String> {
        self.query_text(QueryKind::FirmwareVersion)
    }

    /// Fan speed in RPM.
    pub fn fan_speed(&self) -> Result<i64> {
        match self.query_value(QueryKind::FanSpeed)? {
            Value::Integer(rpm) => Ok(rpm),
            other => Err(mismatch(QueryKind::FanSpeed, other)),
        }
    }

    pub fn front_lockout(&self) -> Result<bool> {
        self.query_flag(QueryKind::FrontLockout)
    }

    pub fn analog_lockout(&self) -> Result<bool> {
        self.query_flag(QueryKind::AnalogLockout)
    }

    /// Current intensity normalized to [0, 1], two decimals.
    pub fn intensity(&self) -> Result<f64> {
        self.query_float(QueryKind::Intensity)
    }

    /// Current intensity from the 11-bit register, normalized to [0, 1].
    pub fn precise_intensity(&self) -> Result<f64> {
        self.query_float(QueryKind::PreciseIntensity)
    }

    pub fn control_lockout(&self) -> Result<Option<ControlLockout>> {
        match self.query_value(QueryKind::ControlLockout)? {
            Value::Lockout(lockout) => Ok(lockout),
            other => Err(mismatch(QueryKind::ControlLockout, other)),
        }
    }

    pub fn output_enabled(&self) -> Result<bool> {
        self.query_flag(QueryKind::OutputEnabled)
    }

    /// Heatsink temperature in °C.
    pub fn heatsink_temperature(&self) -> Result<f64> {
        self.query_float(QueryKind::HeatsinkTemperature)
    }

    /// Interface currently in control; `None` when no controller is reported.
    pub fn control_source(&self) -> Result<Option<ControlSource>> {
        match self.query_value(QueryKind::ControlSource)? {
            Value::Source(source) => Ok(source),
            other => Err(mismatch(QueryKind::ControlSource, other)),
        }
    }

    pub fn product_name(&self) -> Result<String> {
        self.query_text(QueryKind::ProductName)
    }

    /// Input voltage in volts.
    pub fn input_voltage(&self) -> Result<f64> {
        self.query_float(QueryKind::InputVoltage)
    }

    pub fn serial_number(&self) -> Result<String> {
        self.query_text(QueryKind::SerialNumber)
    }

    pub fn model_number(&self) -> Result<String> {
        self.query_text(QueryKind::ModelNumber)
    }

    fn query_float(&self, kind: QueryKind) -> Result<f64> {
        match self.query_value(kind)? {
            Value::Float(v) => Ok(v),
            other => Err(mismatch(kind, other)),
        }
    }

    fn query_flag(&self, kind: QueryKind) -> Result<bool> {
        match self.query_value(kind)? {
            Value::Flag(v) => Ok(v),
            other => Err(mismatch(kind, other)),
        }
    }

    fn query_text(&self, kind: QueryKind) -> Result<String> {
        match self.query_value(kind)? {
            Value::Text(v) => Ok(v),
            other => Err(mismatch(kind, other)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Session<T>>> {
        self.session.lock().map_err(|_| LightError::LockPoisoned)
    }
}

// only reachable when a layout override changes the conversion of a typed accessor
fn mismatch(kind: QueryKind, value: Value) -> LightError {
    LightError::Format {
        kind,
        field: format!("{value:?}"),
    }
}

/// Try every serial port and return the first one answering as a light source.
///
/// Ports that fail to open or to answer the product-name query are skipped.
pub fn probe_ports(config: ProtocolConfig) -> Option<(String, Light)> {
    let config = config.with_timeout(config.timeout.or(Some(PROBE_TIMEOUT)));
    for name in transport::list_ports() {
        let light = match Light::open_with(&name, config) {
            Ok(light) => light,
            Err(e) => {
                debug!(port = %name, error = %e, "cannot open port");
                continue;
            }
        };
        match light.product_name() {
            Ok(product) => {
                info!(port = %name, product = %product, "light source found");
                return Some((name, light));
            }
            Err(e) => debug!(port = %name, error = %e, "not a light source"),
        }
    }
    None
}
