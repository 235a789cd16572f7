//! # Schott Light Source Driver
//!
//! Serial driver for the Schott MC-LS and KL light source controllers.
//!
//! ```no_run
//! use schott_light::Light;
//!
//! # fn main() -> schott_light::Result<()> {
//! let light = Light::open("/dev/ttyUSB0")?;
//! light.set_on()?;
//! light.set_intensity(0.5)?;
//! println!("intensity: {}", light.intensity()?);
//! light.set_off()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod light;
pub mod protocol;
pub mod reply;
pub mod transport;

pub use error::{LightError, Result};
pub use light::{probe_ports, Light, OutputState};
pub use protocol::{Protocol, ProtocolConfig, KL, MCLS};
pub use reply::{ControlLockout, ControlSource, QueryKind, Value};
pub use transport::{list_ports, Exchange, LoopbackTransport, Transport};
