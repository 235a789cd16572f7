use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use slint::{CloseRequestResponse, ComponentHandle};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use schott_light::{list_ports, probe_ports, Light, OutputState, Protocol};

slint::include_modules!();

/// Intensity applied when the output is switched on with an empty field.
const DEFAULT_INTENSITY: f64 = 0.1;

#[derive(Parser, Debug)]
#[command(name = "schott_light", about = "Control panel for Schott MC-LS / KL light sources")]
struct Args {
    /// Serial port of the controller; every port is probed when omitted
    #[arg(short, long)]
    port: Option<String>,

    /// Controller family (mcls or kl)
    #[arg(long, default_value = "mcls")]
    protocol: Protocol,

    /// Read timeout in milliseconds (MC-LS blocks forever by default)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print the available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Do not log the intensity after every change
    #[arg(short, long)]
    quiet: bool,
}

// 欄位允許逗號當小數點 ("0,5")，取到小數點後兩位
fn parse_intensity(text: &str) -> Option<f64> {
    let e: f64 = text.trim().replace(',', ".").parse().ok()?;
    e.is_finite().then(|| (e * 100.0).round() / 100.0)
}

fn switch_on(light: &Light, intensity_text: &str) -> schott_light::Result<()> {
    light.set_on()?;
    light.set_intensity(parse_intensity(intensity_text).unwrap_or(DEFAULT_INTENSITY))
}

fn status_for(state: OutputState) -> &'static str {
    match state {
        OutputState::On => "Output on",
        OutputState::Off => "Output off",
        OutputState::Unknown => "Output state unknown",
    }
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("schott_light=info")),
        )
        .init();

    let args = Args::parse();

    if args.list_ports {
        let ports = list_ports();
        if ports.is_empty() {
            println!("no serial port detected");
        }
        for name in ports {
            println!("{name}");
        }
        return Ok(());
    }

    let mut config = args.protocol.config();
    if let Some(ms) = args.timeout_ms {
        config = config.with_timeout(Some(Duration::from_millis(ms)));
    }

    // --- 1. 連線 (指定 port 或逐一掃描) ---
    let (device_info, light) = match args.port {
        Some(port) => {
            let light = Light::open_with(&port, config)
                .with_context(|| format!("cannot open {} light on {}", args.protocol, port))?;
            (format!("Device: {} on {}", args.protocol, port), light)
        }
        None => {
            let (port, light) =
                probe_ports(config).context("no compatible Schott light connected")?;
            (format!("Device: {} on {}", args.protocol, port), light)
        }
    };
    let light = Rc::new(light);

    let ui = LightWindow::new()?;
    ui.set_device_info(device_info.into());
    ui.set_status_text(status_for(light.output_state()).into());

    // --- 2. ON / OFF ---
    let ui_handle = ui.as_weak();
    let lt = light.clone();
    ui.on_toggle_output(move || {
        let Some(ui) = ui_handle.upgrade() else { return };
        let result = if lt.is_on() {
            lt.set_off()
        } else {
            switch_on(&lt, &ui.get_intensity_text())
        };
        match result {
            Ok(()) => ui.set_status_text(status_for(lt.output_state()).into()),
            Err(e) => {
                error!(error = %e, "output switch failed");
                ui.set_status_text(format!("Error: {e}").into());
            }
        }
        ui.set_is_on(lt.is_on());
    });

    // --- 3. 設定亮度 ---
    let ui_handle = ui.as_weak();
    let lt = light.clone();
    let verbose = !args.quiet;
    ui.on_apply_intensity(move |text| {
        let Some(ui) = ui_handle.upgrade() else { return };
        let Some(e) = parse_intensity(&text) else {
            ui.set_status_text(format!("Invalid intensity: {text}").into());
            return;
        };
        match lt.set_intensity(e) {
            Ok(()) => {
                if verbose {
                    info!(intensity = ?lt.cached_intensity(), "intensity");
                }
                ui.set_status_text(status_for(lt.output_state()).into());
            }
            Err(e) => {
                error!(error = %e, "set intensity failed");
                ui.set_status_text(format!("Error: {e}").into());
            }
        }
    });

    // --- 4. 關窗時熄燈 ---
    let lt = light.clone();
    ui.window().on_close_requested(move || {
        if lt.is_on() {
            if let Err(e) = lt.set_off() {
                error!(error = %e, "could not switch the light off on exit");
            }
        }
        CloseRequestResponse::HideWindow
    });

    ui.run()?;
    drop(ui);

    if let Ok(light) = Rc::try_unwrap(light) {
        light.close();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_intensity_accepts_comma() {
        assert_eq!(parse_intensity("0,5"), Some(0.5));
        assert_eq!(parse_intensity(" 0.25 "), Some(0.25));
        assert_eq!(parse_intensity(""), None);
        assert_eq!(parse_intensity("abc"), None);
    }

    #[test]
    fn test_parse_intensity_keeps_two_decimals() {
        assert_eq!(parse_intensity("0.456"), Some(0.46));
        assert_eq!(parse_intensity("0,123"), Some(0.12));
        assert_eq!(parse_intensity("1"), Some(1.0));
        assert_eq!(parse_intensity("nan"), None);
        assert_eq!(parse_intensity("inf"), None);
    }

    #[test]
    fn test_status_text() {
        assert_eq!(status_for(OutputState::On), "Output on");
        assert_eq!(status_for(OutputState::Unknown), "Output state unknown");
    }
}
