// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CLI front end. Option surface modeled on the reference
//! `examples/rtl_tcp.rs`.

use std::env;
use std::net::SocketAddr;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info};

use rtl_sdr_rs::controller::ControllerConfig;
use rtl_sdr_rs::driver::RealDriver;
use rtl_sdr_rs::hub::Hub;
use rtl_sdr_rs::params::DirectSampleMode;
use rtl_sdr_rs::server::listener::Listener;
use rtl_sdr_rs::{RadioController, RtlsdrError};

const DEFAULT_ADDRESS: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 1234;

#[derive(Debug, Clone)]
struct CliConfig {
    address: String,
    port: u16,
    frequency: u32,
    sample_rate: u32,
    queue_limit: Option<usize>,
    device_selector: Option<String>,
    ppm_error: i32,
    gain: Option<i32>,
    enable_bias_tee: bool,
    direct_sampling: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        CliConfig {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            frequency: rtl_sdr_rs::params::DEFAULT_FREQUENCY_HZ,
            sample_rate: rtl_sdr_rs::params::DEFAULT_SAMPLE_RATE_HZ,
            queue_limit: None,
            device_selector: None,
            ppm_error: 0,
            gain: None,
            enable_bias_tee: false,
            direct_sampling: false,
        }
    }
}

enum AppError {
    Usage(String),
    Device(RtlsdrError),
}

impl From<RtlsdrError> for AppError {
    fn from(e: RtlsdrError) -> Self {
        AppError::Device(e)
    }
}

fn main() {
    stderrlog::new().verbosity(log::Level::Info).init().unwrap();
    match run() {
        Ok(()) => {}
        Err(AppError::Usage(msg)) => {
            eprintln!("rtl_tcp: {}", msg);
            process::exit(1);
        }
        Err(AppError::Device(e)) => {
            error!("rtl_tcp: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn run() -> Result<(), AppError> {
    let config = parse_args().map_err(AppError::Usage)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown_flag = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("shutdown signal received");
            shutdown_flag.store(true, Ordering::SeqCst);
        })
        .map_err(|e| AppError::Usage(format!("failed to set signal handler: {}", e)))?;
    }

    let controller_config = ControllerConfig {
        device_selector: config.device_selector.clone(),
        center_freq_hz: config.frequency,
        sample_rate_hz: config.sample_rate,
        gain_tenths_db: config.gain,
        freq_correction_ppm: config.ppm_error,
        bias_tee: config.enable_bias_tee,
        direct_sampling: if config.direct_sampling {
            DirectSampleMode::OnSwap
        } else {
            DirectSampleMode::Off
        },
    };

    let hub = Hub::new(config.queue_limit);
    let mut controller = RadioController::start(Box::new(RealDriver::new()), controller_config, hub.clone())?;

    let listen_addr: SocketAddr = format!("{}:{}", config.address, config.port)
        .parse()
        .map_err(|e| AppError::Usage(format!("invalid listen address: {}", e)))?;
    let listener = Listener::bind(listen_addr)
        .map_err(|e| AppError::Usage(format!("failed to bind {}: {}", listen_addr, e)))?;

    info!("listening on {}", listen_addr);
    listener.serve(
        hub,
        controller.ctrl_sender(),
        controller.tuner_kind(),
        controller.gain_count(),
        shutdown,
    );

    controller.stop();
    info!("bye!");
    Ok(())
}

fn parse_args() -> Result<CliConfig, String> {
    let mut config = CliConfig::default();
    let args: Vec<String> = env::args().skip(1).collect();
    let mut idx = 0;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-a" => {
                idx += 1;
                config.address = args.get(idx).ok_or("missing value for -a")?.clone();
            }
            "-p" => {
                idx += 1;
                let value = args.get(idx).ok_or("missing value for -p")?;
                config.port = value.parse().map_err(|e| format!("invalid port: {}", e))?;
            }
            "-f" => {
                idx += 1;
                config.frequency = parse_scaled(args.get(idx).ok_or("missing value for -f")?)?;
            }
            "-g" => {
                idx += 1;
                let value = args.get(idx).ok_or("missing value for -g")?;
                let gain: f32 = value.parse().map_err(|e| format!("invalid gain: {}", e))?;
                config.gain = Some((gain * 10.0).round() as i32);
            }
            "-s" => {
                idx += 1;
                config.sample_rate = parse_scaled(args.get(idx).ok_or("missing value for -s")?)?;
            }
            "-n" => {
                idx += 1;
                let value = args.get(idx).ok_or("missing value for -n")?;
                config.queue_limit = Some(value.parse().map_err(|e| format!("invalid queue limit: {}", e))?);
            }
            "-d" => {
                idx += 1;
                config.device_selector = Some(args.get(idx).ok_or("missing value for -d")?.clone());
            }
            "-P" => {
                idx += 1;
                let value = args.get(idx).ok_or("missing value for -P")?;
                config.ppm_error = value.parse().map_err(|e| format!("invalid ppm value: {}", e))?;
            }
            "-T" => config.enable_bias_tee = true,
            "-D" => config.direct_sampling = true,
            other => return Err(format!("unknown argument: {}", other)),
        }
        idx += 1;
    }
    Ok(config)
}

fn print_usage() {
    println!("rtl_tcp, an I/Q spectrum server for RTL-SDR receivers");
    println!("Usage: rtl_tcp [options]\n");
    println!("  -a listen address (default: {})", DEFAULT_ADDRESS);
    println!("  -p listen port (default: {})", DEFAULT_PORT);
    println!("  -f frequency to tune to [Hz]");
    println!("  -g gain in dB (default: auto)");
    println!("  -s samplerate in Hz (default: {} Hz)", rtl_sdr_rs::params::DEFAULT_SAMPLE_RATE_HZ);
    println!("  -n max number of buffered blocks per client (default: auto-sized from sample rate)");
    println!("  -d device index or serial number (default: 0)");
    println!("  -P ppm error (default: 0)");
    println!("  -T enable bias-T on GPIO PIN 0");
    println!("  -D enable direct sampling");
}

fn parse_scaled(value: &str) -> Result<u32, String> {
    if value.is_empty() {
        return Err("empty numeric value".to_string());
    }
    let mut factor = 1f64;
    let mut digits = value;
    if let Some(last) = value.chars().last() {
        match last {
            'k' | 'K' => {
                factor = 1e3;
                digits = &value[..value.len() - 1];
            }
            'm' | 'M' => {
                factor = 1e6;
                digits = &value[..value.len() - 1];
            }
            'g' | 'G' => {
                factor = 1e9;
                digits = &value[..value.len() - 1];
            }
            _ => {}
        }
    }
    let number: f64 = digits.parse().map_err(|e| format!("invalid number '{}': {}", value, e))?;
    if number < 0.0 {
        return Err(format!("value must be positive: {}", value));
    }
    let hz = number * factor;
    if hz > u32::MAX as f64 {
        return Err(format!("value too large: {}", value));
    }
    Ok(hz.round() as u32)
}
