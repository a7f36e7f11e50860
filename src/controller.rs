// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Radio Controller. Owns one opened device, runs the initialization
//! sequence, and spawns the producer thread that drives
//! `Driver::read_until_cancelled`. All parameter mutations funnel through a
//! single `mpsc` channel drained inside the producer thread's own sink
//! callback, between sample buffers. The control executor is folded into
//! the producer thread's loop body, so no second thread ever needs a lock
//! on the device handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use crate::driver::{resolve_device_index, Driver};
use crate::error::{Result, RtlsdrError};
use crate::hub::Hub;
use crate::params::{ControlMessage, DirectSampleMode, GainMode, RadioParams, TunerGain, TunerKind};

/// Initial parameter state and device selection, sourced from the CLI
/// surface (`src/bin/rtl_tcp.rs`). This struct is the seam between that
/// layer and the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub device_selector: Option<String>,
    pub center_freq_hz: u32,
    pub sample_rate_hz: u32,
    pub gain_tenths_db: Option<i32>,
    pub freq_correction_ppm: i32,
    pub bias_tee: bool,
    pub direct_sampling: DirectSampleMode,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            device_selector: None,
            center_freq_hz: crate::params::DEFAULT_FREQUENCY_HZ,
            sample_rate_hz: crate::params::DEFAULT_SAMPLE_RATE_HZ,
            gain_tenths_db: None,
            freq_correction_ppm: 0,
            bias_tee: false,
            direct_sampling: DirectSampleMode::Off,
        }
    }
}

/// State owned exclusively by the producer thread: the cached `RadioParams`
/// view, the gain table, and the tuner kind that gates vendor policy.
struct ControllerState {
    params: RadioParams,
    gains: Vec<i32>,
    tuner_kind: TunerKind,
}

/// Owns the device for the lifetime of the server. Dropping it (or calling
/// [`RadioController::stop`]) cancels and joins the producer thread and
/// closes the device.
pub struct RadioController {
    cancel: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
    ctrl_tx: Sender<ControlMessage>,
    tuner_kind: TunerKind,
    gain_count: u32,
}

impl RadioController {
    /// Runs the initialization sequence: enumerate, select device, open,
    /// query tuner type, query supported gains, apply initial parameter
    /// state, then spawn the producer thread.
    pub fn start(mut driver: Box<dyn Driver>, config: ControllerConfig, hub: Arc<Hub>) -> Result<Self> {
        let count = driver.enumerate()?;
        if count == 0 {
            return Err(RtlsdrError::NoDeviceFound(
                "no rtl-sdr compatible devices found".to_string(),
            ));
        }
        let index = match &config.device_selector {
            Some(selector) => resolve_device_index(driver.as_ref(), selector)?,
            None => 0,
        };
        driver.open(index)?;

        let tuner_kind = driver.tuner_type();
        let gains = driver.supported_gains()?;
        info!(
            "opened device index {} (tuner {:?}, {} gain steps)",
            index,
            tuner_kind,
            gains.len()
        );

        let mut params = RadioParams {
            center_freq_hz: config.center_freq_hz,
            sample_rate_hz: config.sample_rate_hz,
            freq_correction_ppm: config.freq_correction_ppm,
            bias_tee: config.bias_tee,
            direct_sampling: config.direct_sampling,
            ..RadioParams::default()
        };

        driver.set_sample_rate(params.sample_rate_hz)?;
        driver.set_center_freq(params.center_freq_hz)?;
        if params.freq_correction_ppm != 0 {
            driver.set_freq_correction(params.freq_correction_ppm)?;
        }
        match config.gain_tenths_db {
            None => {
                driver.set_tuner_gain(TunerGain::Auto)?;
                params.gain_mode = GainMode::Automatic;
            }
            Some(tenths_db) => {
                driver.set_tuner_gain(TunerGain::Manual(tenths_db))?;
                params.gain_mode = GainMode::Manual;
                params.manual_gain_tenths_db = tenths_db;
            }
        }
        driver.set_rtl_agc(false)?;
        driver.set_bias_tee(params.bias_tee)?;
        if !matches!(params.direct_sampling, DirectSampleMode::Off) {
            driver.set_direct_sampling(params.direct_sampling)?;
        }
        driver.reset_buffer()?;

        hub.set_rate_hint(params.sample_rate_hz);

        let (ctrl_tx, ctrl_rx) = mpsc::channel::<ControlMessage>();
        let cancel = Arc::new(AtomicBool::new(false));
        let producer_cancel = cancel.clone();
        let gain_count = gains.len() as u32;
        let state = ControllerState {
            params,
            gains,
            tuner_kind,
        };

        let producer = thread::spawn(move || run_producer(driver, producer_cancel, ctrl_rx, hub, state));

        Ok(RadioController {
            cancel,
            producer: Some(producer),
            ctrl_tx,
            tuner_kind,
            gain_count,
        })
    }

    /// A clonable handle the Command Dispatcher uses to enqueue parameter
    /// mutations. Sending never blocks; the channel is unbounded so a
    /// client's RX loop is never made to wait on the producer thread
    /// draining it.
    pub fn ctrl_sender(&self) -> Sender<ControlMessage> {
        self.ctrl_tx.clone()
    }

    pub fn tuner_kind(&self) -> TunerKind {
        self.tuner_kind
    }

    pub fn gain_count(&self) -> u32 {
        self.gain_count
    }

    /// Cancels the producer thread, joins it, and closes the device.
    /// Idempotent: a second call on an already-stopped controller is a
    /// no-op.
    pub fn stop(&mut self) {
        if let Some(handle) = self.producer.take() {
            self.cancel.store(true, Ordering::SeqCst);
            if handle.join().is_err() {
                error!("producer thread panicked during shutdown");
            }
        }
    }
}

impl Drop for RadioController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_producer(
    mut driver: Box<dyn Driver>,
    cancel: Arc<AtomicBool>,
    ctrl_rx: mpsc::Receiver<ControlMessage>,
    hub: Arc<Hub>,
    mut state: ControllerState,
) {
    let result = driver.read_until_cancelled(&cancel, &mut |drv, buf| {
        while let Ok(msg) = ctrl_rx.try_recv() {
            apply_control_message(drv, &mut state, &hub, msg);
        }
        hub.publish(Arc::from(buf));
    });
    if let Err(e) = result {
        error!("producer read loop exited with error: {}", e);
    }
    if let Err(e) = driver.close() {
        error!("failed to close device: {}", e);
    }
    info!("producer thread stopped");
}

/// Applies one translated command to the driver and the cached parameter
/// view, enforcing vendor policy. Never propagates an error to the caller:
/// failures are logged and the connection that sent the command stays open,
/// since the wire protocol has no error channel.
fn apply_control_message(
    driver: &mut dyn Driver,
    state: &mut ControllerState,
    hub: &Hub,
    msg: ControlMessage,
) {
    match msg {
        ControlMessage::SetCenterFreq(hz) => match driver.set_center_freq(hz) {
            Ok(()) => state.params.center_freq_hz = hz,
            Err(e) => error!("set_center_freq({}) failed: {}", hz, e),
        },
        ControlMessage::SetSampleRate(hz) => match driver.set_sample_rate(hz) {
            Ok(()) => {
                state.params.sample_rate_hz = hz;
                hub.set_rate_hint(hz);
            }
            Err(e) => error!("set_sample_rate({}) failed: {}", hz, e),
        },
        ControlMessage::SetGainMode(mode) => {
            state.params.gain_mode = mode;
            let gain = match mode {
                GainMode::Automatic => TunerGain::Auto,
                GainMode::Manual => TunerGain::Manual(state.params.manual_gain_tenths_db),
            };
            if let Err(e) = driver.set_tuner_gain(gain) {
                error!("set_tuner_gain({:?}) failed: {}", gain, e);
            }
        }
        ControlMessage::SetManualGain(tenths_db) => {
            let applied = nearest_gain(&state.gains, tenths_db).unwrap_or(tenths_db);
            match driver.set_tuner_gain(TunerGain::Manual(applied)) {
                Ok(()) => {
                    state.params.gain_mode = GainMode::Manual;
                    state.params.manual_gain_tenths_db = applied;
                }
                Err(e) => error!("set_tuner_gain(Manual({})) failed: {}", applied, e),
            }
        }
        ControlMessage::SetGainByIndex(index) => match state.gains.get(index).copied() {
            Some(tenths_db) => match driver.set_tuner_gain(TunerGain::Manual(tenths_db)) {
                Ok(()) => {
                    state.params.gain_mode = GainMode::Manual;
                    state.params.manual_gain_tenths_db = tenths_db;
                }
                Err(e) => error!("set_tuner_gain(Manual({})) failed: {}", tenths_db, e),
            },
            None => warn!(
                "gain index {} out of range ({} entries); ignored",
                index,
                state.gains.len()
            ),
        },
        ControlMessage::SetFreqCorrection(ppm) => match driver.set_freq_correction(ppm) {
            Ok(()) => state.params.freq_correction_ppm = ppm,
            Err(e) => error!("set_freq_correction({}) failed: {}", ppm, e),
        },
        ControlMessage::SetIfGain { stage, tenths_db } => {
            if let Err(e) = driver.set_if_gain(stage, tenths_db) {
                error!("set_if_gain(stage={}, {}) failed: {}", stage, tenths_db, e);
            }
        }
        ControlMessage::SetTestMode(on) => {
            debug!("test mode requested: {}", on);
            if let Err(e) = driver.set_testmode(on) {
                error!("set_testmode({}) failed: {}", on, e);
            }
        }
        ControlMessage::SetRtlAgc(on) => {
            state.params.rtl_agc = on;
            if let Err(e) = driver.set_rtl_agc(on) {
                error!("set_rtl_agc({}) failed: {}", on, e);
            }
        }
        ControlMessage::SetDirectSampling(mode) => match driver.set_direct_sampling(mode) {
            Ok(()) => state.params.direct_sampling = mode,
            Err(e) => error!("set_direct_sampling({:?}) failed: {}", mode, e),
        },
        ControlMessage::SetOffsetTuning(on) => {
            if !state.tuner_kind.supports_offset_tuning() {
                debug!("offset tuning request ignored on {:?}", state.tuner_kind);
                return;
            }
            match driver.set_offset_tuning(on) {
                Ok(()) => state.params.offset_tuning = on,
                Err(e) => error!("set_offset_tuning({}) failed: {}", on, e),
            }
        }
        ControlMessage::SetRtlXtal(freq) => {
            debug!("set rtl xtal requested: {} Hz (accepted, no-op)", freq);
        }
        ControlMessage::SetTunerXtal(freq) => {
            debug!("set tuner xtal requested: {} Hz (accepted, no-op)", freq);
        }
        ControlMessage::SetBiasTee(on) => {
            state.params.bias_tee = on;
            if let Err(e) = driver.set_bias_tee(on) {
                error!("set_bias_tee({}) failed: {}", on, e);
            }
        }
    }
}

/// Clamps a requested manual gain (tenths of dB) to the nearest entry in
/// the tuner's supported-gains table (command code `0x04`).
fn nearest_gain(gains: &[i32], target: i32) -> Option<i32> {
    gains.iter().copied().min_by_key(|g| (g - target).abs())
}

#[cfg(test)]
mod controller_test;
