// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device Driver Adapter. The seam between the server core and the
//! concrete native SDR driver (`crate::rtlsdr::RtlSdr`). Everything above
//! this module talks to a `Box<dyn Driver>`, never to `RtlSdr` directly, so
//! the Radio Controller can be exercised against `MockDriver` in tests
//! without a dongle attached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::info;

use crate::device::{Device, DeviceId};
use crate::error::Result;
use crate::error::RtlsdrError::{NoDeviceFound, OpenFailed, SerialNotFound};
use crate::params::{DirectSampleMode, TunerGain, TunerKind};
use crate::rtlsdr::RtlSdr;

/// How long a single bulk read blocks before `read_until_cancelled` checks
/// `cancel` again. Short enough that `stop()` returns promptly.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub const DEFAULT_BUF_LENGTH: usize = 16 * 16384;

/// Abstraction over a concrete SDR device. Mirrors the shape of `RtlSdr`'s
/// public API but expressed as an object-safe trait so the Radio
/// Controller can hold a `Box<dyn Driver>` and swap in `MockDriver` under
/// test.
pub trait Driver: Send {
    fn enumerate(&self) -> Result<usize>;
    fn name_of(&self, index: usize) -> Result<String>;
    fn index_by_serial(&self, serial: &str) -> Result<Option<usize>>;
    fn open(&mut self, index: usize) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn tuner_type(&self) -> TunerKind;
    fn supported_gains(&self) -> Result<Vec<i32>>;
    fn set_center_freq(&mut self, hz: u32) -> Result<()>;
    fn get_center_freq(&self) -> u32;
    fn set_sample_rate(&mut self, hz: u32) -> Result<()>;
    fn get_sample_rate(&self) -> u32;
    fn set_tuner_gain(&mut self, gain: TunerGain) -> Result<()>;
    fn set_freq_correction(&mut self, ppm: i32) -> Result<()>;
    fn set_if_gain(&mut self, stage: u16, tenths_db: i16) -> Result<()>;
    fn set_rtl_agc(&mut self, on: bool) -> Result<()>;
    fn set_direct_sampling(&mut self, mode: DirectSampleMode) -> Result<()>;
    fn set_offset_tuning(&mut self, on: bool) -> Result<()>;
    fn set_bias_tee(&mut self, on: bool) -> Result<()>;
    fn set_testmode(&mut self, on: bool) -> Result<()>;
    fn reset_buffer(&mut self) -> Result<()>;

    /// Blocks, delivering sample buffers to `sink` until `cancel` is set
    /// from another thread. `sink` is also handed `&mut dyn Driver`, the
    /// only mutable access to the device the crate ever grants outside
    /// this call, so the single producer thread that owns this call can
    /// drain and apply queued `ControlMessage`s between buffers without a
    /// second thread ever needing a lock on the driver.
    fn read_until_cancelled(
        &mut self,
        cancel: &AtomicBool,
        sink: &mut dyn FnMut(&mut dyn Driver, &[u8]),
    ) -> Result<()>;
}

/// `Driver` backed by the real `rusb`-based `RtlSdr`.
#[derive(Debug, Default)]
pub struct RealDriver {
    sdr: Option<RtlSdr>,
}

impl RealDriver {
    pub fn new() -> Self {
        RealDriver { sdr: None }
    }

    fn sdr(&self) -> Result<&RtlSdr> {
        self.sdr
            .as_ref()
            .ok_or_else(|| OpenFailed("no device open".to_string()))
    }

    fn sdr_mut(&mut self) -> Result<&mut RtlSdr> {
        self.sdr
            .as_mut()
            .ok_or_else(|| OpenFailed("no device open".to_string()))
    }
}

impl Driver for RealDriver {
    fn enumerate(&self) -> Result<usize> {
        crate::device::handle::DeviceHandle::enumerate()
    }

    fn name_of(&self, index: usize) -> Result<String> {
        crate::device::handle::DeviceHandle::name_of(index)
    }

    fn index_by_serial(&self, serial: &str) -> Result<Option<usize>> {
        crate::device::handle::DeviceHandle::index_by_serial(serial)
    }

    fn open(&mut self, index: usize) -> Result<()> {
        let count = self.enumerate()?;
        if count == 0 {
            return Err(NoDeviceFound("no rtl-sdr compatible devices found".to_string()));
        }
        let device = Device::open(DeviceId::Index(index))
            .map_err(|e| OpenFailed(format!("failed to open device {}: {}", index, e)))?;
        let mut sdr = RtlSdr::new(device);
        sdr.init()?;
        info!("opened device index {}", index);
        self.sdr = Some(sdr);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut sdr) = self.sdr.take() {
            sdr.deinit_baseband()?;
        }
        Ok(())
    }

    fn tuner_type(&self) -> TunerKind {
        self.sdr()
            .and_then(|sdr| sdr.tuner_kind())
            .unwrap_or(TunerKind::Unknown)
    }

    fn supported_gains(&self) -> Result<Vec<i32>> {
        self.sdr()?.get_tuner_gains()
    }

    fn set_center_freq(&mut self, hz: u32) -> Result<()> {
        self.sdr_mut()?.set_center_freq(hz)
    }

    fn get_center_freq(&self) -> u32 {
        self.sdr().map(|sdr| sdr.get_center_freq()).unwrap_or(0)
    }

    fn set_sample_rate(&mut self, hz: u32) -> Result<()> {
        self.sdr_mut()?.set_sample_rate(hz)
    }

    fn get_sample_rate(&self) -> u32 {
        self.sdr().map(|sdr| sdr.get_sample_rate()).unwrap_or(0)
    }

    fn set_tuner_gain(&mut self, gain: TunerGain) -> Result<()> {
        self.sdr_mut()?.set_tuner_gain(gain)
    }

    fn set_freq_correction(&mut self, ppm: i32) -> Result<()> {
        self.sdr_mut()?.set_freq_correction(ppm)
    }

    fn set_if_gain(&mut self, _stage: u16, _tenths_db: i16) -> Result<()> {
        // The R820T family has no separately addressable IF gain stages;
        // rtl_tcp's own reference server accepts and discards this command
        // too (code 0x06).
        Ok(())
    }

    fn set_rtl_agc(&mut self, _on: bool) -> Result<()> {
        // No AGC register exposed by the consolidated RtlSdr driver beyond
        // the tuner's own Auto gain mode; accepted as a no-op to keep the
        // wire command from erroring out a connected client.
        Ok(())
    }

    fn set_direct_sampling(&mut self, mode: DirectSampleMode) -> Result<()> {
        self.sdr_mut()?.set_direct_sampling(mode)
    }

    fn set_offset_tuning(&mut self, on: bool) -> Result<()> {
        self.sdr_mut()?.set_offset_tuning(on)
    }

    fn set_bias_tee(&mut self, on: bool) -> Result<()> {
        self.sdr_mut()?.set_bias_tee(on)
    }

    fn set_testmode(&mut self, on: bool) -> Result<()> {
        self.sdr_mut()?.set_testmode(on)
    }

    fn reset_buffer(&mut self) -> Result<()> {
        self.sdr_mut()?.reset_buffer()
    }

    fn read_until_cancelled(
        &mut self,
        cancel: &AtomicBool,
        sink: &mut dyn FnMut(&mut dyn Driver, &[u8]),
    ) -> Result<()> {
        let mut buf = vec![0_u8; DEFAULT_BUF_LENGTH];
        while !cancel.load(Ordering::Relaxed) {
            let n = {
                let sdr = self.sdr_mut()?;
                sdr.read_sync(&mut buf, CANCEL_POLL_INTERVAL)?
            };
            if n > 0 {
                sink(self, &buf[..n]);
            }
        }
        Ok(())
    }
}

/// Resolves a command-line `-d` device selector against whatever devices
/// are currently enumerable. Device selection by serial falls back to a
/// `SerialNotFound` error rather than silently opening device 0, per spec
/// §7's fail-fast-on-bad-config policy.
pub fn resolve_device_index(driver: &dyn Driver, selector: &str) -> Result<usize> {
    if let Ok(index) = selector.parse::<usize>() {
        return Ok(index);
    }
    match driver.index_by_serial(selector)? {
        Some(index) => Ok(index),
        None => Err(SerialNotFound(format!(
            "no attached device has serial number '{}'",
            selector
        ))),
    }
}

#[cfg(test)]
mod mock {
    use super::*;
    use mockall::mock;

    mock! {
        pub Driver {}
        impl Driver for Driver {
            fn enumerate(&self) -> Result<usize>;
            fn name_of(&self, index: usize) -> Result<String>;
            fn index_by_serial(&self, serial: &str) -> Result<Option<usize>>;
            fn open(&mut self, index: usize) -> Result<()>;
            fn close(&mut self) -> Result<()>;
            fn tuner_type(&self) -> TunerKind;
            fn supported_gains(&self) -> Result<Vec<i32>>;
            fn set_center_freq(&mut self, hz: u32) -> Result<()>;
            fn get_center_freq(&self) -> u32;
            fn set_sample_rate(&mut self, hz: u32) -> Result<()>;
            fn get_sample_rate(&self) -> u32;
            fn set_tuner_gain(&mut self, gain: TunerGain) -> Result<()>;
            fn set_freq_correction(&mut self, ppm: i32) -> Result<()>;
            fn set_if_gain(&mut self, stage: u16, tenths_db: i16) -> Result<()>;
            fn set_rtl_agc(&mut self, on: bool) -> Result<()>;
            fn set_direct_sampling(&mut self, mode: DirectSampleMode) -> Result<()>;
            fn set_offset_tuning(&mut self, on: bool) -> Result<()>;
            fn set_bias_tee(&mut self, on: bool) -> Result<()>;
            fn set_testmode(&mut self, on: bool) -> Result<()>;
            fn reset_buffer(&mut self) -> Result<()>;
            fn read_until_cancelled(
                &mut self,
                cancel: &AtomicBool,
                sink: &mut dyn FnMut(&mut dyn Driver, &[u8]),
            ) -> Result<()>;
        }
    }
}

#[cfg(test)]
pub use mock::MockDriver;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_device_index_parses_numeric_selector() {
        let mock = MockDriver::new();
        assert_eq!(resolve_device_index(&mock, "2").unwrap(), 2);
    }

    #[test]
    fn resolve_device_index_falls_back_to_serial_lookup() {
        let mut mock = MockDriver::new();
        mock.expect_index_by_serial()
            .withf(|s| s == "00000001")
            .returning(|_| Ok(Some(3)));
        assert_eq!(resolve_device_index(&mock, "00000001").unwrap(), 3);
    }

    #[test]
    fn resolve_device_index_errors_on_unknown_serial() {
        let mut mock = MockDriver::new();
        mock.expect_index_by_serial().returning(|_| Ok(None));
        assert!(resolve_device_index(&mock, "deadbeef").is_err());
    }
}
