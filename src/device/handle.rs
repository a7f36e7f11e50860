// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use log::info;
use rusb::{Context, UsbContext};

use super::KNOWN_DEVICES;
use crate::error::Result;
use crate::error::RtlsdrError::{NoDeviceFound, RtlsdrErr, SerialNotFound};

/// How a device is selected at open time: by index, by serial number, or
/// (on unix) by an already-open file descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceId {
    Index(usize),
    Serial(String),
    #[cfg(unix)]
    Fd(i32),
}

#[derive(Debug)]
pub struct DeviceHandle {
    handle: rusb::DeviceHandle<Context>,
}

impl DeviceHandle {
    pub fn open(id: DeviceId) -> Result<Self> {
        let mut context = Context::new()?;
        let handle = match id {
            DeviceId::Index(index) => Self::open_by_index(&mut context, index)?,
            DeviceId::Serial(serial) => Self::open_by_serial(&mut context, &serial)?,
            #[cfg(unix)]
            DeviceId::Fd(fd) => Self::open_with_fd(&mut context, fd)?,
        };
        Ok(DeviceHandle { handle })
    }

    pub fn enumerate() -> Result<usize> {
        let context = Context::new()?;
        Ok(matching_devices(&context)?.len())
    }

    pub fn name_of(index: usize) -> Result<String> {
        let context = Context::new()?;
        let devices = matching_devices(&context)?;
        let (device, desc) = devices
            .get(index)
            .ok_or_else(|| NoDeviceFound(format!("no device at index {}", index)))?;
        Ok(known_device_description(desc)
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("{:?}", device)))
    }

    pub fn index_by_serial(serial: &str) -> Result<Option<usize>> {
        let context = Context::new()?;
        for (index, (device, _desc)) in matching_devices(&context)?.iter().enumerate() {
            if let Ok(handle) = device.open() {
                if let Ok(found) = device_serial(&handle, device) {
                    if found.as_deref() == Some(serial) {
                        return Ok(Some(index));
                    }
                }
            }
        }
        Ok(None)
    }

    fn open_by_index(context: &mut Context, index: usize) -> Result<rusb::DeviceHandle<Context>> {
        let devices = matching_devices(context)?;
        let (device, desc) = devices.get(index).ok_or_else(|| {
            NoDeviceFound(format!("no RTL-SDR device found at index {}", index))
        })?;
        info!(
            "opening device at index {} ({:04x}:{:04x})",
            index,
            desc.vendor_id(),
            desc.product_id()
        );
        device
            .open()
            .map_err(|e| RtlsdrErr(format!("failed to open device: {}", e)))
    }

    fn open_by_serial(context: &mut Context, serial: &str) -> Result<rusb::DeviceHandle<Context>> {
        for (device, _desc) in matching_devices(context)? {
            if let Ok(handle) = device.open() {
                if device_serial(&handle, &device)?.as_deref() == Some(serial) {
                    return Ok(handle);
                }
            }
        }
        Err(SerialNotFound(format!(
            "no RTL-SDR device found with serial '{}'",
            serial
        )))
    }

    #[cfg(unix)]
    fn open_with_fd(context: &mut Context, fd: i32) -> Result<rusb::DeviceHandle<Context>> {
        use std::os::unix::io::RawFd;
        unsafe {
            context
                .open_device_with_fd(fd as RawFd)
                .map_err(|e| RtlsdrErr(format!("failed to open device with fd {}: {}", fd, e)))
        }
    }

    pub fn claim_interface(&mut self, iface: u8) -> Result<()> {
        Ok(self.handle.claim_interface(iface)?)
    }

    pub fn reset(&mut self) -> Result<()> {
        Ok(self.handle.reset()?)
    }

    pub fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        Ok(self
            .handle
            .read_control(request_type, request, value, index, buf, timeout)?)
    }

    pub fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        Ok(self
            .handle
            .write_control(request_type, request, value, index, buf, timeout)?)
    }

    pub fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        Ok(self.handle.read_bulk(endpoint, buf, timeout)?)
    }
}

fn matching_devices(
    context: &Context,
) -> Result<Vec<(rusb::Device<Context>, rusb::DeviceDescriptor)>> {
    let mut found = Vec::new();
    for device in context.devices()?.iter() {
        let desc = device.device_descriptor()?;
        if KNOWN_DEVICES
            .iter()
            .any(|known| known.vid == desc.vendor_id() && known.pid == desc.product_id())
        {
            found.push((device, desc));
        }
    }
    Ok(found)
}

fn known_device_description(desc: &rusb::DeviceDescriptor) -> Option<&'static str> {
    KNOWN_DEVICES
        .iter()
        .find(|known| known.vid == desc.vendor_id() && known.pid == desc.product_id())
        .map(|known| known.description)
}

fn device_serial(
    handle: &rusb::DeviceHandle<Context>,
    device: &rusb::Device<Context>,
) -> Result<Option<String>> {
    let desc = device.device_descriptor()?;
    let timeout = Duration::from_millis(300);
    let languages = handle.read_languages(timeout)?;
    let Some(lang) = languages.first() else {
        return Ok(None);
    };
    match handle.read_serial_number_string(*lang, &desc, timeout) {
        Ok(serial) => Ok(Some(serial)),
        Err(_) => Ok(None),
    }
}
