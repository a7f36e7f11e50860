// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Low-level register-level io for interfacing with the RTL2832U over
//! `rusb` (libusb). This is the concrete native SDR driver, kept here so
//! the crate has a real backend, but nothing above
//! [`crate::driver::RealDriver`] depends on its internals.
pub mod constants;
pub use constants::*;

pub mod handle;
pub use handle::DeviceId;

#[cfg(test)]
pub mod mock_handle;

#[cfg(not(test))]
use handle::DeviceHandle;
#[cfg(test)]
use mock_handle::MockDeviceHandle as DeviceHandle;

use byteorder::{ByteOrder, LittleEndian};
use log::{error, info};
use std::time::Duration;

use crate::error::Result;

#[cfg(test)]
mod device_test;

#[derive(Debug)]
pub struct Device {
    handle: DeviceHandle,
}

impl Device {
    pub fn open(id: DeviceId) -> Result<Device> {
        Ok(Device {
            handle: DeviceHandle::open(id)?,
        })
    }

    pub fn claim_interface(&mut self, iface: u8) -> Result<()> {
        self.handle.claim_interface(iface)
    }

    pub fn test_write(&mut self) -> Result<()> {
        // try a dummy write and reset device if it fails
        let len: usize = self.write_reg(BLOCK_USB, USB_SYSCTL, 0x09, 1)?;
        if len == 0 {
            info!("resetting device...");
            self.handle.reset()?;
        }
        Ok(())
    }

    pub fn reset_demod(&self) -> Result<()> {
        self.demod_write_reg(1, 0x01, 0x14, 1)?;
        self.demod_write_reg(1, 0x01, 0x10, 1)?;
        Ok(())
    }

    /// Only supports len of 1 or 2.
    pub fn read_reg(&self, block: u16, addr: u16, len: usize) -> Result<u16> {
        assert!(len == 1 || len == 2);
        let mut data: [u8; 2] = [0, 0];
        let index: u16 = block << 8;
        self.handle
            .read_control(CTRL_IN, 0, addr, index, &mut data[..len], CTRL_TIMEOUT)?;
        // Registers are read little-endian but written big-endian.
        Ok(LittleEndian::read_u16(&data))
    }

    pub fn write_reg(&self, block: u16, addr: u16, val: u16, len: usize) -> Result<usize> {
        assert!(len == 1 || len == 2);
        let data: [u8; 2] = val.to_be_bytes();
        let data_slice = if len == 1 { &data[1..2] } else { &data };
        let index = (block << 8) | 0x10;
        Ok(self
            .handle
            .write_control(CTRL_OUT, 0, addr, index, data_slice, CTRL_TIMEOUT)?)
    }

    /// Only supports u8 reads.
    pub fn demod_read_reg(&self, page: u16, addr: u16) -> Result<u16> {
        let mut data = [0_u8];
        let index = page;
        match self.handle.read_control(
            CTRL_IN,
            0,
            (addr << 8) | 0x20,
            index,
            &mut data,
            CTRL_TIMEOUT,
        ) {
            Ok(n) => Ok(n),
            Err(e) => {
                error!(
                    "demod_read_reg failed: {} page: {:#02x} addr: {:#02x}",
                    e, page, addr
                );
                Err(e)
            }
        }?;
        Ok(data[0] as u16)
    }

    /// Only supports len of 1 or 2.
    pub fn demod_write_reg(&self, page: u16, mut addr: u16, val: u16, len: usize) -> Result<usize> {
        assert!(len == 1 || len == 2);
        let index = 0x10 | page;
        addr = (addr << 8) | 0x20;
        let data: [u8; 2] = val.to_be_bytes();
        let data_slice = if len == 1 { &data[1..2] } else { &data };

        let bytes = match self
            .handle
            .write_control(CTRL_OUT, 0, addr, index, data_slice, CTRL_TIMEOUT)
        {
            Ok(n) => n,
            Err(e) => {
                error!(
                    "demod_write_reg failed: {} page: {:#02x} addr: {:#02x} val: {:#02x}",
                    e, page, addr, val
                );
                0
            }
        };
        self.demod_read_reg(0x0a, 0x1)?;
        Ok(bytes)
    }

    pub fn bulk_transfer(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        Ok(self.handle.read_bulk(0x81, buf, timeout)?)
    }

    pub fn read_eeprom(&self, data: &mut [u8], offset: u8, len: usize) -> Result<usize> {
        assert!((len + offset as usize) <= EEPROM_SIZE);
        self.write_array(BLOCK_IIC, EEPROM_ADDR, &[offset], 1)?;
        for byte in data.iter_mut().take(len) {
            let mut one = [0u8; 1];
            self.read_array(BLOCK_IIC, EEPROM_ADDR, &mut one, 1)?;
            *byte = one[0];
        }
        Ok(len)
    }

    pub fn i2c_read_reg(&self, i2c_addr: u8, reg: u8) -> Result<u8> {
        let addr: u16 = i2c_addr.into();
        let reg_buf: [u8; 1] = [reg];
        let mut data: [u8; 1] = [0];
        self.write_array(BLOCK_IIC, addr, &reg_buf, 1)?;
        self.read_array(BLOCK_IIC, addr, &mut data, 1)?;
        Ok(data[0])
    }

    pub fn i2c_write(&self, i2c_addr: u16, buffer: &[u8]) -> Result<usize> {
        self.write_array(BLOCK_IIC, i2c_addr, buffer, buffer.len())
    }

    pub fn i2c_read(&self, i2c_addr: u16, buffer: &mut [u8], len: u8) -> Result<usize> {
        self.read_array(BLOCK_IIC, i2c_addr, buffer, len)
    }

    pub fn read_array(&self, block: u16, addr: u16, arr: &mut [u8], _len: u8) -> Result<usize> {
        let index: u16 = block << 8;
        Ok(self
            .handle
            .read_control(CTRL_IN, 0, addr, index, arr, CTRL_TIMEOUT)?)
    }

    pub fn write_array(&self, block: u16, addr: u16, arr: &[u8], len: usize) -> Result<usize> {
        let index: u16 = (block << 8) | 0x10;
        Ok(self
            .handle
            .write_control(CTRL_OUT, 0, addr, index, &arr[..len], CTRL_TIMEOUT)?)
    }
}
