// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use mockall::predicate::{self, eq};

use super::mock_handle::MockDeviceHandle;
use super::{BLOCK_SYS, BLOCK_USB, CTRL_IN, CTRL_OUT, CTRL_TIMEOUT, GPO, USB_SYSCTL};
use super::Device;

fn device_with(handle: MockDeviceHandle) -> Device {
    Device { handle }
}

#[test]
fn read_reg_decodes_little_endian() {
    let index_expected = BLOCK_SYS << 8;
    let mut mock = MockDeviceHandle::new();
    mock.expect_read_control()
        .times(1)
        .with(
            eq(CTRL_IN),
            eq(0),
            eq(GPO),
            eq(index_expected),
            predicate::always(),
            eq(CTRL_TIMEOUT),
        )
        .returning(|_, _, _, _, data, _| {
            data[0] = 0x34;
            data[1] = 0x12;
            Ok(2)
        });

    let device = device_with(mock);
    assert_eq!(device.read_reg(BLOCK_SYS, GPO, 2).unwrap(), 0x1234);
}

#[test]
fn write_reg_sends_big_endian_payload() {
    let index_expected = (BLOCK_USB << 8) | 0x10;
    let mut mock = MockDeviceHandle::new();
    mock.expect_write_control()
        .times(1)
        .withf(move |rt, req, addr, idx, buf, timeout| {
            *rt == CTRL_OUT
                && *req == 0
                && *addr == USB_SYSCTL
                && *idx == index_expected
                && buf == [0x09]
                && *timeout == CTRL_TIMEOUT
        })
        .returning(|_, _, _, _, buf, _| Ok(buf.len()));

    let device = device_with(mock);
    assert_eq!(device.write_reg(BLOCK_USB, USB_SYSCTL, 0x09, 1).unwrap(), 1);
}

#[test]
fn test_write_resets_device_on_zero_length_write() {
    let mut mock = MockDeviceHandle::new();
    mock.expect_write_control().returning(|_, _, _, _, _, _| Ok(0));
    mock.expect_reset().times(1).returning(|| Ok(()));

    let mut device = device_with(mock);
    device.test_write().unwrap();
}

#[test]
fn read_eeprom_rejects_out_of_range_reads() {
    let mock = MockDeviceHandle::new();
    let device = device_with(mock);
    let mut buf = [0u8; 4];
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        device.read_eeprom(&mut buf, 0, super::EEPROM_SIZE)
    }));
    assert!(result.is_err());
}
