// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `rtl-sdr-rs`: the sample pipeline and client multiplexer of an SDR
//! streaming server that speaks the `rtl_tcp` wire protocol.
//!
//! The device layer (`rtlsdr`, `device`, `tuners`) talks to a real RTL2832U
//! dongle over `rusb`. Everything above it, [`driver::Driver`],
//! [`controller::RadioController`], [`hub::Hub`], and the [`server`] module,
//! is generic over that driver trait, which is how the test suite exercises
//! the whole pipeline against `MockDriver`/hand-rolled fakes without a
//! dongle attached.

pub mod controller;
pub mod device;
pub mod driver;
pub mod error;
pub mod hub;
pub mod params;
pub mod rtlsdr;
pub mod server;
pub mod tuners;

pub use controller::{ControllerConfig, RadioController};
pub use device::DeviceId;
pub use driver::{Driver, RealDriver, DEFAULT_BUF_LENGTH};
pub use error::{Result, RtlsdrError};
pub use hub::Hub;
pub use params::{
    ControlMessage, DirectSampleMode, GainMode, RadioParams, TunerGain, TunerKind,
};
pub use rtlsdr::RtlSdr;
