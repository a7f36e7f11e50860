// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The TCP-facing half of the crate: the Command Dispatcher (§4.6), the
//! per-connection Client Connection state machine (§4.4), and the TCP
//! Listener (§4.5).

pub mod command;
pub mod connection;
pub mod listener;
