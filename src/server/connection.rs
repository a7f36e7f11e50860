// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client Connection. Per-accepted-socket state machine: greeting-pending
//! -> running -> draining -> closed. Two OS threads per client (RX driven
//! inline on the thread that calls [`spawn`]'s join target, TX on a
//! dedicated thread), matching the crate's `std::thread` concurrency model
//! throughout, not an async runtime.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info};

use crate::hub::Hub;
use crate::params::{ControlMessage, TunerKind};
use crate::server::command::{CommandFrame, FRAME_LEN};

pub const GREETING_LEN: usize = 12;
pub const MAGIC: &[u8; 4] = b"RTL0";

/// Socket read/write timeout used so both loops notice a shutdown signal
/// promptly without a dedicated wakeup pipe.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Builds the 12-byte greeting: `"RTL0"` followed by tuner-type-BE32 and
/// gain-count-BE32.
pub fn build_greeting(tuner_kind: TunerKind, gain_count: u32) -> [u8; GREETING_LEN] {
    let mut out = [0u8; GREETING_LEN];
    out[0..4].copy_from_slice(MAGIC);
    out[4..8].copy_from_slice(&tuner_kind.wire_code().to_be_bytes());
    out[8..12].copy_from_slice(&gain_count.to_be_bytes());
    out
}

/// Spawns the thread that drives one accepted connection end to end
/// (greeting → running → draining → closed) and returns its join handle so
/// the listener can wait on it during shutdown.
pub fn spawn(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<Hub>,
    ctrl_tx: Sender<ControlMessage>,
    tuner_kind: TunerKind,
    gain_count: u32,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || run(stream, addr, hub, ctrl_tx, tuner_kind, gain_count, shutdown))
}

fn run(
    mut stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<Hub>,
    ctrl_tx: Sender<ControlMessage>,
    tuner_kind: TunerKind,
    gain_count: u32,
    shutdown: Arc<AtomicBool>,
) {
    // greeting-pending
    let greeting = build_greeting(tuner_kind, gain_count);
    if let Err(e) = stream.write_all(&greeting) {
        debug!("{}: greeting write failed, closing: {}", addr, e);
        return;
    }

    // running: register with the hub before any sample byte can be queued
    // for us, then bring up the TX thread and run RX inline.
    let (session_id, rx, drops) = hub.register(addr);
    info!("{}: connected", addr);

    let tx_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            debug!("{}: failed to clone stream for tx loop: {}", addr, e);
            hub.unregister(session_id);
            return;
        }
    };
    let _ = stream.set_read_timeout(Some(POLL_INTERVAL));

    let stop = Arc::new(AtomicBool::new(false));
    let tx_handle = {
        let stop = stop.clone();
        let shutdown = shutdown.clone();
        thread::spawn(move || tx_loop(tx_stream, rx, addr, stop, shutdown))
    };

    rx_loop(&mut stream, &ctrl_tx, addr, &stop, &shutdown);

    // draining: make sure the peer side unblocks too, then join TX.
    stop.store(true, Ordering::SeqCst);
    let _ = stream.shutdown(std::net::Shutdown::Both);
    let _ = tx_handle.join();

    hub.unregister(session_id);
    let dropped = drops.load(Ordering::Relaxed);
    info!("{}: disconnected ({} buffers dropped for slow reads)", addr, dropped);
    // closed
}

fn tx_loop(
    mut stream: TcpStream,
    rx: std::sync::mpsc::Receiver<Arc<[u8]>>,
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if stop.load(Ordering::Relaxed) || shutdown.load(Ordering::Relaxed) {
            return;
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(buf) => {
                // A short write is retried until the buffer drains or the
                // socket errors; `write_all` already does this.
                if let Err(e) = stream.write_all(&buf) {
                    debug!("{}: tx write failed: {}", addr, e);
                    stop.store(true, Ordering::SeqCst);
                    return;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Reads in exact 5-byte units, dispatching each as a command. A partial
/// frame followed by EOF is a protocol error; zero accumulated bytes
/// followed by EOF is a clean disconnect.
fn rx_loop(
    stream: &mut TcpStream,
    ctrl_tx: &Sender<ControlMessage>,
    addr: SocketAddr,
    stop: &Arc<AtomicBool>,
    shutdown: &Arc<AtomicBool>,
) {
    let mut buf = [0u8; FRAME_LEN];
    let mut filled = 0usize;
    loop {
        if stop.load(Ordering::Relaxed) || shutdown.load(Ordering::Relaxed) {
            return;
        }
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    debug!("{}: clean EOF", addr);
                } else {
                    debug!("{}: EOF mid-frame ({} of {} bytes): protocol error", addr, filled, FRAME_LEN);
                }
                return;
            }
            Ok(n) => {
                filled += n;
                if filled == FRAME_LEN {
                    let frame = CommandFrame::decode(buf);
                    if let Some(msg) = frame.translate() {
                        if ctrl_tx.send(msg).is_err() {
                            return;
                        }
                    }
                    filled = 0;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) => {
                debug!("{}: rx read error: {}", addr, e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod connection_test;
