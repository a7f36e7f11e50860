// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TCP Listener. Binds a listening socket, accepts connections, instantiates
//! a Client Connection per accept, and registers it with the Broadcast Hub.
//! Uses a short poll-interval non-blocking accept loop so shutdown is
//! observed promptly without a dedicated wakeup pipe, the same technique
//! the reference `rtl_tcp.rs` server uses.

use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{info, warn};

use crate::hub::Hub;
use crate::params::{ControlMessage, TunerKind};
use crate::server::connection;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct Listener {
    inner: StdTcpListener,
}

impl Listener {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let inner = StdTcpListener::bind(addr)?;
        inner.set_nonblocking(true)?;
        Ok(Listener { inner })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accept loop. Runs until `shutdown` is set, then stops accepting,
    /// signals every still-running Client Connection to drain
    /// (by way of the same `shutdown` flag, which each connection's RX/TX
    /// loops poll), and waits for them before returning.
    pub fn serve(
        self,
        hub: Arc<Hub>,
        ctrl_tx: Sender<ControlMessage>,
        tuner_kind: TunerKind,
        gain_count: u32,
        shutdown: Arc<AtomicBool>,
    ) {
        let mut clients: Vec<JoinHandle<()>> = Vec::new();
        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            match self.inner.accept() {
                Ok((stream, addr)) => {
                    info!("accepted connection from {}", addr);
                    let handle = connection::spawn(
                        stream,
                        addr,
                        hub.clone(),
                        ctrl_tx.clone(),
                        tuner_kind,
                        gain_count,
                        shutdown.clone(),
                    );
                    clients.retain(|h| !h.is_finished());
                    clients.push(handle);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    if shutdown.load(Ordering::Relaxed) {
                        // Accept errors caused by shutting the listener
                        // down concurrently are expected; swallow them.
                    } else {
                        warn!("accept failed: {}", e);
                    }
                }
            }
        }

        info!("shutting down: draining {} client connection(s)", clients.len());
        for handle in clients {
            let _ = handle.join();
        }
        info!("all client connections drained");
    }
}

#[cfg(test)]
mod listener_test;
