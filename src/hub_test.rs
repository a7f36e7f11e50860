// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::*;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

#[test]
fn publish_delivers_to_every_registered_session() {
    let hub = Hub::new(Some(8));
    let (_id_a, rx_a, _) = hub.register(addr(1));
    let (_id_b, rx_b, _) = hub.register(addr(2));

    let buf: Arc<[u8]> = Arc::from(&b"hello"[..]);
    hub.publish(buf.clone());

    assert_eq!(&*rx_a.try_recv().unwrap(), &b"hello"[..]);
    assert_eq!(&*rx_b.try_recv().unwrap(), &b"hello"[..]);
}

#[test]
fn unregister_stops_further_delivery() {
    let hub = Hub::new(Some(8));
    let (id, rx, _) = hub.register(addr(1));
    hub.unregister(id);
    assert_eq!(hub.session_count(), 0);

    hub.publish(Arc::from(&b"x"[..]));
    assert!(rx.try_recv().is_err());
}

#[test]
fn full_queue_drops_and_counts_without_blocking() {
    let hub = Hub::new(Some(2));
    let (_id, rx, drops) = hub.register(addr(1));

    for i in 0..5u8 {
        hub.publish(Arc::from(&[i][..]));
    }

    assert!(drops.load(Ordering::Relaxed) >= 3);
    // The channel never exceeds its configured capacity.
    let mut received = 0;
    while rx.try_recv().is_ok() {
        received += 1;
    }
    assert!(received <= 2);
}

#[test]
fn rate_hint_sizes_future_registrations_not_existing_ones() {
    let hub = Hub::new(None);
    let (_id, rx, _) = hub.register(addr(1));
    hub.set_rate_hint(2_048_000);

    // Existing session's channel capacity was fixed at MIN_QUEUE_BUFFERS.
    for i in 0..(MIN_QUEUE_BUFFERS as u8 + 10) {
        hub.publish(Arc::from(&[i][..]));
    }
    let mut received = 0;
    while rx.try_recv().is_ok() {
        received += 1;
    }
    assert!(received <= MIN_QUEUE_BUFFERS);
}

#[test]
fn capacity_override_ignores_rate_hint() {
    let hub = Hub::new(Some(4));
    hub.set_rate_hint(20_000_000); // would otherwise grow capacity a lot
    let (_id, rx, _) = hub.register(addr(1));
    for i in 0..10u8 {
        hub.publish(Arc::from(&[i][..]));
    }
    let mut received = 0;
    while rx.try_recv().is_ok() {
        received += 1;
    }
    assert_eq!(received, 4);
}

#[test]
fn session_count_tracks_registrations() {
    let hub = Hub::new(Some(4));
    assert_eq!(hub.session_count(), 0);
    let (id_a, _rx_a, _) = hub.register(addr(1));
    let (_id_b, _rx_b, _) = hub.register(addr(2));
    assert_eq!(hub.session_count(), 2);
    hub.unregister(id_a);
    assert_eq!(hub.session_count(), 1);
}
