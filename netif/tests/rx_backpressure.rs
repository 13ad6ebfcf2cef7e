//! Receive-side backpressure tests
//!
//! These tests drive a simulated MAC through pool exhaustion, a full ready
//! ring and FIFO overruns, and check that the device is never left without
//! receive descriptors.

mod common;

use common::{config, deliver, running, tag_of};
use netif::{BufClass, BufPurpose, DeviceConfig, IsrKind};

#[test]
fn test_exhaustion_drops_frame_and_keeps_descriptor() {
    // Ready ring of 4 slots (3 usable), two descriptors primed, two spare
    // large receive buffers.
    let cfg = DeviceConfig {
        rx_buf_large_count: 4,
        rx_desc_count: 2,
        rx_queue_size: 4,
        tx_buf_large_count: 2,
        tx_buf_small_count: 2,
        ..config()
    };
    let (iface, sim) = running(cfg);
    let pool = iface.pool().unwrap();
    assert_eq!(iface.hw_owned().0, 2);
    assert_eq!(pool.available(BufClass::Large, BufPurpose::Rx), 2);

    deliver(&iface, &sim, 1);
    deliver(&iface, &sim, 2);
    assert_eq!(iface.rx_pending(), 2);
    assert_eq!(pool.available(BufClass::Large, BufPurpose::Rx), 0);

    // No replacement left: the frame is discarded, the descriptor re-armed.
    deliver(&iface, &sim, 3);
    let stats = iface.stats();
    assert_eq!(iface.rx_pending(), 2, "dropped frame must not be signalled");
    assert_eq!(stats.rx_frames, 2);
    assert_eq!(stats.rx_dropped, 1);
    assert_eq!(sim.rx_posted(), 2, "device left without descriptors");

    let a = iface.receive().unwrap().expect("first frame");
    let b = iface.receive().unwrap().expect("second frame");
    assert!(iface.receive().unwrap().is_none());
    assert_eq!((tag_of(a.as_slice()), tag_of(b.as_slice())), (1, 2));
    assert_eq!(iface.rx_pending(), 0);

    // A fourth frame lands on a descriptor but is never serviced.
    assert!(sim.inject(&common::frame(4, 64)));
    iface.stop().unwrap();

    drop(a);
    drop(b);
    assert_eq!(pool.available(BufClass::Large, BufPurpose::Rx), 4);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_full_ring_throttles_until_drained() {
    let cfg = DeviceConfig {
        rx_queue_size: 3,
        ..config()
    };
    let (iface, sim) = running(cfg);

    for tag in 1..=4 {
        assert!(sim.inject(&common::frame(tag, 64)));
    }
    iface.isr_handler(IsrKind::Rx);

    assert_eq!(iface.rx_pending(), 2);
    assert!(!sim.rx_irq_enabled(), "reception not throttled");
    assert_eq!(iface.stats().rx_throttled, 1);

    let mut seen = Vec::new();
    while let Some(lease) = iface.receive().unwrap() {
        seen.push(tag_of(lease.as_slice()));
    }
    assert_eq!(seen, [1, 2, 3, 4], "frames reordered");
    assert!(sim.rx_irq_enabled(), "reception not re-enabled");
    assert_eq!(iface.stats().rx_throttled, 3);
    assert_eq!(iface.stats().rx_dropped, 0);
    assert_eq!(iface.rx_pending(), 0);
}

#[test]
fn test_error_descriptor_is_retired() {
    let (iface, sim) = running(config());
    assert!(sim.inject_error());
    assert!(sim.inject(&common::frame(9, 80)));
    iface.isr_handler(IsrKind::Rx);

    let stats = iface.stats();
    assert_eq!(stats.rx_errors, 1);
    assert_eq!(stats.rx_frames, 1);
    assert_eq!(sim.rx_posted(), 4);

    let lease = iface.receive().unwrap().unwrap();
    assert_eq!(lease.len(), 80);
    assert_eq!(tag_of(lease.as_slice()), 9);
}

#[test]
fn test_overrun_is_counted_and_fifo_drained() {
    let cfg = DeviceConfig {
        rx_desc_count: 2,
        ..config()
    };
    let (iface, sim) = running(cfg);

    // Two descriptors, two FIFO entries, then an overrun.
    for tag in 1..=4 {
        assert!(sim.inject(&common::frame(tag, 64)));
    }
    assert!(!sim.inject(&common::frame(5, 64)));
    iface.isr_handler(IsrKind::Unknown);

    let stats = iface.stats();
    assert_eq!(stats.rx_overruns, 1);
    assert_eq!(stats.rx_frames, 4);
    assert_eq!(stats.rx_lost(), 1);
    assert_eq!(iface.dispatch_rx(drop).unwrap(), 4);
}

#[test]
fn test_receive_requires_running() {
    let (iface, _sim) = common::sim_iface(config());
    assert_eq!(iface.receive().unwrap_err(), netif::NetError::NotRunning);
}

#[test]
fn test_conservation_under_churn() {
    let cfg = DeviceConfig {
        rx_buf_large_count: 6,
        rx_desc_count: 3,
        rx_queue_size: 4,
        tx_desc_count: 2,
        ..config()
    };
    let (iface, sim) = running(cfg);
    let pool = iface.pool().unwrap();
    let capacity = 6 + 5 + 5;

    let mut held = Vec::new();
    let mut seed: u32 = 0xC0FF_EE11;
    for step in 0..400u32 {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        match (seed >> 24) % 6 {
            0 => {
                let _ = sim.inject(&common::frame(step as u8, 64));
            }
            1 => iface.isr_handler(IsrKind::Rx),
            2 => {
                if let Some(lease) = iface.receive().unwrap() {
                    held.push(lease);
                }
            }
            3 => {
                let len = if seed & 1 == 0 { 60 } else { 400 };
                if let Ok(lease) = iface.acquire_tx(len) {
                    if let Err(refused) = iface.transmit(lease) {
                        held.push(refused.into_lease());
                    }
                }
            }
            4 => {
                sim.complete_tx(1);
                iface.isr_handler(IsrKind::TxComplete);
            }
            _ => {
                if !held.is_empty() {
                    held.remove(0);
                }
            }
        }
        assert!(pool.stats().outstanding() <= capacity);
        let (rx_owned, tx_owned) = iface.hw_owned();
        assert_eq!(rx_owned, 3, "receive engine starved at step {}", step);
        assert!(tx_owned <= 2);
        assert!(iface.rx_pending() <= 3);
    }

    iface.stop().unwrap();
    assert_eq!(pool.outstanding(), held.len());
    held.clear();
    assert_eq!(pool.outstanding(), 0);
}
