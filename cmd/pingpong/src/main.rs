//! Channel ping-pong demo
//!
//! Two threads, one channel, 1000 ordered messages: the receiver asserts
//! order and the stats must show zero drops.

use latgrid::{LatticeId, MessageKind, MessageSystem, Priority};

use std::sync::Arc;
use std::thread;

const COUNT: u64 = 1000;

fn main() {
    let system = Arc::new(MessageSystem::new(4, 256).expect("message system"));
    let a = LatticeId::new(0, 0);
    let b = LatticeId::new(0, 1);
    let channel = system.create_channel(a, b).expect("channel");

    let sender = {
        let system = Arc::clone(&system);
        thread::spawn(move || {
            for i in 0..COUNT {
                let msg = system
                    .compose(MessageKind::Data, Priority::Normal, a, b, i.to_le_bytes().to_vec())
                    .expect("compose");
                system.send(msg).expect("send");
            }
        })
    };

    let receiver = {
        let system = Arc::clone(&system);
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            let mut next = 0u64;
            while next < COUNT {
                if let Some(msg) = channel.recv(b).expect("recv") {
                    let seq = u64::from_le_bytes(msg.payload[..8].try_into().unwrap());
                    assert_eq!(seq, next, "out-of-order delivery");
                    system.release(msg);
                    next += 1;
                } else {
                    thread::yield_now();
                }
            }
        })
    };

    sender.join().unwrap();
    receiver.join().unwrap();

    let stats = system.stats();
    assert_eq!(stats.dropped_messages, 0);
    println!(
        "pingpong: {} messages in order, sent={} dropped={} pool_allocs={} heap_allocs={}",
        COUNT, stats.sent, stats.dropped_messages, stats.pool.pool_allocs, stats.pool.heap_allocs
    );
}
