//! Many producer threads sharing one queue while completions arrive elsewhere

mod common;

use common::{init_tracing, small_config};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use transmit_queue::test_utils::HoldingTransport;
use transmit_queue::{SendStatus, TransmitIntent, TransmitQueue, TxFailure};

const PRODUCERS: usize = 8;
const PER_PRODUCER: usize = 50;
const MAX_PENDING: usize = 4;

#[test]
fn test_concurrent_producers_respect_capacity() {
    init_tracing();
    let transport = Arc::new(HoldingTransport::new());
    let queue =
        TransmitQueue::new(small_config(MAX_PENDING, 50, 20, 150), transport.clone()).unwrap();

    let sent = Arc::new(AtomicUsize::new(0));
    let overloaded = Arc::new(AtomicUsize::new(0));
    let other = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let completer = {
        let transport = Arc::clone(&transport);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                if !transport.complete_next(SendStatus::Sent) {
                    thread::yield_now();
                }
            }
        })
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = queue.clone();
            let sent = Arc::clone(&sent);
            let overloaded = Arc::clone(&overloaded);
            let other = Arc::clone(&other);
            thread::spawn(move || {
                for n in 0..PER_PRODUCER {
                    let sent = Arc::clone(&sent);
                    let overloaded = Arc::clone(&overloaded);
                    let other = Arc::clone(&other);
                    let intent = TransmitIntent::new(format!("peer-{}", p), vec![n as u8; 8])
                        .on_complete(move |status| {
                            let counter = match status {
                                SendStatus::Sent => &sent,
                                SendStatus::Failed(TxFailure::Overloaded) => &overloaded,
                                SendStatus::Failed(_) => &other,
                            };
                            counter.fetch_add(1, Ordering::SeqCst);
                        });
                    queue.submit(None, intent).unwrap();
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    stop.store(true, Ordering::Release);
    completer.join().unwrap();

    // Flush whatever is left from this thread
    loop {
        let completed = transport.complete_all(SendStatus::Sent);
        let moved = queue.drive();
        if completed == 0 && !moved {
            break;
        }
    }

    let total = PRODUCERS * PER_PRODUCER;
    assert!(transport.max_in_flight() <= MAX_PENDING);
    assert_eq!(
        sent.load(Ordering::SeqCst) + overloaded.load(Ordering::SeqCst),
        total
    );
    assert_eq!(other.load(Ordering::SeqCst), 0);
    assert_eq!(queue.outstanding(), 0);
    assert_eq!(queue.queued_len(), 0);

    let status = queue.status();
    assert!(!status.sending);
    assert!(!status.exclusive_held);
    assert_eq!(
        status.metrics.transport_sent as usize,
        sent.load(Ordering::SeqCst)
    );
}

#[test]
fn test_single_producer_order_survives_concurrent_completion() {
    init_tracing();
    let transport = Arc::new(HoldingTransport::new());
    let queue = TransmitQueue::new(small_config(2, 500, 100, 1000), transport.clone()).unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let completer = {
        let transport = Arc::clone(&transport);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                if !transport.complete_next(SendStatus::Sent) {
                    thread::yield_now();
                }
            }
        })
    };

    let mut ids = Vec::new();
    for n in 0..200u32 {
        let intent = TransmitIntent::new("peer", n.to_be_bytes().to_vec());
        ids.push(intent.id());
        queue.submit(None, intent).unwrap();
    }

    stop.store(true, Ordering::Release);
    completer.join().unwrap();
    loop {
        let completed = transport.complete_all(SendStatus::Sent);
        if completed == 0 && !queue.drive() {
            break;
        }
    }

    assert_eq!(transport.submitted_ids(), ids);
}

#[test]
fn test_exclusive_rights_are_not_shared() {
    init_tracing();
    let transport = Arc::new(HoldingTransport::new());
    let queue = TransmitQueue::new(small_config(2, 10, 6, 12), transport).unwrap();
    let winners = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(std::sync::Barrier::new(PRODUCERS));

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let queue = queue.clone();
            let winners = Arc::clone(&winners);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let guard = queue.try_exclusive();
                if guard.is_some() {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
                // Hold until everyone has tried
                barrier.wait();
                drop(guard);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    assert!(queue.try_exclusive().is_some());
}
