//! Randomised operation sequences checked against the queue's invariants

mod common;

use common::small_config;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use transmit_queue::test_utils::HoldingTransport;
use transmit_queue::{IntentId, SendStatus, TransmitIntent, TransmitQueue, TxFailure};

#[derive(Debug, Clone)]
enum Op {
    Submit { target: usize, expired: bool },
    Complete { ok: bool },
    Drive,
    Sweep,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..3usize, prop::bool::weighted(0.2))
            .prop_map(|(target, expired)| Op::Submit { target, expired }),
        3 => any::<bool>().prop_map(|ok| Op::Complete { ok }),
        1 => Just(Op::Drive),
        1 => Just(Op::Sweep),
    ]
}

struct Tracked {
    id: IntentId,
    expired: bool,
    completions: Arc<AtomicUsize>,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_invariants_hold_for_any_sequence(
        pending in 1usize..4,
        queued in 2usize..8,
        headroom in 0usize..4,
        draining in any::<bool>(),
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        let unblock = queued / 2;
        let drop_level = queued + headroom;
        let transport = Arc::new(HoldingTransport::new());
        transport.set_draining(draining);
        let queue = TransmitQueue::new(
            small_config(pending, queued, unblock, drop_level),
            transport.clone(),
        ).unwrap();

        let mut tracked = Vec::new();
        for op in ops {
            match op {
                Op::Submit { target, expired } => {
                    let completions = Arc::new(AtomicUsize::new(0));
                    let counter = Arc::clone(&completions);
                    let mut intent = TransmitIntent::new(format!("peer-{}", target), b"data".to_vec())
                        .on_complete(move |_| {
                            counter.fetch_add(1, Ordering::SeqCst);
                        });
                    if expired {
                        intent = intent.with_timeout(Duration::ZERO);
                    }
                    tracked.push(Tracked { id: intent.id(), expired, completions });
                    queue.submit(None, intent).unwrap();
                }
                Op::Complete { ok } => {
                    let status = if ok {
                        SendStatus::Sent
                    } else {
                        SendStatus::Failed(TxFailure::Transport("reset".into()))
                    };
                    transport.complete_next(status);
                }
                Op::Drive => {
                    queue.drive();
                }
                Op::Sweep => {
                    queue.sweep_expired();
                    let again = queue.sweep_expired();
                    prop_assert_eq!(again.removed, 0);
                }
            }

            prop_assert!(queue.outstanding() <= pending);
            prop_assert!(transport.held_count() <= pending);
            prop_assert!(queue.queued_len() <= drop_level);
            prop_assert!(!queue.status().sending);
        }

        loop {
            let completed = transport.complete_all(SendStatus::Sent);
            if completed == 0 && !queue.drive() {
                break;
            }
        }
        prop_assert_eq!(queue.outstanding(), 0);
        prop_assert_eq!(queue.queued_len(), 0);

        for t in &tracked {
            prop_assert_eq!(t.completions.load(Ordering::SeqCst), 1, "{} completed", t.id);
        }

        // FIFO: ids are handed out in submission order
        let submitted = transport.submitted_ids();
        prop_assert!(submitted.windows(2).all(|w| w[0] < w[1]));

        for t in tracked.iter().filter(|t| t.expired) {
            prop_assert!(!submitted.contains(&t.id));
        }
        prop_assert!(transport.max_in_flight() <= pending);
    }
}
