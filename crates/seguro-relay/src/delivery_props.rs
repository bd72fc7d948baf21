use proptest::prelude::*;
use seguro_proto::Meta;
use std::sync::Arc;

use crate::connections::ConnectionRegistry;
use crate::delivery::{DeliveryEngine, DeliveryLimits, Outgoing};
use crate::mailbox::MailboxMap;
use crate::metrics::RelayMetrics;

fn engine(limits: DeliveryLimits) -> DeliveryEngine {
    let mailboxes: MailboxMap = Arc::default();
    let connections = ConnectionRegistry::new(mailboxes.clone());
    DeliveryEngine::new(mailboxes, connections, limits, Arc::new(RelayMetrics::new().unwrap()))
}

fn recipients() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..4, 1..60)
}

const NAMES: [&str; 4] = ["alice", "bob", "carol", "dave"];

proptest! {
    // Ids per recipient are 1, 2, 3, ... regardless of interleaving with
    // other recipients or pulls in between.
    #[test]
    fn ids_are_dense_and_increasing_per_recipient(targets in recipients(), pulls in prop::collection::vec(any::<bool>(), 60)) {
        let engine = engine(DeliveryLimits::default());
        let mut expected = [0u64; 4];
        for (i, t) in targets.iter().enumerate() {
            let d = engine.deliver(NAMES[*t], Outgoing::direct("x", "Zm9v", Meta::new()));
            expected[*t] += 1;
            prop_assert_eq!(d.entry.id, expected[*t]);
            if pulls[i] {
                engine.fetch_pending(NAMES[*t], false);
            }
        }
        for (n, name) in NAMES.iter().enumerate() {
            let history = engine.fetch_history(name, None, 1_000);
            prop_assert_eq!(history.len() as u64, expected[n]);
            prop_assert!(history.windows(2).all(|w| w[0].id < w[1].id));
        }
    }

    #[test]
    fn peek_then_consume_match_and_empty_after(count in 0usize..30) {
        let engine = engine(DeliveryLimits::default());
        for _ in 0..count {
            engine.deliver("alice", Outgoing::direct("bob", "Zm9v", Meta::new()));
        }
        let peeked = engine.fetch_pending("alice", true);
        let consumed = engine.fetch_pending("alice", false);
        prop_assert_eq!(peeked.len(), count);
        prop_assert_eq!(&peeked, &consumed);
        prop_assert!(engine.fetch_pending("alice", false).is_empty());
    }

    #[test]
    fn history_since_returns_exactly_the_newer_prefix(count in 1u64..50, since in 0u64..60, limit in 1usize..20) {
        let engine = engine(DeliveryLimits::default());
        for _ in 0..count {
            engine.deliver("alice", Outgoing::direct("bob", "Zm9v", Meta::new()));
        }
        let got: Vec<u64> = engine
            .fetch_history("alice", Some(since), limit)
            .iter()
            .map(|m| m.id)
            .collect();
        let want: Vec<u64> = ((since + 1)..=count).take(limit).collect();
        prop_assert_eq!(got, want);
    }

    #[test]
    fn retention_never_reuses_ids(count in 1usize..80, max_history in 1usize..10) {
        let engine = engine(DeliveryLimits { max_history, ..DeliveryLimits::default() });
        let mut last = 0;
        for _ in 0..count {
            let id = engine.deliver("alice", Outgoing::direct("bob", "Zm9v", Meta::new())).entry.id;
            prop_assert!(id > last);
            last = id;
        }
        let history = engine.fetch_history("alice", None, 1_000);
        prop_assert_eq!(history.len(), count.min(max_history));
        prop_assert_eq!(history.last().map(|m| m.id), Some(count as u64));
    }
}
