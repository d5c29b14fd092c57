//! Exercises `PgEventLog` against a real Postgres instance: replaying the
//! log reconstructs the last recorded value and merged context. Skips when
//! `DATABASE_URL` is unset.

mod test_support;

use hsm_core::{diff_context, merge_context, EventLog, EventSource, MachineEvent};
use hsm_persistence::pg::{PgEventLog, PoolProvider};
use serde_json::json;
use ulid::Ulid;

#[test]
fn append_batch_then_list_preserves_order_and_incremental_context() {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("skip (no DATABASE_URL)");
        return;
    }
    test_support::with_pool(|pool| {
        test_support::truncate_all(pool);
        let log = PgEventLog::new(PoolProvider { pool: pool.clone() });
        let root = Ulid::new();

        let e1 = MachineEvent::new(
            root,
            1,
            "order",
            vec!["order.pending".into()],
            EventSource::External,
            "order.machine.start",
            None,
            Some(json!({"amount": 10}).as_object().unwrap().clone()),
            None,
        );
        let e2 = MachineEvent::new(
            root,
            2,
            "order",
            vec!["order.paid".into()],
            EventSource::External,
            "PAY",
            None,
            Some(json!({"amount": 10, "paid": true}).as_object().unwrap().clone()),
            None,
        );
        log.append_batch(root, &[e1, e2]).expect("append");

        let rows = log.list(root).expect("list");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].sequence_number, 1);
        assert_eq!(rows[1].sequence_number, 2);

        // The log stores incremental diffs, not full snapshots: the second
        // row's persisted context should be strictly smaller than the full
        // context it represents once merged with the first.
        let full_first = rows[0].context.clone().unwrap_or_default();
        let full_second_diff = rows[1].context.clone().unwrap_or_default();
        let expected_diff = diff_context(&full_first, &json!({"amount": 10, "paid": true}).as_object().unwrap().clone());
        assert_eq!(full_second_diff, expected_diff);

        let mut merged = full_first;
        merge_context(&mut merged, &full_second_diff);
        assert_eq!(merged, json!({"amount": 10, "paid": true}).as_object().unwrap().clone());
    });
}
