use super::*;
use crate::execution::{
    ColRef, CompOp, Condition, Executor, MergeJoinExec, Operand,
};
use crate::record::{ColumnDef, DataType, Value};
use crate::transaction::TxnState;
use tempfile::TempDir;

fn open_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    (dir, db)
}

fn two_int_cols() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("id", DataType::Int),
        ColumnDef::new("v", DataType::Int),
    ]
}

fn eq_int(column: &str, value: i32) -> Condition {
    Condition::new(
        ColRef::new(column),
        CompOp::Eq,
        Operand::Literal(Value::Int(value)),
    )
}

#[test]
fn test_heap_round_trip_and_free_list() {
    // records_per_page = 4: five inserts span two pages
    let (_dir, mut db) = open_db();
    db.create_table_with_capacity("t", two_int_cols(), 4).unwrap();

    for (id, v) in [(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)] {
        db.insert(None, "t", vec![Value::Int(id), Value::Int(v)]).unwrap();
    }

    let heap = db.heap_file("t").unwrap();
    let buffer = db.buffer();
    {
        let mut bm = buffer.lock().unwrap();
        // Two data pages; only the second has space left
        assert_eq!(heap.read_header(&mut bm).unwrap().num_pages, 3);
        assert_eq!(heap.free_pages(&mut bm).unwrap(), vec![2]);
    }

    db.delete(None, "t", vec![eq_int("id", 3)]).unwrap();
    {
        let mut bm = buffer.lock().unwrap();
        // The full page rejoined the list in ascending order
        assert_eq!(heap.free_pages(&mut bm).unwrap(), vec![1, 2]);
    }

    let rows = db.select("t", vec![]).unwrap();
    assert_eq!(
        rows,
        vec![
            vec![Value::Int(1), Value::Int(10)],
            vec![Value::Int(2), Value::Int(20)],
            vec![Value::Int(4), Value::Int(40)],
            vec![Value::Int(5), Value::Int(50)],
        ]
    );
    assert_eq!(buffer.lock().unwrap().pinned_page_count(), 0);
}

#[test]
fn test_duplicate_key_rejected_without_side_effects() {
    let (_dir, mut db) = open_db();
    db.create_table("t", two_int_cols()).unwrap();
    db.create_index("t", &["id"]).unwrap();

    let rid = db.insert(None, "t", vec![Value::Int(1), Value::Int(10)]).unwrap();
    let result = db.insert(None, "t", vec![Value::Int(1), Value::Int(20)]);
    assert!(matches!(
        result,
        Err(DbError::Query(QueryError::Index(IndexError::KeyDuplicate)))
    ));

    // Neither heap nor index changed
    assert_eq!(
        db.select("t", vec![]).unwrap(),
        vec![vec![Value::Int(1), Value::Int(10)]]
    );
    let handles = db.index_handles("t").unwrap();
    let buffer = db.buffer();
    let mut bm = buffer.lock().unwrap();
    assert_eq!(
        handles[0].tree.get_value(&mut bm, &1i32.to_le_bytes()).unwrap(),
        Some(rid)
    );
}

#[test]
fn test_merge_join_on_executor_facade() {
    // r(a)={1,2,3,3,5}, s(b)={2,3,3,4}
    let (_dir, mut db) = open_db();
    db.create_table("r", vec![ColumnDef::new("a", DataType::Int)]).unwrap();
    db.create_table("s", vec![ColumnDef::new("b", DataType::Int)]).unwrap();
    for a in [1, 2, 3, 3, 5] {
        // No unique index on r, duplicate 3s are fine in the heap
        db.insert(None, "r", vec![Value::Int(a)]).unwrap();
    }
    for b in [2, 3, 3, 4] {
        db.insert(None, "s", vec![Value::Int(b)]).unwrap();
    }

    let left = db.seq_scan("r", vec![]).unwrap();
    let right = db.seq_scan("s", vec![]).unwrap();
    let mut join = MergeJoinExec::new(
        Box::new(left),
        Box::new(right),
        vec![Condition::new(
            ColRef::qualified("r", "a"),
            CompOp::Eq,
            Operand::Column(ColRef::qualified("s", "b")),
        )],
        false,
    )
    .unwrap();

    let mut pairs = Vec::new();
    join.begin_tuple().unwrap();
    while !join.is_end() {
        let row = join.current().unwrap();
        pairs.push((
            i32::from_le_bytes([row[0], row[1], row[2], row[3]]),
            i32::from_le_bytes([row[4], row[5], row[6], row[7]]),
        ));
        join.next_tuple().unwrap();
    }
    assert_eq!(pairs, vec![(2, 2), (3, 3), (3, 3), (3, 3), (3, 3)]);
}

#[test]
fn test_abort_rolls_back_updates() {
    // Update three rows inside a transaction, then abort
    let (_dir, mut db) = open_db();
    db.create_table("t", two_int_cols()).unwrap();
    db.create_index("t", &["id"]).unwrap();

    for (id, v) in [(1, 10), (2, 20), (3, 30)] {
        db.insert(None, "t", vec![Value::Int(id), Value::Int(v)]).unwrap();
    }
    let before_rows = db.select("t", vec![]).unwrap();
    let before_rids: Vec<_> = {
        let handles = db.index_handles("t").unwrap();
        let buffer = db.buffer();
        let mut bm = buffer.lock().unwrap();
        (1..=3)
            .map(|id: i32| {
                handles[0]
                    .tree
                    .get_value(&mut bm, &id.to_le_bytes())
                    .unwrap()
                    .unwrap()
            })
            .collect()
    };

    let txn = db.begin_txn();
    for id in 1..=3 {
        db.update(
            Some(txn),
            "t",
            vec![SetClause {
                column: "v".to_string(),
                value: Value::Int(id * 10 + 1),
            }],
            vec![eq_int("id", id)],
        )
        .unwrap();
    }
    assert_ne!(db.select("t", vec![]).unwrap(), before_rows);

    db.abort_txn(txn).unwrap();

    assert_eq!(db.select("t", vec![]).unwrap(), before_rows);
    let handles = db.index_handles("t").unwrap();
    let buffer = db.buffer();
    let mut bm = buffer.lock().unwrap();
    for (i, id) in (1..=3i32).enumerate() {
        assert_eq!(
            handles[0].tree.get_value(&mut bm, &id.to_le_bytes()).unwrap(),
            Some(before_rids[i])
        );
    }
    assert_eq!(
        db.txn(txn).unwrap().lock().unwrap().state(),
        TxnState::Aborted
    );
}

#[test]
fn test_abort_rolls_back_insert_update_delete_mix() {
    let (_dir, mut db) = open_db();
    db.create_table("t", two_int_cols()).unwrap();
    db.create_index("t", &["id"]).unwrap();

    for (id, v) in [(1, 10), (2, 20), (3, 30)] {
        db.insert(None, "t", vec![Value::Int(id), Value::Int(v)]).unwrap();
    }
    let before_rows = db.select("t", vec![]).unwrap();

    let txn = db.begin_txn();
    db.insert(Some(txn), "t", vec![Value::Int(4), Value::Int(40)]).unwrap();
    db.delete(Some(txn), "t", vec![eq_int("id", 1)]).unwrap();
    db.update(
        Some(txn),
        "t",
        vec![SetClause {
            column: "id".to_string(),
            value: Value::Int(9),
        }],
        vec![eq_int("id", 2)],
    )
    .unwrap();

    db.abort_txn(txn).unwrap();

    assert_eq!(db.select("t", vec![]).unwrap(), before_rows);
    let handles = db.index_handles("t").unwrap();
    let buffer = db.buffer();
    let mut bm = buffer.lock().unwrap();
    for id in [1i32, 2, 3] {
        assert!(handles[0]
            .tree
            .get_value(&mut bm, &id.to_le_bytes())
            .unwrap()
            .is_some());
    }
    for id in [4i32, 9] {
        assert!(handles[0]
            .tree
            .get_value(&mut bm, &id.to_le_bytes())
            .unwrap()
            .is_none());
    }
}

#[test]
fn test_commit_marks_state_and_keeps_changes() {
    let (_dir, mut db) = open_db();
    db.create_table("t", two_int_cols()).unwrap();

    let txn = db.begin_txn();
    db.insert(Some(txn), "t", vec![Value::Int(1), Value::Int(10)]).unwrap();
    db.commit_txn(txn).unwrap();

    assert_eq!(
        db.txn(txn).unwrap().lock().unwrap().state(),
        TxnState::Committed
    );
    assert_eq!(db.select("t", vec![]).unwrap().len(), 1);
}

#[test]
fn test_index_scan_through_facade() {
    let (_dir, mut db) = open_db();
    db.create_table("t", two_int_cols()).unwrap();
    db.create_index("t", &["id"]).unwrap();

    for id in [5, 2, 8, 1, 9, 4] {
        db.insert(None, "t", vec![Value::Int(id), Value::Int(id * 10)]).unwrap();
    }

    let mut scan = db
        .index_scan(
            "t",
            &["id"],
            vec![
                Condition::new(
                    ColRef::new("id"),
                    CompOp::Ge,
                    Operand::Literal(Value::Int(2)),
                ),
                Condition::new(
                    ColRef::new("id"),
                    CompOp::Le,
                    Operand::Literal(Value::Int(8)),
                ),
            ],
        )
        .unwrap();

    let mut ids = Vec::new();
    scan.begin_tuple().unwrap();
    while !scan.is_end() {
        let row = scan.current().unwrap();
        ids.push(i32::from_le_bytes([row[0], row[1], row[2], row[3]]));
        scan.next_tuple().unwrap();
    }
    // Key order, not insertion order
    assert_eq!(ids, vec![2, 4, 5, 8]);
}

#[test]
fn test_create_index_backfill_swallows_duplicates() {
    let (_dir, mut db) = open_db();
    db.create_table("t", two_int_cols()).unwrap();

    // Two rows share v = 10; back-fill keeps the first
    for (id, v) in [(1, 10), (2, 10), (3, 30)] {
        db.insert(None, "t", vec![Value::Int(id), Value::Int(v)]).unwrap();
    }
    db.create_index("t", &["v"]).unwrap();

    let handles = db.index_handles("t").unwrap();
    let buffer = db.buffer();
    let mut bm = buffer.lock().unwrap();
    assert!(handles[0]
        .tree
        .get_value(&mut bm, &10i32.to_le_bytes())
        .unwrap()
        .is_some());
    assert!(handles[0]
        .tree
        .get_value(&mut bm, &30i32.to_le_bytes())
        .unwrap()
        .is_some());
}

#[test]
fn test_reopen_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");

    {
        let mut db = Database::open(&path).unwrap();
        db.create_table("t", two_int_cols()).unwrap();
        db.create_index("t", &["id"]).unwrap();
        db.insert(None, "t", vec![Value::Int(7), Value::Int(70)]).unwrap();
        db.buffer().lock().unwrap().flush_all().unwrap();
    }

    let db = Database::open(&path).unwrap();
    assert_eq!(
        db.select("t", vec![eq_int("id", 7)]).unwrap(),
        vec![vec![Value::Int(7), Value::Int(70)]]
    );
    let handles = db.index_handles("t").unwrap();
    let buffer = db.buffer();
    let mut bm = buffer.lock().unwrap();
    assert!(handles[0]
        .tree
        .get_value(&mut bm, &7i32.to_le_bytes())
        .unwrap()
        .is_some());
}

#[test]
fn test_drop_table_removes_files() {
    let (_dir, mut db) = open_db();
    db.create_table("t", two_int_cols()).unwrap();
    db.create_index("t", &["id"]).unwrap();
    db.insert(None, "t", vec![Value::Int(1), Value::Int(10)]).unwrap();

    db.drop_table("t").unwrap();
    assert!(matches!(
        db.select("t", vec![]),
        Err(DbError::Catalog(CatalogError::TableNotFound(_)))
    ));
    assert!(matches!(
        db.create_table("t", two_int_cols()),
        Ok(())
    ));
}

#[test]
fn test_mixed_column_types_round_trip() {
    let (_dir, mut db) = open_db();
    db.create_table(
        "events",
        vec![
            ColumnDef::new("id", DataType::Int),
            ColumnDef::new("name", DataType::Char(12)),
            ColumnDef::new("score", DataType::Float),
            ColumnDef::new("day", DataType::Date),
        ],
    )
    .unwrap();
    db.create_index("events", &["day"]).unwrap();

    let day = Value::parse_date("2024-03-15").unwrap();
    db.insert(
        None,
        "events",
        vec![
            Value::Int(1),
            Value::Str("launch".to_string()),
            Value::Float(9.5),
            day.clone(),
        ],
    )
    .unwrap();

    let rows = db
        .select(
            "events",
            vec![Condition::new(
                ColRef::new("day"),
                CompOp::Eq,
                Operand::Literal(day.clone()),
            )],
        )
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][1], Value::Str("launch".to_string()));
    assert_eq!(rows[0][3], day);

    // Strings cannot be compared with the date column
    let result = db.select(
        "events",
        vec![Condition::new(
            ColRef::new("day"),
            CompOp::Eq,
            Operand::Literal(Value::Str("2024-03-15".to_string())),
        )],
    );
    assert!(result.is_err());
}

#[test]
fn test_update_without_txn() {
    let (_dir, mut db) = open_db();
    db.create_table("t", two_int_cols()).unwrap();
    for (id, v) in [(1, 10), (2, 20)] {
        db.insert(None, "t", vec![Value::Int(id), Value::Int(v)]).unwrap();
    }

    let count = db
        .update(
            None,
            "t",
            vec![SetClause {
                column: "v".to_string(),
                value: Value::Int(0),
            }],
            vec![eq_int("id", 2)],
        )
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(
        db.select("t", vec![]).unwrap(),
        vec![
            vec![Value::Int(1), Value::Int(10)],
            vec![Value::Int(2), Value::Int(0)],
        ]
    );
}
