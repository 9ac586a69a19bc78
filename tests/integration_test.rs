//! Integration tests for mirage.
#![allow(
    clippy::panic,
    clippy::too_many_lines,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp
)]

use mirage::{Collection, Engine, Error, Live, MirageConfig, Mirrorable, QueryRow, Resolved, Value, mirrorable};

#[derive(Debug)]
struct Player {
    id: i64,
    name: String,
    score: i64,
}

mirrorable!(Player { id, name, score });

#[derive(Debug)]
struct Item {
    name: String,
    owner: i64,
    value: i64,
}

mirrorable!(Item { name, owner, value });

fn player(id: i64, name: &str, score: i64) -> Live<Player> {
    Live::new(Player {
        id,
        name: name.to_string(),
        score,
    })
}

fn item(name: &str, owner: i64, value: i64) -> Live<Item> {
    Live::new(Item {
        name: name.to_string(),
        owner,
        value,
    })
}

fn table_rows(engine: &Engine, table: &str) -> Vec<Vec<Value>> {
    let sql = format!("SELECT * FROM {table} ORDER BY object_id");
    let mut stmt = engine.connection().prepare(&sql).unwrap();
    let width = stmt.column_count();
    stmt.query_map([], |row| (0..width).map(|i| row.get::<_, Value>(i)).collect())
        .unwrap()
        .collect::<rusqlite::Result<Vec<Vec<Value>>>>()
        .unwrap()
}

mod identity_tests {
    use super::*;

    #[test]
    fn test_query_returns_original_objects() {
        let engine = Engine::in_memory().unwrap();
        let objects = vec![
            player(1, "Alice", 100),
            player(2, "Bob", 200),
            player(3, "Carol", 300),
        ];
        let players = engine.mirror(objects.clone()).unwrap();

        let found = players.query("score >= 200").unwrap();
        assert_eq!(found.len(), 2);
        for handle in &found {
            assert!(objects.iter().any(|o| handle.is(o)));
        }
        assert!(found.iter().all(|h| !h.is(&objects[0])));
    }

    #[test]
    fn test_mutation_through_query_result_reaches_original() {
        let engine = Engine::in_memory().unwrap();
        let alice = player(1, "Alice", 100);
        let players = engine.mirror(vec![alice.clone()]).unwrap();

        let found = players.query("name = 'Alice'").unwrap();
        found[0].update(|p| p.name = "Alicia".to_string()).unwrap();
        assert_eq!(alice.borrow().name, "Alicia");
    }
}

mod live_sync_tests {
    use super::*;

    #[test]
    fn test_write_visible_to_next_query() {
        let engine = Engine::in_memory().unwrap();
        let bob = player(2, "Bob", 200);
        let players = engine.mirror(vec![player(1, "Alice", 100), bob.clone()]).unwrap();

        players[1].update(|p| p.score = 999).unwrap();

        let new = players.query("score = 999").unwrap();
        assert_eq!(new.len(), 1);
        assert!(new[0].is(&bob));
        assert!(players.query("score = 200").unwrap().is_empty());
    }

    #[test]
    fn test_sync_twice_leaves_row_unchanged() {
        let engine = Engine::in_memory().unwrap();
        let alice = player(1, "Alice", 100);
        engine.sync(&alice, None).unwrap();
        let first = table_rows(&engine, "player");

        engine.sync(&alice, None).unwrap();
        assert_eq!(table_rows(&engine, "player"), first);
    }

    #[test]
    fn test_direct_writes_need_explicit_sync() {
        let engine = Engine::in_memory().unwrap();
        let alice = player(1, "Alice", 100);
        let players = engine.mirror(vec![alice.clone()]).unwrap();

        alice.borrow_mut().score = 5;
        assert!(players.query("score = 5").unwrap().is_empty());

        engine.sync(&alice, None).unwrap();
        assert_eq!(players.query("score = 5").unwrap().len(), 1);
    }
}

mod join_tests {
    use super::*;

    struct Fixture {
        engine: Engine,
        alice: Live<Player>,
        excalibur: Live<Item>,
        shield: Live<Item>,
        phoenix: Live<Item>,
    }

    fn fixture() -> Fixture {
        let engine = Engine::in_memory().unwrap();
        let alice = player(1, "Alice", 0);
        let excalibur = item("Excalibur", 1, 50);
        let shield = item("Shield", 2, 15);
        let phoenix = item("Phoenix Down", 1, 10);
        Fixture {
            engine,
            alice,
            excalibur,
            shield,
            phoenix,
        }
    }

    #[test]
    fn test_join_and_rejoin_after_mutation() {
        let f = fixture();
        let players = f
            .engine
            .mirror(vec![f.alice.clone(), player(2, "Bob", 0)])
            .unwrap();
        let items = f
            .engine
            .mirror(vec![f.excalibur.clone(), f.shield.clone(), f.phoenix.clone()])
            .unwrap();

        let on = "player.id = item.owner";
        let filter = "player.name = 'Alice'";

        let pairs = players.join(&items, on, filter).unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|(p, _)| p.is(&f.alice)));
        assert!(pairs.iter().any(|(_, i)| i.is(&f.excalibur)));
        assert!(pairs.iter().any(|(_, i)| i.is(&f.phoenix)));

        items[1].update(|i| i.owner = 1).unwrap();

        let pairs = players.join(&items, on, filter).unwrap();
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().any(|(_, i)| i.is(&f.shield)));
    }

    #[test]
    fn test_join_from_map_to_list() {
        let f = fixture();
        let players = f.engine.mirror(vec![("hero", f.alice.clone())]).unwrap();
        let items = f
            .engine
            .mirror(vec![f.excalibur.clone(), f.shield.clone()])
            .unwrap();

        let pairs = players.join_all(&items, "player.id = item.owner").unwrap();
        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].0.is(&f.alice));
        assert!(pairs[0].1.is(&f.excalibur));
    }
}

mod aggregate_tests {
    use super::*;

    #[test]
    fn test_scalar_and_grouped_aggregates() {
        let engine = Engine::in_memory().unwrap();
        let alice = player(1, "Alice", 0);
        let bob = player(2, "Bob", 0);
        let _players = engine.mirror(vec![alice.clone(), bob.clone()]).unwrap();
        let _items = engine
            .mirror(vec![
                item("Excalibur", 1, 50),
                item("Shield", 2, 15),
                item("Phoenix Down", 1, 10),
            ])
            .unwrap();

        let total = engine.resolve("SELECT SUM(value) FROM item", []).unwrap();
        assert_eq!(total.len(), 1);
        assert!(matches!(
            &total[0],
            QueryRow::Single(Resolved::Scalar(Value::Integer(75)))
        ));

        let grouped = engine
            .resolve(
                "SELECT player.object_id AS player_object_id, SUM(item.value) AS total \
                 FROM player JOIN item ON player.id = item.owner \
                 GROUP BY player.object_id ORDER BY total DESC",
                [],
            )
            .unwrap();
        assert_eq!(grouped.len(), 2);

        let first = grouped[0].as_tuple().unwrap();
        assert!(first[0].to_handle::<Player>().unwrap().is(&alice));
        assert_eq!(first[1].as_i64(), Some(60));

        let second = grouped[1].as_tuple().unwrap();
        assert!(second[0].to_handle::<Player>().unwrap().is(&bob));
        assert_eq!(second[1].as_i64(), Some(15));
    }

    #[test]
    fn test_average_is_real() {
        let engine = Engine::in_memory().unwrap();
        let _items = engine
            .mirror(vec![item("a", 1, 1), item("b", 1, 2)])
            .unwrap();

        let rows = engine.resolve("SELECT AVG(value) FROM item", []).unwrap();
        assert_eq!(rows[0].as_single().and_then(Resolved::as_f64), Some(1.5));
    }
}

mod removal_tests {
    use super::*;

    #[test]
    fn test_removed_element_is_not_queryable() {
        let engine = Engine::in_memory().unwrap();
        let mut players = engine
            .mirror(vec![player(1, "Alice", 1), player(2, "Bob", 2)])
            .unwrap();

        players.remove_at(1).unwrap();
        assert!(players.query("name = 'Bob'").unwrap().is_empty());
        assert_eq!(engine.row_count("player").unwrap(), 1);
    }

    #[test]
    fn test_handle_on_never_synced_object_indexes_it() {
        let engine = Engine::in_memory().unwrap();
        let carol = player(3, "Carol", 0);
        let handle = mirage::Handle::new(carol.clone(), &engine);

        handle.update(|p| p.score = 99).unwrap();
        let rows = engine
            .resolve("SELECT COUNT(*) FROM player WHERE score = 99", [])
            .unwrap();
        assert_eq!(rows[0].as_single().and_then(Resolved::as_i64), Some(1));
    }

    #[test]
    fn test_stale_handle_does_not_resurrect_row() {
        let engine = Engine::in_memory().unwrap();
        let mut players = engine.mirror(vec![player(1, "Alice", 1)]).unwrap();

        let removed = players.remove_at(0).unwrap();
        removed.update(|p| p.score = 42).unwrap();
        assert_eq!(removed.borrow().score, 42);
        assert_eq!(engine.row_count("player").unwrap(), 0);
    }
}

mod reclamation_tests {
    use super::*;

    #[test]
    fn test_collection_keeps_objects_alive() {
        let engine = Engine::in_memory().unwrap();
        let players = engine.mirror(vec![player(1, "Alice", 1)]).unwrap();
        let id = players[0].id();

        let rows = engine.resolve("SELECT object_id FROM player", []).unwrap();
        assert!(rows[0].as_single().unwrap().as_object().is_some());
        assert!(engine.is_registered(id));

        drop(players);

        assert!(engine.resolve("SELECT object_id FROM player", []).unwrap().is_empty());
        assert!(!engine.is_registered(id));
        assert_eq!(engine.purge_reclaimed().unwrap(), 0);
    }

    #[test]
    fn test_aggregate_ignores_dropped_collections() {
        let engine = Engine::in_memory().unwrap();
        for score in [100, 100, 101] {
            let temporary = engine.mirror(vec![player(9, "Temp", score)]).unwrap();
            assert_eq!(temporary.len(), 1);
        }
        let live = engine.mirror(vec![player(1, "Alice", 1)]).unwrap();

        let rows = engine.resolve("SELECT SUM(score) FROM player", []).unwrap();
        assert_eq!(rows[0].as_single().and_then(Resolved::as_i64), Some(1));
        assert_eq!(engine.row_count("player").unwrap(), 1);
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn test_directly_synced_objects_evicted_without_purge() {
        let engine = Engine::in_memory().unwrap();
        let kept = player(1, "Kept", 5);
        engine.sync(&kept, None).unwrap();
        for score in [10, 20, 30] {
            engine.sync(&player(2, "Dropped", score), None).unwrap();
        }

        let rows = engine.resolve("SELECT COUNT(*), SUM(score) FROM player", []).unwrap();
        let columns = rows[0].as_tuple().unwrap();
        assert_eq!(columns[0].as_i64(), Some(1));
        assert_eq!(columns[1].as_i64(), Some(5));
    }

    #[test]
    fn test_object_in_two_collections_survives_one() {
        let engine = Engine::in_memory().unwrap();
        let shared = player(1, "Alice", 1);
        let first = engine.mirror(vec![shared.clone()]).unwrap();
        let second = engine.mirror(vec![shared.clone()]).unwrap();
        drop(shared);

        drop(first);
        assert_eq!(second.query("name = 'Alice'").unwrap().len(), 1);

        drop(second);
        assert_eq!(engine.row_count("player").unwrap(), 0);
    }
}

mod shared_membership_tests {
    use super::*;

    #[test]
    fn test_remove_from_one_list_keeps_row_for_other() {
        let engine = Engine::in_memory().unwrap();
        let alice = player(1, "Alice", 1);
        let mut first = engine.mirror(vec![alice.clone()]).unwrap();
        let second = engine.mirror(vec![alice.clone()]).unwrap();
        assert_eq!(engine.membership_count(alice.id()), 2);

        first.remove_at(0).unwrap();
        assert_eq!(second.len(), 1);
        let found = second.query("name = 'Alice'").unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].is(&alice));

        second[0].update(|p| p.score = 2).unwrap();
        assert_eq!(second.query("score = 2").unwrap().len(), 1);
    }

    #[test]
    fn test_map_key_survives_list_mirror() {
        let engine = Engine::in_memory().unwrap();
        let alice = player(1, "Alice", 1);
        let map = engine.mirror(vec![("hero", alice.clone())]).unwrap();

        let mut list = engine.mirror(vec![alice.clone()]).unwrap();
        assert!(map.get("hero").is_some());
        let found = map.query_key("hero").unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].is(&alice));

        list.append(alice.clone()).unwrap();
        assert_eq!(map.query_key("hero").unwrap().len(), 1);
    }

    #[test]
    fn test_removing_map_entry_keeps_list_row() {
        let engine = Engine::in_memory().unwrap();
        let alice = player(1, "Alice", 1);
        let mut map = engine.mirror(vec![("hero", alice.clone())]).unwrap();
        let list = engine.mirror(vec![alice.clone()]).unwrap();

        map.remove("hero").unwrap();
        assert!(map.query_key("hero").unwrap().is_empty());
        assert!(list.query("name = 'Alice'").unwrap()[0].is(&alice));
    }

    #[test]
    fn test_self_join_of_two_lists() {
        let engine = Engine::in_memory().unwrap();
        let alice = player(1, "Alice", 10);
        let bob = player(2, "Bob", 20);
        let veterans = engine.mirror(vec![alice.clone()]).unwrap();
        let rookies = engine.mirror(vec![bob.clone()]).unwrap();

        let pairs = veterans.join_all(&rookies, "lhs.score < rhs.score").unwrap();
        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].0.is(&alice));
        assert!(pairs[0].1.is(&bob));
    }
}

mod map_tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_keyed_lookup() {
        let engine = Engine::in_memory().unwrap();
        let alice = player(1, "Alice", 10);
        let bob = player(2, "Bob", 20);
        let roster = engine
            .mirror(BTreeMap::from([
                ("captain".to_string(), alice.clone()),
                ("keeper".to_string(), bob.clone()),
            ]))
            .unwrap();

        assert!(roster.query_key("captain").unwrap()[0].is(&alice));
        assert!(roster.query("key_label = 'keeper'").unwrap()[0].is(&bob));
        assert!(roster.get("keeper").unwrap().is(&bob));

        let rows = engine
            .resolve("SELECT key_label FROM player WHERE score > 15", [])
            .unwrap();
        assert_eq!(rows[0].get(0).and_then(Resolved::as_text), Some("keeper"));
    }

    #[test]
    fn test_overwrite_key() {
        let engine = Engine::in_memory().unwrap();
        let mut roster = engine.mirror(vec![("captain", player(1, "Alice", 10))]).unwrap();
        let bob = player(2, "Bob", 20);

        roster.insert("captain", bob.clone()).unwrap();
        let found = roster.query_key("captain").unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].is(&bob));
    }
}

mod batch_tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    #[test]
    fn test_single_flush_with_final_state() {
        let engine = Engine::with_config(MirageConfig::new().with_metrics(true)).unwrap();
        let players = engine.mirror(vec![player(1, "Alice", 0)]).unwrap();

        engine
            .batched(|| {
                for _ in 0..100 {
                    players[0].update(|p| p.score += 1)?;
                }
                assert!(players.query("score = 100")?.is_empty());
                Ok(())
            })
            .unwrap();

        assert_eq!(players.query("score = 100").unwrap().len(), 1);
    }

    #[test]
    fn test_flush_on_panic() {
        let engine = Engine::in_memory().unwrap();
        let players = engine.mirror(vec![player(1, "Alice", 0)]).unwrap();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _batch = engine.batch();
            players[0].update(|p| p.score = 77).unwrap();
            if players[0].borrow().score == 77 {
                panic!("abort batch");
            }
        }));

        assert!(outcome.is_err());
        assert!(!engine.is_batching());
        assert_eq!(players.query("score = 77").unwrap().len(), 1);
    }

    #[test]
    fn test_flush_on_early_return() {
        fn bump(engine: &Engine, target: &mirage::Handle<Player>) -> mirage::Result<()> {
            let _batch = engine.batch();
            target.update(|p| p.score = 5)?;
            Err(Error::KeyNotFound("stop".to_string()))
        }

        let engine = Engine::in_memory().unwrap();
        let players = engine.mirror(vec![player(1, "Alice", 0)]).unwrap();

        assert!(bump(&engine, &players[0]).is_err());
        assert_eq!(players.query("score = 5").unwrap().len(), 1);
    }
}

mod error_tests {
    use super::*;

    struct Blank;

    impl Mirrorable for Blank {
        fn attributes(&self) -> Vec<(&'static str, Value)> {
            Vec::new()
        }
    }

    #[test]
    fn test_empty_collection() {
        let engine = Engine::in_memory().unwrap();
        let result = engine.mirror(Vec::<Live<Player>>::new());
        assert!(matches!(result, Err(Error::EmptyCollection)));
    }

    #[test]
    fn test_type_without_attributes() {
        let engine = Engine::in_memory().unwrap();
        let result = engine.mirror(vec![Live::new(Blank)]);
        assert!(matches!(result, Err(Error::Schema { ref table, .. }) if table == "blank"));
        assert!(engine.tables().is_empty());
    }

    #[test]
    fn test_malformed_predicate_passes_backend_message() {
        let engine = Engine::in_memory().unwrap();
        let players = engine.mirror(vec![player(1, "Alice", 0)]).unwrap();

        let err = players.query("score >>> 1").unwrap_err();
        match err {
            Error::Query { sql, cause } => {
                assert!(sql.contains("score >>> 1"));
                assert!(cause.contains("syntax error"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_type_mismatch_on_dynamic_append() {
        let engine = Engine::in_memory().unwrap();
        let mut players = engine.mirror(vec![player(1, "Alice", 0)]).unwrap();
        let items = engine.mirror(vec![item("Sword", 1, 1)]).unwrap();

        let err = players.append_dyn(&items[0].erase()).unwrap_err();
        assert_eq!(err.to_string(), "type mismatch: expected Player, got Item");
    }

    #[test]
    fn test_error_display() {
        let err = Error::IndexOutOfBounds { index: 3, len: 1 };
        assert_eq!(err.to_string(), "index 3 out of range for collection of length 1");

        let err = Error::OperationFailed {
            operation: "upsert".to_string(),
            cause: "disk I/O error".to_string(),
        };
        assert!(err.to_string().contains("upsert"));
        assert!(err.to_string().contains("disk I/O error"));
    }
}

mod shared_engine_tests {
    use super::*;

    #[test]
    fn test_collections_share_tables() {
        let engine = Engine::with_config(MirageConfig::new().with_table_prefix("g_")).unwrap();
        let players = engine.mirror(vec![player(1, "Alice", 0)]).unwrap();
        let items = engine.mirror(vec![item("Sword", 1, 3)]).unwrap();

        assert_eq!(players.table_name(), "g_player");
        assert_eq!(items.table_name(), "g_item");
        assert_eq!(engine.tables(), vec!["g_item", "g_player"]);

        let pairs = players.join_all(&items, "g_player.id = g_item.owner").unwrap();
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_engines_do_not_share_state() {
        let a = Engine::in_memory().unwrap();
        let b = Engine::in_memory().unwrap();
        let _players = a.mirror(vec![player(1, "Alice", 0)]).unwrap();

        assert!(matches!(
            b.resolve("SELECT * FROM player", []),
            Err(Error::Query { .. })
        ));
    }
}
