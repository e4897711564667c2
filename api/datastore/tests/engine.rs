//! End-to-end tests of the data manager: session editing, the two-phase
//! commit, isolation between sessions, and refresh-after-conflict behavior.

use maplit::hashset;
use std::collections::HashSet;

use datastore::{DataManager, DmSession};
use tempfile::TempDir;
use wire::{Datastore, EditFlags, ErrorCode, ValueData};

const EXAMPLE_MODULE: &str = r#"
module example-module {
    namespace "urn:example:example-module";
    prefix em;
    container container {
        list list {
            key "key1 key2";
            leaf key1 { type string; }
            leaf key2 { type string; }
            leaf leaf { type string; }
        }
    }
}
"#;

const TEST_MODULE: &str = r#"
module test-module {
    namespace "urn:example:test-module";
    prefix tm;
    container location {
        leaf name { type string; }
        leaf latitude { type string; mandatory true; }
        leaf longitude { type string; mandatory true; }
    }
    list user {
        key "name";
        ordered-by user;
        leaf name { type string; }
    }
    list list {
        key "key";
        leaf key { type string; }
        leaf data { type string; }
    }
}
"#;

struct Fixture {
    manager: DataManager,
    _dirs: (TempDir, TempDir),
}

fn fixture() -> Fixture {
    let schema_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        schema_dir.path().join("example-module.yang"),
        EXAMPLE_MODULE,
    )
    .unwrap();
    std::fs::write(schema_dir.path().join("test-module.yang"), TEST_MODULE).unwrap();

    let manager = DataManager::init(schema_dir.path(), data_dir.path()).unwrap();
    Fixture {
        manager,
        _dirs: (schema_dir, data_dir),
    }
}

fn string_value(s: &str) -> ValueData {
    ValueData::String(s.to_string())
}

#[test]
fn set_commit_get_round_trip() {
    let fx = fixture();
    let mut session = DmSession::new(Datastore::Startup);

    let path = "/example-module:container/list[key1='k1'][key2='k2']/leaf";
    fx.manager
        .set_item(
            &mut session,
            path,
            Some(&string_value("Leaf value")),
            EditFlags::default(),
        )
        .unwrap();

    let changed = fx.manager.commit(&mut session).unwrap();
    assert_eq!(changed, vec!["example-module".to_string()]);

    // The commit discarded the overlays; the read below re-forks from disk.
    let value = fx.manager.get_item(&mut session, path).unwrap();
    assert_eq!(value.data, string_value("Leaf value"));
    assert_eq!(value.path.as_deref(), Some(path));

    // A different session sees the committed data too.
    let mut other = DmSession::new(Datastore::Startup);
    let values = fx
        .manager
        .get_items(&mut other, "/example-module:*")
        .unwrap();
    assert_eq!(values.len(), 5);
}

#[test]
fn validation_gates_commit_and_leaves_files_untouched() {
    let fx = fixture();
    let mut session = DmSession::new(Datastore::Startup);

    fx.manager
        .set_item(
            &mut session,
            "/test-module:location/name",
            Some(&string_value("Banska Bystrica")),
            EditFlags::default(),
        )
        .unwrap();

    let err = fx.manager.validate(&session).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationFailed);
    let paths: HashSet<String> = err.details().iter().filter_map(|e| e.path.clone()).collect();
    assert_eq!(
        paths,
        hashset! {
            "/test-module:location/latitude".to_string(),
            "/test-module:location/longitude".to_string(),
        }
    );

    // The failed commit performs no file I/O at all.
    let file = fx.manager.data_file_path("test-module", Datastore::Startup);
    let before = std::fs::read(&file).ok();
    let err = fx.manager.commit(&mut session).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationFailed);
    assert_eq!(std::fs::read(&file).ok(), before);

    // Supplying the mandatory leaves makes it pass.
    for (leaf, value) in [("latitude", "48.73"), ("longitude", "19.15")] {
        fx.manager
            .set_item(
                &mut session,
                &format!("/test-module:location/{}", leaf),
                Some(&string_value(value)),
                EditFlags::default(),
            )
            .unwrap();
    }
    fx.manager.validate(&session).unwrap();
    fx.manager.commit(&mut session).unwrap();
}

#[test]
fn disjoint_sessions_union_after_both_commit() {
    let fx = fixture();
    let mut a = DmSession::new(Datastore::Startup);
    let mut b = DmSession::new(Datastore::Startup);

    fx.manager
        .set_item(
            &mut a,
            "/example-module:container/list[key1='a'][key2='a']/leaf",
            Some(&string_value("from a")),
            EditFlags::default(),
        )
        .unwrap();
    fx.manager
        .set_item(
            &mut b,
            "/test-module:user[name='b']",
            None,
            EditFlags::default(),
        )
        .unwrap();

    fx.manager.commit(&mut a).unwrap();
    fx.manager.commit(&mut b).unwrap();

    let mut reader = DmSession::new(Datastore::Startup);
    assert!(fx
        .manager
        .get_item(
            &mut reader,
            "/example-module:container/list[key1='a'][key2='a']/leaf"
        )
        .is_ok());
    assert!(fx
        .manager
        .get_items(&mut reader, "/test-module:user[name='b']")
        .is_ok());
}

#[test]
fn same_module_disjoint_paths_merge_on_commit() {
    let fx = fixture();
    let mut a = DmSession::new(Datastore::Startup);
    let mut b = DmSession::new(Datastore::Startup);

    fx.manager
        .set_item(
            &mut a,
            "/test-module:list[key='from-a']",
            None,
            EditFlags::default(),
        )
        .unwrap();
    fx.manager
        .set_item(
            &mut b,
            "/test-module:list[key='from-b']",
            None,
            EditFlags::default(),
        )
        .unwrap();

    fx.manager.commit(&mut a).unwrap();
    // B's base moved; its commit replays the log onto A's committed state.
    fx.manager.commit(&mut b).unwrap();

    let mut reader = DmSession::new(Datastore::Startup);
    let values = fx
        .manager
        .get_items(&mut reader, "/test-module:list")
        .unwrap();
    assert_eq!(values.len(), 2);
}

#[test]
fn refresh_conflict_keeps_nonconflicting_edits() {
    let fx = fixture();
    let mut a = DmSession::new(Datastore::Startup);
    let mut b = DmSession::new(Datastore::Startup);

    // A creates a list instance and an unrelated one.
    fx.manager
        .set_item(
            &mut a,
            "/test-module:list[key='abc']",
            None,
            EditFlags::default(),
        )
        .unwrap();
    fx.manager
        .set_item(
            &mut a,
            "/test-module:list[key='unrelated']",
            None,
            EditFlags::default(),
        )
        .unwrap();

    // B creates and commits the same instance first.
    fx.manager
        .set_item(
            &mut b,
            "/test-module:list[key='abc']",
            None,
            EditFlags::default(),
        )
        .unwrap();
    fx.manager.commit(&mut b).unwrap();

    // A's refresh reports the collision with a path-tagged error...
    let err = fx.manager.refresh_session(&mut a).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
    let details = err.details();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].path.as_deref(), Some("/test-module:list[key='abc']"));

    // ...the non-conflicting edit survives, and the subsequent commit works.
    fx.manager.commit(&mut a).unwrap();
    let mut reader = DmSession::new(Datastore::Startup);
    let values = fx
        .manager
        .get_items(&mut reader, "/test-module:list")
        .unwrap();
    assert_eq!(values.len(), 2);
}

#[test]
fn conflicting_commit_without_refresh_fails_validation() {
    let fx = fixture();
    let mut a = DmSession::new(Datastore::Startup);
    let mut b = DmSession::new(Datastore::Startup);

    fx.manager
        .set_item(
            &mut a,
            "/test-module:list[key='abc']",
            None,
            EditFlags::default(),
        )
        .unwrap();
    fx.manager
        .set_item(
            &mut b,
            "/test-module:list[key='abc']",
            None,
            EditFlags::default(),
        )
        .unwrap();

    fx.manager.commit(&mut b).unwrap();
    let err = fx.manager.commit(&mut a).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationFailed);
}

#[test]
fn user_ordered_moves_survive_commit() {
    let fx = fixture();
    let mut session = DmSession::new(Datastore::Startup);

    for name in ["A", "B", "C"] {
        fx.manager
            .set_item(
                &mut session,
                &format!("/test-module:user[name='{}']", name),
                None,
                EditFlags::default(),
            )
            .unwrap();
    }
    fx.manager
        .move_item(
            &mut session,
            "/test-module:user[name='A']",
            wire::MoveDirection::Down,
        )
        .unwrap();
    fx.manager
        .move_item(
            &mut session,
            "/test-module:user[name='C']",
            wire::MoveDirection::Up,
        )
        .unwrap();
    fx.manager.commit(&mut session).unwrap();

    let mut reader = DmSession::new(Datastore::Startup);
    let values = fx
        .manager
        .get_items(&mut reader, "/test-module:user")
        .unwrap();
    let order: Vec<&str> = values
        .iter()
        .filter_map(|v| v.path.as_deref())
        .collect();
    assert_eq!(
        order,
        vec![
            "/test-module:user[name='B']",
            "/test-module:user[name='C']",
            "/test-module:user[name='A']",
        ]
    );
}

#[test]
fn unknown_module_and_element_errors() {
    let fx = fixture();
    let mut session = DmSession::new(Datastore::Startup);

    let err = fx
        .manager
        .get_item(&mut session, "/unknown-model:abc")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownModel);

    let err = fx
        .manager
        .get_item(&mut session, "/example-module:unknown/next")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadElement);
    assert_eq!(
        err.details()[0].path.as_deref(),
        Some("/example-module:unknown")
    );
}

#[test]
fn discard_drops_edits() {
    let fx = fixture();
    let mut session = DmSession::new(Datastore::Startup);
    fx.manager
        .set_item(
            &mut session,
            "/test-module:user[name='gone']",
            None,
            EditFlags::default(),
        )
        .unwrap();
    fx.manager.discard_changes(&mut session);

    assert!(session.op_log().is_empty());
    let err = fx
        .manager
        .get_items(&mut session, "/test-module:user")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    // Committing after discard is a no-op.
    assert!(fx.manager.commit(&mut session).unwrap().is_empty());
}

#[test]
fn candidate_is_seeded_from_running() {
    let fx = fixture();

    // Commit something to running first.
    let mut running = DmSession::new(Datastore::Running);
    fx.manager
        .set_item(
            &mut running,
            "/test-module:user[name='seed']",
            None,
            EditFlags::default(),
        )
        .unwrap();
    fx.manager.commit(&mut running).unwrap();

    // A candidate session is seeded from running until its first commit.
    let mut candidate = DmSession::new(Datastore::Candidate);
    let values = fx
        .manager
        .get_items(&mut candidate, "/test-module:user")
        .unwrap();
    assert_eq!(values.len(), 1);

    // Editing and committing the candidate leaves running untouched.
    fx.manager
        .set_item(
            &mut candidate,
            "/test-module:user[name='draft']",
            None,
            EditFlags::default(),
        )
        .unwrap();
    fx.manager.commit(&mut candidate).unwrap();

    let mut running_reader = DmSession::new(Datastore::Running);
    let running_values = fx
        .manager
        .get_items(&mut running_reader, "/test-module:user")
        .unwrap();
    assert_eq!(running_values.len(), 1);

    let mut candidate_reader = DmSession::new(Datastore::Candidate);
    let candidate_values = fx
        .manager
        .get_items(&mut candidate_reader, "/test-module:user")
        .unwrap();
    assert_eq!(candidate_values.len(), 2);
}

#[test]
fn get_items_chunking() {
    let fx = fixture();
    let mut session = DmSession::new(Datastore::Startup);
    for name in ["a", "b", "c", "d"] {
        fx.manager
            .set_item(
                &mut session,
                &format!("/test-module:user[name='{}']", name),
                None,
                EditFlags::default(),
            )
            .unwrap();
    }

    // 4 instances, each with a key leaf: 8 nodes total under the wildcard.
    let all = fx
        .manager
        .get_items(&mut session, "/test-module:*")
        .unwrap();
    assert_eq!(all.len(), 8);

    let chunk = fx
        .manager
        .get_items_chunk(&mut session, "/test-module:*", 2, 3)
        .unwrap();
    assert_eq!(chunk.as_slice(), &all[2..5]);

    let tail = fx
        .manager
        .get_items_chunk(&mut session, "/test-module:*", 6, 10)
        .unwrap();
    assert_eq!(tail.as_slice(), &all[6..]);
}
