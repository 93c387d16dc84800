//! Class-level permissions, record ACLs and pointer-permission exemptions
//! as seen from the public surface.

mod common;

use common::{find_as, pointer, update_as, write_as, EngineFixture};
use plinth::{PlinthError, WriteOptions};
use serde_json::json;

const READER: &str = "aaaaaaaaaaaaaaaaaaaaaaaa";
const EDITOR: &str = "bbbbbbbbbbbbbbbbbbbbbbbb";

#[test]
fn role_grants_gate_finds() {
    let fixture = EngineFixture::new().unwrap();
    let db = &fixture.db;
    db.schema()
        .add_class_if_not_exists("Diary", &json!({}), Some(&json!({"find": {"role:admin": true}})))
        .unwrap();
    db.create("Diary", &json!({"title": "x"}), &WriteOptions::default())
        .unwrap();

    assert!(matches!(
        db.find("Diary", &json!({}), &find_as(&[READER])),
        Err(PlinthError::OperationForbidden(_))
    ));
    assert!(matches!(
        db.find("Diary", &json!({}), &find_as(&[])),
        Err(PlinthError::OperationForbidden(_))
    ));
    let hits = db
        .find("Diary", &json!({}), &find_as(&[READER, "role:admin"]))
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn requires_authentication_admits_any_user() {
    let fixture = EngineFixture::new().unwrap();
    let db = &fixture.db;
    db.schema()
        .add_class_if_not_exists(
            "Diary",
            &json!({}),
            Some(&json!({"find": {"requiresAuthentication": true}})),
        )
        .unwrap();
    db.create("Diary", &json!({"title": "x"}), &WriteOptions::default())
        .unwrap();

    assert!(matches!(
        db.find("Diary", &json!({}), &find_as(&[])),
        Err(PlinthError::OperationForbidden(_))
    ));
    assert_eq!(db.find("Diary", &json!({}), &find_as(&[READER])).unwrap().len(), 1);
}

#[test]
fn create_permission_gates_writes() {
    let fixture = EngineFixture::new().unwrap();
    let db = &fixture.db;
    db.schema()
        .add_class_if_not_exists(
            "Diary",
            &json!({"title": {"type": "String"}}),
            Some(&json!({"create": {}})),
        )
        .unwrap();

    assert!(matches!(
        db.create("Diary", &json!({"title": "x"}), &write_as(&[READER])),
        Err(PlinthError::OperationForbidden(_))
    ));
    db.create("Diary", &json!({"title": "x"}), &WriteOptions::default())
        .unwrap();
}

#[test]
fn add_field_permission_gates_unseen_fields() {
    let fixture = EngineFixture::new().unwrap();
    let db = &fixture.db;
    db.schema()
        .add_class_if_not_exists(
            "Diary",
            &json!({"title": {"type": "String"}}),
            Some(&json!({"addField": {}})),
        )
        .unwrap();

    db.create("Diary", &json!({"title": "known"}), &write_as(&[READER]))
        .unwrap();
    assert!(matches!(
        db.create("Diary", &json!({"surprise": 1}), &write_as(&[READER])),
        Err(PlinthError::OperationForbidden(_))
    ));
    // Elevated writes still extend the schema.
    db.create("Diary", &json!({"surprise": 1}), &WriteOptions::default())
        .unwrap();
}

#[test]
fn record_acls_scope_reads_and_writes() {
    let fixture = EngineFixture::new().unwrap();
    let db = &fixture.db;
    let created = db
        .create(
            "Diary",
            &json!({
                "title": "guarded",
                "ACL": {
                    READER: {"read": true},
                    EDITOR: {"read": true, "write": true}
                }
            }),
            &WriteOptions::default(),
        )
        .unwrap();
    let id = created["objectId"].as_str().unwrap();
    let by_id = json!({ "objectId": id });

    assert!(db.find("Diary", &by_id, &find_as(&[])).unwrap().is_empty());
    assert!(matches!(
        db.get("Diary", id, &find_as(&[])),
        Err(PlinthError::ObjectNotFound(_))
    ));
    assert_eq!(db.find("Diary", &by_id, &find_as(&[READER])).unwrap().len(), 1);

    assert!(matches!(
        db.update("Diary", &by_id, &json!({"title": "stolen"}), &update_as(&[READER])),
        Err(PlinthError::ObjectNotFound(_))
    ));
    db.update("Diary", &by_id, &json!({"title": "edited"}), &update_as(&[EDITOR]))
        .unwrap();

    assert!(matches!(
        db.destroy("Diary", &by_id, &write_as(&[READER])),
        Err(PlinthError::ObjectNotFound(_))
    ));
    assert_eq!(db.destroy("Diary", &by_id, &write_as(&[EDITOR])).unwrap(), 1);
}

#[test]
fn public_read_acls_admit_everyone() {
    let fixture = EngineFixture::new().unwrap();
    let db = &fixture.db;
    db.create(
        "Diary",
        &json!({"title": "posted", "ACL": {"*": {"read": true}, EDITOR: {"write": true}}}),
        &WriteOptions::default(),
    )
    .unwrap();

    assert_eq!(db.find("Diary", &json!({}), &find_as(&[])).unwrap().len(), 1);
    assert!(matches!(
        db.destroy("Diary", &json!({}), &write_as(&[READER])),
        Err(PlinthError::ObjectNotFound(_))
    ));
    assert_eq!(db.destroy("Diary", &json!({}), &write_as(&[EDITOR])).unwrap(), 1);
}

#[test]
fn pointer_permissions_scope_reads_and_writes() {
    let fixture = EngineFixture::new().unwrap();
    let db = &fixture.db;
    db.schema()
        .add_class_if_not_exists(
            "Diary",
            &json!({"owner": {"type": "Pointer", "targetClass": "_User"}}),
            Some(&json!({
                "find": {},
                "update": {},
                "readUserFields": ["owner"],
                "writeUserFields": ["owner"]
            })),
        )
        .unwrap();
    db.create(
        "Diary",
        &json!({"title": "mine", "owner": pointer("_User", READER)}),
        &WriteOptions::default(),
    )
    .unwrap();
    db.create(
        "Diary",
        &json!({"title": "theirs", "owner": pointer("_User", EDITOR)}),
        &WriteOptions::default(),
    )
    .unwrap();

    let mine = db.find("Diary", &json!({}), &find_as(&[READER])).unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["title"], json!("mine"));
    assert!(db.find("Diary", &json!({}), &find_as(&[])).unwrap().is_empty());

    // Writes reach owned records only.
    assert!(matches!(
        db.update(
            "Diary",
            &json!({"title": "theirs"}),
            &json!({"title": "grabbed"}),
            &update_as(&[READER]),
        ),
        Err(PlinthError::ObjectNotFound(_))
    ));
    db.update(
        "Diary",
        &json!({"title": "mine"}),
        &json!({"title": "relabeled"}),
        &update_as(&[READER]),
    )
    .unwrap();
}

#[test]
fn invalid_grantees_are_rejected() {
    let fixture = EngineFixture::new().unwrap();
    let err = fixture
        .db
        .schema()
        .add_class_if_not_exists(
            "Diary",
            &json!({}),
            Some(&json!({"find": {"not a grantee": true}})),
        )
        .unwrap_err();
    match err {
        PlinthError::IncorrectType(message) => {
            assert!(message.contains("grantee"), "got: {}", message)
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn pointer_permission_columns_must_target_users() {
    let fixture = EngineFixture::new().unwrap();
    let err = fixture
        .db
        .schema()
        .add_class_if_not_exists(
            "Diary",
            &json!({"title": {"type": "String"}}),
            Some(&json!({"readUserFields": ["title"]})),
        )
        .unwrap_err();
    assert!(matches!(err, PlinthError::IncorrectType(_)));
}
