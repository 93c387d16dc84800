//! REST objects surviving the trip through storage: every atom kind, the
//! query operators, update operators and deletion.

mod common;

use common::{pointer, EngineFixture};
use plinth::{FindOptions, PlinthError, UpdateOptions, WriteOptions};
use serde_json::json;

#[test]
fn every_atom_kind_round_trips() {
    let fixture = EngineFixture::new().unwrap();
    let db = &fixture.db;
    let object = json!({
        "title": "all kinds",
        "score": 12.5,
        "done": true,
        "when": {"__type": "Date", "iso": "2020-05-17T09:30:00.000Z"},
        "author": pointer("Writer", "w1"),
        "place": {"__type": "GeoPoint", "latitude": 40.7, "longitude": -74.0},
        "cover": {"__type": "File", "name": "cover.png", "url": "https://files.example/cover.png"},
        "raw": {"__type": "Bytes", "base64": "aGVsbG8="},
        "tags": ["a", "b", "c"],
        "meta": {"draft": {"rev": 3}}
    });
    let created = db
        .create("Diary", &object, &WriteOptions::default())
        .unwrap();
    let fetched = db
        .get(
            "Diary",
            created["objectId"].as_str().unwrap(),
            &FindOptions::default(),
        )
        .unwrap();
    for key in [
        "title", "score", "done", "when", "author", "place", "cover", "raw", "tags", "meta",
    ] {
        assert_eq!(fetched[key], object[key], "field {} did not round trip", key);
    }
}

#[test]
fn server_timestamps_override_client_values() {
    let fixture = EngineFixture::new().unwrap();
    let db = &fixture.db;
    let created = db
        .create(
            "Diary",
            &json!({"title": "x", "createdAt": "1999-01-01T00:00:00.000Z"}),
            &WriteOptions::default(),
        )
        .unwrap();
    let stamp = created["createdAt"].as_str().unwrap();
    assert_ne!(stamp, "1999-01-01T00:00:00.000Z");
    assert!(stamp.starts_with("20"), "not an ISO timestamp: {}", stamp);
    assert_eq!(created["createdAt"], created["updatedAt"]);

    let fetched = db
        .get(
            "Diary",
            created["objectId"].as_str().unwrap(),
            &FindOptions::default(),
        )
        .unwrap();
    assert_eq!(fetched["createdAt"], created["createdAt"]);
}

#[test]
fn comparison_and_set_operators_match() {
    let fixture = EngineFixture::new().unwrap();
    let db = &fixture.db;
    for (title, score) in [("a", 1), ("b", 2), ("c", 3), ("d", 4), ("e", 5)] {
        db.create(
            "Diary",
            &json!({ "title": title, "score": score }),
            &WriteOptions::default(),
        )
        .unwrap();
    }
    let options = FindOptions::default();
    assert_eq!(
        db.find("Diary", &json!({"score": {"$gt": 2}}), &options)
            .unwrap()
            .len(),
        3
    );
    assert_eq!(
        db.find("Diary", &json!({"score": {"$gte": 2, "$lt": 4}}), &options)
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        db.find("Diary", &json!({"score": {"$in": [1, 4]}}), &options)
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        db.find("Diary", &json!({"score": {"$ne": 3}}), &options)
            .unwrap()
            .len(),
        4
    );
    assert_eq!(
        db.find(
            "Diary",
            &json!({"$or": [{"score": 1}, {"title": "e"}]}),
            &options
        )
        .unwrap()
        .len(),
        2
    );
    assert_eq!(
        db.find("Diary", &json!({"title": {"$regex": "^[ab]$"}}), &options)
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        db.find("Diary", &json!({"mood": {"$exists": false}}), &options)
            .unwrap()
            .len(),
        5
    );
    assert_eq!(db.count("Diary", &json!({"score": {"$lte": 2}}), &options).unwrap(), 2);
}

#[test]
fn update_operators_flow_through() {
    let fixture = EngineFixture::new().unwrap();
    let db = &fixture.db;
    let created = db
        .create(
            "Diary",
            &json!({"score": 1, "tags": ["a"]}),
            &WriteOptions::default(),
        )
        .unwrap();
    let id = created["objectId"].as_str().unwrap();

    let response = db
        .update(
            "Diary",
            &json!({ "objectId": id }),
            &json!({
                "score": {"__op": "Increment", "amount": 2},
                "tags": {"__op": "AddUnique", "objects": ["a", "b"]},
                "mood": "bright"
            }),
            &UpdateOptions::default(),
        )
        .unwrap();
    assert_eq!(response, json!({"score": 3}));

    let fetched = db.get("Diary", id, &FindOptions::default()).unwrap();
    assert_eq!(fetched["tags"], json!(["a", "b"]));
    assert_eq!(fetched["mood"], json!("bright"));

    db.update(
        "Diary",
        &json!({ "objectId": id }),
        &json!({
            "tags": {"__op": "Remove", "objects": ["a"]},
            "mood": {"__op": "Delete"}
        }),
        &UpdateOptions::default(),
    )
    .unwrap();
    let fetched = db.get("Diary", id, &FindOptions::default()).unwrap();
    assert_eq!(fetched["tags"], json!(["b"]));
    assert!(fetched.get("mood").is_none());
}

#[test]
fn immutable_keys_reject_updates() {
    let fixture = EngineFixture::new().unwrap();
    let db = &fixture.db;
    let created = db
        .create("Diary", &json!({"title": "x"}), &WriteOptions::default())
        .unwrap();
    let id = created["objectId"].as_str().unwrap();
    for key in ["objectId", "createdAt"] {
        let err = db
            .update(
                "Diary",
                &json!({ "objectId": id }),
                &json!({ key: "forged" }),
                &UpdateOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, PlinthError::InvalidKeyName(_)), "key {}", key);
    }
}

#[test]
fn acl_is_not_queryable() {
    let fixture = EngineFixture::new().unwrap();
    let err = fixture
        .db
        .find(
            "Diary",
            &json!({"ACL": {"$exists": true}}),
            &FindOptions::default(),
        )
        .unwrap_err();
    match err {
        PlinthError::InvalidKeyName(message) => {
            assert!(message.contains("Cannot query on ACL"), "got: {}", message)
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn destroy_removes_matches_and_reports_misses() {
    let fixture = EngineFixture::new().unwrap();
    let db = &fixture.db;
    for title in ["a", "b"] {
        db.create("Diary", &json!({ "title": title }), &WriteOptions::default())
            .unwrap();
    }
    assert_eq!(
        db.destroy("Diary", &json!({}), &WriteOptions::default())
            .unwrap(),
        2
    );
    assert!(matches!(
        db.destroy("Diary", &json!({}), &WriteOptions::default()),
        Err(PlinthError::ObjectNotFound(_))
    ));
    assert!(matches!(
        db.get("Diary", "gone", &FindOptions::default()),
        Err(PlinthError::ObjectNotFound(_))
    ));
}

#[test]
fn queries_compare_dates_chronologically() {
    let fixture = EngineFixture::new().unwrap();
    let db = &fixture.db;
    for iso in [
        "2020-01-01T00:00:00.000Z",
        "2021-06-15T12:00:00.000Z",
        "2022-12-31T23:59:59.000Z",
    ] {
        db.create(
            "Diary",
            &json!({"when": {"__type": "Date", "iso": iso}}),
            &WriteOptions::default(),
        )
        .unwrap();
    }
    let hits = db
        .find(
            "Diary",
            &json!({"when": {"$gt": {"__type": "Date", "iso": "2021-01-01T00:00:00.000Z"}}}),
            &FindOptions::default(),
        )
        .unwrap();
    assert_eq!(hits.len(), 2);
}
