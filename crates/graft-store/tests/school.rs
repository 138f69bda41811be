//! Load, reconcile, commit and reload cycles against the in-memory store.

mod common;

use common::{class_teacher, count, node, school_model, seeded, student, student_key, T1, T2, T3};
use graft_core::{ExclusionPolicy, Identity, TypeName};
use graft_reconcile::{update_graph, PersistenceCollaborator, Reconciler};
use graft_store::{EntityState, Includes, Session, StoreError};
use serde_json::json;

fn school() -> TypeName {
    TypeName::from("School")
}

fn school_scalars() -> serde_json::Value {
    json!({"id": 1, "name": "Ankara Koleji", "type": "elementary"})
}

fn with(mut base: serde_json::Value, extra: serde_json::Value) -> serde_json::Value {
    if let (Some(base), serde_json::Value::Object(extra)) = (base.as_object_mut(), extra) {
        base.extend(extra);
    }
    base
}

fn both_classes() -> serde_json::Value {
    json!([
        {"id": 1, "level": 1, "capacity": 20},
        {"id": 2, "level": 2, "capacity": 25}
    ])
}

#[test]
fn test_load_missing_root() {
    let mut db = seeded();
    let mut session = Session::new(&mut db);
    let loaded = session
        .load(&school(), &Identity::from(99), &Includes::new())
        .unwrap();
    assert!(loaded.is_none());
}

#[test]
fn test_add_house_to_school() {
    let model = school_model();
    let mut db = seeded();
    {
        let mut session = Session::new(&mut db);
        let root = session
            .load(&school(), &Identity::from(1), &Includes::parse(["house"]))
            .unwrap();
        let incoming = node(
            &model,
            "School",
            with(school_scalars(), json!({"house": {"school_id": 1, "name": "Main"}})),
        );

        update_graph(&mut session, Some(&incoming), root).unwrap();
        let summary = session.pending().summary();
        assert_eq!(summary.inserts, 1);
        assert_eq!(summary.attaches, 1);
        assert_eq!(summary.updates, 0);

        let committed = session.commit().unwrap();
        assert_eq!(committed.inserted, 1);
    }

    let house = db.get(&"House".into(), &Identity::from(1)).unwrap();
    assert_eq!(house.fields["name"], json!("Main"));
    assert_eq!(house.linked("school"), &[Identity::from(1)]);
    assert_eq!(
        db.get(&school(), &Identity::from(1)).unwrap().linked("house"),
        &[Identity::from(1)]
    );
}

#[test]
fn test_second_reconcile_of_same_payload_inserts_nothing() {
    let model = school_model();
    let mut db = seeded();
    let incoming = node(
        &model,
        "School",
        with(school_scalars(), json!({"house": {"school_id": 1, "name": "Main"}})),
    );

    for round in 0..2 {
        let mut session = Session::new(&mut db);
        let root = session
            .load(&school(), &Identity::from(1), &Includes::parse(["house"]))
            .unwrap();
        update_graph(&mut session, Some(&incoming), root).unwrap();

        let summary = session.pending().summary();
        if round == 1 {
            assert!(summary.is_empty(), "second round staged {summary:?}");
        }
        session.commit().unwrap();
    }
    assert_eq!(count(&db, "House"), 1);
}

#[test]
fn test_update_and_remove_house() {
    let model = school_model();
    let mut db = seeded();
    db.seed(&node(&model, "House", json!({"school_id": 1, "name": "Main"})))
        .unwrap();
    {
        let mut session = Session::new(&mut db);
        let root = session
            .load(&school(), &Identity::from(1), &Includes::new())
            .unwrap()
            .unwrap();
        // Link the house through the session so the relation is loaded.
        let house = session
            .load(&"House".into(), &Identity::from(1), &Includes::new())
            .unwrap()
            .unwrap();
        session.assign_reference(root, "house", Some(house)).unwrap();
        session.commit().unwrap();
    }

    {
        let mut session = Session::new(&mut db);
        let root = session
            .load(&school(), &Identity::from(1), &Includes::parse(["house"]))
            .unwrap();
        let incoming = node(
            &model,
            "School",
            with(school_scalars(), json!({"house": {"school_id": 1, "name": "Renovated"}})),
        );
        update_graph(&mut session, Some(&incoming), root).unwrap();

        let summary = session.pending().summary();
        assert_eq!(summary.updates, 1);
        assert_eq!(summary.inserts + summary.deletes, 0);
        session.commit().unwrap();
    }
    let house = db.get(&"House".into(), &Identity::from(1)).unwrap();
    assert_eq!(house.fields["name"], json!("Renovated"));

    {
        let mut session = Session::new(&mut db);
        let root = session
            .load(&school(), &Identity::from(1), &Includes::parse(["house"]))
            .unwrap();
        let incoming = node(&model, "School", with(school_scalars(), json!({"house": null})));
        update_graph(&mut session, Some(&incoming), root).unwrap();
        assert_eq!(session.pending().summary().deletes, 1);

        let committed = session.commit().unwrap();
        assert_eq!(committed.deleted, 1);
    }
    assert_eq!(count(&db, "House"), 0);
    assert!(db
        .get(&school(), &Identity::from(1))
        .unwrap()
        .linked("house")
        .is_empty());
}

#[test]
fn test_unloaded_teachers_survive_class_update() {
    let model = school_model();
    let mut db = seeded();
    {
        let mut session = Session::new(&mut db);
        let root = session
            .load(&school(), &Identity::from(1), &Includes::parse(["classes"]))
            .unwrap();
        let incoming = node(
            &model,
            "School",
            with(
                school_scalars(),
                json!({"classes": [
                    {"id": 1, "level": 1, "capacity": 30, "class_teachers": []},
                    {"id": 2, "level": 2, "capacity": 25}
                ]}),
            ),
        );
        update_graph(&mut session, Some(&incoming), root).unwrap();
        let committed = session.commit().unwrap();
        assert_eq!(committed.updated, 1);
        assert_eq!(committed.deleted, 0);
    }

    let class = db.get(&"Class".into(), &Identity::from(1)).unwrap();
    assert_eq!(class.fields["capacity"], json!(30));
    assert_eq!(class.linked("class_teachers").len(), 2);
    assert_eq!(count(&db, "ClassTeacher"), 3);
}

#[test]
fn test_replace_composite_key_collection() {
    let model = school_model();
    let mut db = seeded();
    {
        let mut session = Session::new(&mut db);
        let root = session
            .load(
                &school(),
                &Identity::from(1),
                &Includes::parse(["classes.class_teachers"]),
            )
            .unwrap();
        let incoming = node(
            &model,
            "School",
            with(
                school_scalars(),
                json!({"classes": [
                    {
                        "id": 1, "level": 1, "capacity": 20,
                        "class_teachers": [
                            {"class_id": 1, "teacher_id": T1.to_uppercase()},
                            {"class_id": 1, "teacher_id": T3}
                        ]
                    },
                    {"id": 2, "level": 2, "capacity": 25}
                ]}),
            ),
        );
        update_graph(&mut session, Some(&incoming), root).unwrap();

        let summary = session.pending().summary();
        assert_eq!(summary.inserts, 1);
        assert_eq!(summary.deletes, 1);
        assert_eq!(summary.updates, 0);
        session.commit().unwrap();
    }

    let class_teachers: TypeName = "ClassTeacher".into();
    assert!(db.contains(&class_teachers, &class_teacher(1, T1)));
    assert!(db.contains(&class_teachers, &class_teacher(1, T3)));
    assert!(!db.contains(&class_teachers, &class_teacher(1, T2)));
    assert!(db.contains(&class_teachers, &class_teacher(2, T2)));
    assert_eq!(
        db.get(&"Class".into(), &Identity::from(1))
            .unwrap()
            .linked("class_teachers")
            .len(),
        2
    );
    assert_eq!(count(&db, "Teacher"), 3);
}

#[test]
fn test_removed_class_cascades() {
    let model = school_model();
    let mut db = seeded();
    {
        let mut session = Session::new(&mut db);
        let root = session
            .load(&school(), &Identity::from(1), &Includes::parse(["classes"]))
            .unwrap();
        let incoming = node(
            &model,
            "School",
            with(
                school_scalars(),
                json!({"classes": [{"id": 2, "level": 2, "capacity": 25}]}),
            ),
        );
        update_graph(&mut session, Some(&incoming), root).unwrap();
        let committed = session.commit().unwrap();
        // The class, its two teachers and its two students.
        assert_eq!(committed.deleted, 5);
    }

    assert_eq!(count(&db, "Class"), 1);
    assert_eq!(count(&db, "Student"), 1);
    assert_eq!(count(&db, "ClassTeacher"), 1);
    assert_eq!(count(&db, "Club"), 1);
    let (_, chess) = db.rows(&"Club".into()).next().unwrap();
    assert!(chess.linked("members").is_empty());
}

#[test]
fn test_many_to_many_detach_keeps_far_side() {
    let model = school_model();
    let mut db = seeded();
    let ali = student(&db, "Ali");
    {
        let mut session = Session::new(&mut db);
        let root = session
            .load(&"Student".into(), &ali, &Includes::parse(["clubs"]))
            .unwrap();
        let incoming = node(
            &model,
            "Student",
            json!({"id": student_key(session.database(), "Ali"), "name": "Ali", "clubs": []}),
        );
        update_graph(&mut session, Some(&incoming), root).unwrap();

        let summary = session.pending().summary();
        assert_eq!(summary.detaches, 1);
        assert_eq!(summary.deletes, 0);
        session.commit().unwrap();
    }

    assert_eq!(count(&db, "Club"), 1);
    assert!(db
        .get(&"Student".into(), &ali)
        .unwrap()
        .linked("clubs")
        .is_empty());
    let (_, chess) = db.rows(&"Club".into()).next().unwrap();
    assert!(chess.linked("members").is_empty());
}

#[test]
fn test_new_student_gets_generated_uuid() {
    let model = school_model();
    let mut db = seeded();
    let can = student_key(&db, "Can");
    {
        let mut session = Session::new(&mut db);
        let root = session
            .load(
                &school(),
                &Identity::from(1),
                &Includes::parse(["classes.students"]),
            )
            .unwrap();
        let incoming = node(
            &model,
            "School",
            with(
                school_scalars(),
                json!({"classes": [
                    {"id": 1, "level": 1, "capacity": 20},
                    {
                        "id": 2, "level": 2, "capacity": 25,
                        "students": [{"id": can, "name": "Can"}, {"name": "Deniz"}]
                    }
                ]}),
            ),
        );
        update_graph(&mut session, Some(&incoming), root).unwrap();
        session.commit().unwrap();
    }

    assert_eq!(count(&db, "Student"), 4);
    let deniz = student(&db, "Deniz");
    assert!(matches!(deniz.values(), [graft_core::KeyValue::Uuid(_)]));

    let mut session = Session::new(&mut db);
    let class = session
        .load(&"Class".into(), &Identity::from(2), &Includes::parse(["students"]))
        .unwrap()
        .unwrap();
    let snapshot = session.snapshot(class).unwrap();
    assert_eq!(snapshot["students"].as_array().unwrap().len(), 2);
}

#[test]
fn test_laboratory_added_through_nested_singular() {
    let model = school_model();
    let mut db = seeded();
    {
        let mut session = Session::new(&mut db);
        let root = session
            .load(
                &school(),
                &Identity::from(1),
                &Includes::parse(["classes.laboratory"]),
            )
            .unwrap();
        let incoming = node(
            &model,
            "School",
            with(
                school_scalars(),
                json!({"classes": [
                    {
                        "id": 1, "level": 1, "capacity": 20,
                        "laboratory": {"class_id": 1, "name": "Physics"}
                    },
                    {"id": 2, "level": 2, "capacity": 25, "laboratory": null}
                ]}),
            ),
        );
        update_graph(&mut session, Some(&incoming), root).unwrap();
        session.commit().unwrap();
    }

    let lab = db
        .get(&"ClassLaboratory".into(), &Identity::from(1))
        .unwrap();
    assert_eq!(lab.fields["name"], json!("Physics"));
    assert_eq!(lab.linked("class"), &[Identity::from(1)]);
    assert_eq!(count(&db, "ClassLaboratory"), 1);
}

#[test]
fn test_back_edge_is_not_walked() {
    let model = school_model();
    for policy in [ExclusionPolicy::RelationPath, ExclusionPolicy::ParentType] {
        let mut db = seeded();
        {
            let mut session = Session::new(&mut db);
            let root = session
                .load(
                    &school(),
                    &Identity::from(1),
                    &Includes::parse(["classes.school"]),
                )
                .unwrap();
            let incoming = node(
                &model,
                "School",
                with(
                    school_scalars(),
                    json!({"classes": [
                        {"id": 1, "level": 1, "capacity": 20, "school": null},
                        {"id": 2, "level": 2, "capacity": 25, "school": null}
                    ]}),
                ),
            );
            let mut reconciler = Reconciler::new(policy);
            reconciler
                .reconcile(&mut session, Some(&incoming), root)
                .unwrap();
            assert_eq!(reconciler.stats().excluded_relations, 2);
            assert!(session.pending().is_empty());
            session.commit().unwrap();
        }
        assert_eq!(count(&db, "School"), 1);
        assert_eq!(
            db.get(&"Class".into(), &Identity::from(1))
                .unwrap()
                .linked("school"),
            &[Identity::from(1)]
        );
    }
}

#[test]
fn test_tracked_detached_graph_as_stored_side() {
    let model = school_model();
    let mut db = seeded();
    {
        let mut session = Session::new(&mut db);
        let stored = session
            .track(&node(
                &model,
                "School",
                with(school_scalars(), json!({"house": null})),
            ))
            .unwrap();
        assert_eq!(session.state(stored).unwrap(), EntityState::Unchanged);
        assert!(session.is_loaded(stored, "house").unwrap());
        assert!(!session.is_loaded(stored, "classes").unwrap());

        let incoming = node(
            &model,
            "School",
            with(
                school_scalars(),
                json!({"house": {"school_id": 1, "name": "Main"}, "classes": []}),
            ),
        );
        update_graph(&mut session, Some(&incoming), Some(stored)).unwrap();
        session.commit().unwrap();
    }
    assert_eq!(count(&db, "House"), 1);
    assert_eq!(count(&db, "Class"), 2);
}

#[test]
fn test_track_rejects_already_tracked_row() {
    let model = school_model();
    let mut db = seeded();
    let mut session = Session::new(&mut db);
    session
        .load(&school(), &Identity::from(1), &Includes::new())
        .unwrap();
    let err = session
        .track(&node(&model, "School", school_scalars()))
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyTracked { .. }));
}

#[test]
fn test_failed_commit_leaves_database_untouched() {
    let model = school_model();
    let mut db = seeded();
    db.seed(&node(&model, "House", json!({"school_id": 1, "name": "Main"})))
        .unwrap();
    let rows_before = db.total_rows();
    {
        let mut session = Session::new(&mut db);
        session
            .stage_insert(&node(&model, "House", json!({"school_id": 1, "name": "Copy"})))
            .unwrap();
        session
            .stage_insert(&node(&model, "Club", json!({"name": "Drama"})))
            .unwrap();

        let err = session.commit().unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        assert_eq!(session.pending().summary().inserts, 2);
    }
    assert_eq!(db.total_rows(), rows_before);
    let house = db.get(&"House".into(), &Identity::from(1)).unwrap();
    assert_eq!(house.fields["name"], json!("Main"));
}

#[test]
fn test_symmetric_delete_of_root() {
    let mut db = seeded();
    {
        let mut session = Session::new(&mut db);
        let root = session
            .load(&school(), &Identity::from(1), &Includes::new())
            .unwrap();
        let result = update_graph(&mut session, None, root).unwrap();
        assert!(result.is_none());
        assert_eq!(session.pending().len(), 1);
        session.commit().unwrap();
    }
    assert_eq!(count(&db, "School"), 0);
    assert_eq!(count(&db, "Class"), 0);
    assert_eq!(count(&db, "Teacher"), 3);
}

#[test]
fn test_reconciling_a_pending_insert_again_is_idempotent() {
    let model = school_model();
    let mut db = seeded();
    let incoming = node(
        &model,
        "School",
        json!({
            "id": 7, "name": "Izmir Koleji",
            "classes": [{"id": 70, "level": 1, "capacity": 10}]
        }),
    );
    {
        let mut session = Session::new(&mut db);
        let root = update_graph(&mut session, Some(&incoming), None).unwrap();
        let before = session.pending().summary();
        assert_eq!(before.inserts, 2);

        let mut reconciler = Reconciler::default();
        let again = reconciler
            .reconcile(&mut session, Some(&incoming), root)
            .unwrap();
        assert_eq!(again, root);
        assert_eq!(reconciler.stats().inserts, 0);
        assert_eq!(reconciler.stats().deletes, 0);
        assert_eq!(reconciler.stats().collection_removes, 0);
        assert_eq!(session.pending().summary(), before);

        assert_eq!(session.commit().unwrap().inserted, 2);
    }
    assert_eq!(
        db.get(&school(), &Identity::from(7)).unwrap().linked("classes"),
        &[Identity::from(70)]
    );
}

#[test]
fn test_unkeyed_pending_insert_is_swapped_not_duplicated() {
    let model = school_model();
    let mut db = seeded();
    let incoming = node(
        &model,
        "School",
        json!({
            "name": "Izmir Koleji",
            "classes": [{"level": 1, "capacity": 10, "students": [{"name": "Ece"}]}]
        }),
    );
    {
        let mut session = Session::new(&mut db);
        let root = update_graph(&mut session, Some(&incoming), None).unwrap();
        assert_eq!(session.pending().summary().inserts, 3);

        // New nodes carry no identity, so the second pass cannot match the
        // pending class: it inserts a fresh one and withdraws the first.
        let mut reconciler = Reconciler::default();
        reconciler
            .reconcile(&mut session, Some(&incoming), root)
            .unwrap();
        assert_eq!(reconciler.stats().inserts, 1);
        assert_eq!(reconciler.stats().collection_removes, 1);

        let summary = session.pending().summary();
        assert_eq!(summary.inserts, 3);
        assert_eq!(summary.deletes, 0);
        assert_eq!(summary.updates, 0);
        assert_eq!(summary.attaches, 1);

        let committed = session.commit().unwrap();
        assert_eq!(committed.inserted, summary.inserts);
        assert_eq!(committed.deleted, 0);
    }
    assert_eq!(count(&db, "School"), 2);
    assert_eq!(count(&db, "Class"), 3);
    assert_eq!(count(&db, "Student"), 4);
}

#[test]
fn test_withdrawn_insert_drops_its_staged_records() {
    let model = school_model();
    let mut db = seeded();
    let mut session = Session::new(&mut db);
    let root = session
        .load(&school(), &Identity::from(1), &Includes::parse(["house"]))
        .unwrap();

    let with_house = node(
        &model,
        "School",
        with(school_scalars(), json!({"house": {"school_id": 1, "name": "Main"}})),
    );
    update_graph(&mut session, Some(&with_house), root).unwrap();
    assert_eq!(session.pending().summary().inserts, 1);

    let without_house = node(&model, "School", with(school_scalars(), json!({"house": null})));
    update_graph(&mut session, Some(&without_house), root).unwrap();
    assert!(session.pending().summary().is_empty());

    let committed = session.commit().unwrap();
    assert_eq!(committed.inserted, 0);
    drop(session);
    assert_eq!(count(&db, "House"), 0);
}

#[test]
fn test_nil_uuid_students_get_fresh_keys() {
    const NIL: &str = "00000000-0000-0000-0000-000000000000";
    let model = school_model();
    let mut db = seeded();
    let can = student_key(&db, "Can");
    {
        let mut session = Session::new(&mut db);
        let class = session
            .load(&"Class".into(), &Identity::from(2), &Includes::parse(["students"]))
            .unwrap();
        let incoming = node(
            &model,
            "Class",
            json!({
                "id": 2, "level": 2, "capacity": 25,
                "students": [
                    {"id": can, "name": "Can"},
                    {"id": NIL, "name": "Deniz"},
                    {"id": NIL, "name": "Efe"}
                ]
            }),
        );
        update_graph(&mut session, Some(&incoming), class).unwrap();
        assert_eq!(session.pending().summary().inserts, 2);
        assert_eq!(session.commit().unwrap().inserted, 2);
    }

    assert_eq!(count(&db, "Student"), 5);
    let deniz = student_key(&db, "Deniz");
    assert_ne!(deniz, json!(NIL));
    assert_ne!(deniz, student_key(&db, "Efe"));
}
