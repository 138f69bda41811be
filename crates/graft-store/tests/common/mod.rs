//! School fixture shared by the store integration tests.

#![allow(dead_code)]

use graft_core::config::StoreConfig;
use graft_core::{
    DetachedNode, EntityType, Identity, KeyKind, KeyValue, Model, OnRemove, RelationDescriptor,
    TypeName,
};
use graft_store::Database;
use serde_json::json;
use uuid::Uuid;

pub const T1: &str = "ec13122e-3ec5-4698-b254-e660d01f37ca";
pub const T2: &str = "7ab15219-5ffa-406c-b092-94636b413e05";
pub const T3: &str = "6d83b2b3-f28e-4d2d-8671-93f8e6ab08c1";

pub fn school_model() -> Model {
    Model::new(vec![
        EntityType::new("School")
            .generated_key("id", KeyKind::Int)
            .field("name")
            .field("type")
            .relation(
                RelationDescriptor::many("classes", "Class")
                    .inverse("school")
                    .on_remove(OnRemove::Delete),
            )
            .relation(
                RelationDescriptor::one("house", "House")
                    .inverse("school")
                    .on_remove(OnRemove::Delete),
            ),
        EntityType::new("House")
            .key("school_id", KeyKind::Int)
            .field("name")
            .relation(RelationDescriptor::one("school", "School").inverse("house")),
        EntityType::new("Class")
            .generated_key("id", KeyKind::Int)
            .field("level")
            .field("capacity")
            .relation(RelationDescriptor::one("school", "School").inverse("classes"))
            .relation(
                RelationDescriptor::one("laboratory", "ClassLaboratory")
                    .inverse("class")
                    .on_remove(OnRemove::Delete),
            )
            .relation(
                RelationDescriptor::many("class_teachers", "ClassTeacher")
                    .inverse("class")
                    .on_remove(OnRemove::Delete),
            )
            .relation(
                RelationDescriptor::many("students", "Student")
                    .inverse("class")
                    .on_remove(OnRemove::Delete),
            ),
        EntityType::new("ClassLaboratory")
            .key("class_id", KeyKind::Int)
            .field("name")
            .relation(RelationDescriptor::one("class", "Class").inverse("laboratory")),
        EntityType::new("ClassTeacher")
            .key("class_id", KeyKind::Int)
            .key("teacher_id", KeyKind::Uuid)
            .relation(RelationDescriptor::one("class", "Class").inverse("class_teachers")),
        EntityType::new("Teacher")
            .key("id", KeyKind::Uuid)
            .field("name"),
        EntityType::new("Student")
            .generated_key("id", KeyKind::Uuid)
            .field("name")
            .relation(RelationDescriptor::one("class", "Class").inverse("students"))
            .relation(RelationDescriptor::many("clubs", "Club").inverse("members")),
        EntityType::new("Club")
            .generated_key("id", KeyKind::Int)
            .field("name")
            .relation(RelationDescriptor::many("members", "Student").inverse("clubs")),
    ])
    .unwrap()
}

pub fn node(model: &Model, type_name: &str, value: serde_json::Value) -> DetachedNode {
    DetachedNode::from_json(model, &TypeName::from(type_name), &value).unwrap()
}

/// School 1 with classes 1 and 2. Class 1 has teachers T1 and T2 and
/// students Ali (a member of club Chess) and Ayse; class 2 has teacher T2 and
/// student Can. Teachers T1, T2 and T3 exist on their own.
pub fn seeded() -> Database {
    let model = school_model();
    let mut db = Database::new(model.clone(), &StoreConfig::default());

    for (id, name) in [(T1, "Hasan"), (T2, "Elif"), (T3, "Murat")] {
        db.seed(&node(&model, "Teacher", json!({"id": id, "name": name})))
            .unwrap();
    }

    let school = node(
        &model,
        "School",
        json!({
            "name": "Ankara Koleji",
            "type": "elementary",
            "classes": [
                {
                    "id": 1, "level": 1, "capacity": 20,
                    "class_teachers": [
                        {"class_id": 1, "teacher_id": T1},
                        {"class_id": 1, "teacher_id": T2}
                    ],
                    "students": [
                        {"name": "Ali", "clubs": [{"name": "Chess"}]},
                        {"name": "Ayse"}
                    ]
                },
                {
                    "id": 2, "level": 2, "capacity": 25,
                    "class_teachers": [{"class_id": 2, "teacher_id": T2}],
                    "students": [{"name": "Can"}]
                }
            ]
        }),
    );
    db.seed(&school).unwrap();
    db
}

pub fn count(db: &Database, type_name: &str) -> usize {
    db.count(&TypeName::from(type_name))
}

pub fn class_teacher(class_id: i64, teacher: &str) -> Identity {
    Identity::new(vec![
        KeyValue::Int(class_id),
        KeyValue::Uuid(Uuid::parse_str(teacher).unwrap()),
    ])
}

/// Identity of the student with the given name.
pub fn student(db: &Database, name: &str) -> Identity {
    db.rows(&TypeName::from("Student"))
        .find(|(_, row)| row.fields.get("name") == Some(&json!(name)))
        .map(|(id, _)| id.clone())
        .unwrap()
}

/// The `id` field of a student as it appears in payloads.
pub fn student_key(db: &Database, name: &str) -> serde_json::Value {
    let id = student(db, name);
    db.get(&TypeName::from("Student"), &id).unwrap().fields["id"].clone()
}
