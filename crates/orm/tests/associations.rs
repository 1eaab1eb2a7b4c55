mod common;

use common::{db, Child, Owner};
use relmap::testing::MockRow;
use relmap::{Model, SchemaBuilder, Value};

#[derive(Debug, Clone, Default, PartialEq)]
struct Language {
    id: i64,
    name: String,
}

impl Model for Language {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.field("ID", |m| &m.id, |m| &mut m.id);
        schema.field("Name", |m| &m.name, |m| &mut m.name);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Speaker {
    id: i64,
    name: String,
    languages: Vec<Language>,
}

impl Model for Speaker {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.field("ID", |m| &m.id, |m| &mut m.id);
        schema.field("Name", |m| &m.name, |m| &mut m.name);
        schema
            .many("Languages", |m| &m.languages, |m| &mut m.languages)
            .many2many("speaker_languages");
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Toy {
    id: i64,
    owner_id: i64,
    owner_type: String,
}

impl Model for Toy {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.field("ID", |m| &m.id, |m| &mut m.id);
        schema.field("OwnerID", |m| &m.owner_id, |m| &mut m.owner_id);
        schema.field("OwnerType", |m| &m.owner_type, |m| &mut m.owner_type);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Cat {
    id: i64,
    toys: Vec<Toy>,
}

impl Model for Cat {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.field("ID", |m| &m.id, |m| &mut m.id);
        schema
            .many("Toys", |m| &m.toys, |m| &mut m.toys)
            .polymorphic("Owner");
    }
}

fn language(name: &str) -> Language {
    Language {
        name: name.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn belongs_to_parent_is_saved_first() {
    let (conn, db) = db();
    let mut child = Child {
        name: "kid".to_string(),
        owner: Some(Owner {
            name: "parent".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    };

    db.create(&mut child).await.unwrap();

    let statements = conn.statements();
    assert_eq!(statements[0].sql, "INSERT INTO \"owners\" (\"name\") VALUES (?)");
    assert_eq!(statements[1].sql, "INSERT INTO \"children\" (\"name\",\"owner_id\") VALUES (?,?)");
    assert_eq!(statements[1].args, vec![Value::String("kid".to_string()), Value::Int(1)]);
    assert_eq!(child.owner_id, Some(1));
    assert_eq!(child.id, 2);
}

#[tokio::test]
async fn saving_a_child_with_a_new_parent_writes_the_new_key() {
    let (conn, db) = db();
    let mut child = Child {
        id: 5,
        name: "c".to_string(),
        owner_id: None,
        owner: Some(Owner {
            name: "new".to_string(),
            ..Default::default()
        }),
    };

    db.save(&mut child).await.unwrap();

    let statements = conn.statements();
    assert_eq!(statements[0].sql, "INSERT INTO \"owners\" (\"name\") VALUES (?)");
    assert_eq!(
        statements[1].sql,
        "UPDATE \"children\" SET \"name\" = ?, \"owner_id\" = ? WHERE \"children\".\"id\" = ?"
    );
    assert_eq!(
        statements[1].args,
        vec![Value::String("c".to_string()), Value::Int(1), Value::Int(5)]
    );
    assert_eq!(child.owner_id, Some(1));
}

#[tokio::test]
async fn many_to_many_links_through_the_join_table() {
    let (conn, db) = db();
    let mut speaker = Speaker {
        name: "ann".to_string(),
        languages: vec![language("en"), language("fr")],
        ..Default::default()
    };

    db.create(&mut speaker).await.unwrap();

    let statements = conn.statements();
    assert_eq!(statements.len(), 5);
    assert_eq!(statements[1].sql, "INSERT INTO \"languages\" (\"name\") VALUES (?)");
    assert_eq!(
        statements[3].sql,
        "INSERT INTO \"speaker_languages\" (\"speaker_id\",\"language_id\") SELECT ?,? \
         WHERE NOT EXISTS (SELECT * FROM \"speaker_languages\" WHERE \"speaker_id\" = ? AND \"language_id\" = ?)"
    );
    assert_eq!(
        statements[3].args,
        vec![Value::Int(1), Value::Int(2), Value::Int(1), Value::Int(2)]
    );
    assert_eq!(statements[4].args[1], Value::Int(3));
}

#[tokio::test]
async fn many_to_many_preload_groups_by_join_columns() {
    let (conn, db) = db();
    conn.push_rows(vec![
        MockRow::new().col("id", 1i64).col("name", "ann"),
        MockRow::new().col("id", 2i64).col("name", "bob"),
    ])
    .push_rows(vec![
        MockRow::new().col("id", 10i64).col("name", "en").col("speaker_id", 1i64),
        MockRow::new().col("id", 10i64).col("name", "en").col("speaker_id", 2i64),
        MockRow::new().col("id", 11i64).col("name", "fr").col("speaker_id", 2i64),
    ]);

    let speakers: Vec<Speaker> = db.preload("Languages").find().await.unwrap();

    assert_eq!(
        conn.sqls()[1],
        "SELECT \"languages\".\"id\", \"languages\".\"name\", \"speaker_languages\".\"speaker_id\" \
         FROM \"languages\" INNER JOIN \"speaker_languages\" ON \"speaker_languages\".\"language_id\" = \"languages\".\"id\" \
         WHERE (\"speaker_languages\".\"speaker_id\" IN (?,?))"
    );
    let names = |s: &Speaker| s.languages.iter().map(|l| l.name.clone()).collect::<Vec<_>>();
    assert_eq!(names(&speakers[0]), vec!["en"]);
    assert_eq!(names(&speakers[1]), vec!["en", "fr"]);
}

#[tokio::test]
async fn polymorphic_children_get_the_owner_discriminator() {
    let (conn, db) = db();
    let mut cat = Cat {
        toys: vec![Toy::default()],
        ..Default::default()
    };

    db.create(&mut cat).await.unwrap();

    let statements = conn.statements();
    assert_eq!(statements[1].sql, "INSERT INTO \"toys\" (\"owner_id\",\"owner_type\") VALUES (?,?)");
    assert_eq!(statements[1].args, vec![Value::Int(1), Value::String("cats".to_string())]);
    assert_eq!(cat.toys[0].owner_type, "cats");
}

#[tokio::test]
async fn polymorphic_preload_filters_on_the_discriminator() {
    let (conn, db) = db();
    conn.push_rows(vec![MockRow::new().col("id", 1i64)]);

    let _: Vec<Cat> = db.preload("Toys").find().await.unwrap();

    assert!(conn.sqls()[1].ends_with("WHERE (\"toys\".\"owner_id\" IN (?)) AND (\"toys\".\"owner_type\" = ?)"));
}
