mod common;

use chrono::{DateTime, TimeZone, Utc};
use common::{config, db, db_with, fixed_time, Account, Article, Child, Owner, Post, User};
use relmap::testing::{MockRow, TxEvent};
use relmap::{attrs, DialectKind, ExecResult, KeyGenerator, Model, OrmConfig, OrmError, SchemaBuilder, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct Draft {
    id: i64,
    title: String,
    status: String,
}

impl Model for Draft {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.field("ID", |m| &m.id, |m| &mut m.id);
        schema.field("Title", |m| &m.title, |m| &mut m.title);
        schema
            .field("Status", |m| &m.status, |m| &mut m.status)
            .default_value("'draft'");
    }
}

#[derive(Debug, Clone, Default)]
struct Token {
    id: Uuid,
    name: String,
}

impl Model for Token {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema
            .field("ID", |m| &m.id, |m| &mut m.id)
            .primary_key()
            .generator(KeyGenerator::uuid_v4());
        schema.field("Name", |m| &m.name, |m| &mut m.name);
    }
}

#[derive(Debug, Clone, Default)]
struct Ledger {
    id: i64,
    note: String,
    created_by_id: Option<i64>,
    updated_by_id: Option<i64>,
    deleted_by_id: Option<i64>,
    deleted_at: Option<DateTime<Utc>>,
}

impl Model for Ledger {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.field("ID", |m| &m.id, |m| &mut m.id);
        schema.field("Note", |m| &m.note, |m| &mut m.note);
        schema.field("CreatedByID", |m| &m.created_by_id, |m| &mut m.created_by_id);
        schema.field("UpdatedByID", |m| &m.updated_by_id, |m| &mut m.updated_by_id);
        schema.field("DeletedByID", |m| &m.deleted_by_id, |m| &mut m.deleted_by_id);
        schema.field("DeletedAt", |m| &m.deleted_at, |m| &mut m.deleted_at);
    }
}

#[derive(Debug, Clone, Default)]
struct Member {
    id: i64,
    email: String,
}

impl Model for Member {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.field("ID", |m| &m.id, |m| &mut m.id);
        schema
            .field("Email", |m| &m.email, |m| &mut m.email)
            .unique_index_named("members_email_key");
    }
}

#[tokio::test]
async fn create_inserts_inside_an_implicit_transaction() {
    let (conn, db) = db();
    let mut user = User {
        name: "jinzhu".to_string(),
        age: 18,
        ..Default::default()
    };

    db.create(&mut user).await.unwrap();

    let statements = conn.statements();
    assert_eq!(statements.len(), 1);
    assert_eq!(statements[0].sql, "INSERT INTO \"users\" (\"name\",\"age\") VALUES (?,?)");
    assert_eq!(statements[0].args[0], Value::String("jinzhu".to_string()));
    assert!(statements[0].in_transaction);
    assert_eq!(conn.events(), vec![TxEvent::Begin, TxEvent::Commit]);
    assert_eq!(user.id, 1);
}

#[tokio::test]
async fn skipping_the_default_transaction() {
    let (conn, db) = db_with(common::config().with_skip_default_transaction(true));
    let mut user = User {
        name: "solo".to_string(),
        ..Default::default()
    };

    db.create(&mut user).await.unwrap();

    assert!(conn.events().is_empty());
    assert!(!conn.statements()[0].in_transaction);
}

#[tokio::test]
async fn has_many_children_are_saved_after_their_owner() {
    let (conn, db) = db();
    let mut owner = Owner {
        name: "parent".to_string(),
        children: vec![
            Child {
                name: "a".to_string(),
                ..Default::default()
            },
            Child {
                name: "b".to_string(),
                ..Default::default()
            },
        ],
        ..Default::default()
    };

    db.create(&mut owner).await.unwrap();

    let statements = conn.statements();
    assert_eq!(statements.len(), 3);
    assert_eq!(statements[0].sql, "INSERT INTO \"owners\" (\"name\") VALUES (?)");
    for (statement, name) in statements[1..].iter().zip(["a", "b"]) {
        assert_eq!(statement.sql, "INSERT INTO \"children\" (\"name\",\"owner_id\") VALUES (?,?)");
        assert_eq!(statement.args, vec![Value::String(name.to_string()), Value::Int(1)]);
        assert!(statement.in_transaction);
    }
    assert_eq!(conn.events(), vec![TxEvent::Begin, TxEvent::Commit]);
    assert_eq!(owner.id, 1);
    assert_eq!(owner.children[0].owner_id, Some(1));
    assert_eq!(owner.children[0].id, 2);
    assert_eq!(owner.children[1].id, 3);
}

#[tokio::test]
async fn associations_can_be_left_alone() {
    let (conn, db) = db();
    let mut owner = Owner {
        name: "parent".to_string(),
        children: vec![Child {
            name: "a".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    };

    db.save_associations(false).create(&mut owner).await.unwrap();

    assert_eq!(conn.sqls(), vec!["INSERT INTO \"owners\" (\"name\") VALUES (?)"]);
    assert_eq!(owner.children[0].id, 0);
}

#[tokio::test]
async fn updates_write_changed_attributes_by_key() {
    let (conn, db) = db();
    let mut user = User {
        id: 7,
        name: "old".to_string(),
        age: 30,
    };

    let affected = db.updates(&mut user, attrs! { "name" => "new" }).await.unwrap();

    assert_eq!(affected, 1);
    let statements = conn.statements();
    assert_eq!(statements[0].sql, "UPDATE \"users\" SET \"name\" = ? WHERE \"users\".\"id\" = ?");
    assert_eq!(statements[0].args, vec![Value::String("new".to_string()), Value::Int(7)]);
    assert_eq!(user.name, "new");
}

#[tokio::test]
async fn unchanged_attributes_issue_no_statement() {
    let (conn, db) = db();
    let mut user = User {
        id: 7,
        name: "same".to_string(),
        age: 30,
    };

    let affected = db.updates(&mut user, attrs! { "name" => "same" }).await.unwrap();

    assert_eq!(affected, 0);
    assert!(conn.sqls().is_empty());
}

#[tokio::test]
async fn updating_a_record_without_key_or_conditions_is_refused() {
    let (conn, db) = db();
    let mut user = User::default();

    let err = db.updates(&mut user, attrs! { "name" => "x" }).await.unwrap_err();

    assert!(matches!(err, OrmError::SingleUpdateRequiresKey { .. }));
    assert!(conn.sqls().is_empty());
    assert!(conn.events().is_empty());
}

#[tokio::test]
async fn table_wide_writes_need_permission() {
    let (conn, db) = db();

    let err = db.model::<User>().update_all(attrs! { "age" => 1 }).await.unwrap_err();
    assert!(matches!(err, OrmError::MissingWhereClause { ref operation, .. } if operation == "updating"));

    let err = db.model::<User>().delete_all().await.unwrap_err();
    assert!(matches!(err, OrmError::MissingWhereClause { ref operation, .. } if operation == "deleting"));
    assert!(conn.sqls().is_empty());

    db.model::<User>()
        .allow_global_update()
        .update_all(attrs! { "age" => 1 })
        .await
        .unwrap();
    assert_eq!(conn.sqls(), vec!["UPDATE \"users\" SET \"age\" = ?"]);
}

#[tokio::test]
async fn conditioned_update_all() {
    let (conn, db) = db();

    db.model::<User>()
        .where_(("age < ?", relmap::args![18]))
        .update_all(attrs! { "name" => "minor" })
        .await
        .unwrap();

    assert_eq!(conn.sqls(), vec!["UPDATE \"users\" SET \"name\" = ? WHERE (age < ?)"]);
}

#[tokio::test]
async fn save_writes_every_column_of_a_keyed_record() {
    let (conn, db) = db();
    let mut user = User {
        id: 4,
        name: "ann".to_string(),
        age: 40,
    };

    db.save(&mut user).await.unwrap();

    assert_eq!(
        conn.sqls(),
        vec!["UPDATE \"users\" SET \"name\" = ?, \"age\" = ? WHERE \"users\".\"id\" = ?"]
    );
}

#[tokio::test]
async fn save_creates_a_record_that_was_not_there() {
    let (conn, db) = db();
    conn.push_exec(ExecResult::new(0)).push_rows(Vec::new());
    let mut user = User {
        id: 4,
        name: "ann".to_string(),
        age: 40,
    };

    db.save(&mut user).await.unwrap();

    let sqls = conn.sqls();
    assert_eq!(sqls.len(), 3);
    assert!(sqls[0].starts_with("UPDATE \"users\""));
    assert!(sqls[1].starts_with("SELECT 1 FROM \"users\""));
    assert_eq!(sqls[2], "INSERT INTO \"users\" (\"id\",\"name\",\"age\") VALUES (?,?,?)");
}

#[tokio::test]
async fn delete_is_soft_when_the_model_has_deleted_at() {
    let (conn, db) = db();
    let mut post = Post {
        id: 3,
        title: "t".to_string(),
        deleted_at: None,
    };

    db.delete(&mut post).await.unwrap();

    let statements = conn.statements();
    assert_eq!(
        statements[0].sql,
        "UPDATE \"posts\" SET \"deleted_at\" = ? WHERE \"posts\".\"deleted_at\" IS NULL AND \"posts\".\"id\" = ?"
    );
    assert_eq!(statements[0].args, vec![Value::DateTime(fixed_time()), Value::Int(3)]);
}

#[tokio::test]
async fn unscoped_delete_removes_the_row() {
    let (conn, db) = db();
    let mut post = Post {
        id: 3,
        ..Default::default()
    };

    db.unscoped().delete(&mut post).await.unwrap();

    assert_eq!(conn.sqls(), vec!["DELETE FROM \"posts\" WHERE \"posts\".\"id\" = ?"]);
}

#[tokio::test]
async fn creation_timestamps_come_from_the_clock() {
    let (conn, db) = db();
    let mut article = Article {
        title: "news".to_string(),
        ..Default::default()
    };

    db.create(&mut article).await.unwrap();

    assert_eq!(article.created_at, Some(fixed_time()));
    assert_eq!(article.updated_at, Some(fixed_time()));
    let statements = conn.statements();
    assert_eq!(
        statements[0].sql,
        "INSERT INTO \"articles\" (\"title\",\"created_at\",\"updated_at\") VALUES (?,?,?)"
    );
    assert_eq!(statements[0].args[1], Value::DateTime(fixed_time()));
}

#[tokio::test]
async fn hooks_run_before_insert() {
    let (conn, db) = db();
    let mut account = Account {
        name: "bob".to_string(),
        ..Default::default()
    };

    db.create(&mut account).await.unwrap();

    assert_eq!(account.name, "BOB");
    assert_eq!(conn.statements()[0].args, vec![Value::String("BOB".to_string())]);
}

#[tokio::test]
async fn failing_hook_rolls_back() {
    let (conn, db) = db();
    let mut account = Account {
        name: "forbidden".to_string(),
        ..Default::default()
    };

    let err = db.create(&mut account).await.unwrap_err();

    assert!(matches!(err, OrmError::Hook { ref hook, .. } if hook == "before_save"));
    assert!(conn.sqls().is_empty());
    assert_eq!(conn.events(), vec![TxEvent::Begin, TxEvent::Rollback]);
}

#[tokio::test]
async fn failing_statement_rolls_back_and_keeps_the_cause() {
    let (conn, db) = db();
    conn.push_error(OrmError::Database("disk full".to_string()));
    let mut user = User {
        name: "x".to_string(),
        ..Default::default()
    };

    let err = db.create(&mut user).await.unwrap_err();

    assert_eq!(err.root(), &OrmError::Database("disk full".to_string()));
    assert_eq!(conn.events(), vec![TxEvent::Begin, TxEvent::Rollback]);
}

#[tokio::test]
async fn first_or_create_inserts_from_conditions_and_attrs() {
    let (conn, db) = db();

    let user: User = db
        .where_(attrs! { "name" => "jinzhu" })
        .attrs(attrs! { "age" => 20 })
        .first_or_create()
        .await
        .unwrap();

    assert_eq!(user.name, "jinzhu");
    assert_eq!(user.age, 20);
    assert_eq!(user.id, 1);
    let sqls = conn.sqls();
    assert_eq!(
        sqls[0],
        "SELECT \"users\".\"id\", \"users\".\"name\", \"users\".\"age\" FROM \"users\" \
         WHERE (\"users\".\"name\" = ?) ORDER BY \"users\".\"id\" ASC LIMIT 1"
    );
    assert_eq!(sqls[1], "INSERT INTO \"users\" (\"name\",\"age\") VALUES (?,?)");
}

#[tokio::test]
async fn save_restamps_updated_at_and_keeps_unloaded_created_at() {
    let (conn, db) = db();
    let mut article = Article {
        id: 5,
        title: "x".to_string(),
        ..Default::default()
    };

    db.save(&mut article).await.unwrap();

    let statements = conn.statements();
    assert_eq!(
        statements[0].sql,
        "UPDATE \"articles\" SET \"title\" = ?, \"updated_at\" = ? WHERE \"articles\".\"id\" = ?"
    );
    assert_eq!(
        statements[0].args,
        vec![Value::String("x".to_string()), Value::DateTime(fixed_time()), Value::Int(5)]
    );
    assert_eq!(article.updated_at, Some(fixed_time()));
    assert_eq!(article.created_at, None);
}

#[tokio::test]
async fn save_overwrites_a_stale_updated_at() {
    let (conn, db) = db();
    let created = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let mut article = Article {
        id: 5,
        title: "x".to_string(),
        created_at: Some(created),
        updated_at: Some(created),
    };

    db.save(&mut article).await.unwrap();

    assert_eq!(
        conn.statements()[0].args,
        vec![
            Value::String("x".to_string()),
            Value::DateTime(created),
            Value::DateTime(fixed_time()),
            Value::Int(5)
        ]
    );
}

#[tokio::test]
async fn explicit_updated_at_is_kept() {
    let (conn, db) = db();
    let chosen = Utc.with_ymd_and_hms(2021, 2, 3, 4, 5, 6).unwrap();
    let mut article = Article {
        id: 5,
        ..Default::default()
    };

    db.updates(&mut article, attrs! { "updated_at" => chosen }).await.unwrap();

    let statements = conn.statements();
    assert_eq!(statements[0].sql, "UPDATE \"articles\" SET \"updated_at\" = ? WHERE \"articles\".\"id\" = ?");
    assert_eq!(statements[0].args[0], Value::DateTime(chosen));
}

#[tokio::test]
async fn postgres_insert_reads_the_key_from_returning() {
    let (conn, db) = db_with(OrmConfig::new().with_dialect(DialectKind::Postgres));
    conn.push_rows(vec![MockRow::new().col("id", 42i64)]);
    let mut user = User {
        name: "ann".to_string(),
        age: 3,
        ..Default::default()
    };

    db.create(&mut user).await.unwrap();

    assert_eq!(
        conn.sqls(),
        vec!["INSERT INTO \"users\" (\"name\",\"age\") VALUES ($1,$2) RETURNING \"users\".\"id\""]
    );
    assert_eq!(user.id, 42);
}

#[tokio::test]
async fn blank_columns_with_defaults_are_reloaded() {
    let (conn, db) = db();
    conn.push_exec(ExecResult::new(1).with_last_insert_id(9))
        .push_rows(vec![MockRow::new().col("status", "draft")]);
    let mut draft = Draft {
        title: "plan".to_string(),
        ..Default::default()
    };

    db.create(&mut draft).await.unwrap();

    let statements = conn.statements();
    assert_eq!(statements[0].sql, "INSERT INTO \"drafts\" (\"title\") VALUES (?)");
    assert_eq!(
        statements[1].sql,
        "SELECT \"status\" FROM \"drafts\" WHERE \"drafts\".\"id\" = ?"
    );
    assert_eq!(statements[1].args, vec![Value::Int(9)]);
    assert_eq!(draft.id, 9);
    assert_eq!(draft.status, "draft");
}

#[tokio::test]
async fn generated_keys_are_filled_before_insert() {
    let (conn, db) = db();
    let mut token = Token {
        name: "api".to_string(),
        ..Default::default()
    };

    db.create(&mut token).await.unwrap();

    assert!(!token.id.is_nil());
    let statements = conn.statements();
    assert_eq!(statements[0].sql, "INSERT INTO \"tokens\" (\"id\",\"name\") VALUES (?,?)");
    assert_eq!(statements[0].args[0], Value::Uuid(token.id));
}

#[tokio::test]
async fn acting_user_is_recorded_in_audit_columns() {
    let (conn, db) = db();
    let db = db.with_current_user(7i64);
    let mut ledger = Ledger {
        note: "a".to_string(),
        ..Default::default()
    };

    db.create(&mut ledger).await.unwrap();
    db.updates(&mut ledger, attrs! { "note" => "b" }).await.unwrap();
    db.delete(&mut ledger).await.unwrap();

    assert_eq!(ledger.created_by_id, Some(7));
    assert_eq!(ledger.updated_by_id, Some(7));
    let statements = conn.statements();
    assert_eq!(statements[0].args[1..3], [Value::Int(7), Value::Int(7)]);
    assert!(statements[1]
        .sql
        .starts_with("UPDATE \"ledgers\" SET \"note\" = ?, \"updated_by_id\" = ? WHERE"));
    assert_eq!(statements[1].args[..2], [Value::String("b".to_string()), Value::Int(7)]);
    assert!(statements[2]
        .sql
        .starts_with("UPDATE \"ledgers\" SET \"deleted_at\" = ?, \"deleted_by_id\" = ? WHERE"));
    assert_eq!(statements[2].args[1], Value::Int(7));
}

#[tokio::test]
async fn unique_violations_name_the_index() {
    let (conn, db) = db_with(config());
    conn.push_error(OrmError::Database("UNIQUE constraint failed: members.email".to_string()));
    let mut member = Member {
        email: "a@b.c".to_string(),
        ..Default::default()
    };

    let err = db.create(&mut member).await.unwrap_err();

    match err {
        OrmError::DuplicateUniqueIndex { index, table, columns, .. } => {
            assert_eq!(index, "members_email_key");
            assert_eq!(table, "members");
            assert_eq!(columns, vec!["email"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(conn.events(), vec![TxEvent::Begin, TxEvent::Rollback]);
}
