mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{db, Child, Owner};
use relmap::schema::Dyn;
use relmap::testing::MockRow;
use relmap::{args, Db, OrmError, OrmResult, Schema, Value, VirtualFieldLoader};

fn owner_row(id: i64, name: &str) -> MockRow {
    MockRow::new().col("id", id).col("name", name)
}

fn child_row(id: i64, name: &str, owner_id: i64) -> MockRow {
    MockRow::new().col("id", id).col("name", name).col("owner_id", owner_id)
}

fn script_owners_with_children(conn: &relmap::testing::MockConnection) {
    conn.push_rows(vec![owner_row(1, "one"), owner_row(2, "two"), owner_row(3, "three")])
        .push_rows(vec![child_row(10, "a", 1), child_row(11, "b", 1), child_row(12, "c", 3)]);
}

#[tokio::test]
async fn has_many_is_loaded_with_one_query_and_grouped() {
    let (conn, db) = db();
    script_owners_with_children(&conn);

    let owners: Vec<Owner> = db.preload("Children").find().await.unwrap();

    let statements = conn.statements();
    assert_eq!(statements.len(), 2);
    assert_eq!(
        statements[1].sql,
        "SELECT \"children\".\"id\", \"children\".\"name\", \"children\".\"owner_id\" FROM \"children\" \
         WHERE (\"children\".\"owner_id\" IN (?,?,?))"
    );
    assert_eq!(statements[1].args, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);

    let names: Vec<Vec<&str>> = owners
        .iter()
        .map(|o| o.children.iter().map(|c| c.name.as_str()).collect())
        .collect();
    assert_eq!(names, vec![vec!["a", "b"], vec![], vec!["c"]]);
}

#[tokio::test]
async fn repeated_preload_paths_run_once() {
    let (conn, db) = db();
    script_owners_with_children(&conn);

    let _: Vec<Owner> = db.preload("Children").preload("Children").find().await.unwrap();

    assert_eq!(conn.sqls().len(), 2);
}

#[tokio::test]
async fn nested_paths_load_each_level() {
    let (conn, db) = db();
    script_owners_with_children(&conn);
    conn.push_rows(vec![owner_row(1, "one"), owner_row(3, "three")]);

    let owners: Vec<Owner> = db.preload("Children.Owner").find().await.unwrap();

    let statements = conn.statements();
    assert_eq!(statements.len(), 3);
    assert_eq!(
        statements[2].sql,
        "SELECT \"owners\".\"id\", \"owners\".\"name\" FROM \"owners\" WHERE (\"owners\".\"id\" IN (?,?))"
    );
    assert_eq!(statements[2].args, vec![Value::Int(1), Value::Int(3)]);
    let parent = owners[2].children[0].owner.as_ref().unwrap();
    assert_eq!(parent.name, "three");
}

#[tokio::test]
async fn preload_query_can_be_narrowed() {
    let (conn, db) = db();
    script_owners_with_children(&conn);

    let _: Vec<Owner> = db
        .preload_with("Children", |q| q.where_(("name <> ?", args!["b"])))
        .find()
        .await
        .unwrap();

    assert!(conn.sqls()[1].ends_with("WHERE (\"children\".\"owner_id\" IN (?,?,?)) AND (name <> ?)"));
}

#[tokio::test]
async fn owners_without_keys_issue_no_preload_query() {
    let (conn, db) = db();

    let owners: Vec<Owner> = db.preload("Children").find().await.unwrap();

    assert!(owners.is_empty());
    assert_eq!(conn.sqls().len(), 1);
}

#[tokio::test]
async fn unknown_preload_field_is_an_error() {
    let (conn, db) = db();
    conn.push_rows(vec![owner_row(1, "one")]);

    let err = db.preload("Pets").find::<Owner>().await.unwrap_err();

    assert!(matches!(err, OrmError::Preload(_)));
}

#[tokio::test]
async fn inline_preload_joins_belongs_to() {
    let (conn, db) = db();
    conn.push_rows(vec![
        MockRow::new()
            .col("id", 1i64)
            .col("name", "a")
            .col("owner_id", 7i64)
            .col("id", 7i64)
            .col("id", 7i64)
            .col("name", "Ann"),
        MockRow::new()
            .col("id", 2i64)
            .col("name", "b")
            .col("owner_id", Value::Null)
            .col("id", Value::Null)
            .col("id", Value::Null)
            .col("name", Value::Null),
    ]);

    let children: Vec<Child> = db.inline_preload("Owner").find().await.unwrap();

    assert_eq!(
        conn.sqls(),
        vec![
            "SELECT \"children\".\"id\", \"children\".\"name\", \"children\".\"owner_id\", \
             \"ip_owner\".\"id\", \"ip_owner\".\"id\", \"ip_owner\".\"name\" FROM \"children\" \
             LEFT JOIN \"owners\" AS \"ip_owner\" ON \"ip_owner\".\"id\" = \"children\".\"owner_id\""
        ]
    );
    let owner = children[0].owner.as_ref().unwrap();
    assert_eq!(owner.id, 7);
    assert_eq!(owner.name, "Ann");
    assert_eq!(children[1].owner_id, None);
    assert!(children[1].owner.is_none());
}

#[tokio::test]
async fn inline_preload_rejects_has_many() {
    let (_conn, db) = db();

    let err = db.inline_preload("Children").find::<Owner>().await.unwrap_err();

    assert!(matches!(err, OrmError::Preload(_)));
}

struct Shout;

#[async_trait]
impl VirtualFieldLoader for Shout {
    async fn load(&self, _db: &Db, _schema: &Arc<Schema>, records: &mut [&mut Dyn]) -> OrmResult<()> {
        for record in records.iter_mut() {
            if let Some(owner) = record.downcast_mut::<Owner>() {
                owner.name = owner.name.to_uppercase();
            }
        }
        Ok(())
    }
}

#[tokio::test]
async fn virtual_fields_are_filled_by_their_loader() {
    let (conn, db) = db();
    conn.push_rows(vec![owner_row(1, "one")]);
    db.registry().add_virtual_field::<Owner>("Shout", Arc::new(Shout)).unwrap();

    let owners: Vec<Owner> = db.preload("Shout").find().await.unwrap();

    assert_eq!(owners[0].name, "ONE");
    assert_eq!(conn.sqls().len(), 1);
}
