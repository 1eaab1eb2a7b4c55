#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use relmap::testing::MockConnection;
use relmap::{Db, DbBuilder, DialectKind, Model, ModelHooks, OrmConfig, OrmError, OrmResult, SchemaBuilder};
use tracing_subscriber::EnvFilter;

pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
}

pub fn config() -> OrmConfig {
    OrmConfig::new().with_dialect(DialectKind::Sqlite)
}

/// Route statement logs to the test output; filter with `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn db_with(config: OrmConfig) -> (MockConnection, Db) {
    init_tracing();
    let conn = MockConnection::new();
    let db = DbBuilder::new()
        .connection(Arc::new(conn.clone()))
        .config(config)
        .clock(fixed_time)
        .build()
        .unwrap();
    (conn, db)
}

/// Sqlite handle over a fresh recording connection
pub fn db() -> (MockConnection, Db) {
    db_with(config())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub age: i32,
}

impl Model for User {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.field("ID", |m| &m.id, |m| &mut m.id);
        schema.field("Name", |m| &m.name, |m| &mut m.name);
        schema.field("Age", |m| &m.age, |m| &mut m.age);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Owner {
    pub id: i64,
    pub name: String,
    pub children: Vec<Child>,
}

impl Model for Owner {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.field("ID", |m| &m.id, |m| &mut m.id);
        schema.field("Name", |m| &m.name, |m| &mut m.name);
        schema.many("Children", |m| &m.children, |m| &mut m.children);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Child {
    pub id: i64,
    pub name: String,
    pub owner_id: Option<i64>,
    pub owner: Option<Owner>,
}

impl Model for Child {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.field("ID", |m| &m.id, |m| &mut m.id);
        schema.field("Name", |m| &m.name, |m| &mut m.name);
        schema.field("OwnerID", |m| &m.owner_id, |m| &mut m.owner_id);
        schema.one("Owner", |m| &m.owner, |m| &mut m.owner);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Model for Post {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.field("ID", |m| &m.id, |m| &mut m.id);
        schema.field("Title", |m| &m.title, |m| &mut m.title);
        schema.field("DeletedAt", |m| &m.deleted_at, |m| &mut m.deleted_at);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model for Article {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.field("ID", |m| &m.id, |m| &mut m.id);
        schema.field("Title", |m| &m.title, |m| &mut m.title);
        schema.field("CreatedAt", |m| &m.created_at, |m| &mut m.created_at);
        schema.field("UpdatedAt", |m| &m.updated_at, |m| &mut m.updated_at);
    }
}

/// Uppercases its name before insert and refuses the name "forbidden"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Account {
    pub id: i64,
    pub name: String,
}

#[async_trait]
impl ModelHooks for Account {
    async fn before_save(&mut self, _db: &Db) -> OrmResult<()> {
        if self.name == "forbidden" {
            return Err(OrmError::Callback("name is forbidden".to_string()));
        }
        Ok(())
    }

    async fn before_create(&mut self, _db: &Db) -> OrmResult<()> {
        self.name = self.name.to_uppercase();
        Ok(())
    }
}

impl Model for Account {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.hooks();
        schema.field("ID", |m| &m.id, |m| &mut m.id);
        schema.field("Name", |m| &m.name, |m| &mut m.name);
    }
}
