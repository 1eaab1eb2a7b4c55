mod common;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{db, User};
use futures::FutureExt;
use relmap::testing::TxEvent;
use relmap::{args, callback_fn, OrmError};

fn user(name: &str) -> User {
    User {
        name: name.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn explicit_transaction_runs_statements_inside_it() {
    let (conn, db) = db();

    let tx = db.begin().await.unwrap();
    assert!(tx.in_transaction());
    tx.exec("UPDATE users SET age = ?", args![1]).await.unwrap();
    let mut created = user("inner");
    tx.create(&mut created).await.unwrap();
    tx.commit().await.unwrap();

    assert!(conn.statements().iter().all(|s| s.in_transaction));
    assert_eq!(conn.events(), vec![TxEvent::Begin, TxEvent::Commit]);
}

#[tokio::test]
async fn ending_a_transaction_needs_one() {
    let (_conn, db) = db();

    assert_eq!(db.commit().await.unwrap_err(), OrmError::InvalidTransaction);
    assert_eq!(db.rollback().await.unwrap_err(), OrmError::InvalidTransaction);
}

#[tokio::test]
async fn nested_begin_is_refused() {
    let (_conn, db) = db();

    let tx = db.begin().await.unwrap();
    let err = tx.begin().await.unwrap_err();

    assert!(matches!(err, OrmError::CantStartTransaction(_)));
}

#[tokio::test]
async fn begin_failure_aborts_the_write() {
    let (conn, db) = db();
    conn.fail_begin("pool exhausted");

    let err = db.create(&mut user("x")).await.unwrap_err();

    assert!(matches!(err, OrmError::CantStartTransaction(_)));
    assert!(conn.sqls().is_empty());
}

#[tokio::test]
async fn transaction_closure_commits_on_success() {
    let (conn, db) = db();

    let created = db
        .transaction(|tx| async move {
            let mut first = user("first");
            tx.create(&mut first).await?;
            Ok::<_, OrmError>(first)
        })
        .await
        .unwrap();

    assert_eq!(created.id, 1);
    assert_eq!(conn.events(), vec![TxEvent::Begin, TxEvent::Commit]);
}

#[tokio::test]
async fn transaction_closure_rolls_back_on_error() {
    let (conn, db) = db();

    let result = db
        .transaction(|tx| async move {
            tx.create(&mut user("doomed")).await?;
            Err::<(), _>(OrmError::Database("constraint".to_string()))
        })
        .await;

    assert_eq!(result.unwrap_err(), OrmError::Database("constraint".to_string()));
    assert_eq!(conn.sqls().len(), 1);
    assert_eq!(conn.events(), vec![TxEvent::Begin, TxEvent::Rollback]);
}

#[tokio::test]
async fn transaction_closure_rolls_back_on_panic() {
    let (conn, db) = db();

    let outcome = AssertUnwindSafe(db.transaction(|tx| async move {
        let users: Vec<User> = tx.find().await?;
        if users.is_empty() {
            panic!("expected seeded users");
        }
        Ok::<_, OrmError>(())
    }))
    .catch_unwind()
    .await;

    assert!(outcome.is_err());
    assert!(conn.statements()[0].in_transaction);
    assert_eq!(conn.events(), vec![TxEvent::Begin, TxEvent::Rollback]);
}

#[tokio::test]
async fn custom_callbacks_run_at_their_position() {
    let (conn, db) = db();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let db = db.with_callbacks(move |callbacks| {
        callbacks
            .create
            .register_after(
                "relmap:create",
                "audit",
                callback_fn(move |_scope| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
    });
    db.create(&mut user("audited")).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let names = db.callbacks().create.names();
    let create = names.iter().position(|n| *n == "relmap:create").unwrap();
    assert_eq!(names[create + 1], "audit");
    assert_eq!(conn.sqls().len(), 1);
}

#[tokio::test]
async fn removing_the_transaction_steps() {
    let (conn, db) = db();

    let db = db.with_callbacks(|callbacks| {
        assert!(callbacks.create.remove("relmap:begin_transaction"));
    });
    db.create(&mut user("bare")).await.unwrap();

    assert!(conn.events().is_empty());
    assert!(!conn.statements()[0].in_transaction);
}
