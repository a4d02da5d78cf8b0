mod common;

use series_store::repo::{FileRepo, RetryPolicy, TimeSeriesRepo};
use series_store::{Error, TimeSeries};
use tempfile::TempDir;

#[tokio::test]
async fn corpus_survives_reopen_in_creation_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");

    let repo = FileRepo::open(&path, RetryPolicy::default()).await.unwrap();
    assert!(repo.find_all().await.unwrap().is_empty());

    let a = repo.save(common::hourly().with_name("a")).await.unwrap();
    let b = repo.save(common::numeric(16)).await.unwrap();
    drop(repo);

    let reopened = FileRepo::open(&path, RetryPolicy::default()).await.unwrap();
    let all = reopened.find_all().await.unwrap();
    assert_eq!(all, vec![a.clone(), b]);
    assert_eq!(
        reopened.find_by_id(a.id().unwrap()).await.unwrap().column("load").unwrap()[1],
        None
    );
}

#[tokio::test]
async fn delete_persists_and_reports_unknown_ids() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");
    let repo = FileRepo::open(&path, RetryPolicy::none()).await.unwrap();

    let id = repo
        .save(common::numeric(4))
        .await
        .unwrap()
        .id()
        .unwrap()
        .to_string();
    repo.delete(&id).await.unwrap();
    assert!(matches!(repo.delete(&id).await, Err(Error::NotFound { .. })));
    assert!(repo.find_by_id("missing").await.unwrap_err().is_not_found());

    let reopened = FileRepo::open(&path, RetryPolicy::none()).await.unwrap();
    assert!(!reopened.exists(&id).await.unwrap());
}

#[tokio::test]
async fn resave_keeps_created_at() {
    let dir = TempDir::new().unwrap();
    let repo = FileRepo::open(dir.path().join("s.json"), RetryPolicy::none())
        .await
        .unwrap();

    let first = repo.save(common::numeric(3)).await.unwrap();
    let id = first.id().unwrap().to_string();
    let second = repo
        .save(common::hourly().with_id(id.clone()))
        .await
        .unwrap();

    assert_eq!(second.created_at(), first.created_at());
    let found: TimeSeries = repo.find_by_id(&id).await.unwrap();
    assert_eq!(found.value_columns(), ["temp", "load"]);
    assert_eq!(repo.find_all().await.unwrap().len(), 1);
}
