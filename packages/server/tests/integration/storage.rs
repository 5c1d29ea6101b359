use crate::common::{
    BrokenStore, Origin, TestApp, image_path, url_hash, video_row, videos,
};

async fn spawn(origin: &Origin, store: std::sync::Arc<BrokenStore>) -> (TestApp, String) {
    let url = origin.url("/img/photo.jpg");
    let db = videos(vec![vec![video_row(1, Some(url.clone()), None)]]);
    let app = TestApp::spawn_with_store(db, store).await;
    (app, image_path("videos", 1, &url_hash(&url)))
}

#[tokio::test]
async fn unreadable_store_fails_original_requests() {
    let origin = Origin::spawn().await;
    let store = BrokenStore::unreadable();
    let (app, path) = spawn(&origin, store.clone()).await;

    let res = app.get(&path).await;
    assert_eq!(res.status, 502);
    assert_eq!(res.json()["code"], "STORAGE_UNAVAILABLE");
    assert_eq!(res.source(), "");
    assert_eq!(origin.hits(), 0);
    assert_eq!(store.puts(), 0);
}

#[tokio::test]
async fn unreadable_store_fails_conditional_and_variant_requests() {
    let origin = Origin::spawn().await;
    let (app, path) = spawn(&origin, BrokenStore::unreadable()).await;

    let res = app.get_if_none_match(&path, "\"abc\"").await;
    assert_eq!(res.status, 502);
    assert_eq!(res.json()["code"], "STORAGE_UNAVAILABLE");

    let res = app.get(&format!("{path}@h300")).await;
    assert_eq!(res.status, 502);
    assert_eq!(res.json()["code"], "STORAGE_UNAVAILABLE");
    assert_eq!(origin.hits(), 0);
}

#[tokio::test]
async fn failed_sync_write_back_fails_the_request() {
    let origin = Origin::spawn().await;
    let store = BrokenStore::unwritable();
    let (app, path) = spawn(&origin, store.clone()).await;

    let res = app.get(&path).await;
    assert_eq!(res.status, 502);
    assert_eq!(res.json()["code"], "STORAGE_UNAVAILABLE");
    assert_eq!(origin.hits(), 1);
    assert_eq!(store.puts(), 1);
}

#[tokio::test]
async fn failed_sync_variant_write_back_fails_the_request() {
    let origin = Origin::spawn().await;
    let store = BrokenStore::unwritable();
    let (app, path) = spawn(&origin, store.clone()).await;

    // The original write fails first and aborts before transcoding.
    let res = app.get(&format!("{path}@h300")).await;
    assert_eq!(res.status, 502);
    assert_eq!(res.json()["code"], "STORAGE_UNAVAILABLE");
    assert_eq!(store.puts(), 1);
}
