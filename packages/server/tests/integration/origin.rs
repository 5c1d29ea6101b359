use crate::common::{Origin, STORAGE_PREFIX, TestApp, image_path, url_hash, video_row, videos};
use server::config::UploadMode;

async fn serve_once(origin: &Origin, path: &str) -> (TestApp, String) {
    let url = origin.url(path);
    let app = TestApp::spawn(videos(vec![vec![video_row(1, Some(url.clone()), None)]])).await;
    (app, image_path("videos", 1, &url_hash(&url)))
}

mod redirects {
    use super::*;

    #[tokio::test]
    async fn chain_within_budget_is_followed() {
        let origin = Origin::spawn().await;
        let (app, path) = serve_once(&origin, "/img/hop/5").await;

        let res = app.get(&path).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.source(), "orig-remote");
        assert_eq!(&res.bytes[..], origin.jpeg());
        assert_eq!(origin.hits(), 6);
    }

    #[tokio::test]
    async fn chain_over_budget_fails() {
        let origin = Origin::spawn().await;
        let (app, path) = serve_once(&origin, "/img/hop/6").await;

        let res = app.get(&path).await;
        assert_eq!(res.status, 502);
        assert_eq!(res.json()["code"], "TOO_MANY_REDIRECTS");
        assert_eq!(origin.hits(), 6);
    }

    #[tokio::test]
    async fn placeholder_redirect_is_not_found() {
        let origin = Origin::spawn().await;
        let (app, path) = serve_once(&origin, "/img/placeholder").await;

        let res = app.get(&path).await;
        assert_eq!(res.status, 404);
        assert_eq!(origin.hits(), 1);
    }

    #[tokio::test]
    async fn redirect_without_location_is_protocol_error() {
        let origin = Origin::spawn().await;
        let (app, path) = serve_once(&origin, "/img/bare-redirect").await;

        let res = app.get(&path).await;
        assert_eq!(res.status, 502);
        assert_eq!(res.json()["code"], "PROTOCOL_ERROR");
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn origin_404_is_not_found() {
        let origin = Origin::spawn().await;
        let (app, path) = serve_once(&origin, "/img/deleted.jpg").await;

        let res = app.get(&path).await;
        assert_eq!(res.status, 404);
        assert_eq!(res.json()["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn origin_error_status_is_passed_through() {
        let origin = Origin::spawn().await;
        let (app, path) = serve_once(&origin, "/img/forbidden").await;

        let res = app.get(&path).await;
        assert_eq!(res.status, 403);
        assert_eq!(res.json()["code"], "UPSTREAM_STATUS");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let origin = Origin::spawn().await;
        let (app, path) = serve_once(&origin, "/img/huge").await;

        let res = app.get(&path).await;
        assert_eq!(res.status, 502);
        assert_eq!(res.json()["code"], "PAYLOAD_TOO_LARGE");
    }

    #[tokio::test]
    async fn corrupt_original_cannot_be_resized() {
        let origin = Origin::spawn().await;
        let url = origin.url("/img/huge");
        let app = TestApp::spawn_with(
            videos(vec![vec![video_row(1, Some(url.clone()), None)]]),
            |config| config.origin.max_fetch_bytes = 32 << 20,
        )
        .await;

        let res = app
            .get(&image_path("videos", 1, &format!("{}@h100", url_hash(&url))))
            .await;
        assert_eq!(res.status, 400);
        assert_eq!(res.json()["code"], "TRANSCODE_ERROR");
    }
}

mod background_uploads {
    use super::*;

    #[tokio::test]
    async fn async_mode_serves_before_write_back() {
        let origin = Origin::spawn().await;
        let url = origin.url("/img/photo.jpg");
        let hash = url_hash(&url);
        let app = TestApp::spawn_with(
            videos(vec![vec![video_row(1, Some(url), None)]]),
            |config| config.upload.mode = UploadMode::Async,
        )
        .await;
        let path = image_path("videos", 1, &hash);

        let first = app.get(&path).await;
        assert_eq!(first.status, 200);
        assert_eq!(first.source(), "orig-remote");
        assert_eq!(
            first.etag(),
            format!("\"{}\"", common::storage::ContentHash::compute(origin.jpeg()))
        );

        app.wait_for_object(&format!("{STORAGE_PREFIX}/videos/1/{hash}"))
            .await;

        let second = app.get(&path).await;
        assert_eq!(second.source(), "orig-orig-cache");
        assert_eq!(second.etag(), first.etag());
        assert_eq!(second.bytes, first.bytes);
    }
}
