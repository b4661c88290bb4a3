use serde_json::json;

use server::config::VaultConfig;

use crate::common::{TestApp, png_bytes, routes};

mod upload {
    use super::*;

    #[tokio::test]
    async fn stores_every_file_of_a_valid_batch() {
        let app = TestApp::spawn().await;

        let res = app
            .upload(vec![
                ("a.png", "image/png", png_bytes(1)),
                ("b.png", "image/png", png_bytes(2)),
            ])
            .await;

        assert_eq!(res.status, 201, "{}", res.body);
        let items = res.body["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["filename"], "a.png");
        assert_eq!(items[0]["media_type"], "image");
        assert_eq!(items[0]["author_id"], "author-1");
        assert_ne!(items[0]["content_hash"], items[1]["content_hash"]);

        let id = items[1]["id"].as_str().unwrap();
        let fetched = app.get(&routes::media(id)).await;
        assert_eq!(fetched.status, 200);
        assert_eq!(fetched.body["filename"], "b.png");
        assert_eq!(fetched.body["announcement_ref"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn same_author_reupload_is_a_conflict() {
        let app = TestApp::spawn().await;
        app.upload_png(7).await;

        let res = app
            .upload(vec![("again.png", "image/png", png_bytes(7))])
            .await;

        assert_eq!(res.status, 409);
        assert_eq!(res.body["code"], "DUPLICATE_FILE");
        assert!(res.body["message"].as_str().unwrap().contains("again.png"));
    }

    #[tokio::test]
    async fn other_author_may_upload_the_same_bytes() {
        let app = TestApp::spawn().await;
        app.upload_png(7).await;

        let res = app
            .upload_as("author-2", vec![("mine.png", "image/png", png_bytes(7))])
            .await;

        assert_eq!(res.status, 201, "{}", res.body);
    }

    #[tokio::test]
    async fn every_rejection_is_reported_and_nothing_is_stored() {
        let app = TestApp::spawn().await;

        let res = app
            .upload(vec![
                ("ok.png", "image/png", png_bytes(3)),
                ("notes.txt", "text/plain", b"hello".to_vec()),
                ("noext", "image/png", png_bytes(4)),
            ])
            .await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
        let details = res.body["details"].as_array().unwrap();
        let fields: Vec<(&str, &str)> = details
            .iter()
            .map(|d| {
                (
                    d["filename"].as_str().unwrap(),
                    d["field"].as_str().unwrap(),
                )
            })
            .collect();
        assert!(fields.contains(&("notes.txt", "content_type")));
        assert!(fields.contains(&("notes.txt", "extension")));
        assert!(fields.contains(&("noext", "extension")));
        assert!(!fields.iter().any(|(name, _)| *name == "ok.png"));

        // The valid file of the rejected batch was not kept.
        app.upload_png(3).await;
    }

    #[tokio::test]
    async fn missing_owner_fields_are_rejected() {
        let app = TestApp::spawn().await;
        let part = reqwest::multipart::Part::bytes(png_bytes(1))
            .file_name("a.png")
            .mime_str("image/png")
            .unwrap();
        let form = reqwest::multipart::Form::new().part("file", part);

        let res = app
            .client
            .post(format!("http://{}{}", app.addr, routes::MEDIA))
            .multipart(form)
            .send()
            .await
            .unwrap();

        assert_eq!(res.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn closed_uploads_are_refused() {
        let app = TestApp::spawn_with(VaultConfig {
            uploads_enabled: false,
            ..Default::default()
        })
        .await;

        let res = app
            .upload(vec![("a.png", "image/png", png_bytes(1))])
            .await;

        assert_eq!(res.status, 403);
        assert_eq!(res.body["code"], "UPLOADS_CLOSED");
    }
}

mod items {
    use super::*;

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let app = TestApp::spawn().await;
        let res = app.get(&routes::media("no-such-item")).await;
        assert_eq!(res.status, 404);
        assert_eq!(res.body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn announcement_reference_is_recorded() {
        let app = TestApp::spawn().await;
        let id = app.upload_png(5).await;

        let res = app
            .put(
                &routes::announcement(&id),
                &json!({"announcement_ref": "msg-123"}),
            )
            .await;
        assert_eq!(res.status, 200, "{}", res.body);
        assert_eq!(res.body["announcement_ref"], "msg-123");

        let blank = app
            .put(&routes::announcement(&id), &json!({"announcement_ref": "  "}))
            .await;
        assert_eq!(blank.status, 400);
    }

    #[tokio::test]
    async fn originals_are_served_by_hash() {
        let app = TestApp::spawn().await;
        let bytes = png_bytes(9);
        let res = app
            .upload(vec![("orig.png", "image/png", bytes.clone())])
            .await;
        let hash = res.body["items"][0]["content_hash"].as_str().unwrap();

        let object = app.get(&routes::object(hash)).await;
        assert_eq!(object.status, 200);
        assert_eq!(object.bytes, bytes);

        let unknown = app.get(&routes::object(&"0".repeat(64))).await;
        assert_eq!(unknown.status, 404);
    }
}
