use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;

use server::entity::{access_log, watermark_job};

use crate::common::{TestApp, routes};

async fn job_count(app: &TestApp, item_id: &str) -> u64 {
    watermark_job::Entity::find()
        .filter(watermark_job::Column::ItemId.eq(item_id))
        .count(&app.db)
        .await
        .unwrap()
}

#[tokio::test]
async fn first_reveal_produces_a_watermarked_copy_and_repeat_reuses_it() {
    let app = TestApp::spawn().await;
    let item_id = app.upload_png(11).await;

    let res = app
        .post(&routes::reveal(&item_id), &json!({"viewer_id": "42"}))
        .await;
    assert_eq!(res.status, 202, "{}", res.body);
    assert_eq!(res.body["status"], "processing");
    let job_id = res.body["job_id"].as_str().unwrap().to_string();

    let settled = app.poll_until_settled(&job_id, "42").await;
    assert_eq!(settled["status"], "ready", "{settled}");
    assert_eq!(settled["access_kind"], "first_view");
    let content_url = settled["content_url"].as_str().unwrap().to_string();

    let content = app.get(&content_url).await;
    assert_eq!(content.status, 200);
    let img = image::load_from_memory(&content.bytes).expect("artifact is an image");
    assert_eq!((img.width(), img.height()), (64, 48));

    // Polling again hands back the same entry instead of logging another view.
    let again = app.get(&routes::job(&job_id, "42")).await;
    assert_eq!(again.body["access_log_id"], settled["access_log_id"]);

    let repeat = app
        .post(&routes::reveal(&item_id), &json!({"viewer_id": "42"}))
        .await;
    assert_eq!(repeat.status, 200, "{}", repeat.body);
    assert_eq!(repeat.body["status"], "ready");
    assert_eq!(repeat.body["access_kind"], "repeat_view");
    assert_eq!(job_count(&app, &item_id).await, 1);

    let views = access_log::Entity::find()
        .filter(access_log::Column::ItemId.eq(item_id.as_str()))
        .all(&app.db)
        .await
        .unwrap();
    assert_eq!(views.len(), 2);
    assert!(views.iter().all(|v| v.viewer_id == "42"));
    assert_eq!(views[0].completed_job_id, views[1].completed_job_id);
}

#[tokio::test]
async fn each_viewer_gets_their_own_job() {
    let app = TestApp::spawn().await;
    let item_id = app.upload_png(12).await;

    let a = app
        .post(&routes::reveal(&item_id), &json!({"viewer_id": "alice"}))
        .await;
    let b = app
        .post(&routes::reveal(&item_id), &json!({"viewer_id": "bob"}))
        .await;

    assert_eq!((a.status, b.status), (202, 202));
    assert_ne!(a.body["job_id"], b.body["job_id"]);
    assert_eq!(job_count(&app, &item_id).await, 2);
}

#[tokio::test]
async fn asking_twice_while_processing_does_not_enqueue_again() {
    let app = TestApp::spawn().await;
    let item_id = app.upload_png(13).await;

    let first = app
        .post(&routes::reveal(&item_id), &json!({"viewer_id": "7"}))
        .await;
    let second = app
        .post(&routes::reveal(&item_id), &json!({"viewer_id": "7"}))
        .await;

    assert_eq!(job_count(&app, &item_id).await, 1);
    // The second request either joins the running job or finds it finished.
    match second.status {
        202 => assert_eq!(second.body["job_id"], first.body["job_id"]),
        200 => assert_eq!(second.body["status"], "ready"),
        other => panic!("unexpected status {other}: {}", second.body),
    }
}

#[tokio::test]
async fn jobs_are_private_to_their_viewer() {
    let app = TestApp::spawn().await;
    let item_id = app.upload_png(14).await;

    let res = app
        .post(&routes::reveal(&item_id), &json!({"viewer_id": "owner"}))
        .await;
    let job_id = res.body["job_id"].as_str().unwrap();

    let stranger = app.get(&routes::job(job_id, "someone-else")).await;
    assert_eq!(stranger.status, 404);
}

#[tokio::test]
async fn reveal_rejects_unknown_items_and_blank_viewers() {
    let app = TestApp::spawn().await;
    let item_id = app.upload_png(15).await;

    let missing = app
        .post(&routes::reveal("no-such-item"), &json!({"viewer_id": "1"}))
        .await;
    assert_eq!(missing.status, 404);

    let blank = app
        .post(&routes::reveal(&item_id), &json!({"viewer_id": "   "}))
        .await;
    assert_eq!(blank.status, 400);

    let content = app.get("/api/v1/reveals/no-such-entry/content").await;
    assert_eq!(content.status, 404);
}
