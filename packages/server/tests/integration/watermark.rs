use chrono::{TimeZone, Utc};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;

use common::watermark;
use server::entity::watermark_job;

use crate::common::{TestApp, routes};

#[tokio::test]
async fn decodes_a_mark_back_to_its_viewer() {
    let app = TestApp::spawn().await;
    let issued = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let text = watermark::encode("123456789", issued);

    let res = app.get(&routes::watermark(&text)).await;

    assert_eq!(res.status, 200, "{}", res.body);
    assert_eq!(res.body["viewer_id"], "123456789");
    assert_eq!(
        res.body["issued_at"].as_str().unwrap().parse::<chrono::DateTime<Utc>>().unwrap(),
        issued
    );
}

#[tokio::test]
async fn garbage_is_not_a_mark() {
    let app = TestApp::spawn().await;
    let res = app.get(&routes::watermark("not a mark")).await;
    assert_eq!(res.status, 400);
    assert_eq!(res.body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn mark_issued_for_a_reveal_names_the_viewer() {
    let app = TestApp::spawn().await;
    let item_id = app.upload_png(21).await;
    app.post(&routes::reveal(&item_id), &json!({"viewer_id": "user-77"}))
        .await;

    let job = watermark_job::Entity::find()
        .filter(watermark_job::Column::ItemId.eq(item_id.as_str()))
        .one(&app.db)
        .await
        .unwrap()
        .expect("job was queued");

    let res = app.get(&routes::watermark(&job.watermark_text)).await;
    assert_eq!(res.status, 200, "{}", res.body);
    assert_eq!(res.body["viewer_id"], "user-77");
}
