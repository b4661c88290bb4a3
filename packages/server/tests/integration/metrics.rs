use chrono::Utc;
use common::{JobStatus, MediaType};
use sea_orm::{ActiveModelTrait, Set};

use server::entity::watermark_job;

use crate::common::{TestApp, routes};

async fn insert_job(app: &TestApp, item_id: &str, viewer_id: &str, status: JobStatus) {
    let now = Utc::now();
    watermark_job::ActiveModel {
        id: Set(uuid::Uuid::now_v7().to_string()),
        item_id: Set(item_id.to_string()),
        viewer_id: Set(viewer_id.to_string()),
        media_type: Set(MediaType::Image),
        watermark_text: Set(common::watermark::encode(viewer_id, now)),
        status: Set(status),
        attempts: Set(0),
        artifact_hash: Set(None),
        artifact_content_type: Set(None),
        artifact_size: Set(None),
        error_code: Set(None),
        error_message: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&app.db)
    .await
    .expect("Failed to insert job");
}

#[tokio::test]
async fn idle_queue_reports_zero() {
    let app = TestApp::spawn().await;

    let res = app.get(routes::METRICS).await;

    assert_eq!(res.status, 200, "{}", res.body);
    assert_eq!(res.body["waiting_count"], 0);
    assert_eq!(res.body["active_count"], 0);
    assert_eq!(res.body["total"], 0);
}

#[tokio::test]
async fn counts_only_unfinished_jobs() {
    let app = TestApp::spawn().await;
    let item_id = app.upload_png(31).await;
    insert_job(&app, &item_id, "1", JobStatus::Queued).await;
    insert_job(&app, &item_id, "2", JobStatus::Queued).await;
    insert_job(&app, &item_id, "3", JobStatus::Active).await;
    insert_job(&app, &item_id, "4", JobStatus::Completed).await;
    insert_job(&app, &item_id, "5", JobStatus::Failed).await;

    let res = app.get(routes::METRICS).await;

    assert_eq!(res.status, 200, "{}", res.body);
    assert_eq!(res.body["waiting_count"], 2);
    assert_eq!(res.body["active_count"], 1);
    assert_eq!(res.body["total"], 3);
}
