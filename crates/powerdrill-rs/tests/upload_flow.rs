//! Multipart upload against a mock API and mock storage.

mod common;

use std::path::PathBuf;

use common::{API_KEY, MockState, USER_ID};
use powerdrill_rs::PowerdrillError;
use powerdrill_rs::resources::DataSourceInput;
use powerdrill_rs::upload::UploadOptions;
use serde_json::json;
use tempfile::TempDir;

const INIT: &str = "/api/v2/team/file/init-multipart-upload";
const COMPLETE: &str = "/api/v2/team/file/complete-multipart-upload";

fn fixture(len: usize) -> (TempDir, PathBuf, Vec<u8>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sales.csv");
    let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, &bytes).unwrap();
    (dir, path, bytes)
}

#[tokio::test]
async fn parts_upload_in_order_then_complete_once() {
    let (_dir, path, bytes) = fixture(25);
    let (state, base) = common::spawn(MockState {
        plan_sizes: vec![10, 10, 5],
        reverse_plan: true,
        ..Default::default()
    })
    .await;

    let key = common::client(&base)
        .upload_file(&path, &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(key, "uploads/user-1/sales.csv");

    let s = state.lock().unwrap();
    assert_eq!(s.log, vec!["init", "part:1", "part:2", "part:3", "complete"]);

    let uploaded: Vec<u8> = s.parts.iter().flat_map(|(_, b)| b.clone()).collect();
    assert_eq!(uploaded, bytes);

    let init = s.requests_to("POST", INIT);
    assert_eq!(init.len(), 1);
    assert_eq!(init[0].body["file_name"], "sales.csv");
    assert_eq!(init[0].body["file_size"], 25);
    assert_eq!(init[0].body["user_id"], USER_ID);
    assert_eq!(init[0].api_key.as_deref(), Some(API_KEY));

    let complete = s.requests_to("POST", COMPLETE);
    assert_eq!(complete.len(), 1);
    assert_eq!(complete[0].body["upload_id"], "up-1");
    assert_eq!(complete[0].body["file_object_key"], "uploads/user-1/sales.csv");
    assert_eq!(
        complete[0].body["part_etags"],
        json!([
            {"number": 1, "etag": "etag-1"},
            {"number": 2, "etag": "etag-2"},
            {"number": 3, "etag": "etag-3"},
        ])
    );
}

#[tokio::test]
async fn concurrent_upload_keeps_part_order() {
    let (_dir, path, bytes) = fixture(16);
    let (state, base) = common::spawn(MockState {
        plan_sizes: vec![4, 4, 4, 4],
        ..Default::default()
    })
    .await;

    common::client(&base)
        .upload_file(&path, &UploadOptions::with_concurrency(3))
        .await
        .unwrap();

    let s = state.lock().unwrap();
    assert_eq!(s.parts.len(), 4);
    for (number, body) in &s.parts {
        let start = (*number as usize - 1) * 4;
        assert_eq!(body.as_slice(), &bytes[start..start + 4], "part {number}");
    }
    assert_eq!(s.log.last().map(String::as_str), Some("complete"));

    let complete = s.requests_to("POST", COMPLETE);
    let numbers: Vec<u64> = complete[0].body["part_etags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["number"].as_u64().unwrap())
        .collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn failed_part_skips_completion() {
    let (_dir, path, _) = fixture(30);
    let (state, base) = common::spawn(MockState {
        plan_sizes: vec![10, 10, 10],
        fail_part: Some(2),
        ..Default::default()
    })
    .await;

    let err = common::client(&base)
        .upload_file(&path, &UploadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PowerdrillError::HttpStatus { status: 500, .. }));

    let s = state.lock().unwrap();
    assert_eq!(s.log, vec!["init", "part:1", "fail:2"]);
    assert!(s.requests_to("POST", COMPLETE).is_empty());
}

#[tokio::test]
async fn concurrent_part_failure_skips_completion() {
    let (_dir, path, _) = fixture(40);
    let (state, base) = common::spawn(MockState {
        plan_sizes: vec![10, 10, 10, 10],
        fail_part: Some(2),
        ..Default::default()
    })
    .await;

    let err = common::client(&base)
        .upload_file(&path, &UploadOptions::with_concurrency(3))
        .await
        .unwrap_err();
    assert!(matches!(err, PowerdrillError::HttpStatus { status: 500, .. }));

    let s = state.lock().unwrap();
    assert!(s.log.contains(&"fail:2".to_string()));
    assert!(!s.log.contains(&"complete".to_string()));
    assert!(s.requests_to("POST", COMPLETE).is_empty());
}

#[tokio::test]
async fn mismatched_plan_fails_before_any_part() {
    let (_dir, path, _) = fixture(25);
    let (state, base) = common::spawn(MockState {
        plan_sizes: vec![10],
        ..Default::default()
    })
    .await;

    let err = common::client(&base)
        .upload_file(&path, &UploadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PowerdrillError::Protocol(_)));

    let s = state.lock().unwrap();
    assert_eq!(s.log, vec!["init"]);
    assert!(s.parts.is_empty());
}

#[tokio::test]
async fn missing_file_never_calls_the_api() {
    let (state, base) = common::spawn(MockState::default()).await;
    let dir = tempfile::tempdir().unwrap();

    let err = common::client(&base)
        .upload_file(&dir.path().join("nope.csv"), &UploadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PowerdrillError::NotFound(_)));

    // A directory is not an uploadable file either.
    let err = common::client(&base)
        .upload_file(dir.path(), &UploadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PowerdrillError::NotFound(_)));

    assert!(state.lock().unwrap().requests.is_empty());
}

#[tokio::test]
async fn upload_then_register_data_source() {
    let (_dir, path, _) = fixture(8);
    let (state, base) = common::spawn(MockState {
        plan_sizes: vec![8],
        ..Default::default()
    })
    .await;

    let source = common::client(&base)
        .upload_and_create_data_source("ds-1", &path, &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(source.id, "src-1");
    assert_eq!(source.name, "sales.csv");
    assert_eq!(source.kind.as_deref(), Some("FILE"));

    let s = state.lock().unwrap();
    let created = s.requests_to("POST", "/api/v2/team/datasets/ds-1/datasources");
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].body["file_object_key"], "uploads/user-1/sales.csv");
    assert_eq!(created[0].body["user_id"], USER_ID);
    assert!(created[0].body.get("url").is_none());
}

#[tokio::test]
async fn data_source_from_url() {
    let (state, base) = common::spawn(MockState::default()).await;

    let input = DataSourceInput::Url("https://example.com/sales.csv".into());
    common::client(&base)
        .create_data_source("ds-1", "remote", &input)
        .await
        .unwrap();

    let s = state.lock().unwrap();
    let created = s.requests_to("POST", "/api/v2/team/datasets/ds-1/datasources");
    assert_eq!(created[0].body["url"], "https://example.com/sales.csv");
    assert!(created[0].body.get("file_object_key").is_none());
}
