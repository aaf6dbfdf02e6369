//! HTTP-level tests for GeminiClient against a wiremock server

use std::time::Duration;

use ragsync_remote::{
    wait_for_operation, GeminiClient, PollConfig, QueryRequest, RemoteError, RemoteGateway,
    UploadBody, UploadRequest,
};
use secrecy::SecretString;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup() -> (MockServer, GeminiClient) {
    let server = MockServer::start().await;
    let client = GeminiClient::with_base_urls(
        SecretString::from("test-key".to_string()),
        format!("{}/v1beta", server.uri()),
        format!("{}/upload/v1beta", server.uri()),
    );
    (server, client)
}

fn upload_request(content: &[u8]) -> UploadRequest {
    UploadRequest {
        display_name: "/home/u/notes/a.md".into(),
        mime_type: "text/markdown".into(),
        custom_metadata: vec![ragsync_remote::CustomMetadata::string(
            "checksum",
            "sha256:abc",
        )],
        body: UploadBody::Bytes(content.to_vec()),
    }
}

#[tokio::test]
async fn list_documents_follows_pages_and_parses_string_sizes() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1beta/fileSearchStores/s1/documents"))
        .and(query_param("pageToken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "documents": [
                {"name": "fileSearchStores/s1/documents/d2", "displayName": "/b", "sizeBytes": "20"}
            ]
        })))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1beta/fileSearchStores/s1/documents"))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "documents": [
                {
                    "name": "fileSearchStores/s1/documents/d1",
                    "displayName": "/a",
                    "sizeBytes": "1048576",
                    "customMetadata": [{"key": "checksum", "stringValue": "sha256:aa"}]
                }
            ],
            "nextPageToken": "p2"
        })))
        .mount(&server)
        .await;

    let docs = client.list_documents("s1").await.expect("list documents");
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].size_bytes, 1_048_576);
    assert_eq!(docs[0].checksum(), Some("sha256:aa"));
    assert_eq!(docs[1].name, "fileSearchStores/s1/documents/d2");
    assert_eq!(docs[1].size_bytes, 20);
}

#[tokio::test]
async fn get_store_404_is_not_found() {
    let (server, client) = setup().await;
    Mock::given(method("GET"))
        .and(path("/v1beta/fileSearchStores/nope"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let err = client.get_store("nope").await.unwrap_err();
    assert!(err.is_not_found(), "got {err}");
}

#[tokio::test]
async fn delete_document_is_forced_and_reports_status() {
    let (server, client) = setup().await;
    Mock::given(method("DELETE"))
        .and(path("/v1beta/fileSearchStores/s1/documents/d1"))
        .and(query_param("force", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1beta/fileSearchStores/s1/documents/d2"))
        .respond_with(ResponseTemplate::new(400).set_body_string("FAILED_PRECONDITION"))
        .mount(&server)
        .await;

    client
        .delete_document("fileSearchStores/s1/documents/d1")
        .await
        .expect("delete d1");

    let err = client
        .delete_document("fileSearchStores/s1/documents/d2")
        .await
        .unwrap_err();
    match err {
        RemoteError::Status { status, body, op, .. } => {
            assert_eq!(status, 400);
            assert_eq!(op, "delete_document");
            assert!(body.contains("FAILED_PRECONDITION"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn upload_returning_document_is_already_done() {
    let (server, client) = setup().await;
    Mock::given(method("POST"))
        .and(path("/upload/v1beta/fileSearchStores/s1:uploadToFileSearchStore"))
        .and(header("X-Goog-Upload-Protocol", "multipart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "fileSearchStores/s1/documents/new1",
            "displayName": "/home/u/notes/a.md",
            "sizeBytes": "5"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let op = client
        .upload("fileSearchStores/s1", upload_request(b"hello"))
        .await
        .expect("upload");
    assert!(op.done);
    assert_eq!(op.document_name(), Some("fileSearchStores/s1/documents/new1"));
}

#[tokio::test]
async fn upload_returning_operation_is_polled() {
    let (server, client) = setup().await;
    Mock::given(method("POST"))
        .and(path("/upload/v1beta/fileSearchStores/s1:uploadToFileSearchStore"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "fileSearchStores/s1/upload/operations/op1",
            "done": false
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1beta/fileSearchStores/s1/upload/operations/op1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "fileSearchStores/s1/upload/operations/op1",
            "done": true,
            "response": {
                "@type": concat!(
                    "type.googleapis.com/",
                    "google.ai.generativelanguage.v1main.UploadToFileSearchStoreResponse"
                ),
                "documentName": "fileSearchStores/s1/documents/new2"
            }
        })))
        .mount(&server)
        .await;

    let op = client.upload("s1", upload_request(b"hello")).await.expect("upload");
    assert!(!op.done);

    let poll = PollConfig {
        interval: Duration::from_millis(10),
        timeout: Some(Duration::from_secs(5)),
    };
    let done = wait_for_operation(&client, op, poll).await.expect("poll");
    assert_eq!(done.document_name(), Some("fileSearchStores/s1/documents/new2"));
}

#[tokio::test]
async fn upload_rejects_oversized_metadata_without_network() {
    let (server, client) = setup().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut req = upload_request(b"x");
    req.custom_metadata[0].string_value = Some("x".repeat(300));
    let err = client.upload("s1", req).await.unwrap_err();
    assert!(matches!(err, RemoteError::InvalidRequest(_)));
}

#[tokio::test]
async fn resolve_store_by_display_name_lists_all_pages() {
    let (server, client) = setup().await;
    Mock::given(method("GET"))
        .and(path("/v1beta/fileSearchStores"))
        .and(query_param("pageToken", "next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "fileSearchStores": [
                {"name": "fileSearchStores/research-x9", "displayName": "research"}
            ]
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1beta/fileSearchStores"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "fileSearchStores": [
                {"name": "fileSearchStores/notes-a1", "displayName": "notes"}
            ],
            "nextPageToken": "next"
        })))
        .mount(&server)
        .await;

    let resolved = client.resolve_store("research").await.expect("resolve");
    assert_eq!(resolved.id, "fileSearchStores/research-x9");
    assert_eq!(resolved.key(), "research-x9");
}

#[tokio::test]
async fn query_sends_file_search_tool_and_collects_citations() {
    let (server, client) = setup().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-3-flash-preview:generateContent"))
        .and(body_partial_json(serde_json::json!({
            "tools": [{"fileSearch": {
                "fileSearchStoreNames": ["fileSearchStores/s1"],
                "metadataFilter": "author=\"kim\""
            }}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "The answer "}, {"text": "is 42."}]},
                "groundingMetadata": {"groundingChunks": [
                    {"retrievedContext": {"title": "a.md", "uri": "", "text": "forty-two"}}
                ]}
            }]
        })))
        .mount(&server)
        .await;

    let answer = client
        .query(&QueryRequest {
            model: "gemini-3-flash-preview".into(),
            question: "what is the answer?".into(),
            stores: vec!["s1".into()],
            metadata_filter: Some("author=\"kim\"".into()),
        })
        .await
        .expect("query");
    assert_eq!(answer.text, "The answer is 42.");
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.citations[0].title, "a.md");
}
