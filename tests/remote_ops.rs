//! End-to-end scenarios for the translation and caching layer, driven
//! against a mock of the remote SDK. Request counts are part of the
//! contract: the stat burst after a readdir must not touch the network.

use std::sync::Arc;

use wd_bridge::api_client::RemoteClient;
use wd_bridge::error::{ApiError, BridgeError};
use wd_bridge::fs::attr::{self, AttrInfo};
use wd_bridge::fs::{BridgeContext, create, delete, read, rename, write};
use wiremock::matchers::{body_string, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LIST_PATH: &str = "/sdk/v2/filesSearch/parents";

fn ctx_for(server: &MockServer) -> Arc<BridgeContext> {
    let client = RemoteClient::new().expect("client construction");
    client.install_session("test-id-token");
    client.set_endpoint(format!("{}/", server.uri()));
    Arc::new(BridgeContext::new(client))
}

fn json_listing(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "application/json")
}

const ROOT_LISTING: &str = r#"{"files":[
    {"id":"id-docs","mimeType":"application/x.wd.dir","name":"docs"},
    {"id":"id-notes","mimeType":"text/plain","name":"notes.txt","size":10}
]}"#;

const DOCS_CHILDREN_MULTI: &str = r#"{"files":[
    {"id":"id-sub","mimeType":"application/x.wd.dir","name":"sub","parentID":"id-docs"},
    {"id":"id-readme","mimeType":"text/plain","name":"readme","parentID":"id-docs"}
]}"#;

async fn mount_root_and_prefetch(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "root"))
        .respond_with(json_listing(ROOT_LISTING).insert_header("etag", "\"root-v1\""))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "id-docs"))
        .respond_with(json_listing(DOCS_CHILDREN_MULTI).insert_header("etag", "\"multi-v1\""))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn cold_readdir_populates_the_path_cache() {
    let server = MockServer::start().await;
    mount_root_and_prefetch(&server).await;
    let ctx = ctx_for(&server);

    let entries = read::readdir(&ctx, "/").await.unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["docs", "notes.txt"]);

    let docs = ctx.caches.path_id("/docs").unwrap();
    assert_eq!(docs.id, "id-docs");
    assert!(docs.is_dir);
    let notes = ctx.caches.path_id("/notes.txt").unwrap();
    assert_eq!(notes.id, "id-notes");
    assert!(!notes.is_dir);
}

#[tokio::test]
async fn stat_burst_after_readdir_needs_no_extra_network() {
    let server = MockServer::start().await;
    mount_root_and_prefetch(&server).await;
    let ctx = ctx_for(&server);

    read::readdir(&ctx, "/").await.unwrap();

    // One subdirectory under docs, ten bytes in notes.txt, both served from
    // the hot caches armed by the readdir.
    assert_eq!(
        attr::getattr(&ctx, "/docs").await.unwrap(),
        AttrInfo::Dir { subfolder_count: 1 }
    );
    assert_eq!(
        attr::getattr(&ctx, "/notes.txt").await.unwrap(),
        AttrInfo::File { size: 10 }
    );

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2, "only the listing and the prefetch");
}

#[tokio::test]
async fn second_readdir_revalidates_with_the_stored_etag() {
    let server = MockServer::start().await;
    let listing = r#"{"files":[{"id":"id-a","mimeType":"text/plain","name":"a.txt","size":1}]}"#;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "root"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "root"))
        .respond_with(json_listing(listing).insert_header("etag", "\"v1\""))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    let ctx = ctx_for(&server);

    let first = read::readdir(&ctx, "/").await.unwrap();
    let second = read::readdir(&ctx, "/").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn create_write_release_issues_the_resumable_sequence() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdk/v2/files/resumable"))
        .and(query_param("resolveNameConflict", "0"))
        .and(query_param("done", "false"))
        .and(body_string_contains("\"f.txt\""))
        .respond_with(ResponseTemplate::new(201).insert_header("location", "/sdk/v2/files/new-1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/sdk/v2/files/new-1/resumable/content"))
        .and(query_param("offset", "0"))
        .and(query_param("done", "false"))
        .and(body_string("hello"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/sdk/v2/files/new-1/resumable/content"))
        .and(query_param("done", "true"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    let ctx = ctx_for(&server);

    create::create(&ctx, "/f.txt").await.unwrap();

    // Between create and release the server does not list the file; it must
    // still stat as an empty regular file, with no round trip.
    assert_eq!(
        attr::getattr(&ctx, "/f.txt").await.unwrap(),
        AttrInfo::File { size: 0 }
    );
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    assert_eq!(write::write(&ctx, "/f.txt", 0, b"hello").await.unwrap(), 5);
    write::release(&ctx, "/f.txt").await.unwrap();

    assert_eq!(ctx.caches.path_id("/f.txt").unwrap().id, "new-1");
}

const DATA_ROOT_LISTING: &str = r#"{"files":[
    {"id":"id-data","mimeType":"application/octet-stream","name":"data.bin","size":10}
]}"#;

#[tokio::test]
async fn overwrite_goes_through_a_shadow_copy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "root"))
        .respond_with(json_listing(DATA_ROOT_LISTING).insert_header("etag", "\"root-v1\""))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sdk/v2/files/id-data"))
        .and(query_param("fields", "size"))
        .respond_with(json_listing(r#"{"size":10}"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sdk/v2/files/id-data/content"))
        .and(header("range", "bytes=0-9"))
        .respond_with(ResponseTemplate::new(206).set_body_raw("0123456789", "application/octet-stream"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sdk/v2/files/resumable"))
        .and(body_string_contains("data.bin.bridge_temp_file"))
        .respond_with(ResponseTemplate::new(201).insert_header("location", "/sdk/v2/files/temp-1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/sdk/v2/files/temp-1/resumable/content"))
        .and(query_param("offset", "0"))
        .and(query_param("done", "false"))
        .and(body_string("0123456789"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/sdk/v2/files/temp-1/resumable/content"))
        .and(query_param("offset", "2"))
        .and(query_param("done", "false"))
        .and(body_string("ABC"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/sdk/v2/files/temp-1/resumable/content"))
        .and(query_param("done", "true"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/sdk/v2/files/id-data"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sdk/v2/files/temp-1/patch"))
        .and(body_string_contains(r#""name":"data.bin""#))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    let ctx = ctx_for(&server);

    read::open(&ctx, "/data.bin", libc::O_WRONLY).await.unwrap();
    assert_eq!(write::write(&ctx, "/data.bin", 2, b"ABC").await.unwrap(), 3);
    write::release(&ctx, "/data.bin").await.unwrap();

    // The path now resolves to the finalized temp upload's id.
    assert_eq!(ctx.caches.path_id("/data.bin").unwrap().id, "temp-1");
}

#[tokio::test]
async fn truncate_shrink_copies_only_the_prefix() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "root"))
        .respond_with(json_listing(DATA_ROOT_LISTING).insert_header("etag", "\"root-v1\""))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sdk/v2/files/id-data"))
        .and(query_param("fields", "size"))
        .respond_with(json_listing(r#"{"size":10}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sdk/v2/files/id-data/content"))
        .and(header("range", "bytes=0-3"))
        .respond_with(ResponseTemplate::new(206).set_body_raw("0123", "application/octet-stream"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sdk/v2/files/resumable"))
        .and(body_string_contains("data.bin.bridge_temp_file"))
        .respond_with(ResponseTemplate::new(201).insert_header("location", "/sdk/v2/files/temp-9"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/sdk/v2/files/temp-9/resumable/content"))
        .and(query_param("offset", "0"))
        .and(body_string("0123"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    let ctx = ctx_for(&server);

    attr::truncate(&ctx, "/data.bin", 4).await.unwrap();
    assert_eq!(ctx.sessions.upload_id("/data.bin").as_deref(), Some("temp-9"));
}

#[tokio::test]
async fn truncate_to_at_least_the_current_size_is_a_noop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "root"))
        .respond_with(json_listing(DATA_ROOT_LISTING).insert_header("etag", "\"root-v1\""))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sdk/v2/files/id-data"))
        .and(query_param("fields", "size"))
        .respond_with(json_listing(r#"{"size":10}"#))
        .mount(&server)
        .await;
    let ctx = ctx_for(&server);

    attr::truncate(&ctx, "/data.bin", 10).await.unwrap();
    assert!(ctx.sessions.upload_id("/data.bin").is_none());
}

const TWO_DIR_ROOT: &str = r#"{"files":[
    {"id":"id-a","mimeType":"application/x.wd.dir","name":"a"},
    {"id":"id-b","mimeType":"application/x.wd.dir","name":"b"}
]}"#;

#[tokio::test]
async fn rename_across_directories_is_a_move_patch_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "root"))
        .and(header("if-none-match", "\"root-v1\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "root"))
        .respond_with(json_listing(TWO_DIR_ROOT).insert_header("etag", "\"root-v1\""))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "id-a"))
        .respond_with(
            json_listing(r#"{"files":[{"id":"id-x","mimeType":"text/plain","name":"x","size":5}]}"#)
                .insert_header("etag", "\"a-v1\""),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "id-b"))
        .respond_with(json_listing(r#"{"files":[]}"#).insert_header("etag", "\"b-v1\""))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sdk/v2/files/id-x/patch"))
        .and(body_string_contains(r#""parentID":"id-b""#))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    let ctx = ctx_for(&server);

    rename::rename(&ctx, "/a/x", "/b/x", libc::RENAME_NOREPLACE)
        .await
        .unwrap();

    // Same name, different parent: exactly one patch, and it is the move.
    let patches: Vec<_> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path().ends_with("/patch"))
        .collect();
    assert_eq!(patches.len(), 1);

    assert_eq!(ctx.caches.path_id("/a/x"), None);
    assert_eq!(ctx.caches.path_id("/b/x").unwrap().id, "id-x");
}

#[tokio::test]
async fn rename_noreplace_refuses_an_existing_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "root"))
        .respond_with(json_listing(ROOT_LISTING).insert_header("etag", "\"root-v1\""))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "root"))
        .and(header("if-none-match", "\"root-v1\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;
    let ctx = ctx_for(&server);

    let err = rename::rename(&ctx, "/docs", "/notes.txt", libc::RENAME_NOREPLACE)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::AlreadyExists));
    assert_eq!(err.errno(), libc::EEXIST);
}

#[tokio::test]
async fn rename_exchange_is_unsupported() {
    let server = MockServer::start().await;
    let ctx = ctx_for(&server);
    let err = rename::rename(&ctx, "/a", "/b", libc::RENAME_EXCHANGE)
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);
}

#[tokio::test]
async fn reading_an_empty_file_yields_zero_bytes() {
    let server = MockServer::start().await;
    let listing = r#"{"files":[{"id":"id-e","mimeType":"text/plain","name":"empty","size":0}]}"#;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "root"))
        .respond_with(json_listing(listing).insert_header("etag", "\"root-v1\""))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sdk/v2/files/id-e/content"))
        .respond_with(ResponseTemplate::new(416))
        .expect(1)
        .mount(&server)
        .await;
    let ctx = ctx_for(&server);

    let bytes = read::read(&ctx, "/empty", 0, 4096).await.unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn zero_length_reads_never_touch_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "root"))
        .respond_with(json_listing(ROOT_LISTING).insert_header("etag", "\"root-v1\""))
        .mount(&server)
        .await;
    let ctx = ctx_for(&server);

    // No content mock is mounted: a request for the file body would 404.
    let bytes = read::read(&ctx, "/notes.txt", 0, 0).await.unwrap();
    assert!(bytes.is_empty());

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| !r.url.path().ends_with("/content")));
}

#[tokio::test]
async fn missing_entries_resolve_to_enoent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "root"))
        .respond_with(json_listing(ROOT_LISTING).insert_header("etag", "\"root-v1\""))
        .mount(&server)
        .await;
    let ctx = ctx_for(&server);

    let err = attr::getattr(&ctx, "/ghost").await.unwrap_err();
    assert!(matches!(err, BridgeError::NotFound));
    assert_eq!(err.errno(), libc::ENOENT);
}

#[tokio::test]
async fn readdir_of_a_file_is_enotdir() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("ids", "root"))
        .respond_with(json_listing(ROOT_LISTING).insert_header("etag", "\"root-v1\""))
        .mount(&server)
        .await;
    let ctx = ctx_for(&server);

    let err = read::readdir(&ctx, "/notes.txt").await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOTDIR);
}

#[tokio::test]
async fn mkdir_then_rmdir_cleans_the_caches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdk/v2/files"))
        .and(query_param("resolveNameConflict", "true"))
        .and(body_string_contains("application/x.wd.dir"))
        .respond_with(ResponseTemplate::new(201).insert_header("location", "/sdk/v2/files/dir-1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/sdk/v2/files/dir-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    let ctx = ctx_for(&server);

    create::mkdir(&ctx, "/newdir").await.unwrap();
    let entry = ctx.caches.path_id("/newdir").unwrap();
    assert_eq!(entry.id, "dir-1");
    assert!(entry.is_dir);

    delete::rmdir(&ctx, "/newdir").await.unwrap();
    assert_eq!(ctx.caches.path_id("/newdir"), None);
}

#[tokio::test]
async fn writes_without_a_session_are_rejected() {
    let server = MockServer::start().await;
    let ctx = ctx_for(&server);
    let err = write::write(&ctx, "/anything", 0, b"x").await.unwrap_err();
    assert!(matches!(err, BridgeError::NoWriteSession));
    assert_eq!(err.errno(), libc::EBADF);
}

#[tokio::test]
async fn login_maps_401_to_bad_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/ro"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = RemoteClient::new().expect("client construction");
    client.set_auth_endpoint(server.uri());

    let err = client.login("someone", "wrong").await.unwrap_err();
    assert!(matches!(err, ApiError::BadCredentials));
}
