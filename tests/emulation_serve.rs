//! 导入与拦截的端到端测试

use anyhow::Result;
use serde_json::json;
use serial_test::serial;

mod common;
use common::*;

#[tokio::test]
#[serial]
async fn test_ingest_then_serve_from_cache() -> Result<()> {
    let config_path = create_temp_config(&TestServerConfig::default())?;
    let (_server_handle, server_addr) = start_test_server(&config_path).await?;

    let (status, reply) = post_files(
        server_addr,
        &[
            ("/index.html", "<h1>Preview</h1>".as_bytes()),
            ("css/site.css", "body { margin: 0 }".as_bytes()),
        ],
    )
    .await?;
    assert_eq!(status, 200);
    assert_eq!(reply["type"], "CACHE_COMPLETE");
    assert_eq!(
        reply["message"],
        "Emulation ready! Successfully cached 2 files from the ZIP."
    );
    assert_eq!(reply["report"]["failures"], json!([]));

    let response = send_test_request(server_addr, "/index.html").await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/html");
    assert_eq!(response.headers()["server"], "zipemu");
    assert_eq!(response.text().await?, "<h1>Preview</h1>");

    // 相对路径同样解析到站点根目录
    let response = send_test_request(server_addr, "/css/site.css").await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/css");
    assert_eq!(response.text().await?, "body { margin: 0 }");

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_miss_is_forwarded_to_upstream() -> Result<()> {
    let (_upstream_handle, upstream_addr) = start_upstream().await?;
    let config = TestServerConfig {
        upstream: Some(format!("http://{}/", upstream_addr)),
        ..TestServerConfig::default()
    };
    let config_path = create_temp_config(&config)?;
    let (_server_handle, server_addr) = start_test_server(&config_path).await?;

    post_files(server_addr, &[("/index.html", "cached".as_bytes())]).await?;

    let response = send_test_request(server_addr, "/api/items?page=2").await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await?, "upstream:/api/items?page=2");

    let response = send_test_request(server_addr, "/index.html").await?;
    assert_eq!(response.text().await?, "cached");

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_miss_without_upstream_is_bad_gateway() -> Result<()> {
    let config_path = create_temp_config(&TestServerConfig::default())?;
    let (_server_handle, server_addr) = start_test_server(&config_path).await?;

    let response = send_test_request(server_addr, "/missing.png").await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = serde_json::from_slice(&response.bytes().await?)?;
    assert_eq!(body["code"], 1003);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_new_batch_replaces_previous_site() -> Result<()> {
    let config_path = create_temp_config(&TestServerConfig::default())?;
    let (_server_handle, server_addr) = start_test_server(&config_path).await?;

    post_files(
        server_addr,
        &[("/index.html", "first".as_bytes()), ("/old.js", "old".as_bytes())],
    )
    .await?;
    post_files(server_addr, &[("/index.html", "second".as_bytes())]).await?;

    let response = send_test_request(server_addr, "/index.html").await?;
    assert_eq!(response.text().await?, "second");

    // 上一批次的文件不再命中
    let response = send_test_request(server_addr, "/old.js").await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_partial_failure_is_reported() -> Result<()> {
    let config = TestServerConfig {
        max_entry_size: Some(8),
        ..TestServerConfig::default()
    };
    let config_path = create_temp_config(&config)?;
    let (_server_handle, server_addr) = start_test_server(&config_path).await?;

    let (status, reply) = post_files(
        server_addr,
        &[("/small.txt", "tiny".as_bytes()), ("/large.txt", "far too large".as_bytes())],
    )
    .await?;
    assert_eq!(status, 200);
    assert_eq!(reply["report"]["total"], 2);
    assert_eq!(reply["report"]["stored"], 1);
    assert_eq!(reply["report"]["failures"][0]["path"], "/large.txt");
    assert_eq!(
        reply["message"],
        "Emulation ready with errors: cached 1 of 2 files from the ZIP, 1 failed."
    );

    let response = send_test_request(server_addr, "/small.txt").await?;
    assert_eq!(response.text().await?, "tiny");

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_unknown_message_type() -> Result<()> {
    let config_path = create_temp_config(&TestServerConfig::default())?;
    let (_server_handle, server_addr) = start_test_server(&config_path).await?;

    let (status, body) = post_message(server_addr, &json!({ "type": "PING" })).await?;
    assert_eq!(status, 400);
    assert_eq!(body["code"], 1001);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_status_reports_cache() -> Result<()> {
    let config_path = create_temp_config(&TestServerConfig::default())?;
    let (_server_handle, server_addr) = start_test_server(&config_path).await?;

    post_files(server_addr, &[("/a.txt", "12345".as_bytes()), ("/b.txt", "678".as_bytes())]).await?;

    let response = send_test_request(server_addr, "/__emulation/status").await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let status: serde_json::Value = serde_json::from_slice(&response.bytes().await?)?;
    assert_eq!(status["state"], "activated");
    assert_eq!(status["bucket"], "ready");
    assert_eq!(status["entries"], 2);
    assert_eq!(status["bytes"], 8);
    assert!(status["updated_at"].is_string());
    assert_eq!(status["clients"], 0);

    Ok(())
}
