//! 集成测试的公共辅助函数和工具
#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;

use anyhow::Result;
use axum::{Router, extract::Request, http::StatusCode};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Value, json};
use tempfile::TempDir;

use zipemu::config::Settings;
use zipemu::http;

/// 测试服务器配置
#[derive(Debug, Default)]
pub struct TestServerConfig {
    pub upstream: Option<String>,
    pub cache_quota: Option<u64>,
    pub max_entry_size: Option<u64>,
}

/// 向系统申请一个空闲端口
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("Failed to find a free port")
}

/// 创建临时配置文件用于测试
pub fn create_temp_config(config: &TestServerConfig) -> Result<PathBuf> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("config.toml");

    // 使 temp_dir 不被自动删除（leak）
    let _ = Box::leak(Box::new(temp_dir));

    let mut config_content = String::from("log_level = \"debug\"\n\n[[host]]\n");
    config_content.push_str("ip = \"127.0.0.1\"\n");
    config_content.push_str(&format!("port = {}\n", free_port()));
    config_content.push_str("timeout = 10\n");
    config_content.push_str("proxy_timeout = 5\n");
    config_content.push_str("system_proxy = false\n");
    if let Some(upstream) = &config.upstream {
        config_content.push_str(&format!("upstream = \"{}\"\n", upstream));
    }
    if let Some(quota) = config.cache_quota {
        config_content.push_str(&format!("cache_quota = {}\n", quota));
    }
    if let Some(limit) = config.max_entry_size {
        config_content.push_str(&format!("max_entry_size = {}\n", limit));
    }

    std::fs::write(&config_path, config_content)?;
    Ok(config_path)
}

/// 启动测试服务器，返回句柄与实际监听地址
pub async fn start_test_server(
    config_path: &PathBuf,
) -> Result<(axum_server::Handle<SocketAddr>, SocketAddr)> {
    let settings = Settings::new(config_path.to_str().expect("Invalid path"))?;
    let host = settings.host.into_iter().next().expect("No host config");
    let server_handle = http::make_server(host).await?;
    let addr = get_server_addr(&server_handle).await;
    Ok((server_handle, addr))
}

/// 获取服务器实际监听地址
pub async fn get_server_addr(handle: &axum_server::Handle<SocketAddr>) -> SocketAddr {
    handle.listening().await.expect("Server not listening")
}

/// 启动一个模拟原站的上游服务，响应体为 `upstream:{path}`
pub async fn start_upstream() -> Result<(axum_server::Handle<SocketAddr>, SocketAddr)> {
    let router = Router::new().fallback(|req: Request| async move {
        (StatusCode::OK, format!("upstream:{}", req.uri()))
    });
    let handle = axum_server::Handle::new();
    let server = axum_server::bind("127.0.0.1:0".parse()?)
        .handle(handle.clone())
        .serve(router.into_make_service());
    tokio::spawn(server);
    let addr = get_server_addr(&handle).await;
    Ok((handle, addr))
}

/// 直连本机的客户端，不走系统代理
pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("Failed to build client")
}

/// 发送HTTP请求到测试服务器
pub async fn send_test_request(addr: SocketAddr, path: &str) -> Result<reqwest::Response> {
    let client = test_client();
    let url = format!("http://{}{}", addr, path);

    client.get(&url).send().await.map_err(Into::into)
}

/// 构造 `CACHE_ZIP_FILES` 消息
pub fn zip_files_message(files: &[(&str, &[u8])]) -> Value {
    let files: Vec<Value> = files
        .iter()
        .map(|(path, blob)| json!({ "path": path, "blob": STANDARD.encode(blob) }))
        .collect();
    json!({ "type": "CACHE_ZIP_FILES", "files": files })
}

/// 提交一批文件，返回响应状态与 JSON 响应体
pub async fn post_files(addr: SocketAddr, files: &[(&str, &[u8])]) -> Result<(u16, Value)> {
    post_message(addr, &zip_files_message(files)).await
}

pub async fn post_message(addr: SocketAddr, message: &Value) -> Result<(u16, Value)> {
    let client = test_client();
    let url = format!("http://{}/__emulation/files", addr);
    let response = client
        .post(&url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(message.to_string())
        .send()
        .await?;
    let status = response.status().as_u16();
    let body = serde_json::from_slice(&response.bytes().await?)?;
    Ok((status, body))
}
