use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::anyhow;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use http::StatusCode;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, error, info};

use crate::{
    config::{SettingHost, Settings},
    middlewares::{add_version, logging_route},
    worker::{self, Worker},
};

// 访问网络的 reqwest 客户端
pub mod client;
// 导入、状态与拦截接口
pub mod emulation;
pub mod error;

use client::HttpNetwork;
use emulation::AppState;

pub type ServerHandles = Arc<Mutex<Vec<Handle<SocketAddr>>>>;

/// 启动初始服务器实例
pub async fn start_initial_servers(settings: Settings) -> anyhow::Result<ServerHandles> {
    let handles = start_servers(settings.host).await;
    if handles.is_empty() {
        return Err(anyhow!("no server instance could be started"));
    }
    Ok(Arc::new(Mutex::new(handles)))
}

/// 处理配置文件变更的回调函数
///
/// 旧的服务器连同其 worker 一起停止，新的 worker 在安装时会清空缓存。
pub async fn handle_config_change(result: crate::error::Result<Settings>, handles: ServerHandles) {
    match result {
        Ok(new_settings) => {
            info!("Config file reloaded successfully");
            info!("Config file changed, restarting servers to apply new config...");

            let mut current_handles = handles.lock().await;
            shutdown_servers(&mut current_handles).await;

            let new_handles = start_servers(new_settings.host).await;
            *current_handles = new_handles;
            info!("All servers have been restarted successfully");
        }
        Err(e) => {
            error!("Failed to reload config file: {:?}", e);
        }
    }
}

/// 优雅关闭所有服务器
///
/// 服务器将在 30 秒内完成正在处理的请求后停止。
pub async fn shutdown_servers(handles: &mut Vec<Handle<SocketAddr>>) {
    for handle in handles.iter() {
        handle.graceful_shutdown(Some(Duration::from_secs(30)));
    }
    handles.clear();
    info!("All servers have been signaled to shut down");
}

/// 启动所有服务器
///
/// 单个服务器启动失败会被记录为错误日志，不会影响其他服务器的启动
pub async fn start_servers(hosts: Vec<SettingHost>) -> Vec<Handle<SocketAddr>> {
    let mut handles = Vec::new();
    for host in hosts {
        let server_addr = format!("{}:{}", host.ip, host.port);
        match make_server(host).await {
            Ok(handle) => {
                handles.push(handle);
                info!("Server instance started on {}", server_addr);
            }
            Err(e) => {
                error!(
                    "Failed to start server instance on {}: {:?}",
                    server_addr, e
                );
            }
        }
    }
    handles
}

/// 创建 worker 并完成安装与激活
pub async fn start_worker(host: &SettingHost) -> anyhow::Result<worker::WorkerHandle> {
    let options = host.worker_options()?;
    let network = HttpNetwork::new(
        options.origin.clone(),
        host.upstream.clone(),
        Duration::from_secs(host.proxy_timeout.into()),
        host.system_proxy,
    )?;
    let (handle, _task) = worker::spawn(Worker::new(options, Arc::new(network)));

    handle.install().await?;
    let claimed = handle.activate().await?;
    info!(
        "Worker for {} activated, cache {} claimed {} clients",
        handle.worker().origin(),
        handle.worker().cache_name(),
        claimed
    );
    Ok(handle)
}

/// 构建单个主机的路由
pub fn make_router(host: &SettingHost, worker: worker::WorkerHandle) -> Router {
    let state = AppState {
        worker,
        scheme: host.scheme(),
        max_body_size: host.max_body_size,
    };

    let files_path = format!("{}/files", host.control_path);
    let status_path = format!("{}/status", host.control_path);
    debug!("Route registered: {}", files_path);
    debug!("Route registered: {}", status_path);

    let router = Router::new()
        .route(&files_path, post(emulation::ingest))
        .route(&status_path, get(emulation::status))
        .fallback(emulation::intercept)
        .with_state(state)
        .layer(DefaultBodyLimit::max(host.max_body_size))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(add_version))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::SERVICE_UNAVAILABLE,
                    Duration::from_secs(host.timeout.into()),
                )),
        );

    logging_route(router)
}

pub async fn make_server(host: SettingHost) -> anyhow::Result<Handle<SocketAddr>> {
    debug!("make_server start with host: {:?}", host);
    let worker = start_worker(&host).await?;
    let router = make_router(&host, worker);

    let (ip, port, ssl, certificate, certificate_key) = (
        host.ip.clone(),
        host.port,
        host.ssl,
        host.certificate.clone(),
        host.certificate_key.clone(),
    );
    let addr = SocketAddr::new(ip.parse::<IpAddr>()?, port);

    let handle = Handle::new();
    let handle_clone = handle.clone();

    // 生成一个任务来运行服务器
    tokio::spawn(async move {
        let result = if ssl {
            match (certificate, certificate_key) {
                (Some(cert), Some(key)) => {
                    debug!("Certificate: {} Certificate key: {}", cert, key);
                    match RustlsConfig::from_pem_file(&cert, &key).await {
                        Ok(rustls_config) => {
                            info!("Listening on https://{}", addr);
                            axum_server::bind_rustls(addr, rustls_config)
                                .handle(handle_clone)
                                .serve(router.into_make_service())
                                .await
                                .map_err(anyhow::Error::from)
                        }
                        Err(e) => Err(anyhow::Error::from(e)),
                    }
                }
                _ => Err(anyhow!("SSL enabled but certificate or key missing")),
            }
        } else {
            info!("Listening on http://{}", addr);
            axum_server::bind(addr)
                .handle(handle_clone)
                .serve(router.into_make_service())
                .await
                .map_err(anyhow::Error::from)
        };
        if let Err(e) = result {
            error!("Server on {} stopped: {:?}", addr, e);
        }
    });

    Ok(handle)
}
