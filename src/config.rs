use std::{collections::HashSet, fs, net::IpAddr};

use serde::Deserialize;
use url::Url;

use crate::{
    consts::{
        cache_name, control_path, log_folder, log_level, max_body_size, proxy_timeout,
        system_proxy, timeout_default,
    },
    error::{Error, Result},
    worker::{WorkerOptions, storage::CacheLimits},
};

#[derive(Deserialize, Clone, Debug)]
pub struct SettingHost {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    pub certificate: Option<String>,
    pub certificate_key: Option<String>,
    /// HTTP 请求超时（秒）
    #[serde(default = "timeout_default")]
    pub timeout: u16,
    /// worker 的 origin，默认为 `http(s)://ip:port`
    pub origin: Option<Url>,
    /// 缓存未命中时同源请求转发的地址
    pub upstream: Option<Url>,
    /// 访问网络的超时（秒）
    #[serde(default = "proxy_timeout")]
    pub proxy_timeout: u16,
    /// 访问网络时是否使用系统代理（HTTP_PROXY 等环境变量）
    #[serde(default = "system_proxy")]
    pub system_proxy: bool,
    #[serde(default = "cache_name")]
    pub cache_name: String,
    /// 导入与状态接口的路径前缀
    #[serde(default = "control_path")]
    pub control_path: String,
    /// 请求体大小上限（字节）
    #[serde(default = "max_body_size")]
    pub max_body_size: usize,
    /// 单个缓存文件的大小上限（字节）
    pub max_entry_size: Option<u64>,
    /// 整个缓存的大小上限（字节）
    pub cache_quota: Option<u64>,
}

impl SettingHost {
    pub fn scheme(&self) -> &'static str {
        if self.ssl { "https" } else { "http" }
    }

    /// worker 的 origin，未配置时由监听地址推导
    ///
    /// 监听 `0.0.0.0` 或 `::` 时没有客户端会以该地址作为 Host，
    /// 此时使用 `localhost`。
    pub fn origin(&self) -> Result<Url> {
        if let Some(origin) = &self.origin {
            return Ok(origin.clone());
        }
        let host = match self.ip.parse::<IpAddr>() {
            Ok(ip) if ip.is_unspecified() => "localhost".to_string(),
            Ok(IpAddr::V6(ip)) => format!("[{ip}]"),
            _ => self.ip.clone(),
        };
        Ok(Url::parse(&format!(
            "{}://{}:{}",
            self.scheme(),
            host,
            self.port
        ))?)
    }

    pub fn cache_limits(&self) -> CacheLimits {
        CacheLimits {
            max_entry_bytes: self.max_entry_size,
            quota_bytes: self.cache_quota,
        }
    }

    pub fn worker_options(&self) -> Result<WorkerOptions> {
        Ok(WorkerOptions {
            origin: self.origin()?,
            cache_name: self.cache_name.clone(),
            limits: self.cache_limits(),
        })
    }

    fn validate(&self) -> Result<()> {
        let addr = format!("{}:{}", self.ip, self.port);
        let origin = self.origin()?;
        if !matches!(origin.scheme(), "http" | "https") || origin.host().is_none() {
            return Err(Error::InvalidConfig(format!(
                "host {addr}: origin {origin} must be an http(s) url"
            )));
        }
        if origin.path() != "/" || origin.query().is_some() {
            return Err(Error::InvalidConfig(format!(
                "host {addr}: origin {origin} must not have a path or query"
            )));
        }
        if let Some(upstream) = &self.upstream
            && !matches!(upstream.scheme(), "http" | "https")
        {
            return Err(Error::InvalidConfig(format!(
                "host {addr}: upstream {upstream} must be an http(s) url"
            )));
        }
        if !self.control_path.starts_with('/') || self.control_path.len() < 2 {
            return Err(Error::InvalidConfig(format!(
                "host {addr}: control_path {:?} must start with '/' and not be the root",
                self.control_path
            )));
        }
        if self.ssl && (self.certificate.is_none() || self.certificate_key.is_none()) {
            return Err(Error::InvalidConfig(format!(
                "host {addr}: ssl enabled but certificate or certificate_key missing"
            )));
        }
        if self.cache_name.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "host {addr}: cache_name must not be empty"
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    #[serde(default = "log_level")]
    pub log_level: String,
    #[serde(default = "log_folder")]
    pub log_folder: String,
    pub host: Vec<SettingHost>,
}

impl Settings {
    /// 读取并校验配置文件
    pub fn new(path: &str) -> Result<Self> {
        let file = fs::read_to_string(path)?;
        let mut settings: Settings = toml::from_str(&file)?;
        for host in settings.host.iter_mut() {
            host.control_path = host.control_path.trim_end_matches('/').to_string();
        }
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::InvalidConfig("at least one [[host]] is required".into()));
        }
        let mut ports = HashSet::new();
        for host in &self.host {
            host.validate()?;
            // 端口 0 由系统分配，不会冲突
            if host.port != 0 && !ports.insert(host.port) {
                return Err(Error::InvalidConfig(format!(
                    "port {} is used by more than one host",
                    host.port
                )));
            }
        }
        Ok(())
    }
}
