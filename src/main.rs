use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use zipemu::{
    cli::Cli,
    config::Settings,
    http::{handle_config_change, start_initial_servers},
    utils::{init_logger, print_banner, shutdown_application, start_config_watcher},
};

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings = Settings::new(&args.config).with_context(|| "init config failed")?;
    if args.check {
        println!("{}: ok, {} host(s)", args.config, settings.host.len());
        return Ok(());
    }

    let _guard = init_logger(settings.log_level.as_str(), settings.log_folder.as_str())
        .with_context(|| "init logger failed")?;
    print_banner(&settings);

    let handles = start_initial_servers(settings).await?;

    // 配置变化时在 tokio 运行时中重启所有服务器
    let runtime = tokio::runtime::Handle::current();
    let watcher_handles = handles.clone();
    let stop_tx = start_config_watcher(&args.config, move |result| {
        let handles = watcher_handles.clone();
        runtime.spawn(handle_config_change(result, handles));
    })
    .map_err(|e| {
        error!("Failed to watch config file: {:?}", e);
        e
    })?;

    info!("Server started");

    tokio::signal::ctrl_c().await?;
    shutdown_application(handles, stop_tx).await;

    Ok(())
}
