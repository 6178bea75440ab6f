//! Waveplus Bridge - Airthings Wave Plus 蓝牙桥接服务

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, layer::SubscriberExt, util::SubscriberInitExt};

use waveplus_bridge::{
    ble::{BleAdapter, EmulatedAdapter},
    config::{Cli, LoggingSettings, Settings},
    middleware::RequestLogger,
    routes,
    services::{AlertEngine, DeviceService, MqttPublisher, RetryPolicy, Scheduler, SeriesStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载环境变量
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::load(&cli).context("配置加载失败")?;

    init_tracing(&settings.logging).context("日志初始化失败")?;
    info!(version = env!("CARGO_PKG_VERSION"), "Waveplus Bridge 启动中...");

    let devices = settings.parsed_devices()?;
    let policy = settings.decimation_policy()?;

    // 蓝牙适配器
    let adapter: Arc<dyn BleAdapter> = if settings.emulation {
        let serials: Vec<&str> = devices.iter().map(|d| d.serial.as_str()).collect();
        info!(devices = serials.len(), "使用模拟设备");
        Arc::new(EmulatedAdapter::new(&serials))
    } else {
        system_adapter().await?
    };
    let device_service = DeviceService::new(
        adapter,
        Duration::from_millis(settings.ble.scan_timeout_ms),
    );

    // 时序存储
    let store = Arc::new(SeriesStore::new(
        &devices,
        settings.data_retention,
        settings.storage.csv.clone(),
    ));
    let report = store.restore().context("采样日志恢复失败")?;
    info!(
        restored = report.restored,
        expired = report.expired,
        malformed = report.malformed,
        records = store.record_count(),
        "采样日志恢复完成"
    );

    let alerts = AlertEngine::from_settings(&settings)?;

    let retry = RetryPolicy::new(
        settings.retries,
        Duration::from_secs(settings.retry_delay.max(0) as u64),
    );
    let mut scheduler = Scheduler::new(
        devices,
        device_service,
        store.clone(),
        alerts,
        Duration::from_secs(settings.period),
        retry,
    );
    if let Some(mqtt) = &settings.mqtt {
        scheduler = scheduler.with_publisher(MqttPublisher::connect(mqtt)?);
    }

    // HTTP 服务
    let http = if settings.http.enabled {
        let server_addr = settings.server_addr();
        let workers = if settings.http.workers == 0 {
            num_cpus::get()
        } else {
            settings.http.workers
        };
        info!(addr = %server_addr, workers = workers, "HTTP 服务启动");

        let store_data = store.clone();
        let server = HttpServer::new(move || {
            App::new()
                .wrap(Cors::permissive())
                .wrap(RequestLogger::new())
                .app_data(web::Data::new(store_data.clone()))
                .app_data(web::Data::new(policy.clone()))
                .configure(routes::configure)
        })
        .workers(workers)
        .disable_signals()
        .bind(&server_addr)
        .with_context(|| format!("无法监听 {}", server_addr))?
        .run();

        let handle = server.handle();
        tokio::spawn(server);
        Some(handle)
    } else {
        None
    };

    // 停止信号
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("收到停止信号");
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;

    if let Some(handle) = http {
        handle.stop(true).await;
    }
    info!("Waveplus Bridge 已停止");
    Ok(())
}

#[cfg(feature = "bluetooth")]
async fn system_adapter() -> anyhow::Result<Arc<dyn BleAdapter>> {
    let adapter = waveplus_bridge::ble::BluetoothAdapter::first()
        .await
        .context("蓝牙适配器初始化失败")?;
    Ok(Arc::new(adapter))
}

#[cfg(not(feature = "bluetooth"))]
async fn system_adapter() -> anyhow::Result<Arc<dyn BleAdapter>> {
    anyhow::bail!("当前构建未启用 bluetooth 特性，请以 --features bluetooth 重新构建或使用 --emulation 运行");
}

/// 等待 Ctrl-C 或 SIGTERM
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "无法监听 SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// 初始化日志系统
///
/// `RUST_LOG` 优先于配置中的级别。
fn init_tracing(logging: &LoggingSettings) -> anyhow::Result<()> {
    let default_filter = if logging.level == "info" {
        "info,waveplus_bridge=debug".to_string()
    } else {
        logging.level.clone()
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let (writer, ansi) = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("无法打开日志文件 {}", path.display()))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(ansi)
        .with_writer(writer);

    if logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .init();
    }
    Ok(())
}
