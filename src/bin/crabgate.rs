use anyhow::Context;
use clap::Parser;
use crabgate::camera::CameraSourceFactory;
use crabgate::config::GatewayConfig;
use crabgate::diagnostics;
use crabgate::platform::CapabilityReport;
use crabgate::server::{self, AppState};
use crabgate::session::SessionManager;
use crabgate::types::CameraBackend;
use crabgate::webrtc::WebRtcTransport;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "crabgate", version)]
#[command(about = "WebRTC gateway streaming a server-side camera to browsers")]
struct Cli {
    /// Camera backend: auto, generic or board
    #[arg(long)]
    camera_type: Option<CameraBackend>,

    /// Generic camera device index
    #[arg(long)]
    camera_id: Option<u32>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    fps: Option<u32>,

    /// Address to listen on [default: localhost]
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on [default: 8080]
    #[arg(long)]
    port: Option<u16>,

    /// TOML configuration file [default: crabgate.toml]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of static files served alongside the API
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Print camera and platform information and exit
    #[arg(long)]
    info: bool,

    /// Verify camera and transport setup and exit
    #[arg(long, conflicts_with = "info")]
    self_test: bool,
}

impl Cli {
    /// Apply command-line values over the loaded configuration
    fn apply(&self, config: &mut GatewayConfig) {
        if let Some(backend) = self.camera_type {
            config.camera.backend = backend;
        }
        if let Some(index) = self.camera_id {
            config.camera.device_index = index;
        }
        if let Some(width) = self.width {
            config.camera.width = width;
        }
        if let Some(height) = self.height {
            config.camera.height = height;
        }
        if let Some(fps) = self.fps {
            config.camera.fps = fps;
        }
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = &self.static_dir {
            config.server.static_dir = Some(dir.clone());
        }
    }
}

fn print_capabilities(report: &CapabilityReport) {
    println!("Platform:               {}", report.platform);
    println!(
        "Board camera library:   {}",
        if report.board_library_available {
            "available"
        } else {
            "not installed"
        }
    );
    println!("Recommended backend:    {}", report.recommended_backend);
    if report.available_cameras.is_empty() {
        println!("Cameras:                none found");
    } else {
        println!("Cameras:");
        for camera in &report.available_cameras {
            println!("  - {}", camera);
        }
    }
    let camera = &report.current_config;
    println!(
        "Configuration:          {} camera {}, {}x{} @ {} fps",
        camera.backend, camera.device_index, camera.width, camera.height, camera.fps
    );
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    crabgate::init_logging();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(GatewayConfig::default_path);
    let mut config = GatewayConfig::load_from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let factory = CameraSourceFactory::system();
    let detector = factory.detector().clone();

    if cli.info {
        let camera = config.camera.clone();
        let report = tokio::task::spawn_blocking(move || detector.capability_report(&camera)).await?;
        print_capabilities(&report);
        return Ok(());
    }

    let transport = WebRtcTransport::new(config.webrtc.clone()).context("creating WebRTC transport")?;

    if cli.self_test {
        let report = diagnostics::run_self_test(&factory, &config.camera, &transport).await;
        println!("{}", report);
        std::process::exit(if report.passed() { 0 } else { 1 });
    }

    let startup_detector = detector.clone();
    let camera = config.camera.clone();
    let report = tokio::task::spawn_blocking(move || startup_detector.capability_report(&camera)).await?;
    log::info!(
        "Platform {} | board library {} | recommended backend {} | cameras: [{}]",
        report.platform,
        report.board_library_available,
        report.recommended_backend,
        report.available_cameras.join(", ")
    );
    log::info!(
        "Camera {} (index {}) at {}x{}@{}fps",
        config.camera.backend,
        config.camera.device_index,
        config.camera.width,
        config.camera.height,
        config.camera.fps
    );

    let manager = SessionManager::new(config.camera.clone(), factory, Arc::new(transport));
    let state = AppState {
        manager,
        detector,
        static_dir: config.server.static_dir.clone(),
    };

    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {}", address))?;
    log::info!("Serving on http://{} (Ctrl+C to stop)", address);

    server::run(listener, state, shutdown_signal()).await?;
    log::info!("crabgate stopped");
    Ok(())
}
