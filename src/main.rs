//! # Aura 백엔드 진입점
//!
//! 이 파일이 수행하는 작업:
//! 1. 환경변수(.env) 로딩
//! 2. 로깅(tracing) 초기화
//! 3. 설정 로딩 (`hash-password` 하위 명령이면 해시만 출력하고 종료)
//! 4. Plex 클라이언트 식별자 로딩 (첫 실행이면 생성)
//! 5. 임시 이미지 디렉토리 생성
//! 6. API 라우터 설정
//! 7. HTTP 서버 시작 (Ctrl+C로 정상 종료)

use anyhow::Result; // anyhow::Result: 어떤 에러 타입이든 담을 수 있는 범용 Result 타입
use aura::config::{self, Config};
use aura::plex::{PlexClient, PlexIdentity};
use aura::routes::{self, build_router, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt}; // 로깅 초기화 유틸리티

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1단계: 환경변수 로딩 ──
    // .env 파일이 없어도 에러 없이 넘어갑니다.
    dotenvy::dotenv().ok();

    // ── 2단계: 로깅(tracing) 초기화 ──
    // RUST_LOG가 없으면 aura와 tower_http를 debug 레벨로 출력합니다.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aura=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // `aura hash-password <password>`: AUTH_PASSWORD_HASH에 넣을 값을 출력합니다.
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("hash-password") {
        let Some(password) = args.get(2) else {
            anyhow::bail!("usage: aura hash-password <password>");
        };
        println!("{}", routes::auth::hash_password(password)?);
        return Ok(());
    }

    // ── 3단계: 설정 로딩 ──
    let config = Config::from_env()?;
    tracing::info!(
        "Starting Aura server on {}:{} (auth {})",
        config.host,
        config.port,
        if config.auth.is_some() { "enabled" } else { "disabled" }
    );

    // ── 4단계: Plex 식별 정보 ──
    // 클라이언트 식별자는 CONFIG_PATH에 저장되어 재시작해도 유지됩니다.
    let client_id = config::load_or_create_client_id(&config.config_path).await?;
    let identity = PlexIdentity {
        client_id,
        product: config.plex_product.clone(),
        device: config.plex_device.clone(),
        platform: config.plex_platform.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let plex = PlexClient::new(identity, &config.plex_base_url)?;

    // ── 5단계: 임시 이미지 디렉토리 생성 ──
    let temp_images = config.temp_images_path();
    if !temp_images.exists() {
        tokio::fs::create_dir_all(&temp_images).await?;
        tracing::info!("Created temp images directory: {}", temp_images.display());
    }

    // ── 6단계: 라우터 ──
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(AppState::new(config, plex));

    // ── 7단계: 서버 시작 ──
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Ctrl+C를 받으면 새 연결을 받지 않고 진행 중인 요청이 끝날 때까지 기다립니다.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
