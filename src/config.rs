//! # 애플리케이션 설정(Configuration) 모듈
//!
//! 환경변수에서 서버 설정값을 읽어오는 모듈입니다.
//! `.env` 파일이나 시스템 환경변수에서 값을 가져옵니다.
//!
//! 설정 항목:
//! - `HOST` / `PORT`: 서버 바인딩 주소와 포트
//! - `CONFIG_PATH`: 부가 데이터 디렉토리 (클라이언트 ID, 임시 이미지)
//! - `LOG_LEVEL`: 응답 `log`에 포함할 최소 액션 레벨
//! - `AUTH_ENABLED` / `AUTH_PASSWORD_HASH` / `JWT_SECRET`: 관리자 로그인
//! - `PLEX_PRODUCT` / `PLEX_DEVICE` / `PLEX_PLATFORM` / `PLEX_BASE_URL`: Plex 식별 정보

use crate::logging::ActionLevel;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 설정 로딩 중 발생할 수 있는 에러
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("{0} is required when AUTH_ENABLED=true")]
    MissingForAuth(&'static str),

    #[error("failed to persist the Plex client identifier: {0}")]
    ClientId(#[from] std::io::Error),
}

/// 애플리케이션 전체 설정을 담는 구조체
///
/// 서버 시작 시 한 번 읽어온 후 변경되지 않습니다.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub config_path: PathBuf,
    /// 응답 envelope의 `log` 트리에 포함할 최소 레벨
    pub log_level: ActionLevel,
    pub auth: Option<AuthConfig>,
    pub plex_product: String,
    pub plex_device: String,
    pub plex_platform: String,
    pub plex_base_url: String,
}

/// 인증이 켜져 있을 때만 존재하는 설정
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Argon2 PHC 문자열 (`$argon2id$...`)
    pub password_hash: String,
    pub jwt_secret: String,
}

impl Config {
    /// 환경변수에서 설정값을 읽어 Config 인스턴스를 생성합니다.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 임의의 조회 함수로 설정을 만듭니다. 테스트에서 환경변수 대신 사용합니다.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // unwrap_or_else: 값이 없으면 기본값을 사용합니다.
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port_raw = var("PORT", "8888");
        let port = port_raw.parse().map_err(|_| ConfigError::Invalid {
            key: "PORT",
            value: port_raw.clone(),
        })?;

        let level_raw = var("LOG_LEVEL", "info");
        let log_level = level_raw.parse().map_err(|_| ConfigError::Invalid {
            key: "LOG_LEVEL",
            value: level_raw.clone(),
        })?;

        let auth_enabled = matches!(
            var("AUTH_ENABLED", "false").to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        );
        let auth = if auth_enabled {
            Some(AuthConfig {
                password_hash: lookup("AUTH_PASSWORD_HASH")
                    .filter(|v| !v.is_empty())
                    .ok_or(ConfigError::MissingForAuth("AUTH_PASSWORD_HASH"))?,
                jwt_secret: lookup("JWT_SECRET")
                    .filter(|v| !v.is_empty())
                    .ok_or(ConfigError::MissingForAuth("JWT_SECRET"))?,
            })
        } else {
            None
        };

        Ok(Self {
            host: var("HOST", "0.0.0.0"),
            port,
            config_path: PathBuf::from(var("CONFIG_PATH", "/config")),
            log_level,
            auth,
            plex_product: var("PLEX_PRODUCT", "Aura"),
            plex_device: var("PLEX_DEVICE", "Aura Server"),
            plex_platform: var("PLEX_PLATFORM", "Web"),
            plex_base_url: var("PLEX_BASE_URL", "https://plex.tv"),
        })
    }

    /// 임시 포스터 이미지가 저장되는 디렉토리
    pub fn temp_images_path(&self) -> PathBuf {
        self.config_path.join("temp-images")
    }
}

const CLIENT_ID_FILE: &str = "plex_client_id";

/// Plex 클라이언트 식별자를 읽거나, 첫 실행이면 새로 만들어 저장합니다.
///
/// Plex는 같은 기기를 같은 식별자로 인식하므로 재시작해도 값이 유지되어야 합니다.
pub async fn load_or_create_client_id(config_path: &Path) -> Result<String, ConfigError> {
    let file = config_path.join(CLIENT_ID_FILE);
    match tokio::fs::read_to_string(&file).await {
        Ok(existing) if !existing.trim().is_empty() => return Ok(existing.trim().to_string()),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    tokio::fs::create_dir_all(config_path).await?;
    let id = uuid::Uuid::new_v4().to_string();
    tokio::fs::write(&file, &id).await?;
    tracing::info!(path = %file.display(), "generated new Plex client identifier");
    Ok(id)
}
