use anyhow::{bail, Context, Result};
use std::{env, str::FromStr, time::Duration};

pub const DEFAULT_MOODLE_URL: &str = "https://prepa.in/webservice/rest/server.php";

/// How inbound session tokens are checked. Only one of the two token
/// routes is mounted for a given process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenMode {
    /// `POST /token` compares the `token` header against `static_token`.
    Static,
    /// `GET /token/{token}` asks an external validator, then redirects.
    Delegated {
        validation_url: String,
        redirect_url: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub moodle_url: String,
    pub moodle_token: Option<String>,
    pub moodle_timeout: Duration,
    pub student_role_id: u32,
    pub category_name: String,
    pub api_key: String,
    pub static_token: String,
    pub token_mode: TokenMode,
    pub password_length: usize,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            moodle_url: DEFAULT_MOODLE_URL.into(),
            moodle_token: None,
            moodle_timeout: Duration::from_secs(15),
            student_role_id: 5,
            category_name: "PrepaIn".into(),
            api_key: "test-api-key".into(),
            static_token: "dummy-token-123".into(),
            token_mode: TokenMode::Static,
            password_length: 12,
            port: 8081,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let token_mode = match env::var("TOKEN_MODE").as_deref() {
            Err(_) | Ok("static") => TokenMode::Static,
            Ok("delegated") => TokenMode::Delegated {
                validation_url: env::var("TOKEN_VALIDATION_URL")
                    .context("TOKEN_VALIDATION_URL is required when TOKEN_MODE=delegated")?,
                redirect_url: env::var("TOKEN_REDIRECT_URL")
                    .context("TOKEN_REDIRECT_URL is required when TOKEN_MODE=delegated")?,
            },
            Ok(other) => bail!("unknown TOKEN_MODE {other:?} (expected static or delegated)"),
        };

        let password_length = parsed("PASSWORD_LENGTH", defaults.password_length)?;
        if password_length < 8 {
            bail!("PASSWORD_LENGTH must be at least 8, got {password_length}");
        }

        Ok(Self {
            moodle_url: env::var("MOODLE_BASE_URL").unwrap_or(defaults.moodle_url),
            moodle_token: env::var("MOODLE_TOKEN").ok().filter(|t| !t.is_empty()),
            moodle_timeout: Duration::from_secs(parsed("MOODLE_TIMEOUT_SECS", 15u64)?),
            student_role_id: parsed("MOODLE_STUDENT_ROLE_ID", defaults.student_role_id)?,
            category_name: env::var("LP_CATEGORY_NAME").unwrap_or(defaults.category_name),
            api_key: env::var("API_KEY").unwrap_or(defaults.api_key),
            static_token: env::var("STATIC_TOKEN").unwrap_or(defaults.static_token),
            token_mode,
            password_length,
            port: parsed("PORT", defaults.port)?,
        })
    }
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}
