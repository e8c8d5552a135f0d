use super::parsing::{
    env_flag, env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment,
    parse_i64, parse_positive_usize, parse_storage_backend, parse_u16, parse_u32, parse_u64,
};
use super::secret::generate_ephemeral_secret_key;
use super::types::{
    ApiSettings, AttemptSettings, ConfigError, CorsSettings, DatabaseSettings, RealtimeSettings,
    RedisSettings, RuntimeSettings, SecuritySettings, ServerHost, ServerPort, ServerSettings,
    Settings, StorageBackend, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("CBT_HOST", "0.0.0.0");
        let port = env_or_default("CBT_PORT", "8000");

        let environment =
            parse_environment(env_optional("CBT_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("CBT_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "CBT Attempt Engine");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let (secret_key, secret_key_generated) = match env_optional("SECRET_KEY") {
            Some(value) => (value, false),
            None => (generate_ephemeral_secret_key(), true),
        };
        let algorithm = env_or_default("ALGORITHM", "HS256");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let backend = parse_storage_backend(env_or_default("STORAGE_BACKEND", "postgres"))?;
        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "cbt");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "cbt_db");
        let database_url = env_optional("DATABASE_URL");
        let max_connections =
            parse_u32("DATABASE_MAX_CONNECTIONS", env_or_default("DATABASE_MAX_CONNECTIONS", "30"))?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let redis_fanout = env_flag("REALTIME_REDIS_FANOUT");
        let redis_channel = env_or_default("REALTIME_REDIS_CHANNEL", "cbt:realtime");
        let channel_capacity = parse_positive_usize(
            "REALTIME_CHANNEL_CAPACITY",
            env_or_default("REALTIME_CHANNEL_CAPACITY", "1024"),
        )?;
        let activity_feed_capacity = parse_positive_usize(
            "ACTIVITY_FEED_CAPACITY",
            env_or_default("ACTIVITY_FEED_CAPACITY", "50"),
        )?;

        let expiry_sweep_interval_seconds = parse_u64(
            "EXPIRY_SWEEP_INTERVAL_SECONDS",
            env_or_default("EXPIRY_SWEEP_INTERVAL_SECONDS", "15"),
        )?;
        let timer_skew_tolerance_seconds = parse_i64(
            "TIMER_SKEW_TOLERANCE_SECONDS",
            env_or_default("TIMER_SKEW_TOLERANCE_SECONDS", "5"),
        )?;
        let multi_select_partial_credit = env_flag("MULTI_SELECT_PARTIAL_CREDIT");

        let log_level = env_or_default("CBT_LOG_LEVEL", "info");
        let json = env_flag("CBT_LOG_JSON");
        let prometheus_enabled = env_flag("PROMETHEUS_ENABLED");

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            security: SecuritySettings { secret_key, secret_key_generated, algorithm },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                backend,
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            realtime: RealtimeSettings {
                redis_fanout,
                redis_channel,
                channel_capacity,
                activity_feed_capacity,
            },
            attempts: AttemptSettings {
                expiry_sweep_interval_seconds,
                timer_skew_tolerance_seconds,
                multi_select_partial_credit,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn security(&self) -> &SecuritySettings {
        &self.security
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn realtime(&self) -> &RealtimeSettings {
        &self.realtime
    }

    pub(crate) fn attempts(&self) -> &AttemptSettings {
        &self.attempts
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.attempts.expiry_sweep_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "EXPIRY_SWEEP_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.attempts.timer_skew_tolerance_seconds < 0 {
            return Err(ConfigError::InvalidValue {
                field: "TIMER_SKEW_TOLERANCE_SECONDS",
                value: self.attempts.timer_skew_tolerance_seconds.to_string(),
            });
        }

        if !self.runtime.strict_config {
            return Ok(());
        }

        if self.security.secret_key_generated {
            return Err(ConfigError::MissingSecret("SECRET_KEY"));
        }

        if self.database.backend == StorageBackend::Postgres
            && self.database.database_url.is_none()
            && self.database.postgres_password.is_empty()
        {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        Ok(())
    }
}
