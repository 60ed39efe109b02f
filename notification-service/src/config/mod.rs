use crate::models::Channel;
use crate::services::backoff::BackoffPolicy;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::observability::LogFormat;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub logging: LoggingConfig,
    pub kafka: KafkaConfig,
    pub retry: RetryConfig,
    pub dispatch: DispatchConfig,
    pub smtp: SmtpConfig,
    pub msg91: Msg91Config,
    pub fcm: FcmConfig,
    pub dedup: DedupConfig,
    pub ledger: LedgerConfig,
    pub dead_letter: DeadLetterConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: Option<String>) -> Self {
        match value.as_deref().map(str::trim) {
            Some("production") | Some("prod") => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Defaults that differ between deployments.
    pub fn profile(&self) -> Profile {
        match self {
            Environment::Development => Profile {
                log_level: "debug",
                log_format: LogFormat::Pretty,
                reconnect_backoff_ms: 300,
                client_retries: 8,
                request_timeout_ms: 30_000,
                session_timeout_ms: 30_000,
            },
            Environment::Production => Profile {
                log_level: "info",
                log_format: LogFormat::Json,
                reconnect_backoff_ms: 100,
                client_retries: 10,
                request_timeout_ms: 60_000,
                session_timeout_ms: 60_000,
            },
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile {
    pub log_level: &'static str,
    pub log_format: LogFormat,
    pub reconnect_backoff_ms: u64,
    pub client_retries: u32,
    pub request_timeout_ms: u64,
    pub session_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub client_id: String,
    pub group_id: String,
    pub topic: String,
    pub session_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub client_retries: u32,
}

impl KafkaConfig {
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Dispatch attempts before an event is dead-lettered.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
    pub poll_interval_ms: u64,
}

impl RetryConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.jitter_ratio,
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub channel: Channel,
    pub timeout_ms: u64,
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    pub recipient_template: String,
}

#[derive(Debug, Clone)]
pub struct Msg91Config {
    pub auth_key: String,
    pub sender_id: String,
    pub country_code: String,
    pub recipient_template: String,
}

#[derive(Debug, Clone)]
pub struct FcmConfig {
    pub project_id: String,
    pub service_account_key: String,
    pub topic_prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupBackend {
    Memory,
    Redis,
}

impl FromStr for DedupBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(DedupBackend::Memory),
            "redis" => Ok(DedupBackend::Redis),
            other => Err(format!("unknown dedup backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub backend: DedupBackend,
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub retention_secs: u64,
}

impl DedupConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub retention_secs: u64,
}

impl LedgerConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterSinkKind {
    Kafka,
    MongoDb,
    File,
}

impl FromStr for DeadLetterSinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kafka" => Ok(DeadLetterSinkKind::Kafka),
            "mongodb" | "mongo" => Ok(DeadLetterSinkKind::MongoDb),
            "file" => Ok(DeadLetterSinkKind::File),
            other => Err(format!("unknown dead-letter sink '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct DeadLetterConfig {
    pub sink: DeadLetterSinkKind,
    pub topic: String,
    pub mongodb: Option<MongoConfig>,
    pub file_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub partition_queue_depth: usize,
    pub shutdown_grace_ms: u64,
    pub housekeeping_interval_secs: u64,
}

impl PipelineConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs)
    }
}

impl NotificationConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        Self::from_lookup(common_config, |key| std::env::var(key).ok())
    }

    /// Build and validate the configuration from a key lookup.
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let environment = Environment::parse(env.get("ENVIRONMENT").or_else(|| env.get("NODE_ENV")));
        let is_prod = environment.is_production();
        let profile = environment.profile();

        let brokers: Vec<String> = env
            .required("KAFKA_BROKERS")?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let topic = env.required("KAFKA_TOPIC_ORDER_CREATED")?;

        let log_format = match env.get("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            Some("pretty") => LogFormat::Pretty,
            Some(other) => {
                return Err(config_error(format!("LOG_FORMAT '{}' is not json|pretty", other)))
            }
            None => profile.log_format,
        };

        let channel = env.parse("NOTIFICATION_CHANNEL", Channel::Log)?;
        let dead_letter_sink = env.parse("DEAD_LETTER_SINK", DeadLetterSinkKind::Kafka)?;
        let smtp_required = is_prod && channel == Channel::Email;
        let msg91_required = is_prod && channel == Channel::Sms;
        let fcm_required = is_prod && channel == Channel::Push;

        let config = NotificationConfig {
            common,
            environment,
            logging: LoggingConfig {
                level: env.get_or("LOG_LEVEL", profile.log_level),
                format: log_format,
                otlp_endpoint: env.get("OTLP_ENDPOINT"),
            },
            kafka: KafkaConfig {
                brokers,
                client_id: env.required("KAFKA_CLIENT_ID")?,
                group_id: env.required("KAFKA_GROUP_ID")?,
                topic: topic.clone(),
                session_timeout_ms: env
                    .parse("KAFKA_SESSION_TIMEOUT_MS", profile.session_timeout_ms)?,
                request_timeout_ms: env
                    .parse("KAFKA_REQUEST_TIMEOUT_MS", profile.request_timeout_ms)?,
                reconnect_backoff_ms: env
                    .parse("KAFKA_RECONNECT_BACKOFF_MS", profile.reconnect_backoff_ms)?,
                client_retries: env.parse("KAFKA_CLIENT_RETRIES", profile.client_retries)?,
            },
            retry: RetryConfig {
                max_attempts: env.parse("RETRY_MAX_ATTEMPTS", 5)?,
                base_delay_ms: env.parse("RETRY_BASE_DELAY_MS", 1_000)?,
                max_delay_ms: env.parse("RETRY_MAX_DELAY_MS", 300_000)?,
                jitter_ratio: env.parse("RETRY_JITTER_RATIO", 0.2)?,
                poll_interval_ms: env.parse("RETRY_POLL_INTERVAL_MS", 250)?,
            },
            dispatch: DispatchConfig {
                channel,
                timeout_ms: env.parse("DISPATCH_TIMEOUT_MS", 10_000)?,
            },
            smtp: SmtpConfig {
                host: env.credential("SMTP_HOST", "smtp.gmail.com", smtp_required)?,
                port: env.parse("SMTP_PORT", 587)?,
                user: env.credential("SMTP_USER", "", smtp_required)?,
                password: env.credential("SMTP_PASSWORD", "", smtp_required)?,
                from_email: env.credential("SMTP_FROM_EMAIL", "noreply@example.com", smtp_required)?,
                from_name: env.get_or("SMTP_FROM_NAME", "Order Notifications"),
                recipient_template: env
                    .credential("EMAIL_RECIPIENT_TEMPLATE", "{user_id}@example.com", smtp_required)?,
            },
            msg91: Msg91Config {
                auth_key: env.credential("MSG91_AUTH_KEY", "", msg91_required)?,
                sender_id: env.credential("MSG91_SENDER_ID", "", msg91_required)?,
                country_code: env.get_or("MSG91_COUNTRY_CODE", "91"),
                recipient_template: env
                    .credential("SMS_RECIPIENT_TEMPLATE", "{user_id}", msg91_required)?,
            },
            fcm: FcmConfig {
                project_id: env.credential("FCM_PROJECT_ID", "", fcm_required)?,
                service_account_key: env.credential("FCM_SERVICE_ACCOUNT_KEY", "", fcm_required)?,
                topic_prefix: env.get_or("FCM_TOPIC_PREFIX", "user-"),
            },
            dedup: DedupConfig {
                backend: env.parse("DEDUP_BACKEND", DedupBackend::Memory)?,
                redis_url: env.get("REDIS_URL"),
                key_prefix: env.get_or("DEDUP_KEY_PREFIX", "notifications:processed:"),
                retention_secs: env.parse("DEDUP_RETENTION_SECS", 7 * 24 * 3600)?,
            },
            ledger: LedgerConfig {
                retention_secs: env.parse("LEDGER_RETENTION_SECS", 24 * 3600)?,
            },
            dead_letter: DeadLetterConfig {
                sink: dead_letter_sink,
                topic: env.get_or("DEAD_LETTER_TOPIC", &format!("{}.dlq", topic)),
                mongodb: match env.get("MONGODB_URI") {
                    Some(uri) => Some(MongoConfig {
                        uri,
                        database: env.get_or("MONGODB_DATABASE", "notification_db"),
                    }),
                    None => None,
                },
                file_path: PathBuf::from(env.get_or("DEAD_LETTER_FILE", "dead-letters.jsonl")),
            },
            pipeline: PipelineConfig {
                partition_queue_depth: env.parse("PARTITION_QUEUE_DEPTH", 64)?,
                shutdown_grace_ms: env.parse("SHUTDOWN_GRACE_MS", 30_000)?,
                housekeeping_interval_secs: env.parse("HOUSEKEEPING_INTERVAL_SECS", 60)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that individual parsing cannot catch.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.kafka.brokers.is_empty() {
            return Err(config_error("KAFKA_BROKERS must list at least one broker"));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error("RETRY_MAX_ATTEMPTS must be at least 1"));
        }
        if self.retry.base_delay_ms == 0 || self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(config_error(
                "RETRY_BASE_DELAY_MS must be positive and not exceed RETRY_MAX_DELAY_MS",
            ));
        }
        if !(0.0..1.0).contains(&self.retry.jitter_ratio) {
            return Err(config_error("RETRY_JITTER_RATIO must be in [0, 1)"));
        }
        if self.retry.poll_interval_ms == 0 {
            return Err(config_error("RETRY_POLL_INTERVAL_MS must be positive"));
        }
        if self.dispatch.timeout_ms == 0 {
            return Err(config_error("DISPATCH_TIMEOUT_MS must be positive"));
        }
        if self.pipeline.partition_queue_depth == 0 {
            return Err(config_error("PARTITION_QUEUE_DEPTH must be positive"));
        }
        if self.pipeline.housekeeping_interval_secs == 0 {
            return Err(config_error("HOUSEKEEPING_INTERVAL_SECS must be positive"));
        }
        if self.dedup.backend == DedupBackend::Redis && self.dedup.redis_url.is_none() {
            return Err(config_error("REDIS_URL is required when DEDUP_BACKEND=redis"));
        }
        if self.dead_letter.sink == DeadLetterSinkKind::MongoDb && self.dead_letter.mongodb.is_none()
        {
            return Err(config_error("MONGODB_URI is required when DEAD_LETTER_SINK=mongodb"));
        }
        if self.dead_letter.sink == DeadLetterSinkKind::Kafka
            && self.dead_letter.topic == self.kafka.topic
        {
            return Err(config_error("DEAD_LETTER_TOPIC must differ from the consumed topic"));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message.into()))
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &str) -> Result<String, AppError> {
        self.get(key)
            .map(|v| v.trim().to_string())
            .ok_or_else(|| config_error(format!("{} is required but not set", key)))
    }

    /// Secrets and addresses: required when `required`, defaulted otherwise.
    fn credential(&self, key: &str, default: &str, required: bool) -> Result<String, AppError> {
        match self.get(key) {
            Some(val) => Ok(val),
            None if required => Err(config_error(format!(
                "{} is required in production but not set",
                key
            ))),
            None => Ok(default.to_string()),
        }
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, AppError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| config_error(format!("{} has invalid value '{}': {}", key, raw, e))),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("KAFKA_BROKERS", "kafka-1:9092, kafka-2:9092,,"),
            ("KAFKA_CLIENT_ID", "notifications-service"),
            ("KAFKA_GROUP_ID", "notifications"),
            ("KAFKA_TOPIC_ORDER_CREATED", "orders.created"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<NotificationConfig, AppError> {
        NotificationConfig::from_lookup(core_config::Config { port: 0 }, |key| {
            vars.get(key).map(|v| v.to_string())
        })
    }

    #[test]
    fn test_minimal_config_uses_development_defaults() {
        let config = load(&base_vars()).unwrap();

        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.kafka.brokers, vec!["kafka-1:9092", "kafka-2:9092"]);
        assert_eq!(config.kafka.reconnect_backoff_ms, 300);
        assert_eq!(config.kafka.client_retries, 8);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.dispatch.channel, Channel::Log);
        assert_eq!(config.dispatch.timeout(), Duration::from_secs(10));
        assert_eq!(config.dead_letter.topic, "orders.created.dlq");
    }

    #[test]
    fn test_production_profile() {
        let mut vars = base_vars();
        vars.insert("NODE_ENV", "production");

        let config = load(&vars).unwrap();

        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.kafka.session_timeout_ms, 60_000);
        assert_eq!(config.kafka.client_retries, 10);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_missing_required_value_fails() {
        let mut vars = base_vars();
        vars.remove("KAFKA_GROUP_ID");
        assert!(matches!(load(&vars), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_malformed_number_fails() {
        let mut vars = base_vars();
        vars.insert("RETRY_MAX_ATTEMPTS", "five");
        assert!(matches!(load(&vars), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_cross_field_validation() {
        let mut vars = base_vars();
        vars.insert("DEDUP_BACKEND", "redis");
        assert!(load(&vars).is_err());

        let mut vars = base_vars();
        vars.insert("RETRY_JITTER_RATIO", "1.5");
        assert!(load(&vars).is_err());

        let mut vars = base_vars();
        vars.insert("KAFKA_BROKERS", " , ");
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_production_email_channel_requires_credentials() {
        let mut vars = base_vars();
        vars.insert("ENVIRONMENT", "production");
        vars.insert("NOTIFICATION_CHANNEL", "email");
        assert!(load(&vars).is_err());
    }
}
