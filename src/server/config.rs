use chrono::Duration;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("Failed to load config file: {0}")]
    File(String),
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
}

/// Which health predicate the monitor evaluates on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    Timestamp,
    Procedure,
}

impl std::str::FromStr for CheckMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "timestamp" => Ok(CheckMode::Timestamp),
            "procedure" | "stored_procedure" | "sp" => Ok(CheckMode::Procedure),
            other => Err(ConfigError::Invalid {
                field: "CHECK_MODE",
                reason: format!("unknown mode '{other}', expected 'timestamp' or 'procedure'"),
            }),
        }
    }
}

/// One stored procedure to execute and the status columns read from its first row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureSpec {
    pub procedure: String,
    pub expected_columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TimestampTarget {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone)]
pub struct ProcedureTarget {
    pub procedures: Vec<ProcedureSpec>,
    pub ok_value: String,
    pub call_template: String,
}

#[derive(Debug, Clone)]
pub struct TeamsSettings {
    pub enabled: bool,
    pub webhook_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: String,
    pub use_ssl: bool,
    pub sender: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub app_name: String,
    pub database_url: String,
    pub db_query_timeout_seconds: u64,
    pub db_max_connections: u32,
    pub check_mode: CheckMode,
    pub timestamp: Option<TimestampTarget>,
    pub procedure: Option<ProcedureTarget>,
    pub check_interval_seconds: u64,
    pub inactivity_threshold_minutes: i64,
    pub alert_cooldown_minutes: i64,
    pub listen_addr: String,
    pub check_now_url: String,
    pub log_dir: String,
    pub teams: TeamsSettings,
    pub email: EmailSettings,
}

/// A boolean that also accepts the `1/yes/on` spellings operators put in env files.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn enabled(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Text(s) => parse_flag(s),
        }
    }
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialMonitorConfig {
    app_name: Option<String>,
    database_url: Option<String>,
    db_query_timeout_seconds: Option<u64>,
    db_max_connections: Option<u32>,
    check_mode: Option<String>,
    activity_table: Option<String>,
    activity_timestamp_column: Option<String>,
    sp_config: Option<String>,
    sp_ok_value: Option<String>,
    procedure_call_template: Option<String>,
    check_interval_seconds: Option<u64>,
    inactivity_threshold_minutes: Option<i64>,
    alert_cooldown_minutes: Option<i64>,
    listen_addr: Option<String>,
    check_now_url: Option<String>,
    log_dir: Option<String>,
    enable_teams_notifications: Option<Flag>,
    teams_webhook_url: Option<String>,
    webhook_timeout_seconds: Option<u64>,
    enable_email_notifications: Option<Flag>,
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    smtp_user: Option<String>,
    smtp_password: Option<String>,
    smtp_use_ssl: Option<Flag>,
    mail_sender: Option<String>,
    mail_recipients: Option<String>,
}

const DEFAULT_CALL_TEMPLATE: &str = "SELECT * FROM {procedure}()";
const MAX_WINDOW_MINUTES: i64 = 365 * 24 * 60;

pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parses the `"proc:colA|colB,proc2:colC"` encoding.
///
/// Empty entries are skipped. An entry without columns falls back to the
/// unqualified procedure name, so every spec carries at least one column.
pub fn parse_procedure_specs(raw: &str) -> Vec<ProcedureSpec> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let (procedure, columns) = match entry.split_once(':') {
                Some((p, c)) => (p.trim(), c),
                None => (entry, ""),
            };
            if procedure.is_empty() {
                return None;
            }
            let mut expected_columns: Vec<String> = columns
                .split('|')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
            if expected_columns.is_empty() {
                expected_columns.push(unqualified_name(procedure));
            }
            Some(ProcedureSpec {
                procedure: procedure.to_string(),
                expected_columns,
            })
        })
        .collect()
}

fn unqualified_name(procedure: &str) -> String {
    let last = procedure.rsplit('.').next().unwrap_or(procedure);
    last.replace(['[', ']'], "")
}

/// Thresholds and cooldowns are whole minutes between one minute and a year.
fn window_minutes(field: &'static str, minutes: i64) -> Result<i64, ConfigError> {
    if (1..=MAX_WINDOW_MINUTES).contains(&minutes) {
        Ok(minutes)
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{minutes} is outside 1..={MAX_WINDOW_MINUTES} minutes"),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl MonitorConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config = match config_path {
            Some(path_str) => Self::read_file(Path::new(path_str))?,
            None => PartialMonitorConfig::default(),
        };

        // 2. Load from environment variables
        let env_config: PartialMonitorConfig = envy::from_env::<PartialMonitorConfig>()?;

        // 3. Merge: environment overrides file
        Self::merge(env_config, file_config)
    }

    fn read_file(path: &Path) -> Result<PartialMonitorConfig, ConfigError> {
        if !path.exists() {
            return Ok(PartialMonitorConfig::default());
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::File(format!("failed to read {path:?}: {e}")))?;
        toml::from_str(&contents)
            .map_err(|e| ConfigError::File(format!("failed to parse TOML from {path:?}: {e}")))
    }

    fn merge(env: PartialMonitorConfig, file: PartialMonitorConfig) -> Result<Self, ConfigError> {
        let check_mode: CheckMode = env
            .check_mode
            .or(file.check_mode)
            .as_deref()
            .unwrap_or("timestamp")
            .parse()?;

        let database_url = non_empty(env.database_url.or(file.database_url))
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let timestamp = match check_mode {
            CheckMode::Timestamp => Some(TimestampTarget {
                table: non_empty(env.activity_table.or(file.activity_table))
                    .ok_or(ConfigError::Missing("ACTIVITY_TABLE"))?,
                column: non_empty(env.activity_timestamp_column.or(file.activity_timestamp_column))
                    .unwrap_or_else(|| "updated_at".to_string()),
            }),
            CheckMode::Procedure => None,
        };

        let procedure = match check_mode {
            CheckMode::Procedure => {
                let raw = non_empty(env.sp_config.or(file.sp_config))
                    .ok_or(ConfigError::Missing("SP_CONFIG"))?;
                let procedures = parse_procedure_specs(&raw);
                if procedures.is_empty() {
                    return Err(ConfigError::Invalid {
                        field: "SP_CONFIG",
                        reason: "no procedures configured".to_string(),
                    });
                }
                let call_template = non_empty(env.procedure_call_template.or(file.procedure_call_template))
                    .unwrap_or_else(|| DEFAULT_CALL_TEMPLATE.to_string());
                if !call_template.contains("{procedure}") {
                    return Err(ConfigError::Invalid {
                        field: "PROCEDURE_CALL_TEMPLATE",
                        reason: "template must contain {procedure}".to_string(),
                    });
                }
                Some(ProcedureTarget {
                    procedures,
                    ok_value: env.sp_ok_value.or(file.sp_ok_value).unwrap_or_else(|| "OK".to_string()),
                    call_template,
                })
            }
            CheckMode::Timestamp => None,
        };

        let check_interval_seconds = env.check_interval_seconds.or(file.check_interval_seconds).unwrap_or(60);
        if check_interval_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "CHECK_INTERVAL_SECONDS",
                reason: "must be greater than zero".to_string(),
            });
        }

        let teams = TeamsSettings {
            enabled: env
                .enable_teams_notifications
                .or(file.enable_teams_notifications)
                .map(|f| f.enabled())
                .unwrap_or(true),
            webhook_url: env.teams_webhook_url.or(file.teams_webhook_url).unwrap_or_default(),
            timeout_seconds: env.webhook_timeout_seconds.or(file.webhook_timeout_seconds).unwrap_or(10),
        };

        let email = EmailSettings {
            enabled: env
                .enable_email_notifications
                .or(file.enable_email_notifications)
                .map(|f| f.enabled())
                .unwrap_or(false),
            smtp_host: env.smtp_host.or(file.smtp_host).unwrap_or_default(),
            smtp_port: env.smtp_port.or(file.smtp_port).unwrap_or(587),
            smtp_user: env.smtp_user.or(file.smtp_user).unwrap_or_default(),
            smtp_password: env.smtp_password.or(file.smtp_password).unwrap_or_default(),
            use_ssl: env.smtp_use_ssl.or(file.smtp_use_ssl).map(|f| f.enabled()).unwrap_or(false),
            sender: env.mail_sender.or(file.mail_sender).unwrap_or_default(),
            recipients: env
                .mail_recipients
                .or(file.mail_recipients)
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect(),
        };

        Ok(MonitorConfig {
            app_name: env.app_name.or(file.app_name).unwrap_or_else(|| "db-activity-monitor".to_string()),
            database_url,
            db_query_timeout_seconds: env.db_query_timeout_seconds.or(file.db_query_timeout_seconds).unwrap_or(30),
            db_max_connections: env.db_max_connections.or(file.db_max_connections).unwrap_or(5),
            check_mode,
            timestamp,
            procedure,
            check_interval_seconds,
            inactivity_threshold_minutes: window_minutes(
                "INACTIVITY_THRESHOLD_MINUTES",
                env.inactivity_threshold_minutes.or(file.inactivity_threshold_minutes).unwrap_or(10),
            )?,
            alert_cooldown_minutes: window_minutes(
                "ALERT_COOLDOWN_MINUTES",
                env.alert_cooldown_minutes.or(file.alert_cooldown_minutes).unwrap_or(30),
            )?,
            listen_addr: env.listen_addr.or(file.listen_addr).unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            check_now_url: env
                .check_now_url
                .or(file.check_now_url)
                .unwrap_or_else(|| "http://localhost:8000/check-now".to_string()),
            log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(|| "logs".to_string()),
            teams,
            email,
        })
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::minutes(self.inactivity_threshold_minutes)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::minutes(self.alert_cooldown_minutes)
    }
}
