//! Node configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use domain::LoanPolicy;
use saga::SagaOptions;

/// One of the platform's services a node can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Book,
    Patron,
    Borrowing,
    Fine,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::Book,
        ServiceKind::Patron,
        ServiceKind::Borrowing,
        ServiceKind::Fine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Book => "book",
            ServiceKind::Patron => "patron",
            ServiceKind::Borrowing => "borrowing",
            ServiceKind::Fine => "fine",
        }
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown service {s:?}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Node configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `AMQP_URL`: RabbitMQ connection; unset means the in-process broker
/// - `DATABASE_URL`: PostgreSQL connection; unset means in-memory stores
/// - `RPC_TIMEOUT_MS`: reply deadline for outgoing calls (default 5000)
/// - `LOAN_PERIOD_DAYS`, `MAX_RENEWALS`, `RESERVATION_HOLD_DAYS`: loan rules
/// - `FINE_RATE_PER_DAY`: fine per whole day late
/// - `SERVICES`: comma list of `book,patron,borrowing,fine` (default all)
/// - `DISPATCHERS_PER_QUEUE`: competing consumers started per queue
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub amqp_url: Option<String>,
    pub database_url: Option<String>,
    pub rpc_timeout: Duration,
    pub loan_period_days: i64,
    pub max_renewals: u32,
    pub reservation_hold_days: i64,
    pub fine_rate_per_day: f64,
    pub services: Vec<ServiceKind>,
    pub dispatchers_per_queue: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`. Unparseable values fall back
    /// to the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Self {
            host: parsed("HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port),
            log_level: parsed("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match parsed("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            amqp_url: parsed("AMQP_URL"),
            database_url: parsed("DATABASE_URL"),
            rpc_timeout: Duration::from_millis(parse_or(&lookup, "RPC_TIMEOUT_MS", 5000)),
            loan_period_days: parse_or(&lookup, "LOAN_PERIOD_DAYS", defaults.loan_period_days),
            max_renewals: parse_or(&lookup, "MAX_RENEWALS", defaults.max_renewals),
            reservation_hold_days: parse_or(
                &lookup,
                "RESERVATION_HOLD_DAYS",
                defaults.reservation_hold_days,
            ),
            fine_rate_per_day: parse_or(&lookup, "FINE_RATE_PER_DAY", defaults.fine_rate_per_day),
            services: parsed("SERVICES")
                .map(|list| parse_services(&list))
                .unwrap_or(defaults.services),
            dispatchers_per_queue: parse_or(
                &lookup,
                "DISPATCHERS_PER_QUEUE",
                defaults.dispatchers_per_queue,
            )
            .max(1),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn runs(&self, service: ServiceKind) -> bool {
        self.services.contains(&service)
    }

    pub fn loan_policy(&self) -> LoanPolicy {
        LoanPolicy {
            loan_period: ChronoDuration::days(self.loan_period_days),
            max_renewals: self.max_renewals,
            reservation_hold: ChronoDuration::days(self.reservation_hold_days),
        }
    }

    pub fn saga_options(&self) -> SagaOptions {
        SagaOptions {
            policy: self.loan_policy(),
            ..SagaOptions::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            amqp_url: None,
            database_url: None,
            rpc_timeout: rpc::DEFAULT_TIMEOUT,
            loan_period_days: 14,
            max_renewals: 2,
            reservation_hold_days: 7,
            fine_rate_per_day: services::fine::DEFAULT_RATE_PER_DAY,
            services: ServiceKind::ALL.to_vec(),
            dispatchers_per_queue: 1,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    match lookup(name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(name, value = %raw, "ignoring unparseable setting");
            default
        }),
        None => default,
    }
}

fn parse_services(list: &str) -> Vec<ServiceKind> {
    let mut services = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match name.parse() {
            Ok(kind) if !services.contains(&kind) => services.push(kind),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "ignoring SERVICES entry"),
        }
    }
    services
}
