//! Configuration management for the booking server.
//!
//! Loads configuration from environment variables with sensible defaults.
//! The server binary loads a `.env` file first when one exists.

use chrono::Duration;
use homeserve_booking::{BookingPolicy, OtpPolicy};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;
use thiserror::Error;

/// A variable was set to something that does not parse or is out of range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid value '{value}' for {key}")]
pub struct ConfigError {
    /// Variable name
    pub key: String,
    /// Value found
    pub value: String,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Booking rules
    pub booking: BookingConfig,
    /// Real-time notification delivery
    pub notifier: NotifierConfig,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// Booking rule configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfig {
    /// Minutes before the slot after which rescheduling is refused
    pub reschedule_lead_minutes: i64,
    /// Minutes before the slot inside which a customer cancellation pays a fee
    pub cancellation_cutoff_minutes: i64,
    /// Late-cancellation fee as a percentage of the price
    pub cancellation_fee_percent: u8,
    /// Digits per start-of-work code
    pub otp_digits: u8,
    /// Wrong codes before the code locks
    pub otp_max_attempts: u32,
    /// Hours a code stays valid
    pub otp_ttl_hours: i64,
}

/// Notification delivery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Buffered notifications per booking topic before slow subscribers lag
    pub channel_capacity: usize,
    /// Undeliverable notifications kept for redelivery
    pub dlq_max_size: usize,
    /// Seconds between redelivery sweeps of parked notifications
    pub redelivery_interval: u64,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is set but does not parse or
    /// is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`; unset keys take their default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a value does not parse or is out of range.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            server: ServerConfig {
                host: var("HOST", "0.0.0.0"),
                port: parse(&lookup, "PORT", 8080)?,
                shutdown_timeout: parse(&lookup, "SHUTDOWN_TIMEOUT", 30)?,
            },
            booking: BookingConfig {
                reschedule_lead_minutes: parse_within(
                    &lookup,
                    "BOOKING_RESCHEDULE_LEAD_MINUTES",
                    10,
                    0..=MAX_WINDOW_MINUTES,
                )?,
                cancellation_cutoff_minutes: parse_within(
                    &lookup,
                    "BOOKING_CANCELLATION_CUTOFF_MINUTES",
                    60,
                    0..=MAX_WINDOW_MINUTES,
                )?,
                cancellation_fee_percent: parse_within(
                    &lookup,
                    "BOOKING_CANCELLATION_FEE_PERCENT",
                    10,
                    0..=100,
                )?,
                otp_digits: parse_within(&lookup, "BOOKING_OTP_DIGITS", 4, 4..=6)?,
                otp_max_attempts: parse_within(
                    &lookup,
                    "BOOKING_OTP_MAX_ATTEMPTS",
                    5,
                    1..=u32::MAX,
                )?,
                otp_ttl_hours: parse_within(
                    &lookup,
                    "BOOKING_OTP_TTL_HOURS",
                    24,
                    1..=MAX_OTP_TTL_HOURS,
                )?,
            },
            notifier: NotifierConfig {
                channel_capacity: parse(&lookup, "NOTIFIER_CHANNEL_CAPACITY", 256)?,
                dlq_max_size: parse(&lookup, "DLQ_MAX_SIZE", 1000)?,
                redelivery_interval: parse(&lookup, "NOTIFIER_REDELIVERY_INTERVAL", 30)?,
            },
        })
    }

    /// Address to bind, as `host:port`
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl BookingConfig {
    /// The booking rules these settings describe
    #[must_use]
    pub fn policy(&self) -> BookingPolicy {
        BookingPolicy::default()
            .with_reschedule_lead_time(Duration::minutes(self.reschedule_lead_minutes))
            .with_cancellation_cutoff(Duration::minutes(self.cancellation_cutoff_minutes))
            .with_cancellation_fee_percent(self.cancellation_fee_percent)
            .with_otp(
                OtpPolicy::default()
                    .with_digits(self.otp_digits)
                    .with_max_attempts(self.otp_max_attempts)
                    .with_ttl(Duration::hours(self.otp_ttl_hours)),
            )
    }
}

/// One week
const MAX_WINDOW_MINUTES: i64 = 7 * 24 * 60;

/// Thirty days
const MAX_OTP_TTL_HOURS: i64 = 30 * 24;

fn parse_within<T: FromStr + PartialOrd + Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError> {
    let value = parse(lookup, key, default)?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError {
            key: key.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_default_policy() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.booking.policy(), BookingPolicy::default());
        assert_eq!(config.notifier.channel_capacity, 256);
        assert_eq!(config.notifier.dlq_max_size, 1000);
    }

    #[test]
    fn overrides_reach_the_policy() {
        let config = load(&[
            ("PORT", "9000"),
            ("BOOKING_RESCHEDULE_LEAD_MINUTES", "30"),
            ("BOOKING_OTP_DIGITS", "6"),
            ("BOOKING_OTP_MAX_ATTEMPTS", "3"),
        ])
        .unwrap();

        let policy = config.booking.policy();
        assert_eq!(config.server.port, 9000);
        assert_eq!(policy.reschedule_lead_time, Duration::minutes(30));
        assert_eq!(policy.otp.digits, 6);
        assert_eq!(policy.otp.max_attempts, 3);
    }

    #[test]
    fn out_of_range_values_are_reported() {
        for (key, value) in [
            ("BOOKING_RESCHEDULE_LEAD_MINUTES", "-10"),
            ("BOOKING_CANCELLATION_CUTOFF_MINUTES", "-1"),
            ("BOOKING_OTP_TTL_HOURS", "0"),
            ("BOOKING_OTP_TTL_HOURS", "-24"),
            ("BOOKING_OTP_DIGITS", "8"),
            ("BOOKING_OTP_MAX_ATTEMPTS", "0"),
            ("BOOKING_CANCELLATION_FEE_PERCENT", "150"),
        ] {
            let err = load(&[(key, value)]).unwrap_err();
            assert_eq!(err.key, key);
            assert_eq!(err.value, value);
        }

        let zero_lead = load(&[("BOOKING_RESCHEDULE_LEAD_MINUTES", "0")]).unwrap();
        assert_eq!(zero_lead.booking.policy().reschedule_lead_time, Duration::zero());
    }

    #[test]
    fn unparsable_values_are_reported() {
        let err = load(&[("BOOKING_OTP_TTL_HOURS", "a day")]).unwrap_err();
        assert_eq!(err.key, "BOOKING_OTP_TTL_HOURS");
        assert_eq!(err.to_string(), "invalid value 'a day' for BOOKING_OTP_TTL_HOURS");
    }
}
