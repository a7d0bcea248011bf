//! Configuration validation with categorized feedback. Grounded on the
//! teacher's `ConfigValidator` / `ValidationResult`
//! (`crates/kairos-rs/src/config/validation.rs`) — same three-bucket
//! error/warning/recommendation structure, re-pointed from router-list
//! checks to gateway-settings checks.

use log::{info, warn};

use crate::config::settings::AussieSettings;

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            ..Default::default()
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_recommendation(&mut self, recommendation: String) {
        self.recommendations.push(recommendation);
    }
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate_comprehensive(settings: &AussieSettings) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::validate_limits(settings, &mut result);
        Self::validate_rate_limit(settings, &mut result);
        Self::validate_session(settings, &mut result);
        Self::validate_websocket(settings, &mut result);
        Self::validate_dev_bypass(settings, &mut result);

        Self::log_validation_results(&result);
        result
    }

    fn validate_limits(settings: &AussieSettings, result: &mut ValidationResult) {
        if settings.limits.max_body_size == 0 {
            result.add_error("limits.maxBodySize must be greater than zero".to_string());
        }
        if settings.limits.max_header_size > settings.limits.max_total_headers_size {
            result.add_error(
                "limits.maxHeaderSize cannot exceed limits.maxTotalHeadersSize".to_string(),
            );
        }
        if settings.limits.max_body_size > 100 * 1024 * 1024 {
            result.add_warning(format!(
                "limits.maxBodySize is {} bytes, unusually large for a gateway",
                settings.limits.max_body_size
            ));
        }
    }

    fn validate_rate_limit(settings: &AussieSettings, result: &mut ValidationResult) {
        if settings.rate_limit.enabled && settings.rate_limit.default_requests_per_window == 0 {
            result.add_error(
                "rateLimit.defaultRequestsPerWindow must be greater than zero when enabled"
                    .to_string(),
            );
        }
        if settings.rate_limit.default_burst_capacity < settings.rate_limit.default_requests_per_window {
            result.add_recommendation(
                "rateLimit.defaultBurstCapacity is lower than defaultRequestsPerWindow; bursts will be rejected before the window limit is reached".to_string(),
            );
        }
        if !settings.rate_limit.enabled {
            result.add_warning(
                "rate limiting is disabled; backends are exposed to unbounded request volume"
                    .to_string(),
            );
        }
    }

    fn validate_session(settings: &AussieSettings, result: &mut ValidationResult) {
        if settings.session.enabled {
            if settings.session.idle_timeout_secs > settings.session.ttl_secs {
                result.add_warning(
                    "session.idleTimeoutSecs exceeds session.ttlSecs; idle timeout will never trigger before absolute expiry".to_string(),
                );
            }
            if !settings.session.cookie.secure {
                result.add_warning(
                    "session.cookie.secure is false; session cookies will be sent over plain HTTP"
                        .to_string(),
                );
            }
            if !settings.session.cookie.http_only {
                result.add_warning(
                    "session.cookie.httpOnly is false; session cookies are readable from JavaScript"
                        .to_string(),
                );
            }
        }
        if settings.session.jws.enabled && settings.session.jws.issuer.is_empty() {
            result.add_error("session.jws.issuer must not be empty when JWS is enabled".to_string());
        }
    }

    fn validate_websocket(settings: &AussieSettings, result: &mut ValidationResult) {
        if settings.websocket.ping.enabled
            && settings.websocket.ping.timeout_secs >= settings.websocket.ping.interval_secs
        {
            result.add_warning(
                "websocket.ping.timeoutSecs should be smaller than websocket.ping.intervalSecs to avoid overlapping pings".to_string(),
            );
        }
        if settings.websocket.idle_timeout_secs > settings.websocket.max_lifetime_secs {
            result.add_recommendation(
                "websocket.idleTimeoutSecs exceeds websocket.maxLifetimeSecs; the lifetime cap will always fire first".to_string(),
            );
        }
    }

    fn validate_dev_bypass(settings: &AussieSettings, result: &mut ValidationResult) {
        if settings.dangerous_noop {
            if settings.production {
                result.add_error(
                    "dangerousNoop is enabled while production=true".to_string(),
                );
            } else {
                result.add_warning(
                    "dangerousNoop is enabled: every request authenticates as an admin principal"
                        .to_string(),
                );
            }
        }
    }

    fn log_validation_results(result: &ValidationResult) {
        if result.is_valid {
            info!("configuration validation passed");
        } else {
            for error in &result.errors {
                log::error!("validation error: {error}");
            }
        }
        for warning in &result.warnings {
            warn!("validation warning: {warning}");
        }
        for recommendation in &result.recommendations {
            info!("recommendation: {recommendation}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_inverted_header_limits() {
        let mut settings = AussieSettings::default();
        settings.limits.max_header_size = settings.limits.max_total_headers_size + 1;
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(!result.is_valid);
    }

    #[test]
    fn dangerous_noop_in_production_is_an_error() {
        let mut settings = AussieSettings::default();
        settings.dangerous_noop = true;
        settings.production = true;
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(!result.is_valid);
    }

    #[test]
    fn default_settings_are_valid() {
        let result = ConfigValidator::validate_comprehensive(&AussieSettings::default());
        assert!(result.is_valid);
    }
}
