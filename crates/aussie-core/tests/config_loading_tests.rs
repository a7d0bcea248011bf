//! `load_settings` end-to-end: default-path fallback, a valid config file,
//! the path-traversal guard, and the file-size cap. Mirrors the teacher's
//! `tests/config_settings_tests.rs`/`config_hot_reload_tests.rs` style of
//! driving file-system-backed config loading through real temp files rather
//! than mocking `std::fs`.
//!
//! All assertions live in one `#[test]` function: `load_settings` reads the
//! `AUSSIE_CONFIG_PATH` process environment variable, which Rust's test
//! harness runs concurrently by default, so mutating it across separate test
//! functions would race.

use std::env;
use std::fs;
use std::fs::File;

use aussie_core::config::load_settings;

#[test]
fn load_settings_covers_default_fallback_valid_file_traversal_and_size_cap() {
    let cwd = env::current_dir().expect("current dir");

    // 1. No AUSSIE_CONFIG_PATH and no ./config.json next to it: falls back
    // to defaults rather than erroring.
    env::remove_var("AUSSIE_CONFIG_PATH");
    let defaults = load_settings().expect("missing config file should fall back to defaults");
    assert_eq!(defaults.rate_limit.default_requests_per_window, 100);
    assert!(!defaults.dangerous_noop);

    // 2. A valid config file, placed inside the working directory so the
    // traversal guard's `starts_with(current_dir)` check passes.
    let workdir = tempfile::Builder::new()
        .prefix("aussie-cfg-valid-")
        .tempdir_in(&cwd)
        .expect("tempdir in cwd");
    let config_path = workdir.path().join("config.json");
    fs::write(
        &config_path,
        r#"{"rateLimit":{"defaultRequestsPerWindow":250,"defaultWindowSeconds":30,"defaultBurstCapacity":250},"forwarding":{"gatewayId":"test-gateway"}}"#,
    )
    .expect("write config file");
    env::set_var("AUSSIE_CONFIG_PATH", &config_path);
    let loaded = load_settings().expect("valid config file should load");
    assert_eq!(loaded.rate_limit.default_requests_per_window, 250);
    assert_eq!(loaded.forwarding.gateway_id, "test-gateway");
    env::remove_var("AUSSIE_CONFIG_PATH");

    // 3. A config file outside the working directory is rejected even
    // though it exists and parses fine.
    let outside = tempfile::Builder::new()
        .prefix("aussie-cfg-outside-")
        .tempfile()
        .expect("tempfile outside cwd");
    fs::write(outside.path(), r#"{}"#).expect("write outside config");
    env::set_var("AUSSIE_CONFIG_PATH", outside.path());
    let traversal_result = load_settings();
    assert!(
        traversal_result.is_err(),
        "config path outside the working directory must be rejected"
    );
    env::remove_var("AUSSIE_CONFIG_PATH");

    // 4. A config file over the size cap is rejected before it's parsed.
    let oversized_dir = tempfile::Builder::new()
        .prefix("aussie-cfg-oversized-")
        .tempdir_in(&cwd)
        .expect("tempdir in cwd");
    let oversized_path = oversized_dir.path().join("config.json");
    let file = File::create(&oversized_path).expect("create oversized config file");
    file.set_len(10 * 1024 * 1024 + 1).expect("extend past the size cap");
    env::set_var("AUSSIE_CONFIG_PATH", &oversized_path);
    let size_result = load_settings();
    assert!(size_result.is_err(), "oversized config file must be rejected");
    env::remove_var("AUSSIE_CONFIG_PATH");
}

#[test]
fn dangerous_noop_in_production_fails_startup_safety_validation() {
    let mut settings = aussie_core::config::AussieSettings::default();
    settings.dangerous_noop = true;
    settings.production = true;
    assert!(settings.validate_startup_safety().is_err());

    settings.production = false;
    assert!(settings.validate_startup_safety().is_ok());
}
