//! Configuration loading must fail loudly on malformed input.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use tempfile::TempDir;
use warm_config::Config;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct EnvOverride {
    key: &'static str,
    previous: Option<OsString>,
    guard: Option<MutexGuard<'static, ()>>,
}

impl EnvOverride {
    fn set_var(key: &'static str, value: &OsStr) -> Self {
        let guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        let previous = std::env::var_os(key);
        // Environment mutation is `unsafe` on the 2024 edition; the guard
        // serialises access and `Drop` restores the previous value.
        unsafe { std::env::set_var(key, value) };
        Self {
            key,
            previous,
            guard: Some(guard),
        }
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            None => unsafe { std::env::remove_var(self.key) },
        }
        drop(self.guard.take());
    }
}

#[test]
fn malformed_config_file_is_rejected() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let path = temp_dir.path().join("warm.toml");
    fs::write(&path, "listen_port = not_a_number\n").expect("write malformed config");

    let args = vec![
        OsString::from("warmd"),
        OsString::from("--config-path"),
        path.into_os_string(),
    ];

    let error = Config::load_from_iter(args).expect_err("loading must fail");
    assert!(
        !error.to_string().is_empty(),
        "error should describe the failure"
    );
}

#[test]
fn out_of_range_port_from_environment_is_rejected() {
    let _env = EnvOverride::set_var("WARM_LISTEN_PORT", OsStr::new("70000"));
    let args = vec![OsString::from("warmd")];
    assert!(
        Config::load_from_iter(args).is_err(),
        "port above u16::MAX must not load"
    );
}

#[test]
fn invalid_log_format_flag_is_rejected() {
    let args = vec![
        OsString::from("warmd"),
        OsString::from("--log-format"),
        OsString::from("pretty"),
    ];
    assert!(Config::load_from_iter(args).is_err());
}
