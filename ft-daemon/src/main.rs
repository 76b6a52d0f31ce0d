//! FanTuner daemon (fantunerd)
//!
//! Background service driving case and CPU fans from temperature curves.
//! Unprivileged clients talk to it over a Unix domain socket using the
//! length-prefixed JSON schema in `ft-protocol`.
//!
//! Startup is phased: process hardening first, then logging, then hardware
//! bring-up, then the control loop and the IPC endpoint. Shutdown closes
//! the listener before the control loop hands every fan back to firmware
//! control.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use ft_core::{
    ConfigStore, HardwareAdapter, HwmonAdapter, MockAdapter, SafetySupervisor, SystemClock,
};

use ft_daemon::control_loop::{ControlLoop, DaemonState};
use ft_daemon::server;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Seed for the mock adapter so repeated `--mock` runs replay identically
const MOCK_SEED: u64 = 0xF47;

// ============================================================================
// Security Hardening
// ============================================================================

/// Remove loader/resolver variables a caller could use to influence a
/// privileged process, and pin PATH and locale.
fn sanitize_environment() {
    const DANGEROUS_VARS: &[&str] = &[
        "LD_PRELOAD",
        "LD_LIBRARY_PATH",
        "LD_AUDIT",
        "LD_DEBUG",
        "HOSTALIASES",
        "RES_OPTIONS",
        "IFS",
    ];
    for var in DANGEROUS_VARS {
        std::env::remove_var(var);
    }
    std::env::set_var("PATH", "/usr/sbin:/usr/bin:/sbin:/bin");
    std::env::set_var("LC_ALL", "C");
    debug!("environment sanitized");
}

fn set_resource_limits() {
    // no core dumps from a privileged process
    set_rlimit(libc::RLIMIT_CORE as i32, 0, 0);
    // socket + clients + sysfs handles + logging
    set_rlimit(libc::RLIMIT_NOFILE as i32, 1024, 1024);
    debug!("resource limits applied");
}

fn set_rlimit(resource: i32, soft: u64, hard: u64) {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // SAFETY: setrlimit only reads the properly initialized limit struct and
    // the resource constant is a known RLIMIT_* value.
    unsafe {
        #[allow(clippy::useless_conversion)]
        if libc::setrlimit(resource as libc::__rlimit_resource_t, &limit) != 0 {
            warn!("failed to set rlimit for resource {}", resource);
        }
    }
}

fn set_secure_umask() {
    // SAFETY: umask only sets the file creation mask for this process.
    unsafe { libc::umask(0o077) };
}

fn secure_working_directory() {
    if std::env::set_current_dir("/").is_err() {
        warn!("could not chdir to /");
    }
}

fn is_root() -> bool {
    // SAFETY: geteuid just returns the effective user ID.
    unsafe { libc::geteuid() == 0 }
}

// ============================================================================
// PID File Management
// ============================================================================

fn write_pid_file(path: &Path) -> std::io::Result<()> {
    use std::io::Write;

    if path.exists() {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(old_pid) = content.trim().parse::<i32>() {
                // SAFETY: kill with signal 0 only checks process existence.
                if unsafe { libc::kill(old_pid, 0) } == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        format!("another instance is running (PID {})", old_pid),
                    ));
                }
            }
        }
        let _ = std::fs::remove_file(path);
    }

    let mut file = std::fs::File::create(path)?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()?;
    debug!("PID file written: {:?}", path);
    Ok(())
}

fn cleanup(pid_file: Option<&Path>) {
    if let Some(path) = pid_file {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("failed to remove PID file: {}", e);
            }
        }
    }
}

// ============================================================================
// CLI
// ============================================================================

fn print_help() {
    eprintln!("fantunerd {} - FanTuner background fan-control daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    fantunerd [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("        --mock       Use the simulated hardware adapter");
    eprintln!("    -v, --version    Print version");
    eprintln!("    -h, --help       Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    FANTUNER_LOG         Log level (trace, debug, info, warn, error)");
    eprintln!("    FANTUNER_SOCKET      Socket path override");
    eprintln!("    FANTUNER_CONFIG_DIR  Configuration directory override");
}

fn init_logging() {
    let log_level = std::env::var("FANTUNER_LOG").unwrap_or_else(|_| "info".to_string());

    let mut use_journald = Path::new("/run/systemd/journal/socket").exists();
    if use_journald {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
            }
            Err(e) => {
                eprintln!("journald unavailable ({}), logging to stdout", e);
                use_journald = false;
                tracing_subscriber::fmt()
                    .with_target(false)
                    .with_env_filter(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
            }
        }
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(tracing_subscriber::EnvFilter::new(&log_level))
            .init();
    }

    info!(
        "logging to {} at level {}",
        if use_journald { "systemd journal" } else { "stdout" },
        log_level
    );
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // panics must not take the daemon down silently
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        eprintln!("PANIC at {}: {}", location, message);
    }));

    sanitize_environment();
    set_secure_umask();
    set_resource_limits();
    secure_working_directory();

    let mut use_mock = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--mock" => use_mock = true,
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            "-v" | "--version" => {
                println!("fantunerd {}", VERSION);
                return Ok(());
            }
            other => {
                eprintln!("unknown argument: {}", other);
                print_help();
                std::process::exit(1);
            }
        }
    }

    init_logging();
    info!("STARTUP: fantunerd {} (adapter: {})", VERSION, if use_mock { "mock" } else { "hwmon" });
    info!("STARTUP: PID {}", std::process::id());

    if !use_mock && !is_root() {
        warn!("not running as root: PWM controls will likely classify as monitor-only");
    }

    // PID file only where we can write it
    let pid_file = is_root().then(|| Path::new(ft_core::constants::paths::PID_FILE));
    if let Some(path) = pid_file {
        if let Err(e) = write_pid_file(path) {
            error!("could not write PID file: {}", e);
            std::process::exit(1);
        }
    }

    let clock = Arc::new(SystemClock);
    let adapter: Arc<dyn HardwareAdapter> = if use_mock {
        Arc::new(MockAdapter::new(clock.clone(), MOCK_SEED))
    } else {
        Arc::new(HwmonAdapter::new(clock.clone()))
    };

    // adapter bring-up failure is fatal
    let init_adapter = adapter.clone();
    let warnings = match tokio::task::spawn_blocking(move || init_adapter.initialize()).await? {
        Ok(warnings) => warnings,
        Err(e) => {
            error!("hardware adapter failed to initialize: {}", e);
            cleanup(pid_file);
            std::process::exit(1);
        }
    };
    for warning in &warnings {
        warn!("adapter: {}", warning);
    }

    let store = ConfigStore::new(clock.clone());
    let config = store.load()?;
    let supervisor = SafetySupervisor::default();
    supervisor.update_thresholds(&config);

    let state = DaemonState::new(adapter, store, supervisor, clock);
    *state
        .adapter_warnings
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = warnings;

    // SIGINT/SIGTERM request a graceful stop; the control loop restores
    // firmware fan control on its way out
    let signal_state = state.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: shutdown requested");
        signal_state.request_shutdown();
    }) {
        warn!("failed to install signal handler: {}", e);
    }

    let control_handle = tokio::spawn(ControlLoop::new(state.clone()).run());
    info!("control loop started");

    let socket_path = server::default_socket_path();
    let result = server::run_server(&socket_path, state.clone()).await;

    // the listener is already closed; stop the loop and let it revert fans
    state.request_shutdown();
    let _ = control_handle.await;

    cleanup(pid_file);

    if let Err(e) = result {
        error!("endpoint failed: {}", e);
        std::process::exit(1);
    }
    info!("SHUTDOWN: fantunerd terminated cleanly");
    Ok(())
}
