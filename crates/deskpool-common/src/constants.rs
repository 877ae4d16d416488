//! System-wide constants and default values.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for deskpool data when no home directory is usable.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/deskpool";

/// Returns the data directory, preferring `$HOME/.deskpool`, falling back
/// to `/var/lib/deskpool`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        let user_dir = PathBuf::from(home).join(".deskpool");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Returns the default datastore connection string (a JSON record file
/// inside the data directory).
pub fn default_database_url() -> String {
    format!("file://{}", data_dir().join(RECORD_FILE_NAME).display())
}

/// File name of the JSON record store inside the data directory.
pub const RECORD_FILE_NAME: &str = "records.json";

/// Connection string selecting the process-local in-memory store.
pub const MEMORY_DATABASE_URL: &str = "memory://";

/// Default container image serving the remote desktop.
pub const DEFAULT_IMAGE: &str = "desktop-image:latest";

/// Default container network the desktops are attached to.
pub const DEFAULT_NETWORK: &str = "deskpool_app_network";

/// First host port handed out by default.
pub const DEFAULT_PORT_RANGE_START: u16 = 7000;

/// Last host port (inclusive) handed out by default.
pub const DEFAULT_PORT_RANGE_END: u16 = 8000;

/// Protocol port exposed by the desktop image (noVNC).
pub const DEFAULT_INTERNAL_PORT: u16 = 6080;

/// Maximum automatic restarts for a failing desktop container.
pub const DEFAULT_RESTART_MAX_RETRIES: u32 = 5;

/// Deadline applied to every runtime and store call, in seconds.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

/// Number of fresh allocation scans before a port conflict is reported.
pub const DEFAULT_ALLOCATION_ATTEMPTS: u32 = 3;

/// Host name used when building connection hints.
pub const DEFAULT_PUBLIC_HOST: &str = "localhost";

/// Path of the auto-connecting noVNC page served by the desktop image.
pub const CONNECTION_HINT_PATH: &str = "/vnc_auto.html";

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "deskpool";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "dpool";
