pub mod paths;
pub mod settings;

pub use paths::PathManager;
pub use settings::{API_TOKEN_ENV, Settings};

/// Names an extra env file read after the defaults, e.g. per-deployment credentials.
pub const ENV_FILE_VAR: &str = "TUTORDESK_ENV_FILE";

/// Read `.env` files into the process environment before CLI args are parsed.
///
/// Order: `~/.env`, then `./.env`, then the file named by `TUTORDESK_ENV_FILE`.
/// dotenv never overwrites a variable that is already set, so the shell
/// environment and earlier files win.
pub fn load_env_file() {
    if let Some(home) = dirs::home_dir() {
        let _ = dotenv::from_path(home.join(".env"));
    }

    let _ = dotenv::dotenv();

    if let Ok(extra) = std::env::var(ENV_FILE_VAR) {
        if let Err(e) = dotenv::from_path(&extra) {
            tracing::warn!("Could not read {}={}: {}", ENV_FILE_VAR, extra, e);
        }
    }
}
