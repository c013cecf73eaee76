/// Initializes the process-wide logger from `RUST_LOG` (or `info` if unset).
///
/// Every node binary calls this once before starting its HTTP server and
/// background loops; engines log through `log::{debug,info,warn,error}`
/// rather than printing directly.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}
