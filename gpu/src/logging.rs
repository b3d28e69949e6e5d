//! Logger setup for binaries and tests using lumen-gpu.
//!
//! The library itself only emits through the `log` facade:
//!
//! - `warn!` - a dispatch faulted on the device
//! - `info!` - device opened, backend chosen
//! - `debug!` - buffer allocation, pipeline builds
//! - `trace!` - each submission and its completion
//!
//! ```bash
//! RUST_LOG=lumen_gpu=trace lumen add-one --len 4096
//! RUST_LOG=lumen_gpu::software=debug cargo test -p lumen-gpu
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Install a logger at Warn. Later calls are no-ops.
pub fn init() {
    init_with_level(LevelFilter::Warn);
}

/// Install a logger filtering at `level`. Later calls are no-ops.
pub fn init_with_level(level: LevelFilter) {
    INIT.call_once(|| {
        let _ = Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{:5}] {} - {}",
                    record.level(),
                    record.module_path().unwrap_or("lumen"),
                    record.args()
                )
            })
            .try_init();
    });
}

/// Install a logger configured by `RUST_LOG`, falling back to `warn`.
pub fn init_from_env() {
    INIT.call_once(|| {
        let _ = Builder::from_env(env_logger::Env::default().default_filter_or("warn")).try_init();
    });
}

/// Logger for unit and integration tests. Output is captured by the
/// harness; safe to call from every test.
pub fn init_test() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .parse_default_env()
        .is_test(true)
        .try_init();
}

/// Whether [`init`], [`init_with_level`] or [`init_from_env`] has run.
pub fn is_initialized() -> bool {
    INIT.is_completed()
}
