//! Binary entrypoint.
//!
//! Exit codes: 0 on clean shutdown, 2 for configuration errors at
//! startup. Runtime failures never exit the process; they are logged,
//! reflected in readiness, and surfaced as HTTP errors.

use ncmcp_core::{BridgeError, Settings};
use ncmcp_server::lifecycle;
use ncmcp_telemetry::{TelemetryConfig, TelemetryGuard};

#[tokio::main]
async fn main() {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    let _telemetry = match TelemetryGuard::init(TelemetryConfig::from_settings(&settings)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("telemetry initialization failed: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = lifecycle::run(settings).await {
        match e {
            BridgeError::Config(ref detail) => {
                tracing::error!(detail, "startup failed");
                eprintln!("startup failed: {detail}");
                std::process::exit(2);
            }
            other => {
                tracing::error!(error = %other, "bridge terminated with an error");
                std::process::exit(1);
            }
        }
    }
}
