// Actions are logged by tag and push frames by event name. Message text and
// tokens never reach a log line at info or above.
const DEFAULT_FILTER: &str = "convo_core=debug,info";

/// Route `tracing` output to wherever the host platform looks for it.
///
/// - iOS: os_log under the `com.convo.core` subsystem, plus `<data_dir>/convo.log`
///   so a chat session can be inspected from the simulator container
/// - Android: logcat, tag `convo`
/// - Tests / desktop: stderr, `RUST_LOG` overrides the default filter
///
/// `FfiApp::new()` calls this before loading config, so a malformed
/// `convo_config.json` is already reported. A second `FfiApp` keeps the first
/// subscriber.
pub fn init_logging(#[allow(unused)] data_dir: &str) {
    #[cfg(target_os = "ios")]
    {
        use tracing_subscriber::prelude::*;

        let os_log = tracing_oslog::OsLogger::new("com.convo.core", "default");

        let log_path = std::path::Path::new(data_dir).join("convo.log");
        let _ = std::fs::create_dir_all(data_dir);
        let env_filter = tracing_subscriber::EnvFilter::new(DEFAULT_FILTER);

        let file_layer = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .ok()
            .map(|file| {
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true)
            });

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(os_log)
            .with(file_layer)
            .try_init();
    }

    #[cfg(target_os = "android")]
    {
        use tracing_subscriber::prelude::*;

        let android_layer = paranoid_android::layer("convo")
            .with_filter(tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));

        let _ = tracing_subscriber::registry()
            .with(android_layer)
            .try_init();
    }

    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| DEFAULT_FILTER.into()),
            )
            .try_init();
    }
}
