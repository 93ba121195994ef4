use tracing_subscriber::EnvFilter;

/// Initialize tracing output on stderr, keeping stdout clean for the chat
/// prompt. `RUST_LOG` takes precedence over the verbosity count.
pub fn setup_logging(verbose_level: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let filter_str = match verbose_level {
            0 => "warn,spare_cycles=info",
            1 => "info,spare_cycles=debug",
            _ => "debug,spare_cycles=trace",
        };
        EnvFilter::new(filter_str)
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
