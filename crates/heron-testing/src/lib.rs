use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static INIT_TEST_LOGGING: std::sync::Once = std::sync::Once::new();

/// Makes sure logging is initialized for test.
///
/// This needs to be called on each test.
pub fn init_test_logging() {
    INIT_TEST_LOGGING.call_once(|| {
        let fmt_layer = tracing_subscriber::fmt::layer().with_test_writer();

        tracing_subscriber::registry()
            .with(EnvFilter::new("heron_=trace,info"))
            .with(fmt_layer)
            .with(tracing_error::ErrorLayer::default())
            .try_init()
            .unwrap();
    });
}

/// Create a temporary directory to write checkpoint artifacts to.
///
/// The directory is removed when the returned value is dropped.
pub fn temp_checkpoint_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("heron-checkpoint")
        .tempdir()
        .expect("create temp checkpoint dir")
}
