//! Utilities for logging.
use std::io;

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    HumanReadable,
    Json,
}

/// Configure the global subscriber.
///
/// The default level may be overridden with `RUST_LOG`. Calling this more
/// than once is a no-op, the first configured subscriber wins.
pub fn configure_global_logger<W>(default_level: tracing::Level, format: LogFormat, writer: W)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_file(true)
        .with_line_number(true);

    let _ = match format {
        LogFormat::HumanReadable => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// Configure a subscriber that writes through the test harness.
pub fn configure_test_logger() {
    configure_global_logger(tracing::Level::DEBUG, LogFormat::HumanReadable, || {
        TestWriter
    });
}

/// Writer routing output through `print!` so that it's captured by the test
/// harness.
#[derive(Debug, Clone, Copy)]
struct TestWriter;

impl io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        print!("{}", String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
