use std::fmt::Display;
use std::sync::LazyLock;
use std::time::Instant;

use console::Style;
use indicatif::ProgressStyle;

const ANSI_BLUE: Style = Style::new().blue();

pub(crate) static STYLE_BAR: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("#>-")
});

pub(crate) static STYLE_TASK: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("  {spinner:.blue} {span_name} {msg} [{elapsed}]")
        .expect("Error setting task spinner template")
});

/// Elapsed time since `s`, formatted for log lines.
pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Installs the global subscriber: `RUST_LOG` filtering (default `info`),
/// formatted events, and progress bars for task spans. Only the first call
/// does anything, and a subscriber installed by the caller is left alone.
#[cfg(feature = "logging")]
pub(crate) fn init_logging() {
    use std::sync::Once;

    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let indicatif = IndicatifLayer::new();

        let result = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(indicatif.get_stderr_writer()))
            .with(indicatif)
            .try_init();

        if result.is_err() {
            tracing::debug!("a global subscriber is already installed");
        }
    });
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overhead_is_in_milliseconds() {
        let shown = as_overhead(Instant::now()).to_string();
        assert!(shown.contains("(+"));
        assert!(shown.contains("ms)"));
    }
}
