//! Progress UI: one indicatif bar per download.

use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use segfetch_core::ProgressSink;

const BAR_TEMPLATE: &str =
    "{msg:30!} [{bar:30}] {bytes:>10}/{total_bytes:<10} {bytes_per_sec:>12} {eta:>4}";
const SPINNER_TEMPLATE: &str = "{spinner} {msg:30!} {bytes:>10} {bytes_per_sec:>12}";

/// Hands out progress sinks that render inside one [`MultiProgress`].
#[derive(Debug, Clone)]
pub(crate) struct ProgressBoard {
    multi: Option<MultiProgress>,
}

impl ProgressBoard {
    /// Creates a board; a disabled board hands out no sinks.
    pub(crate) fn new(enabled: bool) -> Self {
        let multi = enabled.then(|| MultiProgress::with_draw_target(ProgressDrawTarget::stderr()));
        Self { multi }
    }

    /// Returns a sink for the download of `name`.
    pub(crate) fn sink(&self, name: &str) -> Option<Arc<dyn ProgressSink>> {
        let multi = self.multi.as_ref()?;
        let bar = multi.add(ProgressBar::no_length());
        bar.set_style(
            ProgressStyle::with_template(SPINNER_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(name.to_string());
        Some(Arc::new(BarSink { bar }))
    }
}

#[derive(Debug)]
struct BarSink {
    bar: ProgressBar,
}

impl ProgressSink for BarSink {
    fn start(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
    }

    fn add(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn finish(&self) {
        self.bar.finish();
    }
}

impl Drop for BarSink {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_board_hands_out_no_sinks() {
        assert!(ProgressBoard::new(false).sink("a.bin").is_none());
    }

    #[test]
    fn test_bar_sink_tracks_bytes() {
        let bar = ProgressBar::hidden();
        let sink = BarSink { bar: bar.clone() };
        sink.start(100);
        sink.add(40);
        sink.add(60);
        assert_eq!(bar.position(), 100);
        assert_eq!(bar.length(), Some(100));
        sink.finish();
        assert!(bar.is_finished());
    }
}
