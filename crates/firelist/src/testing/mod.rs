//! Test doubles and helpers for hosts and for this crate's own tests
//!
//! The fakes behave like live collaborators (synchronous replay on subscribe,
//! callbacks invoked without internal locks held) so engine behavior observed
//! against them carries over to real queries.

mod fake_query;
mod fake_snapshot_query;
mod recorder;

pub use fake_query::FakeQuery;
pub use fake_snapshot_query::FakeSnapshotQuery;
pub use recorder::Recorder;

use firelist_api::Keyed;
use similar::TextDiff;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a test-friendly tracing subscriber once per process.
///
/// Defaults to `info`; override with `RUST_LOG` (e.g. `RUST_LOG=firelist=trace`).
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Another test may have installed it already
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}

/// Assert that `actual` holds exactly the keys in `expected`, in order.
///
/// Mismatches panic with a unified diff of the two key lists.
pub fn assert_keys<T: Keyed>(actual: &[T], expected: &[&str]) {
    let actual_text = actual
        .iter()
        .map(|item| item.key())
        .collect::<Vec<_>>()
        .join("\n");
    let expected_text = expected.join("\n");

    let diff = TextDiff::from_lines(&expected_text, &actual_text);
    if diff.ratio() < 1.0 {
        panic!(
            "Key sequence mismatch:\nExpected ({} keys):\n{}\n\nActual ({} keys):\n{}\n\nDiff:\n{}",
            expected.len(),
            expected_text,
            actual.len(),
            actual_text,
            diff.unified_diff()
                .context_radius(3)
                .header("expected", "actual")
        );
    }
}
