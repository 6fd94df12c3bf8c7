//! Output-based success checks for an episode's tests.

use super::curriculum::TestCase;

/// Whether `stdout` satisfies every test.
///
/// A test passes when each of its non-empty expected substrings occurs in
/// `stdout`. No tests, or tests without expectations, always pass.
pub fn check_success_criteria(stdout: &str, tests: &[TestCase]) -> bool {
    tests.iter().all(|test| {
        test.expect
            .iter()
            .all(|expected| expected.is_empty() || stdout.contains(expected.as_str()))
    })
}
