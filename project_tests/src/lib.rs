//! Integration test harness for the live-update pipeline. All test cases
//! live under `tests/`; this crate exists only to anchor them in the
//! workspace.
