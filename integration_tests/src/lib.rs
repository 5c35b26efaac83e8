//! Turn-level test suites live under `tests/`.
