//! End-to-end tests live in `tests/`; run them with `cargo test -p barrage-tests --features integration`.
