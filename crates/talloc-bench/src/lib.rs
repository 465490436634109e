//! Benchmark-only crate; see `benches/heap_bench.rs`.
