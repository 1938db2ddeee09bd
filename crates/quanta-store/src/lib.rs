// crates/quanta-store/src/lib.rs
//
// quanta-store: Storage layer for survey payout apportionment.
//
// Provides an in-memory store (tests and ephemeral runs) and a RocksDB-backed
// persistent store. Both implement every trait in `quanta_core::traits` plus
// the compare-and-swap `ApportionmentCache`, and agree on its semantics via
// `quanta_core::cas_decision`.

pub mod memory;
pub mod rocks;

// Re-export key types for ergonomic access from downstream crates.
pub use memory::MemoryStore;
pub use rocks::RocksStore;
