//! Page/record storage.
//!
//! A [`RecordStore`] is an append-and-reclaim file of variable-length
//! binary records, each addressed by a fixed-size durable [`Oid`]. One
//! store file backs one collection. The store owns allocation, free-slot
//! reuse, relocation of records that outgrow their slot, and
//! fsync-on-demand durability.

mod record_store;

pub use record_store::RecordStore;
