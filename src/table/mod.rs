// Concurrent counting table and its worker coordinator
pub mod counter;
pub mod counting_table;

pub use counter::{DrainStats, FullPolicy, HashCounter, Operation};
pub use counting_table::{AddOutcome, CountingTable, Slot, TableParams};
