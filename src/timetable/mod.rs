mod model;
pub mod resolver;
pub mod store;

pub use model::{RawSlotKey, SlotProposal};
pub use resolver::{propose_slot, remove_slot, Outcome, RemoveOutcome, Violation};
