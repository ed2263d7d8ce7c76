//! Estuary lifecycle management
//!
//! One actor per estuary tracks which sources it is subscribed to and owns
//! the TTL alarm. When the alarm fires the estuary detaches itself from every
//! source registry, deletes its stream, and clears its state; the next
//! subscribe re-initializes it from scratch.

mod actor;
mod handle;

pub use handle::{EstuaryHandle, EstuaryRouter};
