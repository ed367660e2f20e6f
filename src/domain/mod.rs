//! Domain model: aggregates, value objects, stock reservation and events.
pub mod aggregates;
pub mod events;
pub mod inventory;
pub mod value_objects;
