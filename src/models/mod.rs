//! Domain model module declarations.

pub mod backup;
pub mod schedule;
pub mod state;
