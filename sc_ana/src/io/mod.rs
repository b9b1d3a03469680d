//! Analysis artifact writers.

pub mod csv;
