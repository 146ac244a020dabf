pub mod conflation;
pub mod index;
pub mod snapshot;
