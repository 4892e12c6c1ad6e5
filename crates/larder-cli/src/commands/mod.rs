pub mod common;
pub mod locations;
pub mod records;
pub mod sync;
