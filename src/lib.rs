pub mod forge;
pub mod lamport;
pub mod util;

#[macro_use]
extern crate log;
