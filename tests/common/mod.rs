#![allow(dead_code)]

pub mod callbacks;
pub mod harness;
pub mod models;

pub use callbacks::*;
pub use harness::*;
pub use models::*;
