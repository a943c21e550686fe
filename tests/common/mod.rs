#![allow(dead_code)]

pub mod builders;
pub mod clients;

pub use builders::*;
pub use clients::*;
