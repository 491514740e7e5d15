#![forbid(unsafe_code)]

pub mod ir;

pub mod render;
pub mod verify;

pub use ir::*;
pub use verify::*;
