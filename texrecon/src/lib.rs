// This file makes `texrecon` into a rust library crate.

// The file `main.rs` still exists to make `texrecon` into an executable.

pub mod export_obj;
pub mod import_obj;
pub mod mesh;
pub mod scene;
pub mod texrecon;
pub mod texture;

pub use base;
