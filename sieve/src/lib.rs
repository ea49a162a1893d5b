use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod common;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod selector;

pub use error::{Result, SieveError};
pub use pipeline::{Policy, PipelineConfig, RunReport};
