// src/lib.rs

// Public modules (the hdlc driver API)
pub mod config;
pub mod cover;
pub mod elab;
pub mod pipeline;

// Targeted re-exports for embedding tools.
pub use config::{Config, ConfigError};
pub use cover::{CoverError, CoverTag, CoverTagging, TagKind, ToggleShape};
pub use elab::{ElabError, ElabGraph, Elaborator, Instance, InstanceId, Port, PortBinding, Signal};
pub use pipeline::{Compilation, PipelineError, UnitReport, analyse_parallel};
pub use hdlc_sema::{Analysis, Options, Session};
