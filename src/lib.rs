#[macro_use]
extern crate tracing;

pub mod annotations;
pub mod cache;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod merge;
pub mod object;
pub mod pipeline;
pub mod resources;
pub mod selector;
pub mod source;
pub mod synth;
pub mod template;
pub mod watch;
