// src/command/mod.rs

//! Command descriptions handed to the scheduler.
//!
//! - [`spec`] holds [`CommandSpec`], the immutable description of one
//!   command (argv or pre-escaped shell line, cwd, env, stdin, timeout).
//! - [`batch`] holds [`Batch`], the ordered `id -> CommandSpec` mapping
//!   submitted to one `Scheduler::exec` call.

pub mod batch;
pub mod spec;

pub use batch::Batch;
pub use spec::CommandSpec;
