//! lessonforge: turn a topic request into an interactive lesson module authored by a
//! generative model, validate it against a security and structure policy, repair it
//! within a bounded retry budget, and render it through a capability-scoped sandbox.

pub mod config;
pub mod errors;
pub mod generate;
pub mod lessons;
pub mod logging;
pub mod pipeline;
pub mod sandbox;
pub mod util;
pub mod validator;
