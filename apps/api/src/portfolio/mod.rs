//! Portfolio generation: user data in, one-time-download project archive out.

pub mod handlers;
pub mod models;
pub mod packager;
pub mod prompts;
pub mod resume_parser;
pub mod synthesizer;
