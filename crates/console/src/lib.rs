//! Console front end: a line-oriented stand-in for the chat transport.

pub mod cli;
pub mod outbound;
pub mod plugins;
pub mod run;
