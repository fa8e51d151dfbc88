//! Console client for RTVI voice sessions.
//!
//! Reads settings from the environment (see [`config`]), starts a session and
//! turns stdin lines into session commands (see [`console`]).

pub mod config;
pub mod console;
