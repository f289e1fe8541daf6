//! Runtime adapter implementations.

pub mod command;
