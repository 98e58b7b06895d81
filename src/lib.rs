//! Typed access to deployed smart contracts: interface parsing, read-only
//! calls, signed transactions and event consumption over pluggable node
//! backends.

pub mod config;
pub mod counter;
pub mod ethereum;
