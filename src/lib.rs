//! zcode-runner library
//!
//! Core of a coding-practice runner:
//! - Sandboxed in-process JavaScript evaluation and a Piston remote client
//! - An execution dispatcher that folds both into one result contract
//! - A Gemini client for generating, judging and explaining challenges
//! - Points ledger, configuration and an MCP server surface

pub mod ai;
pub mod backend;
pub mod config;
pub mod dispatch;
pub mod language;
pub mod mcp;
pub mod score;
