//! DCC (Direct Client-to-Client) transfer subsystem.
//!
//! Everything between a bot's CTCP offer and bytes on disk: offer parsing
//! and resume negotiation, the passive-port pool, the per-job negotiation
//! timer, offer hygiene, and the transfer task itself.

pub mod parser;
pub mod ports;
pub mod security;
pub mod supervisor;
pub mod transfer;
