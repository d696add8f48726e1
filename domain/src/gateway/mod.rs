//! Clients for the external providers the pipeline talks to.

pub mod assembly_ai;
pub mod telephony;
