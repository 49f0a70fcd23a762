//! dealflow: inbound deal email to CRM pipeline.

pub mod config;
pub mod crm;
pub mod error;
pub mod extract;
pub mod llm;
pub mod mail;
pub mod pipeline;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;
