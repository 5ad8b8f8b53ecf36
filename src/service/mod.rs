//! Service integrations for external APIs and clients.
//!
//! This module contains implementations for the services potato-health talks to:
//! - Blob storage (e.g., S3)
//! - Conversational bots (e.g., Lex V2)
//! - Weather forecasts (e.g., SMHI)
//!
//! Each service module defines both generic traits and concrete implementations,
//! allowing for extensibility and easy testing.

pub mod blob;
pub mod bot;
pub mod retry;
pub mod weather;
