//! Core components, types, and utilities for potato-health.
//!
//! This module contains fundamental building blocks used throughout the application:
//! - Configuration handling and environment variables.
//! - Utterance templates for bot interactions.
//! - The error taxonomy and the request-scoped data model.

pub mod config;
pub mod error;
pub mod prompts;
pub mod types;
