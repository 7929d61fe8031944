//! Commission Service - Split commission generation gated on client payment verification.

pub mod config;
pub mod models;
pub mod services;
pub mod startup;
