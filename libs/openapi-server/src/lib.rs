//! Wire models for the shipyard HTTP API

pub mod models;
