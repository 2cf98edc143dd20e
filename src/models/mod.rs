//! # Data Models
//!
//! SeaORM entities written by the ingestion pipeline.

pub mod user_event;

pub use user_event::Entity as UserEvent;
