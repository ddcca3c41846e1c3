//! Domain helpers shared by actions and HTTP handlers.

pub mod invoice;
pub mod phone;
pub mod scoring;
pub mod share;
pub mod templates;
