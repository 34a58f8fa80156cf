//! Background delivery of listener events.

pub(crate) mod dispatcher;
pub mod executor;
