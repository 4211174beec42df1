//! Domain types shared by the document pipeline and the accounting sync,
//! plus the ports (traits) that the infrastructure layer implements.

pub mod accounting;
pub mod document;
pub mod ports;
