pub mod client;
pub mod router;
pub mod wire;

pub use client::TransportClient;
pub use router::{CommandHandler, CommandRouter, OutboundSink, ProgressReporter};
pub use wire::{Inbound, Outbound};
