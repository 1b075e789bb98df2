//! Durable work queue
//!
//! This module provides:
//! - A broker seam ([`Broker`], [`BrokerChannel`], [`Delivery`]) with lapin
//!   and in-process implementations
//! - [`QueueConnection`], the supervised connection with bounded reconnects
//! - [`QueueClient`], persistent publishing and single-slot consumption with
//!   capped redelivery and a dead-letter queue

pub mod amqp;
pub mod broker;
pub mod client;
pub mod connection;
pub mod error;
pub mod memory;

#[cfg(test)]
mod tests;

pub use amqp::AmqpBroker;
pub use broker::{
    Broker, BrokerChannel, Delivery, DeliveryStream, Envelope, DELIVERY_ATTEMPT_HEADER,
    FAILURE_REASON_HEADER,
};
pub use client::{MessageHandler, QueueClient, RedeliveryPolicy, Settlement};
pub use connection::{ConnectionState, QueueConnection};
pub use error::QueueError;
pub use memory::InMemoryBroker;
