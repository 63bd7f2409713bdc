//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! transport traits, exposed only through constructor functions.
//!
//! Domain code must not depend on transport-specific types.

mod memory;

pub use memory::{
    //
    create_memory_client_transport,
    create_memory_client_transport_with_hub,
    create_memory_server_transport,
    create_memory_server_transport_with_hub,
    MemoryHub,
};
