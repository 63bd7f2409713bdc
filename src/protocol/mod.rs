//! Wire protocol: frames and payloads exchanged between client and server.

mod message;

pub use message::{Frame, Payload, RemoteFault, Transmittable};
