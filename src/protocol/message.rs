use crate::correlation::CorrelationId;
use crate::Result;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// An application value capable of crossing the transport boundary.
///
/// `KIND` is the stable type tag carried on the wire; inbound dispatch keys
/// handler lookup on it, so it must be unique per message type within a
/// deployment.
///
/// # Example
///
/// ```
/// use duplex_rpc::Transmittable;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct ReadTemperature {
///     unit: String,
/// }
///
/// impl Transmittable for ReadTemperature {
///     const KIND: &'static str = "read-temperature";
/// }
/// ```
pub trait Transmittable: Serialize + DeserializeOwned + Send + 'static {
    /// Stable type tag carried on the wire.
    const KIND: &'static str;
}

/// A tagged, encoded payload.
///
/// The engine routes on `kind` and treats `data` as opaque bytes; only
/// [`Payload::decode`] at the application boundary interprets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    // ---
    /// Type tag used for handler lookup.
    pub kind: String,

    /// JSON-encoded message body.
    pub data: Bytes,
}

impl Payload {
    /// Encode an application value into a tagged payload.
    pub fn encode<T: Transmittable>(value: &T) -> Result<Self> {
        // ---
        let data = Bytes::from(serde_json::to_vec(value)?);
        Ok(Self {
            kind: T::KIND.to_string(),
            data,
        })
    }

    /// Decode the payload body back into an application value.
    ///
    /// The caller chooses the target type; `kind` is a routing tag and is
    /// not re-checked here.
    pub fn decode<T: Transmittable>(&self) -> Result<T> {
        // ---
        let value = serde_json::from_slice(&self.data)?;
        Ok(value)
    }
}

/// Structured description of a server-side failure.
///
/// Raw errors cannot cross the wire; a failed response carries this
/// description instead, and the client reconstructs an error from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFault {
    // ---
    pub kind: String,
    pub message: String,
}

impl RemoteFault {
    /// Fault kind for a synchronous request with no registered handler.
    pub const UNKNOWN_REQUEST_TYPE: &'static str = "unknown-request-type";

    /// Fault kind for a handler that returned an error.
    pub const HANDLER_ERROR: &'static str = "handler-error";

    /// Fault for a request kind nobody handles. `message` carries the
    /// offending kind so the client can report it.
    pub fn unknown_request_type(request_kind: &str) -> Self {
        Self {
            kind: Self::UNKNOWN_REQUEST_TYPE.to_string(),
            message: request_kind.to_string(),
        }
    }

    /// Fault describing a handler failure.
    pub fn handler_error(err: &crate::Error) -> Self {
        Self {
            kind: Self::HANDLER_ERROR.to_string(),
            message: err.to_string(),
        }
    }
}

impl Transmittable for RemoteFault {
    const KIND: &'static str = "remote-fault";
}

impl From<RemoteFault> for Payload {
    fn from(fault: RemoteFault) -> Self {
        // A two-string struct; encoding cannot fail in practice. An empty
        // body decodes to a serialization error on the client, which still
        // fails the call rather than hanging it.
        let data = serde_json::to_vec(&fault).map(Bytes::from).unwrap_or_default();
        Payload {
            kind: RemoteFault::KIND.to_string(),
            data,
        }
    }
}

/// Wire envelope.
///
/// The unit of transport between the client and server engines. Transports
/// deliver frames opaquely; all routing on frame variants happens in the
/// engine's read tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    /// Fire-and-forget message, either direction.
    Async { payload: Payload },

    /// Synchronous request, client to server.
    Request {
        correlation_id: CorrelationId,
        payload: Payload,
    },

    /// Response to a synchronous request, server to client. `payload` is the
    /// handler result on success, or an encoded [`RemoteFault`] on failure.
    Response {
        correlation_id: CorrelationId,
        success: bool,
        payload: Payload,
    },

    /// Channel subscription request, client to server.
    Subscribe { channel: String },

    /// Channel unsubscription request, client to server.
    Unsubscribe { channel: String },
}
