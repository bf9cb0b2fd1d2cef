use fanout_core::{CallArgs, Kwargs, RemoteError, Value};
use serde::{Deserialize, Serialize};

/// Envelope kinds on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnvelopeKind {
    Request = 1,
    Ok = 2,
    Err = 3,
}

impl EnvelopeKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(EnvelopeKind::Request),
            2 => Some(EnvelopeKind::Ok),
            3 => Some(EnvelopeKind::Err),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// A remote call: method name, positional args, keyword args
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

impl Request {
    pub fn new(method: impl Into<String>, args: Vec<Value>, kwargs: Kwargs) -> Self {
        Request {
            method: method.into(),
            args,
            kwargs,
        }
    }

    pub fn into_parts(self) -> (String, CallArgs) {
        (self.method, CallArgs::new(self.args, self.kwargs))
    }
}

/// One framed message in either direction
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Client to server
    Request(Request),

    /// Server to client: call returned a value
    Ok(Value),

    /// Server to client: call raised
    Err(RemoteError),
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Request(_) => EnvelopeKind::Request,
            Envelope::Ok(_) => EnvelopeKind::Ok,
            Envelope::Err(_) => EnvelopeKind::Err,
        }
    }

    /// Response envelope for the outcome of a call
    pub fn response(outcome: Result<Value, RemoteError>) -> Self {
        match outcome {
            Ok(value) => Envelope::Ok(value),
            Err(err) => Envelope::Err(err),
        }
    }

    /// The call outcome carried by a response; `None` for requests
    pub fn into_outcome(self) -> Option<Result<Value, RemoteError>> {
        match self {
            Envelope::Ok(value) => Some(Ok(value)),
            Envelope::Err(err) => Some(Err(err)),
            Envelope::Request(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_kind_conversion() {
        assert_eq!(EnvelopeKind::from_u8(1), Some(EnvelopeKind::Request));
        assert_eq!(EnvelopeKind::from_u8(3), Some(EnvelopeKind::Err));
        assert_eq!(EnvelopeKind::from_u8(99), None);

        assert_eq!(EnvelopeKind::Request.as_u8(), 1);
        assert_eq!(EnvelopeKind::Err.as_u8(), 3);
    }

    #[test]
    fn test_response_outcome() {
        let ok = Envelope::response(Ok(json!(3)));
        assert_eq!(ok.kind(), EnvelopeKind::Ok);
        assert_eq!(ok.into_outcome(), Some(Ok(json!(3))));

        let err = Envelope::response(Err(RemoteError::protocol("nope")));
        assert_eq!(err.kind(), EnvelopeKind::Err);
        assert!(matches!(err.into_outcome(), Some(Err(_))));

        let req = Envelope::Request(Request::new("ping", vec![], Kwargs::new()));
        assert_eq!(req.into_outcome(), None);
    }
}
