use crate::{ProtocolError, Result};
use geodispatch_core::{Coordinates, WorkItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message that can travel inside a frame.
///
/// Decoding goes through a parsed JSON value so that a body which is valid
/// JSON but carries the wrong fields is reported as
/// [`ProtocolError::InvalidMessage`] rather than as a garbled frame.
pub trait WireMessage: Serialize + Sized {
    fn from_value(value: Value) -> Result<Self>;
}

/// Master -> worker: one address to geocode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeocodeRequest {
    pub endereco: String,
    pub municipio: String,
}

impl GeocodeRequest {
    pub fn from_item(item: &WorkItem) -> Self {
        GeocodeRequest {
            endereco: item.payload.clone(),
            municipio: item.context.clone(),
        }
    }
}

impl WireMessage for GeocodeRequest {
    fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
    }
}

/// Worker -> master: the geocoding answer.
///
/// Both fields are `null` when the worker could not resolve the address.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeocodeReply {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl GeocodeReply {
    pub fn found(coordinates: Coordinates) -> Self {
        GeocodeReply {
            latitude: Some(coordinates.latitude()),
            longitude: Some(coordinates.longitude()),
        }
    }

    pub fn not_found() -> Self {
        GeocodeReply {
            latitude: None,
            longitude: None,
        }
    }

    /// Validate the pair into coordinates
    pub fn coordinates(&self) -> Result<Option<Coordinates>> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Coordinates::new(latitude, longitude)
                .map(Some)
                .map_err(|e| ProtocolError::InvalidMessage(e.to_string())),
            (None, None) => Ok(None),
            _ => Err(ProtocolError::InvalidMessage(
                "latitude and longitude must both be numbers or both be null".to_string(),
            )),
        }
    }
}

impl WireMessage for GeocodeReply {
    fn from_value(value: Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| ProtocolError::InvalidMessage("reply is not an object".to_string()))?;

        // Keys must be present; serde would silently default a missing Option
        let field = |name: &str| -> Result<Option<f64>> {
            match object.get(name) {
                None => Err(ProtocolError::InvalidMessage(format!("missing field `{}`", name))),
                Some(Value::Null) => Ok(None),
                Some(Value::Number(n)) => n.as_f64().map(Some).ok_or_else(|| {
                    ProtocolError::InvalidMessage(format!("field `{}` is not a float", name))
                }),
                Some(other) => Err(ProtocolError::InvalidMessage(format!(
                    "field `{}` is not a number: {}",
                    name, other
                ))),
            }
        };

        let reply = GeocodeReply {
            latitude: field("latitude")?,
            longitude: field("longitude")?,
        };
        reply.coordinates()?;

        Ok(reply)
    }
}
