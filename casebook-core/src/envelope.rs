use serde_json::{Map, Value};

/// Where an endpoint puts its records inside the response body.
///
/// The backend is not consistent: most collection endpoints answer
/// `{"data": [...]}`, while beneficiaries and forms may answer
/// `{"data": {"items": [...]}}` or `{"items": [...]}`. A bare array is
/// accepted for every shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    Data,
    DataOrItems,
}

impl Envelope {
    /// Extracts the records array, or `None` when the body has no array in
    /// any of the places this envelope allows.
    pub fn records(self, body: Value) -> Option<Vec<Value>> {
        let mut map = match body {
            Value::Array(records) => return Some(records),
            Value::Object(map) => map,
            _ => return None,
        };

        match self {
            Envelope::Data => take_array(&mut map, "data"),
            Envelope::DataOrItems => {
                if let Some(Value::Object(inner)) = map.get_mut("data")
                    && let Some(records) = take_array(inner, "items")
                {
                    return Some(records);
                }
                take_array(&mut map, "data").or_else(|| take_array(&mut map, "items"))
            }
        }
    }
}

fn take_array(map: &mut Map<String, Value>, key: &str) -> Option<Vec<Value>> {
    match map.remove(key) {
        Some(Value::Array(records)) => Some(records),
        Some(other) => {
            map.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}
