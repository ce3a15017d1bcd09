use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const TIME_FIELD: &str = "time";
pub const TYPE_FIELD: &str = "type";

/// One telemetry occurrence: a flat, insertion-ordered map of string fields.
///
/// Built once by the gateway and never mutated afterwards. Serializes as a
/// flat JSON object with `time` as its first key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    fields: Vec<(String, String)>,
}

impl Event {
    /// Build an event stamped with `received_at`, taking attributes verbatim.
    ///
    /// A repeated key keeps the position of its first occurrence and the value
    /// of its last. An attribute named `time` is dropped: the receipt stamp
    /// always wins.
    pub fn from_attributes<I, K, V>(received_at: DateTime<Utc>, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut fields: Vec<(String, String)> = vec![(
            TIME_FIELD.to_string(),
            received_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        )];

        for (key, value) in attributes {
            let key = key.into();
            if key == TIME_FIELD {
                tracing::debug!("Ignoring client-supplied time attribute");
                continue;
            }
            let value = value.into();
            match fields.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => fields.push((key, value)),
            }
        }

        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn time(&self) -> Option<&str> {
        self.get(TIME_FIELD)
    }

    /// Category used for aggregation, if the producer supplied one.
    pub fn event_type(&self) -> Option<&str> {
        self.get(TYPE_FIELD)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialized wire form. The byte length of this buffer is what the
    /// transport must advertise.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json_slice(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

impl Serialize for Event {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EventVisitor;

        impl<'de> Visitor<'de> for EventVisitor {
            type Value = Event;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Event, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut fields: Vec<(String, String)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, serde_json::Value>()? {
                    // Other producers may write numbers or booleans; keep their JSON text.
                    let value = match value {
                        serde_json::Value::String(text) => text,
                        other => other.to_string(),
                    };
                    match fields.iter_mut().find(|(k, _)| *k == key) {
                        Some(slot) => slot.1 = value,
                        None => fields.push((key, value)),
                    }
                }
                Ok(Event { fields })
            }
        }

        deserializer.deserialize_map(EventVisitor)
    }
}
