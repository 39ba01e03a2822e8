//! Inbound content-change events.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    content::{Asset, Entry, Sys},
    error::{CoreError, Result},
};

/// Kind of content change reported by the content repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    EntryPublish,
    EntryUnpublish,
    AssetPublish,
    AssetUnpublish,
}

impl Topic {
    /// Canonical topic name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntryPublish => "EntryPublish",
            Self::EntryUnpublish => "EntryUnpublish",
            Self::AssetPublish => "AssetPublish",
            Self::AssetUnpublish => "AssetUnpublish",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = CoreError;

    /// Accepts the canonical names and the repository's webhook names
    /// (`ContentManagement.Entry.publish`, ...).
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "EntryPublish" | "ContentManagement.Entry.publish" => Ok(Self::EntryPublish),
            "EntryUnpublish" | "ContentManagement.Entry.unpublish" => Ok(Self::EntryUnpublish),
            "AssetPublish" | "ContentManagement.Asset.publish" => Ok(Self::AssetPublish),
            "AssetUnpublish" | "ContentManagement.Asset.unpublish" => Ok(Self::AssetUnpublish),
            other => Err(CoreError::payload(format!("unknown topic \"{other}\""))),
        }
    }
}

/// One record of the inbound event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Site the changed content belongs to.
    pub site: String,

    /// Topic name as delivered.
    pub topic: String,

    /// Changed entry or asset.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Deleted object reference carried by unpublish events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deletion {
    pub sys: Sys,
}

/// A parsed content-change event.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentEvent {
    EntryPublished(Entry),
    EntryUnpublished(Sys),
    AssetPublished(Asset),
    AssetUnpublished(Sys),
}

impl ContentEvent {
    /// Topic of the event.
    pub fn topic(&self) -> Topic {
        match self {
            Self::EntryPublished(_) => Topic::EntryPublish,
            Self::EntryUnpublished(_) => Topic::EntryUnpublish,
            Self::AssetPublished(_) => Topic::AssetPublish,
            Self::AssetUnpublished(_) => Topic::AssetUnpublish,
        }
    }

    /// ID of the changed object.
    pub fn object_id(&self) -> &str {
        match self {
            Self::EntryPublished(entry) => entry.id(),
            Self::AssetPublished(asset) => asset.id(),
            Self::EntryUnpublished(sys) | Self::AssetUnpublished(sys) => &sys.id,
        }
    }
}

impl EventRecord {
    /// Create a record from a typed payload.
    pub fn new(site: impl Into<String>, topic: Topic, payload: impl Serialize) -> Result<Self> {
        Ok(Self {
            site: site.into(),
            topic: topic.as_str().to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Parse the topic, `None` when the topic is not one of the handled kinds.
    pub fn topic(&self) -> Option<Topic> {
        self.topic.parse().ok()
    }

    /// Parse the payload into a typed event.
    ///
    /// Returns `Ok(None)` for unrecognized topics and an error for a payload that
    /// does not match its topic.
    pub fn to_event(&self) -> Result<Option<ContentEvent>> {
        let Some(topic) = self.topic() else {
            return Ok(None);
        };

        let payload = self.payload.clone();
        let event = match topic {
            Topic::EntryPublish => ContentEvent::EntryPublished(parse_payload(topic, payload)?),
            Topic::EntryUnpublish => {
                ContentEvent::EntryUnpublished(parse_payload::<Deletion>(topic, payload)?.sys)
            }
            Topic::AssetPublish => ContentEvent::AssetPublished(parse_payload(topic, payload)?),
            Topic::AssetUnpublish => {
                ContentEvent::AssetUnpublished(parse_payload::<Deletion>(topic, payload)?.sys)
            }
        };
        Ok(Some(event))
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    topic: Topic,
    payload: serde_json::Value,
) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| CoreError::payload(format!("invalid {topic} payload: {e}")))
}
