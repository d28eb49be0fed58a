//! Types exchanged with a remote source

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

macro_rules! locator {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

locator!(
    /// Opaque reference to one remote object (a message carrying media or text)
    ObjectLocator
);
locator!(
    /// Group identity shared by the members of a batch
    BatchLocator
);
locator!(
    /// Where relayed content is delivered
    Destination
);
locator!(
    /// Stable token identifying identical underlying content
    ContentIdentity
);

/// Payload kind of a remote object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    Document,
    /// Text-only message, forwarded without a download
    Text,
    /// Nothing transferable
    None,
}

impl MediaKind {
    /// Kinds that are downloaded and re-uploaded as files
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            MediaKind::Photo | MediaKind::Video | MediaKind::Audio | MediaKind::Document
        )
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
            MediaKind::Text => "text",
            MediaKind::None => "none",
        };
        f.write_str(name)
    }
}

/// What the remote reports about an object before any transfer starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMetadata {
    pub locator: ObjectLocator,
    /// Size in bytes of the media payload
    pub total_size: u64,
    /// Identity used for deduplication; absent for objects without media
    pub content_identity: Option<ContentIdentity>,
    pub kind: MediaKind,
    pub caption: Option<String>,
    /// Body of a text-only object
    pub text: Option<String>,
    pub file_name: Option<String>,
    /// Whether arbitrary byte ranges can be fetched
    pub ranged: bool,
    /// Batch this object belongs to, if any
    pub batch: Option<BatchLocator>,
}

impl RemoteMetadata {
    /// Metadata of a media object with the given size and identity
    pub fn media(
        locator: impl Into<ObjectLocator>,
        kind: MediaKind,
        total_size: u64,
        content_identity: impl Into<ContentIdentity>,
    ) -> Self {
        Self {
            locator: locator.into(),
            total_size,
            content_identity: Some(content_identity.into()),
            kind,
            caption: None,
            text: None,
            file_name: None,
            ranged: true,
            batch: None,
        }
    }

    /// Metadata of a text-only object
    pub fn text(locator: impl Into<ObjectLocator>, body: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            total_size: 0,
            content_identity: None,
            kind: MediaKind::Text,
            caption: None,
            text: Some(body.into()),
            file_name: None,
            ranged: false,
            batch: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_batch(mut self, batch: impl Into<BatchLocator>) -> Self {
        self.batch = Some(batch.into());
        self
    }

    pub fn with_ranged(mut self, ranged: bool) -> Self {
        self.ranged = ranged;
        self
    }

    /// File name to deliver under: the remote's name or one derived from the locator
    pub fn delivery_name(&self) -> String {
        match &self.file_name {
            Some(name) => name.clone(),
            None => self
                .locator
                .as_str()
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// A downloaded item ready for upload, in its original batch position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMedia {
    /// Position in the original batch (or 0 for a single object)
    pub index: usize,
    pub source: ObjectLocator,
    pub kind: MediaKind,
    pub path: PathBuf,
    pub caption: Option<String>,
    pub file_name: String,
    pub size: u64,
}
