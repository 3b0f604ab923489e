// ── Push notification types ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::target::ConnectUrl;

/// Categories a consumer can subscribe to on the notification bus.
///
/// String forms match the backend's category names.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum NotificationCategory {
    #[serde(rename = "TargetCredentialsStored")]
    #[strum(serialize = "TargetCredentialsStored")]
    CredentialsStored,
    #[serde(rename = "TargetCredentialsDeleted")]
    #[strum(serialize = "TargetCredentialsDeleted")]
    CredentialsDeleted,
}

/// Payload shared by both credential categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsMessage {
    pub target: ConnectUrl,
}

/// A typed event delivered by the notification bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", content = "message")]
pub enum NotificationEvent {
    #[serde(rename = "TargetCredentialsStored")]
    CredentialsStored(CredentialsMessage),
    #[serde(rename = "TargetCredentialsDeleted")]
    CredentialsDeleted(CredentialsMessage),
}

impl NotificationEvent {
    pub fn stored(target: impl Into<ConnectUrl>) -> Self {
        Self::CredentialsStored(CredentialsMessage {
            target: target.into(),
        })
    }

    pub fn deleted(target: impl Into<ConnectUrl>) -> Self {
        Self::CredentialsDeleted(CredentialsMessage {
            target: target.into(),
        })
    }

    pub fn category(&self) -> NotificationCategory {
        match self {
            Self::CredentialsStored(_) => NotificationCategory::CredentialsStored,
            Self::CredentialsDeleted(_) => NotificationCategory::CredentialsDeleted,
        }
    }

    pub fn target(&self) -> &ConnectUrl {
        match self {
            Self::CredentialsStored(m) | Self::CredentialsDeleted(m) => &m.target,
        }
    }
}
