#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a watermark job.
///
/// Transitions only move forward: `Queued -> Active -> {Completed | Failed}`.
/// A retry re-enters `Active` from `Active` with the same job id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "queued"))]
    Queued,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "active"))]
    Active,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "completed"))]
    Completed,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "failed"))]
    Failed,
}

impl JobStatus {
    pub const ALL: &'static [JobStatus] = &[
        Self::Queued,
        Self::Active,
        Self::Completed,
        Self::Failed,
    ];

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// States a job may be in immediately before entering `self`.
    pub fn predecessors(&self) -> &'static [JobStatus] {
        match self {
            Self::Queued => &[],
            Self::Active => &[Self::Queued, Self::Active],
            Self::Completed | Self::Failed => &[Self::Queued, Self::Active],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.predecessors().contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Queued
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    kind: &'static str,
    invalid: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} '{}'", self.kind, self.invalid)
    }
}

impl std::error::Error for ParseEnumError {}

impl FromStr for JobStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "job status",
                invalid: s.to_string(),
            })
    }
}

/// Broad kind of an upload; selects the worker's transform path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "image"))]
    Image,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "video"))]
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            _ => Err(ParseEnumError {
                kind: "media type",
                invalid: s.to_string(),
            }),
        }
    }
}

/// Whether a reveal produced a new artifact for the viewer or reused one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "first_view"))]
    FirstView,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "repeat_view"))]
    RepeatView,
}

impl AccessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstView => "first_view",
            Self::RepeatView => "repeat_view",
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
