//! Request references: the parsed form of `/{type}/{id}/{hash}[@resize]`.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::storage::ContentHash;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("invalid id: {0:?}")]
    InvalidId(String),

    #[error("invalid content hash: {0:?}")]
    InvalidHash(String),

    #[error("invalid resize directive: {0}")]
    InvalidResize(String),

    /// Not a client error: no record can ever match an unknown entity type.
    #[error("unknown entity type: {0:?}")]
    UnknownEntity(String),
}

/// The kinds of records that carry origin image URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Video,
    Actor,
    Director,
    Screenshot,
}

impl EntityType {
    /// Parse a path segment. Plural and singular spellings are accepted.
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "videos" | "video" => Some(Self::Video),
            "actors" | "actor" => Some(Self::Actor),
            "directors" | "director" => Some(Self::Director),
            "screenshots" | "screenshot" => Some(Self::Screenshot),
            _ => None,
        }
    }

    /// Canonical segment used in storage keys.
    pub fn as_segment(&self) -> &'static str {
        match self {
            Self::Video => "videos",
            Self::Actor => "actors",
            Self::Director => "directors",
            Self::Screenshot => "screenshots",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_segment())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResizeAxis {
    Width,
    Height,
}

/// Target size along one axis; the other axis follows the aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResizeDirective {
    pub axis: ResizeAxis,
    pub value: u32,
}

impl ResizeDirective {
    /// Parse `h<height>` or `<width>`.
    pub fn parse(token: &str) -> Result<Self, ReferenceError> {
        let (axis, digits) = match token.strip_prefix('h') {
            Some(rest) => (ResizeAxis::Height, rest),
            None => (ResizeAxis::Width, token),
        };
        let value: u32 = digits
            .parse()
            .map_err(|_| ReferenceError::InvalidResize(format!("{token:?} is not a size")))?;
        if value == 0 {
            return Err(ReferenceError::InvalidResize(format!(
                "{token:?} must be positive"
            )));
        }
        Ok(Self { axis, value })
    }
}

impl fmt::Display for ResizeDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.axis {
            ResizeAxis::Height => write!(f, "h{}", self.value),
            ResizeAxis::Width => write!(f, "{}", self.value),
        }
    }
}

/// Deployment-specific limits on accepted resize values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ResizePolicy {
    /// Largest accepted value. Default: 1000.
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    /// When set, values must be a multiple of this step (e.g. 100).
    #[serde(default)]
    pub step: Option<u32>,
}

fn default_max_dimension() -> u32 {
    1000
}

impl Default for ResizePolicy {
    fn default() -> Self {
        Self {
            max_dimension: default_max_dimension(),
            step: None,
        }
    }
}

impl ResizePolicy {
    pub fn validate(&self, directive: &ResizeDirective) -> Result<(), ReferenceError> {
        if directive.value > self.max_dimension {
            return Err(ReferenceError::InvalidResize(format!(
                "{} exceeds {}",
                directive.value, self.max_dimension
            )));
        }
        if let Some(step) = self.step
            && step > 0
            && directive.value % step != 0
        {
            return Err(ReferenceError::InvalidResize(format!(
                "{} is not a multiple of {step}",
                directive.value
            )));
        }
        Ok(())
    }
}

/// A fully parsed image request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub entity: EntityType,
    pub id: i64,
    pub hash: ContentHash,
    pub resize: Option<ResizeDirective>,
}

impl Reference {
    /// Parse the three path segments of an image request.
    ///
    /// The compound segment is cut at the first `?` and then at the first `.`,
    /// and split on the first `@` into hash and resize directive.
    pub fn parse(
        entity: &str,
        id: &str,
        compound: &str,
        policy: &ResizePolicy,
    ) -> Result<Self, ReferenceError> {
        let id: i64 = id
            .parse()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| ReferenceError::InvalidId(id.to_string()))?;

        let compound = truncate_at(compound, '?');
        let compound = truncate_at(compound, '.');

        let (hash_token, resize_token) = match compound.split_once('@') {
            Some((hash, resize)) => (hash, Some(resize)),
            None => (compound, None),
        };

        let hash = ContentHash::from_hex(hash_token)
            .map_err(|_| ReferenceError::InvalidHash(hash_token.to_string()))?;

        let resize = resize_token.map(ResizeDirective::parse).transpose()?;
        if let Some(directive) = &resize {
            policy.validate(directive)?;
        }

        let entity = EntityType::from_segment(entity)
            .ok_or_else(|| ReferenceError::UnknownEntity(entity.to_string()))?;

        Ok(Self {
            entity,
            id,
            hash,
            resize,
        })
    }
}

fn truncate_at(s: &str, delimiter: char) -> &str {
    s.split_once(delimiter).map_or(s, |(head, _)| head)
}
