//! Release configuration documents.
//!
//! A release carries its configuration overrides as a raw YAML document.
//! `Values` gives dotted-path access (`image.repository`) for reading the
//! deployed image and for pinning a new tag.

use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::image::{ImageParseError, ImageReference};

/// Path of the image repository in a values document.
pub const IMAGE_REPOSITORY_PATH: &str = "image.repository";
/// Path of the image tag in a values document.
pub const IMAGE_TAG_PATH: &str = "image.tag";

/// Errors while reading or editing a values document.
#[derive(Debug, Error)]
pub enum ValuesError {
    #[error("malformed values document: {0}")]
    Parse(String),
    #[error("no value at path {0:?}")]
    NoSuchPath(String),
    #[error("value at {path:?} is {found}, expected a string")]
    WrongType { path: String, found: &'static str },
    #[error("value at {0:?} is not a mapping")]
    NotAMapping(String),
    #[error("failed to serialize values: {0}")]
    Serialize(String),
    #[error("invalid image in values: {0}")]
    Image(#[from] ImageParseError),
}

/// A parsed YAML values document.
#[derive(Debug, Clone, PartialEq)]
pub struct Values {
    root: Value,
}

impl Values {
    /// Parse a raw document. An empty or whitespace-only document is an
    /// empty mapping.
    pub fn parse(raw: &str) -> Result<Self, ValuesError> {
        if raw.trim().is_empty() {
            return Ok(Self {
                root: Value::Mapping(Mapping::new()),
            });
        }
        let root: Value =
            serde_yaml::from_str(raw).map_err(|e| ValuesError::Parse(e.to_string()))?;
        match root {
            Value::Mapping(_) => Ok(Self { root }),
            Value::Null => Ok(Self {
                root: Value::Mapping(Mapping::new()),
            }),
            other => Err(ValuesError::Parse(format!(
                "top level is {}, expected a mapping",
                kind(&other)
            ))),
        }
    }

    /// Look up a dotted path.
    pub fn path_value(&self, path: &str) -> Result<&Value, ValuesError> {
        let mut current = &self.root;
        for segment in path.split('.') {
            current = current
                .as_mapping()
                .and_then(|m| m.get(segment))
                .ok_or_else(|| ValuesError::NoSuchPath(path.to_string()))?;
        }
        Ok(current)
    }

    /// Read a scalar at `path` as a string.
    ///
    /// Missing paths, nulls and empty strings are `None`. Numbers and
    /// booleans are stringified since unquoted tags (`tag: 1.2`) are common.
    pub fn string_at(&self, path: &str) -> Result<Option<String>, ValuesError> {
        let value = match self.path_value(path) {
            Ok(value) => value,
            Err(ValuesError::NoSuchPath(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        match value {
            Value::Null => Ok(None),
            Value::String(s) if s.is_empty() => Ok(None),
            Value::String(s) => Ok(Some(s.clone())),
            Value::Number(n) => Ok(Some(n.to_string())),
            Value::Bool(b) => Ok(Some(b.to_string())),
            other => Err(ValuesError::WrongType {
                path: path.to_string(),
                found: kind(other),
            }),
        }
    }

    /// Set a string at `path`, creating intermediate mappings.
    pub fn set_string(&mut self, path: &str, value: &str) -> Result<(), ValuesError> {
        let segments: Vec<&str> = path.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            return Err(ValuesError::NoSuchPath(path.to_string()));
        };

        let mut current = &mut self.root;
        let mut walked = String::new();
        for segment in parents {
            if !walked.is_empty() {
                walked.push('.');
            }
            walked.push_str(segment);

            let mapping = current
                .as_mapping_mut()
                .ok_or_else(|| ValuesError::NotAMapping(walked.clone()))?;
            let key = Value::String((*segment).to_string());
            if !mapping.contains_key(&key) {
                mapping.insert(key.clone(), Value::Mapping(Mapping::new()));
            }
            current = mapping
                .get_mut(&key)
                .ok_or_else(|| ValuesError::NoSuchPath(walked.clone()))?;
        }

        let mapping = current
            .as_mapping_mut()
            .ok_or_else(|| ValuesError::NotAMapping(parents.join(".")))?;
        mapping.insert(
            Value::String((*last).to_string()),
            Value::String(value.to_string()),
        );
        Ok(())
    }

    /// Serialize back to YAML.
    pub fn to_yaml(&self) -> Result<String, ValuesError> {
        serde_yaml::to_string(&self.root).map_err(|e| ValuesError::Serialize(e.to_string()))
    }

    /// The image deployed by this document, from `image.repository` and
    /// the optional `image.tag`.
    pub fn image_reference(&self) -> Result<ImageReference, ValuesError> {
        let repository = self.path_value(IMAGE_REPOSITORY_PATH)?;
        let repository = match repository {
            Value::String(s) if !s.is_empty() => s.as_str(),
            other => {
                return Err(ValuesError::WrongType {
                    path: IMAGE_REPOSITORY_PATH.to_string(),
                    found: kind(other),
                });
            }
        };

        match self.string_at(IMAGE_TAG_PATH)? {
            Some(tag) => Ok(ImageReference::parse(&format!("{repository}:{tag}"))?),
            None => Ok(ImageReference::parse(repository)?),
        }
    }
}

/// Return `raw` with `image.tag` pinned to `tag`.
pub fn pin_image_tag(raw: &str, tag: &str) -> Result<String, ValuesError> {
    let mut values = Values::parse(raw)?;
    values.set_string(IMAGE_TAG_PATH, tag)?;
    values.to_yaml()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
