// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MQTT topic name utilities

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// MQTT topic multi-level wildcard
const MULTI_LEVEL_WILDCARD: &str = "#";
/// MQTT topic single-level wildcard
const SINGLE_LEVEL_WILDCARD: &str = "+";
/// Prefix identifying a shared subscription
const SHARED_SUBSCRIPTION_PREFIX: &str = "$share/";

/// Error when parsing a topic name
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TopicParseError {
    /// The topic name is empty
    #[error("must be at least one character long")]
    Empty,
    /// The topic name contains a wildcard character (# or +)
    #[error("wildcard characters not allowed in topic name: {0}")]
    WildcardInTopicName(String),
    /// The topic name's first level is $share
    #[error("first level of a topic name must not be $share/")]
    SharedSubscriptionNotAllowed(String),
}

/// Represents an MQTT topic name that telemetry can be published to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicName {
    topic_name: String,
}

impl TopicName {
    /// Create a new [`TopicName`] from a [`String`]
    ///
    /// # Errors
    /// [`TopicParseError`] - If the topic name is invalid for an MQTT topic name
    pub fn from_string(topic_name: String) -> Result<TopicName, TopicParseError> {
        TopicName::check_topic_name(&topic_name)?;
        Ok(TopicName { topic_name })
    }

    /// Get the [`TopicName`] formatted as a [`&str`]
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.topic_name.as_str()
    }

    fn check_topic_name(topic_name: &str) -> Result<(), TopicParseError> {
        // Topic names must be at least one character long (4.7.3)
        if topic_name.is_empty() {
            return Err(TopicParseError::Empty);
        }
        // Wildcard characters MUST NOT be used in Topic Names (4.7.1)
        if topic_name.contains(MULTI_LEVEL_WILDCARD) || topic_name.contains(SINGLE_LEVEL_WILDCARD) {
            return Err(TopicParseError::WildcardInTopicName(topic_name.to_string()));
        }
        if topic_name.starts_with(SHARED_SUBSCRIPTION_PREFIX) {
            return Err(TopicParseError::SharedSubscriptionNotAllowed(
                topic_name.to_string(),
            ));
        }
        // NOTE: Adjacent level separators ("/") are valid and indicate a zero length topic level (4.7.1.1)
        Ok(())
    }
}

impl FromStr for TopicName {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopicName::from_string(s.to_string())
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.topic_name)
    }
}
