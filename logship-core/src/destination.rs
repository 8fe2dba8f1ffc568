use std::fmt;

use crate::Result;
use crate::record::Record;
use crate::template::Template;

/// A fully resolved `(log group, log stream)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationKey {
    pub group: String,
    pub stream: String,
}

impl DestinationKey {
    pub fn new(group: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            stream: stream.into(),
        }
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.stream)
    }
}

/// Resolves the destination of a record from the group and stream templates.
#[derive(Debug, Clone)]
pub struct Destinations {
    group: Template,
    stream: Template,
}

impl Destinations {
    pub fn new(group_template: &str, stream_template: &str) -> Result<Self> {
        Ok(Self {
            group: Template::parse(group_template)?,
            stream: Template::parse(stream_template)?,
        })
    }

    pub fn resolve(&self, record: &Record) -> DestinationKey {
        DestinationKey {
            group: self.group.render(record),
            stream: self.stream.render(record),
        }
    }
}
