//! Broker messages and their publish properties.

/// Publish properties carried alongside a message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// MIME type of the body, e.g. `application/json`.
    pub content_type: Option<String>,
    /// Token used to match a reply to its request.
    pub correlation_id: Option<String>,
    /// Queue the receiver should publish its reply to.
    pub reply_to: Option<String>,
    /// Ask the broker to persist the message to disk.
    pub persistent: bool,
}

/// A message as published to or delivered from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

impl Message {
    /// Creates a message with the given body and no properties.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            properties: MessageProperties::default(),
        }
    }

    /// Sets the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.properties.content_type = Some(content_type.into());
        self
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.properties.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the reply destination.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.properties.reply_to = Some(reply_to.into());
        self
    }

    /// Marks the message persistent.
    pub fn persistent(mut self) -> Self {
        self.properties.persistent = true;
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.properties.correlation_id.as_deref()
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.properties.reply_to.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.properties.content_type.as_deref()
    }
}
