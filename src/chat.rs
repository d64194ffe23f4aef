use image::DynamicImage;
use serde::ser::{Error as _, SerializeStruct};
use serde::{Serialize, Serializer};

/// One role-tagged message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: Content,
}

impl ChatTurn {
    pub fn new(role: impl Into<String>, content: impl Into<Content>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<Content>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::new("assistant", content)
    }

    pub fn system(content: impl Into<Content>) -> Self {
        Self::new("system", content)
    }
}

impl<R: Into<String>, C: Into<Content>> From<(R, C)> for ChatTurn {
    fn from((role, content): (R, C)) -> Self {
        Self::new(role, content)
    }
}

/// Turn content: either plain text or an ordered list of multimodal items.
///
/// Serializes untagged, so `Text` becomes a JSON string and `Parts` a JSON
/// array in the OpenAI vision format.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentItem>),
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<Vec<ContentItem>> for Content {
    fn from(items: Vec<ContentItem>) -> Self {
        Content::Parts(items)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentItem {
    Text(String),
    /// A local filesystem path or a `data:image/...;base64,<payload>` URI.
    ImageUrl(String),
    Image(DynamicImage),
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text(text.into())
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        ContentItem::ImageUrl(url.into())
    }

    pub fn image(image: DynamicImage) -> Self {
        ContentItem::Image(image)
    }
}

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

// Example format:
// {"type": "text", "text": "What's in this image?"}
// {"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,..."}}
impl Serialize for ContentItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ContentItem::Text(text) => {
                let mut item = serializer.serialize_struct("ContentItem", 2)?;
                item.serialize_field("type", "text")?;
                item.serialize_field("text", text)?;
                item.end()
            }
            ContentItem::ImageUrl(url) => {
                let mut item = serializer.serialize_struct("ContentItem", 2)?;
                item.serialize_field("type", "image_url")?;
                item.serialize_field("image_url", &ImageUrl { url })?;
                item.end()
            }
            ContentItem::Image(_) => Err(S::Error::custom(
                "in-memory images have no JSON form, pass an image_url instead",
            )),
        }
    }
}
