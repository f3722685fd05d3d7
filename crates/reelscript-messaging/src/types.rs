//! Messaging payload types.

use serde::{Deserialize, Serialize};

/// One card of a carousel message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarouselCard {
    pub image_url: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<UrlButton>,
}

/// A URL button on a card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlButton {
    pub caption: String,
    pub url: String,
}

/// Outbound message content.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Text(String),
    Image { url: String },
    Carousel(Vec<CarouselCard>),
}

impl OutboundMessage {
    /// Platform wire shape: one entry of the `messages` array.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            OutboundMessage::Text(text) => serde_json::json!({
                "type": "text",
                "text": text,
            }),
            OutboundMessage::Image { url } => serde_json::json!({
                "type": "image",
                "url": url,
            }),
            OutboundMessage::Carousel(cards) => serde_json::json!({
                "type": "cards",
                "image_aspect_ratio": "square",
                "elements": cards
                    .iter()
                    .map(|card| serde_json::json!({
                        "title": card.title,
                        "subtitle": card.subtitle,
                        "image_url": card.image_url,
                        "buttons": card.buttons
                            .iter()
                            .map(|b| serde_json::json!({
                                "type": "url",
                                "caption": b.caption,
                                "url": b.url,
                            }))
                            .collect::<Vec<_>>(),
                    }))
                    .collect::<Vec<_>>(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carousel_wire_shape() {
        let message = OutboundMessage::Carousel(vec![CarouselCard {
            image_url: "https://cdn.example/card.png".to_string(),
            title: "Your script".to_string(),
            subtitle: Some("Tap to copy".to_string()),
            buttons: vec![UrlButton {
                caption: "Open".to_string(),
                url: "https://reelscript.app/s/AbCdEf12".to_string(),
            }],
        }]);

        let wire = message.to_wire();
        assert_eq!(wire["type"], "cards");
        assert_eq!(wire["elements"][0]["buttons"][0]["type"], "url");
    }

    #[test]
    fn test_text_wire_shape() {
        let wire = OutboundMessage::Text("hello".to_string()).to_wire();
        assert_eq!(wire["type"], "text");
        assert_eq!(wire["text"], "hello");
    }
}
