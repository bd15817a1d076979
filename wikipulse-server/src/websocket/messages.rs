use anyhow::Result;
use axum::extract::ws::{Message, Utf8Bytes};
use wikipulse_model::FeedMessage;

/// Convert a FeedMessage to a WebSocket text frame.
pub fn feed_to_websocket(msg: &FeedMessage) -> Result<Message> {
    let json = serde_json::to_string(msg)?;
    Ok(Message::Text(Utf8Bytes::from(json)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wikipulse_model::{Edit, EditKind};

    #[test]
    fn edits_serialize_to_text_frames() {
        let msg = FeedMessage::Edit(Edit {
            id: 1,
            kind: EditKind::Edit,
            title: "T".to_string(),
            user: "U".to_string(),
            bot: false,
            wiki: "enwiki".to_string(),
            server_url: String::new(),
            timestamp: 0,
            length_old: 0,
            length_new: 0,
            revision_old: 0,
            revision_new: 0,
            comment: String::new(),
        });
        let frame = feed_to_websocket(&msg).unwrap();
        match frame {
            Message::Text(text) => assert!(text.as_str().contains("\"type\":\"edit\"")),
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}
