//! Plain-text extraction from typed bodies, used only by the prompt log.

use aigate_translate::{ProtocolRequest, ProtocolResponse};

pub fn request_text(request: &ProtocolRequest) -> String {
    match request {
        ProtocolRequest::OpenAI(req) => req
            .messages
            .iter()
            .filter_map(|message| {
                let text = message.content.as_ref()?.to_text();
                (!text.is_empty()).then(|| format!("[{}]: {}", message.role, text))
            })
            .collect::<Vec<_>>()
            .join("\n"),
        ProtocolRequest::Claude(req) => req
            .messages
            .iter()
            .filter_map(|message| {
                let text = message.content.to_text();
                (!text.is_empty()).then(|| format!("[{}]: {}", message.role, text))
            })
            .collect::<Vec<_>>()
            .join("\n"),
        ProtocolRequest::Gemini(req) => req
            .contents
            .iter()
            .map(|content| content.to_text())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

pub fn response_text(response: &ProtocolResponse) -> String {
    match response {
        ProtocolResponse::OpenAI(resp) => resp
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default(),
        ProtocolResponse::Claude(resp) => resp.text(),
        ProtocolResponse::Gemini(resp) => resp.to_text(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_text_labels_roles() {
        let request = ProtocolRequest::OpenAI(
            serde_json::from_value(json!({
                "messages": [
                    {"role": "system", "content": "s"},
                    {"role": "user", "content": "u"}
                ]
            }))
            .unwrap(),
        );
        assert_eq!(request_text(&request), "[system]: s\n[user]: u");
    }

    #[test]
    fn gemini_request_text_is_unlabelled_parts() {
        let request = ProtocolRequest::Gemini(
            serde_json::from_value(json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "a"}]},
                    {"role": "model", "parts": [{"text": "b"}]}
                ]
            }))
            .unwrap(),
        );
        assert_eq!(request_text(&request), "a\nb");
    }
}
