use aigate_common::Protocol;

use crate::envelope::{
    lower_claude_response, lower_gemini_response, lower_openai_response, raise_claude_response,
    raise_gemini_response, raise_openai_response,
};
use crate::types::ProtocolResponse;

/// Re-express a response in the target schema.
///
/// Responses always flow backend → client, so the source schema is the
/// backend's; `model` is the model name the client asked for, echoed into
/// schemas that carry one.
pub fn convert_response(
    response: ProtocolResponse,
    target: Protocol,
    model: &str,
) -> ProtocolResponse {
    if response.protocol() == target {
        return response;
    }
    let env = match &response {
        ProtocolResponse::OpenAI(resp) => lower_openai_response(resp),
        ProtocolResponse::Claude(resp) => lower_claude_response(resp),
        ProtocolResponse::Gemini(resp) => lower_gemini_response(resp),
    };
    match target {
        Protocol::OpenAI => ProtocolResponse::OpenAI(raise_openai_response(&env, model)),
        Protocol::Claude => ProtocolResponse::Claude(raise_claude_response(&env, model)),
        Protocol::Gemini => ProtocolResponse::Gemini(raise_gemini_response(&env, model)),
    }
}
