use aigate_common::Protocol;

use crate::envelope::{
    lower_claude_request, lower_gemini_request, lower_openai_request, raise_claude_request,
    raise_gemini_request, raise_openai_request,
};
use crate::types::ProtocolRequest;

/// Re-express a request in the target schema; pass-through when the source
/// already speaks it.
pub fn convert_request(request: ProtocolRequest, target: Protocol) -> ProtocolRequest {
    if request.protocol() == target {
        return request;
    }
    let env = match &request {
        ProtocolRequest::OpenAI(req) => lower_openai_request(req),
        ProtocolRequest::Claude(req) => lower_claude_request(req),
        ProtocolRequest::Gemini(req) => lower_gemini_request(req),
    };
    match target {
        Protocol::OpenAI => ProtocolRequest::OpenAI(raise_openai_request(&env)),
        Protocol::Claude => ProtocolRequest::Claude(raise_claude_request(&env)),
        Protocol::Gemini => ProtocolRequest::Gemini(raise_gemini_request(&env)),
    }
}
