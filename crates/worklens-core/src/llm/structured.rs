//! Schema-constrained completion helper.
//!
//! Most pipeline stages want one JSON object of a known shape back, not
//! prose. This helper derives the JSON schema from the target type, attaches
//! it to the request so the provider constrains decoding, and parses the
//! response straight into the type.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use worklens_types::llm::{CompletionRequest, LlmError, Message, ResponseFormat};

use super::box_provider::BoxLlmProvider;

/// Token budget for structured calls. These responses are small JSON
/// objects, never prose.
const STRUCTURED_MAX_TOKENS: u32 = 1024;

/// Complete `user` against `system` and parse the response as `T`.
///
/// The request carries a `ResponseFormat` derived from `T`'s schema, so a
/// conforming provider can only produce parseable output. A non-conforming
/// response surfaces as [`LlmError::Deserialization`] with the raw content
/// attached for the log.
pub async fn complete_structured<T>(
    provider: &BoxLlmProvider,
    model: &str,
    schema_name: &str,
    system: &str,
    user: &str,
) -> Result<T, LlmError>
where
    T: JsonSchema + DeserializeOwned,
{
    complete_structured_over(provider, model, schema_name, system, vec![Message::user(user)])
        .await
}

/// Like [`complete_structured`], but over a caller-assembled message list.
///
/// Used where the decision needs conversation context (question
/// classification, follow-up detection) rather than a single prompt.
pub async fn complete_structured_over<T>(
    provider: &BoxLlmProvider,
    model: &str,
    schema_name: &str,
    system: &str,
    messages: Vec<Message>,
) -> Result<T, LlmError>
where
    T: JsonSchema + DeserializeOwned,
{
    let request = CompletionRequest::text(model, messages, STRUCTURED_MAX_TOKENS)
        .with_system(system)
        .with_temperature(0.0)
        .with_response_format(ResponseFormat::from_schema::<T>(schema_name));

    let response = provider.complete(&request).await?;

    serde_json::from_str::<T>(&response.content).map_err(|e| {
        LlmError::Deserialization(format!(
            "failed to parse {schema_name}: {e}\nraw content: {}",
            response.content
        ))
    })
}
