//! OpenAI-compatible LLM provider implementation.
//!
//! A single [`OpenAiCompatProvider`] serves local Ollama (the default),
//! vLLM, and hosted OpenAI-style endpoints from one codebase via a
//! configurable base URL.
//!
//! Uses [`async_openai`] for type-safe request/response handling and
//! built-in SSE streaming.

pub mod streaming;

use std::pin::Pin;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, ChatCompletionStreamOptions,
    CreateChatCompletionRequest, ResponseFormat as OaiResponseFormat, ResponseFormatJsonSchema,
    StopConfiguration,
};
use futures_util::Stream;
use secrecy::ExposeSecret;
use tracing::Instrument;

use worklens_core::llm::provider::LlmProvider;
use worklens_observe::genai_attrs;
use worklens_types::config::LlmConfig;
use worklens_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, MessageRole, StopReason, StreamEvent, Usage,
};

use self::streaming::{map_finish_reason, map_openai_stream};

/// Unified provider for any OpenAI-compatible API.
///
/// The activity pipeline runs every stage through this one provider; which
/// model answers is chosen per request, so a single client covers the small
/// classification model and the larger SQL/answer models alike.
///
/// # API Key Security
///
/// Does NOT derive Debug to prevent accidental exposure of the API key
/// stored inside the `async_openai::Client`.
pub struct OpenAiCompatProvider {
    client: Client<OpenAIConfig>,
}

impl OpenAiCompatProvider {
    /// Create a provider from the `[llm]` section of the configuration.
    ///
    /// Local endpoints usually need no API key; when one is configured it
    /// is passed through without ever being logged.
    pub fn new(config: &LlmConfig) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_base(&config.base_url);
        if let Some(ref key) = config.api_key {
            openai_config = openai_config.with_api_key(key.expose_secret());
        }

        Self {
            client: Client::with_config(openai_config),
        }
    }

    /// Build a [`CreateChatCompletionRequest`] from a generic [`CompletionRequest`].
    fn build_request(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<CreateChatCompletionRequest, LlmError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();

        // System message
        if let Some(ref system) = request.system {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(system.clone()),
                    name: None,
                },
            ));
        }

        // Conversation messages
        for msg in &request.messages {
            let oai_msg = match msg.role {
                MessageRole::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage {
                        content: ChatCompletionRequestSystemMessageContent::Text(
                            msg.content.clone(),
                        ),
                        name: None,
                    },
                ),
                MessageRole::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage {
                        content: ChatCompletionRequestUserMessageContent::Text(
                            msg.content.clone(),
                        ),
                        name: None,
                    },
                ),
                MessageRole::Assistant => {
                    #[allow(deprecated)]
                    ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessage {
                            content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                                msg.content.clone(),
                            )),
                            refusal: None,
                            name: None,
                            audio: None,
                            tool_calls: None,
                            function_call: None,
                        },
                    )
                }
            };
            messages.push(oai_msg);
        }

        let mut req = CreateChatCompletionRequest {
            model: request.model.clone(),
            messages,
            max_completion_tokens: Some(request.max_tokens),
            temperature: request.temperature.map(|t| t as f32),
            ..Default::default()
        };

        // Stop sequences
        if let Some(ref stops) = request.stop_sequences {
            if !stops.is_empty() {
                req.stop = Some(StopConfiguration::StringArray(stops.clone()));
            }
        }

        // Structured output: the classification and table-selection stages
        // constrain the response to a JSON schema.
        if let Some(ref format) = request.response_format {
            req.response_format = Some(OaiResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: format.name.clone(),
                    schema: Some(format.schema.clone()),
                    strict: Some(format.strict),
                },
            });
        }

        // Streaming configuration
        if stream {
            req.stream = Some(true);
            req.stream_options = Some(ChatCompletionStreamOptions {
                include_usage: Some(true),
                include_obfuscation: None,
            });
        }

        Ok(req)
    }
}

// OpenAiCompatProvider intentionally does NOT derive Debug to prevent
// accidental exposure of internal state including the API key inside the
// async-openai Client.

impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        genai_attrs::PROVIDER_OPENAI_COMPAT
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let oai_request = self.build_request(request, false)?;

        let span = tracing::info_span!(
            "chat",
            { genai_attrs::GEN_AI_OPERATION_NAME } = genai_attrs::OP_CHAT,
            { genai_attrs::GEN_AI_PROVIDER_NAME } = genai_attrs::PROVIDER_OPENAI_COMPAT,
            { genai_attrs::GEN_AI_REQUEST_MODEL } = %oai_request.model,
            { genai_attrs::GEN_AI_REQUEST_MAX_TOKENS } = request.max_tokens,
            { genai_attrs::GEN_AI_REQUEST_TEMPERATURE } = tracing::field::Empty,
            { genai_attrs::GEN_AI_RESPONSE_ID } = tracing::field::Empty,
            { genai_attrs::GEN_AI_RESPONSE_FINISH_REASONS } = tracing::field::Empty,
            { genai_attrs::GEN_AI_USAGE_INPUT_TOKENS } = tracing::field::Empty,
            { genai_attrs::GEN_AI_USAGE_OUTPUT_TOKENS } = tracing::field::Empty,
        );
        if let Some(t) = request.temperature {
            span.record(genai_attrs::GEN_AI_REQUEST_TEMPERATURE, t);
        }

        let response = self
            .client
            .chat()
            .create(oai_request)
            .instrument(span.clone())
            .await
            .map_err(map_openai_error)?;

        span.record(genai_attrs::GEN_AI_RESPONSE_ID, response.id.as_str());

        // Extract content from the first choice
        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        let stop_reason = response
            .choices
            .first()
            .and_then(|c| c.finish_reason.as_ref())
            .map(map_finish_reason)
            .unwrap_or(StopReason::EndTurn);
        span.record(
            genai_attrs::GEN_AI_RESPONSE_FINISH_REASONS,
            tracing::field::display(&stop_reason),
        );

        let usage = response
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();
        span.record(genai_attrs::GEN_AI_USAGE_INPUT_TOKENS, usage.input_tokens);
        span.record(genai_attrs::GEN_AI_USAGE_OUTPUT_TOKENS, usage.output_tokens);

        Ok(CompletionResponse {
            id: response.id,
            content,
            model: response.model,
            stop_reason,
            usage,
        })
    }

    fn stream(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
        // Build the request. If it fails, return a stream that immediately errors.
        let oai_request = match self.build_request(&request, true) {
            Ok(req) => req,
            Err(e) => {
                return Box::pin(futures_util::stream::once(async move { Err(e) }));
            }
        };

        // Clone the client for the 'static stream closure
        let client = self.client.clone();

        Box::pin(async_stream::try_stream! {
            let oai_stream = client
                .chat()
                .create_stream(oai_request)
                .await
                .map_err(map_openai_error)?;

            let mut inner = map_openai_stream(oai_stream);

            use futures_util::StreamExt;
            while let Some(event) = inner.next().await {
                match event {
                    Ok(ev) => yield ev,
                    Err(e) => Err(e)?,
                }
            }
        })
    }
}

/// Map an `async_openai::error::OpenAIError` to an [`LlmError`].
fn map_openai_error(err: async_openai::error::OpenAIError) -> LlmError {
    use async_openai::error::OpenAIError;

    match &err {
        OpenAIError::ApiError(api_err) => {
            // Check for known error types by code or type field
            let code = api_err.code.as_deref().unwrap_or("");
            let error_type = api_err.r#type.as_deref().unwrap_or("");

            if code == "authentication_error"
                || error_type == "authentication_error"
                || api_err.message.contains("Incorrect API key")
                || api_err.message.contains("Invalid API key")
            {
                LlmError::AuthenticationFailed
            } else if code == "rate_limit_exceeded" || error_type == "rate_limit_error" {
                LlmError::RateLimited {
                    retry_after_ms: None,
                }
            } else {
                LlmError::Provider {
                    message: err.to_string(),
                }
            }
        }
        OpenAIError::Reqwest(reqwest_err) => {
            if let Some(status) = reqwest_err.status() {
                match status.as_u16() {
                    401 => LlmError::AuthenticationFailed,
                    429 => LlmError::RateLimited {
                        retry_after_ms: None,
                    },
                    _ => LlmError::Provider {
                        message: err.to_string(),
                    },
                }
            } else {
                LlmError::Provider {
                    message: err.to_string(),
                }
            }
        }
        OpenAIError::JSONDeserialize(_, content) => {
            LlmError::Deserialization(format!("failed to parse response: {content}"))
        }
        OpenAIError::StreamError(stream_err) => LlmError::Stream(stream_err.to_string()),
        OpenAIError::InvalidArgument(msg) => LlmError::InvalidRequest(msg.clone()),
        _ => LlmError::Provider {
            message: err.to_string(),
        },
    }
}
