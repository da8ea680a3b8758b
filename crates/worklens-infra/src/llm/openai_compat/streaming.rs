//! OpenAI SSE stream to [`StreamEvent`] adapter.
//!
//! Maps `async-openai`'s [`ChatCompletionResponseStream`] events to the
//! provider-agnostic [`StreamEvent`] enum defined in `worklens-types`.

use std::pin::Pin;

use futures_util::{Stream, StreamExt};

use async_openai::types::chat::{ChatCompletionResponseStream, FinishReason};

use worklens_types::llm::{LlmError, StopReason, StreamEvent, Usage};

/// Map an async-openai [`ChatCompletionResponseStream`] to a stream of [`StreamEvent`]s.
///
/// The returned stream emits events in this order:
/// 1. `Connected` -- immediately on entry
/// 2. `TextDelta` -- for each text content chunk
/// 3. `MessageDelta` -- with the stop reason when finish_reason appears
/// 4. `Usage` -- token usage (requires `stream_options.include_usage = true` on request)
/// 5. `Done` -- at the end of the stream
pub fn map_openai_stream(
    stream: ChatCompletionResponseStream,
) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
    Box::pin(async_stream::try_stream! {
        yield StreamEvent::Connected;

        let mut stream = stream;

        while let Some(result) = stream.next().await {
            let chunk = result.map_err(|e| LlmError::Stream(e.to_string()))?;

            // The final chunk carries usage data with an empty choices array
            // (from stream_options.include_usage = true).
            if let Some(ref usage) = chunk.usage {
                yield StreamEvent::Usage(Usage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                });
            }

            // Process each choice in the chunk (typically just one).
            let choices_len = chunk.choices.len();
            for i in 0..choices_len {
                let choice = &chunk.choices[i];

                // Text content delta
                let text = choice.delta.content.clone().unwrap_or_default();
                if !text.is_empty() {
                    yield StreamEvent::TextDelta { index: 0, text };
                }

                // Finish reason closes the message
                if let Some(ref finish_reason) = choice.finish_reason {
                    yield StreamEvent::MessageDelta {
                        stop_reason: map_finish_reason(finish_reason),
                    };
                }
            }
        }

        yield StreamEvent::Done;
    })
}

/// Map an OpenAI finish reason onto the pipeline's stop-reason vocabulary.
///
/// OpenAI reports stop-sequence hits as `Stop`, and the pipeline never
/// requests tool calls, so everything except `Length` folds into `EndTurn`.
pub(crate) fn map_finish_reason(finish: &FinishReason) -> StopReason {
    match finish {
        FinishReason::Stop => StopReason::EndTurn,
        FinishReason::Length => StopReason::MaxTokens,
        FinishReason::ToolCalls => StopReason::EndTurn,
        FinishReason::ContentFilter => StopReason::EndTurn,
        FinishReason::FunctionCall => StopReason::EndTurn,
    }
}
