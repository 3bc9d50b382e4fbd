//! Answer generation over the retrieved context.

use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use common::error::AppError;
use futures::{stream::BoxStream, StreamExt};

use crate::FusedResult;

/// Canned answer served when retrieval finds nothing usable.
pub const NO_CONTEXT_ANSWER: &str = "I don't know based on the available information.";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant that answers questions \
based on the provided context.\n\
If the context doesn't contain enough information to answer the question, say \
\"I don't know based on the available information.\"\n\
Always cite the source documents when providing answers.";

/// Produces an answer from the query and its retrieved context. Trait seam
/// so the orchestrator can be exercised without a live model behind it.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        query: &str,
        context: &[FusedResult],
        persona: Option<&str>,
    ) -> Result<String, AppError>;

    /// Incremental variant yielding answer fragments as the model emits
    /// them.
    async fn generate_stream(
        &self,
        query: &str,
        context: &[FusedResult],
        persona: Option<&str>,
    ) -> Result<BoxStream<'static, Result<String, AppError>>, AppError>;
}

pub struct OpenAiGenerator {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: String) -> Self {
        Self { client, model }
    }

    fn build_request(
        &self,
        query: &str,
        context: &[FusedResult],
        persona: Option<&str>,
    ) -> Result<CreateChatCompletionRequest, AppError> {
        let system_prompt = persona.unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages([
                ChatCompletionRequestSystemMessage::from(system_prompt).into(),
                ChatCompletionRequestUserMessage::from(build_user_prompt(query, context)).into(),
            ])
            .build()?;
        Ok(request)
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        query: &str,
        context: &[FusedResult],
        persona: Option<&str>,
    ) -> Result<String, AppError> {
        let request = self.build_request(query, context, persona)?;
        let response = self.client.chat().create(request).await?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::Upstream("Chat completion returned no content".into()))
    }

    async fn generate_stream(
        &self,
        query: &str,
        context: &[FusedResult],
        persona: Option<&str>,
    ) -> Result<BoxStream<'static, Result<String, AppError>>, AppError> {
        let request = self.build_request(query, context, persona)?;
        let stream = self.client.chat().create_stream(request).await?;

        Ok(stream
            .filter_map(|item| async move {
                match item {
                    Ok(response) => response
                        .choices
                        .first()
                        .and_then(|choice| choice.delta.content.clone())
                        .filter(|fragment| !fragment.is_empty())
                        .map(Ok),
                    Err(error) => Some(Err(AppError::OpenAI(error))),
                }
            })
            .boxed())
    }
}

/// Lay the context out as numbered source blocks so the model can cite
/// them, followed by the question.
fn build_user_prompt(query: &str, context: &[FusedResult]) -> String {
    let mut prompt = String::from("Context:\n\n");
    for (i, chunk) in context.iter().enumerate() {
        let page = chunk
            .page_num
            .map_or_else(|| "unknown".to_owned(), |p| p.to_string());
        prompt.push_str(&format!(
            "[Source {} - Page {}]\n{}\n\n",
            i + 1,
            page,
            chunk.text
        ));
    }
    prompt.push_str(&format!("Question: {query}\n\nAnswer:"));
    prompt
}
