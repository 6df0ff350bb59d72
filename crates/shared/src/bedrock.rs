use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_bedrockruntime::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, ConverseOutput, InferenceConfiguration, Message,
    SystemContentBlock,
};
use aws_sdk_bedrockruntime::Client;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::summarizer::{ChatModel, MAX_TOKENS};

/// Claude on AWS Bedrock through the Converse API.
///
/// Credentials come from the standard AWS provider chain. The SDK client is
/// built on first use because loading the chain is async.
pub struct BedrockClient {
    region: String,
    model_id: String,
    client: OnceCell<Client>,
}

impl BedrockClient {
    pub fn new(region: &str, model_id: &str) -> Result<Self> {
        let region = region.trim();
        if region.is_empty() {
            return Err(PipelineError::Config(
                "AWS_REGION is required for the Bedrock provider".to_string(),
            ));
        }

        Ok(Self {
            region: region.to_string(),
            model_id: model_id.to_string(),
            client: OnceCell::new(),
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn client(&self) -> &Client {
        self.client
            .get_or_init(|| async {
                let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(self.region.clone()))
                    .load()
                    .await;
                Client::new(&sdk_config)
            })
            .await
    }

    /// Map a Bedrock error code onto the error taxonomy. `None` means the
    /// request never got a service response.
    fn classify_error(code: Option<&str>, message: &str) -> PipelineError {
        let message = message.to_string();
        match code {
            Some("ThrottlingException") => PipelineError::Throttling(message),
            Some("ServiceQuotaExceededException") => PipelineError::QuotaExceeded(message),
            Some(
                "AccessDeniedException"
                | "UnrecognizedClientException"
                | "ExpiredTokenException"
                | "InvalidSignatureException",
            ) => PipelineError::Auth(message),
            Some("ValidationException" | "ResourceNotFoundException") => {
                PipelineError::InvalidRequest(message)
            }
            Some("ModelNotReadyException") => PipelineError::ModelLoad(message),
            Some("ModelErrorException" | "ModelTimeoutException") => PipelineError::Model(message),
            None if message.to_lowercase().contains("credentials") => PipelineError::Auth(message),
            _ => PipelineError::Network(format!("Bedrock error: {}", message)),
        }
    }
}

#[async_trait]
impl ChatModel for BedrockClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let message = Message::builder()
            .role(ConversationRole::User)
            .content(ContentBlock::Text(prompt.to_string()))
            .build()
            .map_err(|e| PipelineError::InvalidRequest(format!("Invalid Bedrock message: {}", e)))?;

        debug!(model = %self.model_id, region = %self.region, "Bedrock request");

        let response = self
            .client()
            .await
            .converse()
            .model_id(&self.model_id)
            .system(SystemContentBlock::Text(system.to_string()))
            .messages(message)
            .inference_config(
                InferenceConfiguration::builder()
                    .max_tokens(MAX_TOKENS as i32)
                    .temperature(0.0)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                let code = e.code().map(str::to_string);
                Self::classify_error(code.as_deref(), &DisplayErrorContext(&e).to_string())
            })?;

        let text = match response.output() {
            Some(ConverseOutput::Message(msg)) => msg
                .content()
                .iter()
                .filter_map(|block| block.as_text().ok())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(""),
            _ => String::new(),
        };

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(PipelineError::Model("Bedrock returned an empty completion".to_string()));
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_map_to_taxonomy() {
        let throttled = BedrockClient::classify_error(Some("ThrottlingException"), "Too many requests");
        assert!(throttled.is_retryable());

        assert!(matches!(
            BedrockClient::classify_error(Some("AccessDeniedException"), "denied"),
            PipelineError::Auth(_)
        ));
        assert!(matches!(
            BedrockClient::classify_error(Some("ServiceQuotaExceededException"), "quota"),
            PipelineError::QuotaExceeded(_)
        ));
        assert!(matches!(
            BedrockClient::classify_error(Some("ValidationException"), "bad model id"),
            PipelineError::InvalidRequest(_)
        ));
        assert!(matches!(
            BedrockClient::classify_error(Some("ModelNotReadyException"), "warming"),
            PipelineError::ModelLoad(_)
        ));
        assert!(matches!(
            BedrockClient::classify_error(None, "failed to load credentials from the chain"),
            PipelineError::Auth(_)
        ));
        assert!(matches!(
            BedrockClient::classify_error(None, "dispatch failure: connection reset"),
            PipelineError::Network(_)
        ));
    }

    #[test]
    fn test_region_is_required() {
        let err = BedrockClient::new("  ", "anthropic.claude-3-haiku-20240307-v1:0").err().unwrap();
        assert!(matches!(err, PipelineError::Config(_)));

        let client = BedrockClient::new("us-east-1", "anthropic.claude-3-haiku-20240307-v1:0").unwrap();
        assert_eq!(client.region(), "us-east-1");
    }
}
