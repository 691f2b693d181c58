use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ProviderError;
use crate::gateway::{CapabilityProvider, ProviderConfig};
use crate::types::{ActionInput, ActionKind, ActionOutput};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TEXT_MODEL: &str = "gpt-4o";
const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";

const TEXT_MAX_TOKENS: u32 = 1000;
const CODE_MAX_TOKENS: u32 = 2000;
const SUMMARY_MAX_TOKENS: u32 = 500;

/// Capability provider speaking the OpenAI-compatible chat/images HTTP API.
/// Text-shaped kinds go through chat completions; image generation goes
/// through the images endpoint.
#[derive(Clone)]
pub struct OpenAiCompatible {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    text_model: String,
    image_model: String,
}

impl OpenAiCompatible {
    pub fn new(api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("reqwest client build should not fail");

        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = model.into();
        self
    }

    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = model.into();
        self
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(config.api_key.clone())
            .with_base_url(config.base_url.clone())
            .with_text_model(config.text_model.clone())
            .with_image_model(config.image_model.clone())
    }

    fn chat_completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    fn images_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/images/generations")
    }

    async fn chat(
        &self,
        messages: Vec<Value>,
        max_tokens: Option<u32>,
        json_object: bool,
    ) -> Result<ActionOutput, ProviderError> {
        let mut body = json!({
            "model": self.text_model,
            "messages": messages,
        });
        if let Some(max_tokens) = max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if json_object {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let response = self
            .http
            .post(self.chat_completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let parsed: ChatCompletionsResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                ProviderError::InvalidResponse("chat completion returned no content".to_string())
            })?;
        Ok(ActionOutput {
            content,
            model: parsed.model,
            output_tokens: parsed.usage.and_then(|usage| usage.completion_tokens),
        })
    }

    async fn generate_image(&self, input: &ActionInput) -> Result<ActionOutput, ProviderError> {
        let body = json!({
            "model": self.image_model,
            "prompt": input.prompt,
            "n": 1,
            "size": "1024x1024",
        });

        let response = self
            .http
            .post(self.images_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let parsed: ImagesResponse = response.json().await?;
        let url = parsed
            .data
            .into_iter()
            .next()
            .and_then(|datum| datum.url)
            .ok_or_else(|| {
                ProviderError::InvalidResponse("image generation returned no url".to_string())
            })?;
        Ok(ActionOutput {
            content: url,
            model: Some(self.image_model.clone()),
            output_tokens: None,
        })
    }
}

#[async_trait]
impl CapabilityProvider for OpenAiCompatible {
    async fn invoke(
        &self,
        kind: ActionKind,
        input: &ActionInput,
    ) -> Result<ActionOutput, ProviderError> {
        match kind {
            ActionKind::TextGeneration => {
                let max_tokens = input.max_output_tokens.unwrap_or(TEXT_MAX_TOKENS);
                self.chat(
                    vec![user_message(input.prompt.clone())],
                    Some(max_tokens),
                    false,
                )
                .await
            }
            ActionKind::CodeGeneration => {
                let prompt = match input.language.as_deref() {
                    Some(language) => format!(
                        "Generate {language} code for the following requirement: {}. \
                         Return only the code without explanations.",
                        input.prompt
                    ),
                    None => format!(
                        "Generate code for the following requirement: {}. \
                         Return only the code without explanations.",
                        input.prompt
                    ),
                };
                self.chat(vec![user_message(prompt)], Some(CODE_MAX_TOKENS), false)
                    .await
            }
            ActionKind::TextSummarization => {
                let prompt = format!(
                    "Please summarize the following text concisely while maintaining key points:\n\n{}",
                    input.prompt
                );
                self.chat(vec![user_message(prompt)], Some(SUMMARY_MAX_TOKENS), false)
                    .await
            }
            ActionKind::DataAnalysis => {
                let analysis_type = input.analysis_type.as_deref().unwrap_or("exploratory");
                let prompt = format!(
                    "Analyze the following data using {analysis_type} analysis. \
                     Provide insights, patterns, and recommendations. \
                     Respond with JSON in this format: \
                     {{ \"insights\": [...], \"patterns\": [...], \"recommendations\": [...] }}\n\n\
                     Data: {}",
                    input.prompt
                );
                self.chat(
                    vec![
                        system_message(
                            "You are a data analysis expert. Analyze the data and provide \
                             insights in JSON format.",
                        ),
                        user_message(prompt),
                    ],
                    None,
                    true,
                )
                .await
            }
            ActionKind::SeoOptimization => {
                let keywords = input.keywords.join(", ");
                let prompt = format!(
                    "Optimize the following content for SEO with these target keywords: {keywords}. \
                     Provide recommendations for title, meta description, headings, and content \
                     improvements. Respond with JSON in this format: \
                     {{ \"title\": \"...\", \"metaDescription\": \"...\", \"headings\": [...], \
                     \"recommendations\": [...] }}\n\n\
                     Content: {}",
                    input.prompt
                );
                self.chat(
                    vec![
                        system_message(
                            "You are an SEO expert. Analyze content and provide optimization \
                             recommendations in JSON format.",
                        ),
                        user_message(prompt),
                    ],
                    None,
                    true,
                )
                .await
            }
            ActionKind::ImageGeneration => self.generate_image(input).await,
        }
    }
}

fn user_message(content: String) -> Value {
    json!({ "role": "user", "content": content })
}

fn system_message(content: &str) -> Value {
    json!({ "role": "system", "content": content })
}

#[derive(Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    #[serde(default)]
    url: Option<String>,
}
