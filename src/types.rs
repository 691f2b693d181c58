use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of metered actions the platform sells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    TextGeneration,
    ImageGeneration,
    CodeGeneration,
    DataAnalysis,
    TextSummarization,
    SeoOptimization,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::TextGeneration,
        ActionKind::ImageGeneration,
        ActionKind::CodeGeneration,
        ActionKind::DataAnalysis,
        ActionKind::TextSummarization,
        ActionKind::SeoOptimization,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::TextGeneration => "text_generation",
            ActionKind::ImageGeneration => "image_generation",
            ActionKind::CodeGeneration => "code_generation",
            ActionKind::DataAnalysis => "data_analysis",
            ActionKind::TextSummarization => "text_summarization",
            ActionKind::SeoOptimization => "seo_optimization",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown action kind: {0}")]
pub struct ParseActionKindError(String);

impl std::str::FromStr for ActionKind {
    type Err = ParseActionKindError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "text_generation" => Ok(ActionKind::TextGeneration),
            "image_generation" => Ok(ActionKind::ImageGeneration),
            "code_generation" => Ok(ActionKind::CodeGeneration),
            "data_analysis" => Ok(ActionKind::DataAnalysis),
            "text_summarization" => Ok(ActionKind::TextSummarization),
            "seo_optimization" => Ok(ActionKind::SeoOptimization),
            other => Err(ParseActionKindError(other.to_string())),
        }
    }
}

/// Input payload for one metered action. `prompt` carries the primary text
/// (or the serialized data for analysis); the remaining fields refine
/// specific kinds and are ignored by the others.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ActionInput {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl ActionInput {
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_analysis_type(mut self, analysis_type: impl Into<String>) -> Self {
        self.analysis_type = Some(analysis_type.into());
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }
}

/// Output of a completed action. For image generation `content` is the
/// generated image URL.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ActionOutput {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
}
