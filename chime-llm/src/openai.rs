use crate::error::{LlmError, Result};
use crate::types::{Completion, CompletionRequest, Role, Usage};
use serde::{Deserialize, Serialize};

pub(crate) async fn chat_completion(
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    request: &CompletionRequest,
) -> Result<Completion> {
    let req = OpenAiChatRequest {
        model: model.to_string(),
        messages: build_messages(request),
    };

    let response = http
        .post(format!("{base_url}/chat/completions"))
        .bearer_auth(api_key)
        .json(&req)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(LlmError::Http(format!(
            "chat completion status={status} body={body}"
        )));
    }

    let parsed: OpenAiChatResponse = serde_json::from_str(&body)?;
    parsed.try_into()
}

fn build_messages(request: &CompletionRequest) -> Vec<OpenAiMessage> {
    let mut out = Vec::with_capacity(request.history.len() + 2);
    if !request.system_prompt.is_empty() {
        out.push(OpenAiMessage {
            role: "system".to_string(),
            content: OpenAiContent::Text(request.system_prompt.clone()),
        });
    }
    for turn in &request.history {
        out.push(OpenAiMessage {
            role: role_name(turn.role).to_string(),
            content: OpenAiContent::Text(turn.content.clone()),
        });
    }

    let content = if request.images.is_empty() {
        OpenAiContent::Text(request.prompt.clone())
    } else {
        let mut parts = vec![OpenAiContentPart::Text {
            text: request.prompt.clone(),
        }];
        for url in &request.images {
            parts.push(OpenAiContentPart::ImageUrl {
                image_url: OpenAiImageUrl { url: url.clone() },
            });
        }
        OpenAiContent::Parts(parts)
    };
    out.push(OpenAiMessage {
        role: "user".to_string(),
        content,
    });
    out
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: OpenAiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Debug, Serialize)]
struct OpenAiImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl TryFrom<OpenAiChatResponse> for Completion {
    type Error = LlmError;

    fn try_from(v: OpenAiChatResponse) -> Result<Self> {
        let choice = v
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ResponseFormat("response missing choices".to_string()))?;

        let usage = v.usage.unwrap_or(OpenAiUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
        })
    }
}
