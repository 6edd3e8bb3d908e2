use std::time::Duration;

use serde_json::{json, Value as JsonValue};

use crate::config::{AiConfig, SamplingParams};
use crate::error::{Error, Result};
use crate::models::item::{CorrectAnswer, GeneratedItem};
use crate::models::parameters::Difficulty;
use crate::services::api_client::{ApiClient, RequestSpec, RetryPolicy};
use crate::services::json_extract::{extract_json, unwrap_items};

const PROMPT_PREVIEW: usize = 200;

/// Qwen-style text-generation adapter: prompt in, normalized items out.
#[derive(Clone)]
pub struct AIService {
    api: ApiClient,
    config: AiConfig,
}

impl AIService {
    pub fn new(config: AiConfig, api: ApiClient) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    pub fn build_payload(&self, prompt: &str, params: &SamplingParams) -> JsonValue {
        json!({
            "model": self.config.model,
            "input": { "prompt": prompt },
            "parameters": {
                "temperature": params.temperature,
                "top_p": params.top_p,
                "max_tokens": params.max_tokens,
            }
        })
    }

    /// Raw completion text for `prompt`.
    pub async fn complete<F>(
        &self,
        prompt: &str,
        params: &SamplingParams,
        policy: &RetryPolicy,
        on_retry: F,
    ) -> Result<String>
    where
        F: FnMut(u32, Duration) + Send,
    {
        tracing::debug!(
            model = %self.config.model,
            prompt_len = prompt.len(),
            preview = %prompt.chars().take(PROMPT_PREVIEW).collect::<String>(),
            timeout_ms = policy.timeout.as_millis() as u64,
            "requesting completion"
        );

        let spec = RequestSpec {
            url: self.config.api_url.clone(),
            bearer_token: self.config.api_key.clone(),
            body: self.build_payload(prompt, params),
        };
        let response = self.api.request_with_retry(&spec, policy, on_retry).await?;

        completion_text(&response.body).ok_or_else(|| Error::Parse {
            message: "response carries no completion text".to_string(),
            snippet: response.body.to_string().chars().take(100).collect(),
        })
    }

    /// Completion, extraction and normalization in one step. Fails with a
    /// parse error when nothing usable comes back.
    pub async fn generate_items<F>(
        &self,
        prompt: &str,
        params: &SamplingParams,
        policy: &RetryPolicy,
        count: usize,
        difficulty: Difficulty,
        on_retry: F,
    ) -> Result<Vec<GeneratedItem>>
    where
        F: FnMut(u32, Duration) + Send,
    {
        let text = self.complete(prompt, params, policy, on_retry).await?;
        tracing::debug!(length = text.len(), "completion received");

        let raw = unwrap_items(extract_json(&text)?);
        let items = sanitize_items(&raw, count, difficulty);
        if items.is_empty() {
            return Err(Error::Parse {
                message: "no usable items in completion".to_string(),
                snippet: text.chars().take(100).collect(),
            });
        }
        tracing::info!(requested = count, received = raw.len(), kept = items.len(), "items parsed");
        Ok(items)
    }
}

/// `output.text`, then the chat-style `choices[0].message.content`.
pub fn completion_text(body: &JsonValue) -> Option<String> {
    let chat = |v: &JsonValue| {
        v.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
    };
    body.get("output")
        .and_then(|o| o.get("text"))
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .or_else(|| body.get("output").and_then(chat))
        .or_else(|| chat(body))
}

pub fn sanitize_items(raw: &[JsonValue], count: usize, difficulty: Difficulty) -> Vec<GeneratedItem> {
    let mut items: Vec<GeneratedItem> = raw
        .iter()
        .filter_map(|v| coerce_item(v, difficulty))
        .collect();
    if items.len() > count {
        items.truncate(count);
    }
    items
}

fn text_field(v: &JsonValue, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| v.get(*k))
        .and_then(|x| match x {
            JsonValue::String(s) => Some(s.trim().to_string()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn coerce_options(v: Option<&JsonValue>) -> Vec<String> {
    match v {
        Some(JsonValue::Array(list)) => list
            .iter()
            .filter_map(|o| match o {
                JsonValue::String(s) => Some(s.trim().to_string()),
                JsonValue::Number(n) => Some(n.to_string()),
                JsonValue::Bool(b) => Some(b.to_string()),
                _ => None,
            })
            .collect(),
        // {"A": "...", "B": "..."}
        Some(JsonValue::Object(map)) => map
            .iter()
            .filter_map(|(label, o)| o.as_str().map(|s| format!("{}. {}", label, s.trim())))
            .collect(),
        _ => Vec::new(),
    }
}

fn coerce_answer(v: Option<&JsonValue>, options: &[String]) -> CorrectAnswer {
    match v {
        Some(JsonValue::Number(n)) => match n.as_u64() {
            Some(i) => CorrectAnswer::Index(i as usize),
            None => CorrectAnswer::Text(n.to_string()),
        },
        // Option text is matched before a numeric string is read as an index.
        Some(JsonValue::String(s)) => {
            let answer = CorrectAnswer::Text(s.trim().to_string());
            match answer.resolve_index(options) {
                Some(i) => CorrectAnswer::Text(options[i].clone()),
                None => answer,
            }
        }
        _ => CorrectAnswer::Text(String::new()),
    }
}

fn coerce_item(v: &JsonValue, difficulty: Difficulty) -> Option<GeneratedItem> {
    if !v.is_object() {
        return None;
    }
    let options = coerce_options(v.get("options"));
    let answer_value = ["correctAnswer", "correct_answer", "answer"]
        .iter()
        .find_map(|k| v.get(*k));
    let correct_answer = coerce_answer(answer_value, &options);

    Some(GeneratedItem {
        question: text_field(v, &["question", "title"]).unwrap_or_default(),
        options,
        correct_answer,
        explanation: text_field(v, &["explanation", "analysis"]).unwrap_or_default(),
        difficulty,
        related_goal: text_field(v, &["relatedGoal", "related_goal"]).filter(|s| !s.is_empty()),
        related_knowledge_point: text_field(v, &["relatedKnowledgePoint", "related_knowledge_point"])
            .filter(|s| !s.is_empty()),
        validation: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::api_monitor::ApiMonitor;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn completion_text_prefers_output_text() {
        assert_eq!(
            completion_text(&json!({"output": {"text": "a"}, "choices": [{"message": {"content": "b"}}]})),
            Some("a".into())
        );
        assert_eq!(
            completion_text(&json!({"output": {"choices": [{"message": {"content": "c"}}]}})),
            Some("c".into())
        );
        assert_eq!(
            completion_text(&json!({"choices": [{"message": {"content": "b"}}]})),
            Some("b".into())
        );
        assert_eq!(completion_text(&json!({"output": {}})), None);
    }

    #[test]
    fn letter_answers_resolve_to_option_text() {
        let raw = vec![json!({
            "question": "q",
            "options": ["A. 一", "B. 二", "C. 三", "D. 四"],
            "correctAnswer": "B",
            "explanation": "e",
            "relatedGoal": "",
        })];
        let items = sanitize_items(&raw, 5, Difficulty::Hard);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].correct_answer, CorrectAnswer::Text("B. 二".into()));
        assert_eq!(items[0].difficulty, Difficulty::Hard);
        assert!(items[0].related_goal.is_none());
    }

    #[test]
    fn numeric_options_and_index_answers_are_coerced() {
        let raw = vec![
            json!({"question": "1+1", "options": [1, 2, 3, 4], "correct_answer": "2", "explanation": "e"}),
            json!({"question": "2+2", "options": {"A": "3", "B": "4"}, "answer": 1, "explanation": "e"}),
            json!({"question": "1+2", "options": ["A. 2", "B. 3", "C. 4", "D. 5"], "correctAnswer": "3", "explanation": "e"}),
            json!({"question": "3-1", "options": ["A. 甲", "B. 乙", "C. 丙"], "correctAnswer": "2", "explanation": "e"}),
            json!("not an item"),
        ];
        let items = sanitize_items(&raw, 5, Difficulty::Easy);
        assert_eq!(items.len(), 4);

        assert_eq!(items[0].options, vec!["1", "2", "3", "4"]);
        assert_eq!(items[0].correct_answer, CorrectAnswer::Text("2".into()));
        assert_eq!(items[0].correct_answer.resolve_index(&items[0].options), Some(1));

        assert_eq!(items[1].options, vec!["A. 3", "B. 4"]);
        assert_eq!(items[1].correct_answer, CorrectAnswer::Index(1));

        assert_eq!(items[2].correct_answer, CorrectAnswer::Text("B. 3".into()));
        // no option reads "2", so it is taken as an index
        assert_eq!(items[3].correct_answer, CorrectAnswer::Text("C. 丙".into()));
    }

    #[test]
    fn items_are_truncated_to_count() {
        let raw: Vec<JsonValue> = (0..6).map(|i| json!({"question": format!("q{i}")})).collect();
        assert_eq!(sanitize_items(&raw, 4, Difficulty::Medium).len(), 4);
    }

    #[tokio::test]
    async fn generate_items_sends_qwen_payload() {
        let server = MockServer::start().await;
        let completion = "```json\n[{\"question\": \"求根公式是什么\", \"options\": [\"A. x\", \"B. y\"], \"correctAnswer\": \"A\", \"explanation\": \"求根公式\"}]\n```";
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "model": "qwen-test",
                "input": {"prompt": "PROMPT"},
                "parameters": {"max_tokens": 4048}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": {"text": completion}})))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = AiConfig::new("key", format!("{}/generation", server.uri()));
        config.model = "qwen-test".into();
        let api = ApiClient::new(Arc::new(ApiMonitor::default()), 0.8);
        let service = AIService::new(config, api);
        let policy = RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        };

        let items = service
            .generate_items("PROMPT", &SamplingParams::standard(), &policy, 5, Difficulty::Medium, |_, _| {})
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].correct_answer, CorrectAnswer::Text("A. x".into()));
    }

    #[tokio::test]
    async fn empty_completion_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": {"text": "[]"}})))
            .mount(&server)
            .await;

        let config = AiConfig::new("key", server.uri());
        let service = AIService::new(config, ApiClient::new(Arc::new(ApiMonitor::default()), 0.8));
        let policy = RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        };
        let err = service
            .generate_items("p", &SamplingParams::standard(), &policy, 3, Difficulty::Easy, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }
}
