//! Contact extraction from page text.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use contactscout_shared::{ExtractedContact, InputRecord, PageContent, Result};

use crate::client::{CallError, ChatClient, parse_json_object};
use crate::retry::{RetryPolicy, with_retry};

const SYSTEM_PROMPT: &str = "\
You read web pages and pull out contact details for one named professional.

Return a JSON object with exactly these keys:
  \"phone\": the person's phone number including area code,
  \"email\": the person's email address,
  \"full_address\": the person's practice or mailing address on one line.

Only report details that clearly belong to the named person. Use an empty
string for anything the page does not state. Never guess.";

const MAX_TOKENS: u32 = 500;

/// Pulls structured contact fields for a record out of one page.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    async fn extract(&self, record: &InputRecord, page: &PageContent) -> Result<ExtractedContact>;
}

/// [`ExtractionClient`] backed by a chat model.
pub struct LlmExtractionClient {
    chat: Arc<dyn ChatClient>,
    retry: RetryPolicy,
    max_input_chars: usize,
}

impl LlmExtractionClient {
    pub fn new(chat: Arc<dyn ChatClient>, retry: RetryPolicy, max_input_chars: usize) -> Self {
        Self {
            chat,
            retry,
            max_input_chars,
        }
    }
}

#[async_trait]
impl ExtractionClient for LlmExtractionClient {
    #[instrument(skip_all, fields(record_id = %record.id, url = %page.url))]
    async fn extract(&self, record: &InputRecord, page: &PageContent) -> Result<ExtractedContact> {
        let user = extraction_prompt(record, &page.text, self.max_input_chars);
        let chat = self.chat.as_ref();
        let user = user.as_str();
        let source_url = page.url.as_str();

        let contact = with_retry(&self.retry, "extract", || async move {
            let raw = chat.complete_json(SYSTEM_PROMPT, user, MAX_TOKENS).await?;
            contact_from_json(&raw, source_url)
        })
        .await?;

        debug!(
            phone = contact.phone.is_some(),
            email = contact.email.is_some(),
            address = contact.address.is_some(),
            "contact extracted"
        );
        Ok(contact)
    }
}

fn extraction_prompt(record: &InputRecord, text: &str, max_chars: usize) -> String {
    let mut prompt = format!("Person: {}\n", record.name);
    if let Some(title) = &record.title {
        prompt.push_str(&format!("Profession: {title}\n"));
    }
    let location = record.location();
    if !location.is_empty() {
        prompt.push_str(&format!("Location: {location}\n"));
    }
    prompt.push_str("\nPage text:\n");
    prompt.push_str(excerpt(text, max_chars));
    prompt
}

fn contact_from_json(raw: &str, source_url: &str) -> std::result::Result<ExtractedContact, CallError> {
    let value = parse_json_object(raw)?;
    Ok(ExtractedContact {
        phone: text_field(&value, "phone"),
        email: text_field(&value, "email"),
        address: text_field(&value, "full_address").or_else(|| text_field(&value, "address")),
        source_url: source_url.to_string(),
    })
}

/// A non-placeholder string value for `key`.
pub(crate) fn text_field(value: &serde_json::Value, key: &str) -> Option<String> {
    let text = value.get(key)?.as_str()?.trim();
    let placeholder = ["", "n/a", "na", "none", "null", "unknown", "not found"]
        .iter()
        .any(|p| text.eq_ignore_ascii_case(p));
    (!placeholder).then(|| text.to_string())
}

/// The first `max_chars` characters of `text`.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use url::Url;
    use wiremock::matchers::{body_string_contains, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::client::OpenAiCompatClient;
    use contactscout_shared::{LlmConfig, ScoutError};

    /// Chat client that replays canned replies and records prompts.
    #[derive(Default)]
    pub(crate) struct ScriptedChat {
        replies: Mutex<VecDeque<std::result::Result<String, CallError>>>,
        pub(crate) prompts: Mutex<Vec<String>>,
    }

    impl ScriptedChat {
        pub(crate) fn new(replies: Vec<std::result::Result<String, CallError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::default(),
            })
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedChat {
        async fn complete_json(
            &self,
            _system: &str,
            user: &str,
            _max_tokens: u32,
        ) -> std::result::Result<String, CallError> {
            self.prompts.lock().unwrap().push(user.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CallError::Permanent("script exhausted".into())))
        }
    }

    pub(crate) fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
        }
    }

    fn record() -> InputRecord {
        InputRecord::new("r-1", "Jane Doe, MD")
            .with_title("Cardiologist")
            .with_city("Boston")
            .with_state("MA")
    }

    fn page(text: &str) -> PageContent {
        PageContent::new(
            Url::parse("https://www.doximity.com/pub/jane-doe").unwrap(),
            text.to_string(),
        )
    }

    #[tokio::test]
    async fn maps_fields_and_drops_placeholders() {
        let chat = ScriptedChat::new(vec![Ok(
            r#"{"phone": "(617) 555-0100", "email": "", "full_address": "N/A"}"#.into(),
        )]);
        let client = LlmExtractionClient::new(chat.clone(), fast_retry(), 6_000);

        let contact = client.extract(&record(), &page("Jane Doe")).await.unwrap();
        assert_eq!(contact.phone.as_deref(), Some("(617) 555-0100"));
        assert_eq!(contact.email, None);
        assert_eq!(contact.address, None);
        assert_eq!(contact.source_url, "https://www.doximity.com/pub/jane-doe");

        let prompt = &chat.prompts.lock().unwrap()[0];
        assert!(prompt.contains("Person: Jane Doe, MD"));
        assert!(prompt.contains("Location: Boston, MA"));
    }

    #[tokio::test]
    async fn page_text_is_truncated() {
        let chat = ScriptedChat::new(vec![Ok("{}".into())]);
        let client = LlmExtractionClient::new(chat.clone(), fast_retry(), 10);

        client
            .extract(&record(), &page("0123456789ABCDEF"))
            .await
            .unwrap();
        let prompt = &chat.prompts.lock().unwrap()[0];
        assert!(prompt.ends_with("0123456789"));
    }

    #[tokio::test]
    async fn garbled_output_is_retried() {
        let chat = ScriptedChat::new(vec![
            Ok("Sorry, I can't do that".into()),
            Ok(r#"{"email": "jdoe@bmc.org"}"#.into()),
        ]);
        let client = LlmExtractionClient::new(chat.clone(), fast_retry(), 6_000);

        let contact = client.extract(&record(), &page("text")).await.unwrap();
        assert_eq!(contact.email.as_deref(), Some("jdoe@bmc.org"));
        assert_eq!(chat.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_become_model_call_failure() {
        let chat = ScriptedChat::new(vec![
            Err(CallError::Transient("429".into())),
            Err(CallError::Transient("429".into())),
            Err(CallError::Transient("429".into())),
        ]);
        let client = LlmExtractionClient::new(chat, fast_retry(), 6_000);

        let err = client.extract(&record(), &page("text")).await.unwrap_err();
        assert!(matches!(err, ScoutError::ModelCallFailure { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn extracts_through_http_client() {
        let server = MockServer::start().await;
        Mock::given(path("/chat/completions"))
            .and(body_string_contains("Jane Doe, MD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "{\"phone\":\"617-555-0100\",\"email\":\"\",\"full_address\":\"1 Main St, Boston, MA\"}"}}]
            })))
            .mount(&server)
            .await;

        let config = LlmConfig {
            base_url: server.uri(),
            ..LlmConfig::default()
        };
        let chat = Arc::new(OpenAiCompatClient::new(&config, "sk-test".into()).unwrap());
        let client = LlmExtractionClient::new(chat, fast_retry(), 6_000);

        let contact = client
            .extract(&record(), &page("Jane Doe, MD. Call 617-555-0100."))
            .await
            .unwrap();
        assert_eq!(contact.phone.as_deref(), Some("617-555-0100"));
        assert_eq!(contact.address.as_deref(), Some("1 Main St, Boston, MA"));
        assert!(contact.has_any_field());
    }
}
