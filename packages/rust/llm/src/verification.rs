//! Identity verification of extracted contacts.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use contactscout_shared::{ExtractedContact, InputRecord, PageContent, Result, VerificationOutcome};

use crate::client::{CallError, ChatClient, parse_json_object};
use crate::extraction::{excerpt, text_field};
use crate::retry::{RetryPolicy, with_retry};

const SYSTEM_PROMPT: &str = "\
You decide whether contact details found on a web page belong to a specific
professional.

Weigh how closely the name matches (allowing initials, middle names, and
credentials), whether the city and state agree, whether the page describes
the same profession, and any other identifying detail on the page.

Return a JSON object with:
  \"confidence\": integer from 0 (certainly someone else) to 100 (certainly the same person),
  \"is_match\": true if this is plausibly the same person,
  \"reasoning\": one or two sentences explaining the score.";

const MAX_TOKENS: u32 = 300;

/// Scores how likely an extracted contact belongs to the record's person.
#[async_trait]
pub trait VerificationClient: Send + Sync {
    async fn verify(
        &self,
        record: &InputRecord,
        contact: &ExtractedContact,
        page: &PageContent,
    ) -> Result<VerificationOutcome>;
}

/// [`VerificationClient`] backed by a chat model.
pub struct LlmVerificationClient {
    chat: Arc<dyn ChatClient>,
    retry: RetryPolicy,
    context_chars: usize,
}

impl LlmVerificationClient {
    /// `max_input_chars` is the extraction budget; verification sends half
    /// of it as page context.
    pub fn new(chat: Arc<dyn ChatClient>, retry: RetryPolicy, max_input_chars: usize) -> Self {
        Self {
            chat,
            retry,
            context_chars: max_input_chars / 2,
        }
    }
}

#[async_trait]
impl VerificationClient for LlmVerificationClient {
    #[instrument(skip_all, fields(record_id = %record.id, url = %contact.source_url))]
    async fn verify(
        &self,
        record: &InputRecord,
        contact: &ExtractedContact,
        page: &PageContent,
    ) -> Result<VerificationOutcome> {
        let user = verification_prompt(record, contact, &page.text, self.context_chars);
        let chat = self.chat.as_ref();
        let user = user.as_str();

        let outcome = with_retry(&self.retry, "verify", || async move {
            let raw = chat.complete_json(SYSTEM_PROMPT, user, MAX_TOKENS).await?;
            outcome_from_json(&raw)
        })
        .await?;

        info!(
            confidence = outcome.confidence,
            plausible_match = outcome.plausible_match,
            "identity verified"
        );
        Ok(outcome)
    }
}

fn verification_prompt(
    record: &InputRecord,
    contact: &ExtractedContact,
    text: &str,
    context_chars: usize,
) -> String {
    let known = |v: &Option<String>| v.as_deref().unwrap_or("unknown").to_string();
    format!(
        "Known person:\n  Name: {name}\n  Profession: {title}\n  City: {city}\n  State: {state}\n  Address: {address}\n\n\
         Found on page:\n  Phone: {phone}\n  Email: {email}\n  Address: {found_address}\n  Source: {source}\n\n\
         Page context:\n{context}",
        name = record.name,
        title = known(&record.title),
        city = known(&record.city),
        state = known(&record.state),
        address = known(&record.address),
        phone = known(&contact.phone),
        email = known(&contact.email),
        found_address = known(&contact.address),
        source = contact.source_url,
        context = excerpt(text, context_chars),
    )
}

fn outcome_from_json(raw: &str) -> std::result::Result<VerificationOutcome, CallError> {
    let value = parse_json_object(raw)?;
    let confidence = confidence_score(&value)
        .ok_or_else(|| CallError::Transient("model output has no usable confidence".into()))?;
    let plausible_match = value
        .get("is_match")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(confidence >= 50);
    let reasoning = text_field(&value, "reasoning").unwrap_or_default();
    Ok(VerificationOutcome::new(confidence, plausible_match, reasoning))
}

/// Confidence as a 0..=100 integer; accepts numbers and numeric strings.
fn confidence_score(value: &serde_json::Value) -> Option<u8> {
    let raw = match value.get("confidence")? {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    Some(raw.round().clamp(0.0, 100.0) as u8)
}
