//! Conversational bot integration for classifying stored images.
//!
//! `GenericBotClient` is a single conversational turn against a bot backend.
//! `BotClient` owns the rest: session allocation, the multi-turn diagnosis
//! exchange, timeouts and retries, and translating the bot's structured reply
//! into a [`DiagnosisResult`].

pub mod lex;

use std::{collections::HashMap, ops::Deref, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::{
    base::{
        config::Config,
        error::DiagnosisError,
        prompts::{EMPTY_REPLY_FALLBACK, NO_REMEDIATION, get_diagnosis_utterance},
        types::{BotSession, ConversationState, DiagnosisResult, DiagnosisStatus, ImageSubmission, StoredObjectRef},
    },
    service::retry::{RetryPolicy, call_with_retry},
};

/// Slots whose values are diagnosis labels, in order of preference.
const DIAGNOSIS_SLOTS: [&str; 3] = ["diagnosis", "disease", "condition"];

// Types.

/// Where the bot's current intent stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStatus {
    InProgress,
    Waiting,
    ReadyForFulfillment,
    FulfillmentInProgress,
    Fulfilled,
    Failed,
}

/// What the bot wants to happen next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogAction {
    Close,
    Delegate,
    ConfirmIntent,
    ElicitIntent,
    ElicitSlot(String),
}

/// One bot reply, reduced to what the pipeline needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BotReply {
    /// Name of the intent the bot matched, if any.
    pub intent: Option<String>,
    pub intent_status: Option<IntentStatus>,
    pub dialog_action: Option<DialogAction>,
    /// Filled slots, by slot name.
    pub slots: HashMap<String, String>,
    /// Plain-text messages, in order.
    pub messages: Vec<String>,
    /// NLU confidence for the matched intent, between 0 and 1.
    pub nlu_confidence: Option<f64>,
    /// Conversation state to carry into the next turn.
    pub state: ConversationState,
}

// Traits.

/// Generic bot client trait that clients must implement.
///
/// Implementations send exactly one turn and report failures as
/// `DiagnosisError::BotInvocation`, flagging network faults and throttling as
/// transient.
#[async_trait]
pub trait GenericBotClient: Send + Sync + 'static {
    /// Send one text turn on the given session, with the session attributes to apply.
    async fn recognize_text(&self, session: &BotSession, text: &str, attributes: &HashMap<String, String>) -> Result<BotReply, DiagnosisError>;
}

// Structs.

/// Bot client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct BotClient {
    inner: Arc<dyn GenericBotClient>,
    config: Config,
    policy: RetryPolicy,
}

impl Deref for BotClient {
    type Target = dyn GenericBotClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl BotClient {
    pub fn new(inner: Arc<dyn GenericBotClient>, config: &Config) -> Self {
        Self {
            inner,
            config: config.clone(),
            policy: RetryPolicy::bot(config),
        }
    }

    /// Allocate a new session on the configured bot alias.
    ///
    /// The bot service creates its side of the session on the first turn.
    #[instrument(name = "BotClient::open_session", skip_all, fields(object = %object))]
    pub fn open_session(&self, object: &StoredObjectRef) -> BotSession {
        let session = BotSession {
            bot_id: self.config.lex_bot_id.clone(),
            bot_alias_id: self.config.lex_bot_alias_id.clone(),
            session_id: format!("diag-{}", uuid::Uuid::new_v4()),
            state: ConversationState::default(),
        };

        info!("Opened bot session `{}`.", session.session_id);

        session
    }

    /// Classify a stored image over the given session.
    ///
    /// Answers the bot's request for the image name, up to the configured turn
    /// budget. An unrecognized intent, or running out of turns, yields a
    /// low-confidence result instead of an error.
    #[instrument(name = "BotClient::classify", skip_all, fields(session_id = %session.session_id, object = %object))]
    pub async fn classify(&self, object: &StoredObjectRef, submission: &ImageSubmission, session: &mut BotSession) -> Result<DiagnosisResult, DiagnosisError> {
        let location = submission.location.clone().unwrap_or_else(|| self.config.default_location.clone());

        let attributes = HashMap::from([
            ("imageKey".to_string(), object.key.clone()),
            ("imageBucket".to_string(), object.bucket.clone()),
            ("submissionId".to_string(), submission.id.clone()),
            ("currentLocation".to_string(), location),
        ]);

        let mut text = get_diagnosis_utterance(&self.config, object);
        let mut turn = 1;

        loop {
            let reply = self.turn(session, &text, &attributes, self.policy).await?;

            if reply.intent_status == Some(IntentStatus::Failed) {
                return Err(DiagnosisError::bot(
                    format!("Bot reported intent `{}` as failed: {}", reply.intent.as_deref().unwrap_or("<none>"), reply.messages.join(" ")),
                    false,
                ));
            }

            let wants_image = matches!(&reply.dialog_action, Some(DialogAction::ElicitSlot(slot)) if is_image_slot(slot));

            if wants_image && turn < self.config.bot_max_turns {
                info!("Bot asked for the image name (turn {turn}).");

                text = object.base_name().to_string();
                turn += 1;
                continue;
            }

            if wants_image {
                warn!("Bot still wants the image name after {turn} turns; giving up.");
            }

            let result = self.translate(&reply, object, submission, session);

            info!("Classified {object} as {:?} ({:?}).", result.labels, result.status);

            return Ok(result);
        }
    }

    /// Send a free-text follow-up on an existing session.
    ///
    /// Returns the bot's plain-text messages. Follow-ups change the
    /// conversation, so they are attempted once.
    #[instrument(name = "BotClient::converse", skip(self, session, attributes), fields(session_id = %session.session_id))]
    pub async fn converse(&self, session: &mut BotSession, text: &str, attributes: &HashMap<String, String>) -> Result<Vec<String>, DiagnosisError> {
        let reply = self.turn(session, text, attributes, self.policy.once()).await?;

        if reply.messages.is_empty() {
            return Ok(vec![EMPTY_REPLY_FALLBACK.to_string()]);
        }

        Ok(reply.messages)
    }

    /// One turn: merge the session's attributes, call the bot, adopt the returned state.
    async fn turn(&self, session: &mut BotSession, text: &str, attributes: &HashMap<String, String>, policy: RetryPolicy) -> Result<BotReply, DiagnosisError> {
        let mut merged = session.state.attributes.clone();
        merged.extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));

        let current: &BotSession = session;
        let merged = &merged;

        let reply = call_with_retry("Bot turn", policy, bot_timeout, || self.recognize_text(current, text, merged)).await?;

        session.state = reply.state.clone();

        Ok(reply)
    }

    /// Turn a final bot reply into a diagnosis.
    fn translate(&self, reply: &BotReply, object: &StoredObjectRef, submission: &ImageSubmission, session: &BotSession) -> DiagnosisResult {
        let intents = self.config.diagnosis_intents();
        let recognized = reply.intent.as_deref().is_some_and(|intent| intents.contains(&intent));

        if !recognized {
            warn!("Unrecognized intent `{}`; marking result low-confidence.", reply.intent.as_deref().unwrap_or("<none>"));
        }

        let fulfilled = matches!(reply.intent_status, Some(IntentStatus::Fulfilled | IntentStatus::ReadyForFulfillment)) || reply.dialog_action == Some(DialogAction::Close);

        let mut labels: Vec<String> = DIAGNOSIS_SLOTS
            .iter()
            .filter_map(|slot| reply.slots.iter().find(|(name, _)| name.eq_ignore_ascii_case(slot)))
            .map(|(_, value)| value.clone())
            .collect();

        let parsed = reply.messages.iter().flat_map(|m| m.lines()).find_map(parse_diagnosis_line);
        let mut confidence = reply.nlu_confidence;

        if let Some((label, parsed_confidence)) = parsed {
            if labels.is_empty() {
                labels.push(label);
            }
            confidence = parsed_confidence.or(confidence);
        }

        let remediation = if reply.messages.is_empty() { NO_REMEDIATION.to_string() } else { reply.messages.join("\n\n") };

        let status = if recognized && fulfilled && !labels.is_empty() {
            DiagnosisStatus::Diagnosed
        } else {
            DiagnosisStatus::LowConfidence
        };

        DiagnosisResult {
            submission_id: submission.id.clone(),
            object: object.clone(),
            session_id: Some(session.session_id.clone()),
            intent: reply.intent.clone(),
            labels,
            confidence,
            remediation,
            status,
        }
    }
}

/// Error for a bot attempt that outlived its timeout.
fn bot_timeout(timeout: Duration) -> DiagnosisError {
    DiagnosisError::bot(format!("Bot did not respond within {timeout:?}."), true)
}

/// Whether the bot is asking for the image name (`image_name`, `ImageName`, ...).
fn is_image_slot(slot: &str) -> bool {
    slot.replace('_', "").eq_ignore_ascii_case("imagename")
}

/// Parse a fulfillment line like `Diagnosis: Late blight (Confidence: 87.5%)`.
///
/// Returns the label and the confidence as a fraction.
pub fn parse_diagnosis_line(line: &str) -> Option<(String, Option<f64>)> {
    let rest = line.trim().strip_prefix("Diagnosis:")?.trim();

    let (label, tail) = match rest.split_once('(') {
        Some((label, tail)) => (label.trim(), Some(tail)),
        None => (rest.split(" - ").next().unwrap_or(rest).trim(), None),
    };

    if label.is_empty() {
        return None;
    }

    let confidence = tail
        .and_then(|t| t.split_once(':'))
        .and_then(|(_, value)| value.split('%').next())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .map(|pct| pct / 100.0);

    Some((label.to_string(), confidence))
}

#[cfg(test)]
mod tests {
    use mockall::mock;

    use super::*;
    use crate::base::{config::ConfigInner, error::ErrorKind};

    mock! {
        pub Bot {}

        #[async_trait]
        impl GenericBotClient for Bot {
            async fn recognize_text(&self, session: &BotSession, text: &str, attributes: &HashMap<String, String>) -> Result<BotReply, DiagnosisError>;
        }
    }

    fn create_test_config() -> Config {
        Config {
            inner: Arc::new(ConfigInner {
                aws_region: "eu-north-1".to_string(),
                s3_bucket_name: "potato-health-test".to_string(),
                lex_bot_id: "BOTID12345".to_string(),
                lex_bot_alias_id: "TSTALIASID".to_string(),
                bot_timeout_secs: 1,
                retry_base_delay_ms: 1,
                ..Default::default()
            }),
        }
    }

    fn object() -> StoredObjectRef {
        StoredObjectRef {
            bucket: "potato-health-test".to_string(),
            key: "uploads/k1-leaf.jpg".to_string(),
            region: "eu-north-1".to_string(),
        }
    }

    fn fulfilled(label: &str) -> BotReply {
        BotReply {
            intent: Some("AnalyzeImage".to_string()),
            intent_status: Some(IntentStatus::Fulfilled),
            dialog_action: Some(DialogAction::Close),
            slots: HashMap::from([("Diagnosis".to_string(), label.to_string())]),
            messages: vec!["Remove infected leaves and apply fungicide.".to_string()],
            nlu_confidence: Some(0.9),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_classify_fulfilled_intent_is_diagnosed() {
        let config = create_test_config();
        let mut mock = MockBot::new();
        mock.expect_recognize_text()
            .withf(|_, text, attributes| text.contains("k1-leaf.jpg") && attributes.get("currentLocation").map(String::as_str) == Some("uppsala"))
            .times(1)
            .returning(|_, _, _| Ok(fulfilled("Late blight")));

        let bot = BotClient::new(Arc::new(mock), &config);
        let submission = ImageSubmission::new(vec![1]);
        let mut session = bot.open_session(&object());

        let result = bot.classify(&object(), &submission, &mut session).await.unwrap();

        assert_eq!(result.status, DiagnosisStatus::Diagnosed);
        assert_eq!(result.labels, vec!["Late blight".to_string()]);
        assert_eq!(result.confidence, Some(0.9));
        assert_eq!(result.session_id.as_deref(), Some(session.session_id.as_str()));
        assert_eq!(session.bot_id, "BOTID12345");
        assert!(session.session_id.starts_with("diag-"));
    }

    #[tokio::test]
    async fn test_classify_answers_image_slot_elicitation() {
        let config = create_test_config();
        let mut mock = MockBot::new();
        let mut seq = mockall::Sequence::new();

        mock.expect_recognize_text().times(1).in_sequence(&mut seq).returning(|_, _, _| {
            Ok(BotReply {
                intent: Some("AnalyzeImage".to_string()),
                intent_status: Some(IntentStatus::InProgress),
                dialog_action: Some(DialogAction::ElicitSlot("image_name".to_string())),
                messages: vec!["Please provide the filename of the uploaded image for analysis.".to_string()],
                ..Default::default()
            })
        });
        mock.expect_recognize_text()
            .withf(|_, text, _| text.to_string() == "k1-leaf.jpg")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| {
                Ok(BotReply {
                    intent: Some("AnalyzeImage".to_string()),
                    intent_status: Some(IntentStatus::Fulfilled),
                    dialog_action: Some(DialogAction::Close),
                    messages: vec!["Okay, analyzing image 'k1-leaf.jpg'.\nDiagnosis: Healthy (Confidence: 95.0%)".to_string()],
                    ..Default::default()
                })
            });

        let bot = BotClient::new(Arc::new(mock), &config);
        let mut session = bot.open_session(&object());

        let result = bot.classify(&object(), &ImageSubmission::new(vec![1]), &mut session).await.unwrap();

        assert_eq!(result.status, DiagnosisStatus::Diagnosed);
        assert_eq!(result.labels, vec!["Healthy".to_string()]);
        assert!((result.confidence.unwrap() - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_classify_unknown_intent_is_low_confidence() {
        let config = create_test_config();
        let mut mock = MockBot::new();
        mock.expect_recognize_text().returning(|_, _, _| {
            Ok(BotReply {
                intent: Some("FallbackIntent".to_string()),
                intent_status: Some(IntentStatus::Fulfilled),
                dialog_action: Some(DialogAction::Close),
                messages: vec![],
                ..Default::default()
            })
        });

        let bot = BotClient::new(Arc::new(mock), &config);
        let mut session = bot.open_session(&object());

        let result = bot.classify(&object(), &ImageSubmission::new(vec![1]), &mut session).await.unwrap();

        assert!(result.is_low_confidence());
        assert_eq!(result.intent.as_deref(), Some("FallbackIntent"));
        assert_eq!(result.remediation, NO_REMEDIATION);
    }

    #[tokio::test]
    async fn test_classify_turn_budget_exhaustion_is_low_confidence() {
        let config = create_test_config();
        let mut mock = MockBot::new();
        mock.expect_recognize_text().times(3).returning(|_, _, _| {
            Ok(BotReply {
                intent: Some("AnalyzeImage".to_string()),
                intent_status: Some(IntentStatus::InProgress),
                dialog_action: Some(DialogAction::ElicitSlot("ImageName".to_string())),
                ..Default::default()
            })
        });

        let bot = BotClient::new(Arc::new(mock), &config);
        let mut session = bot.open_session(&object());

        let result = bot.classify(&object(), &ImageSubmission::new(vec![1]), &mut session).await.unwrap();

        assert!(result.is_low_confidence());
    }

    #[tokio::test]
    async fn test_classify_failed_intent_is_an_error() {
        let config = create_test_config();
        let mut mock = MockBot::new();
        mock.expect_recognize_text().times(1).returning(|_, _, _| {
            Ok(BotReply {
                intent: Some("AnalyzeImage".to_string()),
                intent_status: Some(IntentStatus::Failed),
                ..Default::default()
            })
        });

        let bot = BotClient::new(Arc::new(mock), &config);
        let mut session = bot.open_session(&object());

        let err = bot.classify(&object(), &ImageSubmission::new(vec![1]), &mut session).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BotInvocation);
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_classify_retries_transient_failures() {
        let config = create_test_config();
        let mut mock = MockBot::new();
        let mut seq = mockall::Sequence::new();

        mock.expect_recognize_text()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(DiagnosisError::bot("throttled", true)));
        mock.expect_recognize_text().times(1).in_sequence(&mut seq).returning(|_, _, _| Ok(fulfilled("Early blight")));

        let bot = BotClient::new(Arc::new(mock), &config);
        let mut session = bot.open_session(&object());

        let result = bot.classify(&object(), &ImageSubmission::new(vec![1]), &mut session).await.unwrap();

        assert_eq!(result.labels, vec!["Early blight".to_string()]);
    }

    #[tokio::test]
    async fn test_converse_carries_state_and_falls_back_on_empty_reply() {
        let config = create_test_config();
        let mut mock = MockBot::new();
        let mut seq = mockall::Sequence::new();

        mock.expect_recognize_text().times(1).in_sequence(&mut seq).returning(|_, _, _| {
            Ok(BotReply {
                messages: vec!["Weather indicates high risk.".to_string()],
                state: ConversationState {
                    attributes: HashMap::from([("riskLevel".to_string(), "high".to_string())]),
                    active_intent: Some("CheckRisk".to_string()),
                },
                ..Default::default()
            })
        });
        mock.expect_recognize_text()
            .withf(|_, _, attributes| attributes.get("riskLevel").map(String::as_str) == Some("high") && attributes.contains_key("currentLocation"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(BotReply::default()));

        let bot = BotClient::new(Arc::new(mock), &config);
        let mut session = bot.open_session(&object());
        let attributes = HashMap::from([("currentLocation".to_string(), "lund".to_string())]);

        let first = bot.converse(&mut session, "Is there a blight risk?", &attributes).await.unwrap();
        assert_eq!(first, vec!["Weather indicates high risk.".to_string()]);

        let second = bot.converse(&mut session, "What should I do?", &attributes).await.unwrap();
        assert_eq!(second, vec![EMPTY_REPLY_FALLBACK.to_string()]);
    }

    #[test]
    fn test_parse_diagnosis_line() {
        assert_eq!(parse_diagnosis_line("Diagnosis: Healthy (Confidence: 95.0%) - This is a stub result."), Some(("Healthy".to_string(), Some(0.95))));
        assert_eq!(parse_diagnosis_line("Diagnosis: Late blight"), Some(("Late blight".to_string(), None)));
        assert_eq!(parse_diagnosis_line("Diagnosis: (Confidence: 10%)"), None);
        assert_eq!(parse_diagnosis_line("Weather indicates high risk."), None);
    }

    #[test]
    fn test_is_image_slot() {
        assert!(is_image_slot("image_name"));
        assert!(is_image_slot("ImageName"));
        assert!(!is_image_slot("location"));
    }
}
