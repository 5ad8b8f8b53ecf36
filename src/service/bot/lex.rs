//! Amazon Lex V2 implementation of the bot client.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_lexruntimev2::{
    Client,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    operation::recognize_text::RecognizeTextOutput,
    types::{DialogActionType, IntentState, MessageContentType, SessionState},
};
use tracing::{debug, instrument};

use crate::base::{
    config::Config,
    error::DiagnosisError,
    types::{BotSession, ConversationState},
};

use super::{BotClient, BotReply, DialogAction, GenericBotClient, IntentStatus};

// Extra methods on `BotClient` applied by the lex implementation.

impl BotClient {
    /// Creates a bot client for the configured Lex V2 bot alias.
    pub fn lex(config: &Config, sdk_config: &SdkConfig) -> Self {
        let client = LexBotClient::new(config, sdk_config);
        Self::new(Arc::new(client), config)
    }
}

// Specific implementations.

/// Lex V2 bot client implementation.
#[derive(Clone)]
pub struct LexBotClient {
    client: Client,
    locale_id: String,
}

impl LexBotClient {
    /// Create a new Lex bot client.
    #[instrument(name = "LexBotClient::new", skip_all)]
    pub fn new(config: &Config, sdk_config: &SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
            locale_id: config.lex_locale_id.clone(),
        }
    }
}

#[async_trait]
impl GenericBotClient for LexBotClient {
    #[instrument(name = "LexBotClient::recognize_text", skip(self, session, attributes), fields(session_id = %session.session_id))]
    async fn recognize_text(&self, session: &BotSession, text: &str, attributes: &HashMap<String, String>) -> Result<BotReply, DiagnosisError> {
        debug!("Sending to Lex with attributes {attributes:?}");

        let state = SessionState::builder().set_session_attributes(Some(attributes.clone())).build();

        let output = self
            .client
            .recognize_text()
            .bot_id(&session.bot_id)
            .bot_alias_id(&session.bot_alias_id)
            .locale_id(&self.locale_id)
            .session_id(&session.session_id)
            .text(text)
            .session_state(state)
            .send()
            .await
            .map_err(|err| bot_error(&err))?;

        Ok(parse_recognize_text_output(&output))
    }
}

/// Reduce a Lex reply to a [`BotReply`].
fn parse_recognize_text_output(output: &RecognizeTextOutput) -> BotReply {
    let messages = output
        .messages()
        .iter()
        .filter(|m| m.content_type() == &MessageContentType::PlainText)
        .filter_map(|m| m.content())
        .map(str::to_string)
        .collect();

    let session_state = output.session_state();
    let intent = session_state.and_then(|s| s.intent());
    let intent_name = intent.map(|i| i.name().to_string());

    let intent_status = intent.and_then(|i| i.state()).and_then(|state| match state {
        IntentState::InProgress => Some(IntentStatus::InProgress),
        IntentState::Waiting => Some(IntentStatus::Waiting),
        IntentState::ReadyForFulfillment => Some(IntentStatus::ReadyForFulfillment),
        IntentState::FulfillmentInProgress => Some(IntentStatus::FulfillmentInProgress),
        IntentState::Fulfilled => Some(IntentStatus::Fulfilled),
        IntentState::Failed => Some(IntentStatus::Failed),
        _ => None,
    });

    let dialog_action = session_state.and_then(|s| s.dialog_action()).and_then(|action| match action.r#type() {
        DialogActionType::Close => Some(DialogAction::Close),
        DialogActionType::Delegate => Some(DialogAction::Delegate),
        DialogActionType::ConfirmIntent => Some(DialogAction::ConfirmIntent),
        DialogActionType::ElicitIntent => Some(DialogAction::ElicitIntent),
        DialogActionType::ElicitSlot => Some(DialogAction::ElicitSlot(action.slot_to_elicit().unwrap_or_default().to_string())),
        _ => None,
    });

    let slots = intent
        .and_then(|i| i.slots())
        .map(|slots| {
            slots
                .iter()
                .filter_map(|(name, slot)| slot.value().map(|v| (name.clone(), v.interpreted_value().to_string())))
                .collect()
        })
        .unwrap_or_default();

    let nlu_confidence = output
        .interpretations()
        .iter()
        .find(|i| i.intent().map(|intent| intent.name()) == intent_name.as_deref())
        .and_then(|i| i.nlu_confidence())
        .map(|c| c.score());

    let state = ConversationState::new(session_state.and_then(|s| s.session_attributes()).cloned().unwrap_or_default(), intent_name.clone());

    BotReply {
        intent: intent_name,
        intent_status,
        dialog_action,
        slots,
        messages,
        nlu_confidence,
        state,
    }
}

/// Map an SDK failure to a bot invocation error, flagging the ones worth retrying.
fn bot_error<E, R>(err: &SdkError<E, R>) -> DiagnosisError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let transient = match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => true,
        _ => matches!(
            err.code(),
            Some("ThrottlingException" | "InternalServerException" | "BadGatewayException" | "DependencyFailedException")
        ),
    };

    let message = match err.code() {
        Some("AccessDeniedException") => "Access denied when calling Lex. Check credentials.".to_string(),
        Some("ResourceNotFoundException") => "Lex bot or alias not found. Check configuration.".to_string(),
        _ => format!("Lex recognize_text failed: {}", DisplayErrorContext(err)),
    };

    DiagnosisError::bot(message, transient)
}
