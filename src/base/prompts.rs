//! Utterance templates sent to the bot.

use crate::base::{config::Config, types::StoredObjectRef};

/// First-turn utterance for a diagnosis.
///
/// `{image}` is replaced with the base name of the stored object, which is the
/// value the bot's image-name slot expects.
pub const DIAGNOSIS_UTTERANCE: &str = "Please analyze the uploaded image {image} for potato plant health.";

/// Shown when the bot answers a free-text turn without any plain-text message.
pub const EMPTY_REPLY_FALLBACK: &str = "Sorry, I didn't get a response. Try again.";

/// Remediation text used when the bot never gave one.
pub const NO_REMEDIATION: &str = "No remediation advice was returned for this image.";

/// Render the configured diagnosis utterance for a stored object.
pub fn get_diagnosis_utterance(config: &Config, object: &StoredObjectRef) -> String {
    config.diagnosis_utterance.replace("{image}", object.base_name())
}
