//! Company configuration and modality resolution
//!
//! The company document is loosely shaped (it comes straight out of the
//! widget's document store). Only the fields the chat needs are typed;
//! everything else is ignored. Modalities are resolved the same way the
//! backend does it:
//!
//! 1. a `modality` display map and a `bots` map: every display key that also
//!    has a bot, in document order
//! 2. only `bots`: one modality per bot, labelled by its key
//! 3. neither: a single `default` modality labelled "Chat"

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Localized strings keyed by language code.
pub type LangMap<T> = BTreeMap<String, T>;

/// A label that is either one string or a per-language map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Localized {
    Plain(String),
    ByLang(LangMap<String>),
}

impl Localized {
    /// `lang`, then English, then `fallback`.
    pub fn resolve(&self, lang: &str, fallback: &str) -> String {
        match self {
            Self::Plain(s) => s.clone(),
            Self::ByLang(map) => map
                .get(lang)
                .or_else(|| map.get("en"))
                .cloned()
                .unwrap_or_else(|| fallback.to_string()),
        }
    }
}

/// Display settings for a modality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalityConfig {
    #[serde(default)]
    pub label: Option<Localized>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub chain_of_thought_active: bool,
}

/// Runtime settings of the bot behind a modality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    #[serde(default, rename = "bot_welcome_message")]
    pub bot_welcome_message: LangMap<Vec<String>>,
    #[serde(default)]
    pub voice_input_languages: Vec<String>,
    #[serde(default)]
    pub product_images: bool,
    #[serde(default)]
    pub defined_tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyCss {
    #[serde(default)]
    pub bot_name: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportConfig {
    #[serde(default, rename = "welcome_message")]
    pub welcome_message: Option<LangMap<Vec<String>>>,
    #[serde(default)]
    pub collect_feedback: Option<bool>,
    #[serde(default)]
    pub privacy_policy_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub css: CompanyCss,
    /// Modality key → display config, in document order.
    #[serde(default)]
    pub modality: Option<Map<String, Value>>,
    /// Modality key → bot config, in document order.
    #[serde(default)]
    pub bots: Option<Map<String, Value>>,
    #[serde(default, rename = "bot_welcome_message")]
    pub bot_welcome_message: Option<LangMap<Vec<String>>>,
    #[serde(default, rename = "bot_intro_message")]
    pub bot_intro_message: Option<LangMap<Vec<String>>>,
    #[serde(default)]
    pub support: Option<SupportConfig>,
    #[serde(default)]
    pub collect_feedback: Option<bool>,
    #[serde(default)]
    pub required_support_button: Option<bool>,
    #[serde(default)]
    pub voice_input_enabled: bool,
    #[serde(default)]
    pub voice_input_languages: Vec<String>,
    #[serde(default, rename = "default_language")]
    pub default_language: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
}

impl Company {
    pub fn bot_name(&self) -> &str {
        self.css.bot_name.as_deref().unwrap_or("Bot")
    }
}

/// A modality ready to be offered to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedModality {
    pub key: String,
    pub display_label: String,
    pub description: Option<String>,
    pub chain_of_thought_active: bool,
    pub bot_welcome_message: LangMap<Vec<String>>,
    pub voice_input_languages: Vec<String>,
    pub product_images: bool,
    pub defined_tags: Vec<String>,
}

impl ResolvedModality {
    fn from_parts(key: &str, bot: BotConfig, display: &ModalityConfig, lang: &str) -> Self {
        Self {
            key: key.to_string(),
            display_label: display
                .label
                .as_ref()
                .map(|label| label.resolve(lang, key))
                .unwrap_or_else(|| key.to_string()),
            description: display.description.clone(),
            chain_of_thought_active: display.chain_of_thought_active,
            bot_welcome_message: bot.bot_welcome_message,
            voice_input_languages: bot.voice_input_languages,
            product_images: bot.product_images,
            defined_tags: bot.defined_tags,
        }
    }
}

/// Parse a bot entry. Entries that are not objects count as missing.
fn bot_entry(value: &Value) -> Option<BotConfig> {
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}

fn modality_entry(value: &Value) -> ModalityConfig {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

fn non_empty(map: &Option<Map<String, Value>>) -> Option<&Map<String, Value>> {
    map.as_ref().filter(|m| !m.is_empty())
}

pub fn resolve_modalities(company: &Company, lang: &str) -> Vec<ResolvedModality> {
    if let (Some(modality), Some(bots)) = (non_empty(&company.modality), non_empty(&company.bots)) {
        return modality
            .iter()
            .filter_map(|(key, display)| {
                let bot = bots.get(key).and_then(bot_entry)?;
                Some(ResolvedModality::from_parts(
                    key,
                    bot,
                    &modality_entry(display),
                    lang,
                ))
            })
            .collect();
    }

    if let Some(bots) = non_empty(&company.bots) {
        return bots
            .iter()
            .filter_map(|(key, value)| {
                let bot = bot_entry(value)?;
                let display = ModalityConfig {
                    label: Some(Localized::Plain(key.clone())),
                    ..Default::default()
                };
                Some(ResolvedModality::from_parts(key, bot, &display, lang))
            })
            .collect();
    }

    let flat = BotConfig {
        bot_welcome_message: company.bot_welcome_message.clone().unwrap_or_default(),
        voice_input_languages: company.voice_input_languages.clone(),
        product_images: false,
        defined_tags: Vec::new(),
    };
    let display = ModalityConfig {
        label: Some(Localized::Plain("Chat".to_string())),
        ..Default::default()
    };
    vec![ResolvedModality::from_parts("default", flat, &display, lang)]
}

fn pick_lang<'a>(map: &'a LangMap<Vec<String>>, lang: &str) -> &'a [String] {
    map.get(lang)
        .or_else(|| map.get("en"))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Greeting lines for a modality.
pub fn welcome_messages<'a>(modality: &'a ResolvedModality, lang: &str) -> &'a [String] {
    pick_lang(&modality.bot_welcome_message, lang)
}

/// Lines shown above the modality picker.
pub fn intro_messages<'a>(company: &'a Company, lang: &str) -> &'a [String] {
    company
        .bot_intro_message
        .as_ref()
        .map(|intro| pick_lang(intro, lang))
        .unwrap_or(&[])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SupportFlags {
    pub collect_feedback: bool,
    pub required_support_button: bool,
}

pub fn support_flags(company: &Company) -> SupportFlags {
    SupportFlags {
        collect_feedback: company
            .collect_feedback
            .or_else(|| company.support.as_ref().and_then(|s| s.collect_feedback))
            .unwrap_or(false),
        required_support_button: company.required_support_button.unwrap_or(false),
    }
}

/// Find a modality by key, ignoring ASCII case.
pub fn find_modality<'a>(modalities: &'a [ResolvedModality], key: &str) -> Option<&'a ResolvedModality> {
    modalities
        .iter()
        .find(|m| m.key.eq_ignore_ascii_case(key))
}
