//! # Localization Module
//!
//! Fluent bundles for every supported language, embedded at compile time.
//! Lookups take the sender's Telegram language code; unknown languages and
//! missing keys fall back to the default language.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource, FluentValue};
use tracing::warn;
use unic_langid::LanguageIdentifier;

use crate::config::DEFAULT_LANGUAGE;

const RESOURCES: &[(&str, &str)] = &[
    ("en", include_str!("../locales/en/main.ftl")),
    ("ru", include_str!("../locales/ru/main.ftl")),
];

/// Localization manager for the bot
pub struct LocalizationManager {
    bundles: HashMap<String, FluentBundle<FluentResource>>,
    default_language: String,
}

impl LocalizationManager {
    /// Create a manager with all embedded languages
    pub fn new(default_language: &str) -> Result<Self> {
        let mut bundles = HashMap::new();

        for (lang, source) in RESOURCES {
            bundles.insert(lang.to_string(), Self::create_bundle(lang, source)?);
        }

        let default_language = if bundles.contains_key(default_language) {
            default_language.to_string()
        } else {
            warn!(language = %default_language, "Unsupported default language, using English");
            DEFAULT_LANGUAGE.to_string()
        };

        Ok(Self {
            bundles,
            default_language,
        })
    }

    fn create_bundle(lang: &str, source: &str) -> Result<FluentBundle<FluentResource>> {
        let locale: LanguageIdentifier = lang
            .parse()
            .with_context(|| format!("Invalid language identifier: {lang}"))?;
        let mut bundle = FluentBundle::new_concurrent(vec![locale]);
        // Telegram renders the bidi isolation marks literally
        bundle.set_use_isolating(false);

        let resource = FluentResource::try_new(source.to_string())
            .map_err(|(_, errors)| anyhow!("Invalid {lang} resource: {errors:?}"))?;
        bundle
            .add_resource(resource)
            .map_err(|errors| anyhow!("Duplicate {lang} messages: {errors:?}"))?;

        Ok(bundle)
    }

    /// Bundle language for a Telegram language code such as `ru-RU`
    fn resolve_language(&self, language_code: Option<&str>) -> &str {
        language_code
            .and_then(|code| code.split(|c: char| c == '-' || c == '_').next())
            .map(str::to_ascii_lowercase)
            .and_then(|primary| self.bundles.get_key_value(&primary).map(|(k, _)| k.as_str()))
            .unwrap_or(self.default_language.as_str())
    }

    fn format(&self, lang: &str, key: &str, args: Option<&FluentArgs>) -> Option<String> {
        let bundle = self.bundles.get(lang)?;
        let pattern = bundle.get_message(key)?.value()?;
        let mut errors = vec![];
        let value = bundle.format_pattern(pattern, args, &mut errors);
        if !errors.is_empty() {
            warn!(key = %key, language = %lang, errors = ?errors, "Fluent formatting errors");
        }
        Some(value.into_owned())
    }

    /// Get a localized message
    pub fn get_message(
        &self,
        key: &str,
        args: Option<&FluentArgs>,
        language_code: Option<&str>,
    ) -> String {
        let lang = self.resolve_language(language_code);

        self.format(lang, key, args)
            .or_else(|| self.format(&self.default_language, key, args))
            .unwrap_or_else(|| {
                warn!(key = %key, "Missing translation");
                format!("Missing translation: {key}")
            })
    }

    /// Whether `text` equals the message `key` in any language
    pub fn matches_any_language(&self, key: &str, text: &str) -> bool {
        self.bundles
            .keys()
            .filter_map(|lang| self.format(lang, key, None))
            .any(|label| label == text)
    }

    pub fn has_message(&self, key: &str, language: &str) -> bool {
        self.bundles
            .get(language)
            .is_some_and(|bundle| bundle.has_message(key))
    }
}

static LOCALIZATION_MANAGER: OnceLock<LocalizationManager> = OnceLock::new();

/// Initialize the global localization manager
///
/// Later calls keep the first manager.
pub fn init_localization(default_language: &str) -> Result<()> {
    let manager = LocalizationManager::new(default_language)?;
    let _ = LOCALIZATION_MANAGER.set(manager);
    Ok(())
}

/// Get the global localization manager, initializing it with defaults if needed
pub fn get_localization_manager() -> &'static LocalizationManager {
    LOCALIZATION_MANAGER.get_or_init(|| {
        LocalizationManager::new(DEFAULT_LANGUAGE).unwrap_or_else(|e| {
            warn!(error = %e, "Localization resources failed to load");
            LocalizationManager {
                bundles: HashMap::new(),
                default_language: DEFAULT_LANGUAGE.to_string(),
            }
        })
    })
}

/// Localized message in the sender's language
pub fn t_lang(key: &str, language_code: Option<&str>) -> String {
    get_localization_manager().get_message(key, None, language_code)
}

/// Localized message with string arguments in the sender's language
pub fn t_args_lang(key: &str, args: &[(&str, &str)], language_code: Option<&str>) -> String {
    let mut fluent_args = FluentArgs::new();
    for (name, value) in args {
        fluent_args.set(*name, FluentValue::from(value.to_string()));
    }
    get_localization_manager().get_message(key, Some(&fluent_args), language_code)
}

/// Whether `text` is the label `key` in any supported language
pub fn is_label(key: &str, text: &str) -> bool {
    get_localization_manager().matches_any_language(key, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_fallback() {
        let manager = LocalizationManager::new("en").unwrap();
        assert_eq!(manager.resolve_language(Some("ru-RU")), "ru");
        assert_eq!(manager.resolve_language(Some("de")), "en");
        assert_eq!(manager.resolve_language(None), "en");
    }

    #[test]
    fn test_unknown_default_language_uses_english() {
        let manager = LocalizationManager::new("fr").unwrap();
        assert_eq!(manager.resolve_language(None), "en");
    }

    #[test]
    fn test_every_english_key_exists_in_russian() {
        let manager = LocalizationManager::new("en").unwrap();
        let english = RESOURCES[0].1;
        for line in english.lines() {
            let Some((key, _)) = line.split_once(" =") else {
                continue;
            };
            if key.starts_with(' ') || key.starts_with('#') || key.is_empty() {
                continue;
            }
            assert!(manager.has_message(key, "ru"), "missing ru key: {key}");
        }
    }
}
