//! Locale detection used as the last fallback before `en-US`.

use super::FALLBACK_LOCALE;

pub trait LocaleDetector: Send + Sync {
    fn detect_locale(&self) -> String;
}

/// Always reports the same locale.
#[derive(Debug, Clone)]
pub struct FixedLocale(pub String);

impl LocaleDetector for FixedLocale {
    fn detect_locale(&self) -> String {
        self.0.clone()
    }
}

/// Reads the POSIX locale environment: `LC_ALL`, then `LC_MESSAGES`, then `LANG`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLocaleDetector;

impl SystemLocaleDetector {
    /// User-preferred locales in order: the `LANGUAGE` list, then the detected locale.
    pub fn preferred_locales(&self) -> Vec<String> {
        preferred_from(|var| std::env::var(var).ok())
    }
}

impl LocaleDetector for SystemLocaleDetector {
    fn detect_locale(&self) -> String {
        detect_from(|var| std::env::var(var).ok())
    }
}

fn detect_from(lookup: impl Fn(&str) -> Option<String>) -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .into_iter()
        .filter_map(|var| lookup(var))
        .find_map(|raw| to_language_tag(&raw))
        .unwrap_or_else(|| FALLBACK_LOCALE.to_string())
}

fn preferred_from(lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    let mut locales: Vec<String> = lookup("LANGUAGE")
        .map(|list| list.split(':').filter_map(to_language_tag).collect())
        .unwrap_or_default();
    let detected = detect_from(lookup);
    if !locales.contains(&detected) {
        locales.push(detected);
    }
    locales
}

/// `de_DE.UTF-8@euro` → `de-DE`. `C` and `POSIX` carry no language.
fn to_language_tag(raw: &str) -> Option<String> {
    let base = raw.split(['.', '@']).next().unwrap_or("").trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }
    Some(base.replace('_', "-"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn strips_encoding_and_modifier() {
        assert_eq!(to_language_tag("de_DE.UTF-8").as_deref(), Some("de-DE"));
        assert_eq!(to_language_tag("ca_ES@valencia").as_deref(), Some("ca-ES"));
        assert_eq!(to_language_tag("ja").as_deref(), Some("ja"));
        assert_eq!(to_language_tag("C.UTF-8"), None);
        assert_eq!(to_language_tag("POSIX"), None);
    }

    #[test]
    fn lc_all_wins_over_lang() {
        let lookup = env(&[("LC_ALL", "pt_BR.UTF-8"), ("LANG", "en_GB.UTF-8")]);
        assert_eq!(detect_from(lookup), "pt-BR");
    }

    #[test]
    fn posix_locale_falls_through() {
        let lookup = env(&[("LC_ALL", "C"), ("LANG", "fr_FR.UTF-8")]);
        assert_eq!(detect_from(lookup), "fr-FR");
    }

    #[test]
    fn nothing_set_falls_back_to_en_us() {
        assert_eq!(detect_from(env(&[])), "en-US");
    }

    #[test]
    fn preferred_locales_lists_language_then_detected() {
        let lookup = env(&[("LANGUAGE", "sv_SE:nb_NO"), ("LANG", "en_US.UTF-8")]);
        assert_eq!(preferred_from(lookup), vec!["sv-SE", "nb-NO", "en-US"]);
    }

    #[test]
    fn fixed_locale_reports_itself() {
        assert_eq!(FixedLocale("ko-KR".into()).detect_locale(), "ko-KR");
    }
}
