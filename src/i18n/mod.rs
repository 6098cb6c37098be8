//! Internationalization (i18n) support for reelforge
//!
//! User-facing error descriptions are translated through `rust-i18n`.
//! Supported languages: English (en) and Portuguese (pt).
//!
//! # Environment Variables
//!
//! - `REELFORGE_LANG`: Set the preferred language (en, pt). Defaults to English.
//!
//! # Usage
//!
//! ```rust,ignore
//! use reelforge::i18n::{t, set_locale};
//!
//! set_locale("pt-BR");
//! let msg = t!("errors.category.provider");
//! ```

use std::sync::RwLock;

// Note: rust_i18n::i18n! macro is declared in lib.rs (crate root)

static CURRENT_LOCALE: RwLock<String> = RwLock::new(String::new());

/// Set the current locale for translations
pub fn set_locale(locale: &str) {
    let normalized = normalize_locale(locale);
    rust_i18n::set_locale(normalized);
    if let Ok(mut current) = CURRENT_LOCALE.write() {
        *current = normalized.to_string();
    }
}

/// Get the current locale
///
/// Returns the currently active locale or the default fallback.
pub fn current_locale() -> String {
    match CURRENT_LOCALE.read() {
        Ok(current) if !current.is_empty() => current.clone(),
        _ => "en".to_string(),
    }
}

/// Initialize i18n from environment variables
///
/// Reads `REELFORGE_LANG` to set the locale, falling back to English.
pub fn init_from_env() {
    let locale = std::env::var("REELFORGE_LANG").unwrap_or_else(|_| "en".to_string());
    set_locale(&locale);
}

/// Normalize locale code to supported format
///
/// - pt-BR, pt_PT, portuguese -> pt
/// - everything else -> en
fn normalize_locale(locale: &str) -> &'static str {
    let lower = locale.to_lowercase();

    if lower.starts_with("pt") || lower == "portuguese" {
        "pt"
    } else {
        "en"
    }
}

/// Translate a key with optional parameters
///
/// This is a re-export of rust_i18n::t! for convenience.
#[doc(inline)]
pub use rust_i18n::t;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_locale() {
        assert_eq!(normalize_locale("pt"), "pt");
        assert_eq!(normalize_locale("pt-BR"), "pt");
        assert_eq!(normalize_locale("pt_PT"), "pt");
        assert_eq!(normalize_locale("portuguese"), "pt");

        assert_eq!(normalize_locale("en"), "en");
        assert_eq!(normalize_locale("en-US"), "en");
        assert_eq!(normalize_locale("klingon"), "en");
    }

    #[test]
    #[serial_test::serial(locale)]
    fn test_set_and_get_locale() {
        set_locale("pt-BR");
        assert_eq!(current_locale(), "pt");

        set_locale("en-US");
        assert_eq!(current_locale(), "en");
    }
}
