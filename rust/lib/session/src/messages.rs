//! User-facing copy for session errors and banners.
//!
//! Provider error text is never shown verbatim when a rule matches it.
//! Rules match by substring, the way provider messages are stable enough
//! to match on but not structured enough to switch on.

use crate::error::{NO_USER_LOGGED_IN, SessionError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Locale {
    #[default]
    Es,
    En,
}

impl Locale {
    /// Parse a locale tag; `en`, `en-US` etc. map to English, anything
    /// else to Spanish.
    pub fn parse(tag: &str) -> Locale {
        let lang = tag.split(['-', '_']).next().unwrap_or_default();
        if lang.eq_ignore_ascii_case("en") {
            Locale::En
        } else {
            Locale::Es
        }
    }
}

struct Rule {
    needles: &'static [&'static str],
    es: &'static str,
    en: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        needles: &["Invalid login credentials", "Email not confirmed"],
        es: "Correo o contraseña incorrectos",
        en: "Incorrect email or password",
    },
    Rule {
        needles: &["User already registered"],
        es: "Este correo electronico ya esta registrado",
        en: "This email address is already registered",
    },
    Rule {
        needles: &["Invalid email"],
        es: "El correo electronico no es valido",
        en: "The email address is not valid",
    },
    Rule {
        needles: &["Password should be at least"],
        es: "La contraseña debe tener al menos 6 caracteres",
        en: "The password must be at least 6 characters long",
    },
    Rule {
        needles: &["Password is too long"],
        es: "La contraseña es demasiado larga",
        en: "The password is too long",
    },
    Rule {
        needles: &["Unable to validate email address", "Email address invalid"],
        es: "No se puede validar el correo electronico",
        en: "The email address could not be validated",
    },
    Rule {
        needles: &["Failed to send confirmation email"],
        es: "No pudimos enviar el correo de confirmacion. Intenta de nuevo",
        en: "We could not send the confirmation email. Please try again",
    },
    Rule {
        needles: &["Signup disabled"],
        es: "El registro esta deshabilitado actualmente",
        en: "Sign-up is currently disabled",
    },
    Rule {
        needles: &["No user found"],
        es: "Usuario no encontrado",
        en: "User not found",
    },
    Rule {
        needles: &[NO_USER_LOGGED_IN],
        es: "No hay ningun usuario con sesion iniciada",
        en: "No user is signed in",
    },
    Rule {
        needles: &["Failed to fetch", "NetworkError", "fetch failed"],
        es: "Problema de conexion. Verifica tu internet e intenta de nuevo",
        en: "Connection problem. Check your internet and try again",
    },
    Rule {
        needles: &["500", "Internal Server"],
        es: "Error del servidor. Intenta de nuevo mas tarde",
        en: "Server error. Please try again later",
    },
];

/// Localized copy lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct Messages {
    locale: Locale,
}

impl Messages {
    pub fn new(locale: Locale) -> Self {
        Self { locale }
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    fn pick(&self, es: &'static str, en: &'static str) -> &'static str {
        match self.locale {
            Locale::Es => es,
            Locale::En => en,
        }
    }

    /// Copy for a raw provider message.
    ///
    /// Unknown text is returned as-is; empty text becomes a generic line.
    pub fn translate(&self, raw: &str) -> String {
        if let Some(rule) = RULES
            .iter()
            .find(|r| r.needles.iter().any(|n| raw.contains(n)))
        {
            return self.pick(rule.es, rule.en).to_string();
        }
        if raw.trim().is_empty() {
            return self.unexpected().to_string();
        }
        raw.to_string()
    }

    /// Copy for any session error.
    pub fn describe(&self, err: &SessionError) -> String {
        match err {
            SessionError::Auth(raw) | SessionError::ProfileSync(raw) => self.translate(raw),
            SessionError::SessionExpired => self.session_expired().to_string(),
            SessionError::Timeout { .. } => self
                .pick(
                    "La solicitud tardo demasiado. Intenta de nuevo",
                    "The request took too long. Please try again",
                )
                .to_string(),
            SessionError::Network(_) => self.translate("fetch failed"),
            SessionError::Storage(_) => self.unexpected().to_string(),
        }
    }

    pub fn session_expired(&self) -> &'static str {
        self.pick(
            "Tu sesion ha expirado. Inicia sesion de nuevo",
            "Your session has expired. Please sign in again",
        )
    }

    pub fn profile_updated(&self) -> &'static str {
        self.pick("Perfil actualizado", "Profile updated")
    }

    pub fn unexpected(&self) -> &'static str {
        self.pick(
            "Ocurrio un error inesperado. Intenta de nuevo",
            "An unexpected error occurred. Please try again",
        )
    }
}
