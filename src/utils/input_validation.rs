use derive_more::derive::Display;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::ValidateEmail;
use zxcvbn::{zxcvbn, Score};

// Regex for username
static USERNAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]{2,19}$").expect("Failed to compile username regex")
});

// DNI argentin: 7 ou 8 chiffres, points de milliers tolérés
static DOCUMENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{7,8}|\d{1,2}\.\d{3}\.\d{3})$").expect("Failed to compile document regex")
});

static PHONE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9 ()\-]+$").expect("Failed to compile phone regex"));

static MIN_SCORE: Score = Score::Three;

const MIN_PHONE_DIGITS: usize = 6;
const MAX_EMAIL_LENGTH: usize = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub struct InvalidInput;

/// This function checks if the given password is valid
/// Returns true if the password is strong enough, false otherwise
pub fn password_validation(password: &str, username: &str) -> bool {
    // First check: password should not be the same as username
    if password.eq_ignore_ascii_case(username) {
        return false;
    }

    // Second check: password must be 9 to 63 characters long
    let length = password.chars().count();
    if length <= 8 || length >= 64 {
        return false;
    }

    // Use crate zxcvbn for checking password entropy
    let estimate = zxcvbn(password, &[username]);

    estimate.score() >= MIN_SCORE
}

/// Conseils de zxcvbn pour un mot de passe refusé
pub fn password_feedback(password: &str, username: &str) -> Vec<String> {
    let entropy = zxcvbn(password, &[username]);
    let mut messages = Vec::new();

    if let Some(feedback) = entropy.feedback() {
        if let Some(warning) = feedback.warning() {
            messages.push(warning.to_string());
        }
        messages.extend(feedback.suggestions().iter().map(|s| s.to_string()));
    }
    messages
}

/// Wrapper type for a username thas has been validated
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub struct Username(String);

impl TryFrom<String> for Username {
    type Error = InvalidInput;

    fn try_from(username: String) -> Result<Self, Self::Error> {
        username_validation(&username)?;
        Ok(Self(username))
    }
}

impl TryFrom<&str> for Username {
    type Error = InvalidInput;

    fn try_from(username: &str) -> Result<Self, Self::Error> {
        username_validation(username)?;
        Ok(Self(username.to_owned()))
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn username_validation(username: &str) -> Result<(), InvalidInput> {
    if USERNAME_REGEX.is_match(username) {
        Ok(())
    } else {
        Err(InvalidInput)
    }
}

/// Numéro de document, normalisé sans les points
pub fn document_validation(document: &str) -> Result<String, InvalidInput> {
    let document = document.trim();
    if !DOCUMENT_REGEX.is_match(document) {
        return Err(InvalidInput);
    }
    Ok(document.chars().filter(|c| c.is_ascii_digit()).collect())
}

/// Adresse email au format HTML5, normalisée en minuscules
pub fn email_validation(email: &str) -> Result<String, InvalidInput> {
    let email = email.trim();
    if email.is_empty() || email.len() > MAX_EMAIL_LENGTH || !email.validate_email() {
        return Err(InvalidInput);
    }
    Ok(email.to_lowercase())
}

pub fn phone_validation(phone: &str) -> Result<String, InvalidInput> {
    let phone = phone.trim();
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    if !PHONE_REGEX.is_match(phone) || digits < MIN_PHONE_DIGITS {
        return Err(InvalidInput);
    }
    Ok(phone.to_owned())
}

/// Texte optionnel: une saisie vide devient `None`
pub fn optional_text(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    mod username_wrapper_tests {
        use super::*;

        #[test]
        fn test_valid_username() {
            let valid_cases = vec!["alice123", "Bob_user", "recepcion", "admin_galeno"];

            for username in valid_cases {
                assert!(
                    Username::try_from(username).is_ok(),
                    "Valid username {} was rejected !",
                    username
                );
            }
        }

        #[test]
        fn test_invalid_username() {
            let invalid_cases = vec![
                "a",
                "123starts_with_numbers",
                "_starts_with_underscore",
                "very_very_long_username_that_exceeds_limit",
                "special@character",
                "has space",
            ];

            for username in invalid_cases {
                assert!(
                    Username::try_from(username).is_err(),
                    "Invalid username {} was approved !",
                    username
                );
            }
        }

        #[test]
        fn test_username_display_and_as_ref() {
            let username = Username::try_from("test_user").unwrap();
            assert_eq!(username.to_string(), "test_user");
            assert_eq!(username.as_ref(), "test_user");
        }
    }

    mod patient_field_tests {
        use super::*;

        #[test]
        fn test_documents() {
            assert_eq!(document_validation("30123456").unwrap(), "30123456");
            assert_eq!(document_validation(" 30.123.456 ").unwrap(), "30123456");
            assert_eq!(document_validation("1.234.567").unwrap(), "1234567");

            for invalid in ["", "123456", "123456789", "30-123-456", "abcdefgh", "30.12.3456"] {
                assert!(
                    document_validation(invalid).is_err(),
                    "Invalid document {} was accepted !",
                    invalid
                );
            }
        }

        #[test]
        fn test_emails() {
            assert_eq!(
                email_validation("  Paciente@Example.com ").unwrap(),
                "paciente@example.com"
            );

            let too_long = format!("{}@example.com", "a".repeat(250));
            for invalid in ["", "not-an-email", "@example.com", "user@", too_long.as_str()] {
                assert!(
                    email_validation(invalid).is_err(),
                    "Invalid email {} was accepted !",
                    invalid
                );
            }
        }

        #[test]
        fn test_phones() {
            assert!(phone_validation("+54 11 1234-5678").is_ok());
            assert!(phone_validation("(011) 4567 8901").is_ok());
            assert!(phone_validation("12345").is_err());
            assert!(phone_validation("call me").is_err());
            assert!(phone_validation("").is_err());
        }

        #[test]
        fn test_optional_text() {
            assert_eq!(optional_text("   "), None);
            assert_eq!(optional_text(" Av. Corrientes 1234 ").as_deref(), Some("Av. Corrientes 1234"));
        }
    }

    mod password_tests {
        use super::*;

        #[test]
        fn test_password_strength_levels() {
            let username = "testuser";

            let test_cases = vec![
                ("short", false),
                ("password123", false),
                ("abcdefghijklm", false),
                ("StrongP@ssw0rd!", true),
                ("Tr0ub4dour&3!", true),
            ];

            for (password, expected_valid) in test_cases {
                assert_eq!(
                    password_validation(password, username),
                    expected_valid,
                    "Password '{}' validation result was unexpected",
                    password
                );
            }
        }

        #[test]
        fn test_password_username_correlation() {
            let username = "testuser";

            assert!(!password_validation(username, username));
            assert!(!password_validation(&username.to_uppercase(), username));
            assert!(!password_validation(&format!("{}123", username), username));
        }

        #[test]
        fn test_password_length_counts_characters() {
            let username = "testuser";

            // 8 caractères mais 12 octets
            assert!(!password_validation("Zq#9éà!ü", username));
            assert!(!password_validation(&"ñ7#Kq".repeat(13), username));
        }

        #[test]
        fn test_feedback_for_weak_password() {
            assert!(!password_feedback("password", "testuser").is_empty());
        }
    }
}
