use townsense_common::{ContactMessage, IntakeError};

pub const MIN_MESSAGE_CHARS: usize = 50;
pub const MAX_MESSAGE_CHARS: usize = 5000;
const MAX_NAME_CHARS: usize = 100;

/// Trimmed copy of `message`, or the first rule it breaks.
pub fn validate_contact(message: &ContactMessage) -> Result<ContactMessage, IntakeError> {
    let first_name = required("first name", &message.first_name, MAX_NAME_CHARS)?;
    let last_name = required("last name", &message.last_name, MAX_NAME_CHARS)?;
    let email = required("email", &message.email, 254)?;
    let body = required("message", &message.message, MAX_MESSAGE_CHARS)?;

    if !looks_like_email(&email) {
        return Err(IntakeError::Validation("email address is not valid".into()));
    }
    if body.chars().count() < MIN_MESSAGE_CHARS {
        return Err(IntakeError::Validation(format!(
            "message must be at least {MIN_MESSAGE_CHARS} characters"
        )));
    }

    Ok(ContactMessage {
        first_name,
        last_name,
        email,
        message: body,
    })
}

fn required(field: &str, value: &str, max_chars: usize) -> Result<String, IntakeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(IntakeError::Validation(format!("{field} is required")));
    }
    if trimmed.chars().count() > max_chars {
        return Err(IntakeError::Validation(format!(
            "{field} exceeds {max_chars} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
