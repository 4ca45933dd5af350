use crate::constants::MAX_USERNAME_LEN;
use crate::error::ProtocolError;

/// Normalize and validate a display name from a `Login` envelope.
///
/// Surrounding whitespace is trimmed; the result must be non-empty, at most
/// [`MAX_USERNAME_LEN`] characters and free of control characters.
pub fn validate_username(raw: &str) -> Result<&str, ProtocolError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ProtocolError::EmptyUsername);
    }

    let len = name.chars().count();
    if len > MAX_USERNAME_LEN {
        return Err(ProtocolError::UsernameTooLong {
            len,
            max: MAX_USERNAME_LEN,
        });
    }

    if name.chars().any(char::is_control) {
        return Err(ProtocolError::InvalidUsername);
    }

    Ok(name)
}

/// Normalize the receiver of a `Send` envelope.
pub fn validate_receiver(raw: &str) -> Result<&str, ProtocolError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ProtocolError::EmptyReceiver);
    }
    Ok(name)
}
