//! PII masking for log and error surfaces.
//!
//! Anything that might contain an account number, email, or phone number is
//! masked before it reaches a structured log field or an error message.

/// Mask an account or routing number, keeping the last four digits.
///
/// Inputs shorter than five characters are fully masked.
#[must_use]
pub fn mask_account_number(number: &str) -> String {
    let len = number.chars().count();
    if len <= 4 {
        return "****".to_owned();
    }
    let last4: String = number.chars().skip(len - 4).collect();
    format!("{}{last4}", "*".repeat(len - 4))
}

/// Mask an email address, keeping the first character and the domain.
#[must_use]
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        }
        _ => "***".to_owned(),
    }
}

/// Mask a phone number, keeping the last two digits.
#[must_use]
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return "***".to_owned();
    }
    let last2: String = digits[digits.len() - 2..].iter().collect();
    format!("***{last2}")
}
