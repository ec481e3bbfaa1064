use std::sync::LazyLock;

use axum::http::{HeaderMap, header::AUTHORIZATION};
use chrono::{Datelike, NaiveDate};
use regex::Regex;

use crate::error::AppError;

static AADHAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{12}$").unwrap());
static PHONE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\+?[0-9]{10,15}$").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s").unwrap());

pub fn strip_whitespace(input: &str) -> String {
    WHITESPACE.replace_all(input, "").into_owned()
}

pub fn clean_aadhar(input: &str) -> String {
    strip_whitespace(input)
}

pub fn clean_phone(input: &str) -> String {
    strip_whitespace(input.trim())
}

pub fn validate_aadhar(input: &str) -> bool {
    AADHAR.is_match(&clean_aadhar(input))
}

pub fn validate_phone(input: &str) -> bool {
    PHONE.is_match(&clean_phone(input))
}

/// Digits only, at most 12, grouped by four: `1234 5678 9012`.
pub fn format_aadhar(input: &str) -> String {
    let digits: Vec<char> = input.chars().filter(char::is_ascii_digit).take(12).collect();

    digits
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased with every whitespace removed, `None` when nothing is left to match.
pub fn search_key(query: Option<&str>) -> Option<String> {
    let key = strip_whitespace(query?).to_lowercase();

    (!key.is_empty()).then_some(key)
}

pub fn matches_key(field: &str, key: &str) -> bool {
    strip_whitespace(field).to_lowercase().contains(key)
}

pub fn sanitize_input(input: &str) -> String {
    input
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
        .trim()
        .to_string()
}

/// Same month and day. Feb 29 falls on Feb 28 in non-leap years.
pub fn is_celebration(date: NaiveDate, today: NaiveDate) -> bool {
    if date.month() == 2 && date.day() == 29 && NaiveDate::from_ymd_opt(today.year(), 2, 29).is_none()
    {
        return today.month() == 2 && today.day() == 28;
    }

    date.month() == today.month() && date.day() == today.day()
}

pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

pub fn require_bearer(headers: &HeaderMap, expected: &str) -> Result<(), AppError> {
    match bearer(headers) {
        Some(token) if token == expected => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

pub fn required(field: &'static str, value: &str) -> Result<String, AppError> {
    let cleaned = sanitize_input(value);

    if cleaned.is_empty() {
        return Err(AppError::MalformedPayload(format!("{field} is required")));
    }

    Ok(cleaned)
}

pub fn checked_phone(value: &str) -> Result<String, AppError> {
    if !validate_phone(value) {
        return Err(AppError::MalformedPayload(format!("invalid phone number: {value}")));
    }

    Ok(clean_phone(value))
}

pub fn checked_aadhar(value: &str) -> Result<String, AppError> {
    if !validate_aadhar(value) {
        return Err(AppError::MalformedPayload(
            "aadhar number must be 12 digits".to_string(),
        ));
    }

    Ok(clean_aadhar(value))
}
