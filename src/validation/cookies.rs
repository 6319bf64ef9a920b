use crate::{
    cookies::normalize_domain,
    error::{AppError, Result},
    models::cookie::CookieRecord,
};

/// The most cookies accepted in one upload.
pub const MAX_COOKIES_PER_UPLOAD: usize = 500;

/// Normalizes a website and rejects values that are not a hostname.
pub fn validate_website(raw: &str) -> Result<String> {
    let website = normalize_domain(raw);

    if website.is_empty() {
        return Err(AppError::Validation("Website is required".to_string()));
    }

    if website.len() > 253 {
        return Err(AppError::Validation("Website is too long".to_string()));
    }

    let valid = website.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    if !valid {
        return Err(AppError::Validation(format!("Invalid website: {}", website)));
    }

    Ok(website)
}

/// Checks an uploaded cookie list.
pub fn validate_cookies(cookies: &[CookieRecord]) -> Result<()> {
    if cookies.is_empty() {
        return Err(AppError::Validation("Cookies array cannot be empty".to_string()));
    }

    if cookies.len() > MAX_COOKIES_PER_UPLOAD {
        return Err(AppError::Validation(format!(
            "At most {} cookies can be uploaded at once",
            MAX_COOKIES_PER_UPLOAD
        )));
    }

    for (index, cookie) in cookies.iter().enumerate() {
        if cookie.name.trim().is_empty() {
            return Err(AppError::Validation(format!("Cookie #{} has no name", index)));
        }
        if cookie.domain.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "Cookie '{}' has no domain",
                cookie.name
            )));
        }
    }

    Ok(())
}
