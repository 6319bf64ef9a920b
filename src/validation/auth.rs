fn username_problem(username: &str) -> Option<&'static str> {
    if username.is_empty() || username.len() < 3 {
        return Some("Username must be at least 3 characters long");
    }

    if username.len() > 255 {
        return Some("Username must be at most 255 characters");
    }

    if !username.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.') {
        return Some("Username can only contain letters, numbers, dots, underscores, and hyphens");
    }

    None
}

fn password_problem(password: &str) -> Option<&'static str> {
    if password.len() < 8 {
        return Some("Password must be at least 8 characters long");
    }

    if password.len() > 128 {
        return Some("Password must be at most 128 characters");
    }

    None
}

/// `garde` rule for username fields.
pub fn username_rule(value: &str, _ctx: &()) -> garde::Result {
    match username_problem(value) {
        Some(msg) => Err(garde::Error::new(msg)),
        None => Ok(()),
    }
}

/// `garde` rule for password fields.
pub fn password_rule(value: &str, _ctx: &()) -> garde::Result {
    match password_problem(value) {
        Some(msg) => Err(garde::Error::new(msg)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames() {
        assert!(username_rule("alice_01", &()).is_ok());
        assert!(username_rule("a.b-c", &()).is_ok());
        assert!(username_rule("ab", &()).is_err());
        assert!(username_rule("has space", &()).is_err());
        assert!(username_rule(&"x".repeat(256), &()).is_err());
    }

    #[test]
    fn passwords() {
        assert!(password_rule("longenough", &()).is_ok());
        assert!(password_rule("short", &()).is_err());
        assert!(password_rule(&"p".repeat(129), &()).is_err());
    }

    #[test]
    fn rule_messages_name_the_problem() {
        assert_eq!(
            password_problem("short"),
            Some("Password must be at least 8 characters long")
        );
        assert_eq!(username_problem("valid_name"), None);
    }
}
