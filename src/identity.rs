use anyhow::Result;
use libc::{getpwuid, uid_t};
use std::ffi::CStr;

/// Shortest accepted account name.
pub const MIN_USERNAME_LEN: usize = 3;

/// Login name of the invoking user, preferring the caller behind `sudo`.
pub fn login_name() -> Result<String> {
    if let Ok(sudo_user) = std::env::var("SUDO_USER") {
        return Ok(sudo_user);
    }
    unsafe {
        let pwd = getpwuid(libc::geteuid() as uid_t);
        if pwd.is_null() {
            return Err(anyhow::anyhow!("failed to resolve current user"));
        }
        let name = CStr::from_ptr((*pwd).pw_name);
        Ok(name.to_string_lossy().into_owned())
    }
}

/// The account a command acts on: the explicit name, else the login name.
pub fn resolve_username(explicit: Option<String>) -> Result<String> {
    let name = match explicit {
        Some(name) => name.trim().to_string(),
        None => login_name()?,
    };
    if name.is_empty() {
        anyhow::bail!("username must not be empty");
    }
    Ok(name)
}

pub fn is_valid_username(name: &str) -> bool {
    name.chars().count() >= MIN_USERNAME_LEN && !name.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_name_is_trimmed() -> Result<()> {
        assert_eq!(resolve_username(Some("  alice ".into()))?, "alice");
        assert!(resolve_username(Some("   ".into())).is_err());
        Ok(())
    }

    #[test]
    fn username_rules() {
        assert!(is_valid_username("bob"));
        assert!(!is_valid_username("al"));
        assert!(!is_valid_username("a b c"));
    }
}
