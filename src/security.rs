#![forbid(unsafe_code)]

//! Startup security checks shared by the streamgate binaries.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Minimum length accepted for the signing secret. Anything shorter makes the
/// capability tokens trivially forgeable.
pub const MIN_SECRET_LEN: usize = 16;

/// Fails fast when a binary is started as root. The server only needs to read
/// the catalog DB and open outbound connections; a dedicated service account
/// is enough.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!(
            "{process} must not be run as root; use a regular user or a dedicated service account"
        );
    }
    Ok(())
}

/// Rejects secrets that are empty, too short, or obvious placeholders before
/// any token is ever minted with them.
pub fn ensure_signing_secret(secret: &str) -> Result<()> {
    let trimmed = secret.trim();
    if trimmed.len() < MIN_SECRET_LEN {
        bail!("STREAMGATE_SECRET must be at least {MIN_SECRET_LEN} characters");
    }
    if matches!(
        trimmed.to_ascii_lowercase().as_str(),
        "changeme" | "change-me" | "secret" | "password" | "0000000000000000"
    ) {
        bail!("STREAMGATE_SECRET is a placeholder value; generate a real secret");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Uid;

    #[test]
    fn ensure_not_root_allows_unprivileged_uid() {
        let uid = Uid::from_raw(1000);
        assert!(ensure_not_root_for(uid, "tester").is_ok());
    }

    #[test]
    fn ensure_not_root_rejects_root_uid() {
        let uid = Uid::from_raw(0);
        let err = ensure_not_root_for(uid, "tester").unwrap_err();
        assert!(err.to_string().contains("must not be run as root"));
    }

    #[test]
    fn short_secret_is_rejected() {
        assert!(ensure_signing_secret("tiny").is_err());
        assert!(ensure_signing_secret("   tiny padded     ").is_err());
    }

    #[test]
    fn placeholder_secret_is_rejected() {
        assert!(ensure_signing_secret("change-me").is_err());
    }

    #[test]
    fn reasonable_secret_is_accepted() {
        assert!(ensure_signing_secret("db13a1f0c4a0ffe0b52d00a1").is_ok());
    }
}
