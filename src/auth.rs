use anyhow::Result;
use std::path::Path;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Return the API key for this daemon instance when none is configured.
///
/// On first call, generates a random 32-character hex token and writes it
/// to `{data_dir}/auth_token` with user-only read/write permissions (mode
/// 0600 on Unix). On subsequent calls, reads and returns the existing
/// token.
///
/// The token file must be kept secret — with `require_auth` on it is the
/// only credential protecting the HTTP/WebSocket port.
pub fn get_or_create_token(data_dir: &Path) -> Result<String> {
    let path = data_dir.join("auth_token");

    if path.exists() {
        let token = std::fs::read_to_string(&path)?.trim().to_string();
        if !token.is_empty() {
            return Ok(token);
        }
    }

    // UUID v4, hex without dashes = 32 chars
    let token = Uuid::new_v4().to_string().replace('-', "");

    std::fs::create_dir_all(data_dir)?;
    std::fs::write(&path, &token)?;

    // Restrict to owner read/write only on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(token)
}

/// Constant-time comparison of a presented credential against the
/// expected key. Length leaks are unavoidable; byte contents are not.
pub fn verify_key(presented: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}
