//! Queries an askpass HTTP callback for a fresh `{username, password}` pair.

use std::time::Duration;

use crate::error::SyncError;

const ASKPASS_TIMEOUT: Duration = Duration::from_secs(1);

/// Query an askpass HTTP endpoint; response body is `key=value` lines.
pub fn fetch(url: &str) -> Result<(String, String), SyncError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(ASKPASS_TIMEOUT)
        .build()
        .map_err(|e| SyncError::Credential(format!("building askpass client: {e}")))?;

    let resp = client
        .get(url)
        .send()
        .map_err(|e| SyncError::Credential(format!("askpass request failed: {e}")))?;

    if !resp.status().is_success() {
        return Err(SyncError::Credential(format!(
            "askpass endpoint returned status {}",
            resp.status()
        )));
    }

    let body = resp
        .text()
        .map_err(|e| SyncError::Credential(format!("reading askpass response: {e}")))?;

    parse_body(&body)
}

fn parse_body(body: &str) -> Result<(String, String), SyncError> {
    let mut username = None;
    let mut password = None;
    for line in body.lines() {
        let Some((key, value)) = line.split_once('=') else { continue };
        match key {
            "username" => username = Some(value.to_string()),
            "password" => password = Some(value.to_string()),
            _ => {}
        }
    }
    let username = username.ok_or_else(|| SyncError::Credential("askpass response missing username".into()))?;
    let password = password.ok_or_else(|| SyncError::Credential("askpass response missing password".into()))?;
    Ok((username, password))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_askpass_key_value_lines() {
        let (u, p) = parse_body("username=bot\npassword=hunter2\n").unwrap();
        assert_eq!(u, "bot");
        assert_eq!(p, "hunter2");
    }

    #[test]
    fn askpass_missing_password_is_an_error() {
        let err = parse_body("username=bot\n").unwrap_err();
        assert!(matches!(err, SyncError::Credential(_)));
    }

    #[test]
    fn askpass_ignores_unrecognized_keys() {
        let (u, p) = parse_body("url=https://example.com\nusername=bot\npassword=x\n").unwrap();
        assert_eq!(u, "bot");
        assert_eq!(p, "x");
    }
}
