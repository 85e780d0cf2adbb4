//! Manual completion of the authorization-code flow
//!
//! The vendor's login page redirects to a dead callback URL (a "Page Not
//! Found" at auth.tesla.com/void/callback); the operator copies that URL
//! out of the browser address bar and pastes it back here. `complete`
//! loops until the pasted input carries a usable `code` parameter.

use std::io::{BufRead, Write};

use tracing::warn;

use crate::error::{Error, Result};

/// One blocking line of operator interaction.
///
/// Implementations decide where the line comes from: stdin for terminal
/// use, scripted responses in tests, or an unconditional refusal for
/// headless deployments.
pub trait Prompt: Send + Sync {
    /// Display `message` and block until one line of input is available.
    fn read_line(&self, message: &str) -> std::io::Result<String>;
}

/// Reads from the process's stdin. Messages go to stderr so piped stdout
/// stays clean.
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn read_line(&self, message: &str) -> std::io::Result<String> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{message}")?;
        stderr.flush()?;

        let mut line = String::new();
        let n = std::io::stdin().lock().read_line(&mut line)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stdin closed",
            ));
        }
        Ok(line)
    }
}

/// Refuses all interaction. For deployments with no operator attached.
pub struct DeniedPrompt;

impl Prompt for DeniedPrompt {
    fn read_line(&self, _message: &str) -> std::io::Result<String> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "interactive authorization is disabled",
        ))
    }
}

/// Walk the operator through the browser authorization step.
///
/// Prints `authorization_url` with instructions, then reads lines until one
/// contains a `code` query parameter (a full callback URL or just the
/// `code=...` fragment both work). Input without a code re-prompts rather
/// than failing. If the pasted input carries a `state` parameter it must
/// match the state embedded in `authorization_url`; a mismatch is rejected
/// with a re-prompt.
pub fn complete(authorization_url: &str, prompt: &dyn Prompt) -> Result<String> {
    let expected_state = query_param(authorization_url, "state");

    let banner = format!(
        "\nOpen this URL in your browser and log in:\n\n  {authorization_url}\n\n\
         After login the browser lands on a \"Page Not Found\" callback page.\n\
         Paste the full URL from the address bar here.\n> "
    );
    let mut message = banner.as_str();

    loop {
        let line = prompt.read_line(message).map_err(|e| match e.kind() {
            std::io::ErrorKind::Unsupported => Error::Interaction(e.to_string()),
            _ => Error::Io(format!("reading authorization input: {e}")),
        })?;
        let line = line.trim();

        let Some(code) = query_param(line, "code") else {
            message = "No code= parameter found. Paste the full callback URL.\n> ";
            continue;
        };

        if let (Some(expected), Some(got)) =
            (expected_state.as_deref(), query_param(line, "state"))
        {
            if got != expected {
                warn!("callback state does not match the authorization request");
                message = "The state parameter does not match this login attempt. \
                           Paste the callback URL from the current browser session.\n> ";
                continue;
            }
        }

        return Ok(code);
    }
}

/// Extract a query parameter from a URL or a bare query fragment.
///
/// Some browsers append a `#...` fragment to the callback; it is stripped
/// from the value.
fn query_param(input: &str, name: &str) -> Option<String> {
    let query = match input.split_once('?') {
        Some((_, query)) => query,
        None => input,
    };

    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == name && !value.is_empty() {
                let value = value.split('#').next().unwrap_or(value);
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkce;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Feeds pre-baked lines and records how many prompts were issued.
    struct ScriptedPrompt {
        lines: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedPrompt {
        fn new(lines: &[&str]) -> Self {
            Self {
                lines: Mutex::new(lines.iter().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompt_count(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    impl Prompt for ScriptedPrompt {
        fn read_line(&self, message: &str) -> std::io::Result<String> {
            self.prompts.lock().unwrap().push(message.to_string());
            self.lines.lock().unwrap().pop_front().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "script exhausted")
            })
        }
    }

    fn auth_url_with_state(state: &str) -> String {
        let challenge = pkce::compute_challenge("test-verifier");
        pkce::build_authorization_url(&challenge, state)
    }

    #[test]
    fn extracts_code_from_full_callback_url() {
        let url = auth_url_with_state("xyz");
        let prompt = ScriptedPrompt::new(&[
            "https://auth.tesla.com/void/callback?code=ABC123&state=xyz",
        ]);
        let code = complete(&url, &prompt).unwrap();
        assert_eq!(code, "ABC123");
        assert_eq!(prompt.prompt_count(), 1);
    }

    #[test]
    fn accepts_bare_code_fragment() {
        let url = auth_url_with_state("xyz");
        let prompt = ScriptedPrompt::new(&["code=ABC123"]);
        assert_eq!(complete(&url, &prompt).unwrap(), "ABC123");
    }

    #[test]
    fn reprompts_until_code_present() {
        let url = auth_url_with_state("xyz");
        let prompt = ScriptedPrompt::new(&[
            "not a url at all",
            "https://auth.tesla.com/void/callback?error=login_cancelled",
            "https://auth.tesla.com/void/callback?code=FINAL&state=xyz",
        ]);
        assert_eq!(complete(&url, &prompt).unwrap(), "FINAL");
        assert_eq!(prompt.prompt_count(), 3);
    }

    #[test]
    fn rejects_mismatched_state_then_accepts_correct_one() {
        let url = auth_url_with_state("expected-state");
        let prompt = ScriptedPrompt::new(&[
            "https://auth.tesla.com/void/callback?code=EVIL&state=attacker",
            "https://auth.tesla.com/void/callback?code=GOOD&state=expected-state",
        ]);
        assert_eq!(complete(&url, &prompt).unwrap(), "GOOD");
        assert_eq!(prompt.prompt_count(), 2);
    }

    #[test]
    fn code_without_state_is_accepted() {
        // Operators may paste just the code fragment; only a present,
        // wrong state is rejected.
        let url = auth_url_with_state("expected-state");
        let prompt = ScriptedPrompt::new(&["code=JUSTCODE"]);
        assert_eq!(complete(&url, &prompt).unwrap(), "JUSTCODE");
    }

    #[test]
    fn strips_fragment_suffix_from_code() {
        let url = auth_url_with_state("xyz");
        let prompt = ScriptedPrompt::new(&["code=ABC123#fragment"]);
        assert_eq!(complete(&url, &prompt).unwrap(), "ABC123");
    }

    #[test]
    fn exhausted_input_surfaces_io_error() {
        let url = auth_url_with_state("xyz");
        let prompt = ScriptedPrompt::new(&["nothing useful here"]);
        let err = complete(&url, &prompt).unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got: {err:?}");
    }

    #[test]
    fn denied_prompt_maps_to_interaction_error() {
        let url = auth_url_with_state("xyz");
        let err = complete(&url, &DeniedPrompt).unwrap_err();
        assert!(matches!(err, Error::Interaction(_)), "got: {err:?}");
    }

    #[test]
    fn query_param_handles_urls_and_fragments() {
        assert_eq!(
            query_param("https://x.example/cb?a=1&code=Z9&b=2", "code").as_deref(),
            Some("Z9")
        );
        assert_eq!(query_param("code=Z9", "code").as_deref(), Some("Z9"));
        assert_eq!(query_param("https://x.example/cb?code=", "code"), None);
        assert_eq!(query_param("https://x.example/cb", "code"), None);
    }
}
