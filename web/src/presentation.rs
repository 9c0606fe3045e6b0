//! Presentation layer.
//!
//! Everything the browser sees is produced by a [`ConsentPresenter`]; the
//! handlers only decide which page to show. [`HtmlPresenter`] is the built-in
//! implementation: plain HTML with every interpolated value escaped.

use crate::error::AppError;
use idp_bridge::{ConsentPrompt, Decision, SignedToken};

/// Renders pages and parses the user's answer.
pub trait ConsentPresenter: Send + Sync {
    /// Shown when the authentication delegate could not identify the user.
    ///
    /// `token` is set when a challenge is already in flight; resubmitting it
    /// to `POST /` retries authentication for that challenge.
    fn login_page(&self, token: Option<&SignedToken>) -> String;

    /// The consent question.
    fn consent_page(&self, prompt: &ConsentPrompt, token: &SignedToken) -> String;

    /// Shown after resolution when the hub named no place to continue to.
    fn completed_page(&self, decision: Decision) -> String;

    /// Shown for any failure.
    fn error_page(&self, error: &AppError) -> String;

    /// The user's answer from the submitted `answer` field, `None` if it is
    /// neither yes nor no.
    fn parse_answer(&self, answer: &str) -> Option<Decision>;
}

/// Built-in HTML presenter.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlPresenter;

impl ConsentPresenter for HtmlPresenter {
    fn login_page(&self, token: Option<&SignedToken>) -> String {
        let retry = token.map_or_else(String::new, |token| {
            format!(
                r#"<form method="post" action="/">
<input type="hidden" name="token" value="{}">
<input type="submit" value="Try again">
</form>"#,
                escape(token.as_str())
            )
        });
        document(
            "Sign in required",
            &format!("<p>We could not tell who you are. Please sign in and try again.</p>\n{retry}"),
        )
    }

    fn consent_page(&self, prompt: &ConsentPrompt, token: &SignedToken) -> String {
        let scopes: String = prompt
            .scopes
            .iter()
            .map(|scope| format!("<li>{}</li>\n", escape(scope)))
            .collect();
        document(
            "Consent",
            &format!(
                r#"<p>Hi {user}! Do you agree to grant {client} access to those scopes?</p>
<ul>
{scopes}</ul>
<form method="post" action="/consent">
<input type="hidden" name="challenge" value="{token}">
<input type="submit" name="answer" value="y">
<input type="submit" name="answer" value="n">
</form>"#,
                user = escape(&prompt.user),
                client = escape(&prompt.client),
                token = escape(token.as_str()),
            ),
        )
    }

    fn completed_page(&self, decision: Decision) -> String {
        let message = match decision {
            Decision::Granted => "Access granted. You can close this window.",
            Decision::Denied => "Access denied. You can close this window.",
        };
        document("Done", &format!("<p>{message}</p>"))
    }

    fn error_page(&self, error: &AppError) -> String {
        let mut body = format!("<p>{}</p>", escape(error.message()));
        if let Some(token) = error.retry_token() {
            body.push_str(&format!(
                r#"
<form method="post" action="/consent/resolve">
<input type="hidden" name="challenge" value="{}">
<input type="submit" value="Try again">
</form>"#,
                escape(token.as_str())
            ));
        }
        if error.requires_restart() {
            body.push_str("\n<p><a href=\"/\">Start over</a></p>");
        }
        document("Something went wrong", &body)
    }

    fn parse_answer(&self, answer: &str) -> Option<Decision> {
        match answer.trim() {
            "y" | "Y" => Some(Decision::Granted),
            "n" | "N" => Some(Decision::Denied),
            _ => None,
        }
    }
}

fn document(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head><body>\n{body}\n</body></html>\n"
    )
}

/// Escape text for use in HTML content and quoted attributes.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use idp_bridge_testing::properties;

    fn prompt() -> ConsentPrompt {
        ConsentPrompt {
            client: "C".to_string(),
            user: "alice".to_string(),
            scopes: vec!["read".to_string(), "write".to_string()],
        }
    }

    #[test]
    fn consent_page_asks_the_question() {
        let page = HtmlPresenter.consent_page(&prompt(), &SignedToken::new("tok.sig".into()));

        assert!(page.contains("Hi alice! Do you agree to grant C access to those scopes?"));
        assert!(page.contains("<li>read</li>"));
        assert!(page.contains("<li>write</li>"));
        assert!(page.contains(r#"name="answer" value="y""#));
        assert!(page.contains(r#"name="answer" value="n""#));
        assert!(page.contains(r#"name="challenge" value="tok.sig""#));
    }

    #[test]
    fn hub_supplied_text_is_escaped() {
        let mut prompt = prompt();
        prompt.client = "<script>alert(1)</script>".to_string();
        prompt.scopes = vec!["\"><img>".to_string()];

        let page = HtmlPresenter.consent_page(&prompt, &SignedToken::new("t".into()));

        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;"));
        assert!(page.contains("&quot;&gt;&lt;img&gt;"));
    }

    #[test]
    fn answers() {
        assert_eq!(HtmlPresenter.parse_answer("y"), Some(Decision::Granted));
        assert_eq!(HtmlPresenter.parse_answer("n"), Some(Decision::Denied));
        assert_eq!(HtmlPresenter.parse_answer("yes please"), None);
        assert_eq!(HtmlPresenter.parse_answer(""), None);
    }

    #[test]
    fn login_page_offers_retry_only_with_token() {
        assert!(!HtmlPresenter.login_page(None).contains("<form"));
        let page = HtmlPresenter.login_page(Some(&SignedToken::new("abc.def".into())));
        assert!(page.contains(r#"name="token" value="abc.def""#));
    }

    proptest::proptest! {
        #[test]
        fn escaped_text_cannot_open_markup(user in properties::user_name(), text in properties::garbage()) {
            let mut prompt = prompt();
            prompt.user = user;
            prompt.client = text;
            let page = HtmlPresenter.consent_page(&prompt, &SignedToken::new("t".into()));
            let question = page.split("<p>").nth(1).and_then(|rest| rest.split("</p>").next()).unwrap_or("");
            proptest::prop_assert!(!question.contains('<'));
            proptest::prop_assert!(!question.contains('"'));
        }
    }

    #[test]
    fn error_page_hides_internals() {
        let err = AppError::from(idp_bridge::IdpError::Internal("redis: connection reset".into()));
        let page = HtmlPresenter.error_page(&err);
        assert!(!page.contains("redis"));
    }
}
