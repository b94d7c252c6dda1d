//! Transactional email dispatch
//!
//! Sends through a Resend-compatible HTTP API. When `RESEND_API_KEY` is
//! absent the mailer runs disabled and every send becomes a logged no-op,
//! which keeps local development and tests offline. A failed send never
//! fails the request that triggered it; the caller reports
//! `verification_code_sent: false` and the user can ask for a resend.

use reqwest::Client;
use serde_json::json;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Clone)]
pub struct Mailer {
    api_key: Option<String>,
    from_address: String,
    app_base_url: String,
    client: Client,
}

impl Mailer {
    pub fn from_env(client: Client, app_base_url: &str) -> Self {
        Self {
            api_key: std::env::var("RESEND_API_KEY").ok().filter(|k| !k.is_empty()),
            from_address: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Hearthside <no-reply@hearthside.app>".to_string()),
            app_base_url: app_base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Six-digit verification code for signup, login, or email change.
    pub async fn send_verification_code(&self, to: &str, code: &str) -> bool {
        let body = format!(
            "Your Hearthside verification code is {code}.\n\n\
             It expires in 15 minutes. If you didn't request this, you can ignore this email."
        );
        self.send(to, "Your Hearthside verification code", &body)
            .await
    }

    /// Welcome mail after the first successful signup verification.
    pub async fn send_welcome(&self, to: &str, first_name: Option<&str>) -> bool {
        let greeting = first_name.unwrap_or("there");
        let body = format!(
            "Hi {greeting},\n\nYour email is verified and your family space is ready.\n\
             Sign in any time at {}.",
            self.app_base_url
        );
        self.send(to, "Welcome to Hearthside", &body).await
    }

    /// Password-reset link carrying the raw (never stored) token.
    pub async fn send_reset_link(&self, to: &str, raw_token: &str, redirect_url: Option<&str>) -> bool {
        let base = redirect_url.unwrap_or(&self.app_base_url);
        let body = format!(
            "We received a request to reset access to your Hearthside account.\n\n\
             {base}/reset?token={raw_token}\n\n\
             The link expires in 1 hour. If you didn't request it, ignore this email."
        );
        self.send(to, "Reset your Hearthside access", &body).await
    }

    /// Family invitation link carrying the raw invitation token.
    pub async fn send_invitation(&self, to: &str, family_name: &str, raw_token: &str) -> bool {
        let body = format!(
            "You've been invited to join the family \"{family_name}\" on Hearthside.\n\n\
             {}/signup?invitation={raw_token}\n\n\
             The invitation expires in 7 days.",
            self.app_base_url
        );
        self.send(to, "You're invited to a Hearthside family", &body)
            .await
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> bool {
        let Some(api_key) = &self.api_key else {
            tracing::warn!(to, subject, "email disabled (no RESEND_API_KEY), skipping send");
            return false;
        };

        let result = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(api_key)
            .json(&json!({
                "from": self.from_address,
                "to": [to],
                "subject": subject,
                "text": body,
            }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(to, status = %response.status(), "email send rejected");
                false
            }
            Err(e) => {
                tracing::warn!(to, error = %e, "email send failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[serial_test::serial]
    async fn disabled_mailer_skips_sends() {
        std::env::remove_var("RESEND_API_KEY");
        let mailer = Mailer::from_env(Client::new(), "http://localhost:3000");
        assert!(!mailer.is_enabled());
        assert!(!mailer.send_verification_code("x@example.com", "123456").await);
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn from_env_reads_key() {
        std::env::set_var("RESEND_API_KEY", "re_test_key");
        let mailer = Mailer::from_env(Client::new(), "http://localhost:3000/");
        assert!(mailer.is_enabled());
        std::env::remove_var("RESEND_API_KEY");
    }
}
