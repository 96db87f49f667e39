use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

pub const OTP_TTL_MINUTES: i64 = 10;
pub const OTP_MAX_ATTEMPTS: u32 = 5;

pub const PURPOSE_VERIFY: &str = "verify";
pub const PURPOSE_PASSWORD_RESET: &str = "password_reset";

/// Six digits, zero-padded.
pub fn generate_code() -> String {
    let n: u32 = rand::rng().random_range(0..1_000_000);
    format!("{:06}", n)
}

/// Stored form of a code: sha256 hex of the trimmed digits.
pub fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.trim().as_bytes()))
}

/// Hide all but the last few characters of a phone number or email.
pub fn mask_destination(destination: &str) -> String {
    if let Some((local, domain)) = destination.split_once('@') {
        let first: String = local.chars().take(1).collect();
        return format!("{}***@{}", first, domain);
    }
    let chars: Vec<char> = destination.chars().collect();
    let keep = chars.len().min(3);
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("***{}", tail)
}

#[derive(Serialize)]
struct WhatsAppPayload<'a> {
    to: &'a str,
    message: String,
}

/// Delivers one-time codes through an HTTP WhatsApp gateway. Without a
/// gateway URL, codes are written to the log for local development.
pub struct OtpSender {
    client: reqwest::Client,
    whatsapp_url: Option<String>,
    whatsapp_token: Option<String>,
}

impl OtpSender {
    pub fn new(whatsapp_url: Option<String>, whatsapp_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, whatsapp_url, whatsapp_token }
    }

    pub fn is_configured(&self) -> bool {
        self.whatsapp_url.is_some()
    }

    pub async fn send(&self, destination: &str, code: &str, purpose: &str) -> anyhow::Result<()> {
        let message = match purpose {
            PURPOSE_PASSWORD_RESET => format!(
                "Your QaaqConnect password reset code is {}. It expires in {} minutes.",
                code, OTP_TTL_MINUTES
            ),
            _ => format!(
                "Your QaaqConnect verification code is {}. It expires in {} minutes.",
                code, OTP_TTL_MINUTES
            ),
        };

        let (Some(url), false) = (&self.whatsapp_url, destination.contains('@')) else {
            warn!(
                "No delivery channel for {}; {} code is {}",
                mask_destination(destination),
                purpose,
                code
            );
            return Ok(());
        };

        let mut request = self.client.post(url).json(&WhatsAppPayload { to: destination, message });
        if let Some(token) = &self.whatsapp_token {
            request = request.bearer_auth(token);
        }

        request
            .send()
            .await
            .context("WhatsApp gateway unreachable")?
            .error_for_status()
            .context("WhatsApp gateway rejected the message")?;

        info!("Sent {} code to {}", purpose, mask_destination(destination));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn hash_ignores_surrounding_whitespace() {
        assert_eq!(hash_code("123456"), hash_code(" 123456\n"));
        assert_ne!(hash_code("123456"), hash_code("123457"));
        assert_eq!(hash_code("000000").len(), 64);
    }

    #[test]
    fn destinations_are_masked() {
        assert_eq!(mask_destination("+919876543210"), "***210");
        assert_eq!(mask_destination("bosun@example.com"), "b***@example.com");
        assert_eq!(mask_destination("12"), "***12");
    }

    #[tokio::test]
    async fn send_without_gateway_logs_and_succeeds() {
        let sender = OtpSender::new(None, None);
        assert!(!sender.is_configured());
        sender.send("+919876543210", "123456", PURPOSE_VERIFY).await.unwrap();
    }
}
