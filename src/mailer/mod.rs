//! Transactional email: deterministic template rendering, with SMTP delivery
//! as a separate, retriable step.

use std::sync::OnceLock;

use minijinja::Environment;

use crate::config::Config;

const INVITATION_SUBJECT: &str = "You have been invited to join {{ tenant_name }}";

const INVITATION_BODY: &str = "\
Hello,

{{ tenant_name }} has invited you to join as {{ role_name }}.

Accept the invitation:

    {{ accept_url }}

The invitation expires at {{ expires_at }}. If you were not expecting this
email you can ignore it.
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Invitation,
}

impl Template {
    fn subject_name(self) -> &'static str {
        match self {
            Self::Invitation => "invitation.subject",
        }
    }

    fn body_name(self) -> &'static str {
        match self {
            Self::Invitation => "invitation.body",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub subject: String,
    pub body: String,
}

fn environment() -> &'static Environment<'static> {
    static ENV: OnceLock<Environment<'static>> = OnceLock::new();
    ENV.get_or_init(|| {
        let mut env = Environment::new();
        env.add_template("invitation.subject", INVITATION_SUBJECT)
            .expect("invitation subject template");
        env.add_template("invitation.body", INVITATION_BODY)
            .expect("invitation body template");
        env
    })
}

/// Render a template with the given variables. Pure: the same inputs always
/// produce the same output.
pub fn render(template: Template, vars: &serde_json::Value) -> anyhow::Result<Rendered> {
    let env = environment();
    let ctx = minijinja::Value::from_serialize(vars);
    let subject = env
        .get_template(template.subject_name())?
        .render(&ctx)
        .map_err(|e| anyhow::anyhow!("subject render failed: {e}"))?;
    let body = env
        .get_template(template.body_name())?
        .render(&ctx)
        .map_err(|e| anyhow::anyhow!("body render failed: {e}"))?;
    Ok(Rendered { subject, body })
}

/// Send a plain-text email via SMTP.
///
/// Returns early (with a warning log) if SMTP is not configured.
/// Sanitizes `to` and `subject` to prevent header injection.
#[tracing::instrument(skip(config, body), fields(%to), err)]
pub async fn send(config: &Config, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
    use lettre::message::Mailbox;
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

    let Some(ref smtp_host) = config.smtp_host else {
        tracing::warn!("SMTP not configured — email not sent");
        return Ok(());
    };

    if to.contains('\n') || to.contains('\r') {
        anyhow::bail!("email 'to' address contains invalid characters");
    }
    if subject.contains('\n') || subject.contains('\r') {
        anyhow::bail!("email subject contains invalid characters");
    }

    let from: Mailbox = config
        .smtp_from
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid smtp_from address '{}': {e}", config.smtp_from))?;

    let to_mailbox: Mailbox = to
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid recipient address '{to}': {e}"))?;

    let message = Message::builder()
        .from(from)
        .to(to_mailbox)
        .subject(subject)
        .body(body.to_owned())
        .map_err(|e| anyhow::anyhow!("failed to build email: {e}"))?;

    let mut transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_host)
        .map_err(|e| anyhow::anyhow!("SMTP relay setup failed: {e}"))?
        .port(config.smtp_port);

    if let Some(ref username) = config.smtp_username {
        let password = config.smtp_password.as_deref().unwrap_or("");
        transport = transport.credentials(Credentials::new(username.clone(), password.to_owned()));
    }

    let transport = transport.build();

    transport
        .send(message)
        .await
        .map_err(|e| anyhow::anyhow!("email send failed: {e}"))?;
    tracing::info!(to, subject, "email sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppEnv;
    use crate::identity::VerifyMode;

    fn test_config() -> Config {
        Config {
            app_env: AppEnv::Development,
            listen_addr: String::new(),
            database_url: String::new(),
            identity_connection_uri: "embedded".into(),
            identity_api_key: "test".into(),
            access_token_validity_human_seconds: 3600,
            access_token_validity_system_seconds: 86400,
            token_mode: VerifyMode::Stateless,
            invitation_base_url: "http://localhost:8080".into(),
            invitation_ttl_hours: 72,
            credential_grace_period_days: 7,
            tenant_init_services: Vec::new(),
            smtp_host: None,
            smtp_port: 587,
            smtp_from: "test@example.com".into(),
            smtp_username: None,
            smtp_password: None,
            queue_poll_interval_ms: 1000,
        }
    }

    fn invitation_vars() -> serde_json::Value {
        serde_json::json!({
            "tenant_name": "Acme",
            "role_name": "Writer",
            "accept_url": "http://localhost:8080/invitations/tok/accept",
            "expires_at": "2026-01-01 00:00 UTC",
        })
    }

    #[test]
    fn invitation_renders_all_variables() {
        let rendered = render(Template::Invitation, &invitation_vars()).unwrap();
        assert_eq!(rendered.subject, "You have been invited to join Acme");
        assert!(rendered.body.contains("as Writer"));
        assert!(rendered.body.contains("http://localhost:8080/invitations/tok/accept"));
        assert!(rendered.body.contains("2026-01-01 00:00 UTC"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = render(Template::Invitation, &invitation_vars()).unwrap();
        let b = render(Template::Invitation, &invitation_vars()).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn send_without_smtp_host_is_noop() {
        let config = test_config();
        let result = send(&config, "user@example.com", "test", "body").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn reject_newline_in_to() {
        let mut config = test_config();
        config.smtp_host = Some("localhost".into());
        let result = send(
            &config,
            "user@example.com\nBcc: evil@attacker.com",
            "test",
            "body",
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reject_newline_in_subject() {
        let mut config = test_config();
        config.smtp_host = Some("localhost".into());
        let result = send(&config, "user@example.com", "bad\r\nsubject", "body").await;
        assert!(result.is_err());
    }
}
