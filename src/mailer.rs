use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::BoxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    UserWelcome,
    TokenActivation,
    TokenPasswordReset,
}

impl Template {
    pub fn subject(&self) -> &'static str {
        match self {
            Template::UserWelcome => "Welcome to Greenlight!",
            Template::TokenActivation => "Activate your Greenlight account",
            Template::TokenPasswordReset => "Reset your Greenlight password",
        }
    }

    pub fn render(&self, data: &Value) -> Result<String, BoxError> {
        let field = |key: &str| -> Result<String, BoxError> {
            match data.get(key) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(Value::Number(n)) => Ok(n.to_string()),
                _ => Err(format!("template data is missing `{key}`").into()),
            }
        };

        let body = match self {
            Template::UserWelcome => format!(
                "Hi,\n\nThanks for signing up for a Greenlight account. \
                 For future reference, your user ID number is {}.\n\n\
                 Please send a request to the `PUT /v1/users/activated` endpoint with the \
                 following JSON body to activate your account:\n\n\
                 {{\"token\": \"{}\"}}\n\n\
                 Please note that this is a one-time use token and it will expire in 3 days.\n",
                field("userID")?,
                field("activationToken")?,
            ),
            Template::TokenActivation => format!(
                "Hi,\n\nPlease send a `PUT /v1/users/activated` request with the following \
                 JSON body to activate your account:\n\n\
                 {{\"token\": \"{}\"}}\n\n\
                 Please note that this is a one-time use token and it will expire in 3 days.\n",
                field("activationToken")?,
            ),
            Template::TokenPasswordReset => format!(
                "Hi,\n\nPlease send a `PUT /v1/users/password` request with the following \
                 JSON body to set a new password:\n\n\
                 {{\"password\": \"your new password\", \"token\": \"{}\"}}\n\n\
                 Please note that this is a one-time use token and it will expire in 45 minutes.\n",
                field("passwordResetToken")?,
            ),
        };
        Ok(body)
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipient: &str, template: Template, data: Value) -> Result<(), BoxError>;
}

/// 只把渲染后的邮件写进日志，不做真实投递
pub struct LogMailer {
    sender: String,
}

impl LogMailer {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, recipient: &str, template: Template, data: Value) -> Result<(), BoxError> {
        let body = template.render(&data)?;
        tracing::info!(
            from = %self.sender,
            to = %recipient,
            subject = template.subject(),
            "Mail dispatched"
        );
        tracing::debug!(to = %recipient, "Mail body:\n{}", body);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub recipient: String,
    pub template: Template,
    pub data: Value,
}

/// 测试用：把邮件保存在内存里
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn last_for(&self, recipient: &str, template: Template) -> Option<SentMail> {
        self.sent()
            .into_iter()
            .rev()
            .find(|mail| mail.recipient == recipient && mail.template == template)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, recipient: &str, template: Template, data: Value) -> Result<(), BoxError> {
        template.render(&data)?;
        self.sent
            .lock()
            .map_err(|_| "mail log lock poisoned")?
            .push(SentMail {
                recipient: recipient.to_string(),
                template,
                data,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn welcome_renders_user_and_token() {
        let body = Template::UserWelcome
            .render(&json!({"userID": 7, "activationToken": "ABCDEFGHIJKLMNOPQRSTUVWXYZ"}))
            .unwrap();
        assert!(body.contains("user ID number is 7"));
        assert!(body.contains("{\"token\": \"ABCDEFGHIJKLMNOPQRSTUVWXYZ\"}"));
    }

    #[test]
    fn missing_field_fails_rendering() {
        assert!(Template::TokenPasswordReset.render(&json!({})).is_err());
    }

    #[tokio::test]
    async fn recording_mailer_keeps_messages() {
        let mailer = RecordingMailer::default();
        mailer
            .send(
                "a@example.com",
                Template::TokenActivation,
                json!({"activationToken": "X"}),
            )
            .await
            .unwrap();
        let mail = mailer.last_for("a@example.com", Template::TokenActivation).unwrap();
        assert_eq!(mail.data["activationToken"], "X");
        assert!(mailer.last_for("a@example.com", Template::UserWelcome).is_none());
    }
}
