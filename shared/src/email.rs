use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};

use crate::error::ApiError;
use crate::AppState;

/// Rendered message, kept separate from sending so it can be tested.
#[derive(Debug)]
pub struct EmailTemplate {
    pub subject: String,
    pub html: String,
    pub text: String,
}

const STYLE: &str = r#"
        body { font-family: Helvetica, Arial, sans-serif; line-height: 1.6; color: #333333; margin: 0; padding: 0; }
        .wrapper { max-width: 600px; margin: 0 auto; padding: 48px 20px; }
        .container { border: 1px solid #e5e5e5; padding: 48px 40px; }
        .logo { font-size: 24px; font-weight: 300; color: #2f6b2f; text-align: center; margin: 0 0 32px 0; }
        .title { font-size: 20px; font-weight: 300; margin: 0 0 24px 0; }
        .text { font-size: 15px; margin: 0 0 24px 0; }
        .button { display: inline-block; padding: 16px 24px; background: #2f6b2f; color: #ffffff; text-decoration: none; }
        .footer { margin-top: 40px; padding-top: 24px; border-top: 1px solid #e5e5e5; font-size: 13px; color: #666666; text-align: center; }
"#;

fn layout(title: &str, body_html: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <style>{}</style>
</head>
<body>
    <div class="wrapper">
        <div class="container">
            <h1 class="logo">FarmerAI</h1>
            <h2 class="title">{}</h2>
            {}
            <div class="footer">FarmerAI Community</div>
        </div>
    </div>
</body>
</html>"#,
        STYLE, title, body_html
    )
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn welcome_email(name: &str, email: &str, frontend_url: &str) -> EmailTemplate {
    let login_link = format!("{}/login", frontend_url.trim_end_matches('/'));
    let name_html = escape(name);

    let html = layout(
        "Welcome to the community",
        &format!(
            r#"<p class="text">Hi {}, your request to join the FarmerAI community has been approved.</p>
            <p class="text">A temporary password has been sent to {} in a separate email. Sign in and choose a new password to get started.</p>
            <p style="text-align: center;"><a href="{}" class="button">Sign in</a></p>"#,
            name_html,
            escape(email),
            login_link
        ),
    );

    let text = format!(
        "FarmerAI\n\nWelcome to the community\n\nHi {}, your request to join the FarmerAI community has been approved.\n\n\
         A temporary password has been sent to {} in a separate email. Sign in at {} and choose a new password to get started.",
        name, email, login_link
    );

    EmailTemplate {
        subject: "Your FarmerAI community request was approved".to_string(),
        html,
        text,
    }
}

pub fn rejection_email(name: &str, reason: Option<&str>) -> EmailTemplate {
    let reason = reason.map(str::trim).filter(|r| !r.is_empty());
    let reason_html = reason
        .map(|r| format!(r#"<p class="text">Reason: {}</p>"#, escape(r)))
        .unwrap_or_default();

    let html = layout(
        "About your community request",
        &format!(
            r#"<p class="text">Hi {}, thank you for your interest in the FarmerAI community. We are unable to approve your request at this time.</p>
            {}
            <p class="text">You are welcome to apply again later.</p>"#,
            escape(name),
            reason_html
        ),
    );

    let mut text = format!(
        "FarmerAI\n\nAbout your community request\n\nHi {}, thank you for your interest in the FarmerAI community. \
         We are unable to approve your request at this time.\n\n",
        name
    );
    if let Some(r) = reason {
        text.push_str(&format!("Reason: {}\n\n", r));
    }
    text.push_str("You are welcome to apply again later.");

    EmailTemplate {
        subject: "Update on your FarmerAI community request".to_string(),
        html,
        text,
    }
}

fn content(data: String, what: &str) -> Result<Content, ApiError> {
    Content::builder()
        .data(data)
        .charset("UTF-8")
        .build()
        .map_err(|e| ApiError::internal(&format!("Failed to build {}", what), e))
}

/// Send a rendered email through SES from the configured sender.
pub async fn send_email(
    state: &AppState,
    to_email: &str,
    template: EmailTemplate,
) -> Result<(), ApiError> {
    let destination = Destination::builder().to_addresses(to_email).build();

    let body = Body::builder()
        .html(content(template.html, "HTML content")?)
        .text(content(template.text, "text content")?)
        .build();

    let message = Message::builder()
        .subject(content(template.subject, "subject")?)
        .body(body)
        .build();

    state
        .ses_client
        .send_email()
        .from_email_address(&state.config.sender_email)
        .destination(destination)
        .content(EmailContent::builder().simple(message).build())
        .send()
        .await
        .map_err(|e| ApiError::internal("Failed to send email", e))?;

    tracing::info!("Sent email to {}", to_email);
    Ok(())
}
