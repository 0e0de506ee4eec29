//! Approval request email body.

use coa_core::Certificate;
use time::OffsetDateTime;

use crate::links::ApprovalLinks;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub html: String,
}

/// Render the approval request sent to the designated approver.
pub fn render_approval_email(
    certificate: &Certificate,
    links: &ApprovalLinks,
    expires_at: OffsetDateTime,
) -> EmailMessage {
    let subject = format!(
        "Certificate approval required: {} ({})",
        certificate.reference_no, certificate.batch_no
    );

    let expires = expires_at
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string());

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: sans-serif; color: #222;">
  <h2>Certificate of Analysis awaiting approval</h2>
  <table cellpadding="4">
    <tr><td><strong>Reference</strong></td><td>{reference}</td></tr>
    <tr><td><strong>Product</strong></td><td>{product}</td></tr>
    <tr><td><strong>Batch</strong></td><td>{batch}</td></tr>
    <tr><td><strong>Certificate</strong></td><td>{id}</td></tr>
  </table>
  <p>
    <a href="{approve}" style="background:#2e7d32;color:#fff;padding:8px 16px;text-decoration:none;">Approve</a>
    &nbsp;
    <a href="{reject}" style="background:#c62828;color:#fff;padding:8px 16px;text-decoration:none;">Reject</a>
  </p>
  <p><a href="{preview}">Preview the certificate</a></p>
  <p style="font-size: 12px; color: #666;">These links expire at {expires}. Each link can decide the certificate once.</p>
</body>
</html>
"#,
        reference = escape_html(&certificate.reference_no),
        product = escape_html(&certificate.product_name),
        batch = escape_html(&certificate.batch_no),
        id = escape_html(&certificate.id),
        approve = escape_html(&links.approve),
        reject = escape_html(&links.reject),
        preview = escape_html(&links.preview),
        expires = expires,
    );

    EmailMessage { subject, html }
}

/// Escape text for an HTML element or double-quoted attribute.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
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
    use coa_core::CertificateStatus;
    use time::macros::datetime;

    #[test]
    fn escapes_certificate_fields_and_links() {
        let cert = Certificate {
            id: "C1".to_string(),
            reference_no: "REF<1>".to_string(),
            product_name: "Seal \"A\"".to_string(),
            batch_no: "B&1".to_string(),
            status: CertificateStatus::AwaitingAuthentication,
            approved_by: None,
            approved_at: None,
            approved_via: None,
            rejected_by: None,
            rejected_at: None,
            rejected_via: None,
            rejection_reason: None,
            results: serde_json::Value::Null,
            created_at: datetime!(2025-01-01 00:00 UTC),
        };
        let links = ApprovalLinks::new("https://lab.example.com", "tok", "C1").unwrap();
        let msg = render_approval_email(&cert, &links, datetime!(2025-01-02 00:00 UTC));

        assert_eq!(msg.subject, "Certificate approval required: REF<1> (B&1)");
        assert!(msg.html.contains("REF&lt;1&gt;"));
        assert!(msg.html.contains("Seal &quot;A&quot;"));
        assert!(msg.html.contains("approve?token=tok&amp;certificateId=C1"));
        assert!(msg.html.contains("2025-01-02T00:00:00Z"));
    }
}
