//! Action URLs embedded in approval emails.

use serde::Serialize;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("invalid base URL '{url}': {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("base URL '{0}' cannot carry a path")]
    CannotBeABase(String),
}

/// The three links an approver receives for one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalLinks {
    /// `{base}/approve?token=…&certificateId=…`
    pub approve: String,
    /// `{base}/reject?token=…&certificateId=…`
    pub reject: String,
    /// `{base}/certificate-preview/{certificateId}?token=…`
    pub preview: String,
}

impl ApprovalLinks {
    pub fn new(base_url: &str, token: &str, certificate_id: &str) -> Result<Self, LinkError> {
        let base = parse_base_url(base_url)?;

        let action = |name: &str| -> Result<String, LinkError> {
            let mut url = with_segments(&base, &[name])?;
            url.query_pairs_mut()
                .append_pair("token", token)
                .append_pair("certificateId", certificate_id);
            Ok(url.into())
        };

        let mut preview = with_segments(&base, &["certificate-preview", certificate_id])?;
        preview.query_pairs_mut().append_pair("token", token);

        Ok(ApprovalLinks {
            approve: action("approve")?,
            reject: action("reject")?,
            preview: preview.into(),
        })
    }
}

/// The application's token-gated preview page for a certificate:
/// `{app_base}/certificates/{certificateId}/preview?token=…&mode=email`.
pub fn app_preview_url(app_base: &str, certificate_id: &str, token: &str) -> Result<String, LinkError> {
    let base = parse_base_url(app_base)?;
    let mut url = with_segments(&base, &["certificates", certificate_id, "preview"])?;
    url.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("mode", "email");
    Ok(url.into())
}

/// Parse and check a base URL once, e.g. at config load.
pub fn parse_base_url(base_url: &str) -> Result<Url, LinkError> {
    let url = Url::parse(base_url).map_err(|source| LinkError::InvalidBaseUrl {
        url: base_url.to_string(),
        source,
    })?;
    if url.cannot_be_a_base() {
        return Err(LinkError::CannotBeABase(base_url.to_string()));
    }
    Ok(url)
}

fn with_segments(base: &Url, segments: &[&str]) -> Result<Url, LinkError> {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| LinkError::CannotBeABase(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_links_from_root_base() {
        let links = ApprovalLinks::new("https://lab.example.com/", "abc-123", "C1").unwrap();
        assert_eq!(
            links.approve,
            "https://lab.example.com/approve?token=abc-123&certificateId=C1"
        );
        assert_eq!(
            links.reject,
            "https://lab.example.com/reject?token=abc-123&certificateId=C1"
        );
        assert_eq!(
            links.preview,
            "https://lab.example.com/certificate-preview/C1?token=abc-123"
        );
    }

    #[test]
    fn keeps_base_path_prefix() {
        let links = ApprovalLinks::new("https://lab.example.com/coa", "t", "C1").unwrap();
        assert_eq!(links.approve, "https://lab.example.com/coa/approve?token=t&certificateId=C1");
    }

    #[test]
    fn encodes_awkward_certificate_ids() {
        let links = ApprovalLinks::new("http://localhost:8080", "t", "C 1/&x").unwrap();
        assert!(links.approve.ends_with("certificateId=C+1%2F%26x"));
        assert!(links.preview.contains("/certificate-preview/C%201%2F&x?"));
    }

    #[test]
    fn preview_redirect_target() {
        let url = app_preview_url("https://app.example.com/lab/", "C1", "tok").unwrap();
        assert_eq!(
            url,
            "https://app.example.com/lab/certificates/C1/preview?token=tok&mode=email"
        );
    }

    #[test]
    fn rejects_bad_base() {
        assert!(matches!(
            ApprovalLinks::new("not a url", "t", "C1"),
            Err(LinkError::InvalidBaseUrl { .. })
        ));
        assert!(matches!(
            ApprovalLinks::new("mailto:qa@example.com", "t", "C1"),
            Err(LinkError::CannotBeABase(_))
        ));
    }
}
