//! Best-effort PDF text extraction.
//!
//! The extractor panics on some malformed documents; extraction runs behind
//! `catch_unwind` so a bad attachment never takes down an ingest run.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::debug;

use grantline_core::{Error, Result};

use crate::evidence::parse_date_candidates_from_text;
use crate::fetcher::Fetcher;

/// Extract text from PDF bytes. Rejects non-PDF payloads up front.
pub fn extract_pdf_text(content: &[u8]) -> Result<String> {
    if content.len() < 4 || &content[0..4] != b"%PDF" {
        return Err(Error::Parse("not a PDF (missing %PDF header)".to_string()));
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(content)));

    match outcome {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(Error::Parse(format!("pdf text extraction failed: {}", e))),
        Err(_) => Err(Error::Parse("pdf parser panic".to_string())),
    }
}

/// Fetch a PDF and return its deadline candidates plus extracted text.
pub async fn extract_deadlines_from_pdf(
    fetcher: &dyn Fetcher,
    pdf_url: &str,
) -> Result<(Vec<String>, String)> {
    let doc = fetcher.fetch(pdf_url).await?;
    let text = extract_pdf_text(&doc.body)?;
    let deadlines = parse_date_candidates_from_text(&text.to_lowercase());

    debug!(
        subsystem = "ingest",
        component = "pdf",
        url = pdf_url,
        bytes = doc.body.len(),
        candidate_count = deadlines.len(),
        "Extracted PDF text"
    );

    Ok((deadlines, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_pdf_payloads() {
        let err = extract_pdf_text(b"<html>not a pdf</html>").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert!(extract_pdf_text(b"").is_err());
    }

    #[test]
    fn malformed_pdf_is_an_error_not_a_panic() {
        // Valid magic bytes, garbage body.
        let mut bytes = b"%PDF-1.7\n".to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        assert!(extract_pdf_text(&bytes).is_err());
    }
}
