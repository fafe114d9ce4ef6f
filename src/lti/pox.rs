//! LTI 1.1 POX (Plain Old XML) outcome envelope construction and parsing.
//!
//! The envelope is written with a typed XML writer so sourced ids and score
//! values are always escaped; responses are parsed with a streaming reader
//! and reduced to the fields the outcome flow cares about.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::errors::OutcomeError;

const POX_NAMESPACE: &str = "http://www.imsglobal.org/services/ltiv1p1/xsd/imsoms_v1p0";

/// The three POX request bodies the outcome service understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoxRequestKind {
    ReplaceResult,
    ReadResult,
    DeleteResult,
}

impl PoxRequestKind {
    fn element_name(self) -> &'static str {
        match self {
            PoxRequestKind::ReplaceResult => "replaceResultRequest",
            PoxRequestKind::ReadResult => "readResultRequest",
            PoxRequestKind::DeleteResult => "deleteResultRequest",
        }
    }
}

/// Parsed POX response envelope
#[derive(Debug, Clone, Default)]
pub struct PoxResponse {
    /// `imsx_codeMajor` status value
    pub code_major: String,
    /// `imsx_description` text, when present
    pub description: Option<String>,
    /// `textString` result value, present on successful reads
    pub text_string: Option<String>,
}

impl PoxResponse {
    /// The platform reported the operation as successful
    pub fn is_success(&self) -> bool {
        self.code_major == "success"
    }
}

type WriteResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> WriteResult<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Build an `imsx_POXEnvelopeRequest` document.
///
/// `score` is included as a `result/resultScore` block only for writes;
/// reads and deletes carry a bare `resultRecord`.
pub fn build_envelope(
    kind: PoxRequestKind,
    sourced_id: &str,
    score: Option<&str>,
    message_id: &str,
) -> Result<String, OutcomeError> {
    build(kind, sourced_id, score, message_id)
        .map_err(|e| OutcomeError::Protocol(format!("POX envelope write failed: {}", e)))
}

fn build(
    kind: PoxRequestKind,
    sourced_id: &str,
    score: Option<&str>,
    message_id: &str,
) -> WriteResult<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut envelope = BytesStart::new("imsx_POXEnvelopeRequest");
    envelope.push_attribute(("xmlns", POX_NAMESPACE));
    writer.write_event(Event::Start(envelope))?;

    writer.write_event(Event::Start(BytesStart::new("imsx_POXHeader")))?;
    writer.write_event(Event::Start(BytesStart::new("imsx_POXRequestHeaderInfo")))?;
    write_text_element(&mut writer, "imsx_version", "V1.0")?;
    write_text_element(&mut writer, "imsx_messageIdentifier", message_id)?;
    writer.write_event(Event::End(BytesEnd::new("imsx_POXRequestHeaderInfo")))?;
    writer.write_event(Event::End(BytesEnd::new("imsx_POXHeader")))?;

    writer.write_event(Event::Start(BytesStart::new("imsx_POXBody")))?;
    writer.write_event(Event::Start(BytesStart::new(kind.element_name())))?;
    writer.write_event(Event::Start(BytesStart::new("resultRecord")))?;
    writer.write_event(Event::Start(BytesStart::new("sourcedGUID")))?;
    write_text_element(&mut writer, "sourcedId", sourced_id)?;
    writer.write_event(Event::End(BytesEnd::new("sourcedGUID")))?;
    if let Some(value) = score {
        writer.write_event(Event::Start(BytesStart::new("result")))?;
        writer.write_event(Event::Start(BytesStart::new("resultScore")))?;
        write_text_element(&mut writer, "language", "en-US")?;
        write_text_element(&mut writer, "textString", value)?;
        writer.write_event(Event::End(BytesEnd::new("resultScore")))?;
        writer.write_event(Event::End(BytesEnd::new("result")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("resultRecord")))?;
    writer.write_event(Event::End(BytesEnd::new(kind.element_name())))?;
    writer.write_event(Event::End(BytesEnd::new("imsx_POXBody")))?;

    writer.write_event(Event::End(BytesEnd::new("imsx_POXEnvelopeRequest")))?;

    Ok(String::from_utf8(writer.into_inner())?)
}

/// Parse a POX response body into its status and result fields.
///
/// Leading non-XML noise before the `<?xml` marker is discarded; a body with
/// no marker at all is a protocol error, never a partial success.
pub fn parse_response(body: &str) -> Result<PoxResponse, OutcomeError> {
    let xml = match body.find("<?xml") {
        Some(pos) => &body[pos..],
        None => {
            return Err(OutcomeError::Protocol(
                "Response body has no XML marker".to_string(),
            ));
        }
    };

    let mut reader = Reader::from_str(xml);

    let mut response = PoxResponse::default();
    let mut current: Vec<u8> = Vec::new();
    loop {
        match reader
            .read_event()
            .map_err(|e| OutcomeError::Protocol(format!("POX response parse failed: {}", e)))?
        {
            Event::Start(e) => current = e.local_name().as_ref().to_vec(),
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| OutcomeError::Protocol(format!("POX text decode failed: {}", e)))?
                    .trim()
                    .to_string();
                if text.is_empty() {
                    continue;
                }
                match current.as_slice() {
                    b"imsx_codeMajor" => response.code_major = text,
                    b"imsx_description" => response.description = Some(text),
                    b"textString" => response.text_string = Some(text),
                    _ => {}
                }
            }
            Event::End(_) => current.clear(),
            Event::Eof => break,
            _ => {}
        }
    }

    if response.code_major.is_empty() {
        return Err(OutcomeError::Protocol(
            "Response has no imsx_codeMajor status".to_string(),
        ));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_body(code_major: &str, text_string: Option<&str>) -> String {
        let result = text_string
            .map(|t| {
                format!(
                    "<result><resultScore><language>en-US</language><textString>{}</textString></resultScore></result>",
                    t
                )
            })
            .unwrap_or_default();
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <imsx_POXEnvelopeResponse xmlns=\"{}\">\n\
             <imsx_POXHeader><imsx_POXResponseHeaderInfo>\n\
             <imsx_version>V1.0</imsx_version>\n\
             <imsx_messageIdentifier>mid-1</imsx_messageIdentifier>\n\
             <imsx_statusInfo><imsx_codeMajor>{}</imsx_codeMajor>\n\
             <imsx_severity>status</imsx_severity>\n\
             <imsx_description>OK</imsx_description>\n\
             </imsx_statusInfo></imsx_POXResponseHeaderInfo></imsx_POXHeader>\n\
             <imsx_POXBody><readResultResponse>{}</readResultResponse></imsx_POXBody>\n\
             </imsx_POXEnvelopeResponse>",
            POX_NAMESPACE, code_major, result
        )
    }

    #[test]
    fn replace_request_carries_score_block() {
        let xml = build_envelope(
            PoxRequestKind::ReplaceResult,
            "srcid-1",
            Some("0.85"),
            "mid-1",
        )
        .unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<replaceResultRequest>"));
        assert!(xml.contains("<sourcedId>srcid-1</sourcedId>"));
        assert!(xml.contains("<textString>0.85</textString>"));
        assert!(xml.contains("<language>en-US</language>"));
        assert!(xml.contains("<imsx_messageIdentifier>mid-1</imsx_messageIdentifier>"));
    }

    #[test]
    fn read_and_delete_requests_omit_score() {
        for kind in [PoxRequestKind::ReadResult, PoxRequestKind::DeleteResult] {
            let xml = build_envelope(kind, "srcid-1", None, "mid-1").unwrap();
            assert!(!xml.contains("<result>"));
            assert!(!xml.contains("<textString>"));
        }
        let read = build_envelope(PoxRequestKind::ReadResult, "srcid-1", None, "mid-1").unwrap();
        assert!(read.contains("<readResultRequest>"));
    }

    #[test]
    fn score_values_are_escaped() {
        let xml = build_envelope(
            PoxRequestKind::ReplaceResult,
            "<evil&id>",
            Some("0.5"),
            "mid-1",
        )
        .unwrap();
        assert!(xml.contains("&lt;evil&amp;id&gt;"));
        assert!(!xml.contains("<evil&id>"));
    }

    #[test]
    fn success_response_parses() {
        let response = parse_response(&response_body("success", Some("0.85"))).unwrap();
        assert!(response.is_success());
        assert_eq!(response.text_string.as_deref(), Some("0.85"));
        assert_eq!(response.description.as_deref(), Some("OK"));
    }

    #[test]
    fn failure_response_is_not_success() {
        let response = parse_response(&response_body("failure", None)).unwrap();
        assert!(!response.is_success());
    }

    #[test]
    fn leading_noise_before_marker_is_skipped() {
        let body = format!("some servlet banner\n{}", response_body("success", None));
        let response = parse_response(&body).unwrap();
        assert!(response.is_success());
    }

    #[test]
    fn body_without_xml_marker_is_an_error() {
        assert!(matches!(
            parse_response("<html>not xml prolog</html>"),
            Err(OutcomeError::Protocol(_))
        ));
    }
}
