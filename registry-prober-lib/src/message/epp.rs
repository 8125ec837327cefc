//! EPP requests, responses and the length-prefixed frame codec.
//!
//! Each frame is a big-endian `u32` holding the total frame length
//! (header included) followed by the XML document.

use super::xml::{self, Selector};
use crate::error::ProberError;
use bytes::{Buf, BufMut, BytesMut};
use roxmltree::Document;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};

pub const HEADER_LEN: usize = 4;

/// Largest frame accepted from a server.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

pub const CLIENT_ID_KEY: &str = "//eppns:clID";
pub const CLIENT_PASSWORD_KEY: &str = "//eppns:pw";
pub const CLIENT_TRID_KEY: &str = "//eppns:clTRID";
pub const DOMAIN_KEY: &str = "//domainns:name";

/// The EPP commands the prober knows how to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EppCommand {
    Hello,
    Login,
    Logout,
    Check,
    ClaimsCheck,
    Create,
    Delete,
}

impl EppCommand {
    pub const ALL: [EppCommand; 7] = [
        EppCommand::Hello,
        EppCommand::Login,
        EppCommand::Logout,
        EppCommand::Check,
        EppCommand::ClaimsCheck,
        EppCommand::Create,
        EppCommand::Delete,
    ];

    /// Template name, which is also the file stem in a template directory.
    pub fn template_name(self) -> &'static str {
        match self {
            EppCommand::Hello => "hello",
            EppCommand::Login => "login",
            EppCommand::Logout => "logout",
            EppCommand::Check => "check",
            EppCommand::ClaimsCheck => "claimscheck",
            EppCommand::Create => "create",
            EppCommand::Delete => "delete",
        }
    }

    /// Whether the command addresses a domain name.
    pub fn uses_domain(self) -> bool {
        matches!(
            self,
            EppCommand::Check | EppCommand::ClaimsCheck | EppCommand::Create | EppCommand::Delete
        )
    }

    /// The hello step writes nothing and only waits for the greeting.
    pub fn writes_nothing(self) -> bool {
        self == EppCommand::Hello
    }
}

impl fmt::Display for EppCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.template_name())
    }
}

/// An EPP command built from a template.
///
/// The unrendered form holds the template and the fixed replacements
/// (credentials). [`EppRequest::render`] returns a copy carrying the
/// finished document and its client transaction id.
#[derive(Debug, Clone, PartialEq)]
pub struct EppRequest {
    command: EppCommand,
    template: Arc<str>,
    fixed: Vec<(Selector, String)>,
    document: Option<String>,
    cl_trid: Option<String>,
    domain: Option<String>,
}

impl EppRequest {
    pub fn new(command: EppCommand, template: Arc<str>) -> Self {
        Self {
            command,
            template,
            fixed: Vec::new(),
            document: None,
            cl_trid: None,
            domain: None,
        }
    }

    /// The hello "request", which is never written.
    pub fn hello() -> Self {
        Self::new(EppCommand::Hello, Arc::from(""))
    }

    /// Add a fixed replacement applied on every render.
    pub fn with_replacement(mut self, key: &str, value: &str) -> Result<Self, ProberError> {
        self.fixed.push((Selector::parse(key)?, value.to_string()));
        Ok(self)
    }

    /// Login credentials.
    pub fn with_credentials(self, client_id: &str, password: &str) -> Result<Self, ProberError> {
        self.with_replacement(CLIENT_ID_KEY, client_id)?
            .with_replacement(CLIENT_PASSWORD_KEY, password)
    }

    pub fn command(&self) -> EppCommand {
        self.command
    }

    pub fn cl_trid(&self) -> Option<&str> {
        self.cl_trid.as_deref()
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    /// Produce the rendered request for one transaction.
    pub fn render(&self, cl_trid: &str, domain: &str) -> Result<Self, ProberError> {
        if self.command.writes_nothing() {
            return Ok(self.clone());
        }

        let mut replacements = self.fixed.clone();
        if self.command.uses_domain() {
            replacements.push((Selector::parse(DOMAIN_KEY)?, domain.to_string()));
        }
        replacements.push((Selector::parse(CLIENT_TRID_KEY)?, cl_trid.to_string()));

        let document = xml::render_template(&self.template, &replacements)?;

        Ok(Self {
            document: Some(document),
            cl_trid: Some(cl_trid.to_string()),
            domain: self.command.uses_domain().then(|| domain.to_string()),
            ..self.clone()
        })
    }
}

/// A decoded EPP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EppResponse {
    xml: String,
}

impl EppResponse {
    pub fn new<S: Into<String>>(xml: S) -> Self {
        Self { xml: xml.into() }
    }

    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Parse the document; a parse failure fails the well-formedness assertion.
    pub fn parse(&self) -> Result<Document<'_>, ProberError> {
        Document::parse(&self.xml)
            .map_err(|e| ProberError::validation("well-formed XML", e.to_string()))
    }
}

/// Length-prefixed EPP frame codec.
#[derive(Debug, Clone)]
pub struct EppCodec {
    max_frame_len: usize,
}

impl EppCodec {
    pub fn new() -> Self {
        Self {
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

impl Default for EppCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EppCodec {
    type Item = EppResponse;
    type Error = ProberError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length < HEADER_LEN {
            return Err(ProberError::malformed(format!(
                "EPP frame length {} is shorter than its header",
                length
            )));
        }
        if length > self.max_frame_len {
            return Err(ProberError::malformed(format!(
                "EPP frame length {} exceeds limit of {} bytes",
                length, self.max_frame_len
            )));
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(length);
        frame.advance(HEADER_LEN);
        let xml = String::from_utf8(frame.to_vec())
            .map_err(|_| ProberError::malformed("EPP frame is not valid UTF-8"))?;

        Ok(Some(EppResponse::new(xml)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(ProberError::connection_closed(
                "peer closed the connection in the middle of an EPP frame",
            )),
        }
    }
}

impl Encoder<EppRequest> for EppCodec {
    type Error = ProberError;

    fn encode(&mut self, item: EppRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let document = item.document.ok_or_else(|| {
            ProberError::internal(format!(
                "EPP {} request was written before being rendered",
                item.command
            ))
        })?;

        let length = HEADER_LEN + document.len();
        let header = u32::try_from(length)
            .map_err(|_| ProberError::internal("EPP request is too large to frame"))?;

        dst.reserve(length);
        dst.put_u32(header);
        dst.put_slice(document.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<epp xmlns="urn:ietf:params:xml:ns:epp-1.0">
  <command>
    <login><clID>id</clID><pw>pw</pw></login>
    <clTRID>ABC-12345</clTRID>
  </command>
</epp>"#;

    fn frame(xml: &str) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32((xml.len() + HEADER_LEN) as u32);
        buf.put_slice(xml.as_bytes());
        buf
    }

    #[test]
    fn test_render_login() {
        let login = EppRequest::new(EppCommand::Login, Arc::from(LOGIN))
            .with_credentials("registrar", "secret")
            .unwrap();
        assert!(login.document().is_none());

        let rendered = login.render("trid-1", "ignored.example").unwrap();
        assert_eq!(rendered.cl_trid(), Some("trid-1"));
        assert_eq!(rendered.domain(), None);

        let document = rendered.document().unwrap();
        assert!(document.contains("<clID>registrar</clID>"));
        assert!(document.contains("<pw>secret</pw>"));
        assert!(document.contains("<clTRID>trid-1</clTRID>"));

        // The unrendered request is unchanged and can be rendered again.
        assert!(login.document().is_none());
        let again = login.render("trid-2", "x").unwrap();
        assert!(again.document().unwrap().contains("trid-2"));
    }

    #[test]
    fn test_render_domain_command_requires_placeholder() {
        let check = EppRequest::new(EppCommand::Check, Arc::from(LOGIN));
        let err = check.render("trid", "a.example").unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_hello_is_never_encoded() {
        let hello = EppRequest::hello().render("t", "d").unwrap();
        assert!(hello.command().writes_nothing());
        let err = EppCodec::new()
            .encode(hello, &mut BytesMut::new())
            .unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_encode_prefixes_total_length() {
        let request = EppRequest::new(EppCommand::Logout, Arc::from(LOGIN))
            .render("trid-9", "")
            .unwrap();
        let xml_len = request.document().unwrap().len();

        let mut dst = BytesMut::new();
        EppCodec::new().encode(request, &mut dst).unwrap();
        assert_eq!(dst.len(), xml_len + 4);
        assert_eq!(
            u32::from_be_bytes([dst[0], dst[1], dst[2], dst[3]]) as usize,
            xml_len + 4
        );
    }

    #[test]
    fn test_encoded_request_decodes_to_same_document() {
        let request = EppRequest::new(EppCommand::Login, Arc::from(LOGIN))
            .with_credentials("registrar", "secret")
            .unwrap()
            .render("trid-rt", "")
            .unwrap();
        let document = request.document().unwrap().to_string();

        let mut codec = EppCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(request, &mut buf).unwrap();
        assert_eq!(&buf[..4], &((document.len() + 4) as u32).to_be_bytes()[..]);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.xml(), document);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let full = frame("<epp/>");
        let mut codec = EppCodec::new();

        let mut partial = BytesMut::from(&full[..6]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[6..]);
        let response = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(response.xml(), "<epp/>");
        assert!(partial.is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_lengths() {
        let mut codec = EppCodec::new();

        let mut short = BytesMut::from(&[0u8, 0, 0, 3][..]);
        assert!(codec.decode(&mut short).unwrap_err().is_validation());

        let mut huge = BytesMut::new();
        huge.put_u32((MAX_FRAME_LEN + 1) as u32);
        assert!(codec.decode(&mut huge).unwrap_err().is_validation());
    }

    #[test]
    fn test_decode_eof_mid_frame() {
        let full = frame("<epp/>");
        let mut partial = BytesMut::from(&full[..7]);
        let err = EppCodec::new().decode_eof(&mut partial).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_unparseable_response_names_assertion() {
        let response = EppResponse::new("<epp><unclosed></epp>");
        let err = response.parse().unwrap_err();
        assert_eq!(err.assertion(), Some("well-formed XML"));
    }
}
