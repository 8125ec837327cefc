//! Wire messages and the codecs that frame them.

pub mod epp;
pub mod http;
pub mod xml;

use crate::error::ProberError;
use crate::protocol::CodecKind;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

pub use self::epp::{EppCodec, EppCommand, EppRequest, EppResponse};
pub use self::http::{HttpCodec, HttpRequest, HttpResponse};

/// A message the prober writes.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Http(HttpRequest),
    Epp(EppRequest),
}

impl OutboundMessage {
    /// Whether the step only reads (the EPP hello step).
    pub fn writes_nothing(&self) -> bool {
        matches!(self, OutboundMessage::Epp(request) if request.command().writes_nothing())
    }

    /// Short human-readable name used in logs.
    pub fn describe(&self) -> String {
        match self {
            OutboundMessage::Http(request) => format!("{} {}", request.method(), request.path()),
            OutboundMessage::Epp(request) => format!("epp {}", request.command()),
        }
    }
}

/// A message the prober reads back.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Http(HttpResponse),
    Epp(EppResponse),
}

/// The codec installed on a connection, chosen by the protocol's codec layer.
#[derive(Debug, Clone)]
pub enum MessageCodec {
    Http(HttpCodec),
    Epp(EppCodec),
}

impl MessageCodec {
    pub fn for_kind(kind: CodecKind) -> Self {
        match kind {
            CodecKind::Http => MessageCodec::Http(HttpCodec::new()),
            CodecKind::Epp => MessageCodec::Epp(EppCodec::new()),
        }
    }

    pub fn kind(&self) -> CodecKind {
        match self {
            MessageCodec::Http(_) => CodecKind::Http,
            MessageCodec::Epp(_) => CodecKind::Epp,
        }
    }
}

impl Decoder for MessageCodec {
    type Item = InboundMessage;
    type Error = ProberError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            MessageCodec::Http(codec) => Ok(codec.decode(src)?.map(InboundMessage::Http)),
            MessageCodec::Epp(codec) => Ok(codec.decode(src)?.map(InboundMessage::Epp)),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            MessageCodec::Http(codec) => Ok(codec.decode_eof(src)?.map(InboundMessage::Http)),
            MessageCodec::Epp(codec) => Ok(codec.decode_eof(src)?.map(InboundMessage::Epp)),
        }
    }
}

impl Encoder<OutboundMessage> for MessageCodec {
    type Error = ProberError;

    fn encode(&mut self, item: OutboundMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match (self, item) {
            (MessageCodec::Http(codec), OutboundMessage::Http(request)) => {
                codec.encode(request, dst)
            }
            (MessageCodec::Epp(codec), OutboundMessage::Epp(request)) => codec.encode(request, dst),
            (codec, item) => Err(ProberError::internal(format!(
                "Cannot write {} on a {:?} connection",
                item.describe(),
                codec.kind()
            ))),
        }
    }
}
