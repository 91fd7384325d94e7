//! Encrypted key exchange — the one-shot negotiation that gates all
//! steady-state traffic when `encrypted_exchange` is configured.
//!
//! Staging request out, sealed session key back, codec rekeyed. The
//! request sits in the send queue until a peer actually attaches, so
//! this can be driven before the first connection exists.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use tether_core::message::{Message, MessageKind};

use crate::transport::{LinkError, LinkTransport};

pub(crate) async fn negotiate(link: &LinkTransport) -> Result<(), LinkError> {
    let pair = link.exchange.generate()?;
    tracing::info!(session_id = %pair.session_id(), "starting encrypted key exchange");

    link.send(&Message::KeyExchangeRequest {
        public_key: pair.public_key(),
        session_id: pair.session_id(),
    })
    .await?;

    let msg = link
        .inbound
        .recv(MessageKind::KeyExchangeResponse)
        .await
        .map_err(|_| {
            LinkError::Handshake("link lost before the key exchange response arrived".into())
        })?;
    let Message::KeyExchangeResponse {
        session_key,
        identity,
    } = msg
    else {
        return Err(LinkError::Protocol(
            "key-exchange waiter received a different message kind",
        ));
    };

    let sealed = BASE64
        .decode(session_key)
        .map_err(|e| LinkError::Handshake(format!("session key is not valid base64: {e}")))?;
    let key = pair.decrypt(&sealed)?;
    link.codec.install_key(&key)?;
    link.codec.set_identity(&identity);
    tracing::info!(identity, "key exchange complete, codec rekeyed");
    Ok(())
}
