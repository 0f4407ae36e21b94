//! Profile transfer over an established channel
//!
//! Two halves of one exchange:
//!
//! - the sender writes one encoded profile, then waits a bounded time for the
//!   `disconnect` acknowledgement so it does not close under the receiver's
//!   read
//! - the receiver reads until the decoder yields one profile, then writes the
//!   acknowledgement
//!
//! Failures are classified here into [`SessionError`]s; a session that was
//! cancelled always reports [`SessionError::Cancelled`].

use std::time::Duration;

use nearby_core::codec::{is_ack, ACK_TOKEN};
use nearby_core::{Channel, Profile, SessionConfig, SessionError, TransportError};
use tracing::{debug, warn};

use crate::session::SessionHandle;

fn classify(handle: &SessionHandle, peer: &str, err: &TransportError) -> SessionError {
    if handle.is_cancelled() {
        SessionError::Cancelled
    } else {
        SessionError::from_transport(err, peer, true)
    }
}

enum AckWait {
    Acked,
    PeerClosed,
    Failed(TransportError),
}

// ----------------------------------------------------------------------------
// Sender
// ----------------------------------------------------------------------------

/// Write `profile` and wait for the acknowledgement
pub async fn send_profile(
    channel: &dyn Channel,
    handle: &SessionHandle,
    profile: &Profile,
    config: &SessionConfig,
) -> Result<(), SessionError> {
    let peer = channel.remote().remote_id.clone();
    let payload = config
        .wire_format
        .encode(profile, config.max_frame_size)
        .map_err(|e| SessionError::DecodeFailed {
            peer_id: peer.clone(),
            reason: format!("local profile could not be encoded: {}", e),
        })?;

    channel
        .write(&payload)
        .await
        .map_err(|e| classify(handle, &peer, &e))?;
    debug!(session = %handle.id(), peer = %peer, bytes = payload.len(), "Profile sent");

    let wait = tokio::time::timeout(config.ack_timeout, wait_for_ack(channel, config)).await;
    match wait {
        Ok(AckWait::Acked) => {
            debug!(session = %handle.id(), peer = %peer, "Acknowledgement received");
            Ok(())
        }
        Ok(AckWait::PeerClosed) => {
            warn!(session = %handle.id(), peer = %peer, "Peer closed before acknowledging");
            Ok(())
        }
        Ok(AckWait::Failed(_)) if handle.is_cancelled() => Err(SessionError::Cancelled),
        Ok(AckWait::Failed(e)) => {
            warn!(session = %handle.id(), peer = %peer, "Acknowledgement read failed: {}", e);
            Ok(())
        }
        Err(_) => {
            warn!(
                session = %handle.id(),
                peer = %peer,
                "No acknowledgement within {:?}",
                config.ack_timeout
            );
            Ok(())
        }
    }
}

async fn wait_for_ack(channel: &dyn Channel, config: &SessionConfig) -> AckWait {
    let mut buf = vec![0u8; config.read_buffer_size.max(ACK_TOKEN.len())];
    let mut seen: Vec<u8> = Vec::new();
    loop {
        match channel.read(&mut buf).await {
            Ok(0) => return AckWait::PeerClosed,
            Ok(n) => {
                seen.extend_from_slice(&buf[..n]);
                if is_ack(&seen) {
                    return AckWait::Acked;
                }
                // Only a token split across reads needs the tail
                if seen.len() > ACK_TOKEN.len() {
                    seen.drain(..seen.len() - ACK_TOKEN.len());
                }
            }
            Err(e) => return AckWait::Failed(e),
        }
    }
}

// ----------------------------------------------------------------------------
// Receiver
// ----------------------------------------------------------------------------

/// Read until one complete profile has been decoded
pub async fn receive_profile(
    channel: &dyn Channel,
    handle: &SessionHandle,
    config: &SessionConfig,
) -> Result<Profile, SessionError> {
    let peer = channel.remote().remote_id.clone();
    let mut decoder = config.wire_format.decoder(config.max_frame_size);
    let mut buf = vec![0u8; config.read_buffer_size];

    loop {
        let n = channel
            .read(&mut buf)
            .await
            .map_err(|e| classify(handle, &peer, &e))?;

        if n == 0 {
            if handle.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            return Err(SessionError::ConnectionLost {
                peer_id: peer,
                reason: format!(
                    "peer closed with {} bytes of an incomplete record",
                    decoder.buffered()
                ),
            });
        }

        match decoder.push(&buf[..n]) {
            Ok(Some(profile)) => {
                debug!(session = %handle.id(), peer = %peer, "Profile decoded");
                return Ok(profile);
            }
            Ok(None) => continue,
            Err(e) => {
                return Err(SessionError::DecodeFailed {
                    peer_id: peer,
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// Write the acknowledgement, then linger so the sender can read it before
/// the channel goes away
pub async fn acknowledge(
    channel: &dyn Channel,
    handle: &SessionHandle,
    linger: Duration,
) -> Result<(), SessionError> {
    if let Err(e) = channel.write(ACK_TOKEN).await {
        if handle.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        // The profile already arrived
        warn!(session = %handle.id(), "Acknowledgement write failed: {}", e);
        return Ok(());
    }

    tokio::select! {
        _ = handle.cancelled() => Err(SessionError::Cancelled),
        _ = tokio::time::sleep(linger) => Ok(()),
    }
}
