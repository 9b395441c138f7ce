//! Transcript-recording command transport
//!
//! Every exchange, success or fault, is appended to the session
//! transcript. Faults never propagate: the caller sees an empty response
//! with status `0000` and the probing sequence keeps going.

use std::time::Instant;

use pcsc::{Card, MAX_BUFFER_SIZE};
use serde::Serialize;
use tracing::{debug, warn};

use crate::apdu::ApduResponse;
use crate::error::ChannelError;

/// One recorded command/response round trip. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApduExchange {
    /// Command bytes as uppercase hex
    pub command: String,
    /// Response bytes (without status word) as uppercase hex
    pub response: String,
    /// Status word, `0000` for an absorbed fault
    pub status: String,
    /// Wall-clock time the exchange took
    pub time_ms: u64,
    /// Human label describing the step
    pub label: String,
}

/// Raw byte channel to a physically connected card.
///
/// The production implementation wraps a PC/SC card handle; tests script
/// canned response sequences against the same trait.
pub trait CardChannel {
    /// Exchange one raw command, returning the full response including the
    /// trailing status word.
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, ChannelError>;

    /// Answer To Reset of the connected card.
    fn atr(&mut self) -> Result<Vec<u8>, ChannelError>;
}

/// PC/SC-backed channel. Disconnects when dropped.
pub struct PcscChannel {
    card: Card,
}

impl PcscChannel {
    pub fn new(card: Card) -> Self {
        Self { card }
    }
}

impl CardChannel for PcscChannel {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let mut rapdu_buf = [0; MAX_BUFFER_SIZE];
        let rapdu = self.card.transmit(command, &mut rapdu_buf)?;
        Ok(rapdu.to_vec())
    }

    fn atr(&mut self) -> Result<Vec<u8>, ChannelError> {
        let atr = self
            .card
            .get_attribute_owned(pcsc::Attribute::AtrString)?;
        Ok(atr)
    }
}

/// Transport over an arbitrary channel, recording every exchange.
pub struct Transport {
    channel: Box<dyn CardChannel>,
    transcript: Vec<ApduExchange>,
}

impl Transport {
    pub fn new(channel: Box<dyn CardChannel>) -> Self {
        Self {
            channel,
            transcript: Vec::new(),
        }
    }

    /// Send a raw command and return its response.
    ///
    /// A channel fault, or a response too short to carry a status word, is
    /// folded into an empty `0000` response so a single bad exchange never
    /// aborts a multi-step probing sequence.
    pub fn send(&mut self, apdu: &[u8], label: &str) -> ApduResponse {
        let started = Instant::now();
        let outcome = self.channel.transmit(apdu).and_then(|rapdu| {
            if rapdu.len() < 2 {
                Err(ChannelError::Truncated)
            } else {
                Ok(rapdu)
            }
        });
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let response = match outcome {
            Ok(rapdu) => {
                let (data, sw) = rapdu.split_at(rapdu.len() - 2);
                ApduResponse {
                    data: data.to_vec(),
                    sw1: sw[0],
                    sw2: sw[1],
                }
            }
            Err(err) => {
                warn!("{label}: exchange fault: {err}");
                ApduResponse::fault()
            }
        };

        debug!("{label}: status {}", response.status_string());

        self.transcript.push(ApduExchange {
            command: hex::encode_upper(apdu),
            response: hex::encode_upper(&response.data),
            status: response.status_string(),
            time_ms: elapsed_ms,
            label: label.to_string(),
        });

        response
    }

    /// ATR of the connected card, if the reader can produce one.
    pub fn atr(&mut self) -> Option<Vec<u8>> {
        match self.channel.atr() {
            Ok(atr) => Some(atr),
            Err(err) => {
                warn!("ATR unavailable: {err}");
                None
            }
        }
    }

    pub fn transcript(&self) -> &[ApduExchange] {
        &self.transcript
    }

    pub fn into_transcript(self) -> Vec<ApduExchange> {
        self.transcript
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::Outcome;
    use crate::testing::ScriptedChannel;

    #[test]
    fn success_is_recorded_with_status() {
        let channel = ScriptedChannel::new().respond(&[0x00, 0xA4], &[0xAB, 0x90, 0x00]);
        let mut transport = Transport::new(Box::new(channel));

        let resp = transport.send(&[0x00, 0xA4], "SELECT test");
        assert_eq!(resp.data, vec![0xAB]);
        assert_eq!(resp.outcome(), Outcome::Success);

        let transcript = transport.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].command, "00A4");
        assert_eq!(transcript[0].response, "AB");
        assert_eq!(transcript[0].status, "9000");
        assert_eq!(transcript[0].label, "SELECT test");
    }

    #[test]
    fn fault_becomes_zero_status_and_is_recorded() {
        let channel = ScriptedChannel::new().fail_on(&[0x80, 0xA8]);
        let mut transport = Transport::new(Box::new(channel));

        let resp = transport.send(&[0x80, 0xA8], "GPO");
        assert!(resp.data.is_empty());
        assert_eq!(resp.outcome(), Outcome::Fault);
        assert_eq!(transport.transcript()[0].status, "0000");
    }

    #[test]
    fn truncated_response_is_a_fault() {
        let channel = ScriptedChannel::new().respond(&[0x00], &[0x90]);
        let mut transport = Transport::new(Box::new(channel));

        let resp = transport.send(&[0x00], "short");
        assert_eq!(resp.outcome(), Outcome::Fault);
    }

    #[test]
    fn transcript_keeps_exchange_order() {
        let channel = ScriptedChannel::new()
            .respond(&[0x01], &[0x90, 0x00])
            .respond(&[0x02], &[0x6A, 0x82]);
        let mut transport = Transport::new(Box::new(channel));

        transport.send(&[0x01], "first");
        transport.send(&[0x02], "second");

        let labels: Vec<_> = transport
            .into_transcript()
            .into_iter()
            .map(|e| e.label)
            .collect();
        assert_eq!(labels, vec!["first", "second"]);
    }
}
