//! Scripted card channel for unit tests

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::ChannelError;
use crate::transport::CardChannel;

/// Append a success status word to a payload.
pub fn ok(data: &[u8]) -> Vec<u8> {
    let mut response = data.to_vec();
    response.extend_from_slice(&[0x90, 0x00]);
    response
}

/// Canned card: maps exact command bytes to queued responses.
///
/// Unmatched commands answer `6A82`, like real cards answering a SELECT
/// for an application they do not carry. The last queued response for a
/// command sticks, so replaying an identical probing sequence sees an
/// identical card.
pub struct ScriptedChannel {
    responses: HashMap<Vec<u8>, VecDeque<Vec<u8>>>,
    faults: HashSet<Vec<u8>>,
    atr: Option<Vec<u8>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            faults: HashSet::new(),
            atr: None,
        }
    }

    pub fn with_atr(mut self, atr: &[u8]) -> Self {
        self.atr = Some(atr.to_vec());
        self
    }

    /// Queue a full response (data plus status word) for a command.
    pub fn respond(mut self, command: &[u8], response: &[u8]) -> Self {
        self.responses
            .entry(command.to_vec())
            .or_default()
            .push_back(response.to_vec());
        self
    }

    /// Make a command fault at the channel level.
    pub fn fail_on(mut self, command: &[u8]) -> Self {
        self.faults.insert(command.to_vec());
        self
    }
}

impl CardChannel for ScriptedChannel {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, ChannelError> {
        if self.faults.contains(command) {
            return Err(ChannelError::Pcsc(pcsc::Error::ReaderUnavailable));
        }

        if let Some(queue) = self.responses.get_mut(command) {
            if queue.len() > 1 {
                if let Some(front) = queue.pop_front() {
                    return Ok(front);
                }
            }
            if let Some(front) = queue.front() {
                return Ok(front.clone());
            }
        }

        Ok(vec![0x6A, 0x82])
    }

    fn atr(&mut self) -> Result<Vec<u8>, ChannelError> {
        self.atr
            .clone()
            .ok_or(ChannelError::Pcsc(pcsc::Error::ReaderUnavailable))
    }
}
