//! PC/SC reader connection lifecycle
//!
//! Owns reader enumeration and the retry-with-backoff loop while waiting
//! for a card. The returned channel releases the connection when dropped,
//! so every exit path, including panics deeper in the pipeline, gives the
//! reader back.

use std::thread;
use std::time::Duration;

use pcsc::{Context, Protocols, Scope, ShareMode};
use tracing::{debug, info, warn};

use crate::error::ConnectError;
use crate::transport::PcscChannel;

/// Fixed backoff while waiting for a card to be presented.
const CARD_WAIT: Duration = Duration::from_secs(2);

/// Delay before the single retry of a non-card connect fault.
const FAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Reader session wrapper managing the PC/SC context
pub struct ReaderSession {
    context: Context,
}

impl ReaderSession {
    /// Establish a PC/SC context
    pub fn new() -> Result<Self, pcsc::Error> {
        let context = Context::establish(Scope::User)?;
        Ok(Self { context })
    }

    /// List all available card readers
    pub fn list_readers(&self) -> Result<Vec<String>, pcsc::Error> {
        let mut readers_buf = [0; 2048];
        let readers = self.context.list_readers(&mut readers_buf)?;

        Ok(readers
            .map(|r| r.to_str().unwrap_or("Unknown").to_string())
            .collect())
    }

    /// Connect to the first available reader, waiting for a card.
    ///
    /// Retries up to `max_retries` times with a fixed backoff while no card
    /// is present. Any other transport fault is retried once after a short
    /// delay before surfacing as `ConnectionFailed`.
    pub fn connect(&self, max_retries: u32) -> Result<PcscChannel, ConnectError> {
        let mut fault_retried = false;

        for attempt in 1..=max_retries {
            let mut readers_buf = [0; 2048];
            let mut readers = self
                .context
                .list_readers(&mut readers_buf)
                .map_err(ConnectError::ConnectionFailed)?;

            let Some(reader) = readers.next() else {
                return Err(ConnectError::NoReaderFound);
            };

            match self
                .context
                .connect(reader, ShareMode::Shared, Protocols::ANY)
            {
                Ok(card) => {
                    info!("card connected on {:?}", reader);
                    return Ok(PcscChannel::new(card));
                }
                Err(pcsc::Error::NoSmartcard) | Err(pcsc::Error::RemovedCard) => {
                    debug!("waiting for card (attempt {attempt}/{max_retries})");
                    thread::sleep(CARD_WAIT);
                }
                Err(err) if !fault_retried => {
                    warn!("connect fault, retrying once: {err}");
                    fault_retried = true;
                    thread::sleep(FAULT_RETRY_DELAY);
                }
                Err(err) => return Err(ConnectError::ConnectionFailed(err)),
            }
        }

        Err(ConnectError::NoCardPresented {
            attempts: max_retries,
        })
    }
}
