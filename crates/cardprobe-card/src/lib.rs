//! Cardprobe Card - Card communication and EMV data extraction engine
//!
//! Probes a payment-card chip through a PC/SC reader: connection and retry
//! handling, transcript-recording APDU transport, AID discovery, EMV data
//! extraction, and the experimental strategies used when the standard flow
//! fails. Failures stay local to the operation that hit them, so a session
//! always produces a record even for non-compliant or unreadable cards.

pub mod apdu;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod probe;
pub mod reader;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use apdu::{ApduCommand, ApduResponse, Outcome};
pub use discovery::{ApplicationCandidate, ApplicationDiscovery, FciFields};
pub use error::{ChannelError, ConnectError};
pub use extract::{EmvExtractor, ExtractionResult, ScanMode};
pub use probe::{ExperimentalProbe, ProbeOutcome};
pub use reader::ReaderSession;
pub use session::{CardSession, SessionRecord};
pub use transport::{ApduExchange, CardChannel, PcscChannel, Transport};

/// Re-export commonly used types
pub use pcsc::{Card, Context, Error as PcscError};
