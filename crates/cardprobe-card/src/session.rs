//! Session orchestration and the session record
//!
//! One session drives the full pipeline over a single card connection:
//! ATR, PSE/PPSE selection, AID brute force, per-candidate extraction,
//! and, when the card stays inscrutable, experimental probing and the
//! synthetic-identifier fallback. The SessionRecord is the sole artifact
//! handed to reporting and persistence collaborators.

use std::collections::BTreeMap;

use cardprobe_common::AidRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::discovery::{ApplicationCandidate, ApplicationDiscovery, FciFields};
use crate::error::ConnectError;
use crate::extract::{EmvExtractor, ExtractionResult, ScanMode};
use crate::probe::{ExperimentalProbe, Findings};
use crate::transport::{ApduExchange, CardChannel, Transport};

/// Complete record of one probing session.
#[derive(Debug, Serialize)]
pub struct SessionRecord {
    /// Operator-supplied card label
    pub card_label: String,
    pub timestamp: DateTime<Utc>,
    /// Whether a card connection was established at all
    pub connected: bool,
    /// Answer To Reset as uppercase hex
    pub atr: Option<String>,
    /// ATR historical bytes (everything after the first four bytes)
    pub historical_bytes: Option<String>,
    /// FCI of the PSE/PPSE when one was selectable
    pub pse: Option<FciFields>,
    /// Candidates in discovery order
    pub applications: Vec<ApplicationCandidate>,
    /// Extraction results keyed by AID
    pub emv_data: BTreeMap<String, ExtractionResult>,
    /// Experimental probe findings
    pub experimental: Findings,
    /// Low-assurance synthetic identifier, present only when the card was
    /// detected but no AID yielded usable payment data
    pub fallback_identifier: Option<String>,
    /// Non-fatal errors collected along the way
    pub errors: Vec<String>,
    /// Every APDU exchange of the session, in order
    pub transcript: Vec<ApduExchange>,
}

impl SessionRecord {
    fn empty(card_label: &str, connected: bool) -> Self {
        Self {
            card_label: card_label.to_string(),
            timestamp: Utc::now(),
            connected,
            atr: None,
            historical_bytes: None,
            pse: None,
            applications: Vec::new(),
            emv_data: BTreeMap::new(),
            experimental: Findings::new(),
            fallback_identifier: None,
            errors: Vec::new(),
            transcript: Vec::new(),
        }
    }

    /// Record for a session that never got a card connection.
    pub fn connection_failed(card_label: &str, err: &ConnectError) -> Self {
        let mut record = Self::empty(card_label, false);
        record.errors.push(err.to_string());
        record
    }
}

/// Session runner: the registry and scan mode are fixed configuration,
/// each `run` consumes one connected channel.
pub struct CardSession<'r> {
    registry: &'r AidRegistry,
    mode: ScanMode,
}

impl<'r> CardSession<'r> {
    pub fn new(registry: &'r AidRegistry) -> Self {
        Self {
            registry,
            mode: ScanMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    /// Run the full probing pipeline over one connected card.
    pub fn run(&self, channel: Box<dyn CardChannel>, card_label: &str) -> SessionRecord {
        let mut transport = Transport::new(channel);
        let mut record = SessionRecord::empty(card_label, true);

        info!("session start: {card_label}");

        match transport.atr() {
            Some(atr) => {
                record.atr = Some(hex::encode_upper(&atr));
                if atr.len() > 4 {
                    record.historical_bytes = Some(hex::encode_upper(&atr[4..]));
                }
            }
            None => record.errors.push("ATR unavailable".to_string()),
        }

        {
            let mut discovery = ApplicationDiscovery::new(&mut transport, self.registry);
            record.pse = discovery.select_pse();
            record.applications = discovery.brute_force();
        }
        if record.applications.is_empty() {
            warn!("no standard AIDs found");
        }

        for candidate in &record.applications {
            let result = EmvExtractor::new(&mut transport)
                .with_mode(self.mode)
                .extract(candidate);
            if !result.is_empty() {
                record.emv_data.insert(candidate.aid.clone(), result);
            }
        }

        let have_pan = record
            .emv_data
            .values()
            .any(|result| result.get("pan").is_some());

        if record.applications.is_empty() || !have_pan {
            let mut probe = ExperimentalProbe::new(&mut transport);
            let outcome = probe.run();

            if !have_pan {
                let mut observed: Vec<String> = record
                    .applications
                    .iter()
                    .map(|candidate| candidate.aid.clone())
                    .collect();
                observed.extend(outcome.observed_aids.iter().cloned());
                record.fallback_identifier = probe.fallback_identifier(&observed);
            }

            record.experimental = outcome.findings;
        }

        record.transcript = transport.into_transcript();
        info!(
            "session complete: {} candidate(s), {} exchange(s)",
            record.applications.len(),
            record.transcript.len()
        );
        record
    }
}
