//! EMV data extraction for a selected application
//!
//! Runs GET PROCESSING OPTIONS (with a fixed ladder of fallback variants),
//! reads the records the AFL points at, then widens the net with direct
//! GET DATA queries and an exhaustive SFI/record sweep. Tag recognition is
//! a hex-substring scan by default: it deliberately trades TLV precision
//! for recall on non-compliant cards.

use std::collections::BTreeMap;

use cardprobe_common::{
    decode_cardholder, find_tag, format_expiry, mask_pan, EMV_TAGS,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::apdu::commands;
use crate::discovery::ApplicationCandidate;
use crate::transport::Transport;

/// Tags worth a direct GET DATA query, for cards that expose data objects
/// but refuse record reads.
const DIRECT_TAGS: &[&str] = &["9F36", "9F13", "9F17", "9F4D", "5A", "5F24", "5F20"];

/// Exhaustive fallback sweep bounds: SFI 1..=31, record 1..=5.
const SWEEP_MAX_SFI: u8 = 31;
const SWEEP_MAX_RECORD: u8 = 5;

/// How record bytes are searched for known tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Hex-substring search with one-byte length parsing. Finds tags
    /// anywhere a matching byte pattern occurs, including inside unrelated
    /// fields. Trades precision for recall on off-spec cards.
    #[default]
    Lossy,
    /// Strict recursive TLV walk. More precise, less forgiving of
    /// non-compliant cards; never silently substituted for the lossy scan.
    Strict,
}

/// Semantic keys extracted for one AID. Grows monotonically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExtractionResult {
    fields: BTreeMap<String, String>,
}

impl ExtractionResult {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Locate the AFL (tag 94) in a GPO response by raw byte scan.
///
/// Not a TLV walk on purpose: format 1 and format 2 responses, and plenty
/// of off-spec cards, are all covered by just finding the tag byte. A
/// declared length running past the buffer discards the field.
fn locate_afl(gpo: &[u8]) -> Option<&[u8]> {
    for i in 0..gpo.len().saturating_sub(1) {
        if gpo[i] == 0x94 {
            let length = gpo[i + 1] as usize;
            let start = i + 2;
            if start + length > gpo.len() {
                return None;
            }
            return Some(&gpo[start..start + length]);
        }
    }
    None
}

/// Store one recognized tag value, applying field-specific decoding.
fn store_tag_value(tag: &str, value: &str, result: &mut ExtractionResult) {
    match tag {
        "5A" => {
            if let Some(masked) = mask_pan(value) {
                result.insert("pan", masked);
                // Equality hash only, never the raw value.
                let digest = Sha256::digest(value.as_bytes());
                result.insert("pan_hash", hex::encode(digest));
            }
        }
        "5F24" => {
            if value.len() == 6 {
                result.insert("expiry", format_expiry(value));
            }
        }
        "5F20" => {
            result.insert("cardholder", decode_cardholder(value));
        }
        _ => {
            result.insert(format!("tag_{tag}"), value);
        }
    }
}

/// Substring-based tag scan over the hex text of a record.
///
/// For every known tag, the first occurrence of its hex text is taken as a
/// tag position, the next two characters as a one-byte length, and that
/// many value characters extracted when they fit. Out-of-range fields are
/// discarded, not clamped.
pub fn parse_emv_tags(data: &[u8], result: &mut ExtractionResult) {
    let data_hex = hex::encode_upper(data);

    for (tag, _) in EMV_TAGS {
        let Some(idx) = data_hex.find(tag) else {
            continue;
        };
        let after_tag = idx + tag.len();
        if after_tag + 2 >= data_hex.len() {
            continue;
        }
        let Ok(length) = usize::from_str_radix(&data_hex[after_tag..after_tag + 2], 16)
        else {
            continue;
        };

        let value_start = after_tag + 2;
        let value_end = value_start + length * 2;
        if value_end <= data_hex.len() {
            store_tag_value(tag, &data_hex[value_start..value_end], result);
        }
    }
}

/// Strict-mode counterpart: a real TLV walk per known tag, descending into
/// a 70 record template when present.
pub fn parse_emv_tags_strict(data: &[u8], result: &mut ExtractionResult) {
    let search_data = find_tag(data, &[0x70]).unwrap_or(data);

    for (tag, _) in EMV_TAGS {
        let Ok(tag_bytes) = hex::decode(tag) else {
            continue;
        };
        if let Some(value) = find_tag(search_data, &tag_bytes) {
            store_tag_value(tag, &hex::encode_upper(value), result);
        }
    }
}

/// Extraction pass for one candidate application over one transport.
pub struct EmvExtractor<'t> {
    transport: &'t mut Transport,
    mode: ScanMode,
}

impl<'t> EmvExtractor<'t> {
    pub fn new(transport: &'t mut Transport) -> Self {
        Self {
            transport,
            mode: ScanMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    fn parse_record(&self, data: &[u8], result: &mut ExtractionResult) {
        match self.mode {
            ScanMode::Lossy => parse_emv_tags(data, result),
            ScanMode::Strict => parse_emv_tags_strict(data, result),
        }
    }

    /// Re-issue SELECT for the candidate's AID.
    pub fn select_application(&mut self, aid: &str) -> bool {
        let Ok(aid_bytes) = hex::decode(aid) else {
            return false;
        };
        let cmd = commands::select(&aid_bytes).build();
        self.transport
            .send(&cmd, &format!("SELECT AID {aid}"))
            .is_success()
    }

    /// GET PROCESSING OPTIONS with the fixed fallback ladder.
    ///
    /// Standard empty-PDOL template first, then the no-data variant, then
    /// the fixed-amount variant. First success wins.
    pub fn get_processing_options(&mut self, aid: &str) -> Option<Vec<u8>> {
        let standard = commands::get_processing_options(&[0x83, 0x00]).build();
        let resp = self.transport.send(&standard, &format!("GPO for {aid}"));
        if resp.is_success() {
            return Some(resp.data);
        }

        let variants: [Vec<u8>; 2] = [
            commands::get_processing_options(&[]).build(),
            commands::get_processing_options(&[0x83, 0x02, 0x00, 0x00]).build(),
        ];

        for variant in variants {
            let resp = self
                .transport
                .send(&variant, &format!("GPO variant for {aid}"));
            if resp.is_success() {
                return Some(resp.data);
            }
        }

        None
    }

    /// READ RECORD, returning data only on success.
    pub fn read_record(&mut self, sfi: u8, record_number: u8) -> Option<Vec<u8>> {
        let cmd = commands::read_record(record_number, sfi).build();
        let resp = self
            .transport
            .send(&cmd, &format!("READ RECORD SFI={sfi} Record={record_number}"));
        if resp.is_success() {
            Some(resp.data)
        } else {
            None
        }
    }

    /// Full extraction for one discovered candidate.
    pub fn extract(&mut self, candidate: &ApplicationCandidate) -> ExtractionResult {
        let mut result = ExtractionResult::default();

        info!("extracting EMV data for {}", candidate.brand);

        if !self.select_application(&candidate.aid) {
            return result;
        }

        if let Some(gpo) = self.get_processing_options(&candidate.aid) {
            result.insert("gpo_response", hex::encode_upper(&gpo));

            if let Some(afl) = locate_afl(&gpo) {
                result.insert("afl", hex::encode_upper(afl));
                let afl = afl.to_vec();

                // 4-byte groups: SFI in the top 5 bits, then an inclusive
                // first/last record range.
                for group in afl.chunks_exact(4) {
                    let sfi = (group[0] >> 3) & 0x1F;
                    let first = group[1];
                    let last = group[2];

                    for record_number in first..=last {
                        if let Some(data) = self.read_record(sfi, record_number) {
                            self.parse_record(&data, &mut result);
                        }
                    }
                }
            }
        }

        for tag in DIRECT_TAGS {
            self.get_data_direct(tag, &mut result);
        }

        self.exhaustive_record_sweep(&mut result);

        result
    }

    /// Direct GET DATA for one tag, stored under `direct_<TAG>`.
    ///
    /// The PAN tag is masked here too: the raw value must never enter the
    /// result map, whatever path it arrived by.
    fn get_data_direct(&mut self, tag: &str, result: &mut ExtractionResult) {
        let Ok(tag_bytes) = hex::decode(tag) else {
            return;
        };
        let cmd = commands::get_data(&tag_bytes).build();
        let resp = self.transport.send(&cmd, &format!("GET DATA {tag}"));

        if resp.is_success() && !resp.data.is_empty() {
            let value_hex = hex::encode_upper(&resp.data);
            let value = if tag == "5A" {
                mask_pan(&value_hex).unwrap_or(value_hex)
            } else {
                value_hex
            };
            result.insert(format!("direct_{tag}"), value);
        }
    }

    /// Read every SFI/record combination the AFL never mentioned.
    ///
    /// Wasteful but bounded (at most 155 exchanges), and recovers data on
    /// cards whose AFL is wrong or absent. Individual failures are never
    /// fatal.
    fn exhaustive_record_sweep(&mut self, result: &mut ExtractionResult) {
        debug!("exhaustive SFI sweep");
        for sfi in 1..=SWEEP_MAX_SFI {
            for record_number in 1..=SWEEP_MAX_RECORD {
                if let Some(data) = self.read_record(sfi, record_number) {
                    info!("SFI {sfi} record {record_number}: {} bytes", data.len());
                    self.parse_record(&data, result);
                }
            }
        }
    }
}
