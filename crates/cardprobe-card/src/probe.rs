//! Experimental probing strategies for difficult cards
//!
//! Everything in here is best-effort and independent: alternate SELECT
//! parameter semantics, card production life-cycle data, brand-family AID
//! sweeps with their own GPO templates, and the last-resort synthetic
//! identifier that guarantees every physically detected card yields some
//! identifier. Synthetic identifiers are low-assurance by construction and
//! callers must treat them so.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::apdu::commands;
use crate::transport::Transport;

/// Keyed findings produced by the probe.
pub type Findings = BTreeMap<String, String>;

/// Reference AID for the alternate-SELECT experiments.
const VISA_REFERENCE_AID: &str = "A0000000031010";

/// SELECT P1/P2 combinations covering "by name/first/next" semantics.
const SELECT_VARIANTS: &[(u8, u8, &str)] = &[
    (0x04, 0x00, "standard"),
    (0x04, 0x04, "by_name_next"),
    (0x00, 0x00, "by_id_first"),
    (0x02, 0x00, "by_id_next"),
];

/// Proprietary and alternate PayPal-family AIDs.
const PAYPAL_AIDS: &[&str] = &[
    "325041592E5359532E4444463031",
    "A0000006510100",
    "A0000000651010",
];

/// Visa product family AIDs.
const VISA_FAMILY: &[(&str, &str)] = &[
    ("visa_credit", "A0000000031010"),
    ("visa_debit", "A0000000032010"),
    ("visa_plus", "A0000000038010"),
    ("v_pay", "A0000000032020"),
    ("visa_interlink", "A0000000039010"),
];

/// GPO templates tried in fixed order during the Visa sweep. The last one
/// carries placeholder amount, country, TVR, currency, date, transaction
/// type and unpredictable number fields for cards that insist on a filled
/// PDOL.
const GPO_TEMPLATES: &[&[u8]] = &[
    &[0x80, 0xA8, 0x00, 0x00, 0x02, 0x83, 0x00],
    &[0x80, 0xA8, 0x00, 0x00, 0x00],
    &[
        0x80, 0xA8, 0x00, 0x00, 0x23, 0x83, 0x21, //
        0x00, 0x00, 0x00, 0x00, 0x00, 0x01, // amount, authorized
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // amount, other
        0x09, 0x78, // terminal country code
        0x00, 0x00, 0x00, 0x00, 0x00, // TVR
        0x09, 0x78, // transaction currency code
        0x24, 0x01, 0x25, // transaction date
        0x00, // transaction type
        0x12, 0x34, 0x56, 0x78, // unpredictable number
    ],
];

/// Brand family inferred from an AID prefix, for synthetic identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrandFamily {
    Visa,
    PayPal,
}

impl BrandFamily {
    /// Classify an AID hex string by its prefix.
    pub fn from_aid(aid: &str) -> Option<Self> {
        let aid = aid.to_ascii_uppercase();
        if aid.starts_with("A000000003") {
            Some(BrandFamily::Visa)
        } else if aid.starts_with("3250") || aid.starts_with("A000000065") {
            Some(BrandFamily::PayPal)
        } else {
            None
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            BrandFamily::Visa => "VISA",
            BrandFamily::PayPal => "PAYPAL",
        }
    }
}

/// First brand family recognizable among the observed AIDs.
pub fn infer_brand<'a, I>(observed_aids: I) -> Option<BrandFamily>
where
    I: IntoIterator<Item = &'a str>,
{
    observed_aids.into_iter().find_map(BrandFamily::from_aid)
}

/// Deterministic placeholder identifier for a detected-but-unreadable card.
///
/// Brand-derived prefix when one was observed, `UNREADABLE` otherwise, plus
/// the last 8 digits of the Unix timestamp.
pub fn synthetic_identifier(brand: Option<BrandFamily>, unix_secs: u64) -> String {
    let suffix = format!("{:08}", unix_secs % 100_000_000);
    match brand {
        Some(brand) => format!("{}_{}", brand.prefix(), suffix),
        None => format!("UNREADABLE_{}", suffix),
    }
}

/// Everything a probe run produced: keyed findings plus the AIDs whose
/// SELECT succeeded along the way (used for brand inference).
#[derive(Debug, Default)]
pub struct ProbeOutcome {
    pub findings: Findings,
    pub observed_aids: Vec<String>,
}

/// Experimental probe over one transport.
pub struct ExperimentalProbe<'t> {
    transport: &'t mut Transport,
}

impl<'t> ExperimentalProbe<'t> {
    pub fn new(transport: &'t mut Transport) -> Self {
        Self { transport }
    }

    /// Run every strategy. Each is individually best-effort; nothing here
    /// can fail the session.
    pub fn run(&mut self) -> ProbeOutcome {
        let mut outcome = ProbeOutcome::default();

        info!("starting experimental probing");
        self.select_variants(&mut outcome);
        self.cplc(&mut outcome);
        self.paypal_sweep(&mut outcome);
        self.visa_sweep(&mut outcome);

        outcome
    }

    /// Alternate SELECT parameter semantics against the reference AID.
    fn select_variants(&mut self, outcome: &mut ProbeOutcome) {
        let aid_bytes = match hex::decode(VISA_REFERENCE_AID) {
            Ok(bytes) => bytes,
            Err(_) => return,
        };

        for (p1, p2, name) in SELECT_VARIANTS {
            let cmd = commands::select_with_params(&aid_bytes, *p1, *p2).build();
            let resp = self
                .transport
                .send(&cmd, &format!("SELECT variant {name}"));

            if resp.is_success() {
                info!("SELECT variant {name} accepted");
                outcome
                    .findings
                    .insert(format!("select_{name}"), hex::encode_upper(&resp.data));
                outcome.observed_aids.push(VISA_REFERENCE_AID.to_string());
            }
        }
    }

    /// Card production life-cycle data (tag 9F7F).
    fn cplc(&mut self, outcome: &mut ProbeOutcome) {
        let cmd = commands::get_data(&[0x9F, 0x7F]).build();
        let resp = self.transport.send(&cmd, "GET CPLC DATA");
        if resp.is_success() {
            outcome
                .findings
                .insert("cplc".to_string(), hex::encode_upper(&resp.data));
        }
    }

    /// PayPal-family proprietary AIDs.
    fn paypal_sweep(&mut self, outcome: &mut ProbeOutcome) {
        for aid in PAYPAL_AIDS {
            let Ok(aid_bytes) = hex::decode(aid) else {
                continue;
            };
            let cmd = commands::select(&aid_bytes).build();
            let resp = self
                .transport
                .send(&cmd, &format!("PayPal probe {}...", &aid[..8]));

            if resp.is_success() {
                info!("PayPal AID found: {aid}");
                outcome.findings.insert(
                    format!("paypal_{}", &aid[..8]),
                    hex::encode_upper(&resp.data),
                );
                outcome.observed_aids.push((*aid).to_string());
            }
        }
    }

    /// Visa product family, with the brand-specific GPO template ladder.
    fn visa_sweep(&mut self, outcome: &mut ProbeOutcome) {
        for (name, aid) in VISA_FAMILY {
            let Ok(aid_bytes) = hex::decode(aid) else {
                continue;
            };
            let cmd = commands::select(&aid_bytes).le(0x00).build();
            let resp = self.transport.send(&cmd, &format!("Visa probe {name}"));

            if !resp.is_success() {
                debug!("{name}: {}", resp.status_string());
                continue;
            }

            info!("{name} recognized");
            outcome
                .findings
                .insert((*name).to_string(), hex::encode_upper(&resp.data));
            outcome.observed_aids.push((*aid).to_string());

            for (idx, template) in GPO_TEMPLATES.iter().enumerate() {
                let gpo = self
                    .transport
                    .send(template, &format!("GPO template {}", idx + 1));
                if gpo.is_success() {
                    outcome
                        .findings
                        .insert(format!("{name}_gpo"), hex::encode_upper(&gpo.data));
                    break;
                }
            }
        }
    }

    /// Last-resort identifier for a card that is physically present (an
    /// ATR is obtainable) but yielded no usable payment data.
    pub fn fallback_identifier(&mut self, observed_aids: &[String]) -> Option<String> {
        self.transport.atr()?;

        let brand = infer_brand(observed_aids.iter().map(String::as_str));
        let unix_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let id = synthetic_identifier(brand, unix_secs);
        info!("accepting unreadable card with synthetic identifier {id}");
        Some(id)
    }
}
