//! Payment application discovery
//!
//! Selects the Payment System Environment (contact and contactless names)
//! and brute-forces the static AID registry. Discovery never aborts on a
//! bad exchange: a `6A82` is an expected miss, anything else unexpected is
//! logged and skipped.

use cardprobe_common::AidRegistry;
use serde::Serialize;
use tracing::{debug, info};

use crate::apdu::{commands, Outcome};
use crate::transport::Transport;

/// Contact PSE name.
pub const PSE_NAME: &[u8] = b"1PAY.SYS.DDF01";

/// Contactless (proximity) PSE name.
pub const PPSE_NAME: &[u8] = b"2PAY.SYS.DDF01";

/// Fields pulled out of a File Control Information response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FciFields {
    /// DF name (tag 84) as uppercase hex
    pub aid: Option<String>,
    /// Application label (tag 50), ASCII when it decodes, hex otherwise
    pub label: Option<String>,
    /// Application priority indicator (tag 87), first value byte
    pub priority: Option<u8>,
}

/// One application found during discovery. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationCandidate {
    /// Brand label from the registry
    pub brand: String,
    /// AID as uppercase even-length hex
    pub aid: String,
    /// Parsed FCI of the successful SELECT
    pub fci: FciFields,
}

/// Shallow FCI scan: one tag byte, one length byte, that many value bytes.
///
/// Deliberately does not descend into constructed templates and stops as
/// soon as a tag/length pair would overrun the buffer. The discovery
/// algorithm depends on this exact behavior; the strict walker in
/// `cardprobe-common` exists for callers that want more.
pub fn parse_fci(data: &[u8]) -> FciFields {
    let mut fci = FciFields::default();
    let mut i = 0;

    while i + 1 < data.len() {
        let tag = data[i];
        let length = data[i + 1] as usize;
        if i + 2 + length > data.len() {
            break;
        }
        let value = &data[i + 2..i + 2 + length];

        match tag {
            0x84 => fci.aid = Some(hex::encode_upper(value)),
            0x50 => {
                let label = if value.is_ascii() {
                    String::from_utf8_lossy(value).into_owned()
                } else {
                    hex::encode_upper(value)
                };
                fci.label = Some(label);
            }
            0x87 => fci.priority = value.first().copied(),
            _ => {}
        }

        i += 2 + length;
    }

    fci
}

/// Discovery pass over one transport, driven by a read-only registry.
pub struct ApplicationDiscovery<'t, 'r> {
    transport: &'t mut Transport,
    registry: &'r AidRegistry,
}

impl<'t, 'r> ApplicationDiscovery<'t, 'r> {
    pub fn new(transport: &'t mut Transport, registry: &'r AidRegistry) -> Self {
        Self {
            transport,
            registry,
        }
    }

    /// Try the contact PSE, then the contactless one.
    ///
    /// Returns the parsed FCI of whichever succeeded, `None` if neither
    /// did.
    pub fn select_pse(&mut self) -> Option<FciFields> {
        let pse = commands::select(PSE_NAME).build();
        let resp = self.transport.send(&pse, "SELECT PSE (1PAY.SYS.DDF01)");
        if resp.is_success() {
            info!("PSE found");
            return Some(parse_fci(&resp.data));
        }

        let ppse = commands::select(PPSE_NAME).build();
        let resp = self.transport.send(&ppse, "SELECT PPSE (2PAY.SYS.DDF01)");
        if resp.is_success() {
            info!("PPSE found (contactless)");
            return Some(parse_fci(&resp.data));
        }

        None
    }

    /// SELECT every AID in the registry, in registry order.
    ///
    /// `9000` yields a candidate, `6A82` is silently skipped, any other
    /// status is a logged anomaly. Duplicate AIDs across brands are kept.
    pub fn brute_force(&mut self) -> Vec<ApplicationCandidate> {
        let mut found = Vec::new();

        for (brand, aids) in self.registry {
            for aid in *aids {
                let Ok(aid_bytes) = hex::decode(aid) else {
                    debug!("{brand}: registry AID {aid} is not valid hex");
                    continue;
                };

                let cmd = commands::select(&aid_bytes).build();
                let resp = self.transport.send(&cmd, &format!("SELECT {brand} AID"));

                match resp.outcome() {
                    Outcome::Success => {
                        info!("{brand}: {aid}");
                        found.push(ApplicationCandidate {
                            brand: (*brand).to_string(),
                            aid: aid.to_ascii_uppercase(),
                            fci: parse_fci(&resp.data),
                        });
                    }
                    Outcome::NotFound => {}
                    Outcome::Fault => {}
                    Outcome::Other(sw) => {
                        debug!("{brand} ({aid}): {sw:04X}");
                    }
                }
            }
        }

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ok, ScriptedChannel};

    fn select_apdu(aid_hex: &str) -> Vec<u8> {
        commands::select(&hex::decode(aid_hex).unwrap()).build()
    }

    #[test]
    fn fci_stops_before_overrunning_field() {
        // 84/07 AID, 50/04 "VISA", then a pair claiming more than remains.
        let mut data = vec![0x84, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10];
        data.extend_from_slice(&[0x50, 0x04]);
        data.extend_from_slice(b"VISA");
        data.extend_from_slice(&[0x87, 0x10, 0x01]);

        let fci = parse_fci(&data);
        assert_eq!(fci.aid.as_deref(), Some("A0000000031010"));
        assert_eq!(fci.label.as_deref(), Some("VISA"));
        assert_eq!(fci.priority, None);
    }

    #[test]
    fn fci_non_ascii_label_falls_back_to_hex() {
        let data = [0x50, 0x02, 0xFF, 0xFE];
        let fci = parse_fci(&data);
        assert_eq!(fci.label.as_deref(), Some("FFFE"));
    }

    #[test]
    fn fci_priority_takes_first_byte() {
        let data = [0x87, 0x02, 0x01, 0x99];
        assert_eq!(parse_fci(&data).priority, Some(0x01));
    }

    #[test]
    fn brute_force_adds_one_candidate_per_hit() {
        let registry: &AidRegistry = &[
            ("Visa", &["A0000000031010", "A0000000032010"]),
            ("Mastercard", &["A0000000041010"]),
        ];

        let fci = [0x84, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10];
        let channel =
            ScriptedChannel::new().respond(&select_apdu("A0000000031010"), &ok(&fci));
        let mut transport = Transport::new(Box::new(channel));

        let candidates = ApplicationDiscovery::new(&mut transport, registry).brute_force();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].brand, "Visa");
        assert_eq!(candidates[0].aid, "A0000000031010");
        assert_eq!(candidates[0].fci.aid.as_deref(), Some("A0000000031010"));
    }

    #[test]
    fn anomalous_status_does_not_stop_the_scan() {
        let registry: &AidRegistry = &[
            ("Visa", &["A0000000031010"]),
            ("Mastercard", &["A0000000041010"]),
        ];

        // First AID answers an anomaly, second one hits.
        let channel = ScriptedChannel::new()
            .respond(&select_apdu("A0000000031010"), &[0x69, 0x85])
            .respond(&select_apdu("A0000000041010"), &ok(&[]));
        let mut transport = Transport::new(Box::new(channel));

        let candidates = ApplicationDiscovery::new(&mut transport, registry).brute_force();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].brand, "Mastercard");
    }

    #[test]
    fn discovery_is_idempotent_over_a_canned_card() {
        let registry: &AidRegistry = &[("Visa", &["A0000000031010"])];
        let fci = [0x50, 0x04, 0x56, 0x49, 0x53, 0x41];

        let run = || {
            let channel =
                ScriptedChannel::new().respond(&select_apdu("A0000000031010"), &ok(&fci));
            let mut transport = Transport::new(Box::new(channel));
            ApplicationDiscovery::new(&mut transport, registry).brute_force()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn pse_falls_back_to_contactless_name() {
        let ppse = commands::select(PPSE_NAME).build();
        let channel = ScriptedChannel::new().respond(&ppse, &ok(&[0x50, 0x02, 0x4F, 0x4B]));
        let mut transport = Transport::new(Box::new(channel));

        let fci = ApplicationDiscovery::new(&mut transport, cardprobe_common::KNOWN_AIDS)
            .select_pse();
        assert_eq!(fci.unwrap().label.as_deref(), Some("OK"));
        // Both PSE names were attempted.
        assert_eq!(transport.transcript().len(), 2);
    }
}
