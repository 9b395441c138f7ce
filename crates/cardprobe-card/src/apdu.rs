//! APDU (Application Protocol Data Unit) command handling

/// Classified outcome of one APDU exchange.
///
/// `6A82` is an expected miss during AID discovery, not an error; a fault
/// is an exchange the transport absorbed (empty response, status `0000`);
/// everything else is an anomaly the caller may log but must not treat as
/// fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Status word 9000.
    Success,
    /// Status word 6A82 (file or application not found).
    NotFound,
    /// Transport fault recorded as status 0000.
    Fault,
    /// Any other status word.
    Other(u16),
}

/// APDU response containing data and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data (without status word)
    pub data: Vec<u8>,
    /// Status word SW1
    pub sw1: u8,
    /// Status word SW2
    pub sw2: u8,
}

impl ApduResponse {
    /// Check if the response indicates success (9000)
    pub fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Check for the expected-miss status 6A82
    pub fn is_not_found(&self) -> bool {
        self.sw1 == 0x6A && self.sw2 == 0x82
    }

    /// Get the full status word as a 16-bit value
    pub fn status_word(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Get status word as hex string (e.g., "9000")
    pub fn status_string(&self) -> String {
        format!("{:02X}{:02X}", self.sw1, self.sw2)
    }

    /// Classify the status word
    pub fn outcome(&self) -> Outcome {
        match self.status_word() {
            0x9000 => Outcome::Success,
            0x6A82 => Outcome::NotFound,
            0x0000 => Outcome::Fault,
            sw => Outcome::Other(sw),
        }
    }

    /// Placeholder response the transport substitutes for a faulted exchange
    pub fn fault() -> Self {
        Self {
            data: Vec::new(),
            sw1: 0x00,
            sw2: 0x00,
        }
    }
}

/// APDU command builder
pub struct ApduCommand {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
    le: Option<u8>,
}

impl ApduCommand {
    /// Create a new APDU command
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// Set command data
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Set expected response length
    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Build the APDU command bytes
    pub fn build(&self) -> Vec<u8> {
        let mut apdu = vec![self.cla, self.ins, self.p1, self.p2];

        if !self.data.is_empty() {
            apdu.push(self.data.len() as u8);
            apdu.extend_from_slice(&self.data);
        }

        if let Some(le) = self.le {
            apdu.push(le);
        }

        apdu
    }
}

/// Common EMV APDU commands
pub mod commands {
    use super::ApduCommand;

    /// SELECT by DF name (AID), default P1/P2
    pub fn select(aid: &[u8]) -> ApduCommand {
        ApduCommand::new(0x00, 0xA4, 0x04, 0x00).data(aid.to_vec())
    }

    /// SELECT with explicit P1/P2, for the alternate-semantics probing
    pub fn select_with_params(aid: &[u8], p1: u8, p2: u8) -> ApduCommand {
        ApduCommand::new(0x00, 0xA4, p1, p2).data(aid.to_vec())
    }

    /// GET PROCESSING OPTIONS with the given PDOL-related data
    pub fn get_processing_options(pdol_data: &[u8]) -> ApduCommand {
        let cmd = ApduCommand::new(0x80, 0xA8, 0x00, 0x00);
        if pdol_data.is_empty() {
            // No-data variant still carries a trailing zero byte.
            cmd.le(0x00)
        } else {
            cmd.data(pdol_data.to_vec())
        }
    }

    /// READ RECORD with the SFI encoded into P2
    pub fn read_record(record_number: u8, sfi: u8) -> ApduCommand {
        let p2 = (sfi << 3) | 0x04;
        ApduCommand::new(0x00, 0xB2, record_number, p2).le(0x00)
    }

    /// GET DATA for a one- or two-byte tag
    pub fn get_data(tag: &[u8]) -> ApduCommand {
        match tag {
            [t] => ApduCommand::new(0x80, 0xCA, *t, 0x00),
            [t1, t2] => ApduCommand::new(0x80, 0xCA, *t1, *t2).le(0x00),
            // Longer tags go in the data field.
            _ => ApduCommand::new(0x80, 0xCA, 0x00, 0x00)
                .data(tag.to_vec())
                .le(0x00),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_encodes_lc_and_aid() {
        let aid = [0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10];
        let apdu = commands::select(&aid).build();
        assert_eq!(
            apdu,
            vec![0x00, 0xA4, 0x04, 0x00, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10]
        );
    }

    #[test]
    fn gpo_empty_pdol() {
        let apdu = commands::get_processing_options(&[0x83, 0x00]).build();
        assert_eq!(apdu, vec![0x80, 0xA8, 0x00, 0x00, 0x02, 0x83, 0x00]);
    }

    #[test]
    fn gpo_no_data_variant() {
        let apdu = commands::get_processing_options(&[]).build();
        assert_eq!(apdu, vec![0x80, 0xA8, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn read_record_sfi_in_p2() {
        let apdu = commands::read_record(2, 1).build();
        assert_eq!(apdu, vec![0x00, 0xB2, 0x02, 0x0C, 0x00]);
    }

    #[test]
    fn get_data_tag_widths() {
        assert_eq!(
            commands::get_data(&[0x5A]).build(),
            vec![0x80, 0xCA, 0x5A, 0x00]
        );
        assert_eq!(
            commands::get_data(&[0x9F, 0x7F]).build(),
            vec![0x80, 0xCA, 0x9F, 0x7F, 0x00]
        );
    }

    #[test]
    fn outcome_classification() {
        let ok = ApduResponse { data: vec![], sw1: 0x90, sw2: 0x00 };
        let miss = ApduResponse { data: vec![], sw1: 0x6A, sw2: 0x82 };
        let odd = ApduResponse { data: vec![], sw1: 0x69, sw2: 0x85 };
        assert_eq!(ok.outcome(), Outcome::Success);
        assert_eq!(miss.outcome(), Outcome::NotFound);
        assert_eq!(ApduResponse::fault().outcome(), Outcome::Fault);
        assert_eq!(odd.outcome(), Outcome::Other(0x6985));
    }
}
