//! Cardprobe Common - Shared EMV reference data and field decoders
//!
//! Holds the static configuration the probing engine consumes: the known
//! brand/AID registry, the EMV tag description table, and the pure decoding
//! helpers for sensitive or formatted fields. Nothing in here talks to a
//! reader.

/// Brand name paired with the AIDs known to belong to it.
///
/// Registry iteration order is significant: discovery emits candidates in
/// brand-major, AID-minor order, and callers rely on that being stable.
pub type AidRegistry = [(&'static str, &'static [&'static str])];

/// Known payment application identifiers, by brand.
pub const KNOWN_AIDS: &AidRegistry = &[
    ("Mastercard", &["A0000000041010", "A0000000043060", "A0000000046000"]),
    ("Maestro", &["A0000000043060", "A0000000046000"]),
    (
        "Visa",
        &[
            "A0000000031010",
            "A0000000032010",
            "A0000000032020",
            "A0000000038010",
            "A0000000039010",
        ],
    ),
    ("Visa Electron", &["A0000000032010", "A0000000032020"]),
    (
        "Girocard",
        &[
            "A0000003591010028001",
            "D27600002547410100",
            "A0000000593101001101",
            "A0000001211010",
            "A0000000596545410",
        ],
    ),
    ("PayPal", &["325041592E5359532E4444463031", "A0000000651010"]),
    ("Amex", &["A00000002501", "A000000025010402", "A000000025010801"]),
    (
        "UnionPay",
        &["A000000333010101", "A000000333010102", "A000000333010103"],
    ),
    ("JCB", &["A0000000651010"]),
    ("Discover", &["A0000001523010", "A0000003241010"]),
    ("EMV Test", &["A0000000421010", "A0000000422010", "A0000000423010"]),
];

/// EMV tags the extractor searches for, as uppercase hex text, with their
/// human-readable descriptions.
pub const EMV_TAGS: &[(&str, &str)] = &[
    ("5A", "Primary Account Number (PAN)"),
    ("5F24", "Application Expiration Date"),
    ("5F20", "Cardholder Name"),
    ("5F28", "Issuer Country Code"),
    ("5F2A", "Transaction Currency Code"),
    ("5F34", "Application PAN Sequence Number"),
    ("9F08", "Application Version Number"),
    ("9F0D", "Issuer Action Code - Default"),
    ("9F0E", "Issuer Action Code - Denial"),
    ("9F0F", "Issuer Action Code - Online"),
    ("9F10", "Issuer Application Data"),
    ("9F11", "Issuer Code Table Index"),
    ("9F12", "Application Preferred Name"),
    ("9F13", "Last Online ATC Register"),
    ("9F17", "PIN Try Counter"),
    ("9F36", "Application Transaction Counter"),
    ("9F4D", "Log Entry"),
    ("9F4F", "Log Format"),
    ("82", "Application Interchange Profile"),
    ("84", "Dedicated File (DF) Name"),
    ("87", "Application Priority Indicator"),
    ("94", "Application File Locator (AFL)"),
    ("95", "Terminal Verification Results"),
    ("9A", "Transaction Date"),
    ("9B", "Transaction Status Information"),
    ("9C", "Transaction Type"),
    ("9F02", "Amount, Authorized"),
    ("9F03", "Amount, Other"),
    ("9F26", "Application Cryptogram"),
    ("9F27", "Cryptogram Information Data"),
    ("9F37", "Unpredictable Number"),
];

/// Look up the description of a tag given as uppercase hex text.
pub fn tag_description(tag: &str) -> Option<&'static str> {
    EMV_TAGS
        .iter()
        .find(|(t, _)| *t == tag)
        .map(|(_, desc)| *desc)
}

/// Strict TLV walker: find `tag` at the top level of `data` and return its
/// value bytes.
///
/// Handles one- and two-byte tags and extended length encoding. This is the
/// precise counterpart to the lossy substring scan used during extraction;
/// it is offered for callers that want conformant parsing and never
/// replaces the recall-oriented scan.
pub fn find_tag<'a>(data: &'a [u8], tag: &[u8]) -> Option<&'a [u8]> {
    let mut i = 0;
    while i < data.len() {
        // A first tag byte with b5-b1 all set announces a second tag byte.
        let tag_len = if data[i] & 0x1F == 0x1F && i + 1 < data.len() {
            2
        } else {
            1
        };
        if i + tag_len >= data.len() {
            break;
        }

        let current = &data[i..i + tag_len];
        i += tag_len;

        let first_len_byte = data[i] as usize;
        i += 1;

        let value_len = if first_len_byte & 0x80 != 0 {
            let extra = first_len_byte & 0x7F;
            if i + extra > data.len() {
                break;
            }
            let mut n = 0usize;
            for &b in &data[i..i + extra] {
                n = (n << 8) | b as usize;
            }
            i += extra;
            n
        } else {
            first_len_byte
        };

        if current == tag {
            if i + value_len <= data.len() {
                return Some(&data[i..i + value_len]);
            }
            // Declared length runs past the buffer: discard, do not clamp.
            return None;
        }

        i += value_len;
    }
    None
}

/// Mask a PAN given as hex text: keep the first 6 and last 4 characters,
/// star out the middle. Values shorter than 8 characters are not masked.
pub fn mask_pan(pan_hex: &str) -> Option<String> {
    if pan_hex.len() < 8 {
        return None;
    }
    let stars = pan_hex.len().saturating_sub(10);
    Some(format!(
        "{}{}{}",
        &pan_hex[..6],
        "*".repeat(stars),
        &pan_hex[pan_hex.len() - 4..]
    ))
}

/// Reformat a YYMMDD expiry value as MM/YY. Anything that is not exactly
/// 6 characters is returned unchanged.
pub fn format_expiry(value: &str) -> String {
    if value.len() == 6 {
        format!("{}/{}", &value[2..4], &value[0..2])
    } else {
        value.to_string()
    }
}

/// Decode a cardholder name from hex text to trimmed ASCII, falling back
/// to the raw hex when the bytes do not decode cleanly.
pub fn decode_cardholder(value_hex: &str) -> String {
    match hex::decode(value_hex) {
        Ok(bytes) if bytes.is_ascii() => match String::from_utf8(bytes) {
            Ok(s) => s.trim().to_string(),
            Err(_) => value_hex.to_string(),
        },
        _ => value_hex.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_tag_single_byte() {
        let data = &[0x8F, 0x01, 0x05];
        assert_eq!(find_tag(data, &[0x8F]), Some(&[0x05][..]));
    }

    #[test]
    fn find_tag_two_byte() {
        let data = &[0x9F, 0x46, 0x02, 0xAB, 0xCD];
        assert_eq!(find_tag(data, &[0x9F, 0x46]), Some(&[0xAB, 0xCD][..]));
    }

    #[test]
    fn find_tag_missing() {
        assert_eq!(find_tag(&[0x8F, 0x01, 0x05], &[0x90]), None);
    }

    #[test]
    fn find_tag_nested_via_template() {
        let data = &[0x70, 0x04, 0x8F, 0x01, 0x05, 0xFF];
        let template = find_tag(data, &[0x70]).unwrap();
        assert_eq!(find_tag(template, &[0x8F]), Some(&[0x05][..]));
    }

    #[test]
    fn find_tag_overlong_length_discarded() {
        // Tag claims 4 value bytes but only 1 remains.
        let data = &[0x5A, 0x04, 0x11];
        assert_eq!(find_tag(data, &[0x5A]), None);
    }

    #[test]
    fn mask_pan_standard_length() {
        // 16-digit PAN as hex text: 6 kept + 6 stars + 4 kept.
        assert_eq!(
            mask_pan("4111111111111111").as_deref(),
            Some("411111******1111")
        );
    }

    #[test]
    fn mask_pan_length_ten_has_no_stars() {
        assert_eq!(mask_pan("4111111111").as_deref(), Some("4111111111"));
    }

    #[test]
    fn mask_pan_short_values_left_alone() {
        assert_eq!(mask_pan("4111111"), None);
    }

    #[test]
    fn expiry_yymmdd_to_mm_yy() {
        assert_eq!(format_expiry("251231"), "12/25");
    }

    #[test]
    fn expiry_odd_length_unchanged() {
        assert_eq!(format_expiry("2512"), "2512");
    }

    #[test]
    fn cardholder_decodes_and_trims() {
        let hex_text = hex::encode_upper(b"DOE/JOHN ");
        assert_eq!(decode_cardholder(&hex_text), "DOE/JOHN");
    }

    #[test]
    fn cardholder_falls_back_to_hex() {
        assert_eq!(decode_cardholder("FFFE"), "FFFE");
        assert_eq!(decode_cardholder("XYZ"), "XYZ");
    }

    #[test]
    fn registry_aids_use_uppercase_hex_digits() {
        // One Girocard entry is odd-length and cannot decode; discovery
        // skips such entries, so only the character set is checked here.
        for (brand, aids) in KNOWN_AIDS {
            for aid in *aids {
                assert!(
                    aid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()),
                    "{brand}: {aid}"
                );
            }
        }
    }

    #[test]
    fn tag_table_lookup() {
        assert_eq!(tag_description("5A"), Some("Primary Account Number (PAN)"));
        assert_eq!(tag_description("FFFF"), None);
    }
}
