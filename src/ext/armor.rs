//! PEM-style text armor.
//!
//! ```text
//! -----BEGIN <LABEL>-----
//! <base64, 64 columns>
//! -----END <LABEL>-----
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{Error, Result};

const LINE_WIDTH: usize = 64;

/// One decoded armored block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmorBlock {
    pub label: String,
    pub data: Vec<u8>,
}

pub fn encode(label: &str, data: &[u8]) -> String {
    let b64 = STANDARD.encode(data);
    let mut out = String::with_capacity(b64.len() + b64.len() / LINE_WIDTH + 2 * label.len() + 32);
    out.push_str("-----BEGIN ");
    out.push_str(label);
    out.push_str("-----\n");
    for start in (0..b64.len()).step_by(LINE_WIDTH) {
        out.push_str(&b64[start..b64.len().min(start + LINE_WIDTH)]);
        out.push('\n');
    }
    out.push_str("-----END ");
    out.push_str(label);
    out.push_str("-----\n");
    out
}

/// Decode the first armored block in `text`.
pub fn decode(text: &str) -> Result<ArmorBlock> {
    decode_all(text)?
        .into_iter()
        .next()
        .ok_or(Error::Armor("no BEGIN line"))
}

/// Decode every armored block in `text`, in order. Text outside blocks is
/// ignored; a malformed block fails the whole call.
pub fn decode_all(text: &str) -> Result<Vec<ArmorBlock>> {
    let mut blocks = Vec::new();
    let mut lines = text.lines().map(str::trim);
    while let Some(line) = lines.next() {
        let Some(label) = line
            .strip_prefix("-----BEGIN ")
            .and_then(|l| l.strip_suffix("-----"))
        else {
            continue;
        };
        let end = format!("-----END {label}-----");
        let mut b64 = String::new();
        let mut closed = false;
        for body in lines.by_ref() {
            if body == end {
                closed = true;
                break;
            }
            if body.starts_with("-----") {
                return Err(Error::Armor("mismatched END line"));
            }
            // RFC 1421 headers ("Proc-Type: ...") carry no payload.
            if body.contains(':') {
                continue;
            }
            b64.push_str(body);
        }
        if !closed {
            return Err(Error::Armor("missing END line"));
        }
        let data = STANDARD
            .decode(b64.as_bytes())
            .map_err(|_| Error::Armor("invalid base64 body"))?;
        blocks.push(ArmorBlock {
            label: label.to_string(),
            data,
        });
    }
    Ok(blocks)
}
