//! Pack-spec parsing.
//!
//! Callers name packs as comma-separated integers and/or `a-b` inclusive
//! ranges, with an optional leading `#` per element: `"#1-5,7,20-22"`.

use crate::error::EngineError;

/// Parse a pack spec into an ascending, deduplicated set of pack numbers.
pub fn parse_pack_spec(spec: &str) -> Result<Vec<u32>, EngineError> {
    let mut packs = Vec::new();
    for part in spec.split(',') {
        let part = part.trim().trim_start_matches('#');
        if part.is_empty() {
            continue;
        }
        match part.split_once('-') {
            Some((a, b)) => {
                let lo = parse_pack(a)?;
                let hi = parse_pack(b)?;
                if lo > hi {
                    return Err(EngineError::Parse(format!("descending range '{}'", part)));
                }
                packs.extend(lo..=hi);
            }
            None => packs.push(parse_pack(part)?),
        }
    }
    let packs = normalize(packs);
    if packs.is_empty() {
        return Err(EngineError::Parse(format!("no packs in spec '{}'", spec)));
    }
    Ok(packs)
}

fn parse_pack(s: &str) -> Result<u32, EngineError> {
    s.trim()
        .trim_start_matches('#')
        .parse::<u32>()
        .map_err(|_| EngineError::Parse(format!("'{}' is not a pack number", s.trim())))
}

/// Sort ascending, drop duplicates and the reserved pack number 0.
pub fn normalize(packs: impl IntoIterator<Item = u32>) -> Vec<u32> {
    let mut packs: Vec<u32> = packs.into_iter().filter(|&p| p != 0).collect();
    packs.sort_unstable();
    packs.dedup();
    packs
}
