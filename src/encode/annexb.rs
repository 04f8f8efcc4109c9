//! Minimal H.264 Annex-B bitstream helpers.

/// Non-IDR coded slice.
pub const NAL_SLICE: u8 = 1;
/// IDR coded slice (key frame).
pub const NAL_IDR: u8 = 5;
/// Sequence parameter set.
pub const NAL_SPS: u8 = 7;
/// Picture parameter set.
pub const NAL_PPS: u8 = 8;
/// Access unit delimiter.
pub const NAL_AUD: u8 = 9;

/// NAL unit type of a NAL unit without start code.
pub fn nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1f)
}

/// Split an Annex-B buffer into NAL units (start codes removed, trailing zero bytes trimmed).
pub fn nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut out = Vec::with_capacity(starts.len());
    for (k, &start) in starts.iter().enumerate() {
        let end = starts.get(k + 1).map_or(data.len(), |next| next - 3);
        let mut nal = &data[start..end];
        while let [rest @ .., 0] = nal {
            nal = rest;
        }
        if !nal.is_empty() {
            out.push(nal);
        }
    }
    out
}

/// `true` when the access unit carries an IDR slice.
pub fn is_key_frame(access_unit: &[u8]) -> bool {
    nal_units(access_unit)
        .iter()
        .any(|nal| nal_type(nal) == Some(NAL_IDR))
}

/// First SPS and PPS found in the access unit.
pub fn parameter_sets(access_unit: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let nals = nal_units(access_unit);
    let sps = nals.iter().find(|n| nal_type(n) == Some(NAL_SPS))?;
    let pps = nals.iter().find(|n| nal_type(n) == Some(NAL_PPS))?;
    Some((sps.to_vec(), pps.to_vec()))
}

/// Re-frame an access unit as 4-byte length-prefixed NAL units (AVCC), dropping delimiters and
/// parameter sets, which live in the container's sample description instead.
pub fn to_avcc(access_unit: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(access_unit.len() + 16);
    for nal in nal_units(access_unit) {
        if matches!(nal_type(nal), Some(NAL_AUD | NAL_SPS | NAL_PPS)) {
            continue;
        }
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}

/// Incremental splitter that cuts a byte stream into access units at delimiter NAL units.
///
/// Expects every access unit to begin with an AUD (ffmpeg `h264_metadata=aud=insert`).
#[derive(Debug, Default)]
pub struct AccessUnitSplitter {
    buf: Vec<u8>,
    scan_from: usize,
}

impl AccessUnitSplitter {
    /// Create an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append stream bytes and return every access unit completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(cut) = self.next_boundary() {
            let rest = self.buf.split_off(cut);
            let unit = std::mem::replace(&mut self.buf, rest);
            self.scan_from = 0;
            if !unit.is_empty() {
                out.push(unit);
            }
        }
        out
    }

    /// Return the trailing access unit at end of stream, if any bytes remain.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.scan_from = 0;
        let unit = std::mem::take(&mut self.buf);
        (!nal_units(&unit).is_empty()).then_some(unit)
    }

    // Offset of the start code of the first AUD that is not at the head of the buffer.
    fn next_boundary(&mut self) -> Option<usize> {
        let mut i = self.scan_from.max(1);
        while i + 4 <= self.buf.len() {
            if self.buf[i] == 0
                && self.buf[i + 1] == 0
                && self.buf[i + 2] == 1
                && self.buf[i + 3] & 0x1f == NAL_AUD
            {
                let cut = if self.buf[i - 1] == 0 { i - 1 } else { i };
                if cut > 0 {
                    return Some(cut);
                }
            }
            i += 1;
        }
        self.scan_from = self.buf.len().saturating_sub(3);
        None
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/annexb.rs"]
mod tests;
