//! Detector buffer decoder interface.
//!
//! Decoding raw mapping buffers into region-of-interest counts is done by an
//! external collaborator. This module fixes the array shapes on both sides of that
//! contract:
//!
//! - input: `[frame, module, raw word]` as captured by the file plugin
//! - output: `[frame, module, roi]` integer counts
//!
//! The crate never interprets raw words itself.

use crate::error::{ScanError, ScanResult};

/// Captured frames, shaped `[frames, modules, words]`, stored row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureBuffer {
    frames: usize,
    modules: usize,
    words: usize,
    data: Vec<u16>,
}

impl CaptureBuffer {
    /// Wrap `data`, failing with `ScanError::Decode` if its length does not match the shape.
    pub fn new(frames: usize, modules: usize, words: usize, data: Vec<u16>) -> ScanResult<Self> {
        let expected = checked_len(frames, modules, words)?;
        if data.len() != expected {
            return Err(ScanError::Decode(format!(
                "buffer holds {} words, shape [{}, {}, {}] needs {}",
                data.len(),
                frames,
                modules,
                words,
                expected
            )));
        }
        Ok(Self {
            frames,
            modules,
            words,
            data,
        })
    }

    /// `[frames, modules, words]`
    pub fn shape(&self) -> [usize; 3] {
        [self.frames, self.modules, self.words]
    }

    /// Raw words of one module in one frame.
    pub fn module_words(&self, frame: usize, module: usize) -> Option<&[u16]> {
        if frame >= self.frames || module >= self.modules {
            return None;
        }
        let start = (frame * self.modules + module) * self.words;
        self.data.get(start..start + self.words)
    }
}

/// Per-frame, per-module ROI counts, shaped `[frames, modules, rois]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiCounts {
    frames: usize,
    modules: usize,
    rois: usize,
    counts: Vec<u32>,
}

impl RoiCounts {
    /// Wrap `counts`, failing with `ScanError::Decode` if its length does not match the shape.
    pub fn new(frames: usize, modules: usize, rois: usize, counts: Vec<u32>) -> ScanResult<Self> {
        let expected = checked_len(frames, modules, rois)?;
        if counts.len() != expected {
            return Err(ScanError::Decode(format!(
                "{} counts do not fill shape [{}, {}, {}]",
                counts.len(),
                frames,
                modules,
                rois
            )));
        }
        Ok(Self {
            frames,
            modules,
            rois,
            counts,
        })
    }

    /// `[frames, modules, rois]`
    pub fn shape(&self) -> [usize; 3] {
        [self.frames, self.modules, self.rois]
    }

    /// Count for one ROI, or `None` out of range.
    pub fn get(&self, frame: usize, module: usize, roi: usize) -> Option<u32> {
        if frame >= self.frames || module >= self.modules || roi >= self.rois {
            return None;
        }
        self.counts
            .get((frame * self.modules + module) * self.rois + roi)
            .copied()
    }

    /// One ROI of one module across every frame, e.g. for plotting a row.
    pub fn roi_series(&self, module: usize, roi: usize) -> Vec<u32> {
        (0..self.frames)
            .filter_map(|frame| self.get(frame, module, roi))
            .collect()
    }
}

/// Converts captured buffers into ROI counts. Implemented outside this crate.
pub trait BufferDecoder: Send + Sync {
    /// Decode every frame of `buffer`, keeping the frame and module axes.
    fn decode(&self, buffer: &CaptureBuffer) -> ScanResult<RoiCounts>;
}

/// Run a decoder and check that it kept the frame and module axes intact.
pub fn decode_checked(decoder: &dyn BufferDecoder, buffer: &CaptureBuffer) -> ScanResult<RoiCounts> {
    let counts = decoder.decode(buffer)?;
    let [frames, modules, _] = buffer.shape();
    let [out_frames, out_modules, _] = counts.shape();
    if (frames, modules) != (out_frames, out_modules) {
        return Err(ScanError::Decode(format!(
            "decoder returned [{}, {}, _] for a [{}, {}, _] buffer",
            out_frames, out_modules, frames, modules
        )));
    }
    Ok(counts)
}

fn checked_len(a: usize, b: usize, c: usize) -> ScanResult<usize> {
    a.checked_mul(b)
        .and_then(|ab| ab.checked_mul(c))
        .ok_or_else(|| ScanError::Decode(format!("shape [{}, {}, {}] overflows", a, b, c)))
}
