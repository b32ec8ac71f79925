//! JPEG marker segment scanning.
//!
//! Two scanning modes over the same state machine semantics: an incremental
//! scanner driven by byte chunks (for sources without random access) and a
//! seekable-stream scan that skips parameter bytes with seeks. Both produce
//! identical segment boundaries for identical input bytes.

use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;

use crate::jpeg::markers;
use crate::limits;
use crate::types::{Error, Result};

/// One marker-delimited unit of a JPEG stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Byte offset of the marker's `0xFF` prefix in the scanned stream.
    pub offset: usize,
    /// The marker code.
    pub marker: u8,
    /// Parameter length, including the two length bytes themselves but
    /// excluding the two marker code bytes. Zero for stand-alone markers.
    pub parameter_length: u16,
}

impl Segment {
    /// Byte range of the parameter bytes (after the length field) within
    /// the stream this segment was scanned from.
    ///
    /// Returns `None` for stand-alone markers.
    pub fn parameter_range(&self) -> Option<Range<usize>> {
        if self.parameter_length < 2 {
            return None;
        }
        let start = self.offset + markers::MARKER_CODE_SIZE + markers::PARAMETER_LENGTH_SIZE;
        let end = self.offset + markers::MARKER_CODE_SIZE + self.parameter_length as usize;
        Some(start..end)
    }

    /// Slice the parameter bytes out of the buffer the segment was scanned
    /// from. Returns `None` for stand-alone markers or if the buffer is too
    /// short to contain them.
    pub fn parameters<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        data.get(self.parameter_range()?)
    }
}

/// When a scan should stop.
#[derive(Debug, Clone, Copy)]
pub struct StopCondition {
    marker: u8,
    count: u32,
}

impl StopCondition {
    /// Stop after the `count`-th occurrence of `marker`.
    pub fn at_marker(marker: u8, count: u32) -> Self {
        Self {
            marker,
            count: count.max(1),
        }
    }

    /// Stop at the first Start-Of-Scan marker.
    pub fn at_start_of_scan() -> Self {
        Self::at_marker(markers::SOS, 1)
    }

    /// Stop at the first End-Of-Image marker.
    pub fn at_end_of_image() -> Self {
        Self::at_marker(markers::EOI, 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Expecting the 0xFF of the leading SOI marker.
    ImageStartByte0,
    /// Expecting the 0xD8 of the leading SOI marker.
    ImageStartByte1,
    /// Expecting the high byte of a parameter length.
    LengthByte0,
    /// Expecting the low byte of a parameter length.
    LengthByte1,
    /// Consuming parameter bytes.
    Parameters,
    /// Skipping entropy-coded data, looking for a 0xFF.
    EntropySkip,
    /// Saw a 0xFF inside entropy-coded data; the next byte decides.
    EntropySentinel,
    Done,
    Error,
}

/// Incremental segment scanner.
///
/// Feed byte chunks with [`SegmentScanner::write`]; inspect progress with
/// [`SegmentScanner::is_done`] / [`SegmentScanner::had_error`] and the
/// accumulated [`SegmentScanner::segments`] at any point.
#[derive(Debug)]
pub struct SegmentScanner {
    stop: StopCondition,
    state: State,
    position: usize,
    segments: Vec<Segment>,
    stop_seen: u32,
    open_images: u32,
    // Scratch for the segment currently being assembled.
    marker: u8,
    marker_offset: usize,
    length_high: u8,
    remaining_parameters: usize,
    error: Option<String>,
}

impl SegmentScanner {
    /// Create a scanner that stops at the given condition.
    pub fn new(stop: StopCondition) -> Self {
        Self {
            stop,
            state: State::ImageStartByte0,
            position: 0,
            segments: Vec::new(),
            stop_seen: 0,
            open_images: 0,
            marker: 0,
            marker_offset: 0,
            length_high: 0,
            remaining_parameters: 0,
            error: None,
        }
    }

    /// Feed the next chunk of bytes. Bytes past the stop condition or past
    /// an error are ignored.
    pub fn write(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            if self.state == State::Done || self.state == State::Error {
                return;
            }
            self.on_byte(byte);
            self.position += 1;
        }
    }

    /// Whether the stop condition has been reached.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Whether the scan failed.
    pub fn had_error(&self) -> bool {
        self.state == State::Error
    }

    /// The segments recorded so far, in stream order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Consume the scanner, returning the segment list if the stop
    /// condition was reached.
    pub fn finish(self) -> Result<Vec<Segment>> {
        match self.state {
            State::Done => Ok(self.segments),
            State::Error => Err(Error::SegmentScan(
                self.error.unwrap_or_else(|| "scan failed".into()),
            )),
            _ => Err(Error::SegmentScan(
                "stream ended before the stop condition was reached".into(),
            )),
        }
    }

    fn fail(&mut self, message: String) {
        self.state = State::Error;
        self.error = Some(message);
    }

    fn on_byte(&mut self, byte: u8) {
        match self.state {
            State::ImageStartByte0 => {
                if byte != 0xFF {
                    self.fail(format!("expected 0xFF at offset 0, found {:#04x}", byte));
                    return;
                }
                self.state = State::ImageStartByte1;
            }
            State::ImageStartByte1 => {
                if byte != markers::SOI {
                    self.fail(format!(
                        "expected SOI at stream start, found marker {:#04x}",
                        byte
                    ));
                    return;
                }
                self.on_marker(markers::SOI, 0);
            }
            State::LengthByte0 => {
                self.length_high = byte;
                self.state = State::LengthByte1;
            }
            State::LengthByte1 => {
                let length = u16::from_be_bytes([self.length_high, byte]);
                if length < 2 {
                    self.fail(format!(
                        "parameter length {} of marker {:#04x} is below the \
                         2 bytes of the length field",
                        length, self.marker
                    ));
                    return;
                }
                self.record(self.marker_offset, self.marker, length);
                if self.state == State::Done || self.state == State::Error {
                    return;
                }
                self.remaining_parameters = length as usize - 2;
                self.state = if self.remaining_parameters == 0 {
                    State::EntropySkip
                } else {
                    State::Parameters
                };
            }
            State::Parameters => {
                self.remaining_parameters -= 1;
                if self.remaining_parameters == 0 {
                    self.state = State::EntropySkip;
                }
            }
            State::EntropySkip => {
                if byte == 0xFF {
                    self.state = State::EntropySentinel;
                }
            }
            State::EntropySentinel => match byte {
                // Byte-stuffing escape; still entropy-coded data.
                0x00 => self.state = State::EntropySkip,
                // Fill byte; the marker code is still to come.
                0xFF => {}
                _ => self.on_marker(byte, self.position - 1),
            },
            State::Done | State::Error => {}
        }
    }

    /// A marker code was recognized at `offset`.
    fn on_marker(&mut self, marker: u8, offset: usize) {
        match marker {
            markers::SOI => {
                if self.open_images > 0 {
                    self.fail(format!(
                        "SOI at offset {} without a matching prior EOI",
                        offset
                    ));
                    return;
                }
                self.open_images += 1;
            }
            markers::EOI => {
                if self.open_images == 0 {
                    self.fail(format!(
                        "EOI at offset {} without a prior unmatched SOI",
                        offset
                    ));
                    return;
                }
                self.open_images -= 1;
            }
            _ => {}
        }

        if markers::is_standalone(marker) {
            self.record(offset, marker, 0);
            if self.state != State::Done && self.state != State::Error {
                self.state = State::EntropySkip;
            }
        } else {
            self.marker = marker;
            self.marker_offset = offset;
            self.state = State::LengthByte0;
        }
    }

    fn record(&mut self, offset: usize, marker: u8, parameter_length: u16) {
        if self.segments.len() >= limits::MAX_SEGMENT_COUNT {
            self.fail(format!(
                "more than {} segments in one stream",
                limits::MAX_SEGMENT_COUNT
            ));
            return;
        }
        self.segments.push(Segment {
            offset,
            marker,
            parameter_length,
        });
        if marker == self.stop.marker {
            self.stop_seen += 1;
            if self.stop_seen >= self.stop.count {
                self.state = State::Done;
            }
        }
    }
}

/// Scan a seekable stream for marker segments.
///
/// Parameter bytes are skipped with seeks instead of reads; entropy-coded
/// data is skipped byte by byte with the same stuffing and fill rules as
/// the incremental scanner. Offsets are relative to the reader position at
/// the time of the call, and the reader is left wherever the scan stopped.
pub fn scan_seekable<R: Read + Seek>(reader: &mut R, stop: StopCondition) -> Result<Vec<Segment>> {
    let base = reader.stream_position()?;
    let mut segments = Vec::new();
    let mut stop_seen = 0u32;
    let mut open_images = 0u32;

    // The stream must lead with SOI.
    let lead = read_two(reader)?;
    if lead != [0xFF, markers::SOI] {
        return Err(Error::SegmentScan(format!(
            "expected SOI signature, found {:#04x} {:#04x}",
            lead[0], lead[1]
        )));
    }
    open_images += 1;
    segments.push(Segment {
        offset: 0,
        marker: markers::SOI,
        parameter_length: 0,
    });
    if stop.marker == markers::SOI {
        stop_seen += 1;
        if stop_seen >= stop.count {
            return Ok(segments);
        }
    }

    loop {
        let (marker, offset) = skip_entropy(reader, base)?;

        match marker {
            markers::SOI => {
                if open_images > 0 {
                    return Err(Error::SegmentScan(format!(
                        "SOI at offset {} without a matching prior EOI",
                        offset
                    )));
                }
                open_images += 1;
            }
            markers::EOI => {
                if open_images == 0 {
                    return Err(Error::SegmentScan(format!(
                        "EOI at offset {} without a prior unmatched SOI",
                        offset
                    )));
                }
                open_images -= 1;
            }
            _ => {}
        }

        let parameter_length = if markers::is_standalone(marker) {
            0
        } else {
            let length = u16::from_be_bytes(read_two(reader)?);
            if length < 2 {
                return Err(Error::SegmentScan(format!(
                    "parameter length {} of marker {:#04x} is below the \
                     2 bytes of the length field",
                    length, marker
                )));
            }
            length
        };

        if segments.len() >= limits::MAX_SEGMENT_COUNT {
            return Err(Error::SegmentScan(format!(
                "more than {} segments in one stream",
                limits::MAX_SEGMENT_COUNT
            )));
        }
        segments.push(Segment {
            offset,
            marker,
            parameter_length,
        });
        let stopped = marker == stop.marker && {
            stop_seen += 1;
            stop_seen >= stop.count
        };
        if stopped {
            return Ok(segments);
        }

        if parameter_length > 2 {
            reader.seek(SeekFrom::Current(parameter_length as i64 - 2))?;
        }
    }
}

/// Skip entropy-coded data up to and including the next marker code byte.
/// Returns the marker code and the offset of its 0xFF prefix.
fn skip_entropy<R: Read + Seek>(reader: &mut R, base: u64) -> Result<(u8, usize)> {
    loop {
        // Scan forward to a 0xFF.
        while read_one(reader)? != 0xFF {}
        // Then past stuffing escapes and fill bytes.
        loop {
            match read_one(reader)? {
                0x00 => break,
                0xFF => continue,
                code => {
                    let position = reader.stream_position()?;
                    let offset = (position - base) as usize - 2;
                    return Ok((code, offset));
                }
            }
        }
    }
}

fn read_one<R: Read>(reader: &mut R) -> Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}

fn read_two<R: Read>(reader: &mut R) -> Result<[u8; 2]> {
    let mut bytes = [0u8; 2];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}
