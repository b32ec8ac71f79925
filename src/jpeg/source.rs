//! Byte source adaptors for gain map discovery.
//!
//! Discovery needs two capabilities from a source: the primary image's
//! segment list and arbitrary-offset subsets (to pull secondary images out
//! of a multi-picture stream). [`MemorySource`] serves both zero-copy from
//! a resident buffer; [`StreamSource`] serves them over any `Read + Seek`
//! by rewinding, scanning incrementally, and restoring the read position.

use std::cell::OnceCell;
use std::io::{Read, Seek, SeekFrom};

use bytes::Bytes;

use crate::jpeg::segment::{Segment, SegmentScanner, StopCondition};
use crate::types::{Error, Result};

/// Uniform byte-range access over an encoded image stream.
pub trait ImageSource {
    /// Total length of the stream in bytes.
    fn len(&self) -> usize;

    /// Whether the stream is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The primary image's marker segments, scanned once and memoized.
    ///
    /// The caller-visible read position is unchanged after this returns.
    fn segments(&mut self) -> Result<&[Segment]>;

    /// Copy of the byte range `[offset, offset + size)`.
    ///
    /// Fails rather than short-reads if the range extends past the end of
    /// the stream. The returned buffer may borrow the source's storage or
    /// own a private copy; callers must not assume which.
    fn subset(&mut self, offset: usize, size: usize) -> Result<Bytes>;

    /// Read forward from the current position, returning the number of
    /// bytes read; zero means end of stream. This is the fill primitive
    /// for driving a pull-based codec.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Skip `count` bytes forward from the current position. Fails if the
    /// skip would run past the end of the stream.
    fn skip(&mut self, count: usize) -> Result<()>;
}

/// A fully-resident source; scanning and subsetting are zero-copy.
#[derive(Debug)]
pub struct MemorySource {
    data: Bytes,
    position: usize,
    segments: OnceCell<Vec<Segment>>,
}

impl MemorySource {
    /// Create a source over a resident buffer.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: 0,
            segments: OnceCell::new(),
        }
    }

    /// The underlying buffer.
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl ImageSource for MemorySource {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn segments(&mut self) -> Result<&[Segment]> {
        if self.segments.get().is_none() {
            let mut scanner = SegmentScanner::new(StopCondition::at_end_of_image());
            scanner.write(&self.data);
            let scanned = scanner.finish()?;
            let _ = self.segments.set(scanned);
        }
        Ok(self.segments.get().map(Vec::as_slice).unwrap_or(&[]))
    }

    fn subset(&mut self, offset: usize, size: usize) -> Result<Bytes> {
        let end = offset
            .checked_add(size)
            .ok_or_else(|| Error::SegmentScan("subset range overflows".into()))?;
        if end > self.data.len() {
            return Err(Error::SegmentScan(format!(
                "subset [{}, {}) extends past the {} byte source",
                offset,
                end,
                self.data.len()
            )));
        }
        Ok(self.data.slice(offset..end))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let available = self.data.len() - self.position;
        let count = buf.len().min(available);
        buf[..count].copy_from_slice(&self.data[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }

    fn skip(&mut self, count: usize) -> Result<()> {
        let target = self
            .position
            .checked_add(count)
            .filter(|&target| target <= self.data.len())
            .ok_or_else(|| {
                Error::SegmentScan(format!(
                    "skip of {} bytes from {} runs past the {} byte source",
                    count,
                    self.position,
                    self.data.len()
                ))
            })?;
        self.position = target;
        Ok(())
    }
}

/// A sequential source with best-effort seek support.
///
/// The stream is addressed from byte 0 regardless of the reader's position
/// at construction time; every operation restores the position it found.
#[derive(Debug)]
pub struct StreamSource<R> {
    reader: R,
    length: usize,
    segments: OnceCell<Vec<Segment>>,
}

impl<R: Read + Seek> StreamSource<R> {
    /// Create a source over a seekable reader.
    pub fn new(mut reader: R) -> Result<Self> {
        let position = reader.stream_position()?;
        let length = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(position))?;
        Ok(Self {
            reader,
            length: length as usize,
            segments: OnceCell::new(),
        })
    }

    /// Give the reader back, consuming the source.
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn scan_all(&mut self) -> Result<Vec<Segment>> {
        let position = self.reader.stream_position()?;
        let mut guard = RestorePosition::new(&mut self.reader, position);
        guard.reader.seek(SeekFrom::Start(0))?;

        let mut scanner = SegmentScanner::new(StopCondition::at_end_of_image());
        let mut buf = [0u8; 8192];
        loop {
            let n = guard.reader.read(&mut buf)?;
            if n == 0 || scanner.is_done() || scanner.had_error() {
                break;
            }
            scanner.write(&buf[..n]);
        }
        scanner.finish()
    }
}

impl<R: Read + Seek> ImageSource for StreamSource<R> {
    fn len(&self) -> usize {
        self.length
    }

    fn segments(&mut self) -> Result<&[Segment]> {
        if self.segments.get().is_none() {
            let scanned = self.scan_all()?;
            let _ = self.segments.set(scanned);
        }
        Ok(self.segments.get().map(Vec::as_slice).unwrap_or(&[]))
    }

    fn subset(&mut self, offset: usize, size: usize) -> Result<Bytes> {
        let end = offset
            .checked_add(size)
            .ok_or_else(|| Error::SegmentScan("subset range overflows".into()))?;
        if end > self.length {
            return Err(Error::SegmentScan(format!(
                "subset [{}, {}) extends past the {} byte source",
                offset, end, self.length
            )));
        }

        let position = self.reader.stream_position()?;
        let mut guard = RestorePosition::new(&mut self.reader, position);
        guard.reader.seek(SeekFrom::Start(offset as u64))?;
        let mut out = vec![0u8; size];
        guard.reader.read_exact(&mut out)?;
        Ok(Bytes::from(out))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.reader.read(buf)?)
    }

    fn skip(&mut self, count: usize) -> Result<()> {
        let position = self.reader.stream_position()? as usize;
        if position.checked_add(count).map(|t| t > self.length).unwrap_or(true) {
            return Err(Error::SegmentScan(format!(
                "skip of {} bytes from {} runs past the {} byte source",
                count, position, self.length
            )));
        }
        self.reader.seek(SeekFrom::Current(count as i64))?;
        Ok(())
    }
}

/// Restores a reader's position on drop, so early returns cannot leave the
/// caller-visible position moved.
struct RestorePosition<'a, R: Seek> {
    reader: &'a mut R,
    position: u64,
}

impl<'a, R: Seek> RestorePosition<'a, R> {
    fn new(reader: &'a mut R, position: u64) -> Self {
        Self { reader, position }
    }
}

impl<R: Seek> Drop for RestorePosition<'_, R> {
    fn drop(&mut self) {
        let _ = self.reader.seek(SeekFrom::Start(self.position));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg::markers;
    use std::io::Cursor;

    fn two_image_stream() -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8]; // SOI
        data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, 0x10, 0x20]); // APP0
        data.extend_from_slice(&[0xFF, 0xD9]); // EOI
        data.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xD9]); // trailing image
        data
    }

    #[test]
    fn test_memory_source_segments() {
        let mut source = MemorySource::new(two_image_stream());
        let segments = source.segments().unwrap();
        // The scan covers the primary image only.
        let markers_seen: Vec<u8> = segments.iter().map(|s| s.marker).collect();
        assert_eq!(markers_seen, vec![markers::SOI, markers::APP0, markers::EOI]);
    }

    #[test]
    fn test_memory_source_subset_bounds() {
        let data = two_image_stream();
        let len = data.len();
        let mut source = MemorySource::new(data);

        let tail = source.subset(len - 4, 4).unwrap();
        assert_eq!(&tail[..], &[0xFF, 0xD8, 0xFF, 0xD9]);

        assert!(source.subset(len - 2, 4).is_err());
        assert!(source.subset(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_stream_source_matches_memory_source() {
        let data = two_image_stream();
        let mut memory = MemorySource::new(data.clone());
        let mut stream = StreamSource::new(Cursor::new(data.clone())).unwrap();

        assert_eq!(memory.len(), stream.len());
        assert_eq!(memory.segments().unwrap(), stream.segments().unwrap());
        assert_eq!(
            memory.subset(2, 6).unwrap(),
            stream.subset(2, 6).unwrap()
        );
    }

    #[test]
    fn test_stream_source_restores_position() {
        let data = two_image_stream();
        let mut cursor = Cursor::new(data.clone());
        cursor.set_position(3);
        let mut source = StreamSource::new(cursor).unwrap();

        source.segments().unwrap();
        source.subset(0, 2).unwrap();

        assert_eq!(source.into_inner().position(), 3);
    }

    #[test]
    fn test_stream_source_restores_position_on_scan_failure() {
        let mut cursor = Cursor::new(vec![0x00u8, 0x01, 0x02, 0x03]);
        cursor.set_position(1);
        let mut source = StreamSource::new(cursor).unwrap();

        assert!(source.segments().is_err());
        assert_eq!(source.into_inner().position(), 1);
    }

    #[test]
    fn test_stream_source_subset_never_short_reads() {
        let mut source = StreamSource::new(Cursor::new(vec![1u8, 2, 3])).unwrap();
        assert!(source.subset(1, 5).is_err());
    }

    #[test]
    fn test_read_and_skip_primitives_agree() {
        let data = two_image_stream();
        let mut memory = MemorySource::new(data.clone());
        let mut stream = StreamSource::new(Cursor::new(data.clone())).unwrap();

        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        assert_eq!(memory.read(&mut a).unwrap(), 4);
        assert_eq!(stream.read(&mut b).unwrap(), 4);
        assert_eq!(a, b);

        memory.skip(2).unwrap();
        stream.skip(2).unwrap();
        assert_eq!(memory.read(&mut a).unwrap(), 4);
        assert_eq!(stream.read(&mut b).unwrap(), 4);
        assert_eq!(a, b);

        // Skipping past the end fails on both.
        assert!(memory.skip(data.len()).is_err());
        assert!(stream.skip(data.len()).is_err());
    }

    #[test]
    fn test_segments_do_not_move_the_read_position() {
        let data = two_image_stream();
        let mut source = MemorySource::new(data);

        let mut before = [0u8; 2];
        source.read(&mut before).unwrap();
        source.segments().unwrap();

        let mut after = [0u8; 2];
        source.read(&mut after).unwrap();
        // Bytes 2 and 3 follow bytes 0 and 1: the scan did not disturb the
        // position.
        assert_eq!(before, [0xFF, 0xD8]);
        assert_eq!(after, [0xFF, 0xE0]);
    }
}
