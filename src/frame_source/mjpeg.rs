//! MJPEG byte stream splitter

/// JPEG start-of-image marker
const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Cuts a concatenated JPEG stream (ffmpeg `image2pipe` output) into frames
pub struct MjpegSplitter {
    buf: Vec<u8>,
    /// Offset where the EOI search resumes (inside the current frame)
    scan_from: usize,
    max_frame_bytes: usize,
}

impl MjpegSplitter {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(256 * 1024),
            scan_from: 0,
            max_frame_bytes,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        // Align buffer start on SOI
        if !self.buf.starts_with(&SOI) {
            match find(&self.buf, &SOI, 0) {
                Some(start) => {
                    self.buf.drain(..start);
                    self.scan_from = 0;
                }
                None => {
                    // Keep a trailing 0xFF, it may be half of a marker
                    let keep = usize::from(self.buf.last() == Some(&0xFF));
                    let drop_len = self.buf.len() - keep;
                    self.buf.drain(..drop_len);
                    self.scan_from = 0;
                    return None;
                }
            }
        }

        let from = self.scan_from.max(SOI.len());
        match find(&self.buf, &EOI, from) {
            Some(end) => {
                let frame: Vec<u8> = self.buf.drain(..end + EOI.len()).collect();
                self.scan_from = 0;
                Some(frame)
            }
            None => {
                if self.buf.len() > self.max_frame_bytes {
                    tracing::warn!(
                        buffered = self.buf.len(),
                        limit = self.max_frame_bytes,
                        "MJPEG frame exceeds limit, discarding"
                    );
                    self.buf.clear();
                    self.scan_from = 0;
                } else {
                    // Back off one byte so a marker split across chunks is found
                    self.scan_from = self.buf.len().saturating_sub(1);
                }
                None
            }
        }
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(2)
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = SOI.to_vec();
        v.extend_from_slice(body);
        v.extend_from_slice(&EOI);
        v
    }

    #[test]
    fn test_splits_concatenated_frames() {
        let mut splitter = MjpegSplitter::new(1024);
        let a = jpeg(&[1, 2, 3]);
        let b = jpeg(&[4, 5]);
        splitter.push(&[a.clone(), b.clone()].concat());

        assert_eq!(splitter.next_frame(), Some(a));
        assert_eq!(splitter.next_frame(), Some(b));
        assert_eq!(splitter.next_frame(), None);
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let mut splitter = MjpegSplitter::new(1024);
        let frame = jpeg(&[9, 9, 9, 9]);
        let (head, tail) = frame.split_at(frame.len() - 1);

        splitter.push(head);
        assert_eq!(splitter.next_frame(), None);
        splitter.push(tail);
        assert_eq!(splitter.next_frame(), Some(frame));
    }

    #[test]
    fn test_skips_leading_garbage() {
        let mut splitter = MjpegSplitter::new(1024);
        let frame = jpeg(&[7]);
        splitter.push(&[0x00, 0x13, 0x37]);
        assert_eq!(splitter.next_frame(), None);
        assert_eq!(splitter.buffered(), 0);

        splitter.push(&frame);
        assert_eq!(splitter.next_frame(), Some(frame));
    }

    #[test]
    fn test_oversized_frame_discarded() {
        let mut splitter = MjpegSplitter::new(8);
        splitter.push(&SOI);
        splitter.push(&[0u8; 16]);
        assert_eq!(splitter.next_frame(), None);
        assert_eq!(splitter.buffered(), 0);
    }
}
