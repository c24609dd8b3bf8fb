//! Chunked export stream adapter
//!
//! A container export arrives as a sequence of byte chunks of arbitrary size.
//! Archive readers want to ask for "the next N bytes" instead, so
//! [`StreamAdapter`] re-frames the chunk sequence into sized reads while
//! holding at most one partially consumed chunk.

use bytes::Bytes;
use std::io::{self, Read};

pub struct StreamAdapter<I> {
    source: I,
    /// Current chunk and the offset of its first unread byte
    pending: Option<(Bytes, usize)>,
    exhausted: bool,
}

impl<I> StreamAdapter<I>
where
    I: Iterator<Item = io::Result<Bytes>>,
{
    pub fn new(source: I) -> Self {
        Self {
            source,
            pending: None,
            exhausted: false,
        }
    }

    /// Read up to `count` bytes
    ///
    /// The result is shorter than `count` only when the source has run dry.
    /// `count == 0` never touches the source.
    pub fn read_up_to(&mut self, count: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(count.min(64 * 1024));
        while out.len() < count {
            let Some((chunk, offset)) = self.current_chunk()? else {
                break;
            };
            let take = (count - out.len()).min(chunk.len() - *offset);
            out.extend_from_slice(&chunk[*offset..*offset + take]);
            *offset += take;
            self.release_if_drained();
        }
        Ok(out)
    }

    /// Drop the pending chunk. Safe to call more than once.
    pub fn close(&mut self) {
        self.pending = None;
    }

    /// Bytes held back from the last partially consumed chunk
    pub fn pending_len(&self) -> usize {
        self.pending
            .as_ref()
            .map(|(chunk, offset)| chunk.len() - offset)
            .unwrap_or(0)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.pending.is_none()
    }

    /// Make sure a chunk with unread bytes is pending, pulling from the
    /// source only when the previous one is used up.
    fn current_chunk(&mut self) -> io::Result<Option<&mut (Bytes, usize)>> {
        while self.pending.is_none() {
            if self.exhausted {
                return Ok(None);
            }
            match self.source.next() {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => self.pending = Some((chunk, 0)),
                Some(Err(e)) => return Err(e),
                None => self.exhausted = true,
            }
        }
        Ok(self.pending.as_mut())
    }

    fn release_if_drained(&mut self) {
        if let Some((chunk, offset)) = &self.pending {
            if *offset >= chunk.len() {
                self.pending = None;
            }
        }
    }
}

impl<I> Read for StreamAdapter<I>
where
    I: Iterator<Item = io::Result<Bytes>>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let Some((chunk, offset)) = self.current_chunk()? else {
                break;
            };
            let take = (buf.len() - filled).min(chunk.len() - *offset);
            buf[filled..filled + take].copy_from_slice(&chunk[*offset..*offset + take]);
            *offset += take;
            filled += take;
            self.release_if_drained();
        }
        Ok(filled)
    }
}

/// Build an adapter over in-memory chunks
pub fn from_chunks<C>(chunks: C) -> StreamAdapter<impl Iterator<Item = io::Result<Bytes>>>
where
    C: IntoIterator,
    C::Item: Into<Bytes>,
{
    StreamAdapter::new(chunks.into_iter().map(|c| Ok(c.into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn chunks() -> Vec<&'static [u8]> {
        vec![
            &b"hello"[..],
            &b" "[..],
            &b""[..],
            &b"chunked world"[..],
            &b"!"[..],
        ]
    }

    fn concat() -> Vec<u8> {
        chunks().concat()
    }

    #[test]
    fn test_reassembles_with_mixed_read_sizes() {
        for sizes in [
            vec![1usize, 2, 3, 100],
            vec![5, 1, 13, 1, 0, 10],
            vec![20, 0],
            vec![4, 4, 4, 4, 4, 4],
            vec![0, 0, 7, 50],
        ] {
            let mut adapter = from_chunks(chunks());
            let mut out = Vec::new();
            for size in &sizes {
                out.extend(adapter.read_up_to(*size).unwrap());
            }
            // drain whatever the size list left behind
            out.extend(adapter.read_up_to(usize::MAX / 2).unwrap());
            assert_eq!(out, concat(), "read sizes {:?}", sizes);
        }
    }

    /// Small deterministic generator so failures reproduce
    struct Lcg(u64);

    impl Lcg {
        fn below(&mut self, bound: usize) -> usize {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((self.0 >> 33) as usize) % bound.max(1)
        }
    }

    #[test]
    fn test_reassembles_generated_chunkings() {
        let mut rng = Lcg(0x5eed);
        for len in 0..96usize {
            for _ in 0..8 {
                let data: Vec<u8> = (0..len).map(|i| (i * 31 + len) as u8).collect();

                // random cut points, including empty chunks
                let mut chunks = Vec::new();
                let mut rest = &data[..];
                while !rest.is_empty() || rng.below(4) == 0 {
                    let take = rng.below(rest.len().min(24) + 1);
                    chunks.push(rest[..take].to_vec());
                    rest = &rest[take..];
                    if rest.is_empty() && chunks.len() > len + 4 {
                        break;
                    }
                }

                let mut adapter = from_chunks(chunks.clone());
                let mut out = Vec::new();
                let mut sizes = Vec::new();
                loop {
                    // sizes up to several chunks wide, zero included
                    let size = rng.below(64);
                    sizes.push(size);
                    let read = adapter.read_up_to(size).unwrap();
                    assert!(read.len() <= size);
                    let short = read.len() < size;
                    out.extend(read);
                    if short {
                        assert_eq!(out.len(), len, "short read before end, sizes {:?}", sizes);
                        break;
                    }
                }

                assert_eq!(out, data, "chunks {:?} sizes {:?}", chunks, sizes);
                assert!(adapter.read_up_to(8).unwrap().is_empty());
            }
        }
    }

    #[test]
    fn test_read_spanning_chunks_is_full_length() {
        let mut adapter = from_chunks(chunks());
        let out = adapter.read_up_to(8).unwrap();
        assert_eq!(out, b"hello ch");
        assert_eq!(adapter.pending_len(), "unked world".len());
    }

    #[test]
    fn test_read_zero_does_not_pull() {
        let pulls = Rc::new(Cell::new(0));
        let counter = pulls.clone();
        let source = vec![Bytes::from_static(b"abc")].into_iter().map(move |c| {
            counter.set(counter.get() + 1);
            Ok(c)
        });
        let mut adapter = StreamAdapter::new(source);

        assert!(adapter.read_up_to(0).unwrap().is_empty());
        assert_eq!(pulls.get(), 0);
        assert_eq!(adapter.pending_len(), 0);

        assert_eq!(adapter.read_up_to(1).unwrap(), b"a");
        assert_eq!(pulls.get(), 1);
        assert!(adapter.read_up_to(0).unwrap().is_empty());
        assert_eq!(adapter.pending_len(), 2);
    }

    #[test]
    fn test_pulls_only_what_is_needed() {
        let pulls = Rc::new(Cell::new(0));
        let counter = pulls.clone();
        let source = (0..10u8).map(move |i| {
            counter.set(counter.get() + 1);
            Ok(Bytes::from(vec![i; 4]))
        });
        let mut adapter = StreamAdapter::new(source);

        adapter.read_up_to(4).unwrap();
        assert_eq!(pulls.get(), 1);
        adapter.read_up_to(5).unwrap();
        assert_eq!(pulls.get(), 3);
    }

    #[test]
    fn test_reads_after_exhaustion_return_short() {
        let mut adapter = from_chunks(vec![&b"xyz"[..]]);
        assert_eq!(adapter.read_up_to(10).unwrap(), b"xyz");
        assert!(adapter.is_exhausted());
        assert!(adapter.read_up_to(10).unwrap().is_empty());
        assert!(adapter.read_up_to(1).unwrap().is_empty());
    }

    #[test]
    fn test_source_error_propagates() {
        let source = vec![
            Ok(Bytes::from_static(b"ok")),
            Err(io::Error::other("export broke")),
        ]
        .into_iter();
        let mut adapter = StreamAdapter::new(source);

        assert_eq!(adapter.read_up_to(2).unwrap(), b"ok");
        let err = adapter.read_up_to(1).unwrap_err();
        assert_eq!(err.to_string(), "export broke");
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut adapter = from_chunks(vec![&b"abcdef"[..]]);
        adapter.read_up_to(2).unwrap();
        adapter.close();
        adapter.close();
        assert_eq!(adapter.pending_len(), 0);
    }

    #[test]
    fn test_io_read_impl() {
        let mut adapter = from_chunks(chunks());
        let mut out = Vec::new();
        adapter.read_to_end(&mut out).unwrap();
        assert_eq!(out, concat());

        let mut buf = [0u8; 4];
        assert_eq!(adapter.read(&mut buf).unwrap(), 0);
    }
}
