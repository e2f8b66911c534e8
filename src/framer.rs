//! Frame assembly.
//!
//! [`Framer`] accumulates arriving byte chunks and hands each complete frame
//! to a callback. It cycles through three states:
//!
//! ```text
//! WaitingForLength --header parsed--> WaitingForPayload --payload sliced--> Dispatch
//!        ^                                                                    |
//!        +-------------------- frame handed to callback ---------------------+
//! ```
//!
//! A frame is never dispatched partially, and every complete frame already in
//! the buffer is dispatched before [`Framer::feed`] returns.

use bytes::{Bytes, BytesMut};

use crate::error::Result;

/// Header layout of one backend's frames.
pub trait FrameLayout {
    /// Number of header bytes preceding the payload.
    const HEADER_LEN: usize;

    /// Parse a header into `(tag, payload_len)`. `header` is exactly
    /// `HEADER_LEN` bytes. The tag is the MySQL sequence number or the
    /// Postgres message type.
    fn parse_header(header: &[u8]) -> Result<(u8, usize)>;
}

/// One complete protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u8,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitingForLength,
    WaitingForPayload { tag: u8, len: usize },
}

/// Accumulation buffer plus framing state for one connection.
#[derive(Debug)]
pub struct Framer<L> {
    buffer: BytesMut,
    state: State,
    _layout: std::marker::PhantomData<L>,
}

impl<L: FrameLayout> Default for Framer<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: FrameLayout> Framer<L> {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(32 * 1024),
            state: State::WaitingForLength,
            _layout: std::marker::PhantomData,
        }
    }

    /// Bytes received but not yet part of a dispatched frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append `data` and dispatch every frame it completes.
    ///
    /// An error from the header parser or from `on_frame` stops dispatch and
    /// is returned; the connection should be considered broken.
    pub fn feed<F>(&mut self, data: &[u8], mut on_frame: F) -> Result<()>
    where
        F: FnMut(Frame) -> Result<()>,
    {
        self.buffer.extend_from_slice(data);

        loop {
            match self.state {
                State::WaitingForLength => {
                    if self.buffer.len() < L::HEADER_LEN {
                        return Ok(());
                    }
                    let header = self.buffer.split_to(L::HEADER_LEN);
                    let (tag, len) = L::parse_header(&header)?;
                    self.state = State::WaitingForPayload { tag, len };
                }
                State::WaitingForPayload { tag, len } => {
                    if self.buffer.len() < len {
                        return Ok(());
                    }
                    let payload = self.buffer.split_to(len).freeze();
                    self.state = State::WaitingForLength;
                    tracing::trace!(tag, len, "frame complete");
                    on_frame(Frame { tag, payload })?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    /// Two-byte header: tag then length.
    struct TinyLayout;

    impl FrameLayout for TinyLayout {
        const HEADER_LEN: usize = 2;

        fn parse_header(header: &[u8]) -> Result<(u8, usize)> {
            if header[1] == 0xFF {
                return Err(Error::protocol("bad length"));
            }
            Ok((header[0], header[1] as usize))
        }
    }

    fn collect(framer: &mut Framer<TinyLayout>, data: &[u8], out: &mut Vec<Frame>) {
        framer
            .feed(data, |frame| {
                out.push(frame);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_chunking_does_not_change_frames() {
        let stream = [1, 3, b'a', b'b', b'c', 2, 0, 3, 1, b'z'];

        let mut whole = Vec::new();
        collect(&mut Framer::new(), &stream, &mut whole);

        let mut bytewise = Vec::new();
        let mut framer = Framer::new();
        for b in stream {
            collect(&mut framer, &[b], &mut bytewise);
        }

        assert_eq!(whole.len(), 3);
        assert_eq!(whole, bytewise);
        assert_eq!(whole[0].payload, Bytes::from_static(b"abc"));
        assert_eq!(whole[1].payload.len(), 0);
        assert_eq!(whole[2].tag, 3);
    }

    #[test]
    fn test_partial_frame_is_held_back() {
        let mut frames = Vec::new();
        let mut framer = Framer::new();
        collect(&mut framer, &[7, 4, b'a', b'b'], &mut frames);
        assert!(frames.is_empty());
        assert_eq!(framer.buffered(), 2);
        collect(&mut framer, &[b'c', b'd', 8], &mut frames);
        assert_eq!(frames.len(), 1);
        assert_eq!(framer.buffered(), 1);
    }

    #[test]
    fn test_header_error_is_fatal() {
        let mut framer = Framer::<TinyLayout>::new();
        let result = framer.feed(&[1, 0xFF], |_| Ok(()));
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
