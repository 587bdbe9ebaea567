// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection receive-buffer state machine.
//!
//! Grounded on `message.c`'s `lwdistcomm_msg_input`: bytes accumulate
//! into a single buffer sized for one max frame plus one more being
//! assembled; complete frames are delivered via callback and the tail
//! is shifted down, matching the original's `memmove` loop.

use super::header::{Header, HEADER_LEN, MSG_MAX_LEN};

/// A fully delivered frame, borrowing from the connection's receive
/// buffer. The callback must copy out anything it needs to outlive
/// the call.
pub struct Frame<'a> {
    pub header: Header,
    pub url: &'a str,
    pub payload: &'a [u8],
}

/// Per-connection receive buffer.
///
/// Capacity is two max frames: one fully received frame can sit behind
/// the one currently being accumulated without forcing an eager
/// `memmove` after every `feed`.
pub struct RecvBuffer {
    buf: Vec<u8>,
    cur_len: usize,
}

impl Default for RecvBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecvBuffer {
    pub fn new() -> Self {
        RecvBuffer {
            buf: vec![0u8; MSG_MAX_LEN * 2],
            cur_len: 0,
        }
    }

    /// Feed newly read bytes into the buffer and deliver every frame
    /// that becomes complete as a result, in order, to `on_frame`.
    ///
    /// Returns `Ok(())` if parsing can continue, or `Err(())` if a
    /// malformed header was encountered (bad magic/version/oversize) or
    /// `on_frame` asked to stop — in both cases the caller should close
    /// the connection.
    ///
    /// Bytes beyond buffer capacity are silently truncated: this
    /// indicates a peer bug and the caller is expected to close the
    /// connection once parsing fails on the corrupted stream.
    pub fn feed<F>(&mut self, data: &[u8], mut on_frame: F) -> Result<(), ()>
    where
        F: FnMut(Frame<'_>) -> bool,
    {
        let capacity = self.buf.len();
        let copy_len = if self.cur_len + data.len() > capacity {
            capacity.saturating_sub(self.cur_len)
        } else {
            data.len()
        };
        self.buf[self.cur_len..self.cur_len + copy_len].copy_from_slice(&data[..copy_len]);
        self.cur_len += copy_len;

        loop {
            if self.cur_len < HEADER_LEN {
                break;
            }
            let header = Header::decode(&self.buf[..HEADER_LEN]);
            let total_len = match header.validate() {
                Some(len) => len,
                None => return Err(()),
            };
            if self.cur_len < total_len {
                break;
            }

            let url_start = HEADER_LEN;
            let url_end = url_start + header.url_len as usize;
            let payload_end = url_end + header.data_len as usize;
            let url = std::str::from_utf8(&self.buf[url_start..url_end]).unwrap_or("");
            let payload = &self.buf[url_end..payload_end];

            let keep_going = on_frame(Frame {
                header,
                url,
                payload,
            });

            let remaining = self.cur_len - total_len;
            if remaining > 0 {
                self.buf.copy_within(total_len..total_len + remaining, 0);
            }
            self.cur_len = remaining;

            if !keep_going {
                return Err(());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::header::{build_frame, MsgType, Status};
    use super::*;

    #[test]
    fn single_frame_in_one_chunk() {
        let frame = build_frame(MsgType::Rpc, Status::Success, 1, "/add", b"hi").unwrap();
        let mut recv = RecvBuffer::new();
        let mut delivered = 0;
        recv.feed(&frame, |f| {
            delivered += 1;
            assert_eq!(f.url, "/add");
            assert_eq!(f.payload, b"hi");
            true
        })
        .unwrap();
        assert_eq!(delivered, 1);
    }

    #[test]
    fn frame_split_across_arbitrary_chunks() {
        let frame = build_frame(MsgType::Publish, Status::Success, 9, "/foo/bar", b"payload-bytes").unwrap();
        let mut recv = RecvBuffer::new();
        let mut delivered = Vec::new();
        for chunk in frame.chunks(3) {
            recv.feed(chunk, |f| {
                delivered.push((f.url.to_string(), f.payload.to_vec()));
                true
            })
            .unwrap();
        }
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "/foo/bar");
        assert_eq!(delivered[0].1, b"payload-bytes");
    }

    #[test]
    fn two_frames_back_to_back() {
        let f1 = build_frame(MsgType::Publish, Status::Success, 1, "/a", b"1").unwrap();
        let f2 = build_frame(MsgType::Publish, Status::Success, 2, "/b", b"22").unwrap();
        let mut combined = f1.clone();
        combined.extend_from_slice(&f2);

        let mut recv = RecvBuffer::new();
        let mut seen = Vec::new();
        recv.feed(&combined, |f| {
            seen.push(f.url.to_string());
            true
        })
        .unwrap();
        assert_eq!(seen, vec!["/a".to_string(), "/b".to_string()]);
    }

    #[test]
    fn oversize_frame_rejected_without_callback() {
        let mut header_bytes = [0u8; HEADER_LEN];
        let mut header = Header::new(MsgType::Publish, Status::Success, 1);
        header.data_len = (MSG_MAX_LEN) as u32; // 12 + 0 + MSG_MAX_LEN > MSG_MAX_LEN
        header.encode(&mut header_bytes);

        let mut recv = RecvBuffer::new();
        let called = std::cell::Cell::new(false);
        let result = recv.feed(&header_bytes, |_| {
            called.set(true);
            true
        });
        assert!(result.is_err());
        assert!(!called.get());
    }

    #[test]
    fn callback_false_stops_parsing() {
        let f1 = build_frame(MsgType::Publish, Status::Success, 1, "/a", b"x").unwrap();
        let f2 = build_frame(MsgType::Publish, Status::Success, 2, "/b", b"y").unwrap();
        let mut combined = f1;
        combined.extend_from_slice(&f2);

        let mut recv = RecvBuffer::new();
        let mut count = 0;
        let result = recv.feed(&combined, |_| {
            count += 1;
            false
        });
        assert!(result.is_err());
        assert_eq!(count, 1);
    }
}
